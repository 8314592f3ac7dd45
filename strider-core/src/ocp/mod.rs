//! Per-stage optimal-control kernels: state equation, contact and impulse
//! dynamics with condensation, the switching constraint, and the stage
//! workers the driver dispatches in parallel.

mod contact_dynamics;
mod impulse_dynamics;
mod impulse_split_ocp;
mod split_ocp;
mod state_equation;
mod switching_constraint;
mod terminal_ocp;

pub use contact_dynamics::{ContactDynamics, DynamicsError};
pub use impulse_dynamics::ImpulseDynamics;
pub use impulse_split_ocp::ImpulseSplitOcp;
pub use split_ocp::{SplitOcp, SwitchingContext};
pub use state_equation::StateEquation;
pub use switching_constraint::SwitchingConstraint;
pub use terminal_ocp::TerminalOcp;
