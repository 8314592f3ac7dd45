//! Hybrid structure of the horizon: contact phases, discrete events, and the
//! event-aware time discretization.

mod contact_sequence;
mod discretization;
mod grid_info;
pub mod sto;

pub use contact_sequence::{ContactSequence, DiscreteEventType};
pub use discretization::{DiscretizationMethod, TimeDiscretization};
pub use grid_info::GridInfo;
