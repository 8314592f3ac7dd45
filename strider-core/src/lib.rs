//! Strider: hybrid trajectory optimization for rigid-body robots making and
//! breaking contact.
//!
//! The crate solves hybrid optimal control problems by direct multiple
//! shooting on an event-aware grid. Given a robot model, a horizon, a cost
//! functional, inequality constraints, and a planned sequence of contact
//! events, it computes a locally optimal trajectory of configurations,
//! velocities, accelerations, contact forces, and torques, together with a
//! time-varying LQR feedback policy.
//!
//! # Algorithm
//!
//! Each Newton iteration:
//!
//! - **Linearize**: every stage evaluates its state equation (Lie-group
//!   aware on the floating-base configuration manifold), contact-consistent
//!   inverse dynamics, cost, and interior-point constraints, then condenses
//!   the acceleration/force pair and the slack/dual pairs out of the stage.
//!   Stages are processed in parallel, one work unit per grid index.
//! - **Riccati recursion**: a serial backward sweep factorizes the
//!   block-banded KKT system through impulses, lifts, and switching
//!   constraints; the forward sweep propagates the state direction and the
//!   switching-time directions.
//! - **Step selection**: the fraction-to-boundary rule bounds the primal and
//!   dual steps; a filter line search on (violation, merit) globalizes.
//!
//! Exit reasons (convergence, iteration limit, numerical breakdown,
//! intractable discretization, or a stalled line search) are reported
//! through [`SolverStatistics`]; the iteration loop neither panics nor
//! returns errors.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use strider_core::{
//!     ContactSequence, ContactStatus, Constraints, LinearChainModel, Ocp,
//!     OcpSolver, QuadraticCost, SolverOptions,
//! };
//!
//! let robot = LinearChainModel::new(1);
//! let cost = Arc::new(QuadraticCost::new(&robot).with_q_weight(&[1.0]));
//! let ocp = Ocp {
//!     robot: robot.clone(),
//!     cost,
//!     constraints: Constraints::new(),
//!     impulse_constraints: Constraints::new(),
//!     horizon: 1.0,
//!     n: 20,
//! };
//! let sequence = ContactSequence::new(ContactStatus::new(0), 0);
//! let mut solver = OcpSolver::new(ocp, sequence, SolverOptions::default())?;
//! let stats = solver.solve(0.0, &q0, &v0);
//! println!("{}", stats);
//! ```

#![warn(clippy::all)]
#![allow(clippy::too_many_arguments)] // stage kernels take the full stage context

pub mod constraints;
pub mod cost;
pub mod hybrid;
pub mod kkt;
pub mod line_search;
pub mod ocp;
pub mod problem;
pub mod riccati;
pub mod robot;
pub mod solver;

pub use constraints::{
    ConstraintComponent, ConstraintComponentData, Constraints, ConstraintsData, FrictionCone,
    JointPositionLowerLimit, JointPositionUpperLimit, JointTorquesLowerLimit,
    JointTorquesUpperLimit, JointVelocityLowerLimit, JointVelocityUpperLimit, KinematicsLevel,
};
pub use cost::{CostFunction, QuadraticCost};
pub use hybrid::{ContactSequence, DiscretizationMethod, DiscreteEventType, GridInfo, TimeDiscretization};
pub use kkt::{Direction, KktMatrix, KktResidual, Solution, SplitDirection, SplitKktMatrix, SplitKktResidual, SplitSolution};
pub use line_search::LineSearchSettings;
pub use problem::{
    IterationRecord, OcpKind, SolveStatus, SolverBuildError, SolverOptions, SolverStatistics,
};
pub use robot::{ContactStatus, ImpulseStatus, LinearChainModel, RobotModel};
pub use solver::{Ocp, OcpSolver};
