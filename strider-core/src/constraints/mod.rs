//! Inequality constraints handled by a primal-dual interior point method.
//!
//! Each [`ConstraintComponent`] owns the geometry of one constraint
//! (`g(s) ≤ 0` element-wise); the per-stage interior-point state lives in
//! [`ConstraintComponentData`]. Components are immutable and shared between
//! solver instances; the [`Constraints`] aggregate carries the barrier
//! parameter and the fraction-to-boundary rule and fans every operation over
//! its components.
//!
//! The slack/dual pairs never enter the Newton system directly: the
//! `condense_slack_and_dual` operation folds them into the primal KKT blocks
//! (a Schur complement on the complementarity rows) and
//! `expand_slack_and_dual` recovers their directions from the primal step.

mod data;
mod friction_cone;
mod joint_limits;
mod torque_limits;

pub use data::ConstraintComponentData;
pub use friction_cone::FrictionCone;
pub use joint_limits::{
    JointPositionLowerLimit, JointPositionUpperLimit, JointVelocityLowerLimit,
    JointVelocityUpperLimit,
};
pub use torque_limits::{JointTorquesLowerLimit, JointTorquesUpperLimit};

use std::sync::Arc;

use crate::kkt::{SplitDirection, SplitKktMatrix, SplitKktResidual, SplitSolution};
use crate::robot::ContactStatus;

/// Kinematic level at which a constraint acts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KinematicsLevel {
    Position,
    Velocity,
    Acceleration,
}

/// One inequality constraint `g(s) ≤ 0`.
///
/// Rows attached to inactive contacts must stay inert: zero residual, zero
/// complementarity, zero directions.
pub trait ConstraintComponent: Send + Sync {
    /// Number of constraint rows.
    fn dimc(&self) -> usize;

    /// Kinematic level of the constraint.
    fn kinematics_level(&self) -> KinematicsLevel;

    /// Whether `g(s) < 0` holds strictly.
    fn is_feasible(&self, status: &ContactStatus, s: &SplitSolution) -> bool;

    /// Initializes `slack ← max(−g(s), barrier)` and `dual ← barrier/slack`.
    fn set_slack(
        &self,
        status: &ContactStatus,
        s: &SplitSolution,
        data: &mut ConstraintComponentData,
        barrier: f64,
    );

    /// Evaluates `residual = g(s) + slack`, `cmpl = slack ∘ dual − μ`, and
    /// the log-barrier value.
    fn eval_constraint(
        &self,
        status: &ContactStatus,
        s: &SplitSolution,
        data: &mut ConstraintComponentData,
        barrier: f64,
    );

    /// Adds `dt · (∂g/∂s)ᵀ dual` into the KKT gradient.
    fn eval_derivatives(
        &self,
        status: &ContactStatus,
        s: &SplitSolution,
        data: &ConstraintComponentData,
        dt: f64,
        kkt_residual: &mut SplitKktResidual,
    );

    /// Adds `dt · ∂gᵀ diag(dual/slack) ∂g` into the KKT Hessian and the
    /// condensed gradient correction `dt · ∂gᵀ cond` into the KKT gradient,
    /// where `cond = (dual ∘ residual − cmpl)/slack`.
    fn condense_slack_and_dual(
        &self,
        status: &ContactStatus,
        s: &SplitSolution,
        data: &mut ConstraintComponentData,
        dt: f64,
        kkt_matrix: &mut SplitKktMatrix,
        kkt_residual: &mut SplitKktResidual,
    );

    /// Recovers `dslack = −∂g·d − residual` and
    /// `ddual = −(dual ∘ dslack + cmpl)/slack` from the primal direction.
    fn expand_slack_and_dual(
        &self,
        status: &ContactStatus,
        s: &SplitSolution,
        data: &mut ConstraintComponentData,
        d: &SplitDirection,
    );
}

/// Aggregate of shared constraint components plus the interior-point
/// parameters.
#[derive(Clone)]
pub struct Constraints {
    components: Vec<Arc<dyn ConstraintComponent>>,
    barrier: f64,
    fraction_to_boundary_rule: f64,
}

/// Per-stage interior-point state for every component of a [`Constraints`].
#[derive(Debug, Clone)]
pub struct ConstraintsData {
    /// One data block per component, in registration order.
    pub data: Vec<ConstraintComponentData>,
}

impl Default for Constraints {
    fn default() -> Self {
        Self::new()
    }
}

impl Constraints {
    /// Empty aggregate with the default barrier `1e-3` and
    /// fraction-to-boundary rule `0.995`.
    pub fn new() -> Self {
        Self {
            components: Vec::new(),
            barrier: 1.0e-3,
            fraction_to_boundary_rule: 0.995,
        }
    }

    /// Registers a shared component.
    pub fn add(&mut self, component: Arc<dyn ConstraintComponent>) {
        self.components.push(component);
    }

    /// Number of registered components.
    pub fn num_components(&self) -> usize {
        self.components.len()
    }

    /// Current barrier parameter.
    pub fn barrier(&self) -> f64 {
        self.barrier
    }

    /// Sets the barrier parameter.
    pub fn set_barrier(&mut self, barrier: f64) {
        assert!(barrier > 0.0);
        self.barrier = barrier;
    }

    /// Sets the fraction-to-boundary parameter `τ ∈ (0, 1)`.
    pub fn set_fraction_to_boundary_rule(&mut self, tau: f64) {
        assert!(tau > 0.0 && tau < 1.0);
        self.fraction_to_boundary_rule = tau;
    }

    /// Fresh interior-point data for every component.
    pub fn create_data(&self) -> ConstraintsData {
        ConstraintsData {
            data: self
                .components
                .iter()
                .map(|c| ConstraintComponentData::new(c.dimc(), self.barrier))
                .collect(),
        }
    }

    /// Whether every component is strictly feasible at `s`.
    pub fn is_feasible(&self, status: &ContactStatus, s: &SplitSolution) -> bool {
        self.components.iter().all(|c| c.is_feasible(status, s))
    }

    /// Initializes slack and dual for every component.
    pub fn set_slack_and_dual(
        &self,
        status: &ContactStatus,
        s: &SplitSolution,
        data: &mut ConstraintsData,
    ) {
        for (c, d) in self.components.iter().zip(data.data.iter_mut()) {
            c.set_slack(status, s, d, self.barrier);
        }
    }

    /// Evaluates residuals for every component.
    pub fn eval_constraint(
        &self,
        status: &ContactStatus,
        s: &SplitSolution,
        data: &mut ConstraintsData,
    ) {
        for (c, d) in self.components.iter().zip(data.data.iter_mut()) {
            c.eval_constraint(status, s, d, self.barrier);
        }
    }

    /// Evaluates residuals and adds the constraint gradients into the KKT
    /// residual.
    pub fn linearize_constraints(
        &self,
        status: &ContactStatus,
        s: &SplitSolution,
        data: &mut ConstraintsData,
        dt: f64,
        kkt_residual: &mut SplitKktResidual,
    ) {
        for (c, d) in self.components.iter().zip(data.data.iter_mut()) {
            c.eval_constraint(status, s, d, self.barrier);
            c.eval_derivatives(status, s, d, dt, kkt_residual);
        }
    }

    /// Condenses every component into the primal KKT blocks.
    pub fn condense_slack_and_dual(
        &self,
        status: &ContactStatus,
        s: &SplitSolution,
        data: &mut ConstraintsData,
        dt: f64,
        kkt_matrix: &mut SplitKktMatrix,
        kkt_residual: &mut SplitKktResidual,
    ) {
        for (c, d) in self.components.iter().zip(data.data.iter_mut()) {
            c.condense_slack_and_dual(status, s, d, dt, kkt_matrix, kkt_residual);
        }
    }

    /// Recovers slack/dual directions from the primal direction.
    pub fn expand_slack_and_dual(
        &self,
        status: &ContactStatus,
        s: &SplitSolution,
        data: &mut ConstraintsData,
        d: &SplitDirection,
    ) {
        for (c, cd) in self.components.iter().zip(data.data.iter_mut()) {
            c.expand_slack_and_dual(status, s, cd, d);
        }
    }

    /// Min fraction-to-boundary step over every component's slack.
    pub fn max_slack_step_size(&self, data: &ConstraintsData) -> f64 {
        data.data
            .iter()
            .map(|d| d.max_slack_step_size(self.fraction_to_boundary_rule))
            .fold(1.0, f64::min)
    }

    /// Min fraction-to-boundary step over every component's dual.
    pub fn max_dual_step_size(&self, data: &ConstraintsData) -> f64 {
        data.data
            .iter()
            .map(|d| d.max_dual_step_size(self.fraction_to_boundary_rule))
            .fold(1.0, f64::min)
    }

    /// `slack ← slack + step·dslack` for every component.
    pub fn update_slack(&self, data: &mut ConstraintsData, step: f64) {
        debug_assert!(step > 0.0);
        for d in data.data.iter_mut() {
            d.slack.axpy(step, &d.dslack, 1.0);
        }
    }

    /// `dual ← dual + step·ddual` for every component.
    pub fn update_dual(&self, data: &mut ConstraintsData, step: f64) {
        debug_assert!(step > 0.0);
        for d in data.data.iter_mut() {
            d.dual.axpy(step, &d.ddual, 1.0);
        }
    }
}

impl ConstraintsData {
    /// Sum of the components' log-barrier values (`μ Σ log slack`).
    pub fn log_barrier(&self) -> f64 {
        self.data.iter().map(|d| d.log_barrier).sum()
    }

    /// Max-abs KKT error over all components.
    pub fn kkt_error(&self) -> f64 {
        self.data.iter().map(|d| d.kkt_error()).fold(0.0, f64::max)
    }

    /// l1 constraint violation over all components.
    pub fn constraint_violation(&self) -> f64 {
        self.data.iter().map(|d| d.constraint_violation()).sum()
    }

    /// Whether every slack and dual is strictly positive.
    pub fn is_interior(&self) -> bool {
        self.data.iter().all(|d| d.is_interior())
    }

    /// Copies slack and dual from another data set (warm start).
    pub fn copy_slack_and_dual(&mut self, other: &ConstraintsData) {
        for (d, o) in self.data.iter_mut().zip(other.data.iter()) {
            d.slack.copy_from(&o.slack);
            d.dual.copy_from(&o.dual);
        }
    }
}
