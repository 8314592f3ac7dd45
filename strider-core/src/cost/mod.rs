//! Cost function interface.
//!
//! The solver consumes a polymorphic cost through [`CostFunction`]: stage,
//! terminal, and impulse evaluations together with their gradients and
//! Gauss-Newton Hessians, written in place into the split KKT blocks. Stage
//! quantities are integrated over the interval, so implementations weight
//! their contributions by `grid.dt`; terminal and impulse contributions are
//! unweighted.
//!
//! A library of cost terms is out of the core's scope: the crate ships the
//! quadratic tracking cost used by the tests and examples, and user code
//! provides anything richer behind the same trait.

mod quadratic;

pub use quadratic::QuadraticCost;

use crate::hybrid::GridInfo;
use crate::kkt::{SplitKktMatrix, SplitKktResidual, SplitSolution};
use crate::robot::{ContactStatus, ImpulseStatus, RobotModel};

/// Polymorphic cost functional.
///
/// The `linearize_*` methods add the gradient into the KKT residual; the
/// `quadratize_*` methods additionally add the (Gauss-Newton) Hessian into
/// the KKT matrix. All methods return the cost value so the caller can reuse
/// a single evaluation pass.
pub trait CostFunction: Send + Sync {
    /// Stage cost integrated over the interval (`dt`-weighted).
    fn eval_stage_cost(
        &self,
        robot: &dyn RobotModel,
        status: &ContactStatus,
        grid: &GridInfo,
        s: &SplitSolution,
    ) -> f64;

    /// Stage cost and its gradient.
    fn linearize_stage_cost(
        &self,
        robot: &dyn RobotModel,
        status: &ContactStatus,
        grid: &GridInfo,
        s: &SplitSolution,
        kkt_residual: &mut SplitKktResidual,
    ) -> f64;

    /// Stage cost, gradient, and Hessian.
    fn quadratize_stage_cost(
        &self,
        robot: &dyn RobotModel,
        status: &ContactStatus,
        grid: &GridInfo,
        s: &SplitSolution,
        kkt_residual: &mut SplitKktResidual,
        kkt_matrix: &mut SplitKktMatrix,
    ) -> f64;

    /// Terminal cost.
    fn eval_terminal_cost(&self, robot: &dyn RobotModel, grid: &GridInfo, s: &SplitSolution)
        -> f64;

    /// Terminal cost and its gradient.
    fn linearize_terminal_cost(
        &self,
        robot: &dyn RobotModel,
        grid: &GridInfo,
        s: &SplitSolution,
        kkt_residual: &mut SplitKktResidual,
    ) -> f64;

    /// Terminal cost, gradient, and Hessian.
    fn quadratize_terminal_cost(
        &self,
        robot: &dyn RobotModel,
        grid: &GridInfo,
        s: &SplitSolution,
        kkt_residual: &mut SplitKktResidual,
        kkt_matrix: &mut SplitKktMatrix,
    ) -> f64;

    /// Impulse cost (unweighted by `dt`; impulse stages are instantaneous).
    fn eval_impulse_cost(
        &self,
        robot: &dyn RobotModel,
        status: &ImpulseStatus,
        grid: &GridInfo,
        s: &SplitSolution,
    ) -> f64;

    /// Impulse cost and its gradient.
    fn linearize_impulse_cost(
        &self,
        robot: &dyn RobotModel,
        status: &ImpulseStatus,
        grid: &GridInfo,
        s: &SplitSolution,
        kkt_residual: &mut SplitKktResidual,
    ) -> f64;

    /// Impulse cost, gradient, and Hessian.
    fn quadratize_impulse_cost(
        &self,
        robot: &dyn RobotModel,
        status: &ImpulseStatus,
        grid: &GridInfo,
        s: &SplitSolution,
        kkt_residual: &mut SplitKktResidual,
        kkt_matrix: &mut SplitKktMatrix,
    ) -> f64;
}
