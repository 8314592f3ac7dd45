//! Stage worker for the terminal stage.

use std::sync::Arc;

use nalgebra::{DMatrix, DVector};

use crate::cost::CostFunction;
use crate::hybrid::GridInfo;
use crate::kkt::{SplitKktMatrix, SplitKktResidual, SplitSolution};
use crate::robot::RobotModel;

/// Worker for the terminal stage: terminal cost plus the costate closure of
/// the last state-equation row. The terminal stage carries no dynamics and
/// no inequality constraints.
pub struct TerminalOcp {
    cost: Arc<dyn CostFunction>,
    fqq_prev: DMatrix<f64>,
    stage_cost: f64,
}

impl TerminalOcp {
    pub fn new(robot: &dyn RobotModel, cost: Arc<dyn CostFunction>) -> Self {
        let dimv = robot.dimv();
        Self {
            cost,
            fqq_prev: DMatrix::zeros(dimv, dimv),
            stage_cost: 0.0,
        }
    }

    /// Evaluates the terminal cost.
    pub fn eval_ocp(
        &mut self,
        robot: &mut dyn RobotModel,
        grid: &GridInfo,
        s: &SplitSolution,
        kkt_residual: &mut SplitKktResidual,
    ) {
        kkt_residual.set_zero();
        robot.update_kinematics(&s.q, &s.v);
        self.stage_cost = self.cost.eval_terminal_cost(robot, grid, s);
    }

    /// Quadratizes the terminal cost and accumulates the costate terms.
    pub fn compute_kkt_system(
        &mut self,
        robot: &mut dyn RobotModel,
        grid: &GridInfo,
        q_prev: &DVector<f64>,
        s: &SplitSolution,
        kkt_matrix: &mut SplitKktMatrix,
        kkt_residual: &mut SplitKktResidual,
    ) {
        kkt_matrix.set_zero();
        kkt_residual.set_zero();
        robot.update_kinematics(&s.q, &s.v);
        self.stage_cost =
            self.cost
                .quadratize_terminal_cost(robot, grid, s, kkt_residual, kkt_matrix);

        robot.d_difference_dq(q_prev, &s.q, &mut self.fqq_prev);
        {
            let mut lq = kkt_residual.lq_mut();
            lq.gemv_tr(1.0, &self.fqq_prev, &s.lmd, 1.0);
        }
        {
            let mut lv = kkt_residual.lv_mut();
            lv -= &s.gmm;
        }
        kkt_residual.kkt_error = kkt_residual.max_abs();
    }

    /// The terminal stage imposes no step-size limits.
    pub fn max_primal_step_size(&self) -> f64 {
        1.0
    }

    pub fn max_dual_step_size(&self) -> f64 {
        1.0
    }

    pub fn update_primal(
        &mut self,
        robot: &dyn RobotModel,
        step: f64,
        d: &crate::kkt::SplitDirection,
        s: &mut SplitSolution,
    ) {
        debug_assert!(step > 0.0 && step <= 1.0);
        s.integrate(robot, step, d);
    }

    pub fn stage_cost(&self) -> f64 {
        self.stage_cost
    }
}
