//! Stage worker for impulse stages.

use std::sync::Arc;

use nalgebra::DVector;

use crate::constraints::{Constraints, ConstraintsData};
use crate::cost::CostFunction;
use crate::hybrid::GridInfo;
use crate::kkt::{SplitDirection, SplitKktMatrix, SplitKktResidual, SplitSolution};
use crate::robot::{ImpulseStatus, RobotModel};

use super::contact_dynamics::DynamicsError;
use super::impulse_dynamics::ImpulseDynamics;
use super::state_equation::StateEquation;

/// Worker for an instantaneous impulse stage: decision variables are the
/// velocity jump `dv` and the impulse forces `f`; positions are continuous.
pub struct ImpulseSplitOcp {
    cost: Arc<dyn CostFunction>,
    constraints: Constraints,
    constraints_data: ConstraintsData,
    state_equation: StateEquation,
    impulse_dynamics: ImpulseDynamics,
    dgmm_next: DVector<f64>,
    stage_cost: f64,
    barrier_cost: f64,
    stage_violation: f64,
}

impl ImpulseSplitOcp {
    pub fn new(
        robot: &dyn RobotModel,
        cost: Arc<dyn CostFunction>,
        constraints: Constraints,
    ) -> Self {
        let constraints_data = constraints.create_data();
        Self {
            cost,
            constraints,
            constraints_data,
            state_equation: StateEquation::new(robot),
            impulse_dynamics: ImpulseDynamics::new(robot),
            dgmm_next: DVector::zeros(robot.dimv()),
            stage_cost: 0.0,
            barrier_cost: 0.0,
            stage_violation: 0.0,
        }
    }

    pub fn set_barrier(&mut self, barrier: f64) {
        self.constraints.set_barrier(barrier);
    }

    pub fn set_fraction_to_boundary_rule(&mut self, tau: f64) {
        self.constraints.set_fraction_to_boundary_rule(tau);
    }

    pub fn is_feasible(&self, status: &ImpulseStatus, s: &SplitSolution) -> bool {
        self.constraints.is_feasible(status, s)
    }

    pub fn init_constraints(&mut self, status: &ImpulseStatus, s: &SplitSolution) {
        self.constraints_data = self.constraints.create_data();
        self.constraints
            .set_slack_and_dual(status, s, &mut self.constraints_data);
    }

    /// Evaluates the impulse-stage residuals and cost at `s`.
    #[allow(clippy::too_many_arguments)]
    pub fn eval_ocp(
        &mut self,
        robot: &mut dyn RobotModel,
        status: &ImpulseStatus,
        grid: &GridInfo,
        s: &SplitSolution,
        q_next: &DVector<f64>,
        v_next: &DVector<f64>,
        kkt_residual: &mut SplitKktResidual,
    ) {
        kkt_residual.set_contact_status(status);
        kkt_residual.set_zero();
        robot.update_kinematics(&s.q, &(&s.v + &s.dv));
        self.stage_cost = self.cost.eval_impulse_cost(robot, status, grid, s);
        self.constraints
            .eval_constraint(status, s, &mut self.constraints_data);
        self.barrier_cost = self.constraints_data.log_barrier();
        self.state_equation
            .eval_impulse(robot, s, q_next, v_next, kkt_residual);
        self.impulse_dynamics.eval(robot, status, s);
        self.stage_violation = self.constraint_violation(kkt_residual);
    }

    /// Linearizes the impulse stage and condenses it to `dx`.
    #[allow(clippy::too_many_arguments)]
    pub fn compute_kkt_system(
        &mut self,
        robot: &mut dyn RobotModel,
        status: &ImpulseStatus,
        grid: &GridInfo,
        q_prev: &DVector<f64>,
        s: &SplitSolution,
        s_next: &SplitSolution,
        kkt_matrix: &mut SplitKktMatrix,
        kkt_residual: &mut SplitKktResidual,
    ) -> Result<(), DynamicsError> {
        kkt_matrix.set_contact_status(status);
        kkt_residual.set_contact_status(status);
        kkt_matrix.set_zero();
        kkt_residual.set_zero();
        robot.update_kinematics(&s.q, &(&s.v + &s.dv));

        self.stage_cost =
            self.cost
                .quadratize_impulse_cost(robot, status, grid, s, kkt_residual, kkt_matrix);
        // The interior-point weighting of an instantaneous stage is unit.
        self.constraints.linearize_constraints(
            status,
            s,
            &mut self.constraints_data,
            1.0,
            kkt_residual,
        );
        self.barrier_cost = self.constraints_data.log_barrier();

        self.state_equation
            .eval_impulse(robot, s, &s_next.q, &s_next.v, kkt_residual);
        self.state_equation.linearize_impulse(
            robot,
            q_prev,
            s,
            &s_next.q,
            &s_next.lmd,
            &s_next.gmm,
            kkt_matrix,
            kkt_residual,
        );
        self.impulse_dynamics.linearize(robot, status, s, kkt_residual);

        kkt_residual.kkt_error = kkt_residual
            .max_abs()
            .max(self.impulse_dynamics.kkt_error())
            .max(self.constraints_data.kkt_error());
        self.stage_violation = self.constraint_violation(kkt_residual);

        self.constraints.condense_slack_and_dual(
            status,
            s,
            &mut self.constraints_data,
            1.0,
            kkt_matrix,
            kkt_residual,
        );
        self.impulse_dynamics.condense(kkt_matrix, kkt_residual)
    }

    pub fn expand_primal(
        &mut self,
        status: &ImpulseStatus,
        s: &SplitSolution,
        d: &mut SplitDirection,
    ) {
        self.impulse_dynamics.expand_primal(d);
        self.constraints
            .expand_slack_and_dual(status, s, &mut self.constraints_data, d);
    }

    pub fn set_dgmm_next(&mut self, dgmm_next: nalgebra::DVectorView<'_, f64>) {
        self.dgmm_next.copy_from(&dgmm_next);
    }

    pub fn expand_dual(
        &mut self,
        kkt_matrix: &SplitKktMatrix,
        kkt_residual: &SplitKktResidual,
        d: &mut SplitDirection,
    ) {
        self.impulse_dynamics
            .expand_dual(&self.dgmm_next, kkt_matrix, kkt_residual, d);
        self.state_equation.correct_costate_direction(kkt_matrix, d);
    }

    pub fn max_primal_step_size(&self) -> f64 {
        self.constraints.max_slack_step_size(&self.constraints_data)
    }

    pub fn max_dual_step_size(&self) -> f64 {
        self.constraints.max_dual_step_size(&self.constraints_data)
    }

    pub fn update_primal(
        &mut self,
        robot: &dyn RobotModel,
        step: f64,
        d: &SplitDirection,
        s: &mut SplitSolution,
    ) {
        debug_assert!(step > 0.0 && step <= 1.0);
        s.integrate(robot, step, d);
        self.constraints
            .update_slack(&mut self.constraints_data, step);
    }

    pub fn update_dual(&mut self, step: f64) {
        debug_assert!(step > 0.0 && step <= 1.0);
        self.constraints.update_dual(&mut self.constraints_data, step);
    }

    pub fn stage_cost(&self, include_barrier: bool) -> f64 {
        if include_barrier {
            self.stage_cost - self.barrier_cost
        } else {
            self.stage_cost
        }
    }

    pub fn trial_barrier_cost(&self, step: f64) -> f64 {
        let barrier = self.constraints.barrier();
        let mut total = 0.0;
        for data in &self.constraints_data.data {
            for i in 0..data.dimc() {
                let s = data.slack[i] + step * data.dslack[i];
                if s > 0.0 {
                    total += barrier * s.ln();
                } else {
                    return f64::NEG_INFINITY;
                }
            }
        }
        total
    }

    /// l1 constraint violation captured at the last evaluation.
    pub fn stage_violation(&self) -> f64 {
        self.stage_violation
    }

    pub fn constraint_violation(&self, kkt_residual: &SplitKktResidual) -> f64 {
        kkt_residual.constraint_violation()
            + self.constraints_data.constraint_violation()
            + self.impulse_dynamics.constraint_violation()
    }
}
