//! Stage worker for regular, aux, and lift stages.

use std::sync::Arc;

use nalgebra::DVector;

use crate::constraints::{Constraints, ConstraintsData};
use crate::cost::CostFunction;
use crate::hybrid::GridInfo;
use crate::kkt::{SplitDirection, SplitKktMatrix, SplitKktResidual, SplitSolution};
use crate::robot::{ContactStatus, ImpulseStatus, RobotModel};

use super::contact_dynamics::{ContactDynamics, DynamicsError};
use super::state_equation::StateEquation;
use super::switching_constraint::SwitchingConstraint;

/// Switching-constraint context of a pre-impulse stage: the impulse's
/// activation set and the interval lengths around the event.
pub struct SwitchingContext<'a> {
    pub impulse_status: &'a ImpulseStatus,
    pub dt_pre: f64,
    pub dt_post: f64,
}

/// Per-stage worker: evaluates and linearizes the stage, condenses it to
/// `(dx, du)`, expands directions, and applies updates. Holds only
/// stage-local state; the robot evaluator is passed in per call so the
/// driver can hand out per-thread clones.
pub struct SplitOcp {
    cost: Arc<dyn CostFunction>,
    constraints: Constraints,
    constraints_data: ConstraintsData,
    state_equation: StateEquation,
    contact_dynamics: ContactDynamics,
    switching: SwitchingConstraint,
    dgmm_next: DVector<f64>,
    stage_cost: f64,
    barrier_cost: f64,
    stage_violation: f64,
}

impl SplitOcp {
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
            contact_dynamics: ContactDynamics::new(robot),
            switching: SwitchingConstraint::new(robot),
            dgmm_next: DVector::zeros(robot.dimv()),
            stage_cost: 0.0,
            barrier_cost: 0.0,
            stage_violation: 0.0,
        }
    }

    /// Sets the barrier parameter for this stage's interior-point data.
    pub fn set_barrier(&mut self, barrier: f64) {
        self.constraints.set_barrier(barrier);
    }

    pub fn set_fraction_to_boundary_rule(&mut self, tau: f64) {
        self.constraints.set_fraction_to_boundary_rule(tau);
    }

    /// Whether the stage constraints hold strictly at `s`.
    pub fn is_feasible(&self, status: &ContactStatus, s: &SplitSolution) -> bool {
        self.constraints.is_feasible(status, s)
    }

    /// (Re-)initializes slack and dual variables from `s`, projecting
    /// infeasible entries to the barrier floor (feasibility restoration).
    pub fn init_constraints(&mut self, status: &ContactStatus, s: &SplitSolution) {
        self.constraints_data = self.constraints.create_data();
        self.constraints
            .set_slack_and_dual(status, s, &mut self.constraints_data);
    }

    /// Interior-point state of this stage.
    pub fn constraints_data(&self) -> &ConstraintsData {
        &self.constraints_data
    }

    /// Evaluates the stage residuals and cost at `s` (no derivatives). Used
    /// by the line-search merit evaluation and the convergence check.
    #[allow(clippy::too_many_arguments)]
    pub fn eval_ocp(
        &mut self,
        robot: &mut dyn RobotModel,
        status: &ContactStatus,
        grid: &GridInfo,
        s: &SplitSolution,
        q_next: &DVector<f64>,
        v_next: &DVector<f64>,
        switching: Option<SwitchingContext<'_>>,
        kkt_residual: &mut SplitKktResidual,
    ) {
        kkt_residual.set_contact_status(status);
        kkt_residual.set_zero();
        robot.update_kinematics(&s.q, &s.v);
        self.stage_cost = self.cost.eval_stage_cost(robot, status, grid, s);
        self.constraints
            .eval_constraint(status, s, &mut self.constraints_data);
        self.barrier_cost = self.constraints_data.log_barrier();
        self.state_equation
            .eval(robot, grid.dt, s, q_next, v_next, kkt_residual);
        self.contact_dynamics.eval(robot, status, s);
        if let Some(sw) = switching {
            self.switching
                .eval(robot, sw.impulse_status, sw.dt_pre, sw.dt_post, s);
        } else {
            self.switching.deactivate();
        }
        self.stage_violation = self.constraint_violation(kkt_residual);
    }

    /// Linearizes the stage and condenses it to `(dx, du)`.
    ///
    /// `q_prev` is the previous stage's configuration (the stage's own at
    /// the initial stage); `s_next` provides the next stage's state and
    /// costates.
    #[allow(clippy::too_many_arguments)]
    pub fn compute_kkt_system(
        &mut self,
        robot: &mut dyn RobotModel,
        status: &ContactStatus,
        grid: &GridInfo,
        q_prev: &DVector<f64>,
        s: &SplitSolution,
        s_next: &SplitSolution,
        switching: Option<SwitchingContext<'_>>,
        kkt_matrix: &mut SplitKktMatrix,
        kkt_residual: &mut SplitKktResidual,
    ) -> Result<(), DynamicsError> {
        let dt = grid.dt;
        debug_assert!(dt > 0.0);
        kkt_matrix.set_contact_status(status);
        kkt_residual.set_contact_status(status);
        kkt_matrix.set_zero();
        kkt_residual.set_zero();
        robot.update_kinematics(&s.q, &s.v);

        self.stage_cost = self
            .cost
            .quadratize_stage_cost(robot, status, grid, s, kkt_residual, kkt_matrix);

        // Hamiltonian of the stage, h = ℓ + lmd'ᵀv + gmm'ᵀa, with its state
        // gradient. Only the cost gradient is in lx at this point.
        kkt_residual.h = self.stage_cost / dt + s_next.lmd.dot(&s.v) + s_next.gmm.dot(&s.a);
        {
            let lx_over_dt = &kkt_residual.lx / dt;
            kkt_residual.hx.copy_from(&lx_over_dt);
            let dimv = s.v.len();
            for i in 0..dimv {
                kkt_residual.hx[dimv + i] += s_next.lmd[i];
            }
        }

        self.constraints.linearize_constraints(
            status,
            s,
            &mut self.constraints_data,
            dt,
            kkt_residual,
        );
        self.barrier_cost = self.constraints_data.log_barrier();

        self.state_equation
            .eval(robot, dt, s, &s_next.q, &s_next.v, kkt_residual);
        self.state_equation.linearize(
            robot,
            dt,
            q_prev,
            s,
            &s_next.q,
            &s_next.lmd,
            &s_next.gmm,
            kkt_matrix,
            kkt_residual,
        );
        self.contact_dynamics
            .linearize(robot, status, dt, s, kkt_residual);
        if let Some(sw) = switching {
            self.switching.linearize(
                robot,
                sw.impulse_status,
                sw.dt_pre,
                sw.dt_post,
                s,
                kkt_residual,
            );
        } else {
            self.switching.deactivate();
        }

        kkt_residual.kkt_error = kkt_residual
            .max_abs()
            .max(self.contact_dynamics.kkt_error())
            .max(self.constraints_data.kkt_error())
            .max(self.switching.kkt_error());
        self.stage_violation = self.constraint_violation(kkt_residual);

        self.constraints.condense_slack_and_dual(
            status,
            s,
            &mut self.constraints_data,
            dt,
            kkt_matrix,
            kkt_residual,
        );
        self.contact_dynamics
            .condense(robot, dt, kkt_matrix, kkt_residual)?;
        self.switching.condense(&self.contact_dynamics);
        Ok(())
    }

    /// Switching-constraint kernel of this stage (active when the stage
    /// precedes an impulse).
    pub fn switching(&self) -> &SwitchingConstraint {
        &self.switching
    }

    /// Recovers `(da, df)` and the slack/dual directions from `(dx, du)`.
    pub fn expand_primal(&mut self, status: &ContactStatus, s: &SplitSolution, d: &mut SplitDirection) {
        self.contact_dynamics.expand_primal(d);
        self.constraints
            .expand_slack_and_dual(status, s, &mut self.constraints_data, d);
    }

    /// Stores the next stage's velocity-costate direction for the dual
    /// expansion pass.
    pub fn set_dgmm_next(&mut self, dgmm_next: nalgebra::DVectorView<'_, f64>) {
        self.dgmm_next.copy_from(&dgmm_next);
    }

    /// Recovers `(dβ, dμ)` and re-expresses the costate direction.
    pub fn expand_dual(
        &mut self,
        grid: &GridInfo,
        kkt_matrix: &SplitKktMatrix,
        kkt_residual: &SplitKktResidual,
        d: &mut SplitDirection,
    ) {
        let xi_term = self.switching.xi_acceleration_term(d);
        self.contact_dynamics.expand_dual(
            grid.dt,
            &self.dgmm_next,
            xi_term.as_ref(),
            kkt_matrix,
            kkt_residual,
            d,
        );
        self.state_equation.correct_costate_direction(kkt_matrix, d);
    }

    /// Fraction-to-boundary bound over this stage's slacks.
    pub fn max_primal_step_size(&self) -> f64 {
        self.constraints.max_slack_step_size(&self.constraints_data)
    }

    /// Fraction-to-boundary bound over this stage's duals.
    pub fn max_dual_step_size(&self) -> f64 {
        self.constraints.max_dual_step_size(&self.constraints_data)
    }

    /// Applies the primal step to the stage solution and slacks.
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

    /// Applies the dual step to the interior-point duals.
    pub fn update_dual(&mut self, step: f64) {
        debug_assert!(step > 0.0 && step <= 1.0);
        self.constraints.update_dual(&mut self.constraints_data, step);
    }

    /// Cost of the last evaluation, optionally with the barrier term.
    pub fn stage_cost(&self, include_barrier: bool) -> f64 {
        if include_barrier {
            self.stage_cost - self.barrier_cost
        } else {
            self.stage_cost
        }
    }

    /// Trial log-barrier value at `slack + step·dslack`.
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

    /// l1 constraint violation captured at the last evaluation, before any
    /// condensation rewrote the residual blocks.
    pub fn stage_violation(&self) -> f64 {
        self.stage_violation
    }

    /// l1 constraint violation of the last evaluation.
    pub fn constraint_violation(&self, kkt_residual: &SplitKktResidual) -> f64 {
        kkt_residual.constraint_violation()
            + self.constraints_data.constraint_violation()
            + self.contact_dynamics.constraint_violation()
            + self.switching.constraint_violation()
    }
}
