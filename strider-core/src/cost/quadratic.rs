//! Quadratic configuration-space tracking cost.

use nalgebra::DVector;

use crate::hybrid::GridInfo;
use crate::kkt::{SplitKktMatrix, SplitKktResidual, SplitSolution};
use crate::robot::{ContactStatus, ImpulseStatus, RobotModel};

use super::CostFunction;

/// Diagonal quadratic tracking cost
///
/// ```text
/// ℓ(s)  = ½‖q ⊖ q_ref‖²_Wq + ½‖v − v_ref‖²_Wv + ½‖a‖²_Wa + ½‖u‖²_Wu + ½‖f − f_ref‖²_Wf
/// ℓ_T(s) = ½‖q ⊖ q_ref‖²_Wq_T + ½‖v − v_ref‖²_Wv_T
/// ℓ_I(s) = ½‖q ⊖ q_ref‖²_Wq_I + ½‖v − v_ref‖²_Wv_I + ½‖dv‖²_Wdv
/// ```
///
/// The configuration error is measured in the tangent space through the
/// robot's `difference`, so the same cost works with a floating base. `f_ref`
/// is broadcast per active contact (a single 3-vector).
#[derive(Debug, Clone)]
pub struct QuadraticCost {
    q_ref: DVector<f64>,
    v_ref: DVector<f64>,
    q_weight: DVector<f64>,
    v_weight: DVector<f64>,
    a_weight: DVector<f64>,
    u_weight: DVector<f64>,
    f_weight: [f64; 3],
    f_ref: [f64; 3],
    dv_weight: DVector<f64>,
    q_weight_terminal: DVector<f64>,
    v_weight_terminal: DVector<f64>,
    q_weight_impulse: DVector<f64>,
    v_weight_impulse: DVector<f64>,
}

impl QuadraticCost {
    /// Zero-weight cost tracking the origin. Configure through the builder
    /// methods.
    pub fn new(robot: &dyn RobotModel) -> Self {
        let dimv = robot.dimv();
        Self {
            q_ref: DVector::zeros(robot.dimq()),
            v_ref: DVector::zeros(dimv),
            q_weight: DVector::zeros(dimv),
            v_weight: DVector::zeros(dimv),
            a_weight: DVector::zeros(dimv),
            u_weight: DVector::zeros(robot.dimu()),
            f_weight: [0.0; 3],
            f_ref: [0.0; 3],
            dv_weight: DVector::zeros(dimv),
            q_weight_terminal: DVector::zeros(dimv),
            v_weight_terminal: DVector::zeros(dimv),
            q_weight_impulse: DVector::zeros(dimv),
            v_weight_impulse: DVector::zeros(dimv),
        }
    }

    pub fn with_q_ref(mut self, q_ref: &[f64]) -> Self {
        self.q_ref = DVector::from_row_slice(q_ref);
        self
    }

    pub fn with_v_ref(mut self, v_ref: &[f64]) -> Self {
        self.v_ref = DVector::from_row_slice(v_ref);
        self
    }

    pub fn with_q_weight(mut self, w: &[f64]) -> Self {
        self.q_weight = DVector::from_row_slice(w);
        self
    }

    pub fn with_v_weight(mut self, w: &[f64]) -> Self {
        self.v_weight = DVector::from_row_slice(w);
        self
    }

    pub fn with_a_weight(mut self, w: &[f64]) -> Self {
        self.a_weight = DVector::from_row_slice(w);
        self
    }

    pub fn with_u_weight(mut self, w: &[f64]) -> Self {
        self.u_weight = DVector::from_row_slice(w);
        self
    }

    /// Per-axis weight on every active contact force.
    pub fn with_f_weight(mut self, w: [f64; 3]) -> Self {
        self.f_weight = w;
        self
    }

    /// Per-axis force reference broadcast to every active contact.
    pub fn with_f_ref(mut self, f_ref: [f64; 3]) -> Self {
        self.f_ref = f_ref;
        self
    }

    pub fn with_dv_weight(mut self, w: &[f64]) -> Self {
        self.dv_weight = DVector::from_row_slice(w);
        self
    }

    pub fn with_q_weight_terminal(mut self, w: &[f64]) -> Self {
        self.q_weight_terminal = DVector::from_row_slice(w);
        self
    }

    pub fn with_v_weight_terminal(mut self, w: &[f64]) -> Self {
        self.v_weight_terminal = DVector::from_row_slice(w);
        self
    }

    pub fn with_q_weight_impulse(mut self, w: &[f64]) -> Self {
        self.q_weight_impulse = DVector::from_row_slice(w);
        self
    }

    pub fn with_v_weight_impulse(mut self, w: &[f64]) -> Self {
        self.v_weight_impulse = DVector::from_row_slice(w);
        self
    }

    fn q_error(&self, robot: &dyn RobotModel, s: &SplitSolution) -> DVector<f64> {
        let mut e = DVector::zeros(robot.dimv());
        robot.difference(&self.q_ref, &s.q, &mut e);
        e
    }

    fn state_cost(&self, e_q: &DVector<f64>, s: &SplitSolution, wq: &DVector<f64>, wv: &DVector<f64>) -> f64 {
        let mut cost = 0.0;
        for i in 0..e_q.len() {
            cost += 0.5 * wq[i] * e_q[i] * e_q[i];
            let ev = s.v[i] - self.v_ref[i];
            cost += 0.5 * wv[i] * ev * ev;
        }
        cost
    }

    fn force_cost(&self, s: &SplitSolution) -> f64 {
        let f = s.f();
        let mut cost = 0.0;
        for c in 0..f.len() / 3 {
            for k in 0..3 {
                let e = f[3 * c + k] - self.f_ref[k];
                cost += 0.5 * self.f_weight[k] * e * e;
            }
        }
        cost
    }
}

impl CostFunction for QuadraticCost {
    fn eval_stage_cost(
        &self,
        robot: &dyn RobotModel,
        _status: &ContactStatus,
        grid: &GridInfo,
        s: &SplitSolution,
    ) -> f64 {
        let e_q = self.q_error(robot, s);
        let mut cost = self.state_cost(&e_q, s, &self.q_weight, &self.v_weight);
        for i in 0..robot.dimv() {
            cost += 0.5 * self.a_weight[i] * s.a[i] * s.a[i];
        }
        for i in 0..robot.dimu() {
            cost += 0.5 * self.u_weight[i] * s.u[i] * s.u[i];
        }
        cost += self.force_cost(s);
        grid.dt * cost
    }

    fn linearize_stage_cost(
        &self,
        robot: &dyn RobotModel,
        status: &ContactStatus,
        grid: &GridInfo,
        s: &SplitSolution,
        kkt_residual: &mut SplitKktResidual,
    ) -> f64 {
        let dt = grid.dt;
        let e_q = self.q_error(robot, s);
        for i in 0..robot.dimv() {
            kkt_residual.lq_mut()[i] += dt * self.q_weight[i] * e_q[i];
            kkt_residual.lv_mut()[i] += dt * self.v_weight[i] * (s.v[i] - self.v_ref[i]);
            kkt_residual.la[i] += dt * self.a_weight[i] * s.a[i];
        }
        for i in 0..robot.dimu() {
            kkt_residual.lu[i] += dt * self.u_weight[i] * s.u[i];
        }
        {
            let f = s.f().clone_owned();
            let mut lf = kkt_residual.lf_mut();
            for c in 0..f.len() / 3 {
                for k in 0..3 {
                    lf[3 * c + k] += dt * self.f_weight[k] * (f[3 * c + k] - self.f_ref[k]);
                }
            }
        }
        self.eval_stage_cost(robot, status, grid, s)
    }

    fn quadratize_stage_cost(
        &self,
        robot: &dyn RobotModel,
        status: &ContactStatus,
        grid: &GridInfo,
        s: &SplitSolution,
        kkt_residual: &mut SplitKktResidual,
        kkt_matrix: &mut SplitKktMatrix,
    ) -> f64 {
        let dt = grid.dt;
        let dimv = robot.dimv();
        for i in 0..dimv {
            kkt_matrix.qqq_mut()[(i, i)] += dt * self.q_weight[i];
            kkt_matrix.qvv_mut()[(i, i)] += dt * self.v_weight[i];
            kkt_matrix.qaa[(i, i)] += dt * self.a_weight[i];
        }
        for i in 0..robot.dimu() {
            kkt_matrix.quu[(i, i)] += dt * self.u_weight[i];
        }
        {
            let dimf = s.dimf();
            let mut qff = kkt_matrix.qff_mut();
            for c in 0..dimf / 3 {
                for k in 0..3 {
                    qff[(3 * c + k, 3 * c + k)] += dt * self.f_weight[k];
                }
            }
        }
        self.linearize_stage_cost(robot, status, grid, s, kkt_residual)
    }

    fn eval_terminal_cost(
        &self,
        robot: &dyn RobotModel,
        _grid: &GridInfo,
        s: &SplitSolution,
    ) -> f64 {
        let e_q = self.q_error(robot, s);
        self.state_cost(&e_q, s, &self.q_weight_terminal, &self.v_weight_terminal)
    }

    fn linearize_terminal_cost(
        &self,
        robot: &dyn RobotModel,
        grid: &GridInfo,
        s: &SplitSolution,
        kkt_residual: &mut SplitKktResidual,
    ) -> f64 {
        let e_q = self.q_error(robot, s);
        for i in 0..robot.dimv() {
            kkt_residual.lq_mut()[i] += self.q_weight_terminal[i] * e_q[i];
            kkt_residual.lv_mut()[i] += self.v_weight_terminal[i] * (s.v[i] - self.v_ref[i]);
        }
        self.eval_terminal_cost(robot, grid, s)
    }

    fn quadratize_terminal_cost(
        &self,
        robot: &dyn RobotModel,
        grid: &GridInfo,
        s: &SplitSolution,
        kkt_residual: &mut SplitKktResidual,
        kkt_matrix: &mut SplitKktMatrix,
    ) -> f64 {
        for i in 0..robot.dimv() {
            kkt_matrix.qqq_mut()[(i, i)] += self.q_weight_terminal[i];
            kkt_matrix.qvv_mut()[(i, i)] += self.v_weight_terminal[i];
        }
        self.linearize_terminal_cost(robot, grid, s, kkt_residual)
    }

    fn eval_impulse_cost(
        &self,
        robot: &dyn RobotModel,
        _status: &ImpulseStatus,
        _grid: &GridInfo,
        s: &SplitSolution,
    ) -> f64 {
        let e_q = self.q_error(robot, s);
        let mut cost = self.state_cost(&e_q, s, &self.q_weight_impulse, &self.v_weight_impulse);
        for i in 0..robot.dimv() {
            cost += 0.5 * self.dv_weight[i] * s.dv[i] * s.dv[i];
        }
        cost
    }

    fn linearize_impulse_cost(
        &self,
        robot: &dyn RobotModel,
        status: &ImpulseStatus,
        grid: &GridInfo,
        s: &SplitSolution,
        kkt_residual: &mut SplitKktResidual,
    ) -> f64 {
        let e_q = self.q_error(robot, s);
        for i in 0..robot.dimv() {
            kkt_residual.lq_mut()[i] += self.q_weight_impulse[i] * e_q[i];
            kkt_residual.lv_mut()[i] += self.v_weight_impulse[i] * (s.v[i] - self.v_ref[i]);
            kkt_residual.ldv[i] += self.dv_weight[i] * s.dv[i];
        }
        self.eval_impulse_cost(robot, status, grid, s)
    }

    fn quadratize_impulse_cost(
        &self,
        robot: &dyn RobotModel,
        status: &ImpulseStatus,
        grid: &GridInfo,
        s: &SplitSolution,
        kkt_residual: &mut SplitKktResidual,
        kkt_matrix: &mut SplitKktMatrix,
    ) -> f64 {
        for i in 0..robot.dimv() {
            kkt_matrix.qqq_mut()[(i, i)] += self.q_weight_impulse[i];
            kkt_matrix.qvv_mut()[(i, i)] += self.v_weight_impulse[i];
            kkt_matrix.qdvdv[(i, i)] += self.dv_weight[i];
        }
        self.linearize_impulse_cost(robot, status, grid, s, kkt_residual)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::robot::LinearChainModel;

    #[test]
    fn test_stage_cost_and_gradient_agree() {
        let robot = LinearChainModel::new(2);
        let cost = QuadraticCost::new(&robot)
            .with_q_ref(&[1.0, 0.0])
            .with_q_weight(&[2.0, 2.0])
            .with_v_weight(&[1.0, 1.0])
            .with_u_weight(&[0.5, 0.5]);

        let mut s = SplitSolution::new(&robot);
        s.q[0] = 2.0;
        s.v[1] = 3.0;
        s.u[0] = 4.0;
        let grid = GridInfo::new(0.0, 0.1, 0);
        let status = ContactStatus::new(0);

        // ½·2·1² + ½·1·3² + ½·0.5·4², scaled by dt.
        let val = cost.eval_stage_cost(&robot, &status, &grid, &s);
        assert!((val - 0.1 * (1.0 + 4.5 + 4.0)).abs() < 1e-12);

        let mut res = SplitKktResidual::new(&robot);
        let val2 = cost.linearize_stage_cost(&robot, &status, &grid, &s, &mut res);
        assert_eq!(val, val2);
        assert!((res.lq()[0] - 0.1 * 2.0).abs() < 1e-12);
        assert!((res.lv()[1] - 0.1 * 3.0).abs() < 1e-12);
        assert!((res.lu[0] - 0.1 * 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_force_tracking() {
        let robot = LinearChainModel::new(3).add_contact([0, 1, 2], [0.0; 3]);
        let cost = QuadraticCost::new(&robot)
            .with_f_weight([1.0, 1.0, 1.0])
            .with_f_ref([0.0, 0.0, 10.0]);
        let status = ContactStatus::from_active(&[true]);

        let mut s = SplitSolution::new(&robot);
        s.set_contact_status(&status);
        s.f_mut()[2] = 4.0;
        let grid = GridInfo::new(0.0, 1.0, 0);
        let val = cost.eval_stage_cost(&robot, &status, &grid, &s);
        assert!((val - 0.5 * 36.0).abs() < 1e-12);
    }
}
