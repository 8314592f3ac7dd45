//! Discrete state equation on the configuration manifold.
//!
//! Forward-Euler multiple shooting:
//!
//! ```text
//! Fq = (q ⊕ dt·v) ⊖ q'        (Lie-group compose/subtract)
//! Fv = v + dt·a − v'
//! ```
//!
//! `lmd'`/`gmm'` (the next stage's costates) multiply the rows of this
//! stage's equation; the own costates enter through the previous stage's
//! equation with Jacobian `Fqq_prev` (minus identity on a vector space, the
//! local-frame transport with a floating base).

use nalgebra::{DMatrix, DVector};

use crate::kkt::{SplitDirection, SplitKktMatrix, SplitKktResidual, SplitSolution};
use crate::robot::RobotModel;

/// State-equation kernel with pre-allocated scratch.
#[derive(Debug, Clone)]
pub struct StateEquation {
    q_pred: DVector<f64>,
    jac_tmp: DMatrix<f64>,
    jac_tmp2: DMatrix<f64>,
    has_floating_base: bool,
}

impl StateEquation {
    pub fn new(robot: &dyn RobotModel) -> Self {
        let dimv = robot.dimv();
        Self {
            q_pred: DVector::zeros(robot.dimq()),
            jac_tmp: DMatrix::zeros(dimv, dimv),
            jac_tmp2: DMatrix::zeros(dimv, dimv),
            has_floating_base: robot.has_floating_base(),
        }
    }

    /// Evaluates `(Fq, Fv)` into the residual.
    pub fn eval(
        &mut self,
        robot: &dyn RobotModel,
        dt: f64,
        s: &SplitSolution,
        q_next: &DVector<f64>,
        v_next: &DVector<f64>,
        kkt_residual: &mut SplitKktResidual,
    ) {
        robot.integrate(&s.q, &s.v, dt, &mut self.q_pred);
        let mut fq = DVector::zeros(robot.dimv());
        robot.difference(q_next, &self.q_pred, &mut fq);
        kkt_residual.fq_mut().copy_from(&fq);
        {
            let mut fv = kkt_residual.fv_mut();
            fv.copy_from(&s.v);
            fv.axpy(dt, &s.a, 1.0);
            fv -= v_next;
        }
    }

    /// Evaluates the impulse-stage state equation: `q` continuous,
    /// `v' = v + dv`.
    pub fn eval_impulse(
        &mut self,
        robot: &dyn RobotModel,
        s: &SplitSolution,
        q_next: &DVector<f64>,
        v_next: &DVector<f64>,
        kkt_residual: &mut SplitKktResidual,
    ) {
        let mut fq = DVector::zeros(robot.dimv());
        robot.difference(q_next, &s.q, &mut fq);
        kkt_residual.fq_mut().copy_from(&fq);
        {
            let mut fv = kkt_residual.fv_mut();
            fv.copy_from(&s.v);
            fv += &s.dv;
            fv -= v_next;
        }
    }

    /// Linearizes the state equation and accumulates the costate terms of
    /// the stage gradient. Requires a preceding `eval` call at the same
    /// iterate (the predicted configuration is reused).
    ///
    /// `q_prev` is the previous stage's configuration (the stage's own `q`
    /// at the initial stage); it determines `Fqq_prev`.
    #[allow(clippy::too_many_arguments)]
    pub fn linearize(
        &mut self,
        robot: &dyn RobotModel,
        dt: f64,
        q_prev: &DVector<f64>,
        s: &SplitSolution,
        q_next: &DVector<f64>,
        lmd_next: &DVector<f64>,
        gmm_next: &DVector<f64>,
        kkt_matrix: &mut SplitKktMatrix,
        kkt_residual: &mut SplitKktResidual,
    ) {
        let dimv = robot.dimv();
        // Fqq = d(difference)/d(q_pred) ∘ d(integrate)/dq,
        // Fqv = d(difference)/d(q_pred) ∘ d(integrate)/dv · dt.
        robot.d_difference_dq_goal(q_next, &self.q_pred, &mut self.jac_tmp);
        robot.d_integrate_dq(&s.q, &s.v, &self.jac_tmp, &mut self.jac_tmp2);
        kkt_matrix.fqq_mut().copy_from(&self.jac_tmp2);
        robot.d_integrate_dv(&s.q, &s.v, &self.jac_tmp, &mut self.jac_tmp2);
        self.jac_tmp2 *= dt;
        kkt_matrix.fqv_mut().copy_from(&self.jac_tmp2);
        kkt_matrix.fvv_mut().fill_diagonal(1.0);
        // Fvq stays zero until the contact dynamics are condensed.

        // Coupling of the stage's own costates through the previous stage's
        // configuration row.
        robot.d_difference_dq(q_prev, &s.q, &mut self.jac_tmp);
        kkt_matrix.fqq_prev.copy_from(&self.jac_tmp);

        // Gradient contributions of the costates.
        {
            let fqq = kkt_matrix.fqq().clone_owned();
            let fqq_prev = kkt_matrix.fqq_prev.clone();
            let mut lq = kkt_residual.lq_mut();
            lq.gemv_tr(1.0, &fqq, lmd_next, 1.0);
            lq.gemv_tr(1.0, &fqq_prev, &s.lmd, 1.0);
        }
        {
            let fqv = kkt_matrix.fqv().clone_owned();
            let mut lv = kkt_residual.lv_mut();
            lv.gemv_tr(1.0, &fqv, lmd_next, 1.0);
            lv += gmm_next;
            lv -= &s.gmm;
        }
        kkt_residual.la.axpy(dt, gmm_next, 1.0);

        // Sensitivity of the discrete state equation to the interval length.
        for i in 0..dimv {
            kkt_matrix.fx_dt[i] = s.v[i];
            kkt_matrix.fx_dt[dimv + i] = s.a[i];
        }
    }

    /// Linearizes the impulse-stage state equation. `dv` replaces `dt·a` in
    /// the velocity row and the configuration is continuous. Requires a
    /// preceding `eval_impulse` call at the same iterate.
    #[allow(clippy::too_many_arguments)]
    pub fn linearize_impulse(
        &mut self,
        robot: &dyn RobotModel,
        q_prev: &DVector<f64>,
        s: &SplitSolution,
        q_next: &DVector<f64>,
        lmd_next: &DVector<f64>,
        gmm_next: &DVector<f64>,
        kkt_matrix: &mut SplitKktMatrix,
        kkt_residual: &mut SplitKktResidual,
    ) {
        robot.d_difference_dq_goal(q_next, &s.q, &mut self.jac_tmp);
        kkt_matrix.fqq_mut().copy_from(&self.jac_tmp);
        kkt_matrix.fvv_mut().fill_diagonal(1.0);

        robot.d_difference_dq(q_prev, &s.q, &mut self.jac_tmp);
        kkt_matrix.fqq_prev.copy_from(&self.jac_tmp);

        {
            let fqq = kkt_matrix.fqq().clone_owned();
            let fqq_prev = kkt_matrix.fqq_prev.clone();
            let mut lq = kkt_residual.lq_mut();
            lq.gemv_tr(1.0, &fqq, lmd_next, 1.0);
            lq.gemv_tr(1.0, &fqq_prev, &s.lmd, 1.0);
        }
        {
            let mut lv = kkt_residual.lv_mut();
            lv += gmm_next;
            lv -= &s.gmm;
        }
        kkt_residual.ldv += gmm_next;
    }

    /// Re-expresses the costate direction in the local tangent frame. A
    /// no-op on vector-space configurations; with a floating base the
    /// configuration costate transports through `−Fqq_prevᵀ`.
    pub fn correct_costate_direction(
        &mut self,
        kkt_matrix: &SplitKktMatrix,
        d: &mut SplitDirection,
    ) {
        if !self.has_floating_base {
            return;
        }
        let dlmd = d.dlmd().clone_owned();
        let mut corrected = DVector::zeros(dlmd.len());
        corrected.gemv_tr(-1.0, &kkt_matrix.fqq_prev, &dlmd, 0.0);
        d.dlmd_mut().copy_from(&corrected);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::robot::LinearChainModel;

    #[test]
    fn test_state_equation_reproducibility() {
        let robot = LinearChainModel::new(2);
        let mut se = StateEquation::new(&robot);
        let mut s = SplitSolution::new(&robot);
        s.q.copy_from_slice(&[1.0, -0.5]);
        s.v.copy_from_slice(&[2.0, 0.5]);
        s.a.copy_from_slice(&[0.1, -0.1]);
        let dt = 0.1;

        let q_next = DVector::from_row_slice(&[1.2, -0.45]);
        let v_next = DVector::from_row_slice(&[2.01, 0.49]);

        let mut res = SplitKktResidual::new(&robot);
        se.eval(&robot, dt, &s, &q_next, &v_next, &mut res);

        // Fq = q + dt v − q', Fv = v + dt a − v', exactly.
        assert!((res.fq()[0] - (1.0 + 0.2 - 1.2)).abs() < 1e-15);
        assert!((res.fq()[1] - (-0.5 + 0.05 + 0.45)).abs() < 1e-15);
        assert!((res.fv()[0] - (2.0 + 0.01 - 2.01)).abs() < 1e-15);
        assert!((res.fv()[1] - (0.5 - 0.01 - 0.49)).abs() < 1e-15);
    }

    #[test]
    fn test_linearize_costate_terms() {
        let robot = LinearChainModel::new(1);
        let mut se = StateEquation::new(&robot);
        let mut s = SplitSolution::new(&robot);
        s.lmd[0] = 3.0;
        s.gmm[0] = 4.0;
        let dt = 0.5;
        let q_next = DVector::zeros(1);
        let lmd_next = DVector::from_row_slice(&[1.0]);
        let gmm_next = DVector::from_row_slice(&[2.0]);

        let mut mat = SplitKktMatrix::new(&robot);
        let mut res = SplitKktResidual::new(&robot);
        se.eval(&robot, dt, &s, &q_next, &DVector::zeros(1), &mut res);
        se.linearize(
            &robot, dt, &s.q.clone(), &s, &q_next, &lmd_next, &gmm_next, &mut mat, &mut res,
        );

        // lq = Fqqᵀ lmd' + Fqq_prevᵀ lmd = 1·1 − 3 = −2.
        assert!((res.lq()[0] + 2.0).abs() < 1e-14);
        // lv = dt·lmd' + gmm' − gmm = 0.5 + 2 − 4 = −1.5.
        assert!((res.lv()[0] + 1.5).abs() < 1e-14);
        // la = dt·gmm' = 1.0.
        assert!((res.la[0] - 1.0).abs() < 1e-14);
        // fx_dt = (v, a).
        assert_eq!(mat.fx_dt[0], s.v[0]);
        assert_eq!(mat.fx_dt[1], s.a[0]);
    }
}
