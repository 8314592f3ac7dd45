//! Switching constraint: reach the impulse contact manifold at the event.
//!
//! When the interval of stage `i` contains an impulse event, the stage gets
//! the additional equality
//!
//! ```text
//! P(q, v, a) = φ_c( q ⊕ (dt1 + dt2)·v ⊕ (dt1·dt2)·a ) = 0
//! ```
//!
//! on the contacts activated by the impulse, with `dt1 = dt_pre` and
//! `dt2 = dt_post`. The Jacobians are the contact-position Jacobian at the
//! predicted configuration, transported through the two Lie-group
//! integrations. After the contact dynamics are condensed the constraint
//! becomes a pure `(dx, du)` equality handled by the constrained Riccati
//! factorization; its multiplier is `ξ`.

use nalgebra::{DMatrix, DVector};

use crate::kkt::{SplitKktResidual, SplitSolution};
use crate::robot::{ImpulseStatus, RobotModel};

use super::contact_dynamics::ContactDynamics;

/// Switching-constraint kernel attached to a pre-impulse stage.
#[derive(Debug, Clone)]
pub struct SwitchingConstraint {
    q_mid: DVector<f64>,
    q_pred: DVector<f64>,
    pq: DMatrix<f64>,
    pv: DMatrix<f64>,
    pa: DMatrix<f64>,
    gx: DMatrix<f64>,
    gu: DMatrix<f64>,
    residual: DVector<f64>,
    residual_condensed: DVector<f64>,
    dimv: usize,
    dimu: usize,
    dimi: usize,
}

impl SwitchingConstraint {
    pub fn new(robot: &dyn RobotModel) -> Self {
        let dimv = robot.dimv();
        let dimu = robot.dimu();
        let maxf = robot.max_dimf();
        Self {
            q_mid: DVector::zeros(robot.dimq()),
            q_pred: DVector::zeros(robot.dimq()),
            pq: DMatrix::zeros(maxf, dimv),
            pv: DMatrix::zeros(maxf, dimv),
            pa: DMatrix::zeros(maxf, dimv),
            gx: DMatrix::zeros(maxf, 2 * dimv),
            gu: DMatrix::zeros(maxf, dimu),
            residual: DVector::zeros(maxf),
            residual_condensed: DVector::zeros(maxf),
            dimv,
            dimu,
            dimi: 0,
        }
    }

    /// Active switching dimension (`impulse_status.dimf()` of the event,
    /// zero when the stage precedes no impulse).
    pub fn dimi(&self) -> usize {
        self.dimi
    }

    /// Deactivates the constraint for stages that precede no impulse.
    pub fn deactivate(&mut self) {
        self.dimi = 0;
    }

    /// Evaluates the constraint residual at the predicted configuration.
    /// Leaves the robot's kinematics at the predicted configuration.
    pub fn eval(
        &mut self,
        robot: &mut dyn RobotModel,
        impulse_status: &ImpulseStatus,
        dt1: f64,
        dt2: f64,
        s: &SplitSolution,
    ) {
        debug_assert!(dt1 > 0.0 && dt2 > 0.0);
        self.dimi = impulse_status.dimf();
        robot.integrate(&s.q, &s.v, dt1 + dt2, &mut self.q_mid);
        let q_mid = self.q_mid.clone();
        robot.integrate(&q_mid, &s.a, dt1 * dt2, &mut self.q_pred);
        robot.update_kinematics(&self.q_pred.clone(), &s.v.clone());
        let mut phi = DVector::zeros(self.dimi);
        robot.contact_position_residual(impulse_status, &mut phi);
        self.residual.rows_mut(0, self.dimi).copy_from(&phi);
    }

    /// Evaluates the residual and Jacobians and accumulates the `ξ` terms of
    /// the stage gradient. Must run after the contact dynamics linearization
    /// and before its condensation (the `la` term participates in the fold).
    pub fn linearize(
        &mut self,
        robot: &mut dyn RobotModel,
        impulse_status: &ImpulseStatus,
        dt1: f64,
        dt2: f64,
        s: &SplitSolution,
        kkt_residual: &mut SplitKktResidual,
    ) {
        self.eval(robot, impulse_status, dt1, dt2, s);
        let dimi = self.dimi;
        if dimi == 0 {
            return;
        }

        // Contact-position Jacobian at the predicted configuration,
        // transported through the two integrations.
        let mut jphi = DMatrix::zeros(dimi, self.dimv);
        robot.contact_jacobian(impulse_status, &mut jphi);
        let mut transported = DMatrix::zeros(dimi, self.dimv);
        robot.d_integrate_dq(&self.q_mid, &s.a, &jphi, &mut transported);
        let mut pq = DMatrix::zeros(dimi, self.dimv);
        robot.d_integrate_dq(&s.q, &s.v, &transported, &mut pq);
        self.pq.view_mut((0, 0), (dimi, self.dimv)).copy_from(&pq);

        let mut pv = DMatrix::zeros(dimi, self.dimv);
        robot.d_integrate_dv(&s.q, &s.v, &transported, &mut pv);
        pv *= dt1 + dt2;
        self.pv.view_mut((0, 0), (dimi, self.dimv)).copy_from(&pv);

        let mut pa = DMatrix::zeros(dimi, self.dimv);
        robot.d_integrate_dv(&self.q_mid, &s.a, &jphi, &mut pa);
        pa *= dt1 * dt2;
        self.pa.view_mut((0, 0), (dimi, self.dimv)).copy_from(&pa);

        // ξ enters the gradients of (q, v, a); the a-term is folded into
        // (x, u) by the dynamics condensation.
        let xi = s.xi().clone_owned();
        {
            let mut lq = kkt_residual.lq_mut();
            lq.gemv_tr(1.0, &pq, &xi, 1.0);
        }
        {
            let mut lv = kkt_residual.lv_mut();
            lv.gemv_tr(1.0, &pv, &xi, 1.0);
        }
        kkt_residual.la.gemv_tr(1.0, &pa, &xi, 1.0);

        // Switching-time sensitivity of the constraint,
        // ∂(ξᵀP)/∂ts = (dt2 − dt1)·ξᵀ J_φ a, accumulated into the stage
        // Hamiltonian so STO sees the full event-time gradient.
        let ja = &jphi * &s.a;
        kkt_residual.h += (dt2 - dt1) * xi.dot(&ja);
    }

    /// Rewrites the constraint over `(dx, du)` using the condensed
    /// acceleration map of the contact dynamics.
    pub fn condense(&mut self, contact_dynamics: &ContactDynamics) {
        let dimi = self.dimi;
        if dimi == 0 {
            return;
        }
        let (da_x, da_u, da_0) = contact_dynamics.acceleration_map();
        let pa = self.pa.view((0, 0), (dimi, self.dimv)).clone_owned();

        let mut gx = DMatrix::zeros(dimi, 2 * self.dimv);
        gx.view_mut((0, 0), (dimi, self.dimv))
            .copy_from(&self.pq.view((0, 0), (dimi, self.dimv)));
        gx.view_mut((0, self.dimv), (dimi, self.dimv))
            .copy_from(&self.pv.view((0, 0), (dimi, self.dimv)));
        gx += &pa * da_x.clone_owned();
        self.gx.view_mut((0, 0), (dimi, 2 * self.dimv)).copy_from(&gx);

        let gu = &pa * da_u.clone_owned();
        self.gu.view_mut((0, 0), (dimi, self.dimu)).copy_from(&gu);

        let mut r = self.residual.rows(0, dimi).clone_owned();
        r.gemv(1.0, &pa, &da_0.clone_owned(), 1.0);
        self.residual_condensed.rows_mut(0, dimi).copy_from(&r);
    }

    /// `Paᵀ·dξ`, the switching multiplier's contribution to the
    /// acceleration stationarity row. `None` when inactive.
    pub fn xi_acceleration_term(
        &self,
        d: &crate::kkt::SplitDirection,
    ) -> Option<DVector<f64>> {
        if self.dimi == 0 {
            return None;
        }
        let pa = self.pa.view((0, 0), (self.dimi, self.dimv)).clone_owned();
        let dxi = d.dxi().clone_owned();
        let mut term = DVector::zeros(self.dimv);
        term.gemv_tr(1.0, &pa, &dxi, 0.0);
        Some(term)
    }

    /// Constraint Jacobian with respect to the state, after condensation.
    pub fn gx(&self) -> nalgebra::DMatrixView<'_, f64> {
        self.gx.view((0, 0), (self.dimi, 2 * self.dimv))
    }

    /// Constraint Jacobian with respect to the control, after condensation.
    pub fn gu(&self) -> nalgebra::DMatrixView<'_, f64> {
        self.gu.view((0, 0), (self.dimi, self.dimu))
    }

    /// Condensed constraint residual.
    pub fn residual_condensed(&self) -> nalgebra::DVectorView<'_, f64> {
        self.residual_condensed.rows(0, self.dimi)
    }

    /// Raw constraint residual `P`.
    pub fn residual(&self) -> nalgebra::DVectorView<'_, f64> {
        self.residual.rows(0, self.dimi)
    }

    /// Max-abs of the constraint residual.
    pub fn kkt_error(&self) -> f64 {
        if self.dimi == 0 {
            0.0
        } else {
            self.residual.rows(0, self.dimi).amax()
        }
    }

    /// l1 norm of the constraint residual.
    pub fn constraint_violation(&self) -> f64 {
        self.residual.rows(0, self.dimi).iter().map(|x| x.abs()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::robot::{ContactStatus, LinearChainModel, RobotModel};

    #[test]
    fn test_residual_at_predicted_configuration() {
        let mut robot = LinearChainModel::new(3).add_contact([0, 1, 2], [0.0; 3]);
        let status = ContactStatus::from_active(&[true]);

        let mut s = crate::kkt::SplitSolution::new(&robot);
        s.q.copy_from_slice(&[0.1, 0.0, 0.3]);
        s.v.copy_from_slice(&[1.0, 0.0, -1.0]);
        s.a.copy_from_slice(&[0.0, 2.0, 0.0]);
        robot.update_kinematics(&s.q.clone(), &s.v.clone());

        let mut sw = SwitchingConstraint::new(&robot);
        let (dt1, dt2) = (0.03, 0.02);
        sw.eval(&mut robot, &status, dt1, dt2, &s);

        // q_pred = q + (dt1+dt2)·v + dt1·dt2·a on the vector space.
        let expected = [
            0.1 + 0.05 * 1.0,
            0.0 + 0.0006 * 2.0,
            0.3 - 0.05,
        ];
        for k in 0..3 {
            assert!((sw.residual()[k] - expected[k]).abs() < 1e-14);
        }
        assert_eq!(sw.dimi(), 3);
    }
}
