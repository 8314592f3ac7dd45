//! Impulse dynamics and its condensation.
//!
//! At a contact-make event the configuration is continuous and the velocity
//! jumps through
//!
//! ```text
//! D_I(q, dv, f) = M(q)·dv − J_cᵀ f = 0
//! C_I(q, v, dv) = J_c · (v + dv)   = 0
//! ```
//!
//! where `J_c` stacks the newly activated contacts. The pair `(ddv, df)` is
//! condensed out through the same saddle matrix `[M −Jᵀ; J 0]` as the
//! regular contact dynamics; positions never enter the impulse map.

use nalgebra::{DMatrix, DVector};

use crate::kkt::{SplitDirection, SplitKktMatrix, SplitKktResidual, SplitSolution};
use crate::robot::{ImpulseStatus, RobotModel};

use super::contact_dynamics::{DynamicsError, SaddleSolver};

/// Impulse-dynamics kernel for one impulse stage.
#[derive(Debug, Clone)]
pub struct ImpulseDynamics {
    did_dq: DMatrix<f64>,
    diddv: DMatrix<f64>,
    dcdq: DMatrix<f64>,
    j: DMatrix<f64>,
    rd: DVector<f64>,
    rc: DVector<f64>,
    phi_x: DMatrix<f64>,
    phi0: DVector<f64>,
    solver: SaddleSolver,
    dimv: usize,
    dimf: usize,
    condensed: bool,
}

impl ImpulseDynamics {
    pub fn new(robot: &dyn RobotModel) -> Self {
        let dimv = robot.dimv();
        let maxf = robot.max_dimf();
        let ny = dimv + maxf;
        Self {
            did_dq: DMatrix::zeros(dimv, dimv),
            diddv: DMatrix::zeros(dimv, dimv),
            dcdq: DMatrix::zeros(maxf, dimv),
            j: DMatrix::zeros(maxf, dimv),
            rd: DVector::zeros(dimv),
            rc: DVector::zeros(maxf),
            phi_x: DMatrix::zeros(ny, 2 * dimv),
            phi0: DVector::zeros(ny),
            solver: SaddleSolver::new(dimv, maxf),
            dimv,
            dimf: 0,
            condensed: false,
        }
    }

    /// Evaluates the impulse residuals. Kinematics must be updated at
    /// `(q, v + dv)` so the contact-velocity residual sees the post-impact
    /// velocity.
    pub fn eval(&mut self, robot: &dyn RobotModel, status: &ImpulseStatus, s: &SplitSolution) {
        self.dimf = status.dimf();
        self.condensed = false;
        robot.impulse_inverse_dynamics(status, &s.dv, &s.f().clone_owned(), &mut self.rd);
        if self.dimf > 0 {
            let mut tmp = DVector::zeros(self.dimf);
            robot.contact_velocity_residual(status, &mut tmp);
            self.rc.rows_mut(0, self.dimf).copy_from(&tmp);
        }
    }

    /// Evaluates residuals and derivatives, and accumulates the multiplier
    /// terms of the stage gradient (impulse stages carry no `dt` weight).
    pub fn linearize(
        &mut self,
        robot: &dyn RobotModel,
        status: &ImpulseStatus,
        s: &SplitSolution,
        kkt_residual: &mut SplitKktResidual,
    ) {
        self.eval(robot, status, s);
        let f = s.f().clone_owned();
        robot.impulse_inverse_dynamics_derivatives(
            status,
            &s.dv,
            &f,
            &mut self.did_dq,
            &mut self.diddv,
        );
        if self.dimf > 0 {
            let mut tmp = DMatrix::zeros(self.dimf, self.dimv);
            robot.contact_jacobian(status, &mut tmp);
            self.j
                .view_mut((0, 0), (self.dimf, self.dimv))
                .copy_from(&tmp);
            let mut dcdq = DMatrix::zeros(self.dimf, self.dimv);
            let mut dcdv = DMatrix::zeros(self.dimf, self.dimv);
            robot.contact_velocity_derivatives(status, &mut dcdq, &mut dcdv);
            self.dcdq
                .view_mut((0, 0), (self.dimf, self.dimv))
                .copy_from(&dcdq);
        }

        let beta = &s.beta;
        let mu = s.mu().clone_owned();
        {
            let mut lq = kkt_residual.lq_mut();
            lq.gemv_tr(1.0, &self.did_dq, beta, 1.0);
        }
        kkt_residual.ldv.gemv_tr(1.0, &self.diddv, beta, 1.0);
        if self.dimf > 0 {
            let j = self.j.view((0, 0), (self.dimf, self.dimv)).clone_owned();
            let dcdq = self.dcdq.view((0, 0), (self.dimf, self.dimv)).clone_owned();
            {
                let mut lq = kkt_residual.lq_mut();
                lq.gemv_tr(1.0, &dcdq, &mu, 1.0);
            }
            {
                // C_I depends on v and dv through the same Jacobian.
                let mut lv = kkt_residual.lv_mut();
                lv.gemv_tr(1.0, &j, &mu, 1.0);
            }
            kkt_residual.ldv.gemv_tr(1.0, &j, &mu, 1.0);
            {
                let mut lf = kkt_residual.lf_mut();
                lf.gemv(-1.0, &j, beta, 1.0);
            }
        }
    }

    /// Condenses `(dv, f)` out of the impulse stage and rewrites the
    /// velocity row of the impulse state equation.
    pub fn condense(
        &mut self,
        kkt_matrix: &mut SplitKktMatrix,
        kkt_residual: &mut SplitKktResidual,
    ) -> Result<(), DynamicsError> {
        let dimv = self.dimv;
        let dimf = self.dimf;
        let ny = dimv + dimf;
        let j_active = self.j.view((0, 0), (dimf, dimv)).clone_owned();
        self.solver.factorize(&self.diddv, &j_active)?;

        // E_q = [D_q; C_q], E_v = [0; J], E_0 = [rd; rc].
        let mut eq_top = self.did_dq.clone();
        eq_top.neg_mut();
        let mut eq_bot = self.dcdq.view((0, 0), (dimf, dimv)).clone_owned();
        eq_bot.neg_mut();
        let (aq_top, aq_bot) = self.solver.solve(&eq_top, &eq_bot);

        let ev_top = DMatrix::zeros(dimv, dimv);
        let mut ev_bot = j_active.clone();
        ev_bot.neg_mut();
        let (av_top, av_bot) = self.solver.solve(&ev_top, &ev_bot);

        let rd_neg = DMatrix::from_column_slice(dimv, 1, (-&self.rd).as_slice());
        let rc_neg = DMatrix::from_column_slice(
            dimf,
            1,
            (-self.rc.rows(0, dimf).clone_owned()).as_slice(),
        );
        let (a0_top, a0_bot) = self.solver.solve(&rd_neg, &rc_neg);

        self.phi_x.fill(0.0);
        self.phi0.fill(0.0);
        self.phi_x.view_mut((0, 0), (dimv, dimv)).copy_from(&aq_top);
        self.phi_x.view_mut((0, dimv), (dimv, dimv)).copy_from(&av_top);
        self.phi_x.view_mut((dimv, 0), (dimf, dimv)).copy_from(&aq_bot);
        self.phi_x
            .view_mut((dimv, dimv), (dimf, dimv))
            .copy_from(&av_bot);
        self.phi0.rows_mut(0, dimv).copy_from(&a0_top.column(0));
        self.phi0.rows_mut(dimv, dimf).copy_from(&a0_bot.column(0));

        let phi_x = self.phi_x.view((0, 0), (ny, 2 * dimv)).clone_owned();
        let phi0 = self.phi0.rows(0, ny).clone_owned();

        // Fold the (dv, f) cost into the state blocks.
        let mut qyy_phi_x = DMatrix::zeros(ny, 2 * dimv);
        let mut qyy_phi0 = DVector::zeros(ny);
        qyy_phi_x
            .view_mut((0, 0), (dimv, 2 * dimv))
            .copy_from(&(&kkt_matrix.qdvdv * phi_x.view((0, 0), (dimv, 2 * dimv))));
        qyy_phi0
            .rows_mut(0, dimv)
            .copy_from(&(&kkt_matrix.qdvdv * phi0.rows(0, dimv)));
        if dimf > 0 {
            let qff = kkt_matrix.qff().clone_owned();
            qyy_phi_x
                .view_mut((dimv, 0), (dimf, 2 * dimv))
                .copy_from(&(&qff * phi_x.view((dimv, 0), (dimf, 2 * dimv))));
            qyy_phi0
                .rows_mut(dimv, dimf)
                .copy_from(&(&qff * phi0.rows(dimv, dimf)));
        }

        let mut l_y = DVector::zeros(ny);
        l_y.rows_mut(0, dimv).copy_from(&kkt_residual.ldv);
        if dimf > 0 {
            l_y.rows_mut(dimv, dimf)
                .copy_from(&kkt_residual.lf().clone_owned());
        }
        l_y += &qyy_phi0;

        kkt_matrix.qxx.gemm_tr(1.0, &phi_x, &qyy_phi_x, 1.0);
        kkt_residual.lx.gemv_tr(1.0, &phi_x, &l_y, 1.0);

        // Velocity row: dv' = dv + ddv(dx).
        let ddv_q = phi_x.view((0, 0), (dimv, dimv)).clone_owned();
        let ddv_v = phi_x.view((0, dimv), (dimv, dimv)).clone_owned();
        {
            let mut fvq = kkt_matrix.fvq_mut();
            fvq += &ddv_q;
        }
        {
            let mut fvv = kkt_matrix.fvv_mut();
            fvv += &ddv_v;
        }
        {
            let ddv0 = phi0.rows(0, dimv).clone_owned();
            let mut fv = kkt_residual.fv_mut();
            fv += &ddv0;
        }
        self.condensed = true;
        Ok(())
    }

    /// Recovers `(ddv, df)` from the state direction.
    pub fn expand_primal(&self, d: &mut SplitDirection) {
        debug_assert!(self.condensed);
        let dimv = self.dimv;
        let dimf = self.dimf;
        let ny = dimv + dimf;
        let mut dy = self.phi0.rows(0, ny).clone_owned();
        dy.gemv(
            1.0,
            &self.phi_x.view((0, 0), (ny, 2 * dimv)).clone_owned(),
            &d.dx,
            1.0,
        );
        d.ddv.copy_from(&dy.rows(0, dimv));
        if dimf > 0 {
            d.df_mut().copy_from(&dy.rows(dimv, dimf));
        }
    }

    /// Recovers the multiplier directions from the transposed saddle system.
    pub fn expand_dual(
        &self,
        dgmm_next: &DVector<f64>,
        kkt_matrix: &SplitKktMatrix,
        kkt_residual: &SplitKktResidual,
        d: &mut SplitDirection,
    ) {
        debug_assert!(self.condensed);
        let dimf = self.dimf;
        // Stationarity wrt dv: ldv + Qdvdv·ddv + dgmm' + Mᵀdβ + Jᵀdμ = 0.
        let mut r1 = kkt_residual.ldv.clone();
        r1.gemv(1.0, &kkt_matrix.qdvdv, &d.ddv, 1.0);
        r1 += dgmm_next;
        r1.neg_mut();
        // Stationarity wrt f: lf + Qff·df − J dβ = 0.
        let mut r2 = DVector::zeros(dimf);
        if dimf > 0 {
            let mut lf = kkt_residual.lf().clone_owned();
            let qff = kkt_matrix.qff().clone_owned();
            lf.gemv(1.0, &qff, &d.df().clone_owned(), 1.0);
            lf.neg_mut();
            r2.copy_from(&lf);
        }
        let (dbeta, dmu) = self.solver.solve_transposed(&r1, &r2);
        d.dbeta.copy_from(&dbeta);
        if dimf > 0 {
            d.dmu_mut().copy_from(&dmu);
        }
    }

    /// Max-abs of the impulse residuals.
    pub fn kkt_error(&self) -> f64 {
        self.rd.amax().max(if self.dimf > 0 {
            self.rc.rows(0, self.dimf).amax()
        } else {
            0.0
        })
    }

    /// l1 norm of the impulse residuals.
    pub fn constraint_violation(&self) -> f64 {
        let rd: f64 = self.rd.iter().map(|x| x.abs()).sum();
        let rc: f64 = self.rc.rows(0, self.dimf).iter().map(|x| x.abs()).sum();
        rd + rc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::robot::{ContactStatus, LinearChainModel};

    #[test]
    fn test_impulse_velocity_jump_satisfies_kkt() {
        let mut robot = LinearChainModel::new(3)
            .with_inertia(&[2.0, 2.0, 2.0])
            .add_contact([0, 1, 2], [0.0; 3]);
        let status = ContactStatus::from_active(&[true]);

        let mut s = SplitSolution::new(&robot);
        s.set_contact_status(&status);
        s.v.copy_from_slice(&[1.0, -1.0, 0.5]);
        // Post-impact kinematics at (q, v + dv); dv starts at zero.
        robot.update_kinematics(&s.q.clone(), &(s.v.clone() + s.dv.clone()));

        let mut dyn_ = ImpulseDynamics::new(&robot);
        let mut mat = SplitKktMatrix::new(&robot);
        let mut res = SplitKktResidual::new(&robot);
        mat.set_contact_status(&status);
        res.set_contact_status(&status);
        dyn_.linearize(&robot, &status, &s, &mut res);
        dyn_.condense(&mut mat, &mut res).unwrap();

        // With dx = 0 the condensed map already solves the impulse KKT:
        // M·dv = Jᵀ f and J(v + dv) = 0.
        let mut d = SplitDirection::new(&robot);
        d.set_contact_status(&status);
        dyn_.expand_primal(&mut d);

        let m = DMatrix::from_diagonal(&DVector::from_row_slice(&[2.0, 2.0, 2.0]));
        let j = DMatrix::<f64>::identity(3, 3);
        let lhs = &m * &d.ddv - j.transpose() * d.df().clone_owned();
        assert!(lhs.amax() < 1e-12);
        let post = &j * (&s.v + &d.ddv);
        assert!(post.amax() < 1e-12, "post-impact contact velocity nonzero");
    }
}
