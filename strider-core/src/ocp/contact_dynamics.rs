//! Contact-consistent inverse dynamics and its condensation.
//!
//! The stage carries two acceleration-level equality constraints,
//!
//! ```text
//! D(q, v, a, u, f) = ID(q, v, a) − J_cᵀ f − Sᵀ u = 0
//! C(q, v, a)       = J_c a + b_B(q, v)          = 0
//! ```
//!
//! with `b_B` the Baumgarte-stabilized bias. Given `(dq, dv, du)` the pair
//! `(da, df)` is determined by the linearized system with the saddle matrix
//!
//! ```text
//! E_y = [ M  −J_cᵀ ]
//!       [ J_c   0  ]
//! ```
//!
//! factorized through the Schur complement `J_c M⁻¹ J_cᵀ` on the Cholesky
//! factor of `M`. Condensation substitutes the affine map
//! `y = Φx·dx + Φu·du + φ0` into the stage quadratic, leaving a problem in
//! `(dx, du)` only; the multipliers `(β, μ)` are recovered afterwards from
//! the transposed saddle system.

use nalgebra::{Cholesky, DMatrix, DVector, Dyn};
use thiserror::Error;

use crate::kkt::{SplitDirection, SplitKktMatrix, SplitKktResidual, SplitSolution};
use crate::robot::{ContactStatus, RobotModel};

/// Failure of the contact-dynamics factorization.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DynamicsError {
    /// The joint-space inertia matrix is not positive definite.
    #[error("inertia matrix is not positive definite")]
    IndefiniteInertia,
    /// The contact Schur complement is singular (dependent contacts).
    #[error("contact Schur complement is singular")]
    SingularContactSchur,
}

/// Factorization of the saddle matrix `[M −Jᵀ; J 0]` via the Schur
/// complement `S = J M⁻¹ Jᵀ`.
#[derive(Debug, Clone)]
pub(crate) struct SaddleSolver {
    chol_m: Option<Cholesky<f64, Dyn>>,
    chol_s: Option<Cholesky<f64, Dyn>>,
    j: DMatrix<f64>,
    dimf: usize,
}

impl SaddleSolver {
    pub(crate) fn new(dimv: usize, max_dimf: usize) -> Self {
        Self {
            chol_m: None,
            chol_s: None,
            j: DMatrix::zeros(max_dimf, dimv),
            dimf: 0,
        }
    }

    /// Factorizes for the current inertia matrix and active contact
    /// Jacobian.
    pub(crate) fn factorize(
        &mut self,
        m: &DMatrix<f64>,
        j_active: &DMatrix<f64>,
    ) -> Result<(), DynamicsError> {
        let dimf = j_active.nrows();
        self.dimf = dimf;
        let chol_m = Cholesky::new(m.clone()).ok_or(DynamicsError::IndefiniteInertia)?;
        if dimf > 0 {
            self.j.view_mut((0, 0), (dimf, m.nrows())).copy_from(j_active);
            // S = J M⁻¹ Jᵀ.
            let mut minv_jt = j_active.transpose();
            chol_m.solve_mut(&mut minv_jt);
            let schur = j_active * &minv_jt;
            self.chol_s =
                Some(Cholesky::new(schur).ok_or(DynamicsError::SingularContactSchur)?);
        } else {
            self.chol_s = None;
        }
        self.chol_m = Some(chol_m);
        Ok(())
    }

    fn j_active(&self) -> nalgebra::DMatrixView<'_, f64> {
        self.j.view((0, 0), (self.dimf, self.j.ncols()))
    }

    /// Solves `[M −Jᵀ; J 0] [y1; y2] = [r1; r2]` column-wise.
    pub(crate) fn solve(
        &self,
        r1: &DMatrix<f64>,
        r2: &DMatrix<f64>,
    ) -> (DMatrix<f64>, DMatrix<f64>) {
        let chol_m = self.chol_m.as_ref().expect("saddle solver not factorized");
        if self.dimf == 0 {
            let mut y1 = r1.clone();
            chol_m.solve_mut(&mut y1);
            return (y1, DMatrix::zeros(0, r1.ncols()));
        }
        let j = self.j_active();
        let chol_s = self.chol_s.as_ref().expect("saddle solver not factorized");
        // y2 = S⁻¹ (J M⁻¹ r1 − r2); y1 = M⁻¹ (r1 + Jᵀ y2).
        let mut minv_r1 = r1.clone();
        chol_m.solve_mut(&mut minv_r1);
        let mut y2 = &j * &minv_r1 - r2;
        chol_s.solve_mut(&mut y2);
        let mut y1 = r1 + j.transpose() * &y2;
        chol_m.solve_mut(&mut y1);
        (y1, y2)
    }

    /// Solves the transposed system `[M Jᵀ; −J 0] [z1; z2] = [r1; r2]`.
    pub(crate) fn solve_transposed(
        &self,
        r1: &DVector<f64>,
        r2: &DVector<f64>,
    ) -> (DVector<f64>, DVector<f64>) {
        let chol_m = self.chol_m.as_ref().expect("saddle solver not factorized");
        if self.dimf == 0 {
            let mut z1 = r1.clone();
            chol_m.solve_mut(&mut z1);
            return (z1, DVector::zeros(0));
        }
        let j = self.j_active();
        let chol_s = self.chol_s.as_ref().expect("saddle solver not factorized");
        // z2 = S⁻¹ (J M⁻¹ r1 + r2); z1 = M⁻¹ (r1 − Jᵀ z2).
        let mut minv_r1 = r1.clone();
        chol_m.solve_mut(&mut minv_r1);
        let mut z2 = &j * &minv_r1 + r2;
        chol_s.solve_mut(&mut z2);
        let mut z1 = r1 - j.transpose() * &z2;
        chol_m.solve_mut(&mut z1);
        (z1, z2)
    }
}

/// Contact-dynamics kernel: residuals, derivatives, condensation, and
/// direction expansion for one regular stage.
#[derive(Debug, Clone)]
pub struct ContactDynamics {
    did_dq: DMatrix<f64>,
    did_dv: DMatrix<f64>,
    did_da: DMatrix<f64>,
    dcdq: DMatrix<f64>,
    dcdv: DMatrix<f64>,
    j: DMatrix<f64>,
    rd: DVector<f64>,
    rc: DVector<f64>,
    phi_x: DMatrix<f64>,
    phi_u: DMatrix<f64>,
    phi0: DVector<f64>,
    solver: SaddleSolver,
    dimv: usize,
    dimu: usize,
    dimf: usize,
    condensed: bool,
}

impl ContactDynamics {
    pub fn new(robot: &dyn RobotModel) -> Self {
        let dimv = robot.dimv();
        let dimu = robot.dimu();
        let maxf = robot.max_dimf();
        let ny = dimv + maxf;
        Self {
            did_dq: DMatrix::zeros(dimv, dimv),
            did_dv: DMatrix::zeros(dimv, dimv),
            did_da: DMatrix::zeros(dimv, dimv),
            dcdq: DMatrix::zeros(maxf, dimv),
            dcdv: DMatrix::zeros(maxf, dimv),
            j: DMatrix::zeros(maxf, dimv),
            rd: DVector::zeros(dimv),
            rc: DVector::zeros(maxf),
            phi_x: DMatrix::zeros(ny, 2 * dimv),
            phi_u: DMatrix::zeros(ny, dimu),
            phi0: DVector::zeros(ny),
            solver: SaddleSolver::new(dimv, maxf),
            dimv,
            dimu,
            dimf: 0,
            condensed: false,
        }
    }

    /// Evaluates the dynamics and contact residuals at the current iterate.
    /// Kinematics must be up to date.
    pub fn eval(&mut self, robot: &dyn RobotModel, status: &ContactStatus, s: &SplitSolution) {
        self.dimf = status.dimf();
        self.condensed = false;
        robot.inverse_dynamics(status, &s.a, &s.f().clone_owned(), &mut self.rd);
        let dim_passive = robot.dim_passive();
        for i in 0..self.dimu {
            self.rd[dim_passive + i] -= s.u[i];
        }
        if self.dimf > 0 {
            let mut rc = self.rc.rows_mut(0, self.dimf);
            let mut tmp = DVector::zeros(self.dimf);
            robot.contact_acceleration_residual(status, &s.a, &mut tmp);
            rc.copy_from(&tmp);
        }
    }

    /// Evaluates residuals and derivatives, and accumulates the multiplier
    /// terms of the stage gradient.
    pub fn linearize(
        &mut self,
        robot: &dyn RobotModel,
        status: &ContactStatus,
        dt: f64,
        s: &SplitSolution,
        kkt_residual: &mut SplitKktResidual,
    ) {
        self.eval(robot, status, s);
        let f = s.f().clone_owned();
        robot.inverse_dynamics_derivatives(
            status,
            &s.a,
            &f,
            &mut self.did_dq,
            &mut self.did_dv,
            &mut self.did_da,
        );
        if self.dimf > 0 {
            let mut tmp = DMatrix::zeros(self.dimf, self.dimv);
            robot.contact_jacobian(status, &mut tmp);
            self.j
                .view_mut((0, 0), (self.dimf, self.dimv))
                .copy_from(&tmp);
            let mut dcdq = DMatrix::zeros(self.dimf, self.dimv);
            let mut dcdv = DMatrix::zeros(self.dimf, self.dimv);
            robot.contact_acceleration_derivatives(status, &mut dcdq, &mut dcdv);
            self.dcdq
                .view_mut((0, 0), (self.dimf, self.dimv))
                .copy_from(&dcdq);
            self.dcdv
                .view_mut((0, 0), (self.dimf, self.dimv))
                .copy_from(&dcdv);
        }

        // Multiplier terms: β on D, μ on C. The dt factor mirrors the
        // integration weight of the stage Lagrangian.
        let beta = &s.beta;
        let mu = s.mu().clone_owned();
        {
            let mut lq = kkt_residual.lq_mut();
            lq.gemv_tr(dt, &self.did_dq, beta, 1.0);
        }
        {
            let mut lv = kkt_residual.lv_mut();
            lv.gemv_tr(dt, &self.did_dv, beta, 1.0);
        }
        kkt_residual.la.gemv_tr(dt, &self.did_da, beta, 1.0);
        if self.dimf > 0 {
            let dcdq = self.dcdq.view((0, 0), (self.dimf, self.dimv)).clone_owned();
            let dcdv = self.dcdv.view((0, 0), (self.dimf, self.dimv)).clone_owned();
            let j = self.j.view((0, 0), (self.dimf, self.dimv)).clone_owned();
            {
                let mut lq = kkt_residual.lq_mut();
                lq.gemv_tr(dt, &dcdq, &mu, 1.0);
            }
            {
                let mut lv = kkt_residual.lv_mut();
                lv.gemv_tr(dt, &dcdv, &mu, 1.0);
            }
            kkt_residual.la.gemv_tr(dt, &j, &mu, 1.0);
            {
                let mut lf = kkt_residual.lf_mut();
                lf.gemv(-dt, &j, beta, 1.0);
            }
        }
        let dim_passive = robot.dim_passive();
        for i in 0..self.dimu {
            kkt_residual.lu[i] -= dt * beta[dim_passive + i];
        }
    }

    /// Condenses `(a, f)` out of the stage: factorizes the saddle system,
    /// builds the affine map `y(dx, du)`, folds the `y`-space cost into the
    /// `(x, u)` blocks, and rewrites the velocity row of the state equation.
    pub fn condense(
        &mut self,
        robot: &dyn RobotModel,
        dt: f64,
        kkt_matrix: &mut SplitKktMatrix,
        kkt_residual: &mut SplitKktResidual,
    ) -> Result<(), DynamicsError> {
        let dimv = self.dimv;
        let dimf = self.dimf;
        let ny = dimv + dimf;
        let j_active = self.j.view((0, 0), (dimf, dimv)).clone_owned();
        self.solver.factorize(&self.did_da, &j_active)?;

        // Right-hand sides of E_y · y = −(E_q dq + E_v dv + E_u du + E_0).
        let mut eq_top = self.did_dq.clone();
        let mut ev_top = self.did_dv.clone();
        let mut eu_top = DMatrix::zeros(dimv, self.dimu);
        let dim_passive = robot.dim_passive();
        for i in 0..self.dimu {
            eu_top[(dim_passive + i, i)] = -1.0;
        }
        eq_top.neg_mut();
        ev_top.neg_mut();
        eu_top.neg_mut();
        let mut eq_bot = self.dcdq.view((0, 0), (dimf, dimv)).clone_owned();
        let mut ev_bot = self.dcdv.view((0, 0), (dimf, dimv)).clone_owned();
        eq_bot.neg_mut();
        ev_bot.neg_mut();

        let (aq_top, aq_bot) = self.solver.solve(&eq_top, &eq_bot);
        let (av_top, av_bot) = self.solver.solve(&ev_top, &ev_bot);
        let (au_top, au_bot) = self.solver.solve(&eu_top, &DMatrix::zeros(dimf, self.dimu));
        let rd_neg = DMatrix::from_column_slice(dimv, 1, (-&self.rd).as_slice());
        let rc_neg = DMatrix::from_column_slice(
            dimf,
            1,
            (-self.rc.rows(0, dimf).clone_owned()).as_slice(),
        );
        let (a0_top, a0_bot) = self.solver.solve(&rd_neg, &rc_neg);

        // Assemble Φ.
        self.phi_x.fill(0.0);
        self.phi_u.fill(0.0);
        self.phi0.fill(0.0);
        self.phi_x.view_mut((0, 0), (dimv, dimv)).copy_from(&aq_top);
        self.phi_x.view_mut((0, dimv), (dimv, dimv)).copy_from(&av_top);
        self.phi_x.view_mut((dimv, 0), (dimf, dimv)).copy_from(&aq_bot);
        self.phi_x
            .view_mut((dimv, dimv), (dimf, dimv))
            .copy_from(&av_bot);
        self.phi_u.view_mut((0, 0), (dimv, self.dimu)).copy_from(&au_top);
        self.phi_u
            .view_mut((dimv, 0), (dimf, self.dimu))
            .copy_from(&au_bot);
        self.phi0.rows_mut(0, dimv).copy_from(&a0_top.column(0));
        self.phi0
            .rows_mut(dimv, dimf)
            .copy_from(&a0_bot.column(0));

        let phi_x = self.phi_x.view((0, 0), (ny, 2 * dimv)).clone_owned();
        let phi_u = self.phi_u.view((0, 0), (ny, self.dimu)).clone_owned();
        let phi0 = self.phi0.rows(0, ny).clone_owned();

        // y-space cost: Qyy = blkdiag(Qaa, Qff), l_y = (la, lf).
        let mut qyy_phi_x = DMatrix::zeros(ny, 2 * dimv);
        let mut qyy_phi_u = DMatrix::zeros(ny, self.dimu);
        let mut qyy_phi0 = DVector::zeros(ny);
        qyy_phi_x
            .view_mut((0, 0), (dimv, 2 * dimv))
            .copy_from(&(&kkt_matrix.qaa * phi_x.view((0, 0), (dimv, 2 * dimv))));
        qyy_phi_u
            .view_mut((0, 0), (dimv, self.dimu))
            .copy_from(&(&kkt_matrix.qaa * phi_u.view((0, 0), (dimv, self.dimu))));
        qyy_phi0
            .rows_mut(0, dimv)
            .copy_from(&(&kkt_matrix.qaa * phi0.rows(0, dimv)));
        if dimf > 0 {
            let qff = kkt_matrix.qff().clone_owned();
            qyy_phi_x
                .view_mut((dimv, 0), (dimf, 2 * dimv))
                .copy_from(&(&qff * phi_x.view((dimv, 0), (dimf, 2 * dimv))));
            qyy_phi_u
                .view_mut((dimv, 0), (dimf, self.dimu))
                .copy_from(&(&qff * phi_u.view((dimv, 0), (dimf, self.dimu))));
            qyy_phi0
                .rows_mut(dimv, dimf)
                .copy_from(&(&qff * phi0.rows(dimv, dimf)));
        }

        let mut l_y = DVector::zeros(ny);
        l_y.rows_mut(0, dimv).copy_from(&kkt_residual.la);
        if dimf > 0 {
            l_y.rows_mut(dimv, dimf)
                .copy_from(&kkt_residual.lf().clone_owned());
        }
        l_y += &qyy_phi0;

        kkt_matrix.qxx.gemm_tr(1.0, &phi_x, &qyy_phi_x, 1.0);
        kkt_matrix.qxu.gemm_tr(1.0, &phi_x, &qyy_phi_u, 1.0);
        kkt_matrix.quu.gemm_tr(1.0, &phi_u, &qyy_phi_u, 1.0);
        kkt_residual.lx.gemv_tr(1.0, &phi_x, &l_y, 1.0);
        kkt_residual.lu.gemv_tr(1.0, &phi_u, &l_y, 1.0);

        // Velocity row of the state equation picks up the condensed
        // acceleration: dFv = dv + dt·da(dx, du) − dv'.
        let da_q = phi_x.view((0, 0), (dimv, dimv));
        let da_v = phi_x.view((0, dimv), (dimv, dimv));
        let da_u = phi_u.view((0, 0), (dimv, self.dimu));
        {
            let mut fvq = kkt_matrix.fvq_mut();
            let scaled = da_q.clone_owned() * dt;
            fvq += &scaled;
        }
        {
            let mut fvv = kkt_matrix.fvv_mut();
            let scaled = da_v.clone_owned() * dt;
            fvv += &scaled;
        }
        kkt_matrix.fvu.copy_from(&(da_u.clone_owned() * dt));
        {
            let da0 = phi0.rows(0, dimv).clone_owned();
            let mut fv = kkt_residual.fv_mut();
            fv.axpy(dt, &da0, 1.0);
        }
        self.condensed = true;
        Ok(())
    }

    /// Recovers `(da, df)` from the state/control direction.
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
        dy.gemv(
            1.0,
            &self.phi_u.view((0, 0), (ny, self.dimu)).clone_owned(),
            &d.du,
            1.0,
        );
        d.da.copy_from(&dy.rows(0, dimv));
        if dimf > 0 {
            d.df_mut().copy_from(&dy.rows(dimv, dimf));
        }
    }

    /// Recovers the multiplier directions `(dβ, dμ)` by back-substitution
    /// into the transposed saddle system. `dgmm_next` is the next stage's
    /// velocity-costate direction; `xi_term` carries `Paᵀ·dξ` when the stage
    /// carries a switching constraint.
    pub fn expand_dual(
        &self,
        dt: f64,
        dgmm_next: &DVector<f64>,
        xi_term: Option<&DVector<f64>>,
        kkt_matrix: &SplitKktMatrix,
        kkt_residual: &SplitKktResidual,
        d: &mut SplitDirection,
    ) {
        debug_assert!(self.condensed);
        debug_assert!(dt > 0.0);
        let dimf = self.dimf;
        // Stationarity wrt a:  la + Qaa·da + dt·dgmm' + Paᵀdξ + dt·(Mᵀdβ + Jᵀdμ) = 0
        // Stationarity wrt f:  lf + Qff·df − dt·J dβ = 0
        let mut r1 = kkt_residual.la.clone();
        r1.gemv(1.0, &kkt_matrix.qaa, &d.da, 1.0);
        r1.axpy(dt, dgmm_next, 1.0);
        if let Some(term) = xi_term {
            r1 += term;
        }
        r1.neg_mut();
        r1 /= dt;
        let mut r2 = DVector::zeros(dimf);
        if dimf > 0 {
            let mut lf = kkt_residual.lf().clone_owned();
            let qff = kkt_matrix.qff().clone_owned();
            lf.gemv(1.0, &qff, &d.df().clone_owned(), 1.0);
            lf.neg_mut();
            lf /= dt;
            r2.copy_from(&lf);
        }
        let (dbeta, dmu) = self.solver.solve_transposed(&r1, &r2);
        d.dbeta.copy_from(&dbeta);
        if dimf > 0 {
            d.dmu_mut().copy_from(&dmu);
        }
    }

    /// Affine acceleration map of the last condensation, rows `0..dimv` of
    /// `(Φx, Φu, φ0)`; consumed by the switching constraint.
    pub(crate) fn acceleration_map(
        &self,
    ) -> (
        nalgebra::DMatrixView<'_, f64>,
        nalgebra::DMatrixView<'_, f64>,
        nalgebra::DVectorView<'_, f64>,
    ) {
        debug_assert!(self.condensed);
        (
            self.phi_x.view((0, 0), (self.dimv, 2 * self.dimv)),
            self.phi_u.view((0, 0), (self.dimv, self.dimu)),
            self.phi0.rows(0, self.dimv),
        )
    }

    /// Max-abs of the dynamics and contact residuals.
    pub fn kkt_error(&self) -> f64 {
        self.rd.amax().max(if self.dimf > 0 {
            self.rc.rows(0, self.dimf).amax()
        } else {
            0.0
        })
    }

    /// l1 norm of the dynamics and contact residuals.
    pub fn constraint_violation(&self) -> f64 {
        let rd: f64 = self.rd.iter().map(|x| x.abs()).sum();
        let rc: f64 = self.rc.rows(0, self.dimf).iter().map(|x| x.abs()).sum();
        rd + rc
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::robot::LinearChainModel;

    fn contact_model() -> LinearChainModel {
        LinearChainModel::new(3)
            .with_inertia(&[2.0, 3.0, 4.0])
            .with_gravity(&[0.0, 0.0, -9.81])
            .add_contact([0, 1, 2], [0.0; 3])
    }

    #[test]
    fn test_saddle_solver_roundtrip() {
        let mut solver = SaddleSolver::new(3, 3);
        let m = DMatrix::from_diagonal(&DVector::from_row_slice(&[2.0, 3.0, 4.0]));
        let j = DMatrix::<f64>::identity(3, 3);
        solver.factorize(&m, &j).unwrap();

        let r1 = DMatrix::from_column_slice(3, 1, &[1.0, 2.0, 3.0]);
        let r2 = DMatrix::from_column_slice(3, 1, &[0.5, -0.5, 0.0]);
        let (y1, y2) = solver.solve(&r1, &r2);

        // Verify M y1 − Jᵀ y2 = r1 and J y1 = r2.
        let lhs1 = &m * &y1 - j.transpose() * &y2;
        let lhs2 = &j * &y1;
        assert!((lhs1 - &r1).norm() < 1e-12);
        assert!((lhs2 - &r2).norm() < 1e-12);

        // Transposed system: M z1 + Jᵀ z2 = r1, −J z1 = r2.
        let r1v = DVector::from_row_slice(&[1.0, 2.0, 3.0]);
        let r2v = DVector::from_row_slice(&[0.5, -0.5, 0.0]);
        let (z1, z2) = solver.solve_transposed(&r1v, &r2v);
        let lhs1 = &m * &z1 + j.transpose() * &z2;
        let lhs2 = -(&j * &z1);
        assert!((lhs1 - &r1v).norm() < 1e-12);
        assert!((lhs2 - &r2v).norm() < 1e-12);
    }

    #[test]
    fn test_expand_primal_solves_linearized_dynamics() {
        let mut robot = contact_model();
        let status = ContactStatus::from_active(&[true]);
        let mut s = SplitSolution::new(&robot);
        s.set_contact_status(&status);
        s.q.copy_from_slice(&[0.1, 0.2, 0.3]);
        s.v.copy_from_slice(&[0.0, 0.1, -0.1]);
        s.a.copy_from_slice(&[0.5, 0.0, 0.2]);
        s.u.copy_from_slice(&[0.0, 0.0, 0.0]);
        robot.update_kinematics(&s.q.clone(), &s.v.clone());

        let mut cd = ContactDynamics::new(&robot);
        let mut mat = SplitKktMatrix::new(&robot);
        let mut res = SplitKktResidual::new(&robot);
        mat.set_contact_status(&status);
        res.set_contact_status(&status);
        let dt = 0.1;
        cd.linearize(&robot, &status, dt, &s, &mut res);
        // Give the accelerations a positive cost so the fold is non-trivial.
        mat.qaa.fill_diagonal(dt * 1.0);
        cd.condense(&robot, dt, &mut mat, &mut res).unwrap();

        let mut d = SplitDirection::new(&robot);
        d.set_contact_status(&status);
        d.dx.copy_from_slice(&[0.01, -0.02, 0.0, 0.005, 0.0, 0.0]);
        d.du.copy_from_slice(&[0.1, 0.0, -0.1]);
        cd.expand_primal(&mut d);

        // The expanded (da, df) satisfies the linearized dynamics rows:
        // M da − Jᵀ df + Dq dq + Dv dv − Sᵀ du + rd = 0
        // J da + Cq dq + Cv dv + rc = 0
        let m = DMatrix::from_diagonal(&DVector::from_row_slice(&[2.0, 3.0, 4.0]));
        let j = DMatrix::<f64>::identity(3, 3);
        let tau = robot.baumgarte_time_constant();
        let dq = d.dq().clone_owned();
        let dv = d.dv().clone_owned();

        let mut rd = DVector::zeros(3);
        robot.inverse_dynamics(&status, &s.a, &s.f().clone_owned(), &mut rd);
        rd -= &s.u;
        let row1 = &m * &d.da - j.transpose() * d.df().clone_owned() - &d.du + &rd;
        assert!(row1.amax() < 1e-10, "dynamics row residual: {}", row1.amax());

        let mut rc = DVector::zeros(3);
        robot.contact_acceleration_residual(&status, &s.a, &mut rc);
        let row2 = &j * &d.da
            + &dq / (tau * tau)
            + &dv * (2.0 / tau)
            + rc;
        assert!(row2.amax() < 1e-10, "contact row residual: {}", row2.amax());
    }
}
