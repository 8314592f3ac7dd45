//! Single-stage Riccati kernels.
//!
//! Backward step of the stagewise LQR subproblem
//!
//! ```text
//! min ½ [dx; du]ᵀ [Qxx Qxu; Qxuᵀ Quu] [dx; du] + lxᵀ dx + luᵀ du + V'(A dx + B du + e)
//! ```
//!
//! with `V'(dx) = ½ dxᵀ P' dx − s'ᵀ dx`. The control Hessian is factorized
//! by Cholesky; on failure a diagonal shift is added and doubled up to a cap
//! before the sweep reports an indefinite KKT system.

use nalgebra::{Cholesky, DMatrix, Dyn};
use thiserror::Error;

use crate::kkt::{SplitKktMatrix, SplitKktResidual};

use super::factorization::{SplitRiccatiFactorization, SwitchingRiccatiFactorization};
use super::lqr_policy::LqrPolicy;

/// Failure of the backward sweep.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiccatiError {
    /// The control Hessian stayed indefinite after the regularization cap.
    #[error("indefinite KKT system: control Hessian not positive definite")]
    IndefiniteKkt,
    /// The switching-constraint Schur complement is singular.
    #[error("singular switching-constraint Schur complement")]
    SingularSwitching,
}

/// Diagonal-shift policy for indefinite control Hessians: start at
/// `initial`, double until `max`.
#[derive(Debug, Clone, Copy)]
pub struct RegularizationPolicy {
    pub initial: f64,
    pub max: f64,
}

impl Default for RegularizationPolicy {
    fn default() -> Self {
        Self {
            initial: 1.0e-9,
            max: 1.0e6,
        }
    }
}

/// Stateless single-stage kernels plus the regularization counter.
#[derive(Debug, Clone)]
pub struct RiccatiFactorizer {
    dimv: usize,
    dimu: usize,
    reg: RegularizationPolicy,
    /// Number of diagonal shifts applied across the lifetime of the solver.
    pub reg_bumps: u64,
}

impl RiccatiFactorizer {
    pub fn new(dimv: usize, dimu: usize, reg: RegularizationPolicy) -> Self {
        Self {
            dimv,
            dimu,
            reg,
            reg_bumps: 0,
        }
    }

    fn control_matrix(&self, kkt_matrix: &SplitKktMatrix) -> DMatrix<f64> {
        let dimx = 2 * self.dimv;
        let mut b = DMatrix::zeros(dimx, self.dimu);
        b.view_mut((self.dimv, 0), (self.dimv, self.dimu))
            .copy_from(&kkt_matrix.fvu);
        b
    }

    fn cholesky_with_reg(&mut self, g: &DMatrix<f64>) -> Result<Cholesky<f64, Dyn>, RiccatiError> {
        if let Some(chol) = Cholesky::new(g.clone()) {
            return Ok(chol);
        }
        let mut delta = self.reg.initial;
        while delta <= self.reg.max {
            let mut shifted = g.clone();
            for i in 0..shifted.nrows() {
                shifted[(i, i)] += delta;
            }
            if let Some(chol) = Cholesky::new(shifted) {
                self.reg_bumps += 1;
                return Ok(chol);
            }
            delta *= 2.0;
        }
        Err(RiccatiError::IndefiniteKkt)
    }

    /// Terminal initialization: `P = Qxx`, `s = −lx`.
    pub fn backward_terminal(
        &self,
        kkt_matrix: &SplitKktMatrix,
        kkt_residual: &SplitKktResidual,
        riccati: &mut SplitRiccatiFactorization,
    ) {
        riccati.p.copy_from(&kkt_matrix.qxx);
        riccati.s.copy_from(&kkt_residual.lx);
        riccati.s.neg_mut();
    }

    /// Backward step through a controlled stage.
    pub fn backward_stage(
        &mut self,
        kkt_matrix: &SplitKktMatrix,
        kkt_residual: &SplitKktResidual,
        riccati_next: &SplitRiccatiFactorization,
        riccati: &mut SplitRiccatiFactorization,
        policy: &mut LqrPolicy,
    ) -> Result<(), RiccatiError> {
        let a = &kkt_matrix.fxx;
        let b = self.control_matrix(kkt_matrix);
        let e = &kkt_residual.fx;

        let pa = &riccati_next.p * a;
        let pb = &riccati_next.p * &b;
        let pe_s = &riccati_next.p * e - &riccati_next.s;

        let f = &kkt_matrix.qxx + a.transpose() * &pa;
        let h = &kkt_matrix.qxu + a.transpose() * &pb;
        let g = &kkt_matrix.quu + b.transpose() * &pb;
        let b_x = &kkt_residual.lx + a.transpose() * &pe_s;
        let b_u = &kkt_residual.lu + b.transpose() * &pe_s;

        let chol = self.cholesky_with_reg(&g)?;
        let mut k_gain = -h.transpose();
        chol.solve_mut(&mut k_gain);
        let mut k_ff = -&b_u;
        chol.solve_mut(&mut k_ff);
        policy.k_gain.copy_from(&k_gain);
        policy.k_ff.copy_from(&k_ff);

        let mut p = f + &h * &k_gain;
        symmetrize(&mut p);
        riccati.p.copy_from(&p);
        let s = -(b_x + &h * &k_ff);
        riccati.s.copy_from(&s);
        Ok(())
    }

    /// Backward step through a controlled stage carrying the switching
    /// constraint `Gx dx + Gu du + r = 0`.
    #[allow(clippy::too_many_arguments)]
    pub fn backward_stage_constrained(
        &mut self,
        kkt_matrix: &SplitKktMatrix,
        kkt_residual: &SplitKktResidual,
        gx: nalgebra::DMatrixView<'_, f64>,
        gu: nalgebra::DMatrixView<'_, f64>,
        r: nalgebra::DVectorView<'_, f64>,
        riccati_next: &SplitRiccatiFactorization,
        riccati: &mut SplitRiccatiFactorization,
        policy: &mut LqrPolicy,
        sc_riccati: &mut SwitchingRiccatiFactorization,
    ) -> Result<(), RiccatiError> {
        let dimi = gx.nrows();
        if dimi == 0 {
            return self.backward_stage(kkt_matrix, kkt_residual, riccati_next, riccati, policy);
        }
        let a = &kkt_matrix.fxx;
        let b = self.control_matrix(kkt_matrix);
        let e = &kkt_residual.fx;

        let pa = &riccati_next.p * a;
        let pb = &riccati_next.p * &b;
        let pe_s = &riccati_next.p * e - &riccati_next.s;

        let f = &kkt_matrix.qxx + a.transpose() * &pa;
        let h = &kkt_matrix.qxu + a.transpose() * &pb;
        let g = &kkt_matrix.quu + b.transpose() * &pb;
        let b_x = &kkt_residual.lx + a.transpose() * &pe_s;
        let b_u = &kkt_residual.lu + b.transpose() * &pe_s;

        let chol = self.cholesky_with_reg(&g)?;
        // Ginv·Hᵀ, Ginv·Guᵀ, Ginv·b_u reused below.
        let mut ginv_ht = h.transpose();
        chol.solve_mut(&mut ginv_ht);
        let mut ginv_gut = gu.transpose().clone_owned();
        chol.solve_mut(&mut ginv_gut);
        let mut ginv_bu = b_u.clone();
        chol.solve_mut(&mut ginv_bu);

        // Schur complement on the constraint rows.
        let schur = gu * &ginv_gut;
        let chol_s = Cholesky::new(schur).ok_or(RiccatiError::SingularSwitching)?;

        // dξ = M dx + m.
        let mut m_mat = gx.clone_owned() - gu * &ginv_ht;
        chol_s.solve_mut(&mut m_mat);
        let mut m_vec = r.clone_owned() - gu * &ginv_bu;
        chol_s.solve_mut(&mut m_vec);

        // du = K dx + k with the multiplier folded in.
        let mut k_gain = -(h.transpose() + gu.transpose() * &m_mat);
        chol.solve_mut(&mut k_gain);
        let mut k_ff = -(&b_u + gu.transpose() * &m_vec);
        chol.solve_mut(&mut k_ff);
        policy.k_gain.copy_from(&k_gain);
        policy.k_ff.copy_from(&k_ff);

        let mut p = f + &h * &k_gain - k_gain.transpose() * gu.transpose() * &m_mat;
        symmetrize(&mut p);
        riccati.p.copy_from(&p);
        let s = -(b_x + &h * &k_ff - k_gain.transpose() * gu.transpose() * &m_vec);
        riccati.s.copy_from(&s);

        sc_riccati.set_dim(dimi);
        sc_riccati.m_mat_mut().copy_from(&m_mat);
        sc_riccati.m_vec_mut().copy_from(&m_vec);
        Ok(())
    }

    /// Backward step through an uncontrolled (impulse) stage.
    pub fn backward_impulse(
        &self,
        kkt_matrix: &SplitKktMatrix,
        kkt_residual: &SplitKktResidual,
        riccati_next: &SplitRiccatiFactorization,
        riccati: &mut SplitRiccatiFactorization,
    ) {
        let a = &kkt_matrix.fxx;
        let e = &kkt_residual.fx;
        let pa = &riccati_next.p * a;
        let pe_s = &riccati_next.p * e - &riccati_next.s;

        let mut p = &kkt_matrix.qxx + a.transpose() * &pa;
        symmetrize(&mut p);
        riccati.p.copy_from(&p);
        let s = -(&kkt_residual.lx + a.transpose() * &pe_s);
        riccati.s.copy_from(&s);
    }

    /// Forward step through a controlled stage. `dts_coeff·dts` injects the
    /// switching-time sensitivity of the interval length.
    #[allow(clippy::too_many_arguments)]
    pub fn forward_stage(
        &self,
        kkt_matrix: &SplitKktMatrix,
        kkt_residual: &SplitKktResidual,
        policy: &LqrPolicy,
        d: &mut crate::kkt::SplitDirection,
        d_next: &mut crate::kkt::SplitDirection,
        dts: f64,
        dts_coeff: f64,
    ) {
        d.du.copy_from(&policy.k_ff);
        d.du.gemv(1.0, &policy.k_gain, &d.dx, 1.0);

        let b = self.control_matrix(kkt_matrix);
        d_next.dx.copy_from(&kkt_residual.fx);
        d_next.dx.gemv(1.0, &kkt_matrix.fxx, &d.dx, 1.0);
        d_next.dx.gemv(1.0, &b, &d.du, 1.0);
        if dts_coeff != 0.0 {
            d_next.dx.axpy(dts_coeff * dts, &kkt_matrix.fx_dt, 1.0);
        }
    }

    /// Forward step through an impulse stage (no control).
    pub fn forward_impulse(
        &self,
        kkt_matrix: &SplitKktMatrix,
        kkt_residual: &SplitKktResidual,
        d: &crate::kkt::SplitDirection,
        d_next: &mut crate::kkt::SplitDirection,
    ) {
        d_next.dx.copy_from(&kkt_residual.fx);
        d_next.dx.gemv(1.0, &kkt_matrix.fxx, &d.dx, 1.0);
    }

    /// Costate direction `dλ = P·dx − s`.
    pub fn compute_costate_direction(
        riccati: &SplitRiccatiFactorization,
        d: &mut crate::kkt::SplitDirection,
    ) {
        d.dlmdgmm.copy_from(&riccati.s);
        d.dlmdgmm.neg_mut();
        d.dlmdgmm.gemv(1.0, &riccati.p, &d.dx, 1.0);
    }

    /// Switching-multiplier direction `dξ = M·dx + m`.
    pub fn compute_switching_multiplier_direction(
        sc_riccati: &SwitchingRiccatiFactorization,
        d: &mut crate::kkt::SplitDirection,
    ) {
        let dimi = sc_riccati.dimi();
        d.set_switching_dim(dimi);
        if dimi == 0 {
            return;
        }
        let m_mat = sc_riccati.m_mat().clone_owned();
        let m_vec = sc_riccati.m_vec().clone_owned();
        let mut dxi = m_vec;
        dxi.gemv(1.0, &m_mat, &d.dx, 1.0);
        d.dxi_mut().copy_from(&dxi);
    }
}

fn symmetrize(m: &mut DMatrix<f64>) {
    let n = m.nrows();
    for i in 0..n {
        for j in (i + 1)..n {
            let avg = 0.5 * (m[(i, j)] + m[(j, i)]);
            m[(i, j)] = avg;
            m[(j, i)] = avg;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::robot::{LinearChainModel, RobotModel};

    #[test]
    fn test_regularization_recovers_indefinite_hessian() {
        let robot = LinearChainModel::new(1);
        let mut factorizer = RiccatiFactorizer::new(
            robot.dimv(),
            robot.dimu(),
            RegularizationPolicy::default(),
        );
        let g = DMatrix::from_row_slice(1, 1, &[-1.0e-12]);
        // A tiny negative pivot is rescued by the doubling shift.
        assert!(factorizer.cholesky_with_reg(&g).is_ok());
        assert!(factorizer.reg_bumps > 0);

        let g_bad = DMatrix::from_row_slice(1, 1, &[-1.0e9]);
        assert_eq!(
            factorizer.cholesky_with_reg(&g_bad).unwrap_err(),
            RiccatiError::IndefiniteKkt
        );
    }
}
