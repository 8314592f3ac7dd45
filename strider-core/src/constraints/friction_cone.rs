//! Friction cone on the active contact forces.
//!
//! Two rows per candidate contact `c` with force `(fx, fy, fz)`:
//!
//! ```text
//! g_0 = −fz ≤ 0                       (unilateral normal force)
//! g_1 = fx² + fy² − μ² fz² ≤ 0        (quadratic friction cone)
//! ```
//!
//! Rows of inactive contacts are inert. The condensation is Gauss-Newton:
//! the curvature of `g_1` itself is dropped, only the interior-point
//! `∂gᵀ diag(dual/slack) ∂g` term enters the Hessian.

use crate::kkt::{SplitDirection, SplitKktMatrix, SplitKktResidual, SplitSolution};
use crate::robot::ContactStatus;

use super::{ConstraintComponent, ConstraintComponentData, KinematicsLevel};

/// Quadratic friction cone with friction coefficient `μ`.
#[derive(Debug, Clone)]
pub struct FrictionCone {
    mu: f64,
    max_contacts: usize,
}

impl FrictionCone {
    pub fn new(mu: f64, max_contacts: usize) -> Self {
        assert!(mu > 0.0, "friction coefficient must be positive");
        Self { mu, max_contacts }
    }

    /// Rows `(g0, g1)` of the active contact whose force starts at `off` in
    /// the stacked force vector.
    fn g(&self, f: &[f64], off: usize) -> (f64, f64) {
        let (fx, fy, fz) = (f[off], f[off + 1], f[off + 2]);
        (-fz, fx * fx + fy * fy - self.mu * self.mu * fz * fz)
    }

    /// Gradient rows of `(g0, g1)` with respect to `(fx, fy, fz)`.
    fn dg(&self, f: &[f64], off: usize) -> ([f64; 3], [f64; 3]) {
        let (fx, fy, fz) = (f[off], f[off + 1], f[off + 2]);
        (
            [0.0, 0.0, -1.0],
            [2.0 * fx, 2.0 * fy, -2.0 * self.mu * self.mu * fz],
        )
    }
}

impl ConstraintComponent for FrictionCone {
    fn dimc(&self) -> usize {
        2 * self.max_contacts
    }

    fn kinematics_level(&self) -> KinematicsLevel {
        KinematicsLevel::Acceleration
    }

    fn is_feasible(&self, status: &ContactStatus, s: &SplitSolution) -> bool {
        let f = s.f().clone_owned();
        let mut off = 0;
        for c in 0..self.max_contacts {
            if !status.is_contact_active(c) {
                continue;
            }
            let (g0, g1) = self.g(f.as_slice(), off);
            if g0 >= 0.0 || g1 >= 0.0 {
                return false;
            }
            off += 3;
        }
        true
    }

    fn set_slack(
        &self,
        status: &ContactStatus,
        s: &SplitSolution,
        data: &mut ConstraintComponentData,
        barrier: f64,
    ) {
        let f = s.f().clone_owned();
        let mut off = 0;
        for c in 0..self.max_contacts {
            if status.is_contact_active(c) {
                let (g0, g1) = self.g(f.as_slice(), off);
                data.slack[2 * c] = (-g0).max(barrier);
                data.slack[2 * c + 1] = (-g1).max(barrier);
                off += 3;
            } else {
                data.slack[2 * c] = 1.0;
                data.slack[2 * c + 1] = 1.0;
            }
            data.dual[2 * c] = barrier / data.slack[2 * c];
            data.dual[2 * c + 1] = barrier / data.slack[2 * c + 1];
        }
    }

    fn eval_constraint(
        &self,
        status: &ContactStatus,
        s: &SplitSolution,
        data: &mut ConstraintComponentData,
        barrier: f64,
    ) {
        let f = s.f().clone_owned();
        data.log_barrier = 0.0;
        let mut off = 0;
        for c in 0..self.max_contacts {
            if status.is_contact_active(c) {
                let (g0, g1) = self.g(f.as_slice(), off);
                data.residual[2 * c] = g0 + data.slack[2 * c];
                data.residual[2 * c + 1] = g1 + data.slack[2 * c + 1];
                data.cmpl[2 * c] = data.slack[2 * c] * data.dual[2 * c] - barrier;
                data.cmpl[2 * c + 1] = data.slack[2 * c + 1] * data.dual[2 * c + 1] - barrier;
                data.log_barrier += barrier
                    * (data.slack[2 * c].ln() + data.slack[2 * c + 1].ln());
                off += 3;
            } else {
                data.residual[2 * c] = 0.0;
                data.residual[2 * c + 1] = 0.0;
                data.cmpl[2 * c] = 0.0;
                data.cmpl[2 * c + 1] = 0.0;
            }
        }
    }

    fn eval_derivatives(
        &self,
        status: &ContactStatus,
        s: &SplitSolution,
        data: &ConstraintComponentData,
        dt: f64,
        kkt_residual: &mut SplitKktResidual,
    ) {
        let f = s.f().clone_owned();
        let mut lf = kkt_residual.lf_mut();
        let mut off = 0;
        for c in 0..self.max_contacts {
            if !status.is_contact_active(c) {
                continue;
            }
            let (dg0, dg1) = self.dg(f.as_slice(), off);
            for k in 0..3 {
                lf[off + k] +=
                    dt * (dg0[k] * data.dual[2 * c] + dg1[k] * data.dual[2 * c + 1]);
            }
            off += 3;
        }
    }

    fn condense_slack_and_dual(
        &self,
        status: &ContactStatus,
        s: &SplitSolution,
        data: &mut ConstraintComponentData,
        dt: f64,
        kkt_matrix: &mut SplitKktMatrix,
        kkt_residual: &mut SplitKktResidual,
    ) {
        let f = s.f().clone_owned();
        let mut off = 0;
        for c in 0..self.max_contacts {
            if !status.is_contact_active(c) {
                data.cond[2 * c] = 0.0;
                data.cond[2 * c + 1] = 0.0;
                continue;
            }
            for r in [2 * c, 2 * c + 1] {
                data.cond[r] = (data.dual[r] * data.residual[r] - data.cmpl[r]) / data.slack[r];
            }
            let (dg0, dg1) = self.dg(f.as_slice(), off);
            let w0 = data.dual[2 * c] / data.slack[2 * c];
            let w1 = data.dual[2 * c + 1] / data.slack[2 * c + 1];
            {
                let mut qff = kkt_matrix.qff_mut();
                for j in 0..3 {
                    for k in 0..3 {
                        qff[(off + j, off + k)] +=
                            dt * (w0 * dg0[j] * dg0[k] + w1 * dg1[j] * dg1[k]);
                    }
                }
            }
            {
                let mut lf = kkt_residual.lf_mut();
                for k in 0..3 {
                    lf[off + k] +=
                        dt * (dg0[k] * data.cond[2 * c] + dg1[k] * data.cond[2 * c + 1]);
                }
            }
            off += 3;
        }
    }

    fn expand_slack_and_dual(
        &self,
        status: &ContactStatus,
        s: &SplitSolution,
        data: &mut ConstraintComponentData,
        d: &SplitDirection,
    ) {
        let f = s.f().clone_owned();
        let df = d.df().clone_owned();
        let mut off = 0;
        for c in 0..self.max_contacts {
            if !status.is_contact_active(c) {
                data.dslack[2 * c] = 0.0;
                data.dslack[2 * c + 1] = 0.0;
                data.ddual[2 * c] = 0.0;
                data.ddual[2 * c + 1] = 0.0;
                continue;
            }
            let (dg0, dg1) = self.dg(f.as_slice(), off);
            let mut dg0_df = 0.0;
            let mut dg1_df = 0.0;
            for k in 0..3 {
                dg0_df += dg0[k] * df[off + k];
                dg1_df += dg1[k] * df[off + k];
            }
            for (r, dg_df) in [(2 * c, dg0_df), (2 * c + 1, dg1_df)] {
                data.dslack[r] = -dg_df - data.residual[r];
                data.ddual[r] = -(data.dual[r] * data.dslack[r] + data.cmpl[r]) / data.slack[r];
            }
            off += 3;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::robot::LinearChainModel;

    #[test]
    fn test_feasibility_inside_cone() {
        let robot = LinearChainModel::new(3).add_contact([0, 1, 2], [0.0; 3]);
        let cone = FrictionCone::new(0.7, 1);
        let status = ContactStatus::from_active(&[true]);

        let mut s = SplitSolution::new(&robot);
        s.set_contact_status(&status);
        s.f_mut().copy_from_slice(&[1.0, 0.0, 10.0]);
        assert!(cone.is_feasible(&status, &s));

        // Tangential force beyond μ·fz.
        s.f_mut().copy_from_slice(&[8.0, 0.0, 10.0]);
        assert!(!cone.is_feasible(&status, &s));

        // Pulling normal force.
        s.f_mut().copy_from_slice(&[0.0, 0.0, -1.0]);
        assert!(!cone.is_feasible(&status, &s));
    }

    #[test]
    fn test_inactive_rows_are_inert() {
        let robot = LinearChainModel::new(6)
            .add_contact([0, 1, 2], [0.0; 3])
            .add_contact([3, 4, 5], [0.0; 3]);
        let cone = FrictionCone::new(0.7, 2);
        let status = ContactStatus::from_active(&[false, true]);

        let mut s = SplitSolution::new(&robot);
        s.set_contact_status(&status);
        s.f_mut().copy_from_slice(&[0.0, 0.0, 5.0]);

        let barrier = 1e-3;
        let mut data = ConstraintComponentData::new(cone.dimc(), barrier);
        cone.set_slack(&status, &s, &mut data, barrier);
        cone.eval_constraint(&status, &s, &mut data, barrier);

        // Contact 0 is inactive: zero residual and complementarity.
        assert_eq!(data.residual[0], 0.0);
        assert_eq!(data.cmpl[1], 0.0);
        // Contact 1 is active with fz = 5 inside the cone.
        assert!((data.slack[2] - 5.0).abs() < 1e-12);
        assert!(data.kkt_error() < 1e-12);
    }
}
