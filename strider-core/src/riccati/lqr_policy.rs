//! Feedback policies produced by the backward sweep.

use nalgebra::{DMatrix, DVector};

use crate::robot::RobotModel;

/// Linear state-feedback policy `du = K·dx + k`.
#[derive(Debug, Clone, PartialEq)]
pub struct LqrPolicy {
    /// Feedback gain, `dimu × dimx`.
    pub k_gain: DMatrix<f64>,
    /// Feedforward term.
    pub k_ff: DVector<f64>,
}

impl LqrPolicy {
    pub fn new(robot: &dyn RobotModel) -> Self {
        Self {
            k_gain: DMatrix::zeros(robot.dimu(), 2 * robot.dimv()),
            k_ff: DVector::zeros(robot.dimu()),
        }
    }

    /// Configuration block of the gain.
    pub fn kq(&self) -> nalgebra::DMatrixView<'_, f64> {
        let dimv = self.k_gain.ncols() / 2;
        self.k_gain.view((0, 0), (self.k_gain.nrows(), dimv))
    }

    /// Velocity block of the gain.
    pub fn kv(&self) -> nalgebra::DMatrixView<'_, f64> {
        let dimv = self.k_gain.ncols() / 2;
        self.k_gain.view((0, dimv), (self.k_gain.nrows(), dimv))
    }
}

/// Switching-time policy of an STO-enabled event:
/// `dts = −(h_res + hxᵀ dx) / Qtt`, the Newton step of the reduced
/// Hamiltonian-continuity equation at the pre-event stage.
#[derive(Debug, Clone, PartialEq)]
pub struct StoPolicy {
    /// State gradient of the Hamiltonian jump.
    pub hx: DVector<f64>,
    /// Hamiltonian jump at the current iterate.
    pub h_res: f64,
    /// Inverse of the (regularized) switching-time curvature.
    pub qtt_inv: f64,
}

impl StoPolicy {
    pub fn new(robot: &dyn RobotModel) -> Self {
        Self {
            hx: DVector::zeros(2 * robot.dimv()),
            h_res: 0.0,
            qtt_inv: 0.0,
        }
    }

    /// Switching-time direction at the pre-event state direction `dx`.
    pub fn dts(&self, dx: &DVector<f64>) -> f64 {
        -self.qtt_inv * (self.h_res + self.hx.dot(dx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::robot::LinearChainModel;

    #[test]
    fn test_gain_blocks() {
        let robot = LinearChainModel::new(2);
        let mut policy = LqrPolicy::new(&robot);
        policy.k_gain[(0, 0)] = 1.0;
        policy.k_gain[(0, 2)] = 2.0;
        assert_eq!(policy.kq()[(0, 0)], 1.0);
        assert_eq!(policy.kv()[(0, 0)], 2.0);
    }

    #[test]
    fn test_sto_policy_newton_step() {
        let robot = LinearChainModel::new(1);
        let mut policy = StoPolicy::new(&robot);
        policy.h_res = 0.4;
        policy.qtt_inv = 0.5;
        policy.hx[0] = 1.0;
        let dx = DVector::from_row_slice(&[0.2, 0.0]);
        assert!((policy.dts(&dx) + 0.5 * 0.6).abs() < 1e-15);
    }
}
