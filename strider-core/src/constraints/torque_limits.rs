//! Joint torque box limits.

use nalgebra::DVector;

use crate::kkt::{SplitDirection, SplitKktMatrix, SplitKktResidual, SplitSolution};
use crate::robot::ContactStatus;

use super::{ConstraintComponent, ConstraintComponentData, KinematicsLevel};

/// `u_min − u ≤ 0`.
#[derive(Debug, Clone)]
pub struct JointTorquesLowerLimit {
    umin: DVector<f64>,
}

/// `u − u_max ≤ 0`.
#[derive(Debug, Clone)]
pub struct JointTorquesUpperLimit {
    umax: DVector<f64>,
}

impl JointTorquesLowerLimit {
    pub fn new(umin: &[f64]) -> Self {
        Self {
            umin: DVector::from_row_slice(umin),
        }
    }

    fn g(&self, s: &SplitSolution, i: usize) -> f64 {
        self.umin[i] - s.u[i]
    }
}

impl JointTorquesUpperLimit {
    pub fn new(umax: &[f64]) -> Self {
        Self {
            umax: DVector::from_row_slice(umax),
        }
    }

    fn g(&self, s: &SplitSolution, i: usize) -> f64 {
        s.u[i] - self.umax[i]
    }
}

macro_rules! impl_torque_limit {
    ($ty:ident, $bound:ident, $sign:expr) => {
        impl ConstraintComponent for $ty {
            fn dimc(&self) -> usize {
                self.$bound.len()
            }

            fn kinematics_level(&self) -> KinematicsLevel {
                KinematicsLevel::Acceleration
            }

            fn is_feasible(&self, _status: &ContactStatus, s: &SplitSolution) -> bool {
                (0..self.dimc()).all(|i| self.g(s, i) < 0.0)
            }

            fn set_slack(
                &self,
                _status: &ContactStatus,
                s: &SplitSolution,
                data: &mut ConstraintComponentData,
                barrier: f64,
            ) {
                for i in 0..self.dimc() {
                    data.slack[i] = (-self.g(s, i)).max(barrier);
                    data.dual[i] = barrier / data.slack[i];
                }
            }

            fn eval_constraint(
                &self,
                _status: &ContactStatus,
                s: &SplitSolution,
                data: &mut ConstraintComponentData,
                barrier: f64,
            ) {
                data.log_barrier = 0.0;
                for i in 0..self.dimc() {
                    data.residual[i] = self.g(s, i) + data.slack[i];
                    data.cmpl[i] = data.slack[i] * data.dual[i] - barrier;
                    data.log_barrier += barrier * data.slack[i].ln();
                }
            }

            fn eval_derivatives(
                &self,
                _status: &ContactStatus,
                _s: &SplitSolution,
                data: &ConstraintComponentData,
                dt: f64,
                kkt_residual: &mut SplitKktResidual,
            ) {
                for i in 0..self.dimc() {
                    kkt_residual.lu[i] += $sign * dt * data.dual[i];
                }
            }

            fn condense_slack_and_dual(
                &self,
                _status: &ContactStatus,
                _s: &SplitSolution,
                data: &mut ConstraintComponentData,
                dt: f64,
                kkt_matrix: &mut SplitKktMatrix,
                kkt_residual: &mut SplitKktResidual,
            ) {
                for i in 0..self.dimc() {
                    data.cond[i] =
                        (data.dual[i] * data.residual[i] - data.cmpl[i]) / data.slack[i];
                    kkt_matrix.quu[(i, i)] += dt * data.dual[i] / data.slack[i];
                    kkt_residual.lu[i] += $sign * dt * data.cond[i];
                }
            }

            fn expand_slack_and_dual(
                &self,
                _status: &ContactStatus,
                _s: &SplitSolution,
                data: &mut ConstraintComponentData,
                d: &SplitDirection,
            ) {
                for i in 0..self.dimc() {
                    let dg = $sign * d.du[i];
                    data.dslack[i] = -dg - data.residual[i];
                    data.ddual[i] =
                        -(data.dual[i] * data.dslack[i] + data.cmpl[i]) / data.slack[i];
                }
            }
        }
    };
}

impl_torque_limit!(JointTorquesLowerLimit, umin, -1.0);
impl_torque_limit!(JointTorquesUpperLimit, umax, 1.0);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::robot::{ContactStatus, LinearChainModel};

    #[test]
    fn test_condensed_hessian_is_dual_over_slack() {
        let robot = LinearChainModel::new(2);
        let limit = JointTorquesUpperLimit::new(&[5.0, 5.0]);
        let status = ContactStatus::new(0);
        let mut s = SplitSolution::new(&robot);
        s.u[0] = 4.0;

        let barrier = 1e-3;
        let mut data = ConstraintComponentData::new(2, barrier);
        limit.set_slack(&status, &s, &mut data, barrier);
        limit.eval_constraint(&status, &s, &mut data, barrier);

        let mut mat = SplitKktMatrix::new(&robot);
        let mut res = SplitKktResidual::new(&robot);
        limit.condense_slack_and_dual(&status, &s, &mut data, 1.0, &mut mat, &mut res);
        assert!((mat.quu[(0, 0)] - data.dual[0] / data.slack[0]).abs() < 1e-12);
        assert!((mat.quu[(1, 1)] - data.dual[1] / data.slack[1]).abs() < 1e-12);
        assert_eq!(mat.quu[(0, 1)], 0.0);
    }
}
