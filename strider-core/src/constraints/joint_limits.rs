//! Joint position and velocity box limits.
//!
//! The limits act on the actuated joint coordinates, i.e. the entries past
//! any floating-base block. The constraints are linear, so the Gauss-Newton
//! condensation is exact.

use nalgebra::DVector;

use crate::kkt::{SplitDirection, SplitKktMatrix, SplitKktResidual, SplitSolution};
use crate::robot::ContactStatus;

use super::{ConstraintComponent, ConstraintComponentData, KinematicsLevel};

/// `q_min − q ≤ 0` on the actuated joint coordinates.
#[derive(Debug, Clone)]
pub struct JointPositionLowerLimit {
    qmin: DVector<f64>,
    dim_passive: usize,
}

/// `q − q_max ≤ 0` on the actuated joint coordinates.
#[derive(Debug, Clone)]
pub struct JointPositionUpperLimit {
    qmax: DVector<f64>,
    dim_passive: usize,
}

impl JointPositionLowerLimit {
    /// Lower bounds for the joint coordinates starting at `dim_passive`.
    pub fn new(qmin: &[f64], dim_passive: usize) -> Self {
        Self {
            qmin: DVector::from_row_slice(qmin),
            dim_passive,
        }
    }
}

impl JointPositionUpperLimit {
    /// Upper bounds for the joint coordinates starting at `dim_passive`.
    pub fn new(qmax: &[f64], dim_passive: usize) -> Self {
        Self {
            qmax: DVector::from_row_slice(qmax),
            dim_passive,
        }
    }
}

/// Shared implementation: `sign = −1` for a lower bound, `+1` for an upper
/// bound; `$grad`/`$hess` select the configuration or velocity blocks.
macro_rules! impl_box_limit {
    ($ty:ident, $bound:ident, $sign:expr, $level:expr,
     $grad:ident, $hess:ident, $dvar:ident) => {
        impl ConstraintComponent for $ty {
            fn dimc(&self) -> usize {
                self.$bound.len()
            }

            fn kinematics_level(&self) -> KinematicsLevel {
                $level
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
                let mut grad = kkt_residual.$grad();
                for i in 0..self.$bound.len() {
                    grad[self.dim_passive + i] += $sign * dt * data.dual[i];
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
                }
                let mut hess = kkt_matrix.$hess();
                for i in 0..self.dimc() {
                    let idx = self.dim_passive + i;
                    hess[(idx, idx)] += dt * data.dual[i] / data.slack[i];
                }
                let mut grad = kkt_residual.$grad();
                for i in 0..self.dimc() {
                    grad[self.dim_passive + i] += $sign * dt * data.cond[i];
                }
            }

            fn expand_slack_and_dual(
                &self,
                _status: &ContactStatus,
                _s: &SplitSolution,
                data: &mut ConstraintComponentData,
                d: &SplitDirection,
            ) {
                let dvar = d.$dvar();
                for i in 0..self.dimc() {
                    let dg = $sign * dvar[self.dim_passive + i];
                    data.dslack[i] = -dg - data.residual[i];
                    data.ddual[i] =
                        -(data.dual[i] * data.dslack[i] + data.cmpl[i]) / data.slack[i];
                }
            }
        }
    };
}

/// `v_min − v ≤ 0` on the actuated joint coordinates.
#[derive(Debug, Clone)]
pub struct JointVelocityLowerLimit {
    vmin: DVector<f64>,
    dim_passive: usize,
}

/// `v − v_max ≤ 0` on the actuated joint coordinates.
#[derive(Debug, Clone)]
pub struct JointVelocityUpperLimit {
    vmax: DVector<f64>,
    dim_passive: usize,
}

impl JointVelocityLowerLimit {
    pub fn new(vmin: &[f64], dim_passive: usize) -> Self {
        Self {
            vmin: DVector::from_row_slice(vmin),
            dim_passive,
        }
    }

    fn g(&self, s: &SplitSolution, i: usize) -> f64 {
        self.vmin[i] - s.v[self.dim_passive + i]
    }
}

impl JointVelocityUpperLimit {
    pub fn new(vmax: &[f64], dim_passive: usize) -> Self {
        Self {
            vmax: DVector::from_row_slice(vmax),
            dim_passive,
        }
    }

    fn g(&self, s: &SplitSolution, i: usize) -> f64 {
        s.v[self.dim_passive + i] - self.vmax[i]
    }
}

impl JointPositionLowerLimit {
    fn g(&self, s: &SplitSolution, i: usize) -> f64 {
        self.qmin[i] - s.q[self.dim_passive + i]
    }
}

impl JointPositionUpperLimit {
    fn g(&self, s: &SplitSolution, i: usize) -> f64 {
        s.q[self.dim_passive + i] - self.qmax[i]
    }
}

impl_box_limit!(
    JointPositionLowerLimit, qmin, -1.0, KinematicsLevel::Position, lq_mut, qqq_mut, dq
);
impl_box_limit!(
    JointPositionUpperLimit, qmax, 1.0, KinematicsLevel::Position, lq_mut, qqq_mut, dq
);
impl_box_limit!(
    JointVelocityLowerLimit, vmin, -1.0, KinematicsLevel::Velocity, lv_mut, qvv_mut, dv
);
impl_box_limit!(
    JointVelocityUpperLimit, vmax, 1.0, KinematicsLevel::Velocity, lv_mut, qvv_mut, dv
);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::robot::{ContactStatus, LinearChainModel};

    #[test]
    fn test_feasibility_and_slack_init() {
        let robot = LinearChainModel::new(2);
        let limit = JointPositionUpperLimit::new(&[1.0, 1.0], 0);
        let status = ContactStatus::new(0);
        let mut s = SplitSolution::new(&robot);
        s.q[0] = 0.5;
        s.q[1] = 1.5; // violates
        assert!(!limit.is_feasible(&status, &s));

        let barrier = 1e-3;
        let mut data = ConstraintComponentData::new(limit.dimc(), barrier);
        limit.set_slack(&status, &s, &mut data, barrier);
        // Infeasible entry projected to the barrier floor, dual interior.
        assert!((data.slack[0] - 0.5).abs() < 1e-12);
        assert_eq!(data.slack[1], barrier);
        assert!(data.is_interior());
    }

    #[test]
    fn test_expansion_recovers_linear_constraint() {
        let robot = LinearChainModel::new(2);
        let limit = JointPositionLowerLimit::new(&[-1.0, -1.0], 0);
        let status = ContactStatus::new(0);
        let mut s = SplitSolution::new(&robot);
        s.q[0] = 0.2;

        let barrier = 1e-3;
        let mut data = ConstraintComponentData::new(limit.dimc(), barrier);
        limit.set_slack(&status, &s, &mut data, barrier);
        limit.eval_constraint(&status, &s, &mut data, barrier);

        let mut d = SplitDirection::new(&robot);
        d.dq_mut()[0] = 0.1;
        limit.expand_slack_and_dual(&status, &s, &mut data, &d);

        // g = qmin − q, so ∂g·dq = −0.1 and dslack = 0.1 − residual.
        assert!((data.dslack[0] - (0.1 - data.residual[0])).abs() < 1e-12);
        // Complementarity row solved exactly.
        let lhs = data.dual[0] * data.dslack[0] + data.slack[0] * data.ddual[0];
        assert!((lhs + data.cmpl[0]).abs() < 1e-12);
    }

    #[test]
    fn test_velocity_limit_acts_on_velocity_blocks() {
        let robot = LinearChainModel::new(2);
        let limit = JointVelocityUpperLimit::new(&[2.0, 2.0], 0);
        let status = ContactStatus::new(0);
        let mut s = SplitSolution::new(&robot);
        s.v[1] = 1.5;
        assert!(limit.is_feasible(&status, &s));
        s.v[1] = 2.5;
        assert!(!limit.is_feasible(&status, &s));

        let mut data = ConstraintComponentData::new(limit.dimc(), 1e-3);
        data.dual[1] = 3.0;
        let mut res = SplitKktResidual::new(&robot);
        limit.eval_derivatives(&status, &s, &data, 0.5, &mut res);
        // The gradient lands in the velocity block, not the configuration.
        assert_eq!(res.lq()[1], 0.0);
        assert_eq!(res.lv()[1], 1.5);
    }

    #[test]
    fn test_derivatives_respect_passive_offset() {
        let robot = LinearChainModel::new(3);
        let limit = JointPositionUpperLimit::new(&[1.0, 1.0], 1);
        let status = ContactStatus::new(0);
        let s = SplitSolution::new(&robot);
        let mut data = ConstraintComponentData::new(limit.dimc(), 1e-3);
        data.dual[0] = 2.0;

        let mut res = SplitKktResidual::new(&robot);
        limit.eval_derivatives(&status, &s, &data, 0.5, &mut res);
        assert_eq!(res.lq()[0], 0.0);
        assert_eq!(res.lq()[1], 1.0);
    }
}
