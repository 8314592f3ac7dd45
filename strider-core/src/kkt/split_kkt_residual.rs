//! Per-stage KKT residual blocks.

use nalgebra::{DVector, DVectorView, DVectorViewMut};

use crate::robot::{ContactStatus, RobotModel};

/// KKT residual of a single stage: state-equation residual plus the gradient
/// of the stage Lagrangian with respect to every stage variable.
///
/// `h` and `hx` carry the stage Hamiltonian and its state gradient; they are
/// only consumed by switching-time optimization.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitKktResidual {
    /// State-equation residual `(Fq, Fv)`.
    pub fx: DVector<f64>,
    /// Gradient with respect to the state `(lq, lv)`.
    pub lx: DVector<f64>,
    /// Gradient with respect to the acceleration.
    pub la: DVector<f64>,
    /// Gradient with respect to the impulse velocity change.
    pub ldv: DVector<f64>,
    /// Gradient with respect to the control.
    pub lu: DVector<f64>,
    /// Stage Hamiltonian (switching-time gradient contribution).
    pub h: f64,
    /// State gradient of the stage Hamiltonian.
    pub hx: DVector<f64>,
    /// Max-abs KKT error of this stage, set during linearization.
    pub kkt_error: f64,
    lf_full: DVector<f64>,
    dimv: usize,
    dimf: usize,
}

impl SplitKktResidual {
    /// Zero-initialized residual sized to the robot's maximum dimensions.
    pub fn new(robot: &dyn RobotModel) -> Self {
        let dimv = robot.dimv();
        let dimx = 2 * dimv;
        Self {
            fx: DVector::zeros(dimx),
            lx: DVector::zeros(dimx),
            la: DVector::zeros(dimv),
            ldv: DVector::zeros(dimv),
            lu: DVector::zeros(robot.dimu()),
            h: 0.0,
            hx: DVector::zeros(dimx),
            kkt_error: 0.0,
            lf_full: DVector::zeros(robot.max_dimf()),
            dimv,
            dimf: 0,
        }
    }

    /// Selects the active contact dimension.
    pub fn set_contact_status(&mut self, status: &ContactStatus) {
        self.dimf = status.dimf();
    }

    pub fn dimf(&self) -> usize {
        self.dimf
    }

    pub fn fq(&self) -> DVectorView<'_, f64> {
        self.fx.rows(0, self.dimv)
    }

    pub fn fq_mut(&mut self) -> DVectorViewMut<'_, f64> {
        self.fx.rows_mut(0, self.dimv)
    }

    pub fn fv(&self) -> DVectorView<'_, f64> {
        self.fx.rows(self.dimv, self.dimv)
    }

    pub fn fv_mut(&mut self) -> DVectorViewMut<'_, f64> {
        self.fx.rows_mut(self.dimv, self.dimv)
    }

    pub fn lq(&self) -> DVectorView<'_, f64> {
        self.lx.rows(0, self.dimv)
    }

    pub fn lq_mut(&mut self) -> DVectorViewMut<'_, f64> {
        self.lx.rows_mut(0, self.dimv)
    }

    pub fn lv(&self) -> DVectorView<'_, f64> {
        self.lx.rows(self.dimv, self.dimv)
    }

    pub fn lv_mut(&mut self) -> DVectorViewMut<'_, f64> {
        self.lx.rows_mut(self.dimv, self.dimv)
    }

    /// Gradient with respect to the active contact forces.
    pub fn lf(&self) -> DVectorView<'_, f64> {
        self.lf_full.rows(0, self.dimf)
    }

    pub fn lf_mut(&mut self) -> DVectorViewMut<'_, f64> {
        self.lf_full.rows_mut(0, self.dimf)
    }

    /// Zeroes every block (the Hamiltonian terms included).
    pub fn set_zero(&mut self) {
        self.fx.fill(0.0);
        self.lx.fill(0.0);
        self.la.fill(0.0);
        self.ldv.fill(0.0);
        self.lu.fill(0.0);
        self.h = 0.0;
        self.hx.fill(0.0);
        self.kkt_error = 0.0;
        self.lf_full.fill(0.0);
    }

    /// Max-abs over the stationarity and state-equation blocks.
    pub fn max_abs(&self) -> f64 {
        let mut err: f64 = 0.0;
        for v in [&self.fx, &self.lx, &self.la, &self.ldv, &self.lu] {
            err = err.max(v.amax());
        }
        if self.dimf > 0 {
            err = err.max(self.lf().amax());
        }
        err
    }

    /// l1 norm of the state-equation residual (constraint-violation part).
    pub fn constraint_violation(&self) -> f64 {
        self.fx.iter().map(|x| x.abs()).sum()
    }

    /// Whether any block contains a NaN.
    pub fn has_nan(&self) -> bool {
        self.fx.iter().any(|x| x.is_nan())
            || self.lx.iter().any(|x| x.is_nan())
            || self.la.iter().any(|x| x.is_nan())
            || self.ldv.iter().any(|x| x.is_nan())
            || self.lu.iter().any(|x| x.is_nan())
            || self.lf().iter().any(|x| x.is_nan())
            || self.h.is_nan()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::robot::LinearChainModel;

    #[test]
    fn test_max_abs_spans_blocks() {
        let robot = LinearChainModel::new(2);
        let mut res = SplitKktResidual::new(&robot);
        res.lu[1] = -3.0;
        res.fq_mut()[0] = 2.0;
        assert_eq!(res.max_abs(), 3.0);
        assert_eq!(res.constraint_violation(), 2.0);
        res.set_zero();
        assert_eq!(res.max_abs(), 0.0);
    }
}
