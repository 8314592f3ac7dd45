//! Per-stage KKT matrix blocks.
//!
//! All blocks are allocated once at the robot's maximum dimensions; the
//! contact-force block exposes an active sub-view selected by the current
//! contact status. The same type serves regular, impulse, aux, lift, and
//! terminal stages; unused blocks simply stay zero.

use nalgebra::{DMatrix, DMatrixView, DMatrixViewMut, DVector};

use crate::robot::{ContactStatus, RobotModel};

/// KKT matrix of a single stage.
///
/// Layout convention: the state is `x = (δq, δv)` with `dimx = 2·dimv`. `fxx`
/// is the state-equation Jacobian `A`; `fvu` the control column of the
/// velocity row (the configuration row never depends on `u` directly).
#[derive(Debug, Clone, PartialEq)]
pub struct SplitKktMatrix {
    /// Jacobian of the state equation with respect to the state.
    pub fxx: DMatrix<f64>,
    /// Jacobian of the velocity row of the state equation with respect to `u`.
    pub fvu: DMatrix<f64>,
    /// Jacobian of the configuration row with respect to the previous
    /// configuration. Only populated with a floating base.
    pub fqq_prev: DMatrix<f64>,
    /// Hessian with respect to the state.
    pub qxx: DMatrix<f64>,
    /// Hessian with respect to the acceleration.
    pub qaa: DMatrix<f64>,
    /// Hessian with respect to the impulse velocity change.
    pub qdvdv: DMatrix<f64>,
    /// Hessian with respect to the state and control.
    pub qxu: DMatrix<f64>,
    /// Hessian with respect to the control.
    pub quu: DMatrix<f64>,
    /// Derivative of the state equation with respect to the interval length.
    pub fx_dt: DVector<f64>,
    qff_full: DMatrix<f64>,
    dimv: usize,
    dimu: usize,
    dimf: usize,
}

impl SplitKktMatrix {
    /// Zero-initialized blocks sized to the robot's maximum dimensions.
    pub fn new(robot: &dyn RobotModel) -> Self {
        let dimv = robot.dimv();
        let dimu = robot.dimu();
        let dimx = 2 * dimv;
        let maxf = robot.max_dimf();
        Self {
            fxx: DMatrix::zeros(dimx, dimx),
            fvu: DMatrix::zeros(dimv, dimu),
            fqq_prev: DMatrix::zeros(dimv, dimv),
            qxx: DMatrix::zeros(dimx, dimx),
            qaa: DMatrix::zeros(dimv, dimv),
            qdvdv: DMatrix::zeros(dimv, dimv),
            qxu: DMatrix::zeros(dimx, dimu),
            quu: DMatrix::zeros(dimu, dimu),
            fx_dt: DVector::zeros(dimx),
            qff_full: DMatrix::zeros(maxf, maxf),
            dimv,
            dimu,
            dimf: 0,
        }
    }

    /// Selects the active contact dimension. Storage is untouched.
    pub fn set_contact_status(&mut self, status: &ContactStatus) {
        self.dimf = status.dimf();
    }

    /// Active contact-force dimension.
    pub fn dimf(&self) -> usize {
        self.dimf
    }

    /// State dimension `2·dimv`.
    pub fn dimx(&self) -> usize {
        2 * self.dimv
    }

    pub fn fqq(&self) -> DMatrixView<'_, f64> {
        self.fxx.view((0, 0), (self.dimv, self.dimv))
    }

    pub fn fqq_mut(&mut self) -> DMatrixViewMut<'_, f64> {
        self.fxx.view_mut((0, 0), (self.dimv, self.dimv))
    }

    pub fn fqv(&self) -> DMatrixView<'_, f64> {
        self.fxx.view((0, self.dimv), (self.dimv, self.dimv))
    }

    pub fn fqv_mut(&mut self) -> DMatrixViewMut<'_, f64> {
        self.fxx.view_mut((0, self.dimv), (self.dimv, self.dimv))
    }

    pub fn fvq(&self) -> DMatrixView<'_, f64> {
        self.fxx.view((self.dimv, 0), (self.dimv, self.dimv))
    }

    pub fn fvq_mut(&mut self) -> DMatrixViewMut<'_, f64> {
        self.fxx.view_mut((self.dimv, 0), (self.dimv, self.dimv))
    }

    pub fn fvv(&self) -> DMatrixView<'_, f64> {
        self.fxx.view((self.dimv, self.dimv), (self.dimv, self.dimv))
    }

    pub fn fvv_mut(&mut self) -> DMatrixViewMut<'_, f64> {
        self.fxx
            .view_mut((self.dimv, self.dimv), (self.dimv, self.dimv))
    }

    pub fn qqq(&self) -> DMatrixView<'_, f64> {
        self.qxx.view((0, 0), (self.dimv, self.dimv))
    }

    pub fn qqq_mut(&mut self) -> DMatrixViewMut<'_, f64> {
        self.qxx.view_mut((0, 0), (self.dimv, self.dimv))
    }

    pub fn qvv(&self) -> DMatrixView<'_, f64> {
        self.qxx.view((self.dimv, self.dimv), (self.dimv, self.dimv))
    }

    pub fn qvv_mut(&mut self) -> DMatrixViewMut<'_, f64> {
        self.qxx
            .view_mut((self.dimv, self.dimv), (self.dimv, self.dimv))
    }

    /// Active contact-force Hessian block.
    pub fn qff(&self) -> DMatrixView<'_, f64> {
        self.qff_full.view((0, 0), (self.dimf, self.dimf))
    }

    pub fn qff_mut(&mut self) -> DMatrixViewMut<'_, f64> {
        self.qff_full.view_mut((0, 0), (self.dimf, self.dimf))
    }

    /// Zeroes every block.
    pub fn set_zero(&mut self) {
        self.fxx.fill(0.0);
        self.fvu.fill(0.0);
        self.fqq_prev.fill(0.0);
        self.qxx.fill(0.0);
        self.qaa.fill(0.0);
        self.qdvdv.fill(0.0);
        self.qxu.fill(0.0);
        self.quu.fill(0.0);
        self.fx_dt.fill(0.0);
        self.qff_full.fill(0.0);
    }

    /// Whether any block contains a NaN.
    pub fn has_nan(&self) -> bool {
        self.fxx.iter().any(|x| x.is_nan())
            || self.fvu.iter().any(|x| x.is_nan())
            || self.qxx.iter().any(|x| x.is_nan())
            || self.qaa.iter().any(|x| x.is_nan())
            || self.qdvdv.iter().any(|x| x.is_nan())
            || self.qxu.iter().any(|x| x.is_nan())
            || self.quu.iter().any(|x| x.is_nan())
            || self.fx_dt.iter().any(|x| x.is_nan())
            || self.qff().iter().any(|x| x.is_nan())
    }

    /// Checks that every buffer matches the construction-time dimensions.
    pub fn is_dimension_consistent(&self) -> bool {
        let dimx = 2 * self.dimv;
        self.fxx.nrows() == dimx
            && self.fxx.ncols() == dimx
            && self.fvu.nrows() == self.dimv
            && self.fvu.ncols() == self.dimu
            && self.qxx.nrows() == dimx
            && self.qxu.ncols() == self.dimu
            && self.quu.nrows() == self.dimu
            && self.dimf <= self.qff_full.nrows()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::robot::LinearChainModel;

    #[test]
    fn test_views_cover_quadrants() {
        let robot = LinearChainModel::new(3);
        let mut mat = SplitKktMatrix::new(&robot);
        mat.fqq_mut().fill(1.0);
        mat.fvv_mut().fill(2.0);
        assert_eq!(mat.fxx[(0, 0)], 1.0);
        assert_eq!(mat.fxx[(0, 3)], 0.0);
        assert_eq!(mat.fxx[(3, 3)], 2.0);
        assert!(mat.is_dimension_consistent());
    }

    #[test]
    fn test_contact_status_resizes_view() {
        let robot = LinearChainModel::new(6)
            .add_contact([0, 1, 2], [0.0; 3])
            .add_contact([3, 4, 5], [0.0; 3]);
        let mut mat = SplitKktMatrix::new(&robot);
        assert_eq!(mat.qff().nrows(), 0);

        let status = ContactStatus::from_active(&[true, false]);
        mat.set_contact_status(&status);
        assert_eq!(mat.qff().nrows(), 3);
        mat.qff_mut().fill_diagonal(5.0);
        assert_eq!(mat.qff_full[(0, 0)], 5.0);
    }
}
