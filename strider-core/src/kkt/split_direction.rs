//! Per-stage Newton direction.

use nalgebra::{DVector, DVectorView, DVectorViewMut};

use crate::robot::{ContactStatus, RobotModel};

/// Newton direction of a single stage, laid out to match [`super::SplitSolution`].
///
/// `dx = (dq, dv)` and `dlmdgmm = (dlmd, dgmm)` are stored contiguously so
/// the Riccati sweeps can treat them as single state-sized vectors. `dts` is
/// the switching-time direction of the event terminating this stage's phase,
/// nonzero only when that event has switching-time optimization enabled.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitDirection {
    /// State direction `(dq, dv)`.
    pub dx: DVector<f64>,
    /// Acceleration direction.
    pub da: DVector<f64>,
    /// Impulse velocity-change direction.
    pub ddv: DVector<f64>,
    /// Control direction.
    pub du: DVector<f64>,
    /// Costate direction `(dlmd, dgmm)`.
    pub dlmdgmm: DVector<f64>,
    /// Inverse-dynamics multiplier direction.
    pub dbeta: DVector<f64>,
    /// Switching-time direction.
    pub dts: f64,
    df_full: DVector<f64>,
    dmu_full: DVector<f64>,
    dxi_full: DVector<f64>,
    dimv: usize,
    dimf: usize,
    dimi: usize,
}

impl SplitDirection {
    /// Zero direction sized to the robot's maximum dimensions.
    pub fn new(robot: &dyn RobotModel) -> Self {
        let dimv = robot.dimv();
        let dimx = 2 * dimv;
        let maxf = robot.max_dimf();
        Self {
            dx: DVector::zeros(dimx),
            da: DVector::zeros(dimv),
            ddv: DVector::zeros(dimv),
            du: DVector::zeros(robot.dimu()),
            dlmdgmm: DVector::zeros(dimx),
            dbeta: DVector::zeros(dimv),
            dts: 0.0,
            df_full: DVector::zeros(maxf),
            dmu_full: DVector::zeros(maxf),
            dxi_full: DVector::zeros(maxf),
            dimv,
            dimf: 0,
            dimi: 0,
        }
    }

    pub fn set_contact_status(&mut self, status: &ContactStatus) {
        self.dimf = status.dimf();
    }

    pub fn set_switching_dim(&mut self, dimi: usize) {
        self.dimi = dimi;
    }

    pub fn dimf(&self) -> usize {
        self.dimf
    }

    pub fn dimi(&self) -> usize {
        self.dimi
    }

    pub fn dq(&self) -> DVectorView<'_, f64> {
        self.dx.rows(0, self.dimv)
    }

    pub fn dq_mut(&mut self) -> DVectorViewMut<'_, f64> {
        self.dx.rows_mut(0, self.dimv)
    }

    pub fn dv(&self) -> DVectorView<'_, f64> {
        self.dx.rows(self.dimv, self.dimv)
    }

    pub fn dv_mut(&mut self) -> DVectorViewMut<'_, f64> {
        self.dx.rows_mut(self.dimv, self.dimv)
    }

    pub fn dlmd(&self) -> DVectorView<'_, f64> {
        self.dlmdgmm.rows(0, self.dimv)
    }

    pub fn dlmd_mut(&mut self) -> DVectorViewMut<'_, f64> {
        self.dlmdgmm.rows_mut(0, self.dimv)
    }

    pub fn dgmm(&self) -> DVectorView<'_, f64> {
        self.dlmdgmm.rows(self.dimv, self.dimv)
    }

    pub fn dgmm_mut(&mut self) -> DVectorViewMut<'_, f64> {
        self.dlmdgmm.rows_mut(self.dimv, self.dimv)
    }

    pub fn df(&self) -> DVectorView<'_, f64> {
        self.df_full.rows(0, self.dimf)
    }

    pub fn df_mut(&mut self) -> DVectorViewMut<'_, f64> {
        self.df_full.rows_mut(0, self.dimf)
    }

    pub fn dmu(&self) -> DVectorView<'_, f64> {
        self.dmu_full.rows(0, self.dimf)
    }

    pub fn dmu_mut(&mut self) -> DVectorViewMut<'_, f64> {
        self.dmu_full.rows_mut(0, self.dimf)
    }

    pub fn dxi(&self) -> DVectorView<'_, f64> {
        self.dxi_full.rows(0, self.dimi)
    }

    pub fn dxi_mut(&mut self) -> DVectorViewMut<'_, f64> {
        self.dxi_full.rows_mut(0, self.dimi)
    }

    /// Zeroes every component.
    pub fn set_zero(&mut self) {
        self.dx.fill(0.0);
        self.da.fill(0.0);
        self.ddv.fill(0.0);
        self.du.fill(0.0);
        self.dlmdgmm.fill(0.0);
        self.dbeta.fill(0.0);
        self.dts = 0.0;
        self.df_full.fill(0.0);
        self.dmu_full.fill(0.0);
        self.dxi_full.fill(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::robot::LinearChainModel;

    #[test]
    fn test_state_views_alias_dx() {
        let robot = LinearChainModel::new(2);
        let mut d = SplitDirection::new(&robot);
        d.dq_mut()[1] = 1.0;
        d.dv_mut()[0] = 2.0;
        assert_eq!(d.dx[1], 1.0);
        assert_eq!(d.dx[2], 2.0);
    }
}
