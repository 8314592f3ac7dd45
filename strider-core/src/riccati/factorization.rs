//! Riccati factorization storage.

use nalgebra::{DMatrix, DVector};

use crate::kkt::HybridArray;
use crate::robot::RobotModel;

/// Cost-to-go of one stage: `V(dx) = ½ dxᵀ P dx − sᵀ dx + const`.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitRiccatiFactorization {
    /// Quadratic cost-to-go term.
    pub p: DMatrix<f64>,
    /// Affine cost-to-go term.
    pub s: DVector<f64>,
}

impl SplitRiccatiFactorization {
    pub fn new(robot: &dyn RobotModel) -> Self {
        let dimx = 2 * robot.dimv();
        Self {
            p: DMatrix::zeros(dimx, dimx),
            s: DVector::zeros(dimx),
        }
    }

    pub fn has_nan(&self) -> bool {
        self.p.iter().any(|x| x.is_nan()) || self.s.iter().any(|x| x.is_nan())
    }
}

/// Affine map from the pre-impulse state direction to the switching
/// multiplier: `dξ = M·dx + m`.
#[derive(Debug, Clone, PartialEq)]
pub struct SwitchingRiccatiFactorization {
    m_mat: DMatrix<f64>,
    m_vec: DVector<f64>,
    dimi: usize,
}

impl SwitchingRiccatiFactorization {
    pub fn new(robot: &dyn RobotModel) -> Self {
        let dimx = 2 * robot.dimv();
        let maxf = robot.max_dimf();
        Self {
            m_mat: DMatrix::zeros(maxf, dimx),
            m_vec: DVector::zeros(maxf),
            dimi: 0,
        }
    }

    pub fn set_dim(&mut self, dimi: usize) {
        self.dimi = dimi;
    }

    pub fn dimi(&self) -> usize {
        self.dimi
    }

    pub fn m_mat(&self) -> nalgebra::DMatrixView<'_, f64> {
        self.m_mat.view((0, 0), (self.dimi, self.m_mat.ncols()))
    }

    pub fn m_mat_mut(&mut self) -> nalgebra::DMatrixViewMut<'_, f64> {
        let cols = self.m_mat.ncols();
        self.m_mat.view_mut((0, 0), (self.dimi, cols))
    }

    pub fn m_vec(&self) -> nalgebra::DVectorView<'_, f64> {
        self.m_vec.rows(0, self.dimi)
    }

    pub fn m_vec_mut(&mut self) -> nalgebra::DVectorViewMut<'_, f64> {
        self.m_vec.rows_mut(0, self.dimi)
    }
}

/// Riccati factorizations over the event-aware grid.
pub type RiccatiFactorization = HybridArray<SplitRiccatiFactorization>;

impl RiccatiFactorization {
    pub fn new(robot: &dyn RobotModel, n: usize, max_events: usize) -> Self {
        HybridArray::generate(n, max_events, || SplitRiccatiFactorization::new(robot))
    }
}
