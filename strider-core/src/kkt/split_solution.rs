//! Per-stage primal and dual variables.

use nalgebra::{DVector, DVectorView, DVectorViewMut};

use crate::robot::{ContactStatus, RobotModel};

use super::SplitDirection;

/// Solution of a single stage.
///
/// Regular stages use `(q, v, a, u, f)` with costates `(lmd, gmm)`, the
/// inverse-dynamics multiplier `beta`, and the contact-constraint multiplier
/// `mu`. Impulse stages use `dv` (velocity jump) and `f` (impulse forces)
/// instead of `(a, u)`. `xi` is the multiplier of the switching constraint
/// when this stage immediately precedes an impulse event.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitSolution {
    /// Configuration.
    pub q: DVector<f64>,
    /// Generalized velocity.
    pub v: DVector<f64>,
    /// Generalized acceleration.
    pub a: DVector<f64>,
    /// Impulse velocity change (impulse stages only).
    pub dv: DVector<f64>,
    /// Actuated joint torques.
    pub u: DVector<f64>,
    /// Costate dual to the configuration row of the state equation.
    pub lmd: DVector<f64>,
    /// Costate dual to the velocity row of the state equation.
    pub gmm: DVector<f64>,
    /// Multiplier of the inverse-dynamics constraint.
    pub beta: DVector<f64>,
    f_full: DVector<f64>,
    mu_full: DVector<f64>,
    xi_full: DVector<f64>,
    dimf: usize,
    dimi: usize,
}

impl SplitSolution {
    /// Zero solution sized to the robot's maximum dimensions.
    pub fn new(robot: &dyn RobotModel) -> Self {
        let dimv = robot.dimv();
        let maxf = robot.max_dimf();
        Self {
            q: DVector::zeros(robot.dimq()),
            v: DVector::zeros(dimv),
            a: DVector::zeros(dimv),
            dv: DVector::zeros(dimv),
            u: DVector::zeros(robot.dimu()),
            lmd: DVector::zeros(dimv),
            gmm: DVector::zeros(dimv),
            beta: DVector::zeros(dimv),
            f_full: DVector::zeros(maxf),
            mu_full: DVector::zeros(maxf),
            xi_full: DVector::zeros(maxf),
            dimf: 0,
            dimi: 0,
        }
    }

    /// Selects the active contact dimension. Storage is untouched.
    pub fn set_contact_status(&mut self, status: &ContactStatus) {
        self.dimf = status.dimf();
    }

    /// Selects the switching-constraint dimension of this stage.
    pub fn set_switching_dim(&mut self, dimi: usize) {
        self.dimi = dimi;
    }

    pub fn dimf(&self) -> usize {
        self.dimf
    }

    pub fn dimi(&self) -> usize {
        self.dimi
    }

    /// Active stack of contact forces.
    pub fn f(&self) -> DVectorView<'_, f64> {
        self.f_full.rows(0, self.dimf)
    }

    pub fn f_mut(&mut self) -> DVectorViewMut<'_, f64> {
        self.f_full.rows_mut(0, self.dimf)
    }

    /// Active contact-constraint multiplier.
    pub fn mu(&self) -> DVectorView<'_, f64> {
        self.mu_full.rows(0, self.dimf)
    }

    pub fn mu_mut(&mut self) -> DVectorViewMut<'_, f64> {
        self.mu_full.rows_mut(0, self.dimf)
    }

    /// Switching-constraint multiplier.
    pub fn xi(&self) -> DVectorView<'_, f64> {
        self.xi_full.rows(0, self.dimi)
    }

    pub fn xi_mut(&mut self) -> DVectorViewMut<'_, f64> {
        self.xi_full.rows_mut(0, self.dimi)
    }

    /// Copies another stage solution without reallocating.
    pub fn copy_from(&mut self, other: &SplitSolution) {
        self.q.copy_from(&other.q);
        self.v.copy_from(&other.v);
        self.a.copy_from(&other.a);
        self.dv.copy_from(&other.dv);
        self.u.copy_from(&other.u);
        self.lmd.copy_from(&other.lmd);
        self.gmm.copy_from(&other.gmm);
        self.beta.copy_from(&other.beta);
        self.f_full.copy_from(&other.f_full);
        self.mu_full.copy_from(&other.mu_full);
        self.xi_full.copy_from(&other.xi_full);
        self.dimf = other.dimf;
        self.dimi = other.dimi;
    }

    /// Broadcasts one 3-vector to every candidate contact's force slot,
    /// active or not (warm starts are applied before the discretization
    /// selects the active sets).
    pub fn fill_forces(&mut self, f_per_contact: &[f64; 3]) {
        let contacts = self.f_full.len() / 3;
        for c in 0..contacts {
            for k in 0..3 {
                self.f_full[3 * c + k] = f_per_contact[k];
            }
        }
    }

    /// Applies the scaled Newton direction: the configuration through the
    /// manifold `integrate`, everything else additively. Costates move with
    /// the primal step size (the interior-point duals of the inequality
    /// constraints are updated separately by their components).
    pub fn integrate(&mut self, robot: &dyn RobotModel, step: f64, d: &SplitDirection) {
        let mut q_new = self.q.clone();
        robot.integrate(&self.q, &d.dq().clone_owned(), step, &mut q_new);
        self.q.copy_from(&q_new);
        self.v.axpy(step, &d.dv().clone_owned(), 1.0);
        self.a.axpy(step, &d.da, 1.0);
        self.dv.axpy(step, &d.ddv, 1.0);
        self.u.axpy(step, &d.du, 1.0);
        self.lmd.axpy(step, &d.dlmd().clone_owned(), 1.0);
        self.gmm.axpy(step, &d.dgmm().clone_owned(), 1.0);
        self.beta.axpy(step, &d.dbeta, 1.0);
        if self.dimf > 0 {
            let df = d.df().clone_owned();
            let dmu = d.dmu().clone_owned();
            self.f_mut().axpy(step, &df, 1.0);
            self.mu_mut().axpy(step, &dmu, 1.0);
        }
        if self.dimi > 0 {
            let dxi = d.dxi().clone_owned();
            self.xi_mut().axpy(step, &dxi, 1.0);
        }
    }

    /// Whether any variable contains a NaN.
    pub fn has_nan(&self) -> bool {
        self.q.iter().any(|x| x.is_nan())
            || self.v.iter().any(|x| x.is_nan())
            || self.a.iter().any(|x| x.is_nan())
            || self.dv.iter().any(|x| x.is_nan())
            || self.u.iter().any(|x| x.is_nan())
            || self.lmd.iter().any(|x| x.is_nan())
            || self.gmm.iter().any(|x| x.is_nan())
            || self.beta.iter().any(|x| x.is_nan())
            || self.f().iter().any(|x| x.is_nan())
            || self.mu().iter().any(|x| x.is_nan())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::robot::LinearChainModel;

    #[test]
    fn test_integrate_applies_scaled_direction() {
        let robot = LinearChainModel::new(2);
        let mut s = SplitSolution::new(&robot);
        s.q[0] = 1.0;

        let mut d = SplitDirection::new(&robot);
        d.dx[0] = 2.0; // dq[0]
        d.dx[2] = -4.0; // dv[0]
        d.du[1] = 1.0;

        s.integrate(&robot, 0.5, &d);
        assert_eq!(s.q[0], 2.0);
        assert_eq!(s.v[0], -2.0);
        assert_eq!(s.u[1], 0.5);
    }

    #[test]
    fn test_active_views() {
        let robot = LinearChainModel::new(6)
            .add_contact([0, 1, 2], [0.0; 3])
            .add_contact([3, 4, 5], [0.0; 3]);
        let mut s = SplitSolution::new(&robot);
        assert_eq!(s.f().len(), 0);
        s.set_contact_status(&ContactStatus::from_active(&[true, true]));
        assert_eq!(s.f().len(), 6);
        assert_eq!(s.mu().len(), 6);
    }
}
