//! Analytic chain model with linear dynamics and point contacts.
//!
//! `LinearChainModel` is a fully-actuated rigid system on a vector-space
//! configuration manifold with constant inertia, viscous damping, a constant
//! generalized gravity load, and point contacts whose world position is a
//! selection of three configuration coordinates. Every quantity the solver
//! consumes is available in closed form, which makes the model the reference
//! implementation for unit and integration tests: manifold Jacobians are
//! exactly the identity and contact Jacobians are constant.

use nalgebra::{DMatrix, DVector};

use super::{ContactStatus, RobotModel};

/// Point contact attached to three configuration coordinates.
#[derive(Debug, Clone)]
struct PointContact {
    /// Indices of the (x, y, z) coordinates in `q`.
    coords: [usize; 3],
    /// Contact-surface reference position.
    reference: [f64; 3],
}

/// Fully-actuated linear chain with optional point contacts.
#[derive(Debug, Clone)]
pub struct LinearChainModel {
    dim: usize,
    inertia: DVector<f64>,
    damping: DVector<f64>,
    gravity: DVector<f64>,
    contacts: Vec<PointContact>,
    baumgarte_tau: f64,
    // Kinematics workspace.
    q: DVector<f64>,
    v: DVector<f64>,
}

impl LinearChainModel {
    /// Model with `dim` joints, unit inertia, no damping, no gravity,
    /// no contacts.
    pub fn new(dim: usize) -> Self {
        assert!(dim > 0, "model must have at least one joint");
        Self {
            dim,
            inertia: DVector::from_element(dim, 1.0),
            damping: DVector::zeros(dim),
            gravity: DVector::zeros(dim),
            contacts: Vec::new(),
            baumgarte_tau: 0.1,
            q: DVector::zeros(dim),
            v: DVector::zeros(dim),
        }
    }

    /// Sets the diagonal joint-space inertia.
    pub fn with_inertia(mut self, inertia: &[f64]) -> Self {
        assert_eq!(inertia.len(), self.dim);
        self.inertia = DVector::from_row_slice(inertia);
        self
    }

    /// Sets the viscous damping coefficients.
    pub fn with_damping(mut self, damping: &[f64]) -> Self {
        assert_eq!(damping.len(), self.dim);
        self.damping = DVector::from_row_slice(damping);
        self
    }

    /// Sets the constant generalized gravity load.
    pub fn with_gravity(mut self, gravity: &[f64]) -> Self {
        assert_eq!(gravity.len(), self.dim);
        self.gravity = DVector::from_row_slice(gravity);
        self
    }

    /// Sets the Baumgarte stabilization time constant.
    pub fn with_baumgarte_time_constant(mut self, tau: f64) -> Self {
        assert!(tau > 0.0);
        self.baumgarte_tau = tau;
        self
    }

    /// Adds a candidate point contact whose world position is
    /// `(q[coords[0]], q[coords[1]], q[coords[2]])` and whose contact surface
    /// sits at `reference`.
    pub fn add_contact(mut self, coords: [usize; 3], reference: [f64; 3]) -> Self {
        for &c in &coords {
            assert!(c < self.dim, "contact coordinate out of range");
        }
        self.contacts.push(PointContact { coords, reference });
        self
    }

    /// Generalized gravity load (used to seed static-balance warm starts).
    pub fn gravity(&self) -> &DVector<f64> {
        &self.gravity
    }
}

impl RobotModel for LinearChainModel {
    fn dimq(&self) -> usize {
        self.dim
    }

    fn dimv(&self) -> usize {
        self.dim
    }

    fn dimu(&self) -> usize {
        self.dim
    }

    fn max_num_contacts(&self) -> usize {
        self.contacts.len()
    }

    fn baumgarte_time_constant(&self) -> f64 {
        self.baumgarte_tau
    }

    fn integrate(&self, q: &DVector<f64>, dq: &DVector<f64>, step: f64, q_out: &mut DVector<f64>) {
        q_out.copy_from(q);
        q_out.axpy(step, dq, 1.0);
    }

    fn difference(&self, q: &DVector<f64>, q_goal: &DVector<f64>, out: &mut DVector<f64>) {
        out.copy_from(q_goal);
        *out -= q;
    }

    fn d_integrate_dq(
        &self,
        _q: &DVector<f64>,
        _dq: &DVector<f64>,
        jac_in: &DMatrix<f64>,
        jac_out: &mut DMatrix<f64>,
    ) {
        jac_out.copy_from(jac_in);
    }

    fn d_integrate_dv(
        &self,
        _q: &DVector<f64>,
        _dq: &DVector<f64>,
        jac_in: &DMatrix<f64>,
        jac_out: &mut DMatrix<f64>,
    ) {
        jac_out.copy_from(jac_in);
    }

    fn d_difference_dq_goal(
        &self,
        _q: &DVector<f64>,
        _q_goal: &DVector<f64>,
        jac_out: &mut DMatrix<f64>,
    ) {
        jac_out.fill(0.0);
        jac_out.fill_diagonal(1.0);
    }

    fn d_difference_dq(
        &self,
        _q: &DVector<f64>,
        _q_goal: &DVector<f64>,
        jac_out: &mut DMatrix<f64>,
    ) {
        jac_out.fill(0.0);
        jac_out.fill_diagonal(-1.0);
    }

    fn update_kinematics(&mut self, q: &DVector<f64>, v: &DVector<f64>) {
        self.q.copy_from(q);
        self.v.copy_from(v);
    }

    fn contact_position_residual(&self, status: &ContactStatus, out: &mut DVector<f64>) {
        debug_assert_eq!(out.len(), status.dimf());
        let mut row = 0;
        for ci in status.active_contact_indices() {
            let contact = &self.contacts[ci];
            for k in 0..3 {
                out[row] = self.q[contact.coords[k]] - contact.reference[k];
                row += 1;
            }
        }
    }

    fn contact_jacobian(&self, status: &ContactStatus, out: &mut DMatrix<f64>) {
        debug_assert_eq!(out.nrows(), status.dimf());
        debug_assert_eq!(out.ncols(), self.dim);
        out.fill(0.0);
        let mut row = 0;
        for ci in status.active_contact_indices() {
            let contact = &self.contacts[ci];
            for k in 0..3 {
                out[(row, contact.coords[k])] = 1.0;
                row += 1;
            }
        }
    }

    fn contact_velocity_residual(&self, status: &ContactStatus, out: &mut DVector<f64>) {
        debug_assert_eq!(out.len(), status.dimf());
        let mut row = 0;
        for ci in status.active_contact_indices() {
            let contact = &self.contacts[ci];
            for k in 0..3 {
                out[row] = self.v[contact.coords[k]];
                row += 1;
            }
        }
    }

    fn contact_acceleration_residual(
        &self,
        status: &ContactStatus,
        a: &DVector<f64>,
        out: &mut DVector<f64>,
    ) {
        debug_assert_eq!(out.len(), status.dimf());
        let tau = self.baumgarte_tau;
        let mut row = 0;
        for ci in status.active_contact_indices() {
            let contact = &self.contacts[ci];
            for k in 0..3 {
                let c = contact.coords[k];
                out[row] = a[c]
                    + (2.0 / tau) * self.v[c]
                    + (self.q[c] - contact.reference[k]) / (tau * tau);
                row += 1;
            }
        }
    }

    fn contact_acceleration_derivatives(
        &self,
        status: &ContactStatus,
        dcdq: &mut DMatrix<f64>,
        dcdv: &mut DMatrix<f64>,
    ) {
        let tau = self.baumgarte_tau;
        dcdq.fill(0.0);
        dcdv.fill(0.0);
        let mut row = 0;
        for ci in status.active_contact_indices() {
            let contact = &self.contacts[ci];
            for k in 0..3 {
                let c = contact.coords[k];
                dcdq[(row, c)] = 1.0 / (tau * tau);
                dcdv[(row, c)] = 2.0 / tau;
                row += 1;
            }
        }
    }

    fn contact_velocity_derivatives(
        &self,
        status: &ContactStatus,
        dcdq: &mut DMatrix<f64>,
        dcdv: &mut DMatrix<f64>,
    ) {
        dcdq.fill(0.0);
        self.contact_jacobian(status, dcdv);
    }

    fn impulse_inverse_dynamics(
        &self,
        status: &ContactStatus,
        dv: &DVector<f64>,
        f: &DVector<f64>,
        out: &mut DVector<f64>,
    ) {
        debug_assert_eq!(f.len(), status.dimf());
        for i in 0..self.dim {
            out[i] = self.inertia[i] * dv[i];
        }
        let mut row = 0;
        for ci in status.active_contact_indices() {
            let contact = &self.contacts[ci];
            for k in 0..3 {
                out[contact.coords[k]] -= f[row];
                row += 1;
            }
        }
    }

    fn impulse_inverse_dynamics_derivatives(
        &self,
        _status: &ContactStatus,
        _dv: &DVector<f64>,
        _f: &DVector<f64>,
        didq: &mut DMatrix<f64>,
        diddv: &mut DMatrix<f64>,
    ) {
        didq.fill(0.0);
        diddv.fill(0.0);
        for i in 0..self.dim {
            diddv[(i, i)] = self.inertia[i];
        }
    }

    fn inverse_dynamics(
        &self,
        status: &ContactStatus,
        a: &DVector<f64>,
        f: &DVector<f64>,
        out: &mut DVector<f64>,
    ) {
        debug_assert_eq!(f.len(), status.dimf());
        for i in 0..self.dim {
            out[i] = self.inertia[i] * a[i] + self.damping[i] * self.v[i] + self.gravity[i];
        }
        let mut row = 0;
        for ci in status.active_contact_indices() {
            let contact = &self.contacts[ci];
            for k in 0..3 {
                out[contact.coords[k]] -= f[row];
                row += 1;
            }
        }
    }

    fn inverse_dynamics_derivatives(
        &self,
        _status: &ContactStatus,
        _a: &DVector<f64>,
        _f: &DVector<f64>,
        didq: &mut DMatrix<f64>,
        didv: &mut DMatrix<f64>,
        dida: &mut DMatrix<f64>,
    ) {
        didq.fill(0.0);
        didv.fill(0.0);
        dida.fill(0.0);
        for i in 0..self.dim {
            didv[(i, i)] = self.damping[i];
            dida[(i, i)] = self.inertia[i];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_dof_with_contact() -> LinearChainModel {
        LinearChainModel::new(3)
            .with_inertia(&[2.0, 2.0, 2.0])
            .with_gravity(&[0.0, 0.0, -9.81 * 2.0])
            .add_contact([0, 1, 2], [0.0, 0.0, 0.0])
    }

    #[test]
    fn test_manifold_ops_are_linear() {
        let model = LinearChainModel::new(2);
        let q = DVector::from_row_slice(&[1.0, -1.0]);
        let dq = DVector::from_row_slice(&[0.5, 2.0]);
        let mut q_out = DVector::zeros(2);
        model.integrate(&q, &dq, 0.1, &mut q_out);
        assert_eq!(q_out[0], 1.05);
        assert_eq!(q_out[1], -0.8);

        let mut diff = DVector::zeros(2);
        model.difference(&q, &q_out, &mut diff);
        assert!((diff[0] - 0.05).abs() < 1e-15);
        assert!((diff[1] - 0.2).abs() < 1e-15);
    }

    #[test]
    fn test_contact_jacobian_selects_coords() {
        let mut model = three_dof_with_contact();
        let status = ContactStatus::from_active(&[true]);
        model.update_kinematics(
            &DVector::from_row_slice(&[0.1, 0.2, 0.3]),
            &DVector::zeros(3),
        );

        let mut jac = DMatrix::zeros(3, 3);
        model.contact_jacobian(&status, &mut jac);
        assert_eq!(jac, DMatrix::identity(3, 3));

        let mut phi = DVector::zeros(3);
        model.contact_position_residual(&status, &mut phi);
        assert_eq!(phi, DVector::from_row_slice(&[0.1, 0.2, 0.3]));
    }

    #[test]
    fn test_inverse_dynamics_removes_contact_force() {
        let mut model = three_dof_with_contact();
        let status = ContactStatus::from_active(&[true]);
        model.update_kinematics(&DVector::zeros(3), &DVector::zeros(3));

        let a = DVector::zeros(3);
        // Force exactly balancing gravity leaves zero residual torque.
        let f = DVector::from_row_slice(&[0.0, 0.0, -9.81 * 2.0]);
        let mut id = DVector::zeros(3);
        model.inverse_dynamics(&status, &a, &f, &mut id);
        assert!(id.amax() < 1e-12);
    }
}
