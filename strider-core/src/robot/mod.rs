//! Robot model interface.
//!
//! The solver core is agnostic to how rigid-body kinematics and dynamics are
//! evaluated. It consumes the [`RobotModel`] trait: configuration-manifold
//! operations (`integrate`/`difference` and their Jacobians), contact
//! kinematics (positions, Jacobians, Baumgarte-stabilized acceleration
//! residuals), and inverse dynamics with its partial derivatives.
//!
//! Implementations are expected to keep mutable internal workspace for
//! kinematics evaluation (`update_kinematics` takes `&mut self`), so the
//! solver clones one model per worker and shares nothing mutable across
//! threads.
//!
//! A floating base occupies the first coordinates of `q` (position plus unit
//! quaternion) and the first six rows of the tangent space; those joints are
//! passive, so `dimu() == dimv() - dim_passive()`.

mod contact_status;
mod linear_mdl;

pub use contact_status::{ContactStatus, ImpulseStatus};
pub use linear_mdl::LinearChainModel;

use nalgebra::{DMatrix, DVector};

/// Rigid-body kinematics/dynamics evaluator consumed by the solver.
///
/// All matrix/vector outputs are written into caller-provided buffers sized
/// to the *active* dimensions; implementations must not allocate in these
/// calls.
pub trait RobotModel: Send + Sync {
    /// Dimension of the configuration `q`.
    fn dimq(&self) -> usize;

    /// Dimension of the tangent space (velocity `v`, acceleration `a`).
    fn dimv(&self) -> usize;

    /// Dimension of the actuated joint torques `u`.
    fn dimu(&self) -> usize;

    /// Number of passive (unactuated) velocity coordinates. Six for a
    /// floating base, zero otherwise.
    fn dim_passive(&self) -> usize {
        self.dimv() - self.dimu()
    }

    /// Whether the first seven configuration coordinates form a floating base.
    fn has_floating_base(&self) -> bool {
        self.dim_passive() > 0
    }

    /// Number of candidate contact frames.
    fn max_num_contacts(&self) -> usize;

    /// Maximum dimension of the stacked contact forces.
    fn max_dimf(&self) -> usize {
        3 * self.max_num_contacts()
    }

    /// Baumgarte stabilization time constant used in the acceleration-level
    /// contact constraint.
    fn baumgarte_time_constant(&self) -> f64;

    /// `q_out = q ⊕ step · dq` on the configuration manifold.
    fn integrate(&self, q: &DVector<f64>, dq: &DVector<f64>, step: f64, q_out: &mut DVector<f64>);

    /// `out = q_goal ⊖ q`, the tangent vector carrying `q` to `q_goal`.
    fn difference(&self, q: &DVector<f64>, q_goal: &DVector<f64>, out: &mut DVector<f64>);

    /// Right-multiplies `jac_in` by the Jacobian of `integrate` with respect
    /// to `q`. Identity pass-through on vector-space configurations.
    fn d_integrate_dq(
        &self,
        q: &DVector<f64>,
        dq: &DVector<f64>,
        jac_in: &DMatrix<f64>,
        jac_out: &mut DMatrix<f64>,
    );

    /// Right-multiplies `jac_in` by the Jacobian of `integrate` with respect
    /// to the tangent increment `dq`.
    fn d_integrate_dv(
        &self,
        q: &DVector<f64>,
        dq: &DVector<f64>,
        jac_in: &DMatrix<f64>,
        jac_out: &mut DMatrix<f64>,
    );

    /// Jacobian of `difference(q, q_goal)` with respect to `q_goal`.
    fn d_difference_dq_goal(
        &self,
        q: &DVector<f64>,
        q_goal: &DVector<f64>,
        jac_out: &mut DMatrix<f64>,
    );

    /// Jacobian of `difference(q, q_goal)` with respect to `q`. On a vector
    /// space this is minus the identity; with a floating base it carries the
    /// local-frame transport that must appear as `Fqq_prev` in the state
    /// equation.
    fn d_difference_dq(&self, q: &DVector<f64>, q_goal: &DVector<f64>, jac_out: &mut DMatrix<f64>);

    /// Refreshes the internal kinematics workspace at `(q, v)`. Must be
    /// called before any of the contact or dynamics queries below.
    fn update_kinematics(&mut self, q: &DVector<f64>, v: &DVector<f64>);

    /// Stacked contact-position residual `φ_c(q)` of the active contacts
    /// (distance to the contact surface). Length `status.dimf()`.
    fn contact_position_residual(&self, status: &ContactStatus, out: &mut DVector<f64>);

    /// Stacked contact Jacobian `J_c(q)` of the active contacts,
    /// `status.dimf() × dimv()`.
    fn contact_jacobian(&self, status: &ContactStatus, out: &mut DMatrix<f64>);

    /// Stacked contact-velocity residual `J_c(q) · v`. Length `status.dimf()`.
    fn contact_velocity_residual(&self, status: &ContactStatus, out: &mut DVector<f64>);

    /// Baumgarte-stabilized contact-acceleration residual
    /// `J_c · a + J̇_c · v + (2/τ_B) J_c v + (1/τ_B²) φ_c`.
    /// Length `status.dimf()`.
    fn contact_acceleration_residual(
        &self,
        status: &ContactStatus,
        a: &DVector<f64>,
        out: &mut DVector<f64>,
    );

    /// Partial derivatives of the contact-acceleration residual with respect
    /// to `q` and `v` (the derivative with respect to `a` is the contact
    /// Jacobian itself).
    fn contact_acceleration_derivatives(
        &self,
        status: &ContactStatus,
        dcdq: &mut DMatrix<f64>,
        dcdv: &mut DMatrix<f64>,
    );

    /// Partial derivatives of the contact-velocity residual with respect to
    /// `q` and `v` (the latter is the contact Jacobian).
    fn contact_velocity_derivatives(
        &self,
        status: &ContactStatus,
        dcdq: &mut DMatrix<f64>,
        dcdv: &mut DMatrix<f64>,
    );

    /// Impulse dynamics residual `M(q)·dv − J_cᵀ f` for the velocity jump
    /// `dv` and impulse forces `f`. Length `dimv()`.
    fn impulse_inverse_dynamics(
        &self,
        status: &ContactStatus,
        dv: &DVector<f64>,
        f: &DVector<f64>,
        out: &mut DVector<f64>,
    );

    /// Partial derivatives of `impulse_inverse_dynamics` with respect to `q`
    /// and `dv`. The `dv`-derivative is the joint-space inertia matrix.
    fn impulse_inverse_dynamics_derivatives(
        &self,
        status: &ContactStatus,
        dv: &DVector<f64>,
        f: &DVector<f64>,
        didq: &mut DMatrix<f64>,
        diddv: &mut DMatrix<f64>,
    );

    /// Inverse dynamics with the active contact forces applied:
    /// `ID(q, v, a) − J_cᵀ f`. Length `dimv()`.
    fn inverse_dynamics(
        &self,
        status: &ContactStatus,
        a: &DVector<f64>,
        f: &DVector<f64>,
        out: &mut DVector<f64>,
    );

    /// Partial derivatives of `inverse_dynamics` with respect to `q`, `v`,
    /// and `a`. The `a`-derivative is the joint-space inertia matrix.
    fn inverse_dynamics_derivatives(
        &self,
        status: &ContactStatus,
        a: &DVector<f64>,
        f: &DVector<f64>,
        didq: &mut DMatrix<f64>,
        didv: &mut DMatrix<f64>,
        dida: &mut DMatrix<f64>,
    );
}
