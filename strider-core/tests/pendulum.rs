//! Single-DOF swing-down with torque limits.

use std::sync::Arc;

use nalgebra::DVector;
use strider_core::{
    ContactSequence, ContactStatus, Constraints, JointTorquesLowerLimit, JointTorquesUpperLimit,
    LinearChainModel, Ocp, OcpSolver, QuadraticCost, SolverOptions,
};

fn build_solver(nthreads: usize) -> OcpSolver<LinearChainModel> {
    let robot = LinearChainModel::new(1);
    let cost = Arc::new(
        QuadraticCost::new(&robot)
            .with_q_ref(&[0.0])
            .with_q_weight(&[1.0])
            .with_v_weight(&[0.1])
            .with_a_weight(&[1.0e-3])
            .with_u_weight(&[1.0e-2])
            .with_q_weight_terminal(&[10.0])
            .with_v_weight_terminal(&[1.0]),
    );
    let mut constraints = Constraints::new();
    constraints.add(Arc::new(JointTorquesLowerLimit::new(&[-5.0])));
    constraints.add(Arc::new(JointTorquesUpperLimit::new(&[5.0])));

    let ocp = Ocp {
        robot,
        cost,
        constraints,
        impulse_constraints: Constraints::new(),
        horizon: 1.0,
        n: 20,
    };
    let sequence = ContactSequence::new(ContactStatus::new(0), 0);
    let options = SolverOptions {
        max_iterations: 50,
        kkt_tolerance: 1.0e-6,
        nthreads,
        ..Default::default()
    };
    OcpSolver::new(ocp, sequence, options).expect("solver construction")
}

#[test]
fn test_swing_down_converges_within_torque_limits() {
    let mut solver = build_solver(2);
    let q0 = DVector::from_row_slice(&[2.0]);
    let v0 = DVector::from_row_slice(&[0.0]);
    let stats = solver.solve(0.0, &q0, &v0);

    assert!(
        stats.is_converged(),
        "expected convergence, got {} after {} iterations (kkt = {:.3e})",
        stats.status,
        stats.iterations,
        stats.kkt_error
    );
    assert!(stats.kkt_error < 1.0e-6);
    assert!(stats.iterations <= 30, "took {} iterations", stats.iterations);
    assert!(stats.feasible_start);

    // The torque limit binds early in the swing-down and is never violated.
    let u0 = solver.solution(0).u[0];
    assert!(u0 < -4.0, "initial torque should push hard down, got {}", u0);
    for i in 0..20 {
        let u = solver.solution(i).u[0];
        assert!(u >= -5.0 - 1.0e-6 && u <= 5.0 + 1.0e-6, "torque limit violated: {}", u);
    }

    // The torque limit caps how far the swing can get in one second: the
    // reachable set from q = 2 with |u| ≤ 5 and a penalized terminal
    // velocity bottoms out well above zero, but most of the error is gone.
    let qf = solver.solution(20).q[0];
    let vf = solver.solution(20).v[0];
    assert!(qf.abs() < 1.0, "final configuration too far: {}", qf);
    assert!(vf <= 0.1, "terminal velocity should not point away: {}", vf);

    // The initial state is enforced.
    assert!((solver.solution(0).q[0] - 2.0).abs() < 1.0e-6);
    assert!(solver.solution(0).v[0].abs() < 1.0e-6);
}

#[test]
fn test_warm_started_resolve_is_idempotent() {
    let mut solver = build_solver(1);
    let q0 = DVector::from_row_slice(&[2.0]);
    let v0 = DVector::from_row_slice(&[0.0]);
    let first = solver.solve(0.0, &q0, &v0);
    assert!(first.is_converged());

    // No state change: the KKT conditions already hold, so the second solve
    // must accept the current iterate almost immediately.
    let second = solver.solve(0.0, &q0, &v0);
    assert!(second.is_converged());
    assert!(
        second.iterations <= 1,
        "warm-started resolve took {} iterations",
        second.iterations
    );
}

#[test]
fn test_state_feedback_gain_dimensions() {
    let mut solver = build_solver(1);
    let q0 = DVector::from_row_slice(&[1.0]);
    let v0 = DVector::from_row_slice(&[0.0]);
    let stats = solver.solve(0.0, &q0, &v0);
    assert!(stats.is_converged());

    let (kq, kv) = solver.state_feedback_gain(5);
    assert_eq!(kq.nrows(), 1);
    assert_eq!(kq.ncols(), 1);
    assert_eq!(kv.nrows(), 1);
    assert_eq!(kv.ncols(), 1);
    // Stabilizing feedback pushes against the state error.
    assert!(kq[(0, 0)] < 0.0);
}
