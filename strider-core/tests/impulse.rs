//! Single-impulse horizon: impulse KKT, switching constraint, and
//! switching-time gradients.

use std::sync::Arc;

use nalgebra::DVector;
use strider_core::{
    ContactSequence, ContactStatus, Constraints, LinearChainModel, Ocp, OcpSolver, QuadraticCost,
    SolveStatus, SolverOptions,
};

fn impact_robot() -> LinearChainModel {
    LinearChainModel::new(3)
        .with_inertia(&[1.0, 1.0, 1.0])
        .add_contact([0, 1, 2], [0.0; 3])
}

fn build_solver(t_impulse: f64, sto: bool) -> OcpSolver<LinearChainModel> {
    let robot = impact_robot();
    let cost = Arc::new(
        QuadraticCost::new(&robot)
            .with_q_weight(&[1.0; 3])
            .with_v_weight(&[0.1; 3])
            .with_a_weight(&[1.0e-3; 3])
            .with_u_weight(&[1.0e-3; 3])
            .with_dv_weight(&[1.0e-3; 3])
            .with_q_weight_terminal(&[1.0; 3])
            .with_v_weight_terminal(&[0.1; 3]),
    );
    let ocp = Ocp {
        robot,
        cost,
        constraints: Constraints::new(),
        impulse_constraints: Constraints::new(),
        horizon: 0.5,
        n: 10,
    };
    let mut sequence = ContactSequence::new(ContactStatus::from_active(&[false]), 1);
    sequence.push(ContactStatus::from_active(&[true]), t_impulse, sto);
    let options = SolverOptions {
        max_iterations: if sto { 100 } else { 50 },
        kkt_tolerance: if sto { 1.0e-5 } else { 1.0e-10 },
        nthreads: 1,
        ..Default::default()
    };
    OcpSolver::new(ocp, sequence, options).expect("solver construction")
}

fn initial_state() -> (DVector<f64>, DVector<f64>) {
    (
        DVector::from_row_slice(&[0.3, 0.4, 0.5]),
        DVector::from_row_slice(&[-0.5, -0.5, -0.5]),
    )
}

#[test]
fn test_impulse_stage_satisfies_impulse_kkt() {
    let mut solver = build_solver(0.23, false);
    let (q0, v0) = initial_state();
    let stats = solver.solve(0.0, &q0, &v0);
    assert!(
        stats.is_converged(),
        "expected convergence, got {} (kkt = {:.3e})",
        stats.status,
        stats.kkt_error
    );

    let s_imp = solver.solution_impulse(0);
    let s_aux = solver.solution_aux(0);

    // Position continuity across the impulse.
    let dq = (&s_aux.q - &s_imp.q).amax();
    assert!(dq < 1.0e-10, "position jumped across impulse: {}", dq);

    // Post-impact contact velocity annihilated: J (v⁻ + dv) = 0.
    let v_post = &s_imp.v + &s_imp.dv;
    assert!(v_post.amax() < 1.0e-8, "post-impact contact velocity: {}", v_post.amax());
    assert!((&s_aux.v - &v_post).amax() < 1.0e-8);

    // Impulse KKT: M·dv = Jᵀ f (unit inertia, identity Jacobian).
    let f = s_imp.f().clone_owned();
    assert_eq!(f.len(), 3);
    assert!((&s_imp.dv - &f).amax() < 1.0e-8);

    // Switching constraint: the contact manifold is hit at the event.
    let k = solver.discretization().time_stage_before_impulse(0);
    let dt1 = solver.discretization().grid_info(k).dt;
    let dt2 = solver.discretization().grid_info_aux(0).dt;
    let s_pre = solver.solution(k);
    let predicted = &s_pre.q + (dt1 + dt2) * &s_pre.v + (dt1 * dt2) * &s_pre.a;
    assert!(
        predicted.amax() < 1.0e-6,
        "switching constraint residual: {}",
        predicted.amax()
    );

    // The pre-event stage width is the split of its interval.
    assert!((dt1 + dt2 - 0.05).abs() < 1.0e-12);
    assert!((solver.discretization().grid_info(k).t + dt1 - 0.23).abs() < 1.0e-12);
}

/// Finite-difference switching-time derivative matches the Hamiltonian jump
/// reported by the solver.
#[test]
fn test_hamiltonian_jump_matches_cost_sensitivity() {
    let delta = 1.0e-4;
    let ts = 0.13;
    let (q0, v0) = initial_state();

    let mut costs = Vec::new();
    for t_e in [ts - delta, ts, ts + delta] {
        let mut solver = build_solver(t_e, false);
        let stats = solver.solve(0.0, &q0, &v0);
        assert!(stats.is_converged(), "solve at ts = {} failed: {}", t_e, stats.status);
        costs.push(solver.total_cost());
    }

    let mut solver = build_solver(ts, false);
    solver.solve(0.0, &q0, &v0);
    let jump = solver.impulse_hamiltonian_jump(0);

    let fd = (costs[2] - costs[0]) / (2.0 * delta);
    let tol = 1.0e-3_f64.max(0.05 * fd.abs());
    assert!(
        (fd - jump).abs() < tol,
        "finite-difference slope {} vs Hamiltonian jump {}",
        fd,
        jump
    );
}

/// With STO enabled the event time moves against the Hamiltonian jump and
/// reduces it.
#[test]
fn test_sto_refines_event_time() {
    let ts0 = 0.13;
    let (q0, v0) = initial_state();

    // Baseline jump with the event fixed.
    let mut baseline = build_solver(ts0, false);
    let stats = baseline.solve(0.0, &q0, &v0);
    assert!(stats.is_converged());
    let jump0 = baseline.impulse_hamiltonian_jump(0);

    let mut solver = build_solver(ts0, true);
    let stats = solver.solve(0.0, &q0, &v0);
    assert!(
        matches!(stats.status, SolveStatus::Converged | SolveStatus::MaxIterations),
        "unexpected exit: {}",
        stats.status
    );
    let jump = solver.impulse_hamiltonian_jump(0);
    let ts = solver.contact_sequence().impulse_time(0);
    assert!(ts > 0.0 && ts < 0.5);

    if jump0.abs() > 1.0e-4 {
        // Progress on the switching-time stationarity condition.
        assert!(
            jump.abs() < 0.5 * jump0.abs(),
            "Hamiltonian jump not reduced: {} -> {}",
            jump0,
            jump
        );
        // The event moved against the gradient.
        assert!((ts - ts0).signum() == -jump0.signum() || (ts - ts0).abs() < 1.0e-8);
    }
    if stats.is_converged() {
        // The convergence test includes the jump of STO-enabled events.
        assert!(jump.abs() < 1.0e-5);
    }
}
