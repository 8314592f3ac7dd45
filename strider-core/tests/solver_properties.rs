//! Cross-cutting solver properties: restoration, determinism, exits.

use std::sync::Arc;

use nalgebra::DVector;
use strider_core::{
    ContactSequence, ContactStatus, Constraints, JointPositionLowerLimit,
    JointPositionUpperLimit, LinearChainModel, Ocp, OcpSolver, QuadraticCost, SolveStatus,
    SolverBuildError, SolverOptions,
};

fn limited_joint_solver(nthreads: usize) -> OcpSolver<LinearChainModel> {
    let robot = LinearChainModel::new(2);
    let cost = Arc::new(
        QuadraticCost::new(&robot)
            .with_q_ref(&[0.5, -0.5])
            .with_q_weight(&[1.0, 1.0])
            .with_v_weight(&[0.1, 0.1])
            .with_a_weight(&[1.0e-3, 1.0e-3])
            .with_u_weight(&[1.0e-2, 1.0e-2])
            .with_q_weight_terminal(&[1.0, 1.0])
            .with_v_weight_terminal(&[0.1, 0.1]),
    );
    let mut constraints = Constraints::new();
    constraints.add(Arc::new(JointPositionLowerLimit::new(&[-1.0, -1.0], 0)));
    constraints.add(Arc::new(JointPositionUpperLimit::new(&[1.0, 1.0], 0)));

    let ocp = Ocp {
        robot,
        cost,
        constraints,
        impulse_constraints: Constraints::new(),
        horizon: 1.0,
        n: 10,
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
fn test_infeasible_warm_start_is_restored() {
    let mut solver = limited_joint_solver(1);
    // Warm start 10% outside the joint limits.
    solver
        .set_solution("q", &DVector::from_row_slice(&[1.1, 1.1]))
        .unwrap();

    let q0 = DVector::from_row_slice(&[0.5, 0.0]);
    let v0 = DVector::zeros(2);
    let stats = solver.solve(0.0, &q0, &v0);

    assert!(!stats.feasible_start, "warm start should be flagged infeasible");
    assert!(
        stats.is_converged(),
        "restoration should recover: {} (kkt = {:.3e})",
        stats.status,
        stats.kkt_error
    );
    // After restoration and convergence the trajectory respects the limits.
    assert!(solver.is_current_solution_feasible());
    for i in 0..=10 {
        let q = &solver.solution(i).q;
        assert!(q[0] <= 1.0 + 1.0e-6 && q[0] >= -1.0 - 1.0e-6);
    }
}

#[test]
fn test_solution_is_independent_of_thread_count() {
    let q0 = DVector::from_row_slice(&[0.2, -0.3]);
    let v0 = DVector::from_row_slice(&[0.1, 0.0]);

    let mut reference: Option<Vec<DVector<f64>>> = None;
    for nthreads in [1usize, 2, 4] {
        let mut solver = limited_joint_solver(nthreads);
        let stats = solver.solve(0.0, &q0, &v0);
        assert!(stats.is_converged(), "nthreads = {}: {}", nthreads, stats.status);

        let trajectory: Vec<DVector<f64>> = (0..=10)
            .map(|i| {
                let s = solver.solution(i);
                let mut z = DVector::zeros(6);
                z.rows_mut(0, 2).copy_from(&s.q);
                z.rows_mut(2, 2).copy_from(&s.v);
                z.rows_mut(4, 2).copy_from(&s.u);
                z
            })
            .collect();
        match &reference {
            None => reference = Some(trajectory),
            Some(reference) => {
                for (i, (a, b)) in reference.iter().zip(trajectory.iter()).enumerate() {
                    let err = (a - b).amax();
                    assert!(
                        err < 1.0e-10,
                        "thread-count drift at stage {} with {} threads: {}",
                        i,
                        nthreads,
                        err
                    );
                }
            }
        }
    }
}

#[test]
fn test_construction_rejects_invalid_arguments() {
    let robot = LinearChainModel::new(1);
    let cost = Arc::new(QuadraticCost::new(&robot));
    let make_ocp = |horizon: f64, n: usize| Ocp {
        robot: LinearChainModel::new(1),
        cost: cost.clone() as Arc<dyn strider_core::CostFunction>,
        constraints: Constraints::new(),
        impulse_constraints: Constraints::new(),
        horizon,
        n,
    };
    let sequence = || ContactSequence::new(ContactStatus::new(0), 0);

    assert_eq!(
        OcpSolver::new(make_ocp(-1.0, 10), sequence(), SolverOptions::default()).err(),
        Some(SolverBuildError::NonPositiveHorizon)
    );
    assert_eq!(
        OcpSolver::new(make_ocp(1.0, 0), sequence(), SolverOptions::default()).err(),
        Some(SolverBuildError::ZeroGrid)
    );
    let options = SolverOptions {
        nthreads: 0,
        ..Default::default()
    };
    assert_eq!(
        OcpSolver::new(make_ocp(1.0, 10), sequence(), options).err(),
        Some(SolverBuildError::ZeroThreads)
    );
}

#[test]
fn test_colliding_events_exit_with_bad_discretization() {
    let robot = LinearChainModel::new(6)
        .add_contact([0, 1, 2], [0.0; 3])
        .add_contact([3, 4, 5], [0.0; 3]);
    let cost = Arc::new(QuadraticCost::new(&robot).with_q_weight(&[1.0; 6]));
    let ocp = Ocp {
        robot,
        cost,
        constraints: Constraints::new(),
        impulse_constraints: Constraints::new(),
        horizon: 0.5,
        n: 10,
    };
    let mut sequence = ContactSequence::new(ContactStatus::from_active(&[false, false]), 2);
    // Both events fall into the same grid interval.
    sequence.push(ContactStatus::from_active(&[true, false]), 0.221, false);
    sequence.push(ContactStatus::from_active(&[true, true]), 0.222, false);

    let mut solver =
        OcpSolver::new(ocp, sequence, SolverOptions::default()).expect("solver construction");
    let stats = solver.solve(0.0, &DVector::zeros(6), &DVector::zeros(6));
    assert_eq!(stats.status, SolveStatus::BadDiscretization);
    assert_eq!(stats.iterations, 0);
}

#[test]
fn test_unconstrained_variant_rejects_contact_robots() {
    let robot = LinearChainModel::new(3).add_contact([0, 1, 2], [0.0; 3]);
    let cost = Arc::new(QuadraticCost::new(&robot).with_q_weight(&[1.0; 3]));
    let ocp = Ocp {
        robot,
        cost,
        constraints: Constraints::new(),
        impulse_constraints: Constraints::new(),
        horizon: 1.0,
        n: 10,
    };
    let sequence = ContactSequence::new(ContactStatus::new(1), 1);
    let options = SolverOptions {
        kind: strider_core::OcpKind::Unconstrained,
        ..Default::default()
    };
    assert_eq!(
        OcpSolver::new(ocp, sequence, options).err(),
        Some(SolverBuildError::NotUnconstrained)
    );
}

#[test]
fn test_unconstrained_variant_solves_plain_problems() {
    let robot = LinearChainModel::new(2);
    let cost = Arc::new(
        QuadraticCost::new(&robot)
            .with_q_weight(&[1.0, 1.0])
            .with_v_weight(&[0.1, 0.1])
            .with_a_weight(&[1.0e-3, 1.0e-3])
            .with_u_weight(&[1.0e-2, 1.0e-2])
            .with_q_weight_terminal(&[1.0, 1.0]),
    );
    let ocp = Ocp {
        robot,
        cost,
        constraints: Constraints::new(),
        impulse_constraints: Constraints::new(),
        horizon: 1.0,
        n: 10,
    };
    let sequence = ContactSequence::new(ContactStatus::new(0), 0);
    let options = SolverOptions {
        kind: strider_core::OcpKind::Unconstrained,
        kkt_tolerance: 1.0e-8,
        ..Default::default()
    };
    let mut solver = OcpSolver::new(ocp, sequence, options).expect("solver construction");
    let stats = solver.solve(0.0, &DVector::from_row_slice(&[1.0, -1.0]), &DVector::zeros(2));
    assert!(stats.is_converged());
}
