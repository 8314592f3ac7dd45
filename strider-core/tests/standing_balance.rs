//! Four-contact standing balance: converged normal forces carry the weight.

use std::sync::Arc;

use approx::assert_relative_eq;
use nalgebra::DVector;
use strider_core::{
    ContactSequence, ContactStatus, Constraints, FrictionCone, LinearChainModel, Ocp, OcpSolver,
    QuadraticCost, SolverOptions,
};

/// Per-foot weight of a 2 kg body split over four feet.
const FOOT_LOAD: f64 = 2.0 * 9.81 / 4.0;

fn standing_robot() -> LinearChainModel {
    let mut gravity = [0.0; 12];
    // Each foot's vertical coordinate carries a quarter of the weight.
    for foot in 0..4 {
        gravity[3 * foot + 2] = FOOT_LOAD;
    }
    LinearChainModel::new(12)
        .with_inertia(&[0.5; 12])
        .with_gravity(&gravity)
        .add_contact([0, 1, 2], [0.0; 3])
        .add_contact([3, 4, 5], [0.0; 3])
        .add_contact([6, 7, 8], [0.0; 3])
        .add_contact([9, 10, 11], [0.0; 3])
}

#[test]
fn test_standing_balance_forces() {
    let robot = standing_robot();
    let cost = Arc::new(
        QuadraticCost::new(&robot)
            .with_q_weight(&[1.0; 12])
            .with_v_weight(&[1.0; 12])
            .with_a_weight(&[1.0e-3; 12])
            // Expensive torques force the contacts to carry the weight.
            .with_u_weight(&[1.0e3; 12])
            .with_f_weight([1.0e-4, 1.0e-4, 1.0e-4])
            .with_f_ref([0.0, 0.0, FOOT_LOAD])
            .with_q_weight_terminal(&[1.0; 12])
            .with_v_weight_terminal(&[1.0; 12]),
    );
    let mut constraints = Constraints::new();
    constraints.add(Arc::new(FrictionCone::new(0.7, 4)));

    let ocp = Ocp {
        robot,
        cost,
        constraints,
        impulse_constraints: Constraints::new(),
        horizon: 0.5,
        n: 20,
    };
    // All four contacts active over the whole horizon, no events.
    let sequence = ContactSequence::new(ContactStatus::from_active(&[true; 4]), 0);
    let options = SolverOptions {
        max_iterations: 50,
        kkt_tolerance: 1.0e-6,
        nthreads: 2,
        ..Default::default()
    };
    let mut solver = OcpSolver::new(ocp, sequence, options).expect("solver construction");

    // Strictly feasible force warm start, away from the balance point.
    solver
        .set_solution("f", &DVector::from_row_slice(&[0.0, 0.0, 0.5 * FOOT_LOAD]))
        .unwrap();

    let q0 = DVector::zeros(12);
    let v0 = DVector::zeros(12);
    let stats = solver.solve(0.0, &q0, &v0);

    assert!(
        stats.is_converged(),
        "expected convergence, got {} (kkt = {:.3e})",
        stats.status,
        stats.kkt_error
    );
    assert!(stats.iterations <= 30, "took {} iterations", stats.iterations);

    // Every stance foot carries its quarter of the weight within 1%.
    for stage in [0, 5, 10, 19] {
        let f = solver.solution(stage).f();
        assert_eq!(f.len(), 12);
        for foot in 0..4 {
            let fz = f[3 * foot + 2];
            assert_relative_eq!(fz, FOOT_LOAD, max_relative = 0.01);
            // Strictly inside the friction cone.
            let (fx, fy) = (f[3 * foot], f[3 * foot + 1]);
            assert!(fz > 0.0);
            assert!(fx * fx + fy * fy < 0.49 * fz * fz);
        }
    }
    assert!(solver.is_current_solution_feasible());

    // Standing still: the stance barely moves.
    for i in 0..=20 {
        assert!(solver.solution(i).q.amax() < 1.0e-2);
    }
}
