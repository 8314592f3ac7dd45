//! Minimal end-to-end usage: swing a torque-limited joint down to zero.

use std::sync::Arc;

use nalgebra::DVector;
use strider_core::{
    ContactSequence, ContactStatus, Constraints, JointTorquesLowerLimit, JointTorquesUpperLimit,
    LinearChainModel, Ocp, OcpSolver, QuadraticCost, SolverOptions,
};

fn main() {
    let robot = LinearChainModel::new(1);
    let cost = Arc::new(
        QuadraticCost::new(&robot)
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
        verbose: true,
        ..Default::default()
    };
    let mut solver = OcpSolver::new(ocp, sequence, options).expect("solver construction");

    let q0 = DVector::from_row_slice(&[2.0]);
    let v0 = DVector::from_row_slice(&[0.0]);
    let stats = solver.solve(0.0, &q0, &v0);
    println!("{}", stats);

    for i in (0..=20).step_by(5) {
        let s = solver.solution(i);
        println!(
            "stage {:2}: q = {:+.4}, v = {:+.4}, u = {:+.4}",
            i,
            s.q[0],
            s.v[0],
            if i < 20 { s.u[0] } else { f64::NAN }
        );
    }
}
