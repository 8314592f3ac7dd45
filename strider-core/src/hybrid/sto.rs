//! Switching-time optimization bookkeeping.
//!
//! The gradient of the total Lagrangian with respect to an event time is the
//! jump of the stage Hamiltonian across the event: the stage before the event
//! grows with `ts` (`∂dt_pre/∂ts = 1`) while the event stage shrinks
//! (`∂dt_post/∂ts = -1`), so
//!
//! ```text
//! ∂L/∂ts = h(t_e⁻) − h(t_e⁺)
//! ```
//!
//! with `h` the Hamiltonian accumulated per stage during linearization. At a
//! stationary switching time the Hamiltonian is continuous across the event.

use crate::kkt::{Direction, KktResidual};

use super::contact_sequence::ContactSequence;
use super::discretization::TimeDiscretization;

/// Hamiltonian jump across the `impulse_index`-th impulse event.
pub fn impulse_hamiltonian_jump(
    discretization: &TimeDiscretization,
    kkt_residual: &KktResidual,
    impulse_index: usize,
) -> f64 {
    let pre = discretization.time_stage_before_impulse(impulse_index);
    kkt_residual[pre].h - kkt_residual.aux[impulse_index].h
}

/// Hamiltonian jump across the `lift_index`-th lift event.
pub fn lift_hamiltonian_jump(
    discretization: &TimeDiscretization,
    kkt_residual: &KktResidual,
    lift_index: usize,
) -> f64 {
    let pre = discretization.time_stage_before_lift(lift_index);
    kkt_residual[pre].h - kkt_residual.lift[lift_index].h
}

/// Max-abs Hamiltonian jump over the STO-enabled events. Zero when no event
/// has switching-time optimization on.
pub fn sto_kkt_error(discretization: &TimeDiscretization, kkt_residual: &KktResidual) -> f64 {
    let mut err: f64 = 0.0;
    for i in 0..discretization.n_impulse() {
        if discretization.is_sto_enabled_impulse(i) {
            err = err.max(impulse_hamiltonian_jump(discretization, kkt_residual, i).abs());
        }
    }
    for l in 0..discretization.n_lift() {
        if discretization.is_sto_enabled_lift(l) {
            err = err.max(lift_hamiltonian_jump(discretization, kkt_residual, l).abs());
        }
    }
    err
}

/// Applies the switching-time directions to the contact sequence:
/// `ts ← ts + α·dts` for every STO-enabled event. Driver-thread only,
/// between iterations.
pub fn integrate_event_times(
    contact_sequence: &mut ContactSequence,
    discretization: &TimeDiscretization,
    direction: &Direction,
    step: f64,
) {
    for i in 0..discretization.n_impulse() {
        if discretization.is_sto_enabled_impulse(i) {
            let ts = contact_sequence.impulse_time(i);
            contact_sequence.set_impulse_time(i, ts + step * direction.impulse[i].dts);
        }
    }
    for l in 0..discretization.n_lift() {
        if discretization.is_sto_enabled_lift(l) {
            let ts = contact_sequence.lift_time(l);
            contact_sequence.set_lift_time(l, ts + step * direction.lift[l].dts);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kkt::KktResidual;
    use crate::robot::{ContactStatus, LinearChainModel};

    #[test]
    fn test_hamiltonian_jump_reads_pre_and_aux() {
        let robot = LinearChainModel::new(3).add_contact([0, 1, 2], [0.0; 3]);
        let mut seq = ContactSequence::new(ContactStatus::from_active(&[false]), 2);
        seq.push(ContactStatus::from_active(&[true]), 0.23, true);
        let mut disc = TimeDiscretization::new(0.5, 10, 2);
        disc.discretize(&seq, 0.0);

        let mut res = KktResidual::new(&robot, 10, 2);
        let pre = disc.time_stage_before_impulse(0);
        res[pre].h = 1.5;
        res.aux[0].h = 1.1;
        assert!((impulse_hamiltonian_jump(&disc, &res, 0) - 0.4).abs() < 1e-15);
        assert!((sto_kkt_error(&disc, &res) - 0.4).abs() < 1e-15);
    }

    #[test]
    fn test_integrate_event_times_scales_direction() {
        let robot = LinearChainModel::new(3).add_contact([0, 1, 2], [0.0; 3]);
        let mut seq = ContactSequence::new(ContactStatus::from_active(&[false]), 2);
        seq.push(ContactStatus::from_active(&[true]), 0.23, true);
        let mut disc = TimeDiscretization::new(0.5, 10, 2);
        disc.discretize(&seq, 0.0);

        let mut d = crate::kkt::Direction::new(&robot, 10, 2);
        d.impulse[0].dts = 0.1;
        integrate_event_times(&mut seq, &disc, &d, 0.5);
        assert!((seq.impulse_time(0) - 0.28).abs() < 1e-15);
    }
}
