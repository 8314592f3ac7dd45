//! User-supplied sequence of contact phases and discrete events.
//!
//! The sequence starts from an initial contact status; each pushed event
//! switches to a new status at a given time. A contact *make* is an impulse
//! event, a contact *break* a lift event. Event times may be moved by the
//! driver between iterations (switching-time optimization); the ordering
//! invariant `t_0 < t_1 < … < t_{E-1}` is the caller's responsibility and is
//! re-checked by the discretizer.

use std::fmt;

use crate::robot::{ContactStatus, ImpulseStatus};

/// Kind of a discrete contact event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscreteEventType {
    /// A contact is made; the velocity jumps through the impulse dynamics.
    Impulse,
    /// A contact is broken; the state stays continuous.
    Lift,
}

#[derive(Debug, Clone)]
struct DiscreteEvent {
    kind: DiscreteEventType,
    time: f64,
    /// Contacts newly activated by this event (impulse events only).
    impulse_status: ImpulseStatus,
    sto: bool,
}

/// Ordered list of contact phases and the events separating them.
#[derive(Debug, Clone)]
pub struct ContactSequence {
    phases: Vec<ContactStatus>,
    events: Vec<DiscreteEvent>,
    max_events: usize,
}

impl ContactSequence {
    /// Sequence starting in `initial_status` with capacity for `max_events`
    /// discrete events.
    pub fn new(initial_status: ContactStatus, max_events: usize) -> Self {
        let mut phases = Vec::with_capacity(max_events + 1);
        phases.push(initial_status);
        Self {
            phases,
            events: Vec::with_capacity(max_events),
            max_events,
        }
    }

    /// Appends an event switching to `status` at `time`.
    ///
    /// The event kind is derived from the activation delta against the last
    /// phase: any newly active contact makes it an impulse, otherwise it is a
    /// lift. Events must be pushed in strictly increasing time order.
    ///
    /// # Panics
    ///
    /// Panics if the capacity is exhausted, the time ordering is violated, or
    /// `status` equals the previous phase (no discrete event).
    pub fn push(&mut self, status: ContactStatus, time: f64, sto: bool) {
        assert!(
            self.events.len() < self.max_events,
            "contact sequence capacity exhausted"
        );
        if let Some(last) = self.events.last() {
            assert!(time > last.time, "event times must be strictly increasing");
        }
        let prev = self.phases.last().expect("sequence has an initial phase");
        assert_eq!(prev.max_num_contacts(), status.max_num_contacts());

        let mut impulse_active = vec![false; status.max_num_contacts()];
        let mut makes = false;
        let mut breaks = false;
        for i in 0..status.max_num_contacts() {
            if status.is_contact_active(i) && !prev.is_contact_active(i) {
                impulse_active[i] = true;
                makes = true;
            } else if !status.is_contact_active(i) && prev.is_contact_active(i) {
                breaks = true;
            }
        }
        assert!(makes || breaks, "pushed status equals the previous phase");

        let kind = if makes {
            DiscreteEventType::Impulse
        } else {
            DiscreteEventType::Lift
        };
        self.events.push(DiscreteEvent {
            kind,
            time,
            impulse_status: ImpulseStatus::from_active(&impulse_active),
            sto,
        });
        self.phases.push(status);
    }

    /// Number of contact phases (`num_events() + 1`).
    pub fn num_phases(&self) -> usize {
        self.phases.len()
    }

    /// Total number of discrete events.
    pub fn num_events(&self) -> usize {
        self.events.len()
    }

    /// Number of impulse events.
    pub fn num_impulse_events(&self) -> usize {
        self.events
            .iter()
            .filter(|e| e.kind == DiscreteEventType::Impulse)
            .count()
    }

    /// Number of lift events.
    pub fn num_lift_events(&self) -> usize {
        self.events
            .iter()
            .filter(|e| e.kind == DiscreteEventType::Lift)
            .count()
    }

    /// Reserved number of events.
    pub fn max_events(&self) -> usize {
        self.max_events
    }

    /// Contact status held during `phase`.
    pub fn contact_status(&self, phase: usize) -> &ContactStatus {
        &self.phases[phase]
    }

    /// Newly activated contacts of the `impulse_index`-th impulse event.
    pub fn impulse_status(&self, impulse_index: usize) -> &ImpulseStatus {
        &self.events[self.event_index_of_impulse(impulse_index)].impulse_status
    }

    /// Kind of the `event_index`-th event.
    pub fn event_type(&self, event_index: usize) -> DiscreteEventType {
        self.events[event_index].kind
    }

    /// Time of the `event_index`-th event.
    pub fn event_time(&self, event_index: usize) -> f64 {
        self.events[event_index].time
    }

    /// Time of the `impulse_index`-th impulse event.
    pub fn impulse_time(&self, impulse_index: usize) -> f64 {
        self.events[self.event_index_of_impulse(impulse_index)].time
    }

    /// Time of the `lift_index`-th lift event.
    pub fn lift_time(&self, lift_index: usize) -> f64 {
        self.events[self.event_index_of_lift(lift_index)].time
    }

    /// Moves the `impulse_index`-th impulse event to `time`. Only the solver
    /// driver may call this, between iterations.
    pub fn set_impulse_time(&mut self, impulse_index: usize, time: f64) {
        let e = self.event_index_of_impulse(impulse_index);
        self.events[e].time = time;
    }

    /// Moves the `lift_index`-th lift event to `time`.
    pub fn set_lift_time(&mut self, lift_index: usize, time: f64) {
        let e = self.event_index_of_lift(lift_index);
        self.events[e].time = time;
    }

    /// Whether switching-time optimization is enabled for the
    /// `impulse_index`-th impulse event.
    pub fn is_sto_enabled_impulse(&self, impulse_index: usize) -> bool {
        self.events[self.event_index_of_impulse(impulse_index)].sto
    }

    /// Whether switching-time optimization is enabled for the
    /// `lift_index`-th lift event.
    pub fn is_sto_enabled_lift(&self, lift_index: usize) -> bool {
        self.events[self.event_index_of_lift(lift_index)].sto
    }

    /// Event index of the `impulse_index`-th impulse event.
    pub fn event_index_of_impulse(&self, impulse_index: usize) -> usize {
        self.events
            .iter()
            .enumerate()
            .filter(|(_, e)| e.kind == DiscreteEventType::Impulse)
            .nth(impulse_index)
            .map(|(i, _)| i)
            .expect("impulse index out of range")
    }

    /// Event index of the `lift_index`-th lift event.
    pub fn event_index_of_lift(&self, lift_index: usize) -> usize {
        self.events
            .iter()
            .enumerate()
            .filter(|(_, e)| e.kind == DiscreteEventType::Lift)
            .nth(lift_index)
            .map(|(i, _)| i)
            .expect("lift index out of range")
    }
}

impl fmt::Display for ContactSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "contact sequence: {} phases", self.num_phases())?;
        for (i, e) in self.events.iter().enumerate() {
            writeln!(
                f,
                "  event {}: {:?} at t = {:.6}{}",
                i,
                e.kind,
                e.time,
                if e.sto { " (sto)" } else { "" }
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(active: &[bool]) -> ContactStatus {
        ContactStatus::from_active(active)
    }

    #[test]
    fn test_event_kind_derivation() {
        let mut seq = ContactSequence::new(status(&[false, false]), 4);
        seq.push(status(&[true, false]), 0.2, false);
        seq.push(status(&[true, true]), 0.4, true);
        seq.push(status(&[false, true]), 0.6, false);

        assert_eq!(seq.num_impulse_events(), 2);
        assert_eq!(seq.num_lift_events(), 1);
        assert_eq!(seq.event_type(0), DiscreteEventType::Impulse);
        assert_eq!(seq.event_type(2), DiscreteEventType::Lift);
        assert!(seq.is_sto_enabled_impulse(1));
        assert!(!seq.is_sto_enabled_lift(0));

        // Impulse status carries only the newly activated contact.
        assert!(seq.impulse_status(1).is_contact_active(1));
        assert!(!seq.impulse_status(1).is_contact_active(0));
        assert_eq!(seq.impulse_status(1).dimf(), 3);
    }

    #[test]
    fn test_event_time_update() {
        let mut seq = ContactSequence::new(status(&[false]), 2);
        seq.push(status(&[true]), 0.25, true);
        assert_eq!(seq.impulse_time(0), 0.25);
        seq.set_impulse_time(0, 0.3);
        assert_eq!(seq.impulse_time(0), 0.3);
    }

    #[test]
    #[should_panic(expected = "strictly increasing")]
    fn test_rejects_unordered_events() {
        let mut seq = ContactSequence::new(status(&[false, false]), 4);
        seq.push(status(&[true, false]), 0.4, false);
        seq.push(status(&[true, true]), 0.3, false);
    }
}
