//! Time discretization of the hybrid horizon.
//!
//! Maps the event times of a [`ContactSequence`] onto a grid of `N` base
//! intervals. An impulse event splits the interval it falls into: the stage
//! before the event keeps `dt_pre = t_e − t_i`, an instantaneous impulse
//! stage sits at `t_e`, and an aux stage covers `dt_post = t_{i+1} − t_e`.
//! A lift event inserts a single lift stage covering `dt_post`.
//!
//! Two policies:
//!
//! - **Grid-based**: anchor points are the ideal uniform grid; events split
//!   whatever interval they fall into. The per-phase structure may change on
//!   every call.
//! - **Phase-based**: each contact phase keeps a fixed number of intervals;
//!   grid points are uniform within a phase and `mesh_refinement` moves
//!   intervals between phases as durations change, keeping the total count.

use std::fmt;

use super::contact_sequence::{ContactSequence, DiscreteEventType};
use super::grid_info::GridInfo;

/// Discretization policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DiscretizationMethod {
    /// Events split the ideal uniform grid.
    #[default]
    GridBased,
    /// Fixed interval count per contact phase.
    PhaseBased,
}

/// Event-aware discretization of the horizon `[t0, t0 + T]`.
#[derive(Debug, Clone)]
pub struct TimeDiscretization {
    horizon: f64,
    n_ideal: usize,
    dt_ideal: f64,
    eps: f64,
    method: DiscretizationMethod,
    t0: f64,
    grid: Vec<GridInfo>,
    contact_phase: Vec<usize>,
    impulse_index_after: Vec<Option<usize>>,
    lift_index_after: Vec<Option<usize>>,
    grid_impulse: Vec<GridInfo>,
    grid_aux: Vec<GridInfo>,
    grid_lift: Vec<GridInfo>,
    time_stage_before_impulse: Vec<usize>,
    time_stage_before_lift: Vec<usize>,
    sto_impulse: Vec<bool>,
    sto_lift: Vec<bool>,
    event_types: Vec<DiscreteEventType>,
    n_phase: Vec<usize>,
    tractable: bool,
}

impl TimeDiscretization {
    /// Discretization of a horizon of length `horizon` into `n` base
    /// intervals, with capacity for `max_events` discrete events.
    pub fn new(horizon: f64, n: usize, max_events: usize) -> Self {
        assert!(horizon > 0.0, "horizon must be positive");
        assert!(n > 0, "grid size must be positive");
        let dt_ideal = horizon / n as f64;
        Self {
            horizon,
            n_ideal: n,
            dt_ideal,
            eps: f64::EPSILON.sqrt(),
            method: DiscretizationMethod::GridBased,
            t0: 0.0,
            grid: vec![GridInfo::default(); n + 1],
            contact_phase: vec![0; n + 1],
            impulse_index_after: vec![None; n + 1],
            lift_index_after: vec![None; n + 1],
            grid_impulse: Vec::with_capacity(max_events),
            grid_aux: Vec::with_capacity(max_events),
            grid_lift: Vec::with_capacity(max_events),
            time_stage_before_impulse: Vec::with_capacity(max_events),
            time_stage_before_lift: Vec::with_capacity(max_events),
            sto_impulse: Vec::with_capacity(max_events),
            sto_lift: Vec::with_capacity(max_events),
            event_types: Vec::with_capacity(max_events),
            n_phase: Vec::new(),
            tractable: false,
        }
    }

    /// Selects the discretization policy. Any per-phase structure from a
    /// previous policy is discarded.
    pub fn set_discretization_method(&mut self, method: DiscretizationMethod) {
        if self.method != method {
            self.n_phase.clear();
        }
        self.method = method;
    }

    /// Current discretization policy.
    pub fn discretization_method(&self) -> DiscretizationMethod {
        self.method
    }

    /// Number of base grid intervals.
    pub fn n(&self) -> usize {
        self.n_ideal
    }

    /// Number of impulse events on the horizon.
    pub fn n_impulse(&self) -> usize {
        self.grid_impulse.len()
    }

    /// Number of lift events on the horizon.
    pub fn n_lift(&self) -> usize {
        self.grid_lift.len()
    }

    /// Initial time of the horizon.
    pub fn t0(&self) -> f64 {
        self.t0
    }

    /// Final time of the horizon.
    pub fn tf(&self) -> f64 {
        self.t0 + self.horizon
    }

    /// Ideal (uniform) time step.
    pub fn dt_ideal(&self) -> f64 {
        self.dt_ideal
    }

    /// Maximum time step over the horizon.
    pub fn dt_max(&self) -> f64 {
        let grid_max = self.grid.iter().map(|g| g.dt).fold(0.0_f64, f64::max);
        let aux_max = self.grid_aux.iter().map(|g| g.dt).fold(0.0_f64, f64::max);
        let lift_max = self.grid_lift.iter().map(|g| g.dt).fold(0.0_f64, f64::max);
        grid_max.max(aux_max).max(lift_max)
    }

    /// Metadata of regular grid stage `i` (`0..=N`).
    pub fn grid_info(&self, i: usize) -> &GridInfo {
        &self.grid[i]
    }

    /// Metadata of the `impulse_index`-th impulse stage.
    pub fn grid_info_impulse(&self, impulse_index: usize) -> &GridInfo {
        &self.grid_impulse[impulse_index]
    }

    /// Metadata of the `impulse_index`-th aux stage.
    pub fn grid_info_aux(&self, impulse_index: usize) -> &GridInfo {
        &self.grid_aux[impulse_index]
    }

    /// Metadata of the `lift_index`-th lift stage.
    pub fn grid_info_lift(&self, lift_index: usize) -> &GridInfo {
        &self.grid_lift[lift_index]
    }

    /// Contact phase of grid stage `i`.
    pub fn contact_phase(&self, i: usize) -> usize {
        self.contact_phase[i]
    }

    /// Contact phase entered after the `impulse_index`-th impulse.
    pub fn contact_phase_after_impulse(&self, impulse_index: usize) -> usize {
        self.grid_impulse[impulse_index].phase
    }

    /// Contact phase entered after the `lift_index`-th lift.
    pub fn contact_phase_after_lift(&self, lift_index: usize) -> usize {
        self.grid_lift[lift_index].phase
    }

    /// Impulse index of the event inside stage `i`'s interval, if any.
    pub fn impulse_index_after(&self, i: usize) -> Option<usize> {
        self.impulse_index_after[i]
    }

    /// Lift index of the event inside stage `i`'s interval, if any.
    pub fn lift_index_after(&self, i: usize) -> Option<usize> {
        self.lift_index_after[i]
    }

    /// Grid stage whose interval contains the `impulse_index`-th impulse.
    pub fn time_stage_before_impulse(&self, impulse_index: usize) -> usize {
        self.time_stage_before_impulse[impulse_index]
    }

    /// Grid stage whose interval contains the `lift_index`-th lift.
    pub fn time_stage_before_lift(&self, lift_index: usize) -> usize {
        self.time_stage_before_lift[lift_index]
    }

    /// Whether stage `i`'s interval ends at an impulse event.
    pub fn is_stage_before_impulse(&self, i: usize) -> bool {
        self.impulse_index_after[i].is_some()
    }

    /// Whether stage `i`'s interval ends at a lift event.
    pub fn is_stage_before_lift(&self, i: usize) -> bool {
        self.lift_index_after[i].is_some()
    }

    /// Whether switching-time optimization is enabled for the
    /// `impulse_index`-th impulse.
    pub fn is_sto_enabled_impulse(&self, impulse_index: usize) -> bool {
        self.sto_impulse[impulse_index]
    }

    /// Whether switching-time optimization is enabled for the
    /// `lift_index`-th lift.
    pub fn is_sto_enabled_lift(&self, lift_index: usize) -> bool {
        self.sto_lift[lift_index]
    }

    /// Kinds of the discrete events, in time order.
    pub fn event_types(&self) -> &[DiscreteEventType] {
        &self.event_types
    }

    /// Number of grid intervals assigned to each contact phase
    /// (phase-based policy).
    pub fn n_phase(&self) -> &[usize] {
        &self.n_phase
    }

    /// Whether the discretization produced by the last `discretize` call is
    /// numerically workable: every interval longer than `ε`, events strictly
    /// ordered and strictly inside their intervals.
    pub fn is_formulation_tractable(&self) -> bool {
        self.tractable
    }

    /// Whether every event time lies strictly inside the horizon and the
    /// event ordering is intact, with margin `ε`.
    pub fn is_switching_time_consistent(&self, contact_sequence: &ContactSequence) -> bool {
        let mut prev = self.t0;
        for e in 0..contact_sequence.num_events() {
            let t = contact_sequence.event_time(e);
            if t <= prev + self.eps || t >= self.tf() - self.eps {
                return false;
            }
            prev = t;
        }
        true
    }

    /// Discretizes the horizon starting at `t`, placing the events of
    /// `contact_sequence` onto the grid.
    pub fn discretize(&mut self, contact_sequence: &ContactSequence, t: f64) {
        self.t0 = t;
        match self.method {
            DiscretizationMethod::GridBased => self.discretize_grid_based(contact_sequence),
            DiscretizationMethod::PhaseBased => {
                let num_phases = contact_sequence.num_phases();
                if self.n_phase.len() != num_phases {
                    self.count_phase_grids(contact_sequence);
                }
                self.discretize_phase_based(contact_sequence);
            }
        }
    }

    /// Rebalances the per-phase interval counts from the current phase
    /// durations and rebuilds the grid. No-op under the grid-based policy.
    pub fn mesh_refinement(&mut self, contact_sequence: &ContactSequence, t: f64) {
        if self.method != DiscretizationMethod::PhaseBased {
            return;
        }
        self.t0 = t;
        self.count_phase_grids(contact_sequence);
        self.discretize_phase_based(contact_sequence);
    }

    fn clear_events(&mut self) {
        self.grid_impulse.clear();
        self.grid_aux.clear();
        self.grid_lift.clear();
        self.time_stage_before_impulse.clear();
        self.time_stage_before_lift.clear();
        self.sto_impulse.clear();
        self.sto_lift.clear();
        self.event_types.clear();
        for i in 0..=self.n_ideal {
            self.impulse_index_after[i] = None;
            self.lift_index_after[i] = None;
            self.contact_phase[i] = 0;
        }
    }

    fn discretize_grid_based(&mut self, seq: &ContactSequence) {
        self.clear_events();
        let n = self.n_ideal;
        let dt = self.dt_ideal;
        let anchor = |k: usize| self.t0 + k as f64 * dt;

        // Assign each event to the interval containing it.
        let mut tractable = self.is_switching_time_consistent(seq);
        let mut interval_of_event = Vec::with_capacity(seq.num_events());
        let mut last_interval: Option<usize> = None;
        for e in 0..seq.num_events() {
            let te = seq.event_time(e);
            let k = (((te - self.t0) / dt).floor() as usize).min(n - 1);
            if te <= anchor(k) + self.eps || te >= anchor(k + 1) - self.eps {
                tractable = false;
            }
            if last_interval == Some(k) {
                tractable = false;
            }
            last_interval = Some(k);
            interval_of_event.push(k);
        }

        // Phases advance after each event's interval.
        for i in 0..=n {
            self.contact_phase[i] = interval_of_event.iter().filter(|&&k| k < i).count();
        }
        for i in 0..=n {
            self.grid[i] = GridInfo::new(anchor(i), if i < n { dt } else { 0.0 }, self.contact_phase[i]);
        }

        let mut impulse_index = 0;
        let mut lift_index = 0;
        for e in 0..seq.num_events() {
            let k = interval_of_event[e];
            let te = seq.event_time(e);
            let dt_pre = te - anchor(k);
            let dt_post = anchor(k + 1) - te;
            let phase_after = self.contact_phase[k] + 1;
            let kind = seq.event_type(e);
            self.event_types.push(kind);
            self.grid[k].dt = dt_pre;
            match kind {
                DiscreteEventType::Impulse => {
                    let sto = seq.is_sto_enabled_impulse(impulse_index);
                    self.grid[k].sto = sto;
                    let mut gi = GridInfo::new(te, 0.0, phase_after);
                    gi.sto = sto;
                    let mut ga = GridInfo::new(te, dt_post, phase_after);
                    ga.sto = sto;
                    self.grid_impulse.push(gi);
                    self.grid_aux.push(ga);
                    self.time_stage_before_impulse.push(k);
                    self.impulse_index_after[k] = Some(impulse_index);
                    self.sto_impulse.push(sto);
                    impulse_index += 1;
                }
                DiscreteEventType::Lift => {
                    let sto = seq.is_sto_enabled_lift(lift_index);
                    self.grid[k].sto = sto;
                    let mut gl = GridInfo::new(te, dt_post, phase_after);
                    gl.sto = sto;
                    self.grid_lift.push(gl);
                    self.time_stage_before_lift.push(k);
                    self.lift_index_after[k] = Some(lift_index);
                    self.sto_lift.push(sto);
                    lift_index += 1;
                }
            }
        }

        self.n_phase = vec![0; seq.num_phases()];
        for i in 0..n {
            self.n_phase[self.contact_phase[i]] += 1;
        }
        self.tractable = tractable && self.all_intervals_positive();
    }

    /// Distributes `N + E` intervals over the phases in proportion to their
    /// durations, at least one for phase 0 and two for every later phase
    /// (the event stage plus one regular stage).
    fn count_phase_grids(&mut self, seq: &ContactSequence) {
        let num_phases = seq.num_phases();
        let e = seq.num_events();
        let total = self.n_ideal + e;
        let mut boundaries = Vec::with_capacity(num_phases + 1);
        boundaries.push(self.t0);
        for k in 0..e {
            boundaries.push(seq.event_time(k));
        }
        boundaries.push(self.tf());

        let mut counts = vec![0usize; num_phases];
        let mut assigned = 0;
        for p in 0..num_phases {
            let duration = (boundaries[p + 1] - boundaries[p]).max(0.0);
            let ideal = (total as f64 * duration / self.horizon).round() as usize;
            let floor = if p == 0 { 1 } else { 2 };
            counts[p] = ideal.max(floor);
            assigned += counts[p];
        }
        // Rebalance to hit the exact total, never dipping below the floors.
        while assigned > total {
            if let Some(p) = (0..num_phases)
                .filter(|&p| counts[p] > if p == 0 { 1 } else { 2 })
                .max_by_key(|&p| counts[p])
            {
                counts[p] -= 1;
                assigned -= 1;
            } else {
                break;
            }
        }
        while assigned < total {
            let p = (0..num_phases).max_by(|&a, &b| {
                let da = (boundaries[a + 1] - boundaries[a]) / counts[a] as f64;
                let db = (boundaries[b + 1] - boundaries[b]) / counts[b] as f64;
                da.partial_cmp(&db).unwrap()
            });
            counts[p.unwrap()] += 1;
            assigned += 1;
        }
        self.n_phase = counts;
    }

    fn discretize_phase_based(&mut self, seq: &ContactSequence) {
        // Snapshot the per-phase counts before clearing.
        let counts = self.n_phase.clone();
        self.clear_events();
        self.n_phase = counts;
        let num_phases = seq.num_phases();
        let mut tractable = self.is_switching_time_consistent(seq)
            && self.n_phase.len() == num_phases
            && self.n_phase.iter().enumerate().all(|(p, &c)| c >= if p == 0 { 1 } else { 2 });
        if !tractable {
            self.tractable = false;
            return;
        }

        let mut boundaries = Vec::with_capacity(num_phases + 1);
        boundaries.push(self.t0);
        for k in 0..seq.num_events() {
            boundaries.push(seq.event_time(k));
        }
        boundaries.push(self.tf());

        let mut stage = 0;
        let mut impulse_index = 0;
        let mut lift_index = 0;
        for p in 0..num_phases {
            let dt_p = (boundaries[p + 1] - boundaries[p]) / self.n_phase[p] as f64;
            if dt_p <= self.eps {
                tractable = false;
            }
            // The event stage carries the first interval of phases p >= 1.
            let regular = if p == 0 {
                self.n_phase[p]
            } else {
                self.n_phase[p] - 1
            };
            let mut t_start = boundaries[p];
            if p >= 1 {
                let kind = seq.event_type(p - 1);
                self.event_types.push(kind);
                // The previous phase's last stage ends at the event.
                let pre_stage = stage - 1;
                match kind {
                    DiscreteEventType::Impulse => {
                        let sto = seq.is_sto_enabled_impulse(impulse_index);
                        self.grid[pre_stage].sto = sto;
                        let mut gi = GridInfo::new(boundaries[p], 0.0, p);
                        gi.sto = sto;
                        let mut ga = GridInfo::new(boundaries[p], dt_p, p);
                        ga.sto = sto;
                        self.grid_impulse.push(gi);
                        self.grid_aux.push(ga);
                        self.time_stage_before_impulse.push(pre_stage);
                        self.impulse_index_after[pre_stage] = Some(impulse_index);
                        self.sto_impulse.push(sto);
                        impulse_index += 1;
                    }
                    DiscreteEventType::Lift => {
                        let sto = seq.is_sto_enabled_lift(lift_index);
                        self.grid[pre_stage].sto = sto;
                        let mut gl = GridInfo::new(boundaries[p], dt_p, p);
                        gl.sto = sto;
                        self.grid_lift.push(gl);
                        self.time_stage_before_lift.push(pre_stage);
                        self.lift_index_after[pre_stage] = Some(lift_index);
                        self.sto_lift.push(sto);
                        lift_index += 1;
                    }
                }
                t_start += dt_p;
            }
            for k in 0..regular {
                self.contact_phase[stage] = p;
                self.grid[stage] = GridInfo::new(t_start + k as f64 * dt_p, dt_p, p);
                stage += 1;
            }
        }
        debug_assert_eq!(stage, self.n_ideal);
        self.contact_phase[self.n_ideal] = num_phases - 1;
        self.grid[self.n_ideal] = GridInfo::new(self.tf(), 0.0, num_phases - 1);
        self.tractable = tractable && self.all_intervals_positive();
    }

    fn all_intervals_positive(&self) -> bool {
        let ok_grid = self.grid[..self.n_ideal].iter().all(|g| g.dt > self.eps);
        let ok_aux = self.grid_aux.iter().all(|g| g.dt > self.eps);
        let ok_lift = self.grid_lift.iter().all(|g| g.dt > self.eps);
        ok_grid && ok_aux && ok_lift
    }
}

impl fmt::Display for TimeDiscretization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "discretization: N = {}, impulses = {}, lifts = {}, t ∈ [{:.4}, {:.4}]",
            self.n_ideal,
            self.n_impulse(),
            self.n_lift(),
            self.t0(),
            self.tf()
        )?;
        for i in 0..=self.n_ideal {
            let g = &self.grid[i];
            write!(
                f,
                "  stage {:3}: t = {:.6}, dt = {:.6}, phase = {}",
                i, g.t, g.dt, g.phase
            )?;
            if let Some(imp) = self.impulse_index_after[i] {
                write!(f, " -> impulse {}", imp)?;
            }
            if let Some(l) = self.lift_index_after[i] {
                write!(f, " -> lift {}", l)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::robot::ContactStatus;

    fn sequence_with_impulse(t_imp: f64) -> ContactSequence {
        let mut seq = ContactSequence::new(ContactStatus::from_active(&[false]), 2);
        seq.push(ContactStatus::from_active(&[true]), t_imp, false);
        seq
    }

    #[test]
    fn test_uniform_grid_without_events() {
        let seq = ContactSequence::new(ContactStatus::from_active(&[false]), 1);
        let mut disc = TimeDiscretization::new(1.0, 10, 1);
        disc.discretize(&seq, 0.0);
        assert!(disc.is_formulation_tractable());
        assert_eq!(disc.n(), 10);
        assert_eq!(disc.n_impulse(), 0);
        for i in 0..10 {
            assert!((disc.grid_info(i).dt - 0.1).abs() < 1e-12);
            assert_eq!(disc.contact_phase(i), 0);
        }
        assert_eq!(disc.grid_info(10).dt, 0.0);
    }

    #[test]
    fn test_impulse_strictly_inside_interval() {
        let seq = sequence_with_impulse(0.23);
        let mut disc = TimeDiscretization::new(0.5, 10, 2);
        disc.discretize(&seq, 0.0);
        assert!(disc.is_formulation_tractable());

        let k = disc.time_stage_before_impulse(0);
        assert_eq!(k, 4); // interval [0.20, 0.25)
        assert!((disc.grid_info(k).dt - 0.03).abs() < 1e-12); // dt_pre
        assert!((disc.grid_info_aux(0).dt - 0.02).abs() < 1e-12); // dt_post
        assert_eq!(disc.grid_info_impulse(0).dt, 0.0);
        assert!(disc.is_stage_before_impulse(k));
        assert_eq!(disc.impulse_index_after(k), Some(0));

        // Phase advances after the event interval.
        assert_eq!(disc.contact_phase(k), 0);
        assert_eq!(disc.contact_phase(k + 1), 1);
        assert_eq!(disc.contact_phase_after_impulse(0), 1);
    }

    #[test]
    fn test_event_on_anchor_is_intractable() {
        let seq = sequence_with_impulse(0.25);
        let mut disc = TimeDiscretization::new(0.5, 10, 2);
        disc.discretize(&seq, 0.0);
        assert!(!disc.is_formulation_tractable());
    }

    #[test]
    fn test_colliding_events_are_intractable() {
        let mut seq = ContactSequence::new(ContactStatus::from_active(&[false, false]), 2);
        seq.push(ContactStatus::from_active(&[true, false]), 0.221, false);
        seq.push(ContactStatus::from_active(&[true, true]), 0.222, false);
        let mut disc = TimeDiscretization::new(0.5, 10, 2);
        disc.discretize(&seq, 0.0);
        // Both events land in the same interval [0.20, 0.25).
        assert!(!disc.is_formulation_tractable());
    }

    #[test]
    fn test_phase_based_keeps_totals() {
        let seq = sequence_with_impulse(0.23);
        let mut disc = TimeDiscretization::new(0.5, 10, 2);
        disc.set_discretization_method(DiscretizationMethod::PhaseBased);
        disc.discretize(&seq, 0.0);
        assert!(disc.is_formulation_tractable());
        // N + E intervals distributed over the phases.
        assert_eq!(disc.n_phase().iter().sum::<usize>(), 11);
        assert_eq!(disc.n_impulse(), 1);

        // Regular stage count stays N; the last grid point is the terminal.
        assert!((disc.grid_info(10).t - 0.5).abs() < 1e-12);
        assert_eq!(disc.grid_info(10).dt, 0.0);

        // The pre-impulse stage ends exactly at the event time.
        let k = disc.time_stage_before_impulse(0);
        let g = disc.grid_info(k);
        assert!((g.t + g.dt - 0.23).abs() < 1e-12);
        assert!((disc.grid_info_aux(0).t - 0.23).abs() < 1e-12);
    }

    #[test]
    fn test_mesh_refinement_rebalances() {
        let mut seq = sequence_with_impulse(0.1);
        let mut disc = TimeDiscretization::new(0.5, 10, 2);
        disc.set_discretization_method(DiscretizationMethod::PhaseBased);
        disc.discretize(&seq, 0.0);
        let before = disc.n_phase().to_vec();

        // Move the event late and refine: intervals must migrate to phase 0.
        seq.set_impulse_time(0, 0.4);
        disc.mesh_refinement(&seq, 0.0);
        let after = disc.n_phase().to_vec();
        assert_eq!(after.iter().sum::<usize>(), before.iter().sum::<usize>());
        assert!(after[0] > before[0]);
    }
}
