//! Solver driver: Newton iterations over the event-aware grid.
//!
//! One iteration alternates parallel and serial phases:
//!
//! 1. linearize every stage in parallel (one work unit per stage, writes go
//!    to disjoint stage slots, a `Robot` clone per worker thread),
//! 2. backward Riccati sweep (serial),
//! 3. forward Riccati sweep (serial),
//! 4. expand slack/dual and multiplier directions, collect step-size limits
//!    (parallel),
//! 5. filter line search (serial control, parallel merit evaluation),
//! 6. apply the primal/dual steps and the switching-time updates,
//! 7. convergence test on the l∞ KKT error.
//!
//! Every exit path is reported through [`SolverStatistics`]; the iteration
//! loop never panics and never returns `Err`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use tracing::debug;

use crate::constraints::Constraints;
use crate::cost::CostFunction;
use crate::hybrid::{sto, ContactSequence, TimeDiscretization};
use crate::kkt::{Direction, KktMatrix, KktResidual, Solution, SplitSolution};
use crate::line_search::Filter;
use crate::ocp::{ImpulseSplitOcp, SplitOcp, SwitchingContext, TerminalOcp};
use crate::problem::{
    IterationRecord, OcpKind, SolveStatus, SolverBuildError, SolverOptions, SolverStatistics,
};
use crate::riccati::{RiccatiFactorization, RiccatiFactorizer, RiccatiRecursion};
use crate::robot::RobotModel;

/// Definition of the hybrid optimal control problem.
pub struct Ocp<R> {
    /// Robot model (cloned per worker thread at construction).
    pub robot: R,
    /// Cost functional, shared and immutable.
    pub cost: Arc<dyn CostFunction>,
    /// Inequality constraints of the regular stages.
    pub constraints: Constraints,
    /// Inequality constraints of the impulse stages.
    pub impulse_constraints: Constraints,
    /// Horizon length `T`.
    pub horizon: f64,
    /// Number of base grid intervals `N`.
    pub n: usize,
}

/// Hybrid direct-multiple-shooting solver.
pub struct OcpSolver<R: RobotModel + Clone + Send + Sync> {
    robot: R,
    contact_sequence: ContactSequence,
    discretization: TimeDiscretization,
    options: SolverOptions,
    pool: rayon::ThreadPool,
    n: usize,
    workers: Vec<SplitOcp>,
    terminal: TerminalOcp,
    impulse_workers: Vec<ImpulseSplitOcp>,
    aux_workers: Vec<SplitOcp>,
    lift_workers: Vec<SplitOcp>,
    s: Solution,
    trial_s: Solution,
    d: Direction,
    kkt_matrix: KktMatrix,
    kkt_residual: KktResidual,
    trial_residual: KktResidual,
    factorization: RiccatiFactorization,
    riccati: RiccatiRecursion,
    filter: Filter,
    stats: SolverStatistics,
    barrier: f64,
    constraints_initialized: bool,
}

/// Index of the stage following grid stage `i` in the shooting chain.
#[derive(Clone, Copy)]
enum NextStage {
    Grid(usize),
    Impulse(usize),
    Lift(usize),
}

fn next_of(disc: &TimeDiscretization, i: usize) -> NextStage {
    if let Some(imp) = disc.impulse_index_after(i) {
        NextStage::Impulse(imp)
    } else if let Some(l) = disc.lift_index_after(i) {
        NextStage::Lift(l)
    } else {
        NextStage::Grid(i + 1)
    }
}

fn next_solution<'a>(s: &'a Solution, disc: &TimeDiscretization, i: usize) -> &'a SplitSolution {
    match next_of(disc, i) {
        NextStage::Grid(j) => &s.grid[j],
        NextStage::Impulse(imp) => &s.impulse[imp],
        NextStage::Lift(l) => &s.lift[l],
    }
}

/// Configuration of the predecessor of grid stage `i` (the stage's own
/// configuration at `i = 0`).
fn prev_config<'a>(s: &'a Solution, disc: &TimeDiscretization, i: usize) -> &'a DVector<f64> {
    if i == 0 {
        return &s.grid[0].q;
    }
    match next_of(disc, i - 1) {
        NextStage::Grid(_) => &s.grid[i - 1].q,
        NextStage::Impulse(imp) => &s.aux[imp].q,
        NextStage::Lift(l) => &s.lift[l].q,
    }
}

impl<R: RobotModel + Clone + Send + Sync> OcpSolver<R> {
    /// Builds the solver: allocates every stage array at the maximum contact
    /// dimension and spins up the worker thread pool. Fails on invalid
    /// dimensions or options; nothing here allocates after construction.
    pub fn new(
        ocp: Ocp<R>,
        contact_sequence: ContactSequence,
        options: SolverOptions,
    ) -> Result<Self, SolverBuildError> {
        if ocp.horizon <= 0.0 {
            return Err(SolverBuildError::NonPositiveHorizon);
        }
        if ocp.n == 0 {
            return Err(SolverBuildError::ZeroGrid);
        }
        options.validate()?;
        if contact_sequence.contact_status(0).max_num_contacts() != ocp.robot.max_num_contacts() {
            return Err(SolverBuildError::DimensionMismatch {
                expected: ocp.robot.max_num_contacts(),
                actual: contact_sequence.contact_status(0).max_num_contacts(),
            });
        }
        if options.kind == OcpKind::Unconstrained
            && (ocp.robot.has_floating_base()
                || ocp.robot.max_num_contacts() > 0
                || contact_sequence.max_events() > 0)
        {
            return Err(SolverBuildError::NotUnconstrained);
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(options.nthreads)
            .build()
            .map_err(|e| SolverBuildError::ThreadPool(e.to_string()))?;

        let robot = ocp.robot;
        let n = ocp.n;
        let max_events = contact_sequence.max_events();
        let mut discretization = TimeDiscretization::new(ocp.horizon, n, max_events);
        discretization.set_discretization_method(options.discretization);

        let workers = (0..n)
            .map(|_| SplitOcp::new(&robot, ocp.cost.clone(), ocp.constraints.clone()))
            .collect();
        let aux_workers = (0..max_events)
            .map(|_| SplitOcp::new(&robot, ocp.cost.clone(), ocp.constraints.clone()))
            .collect();
        let lift_workers = (0..max_events)
            .map(|_| SplitOcp::new(&robot, ocp.cost.clone(), ocp.constraints.clone()))
            .collect();
        let impulse_workers = (0..max_events)
            .map(|_| {
                ImpulseSplitOcp::new(&robot, ocp.cost.clone(), ocp.impulse_constraints.clone())
            })
            .collect();
        let terminal = TerminalOcp::new(&robot, ocp.cost.clone());

        let riccati = RiccatiRecursion::new(
            &robot,
            n,
            max_events,
            options.regularization,
            options.sto_regularization,
        );

        Ok(Self {
            contact_sequence,
            discretization,
            pool,
            n,
            workers,
            terminal,
            impulse_workers,
            aux_workers,
            lift_workers,
            s: Solution::new(&robot, n, max_events),
            trial_s: Solution::new(&robot, n, max_events),
            d: Direction::new(&robot, n, max_events),
            kkt_matrix: KktMatrix::new(&robot, n, max_events),
            kkt_residual: KktResidual::new(&robot, n, max_events),
            trial_residual: KktResidual::new(&robot, n, max_events),
            factorization: RiccatiFactorization::new(&robot, n, max_events),
            riccati,
            filter: Filter::new(options.line_search.margin),
            stats: SolverStatistics::empty(),
            barrier: options.barrier_init,
            options,
            robot,
            constraints_initialized: false,
        })
    }

    /// Broadcasts a value across every stage of the solution. Accepted names
    /// are `"q"`, `"v"`, `"a"`, `"u"`, `"lmd"`, `"gmm"`, and `"f"`; the
    /// force takes one 3-vector applied to every candidate contact.
    pub fn set_solution(&mut self, name: &str, value: &DVector<f64>) -> Result<(), SolverBuildError> {
        let expect = |expected: usize, actual: usize| {
            if expected == actual {
                Ok(())
            } else {
                Err(SolverBuildError::DimensionMismatch { expected, actual })
            }
        };
        let mut apply = |f: &dyn Fn(&mut SplitSolution)| {
            for s in self
                .s
                .grid
                .iter_mut()
                .chain(self.s.impulse.iter_mut())
                .chain(self.s.aux.iter_mut())
                .chain(self.s.lift.iter_mut())
            {
                f(s);
            }
        };
        match name {
            "q" => {
                expect(self.robot.dimq(), value.len())?;
                apply(&|s| s.q.copy_from(value));
            }
            "v" => {
                expect(self.robot.dimv(), value.len())?;
                apply(&|s| s.v.copy_from(value));
            }
            "a" => {
                expect(self.robot.dimv(), value.len())?;
                apply(&|s| s.a.copy_from(value));
            }
            "u" => {
                expect(self.robot.dimu(), value.len())?;
                apply(&|s| s.u.copy_from(value));
            }
            "lmd" => {
                expect(self.robot.dimv(), value.len())?;
                apply(&|s| s.lmd.copy_from(value));
            }
            "gmm" => {
                expect(self.robot.dimv(), value.len())?;
                apply(&|s| s.gmm.copy_from(value));
            }
            "f" => {
                expect(3, value.len())?;
                let f3 = [value[0], value[1], value[2]];
                apply(&|s| s.fill_forces(&f3));
            }
            _ => return Err(SolverBuildError::InvalidParameter),
        }
        self.constraints_initialized = false;
        Ok(())
    }

    /// Solution of grid stage `i` (`0..=N`).
    pub fn solution(&self, i: usize) -> &SplitSolution {
        &self.s.grid[i]
    }

    /// Solution of the `impulse_index`-th impulse stage.
    pub fn solution_impulse(&self, impulse_index: usize) -> &SplitSolution {
        &self.s.impulse[impulse_index]
    }

    /// Solution of the `impulse_index`-th aux stage.
    pub fn solution_aux(&self, impulse_index: usize) -> &SplitSolution {
        &self.s.aux[impulse_index]
    }

    /// Solution of the `lift_index`-th lift stage.
    pub fn solution_lift(&self, lift_index: usize) -> &SplitSolution {
        &self.s.lift[lift_index]
    }

    /// LQR state-feedback gain `(Kq, Kv)` of grid stage `i`.
    pub fn state_feedback_gain(&self, i: usize) -> (DMatrix<f64>, DMatrix<f64>) {
        self.riccati.state_feedback_gain(i)
    }

    /// Statistics of the last `solve` call.
    pub fn statistics(&self) -> &SolverStatistics {
        &self.stats
    }

    /// Total cost (without barrier) at the last stage evaluation.
    pub fn total_cost(&self) -> f64 {
        let disc = &self.discretization;
        let mut cost = self.terminal.stage_cost();
        for w in &self.workers {
            cost += w.stage_cost(false);
        }
        for imp in 0..disc.n_impulse() {
            cost += self.impulse_workers[imp].stage_cost(false);
            cost += self.aux_workers[imp].stage_cost(false);
        }
        for l in 0..disc.n_lift() {
            cost += self.lift_workers[l].stage_cost(false);
        }
        cost
    }

    /// Hamiltonian jump across the `impulse_index`-th impulse at the last
    /// linearization (the switching-time gradient of that event).
    pub fn impulse_hamiltonian_jump(&self, impulse_index: usize) -> f64 {
        sto::impulse_hamiltonian_jump(&self.discretization, &self.kkt_residual, impulse_index)
    }

    /// Discretization of the last `solve` call.
    pub fn discretization(&self) -> &TimeDiscretization {
        &self.discretization
    }

    /// The contact sequence. Event times may be edited between `solve`
    /// calls; the solver re-discretizes on entry.
    pub fn contact_sequence_mut(&mut self) -> &mut ContactSequence {
        &mut self.contact_sequence
    }

    pub fn contact_sequence(&self) -> &ContactSequence {
        &self.contact_sequence
    }

    /// Whether the current solution satisfies every inequality constraint.
    pub fn is_current_solution_feasible(&self) -> bool {
        let disc = &self.discretization;
        let seq = &self.contact_sequence;
        let grid_ok = (0..self.n).all(|i| {
            let status = seq.contact_status(disc.contact_phase(i));
            self.workers[i].is_feasible(status, &self.s.grid[i])
        });
        let impulse_ok = (0..disc.n_impulse()).all(|imp| {
            self.impulse_workers[imp].is_feasible(seq.impulse_status(imp), &self.s.impulse[imp])
        });
        let aux_ok = (0..disc.n_impulse()).all(|imp| {
            let status = seq.contact_status(disc.contact_phase_after_impulse(imp));
            self.aux_workers[imp].is_feasible(status, &self.s.aux[imp])
        });
        let lift_ok = (0..disc.n_lift()).all(|l| {
            let status = seq.contact_status(disc.contact_phase_after_lift(l));
            self.lift_workers[l].is_feasible(status, &self.s.lift[l])
        });
        grid_ok && impulse_ok && aux_ok && lift_ok
    }

    /// Solves the OCP from `(t, q, v)`. Partial progress stays in the
    /// solution arrays on every exit path.
    pub fn solve(&mut self, t: f64, q: &DVector<f64>, v: &DVector<f64>) -> SolverStatistics {
        assert_eq!(q.len(), self.robot.dimq(), "initial configuration size");
        assert_eq!(v.len(), self.robot.dimv(), "initial velocity size");
        let start = Instant::now();
        self.stats = SolverStatistics::empty();
        self.filter.clear();

        self.discretization.discretize(&self.contact_sequence, t);
        if !self.discretization.is_formulation_tractable() {
            return self.finish(SolveStatus::BadDiscretization, start);
        }
        self.apply_discretization();

        if !self.constraints_initialized {
            self.init_constraints();
        }
        self.stats.feasible_start = self.is_current_solution_feasible();
        if !self.stats.feasible_start {
            // Feasibility restoration: re-project slacks to the barrier
            // floor and continue from there.
            self.init_constraints();
            let interior = self
                .workers
                .iter()
                .all(|w| w.constraints_data().is_interior());
            if !interior {
                return self.finish(SolveStatus::InfeasibleStart, start);
            }
        }

        let mut status = SolveStatus::MaxIterations;
        for iter in 0..self.options.max_iterations {
            // Switching-time updates may have moved the events.
            self.discretization.discretize(&self.contact_sequence, t);
            if !self.discretization.is_formulation_tractable() {
                status = SolveStatus::BadDiscretization;
                break;
            }
            self.apply_discretization();

            // The barrier persists across iterations and solves so a
            // warm-started re-solve is idempotent.
            let barrier = self.barrier;
            self.set_barrier(barrier);

            if !self.linearize() {
                status = SolveStatus::NumericalBreakdown;
                break;
            }
            let kkt_error = self.kkt_error();
            self.stats.kkt_error = kkt_error;
            self.stats.stage_kkt_errors.clear();
            self.stats.stage_kkt_errors.extend(
                self.kkt_residual.grid[..=self.n].iter().map(|r| r.kkt_error),
            );
            debug!(iter, kkt_error, barrier, "linearized");
            if kkt_error < self.options.kkt_tolerance {
                status = SolveStatus::Converged;
                break;
            }

            let switching: Vec<&crate::ocp::SwitchingConstraint> =
                self.workers.iter().map(|w| w.switching()).collect();
            let mut switching_per_impulse = Vec::with_capacity(self.discretization.n_impulse());
            for imp in 0..self.discretization.n_impulse() {
                let i = self.discretization.time_stage_before_impulse(imp);
                switching_per_impulse.push(switching[i]);
            }
            if self
                .riccati
                .backward(
                    &self.discretization,
                    &self.kkt_matrix,
                    &self.kkt_residual,
                    &switching_per_impulse,
                    &mut self.factorization,
                )
                .is_err()
            {
                status = SolveStatus::NumericalBreakdown;
                break;
            }
            drop(switching_per_impulse);
            drop(switching);

            // Forward sweep from the initial-state mismatch.
            {
                let dimv = self.robot.dimv();
                let mut dq0 = DVector::zeros(dimv);
                self.robot.difference(&self.s.grid[0].q, q, &mut dq0);
                self.d.grid[0].dq_mut().copy_from(&dq0);
                let dv0 = v - &self.s.grid[0].v;
                self.d.grid[0].dv_mut().copy_from(&dv0);
            }
            self.riccati.forward(
                &self.discretization,
                &self.kkt_matrix,
                &self.kkt_residual,
                &mut self.d,
            );

            self.compute_direction();
            let (mut primal_step, dual_step) = self.max_step_sizes();

            if self.options.line_search.enabled {
                primal_step = self.line_search(primal_step);
                if primal_step < self.options.line_search.min_step_size {
                    status = SolveStatus::LineSearchStalled;
                    break;
                }
            }

            self.update_solution(primal_step, dual_step);
            self.barrier = (self.barrier * self.options.barrier_decay)
                .max(self.options.barrier_min);
            sto::integrate_event_times(
                &mut self.contact_sequence,
                &self.discretization,
                &self.d,
                primal_step,
            );

            self.stats.iterates.push(IterationRecord {
                kkt_error,
                primal_step_size: primal_step,
                dual_step_size: dual_step,
                barrier,
            });
            self.stats.iterations = iter + 1;
            if self.options.verbose {
                eprintln!(
                    "iter {:3}: kkt = {:.6e}, alpha = {:.4}, alpha_dual = {:.4}, mu = {:.1e}",
                    iter, kkt_error, primal_step, dual_step, barrier
                );
            }
        }

        self.stats.regularization_bumps = self.riccati.regularization_bumps();
        self.finish(status, start)
    }

    fn finish(&mut self, status: SolveStatus, start: Instant) -> SolverStatistics {
        self.stats.status = status;
        self.stats.solve_time_ms = start.elapsed().as_millis() as u64;
        self.stats.clone()
    }

    /// Selects the active contact/switching dimensions on every stage datum.
    fn apply_discretization(&mut self) {
        let disc = &self.discretization;
        let seq = &self.contact_sequence;
        for i in 0..=self.n {
            let status = seq.contact_status(disc.contact_phase(i));
            let dimi = if i < self.n {
                disc.impulse_index_after(i)
                    .map(|imp| seq.impulse_status(imp).dimf())
                    .unwrap_or(0)
            } else {
                0
            };
            for arr in [&mut self.s, &mut self.trial_s] {
                arr.grid[i].set_contact_status(status);
                arr.grid[i].set_switching_dim(dimi);
            }
            self.d.grid[i].set_contact_status(status);
            self.d.grid[i].set_switching_dim(dimi);
            self.kkt_matrix.grid[i].set_contact_status(status);
            self.kkt_residual.grid[i].set_contact_status(status);
            self.trial_residual.grid[i].set_contact_status(status);
        }
        for imp in 0..disc.n_impulse() {
            let impulse_status = seq.impulse_status(imp);
            let post_status = seq.contact_status(disc.contact_phase_after_impulse(imp));
            for arr in [&mut self.s, &mut self.trial_s] {
                arr.impulse[imp].set_contact_status(impulse_status);
                arr.aux[imp].set_contact_status(post_status);
            }
            self.d.impulse[imp].set_contact_status(impulse_status);
            self.d.aux[imp].set_contact_status(post_status);
            self.kkt_matrix.impulse[imp].set_contact_status(impulse_status);
            self.kkt_residual.impulse[imp].set_contact_status(impulse_status);
            self.trial_residual.impulse[imp].set_contact_status(impulse_status);
            self.kkt_matrix.aux[imp].set_contact_status(post_status);
            self.kkt_residual.aux[imp].set_contact_status(post_status);
            self.trial_residual.aux[imp].set_contact_status(post_status);
        }
        for l in 0..disc.n_lift() {
            let status = seq.contact_status(disc.contact_phase_after_lift(l));
            for arr in [&mut self.s, &mut self.trial_s] {
                arr.lift[l].set_contact_status(status);
            }
            self.d.lift[l].set_contact_status(status);
            self.kkt_matrix.lift[l].set_contact_status(status);
            self.kkt_residual.lift[l].set_contact_status(status);
            self.trial_residual.lift[l].set_contact_status(status);
        }
    }

    fn set_barrier(&mut self, barrier: f64) {
        let tau = self.options.fraction_to_boundary;
        for w in &mut self.workers {
            w.set_barrier(barrier);
            w.set_fraction_to_boundary_rule(tau);
        }
        for w in &mut self.aux_workers {
            w.set_barrier(barrier);
            w.set_fraction_to_boundary_rule(tau);
        }
        for w in &mut self.lift_workers {
            w.set_barrier(barrier);
            w.set_fraction_to_boundary_rule(tau);
        }
        for w in &mut self.impulse_workers {
            w.set_barrier(barrier);
            w.set_fraction_to_boundary_rule(tau);
        }
    }

    fn init_constraints(&mut self) {
        let disc = &self.discretization;
        let seq = &self.contact_sequence;
        for i in 0..self.n {
            let status = seq.contact_status(disc.contact_phase(i));
            self.workers[i].init_constraints(status, &self.s.grid[i]);
        }
        for imp in 0..disc.n_impulse() {
            self.impulse_workers[imp]
                .init_constraints(seq.impulse_status(imp), &self.s.impulse[imp]);
            let status = seq.contact_status(disc.contact_phase_after_impulse(imp));
            self.aux_workers[imp].init_constraints(status, &self.s.aux[imp]);
        }
        for l in 0..disc.n_lift() {
            let status = seq.contact_status(disc.contact_phase_after_lift(l));
            self.lift_workers[l].init_constraints(status, &self.s.lift[l]);
        }
        self.constraints_initialized = true;
    }

    /// Parallel linearization of every stage. Returns `false` on a dynamics
    /// factorization failure or a NaN in any KKT block.
    fn linearize(&mut self) -> bool {
        let disc = &self.discretization;
        let seq = &self.contact_sequence;
        let s = &self.s;
        let robot_proto = &self.robot;
        let failed = AtomicBool::new(false);

        let workers = &mut self.workers;
        let impulse_workers = &mut self.impulse_workers;
        let aux_workers = &mut self.aux_workers;
        let lift_workers = &mut self.lift_workers;
        let km = &mut self.kkt_matrix;
        let kr = &mut self.kkt_residual;

        self.pool.install(|| {
            workers
                .par_iter_mut()
                .zip(km.grid.par_iter_mut())
                .zip(kr.grid.par_iter_mut())
                .enumerate()
                .for_each_init(
                    || robot_proto.clone(),
                    |robot, (i, ((w, m), r))| {
                        let status = seq.contact_status(disc.contact_phase(i));
                        let grid = disc.grid_info(i);
                        let q_prev = prev_config(s, disc, i);
                        let s_next = next_solution(s, disc, i);
                        let switching = disc.impulse_index_after(i).map(|imp| SwitchingContext {
                            impulse_status: seq.impulse_status(imp),
                            dt_pre: grid.dt,
                            dt_post: disc.grid_info_aux(imp).dt,
                        });
                        if w.compute_kkt_system(
                            robot,
                            status,
                            grid,
                            q_prev,
                            &s.grid[i],
                            s_next,
                            switching,
                            m,
                            r,
                        )
                        .is_err()
                        {
                            failed.store(true, Ordering::Relaxed);
                        }
                    },
                );

            impulse_workers
                .par_iter_mut()
                .zip(km.impulse.par_iter_mut())
                .zip(kr.impulse.par_iter_mut())
                .enumerate()
                .take(disc.n_impulse())
                .for_each_init(
                    || robot_proto.clone(),
                    |robot, (imp, ((w, m), r))| {
                        let i = disc.time_stage_before_impulse(imp);
                        if w.compute_kkt_system(
                            robot,
                            seq.impulse_status(imp),
                            disc.grid_info_impulse(imp),
                            &s.grid[i].q,
                            &s.impulse[imp],
                            &s.aux[imp],
                            m,
                            r,
                        )
                        .is_err()
                        {
                            failed.store(true, Ordering::Relaxed);
                        }
                    },
                );

            aux_workers
                .par_iter_mut()
                .zip(km.aux.par_iter_mut())
                .zip(kr.aux.par_iter_mut())
                .enumerate()
                .take(disc.n_impulse())
                .for_each_init(
                    || robot_proto.clone(),
                    |robot, (imp, ((w, m), r))| {
                        let i = disc.time_stage_before_impulse(imp);
                        let status = seq.contact_status(disc.contact_phase_after_impulse(imp));
                        if w.compute_kkt_system(
                            robot,
                            status,
                            disc.grid_info_aux(imp),
                            &s.impulse[imp].q,
                            &s.aux[imp],
                            &s.grid[i + 1],
                            None,
                            m,
                            r,
                        )
                        .is_err()
                        {
                            failed.store(true, Ordering::Relaxed);
                        }
                    },
                );

            lift_workers
                .par_iter_mut()
                .zip(km.lift.par_iter_mut())
                .zip(kr.lift.par_iter_mut())
                .enumerate()
                .take(disc.n_lift())
                .for_each_init(
                    || robot_proto.clone(),
                    |robot, (l, ((w, m), r))| {
                        let i = disc.time_stage_before_lift(l);
                        let status = seq.contact_status(disc.contact_phase_after_lift(l));
                        if w.compute_kkt_system(
                            robot,
                            status,
                            disc.grid_info_lift(l),
                            &s.grid[i].q,
                            &s.lift[l],
                            &s.grid[i + 1],
                            None,
                            m,
                            r,
                        )
                        .is_err()
                        {
                            failed.store(true, Ordering::Relaxed);
                        }
                    },
                );
        });

        // Terminal stage on the driver thread.
        {
            let mut robot = self.robot.clone();
            let q_prev = prev_config(&self.s, &self.discretization, self.n).clone();
            self.terminal.compute_kkt_system(
                &mut robot,
                self.discretization.grid_info(self.n),
                &q_prev,
                &self.s.grid[self.n],
                &mut self.kkt_matrix.grid[self.n],
                &mut self.kkt_residual.grid[self.n],
            );
        }

        if failed.load(Ordering::Relaxed) {
            return false;
        }
        // NaN scan over the live stage blocks.
        let disc = &self.discretization;
        let nan = self.kkt_residual.grid[..=self.n]
            .iter()
            .zip(self.kkt_matrix.grid[..=self.n].iter())
            .any(|(r, m)| r.has_nan() || m.has_nan())
            || (0..disc.n_impulse()).any(|imp| {
                self.kkt_residual.impulse[imp].has_nan()
                    || self.kkt_matrix.impulse[imp].has_nan()
                    || self.kkt_residual.aux[imp].has_nan()
                    || self.kkt_matrix.aux[imp].has_nan()
            })
            || (0..disc.n_lift())
                .any(|l| self.kkt_residual.lift[l].has_nan() || self.kkt_matrix.lift[l].has_nan());
        !nan
    }

    /// l∞ KKT error over every live stage, including the Hamiltonian jumps
    /// of STO-enabled events.
    fn kkt_error(&self) -> f64 {
        let disc = &self.discretization;
        let mut err = self.kkt_residual.grid[..=self.n]
            .iter()
            .map(|r| r.kkt_error)
            .fold(0.0_f64, f64::max);
        for imp in 0..disc.n_impulse() {
            err = err
                .max(self.kkt_residual.impulse[imp].kkt_error)
                .max(self.kkt_residual.aux[imp].kkt_error);
        }
        for l in 0..disc.n_lift() {
            err = err.max(self.kkt_residual.lift[l].kkt_error);
        }
        err.max(sto::sto_kkt_error(disc, &self.kkt_residual))
    }

    /// Costate directions, switching multipliers, and primal/dual expansion,
    /// fanned out per stage.
    fn compute_direction(&mut self) {
        let disc = &self.discretization;
        let seq = &self.contact_sequence;
        let s = &self.s;
        let fact = &self.factorization;
        let riccati = &self.riccati;
        let n = self.n;

        // Pass A: costate and multiplier directions plus primal expansion.
        {
            let workers = &mut self.workers;
            let impulse_workers = &mut self.impulse_workers;
            let aux_workers = &mut self.aux_workers;
            let lift_workers = &mut self.lift_workers;
            let d = &mut self.d;
            self.pool.install(|| {
                workers
                    .par_iter_mut()
                    .zip(d.grid.par_iter_mut())
                    .enumerate()
                    .for_each(|(i, (w, di))| {
                        RiccatiFactorizer::compute_costate_direction(&fact.grid[i], di);
                        if let Some(imp) = disc.impulse_index_after(i) {
                            RiccatiFactorizer::compute_switching_multiplier_direction(
                                riccati.switching_factorization(imp),
                                di,
                            );
                        }
                        let status = seq.contact_status(disc.contact_phase(i));
                        w.expand_primal(status, &s.grid[i], di);
                    });
                RiccatiFactorizer::compute_costate_direction(&fact.grid[n], &mut d.grid[n]);

                impulse_workers
                    .par_iter_mut()
                    .zip(d.impulse.par_iter_mut())
                    .enumerate()
                    .take(disc.n_impulse())
                    .for_each(|(imp, (w, di))| {
                        RiccatiFactorizer::compute_costate_direction(&fact.impulse[imp], di);
                        w.expand_primal(seq.impulse_status(imp), &s.impulse[imp], di);
                    });

                aux_workers
                    .par_iter_mut()
                    .zip(d.aux.par_iter_mut())
                    .enumerate()
                    .take(disc.n_impulse())
                    .for_each(|(imp, (w, di))| {
                        RiccatiFactorizer::compute_costate_direction(&fact.aux[imp], di);
                        let status = seq.contact_status(disc.contact_phase_after_impulse(imp));
                        w.expand_primal(status, &s.aux[imp], di);
                    });

                lift_workers
                    .par_iter_mut()
                    .zip(d.lift.par_iter_mut())
                    .enumerate()
                    .take(disc.n_lift())
                    .for_each(|(l, (w, di))| {
                        RiccatiFactorizer::compute_costate_direction(&fact.lift[l], di);
                        let status = seq.contact_status(disc.contact_phase_after_lift(l));
                        w.expand_primal(status, &s.lift[l], di);
                    });
            });
        }

        // Pass B: snapshot the next stage's velocity-costate direction.
        {
            let d = &self.d;
            for i in 0..self.n {
                let dn = match next_of(disc, i) {
                    NextStage::Grid(j) => &d.grid[j],
                    NextStage::Impulse(imp) => &d.impulse[imp],
                    NextStage::Lift(l) => &d.lift[l],
                };
                self.workers[i].set_dgmm_next(dn.dgmm());
            }
            for imp in 0..disc.n_impulse() {
                self.impulse_workers[imp].set_dgmm_next(d.aux[imp].dgmm());
                let i = disc.time_stage_before_impulse(imp);
                self.aux_workers[imp].set_dgmm_next(d.grid[i + 1].dgmm());
            }
            for l in 0..disc.n_lift() {
                let i = disc.time_stage_before_lift(l);
                self.lift_workers[l].set_dgmm_next(d.grid[i + 1].dgmm());
            }
        }

        // Pass C: dual expansion.
        {
            let workers = &mut self.workers;
            let impulse_workers = &mut self.impulse_workers;
            let aux_workers = &mut self.aux_workers;
            let lift_workers = &mut self.lift_workers;
            let km = &self.kkt_matrix;
            let kr = &self.kkt_residual;
            let d = &mut self.d;
            self.pool.install(|| {
                workers
                    .par_iter_mut()
                    .zip(d.grid.par_iter_mut())
                    .enumerate()
                    .for_each(|(i, (w, di))| {
                        w.expand_dual(disc.grid_info(i), &km.grid[i], &kr.grid[i], di);
                    });
                impulse_workers
                    .par_iter_mut()
                    .zip(d.impulse.par_iter_mut())
                    .enumerate()
                    .take(disc.n_impulse())
                    .for_each(|(imp, (w, di))| {
                        w.expand_dual(&km.impulse[imp], &kr.impulse[imp], di);
                    });
                aux_workers
                    .par_iter_mut()
                    .zip(d.aux.par_iter_mut())
                    .enumerate()
                    .take(disc.n_impulse())
                    .for_each(|(imp, (w, di))| {
                        w.expand_dual(disc.grid_info_aux(imp), &km.aux[imp], &kr.aux[imp], di);
                    });
                lift_workers
                    .par_iter_mut()
                    .zip(d.lift.par_iter_mut())
                    .enumerate()
                    .take(disc.n_lift())
                    .for_each(|(l, (w, di))| {
                        w.expand_dual(disc.grid_info_lift(l), &km.lift[l], &kr.lift[l], di);
                    });
            });
        }
    }

    /// Fraction-to-boundary bounds over every stage; the serial fold keeps
    /// the result independent of the thread count.
    fn max_step_sizes(&self) -> (f64, f64) {
        let disc = &self.discretization;
        let mut primal: f64 = 1.0;
        let mut dual: f64 = 1.0;
        for w in &self.workers {
            primal = primal.min(w.max_primal_step_size());
            dual = dual.min(w.max_dual_step_size());
        }
        for imp in 0..disc.n_impulse() {
            primal = primal
                .min(self.impulse_workers[imp].max_primal_step_size())
                .min(self.aux_workers[imp].max_primal_step_size());
            dual = dual
                .min(self.impulse_workers[imp].max_dual_step_size())
                .min(self.aux_workers[imp].max_dual_step_size());
        }
        for l in 0..disc.n_lift() {
            primal = primal.min(self.lift_workers[l].max_primal_step_size());
            dual = dual.min(self.lift_workers[l].max_dual_step_size());
        }
        (primal, dual)
    }

    /// Merit `Σ cost − Σ μ·log(slack)` at the last stage evaluation, with
    /// the barrier term taken at the trial slack `slack + step·dslack`
    /// (`step = 0` gives the current point).
    fn merit(&self, barrier_step: f64) -> f64 {
        let disc = &self.discretization;
        let mut merit = self.terminal.stage_cost();
        for w in &self.workers {
            merit += w.stage_cost(false) - w.trial_barrier_cost(barrier_step);
        }
        for imp in 0..disc.n_impulse() {
            merit += self.impulse_workers[imp].stage_cost(false)
                - self.impulse_workers[imp].trial_barrier_cost(barrier_step);
            merit += self.aux_workers[imp].stage_cost(false)
                - self.aux_workers[imp].trial_barrier_cost(barrier_step);
        }
        for l in 0..disc.n_lift() {
            merit += self.lift_workers[l].stage_cost(false)
                - self.lift_workers[l].trial_barrier_cost(barrier_step);
        }
        merit
    }

    fn total_violation(&self) -> f64 {
        let disc = &self.discretization;
        let mut v: f64 = 0.0;
        for w in &self.workers {
            v += w.stage_violation();
        }
        for imp in 0..disc.n_impulse() {
            v += self.impulse_workers[imp].stage_violation();
            v += self.aux_workers[imp].stage_violation();
        }
        for l in 0..disc.n_lift() {
            v += self.lift_workers[l].stage_violation();
        }
        v
    }

    /// Filter line search: backtrack from `max_step` until the filter
    /// accepts the trial point. Returns the accepted step, or the last tried
    /// one below the floor.
    fn line_search(&mut self, max_step: f64) -> f64 {
        let current_merit = self.merit(0.0);
        let current_violation = self.total_violation();
        if self.filter.is_empty() {
            self.filter.augment(current_violation, current_merit);
        }

        let beta = self.options.line_search.step_size_reduction;
        let min_step = self.options.line_search.min_step_size;
        let mut step = max_step;
        loop {
            self.evaluate_trial(step);
            let merit = self.merit(step);
            let violation = self.total_violation();
            if self.filter.is_acceptable(violation, merit) {
                self.filter.augment(violation, merit);
                return step;
            }
            step *= beta;
            if step < min_step {
                return step;
            }
        }
    }

    /// Copies `s ⊕ step·d` into the trial arrays and evaluates every stage.
    fn evaluate_trial(&mut self, step: f64) {
        let disc = &self.discretization;
        let seq = &self.contact_sequence;
        let robot_proto = &self.robot;
        let n = self.n;

        // Build the trial point.
        for i in 0..=n {
            self.trial_s.grid[i].copy_from(&self.s.grid[i]);
            self.trial_s.grid[i].integrate(robot_proto, step, &self.d.grid[i]);
        }
        for imp in 0..disc.n_impulse() {
            self.trial_s.impulse[imp].copy_from(&self.s.impulse[imp]);
            self.trial_s.impulse[imp].integrate(robot_proto, step, &self.d.impulse[imp]);
            self.trial_s.aux[imp].copy_from(&self.s.aux[imp]);
            self.trial_s.aux[imp].integrate(robot_proto, step, &self.d.aux[imp]);
        }
        for l in 0..disc.n_lift() {
            self.trial_s.lift[l].copy_from(&self.s.lift[l]);
            self.trial_s.lift[l].integrate(robot_proto, step, &self.d.lift[l]);
        }

        let s = &self.trial_s;
        let workers = &mut self.workers;
        let impulse_workers = &mut self.impulse_workers;
        let aux_workers = &mut self.aux_workers;
        let lift_workers = &mut self.lift_workers;
        let kr = &mut self.trial_residual;
        let terminal = &mut self.terminal;

        self.pool.install(|| {
            workers
                .par_iter_mut()
                .zip(kr.grid.par_iter_mut())
                .enumerate()
                .for_each_init(
                    || robot_proto.clone(),
                    |robot, (i, (w, r))| {
                        let status = seq.contact_status(disc.contact_phase(i));
                        let grid = disc.grid_info(i);
                        let s_next = next_solution(s, disc, i);
                        let switching = disc.impulse_index_after(i).map(|imp| SwitchingContext {
                            impulse_status: seq.impulse_status(imp),
                            dt_pre: grid.dt,
                            dt_post: disc.grid_info_aux(imp).dt,
                        });
                        w.eval_ocp(
                            robot,
                            status,
                            grid,
                            &s.grid[i],
                            &s_next.q,
                            &s_next.v,
                            switching,
                            r,
                        );
                    },
                );

            impulse_workers
                .par_iter_mut()
                .zip(kr.impulse.par_iter_mut())
                .enumerate()
                .take(disc.n_impulse())
                .for_each_init(
                    || robot_proto.clone(),
                    |robot, (imp, (w, r))| {
                        w.eval_ocp(
                            robot,
                            seq.impulse_status(imp),
                            disc.grid_info_impulse(imp),
                            &s.impulse[imp],
                            &s.aux[imp].q,
                            &s.aux[imp].v,
                            r,
                        );
                    },
                );

            aux_workers
                .par_iter_mut()
                .zip(kr.aux.par_iter_mut())
                .enumerate()
                .take(disc.n_impulse())
                .for_each_init(
                    || robot_proto.clone(),
                    |robot, (imp, (w, r))| {
                        let i = disc.time_stage_before_impulse(imp);
                        let status = seq.contact_status(disc.contact_phase_after_impulse(imp));
                        w.eval_ocp(
                            robot,
                            status,
                            disc.grid_info_aux(imp),
                            &s.aux[imp],
                            &s.grid[i + 1].q,
                            &s.grid[i + 1].v,
                            None,
                            r,
                        );
                    },
                );

            lift_workers
                .par_iter_mut()
                .zip(kr.lift.par_iter_mut())
                .enumerate()
                .take(disc.n_lift())
                .for_each_init(
                    || robot_proto.clone(),
                    |robot, (l, (w, r))| {
                        let i = disc.time_stage_before_lift(l);
                        let status = seq.contact_status(disc.contact_phase_after_lift(l));
                        w.eval_ocp(
                            robot,
                            status,
                            disc.grid_info_lift(l),
                            &s.lift[l],
                            &s.grid[i + 1].q,
                            &s.grid[i + 1].v,
                            None,
                            r,
                        );
                    },
                );
        });

        let mut robot = robot_proto.clone();
        terminal.eval_ocp(
            &mut robot,
            disc.grid_info(n),
            &s.grid[n],
            &mut kr.grid[n],
        );
    }

    /// Applies the accepted primal and dual steps to every stage.
    fn update_solution(&mut self, primal_step: f64, dual_step: f64) {
        let disc = &self.discretization;
        let robot_proto = &self.robot;
        let d = &self.d;

        {
            let workers = &mut self.workers;
            let impulse_workers = &mut self.impulse_workers;
            let aux_workers = &mut self.aux_workers;
            let lift_workers = &mut self.lift_workers;
            let s = &mut self.s;
            self.pool.install(|| {
                workers
                    .par_iter_mut()
                    .zip(s.grid.par_iter_mut())
                    .zip(d.grid.par_iter())
                    .for_each(|((w, si), di)| {
                        w.update_primal(robot_proto, primal_step, di, si);
                        w.update_dual(dual_step);
                    });
                impulse_workers
                    .par_iter_mut()
                    .zip(s.impulse.par_iter_mut())
                    .zip(d.impulse.par_iter())
                    .take(disc.n_impulse())
                    .for_each(|((w, si), di)| {
                        w.update_primal(robot_proto, primal_step, di, si);
                        w.update_dual(dual_step);
                    });
                aux_workers
                    .par_iter_mut()
                    .zip(s.aux.par_iter_mut())
                    .zip(d.aux.par_iter())
                    .take(disc.n_impulse())
                    .for_each(|((w, si), di)| {
                        w.update_primal(robot_proto, primal_step, di, si);
                        w.update_dual(dual_step);
                    });
                lift_workers
                    .par_iter_mut()
                    .zip(s.lift.par_iter_mut())
                    .zip(d.lift.par_iter())
                    .take(disc.n_lift())
                    .for_each(|((w, si), di)| {
                        w.update_primal(robot_proto, primal_step, di, si);
                        w.update_dual(dual_step);
                    });
            });
        }
        // Terminal stage.
        self.terminal.update_primal(
            robot_proto,
            primal_step,
            &d.grid[self.n],
            &mut self.s.grid[self.n],
        );
    }
}
