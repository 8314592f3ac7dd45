//! Solver options, exit status, and statistics.

use std::fmt;

use thiserror::Error;

use crate::hybrid::DiscretizationMethod;
use crate::line_search::LineSearchSettings;
use crate::riccati::RegularizationPolicy;

/// Structural variant of the optimal control problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum OcpKind {
    /// Contact-switching problem on a possibly floating-base robot.
    #[default]
    Hybrid,
    /// Unconstrained rigid-body system: no floating base, no contacts, no
    /// switching. The contact branches are bypassed.
    Unconstrained,
}

/// Solver options.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SolverOptions {
    /// Maximum Newton iterations per `solve`.
    pub max_iterations: usize,
    /// l∞ KKT tolerance for convergence.
    pub kkt_tolerance: f64,
    /// Initial barrier parameter.
    pub barrier_init: f64,
    /// Geometric decay of the barrier per iteration.
    pub barrier_decay: f64,
    /// Barrier floor.
    pub barrier_min: f64,
    /// Fraction-to-boundary parameter τ.
    pub fraction_to_boundary: f64,
    /// Filter line-search parameters.
    pub line_search: LineSearchSettings,
    /// Worker threads for the stage-parallel phases.
    pub nthreads: usize,
    /// Discretization policy.
    pub discretization: DiscretizationMethod,
    /// Curvature floor of the switching-time Newton step.
    pub sto_regularization: f64,
    /// Diagonal-shift policy for indefinite control Hessians.
    #[cfg_attr(feature = "serde", serde(skip))]
    pub regularization: RegularizationPolicy,
    /// Problem variant.
    pub kind: OcpKind,
    /// Prints a per-iteration table on stderr.
    pub verbose: bool,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            kkt_tolerance: 1.0e-7,
            barrier_init: 1.0e-3,
            barrier_decay: 0.5,
            barrier_min: 1.0e-8,
            fraction_to_boundary: 0.995,
            line_search: LineSearchSettings::default(),
            nthreads: 1,
            discretization: DiscretizationMethod::GridBased,
            sto_regularization: 10.0,
            regularization: RegularizationPolicy::default(),
            kind: OcpKind::Hybrid,
            verbose: false,
        }
    }
}

impl SolverOptions {
    /// Validates the option values.
    pub fn validate(&self) -> Result<(), SolverBuildError> {
        if self.nthreads == 0 {
            return Err(SolverBuildError::ZeroThreads);
        }
        if self.kkt_tolerance <= 0.0
            || self.barrier_init <= 0.0
            || self.barrier_decay <= 0.0
            || self.barrier_decay > 1.0
            || self.fraction_to_boundary <= 0.0
            || self.fraction_to_boundary >= 1.0
            || self.sto_regularization <= 0.0
        {
            return Err(SolverBuildError::InvalidParameter);
        }
        Ok(())
    }
}

/// Construction-time errors. Runtime outcomes are reported through
/// [`SolverStatistics`], never as errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SolverBuildError {
    /// Horizon length is not positive.
    #[error("horizon length must be positive")]
    NonPositiveHorizon,
    /// Number of grid intervals is zero.
    #[error("number of grid intervals must be positive")]
    ZeroGrid,
    /// Thread count is zero.
    #[error("nthreads must be positive")]
    ZeroThreads,
    /// An option value is outside its valid range.
    #[error("option value outside its valid range")]
    InvalidParameter,
    /// A dimension of the supplied data does not match the robot model.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        expected: usize,
        actual: usize,
    },
    /// The unconstrained variant was requested for a robot with contacts or
    /// a floating base.
    #[error("unconstrained variant requires a fixed base and no contacts")]
    NotUnconstrained,
    /// The worker thread pool could not be built.
    #[error("failed to build thread pool: {0}")]
    ThreadPool(String),
}

/// Reason the solver returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveStatus {
    /// KKT error below tolerance.
    Converged,
    /// Iteration budget exhausted.
    MaxIterations,
    /// The warm start violated the constraints and restoration failed.
    InfeasibleStart,
    /// Indefinite KKT after the regularization cap, or NaN in a KKT block.
    NumericalBreakdown,
    /// Discrete events collided or an interval collapsed.
    BadDiscretization,
    /// The line-search step shrank below its floor.
    LineSearchStalled,
}

impl fmt::Display for SolveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            SolveStatus::Converged => "converged",
            SolveStatus::MaxIterations => "max_iterations",
            SolveStatus::InfeasibleStart => "infeasible_start",
            SolveStatus::NumericalBreakdown => "numerical_breakdown",
            SolveStatus::BadDiscretization => "bad_discretization",
            SolveStatus::LineSearchStalled => "line_search_stalled",
        };
        f.write_str(reason)
    }
}

/// One Newton iteration's record.
#[derive(Debug, Clone, Copy)]
pub struct IterationRecord {
    /// l∞ KKT error at the start of the iteration.
    pub kkt_error: f64,
    /// Accepted primal step size.
    pub primal_step_size: f64,
    /// Dual (fraction-to-boundary) step size.
    pub dual_step_size: f64,
    /// Barrier parameter used by the iteration.
    pub barrier: f64,
}

/// Outcome and diagnostics of one `solve` call. Partial progress is always
/// preserved in the solver's solution arrays, whatever the exit reason.
#[derive(Debug, Clone)]
pub struct SolverStatistics {
    /// Exit reason.
    pub status: SolveStatus,
    /// Newton iterations performed.
    pub iterations: usize,
    /// Final l∞ KKT error.
    pub kkt_error: f64,
    /// Whether the warm start satisfied every inequality constraint.
    pub feasible_start: bool,
    /// Diagonal shifts applied to control Hessians during this solve.
    pub regularization_bumps: u64,
    /// l∞ KKT error of each regular grid stage at the last linearization
    /// (terminal stage included), for diagnosing where the error
    /// concentrates.
    pub stage_kkt_errors: Vec<f64>,
    /// Per-iteration records.
    pub iterates: Vec<IterationRecord>,
    /// Wall-clock time of the solve in milliseconds.
    pub solve_time_ms: u64,
}

impl SolverStatistics {
    pub(crate) fn empty() -> Self {
        Self {
            status: SolveStatus::MaxIterations,
            iterations: 0,
            kkt_error: f64::INFINITY,
            feasible_start: true,
            regularization_bumps: 0,
            stage_kkt_errors: Vec::new(),
            iterates: Vec::new(),
            solve_time_ms: 0,
        }
    }

    /// Whether the solve converged.
    pub fn is_converged(&self) -> bool {
        self.status == SolveStatus::Converged
    }
}

impl fmt::Display for SolverStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "solve: {} after {} iterations, kkt = {:.3e}, {} ms",
            self.status, self.iterations, self.kkt_error, self.solve_time_ms
        )?;
        if !self.feasible_start {
            writeln!(f, "  warm start infeasible; slacks were restored")?;
        }
        for (k, it) in self.iterates.iter().enumerate() {
            writeln!(
                f,
                "  iter {:3}: kkt = {:.6e}, alpha = {:.4}, alpha_dual = {:.4}, mu = {:.1e}",
                k, it.kkt_error, it.primal_step_size, it.dual_step_size, it.barrier
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options_are_valid() {
        assert!(SolverOptions::default().validate().is_ok());
    }

    #[test]
    fn test_zero_threads_rejected() {
        let opts = SolverOptions {
            nthreads: 0,
            ..Default::default()
        };
        assert_eq!(opts.validate().unwrap_err(), SolverBuildError::ZeroThreads);
    }

    #[test]
    fn test_status_reason_strings() {
        assert_eq!(SolveStatus::Converged.to_string(), "converged");
        assert_eq!(
            SolveStatus::NumericalBreakdown.to_string(),
            "numerical_breakdown"
        );
        assert_eq!(
            SolveStatus::BadDiscretization.to_string(),
            "bad_discretization"
        );
    }
}
