use core::fmt;

use std::time::Instant;

use faer_core::Parallelism;

use crate::backend::{arg, BackendError, DirectSolver, FaerLu, OrderingPolicy};
use crate::csc::{CscMatrix, CscMatrixRef, FormatError};
use crate::orchestrator::{self, AttemptReport, RetryPlan};
use crate::properties;
use crate::regularize::{self, MissingDiagonal, RegularizationParams};
use crate::report::{
    emit_line, format_duration, AnalysisReport, Reporter, SolveStatus, SolverStats,
    StdoutReporter,
};
use crate::scaling::{self, ScalingParams};
use crate::workspace::{AllocError, Workspace};

/// Errors of a robust solve.
#[derive(Debug, Clone, PartialEq)]
pub enum SolveError {
    /// The matrix violates the CSC invariants.
    InvalidFormat(FormatError),
    /// A working buffer could not be allocated; nothing reached the backend.
    AllocationFailure { bytes: usize },
    /// `rhs` or `x` does not match the matrix.
    DimensionMismatch {
        /// Position of the offending argument, see [`arg`].
        arg: usize,
        expected: usize,
        actual: usize,
    },
    /// The backend failed on the last attempt.
    Backend { error: BackendError, attempts: usize },
}

impl SolveError {
    /// Flat status code for this error.
    pub fn status(&self) -> SolveStatus {
        match self {
            Self::InvalidFormat(_) => SolveStatus::InvalidFormat,
            Self::AllocationFailure { bytes } => SolveStatus::AllocationFailure(*bytes),
            Self::DimensionMismatch { arg, .. } => SolveStatus::IllegalArgument(*arg),
            Self::Backend { error, .. } => match *error {
                BackendError::IllegalArgument { arg } => SolveStatus::IllegalArgument(arg),
                BackendError::Singular { row } => SolveStatus::SingularAt(row),
                BackendError::OutOfMemory { bytes } => SolveStatus::OutOfMemory(bytes),
                BackendError::Internal { code } => SolveStatus::InternalError(code),
            },
        }
    }
}

impl fmt::Display for SolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidFormat(err) => write!(f, "invalid CSC matrix: {err}"),
            Self::AllocationFailure { bytes } => {
                write!(f, "failed to allocate {bytes} bytes of workspace")
            }
            Self::DimensionMismatch {
                arg,
                expected,
                actual,
            } => {
                write!(f, "argument {arg} has length {actual}, expected {expected}")
            }
            Self::Backend { error, attempts } => {
                write!(f, "direct solver failed after {attempts} attempt(s): {error}")
            }
        }
    }
}

impl std::error::Error for SolveError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidFormat(err) => Some(err),
            Self::Backend { error, .. } => Some(error),
            _ => None,
        }
    }
}

impl From<FormatError> for SolveError {
    fn from(err: FormatError) -> Self {
        Self::InvalidFormat(err)
    }
}

impl From<AllocError> for SolveError {
    fn from(err: AllocError) -> Self {
        Self::AllocationFailure { bytes: err.bytes }
    }
}

/// Options controlling preprocessing and retry.
#[derive(Debug, Clone)]
pub struct SolverOptions {
    /// Apply row/column equilibration.
    pub equilibrate: bool,
    /// Lower clamp of the scaling factors.
    pub scale_min: f64,
    /// Upper clamp of the scaling factors.
    pub scale_max: f64,
    /// Regularize empty rows and weak diagonals.
    pub regularize: bool,
    /// Magnitudes at or below this are treated as zero.
    pub magnitude_floor: f64,
    /// Regularization magnitude is `mean |a_ij| * regularization_factor`...
    pub regularization_factor: f64,
    /// ...but never below this.
    pub regularization_floor: f64,
    /// What to do with rows that store no diagonal entry.
    pub missing_diagonal: MissingDiagonal,
    /// Retry with `fallback_policy` when the first attempt fails.
    pub retry: bool,
    /// Ordering used by the first attempt.
    pub primary_policy: OrderingPolicy,
    /// Ordering used by the retry.
    pub fallback_policy: OrderingPolicy,
    /// Byte budget for the working buffers of one call, `None` for no limit.
    pub workspace_limit: Option<usize>,
    /// Print the analysis and attempts to stdout by default.
    pub verbose: bool,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            equilibrate: true,
            scale_min: 1e-4,
            scale_max: 1e4,
            regularize: true,
            magnitude_floor: 1e-10,
            regularization_factor: 1e-8,
            regularization_floor: 1e-14,
            missing_diagonal: MissingDiagonal::Report,
            retry: true,
            primary_policy: OrderingPolicy::Default,
            fallback_policy: OrderingPolicy::Robust,
            workspace_limit: None,
            verbose: false,
        }
    }
}

impl SolverOptions {
    fn scaling_params(&self) -> ScalingParams {
        ScalingParams {
            min: self.scale_min,
            max: self.scale_max,
            magnitude_floor: self.magnitude_floor,
        }
    }

    fn regularization_params(&self) -> RegularizationParams {
        RegularizationParams {
            magnitude_floor: self.magnitude_floor,
            factor: self.regularization_factor,
            min_magnitude: self.regularization_floor,
            missing_diagonal: self.missing_diagonal,
        }
    }

    fn retry_plan(&self) -> RetryPlan {
        RetryPlan {
            primary: self.primary_policy,
            fallback: self.retry.then_some(self.fallback_policy),
        }
    }
}

enum ReporterSlot<'a> {
    External(&'a mut dyn Reporter),
    Local(StdoutReporter),
    None,
}

impl<'a> ReporterSlot<'a> {
    fn new(reporter: Option<&'a mut dyn Reporter>, verbose: bool) -> Self {
        match reporter {
            Some(r) => Self::External(r),
            None if verbose => Self::Local(StdoutReporter::new()),
            None => Self::None,
        }
    }

    fn as_mut(&mut self) -> Option<&mut dyn Reporter> {
        match self {
            Self::External(r) => Some(*r),
            Self::Local(r) => Some(r),
            Self::None => None,
        }
    }
}

/// Equilibrates, regularizes and solves `A x = b` through a direct backend.
///
/// Each call works on private copies of the matrix and right-hand side; the
/// caller's arrays are only read. Calls share no state besides the backend.
pub struct RobustSolver<S = FaerLu> {
    backend: S,
}

impl RobustSolver<FaerLu> {
    /// Solver backed by faer's sparse LU.
    pub fn new(parallelism: Parallelism) -> Self {
        Self::with_backend(FaerLu::new(parallelism))
    }
}

impl Default for RobustSolver<FaerLu> {
    fn default() -> Self {
        Self::new(Parallelism::None)
    }
}

impl<S: DirectSolver> RobustSolver<S> {
    pub fn with_backend(backend: S) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &S {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut S {
        &mut self.backend
    }

    pub fn into_backend(self) -> S {
        self.backend
    }

    /// Solves `A x = rhs` into `x`.
    ///
    /// `x` is zeroed first and only written on success, so on error it holds
    /// zeros and must not be read as a solution.
    pub fn solve(
        &mut self,
        matrix: CscMatrixRef<'_>,
        rhs: &[f64],
        x: &mut [f64],
        options: &SolverOptions,
        reporter: Option<&mut dyn Reporter>,
    ) -> Result<SolverStats, SolveError> {
        let nrows = matrix.nrows();
        if rhs.len() != nrows {
            return Err(SolveError::DimensionMismatch {
                arg: arg::RHS,
                expected: nrows,
                actual: rhs.len(),
            });
        }
        if x.len() != nrows {
            return Err(SolveError::DimensionMismatch {
                arg: arg::SOLUTION,
                expected: nrows,
                actual: x.len(),
            });
        }
        x.fill(0.0);

        let start_time = options.verbose.then(Instant::now);
        let mut reporter = ReporterSlot::new(reporter, options.verbose);
        let result = self.solve_inner(matrix, rhs, x, options, &mut reporter);
        if let Some(reporter) = reporter.as_mut() {
            reporter.on_finish();
        }
        if let Some(start) = start_time {
            emit_line(&format!("time: {}", format_duration(start.elapsed())));
        }
        if let Err(err) = &result {
            log::debug!("solve failed: {err}");
        }
        result
    }

    fn solve_inner(
        &mut self,
        matrix: CscMatrixRef<'_>,
        rhs: &[f64],
        x: &mut [f64],
        options: &SolverOptions,
        reporter: &mut ReporterSlot<'_>,
    ) -> Result<SolverStats, SolveError> {
        let mut ws = Workspace::new(options.workspace_limit);

        let mut work = CscMatrix::from_parts(
            matrix.nrows(),
            matrix.ncols(),
            ws.copy_of(matrix.col_ptrs())?,
            ws.copy_of(matrix.row_indices())?,
            ws.copy_of(matrix.values())?,
        );
        let mut b = ws.copy_of(rhs)?;

        let properties = properties::compute_in(work.as_ref(), &mut ws)?;
        if properties.likely_singular {
            log::debug!(
                "matrix looks singular: missing diagonals={} diag ratio={:.2e} cond est={:.2e}",
                properties.missing_diagonals,
                properties.diag_ratio,
                properties.condition_estimate
            );
        }

        let regularization = if options.regularize {
            Some(regularize::regularize_in(
                &mut work,
                &options.regularization_params(),
                &mut ws,
            )?)
        } else {
            None
        };

        let factors = if options.equilibrate {
            let factors = scaling::compute_factors(work.as_ref(), &options.scaling_params(), &mut ws)?;
            factors.apply(&mut work, &mut b)?;
            Some(factors)
        } else {
            None
        };
        let row_scale = factors.as_ref().map(|f| f.row_range());
        let col_scale = factors.as_ref().map(|f| f.col_range());

        if let Some(reporter) = reporter.as_mut() {
            reporter.on_analysis(&AnalysisReport {
                nrows: matrix.nrows(),
                ncols: matrix.ncols(),
                nnz: matrix.nnz(),
                properties,
                regularization: regularization.clone(),
                row_scale,
                col_scale,
            });
        }

        // Last working buffer; nothing is allocated from `ws` past this point.
        let mut ax = ws.alloc(matrix.nrows(), 0.0f64)?;

        let mut attempts: Vec<AttemptReport> = Vec::new();
        let solved = orchestrator::run(
            &mut self.backend,
            work.as_ref(),
            &b,
            &options.retry_plan(),
            |attempt| {
                if let Some(reporter) = reporter.as_mut() {
                    reporter.on_attempt(&attempt);
                }
                attempts.push(attempt);
            },
        );
        let mut scaled = solved.map_err(|error| SolveError::Backend {
            error,
            attempts: attempts.len(),
        })?;
        if scaled.len() != x.len() {
            return Err(SolveError::Backend {
                error: BackendError::Internal { code: -4 },
                attempts: attempts.len(),
            });
        }

        if let Some(factors) = &factors {
            factors.unscale(&mut scaled);
        }
        let relative_residual = relative_residual(matrix, rhs, &scaled, &mut ax);
        x.copy_from_slice(&scaled);
        log::trace!(
            "workspace: {} buffers, {} bytes",
            ws.buffers(),
            ws.used()
        );
        Ok(SolverStats {
            properties,
            regularization,
            row_scale,
            col_scale,
            attempts,
            relative_residual,
            workspace_bytes: ws.used(),
        })
    }
}

/// `||A x - b||_inf / ||b||_inf`, or the absolute residual when `b = 0`.
///
/// `ax` is scratch of length `nrows`. NaN when the product cannot be formed.
fn relative_residual(matrix: CscMatrixRef<'_>, rhs: &[f64], x: &[f64], ax: &mut [f64]) -> f64 {
    if x.len() != matrix.ncols() || matrix.mul_vec(x, ax).is_err() {
        return f64::NAN;
    }
    let res = ax
        .iter()
        .zip(rhs)
        .fold(0.0f64, |m, (a, b)| m.max((a - b).abs()));
    let b_norm = max_abs(rhs);
    if b_norm > 0.0 {
        res / b_norm
    } else {
        res
    }
}

fn max_abs(x: &[f64]) -> f64 {
    let mut max = 0.0;
    for &v in x {
        let v = v.abs();
        if v > max {
            max = v;
        }
    }
    max
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solves_identity() {
        let m = CscMatrixRef::new(3, 3, &[0, 1, 2, 3], &[0, 1, 2], &[1.0, 1.0, 1.0]).unwrap();
        let mut solver = RobustSolver::default();
        let mut x = [0.0; 3];
        let stats = solver
            .solve(m, &[2.0, 4.0, 6.0], &mut x, &SolverOptions::default(), None)
            .unwrap();
        assert_eq!(x, [2.0, 4.0, 6.0]);
        assert_eq!(stats.attempts.len(), 1);
        assert!(!stats.retried());
        assert!(stats.relative_residual < 1e-15);
    }

    #[test]
    fn rejects_wrong_rhs_length() {
        let m = CscMatrixRef::new(2, 2, &[0, 1, 2], &[0, 1], &[1.0, 1.0]).unwrap();
        let mut x = [0.0; 2];
        let err = RobustSolver::default()
            .solve(m, &[1.0], &mut x, &SolverOptions::default(), None)
            .unwrap_err();
        assert_eq!(err.status(), SolveStatus::IllegalArgument(arg::RHS));
    }

    #[test]
    fn rejects_wrong_solution_length() {
        let m = CscMatrixRef::new(2, 2, &[0, 1, 2], &[0, 1], &[1.0, 1.0]).unwrap();
        let mut x = [0.0; 3];
        let err = RobustSolver::default()
            .solve(m, &[1.0, 1.0], &mut x, &SolverOptions::default(), None)
            .unwrap_err();
        assert_eq!(
            err,
            SolveError::DimensionMismatch {
                arg: arg::SOLUTION,
                expected: 2,
                actual: 3
            }
        );
        assert_eq!(err.status(), SolveStatus::IllegalArgument(arg::SOLUTION));
    }

    #[test]
    fn invalid_rows_never_reach_the_backend() {
        let m = CscMatrixRef::new(2, 2, &[0, 1, 2], &[0, 3], &[1.0, 1.0]).unwrap();
        let mut x = [7.0; 2];
        let err = RobustSolver::default()
            .solve(m, &[1.0, 1.0], &mut x, &SolverOptions::default(), None)
            .unwrap_err();
        assert_eq!(err.status(), SolveStatus::InvalidFormat);
        assert_eq!(x, [0.0, 0.0]);
    }

    #[test]
    fn error_status_mapping() {
        let backend = |error| SolveError::Backend { error, attempts: 2 };
        assert_eq!(
            backend(BackendError::Singular { row: 3 }).status(),
            SolveStatus::SingularAt(3)
        );
        assert_eq!(
            backend(BackendError::OutOfMemory { bytes: 9 }).status(),
            SolveStatus::OutOfMemory(9)
        );
        assert_eq!(
            SolveError::AllocationFailure { bytes: 4 }.status(),
            SolveStatus::AllocationFailure(4)
        );
    }
}
