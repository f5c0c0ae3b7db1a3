//! Robust sparse direct solves for `A x = b` with `A` in compressed sparse column (CSC) form.
//!
//! The factorization itself is delegated to a direct solver backend (faer's
//! sparse LU by default). Around it this crate:
//! - validates the CSC structure,
//! - regularizes empty rows and vanishing diagonals,
//! - equilibrates rows and columns with square-root scaling,
//! - retries once with a more robust ordering when the backend fails,
//! - maps the scaled solution back to the original system.
//!
//! The caller's arrays are never written; every call works on private copies
//! that are dropped before it returns.
//!
//! Calling it:
//! - Flat entry point: [`solve`] returns the solution and a [`SolveStatus`].
//! - Typed entry point: build a [`CscMatrixRef`], then call
//!   [`RobustSolver::solve`] and inspect [`SolverStats`].
//! - Custom backends implement [`DirectSolver`].
//!
//! Example:
//! ```rust,no_run
//! use robust_spsolve::{CscMatrixRef, RobustSolver, SolverOptions};
//! use faer_core::Parallelism;
//!
//! let a = CscMatrixRef::new(2, 2, &[0, 2, 4], &[0, 1, 0, 1], &[2.0, 1.0, 1.0, 3.0]).unwrap();
//! let mut solver = RobustSolver::new(Parallelism::None);
//! let mut x = vec![0.0; 2];
//! let stats = solver.solve(a, &[3.0, 4.0], &mut x, &SolverOptions::default(), None).unwrap();
//! assert!(stats.relative_residual < 1e-12);
//! ```

mod backend;
mod convert;
mod csc;
mod orchestrator;
mod properties;
mod regularize;
mod report;
mod scaling;
mod solver;
mod workspace;

pub use backend::{arg, BackendError, DirectSolver, FaerLu, OrderingPolicy};
pub use csc::{validate, CscMatrix, CscMatrixRef, FormatError};
pub use orchestrator::{AttemptReport, RetryPlan, Stage};
pub use properties::MatrixProperties;
pub use regularize::{regularize, MissingDiagonal, RegularizationParams, RegularizationReport};
pub use report::{AnalysisReport, Reporter, SolveStatus, SolverStats, StdoutReporter};
pub use scaling::{ScalingFactors, ScalingParams};
pub use solver::{RobustSolver, SolveError, SolverOptions};
pub use workspace::AllocError;

/// Solves `A x = rhs` for a CSC matrix given as raw arrays.
///
/// The solution has `nrows` entries and is all zeros unless the status is
/// [`SolveStatus::Success`].
pub fn solve(
    values: &[f64],
    row_indices: &[usize],
    col_ptrs: &[usize],
    nrows: usize,
    ncols: usize,
    nnz: usize,
    rhs: &[f64],
) -> (Vec<f64>, SolveStatus) {
    let mut x = vec![0.0; nrows];
    let status = solve_into(
        values,
        row_indices,
        col_ptrs,
        nrows,
        ncols,
        nnz,
        rhs,
        &mut x,
        &SolverOptions::default(),
    );
    (x, status)
}

/// Like [`solve`], writing into a caller-owned buffer with explicit options.
#[allow(clippy::too_many_arguments)]
pub fn solve_into(
    values: &[f64],
    row_indices: &[usize],
    col_ptrs: &[usize],
    nrows: usize,
    ncols: usize,
    nnz: usize,
    rhs: &[f64],
    x: &mut [f64],
    options: &SolverOptions,
) -> SolveStatus {
    x.fill(0.0);
    if let Err(err) = validate(nrows, ncols, nnz, col_ptrs, row_indices, values) {
        log::warn!("rejected matrix: {err}");
        return SolveStatus::InvalidFormat;
    }
    let matrix = CscMatrixRef::from_parts(nrows, ncols, col_ptrs, row_indices, values);
    let mut solver = RobustSolver::default();
    match solver.solve(matrix, rhs, x, options, None) {
        Ok(_) => SolveStatus::Success,
        Err(err) => {
            log::warn!("{err}");
            err.status()
        }
    }
}

/// Solves `A x = rhs` with `A` given as coordinate triplets; duplicates are summed.
pub fn solve_coo(
    rows: &[usize],
    cols: &[usize],
    values: &[f64],
    shape: (usize, usize),
    rhs: &[f64],
) -> (Vec<f64>, SolveStatus) {
    let (nrows, ncols) = shape;
    match CscMatrix::from_triplets(nrows, ncols, rows, cols, values) {
        Ok(m) => solve_owned(&m, rhs),
        Err(err) => {
            log::warn!("rejected triplets: {err}");
            (vec![0.0; nrows], SolveStatus::InvalidFormat)
        }
    }
}

/// Solves `A x = rhs` with `A` given in compressed sparse row form.
pub fn solve_csr(
    row_ptrs: &[usize],
    col_indices: &[usize],
    values: &[f64],
    shape: (usize, usize),
    rhs: &[f64],
) -> (Vec<f64>, SolveStatus) {
    let (nrows, ncols) = shape;
    match CscMatrix::from_csr(nrows, ncols, row_ptrs, col_indices, values) {
        Ok(m) => solve_owned(&m, rhs),
        Err(err) => {
            log::warn!("rejected CSR matrix: {err}");
            (vec![0.0; nrows], SolveStatus::InvalidFormat)
        }
    }
}

fn solve_owned(m: &CscMatrix, rhs: &[f64]) -> (Vec<f64>, SolveStatus) {
    solve(
        m.values(),
        m.row_indices(),
        m.col_ptrs(),
        m.nrows(),
        m.ncols(),
        m.nnz(),
        rhs,
    )
}
