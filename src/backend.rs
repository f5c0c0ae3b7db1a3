//! Binding to the sparse direct solver that does the actual factorization.

use core::fmt;

use std::panic::{self, AssertUnwindSafe};

use dyn_stack::{GlobalPodBuffer, PodStack};
use faer_core::mat;
use faer_core::sparse::{SparseColMatRef, SymbolicSparseColMatRef};
use faer_core::{Conj, Parallelism};
use faer_sparse::colamd;
use faer_sparse::lu::{factorize_symbolic_lu, LuError, LuSymbolicParams, NumericLu};
use faer_sparse::{FaerError, SupernodalThreshold};

use crate::csc::CscMatrixRef;

/// Positions of the arguments of [`crate::solve`], used by
/// [`BackendError::IllegalArgument`].
pub mod arg {
    pub const VALUES: usize = 1;
    pub const ROW_INDICES: usize = 2;
    pub const COL_PTRS: usize = 3;
    pub const NROWS: usize = 4;
    pub const NCOLS: usize = 5;
    pub const NNZ: usize = 6;
    pub const RHS: usize = 7;
    pub const SOLUTION: usize = 8;
}

/// Column ordering / pivoting strategy handed to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderingPolicy {
    /// The backend's usual fill-reducing ordering.
    Default,
    /// A more conservative ordering for structurally deficient matrices.
    Robust,
}

impl fmt::Display for OrderingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => write!(f, "default"),
            Self::Robust => write!(f, "robust"),
        }
    }
}

/// Structured failure reported by a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The argument at this position (see [`arg`]) was rejected.
    IllegalArgument { arg: usize },
    /// Factorization hit an exactly zero pivot at this row.
    Singular { row: usize },
    /// The backend could not allocate; `bytes` is 0 when unknown.
    OutOfMemory { bytes: usize },
    /// Anything else the backend reports.
    Internal { code: i32 },
}

impl BackendError {
    /// Whether another attempt with a different policy may succeed.
    ///
    /// Memory exhaustion is final.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::OutOfMemory { .. })
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IllegalArgument { arg } => write!(f, "argument {arg} had an illegal value"),
            Self::Singular { row } => write!(f, "U({row},{row}) is exactly zero"),
            Self::OutOfMemory { bytes } => write!(f, "backend allocation of {bytes} bytes failed"),
            Self::Internal { code } => write!(f, "backend internal error {code}"),
        }
    }
}

impl std::error::Error for BackendError {}

/// A sparse direct solver: factorize `A` and solve `A x = b` in one call.
///
/// Implementations receive a matrix whose pointer structure is valid. Row
/// indices may be unsorted and may repeat. A backend that is not reentrant
/// must not be shared between solves; `&mut self` enforces that for a
/// single instance.
pub trait DirectSolver {
    fn factor_solve(
        &mut self,
        matrix: CscMatrixRef<'_>,
        rhs: &[f64],
        policy: OrderingPolicy,
    ) -> Result<Vec<f64>, BackendError>;

    /// Drops any state kept from a failed attempt.
    fn release(&mut self) {}
}

impl<S: DirectSolver + ?Sized> DirectSolver for &mut S {
    fn factor_solve(
        &mut self,
        matrix: CscMatrixRef<'_>,
        rhs: &[f64],
        policy: OrderingPolicy,
    ) -> Result<Vec<f64>, BackendError> {
        (**self).factor_solve(matrix, rhs, policy)
    }

    fn release(&mut self) {
        (**self).release()
    }
}

/// Sparse LU from `faer-sparse`.
///
/// `Default` uses COLAMD with aggressive absorption and lets faer pick
/// supernodal or simplicial factorization; `Robust` disables aggressive
/// absorption and forces the simplicial path.
#[derive(Debug, Clone)]
pub struct FaerLu {
    parallelism: Parallelism,
}

impl FaerLu {
    pub fn new(parallelism: Parallelism) -> Self {
        Self { parallelism }
    }
}

impl Default for FaerLu {
    fn default() -> Self {
        Self::new(Parallelism::None)
    }
}

impl DirectSolver for FaerLu {
    fn factor_solve(
        &mut self,
        matrix: CscMatrixRef<'_>,
        rhs: &[f64],
        policy: OrderingPolicy,
    ) -> Result<Vec<f64>, BackendError> {
        let n = matrix.nrows();
        if matrix.ncols() != n {
            return Err(BackendError::IllegalArgument { arg: arg::NCOLS });
        }
        if rhs.len() != n {
            return Err(BackendError::IllegalArgument { arg: arg::RHS });
        }

        let (col_ptrs, row_indices, values) = canonicalize(matrix)?;
        // SAFETY: canonicalize returns monotonic pointers ending at the entry
        // count and sorted, unique, in-bounds row indices per column.
        let symbolic = unsafe {
            SymbolicSparseColMatRef::new_unchecked(n, n, &col_ptrs, None, &row_indices)
        };

        let params = match policy {
            OrderingPolicy::Default => LuSymbolicParams::default(),
            OrderingPolicy::Robust => LuSymbolicParams {
                colamd_params: colamd::Control {
                    aggressive: false,
                    ..Default::default()
                },
                supernodal_flop_ratio_threshold: SupernodalThreshold::FORCE_SIMPLICIAL,
                ..Default::default()
            },
        };
        let symbolic_lu = factorize_symbolic_lu(symbolic, params).map_err(map_faer_error)?;

        let factor_req = symbolic_lu
            .factorize_numeric_lu_req::<f64>(self.parallelism)
            .map_err(|_| BackendError::OutOfMemory { bytes: 0 })?;
        let solve_req = symbolic_lu
            .solve_in_place_req::<f64>(1, self.parallelism)
            .map_err(|_| BackendError::OutOfMemory { bytes: 0 })?;
        let req = factor_req
            .try_or(solve_req)
            .map_err(|_| BackendError::OutOfMemory { bytes: 0 })?;
        let mut stack = GlobalPodBuffer::try_new(req).map_err(|_| BackendError::OutOfMemory {
            bytes: req.size_bytes(),
        })?;

        let a = SparseColMatRef::<'_, usize, f64>::new(symbolic, values.as_slice());
        let parallelism = self.parallelism;
        // The simplicial path panics on an exactly zero pivot instead of
        // returning an error; the pivot index is lost with it.
        let solved = panic::catch_unwind(AssertUnwindSafe(|| -> Result<Vec<f64>, BackendError> {
            let mut numeric = NumericLu::<usize, f64>::new();
            let lu = symbolic_lu
                .factorize_numeric_lu(&mut numeric, a, parallelism, PodStack::new(&mut stack))
                .map_err(map_lu_error)?;

            let mut x = rhs.to_vec();
            let rhs_mat = mat::from_column_major_slice_mut::<f64>(&mut x, n, 1);
            lu.solve_in_place_with_conj(Conj::No, rhs_mat, parallelism, PodStack::new(&mut stack));
            Ok(x)
        }));
        let x = match solved {
            Ok(result) => result?,
            Err(_) => {
                log::debug!("faer LU hit a zero pivot under the {policy} policy");
                return Err(BackendError::Singular { row: 0 });
            }
        };

        // Tiny nonzero pivots can still overflow the solution.
        if let Some(row) = x.iter().position(|v| !v.is_finite()) {
            return Err(BackendError::Singular { row });
        }
        Ok(x)
    }
}

/// Sorts row indices within each column and sums duplicates.
fn canonicalize(
    matrix: CscMatrixRef<'_>,
) -> Result<(Vec<usize>, Vec<usize>, Vec<f64>), BackendError> {
    let ncols = matrix.ncols();
    let nnz = matrix.nnz();
    let mut col_ptrs = Vec::with_capacity(ncols + 1);
    let mut row_indices = Vec::with_capacity(nnz);
    let mut values = Vec::with_capacity(nnz);
    let mut entries: Vec<(usize, f64)> = Vec::new();

    col_ptrs.push(0);
    for col in 0..ncols {
        let range = matrix
            .col_range(col)
            .map_err(|_| BackendError::IllegalArgument { arg: arg::COL_PTRS })?;
        entries.clear();
        for pos in range {
            let row = matrix
                .row_at(pos)
                .map_err(|_| BackendError::IllegalArgument { arg: arg::ROW_INDICES })?;
            entries.push((row, matrix.values()[pos]));
        }
        entries.sort_unstable_by_key(|&(row, _)| row);
        for &(row, value) in &entries {
            if row_indices.len() > col_ptrs[col] && row_indices.last() == Some(&row) {
                if let Some(last) = values.last_mut() {
                    *last += value;
                }
            } else {
                row_indices.push(row);
                values.push(value);
            }
        }
        col_ptrs.push(row_indices.len());
    }
    Ok((col_ptrs, row_indices, values))
}

fn map_faer_error(err: FaerError) -> BackendError {
    match err {
        FaerError::OutOfMemory => BackendError::OutOfMemory { bytes: 0 },
        FaerError::IndexOverflow => BackendError::Internal { code: -1 },
        #[allow(unreachable_patterns)]
        _ => BackendError::Internal { code: -2 },
    }
}

fn map_lu_error(err: LuError) -> BackendError {
    match err {
        LuError::SymbolicSingular(row) => BackendError::Singular { row },
        LuError::Generic(err) => map_faer_error(err),
        #[allow(unreachable_patterns)]
        _ => BackendError::Internal { code: -3 },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalize_sorts_and_sums() {
        let m = CscMatrixRef::new(3, 2, &[0, 3, 4], &[2, 0, 2, 1], &[1.0, 2.0, 3.0, 4.0]).unwrap();
        let (ptrs, rows, vals) = canonicalize(m).unwrap();
        assert_eq!(ptrs, vec![0, 2, 3]);
        assert_eq!(rows, vec![0, 2, 1]);
        assert_eq!(vals, vec![2.0, 4.0, 4.0]);
    }

    #[test]
    fn canonicalize_rejects_bad_rows() {
        let m = CscMatrixRef::new(2, 1, &[0, 1], &[4], &[1.0]).unwrap();
        assert_eq!(
            canonicalize(m).unwrap_err(),
            BackendError::IllegalArgument {
                arg: arg::ROW_INDICES
            }
        );
    }

    #[test]
    fn faer_solves_small_system() {
        // [ 2 1 ]
        // [ 1 3 ]
        let m = CscMatrixRef::new(2, 2, &[0, 2, 4], &[0, 1, 0, 1], &[2.0, 1.0, 1.0, 3.0]).unwrap();
        for policy in [OrderingPolicy::Default, OrderingPolicy::Robust] {
            let x = FaerLu::default().factor_solve(m, &[3.0, 4.0], policy).unwrap();
            assert!((x[0] - 1.0).abs() < 1e-12);
            assert!((x[1] - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn faer_rejects_rectangular() {
        let m = CscMatrixRef::new(2, 1, &[0, 2], &[0, 1], &[1.0, 1.0]).unwrap();
        assert_eq!(
            FaerLu::default()
                .factor_solve(m, &[1.0, 1.0], OrderingPolicy::Default)
                .unwrap_err(),
            BackendError::IllegalArgument { arg: arg::NCOLS }
        );
    }

    #[test]
    fn faer_reports_singular_matrix() {
        // Column 1 is empty.
        let m = CscMatrixRef::new(2, 2, &[0, 2, 2], &[0, 1], &[1.0, 1.0]).unwrap();
        let err = FaerLu::default()
            .factor_solve(m, &[1.0, 1.0], OrderingPolicy::Default)
            .unwrap_err();
        assert!(matches!(err, BackendError::Singular { .. }), "{err:?}");
    }

    #[test]
    fn faer_reports_zero_pivot_under_both_policies() {
        // [ 1 1 ]
        // [ 1 1 ]
        let m = CscMatrixRef::new(2, 2, &[0, 2, 4], &[0, 1, 0, 1], &[1.0; 4]).unwrap();
        for policy in [OrderingPolicy::Default, OrderingPolicy::Robust] {
            let err = FaerLu::default()
                .factor_solve(m, &[1.0, 1.0], policy)
                .unwrap_err();
            assert!(matches!(err, BackendError::Singular { .. }), "{policy}: {err:?}");
        }
    }

    #[test]
    fn split_zero_diagonal_is_singular() {
        // (0, 0) stored as 1 and -1.
        let m = CscMatrixRef::new(2, 2, &[0, 2, 3], &[0, 0, 1], &[1.0, -1.0, 1.0]).unwrap();
        let err = FaerLu::default()
            .factor_solve(m, &[1.0, 1.0], OrderingPolicy::Robust)
            .unwrap_err();
        assert!(matches!(err, BackendError::Singular { .. }), "{err:?}");
    }

    #[test]
    fn out_of_memory_is_not_retryable() {
        assert!(!BackendError::OutOfMemory { bytes: 8 }.is_retryable());
        assert!(BackendError::Singular { row: 0 }.is_retryable());
        assert!(BackendError::IllegalArgument { arg: arg::RHS }.is_retryable());
        assert!(BackendError::Internal { code: -1 }.is_retryable());
    }
}
