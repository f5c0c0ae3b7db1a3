//! Row/column equilibration and its inverse on the solution.

use crate::csc::{check_len, CscMatrix, CscMatrixRef, FormatError};
use crate::solver::SolveError;
use crate::workspace::Workspace;

/// Parameters of the square-root equilibration.
#[derive(Debug, Clone, Copy)]
pub struct ScalingParams {
    /// Lower clamp for every factor.
    pub min: f64,
    /// Upper clamp for every factor.
    pub max: f64,
    /// Rows/columns whose largest magnitude is at or below this keep factor 1.
    pub magnitude_floor: f64,
}

impl Default for ScalingParams {
    fn default() -> Self {
        Self {
            min: 1e-4,
            max: 1e4,
            magnitude_floor: 1e-10,
        }
    }
}

/// Row factors `r` and column factors `c`, all strictly positive.
///
/// The scaled system is `(diag(r) A diag(c)) y = diag(r) b` with `x = diag(c) y`.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalingFactors {
    rows: Vec<f64>,
    cols: Vec<f64>,
}

impl ScalingFactors {
    /// Computes factors for a matrix. Pure: the same input gives the same factors.
    pub fn compute(matrix: CscMatrixRef<'_>, params: &ScalingParams) -> Result<Self, SolveError> {
        compute_factors(matrix, params, &mut Workspace::new(None))
    }

    pub fn rows(&self) -> &[f64] {
        &self.rows
    }

    pub fn cols(&self) -> &[f64] {
        &self.cols
    }

    /// Smallest and largest row factor.
    pub fn row_range(&self) -> (f64, f64) {
        min_max(&self.rows)
    }

    /// Smallest and largest column factor.
    pub fn col_range(&self) -> (f64, f64) {
        min_max(&self.cols)
    }

    /// Scales `values[k] *= r[row(k)] * c[col(k)]` and `rhs[i] *= r[i]`.
    ///
    /// Checks the pointer and row structure before scaling anything, so it is
    /// safe on a matrix that never went through validation.
    pub fn apply(&self, matrix: &mut CscMatrix, rhs: &mut [f64]) -> Result<(), FormatError> {
        let nrows = matrix.nrows();
        let ncols = matrix.ncols();
        check_len("row factors", nrows, self.rows.len())?;
        check_len("column factors", ncols, self.cols.len())?;
        check_len("rhs", nrows, rhs.len())?;

        let view = matrix.as_ref();
        for col in 0..ncols {
            for pos in view.col_range(col)? {
                view.row_at(pos)?;
            }
        }

        let (col_ptrs, row_indices, values) = matrix.parts_mut();
        for col in 0..ncols {
            let cj = self.cols[col];
            for pos in col_ptrs[col]..col_ptrs[col + 1] {
                values[pos] *= self.rows[row_indices[pos]] * cj;
            }
        }
        for (b, r) in rhs.iter_mut().zip(&self.rows) {
            *b *= r;
        }
        Ok(())
    }

    /// Maps the scaled solution back: `x[i] *= c[i]` for `i < min(nrows, ncols)`.
    ///
    /// Entries past that range are left as they are.
    pub fn unscale(&self, x: &mut [f64]) {
        let n = self.rows.len().min(self.cols.len()).min(x.len());
        for (xi, ci) in x[..n].iter_mut().zip(&self.cols) {
            *xi *= ci;
        }
    }
}

pub(crate) fn compute_factors(
    matrix: CscMatrixRef<'_>,
    params: &ScalingParams,
    ws: &mut Workspace,
) -> Result<ScalingFactors, SolveError> {
    let nrows = matrix.nrows();
    let ncols = matrix.ncols();
    let values = matrix.values();

    let mut row_max = ws.alloc(nrows, 0.0f64)?;
    let mut col_max = ws.alloc(ncols, 0.0f64)?;
    for (col, cmax) in col_max.iter_mut().enumerate() {
        for pos in matrix.col_range(col)? {
            let row = matrix.row_at(pos)?;
            let v = values[pos].abs();
            if v > row_max[row] {
                row_max[row] = v;
            }
            if v > *cmax {
                *cmax = v;
            }
        }
    }

    let mut rows = ws.alloc(nrows, 1.0f64)?;
    let mut cols = ws.alloc(ncols, 1.0f64)?;
    for (r, &m) in rows.iter_mut().zip(&row_max) {
        *r = factor(m, params);
    }
    for (c, &m) in cols.iter_mut().zip(&col_max) {
        *c = factor(m, params);
    }
    Ok(ScalingFactors { rows, cols })
}

fn factor(max_abs: f64, params: &ScalingParams) -> f64 {
    if max_abs > params.magnitude_floor {
        (1.0 / max_abs.sqrt()).max(params.min).min(params.max)
    } else {
        1.0
    }
}

fn min_max(v: &[f64]) -> (f64, f64) {
    v.iter()
        .fold((f64::INFINITY, 0.0f64), |(lo, hi), &x| (lo.min(x), hi.max(x)))
}
