use crate::csc::CscMatrixRef;
use crate::solver::SolveError;
use crate::workspace::Workspace;

/// Cheap structural and magnitude indicators computed before solving.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatrixProperties {
    /// Rows `i < min(nrows, ncols)` without a stored `(i, i)` entry.
    pub missing_diagonals: usize,
    /// `min |a_ii| / max |a_ii|` over stored diagonals (duplicates summed), 0 when undefined.
    pub diag_ratio: f64,
    /// `max_i sum_j |a_ij| * max_j sum_i |a_ij|`, infinite when zero.
    pub condition_estimate: f64,
    /// Any missing diagonal, a ratio below 1e-10, or an estimate above 1e15.
    pub likely_singular: bool,
}

impl MatrixProperties {
    pub fn compute(matrix: CscMatrixRef<'_>) -> Result<Self, SolveError> {
        compute_in(matrix, &mut Workspace::new(None))
    }
}

pub(crate) fn compute_in(
    matrix: CscMatrixRef<'_>,
    ws: &mut Workspace,
) -> Result<MatrixProperties, SolveError> {
    let n = matrix.nrows().min(matrix.ncols());
    let values = matrix.values();
    let mut row_sums = ws.alloc(matrix.nrows(), 0.0f64)?;

    let mut has_diag = 0usize;
    let mut min_diag = f64::INFINITY;
    let mut max_diag = 0.0f64;
    let mut max_col_sum = 0.0f64;
    for col in 0..matrix.ncols() {
        let mut col_sum = 0.0;
        let mut diag: Option<f64> = None;
        for pos in matrix.col_range(col)? {
            let row = matrix.row_at(pos)?;
            let v = values[pos].abs();
            row_sums[row] += v;
            col_sum += v;
            if row == col && col < n {
                *diag.get_or_insert(0.0) += values[pos];
            }
        }
        if let Some(d) = diag {
            has_diag += 1;
            min_diag = min_diag.min(d.abs());
            max_diag = max_diag.max(d.abs());
        }
        max_col_sum = max_col_sum.max(col_sum);
    }
    let max_row_sum = row_sums.iter().copied().fold(0.0f64, f64::max);

    let mut condition_estimate = max_row_sum * max_col_sum;
    if condition_estimate == 0.0 {
        condition_estimate = f64::INFINITY;
    }
    let diag_ratio = if min_diag.is_finite() && max_diag > 0.0 {
        min_diag / max_diag
    } else {
        0.0
    };
    let missing_diagonals = n - has_diag;
    let likely_singular =
        missing_diagonals > 0 || diag_ratio < 1e-10 || condition_estimate > 1e15;

    Ok(MatrixProperties {
        missing_diagonals,
        diag_ratio,
        condition_estimate,
        likely_singular,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::csc::CscMatrix;

    #[test]
    fn identity_is_well_posed() {
        let m = CscMatrix::new(3, 3, vec![0, 1, 2, 3], vec![0, 1, 2], vec![1.0; 3]).unwrap();
        let p = MatrixProperties::compute(m.as_ref()).unwrap();
        assert_eq!(p.missing_diagonals, 0);
        assert_eq!(p.diag_ratio, 1.0);
        assert_eq!(p.condition_estimate, 1.0);
        assert!(!p.likely_singular);
    }

    #[test]
    fn flags_missing_and_tiny_diagonals() {
        let m = CscMatrix::new(2, 2, vec![0, 2, 3], vec![0, 1, 0], vec![1.0, 1.0, 1.0]).unwrap();
        let p = MatrixProperties::compute(m.as_ref()).unwrap();
        assert_eq!(p.missing_diagonals, 1);
        assert!(p.likely_singular);

        let m = CscMatrix::new(2, 2, vec![0, 1, 2], vec![0, 1], vec![1.0, 1e-12]).unwrap();
        let p = MatrixProperties::compute(m.as_ref()).unwrap();
        assert!(p.diag_ratio < 1e-10);
        assert!(p.likely_singular);
    }

    #[test]
    fn duplicate_diagonal_entries_are_summed() {
        // (0, 0) stored as 1 and -1.
        let m = CscMatrix::new(2, 2, vec![0, 2, 3], vec![0, 0, 1], vec![1.0, -1.0, 1.0]).unwrap();
        let p = MatrixProperties::compute(m.as_ref()).unwrap();
        assert_eq!(p.missing_diagonals, 0);
        assert_eq!(p.diag_ratio, 0.0);
        assert!(p.likely_singular);
    }

    #[test]
    fn all_zero_matrix_has_infinite_estimate() {
        let m = CscMatrix::new(1, 1, vec![0, 1], vec![0], vec![0.0]).unwrap();
        let p = MatrixProperties::compute(m.as_ref()).unwrap();
        assert!(p.condition_estimate.is_infinite());
        assert_eq!(p.diag_ratio, 0.0);
    }
}
