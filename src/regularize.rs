//! Diagonal regularization for locally degenerate rows.
//!
//! Rows `i < min(nrows, ncols)` are classified as
//! - empty: absolute row mass below the magnitude floor,
//! - missing-diagonal: no stored `(i, i)` entry,
//! - weak-diagonal: stored `(i, i)` entries whose sum is below the floor.
//!
//! When any row qualifies, a single magnitude
//! `max(mean(|a_ij| > floor) * factor, min_magnitude)` replaces every weak
//! diagonal, keeping its sign. Missing diagonals are either reported or
//! inserted depending on [`MissingDiagonal`]. Well-posed matrices are never
//! touched.

use crate::csc::{CscMatrix, CscMatrixRef};
use crate::solver::SolveError;
use crate::workspace::Workspace;

/// What to do with rows that have no stored diagonal entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissingDiagonal {
    /// Log the rows and leave the structure alone; the backend sees them as-is.
    #[default]
    Report,
    /// Rebuild the working copy with an explicit diagonal of the
    /// regularization magnitude in each such row.
    Insert,
}

#[derive(Debug, Clone, Copy)]
pub struct RegularizationParams {
    /// Magnitudes below this count as zero.
    pub magnitude_floor: f64,
    /// Multiplier applied to the mean entry magnitude.
    pub factor: f64,
    /// Smallest magnitude ever written to a diagonal.
    pub min_magnitude: f64,
    pub missing_diagonal: MissingDiagonal,
}

impl Default for RegularizationParams {
    fn default() -> Self {
        Self {
            magnitude_floor: 1e-10,
            factor: 1e-8,
            min_magnitude: 1e-14,
            missing_diagonal: MissingDiagonal::Report,
        }
    }
}

/// Outcome of the regularization pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegularizationReport {
    pub empty_rows: usize,
    pub missing_diagonals: usize,
    pub weak_diagonals: usize,
    /// Weak diagonals overwritten.
    pub perturbed: usize,
    /// Diagonal entries added under [`MissingDiagonal::Insert`].
    pub inserted: usize,
    /// Magnitude used, `None` when no row qualified.
    pub magnitude: Option<f64>,
}

impl RegularizationReport {
    /// True when at least one row qualified and the pass ran.
    pub fn triggered(&self) -> bool {
        self.magnitude.is_some()
    }

    /// Rows that still lack a diagonal after the pass.
    pub fn unresolved(&self) -> usize {
        self.missing_diagonals - self.inserted
    }
}

/// Per-row view built during analysis; dropped with the pass.
struct RowState {
    diag_pos: Vec<Option<usize>>,
    row_mass: Vec<f64>,
    /// Sum of every stored `(i, i)` entry.
    diag_sum: Vec<f64>,
}

/// Regularizes `matrix` in place.
pub fn regularize(
    matrix: &mut CscMatrix,
    params: &RegularizationParams,
) -> Result<RegularizationReport, SolveError> {
    regularize_in(matrix, params, &mut Workspace::new(None))
}

pub(crate) fn regularize_in(
    matrix: &mut CscMatrix,
    params: &RegularizationParams,
    ws: &mut Workspace,
) -> Result<RegularizationReport, SolveError> {
    let state = analyze(matrix.as_ref(), ws)?;
    let floor = params.magnitude_floor;

    let mut report = RegularizationReport::default();
    for (row, (pos, &mass)) in state.diag_pos.iter().zip(&state.row_mass).enumerate() {
        if mass < floor {
            report.empty_rows += 1;
        }
        match *pos {
            None => report.missing_diagonals += 1,
            Some(_) if state.diag_sum[row].abs() < floor => report.weak_diagonals += 1,
            Some(_) => {}
        }
    }
    if report.empty_rows == 0 && report.missing_diagonals == 0 && report.weak_diagonals == 0 {
        return Ok(report);
    }

    let magnitude = regularization_magnitude(matrix.values(), params);
    report.magnitude = Some(magnitude);

    let (col_ptrs, row_indices, values) = matrix.parts_mut();
    for (row, pos) in state.diag_pos.iter().enumerate() {
        let Some(first) = *pos else {
            continue;
        };
        let sum = state.diag_sum[row];
        if sum.abs() >= floor {
            continue;
        }
        // Duplicates of (row, row) after the first slot are folded into it.
        for p in first + 1..col_ptrs[row + 1] {
            if row_indices[p] == row {
                values[p] = 0.0;
            }
        }
        values[first] = if sum < 0.0 { -magnitude } else { magnitude };
        report.perturbed += 1;
    }

    if report.missing_diagonals > 0 {
        match params.missing_diagonal {
            MissingDiagonal::Report => {
                let rows: Vec<usize> = state
                    .diag_pos
                    .iter()
                    .enumerate()
                    .filter(|(_, p)| p.is_none())
                    .map(|(i, _)| i)
                    .take(10)
                    .collect();
                log::warn!(
                    "{} rows have no diagonal entry (first: {rows:?}); left unregularized",
                    report.missing_diagonals
                );
            }
            MissingDiagonal::Insert => {
                report.inserted = insert_diagonals(matrix, &state.diag_pos, magnitude, ws)?;
            }
        }
    }

    log::warn!(
        "regularized diagonal: empty={} missing={} weak={} perturbed={} inserted={} magnitude={:.3e}",
        report.empty_rows,
        report.missing_diagonals,
        report.weak_diagonals,
        report.perturbed,
        report.inserted,
        magnitude
    );
    Ok(report)
}

fn analyze(matrix: CscMatrixRef<'_>, ws: &mut Workspace) -> Result<RowState, SolveError> {
    let n = matrix.nrows().min(matrix.ncols());
    let values = matrix.values();
    let mut diag_pos = ws.alloc(n, None)?;
    let mut row_mass = ws.alloc(n, 0.0f64)?;
    let mut diag_sum = ws.alloc(n, 0.0f64)?;
    for col in 0..matrix.ncols() {
        for pos in matrix.col_range(col)? {
            let row = matrix.row_at(pos)?;
            if row >= n {
                continue;
            }
            row_mass[row] += values[pos].abs();
            if row == col {
                diag_sum[row] += values[pos];
                if diag_pos[row].is_none() {
                    diag_pos[row] = Some(pos);
                }
            }
        }
    }
    Ok(RowState {
        diag_pos,
        row_mass,
        diag_sum,
    })
}

fn regularization_magnitude(values: &[f64], params: &RegularizationParams) -> f64 {
    let mut sum = 0.0;
    let mut count = 0usize;
    for &v in values {
        let v = v.abs();
        if v > params.magnitude_floor {
            sum += v;
            count += 1;
        }
    }
    let mean = if count > 0 { sum / count as f64 } else { 1.0 };
    (mean * params.factor).max(params.min_magnitude)
}

fn insert_diagonals(
    matrix: &mut CscMatrix,
    diag_pos: &[Option<usize>],
    magnitude: f64,
    ws: &mut Workspace,
) -> Result<usize, SolveError> {
    let missing = diag_pos.iter().filter(|p| p.is_none()).count();
    let ncols = matrix.ncols();
    let nnz = matrix.nnz() + missing;

    let mut col_ptrs = ws.with_capacity(ncols + 1)?;
    let mut row_indices = ws.with_capacity(nnz)?;
    let mut values = ws.with_capacity(nnz)?;
    let view = matrix.as_ref();
    col_ptrs.push(0);
    for col in 0..ncols {
        let range = view.col_range(col)?;
        row_indices.extend_from_slice(&view.row_indices()[range.clone()]);
        values.extend_from_slice(&view.values()[range]);
        if diag_pos.get(col).is_some_and(|p| p.is_none()) {
            row_indices.push(col);
            values.push(magnitude);
        }
        col_ptrs.push(row_indices.len());
    }
    matrix.replace_storage(col_ptrs, row_indices, values);
    Ok(missing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::csc::FormatError;

    #[test]
    fn well_posed_matrix_is_untouched() {
        let mut m = CscMatrix::new(2, 2, vec![0, 2, 4], vec![0, 1, 0, 1], vec![4.0, 1.0, 1.0, 3.0])
            .unwrap();
        let before = m.clone();
        let report = regularize(&mut m, &RegularizationParams::default()).unwrap();
        assert!(!report.triggered());
        assert_eq!(m, before);
    }

    #[test]
    fn weak_diagonals_take_magnitude_with_sign() {
        // diag: 0.0 (explicit), -1e-12, 2.0
        let mut m = CscMatrix::new(
            3,
            3,
            vec![0, 1, 2, 3],
            vec![0, 1, 2],
            vec![0.0, -1e-12, 2.0],
        )
        .unwrap();
        let report = regularize(&mut m, &RegularizationParams::default()).unwrap();
        assert_eq!(report.weak_diagonals, 2);
        assert_eq!(report.empty_rows, 2);
        assert_eq!(report.perturbed, 2);
        // Only 2.0 is above the floor.
        let expected = 2.0 * 1e-8;
        assert_eq!(report.magnitude, Some(expected));
        assert_eq!(m.values(), &[expected, -expected, 2.0]);
    }

    #[test]
    fn split_diagonal_is_judged_by_its_sum() {
        // (0, 0) stored as 1 and -1, (1, 1) as 0.5 and 0.5.
        let mut m = CscMatrix::new(
            2,
            2,
            vec![0, 2, 4],
            vec![0, 0, 1, 1],
            vec![1.0, -1.0, 0.5, 0.5],
        )
        .unwrap();
        let report = regularize(&mut m, &RegularizationParams::default()).unwrap();
        assert_eq!(report.weak_diagonals, 1);
        assert_eq!(report.perturbed, 1);
        let magnitude = report.magnitude.unwrap();
        // mean of |1|, |-1|, |0.5|, |0.5|
        assert_eq!(magnitude, 0.75 * 1e-8);
        assert_eq!(m.values(), &[magnitude, 0.0, 0.5, 0.5]);
    }

    #[test]
    fn magnitude_has_a_floor_and_a_default() {
        let params = RegularizationParams::default();
        assert_eq!(regularization_magnitude(&[0.0, 0.0], &params), 1e-8);
        assert_eq!(regularization_magnitude(&[1e-9], &params), 1e-14);
    }

    #[test]
    fn missing_diagonal_is_reported_by_default() {
        // [ 1 1 ]
        // [ 1 0 ]  (no (1,1) entry)
        let mut m =
            CscMatrix::new(2, 2, vec![0, 2, 3], vec![0, 1, 0], vec![1.0, 1.0, 1.0]).unwrap();
        let before = m.clone();
        let report = regularize(&mut m, &RegularizationParams::default()).unwrap();
        assert_eq!(report.missing_diagonals, 1);
        assert_eq!(report.inserted, 0);
        assert_eq!(report.unresolved(), 1);
        assert!(report.triggered());
        assert_eq!(m, before);
    }

    #[test]
    fn missing_diagonal_can_be_inserted() {
        let mut m =
            CscMatrix::new(2, 2, vec![0, 2, 3], vec![0, 1, 0], vec![1.0, 1.0, 1.0]).unwrap();
        let params = RegularizationParams {
            missing_diagonal: MissingDiagonal::Insert,
            ..RegularizationParams::default()
        };
        let report = regularize(&mut m, &params).unwrap();
        assert_eq!(report.inserted, 1);
        assert_eq!(report.unresolved(), 0);
        assert_eq!(m.col_ptrs(), &[0, 2, 4]);
        assert_eq!(m.row_indices(), &[0, 1, 0, 1]);
        assert_eq!(m.values()[3], 1e-8);
    }

    #[test]
    fn rectangular_only_inspects_leading_square() {
        // 3x2, row 2 is outside min(nrows, ncols).
        let mut m =
            CscMatrix::new(3, 2, vec![0, 2, 3], vec![0, 2, 1], vec![1.0, 5.0, 1.0]).unwrap();
        let report = regularize(&mut m, &RegularizationParams::default()).unwrap();
        assert!(!report.triggered());
    }

    #[test]
    fn bad_row_index_aborts() {
        let mut m = CscMatrix::from_parts(2, 2, vec![0, 1, 2], vec![0, 9], vec![1.0, 1.0]);
        let err = regularize(&mut m, &RegularizationParams::default()).unwrap_err();
        assert!(matches!(
            err,
            SolveError::InvalidFormat(FormatError::IndexOutOfBounds { index: 9, .. })
        ));
    }
}
