//! Conversions from coordinate and compressed-row layouts.

use crate::csc::{check_len, check_ptrs, CscMatrix, FormatError};

impl CscMatrix {
    /// Builds a CSC matrix from coordinate triplets.
    ///
    /// Rows end up sorted within each column and duplicate `(row, col)`
    /// entries are summed.
    pub fn from_triplets(
        nrows: usize,
        ncols: usize,
        rows: &[usize],
        cols: &[usize],
        values: &[f64],
    ) -> Result<Self, FormatError> {
        if nrows == 0 || ncols == 0 {
            return Err(FormatError::EmptyDimensions { nrows, ncols });
        }
        if values.is_empty() {
            return Err(FormatError::NoEntries);
        }
        check_len("rows", values.len(), rows.len())?;
        check_len("cols", values.len(), cols.len())?;
        for (pos, (&row, &col)) in rows.iter().zip(cols).enumerate() {
            if row >= nrows {
                return Err(FormatError::IndexOutOfBounds {
                    pos,
                    index: row,
                    bound: nrows,
                });
            }
            if col >= ncols {
                return Err(FormatError::IndexOutOfBounds {
                    pos,
                    index: col,
                    bound: ncols,
                });
            }
        }

        // Counting sort by column.
        let mut col_ptrs = vec![0usize; ncols + 1];
        for &col in cols {
            col_ptrs[col + 1] += 1;
        }
        for col in 0..ncols {
            col_ptrs[col + 1] += col_ptrs[col];
        }
        let mut next = col_ptrs[..ncols].to_vec();
        let mut entries = vec![(0usize, 0.0f64); values.len()];
        for ((&row, &col), &value) in rows.iter().zip(cols).zip(values) {
            entries[next[col]] = (row, value);
            next[col] += 1;
        }

        Ok(compress_sorted(nrows, ncols, &col_ptrs, &mut entries))
    }

    /// Builds a CSC matrix from CSR arrays of an `nrows x ncols` matrix.
    ///
    /// The CSR structure is checked with the same rules as CSC, with
    /// `row_ptrs` in place of the column pointers.
    pub fn from_csr(
        nrows: usize,
        ncols: usize,
        row_ptrs: &[usize],
        col_indices: &[usize],
        values: &[f64],
    ) -> Result<Self, FormatError> {
        if nrows == 0 || ncols == 0 {
            return Err(FormatError::EmptyDimensions { nrows, ncols });
        }
        if values.is_empty() {
            return Err(FormatError::NoEntries);
        }
        check_len("col_indices", values.len(), col_indices.len())?;
        check_ptrs(row_ptrs, nrows, values.len(), "row_ptrs")?;

        let mut rows = Vec::with_capacity(values.len());
        for row in 0..nrows {
            for _ in row_ptrs[row]..row_ptrs[row + 1] {
                rows.push(row);
            }
        }
        Self::from_triplets(nrows, ncols, &rows, col_indices, values)
    }
}

/// Sorts each column segment by row and merges duplicates.
fn compress_sorted(
    nrows: usize,
    ncols: usize,
    col_ptrs: &[usize],
    entries: &mut [(usize, f64)],
) -> CscMatrix {
    let mut out_ptrs = Vec::with_capacity(ncols + 1);
    let mut row_indices = Vec::with_capacity(entries.len());
    let mut values: Vec<f64> = Vec::with_capacity(entries.len());
    out_ptrs.push(0);
    for col in 0..ncols {
        let segment = &mut entries[col_ptrs[col]..col_ptrs[col + 1]];
        segment.sort_by_key(|&(row, _)| row);
        let start = row_indices.len();
        for &(row, value) in segment.iter() {
            if row_indices.len() > start && row_indices.last() == Some(&row) {
                if let Some(last) = values.last_mut() {
                    *last += value;
                }
            } else {
                row_indices.push(row);
                values.push(value);
            }
        }
        out_ptrs.push(row_indices.len());
    }
    CscMatrix::from_parts(nrows, ncols, out_ptrs, row_indices, values)
}
