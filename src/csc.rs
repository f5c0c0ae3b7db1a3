use core::fmt;
use core::ops::Range;

/// Structural violations of a compressed sparse layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    /// nrows or ncols is zero.
    EmptyDimensions { nrows: usize, ncols: usize },
    /// The matrix stores no entries.
    NoEntries,
    /// An array does not have the length implied by the dimensions.
    Length {
        array: &'static str,
        expected: usize,
        actual: usize,
    },
    /// The pointer array does not start at 0.
    PtrStart { value: usize },
    /// The last pointer does not equal nnz.
    PtrEnd { last: usize, nnz: usize },
    /// Pointers decrease between two consecutive slots.
    PtrNotMonotonic { slot: usize, prev: usize, next: usize },
    /// A pointer lies past nnz.
    PtrOutOfBounds { slot: usize, value: usize, nnz: usize },
    /// A stored index is outside its dimension.
    IndexOutOfBounds {
        pos: usize,
        index: usize,
        bound: usize,
    },
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyDimensions { nrows, ncols } => {
                write!(f, "invalid dimensions: nrows={nrows}, ncols={ncols}")
            }
            Self::NoEntries => write!(f, "matrix has no stored entries"),
            Self::Length {
                array,
                expected,
                actual,
            } => {
                write!(f, "{array} length {actual} does not match expected {expected}")
            }
            Self::PtrStart { value } => {
                write!(f, "pointer array must start at 0 (got {value})")
            }
            Self::PtrEnd { last, nnz } => {
                write!(f, "pointer array ends at {last} but nnz is {nnz}")
            }
            Self::PtrNotMonotonic { slot, prev, next } => {
                write!(f, "pointers not monotonic at slot {slot}: {prev} > {next}")
            }
            Self::PtrOutOfBounds { slot, value, nnz } => {
                write!(f, "pointer {value} at slot {slot} exceeds nnz {nnz}")
            }
            Self::IndexOutOfBounds { pos, index, bound } => {
                write!(f, "index {index} at position {pos} exceeds bound {bound}")
            }
        }
    }
}

impl std::error::Error for FormatError {}

/// Checks the structural invariants of a CSC matrix.
///
/// Requirements:
/// - `nrows > 0`, `ncols > 0`, `nnz > 0`
/// - `values` and `row_indices` hold exactly `nnz` entries
/// - `col_ptrs.len() == ncols + 1`, `col_ptrs[0] == 0`, `col_ptrs[ncols] == nnz`
/// - `0 <= col_ptrs[j] <= col_ptrs[j + 1] <= nnz` for every column
///
/// Row indices are not inspected here; every pass that reads them checks
/// them against `nrows` itself and fails with the same error type.
pub fn validate(
    nrows: usize,
    ncols: usize,
    nnz: usize,
    col_ptrs: &[usize],
    row_indices: &[usize],
    values: &[f64],
) -> Result<(), FormatError> {
    if nrows == 0 || ncols == 0 {
        return Err(FormatError::EmptyDimensions { nrows, ncols });
    }
    if nnz == 0 {
        return Err(FormatError::NoEntries);
    }
    check_len("values", nnz, values.len())?;
    check_len("row_indices", nnz, row_indices.len())?;
    check_ptrs(col_ptrs, ncols, nnz, "col_ptrs")
}

pub(crate) fn check_len(array: &'static str, expected: usize, actual: usize) -> Result<(), FormatError> {
    if expected != actual {
        return Err(FormatError::Length {
            array,
            expected,
            actual,
        });
    }
    Ok(())
}

pub(crate) fn check_ptrs(
    ptrs: &[usize],
    outer: usize,
    nnz: usize,
    array: &'static str,
) -> Result<(), FormatError> {
    check_len(array, outer + 1, ptrs.len())?;
    if ptrs[0] != 0 {
        return Err(FormatError::PtrStart { value: ptrs[0] });
    }
    if ptrs[outer] != nnz {
        return Err(FormatError::PtrEnd {
            last: ptrs[outer],
            nnz,
        });
    }
    for slot in 0..outer {
        let prev = ptrs[slot];
        let next = ptrs[slot + 1];
        if prev > next {
            return Err(FormatError::PtrNotMonotonic { slot, prev, next });
        }
        if next > nnz {
            return Err(FormatError::PtrOutOfBounds {
                slot: slot + 1,
                value: next,
                nnz,
            });
        }
    }
    Ok(())
}

/// Borrowed view of a CSC matrix whose pointer structure has been validated.
///
/// The underlying arrays are never written through this view.
#[derive(Debug, Clone, Copy)]
pub struct CscMatrixRef<'a> {
    nrows: usize,
    ncols: usize,
    col_ptrs: &'a [usize],
    row_indices: &'a [usize],
    values: &'a [f64],
}

impl<'a> CscMatrixRef<'a> {
    /// Creates a view after running [`validate`] with `nnz = values.len()`.
    pub fn new(
        nrows: usize,
        ncols: usize,
        col_ptrs: &'a [usize],
        row_indices: &'a [usize],
        values: &'a [f64],
    ) -> Result<Self, FormatError> {
        validate(nrows, ncols, values.len(), col_ptrs, row_indices, values)?;
        Ok(Self {
            nrows,
            ncols,
            col_ptrs,
            row_indices,
            values,
        })
    }

    pub(crate) fn from_parts(
        nrows: usize,
        ncols: usize,
        col_ptrs: &'a [usize],
        row_indices: &'a [usize],
        values: &'a [f64],
    ) -> Self {
        Self {
            nrows,
            ncols,
            col_ptrs,
            row_indices,
            values,
        }
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    /// Number of stored entries.
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    pub fn col_ptrs(&self) -> &'a [usize] {
        self.col_ptrs
    }

    pub fn row_indices(&self) -> &'a [usize] {
        self.row_indices
    }

    pub fn values(&self) -> &'a [f64] {
        self.values
    }

    /// Bounds-checked range of storage positions for a column.
    pub fn col_range(&self, col: usize) -> Result<Range<usize>, FormatError> {
        col_range(self.col_ptrs, col, self.values.len().min(self.row_indices.len()))
    }

    /// Row of the entry stored at `pos`, checked against `nrows`.
    pub fn row_at(&self, pos: usize) -> Result<usize, FormatError> {
        row_at(self.row_indices, pos, self.nrows)
    }

    /// Computes `out = A * x`.
    pub fn mul_vec(&self, x: &[f64], out: &mut [f64]) -> Result<(), FormatError> {
        check_len("x", self.ncols, x.len())?;
        check_len("out", self.nrows, out.len())?;
        out.fill(0.0);
        for (col, &xj) in x.iter().enumerate() {
            for pos in self.col_range(col)? {
                let row = self.row_at(pos)?;
                out[row] += self.values[pos] * xj;
            }
        }
        Ok(())
    }
}

pub(crate) fn col_range(ptrs: &[usize], col: usize, nnz: usize) -> Result<Range<usize>, FormatError> {
    if col + 1 >= ptrs.len() {
        return Err(FormatError::Length {
            array: "col_ptrs",
            expected: col + 2,
            actual: ptrs.len(),
        });
    }
    let start = ptrs[col];
    let end = ptrs[col + 1];
    if start > end {
        return Err(FormatError::PtrNotMonotonic {
            slot: col,
            prev: start,
            next: end,
        });
    }
    if end > nnz {
        return Err(FormatError::PtrOutOfBounds {
            slot: col + 1,
            value: end,
            nnz,
        });
    }
    Ok(start..end)
}

pub(crate) fn row_at(row_indices: &[usize], pos: usize, nrows: usize) -> Result<usize, FormatError> {
    let Some(&row) = row_indices.get(pos) else {
        return Err(FormatError::IndexOutOfBounds {
            pos,
            index: pos,
            bound: row_indices.len(),
        });
    };
    if row >= nrows {
        return Err(FormatError::IndexOutOfBounds {
            pos,
            index: row,
            bound: nrows,
        });
    }
    Ok(row)
}

/// Owned CSC matrix.
///
/// Row indices within a column may be unsorted and duplicated unless the
/// matrix came out of one of the conversion constructors, which sort rows
/// and sum duplicates.
#[derive(Debug, Clone, PartialEq)]
pub struct CscMatrix {
    nrows: usize,
    ncols: usize,
    col_ptrs: Vec<usize>,
    row_indices: Vec<usize>,
    values: Vec<f64>,
}

impl CscMatrix {
    /// Creates an owned matrix after running [`validate`].
    pub fn new(
        nrows: usize,
        ncols: usize,
        col_ptrs: Vec<usize>,
        row_indices: Vec<usize>,
        values: Vec<f64>,
    ) -> Result<Self, FormatError> {
        validate(nrows, ncols, values.len(), &col_ptrs, &row_indices, &values)?;
        Ok(Self {
            nrows,
            ncols,
            col_ptrs,
            row_indices,
            values,
        })
    }

    pub(crate) fn from_parts(
        nrows: usize,
        ncols: usize,
        col_ptrs: Vec<usize>,
        row_indices: Vec<usize>,
        values: Vec<f64>,
    ) -> Self {
        Self {
            nrows,
            ncols,
            col_ptrs,
            row_indices,
            values,
        }
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    pub fn col_ptrs(&self) -> &[usize] {
        &self.col_ptrs
    }

    pub fn row_indices(&self) -> &[usize] {
        &self.row_indices
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut [f64] {
        &mut self.values
    }

    /// Structure together with mutable values.
    pub fn parts_mut(&mut self) -> (&[usize], &[usize], &mut [f64]) {
        (&self.col_ptrs, &self.row_indices, &mut self.values)
    }

    pub fn as_ref(&self) -> CscMatrixRef<'_> {
        CscMatrixRef::from_parts(
            self.nrows,
            self.ncols,
            &self.col_ptrs,
            &self.row_indices,
            &self.values,
        )
    }

    /// Replaces the stored structure, keeping the dimensions.
    pub(crate) fn replace_storage(
        &mut self,
        col_ptrs: Vec<usize>,
        row_indices: Vec<usize>,
        values: Vec<f64>,
    ) {
        self.col_ptrs = col_ptrs;
        self.row_indices = row_indices;
        self.values = values;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_identity() {
        let m = CscMatrixRef::new(3, 3, &[0, 1, 2, 3], &[0, 1, 2], &[1.0, 1.0, 1.0]).unwrap();
        assert_eq!(m.nnz(), 3);
        assert_eq!(m.col_range(1).unwrap(), 1..2);
    }

    #[test]
    fn rejects_bad_pointer_start_every_time() {
        for _ in 0..3 {
            let err = validate(2, 2, 2, &[1, 1, 2], &[0, 1], &[1.0, 1.0]).unwrap_err();
            assert_eq!(err, FormatError::PtrStart { value: 1 });
        }
    }

    #[test]
    fn rejects_structural_violations() {
        assert!(matches!(
            validate(0, 2, 1, &[0, 1, 1], &[0], &[1.0]),
            Err(FormatError::EmptyDimensions { .. })
        ));
        assert!(matches!(
            validate(2, 2, 0, &[0, 0, 0], &[], &[]),
            Err(FormatError::NoEntries)
        ));
        assert!(matches!(
            validate(2, 2, 2, &[0, 2, 1], &[0, 1], &[1.0, 1.0]),
            Err(FormatError::PtrEnd { last: 1, nnz: 2 })
        ));
        assert!(matches!(
            validate(2, 2, 2, &[0, 3, 2], &[0, 1], &[1.0, 1.0]),
            Err(FormatError::PtrNotMonotonic { slot: 1, .. })
                | Err(FormatError::PtrOutOfBounds { .. })
        ));
        assert!(matches!(
            validate(2, 2, 2, &[0, 2], &[0, 1], &[1.0, 1.0]),
            Err(FormatError::Length {
                array: "col_ptrs",
                ..
            })
        ));
        assert!(matches!(
            validate(2, 2, 2, &[0, 1, 2], &[0], &[1.0, 1.0]),
            Err(FormatError::Length {
                array: "row_indices",
                ..
            })
        ));
    }

    #[test]
    fn row_indices_are_checked_on_access() {
        let m = CscMatrixRef::new(2, 2, &[0, 1, 2], &[0, 5], &[1.0, 1.0]).unwrap();
        assert!(m.row_at(0).is_ok());
        assert_eq!(
            m.row_at(1),
            Err(FormatError::IndexOutOfBounds {
                pos: 1,
                index: 5,
                bound: 2
            })
        );
        let mut out = [0.0; 2];
        assert!(m.mul_vec(&[1.0, 1.0], &mut out).is_err());
    }

    #[test]
    fn mul_vec_handles_unsorted_rows() {
        let m = CscMatrixRef::new(2, 2, &[0, 2, 3], &[1, 0, 1], &[3.0, 2.0, 4.0]).unwrap();
        let mut out = [0.0; 2];
        m.mul_vec(&[1.0, 2.0], &mut out).unwrap();
        assert_eq!(out, [2.0, 11.0]);
    }
}
