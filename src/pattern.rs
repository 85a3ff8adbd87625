use core::fmt;
use core::ops::Range;

/// Column-compressed sparsity pattern of a design matrix.
///
/// Indices are zero-based; each column's row indices must be sorted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SparsityPattern {
    nrows: usize,
    ncols: usize,
    col_ptrs: Vec<usize>,
    row_indices: Vec<usize>,
}

/// Validation errors for a SparsityPattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatternError {
    /// col_ptrs length is not ncols + 1.
    ColPtrLen { expected: usize, actual: usize },
    /// col_ptrs[0] is not 0.
    ColPtrStart { value: usize },
    /// col_ptrs is not non-decreasing.
    ColPtrNotMonotonic { col: usize, prev: usize, next: usize },
    /// col_ptrs[ncols] does not match row_indices length.
    ColPtrOutOfBounds { last: usize, row_indices_len: usize },
    /// A row index is >= nrows.
    RowIndexOutOfBounds { col: usize, row: usize, nrows: usize },
    /// Row indices in a column are not strictly increasing.
    RowIndexNotSorted { col: usize, prev: usize, next: usize },
    /// A triplet column is >= ncols.
    ColIndexOutOfBounds { col: usize, ncols: usize },
}

impl fmt::Display for PatternError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ColPtrLen { expected, actual } => {
                write!(f, "col_ptrs length {actual} does not match expected {expected}")
            }
            Self::ColPtrStart { value } => {
                write!(f, "col_ptrs must start at 0 (got {value})")
            }
            Self::ColPtrNotMonotonic { col, prev, next } => {
                write!(f, "col_ptrs not monotonic at col {col}: {prev} > {next}")
            }
            Self::ColPtrOutOfBounds {
                last,
                row_indices_len,
            } => {
                write!(
                    f,
                    "col_ptrs end {last} does not match row_indices length {row_indices_len}"
                )
            }
            Self::RowIndexOutOfBounds { col, row, nrows } => {
                write!(f, "row index {row} in col {col} is out of bounds (nrows={nrows})")
            }
            Self::RowIndexNotSorted { col, prev, next } => {
                write!(f, "row indices not sorted in col {col}: {prev} >= {next}")
            }
            Self::ColIndexOutOfBounds { col, ncols } => {
                write!(f, "column index {col} is out of bounds (ncols={ncols})")
            }
        }
    }
}

impl std::error::Error for PatternError {}

impl SparsityPattern {
    /// Creates a validated column-compressed sparsity pattern.
    ///
    /// Requirements:
    /// - `col_ptrs.len() == ncols + 1`
    /// - `col_ptrs` is non-decreasing and starts at `0`
    /// - `col_ptrs[ncols] == row_indices.len()`
    /// - row indices are strictly increasing and `< nrows` within each column
    pub fn new(
        nrows: usize,
        ncols: usize,
        col_ptrs: Vec<usize>,
        row_indices: Vec<usize>,
    ) -> Result<Self, PatternError> {
        let expected = ncols + 1;
        if col_ptrs.len() != expected {
            return Err(PatternError::ColPtrLen {
                expected,
                actual: col_ptrs.len(),
            });
        }
        if col_ptrs[0] != 0 {
            return Err(PatternError::ColPtrStart {
                value: col_ptrs[0],
            });
        }
        for (col, window) in col_ptrs.windows(2).enumerate() {
            let (prev, next) = (window[0], window[1]);
            if prev > next {
                return Err(PatternError::ColPtrNotMonotonic { col, prev, next });
            }
        }
        let last = col_ptrs[ncols];
        if last != row_indices.len() {
            return Err(PatternError::ColPtrOutOfBounds {
                last,
                row_indices_len: row_indices.len(),
            });
        }

        for col in 0..ncols {
            let rows = &row_indices[col_ptrs[col]..col_ptrs[col + 1]];
            for (pos, &row) in rows.iter().enumerate() {
                if row >= nrows {
                    return Err(PatternError::RowIndexOutOfBounds { col, row, nrows });
                }
                if pos > 0 && rows[pos - 1] >= row {
                    return Err(PatternError::RowIndexNotSorted {
                        col,
                        prev: rows[pos - 1],
                        next: row,
                    });
                }
            }
        }

        Ok(Self {
            nrows,
            ncols,
            col_ptrs,
            row_indices,
        })
    }

    /// Builds a pattern from zero-based `(row, col)` pairs.
    ///
    /// Pairs may come in any order; duplicates collapse to one entry.
    pub fn from_triplets(
        nrows: usize,
        ncols: usize,
        entries: &[(usize, usize)],
    ) -> Result<Self, PatternError> {
        let mut cols: Vec<Vec<usize>> = vec![Vec::new(); ncols];
        for &(row, col) in entries {
            if col >= ncols {
                return Err(PatternError::ColIndexOutOfBounds { col, ncols });
            }
            cols[col].push(row);
        }
        let mut col_ptrs = Vec::with_capacity(ncols + 1);
        let mut row_indices = Vec::with_capacity(entries.len());
        col_ptrs.push(0);
        for mut rows in cols {
            rows.sort_unstable();
            rows.dedup();
            row_indices.extend_from_slice(&rows);
            col_ptrs.push(row_indices.len());
        }
        Self::new(nrows, ncols, col_ptrs, row_indices)
    }

    /// Number of rows (samples).
    pub fn nrows(&self) -> usize {
        self.nrows
    }

    /// Number of columns (features).
    pub fn ncols(&self) -> usize {
        self.ncols
    }

    /// Number of stored entries.
    pub fn nnz(&self) -> usize {
        self.row_indices.len()
    }

    /// Column pointer array in CSC format.
    pub fn col_ptrs(&self) -> &[usize] {
        &self.col_ptrs
    }

    /// Row index array in CSC format.
    pub fn row_indices(&self) -> &[usize] {
        &self.row_indices
    }

    /// Index range in row_indices for the given column.
    pub fn col_range(&self, col: usize) -> Range<usize> {
        self.col_ptrs[col]..self.col_ptrs[col + 1]
    }

    /// Sorted row indices for the given column.
    pub fn row_indices_of_col(&self, col: usize) -> &[usize] {
        &self.row_indices[self.col_range(col)]
    }
}
