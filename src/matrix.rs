use core::fmt;

use faer_core::{Mat, Parallelism, mat, mul};

use crate::operator::LinearOperator;
use crate::pattern::{PatternError, SparsityPattern};

/// Errors while assembling a design matrix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatrixError {
    /// The sparsity pattern is invalid.
    Pattern(PatternError),
    /// Value buffer does not match the pattern or the requested shape.
    ValuesLen { expected: usize, actual: usize },
}

impl fmt::Display for MatrixError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pattern(err) => write!(f, "invalid sparsity pattern: {err}"),
            Self::ValuesLen { expected, actual } => {
                write!(f, "values length {actual} does not match expected {expected}")
            }
        }
    }
}

impl std::error::Error for MatrixError {}

impl From<PatternError> for MatrixError {
    fn from(err: PatternError) -> Self {
        Self::Pattern(err)
    }
}

/// Sparse matrix in compressed sparse column layout.
#[derive(Debug, Clone, PartialEq)]
pub struct CscMatrix {
    pattern: SparsityPattern,
    values: Vec<f64>,
}

impl CscMatrix {
    /// Pairs a validated pattern with one value per stored entry.
    pub fn new(pattern: SparsityPattern, values: Vec<f64>) -> Result<Self, MatrixError> {
        if values.len() != pattern.nnz() {
            return Err(MatrixError::ValuesLen {
                expected: pattern.nnz(),
                actual: values.len(),
            });
        }
        Ok(Self { pattern, values })
    }

    /// Builds a matrix from zero-based `(row, col, value)` triplets.
    ///
    /// Duplicate positions are summed.
    pub fn from_triplets(
        nrows: usize,
        ncols: usize,
        triplets: &[(usize, usize, f64)],
    ) -> Result<Self, MatrixError> {
        let positions: Vec<(usize, usize)> = triplets.iter().map(|&(r, c, _)| (r, c)).collect();
        let pattern = SparsityPattern::from_triplets(nrows, ncols, &positions)?;
        let mut values = vec![0.0; pattern.nnz()];
        for &(row, col, value) in triplets {
            let range = pattern.col_range(col);
            if let Ok(pos) = pattern.row_indices()[range.clone()].binary_search(&row) {
                values[range.start + pos] += value;
            }
        }
        Ok(Self { pattern, values })
    }

    pub fn pattern(&self) -> &SparsityPattern {
        &self.pattern
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Values of one column, aligned with `pattern().row_indices_of_col(col)`.
    pub fn values_of_col(&self, col: usize) -> &[f64] {
        &self.values[self.pattern.col_range(col)]
    }

    pub fn nrows(&self) -> usize {
        self.pattern.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.pattern.ncols()
    }

    pub fn nnz(&self) -> usize {
        self.pattern.nnz()
    }
}

#[derive(Debug, Clone)]
enum Storage {
    Dense(Mat<f64>),
    Sparse(CscMatrix),
}

/// Design matrix `X` of a regression problem, dense or sparse.
///
/// Both layouts act as a `LinearOperator`; dense products go through faer's
/// matmul with the configured parallelism.
#[derive(Debug, Clone)]
pub struct DesignMatrix {
    storage: Storage,
    parallelism: Parallelism,
}

impl DesignMatrix {
    pub fn dense(matrix: Mat<f64>) -> Self {
        Self {
            storage: Storage::Dense(matrix),
            parallelism: Parallelism::None,
        }
    }

    pub fn sparse(matrix: CscMatrix) -> Self {
        Self {
            storage: Storage::Sparse(matrix),
            parallelism: Parallelism::None,
        }
    }

    /// Dense matrix from a row-major buffer of `nrows * ncols` values.
    pub fn from_row_major(nrows: usize, ncols: usize, data: &[f64]) -> Result<Self, MatrixError> {
        if data.len() != nrows * ncols {
            return Err(MatrixError::ValuesLen {
                expected: nrows * ncols,
                actual: data.len(),
            });
        }
        Ok(Self::dense(Mat::from_fn(nrows, ncols, |i, j| {
            data[i * ncols + j]
        })))
    }

    /// Parallelism used for dense products.
    pub fn with_parallelism(mut self, parallelism: Parallelism) -> Self {
        self.parallelism = parallelism;
        self
    }

    pub fn is_sparse(&self) -> bool {
        matches!(self.storage, Storage::Sparse(_))
    }

    pub fn as_dense(&self) -> Option<&Mat<f64>> {
        match &self.storage {
            Storage::Dense(m) => Some(m),
            Storage::Sparse(_) => None,
        }
    }

    pub fn as_sparse(&self) -> Option<&CscMatrix> {
        match &self.storage {
            Storage::Dense(_) => None,
            Storage::Sparse(m) => Some(m),
        }
    }

    /// Number of stored entries (all entries for dense storage).
    pub fn nnz(&self) -> usize {
        match &self.storage {
            Storage::Dense(m) => m.nrows() * m.ncols(),
            Storage::Sparse(m) => m.nnz(),
        }
    }

    /// Materializes the matrix. Meant for tests and small problems.
    pub fn to_dense(&self) -> Mat<f64> {
        match &self.storage {
            Storage::Dense(m) => m.clone(),
            Storage::Sparse(m) => {
                let mut out = Mat::<f64>::zeros(m.nrows(), m.ncols());
                for col in 0..m.ncols() {
                    let rows = m.pattern().row_indices_of_col(col);
                    for (&row, &value) in rows.iter().zip(m.values_of_col(col)) {
                        out.write(row, col, value);
                    }
                }
                out
            }
        }
    }
}

impl LinearOperator for DesignMatrix {
    fn nrows(&self) -> usize {
        match &self.storage {
            Storage::Dense(m) => m.nrows(),
            Storage::Sparse(m) => m.nrows(),
        }
    }

    fn ncols(&self) -> usize {
        match &self.storage {
            Storage::Dense(m) => m.ncols(),
            Storage::Sparse(m) => m.ncols(),
        }
    }

    fn apply(&self, x: &[f64], out: &mut [f64]) {
        match &self.storage {
            Storage::Dense(m) => {
                let rhs = mat::from_column_major_slice::<f64>(x, m.ncols(), 1);
                let acc = mat::from_column_major_slice_mut::<f64>(out, m.nrows(), 1);
                mul::matmul(acc, m.as_ref(), rhs, None, 1.0, self.parallelism);
            }
            Storage::Sparse(m) => {
                out.fill(0.0);
                for col in 0..m.ncols() {
                    let xj = x[col];
                    if xj == 0.0 {
                        continue;
                    }
                    let rows = m.pattern().row_indices_of_col(col);
                    for (&row, &value) in rows.iter().zip(m.values_of_col(col)) {
                        out[row] += value * xj;
                    }
                }
            }
        }
    }

    fn apply_transpose(&self, y: &[f64], out: &mut [f64]) {
        match &self.storage {
            Storage::Dense(m) => {
                let rhs = mat::from_column_major_slice::<f64>(y, m.nrows(), 1);
                let acc = mat::from_column_major_slice_mut::<f64>(out, m.ncols(), 1);
                mul::matmul(acc, m.as_ref().transpose(), rhs, None, 1.0, self.parallelism);
            }
            Storage::Sparse(m) => {
                for (col, o) in out.iter_mut().enumerate() {
                    let rows = m.pattern().row_indices_of_col(col);
                    let mut sum = 0.0;
                    for (&row, &value) in rows.iter().zip(m.values_of_col(col)) {
                        sum += value * y[row];
                    }
                    *o = sum;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sparse_sample() -> DesignMatrix {
        // [[1, 0, 2],
        //  [0, 3, 0]]
        let csc = CscMatrix::from_triplets(2, 3, &[(0, 0, 1.0), (1, 1, 3.0), (0, 2, 2.0)])
            .unwrap();
        DesignMatrix::sparse(csc)
    }

    #[test]
    fn dense_and_sparse_products_agree() {
        let sparse = sparse_sample();
        let dense =
            DesignMatrix::from_row_major(2, 3, &[1.0, 0.0, 2.0, 0.0, 3.0, 0.0]).unwrap();
        let x = [0.5, -1.0, 2.0];
        let y = [1.5, -2.0];
        assert_eq!(sparse.matvec(&x), dense.matvec(&x));
        assert_eq!(sparse.matvec(&x), vec![4.5, -3.0]);
        assert_eq!(sparse.rmatvec(&y), dense.rmatvec(&y));
        assert_eq!(sparse.rmatvec(&y), vec![1.5, -6.0, 3.0]);
    }

    #[test]
    fn duplicate_triplets_are_summed() {
        let csc = CscMatrix::from_triplets(2, 1, &[(1, 0, 1.0), (1, 0, 2.5)]).unwrap();
        assert_eq!(csc.nnz(), 1);
        assert_eq!(csc.values(), &[3.5]);
    }

    #[test]
    fn to_dense_expands_sparse_storage() {
        let dense = sparse_sample().to_dense();
        assert_eq!(dense.read(0, 2), 2.0);
        assert_eq!(dense.read(1, 1), 3.0);
        assert_eq!(dense.read(1, 0), 0.0);
    }

    #[test]
    fn rejects_mismatched_values() {
        let pattern = SparsityPattern::new(2, 1, vec![0, 2], vec![0, 1]).unwrap();
        assert_eq!(
            CscMatrix::new(pattern, vec![1.0]).unwrap_err(),
            MatrixError::ValuesLen {
                expected: 2,
                actual: 1
            }
        );
        assert!(DesignMatrix::from_row_major(2, 2, &[1.0]).is_err());
    }
}
