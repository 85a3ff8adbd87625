use core::fmt;
use std::sync::Arc;

use faer_core::Mat;
use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal, StandardNormal};

use crate::matrix::{CscMatrix, DesignMatrix, MatrixError};
use crate::objective::ProblemData;
use crate::operator::LinearOperator;

/// Fraction of stored entries in a sparse design matrix.
const SPARSE_DENSITY: f64 = 0.4;
/// Noise standard deviation relative to the spread of the clean response.
const NOISE_LEVEL: f64 = 0.1;

#[derive(Debug, Clone, PartialEq)]
pub enum DatasetError {
    InvalidDimensions { n_samples: usize, n_features: usize },
    /// The noise distribution could not be built.
    Distribution(String),
    Matrix(MatrixError),
}

impl fmt::Display for DatasetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidDimensions {
                n_samples,
                n_features,
            } => write!(
                f,
                "dataset needs at least one sample and one feature, got {n_samples}x{n_features}"
            ),
            Self::Distribution(msg) => write!(f, "invalid noise distribution: {msg}"),
            Self::Matrix(err) => write!(f, "failed to assemble design matrix: {err}"),
        }
    }
}

impl std::error::Error for DatasetError {}

impl From<MatrixError> for DatasetError {
    fn from(err: MatrixError) -> Self {
        Self::Matrix(err)
    }
}

/// Seeded synthetic regression problem `y = X w + noise` with `w >= 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulatedDataset {
    pub n_samples: usize,
    pub n_features: usize,
    pub use_sparse: bool,
    pub random_state: u64,
}

impl Default for SimulatedDataset {
    fn default() -> Self {
        Self {
            n_samples: 10,
            n_features: 50,
            use_sparse: false,
            random_state: 27,
        }
    }
}

impl SimulatedDataset {
    pub const NAME: &'static str = "Simulated";
    /// Benchmark grid of `(n_samples, n_features, use_sparse)`.
    pub const PARAMETERS: &'static [(usize, usize, bool)] =
        &[(100, 1000, false), (500, 2000, true)];

    pub fn new(n_samples: usize, n_features: usize, use_sparse: bool) -> Self {
        Self {
            n_samples,
            n_features,
            use_sparse,
            ..Self::default()
        }
    }

    pub fn with_random_state(mut self, random_state: u64) -> Self {
        self.random_state = random_state;
        self
    }

    /// One dataset per entry of `PARAMETERS`, all with the default seed.
    pub fn grid() -> Vec<Self> {
        Self::PARAMETERS
            .iter()
            .map(|&(n_samples, n_features, use_sparse)| Self::new(n_samples, n_features, use_sparse))
            .collect()
    }

    /// Draws `(n_features, data)`. The same configuration always yields the
    /// same arrays.
    pub fn get_data(&self) -> Result<(usize, ProblemData), DatasetError> {
        let (m, n) = (self.n_samples, self.n_features);
        if m == 0 || n == 0 {
            return Err(DatasetError::InvalidDimensions {
                n_samples: m,
                n_features: n,
            });
        }
        let mut rng = StdRng::seed_from_u64(self.random_state);

        let w = nonnegative_coefficients(&mut rng, n);

        let x = if self.use_sparse {
            sparse_uniform(&mut rng, m, n)?
        } else {
            dense_normal(&mut rng, m, n)
        };

        let mut y = x.matvec(&w);
        let mean = y.iter().sum::<f64>() / m as f64;
        let var = y.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / m as f64;
        let noise = Normal::new(0.0, NOISE_LEVEL * var.sqrt())
            .map_err(|err| DatasetError::Distribution(err.to_string()))?;
        for yi in y.iter_mut() {
            *yi += noise.sample(&mut rng);
        }
        log::debug!(
            "simulated {m}x{n} {} dataset (seed {}, nnz {})",
            if self.use_sparse { "sparse" } else { "dense" },
            self.random_state,
            x.nnz()
        );

        Ok((
            n,
            ProblemData {
                x: Arc::new(x),
                y: Arc::from(y),
            },
        ))
    }
}

/// True coefficients: standard normal draws clipped at zero. Always the first
/// draws from the seeded generator.
fn nonnegative_coefficients(rng: &mut StdRng, n: usize) -> Vec<f64> {
    (0..n)
        .map(|_| {
            let v: f64 = rng.sample(StandardNormal);
            v.max(0.0)
        })
        .collect()
}

/// Standard normal entries, drawn row by row.
fn dense_normal(rng: &mut StdRng, m: usize, n: usize) -> DesignMatrix {
    let draws: Vec<f64> = (0..m * n).map(|_| rng.sample(StandardNormal)).collect();
    DesignMatrix::dense(Mat::from_fn(m, n, |i, j| draws[i * n + j]))
}

/// `round(density * m * n)` distinct positions, uniform `[0, 1)` values.
fn sparse_uniform(rng: &mut StdRng, m: usize, n: usize) -> Result<DesignMatrix, DatasetError> {
    let total = m * n;
    let k = ((SPARSE_DENSITY * total as f64).round() as usize).min(total);
    let positions = index::sample(rng, total, k);
    let triplets: Vec<(usize, usize, f64)> = positions
        .into_iter()
        .map(|linear| (linear % m, linear / m, rng.random::<f64>()))
        .collect();
    Ok(DesignMatrix::sparse(CscMatrix::from_triplets(m, n, &triplets)?))
}
