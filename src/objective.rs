use core::fmt;
use std::sync::Arc;

use crate::lbfgsb::SmoothProblem;
use crate::matrix::DesignMatrix;
use crate::operator::LinearOperator;
use crate::vecops::dot;

#[derive(Debug, Clone, PartialEq)]
pub enum ObjectiveError {
    /// `compute` or `to_params` was called before `set_data`.
    NoData,
    /// `reg` must be finite and nonnegative.
    InvalidRegularization(f64),
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
}

impl fmt::Display for ObjectiveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoData => write!(f, "objective has no data; call set_data first"),
            Self::InvalidRegularization(reg) => {
                write!(f, "regularization must be finite and >= 0, got {reg}")
            }
            Self::DimensionMismatch {
                what,
                expected,
                actual,
            } => write!(f, "{what} length {actual} does not match expected {expected}"),
        }
    }
}

impl std::error::Error for ObjectiveError {}

/// Design matrix and response, shared read-only between objective and solvers.
#[derive(Debug, Clone)]
pub struct ProblemData {
    pub x: Arc<DesignMatrix>,
    pub y: Arc<[f64]>,
}

impl ProblemData {
    pub fn n_samples(&self) -> usize {
        self.x.nrows()
    }

    pub fn n_features(&self) -> usize {
        self.x.ncols()
    }
}

/// Everything a solver needs to minimize the ridge objective.
#[derive(Debug, Clone)]
pub struct ObjectiveParams {
    pub data: ProblemData,
    pub reg: f64,
}

/// Ridge regression loss restricted to nonnegative coefficients.
///
/// `compute` returns `0.5 ||y - X w||^2 + 0.5 reg ||w||^2` when every entry
/// of `w` is nonnegative and `f64::INFINITY` otherwise.
#[derive(Debug, Clone)]
pub struct RidgeObjective {
    reg: f64,
    data: Option<ProblemData>,
}

impl RidgeObjective {
    pub const NAME: &'static str = "Ridge regression with positivity constraints";
    /// Benchmark grid for `reg`.
    pub const PARAMETERS: &'static [f64] = &[1.0];

    pub fn new(reg: f64) -> Result<Self, ObjectiveError> {
        if !(reg.is_finite() && reg >= 0.0) {
            return Err(ObjectiveError::InvalidRegularization(reg));
        }
        Ok(Self { reg, data: None })
    }

    pub fn reg(&self) -> f64 {
        self.reg
    }

    pub fn set_data(&mut self, data: ProblemData) -> Result<(), ObjectiveError> {
        if data.y.len() != data.x.nrows() {
            return Err(ObjectiveError::DimensionMismatch {
                what: "y",
                expected: data.x.nrows(),
                actual: data.y.len(),
            });
        }
        self.data = Some(data);
        Ok(())
    }

    pub fn compute(&self, w: &[f64]) -> Result<f64, ObjectiveError> {
        let data = self.data.as_ref().ok_or(ObjectiveError::NoData)?;
        if w.len() != data.n_features() {
            return Err(ObjectiveError::DimensionMismatch {
                what: "w",
                expected: data.n_features(),
                actual: w.len(),
            });
        }
        // `!(v >= 0)` also rejects NaN.
        if w.iter().any(|&v| !(v >= 0.0)) {
            return Ok(f64::INFINITY);
        }
        let mut r = data.x.matvec(w);
        for (ri, yi) in r.iter_mut().zip(data.y.iter()) {
            *ri = yi - *ri;
        }
        Ok(0.5 * dot(&r, &r) + 0.5 * self.reg * dot(w, w))
    }

    pub fn to_params(&self) -> Result<ObjectiveParams, ObjectiveError> {
        let data = self.data.as_ref().ok_or(ObjectiveError::NoData)?;
        Ok(ObjectiveParams {
            data: data.clone(),
            reg: self.reg,
        })
    }
}

impl Default for RidgeObjective {
    fn default() -> Self {
        Self {
            reg: Self::PARAMETERS[0],
            data: None,
        }
    }
}

/// Smooth ridge loss `0.5 ||X w - y||^2 + 0.5 reg ||w||^2` with its gradient.
pub struct RidgeProblem<'a> {
    x: &'a DesignMatrix,
    y: &'a [f64],
    reg: f64,
    residual: Vec<f64>,
}

impl<'a> RidgeProblem<'a> {
    /// Panics if `y.len() != x.nrows()`.
    pub fn new(x: &'a DesignMatrix, y: &'a [f64], reg: f64) -> Self {
        assert_eq!(x.nrows(), y.len(), "y must have one entry per sample");
        Self {
            x,
            y,
            reg,
            residual: vec![0.0; y.len()],
        }
    }

    pub fn from_params(params: &'a ObjectiveParams) -> Self {
        Self::new(&params.data.x, &params.data.y, params.reg)
    }
}

impl SmoothProblem for RidgeProblem<'_> {
    fn dim(&self) -> usize {
        self.x.ncols()
    }

    fn value_and_gradient(&mut self, w: &[f64], grad: &mut [f64]) -> f64 {
        self.x.apply(w, &mut self.residual);
        for (ri, yi) in self.residual.iter_mut().zip(self.y) {
            *ri -= yi;
        }
        self.x.apply_transpose(&self.residual, grad);
        for (gi, wi) in grad.iter_mut().zip(w) {
            *gi += self.reg * wi;
        }
        0.5 * dot(&self.residual, &self.residual) + 0.5 * self.reg * dot(w, w)
    }
}
