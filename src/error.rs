use core::fmt;

/// Errors raised by the bounded solvers.
#[derive(Debug, Clone, PartialEq)]
pub enum SolveError {
    /// An input vector has the wrong length.
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
    /// A lower bound is not strictly below its upper bound.
    InvalidBounds { index: usize, lower: f64, upper: f64 },
    /// Ridge strength is negative or not finite.
    InvalidRegularization(f64),
    /// The objective or its gradient became NaN or infinite.
    NonFinite { iteration: usize, value: f64 },
    /// `run` was called before `set_objective`.
    NotConfigured,
}

impl fmt::Display for SolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DimensionMismatch {
                what,
                expected,
                actual,
            } => write!(f, "{what} length {actual} does not match expected {expected}"),
            Self::InvalidBounds {
                index,
                lower,
                upper,
            } => write!(f, "invalid bounds at {index}: lower {lower} must be < upper {upper}"),
            Self::InvalidRegularization(reg) => {
                write!(f, "regularization must be finite and >= 0, got {reg}")
            }
            Self::NonFinite { iteration, value } => {
                write!(f, "non-finite objective value {value} at iteration {iteration}")
            }
            Self::NotConfigured => write!(f, "solver has no objective; call set_objective first"),
        }
    }
}

impl std::error::Error for SolveError {}
