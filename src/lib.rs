//! Nonnegative ridge regression solved two ways, for benchmarking.
//!
//! The problem is `min_w 0.5 * ||y - X w||^2 + 0.5 * reg * ||w||^2` subject to
//! `w >= 0`, with `X` dense or sparse. Two solvers are provided:
//! - `LbfgsSolver`: projected limited-memory BFGS on the smooth objective.
//! - `TrfSolver`: trust-region-reflective bounded least squares on the
//!   augmented system `[X; sqrt(reg) I] w ~ [y; 0]`, which is never formed;
//!   only products with `X` and `X^T` are used.
//!
//! How it fits together:
//! - `SimulatedDataset::get_data` draws a seeded problem.
//! - `RidgeObjective` scores coefficients (infinite when any is negative).
//! - A `BenchmarkSolver` takes `objective.to_params()` and is run with an
//!   iteration budget; `result()` returns the coefficients.
//!
//! Example:
//! ```rust,no_run
//! use ridge_nnls_bench::{BenchmarkSolver, LbfgsSolver, RidgeObjective, SimulatedDataset};
//!
//! let (_, data) = SimulatedDataset::new(100, 1000, false).get_data().unwrap();
//! let mut objective = RidgeObjective::new(1.0).unwrap();
//! objective.set_data(data).unwrap();
//!
//! let mut solver = LbfgsSolver::new();
//! solver.set_objective(&objective.to_params().unwrap());
//! solver.run(50).unwrap();
//! let loss = objective.compute(solver.result().unwrap()).unwrap();
//! assert!(loss.is_finite());
//! ```

mod bounds;
mod dataset;
mod error;
mod lbfgsb;
mod lsmr;
mod matrix;
mod objective;
mod operator;
mod pattern;
mod report;
mod solvers;
mod trf;
mod vecops;

pub use bounds::Bounds;
pub use dataset::{DatasetError, SimulatedDataset};
pub use error::SolveError;
pub use lbfgsb::{BoundedLbfgs, LbfgsOptions, SmoothProblem};
pub use lsmr::{LsmrOptions, LsmrResult, LsmrStop, lsmr};
pub use matrix::{CscMatrix, DesignMatrix, MatrixError};
pub use objective::{ObjectiveError, ObjectiveParams, ProblemData, RidgeObjective, RidgeProblem};
pub use operator::{
    DiagonalOperator, LinearOperator, RescaledOperator, RidgeAugmented, RightScaledOperator,
    ScaledIdentity, StackedOperator, ridge_augmented, ridge_target,
};
pub use pattern::{PatternError, SparsityPattern};
pub use report::{
    CapturingReporter, IterationReport, Reporter, SolveStatus, SolverStats, StdoutReporter,
    StepChoice, StepDetail,
};
pub use solvers::{BenchmarkSolver, LbfgsSolver, TrfSolver};
pub use trf::{LsmrTolerance, LsqResult, TrfOptions, lsq_linear};
