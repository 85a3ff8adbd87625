//! Solvers as the benchmark harness drives them.
//!
//! The harness configures a solver once with `set_objective`, then calls
//! `run(n_iter)` with growing budgets and reads `result()` after each call.
//! Every run starts from scratch, so the result after a budget of `k` depends
//! only on the data and `k`.

use crate::bounds::Bounds;
use crate::error::SolveError;
use crate::lbfgsb::{BoundedLbfgs, LbfgsOptions};
use crate::objective::{ObjectiveParams, RidgeProblem};
use crate::operator::{LinearOperator, RescaledOperator, ridge_augmented, ridge_target};
use crate::report::CapturingReporter;
use crate::trf::{TrfOptions, lsq_linear};

pub trait BenchmarkSolver {
    fn name(&self) -> &'static str;
    /// Store the objective for subsequent runs.
    fn set_objective(&mut self, params: &ObjectiveParams);
    /// Solve with an iteration budget of `n_iter`, replacing the stored result.
    ///
    /// On error the previous result is kept.
    fn run(&mut self, n_iter: usize) -> Result<(), SolveError>;
    /// Coefficients from the last successful run.
    fn result(&self) -> Option<&[f64]>;
}

/// Projected L-BFGS on `0.5 ||X w - y||^2 + 0.5 reg ||w||^2`, `w >= 0`.
///
/// Reported as "L-BFGS-B" to match the benchmark label, but bounds are handled
/// by projecting the two-loop direction and the line search onto the box;
/// there is no generalized Cauchy point or subspace minimization.
///
/// Iteration tables are kept in memory and only written out when a run fails.
pub struct LbfgsSolver {
    options: LbfgsOptions,
    params: Option<ObjectiveParams>,
    bounds: Bounds,
    engine: Option<BoundedLbfgs>,
    diagnostics: CapturingReporter,
    w: Option<Vec<f64>>,
}

impl LbfgsSolver {
    pub const NAME: &'static str = "L-BFGS-B";

    pub fn new() -> Self {
        Self::with_options(LbfgsOptions::default())
    }

    /// Base options; the budget and the zero tolerances are always applied on top.
    pub fn with_options(options: LbfgsOptions) -> Self {
        Self {
            options,
            params: None,
            bounds: Bounds::nonnegative(0),
            engine: None,
            diagnostics: CapturingReporter::new(),
            w: None,
        }
    }
}

impl Default for LbfgsSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl BenchmarkSolver for LbfgsSolver {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn set_objective(&mut self, params: &ObjectiveParams) {
        let n = params.data.n_features();
        self.bounds = Bounds::nonnegative(n);
        if self.engine.as_ref().is_none_or(|engine| engine.dim() != n) {
            self.engine = Some(BoundedLbfgs::new(n));
        }
        self.params = Some(params.clone());
    }

    fn run(&mut self, n_iter: usize) -> Result<(), SolveError> {
        let (Some(params), Some(engine)) = (self.params.as_ref(), self.engine.as_mut()) else {
            return Err(SolveError::NotConfigured);
        };
        check_params(params)?;
        let options = LbfgsOptions {
            max_iters: n_iter,
            factr: 0.0,
            pgtol: 0.0,
            verbose: false,
            ..self.options.clone()
        };
        let mut w = vec![0.0; params.data.n_features()];
        let mut problem = RidgeProblem::from_params(params);
        self.diagnostics.clear();
        match engine.solve(
            &mut problem,
            &mut w,
            &self.bounds,
            &options,
            Some(&mut self.diagnostics),
        ) {
            Ok(stats) => {
                log::debug!(
                    "{} n_iter={n_iter}: {:?} after {} iterations, cost {:.6e}",
                    Self::NAME,
                    stats.status,
                    stats.iterations,
                    stats.cost
                );
                self.w = Some(w);
                Ok(())
            }
            Err(err) => {
                log::error!("{} n_iter={n_iter} failed: {err}", Self::NAME);
                self.diagnostics.flush();
                Err(err)
            }
        }
    }

    fn result(&self) -> Option<&[f64]> {
        self.w.as_deref()
    }
}

/// Bounded least squares on the augmented system `[X; sqrt(reg) I] w ~ [y; 0]`.
///
/// The design matrix is only touched through matrix-vector products, so
/// sparse inputs stay sparse.
pub struct TrfSolver {
    options: TrfOptions,
    params: Option<ObjectiveParams>,
    bounds: Bounds,
    target: Vec<f64>,
    centering: Option<(Vec<f64>, Vec<f64>)>,
    w: Option<Vec<f64>>,
}

impl TrfSolver {
    pub const NAME: &'static str = "TRF";

    pub fn new() -> Self {
        Self::with_options(TrfOptions::default())
    }

    /// Base options; the budget and `tol = 0` are always applied on top.
    ///
    /// The inner LSMR tolerance comes from `options.lsmr_tol`; left at `None`
    /// it is `1e-2 * tol = 0`, so every inner solve runs to its iteration cap.
    pub fn with_options(options: TrfOptions) -> Self {
        Self {
            options,
            params: None,
            bounds: Bounds::nonnegative(0),
            target: Vec::new(),
            centering: None,
            w: None,
        }
    }

    /// Solve against the centered design `X - 1 (offset / scale)^T` instead of `X`.
    pub fn with_centering(mut self, offset: Vec<f64>, scale: Vec<f64>) -> Self {
        self.centering = Some((offset, scale));
        self
    }
}

impl Default for TrfSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl BenchmarkSolver for TrfSolver {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn set_objective(&mut self, params: &ObjectiveParams) {
        let n = params.data.n_features();
        self.bounds = Bounds::nonnegative(n);
        self.target = ridge_target(&params.data.y, n);
        self.params = Some(params.clone());
    }

    fn run(&mut self, n_iter: usize) -> Result<(), SolveError> {
        let params = self.params.as_ref().ok_or(SolveError::NotConfigured)?;
        check_params(params)?;
        let options = TrfOptions {
            max_iters: n_iter + 1,
            tol: 0.0,
            ..self.options.clone()
        };
        let x = params.data.x.as_ref();
        let result = match &self.centering {
            Some((offset, scale)) => {
                for (what, len) in [("offset", offset.len()), ("scale", scale.len())] {
                    if len != x.ncols() {
                        return Err(SolveError::DimensionMismatch {
                            what,
                            expected: x.ncols(),
                            actual: len,
                        });
                    }
                }
                let centered = RescaledOperator::new(x, offset, scale);
                let op = ridge_augmented(centered, params.reg);
                lsq_linear(&op, &self.target, &self.bounds, &options, None)?
            }
            None => {
                let op = ridge_augmented(x, params.reg);
                lsq_linear(&op, &self.target, &self.bounds, &options, None)?
            }
        };
        log::debug!(
            "{} n_iter={n_iter}: {:?} after {} iterations, cost {:.6e}",
            Self::NAME,
            result.stats.status,
            result.stats.iterations,
            result.stats.cost
        );
        self.w = Some(result.x);
        Ok(())
    }

    fn result(&self) -> Option<&[f64]> {
        self.w.as_deref()
    }
}

/// `ObjectiveParams` has public fields, so recheck what `RidgeObjective` enforces.
fn check_params(params: &ObjectiveParams) -> Result<(), SolveError> {
    let (x, y) = (&params.data.x, &params.data.y);
    if y.len() != x.nrows() {
        return Err(SolveError::DimensionMismatch {
            what: "y",
            expected: x.nrows(),
            actual: y.len(),
        });
    }
    if !(params.reg.is_finite() && params.reg >= 0.0) {
        return Err(SolveError::InvalidRegularization(params.reg));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::dataset::SimulatedDataset;
    use crate::objective::RidgeObjective;

    fn small_problem() -> (RidgeObjective, ObjectiveParams) {
        let (_, data) = SimulatedDataset::new(15, 6, false).get_data().unwrap();
        let mut objective = RidgeObjective::new(1.0).unwrap();
        objective.set_data(data).unwrap();
        let params = objective.to_params().unwrap();
        (objective, params)
    }

    #[test]
    fn run_before_set_objective_is_an_error() {
        let mut lbfgs = LbfgsSolver::new();
        assert_eq!(lbfgs.run(3), Err(SolveError::NotConfigured));
        assert!(lbfgs.result().is_none());
        let mut trf = TrfSolver::new();
        assert_eq!(trf.run(3), Err(SolveError::NotConfigured));
        assert!(trf.result().is_none());
    }

    #[test]
    fn names_match_the_benchmark_labels() {
        assert_eq!(LbfgsSolver::new().name(), "L-BFGS-B");
        assert_eq!(TrfSolver::new().name(), "TRF");
    }

    #[test]
    fn results_are_feasible_and_finite() {
        let (objective, params) = small_problem();
        let mut solvers: Vec<Box<dyn BenchmarkSolver>> =
            vec![Box::new(LbfgsSolver::new()), Box::new(TrfSolver::new())];
        for solver in solvers.iter_mut() {
            solver.set_objective(&params);
            solver.run(10).unwrap();
            let w = solver.result().unwrap();
            assert_eq!(w.len(), 6);
            assert!(w.iter().all(|&v| v >= 0.0), "{}: {w:?}", solver.name());
            assert!(objective.compute(w).unwrap().is_finite());
        }
    }

    #[test]
    fn zero_centering_matches_plain_design() {
        let (objective, params) = small_problem();
        let mut plain = TrfSolver::new();
        plain.set_objective(&params);
        plain.run(20).unwrap();

        let mut centered = TrfSolver::new().with_centering(vec![0.0; 6], vec![1.0; 6]);
        centered.set_objective(&params);
        centered.run(20).unwrap();

        let a = objective.compute(plain.result().unwrap()).unwrap();
        let b = objective.compute(centered.result().unwrap()).unwrap();
        assert!((a - b).abs() <= 1e-8 * a.max(1.0), "{a} vs {b}");
    }

    fn direct_trf(params: &ObjectiveParams, n_iter: usize, base: TrfOptions) -> Vec<f64> {
        let n = params.data.n_features();
        let op = ridge_augmented(params.data.x.as_ref(), params.reg);
        let options = TrfOptions {
            max_iters: n_iter + 1,
            tol: 0.0,
            ..base
        };
        lsq_linear(
            &op,
            &ridge_target(&params.data.y, n),
            &Bounds::nonnegative(n),
            &options,
            None,
        )
        .unwrap()
        .x
    }

    #[test]
    fn trf_keeps_the_configured_inner_tolerance() {
        use crate::trf::LsmrTolerance;

        let (_, params) = small_problem();
        let mut default = TrfSolver::new();
        default.set_objective(&params);
        default.run(3).unwrap();
        assert_eq!(
            default.result().unwrap(),
            direct_trf(&params, 3, TrfOptions::default()).as_slice()
        );

        let loose = TrfOptions {
            lsmr_tol: Some(LsmrTolerance::Fixed(1e-3)),
            ..TrfOptions::default()
        };
        let mut solver = TrfSolver::with_options(loose.clone());
        solver.set_objective(&params);
        solver.run(3).unwrap();
        assert_eq!(
            solver.result().unwrap(),
            direct_trf(&params, 3, loose).as_slice()
        );
    }

    #[test]
    fn mismatched_response_is_an_error_for_both_solvers() {
        let (_, mut params) = small_problem();
        params.data.y = Arc::from(vec![1.0, 2.0, 3.0]);
        let mut solvers: Vec<Box<dyn BenchmarkSolver>> =
            vec![Box::new(LbfgsSolver::new()), Box::new(TrfSolver::new())];
        for solver in solvers.iter_mut() {
            solver.set_objective(&params);
            assert_eq!(
                solver.run(3),
                Err(SolveError::DimensionMismatch {
                    what: "y",
                    expected: 15,
                    actual: 3
                }),
                "{}",
                solver.name()
            );
            assert!(solver.result().is_none());
        }
    }

    #[test]
    fn invalid_regularization_is_an_error_for_both_solvers() {
        let (_, mut params) = small_problem();
        params.reg = -1.0;
        let mut solvers: Vec<Box<dyn BenchmarkSolver>> =
            vec![Box::new(LbfgsSolver::new()), Box::new(TrfSolver::new())];
        for solver in solvers.iter_mut() {
            solver.set_objective(&params);
            assert_eq!(solver.run(2), Err(SolveError::InvalidRegularization(-1.0)));
        }
    }

    #[test]
    fn failed_lbfgs_run_keeps_previous_result() {
        let (_, params) = small_problem();
        let mut solver = LbfgsSolver::new();
        solver.set_objective(&params);
        solver.run(5).unwrap();
        let previous = solver.result().unwrap().to_vec();
        assert!(!solver.diagnostics.is_empty());

        let mut broken = params.clone();
        let mut y = broken.data.y.to_vec();
        y[4] = f64::NAN;
        broken.data.y = Arc::from(y);
        solver.set_objective(&broken);
        assert!(matches!(solver.run(5), Err(SolveError::NonFinite { .. })));
        assert_eq!(solver.result().unwrap(), previous.as_slice());
        assert!(solver.diagnostics.is_empty());
    }

    #[test]
    fn centering_with_wrong_length_is_rejected() {
        let (_, params) = small_problem();
        let mut solver = TrfSolver::new().with_centering(vec![0.0; 2], vec![1.0; 6]);
        solver.set_objective(&params);
        assert!(matches!(
            solver.run(1),
            Err(SolveError::DimensionMismatch { what: "offset", .. })
        ));
    }
}
