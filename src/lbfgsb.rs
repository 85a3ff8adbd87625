use std::time::Instant;

use crate::bounds::Bounds;
use crate::error::SolveError;
use crate::report::{
    IterationReport, Reporter, ReporterSlot, SolveStatus, SolverStats, StepDetail, finish_stats,
};
use crate::vecops::{dot, l2_norm};

/// Smooth objective `f(x)` with gradient, evaluated together.
pub trait SmoothProblem {
    /// Number of variables.
    fn dim(&self) -> usize;
    /// Return `f(x)` and write `grad f(x)` into `grad`.
    fn value_and_gradient(&mut self, x: &[f64], grad: &mut [f64]) -> f64;
}

/// Options controlling the bounded L-BFGS solve.
#[derive(Debug, Clone)]
pub struct LbfgsOptions {
    /// Maximum number of iterations.
    pub max_iters: usize,
    /// Maximum number of objective evaluations.
    pub max_evals: usize,
    /// Number of stored correction pairs.
    pub memory: usize,
    /// Converge when (f_old - f) / max(|f_old|, |f|, 1) <= factr * eps.
    pub factr: f64,
    /// Converge when ||projected gradient||_inf <= pgtol.
    pub pgtol: f64,
    /// Maximum step halvings per line search.
    pub max_line_search: usize,
    /// Emit per-iteration diagnostics to stdout by default.
    pub verbose: bool,
}

impl Default for LbfgsOptions {
    fn default() -> Self {
        Self {
            max_iters: 15_000,
            max_evals: 15_000,
            memory: 10,
            factr: 1e7,
            pgtol: 1e-5,
            max_line_search: 20,
            verbose: false,
        }
    }
}

const ARMIJO: f64 = 1e-4;

/// Correction pairs `(s, y)` in a ring buffer, oldest first.
struct History {
    n: usize,
    memory: usize,
    s: Vec<f64>,
    y: Vec<f64>,
    rho: Vec<f64>,
    alpha: Vec<f64>,
    start: usize,
    len: usize,
}

impl History {
    fn new(n: usize) -> Self {
        Self {
            n,
            memory: 0,
            s: Vec::new(),
            y: Vec::new(),
            rho: Vec::new(),
            alpha: Vec::new(),
            start: 0,
            len: 0,
        }
    }

    fn ensure_memory(&mut self, memory: usize) {
        let memory = memory.max(1);
        if memory != self.memory {
            self.memory = memory;
            self.s = vec![0.0; memory * self.n];
            self.y = vec![0.0; memory * self.n];
            self.rho = vec![0.0; memory];
            self.alpha = vec![0.0; memory];
        }
        self.clear();
    }

    fn clear(&mut self) {
        self.start = 0;
        self.len = 0;
    }

    fn slot(&self, k: usize) -> usize {
        (self.start + k) % self.memory
    }

    fn s_of(&self, slot: usize) -> &[f64] {
        &self.s[slot * self.n..(slot + 1) * self.n]
    }

    fn y_of(&self, slot: usize) -> &[f64] {
        &self.y[slot * self.n..(slot + 1) * self.n]
    }

    /// Store `s = x_new - x_old`, `y = g_new - g_old` if the curvature
    /// condition `s.y > eps y.y` holds.
    fn push(&mut self, x_new: &[f64], x_old: &[f64], g_new: &[f64], g_old: &[f64]) -> bool {
        let mut sy = 0.0;
        let mut yy = 0.0;
        for i in 0..self.n {
            let s = x_new[i] - x_old[i];
            let y = g_new[i] - g_old[i];
            sy += s * y;
            yy += y * y;
        }
        if sy <= f64::EPSILON * yy || sy <= 0.0 {
            return false;
        }
        let slot = if self.len < self.memory {
            self.len += 1;
            self.slot(self.len - 1)
        } else {
            let slot = self.start;
            self.start = (self.start + 1) % self.memory;
            slot
        };
        let n = self.n;
        for i in 0..n {
            self.s[slot * n + i] = x_new[i] - x_old[i];
            self.y[slot * n + i] = g_new[i] - g_old[i];
        }
        self.rho[slot] = 1.0 / sy;
        true
    }

    /// Overwrite `q` (holding the gradient) with `-H q` by the two-loop recursion.
    fn apply_inverse_hessian(&mut self, q: &mut [f64]) {
        for k in (0..self.len).rev() {
            let slot = self.slot(k);
            let a = self.rho[slot] * dot(self.s_of(slot), q);
            self.alpha[k] = a;
            for (qi, &yi) in q.iter_mut().zip(self.y_of(slot)) {
                *qi -= a * yi;
            }
        }
        if self.len > 0 {
            let last = self.slot(self.len - 1);
            let yy = dot(self.y_of(last), self.y_of(last));
            let gamma = if yy > 0.0 {
                1.0 / (self.rho[last] * yy)
            } else {
                1.0
            };
            for qi in q.iter_mut() {
                *qi *= gamma;
            }
        }
        for k in 0..self.len {
            let slot = self.slot(k);
            let beta = self.rho[slot] * dot(self.y_of(slot), q);
            let coeff = self.alpha[k] - beta;
            for (qi, &si) in q.iter_mut().zip(self.s_of(slot)) {
                *qi += coeff * si;
            }
        }
        for qi in q.iter_mut() {
            *qi = -*qi;
        }
    }
}

/// Limited-memory BFGS restricted to a box by gradient projection.
///
/// Search directions come from the two-loop recursion with coordinates that
/// would leave an active bound frozen; iterates stay feasible by projecting
/// every trial point onto the box. Workspace is reused across solves.
pub struct BoundedLbfgs {
    n: usize,
    history: History,
    grad: Vec<f64>,
    trial_grad: Vec<f64>,
    direction: Vec<f64>,
    x_trial: Vec<f64>,
}

impl BoundedLbfgs {
    pub fn new(n: usize) -> Self {
        Self {
            n,
            history: History::new(n),
            grad: vec![0.0; n],
            trial_grad: vec![0.0; n],
            direction: vec![0.0; n],
            x_trial: vec![0.0; n],
        }
    }

    pub fn dim(&self) -> usize {
        self.n
    }

    /// Minimize `problem` over `bounds`, starting from (and overwriting) `x`.
    ///
    /// `x` is first projected onto the box.
    pub fn solve(
        &mut self,
        problem: &mut impl SmoothProblem,
        x: &mut [f64],
        bounds: &Bounds,
        options: &LbfgsOptions,
        reporter: Option<&mut dyn Reporter>,
    ) -> Result<SolverStats, SolveError> {
        let n = self.n;
        for (what, actual) in [
            ("x", x.len()),
            ("bounds", bounds.len()),
            ("problem dimension", problem.dim()),
        ] {
            if actual != n {
                return Err(SolveError::DimensionMismatch {
                    what,
                    expected: n,
                    actual,
                });
            }
        }
        let start_time = options.verbose.then(Instant::now);
        let mut reporter = ReporterSlot::new(reporter, options.verbose);
        self.history.ensure_memory(options.memory);

        bounds.project(x);
        let mut cost = problem.value_and_gradient(x, &mut self.grad);
        let mut evaluations = 1;
        check_finite(0, cost, &self.grad)?;

        let mut step_norm = 0.0;
        let mut optimality = projected_gradient_inf(x, &self.grad, bounds);
        for iter in 0..options.max_iters {
            if optimality <= options.pgtol {
                let done = SolverStats {
                    status: SolveStatus::ConvergedOptimality,
                    iterations: iter,
                    evaluations,
                    cost,
                    optimality,
                    step_norm,
                };
                return Ok(finish_stats(done, start_time, &mut reporter));
            }
            if evaluations >= options.max_evals {
                let done = SolverStats {
                    status: SolveStatus::MaxEvaluations,
                    iterations: iter,
                    evaluations,
                    cost,
                    optimality,
                    step_norm,
                };
                return Ok(finish_stats(done, start_time, &mut reporter));
            }

            // Quasi-Newton direction, frozen where it would leave an active bound.
            self.direction.copy_from_slice(&self.grad);
            self.history.apply_inverse_hessian(&mut self.direction);
            freeze_active(x, bounds, &mut self.direction);
            if !(dot(&self.grad, &self.direction) < 0.0) {
                // Fall back to projected steepest descent and restart the memory.
                for i in 0..n {
                    self.direction[i] = -self.grad[i];
                }
                freeze_active(x, bounds, &mut self.direction);
                self.history.clear();
            }

            let mut t = if self.history.len == 0 {
                (1.0 / l2_norm(&self.direction)).min(1.0)
            } else {
                1.0
            };

            // Projected backtracking with an Armijo test on the actual step.
            let mut line_evals = 0;
            let accepted_cost = loop {
                for i in 0..n {
                    self.x_trial[i] = x[i] + t * self.direction[i];
                }
                bounds.project(&mut self.x_trial);
                let mut decrease = 0.0;
                for i in 0..n {
                    decrease += self.grad[i] * (self.x_trial[i] - x[i]);
                }
                let trial_cost = problem.value_and_gradient(&self.x_trial, &mut self.trial_grad);
                evaluations += 1;
                line_evals += 1;
                if trial_cost.is_nan() {
                    return Err(SolveError::NonFinite {
                        iteration: iter,
                        value: trial_cost,
                    });
                }
                if trial_cost <= cost + ARMIJO * decrease.min(0.0) {
                    check_finite(iter, trial_cost, &self.trial_grad)?;
                    break Some(trial_cost);
                }
                if line_evals > options.max_line_search || evaluations >= options.max_evals {
                    break None;
                }
                t *= 0.5;
            };

            let Some(trial_cost) = accepted_cost else {
                let status = if evaluations >= options.max_evals {
                    SolveStatus::MaxEvaluations
                } else {
                    SolveStatus::LineSearchFailed
                };
                let done = SolverStats {
                    status,
                    iterations: iter,
                    evaluations,
                    cost,
                    optimality,
                    step_norm,
                };
                return Ok(finish_stats(done, start_time, &mut reporter));
            };

            self.history.push(&self.x_trial, x, &self.trial_grad, &self.grad);
            let mut step_sq = 0.0;
            for i in 0..n {
                let s = self.x_trial[i] - x[i];
                step_sq += s * s;
            }
            step_norm = step_sq.sqrt();
            x.copy_from_slice(&self.x_trial);
            core::mem::swap(&mut self.grad, &mut self.trial_grad);
            let previous = cost;
            cost = trial_cost;
            optimality = projected_gradient_inf(x, &self.grad, bounds);

            reporter.report(IterationReport {
                iteration: iter,
                cost,
                cost_change: previous - cost,
                step_norm,
                optimality,
                step: StepDetail::LineSearch {
                    step_length: t,
                    evaluations: line_evals,
                },
            });

            let scale = previous.abs().max(cost.abs()).max(1.0);
            if (previous - cost) / scale <= options.factr * f64::EPSILON {
                let done = SolverStats {
                    status: SolveStatus::ConvergedCost,
                    iterations: iter + 1,
                    evaluations,
                    cost,
                    optimality,
                    step_norm,
                };
                return Ok(finish_stats(done, start_time, &mut reporter));
            }
        }

        let done = SolverStats {
            status: SolveStatus::MaxIterations,
            iterations: options.max_iters,
            evaluations,
            cost,
            optimality,
            step_norm,
        };
        Ok(finish_stats(done, start_time, &mut reporter))
    }
}

fn check_finite(iteration: usize, value: f64, grad: &[f64]) -> Result<(), SolveError> {
    if !value.is_finite() {
        return Err(SolveError::NonFinite { iteration, value });
    }
    if let Some(&g) = grad.iter().find(|g| !g.is_finite()) {
        return Err(SolveError::NonFinite {
            iteration,
            value: g,
        });
    }
    Ok(())
}

/// Zero direction components that point out of the box at an active bound.
fn freeze_active(x: &[f64], bounds: &Bounds, direction: &mut [f64]) {
    for i in 0..x.len() {
        let at_lower = x[i] <= bounds.lower()[i] && direction[i] < 0.0;
        let at_upper = x[i] >= bounds.upper()[i] && direction[i] > 0.0;
        if at_lower || at_upper {
            direction[i] = 0.0;
        }
    }
}

/// `||P(x - g) - x||_inf`, the box-constrained optimality measure.
fn projected_gradient_inf(x: &[f64], grad: &[f64], bounds: &Bounds) -> f64 {
    let mut max: f64 = 0.0;
    for i in 0..x.len() {
        let projected = (x[i] - grad[i]).clamp(bounds.lower()[i], bounds.upper()[i]);
        max = max.max((projected - x[i]).abs());
    }
    max
}

#[cfg(test)]
mod tests {
    use super::*;

    /// f(x) = 0.5 sum_i a_i (x_i - c_i)^2
    struct Separable {
        a: Vec<f64>,
        c: Vec<f64>,
    }

    impl SmoothProblem for Separable {
        fn dim(&self) -> usize {
            self.a.len()
        }

        fn value_and_gradient(&mut self, x: &[f64], grad: &mut [f64]) -> f64 {
            let mut f = 0.0;
            for i in 0..x.len() {
                let d = x[i] - self.c[i];
                f += 0.5 * self.a[i] * d * d;
                grad[i] = self.a[i] * d;
            }
            f
        }
    }

    #[test]
    fn clips_separable_quadratic_at_the_bound() {
        let mut problem = Separable {
            a: vec![1.0, 10.0, 0.5],
            c: vec![2.0, -3.0, 0.25],
        };
        let mut solver = BoundedLbfgs::new(3);
        let mut x = vec![1.0; 3];
        let options = LbfgsOptions {
            factr: 0.0,
            pgtol: 1e-10,
            ..LbfgsOptions::default()
        };
        let stats = solver
            .solve(&mut problem, &mut x, &Bounds::nonnegative(3), &options, None)
            .unwrap();
        assert!(matches!(
            stats.status,
            SolveStatus::ConvergedOptimality | SolveStatus::ConvergedCost
        ));
        assert!((x[0] - 2.0).abs() <= 1e-5);
        assert_eq!(x[1], 0.0);
        assert!((x[2] - 0.25).abs() <= 1e-5);
    }

    #[test]
    fn iteration_budget_caps_the_solve() {
        let mut problem = Separable {
            a: vec![1.0, 100.0],
            c: vec![5.0, 5.0],
        };
        let mut solver = BoundedLbfgs::new(2);
        let mut x = vec![0.0; 2];
        let options = LbfgsOptions {
            max_iters: 1,
            factr: 0.0,
            pgtol: 0.0,
            ..LbfgsOptions::default()
        };
        let stats = solver
            .solve(&mut problem, &mut x, &Bounds::nonnegative(2), &options, None)
            .unwrap();
        assert_eq!(stats.status, SolveStatus::MaxIterations);
        assert_eq!(stats.iterations, 1);
        assert!(stats.cost < 0.5 * (25.0 + 100.0 * 25.0));
    }

    #[test]
    fn rejects_wrong_lengths() {
        let mut problem = Separable {
            a: vec![1.0],
            c: vec![1.0],
        };
        let mut solver = BoundedLbfgs::new(2);
        let mut x = vec![0.0; 2];
        let err = solver
            .solve(
                &mut problem,
                &mut x,
                &Bounds::nonnegative(2),
                &LbfgsOptions::default(),
                None,
            )
            .unwrap_err();
        assert!(matches!(
            err,
            SolveError::DimensionMismatch {
                what: "problem dimension",
                ..
            }
        ));
    }

    #[test]
    fn non_finite_objective_is_an_error() {
        struct Blows;
        impl SmoothProblem for Blows {
            fn dim(&self) -> usize {
                1
            }
            fn value_and_gradient(&mut self, _x: &[f64], grad: &mut [f64]) -> f64 {
                grad[0] = 1.0;
                f64::NAN
            }
        }
        let mut solver = BoundedLbfgs::new(1);
        let mut x = vec![1.0];
        let err = solver
            .solve(
                &mut Blows,
                &mut x,
                &Bounds::nonnegative(1),
                &LbfgsOptions::default(),
                None,
            )
            .unwrap_err();
        assert!(matches!(err, SolveError::NonFinite { iteration: 0, .. }));
    }
}
