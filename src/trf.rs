//! Trust-region-reflective solver for bounded linear least squares.
//!
//! Minimizes `0.5 ||A x - b||^2` subject to `lower <= x <= upper` using only
//! products with `A` and `A^T`. Newton-like steps come from LSMR on a
//! Coleman-Li scaled and regularized operator; steps that would leave the
//! box are truncated or reflected at the boundary.

use std::time::Instant;

use crate::bounds::Bounds;
use crate::error::SolveError;
use crate::lsmr::{LsmrOptions, lsmr};
use crate::operator::{DiagonalOperator, LinearOperator, RightScaledOperator, StackedOperator};
use crate::report::{
    IterationReport, Reporter, ReporterSlot, SolveStatus, SolverStats, StepChoice, StepDetail,
    finish_stats,
};
use crate::vecops::{dot, l2_norm, max_abs};

/// Tolerance handed to the inner LSMR solves.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LsmrTolerance {
    Fixed(f64),
    /// Tighten with the scaled gradient norm:
    /// `max(eps, min(0.1, 1e-2 * min(0.5, g_norm) * g_norm))`.
    Auto,
}

/// Options controlling `lsq_linear`.
#[derive(Debug, Clone)]
pub struct TrfOptions {
    /// Maximum number of trust-region iterations.
    pub max_iters: usize,
    /// Stop when the scaled gradient or the relative cost change drops below this.
    pub tol: f64,
    /// Inner LSMR tolerance; `None` means `Fixed(1e-2 * tol)`.
    pub lsmr_tol: Option<LsmrTolerance>,
    /// Inner LSMR iteration cap; `None` means `min(nrows, ncols)`.
    pub lsmr_max_iters: Option<usize>,
    /// Emit per-iteration diagnostics to stdout by default.
    pub verbose: bool,
}

impl Default for TrfOptions {
    fn default() -> Self {
        Self {
            max_iters: 100,
            tol: 1e-10,
            lsmr_tol: None,
            lsmr_max_iters: None,
            verbose: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LsqResult {
    pub x: Vec<f64>,
    /// `-1` at a lower bound, `1` at an upper bound, `0` free.
    pub active: Vec<i8>,
    pub stats: SolverStats,
}

/// Bounded linear least squares `min 0.5 ||A x - b||^2, lower <= x <= upper`.
///
/// The unconstrained LSMR solution is returned as is when it already lies in
/// the box; otherwise it seeds the trust-region-reflective iteration.
pub fn lsq_linear<A: LinearOperator + ?Sized>(
    op: &A,
    b: &[f64],
    bounds: &Bounds,
    options: &TrfOptions,
    reporter: Option<&mut dyn Reporter>,
) -> Result<LsqResult, SolveError> {
    let (m, n) = (op.nrows(), op.ncols());
    if b.len() != m {
        return Err(SolveError::DimensionMismatch {
            what: "target",
            expected: m,
            actual: b.len(),
        });
    }
    if bounds.len() != n {
        return Err(SolveError::DimensionMismatch {
            what: "bounds",
            expected: n,
            actual: bounds.len(),
        });
    }
    let start_time = options.verbose.then(Instant::now);
    let mut reporter = ReporterSlot::new(reporter, options.verbose);

    let first_tol = match options.lsmr_tol {
        Some(LsmrTolerance::Fixed(t)) => t,
        _ => 1e-2 * options.tol,
    };
    let unconstrained = lsmr(
        op,
        b,
        &LsmrOptions {
            atol: first_tol,
            btol: first_tol,
            max_iters: options.lsmr_max_iters,
            ..LsmrOptions::default()
        },
    );
    let mut evaluations = 2 * unconstrained.iterations;

    if bounds.contains(&unconstrained.x) {
        let x = unconstrained.x;
        let r = residual(op, &x, b);
        let g = op.rmatvec(&r);
        let stats = SolverStats {
            status: SolveStatus::UnconstrainedOptimum,
            iterations: 0,
            evaluations: evaluations + 2,
            cost: 0.5 * dot(&r, &r),
            optimality: max_abs(&g),
            step_norm: 0.0,
        };
        let stats = finish_stats(stats, start_time, &mut reporter);
        return Ok(LsqResult {
            active: vec![0; n],
            x,
            stats,
        });
    }

    let mut active = vec![0i8; n];
    let mut signs = vec![0.0; n];
    let mut x = vec![0.0; n];
    bounds.reflect(&unconstrained.x, &mut x, &mut signs);
    bounds.make_strictly_feasible(&mut x, 0.1, &mut active);

    let mut r = residual(op, &x, b);
    let mut g = op.rmatvec(&r);
    evaluations += 2;
    if !g.iter().all(|v| v.is_finite()) {
        return Err(SolveError::NonFinite {
            iteration: 0,
            value: dot(&r, &r),
        });
    }
    let mut cost = 0.5 * dot(&r, &r);

    let mut v = vec![0.0; n];
    let mut dv = vec![0.0; n];
    let mut d = vec![0.0; n];
    let mut g_h = vec![0.0; n];
    let mut diag_h = vec![0.0; n];
    let mut diag_root_h = vec![0.0; n];
    let mut r_aug = vec![0.0; m + n];

    let mut status = None;
    let mut iterations = 0;
    let mut step_norm = 0.0;
    let mut g_norm = f64::INFINITY;

    for iter in 0..options.max_iters {
        iterations = iter;
        bounds.coleman_li_scaling(&x, &g, &mut v, &mut dv);
        g_norm = 0.0;
        for i in 0..n {
            g_norm = f64::max(g_norm, (g[i] * v[i]).abs());
        }
        if g_norm < options.tol {
            status = Some(SolveStatus::ConvergedOptimality);
        }
        if status.is_some() {
            break;
        }

        for i in 0..n {
            diag_h[i] = g[i] * dv[i];
            diag_root_h[i] = diag_h[i].sqrt();
            d[i] = v[i].sqrt();
            g_h[i] = d[i] * g[i];
        }

        let a_h = RightScaledOperator::new(op, &d);
        let regularized = StackedOperator::new(&a_h, DiagonalOperator::new(&diag_root_h));
        r_aug[..m].copy_from_slice(&r);
        r_aug[m..].fill(0.0);
        let inner_tol = match options.lsmr_tol {
            Some(LsmrTolerance::Fixed(t)) => t,
            Some(LsmrTolerance::Auto) => {
                let eta = 1e-2 * g_norm.min(0.5);
                (eta * g_norm).min(0.1).max(f64::EPSILON)
            }
            None => 1e-2 * options.tol,
        };
        let newton = lsmr(
            &regularized,
            &r_aug,
            &LsmrOptions {
                atol: inner_tol,
                btol: inner_tol,
                max_iters: options.lsmr_max_iters,
                ..LsmrOptions::default()
            },
        );
        evaluations += 2 * newton.iterations;
        let p_h: Vec<f64> = newton.x.iter().map(|v| -v).collect();
        let p: Vec<f64> = p_h.iter().zip(&d).map(|(ph, di)| ph * di).collect();

        let p_dot_g = dot(&p, &g);
        if !(p_dot_g < 0.0) {
            status = Some(SolveStatus::NoProgress);
            break;
        }

        let theta = 1.0 - g_norm.min(0.005);
        let (mut step, mut choice) =
            select_step(&x, &a_h, &g_h, &diag_h, p.clone(), p_h, &d, bounds, theta);
        let mut cost_change = -evaluate_quadratic(op, &g, &step, None);
        evaluations += 1;

        let mut x_new: Vec<f64>;
        if cost_change < 0.0 {
            let (xb, sb, cb) = backtracking(op, &g, &x, &p, theta, p_dot_g, bounds, &mut active);
            x_new = xb;
            step = sb;
            cost_change = cb;
            choice = StepChoice::Backtracked;
        } else {
            x_new = x.iter().zip(&step).map(|(xi, si)| xi + si).collect();
            bounds.make_strictly_feasible(&mut x_new, 0.0, &mut active);
        }

        step_norm = l2_norm(&step);
        x = x_new;
        r = residual(op, &x, b);
        op.apply_transpose(&r, &mut g);
        evaluations += 2;
        if !g.iter().all(|v| v.is_finite()) {
            return Err(SolveError::NonFinite {
                iteration: iter,
                value: dot(&r, &r),
            });
        }

        if cost_change < options.tol * cost {
            status = Some(SolveStatus::ConvergedCost);
        }
        cost = 0.5 * dot(&r, &r);

        reporter.report(IterationReport {
            iteration: iter,
            cost,
            cost_change,
            step_norm,
            optimality: g_norm,
            step: StepDetail::TrustRegion(choice),
        });
        iterations = iter + 1;
    }

    bounds.active(&x, options.tol, &mut active);
    if status != Some(SolveStatus::ConvergedOptimality) {
        bounds.coleman_li_scaling(&x, &g, &mut v, &mut dv);
        g_norm = (0..n).map(|i| (g[i] * v[i]).abs()).fold(0.0, f64::max);
    }
    let stats = SolverStats {
        status: status.unwrap_or(SolveStatus::MaxIterations),
        iterations,
        evaluations,
        cost,
        optimality: g_norm,
        step_norm,
    };
    let stats = finish_stats(stats, start_time, &mut reporter);
    Ok(LsqResult { x, active, stats })
}

fn residual<A: LinearOperator + ?Sized>(op: &A, x: &[f64], b: &[f64]) -> Vec<f64> {
    let mut r = op.matvec(x);
    for (ri, bi) in r.iter_mut().zip(b) {
        *ri -= bi;
    }
    r
}

/// `0.5 (||J s||^2 + s^T diag(c) s) + g^T s`.
fn evaluate_quadratic<J: LinearOperator + ?Sized>(
    j: &J,
    g: &[f64],
    s: &[f64],
    diag: Option<&[f64]>,
) -> f64 {
    let js = j.matvec(s);
    let mut q = dot(&js, &js);
    if let Some(diag) = diag {
        for (si, ci) in s.iter().zip(diag) {
            q += si * ci * si;
        }
    }
    0.5 * q + dot(g, s)
}

/// Coefficients of `t -> a t^2 + b t + c`, the model along `s0 + t s`.
fn quadratic_1d<J: LinearOperator + ?Sized>(
    j: &J,
    g: &[f64],
    s: &[f64],
    diag: &[f64],
    s0: Option<&[f64]>,
) -> (f64, f64, f64) {
    let js = j.matvec(s);
    let mut a = dot(&js, &js);
    for (si, ci) in s.iter().zip(diag) {
        a += si * ci * si;
    }
    a *= 0.5;
    let mut b = dot(g, s);
    let mut c = 0.0;
    if let Some(s0) = s0 {
        let js0 = j.matvec(s0);
        b += dot(&js0, &js);
        c = 0.5 * dot(&js0, &js0) + dot(g, s0);
        for ((s0i, ci), si) in s0.iter().zip(diag).zip(s) {
            b += s0i * ci * si;
            c += 0.5 * s0i * ci * s0i;
        }
    }
    (a, b, c)
}

/// Minimize `a t^2 + b t + c` over `[lb, ub]`; infinite ends are skipped.
fn minimize_quadratic_1d(a: f64, b: f64, lb: f64, ub: f64, c: f64) -> (f64, f64) {
    let value = |t: f64| t * (a * t + b) + c;
    let mut best = (lb, value(lb));
    let mut consider = |t: f64| {
        if t.is_finite() {
            let y = value(t);
            if y < best.1 {
                best = (t, y);
            }
        }
    };
    consider(ub);
    if a != 0.0 {
        let extremum = -0.5 * b / a;
        if lb < extremum && extremum < ub {
            consider(extremum);
        }
    }
    best
}

/// Pick the best of the truncated Newton-like step, its reflection at the
/// first bound hit, and the scaled anti-gradient step.
#[allow(clippy::too_many_arguments)]
fn select_step<J: LinearOperator + ?Sized>(
    x: &[f64],
    a_h: &J,
    g_h: &[f64],
    c_h: &[f64],
    mut p: Vec<f64>,
    mut p_h: Vec<f64>,
    d: &[f64],
    bounds: &Bounds,
    theta: f64,
) -> (Vec<f64>, StepChoice) {
    let n = x.len();
    let inside: Vec<f64> = x.iter().zip(&p).map(|(xi, pi)| xi + pi).collect();
    if bounds.contains(&inside) {
        return (p, StepChoice::Newton);
    }

    let mut hits = vec![0i8; n];
    let p_stride = bounds.step_to_bound(x, &p, &mut hits);

    let mut r_h = p_h.clone();
    for (rh, &hit) in r_h.iter_mut().zip(&hits) {
        if hit != 0 {
            *rh = -*rh;
        }
    }
    let mut r: Vec<f64> = r_h.iter().zip(d).map(|(rh, di)| rh * di).collect();

    for (pi, phi) in p.iter_mut().zip(p_h.iter_mut()) {
        *pi *= p_stride;
        *phi *= p_stride;
    }
    let x_on_bound: Vec<f64> = x.iter().zip(&p).map(|(xi, pi)| xi + pi).collect();

    let r_stride_full = bounds.step_to_bound(&x_on_bound, &r, &mut hits);
    let r_stride_l = (1.0 - theta) * r_stride_full;
    let r_stride_u = theta * r_stride_full;

    let r_value = if r_stride_u > 0.0 {
        let (a, b, c) = quadratic_1d(a_h, g_h, &r_h, c_h, Some(&p_h));
        let (r_stride, r_value) = minimize_quadratic_1d(a, b, r_stride_l, r_stride_u, c);
        for (((rh, &ph), ri), &di) in r_h.iter_mut().zip(&p_h).zip(r.iter_mut()).zip(d) {
            *rh = ph + *rh * r_stride;
            *ri = di * *rh;
        }
        r_value
    } else {
        f64::INFINITY
    };

    for (pi, phi) in p.iter_mut().zip(p_h.iter_mut()) {
        *pi *= theta;
        *phi *= theta;
    }
    let p_value = evaluate_quadratic(a_h, g_h, &p_h, Some(c_h));

    let ag_h: Vec<f64> = g_h.iter().map(|v| -v).collect();
    let mut ag: Vec<f64> = ag_h.iter().zip(d).map(|(a, di)| a * di).collect();
    let ag_stride_u = theta * bounds.step_to_bound(x, &ag, &mut hits);
    let (a, b, _) = quadratic_1d(a_h, g_h, &ag_h, c_h, None);
    let (ag_stride, ag_value) = minimize_quadratic_1d(a, b, 0.0, ag_stride_u, 0.0);
    for v in ag.iter_mut() {
        *v *= ag_stride;
    }

    if p_value < r_value && p_value < ag_value {
        (p, StepChoice::Truncated)
    } else if r_value < p_value && r_value < ag_value {
        (r, StepChoice::Reflected)
    } else {
        (ag, StepChoice::Gradient)
    }
}

/// Halve along the reflected path `x + alpha p` until the model decrease is
/// at least a tenth of the linear prediction.
#[allow(clippy::too_many_arguments)]
fn backtracking<A: LinearOperator + ?Sized>(
    op: &A,
    g: &[f64],
    x: &[f64],
    p: &[f64],
    theta: f64,
    p_dot_g: f64,
    bounds: &Bounds,
    active: &mut [i8],
) -> (Vec<f64>, Vec<f64>, f64) {
    let n = x.len();
    let mut signs = vec![0.0; n];
    let mut trial = vec![0.0; n];
    let mut x_new = vec![0.0; n];
    let mut step = vec![0.0; n];
    let mut alpha = 1.0;
    let mut cost_change;
    let mut halvings = 0;
    loop {
        for i in 0..n {
            trial[i] = x[i] + alpha * p[i];
        }
        bounds.reflect(&trial, &mut x_new, &mut signs);
        for i in 0..n {
            step[i] = x_new[i] - x[i];
        }
        cost_change = -evaluate_quadratic(op, g, &step, None);
        if cost_change > -0.1 * alpha * p_dot_g || halvings >= 60 {
            break;
        }
        alpha *= 0.5;
        halvings += 1;
    }

    bounds.active(&x_new, 1e-10, active);
    if active.iter().any(|&a| a != 0) {
        for i in 0..n {
            trial[i] = x[i] + theta * alpha * p[i];
        }
        bounds.reflect(&trial, &mut x_new, &mut signs);
        bounds.make_strictly_feasible(&mut x_new, 0.0, active);
        for i in 0..n {
            step[i] = x_new[i] - x[i];
        }
        cost_change = -evaluate_quadratic(op, g, &step, None);
    }
    (x_new, step, cost_change)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::DesignMatrix;

    fn tight() -> TrfOptions {
        TrfOptions {
            max_iters: 200,
            tol: 1e-12,
            lsmr_tol: Some(LsmrTolerance::Auto),
            ..TrfOptions::default()
        }
    }

    #[test]
    fn returns_unconstrained_solution_inside_the_box() {
        let a = DesignMatrix::from_row_major(3, 2, &[1.0, 0.0, 0.0, 1.0, 1.0, 1.0]).unwrap();
        // Exact solution x = (1, 2).
        let result = lsq_linear(
            &a,
            &[1.0, 2.0, 3.0],
            &Bounds::nonnegative(2),
            &tight(),
            None,
        )
        .unwrap();
        assert_eq!(result.stats.status, SolveStatus::UnconstrainedOptimum);
        assert!((result.x[0] - 1.0).abs() <= 1e-8);
        assert!((result.x[1] - 2.0).abs() <= 1e-8);
    }

    #[test]
    fn solves_nonnegative_identity_problem() {
        // min 0.5 ||x - b||^2, x >= 0  ->  x = max(b, 0).
        let a = DesignMatrix::from_row_major(3, 3, &[1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0])
            .unwrap();
        let b = [2.0, -1.0, 0.5];
        let result = lsq_linear(&a, &b, &Bounds::nonnegative(3), &tight(), None).unwrap();
        assert!((result.x[0] - 2.0).abs() <= 1e-6, "{:?}", result.x);
        assert!(result.x[1] >= 0.0 && result.x[1] <= 1e-6, "{:?}", result.x);
        assert!((result.x[2] - 0.5).abs() <= 1e-6, "{:?}", result.x);
        assert!(result.stats.cost <= 0.5 + 1e-8);
    }

    #[test]
    fn respects_finite_upper_bounds() {
        let a = DesignMatrix::from_row_major(2, 2, &[1.0, 0.0, 0.0, 1.0]).unwrap();
        let bounds = Bounds::new(vec![0.0, 0.0], vec![1.0, 1.0]).unwrap();
        let result = lsq_linear(&a, &[3.0, 0.25], &bounds, &tight(), None).unwrap();
        assert!((result.x[0] - 1.0).abs() <= 1e-6, "{:?}", result.x);
        assert!((result.x[1] - 0.25).abs() <= 1e-6, "{:?}", result.x);
        assert!(bounds.contains(&result.x));
    }

    #[test]
    fn quadratic_1d_minimum_is_clipped_to_interval() {
        // (t - 2)^2 = t^2 - 4t + 4
        assert_eq!(minimize_quadratic_1d(1.0, -4.0, 0.0, 5.0, 4.0), (2.0, 0.0));
        assert_eq!(minimize_quadratic_1d(1.0, -4.0, 0.0, 1.0, 4.0), (1.0, 1.0));
        let (t, _) = minimize_quadratic_1d(1.0, -4.0, 0.0, f64::INFINITY, 4.0);
        assert_eq!(t, 2.0);
    }

    #[test]
    fn rejects_wrong_target_length() {
        let a = DesignMatrix::from_row_major(2, 2, &[1.0, 0.0, 0.0, 1.0]).unwrap();
        let err = lsq_linear(&a, &[1.0], &Bounds::nonnegative(2), &tight(), None).unwrap_err();
        assert!(matches!(err, SolveError::DimensionMismatch { what: "target", .. }));
    }
}
