//! LSMR iterative solver for `min ||A x - b||^2 + damp^2 ||x||^2`.
//!
//! Fong & Saunders, "LSMR: An iterative algorithm for sparse least-squares
//! problems", SISC 2011. Only forward and transpose products of `A` are used.

use crate::operator::LinearOperator;
use crate::vecops::{l2_norm, sign};

/// Options for `lsmr`.
#[derive(Debug, Clone)]
pub struct LsmrOptions {
    /// Damping factor for the regularized problem.
    pub damp: f64,
    /// Relative tolerance on `||A^T r|| / (||A|| ||r||)`.
    pub atol: f64,
    /// Relative tolerance on `||r|| / ||b||`.
    pub btol: f64,
    /// Stop when the condition estimate exceeds this.
    pub conlim: f64,
    /// Iteration cap; `None` means `min(nrows, ncols)`.
    pub max_iters: Option<usize>,
}

impl Default for LsmrOptions {
    fn default() -> Self {
        Self {
            damp: 0.0,
            atol: 1e-6,
            btol: 1e-6,
            conlim: 1e8,
            max_iters: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LsmrStop {
    /// `x = 0` solves the problem exactly.
    ZeroSolution,
    /// `A x - b` is small enough for `atol`, `btol`.
    CompatibleSystem,
    /// The least-squares residual is small enough for `atol`.
    LeastSquares,
    /// The condition estimate exceeded `conlim`.
    IllConditioned,
    /// Compatible to machine precision.
    CompatibleMachinePrecision,
    /// Least squares to machine precision.
    LeastSquaresMachinePrecision,
    /// Condition estimate exceeded machine precision.
    IllConditionedMachinePrecision,
    MaxIterations,
}

#[derive(Debug, Clone)]
pub struct LsmrResult {
    pub x: Vec<f64>,
    pub stop: LsmrStop,
    pub iterations: usize,
    /// Estimate of `||b - A x||` (including the damping block).
    pub residual_norm: f64,
    /// Estimate of `||A^T (b - A x) - damp^2 x||`.
    pub normal_residual_norm: f64,
}

/// Stable Givens rotation: returns `(c, s, r)` with `[c s; -s c] [a; b] = [r; 0]`.
fn sym_ortho(a: f64, b: f64) -> (f64, f64, f64) {
    if b == 0.0 {
        (sign(a), 0.0, a.abs())
    } else if a == 0.0 {
        (0.0, sign(b), b.abs())
    } else if b.abs() > a.abs() {
        let tau = a / b;
        let s = sign(b) / (1.0 + tau * tau).sqrt();
        let c = s * tau;
        (c, s, b / s)
    } else {
        let tau = b / a;
        let c = sign(a) / (1.0 + tau * tau).sqrt();
        let s = c * tau;
        (c, s, a / c)
    }
}

fn scale(v: &mut [f64], alpha: f64) {
    for x in v.iter_mut() {
        *x *= alpha;
    }
}

/// Solve `min ||A x - b||` starting from `x = 0`.
pub fn lsmr<A: LinearOperator + ?Sized>(op: &A, b: &[f64], options: &LsmrOptions) -> LsmrResult {
    let m = op.nrows();
    let n = op.ncols();
    assert_eq!(b.len(), m, "right-hand side length must match nrows");
    let max_iters = options.max_iters.unwrap_or(m.min(n));
    let damp = options.damp;

    let mut x = vec![0.0; n];
    let mut u = b.to_vec();
    let norm_b = l2_norm(b);
    let mut beta = norm_b;
    let mut v = vec![0.0; n];
    let mut alpha = 0.0;
    if beta > 0.0 {
        scale(&mut u, 1.0 / beta);
        op.apply_transpose(&u, &mut v);
        alpha = l2_norm(&v);
    }
    if alpha > 0.0 {
        scale(&mut v, 1.0 / alpha);
    }

    let zero = |x: Vec<f64>, residual_norm: f64| LsmrResult {
        x,
        stop: LsmrStop::ZeroSolution,
        iterations: 0,
        residual_norm,
        normal_residual_norm: 0.0,
    };
    if alpha * beta == 0.0 || norm_b == 0.0 {
        return zero(x, beta);
    }

    let mut zeta_bar = alpha * beta;
    let mut alpha_bar = alpha;
    let mut rho = 1.0;
    let mut rho_bar = 1.0;
    let mut c_bar = 1.0;
    let mut s_bar = 0.0;

    let mut h = v.clone();
    let mut h_bar = vec![0.0; n];
    let mut au = vec![0.0; m];
    let mut atu = vec![0.0; n];

    // ||r|| estimation.
    let mut beta_dd = beta;
    let mut beta_d = 0.0;
    let mut rho_d_old = 1.0;
    let mut tau_tilde_old = 0.0;
    let mut theta_tilde = 0.0;
    let mut zeta = 0.0;
    let mut d = 0.0;

    // ||A|| and cond(A) estimation.
    let mut norm_a2 = alpha * alpha;
    let mut max_r_bar: f64 = 0.0;
    let mut min_r_bar: f64 = 1e100;
    let ctol = if options.conlim > 0.0 {
        1.0 / options.conlim
    } else {
        0.0
    };

    let mut norm_r = beta;
    let mut norm_ar = alpha * beta;
    let mut iterations = 0;
    let mut stop = LsmrStop::MaxIterations;

    while iterations < max_iters {
        iterations += 1;

        // Golub-Kahan bidiagonalization step.
        op.apply(&v, &mut au);
        for (ui, &ai) in u.iter_mut().zip(&au) {
            *ui = ai - alpha * *ui;
        }
        beta = l2_norm(&u);
        if beta > 0.0 {
            scale(&mut u, 1.0 / beta);
            op.apply_transpose(&u, &mut atu);
            for (vi, &ai) in v.iter_mut().zip(&atu) {
                *vi = ai - beta * *vi;
            }
            alpha = l2_norm(&v);
            if alpha > 0.0 {
                scale(&mut v, 1.0 / alpha);
            }
        }

        let (c_hat, s_hat, alpha_hat) = sym_ortho(alpha_bar, damp);

        let rho_old = rho;
        let (c, s, rho_new) = sym_ortho(alpha_hat, beta);
        rho = rho_new;
        let theta_new = s * alpha;
        alpha_bar = c * alpha;

        let rho_bar_old = rho_bar;
        let zeta_old = zeta;
        let theta_bar = s_bar * rho;
        let rho_temp = c_bar * rho;
        let (cb, sb, rb) = sym_ortho(c_bar * rho, theta_new);
        c_bar = cb;
        s_bar = sb;
        rho_bar = rb;
        zeta = c_bar * zeta_bar;
        zeta_bar = -s_bar * zeta_bar;

        let h_bar_scale = -(theta_bar * rho / (rho_old * rho_bar_old));
        let x_scale = zeta / (rho * rho_bar);
        let h_scale = -(theta_new / rho);
        for i in 0..n {
            h_bar[i] = h_bar[i] * h_bar_scale + h[i];
            x[i] += x_scale * h_bar[i];
            h[i] = h[i] * h_scale + v[i];
        }

        let beta_acute = c_hat * beta_dd;
        let beta_check = -s_hat * beta_dd;
        let beta_hat = c * beta_acute;
        beta_dd = -s * beta_acute;
        let theta_tilde_old = theta_tilde;
        let (c_tilde_old, s_tilde_old, rho_tilde_old) = sym_ortho(rho_d_old, theta_bar);
        theta_tilde = s_tilde_old * rho_bar;
        rho_d_old = c_tilde_old * rho_bar;
        beta_d = -s_tilde_old * beta_d + c_tilde_old * beta_hat;
        tau_tilde_old = (zeta_old - theta_tilde_old * tau_tilde_old) / rho_tilde_old;
        let tau_d = (zeta - theta_tilde * tau_tilde_old) / rho_d_old;
        d += beta_check * beta_check;
        norm_r = (d + (beta_d - tau_d).powi(2) + beta_dd * beta_dd).sqrt();

        norm_a2 += beta * beta;
        let norm_a = norm_a2.sqrt();
        norm_a2 += alpha * alpha;

        max_r_bar = max_r_bar.max(rho_bar_old);
        if iterations > 1 {
            min_r_bar = min_r_bar.min(rho_bar_old);
        }
        let cond_a = max_r_bar.max(rho_temp) / min_r_bar.min(rho_temp);

        norm_ar = zeta_bar.abs();
        let norm_x = l2_norm(&x);

        let test1 = norm_r / norm_b;
        let test2 = if norm_a * norm_r != 0.0 {
            norm_ar / (norm_a * norm_r)
        } else {
            f64::INFINITY
        };
        let test3 = 1.0 / cond_a;
        let t1 = test1 / (1.0 + norm_a * norm_x / norm_b);
        let rtol = options.btol + options.atol * norm_a * norm_x / norm_b;

        let mut reason = None;
        if iterations >= max_iters {
            reason = Some(LsmrStop::MaxIterations);
        }
        if 1.0 + test3 <= 1.0 {
            reason = Some(LsmrStop::IllConditionedMachinePrecision);
        }
        if 1.0 + test2 <= 1.0 {
            reason = Some(LsmrStop::LeastSquaresMachinePrecision);
        }
        if 1.0 + t1 <= 1.0 {
            reason = Some(LsmrStop::CompatibleMachinePrecision);
        }
        if test3 <= ctol {
            reason = Some(LsmrStop::IllConditioned);
        }
        if test2 <= options.atol {
            reason = Some(LsmrStop::LeastSquares);
        }
        if test1 <= rtol {
            reason = Some(LsmrStop::CompatibleSystem);
        }
        if let Some(reason) = reason {
            stop = reason;
            break;
        }
    }

    LsmrResult {
        x,
        stop,
        iterations,
        residual_norm: norm_r,
        normal_residual_norm: norm_ar,
    }
}
