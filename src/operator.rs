//! Matrix-free linear operators.
//!
//! An operator is known only through its forward product `A x` and its
//! transpose product `A^T y`. Compositions build new operators from existing
//! ones without ever forming the underlying matrix, which keeps sparse design
//! matrices sparse.

use std::cell::RefCell;

/// Linear map `R^ncols -> R^nrows` given by its forward and transpose actions.
pub trait LinearOperator {
    /// Output dimension of `apply`.
    fn nrows(&self) -> usize;
    /// Input dimension of `apply`.
    fn ncols(&self) -> usize;

    /// Write `A x` into `out` (`x.len() == ncols`, `out.len() == nrows`).
    fn apply(&self, x: &[f64], out: &mut [f64]);
    /// Write `A^T y` into `out` (`y.len() == nrows`, `out.len() == ncols`).
    fn apply_transpose(&self, y: &[f64], out: &mut [f64]);

    /// Allocating form of `apply`.
    fn matvec(&self, x: &[f64]) -> Vec<f64> {
        let mut out = vec![0.0; self.nrows()];
        self.apply(x, &mut out);
        out
    }

    /// Allocating form of `apply_transpose`.
    fn rmatvec(&self, y: &[f64]) -> Vec<f64> {
        let mut out = vec![0.0; self.ncols()];
        self.apply_transpose(y, &mut out);
        out
    }
}

impl<T: LinearOperator + ?Sized> LinearOperator for &T {
    fn nrows(&self) -> usize {
        (**self).nrows()
    }

    fn ncols(&self) -> usize {
        (**self).ncols()
    }

    fn apply(&self, x: &[f64], out: &mut [f64]) {
        (**self).apply(x, out);
    }

    fn apply_transpose(&self, y: &[f64], out: &mut [f64]) {
        (**self).apply_transpose(y, out);
    }
}

/// `alpha * I` on `R^n`.
#[derive(Debug, Clone, Copy)]
pub struct ScaledIdentity {
    alpha: f64,
    n: usize,
}

impl ScaledIdentity {
    pub fn new(alpha: f64, n: usize) -> Self {
        Self { alpha, n }
    }
}

impl LinearOperator for ScaledIdentity {
    fn nrows(&self) -> usize {
        self.n
    }

    fn ncols(&self) -> usize {
        self.n
    }

    fn apply(&self, x: &[f64], out: &mut [f64]) {
        for (o, &v) in out.iter_mut().zip(x) {
            *o = self.alpha * v;
        }
    }

    fn apply_transpose(&self, y: &[f64], out: &mut [f64]) {
        self.apply(y, out);
    }
}

/// `diag(d)`, borrowing the diagonal.
#[derive(Debug, Clone, Copy)]
pub struct DiagonalOperator<'a> {
    diag: &'a [f64],
}

impl<'a> DiagonalOperator<'a> {
    pub fn new(diag: &'a [f64]) -> Self {
        Self { diag }
    }
}

impl LinearOperator for DiagonalOperator<'_> {
    fn nrows(&self) -> usize {
        self.diag.len()
    }

    fn ncols(&self) -> usize {
        self.diag.len()
    }

    fn apply(&self, x: &[f64], out: &mut [f64]) {
        for ((o, &v), &d) in out.iter_mut().zip(x).zip(self.diag) {
            *o = d * v;
        }
    }

    fn apply_transpose(&self, y: &[f64], out: &mut [f64]) {
        self.apply(y, out);
    }
}

/// Vertical stack `[top; bottom]` of two operators with equal column counts.
///
/// Forward: `[top x; bottom x]`. Transpose on `v = [v_top; v_bottom]`:
/// `top^T v_top + bottom^T v_bottom`.
#[derive(Debug, Clone)]
pub struct StackedOperator<A, B> {
    top: A,
    bottom: B,
    scratch: RefCell<Vec<f64>>,
}

impl<A: LinearOperator, B: LinearOperator> StackedOperator<A, B> {
    /// Panics if the column counts differ.
    pub fn new(top: A, bottom: B) -> Self {
        assert_eq!(
            top.ncols(),
            bottom.ncols(),
            "stacked operators must share their column count"
        );
        let n = top.ncols();
        Self {
            top,
            bottom,
            scratch: RefCell::new(vec![0.0; n]),
        }
    }

    pub fn top(&self) -> &A {
        &self.top
    }

    pub fn bottom(&self) -> &B {
        &self.bottom
    }
}

impl<A: LinearOperator, B: LinearOperator> LinearOperator for StackedOperator<A, B> {
    fn nrows(&self) -> usize {
        self.top.nrows() + self.bottom.nrows()
    }

    fn ncols(&self) -> usize {
        self.top.ncols()
    }

    fn apply(&self, x: &[f64], out: &mut [f64]) {
        let (upper, lower) = out.split_at_mut(self.top.nrows());
        self.top.apply(x, upper);
        self.bottom.apply(x, lower);
    }

    fn apply_transpose(&self, y: &[f64], out: &mut [f64]) {
        let (upper, lower) = y.split_at(self.top.nrows());
        self.top.apply_transpose(upper, out);
        let mut scratch = self.scratch.borrow_mut();
        self.bottom.apply_transpose(lower, &mut scratch);
        for (o, &s) in out.iter_mut().zip(scratch.iter()) {
            *o += s;
        }
    }
}

/// `A diag(d)`: scales the input of `A` coordinate-wise.
#[derive(Debug, Clone)]
pub struct RightScaledOperator<'a, A> {
    inner: A,
    scale: &'a [f64],
    scratch: RefCell<Vec<f64>>,
}

impl<'a, A: LinearOperator> RightScaledOperator<'a, A> {
    /// Panics if `scale.len() != inner.ncols()`.
    pub fn new(inner: A, scale: &'a [f64]) -> Self {
        assert_eq!(inner.ncols(), scale.len(), "scale length must match ncols");
        let n = scale.len();
        Self {
            inner,
            scale,
            scratch: RefCell::new(vec![0.0; n]),
        }
    }
}

impl<A: LinearOperator> LinearOperator for RightScaledOperator<'_, A> {
    fn nrows(&self) -> usize {
        self.inner.nrows()
    }

    fn ncols(&self) -> usize {
        self.inner.ncols()
    }

    fn apply(&self, x: &[f64], out: &mut [f64]) {
        let mut scaled = self.scratch.borrow_mut();
        for ((s, &v), &d) in scaled.iter_mut().zip(x).zip(self.scale) {
            *s = d * v;
        }
        self.inner.apply(&scaled, out);
    }

    fn apply_transpose(&self, y: &[f64], out: &mut [f64]) {
        self.inner.apply_transpose(y, out);
        for (o, &d) in out.iter_mut().zip(self.scale) {
            *o *= d;
        }
    }
}

/// Column-centered view of `X`, folded into the products.
///
/// Represents `X - 1 (offset / scale)^T` without touching `X`:
/// forward `X b - (b . offset/scale) 1`, transpose
/// `X^T v - (offset/scale) sum(v)`.
#[derive(Debug, Clone)]
pub struct RescaledOperator<A> {
    inner: A,
    offset_scale: Vec<f64>,
}

impl<A: LinearOperator> RescaledOperator<A> {
    /// Panics if `offset` or `scale` do not have `inner.ncols()` entries.
    pub fn new(inner: A, offset: &[f64], scale: &[f64]) -> Self {
        let n = inner.ncols();
        assert_eq!(offset.len(), n, "offset length must match ncols");
        assert_eq!(scale.len(), n, "scale length must match ncols");
        let offset_scale = offset.iter().zip(scale).map(|(&o, &s)| o / s).collect();
        Self {
            inner,
            offset_scale,
        }
    }
}

impl<A: LinearOperator> LinearOperator for RescaledOperator<A> {
    fn nrows(&self) -> usize {
        self.inner.nrows()
    }

    fn ncols(&self) -> usize {
        self.inner.ncols()
    }

    fn apply(&self, x: &[f64], out: &mut [f64]) {
        self.inner.apply(x, out);
        let shift = crate::vecops::dot(x, &self.offset_scale);
        for o in out.iter_mut() {
            *o -= shift;
        }
    }

    fn apply_transpose(&self, y: &[f64], out: &mut [f64]) {
        self.inner.apply_transpose(y, out);
        let total: f64 = y.iter().sum();
        for (o, &os) in out.iter_mut().zip(&self.offset_scale) {
            *o -= os * total;
        }
    }
}

/// The ridge system `[A; sqrt(reg) I]` as a stacked operator.
pub type RidgeAugmented<A> = StackedOperator<A, ScaledIdentity>;

/// Builds `[A; sqrt(reg) I]` so that `||[A; sqrt(reg) I] w - [y; 0]||^2`
/// equals `||A w - y||^2 + reg ||w||^2`.
pub fn ridge_augmented<A: LinearOperator>(inner: A, reg: f64) -> RidgeAugmented<A> {
    let n = inner.ncols();
    StackedOperator::new(inner, ScaledIdentity::new(reg.sqrt(), n))
}

/// Target `[y; 0_n]` matching `ridge_augmented`.
pub fn ridge_target(y: &[f64], n_features: usize) -> Vec<f64> {
    let mut target = Vec::with_capacity(y.len() + n_features);
    target.extend_from_slice(y);
    target.resize(y.len() + n_features, 0.0);
    target
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vecops::dot;

    /// Small dense row-major matrix for checking compositions.
    struct RowMajor {
        nrows: usize,
        ncols: usize,
        data: Vec<f64>,
    }

    impl LinearOperator for RowMajor {
        fn nrows(&self) -> usize {
            self.nrows
        }

        fn ncols(&self) -> usize {
            self.ncols
        }

        fn apply(&self, x: &[f64], out: &mut [f64]) {
            for i in 0..self.nrows {
                out[i] = dot(&self.data[i * self.ncols..(i + 1) * self.ncols], x);
            }
        }

        fn apply_transpose(&self, y: &[f64], out: &mut [f64]) {
            out.fill(0.0);
            for i in 0..self.nrows {
                for j in 0..self.ncols {
                    out[j] += self.data[i * self.ncols + j] * y[i];
                }
            }
        }
    }

    fn sample() -> RowMajor {
        RowMajor {
            nrows: 3,
            ncols: 2,
            data: vec![1.0, 2.0, -1.0, 0.5, 3.0, 0.0],
        }
    }

    fn assert_close(a: &[f64], b: &[f64]) {
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b) {
            assert!((x - y).abs() <= 1e-12, "{a:?} != {b:?}");
        }
    }

    #[test]
    fn ridge_augmented_stacks_scaled_identity() {
        let op = ridge_augmented(sample(), 4.0);
        assert_eq!((op.nrows(), op.ncols()), (5, 2));
        assert_close(&op.matvec(&[1.0, 1.0]), &[3.0, -0.5, 3.0, 2.0, 2.0]);
        assert_close(
            &op.rmatvec(&[1.0, 0.0, 0.0, 1.0, -1.0]),
            &[1.0 + 2.0, 2.0 - 2.0],
        );
    }

    #[test]
    fn ridge_objective_matches_augmented_residual() {
        let x = sample();
        let y = [1.0, -2.0, 0.5];
        let w = [0.3, 1.2];
        let reg = 2.5;

        let r: Vec<f64> = x.matvec(&w).iter().zip(&y).map(|(a, b)| a - b).collect();
        let ridge = dot(&r, &r) + reg * dot(&w, &w);

        let op = ridge_augmented(&x, reg);
        let target = ridge_target(&y, 2);
        let ra: Vec<f64> = op
            .matvec(&w)
            .iter()
            .zip(&target)
            .map(|(a, b)| a - b)
            .collect();
        assert!((dot(&ra, &ra) - ridge).abs() <= 1e-12);
    }

    #[test]
    fn compositions_are_adjoint() {
        let x = sample();
        let d = [2.0, -0.5];
        let diag = [0.1, 0.2];
        let op = StackedOperator::new(
            RightScaledOperator::new(&x, &d),
            DiagonalOperator::new(&diag),
        );
        let u = [0.7, -1.1];
        let v = [0.2, 1.0, -0.3, 0.4, 0.9];
        let lhs = dot(&op.matvec(&u), &v);
        let rhs = dot(&u, &op.rmatvec(&v));
        assert!((lhs - rhs).abs() <= 1e-12);
    }

    #[test]
    fn rescaled_operator_centers_columns() {
        let x = sample();
        let offset = [1.0, 0.5];
        let scale = [2.0, 4.0];
        let op = RescaledOperator::new(&x, &offset, &scale);

        let explicit = RowMajor {
            nrows: 3,
            ncols: 2,
            data: (0..6)
                .map(|k| x.data[k] - offset[k % 2] / scale[k % 2])
                .collect(),
        };
        let b = [0.4, -1.5];
        assert_close(&op.matvec(&b), &explicit.matvec(&b));
        let v = [1.0, 2.0, -3.0];
        assert_close(&op.rmatvec(&v), &explicit.rmatvec(&v));
    }
}
