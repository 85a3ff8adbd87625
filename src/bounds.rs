//! Box constraints `lower <= x <= upper` and the feasibility helpers used by
//! the reflective trust-region iteration.

use crate::error::SolveError;

/// Per-coordinate box constraints.
///
/// Infinite bounds are allowed; each lower bound must be strictly below its
/// upper bound.
#[derive(Debug, Clone, PartialEq)]
pub struct Bounds {
    lower: Vec<f64>,
    upper: Vec<f64>,
}

impl Bounds {
    pub fn new(lower: Vec<f64>, upper: Vec<f64>) -> Result<Self, SolveError> {
        if lower.len() != upper.len() {
            return Err(SolveError::DimensionMismatch {
                what: "upper bounds",
                expected: lower.len(),
                actual: upper.len(),
            });
        }
        for (index, (&lo, &hi)) in lower.iter().zip(&upper).enumerate() {
            if lo.is_nan() || hi.is_nan() || lo >= hi {
                return Err(SolveError::InvalidBounds {
                    index,
                    lower: lo,
                    upper: hi,
                });
            }
        }
        Ok(Self { lower, upper })
    }

    /// `0 <= x_i < inf` for `n` coordinates.
    pub fn nonnegative(n: usize) -> Self {
        Self {
            lower: vec![0.0; n],
            upper: vec![f64::INFINITY; n],
        }
    }

    /// Same `(lower, upper)` pair for every coordinate.
    pub fn uniform(n: usize, lower: f64, upper: f64) -> Result<Self, SolveError> {
        Self::new(vec![lower; n], vec![upper; n])
    }

    pub fn len(&self) -> usize {
        self.lower.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lower.is_empty()
    }

    pub fn lower(&self) -> &[f64] {
        &self.lower
    }

    pub fn upper(&self) -> &[f64] {
        &self.upper
    }

    pub fn contains(&self, x: &[f64]) -> bool {
        x.iter()
            .zip(self.lower.iter().zip(&self.upper))
            .all(|(&v, (&lo, &hi))| v >= lo && v <= hi)
    }

    /// Clamp `x` into the box in place.
    pub fn project(&self, x: &mut [f64]) {
        for (v, (&lo, &hi)) in x.iter_mut().zip(self.lower.iter().zip(&self.upper)) {
            *v = v.clamp(lo, hi);
        }
    }

    /// Largest `t` with `x + t s` inside the box, and the coordinates that hit
    /// a bound at that step (`-1` lower, `1` upper, `0` free).
    pub(crate) fn step_to_bound(&self, x: &[f64], s: &[f64], hits: &mut [i8]) -> f64 {
        let mut min_step = f64::INFINITY;
        for i in 0..x.len() {
            if s[i] != 0.0 {
                let t = ((self.lower[i] - x[i]) / s[i]).max((self.upper[i] - x[i]) / s[i]);
                min_step = min_step.min(t);
            }
        }
        for i in 0..x.len() {
            hits[i] = 0;
            if s[i] != 0.0 {
                let t = ((self.lower[i] - x[i]) / s[i]).max((self.upper[i] - x[i]) / s[i]);
                if t == min_step {
                    hits[i] = if s[i] > 0.0 { 1 } else { -1 };
                }
            }
        }
        min_step
    }

    /// Active-set markers: `-1` at the lower bound, `1` at the upper bound.
    ///
    /// With `rtol > 0` a coordinate counts as active when it lies within
    /// `rtol * max(1, |bound|)` of a finite bound.
    pub(crate) fn active(&self, x: &[f64], rtol: f64, active: &mut [i8]) {
        for i in 0..x.len() {
            let (lo, hi) = (self.lower[i], self.upper[i]);
            active[i] = 0;
            if rtol == 0.0 {
                if x[i] <= lo {
                    active[i] = -1;
                } else if x[i] >= hi {
                    active[i] = 1;
                }
                continue;
            }
            let lower_dist = x[i] - lo;
            let upper_dist = hi - x[i];
            let lower_threshold = rtol * lo.abs().max(1.0);
            let upper_threshold = rtol * hi.abs().max(1.0);
            if lo.is_finite() && lower_dist <= upper_dist.min(lower_threshold) {
                active[i] = -1;
            } else if hi.is_finite() && upper_dist <= lower_dist.min(upper_threshold) {
                active[i] = 1;
            }
        }
    }

    /// Move active coordinates strictly inside the box.
    ///
    /// `rstep == 0` moves to the next representable value past the bound;
    /// otherwise the bound is offset by `rstep * max(1, |bound|)`.
    pub(crate) fn make_strictly_feasible(&self, x: &mut [f64], rstep: f64, active: &mut [i8]) {
        self.active(x, rstep, active);
        for i in 0..x.len() {
            let (lo, hi) = (self.lower[i], self.upper[i]);
            match active[i] {
                -1 if rstep == 0.0 => x[i] = next_toward(lo, hi),
                -1 => x[i] = lo + rstep * lo.abs().max(1.0),
                1 if rstep == 0.0 => x[i] = next_toward(hi, lo),
                1 => x[i] = hi - rstep * hi.abs().max(1.0),
                _ => {}
            }
            if x[i] < lo || x[i] > hi {
                x[i] = 0.5 * (lo + hi);
            }
        }
    }

    /// Reflect `y` back into the box; `signs[i]` is `-1` where the
    /// reflection flipped the direction of coordinate `i`.
    pub(crate) fn reflect(&self, y: &[f64], out: &mut [f64], signs: &mut [f64]) {
        for i in 0..y.len() {
            let (lo, hi) = (self.lower[i], self.upper[i]);
            let v = y[i];
            signs[i] = 1.0;
            out[i] = v;
            if v >= lo && v <= hi {
                continue;
            }
            match (lo.is_finite(), hi.is_finite()) {
                (true, false) => {
                    out[i] = v.max(2.0 * lo - v);
                    if v < lo {
                        signs[i] = -1.0;
                    }
                }
                (false, true) => {
                    out[i] = v.min(2.0 * hi - v);
                    if v > hi {
                        signs[i] = -1.0;
                    }
                }
                (true, true) => {
                    let d = hi - lo;
                    let t = (v - lo).rem_euclid(2.0 * d);
                    out[i] = lo + t.min(2.0 * d - t);
                    if t > d {
                        signs[i] = -1.0;
                    }
                }
                (false, false) => {}
            }
        }
    }

    /// Coleman-Li scaling vector `v` and its derivative `dv` at `x`.
    pub(crate) fn coleman_li_scaling(&self, x: &[f64], g: &[f64], v: &mut [f64], dv: &mut [f64]) {
        for i in 0..x.len() {
            v[i] = 1.0;
            dv[i] = 0.0;
            if g[i] < 0.0 && self.upper[i].is_finite() {
                v[i] = self.upper[i] - x[i];
                dv[i] = -1.0;
            }
            if g[i] > 0.0 && self.lower[i].is_finite() {
                v[i] = x[i] - self.lower[i];
                dv[i] = 1.0;
            }
        }
    }
}

/// Next representable value after `from` in the direction of `to`.
fn next_toward(from: f64, to: f64) -> f64 {
    if from.is_nan() || to.is_nan() {
        return f64::NAN;
    }
    if from == to {
        return to;
    }
    if from == 0.0 {
        let tiny = f64::from_bits(1);
        return if to > 0.0 { tiny } else { -tiny };
    }
    let bits = from.to_bits();
    let away_from_zero = (to > from) == (from > 0.0);
    let next = if away_from_zero { bits + 1 } else { bits - 1 };
    f64::from_bits(next)
}
