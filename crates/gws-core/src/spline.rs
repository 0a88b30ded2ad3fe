//! Natural cubic spline over a fixed set of knots.
//!
//! The tridiagonal system for the second derivatives depends only on the knot
//! spacing, so it is factored once and reused for every grid cell.
//! Evaluation outside the knot range extends the end polynomials.

#[cfg(feature = "threading")]
use rayon::prelude::*;

use crate::error::{GwsError, GwsResult};

/// Minimum number of knots for a spline.
pub const MIN_KNOTS: usize = 2;

/// Precomputed natural cubic spline system for a knot vector.
#[derive(Debug, Clone)]
pub struct NaturalCubicSpline {
    knots: Vec<f64>,
    /// Interval widths, `h[i] = x[i+1] - x[i]`.
    h: Vec<f64>,
    /// Thomas forward-sweep coefficients for the interior unknowns.
    c_prime: Vec<f64>,
    denom: Vec<f64>,
}

/// Weights of `y[i], y[i+1], m[i], m[i+1]` for one evaluation point.
#[derive(Debug, Clone, Copy)]
struct Basis {
    i: usize,
    wy0: f64,
    wy1: f64,
    wm0: f64,
    wm1: f64,
}

impl Basis {
    #[inline]
    fn apply(&self, y: &[f64], m: &[f64]) -> f64 {
        self.wy0 * y[self.i]
            + self.wy1 * y[self.i + 1]
            + self.wm0 * m[self.i]
            + self.wm1 * m[self.i + 1]
    }
}

impl NaturalCubicSpline {
    pub fn new(knots: &[f64]) -> GwsResult<Self> {
        if knots.len() < MIN_KNOTS {
            return Err(GwsError::InsufficientSamples { required: MIN_KNOTS, found: knots.len() });
        }
        if knots.iter().any(|k| !k.is_finite()) {
            return Err(GwsError::invalid("spline knots must be finite"));
        }
        let h: Vec<f64> = knots.windows(2).map(|w| w[1] - w[0]).collect();
        if h.iter().any(|&d| d <= 0.0) {
            return Err(GwsError::invalid("spline knots must be strictly increasing"));
        }

        // Interior rows i = 1..n-2:
        //   h[i-1]·m[i-1] + 2(h[i-1]+h[i])·m[i] + h[i]·m[i+1] = rhs[i]
        // with m[0] = m[n-1] = 0.
        let n_int = knots.len() - 2;
        let mut c_prime = vec![0f64; n_int];
        let mut denom = vec![0f64; n_int];
        for r in 0..n_int {
            let i = r + 1;
            let a = h[i - 1];
            let b = 2.0 * (h[i - 1] + h[i]);
            let c = h[i];
            let d = if r == 0 { b } else { b - a * c_prime[r - 1] };
            denom[r] = d;
            c_prime[r] = c / d;
        }

        Ok(Self { knots: knots.to_vec(), h, c_prime, denom })
    }

    /// Second derivatives at the knots for the values `y`.
    pub fn second_derivatives(&self, y: &[f64]) -> Vec<f64> {
        let n = self.knots.len();
        let n_int = n - 2;
        let mut m = vec![0f64; n];
        if n_int == 0 {
            return m;
        }
        let h = &self.h;
        let mut d_prime = vec![0f64; n_int];
        for r in 0..n_int {
            let i = r + 1;
            let rhs = 6.0 * ((y[i + 1] - y[i]) / h[i] - (y[i] - y[i - 1]) / h[i - 1]);
            d_prime[r] = if r == 0 {
                rhs / self.denom[r]
            } else {
                (rhs - h[i - 1] * d_prime[r - 1]) / self.denom[r]
            };
        }
        m[n_int] = d_prime[n_int - 1];
        for r in (0..n_int - 1).rev() {
            m[r + 1] = d_prime[r] - self.c_prime[r] * m[r + 2];
        }
        m
    }

    fn basis(&self, x: f64) -> Basis {
        let n = self.knots.len();
        // Interval index, clamped so outside points use the end polynomials.
        let i = match self.knots.iter().rposition(|&k| k <= x) {
            Some(i) => i.min(n - 2),
            None => 0,
        };
        let h = self.h[i];
        let a = self.knots[i + 1] - x;
        let b = x - self.knots[i];
        Basis {
            i,
            wy0: a / h,
            wy1: b / h,
            wm0: (a * a * a / h - a * h) / 6.0,
            wm1: (b * b * b / h - b * h) / 6.0,
        }
    }

    /// Evaluate the spline through `y` at every point of `xs`.
    pub fn interpolate(&self, y: &[f64], xs: &[f64]) -> GwsResult<Vec<f64>> {
        self.check_len(y.len())?;
        let m = self.second_derivatives(y);
        Ok(xs.iter().map(|&x| self.basis(x).apply(y, &m)).collect())
    }

    /// Interpolate many series at once.
    ///
    /// `values` is knot-major: `values[k * n_series + s]` is series `s` at knot
    /// `k`. The result is point-major with the same layout over `xs`.
    pub fn interpolate_columns(
        &self,
        values: &[f64],
        n_series: usize,
        xs: &[f64],
    ) -> GwsResult<Vec<f64>> {
        let n = self.knots.len();
        if values.len() != n * n_series {
            return Err(GwsError::invalid(format!(
                "expected {} values for {n} knots × {n_series} series, got {}",
                n * n_series,
                values.len()
            )));
        }
        let basis: Vec<Basis> = xs.iter().map(|&x| self.basis(x)).collect();
        let column = |s: usize| -> Vec<f64> {
            let y: Vec<f64> = (0..n).map(|k| values[k * n_series + s]).collect();
            let m = self.second_derivatives(&y);
            basis.iter().map(|b| b.apply(&y, &m)).collect()
        };

        #[cfg(feature = "threading")]
        let columns: Vec<Vec<f64>> = (0..n_series).into_par_iter().map(column).collect();
        #[cfg(not(feature = "threading"))]
        let columns: Vec<Vec<f64>> = (0..n_series).map(column).collect();

        let mut out = vec![0f64; xs.len() * n_series];
        for (s, col) in columns.iter().enumerate() {
            for (p, &v) in col.iter().enumerate() {
                out[p * n_series + s] = v;
            }
        }
        Ok(out)
    }

    fn check_len(&self, len: usize) -> GwsResult<()> {
        if len == self.knots.len() {
            Ok(())
        } else {
            Err(GwsError::invalid(format!(
                "{len} values for {} knots",
                self.knots.len()
            )))
        }
    }
}
