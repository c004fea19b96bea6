//! Special functions and small summary statistics shared across modules.
//!
//! The polygamma implementations use the recurrence ψ⁽ⁿ⁾(x) = ψ⁽ⁿ⁾(x+1) + (-1)ⁿ⁺¹ n!/xⁿ⁺¹
//! to push the argument above 8, then an asymptotic series.

use statrs::distribution::{ContinuousCDF, Normal, StudentsT};

/// Degrees of freedom above which the t distribution is treated as normal.
const NORMAL_APPROX_DF: f64 = 1e10;

/// Digamma function ψ(x).
pub fn digamma(x: f64) -> f64 {
    statrs::function::gamma::digamma(x)
}

/// Trigamma function ψ'(x) for x > 0.
pub fn trigamma(x: f64) -> f64 {
    if !(x > 0.0) {
        return f64::NAN;
    }
    if x.is_infinite() {
        return 0.0;
    }
    let mut result = 0.0;
    let mut z = x;
    while z < 8.0 {
        result += 1.0 / (z * z);
        z += 1.0;
    }
    let inv = 1.0 / z;
    let inv2 = inv * inv;
    // 1/z + 1/(2z²) + 1/(6z³) − 1/(30z⁵) + 1/(42z⁷) − 1/(30z⁹)
    result
        + inv
        + inv2 / 2.0
        + inv * inv2 * (1.0 / 6.0 - inv2 * (1.0 / 30.0 - inv2 * (1.0 / 42.0 - inv2 / 30.0)))
}

/// Tetragamma function ψ''(x) for x > 0.
pub fn tetragamma(x: f64) -> f64 {
    if !(x > 0.0) {
        return f64::NAN;
    }
    if x.is_infinite() {
        return 0.0;
    }
    let mut result = 0.0;
    let mut z = x;
    while z < 8.0 {
        result -= 2.0 / (z * z * z);
        z += 1.0;
    }
    let inv = 1.0 / z;
    let inv2 = inv * inv;
    // −1/z² − 1/z³ − 1/(2z⁴) + 1/(6z⁶) − 1/(6z⁸) + 3/(10z¹⁰) − 5/(6z¹²)
    result - inv2
        - inv2 * inv
        - inv2 * inv2 / 2.0
        + inv2 * inv2 * inv2 * (1.0 / 6.0 - inv2 * (1.0 / 6.0 - inv2 * (3.0 / 10.0 - inv2 * 5.0 / 6.0)))
}

/// Solve ψ'(y) = x for y > 0 by Newton iteration.
///
/// Returns `None` for non-positive input or when the iteration does not
/// converge within 50 steps.
pub fn trigamma_inverse(x: f64) -> Option<f64> {
    if !(x > 0.0) || !x.is_finite() {
        return None;
    }
    if x > 1e7 {
        return Some(1.0 / x.sqrt());
    }
    if x < 1e-6 {
        return Some(1.0 / x);
    }

    let mut y = 0.5 + 1.0 / x;
    for _ in 0..50 {
        let tri = trigamma(y);
        let dif = tri * (1.0 - tri / x) / tetragamma(y);
        y = (y + dif).clamp(1e-8, 1e8);
        if !dif.is_finite() || !y.is_finite() {
            return None;
        }
        if -dif / y < 1e-8 {
            return Some(y);
        }
    }
    None
}

/// Two-sided p-value of a t-statistic with `df` degrees of freedom.
///
/// Infinite `df` uses the standard normal. Returns NaN for NaN input or
/// non-positive `df`.
pub fn t_two_sided_pvalue(t: f64, df: f64) -> f64 {
    if t.is_nan() || !(df > 0.0) {
        return f64::NAN;
    }
    let tail = if df > NORMAL_APPROX_DF {
        match Normal::new(0.0, 1.0) {
            Ok(n) => n.sf(t.abs()),
            Err(_) => return f64::NAN,
        }
    } else {
        match StudentsT::new(0.0, 1.0, df) {
            Ok(d) => d.sf(t.abs()),
            Err(_) => return f64::NAN,
        }
    };
    (2.0 * tail).min(1.0)
}

/// Upper-tail quantile: the `q` with P(T > q) = `p` for T ~ t(`df`).
pub fn t_upper_quantile(p: f64, df: f64) -> f64 {
    if !(p > 0.0 && p < 1.0) || !(df > 0.0) {
        return f64::NAN;
    }
    let p = p.max(1e-300);
    let lower = if df > NORMAL_APPROX_DF {
        match Normal::new(0.0, 1.0) {
            Ok(n) => n.inverse_cdf(p),
            Err(_) => return f64::NAN,
        }
    } else {
        match StudentsT::new(0.0, 1.0, df) {
            Ok(d) => d.inverse_cdf(p),
            Err(_) => return f64::NAN,
        }
    };
    -lower
}

/// Mean of the finite values.
pub fn mean(values: &[f64]) -> f64 {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return f64::NAN;
    }
    finite.iter().sum::<f64>() / finite.len() as f64
}

/// Sample variance (n − 1 denominator).
pub fn sample_variance(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return f64::NAN;
    }
    let m = values.iter().sum::<f64>() / n as f64;
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (n - 1) as f64
}

/// Median of the non-NaN values.
pub fn median(values: &[f64]) -> f64 {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    sorted.sort_by(|a, b| a.total_cmp(b));
    quantile_sorted(&sorted, 0.5)
}

/// Quantile of sorted data with linear interpolation (R type 7).
pub fn quantile_sorted(sorted: &[f64], prob: f64) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return f64::NAN;
    }
    let h = (n - 1) as f64 * prob.clamp(0.0, 1.0);
    let lo = h.floor() as usize;
    let hi = h.ceil() as usize;
    sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
}
