//! Empirical-Bayes prior for residual variances and posterior squeezing.
//!
//! Residual variances are modelled as s² | σ² ~ σ² χ²(d) / d with a scaled
//! inverse-χ² prior σ² ~ s0² d0 / χ²(d0). The prior is estimated by matching
//! the first two moments of log s², which follow a Fisher z distribution.

use crate::error::{DaError, Result};
use crate::stats::{digamma, mean, median, sample_variance, trigamma, trigamma_inverse};
use serde::{Deserialize, Serialize};

/// Default relative floor on variances used during moment matching.
pub const DEFAULT_VARIANCE_FLOOR: f64 = 1e-5;

/// How the prior was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PriorStatus {
    /// Both moments matched; d0 finite.
    Estimated,
    /// No excess spread in log variances; d0 = ∞ and s0² is the mean variance.
    Infinite,
    /// Fewer than two usable variances; d0 = 0.
    ///
    /// Nothing is borrowed, so the posterior variance equals the feature's
    /// own. If that variance is zero the standard error is zero and t, the
    /// p-value and B are NaN; the result still carries `ZeroVariance`.
    Insufficient,
}

/// Prior degrees of freedom (d0) and prior variance (s0²).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VariancePrior {
    pub df: f64,
    pub var: f64,
    pub status: PriorStatus,
    /// Number of variances used in the fit.
    pub n_used: usize,
}

impl VariancePrior {
    pub fn is_infinite(&self) -> bool {
        self.df.is_infinite()
    }

    /// Posterior variance (d0 s0² + d s²) / (d0 + d).
    pub fn posterior_variance(&self, variance: f64, df: f64) -> f64 {
        if self.df.is_infinite() || !(df > 0.0) {
            return self.var;
        }
        if self.df == 0.0 {
            return variance;
        }
        (self.df * self.var + df * variance) / (self.df + df)
    }
}

/// Estimate the variance prior.
///
/// Only variances with finite value, positive `df` and non-negative value
/// take part. Values are floored at `floor × median` of the non-zero
/// variances before logs are taken so that exact zeros do not send the log
/// moments to −∞; the floor applies to the moment matching only.
pub fn fit_variance_prior(variances: &[f64], dfs: &[f64], floor: f64) -> Result<VariancePrior> {
    if variances.len() != dfs.len() {
        return Err(DaError::DimensionMismatch {
            expected: variances.len(),
            actual: dfs.len(),
        });
    }

    let (x, d): (Vec<f64>, Vec<f64>) = variances
        .iter()
        .zip(dfs)
        .filter(|&(&v, &df)| v.is_finite() && df > 1e-15 && v > -1e-15)
        .map(|(&v, &df)| (v.max(0.0), df))
        .unzip();

    let n = x.len();
    if n == 0 {
        return Err(DaError::EmptyData(
            "No residual variances with positive degrees of freedom".to_string(),
        ));
    }
    if n == 1 {
        log::warn!("Only one usable residual variance; no variance moderation");
        return Ok(VariancePrior {
            df: 0.0,
            var: x[0],
            status: PriorStatus::Insufficient,
            n_used: 1,
        });
    }

    // Anchor the floor on the non-zero variances so a block of exact fits
    // cannot drag it towards zero.
    let nonzero: Vec<f64> = x.iter().copied().filter(|&v| v > 0.0).collect();
    let m = if nonzero.is_empty() {
        log::warn!("All residual variances are exactly zero");
        1.0
    } else {
        median(&nonzero)
    };
    let lower = floor * m;

    let e: Vec<f64> = x
        .iter()
        .zip(&d)
        .map(|(&v, &df)| v.max(lower).ln() - digamma(df / 2.0) + (df / 2.0).ln())
        .collect();
    let emean = e.iter().sum::<f64>() / n as f64;
    let mean_trigamma = d.iter().map(|&df| trigamma(df / 2.0)).sum::<f64>() / n as f64;
    let evar = sample_variance(&e) - mean_trigamma;

    if evar > 0.0 {
        if let Some(half_d0) = trigamma_inverse(evar) {
            let d0 = 2.0 * half_d0;
            let s0_sq = (emean + digamma(d0 / 2.0) - (d0 / 2.0).ln()).exp();
            log::info!("Variance prior: d0 = {:.3}, s0^2 = {:.4e} ({} features)", d0, s0_sq, n);
            return Ok(VariancePrior {
                df: d0,
                var: s0_sq,
                status: PriorStatus::Estimated,
                n_used: n,
            });
        }
        log::warn!("Inverse trigamma did not converge (excess variance {:.4e})", evar);
    }

    let s0_sq = mean(&x);
    log::warn!(
        "No excess variability in log variances; using d0 = Inf, s0^2 = {:.4e}",
        s0_sq
    );
    Ok(VariancePrior {
        df: f64::INFINITY,
        var: s0_sq,
        status: PriorStatus::Infinite,
        n_used: n,
    })
}

/// Posterior variances for all features.
pub fn squeeze_variances(variances: &[f64], dfs: &[f64], prior: &VariancePrior) -> Vec<f64> {
    variances
        .iter()
        .zip(dfs)
        .map(|(&v, &df)| prior.posterior_variance(v, df))
        .collect()
}

/// Combined degrees of freedom min(d0 + d, Σd).
pub fn total_df(df: f64, prior: &VariancePrior, df_sum: f64) -> f64 {
    (prior.df + df).min(df_sum)
}
