//! Moderated t-statistics with empirical-Bayes variances.
//!
//! Each contrast estimate is divided by a standard error built from the
//! posterior variance, and tested against a t distribution with the
//! combined prior + residual degrees of freedom. The B-statistic is the
//! log posterior odds that the contrast is non-zero.

use crate::data::ResultFlag;
use crate::error::{DaError, Result};
use crate::model::{
    fit_variance_prior, squeeze_variances, total_df, ContrastResult, LinearFit, VariancePrior,
    DEFAULT_VARIANCE_FLOOR,
};
use crate::stats::{t_two_sided_pvalue, t_upper_quantile};
use serde::{Deserialize, Serialize};

/// Prior degrees of freedom above which the B-statistic uses its normal limit.
const LARGE_PRIOR_DF: f64 = 1e6;

/// Empirical-Bayes settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EBayesConfig {
    /// Assumed proportion of differentially abundant features.
    pub proportion: f64,
    /// Bounds on the prior standard deviation of non-zero contrasts,
    /// relative to the prior residual standard deviation.
    pub stdev_coef_lim: (f64, f64),
    /// Relative floor on residual variances during prior estimation.
    pub variance_floor: f64,
}

impl Default for EBayesConfig {
    fn default() -> Self {
        Self {
            proportion: 0.01,
            stdev_coef_lim: (0.1, 4.0),
            variance_floor: DEFAULT_VARIANCE_FLOOR,
        }
    }
}

impl EBayesConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.proportion > 0.0 && self.proportion < 1.0) {
            return Err(DaError::InvalidParameter(format!(
                "proportion must be in (0, 1), got {}",
                self.proportion
            )));
        }
        let (lo, hi) = self.stdev_coef_lim;
        if !(lo > 0.0 && hi >= lo && hi.is_finite()) {
            return Err(DaError::InvalidParameter(format!(
                "stdev_coef_lim must satisfy 0 < lower <= upper, got ({}, {})",
                lo, hi
            )));
        }
        if !(self.variance_floor >= 0.0 && self.variance_floor < 1.0) {
            return Err(DaError::InvalidParameter(format!(
                "variance_floor must be in [0, 1), got {}",
                self.variance_floor
            )));
        }
        Ok(())
    }
}

/// Moderated statistics of one feature for one contrast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeratedStat {
    pub feature_id: String,
    pub log_fc: f64,
    pub ave_expr: f64,
    /// Moderated standard error.
    pub std_error: f64,
    pub t: f64,
    pub df_total: f64,
    pub p_value: f64,
    /// Log-odds of differential abundance.
    pub b: f64,
    pub flags: Vec<ResultFlag>,
}

/// Moderated tests for one contrast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeratedTest {
    pub contrast: String,
    /// Prior variance of non-zero contrasts (unscaled), used by B.
    pub var_prior_coef: f64,
    pub stats: Vec<ModeratedStat>,
}

impl ModeratedTest {
    pub fn len(&self) -> usize {
        self.stats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }

    pub fn p_values(&self) -> Vec<f64> {
        self.stats.iter().map(|s| s.p_value).collect()
    }

    pub fn t_values(&self) -> Vec<f64> {
        self.stats.iter().map(|s| s.t).collect()
    }

    pub fn get_feature(&self, feature_id: &str) -> Option<&ModeratedStat> {
        self.stats.iter().find(|s| s.feature_id == feature_id)
    }
}

/// Output of [`ebayes`]: the shared prior and one test per contrast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EBayesFit {
    pub prior: VariancePrior,
    /// Posterior variance per feature.
    pub posterior_var: Vec<f64>,
    /// Combined degrees of freedom per feature.
    pub df_total: Vec<f64>,
    pub tests: Vec<ModeratedTest>,
}

impl EBayesFit {
    pub fn test(&self, contrast: &str) -> Option<&ModeratedTest> {
        self.tests.iter().find(|t| t.contrast == contrast)
    }
}

/// Moderate the contrasts of a linear fit.
///
/// The variance prior is estimated once from all features and shared by
/// every contrast.
pub fn ebayes(
    fit: &LinearFit,
    contrasts: &[ContrastResult],
    config: &EBayesConfig,
) -> Result<EBayesFit> {
    config.validate()?;
    if contrasts.is_empty() {
        return Err(DaError::InvalidContrast("No contrasts to moderate".to_string()));
    }
    if let Some(bad) = contrasts.iter().find(|c| c.len() != fit.n_features()) {
        return Err(DaError::DimensionMismatch {
            expected: fit.n_features(),
            actual: bad.len(),
        });
    }

    let variances = fit.variances();
    let dfs = fit.df_residuals();
    let prior = fit_variance_prior(&variances, &dfs, config.variance_floor)?;
    let posterior_var = squeeze_variances(&variances, &dfs, &prior);
    let df_sum: f64 = dfs.iter().sum();
    let df_total: Vec<f64> = dfs.iter().map(|&d| total_df(d, &prior, df_sum)).collect();

    let n_zero = variances.iter().filter(|&&v| v == 0.0).count();
    if n_zero > 0 {
        log::info!("{} features have zero residual variance", n_zero);
    }

    let tests = contrasts
        .iter()
        .map(|c| moderate_contrast(fit, c, &prior, &posterior_var, &df_total, config))
        .collect();

    Ok(EBayesFit {
        prior,
        posterior_var,
        df_total,
        tests,
    })
}

fn moderate_contrast(
    fit: &LinearFit,
    contrast: &ContrastResult,
    prior: &VariancePrior,
    posterior_var: &[f64],
    df_total: &[f64],
    config: &EBayesConfig,
) -> ModeratedTest {
    let mut stats: Vec<ModeratedStat> = contrast
        .fits
        .iter()
        .zip(&fit.fits)
        .enumerate()
        .map(|(i, (c, f))| {
            let mut flags = Vec::new();
            if !f.estimable || f.df_residual == 0 {
                flags.push(ResultFlag::InsufficientObservations);
            }
            if f.sigma == 0.0 {
                flags.push(ResultFlag::ZeroVariance);
            }
            if prior.is_infinite() {
                flags.push(ResultFlag::NoShrinkage);
            }

            let (std_error, t, p_value) = if c.null_contrast {
                flags.push(ResultFlag::NullContrast);
                (0.0, 0.0, 1.0)
            } else {
                let se = posterior_var[i].sqrt() * c.stdev_unscaled;
                let t = if se > 0.0 { c.estimate / se } else { f64::NAN };
                (se, t, t_two_sided_pvalue(t, df_total[i]))
            };

            ModeratedStat {
                feature_id: c.feature_id.clone(),
                log_fc: c.estimate,
                ave_expr: c.ave_expr,
                std_error,
                t,
                df_total: df_total[i],
                p_value,
                b: f64::NAN,
                flags,
            }
        })
        .collect();

    let unscaled: Vec<f64> = contrast.fits.iter().map(|c| c.stdev_unscaled).collect();
    let var_prior_coef = coefficient_prior_variance(&stats, &unscaled, prior, config);

    for (s, &u) in stats.iter_mut().zip(&unscaled) {
        s.b = if s.has_null_contrast() {
            f64::NEG_INFINITY
        } else {
            log_odds(s.t, u, s.df_total, var_prior_coef, prior.df, config.proportion)
        };
    }

    ModeratedTest {
        contrast: contrast.contrast.clone(),
        var_prior_coef,
        stats,
    }
}

impl ModeratedStat {
    fn has_null_contrast(&self) -> bool {
        self.flags.contains(&ResultFlag::NullContrast)
    }
}

/// Prior variance of non-zero contrasts, clamped to the configured limits.
///
/// Falls back to 1/s0² when too few statistics are available.
fn coefficient_prior_variance(
    stats: &[ModeratedStat],
    stdev_unscaled: &[f64],
    prior: &VariancePrior,
    config: &EBayesConfig,
) -> f64 {
    if !(prior.var > 0.0 && prior.var.is_finite()) {
        return f64::NAN;
    }
    let (lo, hi) = config.stdev_coef_lim;
    let lim = (lo * lo / prior.var, hi * hi / prior.var);

    let usable: Vec<(f64, f64, f64)> = stats
        .iter()
        .zip(stdev_unscaled)
        .filter(|&(s, &u)| s.t.is_finite() && u > 0.0 && s.df_total > 0.0 && !s.has_null_contrast())
        .map(|(s, &u)| (s.t, u, s.df_total))
        .collect();

    tmixture(&usable, config.proportion, lim).unwrap_or(1.0 / prior.var)
}

/// Estimate the unscaled prior variance of non-zero contrasts from the
/// largest |t| values, matching them to their expected order statistics.
fn tmixture(stats: &[(f64, f64, f64)], proportion: f64, lim: (f64, f64)) -> Option<f64> {
    let n = stats.len();
    let n_target = (proportion / 2.0 * n as f64).ceil() as usize;
    if n == 0 || n_target < 1 {
        return None;
    }
    let p = (n_target as f64 / n as f64).max(proportion);
    let max_df = stats.iter().map(|s| s.2).fold(0.0, f64::max);

    // Put every statistic on the max_df scale.
    let mut scaled: Vec<(f64, f64)> = stats
        .iter()
        .map(|&(t, u, df)| {
            let t = t.abs();
            if df < max_df {
                let tail = t_two_sided_pvalue(t, df) / 2.0;
                if tail > 0.0 {
                    return (t_upper_quantile(tail, max_df), u);
                }
            }
            (t, u)
        })
        .collect();
    scaled.sort_by(|a, b| b.0.total_cmp(&a.0));

    let v0: Vec<f64> = scaled
        .iter()
        .take(n_target)
        .enumerate()
        .map(|(r, &(t, u))| {
            let p0 = t_two_sided_pvalue(t, max_df);
            let p_target = ((r as f64 + 0.5) / n as f64 - (1.0 - p) * p0) / p;
            let v = if p_target > p0 {
                let q_target = t_upper_quantile(p_target / 2.0, max_df);
                u * u * ((t / q_target).powi(2) - 1.0)
            } else {
                0.0
            };
            if v.is_nan() {
                lim.0
            } else {
                v.clamp(lim.0, lim.1)
            }
        })
        .collect();

    Some(v0.iter().sum::<f64>() / v0.len() as f64)
}

/// B-statistic: log posterior odds of a non-zero contrast.
fn log_odds(t: f64, stdev_unscaled: f64, df_total: f64, var_prior: f64, df_prior: f64, proportion: f64) -> f64 {
    if !t.is_finite() || !(stdev_unscaled > 0.0) || !var_prior.is_finite() {
        return f64::NAN;
    }
    let u2 = stdev_unscaled * stdev_unscaled;
    let r = (u2 + var_prior) / u2;
    let t2 = t * t;
    let kernel = if df_prior > LARGE_PRIOR_DF {
        t2 * (1.0 - 1.0 / r) / 2.0
    } else {
        (1.0 + df_total) / 2.0 * ((t2 + df_total) / (t2 / r + df_total)).ln()
    };
    (proportion / (1.0 - proportion)).ln() - r.ln() / 2.0 + kernel
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Contrast, DesignMatrix, ExpressionMatrix};
    use crate::model::{fit_contrast, model_lm, PriorStatus};
    use approx::assert_relative_eq;
    use nalgebra::DMatrix;

    fn two_group_design(per_group: usize) -> DesignMatrix {
        let n = 2 * per_group;
        let x = DMatrix::from_fn(n, 2, |i, j| if (i < per_group) == (j == 0) { 1.0 } else { 0.0 });
        DesignMatrix::from_matrix(
            x,
            vec!["groupA".into(), "groupB".into()],
            (1..=n).map(|i| format!("S{}", i)).collect(),
        )
        .unwrap()
    }

    fn run(data: DMatrix<f64>, design: &DesignMatrix, contrast: &Contrast) -> (LinearFit, EBayesFit) {
        let ids = (1..=data.nrows()).map(|i| format!("P{}", i)).collect();
        let expr = ExpressionMatrix::from_values(data, ids, design.sample_ids().to_vec(), "log2").unwrap();
        let fit = model_lm(&expr, design).unwrap();
        let cf = fit_contrast(&fit, contrast).unwrap();
        let eb = ebayes(&fit, &[cf], &EBayesConfig::default()).unwrap();
        (fit, eb)
    }

    /// Pseudo-random two-group data: the first `n_de` features shifted by `effect`.
    fn noisy_data(n_features: usize, per_group: usize, n_de: usize, effect: f64) -> DMatrix<f64> {
        let mut state: u64 = 42;
        let mut normal = move || {
            let mut u = || {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                ((state >> 11) as f64 + 0.5) / (1u64 << 53) as f64
            };
            let (u1, u2) = (u(), u());
            (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
        };
        DMatrix::from_fn(n_features, 2 * per_group, |i, j| {
            // Feature-specific noise level.
            let sd = 0.2 + 0.1 * (i % 7) as f64;
            let shift = if i < n_de && j < per_group { effect } else { 0.0 };
            20.0 + shift + sd * normal()
        })
    }

    #[test]
    fn test_zero_variance_feature_borrows_strength() {
        let design = two_group_design(2);
        let data = DMatrix::from_row_slice(2, 4, &[
            24.0, 24.0, 22.0, 22.0, // identical within groups
            25.1, 24.7, 21.2, 21.9, // clear separation with noise
        ]);
        let contrast = Contrast::parse("groupA - groupB", design.coefficient_names()).unwrap();
        let (_, eb) = run(data, &design, &contrast);

        assert_eq!(eb.prior.status, PriorStatus::Estimated);
        let test = &eb.tests[0];
        let p1 = test.get_feature("P1").unwrap();
        assert!(p1.flags.contains(&ResultFlag::ZeroVariance));
        assert!(p1.std_error > 0.0 && p1.std_error.is_finite());
        assert!(p1.t.is_finite());
        assert!(p1.p_value > 0.0 && p1.p_value < 1.0);
        assert!(p1.b.is_finite());
        assert_relative_eq!(p1.log_fc, 2.0, epsilon = 1e-10);

        let p2 = test.get_feature("P2").unwrap();
        assert!(p2.t.is_finite() && p2.t > 0.0);
        assert!(p2.flags.is_empty());
    }

    #[test]
    fn test_exact_group_fits_do_not_collapse_prior() {
        // Two features constant within groups at non-integer levels, next to
        // twenty ordinary ones.
        let design = two_group_design(3);
        let noisy = noisy_data(20, 3, 0, 0.0);
        let data = DMatrix::from_fn(22, 6, |i, j| match i {
            0 => if j < 3 { 19.37 } else { 21.11 },
            1 => if j < 3 { 23.3 } else { 17.7 },
            _ => noisy[(i - 2, j)],
        });
        let contrast = Contrast::parse("groupA - groupB", design.coefficient_names()).unwrap();
        let (fit, eb) = run(data, &design, &contrast);

        assert_eq!(fit.fits[0].sigma, 0.0);
        assert_eq!(fit.fits[1].sigma, 0.0);
        assert!(eb.prior.var > 1e-4, "s0^2 = {}", eb.prior.var);

        let test = &eb.tests[0];
        for id in ["P1", "P2"] {
            let s = test.get_feature(id).unwrap();
            assert!(s.flags.contains(&ResultFlag::ZeroVariance), "{}", id);
            assert!(s.std_error > 0.0 && s.std_error.is_finite());
            assert!(s.t.is_finite() && s.t.abs() < 1e6, "{} t = {}", id, s.t);
            assert!(s.p_value > 0.0, "{}", id);
        }
        assert_relative_eq!(test.get_feature("P2").unwrap().log_fc, 5.6, epsilon = 1e-10);

        // Ordinary features are not flagged.
        assert!(test.stats[2..]
            .iter()
            .all(|s| !s.flags.contains(&ResultFlag::ZeroVariance)));
    }

    #[test]
    fn test_single_zero_variance_without_prior() {
        let design = two_group_design(2);
        let data = DMatrix::from_row_slice(1, 4, &[24.5, 24.5, 22.25, 22.25]);
        let contrast = Contrast::parse("groupA - groupB", design.coefficient_names()).unwrap();
        let (_, eb) = run(data, &design, &contrast);

        assert_eq!(eb.prior.status, PriorStatus::Insufficient);
        let s = &eb.tests[0].stats[0];
        assert!(s.flags.contains(&ResultFlag::ZeroVariance));
        assert!(!s.flags.contains(&ResultFlag::NullContrast));
        assert_eq!(s.std_error, 0.0);
        assert!(s.t.is_nan());
        assert!(s.p_value.is_nan());
        assert!(s.b.is_nan());
    }

    #[test]
    fn test_null_contrast_gives_zero_statistics() {
        let design = two_group_design(4);
        let zero = Contrast::from_vector("zero", vec![0.0, 0.0], 2).unwrap();
        let (_, eb) = run(noisy_data(50, 4, 5, 2.0), &design, &zero);

        for s in &eb.tests[0].stats {
            assert_eq!(s.log_fc, 0.0);
            assert_eq!(s.t, 0.0);
            assert_eq!(s.p_value, 1.0);
            assert_eq!(s.b, f64::NEG_INFINITY);
            assert!(s.flags.contains(&ResultFlag::NullContrast));
        }
    }

    #[test]
    fn test_df_total_bounds() {
        let design = two_group_design(4);
        let contrast = Contrast::parse("groupA - groupB", design.coefficient_names()).unwrap();
        let (fit, eb) = run(noisy_data(200, 4, 20, 1.5), &design, &contrast);

        let max_df = fit.df_residuals().into_iter().fold(0.0, f64::max);
        for (f, &d) in fit.fits.iter().zip(&eb.df_total) {
            assert!(d >= f.df_residual as f64);
            assert!(d <= eb.prior.df + max_df + 1e-9);
        }
    }

    #[test]
    fn test_moderated_t_matches_definition() {
        let design = two_group_design(4);
        let contrast = Contrast::parse("groupA - groupB", design.coefficient_names()).unwrap();
        let (fit, eb) = run(noisy_data(100, 4, 10, 2.0), &design, &contrast);

        let test = &eb.tests[0];
        let u = (0.25f64 + 0.25).sqrt();
        for (i, s) in test.stats.iter().enumerate() {
            let expected_se = eb.posterior_var[i].sqrt() * u;
            assert_relative_eq!(s.std_error, expected_se, epsilon = 1e-10);
            assert_relative_eq!(s.t, s.log_fc / expected_se, epsilon = 1e-8);
            let posterior = eb.prior.posterior_variance(fit.fits[i].variance(), 6.0);
            assert_relative_eq!(eb.posterior_var[i], posterior, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_b_statistic_monotone_in_t() {
        let design = two_group_design(4);
        let contrast = Contrast::parse("groupA - groupB", design.coefficient_names()).unwrap();
        let (_, eb) = run(noisy_data(300, 4, 30, 2.0), &design, &contrast);

        // All features share stdev_unscaled and df_total, so B orders like |t|.
        let mut pairs: Vec<(f64, f64)> = eb.tests[0].stats.iter().map(|s| (s.t.abs(), s.b)).collect();
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));
        for w in pairs.windows(2) {
            assert!(w[1].1 >= w[0].1 - 1e-9);
        }
        assert!(eb.tests[0].var_prior_coef > 0.0);
    }

    #[test]
    fn test_de_features_rank_first() {
        let design = two_group_design(5);
        let contrast = Contrast::parse("groupA - groupB", design.coefficient_names()).unwrap();
        let (_, eb) = run(noisy_data(200, 5, 10, 3.0), &design, &contrast);

        let mut ranked: Vec<&ModeratedStat> = eb.tests[0].stats.iter().collect();
        ranked.sort_by(|a, b| a.p_value.total_cmp(&b.p_value));
        let top: Vec<usize> = ranked[..10]
            .iter()
            .map(|s| s.feature_id[1..].parse::<usize>().unwrap())
            .collect();
        assert!(top.iter().filter(|&&i| i <= 10).count() >= 8);
    }

    #[test]
    fn test_config_validation() {
        assert!(EBayesConfig::default().validate().is_ok());
        let bad = EBayesConfig {
            proportion: 1.5,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        let bad = EBayesConfig {
            stdev_coef_lim: (4.0, 0.1),
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_log_odds_limits() {
        // Larger |t| means larger B.
        let b1 = log_odds(1.0, 0.5, 10.0, 4.0, 5.0, 0.01);
        let b2 = log_odds(5.0, 0.5, 10.0, 4.0, 5.0, 0.01);
        assert!(b2 > b1);
        // t = 0 gives the prior log-odds minus the variance penalty.
        let r: f64 = (0.25 + 4.0) / 0.25;
        assert_relative_eq!(
            log_odds(0.0, 0.5, 10.0, 4.0, 5.0, 0.01),
            (0.01f64 / 0.99).ln() - r.ln() / 2.0,
            epsilon = 1e-12
        );
    }
}
