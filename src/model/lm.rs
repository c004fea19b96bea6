//! Per-feature linear models sharing one QR factorization of the design.

use crate::data::{numerical_rank, DesignMatrix, ExpressionMatrix, RANK_TOLERANCE};
use crate::error::{DaError, Result};
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Residual norms at or below this fraction of ‖y‖ are round-off and count
/// as an exact fit.
pub const ZERO_RESIDUAL_TOLERANCE: f64 = 1e-10;

/// QR factorization of a full-rank design, reused by every feature.
///
/// Immutable after construction, so it can be read from many threads.
#[derive(Debug, Clone)]
pub struct DesignFactorization {
    x: DMatrix<f64>,
    /// Thin Q (n × p).
    q: DMatrix<f64>,
    /// R⁻¹ (p × p, upper triangular).
    r_inv: DMatrix<f64>,
    /// (X'X)⁻¹ = R⁻¹R⁻ᵀ.
    cov_unscaled: DMatrix<f64>,
}

impl DesignFactorization {
    /// Factor `x`, failing when there are no residual degrees of freedom or
    /// the columns are linearly dependent.
    pub fn new(x: &DMatrix<f64>) -> Result<Self> {
        let (n, p) = x.shape();
        if p == 0 {
            return Err(DaError::InvalidParameter(
                "Design matrix has no columns".to_string(),
            ));
        }
        if n <= p {
            return Err(DaError::SaturatedModel {
                n_samples: n,
                n_coefficients: p,
            });
        }
        Self::factor(x).ok_or_else(|| DaError::RankDeficient {
            rank: numerical_rank(x),
            n_coefficients: p,
        })
    }

    /// Factor without the residual-df requirement; `None` if rank deficient.
    fn factor(x: &DMatrix<f64>) -> Option<Self> {
        let p = x.ncols();
        if x.nrows() < p {
            return None;
        }
        let qr = x.clone().qr();
        let r = qr.r();
        let max_diag = (0..p).map(|i| r[(i, i)].abs()).fold(0.0, f64::max);
        if max_diag == 0.0 || (0..p).any(|i| r[(i, i)].abs() <= RANK_TOLERANCE * max_diag) {
            return None;
        }
        let r_inv = r.solve_upper_triangular(&DMatrix::identity(p, p))?;
        let cov_unscaled = &r_inv * r_inv.transpose();
        Some(Self {
            x: x.clone(),
            q: qr.q(),
            r_inv,
            cov_unscaled,
        })
    }

    pub fn n_samples(&self) -> usize {
        self.x.nrows()
    }

    pub fn n_coefficients(&self) -> usize {
        self.x.ncols()
    }

    pub fn df_residual(&self) -> usize {
        self.n_samples() - self.n_coefficients()
    }

    /// Unscaled covariance (X'X)⁻¹.
    pub fn cov_unscaled(&self) -> &DMatrix<f64> {
        &self.cov_unscaled
    }

    /// Least-squares coefficients β = R⁻¹Qᵀy and the residual sum of squares.
    ///
    /// A residual sum of squares that is only round-off (for example a
    /// feature constant within every group) is returned as exactly zero.
    pub fn solve(&self, y: &DVector<f64>) -> (DVector<f64>, f64) {
        let beta = &self.r_inv * (self.q.transpose() * y);
        let residuals = y - &self.x * &beta;
        let rss = residuals.norm_squared();
        if rss.sqrt() <= ZERO_RESIDUAL_TOLERANCE * y.norm() {
            (beta, 0.0)
        } else {
            (beta, rss)
        }
    }
}

/// Fit of one feature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureFit {
    /// Feature identifier.
    pub feature_id: String,
    /// Estimated coefficients (NaN when not estimable).
    pub coefficients: Vec<f64>,
    /// Residual standard deviation (NaN when df_residual is 0).
    pub sigma: f64,
    /// Residual degrees of freedom.
    pub df_residual: usize,
    /// Number of samples the fit used.
    pub n_observed: usize,
    /// Mean of the finite log values.
    pub ave_expr: f64,
    /// Whether the coefficients could be estimated at all.
    pub estimable: bool,
    /// Own unscaled covariance when fitted on a subset of samples.
    #[serde(skip)]
    pub cov_unscaled: Option<DMatrix<f64>>,
}

impl FeatureFit {
    pub fn variance(&self) -> f64 {
        self.sigma * self.sigma
    }

    pub fn is_subset_fit(&self) -> bool {
        self.cov_unscaled.is_some()
    }

    pub fn get_coefficient(&self, index: usize) -> Option<f64> {
        self.coefficients.get(index).copied()
    }
}

/// Linear model fits for all features.
#[derive(Debug, Clone)]
pub struct LinearFit {
    pub fits: Vec<FeatureFit>,
    pub coefficient_names: Vec<String>,
    pub n_samples: usize,
    /// Unscaled covariance shared by complete features.
    pub cov_unscaled: DMatrix<f64>,
}

impl LinearFit {
    pub fn get_feature(&self, feature_id: &str) -> Option<&FeatureFit> {
        self.fits.iter().find(|f| f.feature_id == feature_id)
    }

    pub fn coefficient_index(&self, name: &str) -> Option<usize> {
        self.coefficient_names.iter().position(|n| n == name)
    }

    pub fn n_features(&self) -> usize {
        self.fits.len()
    }

    pub fn n_coefficients(&self) -> usize {
        self.coefficient_names.len()
    }

    /// Unscaled covariance that applies to feature `i`.
    pub fn cov_for(&self, i: usize) -> &DMatrix<f64> {
        self.fits[i]
            .cov_unscaled
            .as_ref()
            .unwrap_or(&self.cov_unscaled)
    }

    /// Residual variances in feature order.
    pub fn variances(&self) -> Vec<f64> {
        self.fits.iter().map(|f| f.variance()).collect()
    }

    /// Residual degrees of freedom in feature order.
    pub fn df_residuals(&self) -> Vec<f64> {
        self.fits.iter().map(|f| f.df_residual as f64).collect()
    }

    pub fn n_subset_fits(&self) -> usize {
        self.fits.iter().filter(|f| f.is_subset_fit()).count()
    }

    pub fn n_inestimable(&self) -> usize {
        self.fits.iter().filter(|f| !f.estimable).count()
    }
}

/// Fit one linear model per feature.
///
/// Rows without NaN use the shared factorization of the design. Rows with
/// NaN entries are fitted on their finite samples only, with their own
/// factorization.
pub fn model_lm(expr: &ExpressionMatrix, design: &DesignMatrix) -> Result<LinearFit> {
    let n_samples = expr.n_samples();
    if design.n_samples() != n_samples {
        return Err(DaError::DimensionMismatch {
            expected: n_samples,
            actual: design.n_samples(),
        });
    }
    if expr.n_features() == 0 {
        return Err(DaError::EmptyData("No features to fit".to_string()));
    }

    let x = design.matrix();
    let shared = DesignFactorization::new(x)?;

    let fits: Vec<FeatureFit> = (0..expr.n_features())
        .into_par_iter()
        .map(|i| {
            let y = expr.row(i);
            if y.iter().all(|v| v.is_finite()) {
                fit_complete(&y, &expr.feature_ids[i], &shared)
            } else {
                fit_subset(&y, &expr.feature_ids[i], x)
            }
        })
        .collect();

    let fit = LinearFit {
        fits,
        coefficient_names: design.coefficient_names().to_vec(),
        n_samples,
        cov_unscaled: shared.cov_unscaled().clone(),
    };
    log::debug!(
        "Fitted {} features on {} coefficients ({} subset fits, {} not estimable)",
        fit.n_features(),
        fit.n_coefficients(),
        fit.n_subset_fits(),
        fit.n_inestimable()
    );
    Ok(fit)
}

fn fit_complete(y: &[f64], feature_id: &str, factor: &DesignFactorization) -> FeatureFit {
    let (beta, rss) = factor.solve(&DVector::from_column_slice(y));
    let df_residual = factor.df_residual();
    FeatureFit {
        feature_id: feature_id.to_string(),
        coefficients: beta.iter().copied().collect(),
        sigma: (rss / df_residual as f64).sqrt(),
        df_residual,
        n_observed: y.len(),
        ave_expr: y.iter().sum::<f64>() / y.len() as f64,
        estimable: true,
        cov_unscaled: None,
    }
}

fn fit_subset(y: &[f64], feature_id: &str, x: &DMatrix<f64>) -> FeatureFit {
    let p = x.ncols();
    let keep: Vec<usize> = (0..y.len()).filter(|&j| y[j].is_finite()).collect();
    let n_obs = keep.len();
    let ave_expr = if n_obs > 0 {
        keep.iter().map(|&j| y[j]).sum::<f64>() / n_obs as f64
    } else {
        f64::NAN
    };

    let x_sub = x.select_rows(&keep);
    let Some(factor) = DesignFactorization::factor(&x_sub) else {
        return FeatureFit {
            feature_id: feature_id.to_string(),
            coefficients: vec![f64::NAN; p],
            sigma: f64::NAN,
            df_residual: 0,
            n_observed: n_obs,
            ave_expr,
            estimable: false,
            cov_unscaled: None,
        };
    };

    let y_sub = DVector::from_iterator(n_obs, keep.iter().map(|&j| y[j]));
    let (beta, rss) = factor.solve(&y_sub);
    let df_residual = n_obs - p;
    let sigma = if df_residual > 0 {
        (rss / df_residual as f64).sqrt()
    } else {
        f64::NAN
    };

    FeatureFit {
        feature_id: feature_id.to_string(),
        coefficients: beta.iter().copied().collect(),
        sigma,
        df_residual,
        n_observed: n_obs,
        ave_expr,
        estimable: true,
        cov_unscaled: Some(factor.cov_unscaled),
    }
}
