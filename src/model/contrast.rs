//! Projection of fitted coefficients onto contrasts.

use crate::data::Contrast;
use crate::error::Result;
use crate::model::LinearFit;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Contrast estimate for one feature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContrastFit {
    pub feature_id: String,
    /// c'β
    pub estimate: f64,
    /// sqrt(c'(X'X)⁻¹c)
    pub stdev_unscaled: f64,
    /// Residual standard deviation of the feature.
    pub sigma: f64,
    pub df_residual: usize,
    pub ave_expr: f64,
    pub estimable: bool,
    /// Zero weights or zero unscaled standard error.
    pub null_contrast: bool,
}

impl ContrastFit {
    /// Ordinary (unmoderated) standard error.
    pub fn std_error(&self) -> f64 {
        self.sigma * self.stdev_unscaled
    }
}

/// Contrast estimates for all features.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContrastResult {
    pub contrast: String,
    pub weights: Vec<f64>,
    pub fits: Vec<ContrastFit>,
}

impl ContrastResult {
    pub fn len(&self) -> usize {
        self.fits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fits.is_empty()
    }

    pub fn estimates(&self) -> Vec<f64> {
        self.fits.iter().map(|f| f.estimate).collect()
    }

    pub fn get_feature(&self, feature_id: &str) -> Option<&ContrastFit> {
        self.fits.iter().find(|f| f.feature_id == feature_id)
    }
}

/// Evaluate one contrast for every feature.
pub fn fit_contrast(fit: &LinearFit, contrast: &Contrast) -> Result<ContrastResult> {
    contrast.validate(fit.n_coefficients())?;
    let c = &contrast.weights;
    let null_weights = contrast.is_null();

    let fits: Vec<ContrastFit> = (0..fit.n_features())
        .into_par_iter()
        .map(|i| {
            let f = &fit.fits[i];
            let cov = fit.cov_for(i);

            let estimate: f64 = if null_weights {
                0.0
            } else {
                c.iter().zip(&f.coefficients).map(|(w, b)| w * b).sum()
            };

            let mut quad = 0.0;
            for (j, wj) in c.iter().enumerate() {
                for (k, wk) in c.iter().enumerate() {
                    quad += wj * cov[(j, k)] * wk;
                }
            }
            let stdev_unscaled = quad.max(0.0).sqrt();

            ContrastFit {
                feature_id: f.feature_id.clone(),
                estimate,
                stdev_unscaled,
                sigma: f.sigma,
                df_residual: f.df_residual,
                ave_expr: f.ave_expr,
                estimable: f.estimable,
                null_contrast: null_weights || stdev_unscaled == 0.0,
            }
        })
        .collect();

    Ok(ContrastResult {
        contrast: contrast.name.clone(),
        weights: c.clone(),
        fits,
    })
}

/// Evaluate several contrasts against the same fit.
pub fn fit_contrasts(fit: &LinearFit, contrasts: &[Contrast]) -> Result<Vec<ContrastResult>> {
    contrasts.iter().map(|c| fit_contrast(fit, c)).collect()
}
