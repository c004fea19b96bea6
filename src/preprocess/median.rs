//! Median centring of log abundances.
//!
//! Each sample is shifted so that its median over observed features equals
//! the mean of all sample medians. Differences in loading amount move whole
//! samples up or down on the log scale; this removes that shift while
//! keeping values on their original scale.

use crate::data::ExpressionMatrix;
use crate::error::{DaError, Result};
use crate::stats::median;
use rayon::prelude::*;

/// Median of observed values per sample; NaN for samples with none.
pub fn sample_medians(matrix: &ExpressionMatrix) -> Vec<f64> {
    (0..matrix.n_samples())
        .into_par_iter()
        .map(|j| median(&matrix.observed_in_sample(j)))
        .collect()
}

/// Median-normalize a log-scale matrix.
///
/// Only observed entries are shifted; missing entries keep their fill value.
pub fn normalize_median(matrix: &ExpressionMatrix) -> Result<ExpressionMatrix> {
    let medians = sample_medians(matrix);
    let finite: Vec<f64> = medians.iter().copied().filter(|m| m.is_finite()).collect();
    if finite.is_empty() {
        return Err(DaError::EmptyData(
            "No observed values to normalize".to_string(),
        ));
    }
    let target = finite.iter().sum::<f64>() / finite.len() as f64;

    let empty = medians.len() - finite.len();
    if empty > 0 {
        log::warn!("{} samples have no observed values and are left unchanged", empty);
    }
    log::debug!("Median normalization target {:.4}", target);

    let mut out = matrix.clone();
    for (j, &m) in medians.iter().enumerate() {
        if !m.is_finite() {
            continue;
        }
        let shift = target - m;
        for i in 0..out.n_features() {
            if out.observed[(i, j)] {
                out.data[(i, j)] += shift;
            }
        }
    }
    out.transformation = format!("{}+median", matrix.transformation);
    Ok(out)
}
