//! Per-sample distribution summaries of log abundances.
//!
//! A quick check on normalization: after median centring every sample
//! should have roughly the same median, and a sample that sits far away
//! from the others usually points at a loading or acquisition problem.

use crate::data::ExpressionMatrix;
use crate::stats::{median, quantile_sorted};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Number of MADs from the median of medians that marks an outlier.
pub const OUTLIER_MADS: f64 = 2.0;

/// Distribution of observed values in one sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleSummary {
    pub sample_id: String,
    pub n_observed: usize,
    pub median: f64,
    pub q1: f64,
    pub q3: f64,
    pub iqr: f64,
    pub outlier: bool,
}

/// Summaries for all samples.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleProfile {
    pub samples: Vec<SampleSummary>,
    pub median_of_medians: f64,
    /// Median absolute deviation of sample medians (unscaled).
    pub mad_of_medians: f64,
}

impl SampleProfile {
    pub fn outliers(&self) -> Vec<&str> {
        self.samples
            .iter()
            .filter(|s| s.outlier)
            .map(|s| s.sample_id.as_str())
            .collect()
    }

    /// Largest difference between two sample medians.
    pub fn median_range(&self) -> f64 {
        let finite = self.samples.iter().map(|s| s.median).filter(|m| m.is_finite());
        let (lo, hi) = finite.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), m| {
            (lo.min(m), hi.max(m))
        });
        if lo.is_finite() { hi - lo } else { 0.0 }
    }
}

impl std::fmt::Display for SampleProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Sample Profile")?;
        writeln!(f, "  Median of medians: {:.3}", self.median_of_medians)?;
        writeln!(f, "  MAD of medians:    {:.3}", self.mad_of_medians)?;
        writeln!(f, "  {:<20} {:>6} {:>9} {:>9} {:>9} {:>7}", "sample", "n", "median", "q1", "q3", "iqr")?;
        for s in &self.samples {
            writeln!(
                f,
                "  {:<20} {:>6} {:>9.3} {:>9.3} {:>9.3} {:>7.3}{}",
                s.sample_id,
                s.n_observed,
                s.median,
                s.q1,
                s.q3,
                s.iqr,
                if s.outlier { "  outlier" } else { "" }
            )?;
        }
        Ok(())
    }
}

/// Profile observed values per sample.
pub fn profile_samples(matrix: &ExpressionMatrix) -> SampleProfile {
    let mut samples: Vec<SampleSummary> = (0..matrix.n_samples())
        .into_par_iter()
        .map(|j| {
            let mut values = matrix.observed_in_sample(j);
            values.retain(|v| !v.is_nan());
            values.sort_by(|a, b| a.total_cmp(b));
            let q1 = quantile_sorted(&values, 0.25);
            let q3 = quantile_sorted(&values, 0.75);
            SampleSummary {
                sample_id: matrix.sample_ids[j].clone(),
                n_observed: values.len(),
                median: quantile_sorted(&values, 0.5),
                q1,
                q3,
                iqr: q3 - q1,
                outlier: false,
            }
        })
        .collect();

    let medians: Vec<f64> = samples.iter().map(|s| s.median).collect();
    let median_of_medians = median(&medians);
    let deviations: Vec<f64> = medians.iter().map(|m| (m - median_of_medians).abs()).collect();
    let mad_of_medians = median(&deviations);

    for s in samples.iter_mut() {
        let dev = (s.median - median_of_medians).abs();
        s.outlier = dev.is_finite() && mad_of_medians > 0.0 && dev > OUTLIER_MADS * mad_of_medians;
    }
    let n_outliers = samples.iter().filter(|s| s.outlier).count();
    if n_outliers > 0 {
        log::warn!("{} samples have medians more than {} MADs from the rest", n_outliers, OUTLIER_MADS);
    }

    SampleProfile {
        samples,
        median_of_medians,
        mad_of_medians,
    }
}
