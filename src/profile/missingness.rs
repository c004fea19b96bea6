//! Missing-value profiling for intensity matrices.

use crate::data::IntensityMatrix;
use crate::stats::median;
use serde::{Deserialize, Serialize};

/// How much of an intensity matrix is missing, and where.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissingnessProfile {
    /// Total number of entries (features × samples).
    pub total_entries: usize,
    pub observed_entries: usize,
    pub missing_entries: usize,
    /// Overall proportion missing.
    pub missing_fraction: f64,
    /// Missing fraction per feature (row).
    pub feature_missing: Vec<f64>,
    /// Missing fraction per sample (column).
    pub sample_missing: Vec<f64>,
    pub mean_feature_missing: f64,
    pub median_feature_missing: f64,
    pub mean_sample_missing: f64,
    pub median_sample_missing: f64,
    /// Features observed in every sample.
    pub n_complete_features: usize,
}

impl MissingnessProfile {
    /// More than 20% of entries missing.
    pub fn is_heavily_missing(&self) -> bool {
        self.missing_fraction > 0.2
    }

    /// Features observed in at least `min_fraction` of samples.
    pub fn n_features_observed_at(&self, min_fraction: f64) -> usize {
        self.feature_missing
            .iter()
            .filter(|&&m| 1.0 - m >= min_fraction - 1e-12)
            .count()
    }
}

impl std::fmt::Display for MissingnessProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Missingness Profile")?;
        writeln!(f, "  Total entries:     {}", self.total_entries)?;
        writeln!(f, "  Observed entries:  {}", self.observed_entries)?;
        writeln!(f, "  Missing entries:   {}", self.missing_entries)?;
        writeln!(f, "  Overall missing:   {:.2}%", self.missing_fraction * 100.0)?;
        writeln!(f, "  Complete features: {}", self.n_complete_features)?;
        writeln!(f, "  Mean feature missing:   {:.2}%", self.mean_feature_missing * 100.0)?;
        writeln!(f, "  Median feature missing: {:.2}%", self.median_feature_missing * 100.0)?;
        writeln!(f, "  Mean sample missing:    {:.2}%", self.mean_sample_missing * 100.0)?;
        writeln!(f, "  Median sample missing:  {:.2}%", self.median_sample_missing * 100.0)?;
        Ok(())
    }
}

fn mean_or_zero(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Profile missing values of an intensity matrix.
pub fn profile_missingness(matrix: &IntensityMatrix) -> MissingnessProfile {
    let n_features = matrix.n_features();
    let n_samples = matrix.n_samples();
    let total_entries = n_features * n_samples;

    let mut sample_observed = vec![0usize; n_samples];
    let mut feature_missing = Vec::with_capacity(n_features);
    let mut n_complete_features = 0;
    for i in 0..n_features {
        let mut n_obs = 0;
        for (j, count) in sample_observed.iter_mut().enumerate() {
            if matrix.is_observed(i, j) {
                n_obs += 1;
                *count += 1;
            }
        }
        if n_obs == n_samples {
            n_complete_features += 1;
        }
        feature_missing.push((n_samples - n_obs) as f64 / n_samples.max(1) as f64);
    }
    let sample_missing: Vec<f64> = sample_observed
        .iter()
        .map(|&o| (n_features - o) as f64 / n_features.max(1) as f64)
        .collect();

    let observed_entries: usize = sample_observed.iter().sum();
    let missing_entries = total_entries - observed_entries;

    MissingnessProfile {
        total_entries,
        observed_entries,
        missing_entries,
        missing_fraction: missing_entries as f64 / total_entries.max(1) as f64,
        mean_feature_missing: mean_or_zero(&feature_missing),
        median_feature_missing: if feature_missing.is_empty() { 0.0 } else { median(&feature_missing) },
        mean_sample_missing: mean_or_zero(&sample_missing),
        median_sample_missing: if sample_missing.is_empty() { 0.0 } else { median(&sample_missing) },
        feature_missing,
        sample_missing,
        n_complete_features,
    }
}
