//! Log-scale expression matrix with an explicit observation mask.

use crate::error::{DaError, Result};
use nalgebra::DMatrix;

/// Log-scale abundances (features × samples) ready for modelling.
///
/// `observed` records which entries were actually measured. Missing entries
/// hold either `0.0` or `NaN` in `data`, depending on the policy used when
/// the matrix was produced.
#[derive(Debug, Clone)]
pub struct ExpressionMatrix {
    pub data: DMatrix<f64>,
    pub observed: DMatrix<bool>,
    pub feature_ids: Vec<String>,
    pub sample_ids: Vec<String>,
    /// Description of the transformation applied (e.g. "log2").
    pub transformation: String,
}

impl ExpressionMatrix {
    /// Create from values where every finite entry counts as observed.
    pub fn from_values(
        data: DMatrix<f64>,
        feature_ids: Vec<String>,
        sample_ids: Vec<String>,
        transformation: &str,
    ) -> Result<Self> {
        let observed = data.map(|v| v.is_finite());
        Self::with_mask(data, observed, feature_ids, sample_ids, transformation)
    }

    /// Create from values and an explicit observation mask.
    pub fn with_mask(
        data: DMatrix<f64>,
        observed: DMatrix<bool>,
        feature_ids: Vec<String>,
        sample_ids: Vec<String>,
        transformation: &str,
    ) -> Result<Self> {
        if data.shape() != observed.shape() {
            return Err(DaError::DimensionMismatch {
                expected: data.len(),
                actual: observed.len(),
            });
        }
        if data.nrows() != feature_ids.len() {
            return Err(DaError::DimensionMismatch {
                expected: data.nrows(),
                actual: feature_ids.len(),
            });
        }
        if data.ncols() != sample_ids.len() {
            return Err(DaError::DimensionMismatch {
                expected: data.ncols(),
                actual: sample_ids.len(),
            });
        }
        Ok(Self {
            data,
            observed,
            feature_ids,
            sample_ids,
            transformation: transformation.to_string(),
        })
    }

    pub fn get(&self, feature: usize, sample: usize) -> f64 {
        self.data[(feature, sample)]
    }

    pub fn is_observed(&self, feature: usize, sample: usize) -> bool {
        self.observed[(feature, sample)]
    }

    pub fn n_features(&self) -> usize {
        self.data.nrows()
    }

    pub fn n_samples(&self) -> usize {
        self.data.ncols()
    }

    /// Get a row (feature) as a vector.
    pub fn row(&self, feature: usize) -> Vec<f64> {
        self.data.row(feature).iter().copied().collect()
    }

    /// Observed values of one sample.
    pub fn observed_in_sample(&self, sample: usize) -> Vec<f64> {
        (0..self.n_features())
            .filter(|&i| self.observed[(i, sample)])
            .map(|i| self.data[(i, sample)])
            .collect()
    }

    /// Number of observed entries for a feature.
    pub fn n_observed(&self, feature: usize) -> usize {
        self.observed.row(feature).iter().filter(|&&o| o).count()
    }

    /// Whether the feature row contains NaN entries.
    pub fn has_nan(&self, feature: usize) -> bool {
        self.data.row(feature).iter().any(|v| v.is_nan())
    }

    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.data
    }

    /// Keep only the listed features, in the given order.
    pub fn subset_features(&self, indices: &[usize]) -> Result<Self> {
        if let Some(&bad) = indices.iter().find(|&&i| i >= self.n_features()) {
            return Err(DaError::InvalidParameter(format!(
                "Feature index {} out of bounds",
                bad
            )));
        }
        let observed = DMatrix::from_fn(indices.len(), self.n_samples(), |r, c| {
            self.observed[(indices[r], c)]
        });
        Ok(Self {
            data: self.data.select_rows(indices),
            observed,
            feature_ids: indices.iter().map(|&i| self.feature_ids[i].clone()).collect(),
            sample_ids: self.sample_ids.clone(),
            transformation: self.transformation.clone(),
        })
    }
}
