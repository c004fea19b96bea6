//! Log transformation of raw intensities.

use crate::data::{ExpressionMatrix, IntensityMatrix};
use crate::error::{DaError, Result};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

/// What to store for entries that were not observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingPolicy {
    /// Store 0.0 on the log scale and fit it like any other value.
    ///
    /// This treats "not detected" as a real measurement, which is a
    /// modelling assumption rather than a neutral choice.
    #[default]
    ZeroFill,
    /// Store NaN; affected features are fitted on their observed samples.
    Propagate,
}

impl MissingPolicy {
    fn fill(&self) -> f64 {
        match self {
            Self::ZeroFill => 0.0,
            Self::Propagate => f64::NAN,
        }
    }
}

/// Log transformation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogTransformConfig {
    pub base: f64,
    /// Added to observed values before taking logs.
    pub offset: f64,
    pub missing: MissingPolicy,
}

impl Default for LogTransformConfig {
    fn default() -> Self {
        Self {
            base: 2.0,
            offset: 0.0,
            missing: MissingPolicy::ZeroFill,
        }
    }
}

impl LogTransformConfig {
    fn label(&self) -> String {
        if self.base == 2.0 {
            "log2".to_string()
        } else if self.base == 10.0 {
            "log10".to_string()
        } else if (self.base - std::f64::consts::E).abs() < 1e-12 {
            "ln".to_string()
        } else {
            format!("log{}", self.base)
        }
    }
}

/// Apply `log_base(x + offset)` to observed intensities.
pub fn log_transform(matrix: &IntensityMatrix, config: &LogTransformConfig) -> Result<ExpressionMatrix> {
    if !(config.base > 0.0 && config.base != 1.0 && config.base.is_finite()) {
        return Err(DaError::InvalidParameter(format!(
            "Log base must be positive and not 1, got {}",
            config.base
        )));
    }
    if !(config.offset >= 0.0 && config.offset.is_finite()) {
        return Err(DaError::InvalidParameter(format!(
            "Log offset must be non-negative, got {}",
            config.offset
        )));
    }

    let (n_features, n_samples) = (matrix.n_features(), matrix.n_samples());
    let ln_base = config.base.ln();
    let fill = config.missing.fill();

    let mut data = DMatrix::zeros(n_features, n_samples);
    let mut observed = DMatrix::from_element(n_features, n_samples, false);
    for i in 0..n_features {
        for j in 0..n_samples {
            if !matrix.is_observed(i, j) {
                data[(i, j)] = fill;
                continue;
            }
            let v = matrix.get(i, j);
            if v < 0.0 || !v.is_finite() {
                return Err(DaError::InvalidValue {
                    value: v.to_string(),
                    row: i,
                    col: j,
                });
            }
            data[(i, j)] = (v + config.offset).ln() / ln_base;
            observed[(i, j)] = true;
        }
    }

    let n_missing = observed.iter().filter(|&&o| !o).count();
    log::debug!(
        "{} transform: {} of {} entries missing ({:?})",
        config.label(),
        n_missing,
        observed.len(),
        config.missing
    );

    ExpressionMatrix::with_mask(
        data,
        observed,
        matrix.feature_ids().to_vec(),
        matrix.sample_ids().to_vec(),
        &config.label(),
    )
}

/// Use values that are already on a log scale as they are.
///
/// Sentinel entries are treated as missing under `missing`.
pub fn as_log_scale(matrix: &IntensityMatrix, missing: MissingPolicy) -> Result<ExpressionMatrix> {
    let observed = DMatrix::from_fn(matrix.n_features(), matrix.n_samples(), |i, j| {
        matrix.is_observed(i, j)
    });
    let fill = missing.fill();
    let data = DMatrix::from_fn(matrix.n_features(), matrix.n_samples(), |i, j| {
        if observed[(i, j)] {
            matrix.get(i, j)
        } else {
            fill
        }
    });
    ExpressionMatrix::with_mask(
        data,
        observed,
        matrix.feature_ids().to_vec(),
        matrix.sample_ids().to_vec(),
        "identity",
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn intensities() -> IntensityMatrix {
        IntensityMatrix::from_rows(
            &[vec![1024.0, 0.0, 4096.0], vec![1.0, 2.0, 8.0]],
            vec!["P1".into(), "P2".into()],
            vec!["S1".into(), "S2".into(), "S3".into()],
        )
        .unwrap()
    }

    #[test]
    fn test_log2_zero_fill() {
        let expr = log_transform(&intensities(), &LogTransformConfig::default()).unwrap();
        assert_eq!(expr.transformation, "log2");
        assert_relative_eq!(expr.get(0, 0), 10.0, epsilon = 1e-12);
        assert_relative_eq!(expr.get(0, 2), 12.0, epsilon = 1e-12);
        assert_eq!(expr.get(0, 1), 0.0);
        assert!(!expr.is_observed(0, 1));
        assert_relative_eq!(expr.get(1, 2), 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_propagate_missing() {
        let config = LogTransformConfig {
            missing: MissingPolicy::Propagate,
            ..Default::default()
        };
        let expr = log_transform(&intensities(), &config).unwrap();
        assert!(expr.get(0, 1).is_nan());
        assert!(expr.has_nan(0));
        assert!(!expr.has_nan(1));
    }

    #[test]
    fn test_offset_and_base() {
        let config = LogTransformConfig {
            base: 10.0,
            offset: 1.0,
            ..Default::default()
        };
        let m = IntensityMatrix::from_rows(&[vec![9.0, 99.0]], vec!["P1".into()], vec!["S1".into(), "S2".into()]).unwrap();
        let expr = log_transform(&m, &config).unwrap();
        assert_relative_eq!(expr.get(0, 0), 1.0, epsilon = 1e-12);
        assert_relative_eq!(expr.get(0, 1), 2.0, epsilon = 1e-12);
        assert_eq!(expr.transformation, "log10");
    }

    #[test]
    fn test_negative_intensity_rejected() {
        let m = IntensityMatrix::from_rows(&[vec![-5.0, 3.0]], vec!["P1".into()], vec!["S1".into(), "S2".into()]).unwrap();
        let result = log_transform(&m, &LogTransformConfig::default());
        assert!(matches!(result, Err(DaError::InvalidValue { row: 0, col: 0, .. })));
    }

    #[test]
    fn test_invalid_base() {
        let config = LogTransformConfig {
            base: 1.0,
            ..Default::default()
        };
        assert!(log_transform(&intensities(), &config).is_err());
    }

    #[test]
    fn test_as_log_scale_keeps_values() {
        let expr = as_log_scale(&intensities(), MissingPolicy::Propagate).unwrap();
        assert_eq!(expr.get(1, 2), 8.0);
        assert!(expr.get(0, 1).is_nan());
        assert_eq!(expr.transformation, "identity");
    }
}
