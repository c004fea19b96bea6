//! Multiple testing correction.

pub mod bh;

pub use bh::{bh_adjust, correct_bh, create_results, BhCorrected};

use serde::{Deserialize, Serialize};

/// P-value adjustment method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustMethod {
    /// Benjamini-Hochberg false discovery rate.
    #[default]
    #[serde(alias = "bh", alias = "fdr")]
    BenjaminiHochberg,
    /// Bonferroni family-wise error rate.
    Bonferroni,
    /// Raw p-values.
    None,
}

impl AdjustMethod {
    pub fn name(&self) -> &'static str {
        match self {
            Self::BenjaminiHochberg => "BH",
            Self::Bonferroni => "bonferroni",
            Self::None => "none",
        }
    }
}

impl std::str::FromStr for AdjustMethod {
    type Err = crate::error::DaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bh" | "fdr" | "benjamini_hochberg" => Ok(Self::BenjaminiHochberg),
            "bonferroni" => Ok(Self::Bonferroni),
            "none" => Ok(Self::None),
            other => Err(crate::error::DaError::InvalidParameter(format!(
                "Unknown adjustment method '{}'",
                other
            ))),
        }
    }
}

/// Adjust p-values; NaN entries are ignored when counting tests.
pub fn adjust_pvalues(p_values: &[f64], method: AdjustMethod) -> Vec<f64> {
    match method {
        AdjustMethod::BenjaminiHochberg => bh_adjust(p_values),
        AdjustMethod::Bonferroni => {
            let n = p_values.iter().filter(|p| !p.is_nan()).count() as f64;
            p_values.iter().map(|&p| (p * n).min(1.0)).collect()
        }
        AdjustMethod::None => p_values.to_vec(),
    }
}
