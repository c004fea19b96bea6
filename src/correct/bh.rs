//! Benjamini-Hochberg false discovery rate correction.

use crate::correct::{adjust_pvalues, AdjustMethod};
use crate::data::{ModeratedResult, ResultTable};
use crate::test::EBayesFit;
use serde::{Deserialize, Serialize};

/// Result of BH correction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BhCorrected {
    /// Feature IDs in original order.
    pub feature_ids: Vec<String>,
    /// Original p-values.
    pub p_values: Vec<f64>,
    /// Adjusted p-values, NaN where the input was NaN.
    pub adj_p_values: Vec<f64>,
    /// Number of non-NaN p-values.
    pub n_tests: usize,
}

impl BhCorrected {
    pub fn get_adjusted(&self, feature_id: &str) -> Option<f64> {
        let idx = self.feature_ids.iter().position(|f| f == feature_id)?;
        self.adj_p_values.get(idx).copied()
    }

    /// Count significant results at a threshold.
    pub fn n_significant(&self, alpha: f64) -> usize {
        self.adj_p_values.iter().filter(|&&q| q < alpha).count()
    }

    pub fn significant_indices(&self, alpha: f64) -> Vec<usize> {
        self.adj_p_values
            .iter()
            .enumerate()
            .filter(|&(_, &q)| q < alpha)
            .map(|(i, _)| i)
            .collect()
    }
}

/// Benjamini-Hochberg step-up adjustment.
///
/// adj[i] = min over j ≥ i of p[j] × N / j on the ascending ranks, clipped
/// to 1 and returned in input order. NaN p-values are left out of N and
/// stay NaN. Ties keep their input order.
pub fn bh_adjust(p_values: &[f64]) -> Vec<f64> {
    let mut adjusted = vec![f64::NAN; p_values.len()];

    let mut indices: Vec<usize> = (0..p_values.len())
        .filter(|&i| !p_values[i].is_nan())
        .collect();
    let n = indices.len();
    if n == 0 {
        return adjusted;
    }
    // Stable sort: ties keep ascending original index.
    indices.sort_by(|&a, &b| p_values[a].total_cmp(&p_values[b]));

    let n_f64 = n as f64;
    let mut running = 1.0f64;
    for rank in (1..=n).rev() {
        let idx = indices[rank - 1];
        running = running.min(p_values[idx] * n_f64 / rank as f64);
        adjusted[idx] = running.min(1.0);
    }
    adjusted
}

/// Apply Benjamini-Hochberg FDR correction.
pub fn correct_bh(p_values: &[f64], feature_ids: &[String]) -> BhCorrected {
    BhCorrected {
        feature_ids: feature_ids.to_vec(),
        p_values: p_values.to_vec(),
        adj_p_values: bh_adjust(p_values),
        n_tests: p_values.iter().filter(|p| !p.is_nan()).count(),
    }
}

/// Build the result table from moderated tests.
///
/// Adjustment is done separately within each contrast.
pub fn create_results(fit: &EBayesFit, method: AdjustMethod, label: &str) -> ResultTable {
    let results: Vec<ModeratedResult> = fit
        .tests
        .iter()
        .flat_map(|test| {
            let adjusted = adjust_pvalues(&test.p_values(), method);
            test.stats
                .iter()
                .zip(adjusted)
                .map(|(s, adj_p_value)| ModeratedResult {
                    feature_id: s.feature_id.clone(),
                    contrast: test.contrast.clone(),
                    log_fc: s.log_fc,
                    ave_expr: s.ave_expr,
                    std_error: s.std_error,
                    t: s.t,
                    df_total: s.df_total,
                    p_value: s.p_value,
                    adj_p_value,
                    b: s.b,
                    flags: s.flags.clone(),
                })
                .collect::<Vec<_>>()
        })
        .collect();

    ResultTable::new(label, fit.prior.df, fit.prior.var, results)
}
