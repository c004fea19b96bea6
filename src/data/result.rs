//! Result types for moderated differential abundance tests.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Diagnostic flags attached to individual results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResultFlag {
    /// Residual variance was exactly zero.
    ZeroVariance,
    /// Too few observed samples to fit the model.
    InsufficientObservations,
    /// The variance prior fell back to infinite degrees of freedom.
    NoShrinkage,
    /// Contrast has zero weight or zero unscaled standard error.
    NullContrast,
}

impl ResultFlag {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ZeroVariance => "zero_variance",
            Self::InsufficientObservations => "insufficient_observations",
            Self::NoShrinkage => "no_shrinkage",
            Self::NullContrast => "null_contrast",
        }
    }
}

/// Moderated test result for one feature under one contrast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeratedResult {
    /// Feature identifier.
    pub feature_id: String,
    /// Contrast name.
    pub contrast: String,
    /// Estimated contrast (log-fold change).
    pub log_fc: f64,
    /// Mean log abundance over observed samples.
    pub ave_expr: f64,
    /// Moderated standard error.
    pub std_error: f64,
    /// Moderated t-statistic.
    pub t: f64,
    /// Combined degrees of freedom (prior + residual).
    pub df_total: f64,
    /// Raw two-sided p-value.
    pub p_value: f64,
    /// Adjusted p-value.
    pub adj_p_value: f64,
    /// Log-odds of differential abundance.
    pub b: f64,
    pub flags: Vec<ResultFlag>,
}

impl ModeratedResult {
    pub fn has_flag(&self, flag: ResultFlag) -> bool {
        self.flags.contains(&flag)
    }

    /// Check if significant at a given adjusted p-value threshold.
    pub fn is_significant_at(&self, alpha: f64) -> bool {
        self.adj_p_value < alpha
    }

    fn flags_label(&self) -> String {
        if self.flags.is_empty() {
            ".".to_string()
        } else {
            self.flags.iter().map(|f| f.name()).collect::<Vec<_>>().join(",")
        }
    }
}

/// All results of one analysis, possibly spanning several contrasts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultTable {
    /// Method name used to generate these results.
    pub method: String,
    /// Prior degrees of freedom (may be infinite).
    pub prior_df: f64,
    /// Prior variance.
    pub prior_var: f64,
    pub results: Vec<ModeratedResult>,
}

impl ResultTable {
    pub fn new(method: &str, prior_df: f64, prior_var: f64, results: Vec<ModeratedResult>) -> Self {
        Self {
            method: method.to_string(),
            prior_df,
            prior_var,
            results,
        }
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModeratedResult> {
        self.results.iter()
    }

    /// Distinct contrast names in first-seen order.
    pub fn contrasts(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for r in &self.results {
            if !names.contains(&r.contrast.as_str()) {
                names.push(&r.contrast);
            }
        }
        names
    }

    /// Results for one contrast, in feature order.
    pub fn for_contrast(&self, contrast: &str) -> Vec<&ModeratedResult> {
        self.results.iter().filter(|r| r.contrast == contrast).collect()
    }

    pub fn get_feature(&self, feature_id: &str, contrast: &str) -> Option<&ModeratedResult> {
        self.results
            .iter()
            .find(|r| r.feature_id == feature_id && r.contrast == contrast)
    }

    /// Results sorted by p-value (ascending, NaN last).
    pub fn sorted_by_pvalue(&self) -> Vec<&ModeratedResult> {
        let mut sorted: Vec<_> = self.results.iter().collect();
        sorted.sort_by(|a, b| ascending_nan_last(a.p_value, b.p_value));
        sorted
    }

    /// Results sorted by B-statistic (descending, NaN last).
    pub fn sorted_by_b(&self) -> Vec<&ModeratedResult> {
        let mut sorted: Vec<_> = self.results.iter().collect();
        sorted.sort_by(|a, b| ascending_nan_last(-a.b, -b.b));
        sorted
    }

    /// The `n` smallest p-values.
    pub fn top(&self, n: usize) -> Vec<&ModeratedResult> {
        self.sorted_by_pvalue().into_iter().take(n).collect()
    }

    /// Results with adjusted p-value below `alpha`.
    pub fn significant(&self, alpha: f64) -> Vec<&ModeratedResult> {
        self.results.iter().filter(|r| r.is_significant_at(alpha)).collect()
    }

    /// Count results carrying a flag.
    pub fn n_flagged(&self, flag: ResultFlag) -> usize {
        self.results.iter().filter(|r| r.has_flag(flag)).count()
    }

    /// Count significant results by direction at common thresholds.
    pub fn summary(&self) -> ResultSummary {
        let count = |alpha: f64| DirectionCounts {
            alpha,
            up: self
                .results
                .iter()
                .filter(|r| r.is_significant_at(alpha) && r.log_fc > 0.0)
                .count(),
            down: self
                .results
                .iter()
                .filter(|r| r.is_significant_at(alpha) && r.log_fc < 0.0)
                .count(),
        };
        ResultSummary {
            total: self.len(),
            thresholds: [0.001, 0.01, 0.05, 0.10].into_iter().map(count).collect(),
            flagged: self.results.iter().filter(|r| !r.flags.is_empty()).count(),
        }
    }

    /// Write results to a TSV file.
    pub fn to_tsv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        writeln!(
            writer,
            "feature_id\tcontrast\tlog_fc\tave_expr\tstd_error\tt\tdf_total\tp_value\tadj_p_value\tb\tflags"
        )?;

        for r in &self.results {
            writeln!(
                writer,
                "{}\t{}\t{:.6}\t{:.6}\t{:.6}\t{:.4}\t{:.2}\t{:.4e}\t{:.4e}\t{:.4}\t{}",
                r.feature_id,
                r.contrast,
                r.log_fc,
                r.ave_expr,
                r.std_error,
                r.t,
                r.df_total,
                r.p_value,
                r.adj_p_value,
                r.b,
                r.flags_label()
            )?;
        }

        writer.flush()?;
        Ok(())
    }
}

fn ascending_nan_last(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => a.total_cmp(&b),
    }
}

/// Up/down counts at one threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectionCounts {
    pub alpha: f64,
    pub up: usize,
    pub down: usize,
}

/// Summary statistics for a result table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultSummary {
    pub total: usize,
    pub thresholds: Vec<DirectionCounts>,
    /// Results carrying at least one diagnostic flag.
    pub flagged: usize,
}

impl ResultSummary {
    /// Total significant at `alpha`, if that threshold was tabulated.
    pub fn significant_at(&self, alpha: f64) -> Option<usize> {
        self.thresholds
            .iter()
            .find(|c| (c.alpha - alpha).abs() < 1e-12)
            .map(|c| c.up + c.down)
    }
}

impl std::fmt::Display for ResultSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Total tests: {}", self.total)?;
        for c in &self.thresholds {
            writeln!(
                f,
                "adj.P < {:<5}  up: {:>5}  down: {:>5}",
                c.alpha, c.up, c.down
            )?;
        }
        writeln!(f, "Flagged results: {}", self.flagged)?;
        Ok(())
    }
}
