//! Missingness-based feature filtering.

use crate::data::{ExpressionMatrix, Metadata};
use crate::error::{DaError, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Logic for combining group-wise missingness filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GroupwiseLogic {
    /// Feature must be observed often enough in ANY group.
    Any,
    /// Feature must be observed often enough in ALL groups.
    #[default]
    All,
    /// Feature must pass in at least N groups.
    AtLeast(usize),
}

fn check_fraction(min_fraction: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&min_fraction) {
        return Err(DaError::InvalidParameter(format!(
            "Minimum observed fraction must be between 0 and 1, got {}",
            min_fraction
        )));
    }
    Ok(())
}

/// Keep features observed in at least `min_fraction` of samples.
pub fn filter_missingness(matrix: &ExpressionMatrix, min_fraction: f64) -> Result<ExpressionMatrix> {
    check_fraction(min_fraction)?;

    let min_samples = (min_fraction * matrix.n_samples() as f64).ceil() as usize;
    let keep_indices: Vec<usize> = (0..matrix.n_features())
        .into_par_iter()
        .filter(|&row| matrix.n_observed(row) >= min_samples)
        .collect();

    if keep_indices.is_empty() {
        return Err(DaError::EmptyData(format!(
            "No features observed in at least {:.1}% of samples",
            min_fraction * 100.0
        )));
    }

    log::info!(
        "Missingness filter ({:.0}%): kept {} of {} features",
        min_fraction * 100.0,
        keep_indices.len(),
        matrix.n_features()
    );
    matrix.subset_features(&keep_indices)
}

/// Keep features observed often enough within groups of a categorical column.
///
/// Samples with a missing group value belong to no group.
pub fn filter_missingness_groupwise(
    matrix: &ExpressionMatrix,
    metadata: &Metadata,
    group_column: &str,
    min_fraction: f64,
    logic: GroupwiseLogic,
) -> Result<ExpressionMatrix> {
    check_fraction(min_fraction)?;

    let groups = build_group_indices(matrix, metadata, group_column)?;
    let n_groups = groups.len();
    if n_groups == 0 {
        return Err(DaError::EmptyData(format!(
            "No groups found in column '{}'",
            group_column
        )));
    }
    if let GroupwiseLogic::AtLeast(n) = logic {
        if n > n_groups {
            return Err(DaError::InvalidParameter(format!(
                "AtLeast({}) requires at least {} groups, but only {} found",
                n, n, n_groups
            )));
        }
    }

    let keep_indices: Vec<usize> = (0..matrix.n_features())
        .into_par_iter()
        .filter(|&row| {
            let passing = groups
                .iter()
                .filter(|indices| {
                    let min_samples = (min_fraction * indices.len() as f64).ceil() as usize;
                    let n_obs = indices.iter().filter(|&&j| matrix.is_observed(row, j)).count();
                    n_obs >= min_samples
                })
                .count();

            match logic {
                GroupwiseLogic::Any => passing > 0,
                GroupwiseLogic::All => passing == n_groups,
                GroupwiseLogic::AtLeast(n) => passing >= n,
            }
        })
        .collect();

    if keep_indices.is_empty() {
        return Err(DaError::EmptyData(format!(
            "No features pass group-wise missingness threshold of {:.1}%",
            min_fraction * 100.0
        )));
    }

    log::info!(
        "Group-wise missingness filter on '{}' ({:?}, {:.0}%): kept {} of {} features",
        group_column,
        logic,
        min_fraction * 100.0,
        keep_indices.len(),
        matrix.n_features()
    );
    matrix.subset_features(&keep_indices)
}

/// Matrix column indices for each non-empty group.
fn build_group_indices(
    matrix: &ExpressionMatrix,
    metadata: &Metadata,
    group_column: &str,
) -> Result<Vec<Vec<usize>>> {
    let aligned = metadata.align_to(&matrix.sample_ids)?;
    Ok(aligned
        .group_indices(group_column)?
        .into_iter()
        .map(|(_, idx)| idx)
        .filter(|idx| !idx.is_empty())
        .collect())
}

/// Summary of a filtering step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterResult {
    pub n_before: usize,
    pub n_after: usize,
    pub n_removed: usize,
    /// Proportion of features retained.
    pub retention_rate: f64,
}

impl FilterResult {
    pub fn new(n_before: usize, n_after: usize) -> Self {
        Self {
            n_before,
            n_after,
            n_removed: n_before.saturating_sub(n_after),
            retention_rate: if n_before == 0 {
                0.0
            } else {
                n_after as f64 / n_before as f64
            },
        }
    }
}

impl std::fmt::Display for FilterResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Filter Result")?;
        writeln!(f, "  Before:    {} features", self.n_before)?;
        writeln!(f, "  After:     {} features", self.n_after)?;
        writeln!(f, "  Removed:   {} features", self.n_removed)?;
        writeln!(f, "  Retained:  {:.1}%", self.retention_rate * 100.0)?;
        Ok(())
    }
}

/// Overall filter that also reports what was removed.
pub fn filter_missingness_with_stats(
    matrix: &ExpressionMatrix,
    min_fraction: f64,
) -> Result<(ExpressionMatrix, FilterResult)> {
    let filtered = filter_missingness(matrix, min_fraction)?;
    let stats = FilterResult::new(matrix.n_features(), filtered.n_features());
    Ok((filtered, stats))
}
