//! Preprocessing of raw intensities into model-ready log abundances.
//!
//! - **Log transform**: `log_base(x + offset)` with a missing-value policy
//! - **Missingness filters**: overall and group-wise observed fractions
//! - **Median normalization**: per-sample median centring

pub mod log_transform;
pub mod median;
pub mod missingness;

pub use log_transform::{as_log_scale, log_transform, LogTransformConfig, MissingPolicy};
pub use median::{normalize_median, sample_medians};
pub use missingness::{
    filter_missingness, filter_missingness_groupwise, filter_missingness_with_stats, FilterResult,
    GroupwiseLogic,
};
