//! Moderated Differential Abundance Library
//!
//! Per-feature linear models with empirical-Bayes variance moderation for
//! label-free proteomics and other log-scale abundance data, in the style of
//! limma's `lmFit` / `contrasts.fit` / `eBayes` / `topTable`.
//!
//! # Overview
//!
//! The library is organized into composable modules:
//!
//! - **data**: Core data structures (IntensityMatrix, Metadata, DesignMatrix, Contrast, ResultTable)
//! - **preprocess**: Log transformation, missingness filters, median normalization
//! - **profile**: Missingness and per-sample diagnostics, MDS
//! - **model**: Shared QR fit, contrasts, variance prior
//! - **test**: Moderated t-statistics and B-statistics
//! - **correct**: Multiple testing correction (Benjamini-Hochberg)
//! - **stats**: Special functions and distribution helpers
//! - **pipeline**: Pipeline composition and execution
//! - **simulate**: Synthetic data with known ground truth
//!
//! # Example
//!
//! ```no_run
//! use moderated_da::prelude::*;
//!
//! let intensities = IntensityMatrix::from_tsv("intensities.tsv").unwrap();
//! let metadata = Metadata::from_tsv("metadata.tsv").unwrap();
//!
//! let results = Pipeline::new()
//!     .log2()
//!     .filter_missingness(0.7)
//!     .normalize_median()
//!     .model_lm("~ 0 + group")
//!     .contrast("grouptreatment - groupcontrol")
//!     .ebayes()
//!     .adjust(AdjustMethod::BenjaminiHochberg)
//!     .run(&intensities, &metadata)
//!     .unwrap();
//!
//! for r in results.top(10) {
//!     println!("{}\t{:.3}\t{:.2e}", r.feature_id, r.log_fc, r.adj_p_value);
//! }
//! ```

pub mod correct;
pub mod data;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod preprocess;
pub mod profile;
pub mod simulate;
pub mod stats;
pub mod test;

/// Convenient re-exports for common usage.
pub mod prelude {
    pub use crate::correct::{adjust_pvalues, bh_adjust, correct_bh, create_results, AdjustMethod};
    pub use crate::data::{
        Contrast, DesignMatrix, ExpressionMatrix, Formula, IntensityMatrix, Metadata,
        ModeratedResult, ResultFlag, ResultSummary, ResultTable, Term, Variable,
    };
    pub use crate::error::{DaError, Result};
    pub use crate::model::{
        fit_contrast, fit_contrasts, fit_variance_prior, model_lm, squeeze_variances,
        ContrastResult, LinearFit, PriorStatus, VariancePrior,
    };
    pub use crate::pipeline::{run_moderated_t, Pipeline, PipelineConfig, PipelineStep};
    pub use crate::preprocess::{
        as_log_scale, filter_missingness, filter_missingness_groupwise, log_transform,
        normalize_median, FilterResult, GroupwiseLogic, LogTransformConfig, MissingPolicy,
    };
    pub use crate::profile::{
        mds, profile_missingness, profile_samples, MdsResult, MissingnessProfile, SampleProfile,
    };
    pub use crate::simulate::{
        generate_synthetic, Direction, Evaluation, GroundTruth, SimulationConfig, SyntheticData,
    };
    pub use crate::test::{ebayes, EBayesConfig, EBayesFit, ModeratedTest};
}
