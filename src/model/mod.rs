//! Linear models, contrasts and the empirical-Bayes variance prior.

pub mod contrast;
pub mod ebayes;
pub mod lm;

pub use contrast::{fit_contrast, fit_contrasts, ContrastFit, ContrastResult};
pub use ebayes::{
    fit_variance_prior, squeeze_variances, total_df, PriorStatus, VariancePrior,
    DEFAULT_VARIANCE_FLOOR,
};
pub use lm::{model_lm, DesignFactorization, FeatureFit, LinearFit};
