//! Error types for the moderated-da library.

use thiserror::Error;

/// Main error type for the library.
///
/// Configuration and input-shape problems are raised before any per-feature
/// work starts. Per-feature numerical degeneracy is never an error; it is
/// recorded as a flag on the affected result instead.
#[derive(Error, Debug)]
pub enum DaError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid value '{value}' at row {row}, column {col}")]
    InvalidValue {
        value: String,
        row: usize,
        col: usize,
    },

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Sample ID mismatch: {0}")]
    SampleMismatch(String),

    #[error("Missing column '{0}' in metadata")]
    MissingColumn(String),

    #[error("Formula parse error: {0}")]
    FormulaParse(String),

    #[error("Design matrix is rank deficient (rank {rank} < {n_coefficients} coefficients)")]
    RankDeficient { rank: usize, n_coefficients: usize },

    #[error("Model is saturated: {n_samples} samples for {n_coefficients} coefficients")]
    SaturatedModel {
        n_samples: usize,
        n_coefficients: usize,
    },

    #[error("Invalid contrast: {0}")]
    InvalidContrast(String),

    #[error("Empty data: {0}")]
    EmptyData(String),

    #[error("Numerical error: {0}")]
    Numerical(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Pipeline error: {0}")]
    Pipeline(String),

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, DaError>;
