//! Pipeline composition and execution for moderated differential abundance.

mod runner;

pub use runner::{run_moderated_t, Pipeline, PipelineConfig, PipelineStep};
