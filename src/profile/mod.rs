//! Data profiling primitives for intensity and log-abundance matrices.

mod mds;
mod missingness;
mod samples;

pub use mds::{mds, MdsResult, DEFAULT_MDS_TOP};
pub use missingness::{profile_missingness, MissingnessProfile};
pub use samples::{profile_samples, SampleProfile, SampleSummary, OUTLIER_MADS};
