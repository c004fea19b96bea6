//! Synthetic proteomics data with known ground truth.
//!
//! Used to check that the moderated test ranks and calls differential
//! features the way it should.

mod generate;

pub use generate::{
    generate_synthetic, Direction, Evaluation, GroundTruth, SimulationConfig, SyntheticData,
};
