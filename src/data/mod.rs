//! Data structures for moderated differential abundance analysis.

mod contrast;
mod design_matrix;
mod expression_matrix;
mod formula;
mod intensity_matrix;
mod metadata;
mod result;

pub use contrast::Contrast;
pub use design_matrix::{numerical_rank, DesignMatrix, RANK_TOLERANCE};
pub use expression_matrix::ExpressionMatrix;
pub use formula::{Formula, Term};
pub use intensity_matrix::{IntensityMatrix, MISSING_SENTINEL};
pub use metadata::{Metadata, Variable, VariableType};
pub use result::{DirectionCounts, ModeratedResult, ResultFlag, ResultSummary, ResultTable};
