//! Design matrix construction from sample metadata and a formula.

use crate::data::{Formula, Metadata, Term, Variable, VariableType};
use crate::error::{DaError, Result};
use nalgebra::DMatrix;
use std::collections::HashMap;

/// Relative tolerance on |R_ii| used to decide numerical rank.
pub const RANK_TOLERANCE: f64 = 1e-7;

/// A model matrix (samples × coefficients) with named columns.
#[derive(Debug, Clone)]
pub struct DesignMatrix {
    matrix: DMatrix<f64>,
    coefficient_names: Vec<String>,
    sample_ids: Vec<String>,
    reference_levels: HashMap<String, String>,
}

impl DesignMatrix {
    /// Wrap an explicit numeric design.
    pub fn from_matrix(
        matrix: DMatrix<f64>,
        coefficient_names: Vec<String>,
        sample_ids: Vec<String>,
    ) -> Result<Self> {
        if matrix.ncols() != coefficient_names.len() {
            return Err(DaError::DimensionMismatch {
                expected: matrix.ncols(),
                actual: coefficient_names.len(),
            });
        }
        if matrix.nrows() != sample_ids.len() {
            return Err(DaError::DimensionMismatch {
                expected: matrix.nrows(),
                actual: sample_ids.len(),
            });
        }
        if matrix.iter().any(|v| !v.is_finite()) {
            return Err(DaError::InvalidParameter(
                "Design matrix contains non-finite values".to_string(),
            ));
        }
        Ok(Self {
            matrix,
            coefficient_names,
            sample_ids,
            reference_levels: HashMap::new(),
        })
    }

    /// Build a design matrix using the alphabetically first level of each
    /// factor as reference.
    pub fn from_formula(metadata: &Metadata, formula: &Formula) -> Result<Self> {
        Self::from_formula_with_reference(metadata, formula, &HashMap::new())
    }

    /// Build a design matrix with explicit reference levels for some factors.
    pub fn from_formula_with_reference(
        metadata: &Metadata,
        formula: &Formula,
        references: &HashMap<String, String>,
    ) -> Result<Self> {
        let n_samples = metadata.n_samples();

        let mut reference_levels = HashMap::new();
        for var in formula.variables() {
            if !metadata.has_column(var) {
                return Err(DaError::MissingColumn(var.to_string()));
            }
            if metadata.column_type(var) == Some(VariableType::Categorical) {
                let levels = metadata.levels(var)?;
                let reference = match references.get(var) {
                    Some(level) if levels.contains(level) => level.clone(),
                    Some(level) => {
                        return Err(DaError::InvalidParameter(format!(
                            "Level '{}' not found for variable '{}'",
                            level, var
                        )))
                    }
                    None => levels.first().cloned().unwrap_or_default(),
                };
                reference_levels.insert(var.to_string(), reference);
            }
        }

        let mut blocks: Vec<(String, Vec<f64>)> = Vec::new();
        if formula.intercept {
            blocks.push(("(Intercept)".to_string(), vec![1.0; n_samples]));
        }

        // The first factor in an intercept-free model keeps all of its levels
        // (cell-means coding, as in `~ 0 + group`).
        let mut full_rank_factor_pending = !formula.intercept;

        for term in &formula.terms {
            match term {
                Term::Main(var) => {
                    let keep_all = full_rank_factor_pending
                        && metadata.column_type(var) == Some(VariableType::Categorical);
                    if keep_all {
                        full_rank_factor_pending = false;
                    }
                    blocks.extend(variable_columns(metadata, var, &reference_levels, keep_all)?);
                }
                Term::Interaction(vars) => {
                    let mut acc: Vec<(String, Vec<f64>)> = vec![(String::new(), vec![1.0; n_samples])];
                    for var in vars {
                        let cols = variable_columns(metadata, var, &reference_levels, false)?;
                        acc = acc
                            .iter()
                            .flat_map(|(name_a, col_a)| {
                                cols.iter().map(move |(name_b, col_b)| {
                                    let name = if name_a.is_empty() {
                                        name_b.clone()
                                    } else {
                                        format!("{}:{}", name_a, name_b)
                                    };
                                    let col = col_a.iter().zip(col_b).map(|(a, b)| a * b).collect();
                                    (name, col)
                                })
                            })
                            .collect();
                    }
                    blocks.extend(acc);
                }
            }
        }

        let n_coef = blocks.len();
        let matrix = DMatrix::from_fn(n_samples, n_coef, |i, j| blocks[j].1[i]);
        let coefficient_names = blocks.into_iter().map(|(name, _)| name).collect();

        Ok(Self {
            matrix,
            coefficient_names,
            sample_ids: metadata.sample_ids().to_vec(),
            reference_levels,
        })
    }

    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.matrix
    }

    pub fn coefficient_names(&self) -> &[String] {
        &self.coefficient_names
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    pub fn n_samples(&self) -> usize {
        self.matrix.nrows()
    }

    pub fn n_coefficients(&self) -> usize {
        self.matrix.ncols()
    }

    pub fn reference_level(&self, variable: &str) -> Option<&str> {
        self.reference_levels.get(variable).map(|s| s.as_str())
    }

    pub fn coefficient_index(&self, name: &str) -> Option<usize> {
        self.coefficient_names.iter().position(|n| n == name)
    }

    pub fn has_intercept(&self) -> bool {
        self.coefficient_names.first().map(String::as_str) == Some("(Intercept)")
    }

    /// Numerical rank from the QR decomposition.
    pub fn rank(&self) -> usize {
        numerical_rank(&self.matrix)
    }

    pub fn is_full_rank(&self) -> bool {
        self.rank() == self.n_coefficients()
    }
}

/// Numerical rank of a matrix via the diagonal of R in its QR decomposition.
pub fn numerical_rank(x: &DMatrix<f64>) -> usize {
    if x.is_empty() {
        return 0;
    }
    let r = x.clone().qr().r();
    let diag: Vec<f64> = (0..r.nrows().min(r.ncols())).map(|i| r[(i, i)].abs()).collect();
    let max = diag.iter().cloned().fold(0.0, f64::max);
    if max == 0.0 {
        return 0;
    }
    diag.iter().filter(|&&d| d > RANK_TOLERANCE * max).count()
}

/// Columns contributed by one variable.
fn variable_columns(
    metadata: &Metadata,
    var: &str,
    reference_levels: &HashMap<String, String>,
    keep_all_levels: bool,
) -> Result<Vec<(String, Vec<f64>)>> {
    let values = metadata.column(var)?;
    if let Some(pos) = values.iter().position(Variable::is_missing) {
        return Err(DaError::InvalidParameter(format!(
            "Variable '{}' is missing for sample '{}'",
            var,
            metadata.sample_ids()[pos]
        )));
    }

    match metadata.column_type(var) {
        Some(VariableType::Continuous) => {
            let col = values.iter().map(|v| v.as_continuous().unwrap_or(0.0)).collect();
            Ok(vec![(var.to_string(), col)])
        }
        Some(VariableType::Categorical) | None => {
            let reference = reference_levels.get(var);
            Ok(metadata
                .levels(var)?
                .into_iter()
                .filter(|level| keep_all_levels || Some(level) != reference)
                .map(|level| {
                    let col = values
                        .iter()
                        .map(|v| if v.as_categorical() == Some(level.as_str()) { 1.0 } else { 0.0 })
                        .collect();
                    (format!("{}{}", var, level), col)
                })
                .collect())
        }
    }
}
