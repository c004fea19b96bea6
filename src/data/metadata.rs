//! Sample annotation table (one row per subject/sample).

use crate::error::{DaError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// A single annotation value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Variable {
    /// Categorical value (group label, batch, sex, ...).
    Categorical(String),
    /// Continuous numeric covariate.
    Continuous(f64),
    /// Missing value.
    Missing,
}

impl Variable {
    pub fn is_missing(&self) -> bool {
        matches!(self, Variable::Missing)
    }

    pub fn as_categorical(&self) -> Option<&str> {
        match self {
            Variable::Categorical(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_continuous(&self) -> Option<f64> {
        match self {
            Variable::Continuous(v) => Some(*v),
            _ => None,
        }
    }

    fn parse(raw: &str, kind: VariableType) -> Self {
        let raw = raw.trim();
        if is_missing_token(raw) {
            return Variable::Missing;
        }
        match kind {
            VariableType::Continuous => raw
                .parse::<f64>()
                .map(Variable::Continuous)
                .unwrap_or(Variable::Missing),
            VariableType::Categorical => Variable::Categorical(raw.to_string()),
        }
    }
}

/// Column kind, inferred on load or forced with [`Metadata::with_categorical`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VariableType {
    Categorical,
    Continuous,
}

#[derive(Debug, Clone)]
struct Column {
    name: String,
    kind: VariableType,
    raw: Vec<String>,
    values: Vec<Variable>,
}

/// Sample metadata, stored column-wise in sample order.
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    sample_ids: Vec<String>,
    sample_index: HashMap<String, usize>,
    columns: Vec<Column>,
}

impl Metadata {
    /// Build metadata from raw string columns.
    ///
    /// Each column's kind is inferred: continuous when every non-missing
    /// value parses as a number, categorical otherwise.
    pub fn from_columns(sample_ids: Vec<String>, columns: Vec<(String, Vec<String>)>) -> Result<Self> {
        if sample_ids.is_empty() {
            return Err(DaError::EmptyData("No samples in metadata".to_string()));
        }
        let mut sample_index = HashMap::with_capacity(sample_ids.len());
        for (i, sid) in sample_ids.iter().enumerate() {
            if sample_index.insert(sid.clone(), i).is_some() {
                return Err(DaError::SampleMismatch(format!(
                    "Duplicate sample '{}' in metadata",
                    sid
                )));
            }
        }

        let columns = columns
            .into_iter()
            .map(|(name, raw)| {
                if raw.len() != sample_ids.len() {
                    return Err(DaError::DimensionMismatch {
                        expected: sample_ids.len(),
                        actual: raw.len(),
                    });
                }
                let kind = infer_kind(&raw);
                let values = raw.iter().map(|r| Variable::parse(r, kind)).collect();
                Ok(Column {
                    name,
                    kind,
                    raw,
                    values,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            sample_ids,
            sample_index,
            columns,
        })
    }

    /// Load metadata from a tab-delimited file.
    ///
    /// The first column holds sample IDs; remaining columns are variables.
    /// Short rows are padded with missing values.
    pub fn from_tsv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let mut lines = reader.lines();

        let header_line = lines
            .next()
            .ok_or_else(|| DaError::EmptyData("Empty metadata file".to_string()))??;
        let header: Vec<String> = header_line
            .trim_end_matches('\r')
            .split('\t')
            .map(|s| s.trim().to_string())
            .collect();
        if header.len() < 2 {
            return Err(DaError::EmptyData(
                "Metadata must have at least one variable column".to_string(),
            ));
        }
        let n_vars = header.len() - 1;

        let mut sample_ids = Vec::new();
        let mut raw_columns: Vec<Vec<String>> = vec![Vec::new(); n_vars];
        for line_result in lines {
            let line = line_result?;
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split('\t').collect();
            sample_ids.push(fields[0].trim().to_string());
            for (j, column) in raw_columns.iter_mut().enumerate() {
                column.push(fields.get(j + 1).map(|s| s.to_string()).unwrap_or_default());
            }
        }

        let columns = header[1..].iter().cloned().zip(raw_columns).collect();
        Self::from_columns(sample_ids, columns)
    }

    /// Force the listed columns to be treated as categorical.
    ///
    /// Useful when groups are coded numerically (e.g. `1`/`2`).
    pub fn with_categorical(mut self, names: &[&str]) -> Result<Self> {
        for name in names {
            let column = self
                .columns
                .iter_mut()
                .find(|c| c.name == *name)
                .ok_or_else(|| DaError::MissingColumn(name.to_string()))?;
            column.kind = VariableType::Categorical;
            column.values = column
                .raw
                .iter()
                .map(|r| Variable::parse(r, VariableType::Categorical))
                .collect();
        }
        Ok(self)
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn n_samples(&self) -> usize {
        self.sample_ids.len()
    }

    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    pub fn has_sample(&self, sample_id: &str) -> bool {
        self.sample_index.contains_key(sample_id)
    }

    fn find(&self, name: &str) -> Result<&Column> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| DaError::MissingColumn(name.to_string()))
    }

    /// Value for a sample and column.
    pub fn get(&self, sample_id: &str, column: &str) -> Option<&Variable> {
        let idx = *self.sample_index.get(sample_id)?;
        self.find(column).ok().map(|c| &c.values[idx])
    }

    /// All values of a column, in sample order.
    pub fn column(&self, name: &str) -> Result<&[Variable]> {
        Ok(&self.find(name)?.values)
    }

    pub fn column_type(&self, name: &str) -> Option<VariableType> {
        self.find(name).ok().map(|c| c.kind)
    }

    /// Sorted distinct levels of a categorical column.
    pub fn levels(&self, name: &str) -> Result<Vec<String>> {
        let levels: BTreeSet<&str> = self
            .column(name)?
            .iter()
            .filter_map(|v| v.as_categorical())
            .collect();
        Ok(levels.into_iter().map(String::from).collect())
    }

    /// Sample indices grouped by the levels of a categorical column.
    pub fn group_indices(&self, name: &str) -> Result<Vec<(String, Vec<usize>)>> {
        let values = self.column(name)?;
        Ok(self
            .levels(name)?
            .into_iter()
            .map(|level| {
                let idx = values
                    .iter()
                    .enumerate()
                    .filter(|(_, v)| v.as_categorical() == Some(level.as_str()))
                    .map(|(i, _)| i)
                    .collect();
                (level, idx)
            })
            .collect())
    }

    /// Restrict and reorder metadata to the given samples.
    pub fn subset_samples(&self, sample_ids: &[String]) -> Result<Self> {
        let indices = sample_ids
            .iter()
            .map(|sid| {
                self.sample_index.get(sid).copied().ok_or_else(|| {
                    DaError::SampleMismatch(format!("Sample '{}' not found in metadata", sid))
                })
            })
            .collect::<Result<Vec<usize>>>()?;

        let columns = self
            .columns
            .iter()
            .map(|c| Column {
                name: c.name.clone(),
                kind: c.kind,
                raw: indices.iter().map(|&i| c.raw[i].clone()).collect(),
                values: indices.iter().map(|&i| c.values[i].clone()).collect(),
            })
            .collect();

        Ok(Self {
            sample_ids: sample_ids.to_vec(),
            sample_index: sample_ids
                .iter()
                .enumerate()
                .map(|(i, s)| (s.clone(), i))
                .collect(),
            columns,
        })
    }

    /// Align metadata to the column order of an intensity matrix.
    ///
    /// Both sides must describe exactly the same set of samples.
    pub fn align_to(&self, sample_ids: &[String]) -> Result<Self> {
        if sample_ids.len() != self.n_samples() {
            return Err(DaError::SampleMismatch(format!(
                "Matrix has {} samples but metadata has {}",
                sample_ids.len(),
                self.n_samples()
            )));
        }
        self.subset_samples(sample_ids)
    }
}

fn is_missing_token(v: &str) -> bool {
    v.is_empty() || v.eq_ignore_ascii_case("na") || v.eq_ignore_ascii_case("nan")
}

fn infer_kind(raw: &[String]) -> VariableType {
    let all_numeric = raw.iter().all(|r| {
        let v = r.trim();
        is_missing_token(v) || v.parse::<f64>().is_ok()
    });
    if all_numeric {
        VariableType::Continuous
    } else {
        VariableType::Categorical
    }
}
