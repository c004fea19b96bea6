//! Raw protein intensity matrix as delivered by the quantification software.

use crate::error::{DaError, Result};
use nalgebra::DMatrix;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// Value used for "not observed" in raw intensity data.
pub const MISSING_SENTINEL: f64 = 0.0;

/// A dense intensity matrix (features × samples).
///
/// Rows are proteins, columns are samples. Intensities are on the raw
/// (linear) scale and a value of [`MISSING_SENTINEL`] means the protein
/// was not observed in that sample.
#[derive(Debug, Clone)]
pub struct IntensityMatrix {
    data: DMatrix<f64>,
    feature_ids: Vec<String>,
    sample_ids: Vec<String>,
}

impl IntensityMatrix {
    /// Create a new matrix from dense values and identifiers.
    pub fn new(data: DMatrix<f64>, feature_ids: Vec<String>, sample_ids: Vec<String>) -> Result<Self> {
        if data.nrows() != feature_ids.len() {
            return Err(DaError::DimensionMismatch {
                expected: data.nrows(),
                actual: feature_ids.len(),
            });
        }
        if data.ncols() != sample_ids.len() {
            return Err(DaError::DimensionMismatch {
                expected: data.ncols(),
                actual: sample_ids.len(),
            });
        }
        Ok(Self {
            data,
            feature_ids,
            sample_ids,
        })
    }

    /// Build from row-major values.
    pub fn from_rows(rows: &[Vec<f64>], feature_ids: Vec<String>, sample_ids: Vec<String>) -> Result<Self> {
        let n_samples = sample_ids.len();
        for row in rows {
            if row.len() != n_samples {
                return Err(DaError::DimensionMismatch {
                    expected: n_samples,
                    actual: row.len(),
                });
            }
        }
        let flat: Vec<f64> = rows.iter().flatten().copied().collect();
        let data = DMatrix::from_row_slice(rows.len(), n_samples, &flat);
        Self::new(data, feature_ids, sample_ids)
    }

    /// Load an intensity matrix from a tab-delimited file.
    ///
    /// The header holds the feature ID column name followed by sample IDs.
    /// Empty cells, `NA` and `NaN` are read as the missing sentinel.
    pub fn from_tsv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let mut lines = reader.lines();

        let header_line = lines
            .next()
            .ok_or_else(|| DaError::EmptyData("Empty intensity file".to_string()))??;
        let header: Vec<&str> = header_line.trim_end_matches('\r').split('\t').collect();
        if header.len() < 2 {
            return Err(DaError::EmptyData(
                "Intensity file must have at least one sample column".to_string(),
            ));
        }
        let sample_ids: Vec<String> = header[1..].iter().map(|s| s.trim().to_string()).collect();
        let n_samples = sample_ids.len();

        let mut feature_ids = Vec::new();
        let mut values: Vec<f64> = Vec::new();

        for (row_idx, line_result) in lines.enumerate() {
            let line = line_result?;
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() - 1 != n_samples {
                return Err(DaError::DimensionMismatch {
                    expected: n_samples,
                    actual: fields.len() - 1,
                });
            }
            feature_ids.push(fields[0].trim().to_string());
            for (col_idx, raw) in fields[1..].iter().enumerate() {
                values.push(parse_intensity(raw, row_idx, col_idx)?);
            }
        }

        if feature_ids.is_empty() {
            return Err(DaError::EmptyData("No features in intensity file".to_string()));
        }

        let data = DMatrix::from_row_slice(feature_ids.len(), n_samples, &values);
        Self::new(data, feature_ids, sample_ids)
    }

    /// Write the matrix to a tab-delimited file.
    pub fn to_tsv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        write!(writer, "feature_id")?;
        for sample_id in &self.sample_ids {
            write!(writer, "\t{}", sample_id)?;
        }
        writeln!(writer)?;

        for (row, feature_id) in self.feature_ids.iter().enumerate() {
            write!(writer, "{}", feature_id)?;
            for col in 0..self.n_samples() {
                write!(writer, "\t{}", self.data[(row, col)])?;
            }
            writeln!(writer)?;
        }
        writer.flush()?;
        Ok(())
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[(row, col)]
    }

    /// Whether an entry was observed (not the missing sentinel).
    #[inline]
    pub fn is_observed(&self, row: usize, col: usize) -> bool {
        let v = self.data[(row, col)];
        v != MISSING_SENTINEL && !v.is_nan()
    }

    #[inline]
    pub fn n_features(&self) -> usize {
        self.data.nrows()
    }

    #[inline]
    pub fn n_samples(&self) -> usize {
        self.data.ncols()
    }

    #[inline]
    pub fn feature_ids(&self) -> &[String] {
        &self.feature_ids
    }

    #[inline]
    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    #[inline]
    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.data
    }

    /// Values for one feature across all samples.
    pub fn row(&self, row: usize) -> Vec<f64> {
        self.data.row(row).iter().copied().collect()
    }

    /// Number of samples in which a feature was observed.
    pub fn n_observed(&self, row: usize) -> usize {
        (0..self.n_samples()).filter(|&c| self.is_observed(row, c)).count()
    }

    /// Keep only the listed features, in the given order.
    pub fn subset_features(&self, indices: &[usize]) -> Result<Self> {
        if let Some(&bad) = indices.iter().find(|&&i| i >= self.n_features()) {
            return Err(DaError::InvalidParameter(format!(
                "Feature index {} out of bounds",
                bad
            )));
        }
        let data = self.data.select_rows(indices);
        let feature_ids = indices.iter().map(|&i| self.feature_ids[i].clone()).collect();
        Self::new(data, feature_ids, self.sample_ids.clone())
    }

    /// Keep only the listed samples, in the given order.
    pub fn subset_samples(&self, indices: &[usize]) -> Result<Self> {
        if let Some(&bad) = indices.iter().find(|&&i| i >= self.n_samples()) {
            return Err(DaError::InvalidParameter(format!(
                "Sample index {} out of bounds",
                bad
            )));
        }
        let data = self.data.select_columns(indices);
        let sample_ids = indices.iter().map(|&i| self.sample_ids[i].clone()).collect();
        Self::new(data, self.feature_ids.clone(), sample_ids)
    }

    /// Reorder columns to follow `sample_ids` exactly.
    ///
    /// Every requested sample must be present in the matrix.
    pub fn reorder_samples(&self, sample_ids: &[String]) -> Result<Self> {
        let position: HashMap<&str, usize> = self
            .sample_ids
            .iter()
            .enumerate()
            .map(|(i, s)| (s.as_str(), i))
            .collect();
        let indices = sample_ids
            .iter()
            .map(|sid| {
                position.get(sid.as_str()).copied().ok_or_else(|| {
                    DaError::SampleMismatch(format!("Sample '{}' not found in intensity matrix", sid))
                })
            })
            .collect::<Result<Vec<usize>>>()?;
        self.subset_samples(&indices)
    }
}

fn parse_intensity(raw: &str, row: usize, col: usize) -> Result<f64> {
    let v = raw.trim();
    if v.is_empty() || v.eq_ignore_ascii_case("na") || v.eq_ignore_ascii_case("nan") {
        return Ok(MISSING_SENTINEL);
    }
    let value: f64 = v.parse().map_err(|_| DaError::InvalidValue {
        value: raw.to_string(),
        row,
        col,
    })?;
    if !value.is_finite() {
        return Err(DaError::InvalidValue {
            value: raw.to_string(),
            row,
            col,
        });
    }
    Ok(value)
}
