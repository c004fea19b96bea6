//! Classical multidimensional scaling of samples.
//!
//! The distance between two samples is the root-mean-square of the `top`
//! largest squared log-fold differences between them, computed over
//! features observed in every sample. Distances are embedded with
//! Torgerson scaling: double-centre the squared distances and take the
//! leading eigenvectors.

use crate::data::ExpressionMatrix;
use crate::error::{DaError, Result};
use nalgebra::{DMatrix, SymmetricEigen};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

pub const DEFAULT_MDS_TOP: usize = 500;

/// Eigenvalues at or below this are treated as zero.
const EIGEN_EPS: f64 = 1e-10;

/// Sample coordinates in the leading MDS dimensions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MdsResult {
    pub sample_ids: Vec<String>,
    /// One row per sample, one column per dimension.
    pub coordinates: DMatrix<f64>,
    /// Share of positive eigenvalue mass per returned dimension.
    pub variance_explained: Vec<f64>,
    /// Leading-fold-change distances between samples.
    pub distances: DMatrix<f64>,
    /// Number of features used per pair.
    pub top: usize,
    pub n_features_used: usize,
}

impl MdsResult {
    pub fn dims(&self) -> usize {
        self.coordinates.ncols()
    }

    pub fn coordinate(&self, sample: usize, dim: usize) -> f64 {
        self.coordinates[(sample, dim)]
    }

    /// Tab-delimited coordinates, one sample per line.
    pub fn to_tsv(&self) -> String {
        let mut out = String::from("sample_id");
        for d in 0..self.dims() {
            out.push_str(&format!("\tdim{}", d + 1));
        }
        out.push('\n');
        for (i, sid) in self.sample_ids.iter().enumerate() {
            out.push_str(sid);
            for d in 0..self.dims() {
                out.push_str(&format!("\t{:.6}", self.coordinates[(i, d)]));
            }
            out.push('\n');
        }
        out
    }
}

/// Classical MDS on leading log-fold-change distances.
pub fn mds(matrix: &ExpressionMatrix, top: usize, dims: usize) -> Result<MdsResult> {
    let n = matrix.n_samples();
    if n < 3 {
        return Err(DaError::InvalidParameter(format!(
            "MDS needs at least 3 samples, got {}",
            n
        )));
    }
    if dims == 0 || dims >= n {
        return Err(DaError::InvalidParameter(format!(
            "MDS dimensions must be between 1 and {}, got {}",
            n - 1,
            dims
        )));
    }
    if top == 0 {
        return Err(DaError::InvalidParameter("MDS top must be positive".to_string()));
    }

    let complete: Vec<usize> = (0..matrix.n_features())
        .filter(|&i| (0..n).all(|j| matrix.is_observed(i, j) && matrix.get(i, j).is_finite()))
        .collect();
    if complete.len() < 2 {
        return Err(DaError::EmptyData(
            "MDS needs at least two features observed in every sample".to_string(),
        ));
    }
    let top = top.min(complete.len());
    if top < complete.len() {
        log::debug!("MDS uses top {} of {} complete features per pair", top, complete.len());
    }

    let pairs: Vec<(usize, usize)> = (0..n)
        .flat_map(|a| ((a + 1)..n).map(move |b| (a, b)))
        .collect();
    let pair_distances: Vec<f64> = pairs
        .par_iter()
        .map(|&(a, b)| {
            let mut sq: Vec<f64> = complete
                .iter()
                .map(|&i| {
                    let d = matrix.get(i, a) - matrix.get(i, b);
                    d * d
                })
                .collect();
            sq.sort_by(|x, y| y.total_cmp(x));
            (sq[..top].iter().sum::<f64>() / top as f64).sqrt()
        })
        .collect();

    let mut distances = DMatrix::zeros(n, n);
    for (&(a, b), &d) in pairs.iter().zip(&pair_distances) {
        distances[(a, b)] = d;
        distances[(b, a)] = d;
    }

    // B = -1/2 J D² J
    let d2 = distances.map(|d| d * d);
    let row_means: Vec<f64> = (0..n).map(|i| d2.row(i).mean()).collect();
    let grand_mean = d2.mean();
    let b = DMatrix::from_fn(n, n, |i, j| {
        -0.5 * (d2[(i, j)] - row_means[i] - row_means[j] + grand_mean)
    });

    let eigen = SymmetricEigen::new(b);
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&x, &y| eigen.eigenvalues[y].total_cmp(&eigen.eigenvalues[x]));

    let positive_mass: f64 = eigen.eigenvalues.iter().filter(|&&l| l > EIGEN_EPS).sum();
    let mut coordinates = DMatrix::zeros(n, dims);
    let mut variance_explained = Vec::with_capacity(dims);
    for (d, &k) in order.iter().take(dims).enumerate() {
        let lambda = eigen.eigenvalues[k];
        let scale = if lambda > EIGEN_EPS { lambda.sqrt() } else { 0.0 };
        for i in 0..n {
            coordinates[(i, d)] = eigen.eigenvectors[(i, k)] * scale;
        }
        variance_explained.push(if positive_mass > 0.0 && lambda > EIGEN_EPS {
            lambda / positive_mass
        } else {
            0.0
        });
    }

    Ok(MdsResult {
        sample_ids: matrix.sample_ids.clone(),
        coordinates,
        variance_explained,
        distances,
        top,
        n_features_used: complete.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn matrix(data: DMatrix<f64>) -> ExpressionMatrix {
        let features = (0..data.nrows()).map(|i| format!("P{}", i)).collect();
        let samples = (0..data.ncols()).map(|j| format!("S{}", j)).collect();
        ExpressionMatrix::from_values(data, features, samples, "log2").unwrap()
    }

    /// Two groups of three samples separated by 4 log units on half the features.
    fn two_groups() -> ExpressionMatrix {
        matrix(DMatrix::from_fn(20, 6, |i, j| {
            let base = 20.0 + (i as f64 * 0.37).sin();
            let jitter = 0.05 * ((i * 7 + j * 3) % 5) as f64;
            let shift = if j >= 3 && i < 10 { 4.0 } else { 0.0 };
            base + jitter + shift
        }))
    }

    #[test]
    fn test_groups_separate_on_first_dimension() {
        let result = mds(&two_groups(), 500, 2).unwrap();
        assert_eq!(result.dims(), 2);
        assert_eq!(result.top, 20);

        let first: Vec<f64> = (0..6).map(|i| result.coordinate(i, 0)).collect();
        let sign_a = first[0].signum();
        assert!(first[..3].iter().all(|c| c.signum() == sign_a));
        assert!(first[3..].iter().all(|c| c.signum() == -sign_a));
        assert!(result.variance_explained[0] > 0.8);
        assert!(result.variance_explained[0] >= result.variance_explained[1]);
    }

    #[test]
    fn test_distances_use_leading_differences() {
        // S1 differs from S0 by 3 on one feature and 1 on another.
        let m = matrix(DMatrix::from_row_slice(3, 3, &[
            10.0, 13.0, 10.0,
            10.0, 11.0, 10.0,
            10.0, 10.0, 10.0,
        ]));
        let result = mds(&m, 1, 1).unwrap();
        assert_relative_eq!(result.distances[(0, 1)], 3.0, epsilon = 1e-12);

        let result = mds(&m, 2, 1).unwrap();
        assert_relative_eq!(result.distances[(0, 1)], 5.0f64.sqrt(), epsilon = 1e-12);
        assert_relative_eq!(result.distances[(0, 2)], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_embedding_reproduces_distances() {
        let result = mds(&two_groups(), 500, 5).unwrap();
        for a in 0..6 {
            for b in 0..6 {
                let row_a = result.coordinates.row(a);
                let row_b = result.coordinates.row(b);
                let embedded = (row_a - row_b).norm();
                // Using every feature makes the distances Euclidean.
                assert_relative_eq!(embedded, result.distances[(a, b)], epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn test_invalid_parameters() {
        let m = two_groups();
        assert!(mds(&m, 500, 0).is_err());
        assert!(mds(&m, 500, 6).is_err());
        assert!(mds(&m, 0, 2).is_err());

        let n = f64::NAN;
        let sparse = matrix(DMatrix::from_row_slice(2, 3, &[1.0, n, 2.0, 3.0, 4.0, n]));
        assert!(matches!(mds(&sparse, 500, 1), Err(DaError::EmptyData(_))));
    }
}
