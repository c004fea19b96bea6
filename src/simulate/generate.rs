//! Synthetic intensity generation with known ground truth.
//!
//! Log2 abundances follow the model the moderated t-test assumes: each
//! feature has its own mean, a residual variance drawn from a scaled
//! inverse-χ² prior, and (for differential features) a fixed shift in the
//! treatment group. Values are returned on the raw intensity scale with
//! missing entries set to the sentinel.

use crate::data::{IntensityMatrix, Metadata, ResultTable, MISSING_SENTINEL};
use crate::error::Result;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Configuration for synthetic data generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub name: String,
    pub n_features: usize,
    pub n_samples_per_group: usize,
    /// Number of truly differential features.
    pub n_differential: usize,
    /// Log2 fold change for differential features.
    pub effect_size: f64,
    /// Prior degrees of freedom of residual variances; infinite gives
    /// every feature the same variance.
    pub prior_df: f64,
    /// Prior residual standard deviation on the log2 scale.
    pub prior_sd: f64,
    /// Mean log2 intensity across features.
    pub mean_log2: f64,
    /// Spread of feature means on the log2 scale.
    pub feature_sd: f64,
    /// Probability that an entry is replaced by the missing sentinel.
    pub missing_fraction: f64,
    pub seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            name: "synthetic".to_string(),
            n_features: 500,
            n_samples_per_group: 4,
            n_differential: 50,
            effect_size: 1.5,
            prior_df: 4.0,
            prior_sd: 0.3,
            mean_log2: 22.0,
            feature_sd: 2.0,
            missing_fraction: 0.0,
            seed: 42,
        }
    }
}

impl SimulationConfig {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn with_dimensions(mut self, n_features: usize, n_samples_per_group: usize) -> Self {
        self.n_features = n_features;
        self.n_samples_per_group = n_samples_per_group;
        self
    }

    pub fn with_differential(mut self, n: usize, effect_size: f64) -> Self {
        self.n_differential = n;
        self.effect_size = effect_size;
        self
    }

    pub fn with_variance_prior(mut self, prior_df: f64, prior_sd: f64) -> Self {
        self.prior_df = prior_df;
        self.prior_sd = prior_sd;
        self
    }

    pub fn with_missing(mut self, fraction: f64) -> Self {
        self.missing_fraction = fraction.clamp(0.0, 0.99);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    // Preset configurations

    /// Complete data, moderate heterogeneity.
    pub fn ideal() -> Self {
        Self::new("ideal").with_variance_prior(4.0, 0.3)
    }

    /// Three samples per group, the usual proteomics pilot.
    pub fn small_n() -> Self {
        Self::new("small_n")
            .with_dimensions(500, 3)
            .with_differential(50, 2.0)
    }

    /// Identical variances for every feature.
    pub fn homogeneous() -> Self {
        Self::new("homogeneous").with_variance_prior(f64::INFINITY, 0.3)
    }

    /// One in five values not detected.
    pub fn heavy_missing() -> Self {
        Self::new("heavy_missing").with_missing(0.2)
    }
}

/// Direction of effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Higher in treatment.
    Up,
    /// Lower in treatment.
    Down,
}

/// Ground truth for a synthetic dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroundTruth {
    pub differential_features: Vec<String>,
    /// True log2 fold changes, treatment minus control.
    pub true_log2fc: HashMap<String, f64>,
    pub directions: HashMap<String, Direction>,
    /// True residual standard deviation per feature.
    pub true_sd: HashMap<String, f64>,
    pub null_features: Vec<String>,
}

impl GroundTruth {
    pub fn is_differential(&self, feature_id: &str) -> bool {
        self.true_log2fc.contains_key(feature_id)
    }

    /// True log2 fold change (0.0 for null features).
    pub fn get_log2fc(&self, feature_id: &str) -> f64 {
        self.true_log2fc.get(feature_id).copied().unwrap_or(0.0)
    }

    /// Score calls at an adjusted p-value threshold for one contrast.
    pub fn evaluate(&self, results: &ResultTable, contrast: &str, alpha: f64) -> Evaluation {
        let mut eval = Evaluation {
            alpha,
            ..Default::default()
        };
        for r in results.for_contrast(contrast) {
            let called = r.is_significant_at(alpha);
            match (called, self.is_differential(&r.feature_id)) {
                (true, true) => eval.true_positives += 1,
                (true, false) => eval.false_positives += 1,
                (false, true) => eval.false_negatives += 1,
                (false, false) => eval.true_negatives += 1,
            }
        }
        let calls = eval.true_positives + eval.false_positives;
        eval.false_discovery_proportion = if calls == 0 {
            0.0
        } else {
            eval.false_positives as f64 / calls as f64
        };
        let positives = eval.true_positives + eval.false_negatives;
        eval.power = if positives == 0 {
            0.0
        } else {
            eval.true_positives as f64 / positives as f64
        };
        eval
    }

    pub fn to_tsv(&self) -> String {
        let mut lines = vec!["feature_id\ttrue_log2fc\tdirection\ttrue_sd\tis_differential".to_string()];

        let sd = |feat: &str| self.true_sd.get(feat).copied().unwrap_or(f64::NAN);
        for feat in &self.differential_features {
            let dir = match self.directions.get(feat) {
                Some(Direction::Up) => "up",
                Some(Direction::Down) => "down",
                None => "none",
            };
            lines.push(format!(
                "{}\t{:.4}\t{}\t{:.4}\ttrue",
                feat,
                self.get_log2fc(feat),
                dir,
                sd(feat)
            ));
        }
        for feat in &self.null_features {
            lines.push(format!("{}\t0.0\tnone\t{:.4}\tfalse", feat, sd(feat)));
        }

        lines.join("\n")
    }
}

/// Confusion counts of a set of calls against the truth.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Evaluation {
    pub alpha: f64,
    pub true_positives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
    pub true_negatives: usize,
    pub false_discovery_proportion: f64,
    pub power: f64,
}

/// Result of synthetic data generation.
#[derive(Debug, Clone)]
pub struct SyntheticData {
    pub intensities: IntensityMatrix,
    /// One categorical column `group` with levels `control` and `treatment`.
    pub metadata: Metadata,
    pub ground_truth: GroundTruth,
    pub config: SimulationConfig,
}

impl SyntheticData {
    /// Write intensities, metadata, ground truth and config to a directory.
    pub fn write_to_dir(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;

        self.intensities.to_tsv(dir.join("intensities.tsv"))?;
        std::fs::write(dir.join("metadata.tsv"), self.metadata_to_tsv())?;
        std::fs::write(dir.join("ground_truth.tsv"), self.ground_truth.to_tsv())?;
        std::fs::write(dir.join("config.yaml"), serde_yaml::to_string(&self.config)?)?;

        Ok(())
    }

    fn metadata_to_tsv(&self) -> String {
        let mut lines = vec!["sample_id\tgroup".to_string()];
        for sample_id in self.metadata.sample_ids() {
            let group = self
                .metadata
                .get(sample_id, "group")
                .and_then(|v| v.as_categorical())
                .unwrap_or("NA");
            lines.push(format!("{}\t{}", sample_id, group));
        }
        lines.join("\n")
    }
}

/// Simple deterministic RNG (xorshift64).
struct Rng {
    state: u64,
}

impl Rng {
    fn new(seed: u64) -> Self {
        Self { state: seed.max(1) }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() as f64) / (u64::MAX as f64)
    }

    /// Box-Muller normal draw.
    fn next_normal(&mut self, mean: f64, std: f64) -> f64 {
        let u1 = self.next_f64().max(1e-10);
        let u2 = self.next_f64();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        mean + std * z
    }

    /// Marsaglia-Tsang gamma draw; boosts shape below 1.
    fn next_gamma(&mut self, shape: f64, scale: f64) -> f64 {
        if shape < 1.0 {
            let u = self.next_f64().max(1e-10);
            return self.next_gamma(shape + 1.0, scale) * u.powf(1.0 / shape);
        }

        let d = shape - 1.0 / 3.0;
        let c = 1.0 / (9.0 * d).sqrt();
        loop {
            let x = self.next_normal(0.0, 1.0);
            let v = (1.0 + c * x).powi(3);
            if v <= 0.0 {
                continue;
            }
            let u = self.next_f64();
            if u < 1.0 - 0.0331 * x.powi(4) || u.ln() < 0.5 * x.powi(2) + d * (1.0 - v + v.ln()) {
                return d * v * scale;
            }
        }
    }

    fn next_chisq(&mut self, df: f64) -> f64 {
        self.next_gamma(df / 2.0, 2.0)
    }

    fn shuffle<T>(&mut self, vec: &mut [T]) {
        for i in (1..vec.len()).rev() {
            let j = (self.next_u64() as usize) % (i + 1);
            vec.swap(i, j);
        }
    }
}

/// Generate synthetic intensities with known ground truth.
pub fn generate_synthetic(config: &SimulationConfig) -> Result<SyntheticData> {
    let mut rng = Rng::new(config.seed);

    let n_features = config.n_features;
    let n_per_group = config.n_samples_per_group;
    let n_samples = n_per_group * 2;
    let n_diff = config.n_differential.min(n_features);

    let feature_ids: Vec<String> = (0..n_features).map(|i| format!("PROT_{:05}", i)).collect();
    let sample_ids: Vec<String> = (0..n_samples).map(|i| format!("S{:03}", i)).collect();
    let groups: Vec<String> = (0..n_samples)
        .map(|i| if i < n_per_group { "control" } else { "treatment" }.to_string())
        .collect();

    let mut order: Vec<usize> = (0..n_features).collect();
    rng.shuffle(&mut order);
    let mut effects = vec![0.0; n_features];
    for (k, &idx) in order[..n_diff].iter().enumerate() {
        effects[idx] = if k % 2 == 0 { config.effect_size } else { -config.effect_size };
    }

    let s0_sq = config.prior_sd * config.prior_sd;
    let sds: Vec<f64> = (0..n_features)
        .map(|_| {
            if config.prior_df.is_finite() {
                (s0_sq * config.prior_df / rng.next_chisq(config.prior_df)).sqrt()
            } else {
                config.prior_sd
            }
        })
        .collect();

    let mut data = DMatrix::zeros(n_features, n_samples);
    for i in 0..n_features {
        let mu = rng.next_normal(config.mean_log2, config.feature_sd);
        for j in 0..n_samples {
            let shift = if j >= n_per_group { effects[i] } else { 0.0 };
            let log2_value = rng.next_normal(mu + shift, sds[i]);
            data[(i, j)] = if rng.next_f64() < config.missing_fraction {
                MISSING_SENTINEL
            } else {
                log2_value.exp2()
            };
        }
    }

    let mut ground_truth = GroundTruth {
        differential_features: Vec::with_capacity(n_diff),
        true_log2fc: HashMap::new(),
        directions: HashMap::new(),
        true_sd: HashMap::new(),
        null_features: Vec::with_capacity(n_features - n_diff),
    };
    for (i, id) in feature_ids.iter().enumerate() {
        ground_truth.true_sd.insert(id.clone(), sds[i]);
        if effects[i] == 0.0 {
            ground_truth.null_features.push(id.clone());
            continue;
        }
        ground_truth.differential_features.push(id.clone());
        ground_truth.true_log2fc.insert(id.clone(), effects[i]);
        let dir = if effects[i] > 0.0 { Direction::Up } else { Direction::Down };
        ground_truth.directions.insert(id.clone(), dir);
    }

    let intensities = IntensityMatrix::new(data, feature_ids, sample_ids.clone())?;
    let metadata = Metadata::from_columns(sample_ids, vec![("group".to_string(), groups)])?;
    log::debug!(
        "Simulated {} features x {} samples ({} differential)",
        n_features,
        n_samples,
        n_diff
    );

    Ok(SyntheticData {
        intensities,
        metadata,
        ground_truth,
        config: config.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::{mean, sample_variance};

    #[test]
    fn test_default_config() {
        let config = SimulationConfig::default();
        assert_eq!(config.n_features, 500);
        assert_eq!(config.n_samples_per_group, 4);
        assert_eq!(config.seed, 42);
        assert!(SimulationConfig::homogeneous().prior_df.is_infinite());
    }

    #[test]
    fn test_generate_synthetic() {
        let config = SimulationConfig::new("test")
            .with_dimensions(50, 5)
            .with_differential(6, 1.0)
            .with_seed(12345);

        let data = generate_synthetic(&config).unwrap();

        assert_eq!(data.intensities.n_features(), 50);
        assert_eq!(data.intensities.n_samples(), 10);
        assert_eq!(data.ground_truth.differential_features.len(), 6);
        assert_eq!(data.ground_truth.null_features.len(), 44);
        assert_eq!(data.metadata.levels("group").unwrap(), vec!["control", "treatment"]);

        let up = data
            .ground_truth
            .directions
            .values()
            .filter(|&&d| d == Direction::Up)
            .count();
        assert_eq!(up, 3);
    }

    #[test]
    fn test_deterministic_generation() {
        let config = SimulationConfig::new("test").with_dimensions(30, 3).with_seed(999);
        let data1 = generate_synthetic(&config).unwrap();
        let data2 = generate_synthetic(&config).unwrap();

        assert_eq!(
            data1.ground_truth.differential_features,
            data2.ground_truth.differential_features
        );
        for feat in 0..5 {
            for sample in 0..6 {
                assert_eq!(data1.intensities.get(feat, sample), data2.intensities.get(feat, sample));
            }
        }
    }

    #[test]
    fn test_missing_fraction() {
        let count_missing = |fraction: f64| {
            let data = generate_synthetic(
                &SimulationConfig::new("m")
                    .with_dimensions(200, 5)
                    .with_missing(fraction)
                    .with_seed(7),
            )
            .unwrap();
            let m = &data.intensities;
            let observed: usize = (0..m.n_features()).map(|i| m.n_observed(i)).sum();
            1.0 - observed as f64 / (m.n_features() * m.n_samples()) as f64
        };

        assert_eq!(count_missing(0.0), 0.0);
        let heavy = count_missing(0.3);
        assert!((heavy - 0.3).abs() < 0.05, "missing fraction {:.3}", heavy);
    }

    #[test]
    fn test_homogeneous_variances() {
        let data = generate_synthetic(&SimulationConfig::homogeneous().with_dimensions(20, 3)).unwrap();
        for sd in data.ground_truth.true_sd.values() {
            assert_eq!(*sd, 0.3);
        }
    }

    #[test]
    fn test_variances_follow_prior() {
        let config = SimulationConfig::new("prior")
            .with_dimensions(4000, 2)
            .with_variance_prior(10.0, 0.5)
            .with_seed(3);
        let data = generate_synthetic(&config).unwrap();
        let variances: Vec<f64> = data.ground_truth.true_sd.values().map(|s| s * s).collect();

        // Scaled inverse chi-square with d0 = 10: mean s0² d0 / (d0 - 2).
        let expected_mean = 0.25 * 10.0 / 8.0;
        assert!((mean(&variances) - expected_mean).abs() < 0.03);
        assert!(sample_variance(&variances) > 0.0);
    }

    #[test]
    fn test_ground_truth_tsv() {
        let config = SimulationConfig::new("test")
            .with_dimensions(20, 3)
            .with_differential(3, 1.0)
            .with_seed(42);

        let data = generate_synthetic(&config).unwrap();
        let tsv = data.ground_truth.to_tsv();

        assert!(tsv.starts_with("feature_id\ttrue_log2fc"));
        assert_eq!(tsv.lines().count(), 21);
        assert_eq!(tsv.lines().filter(|l| l.ends_with("\ttrue")).count(), 3);
    }

    #[test]
    fn test_write_to_dir() {
        let dir = tempfile::tempdir().unwrap();
        let data = generate_synthetic(&SimulationConfig::new("w").with_dimensions(10, 3)).unwrap();
        data.write_to_dir(dir.path()).unwrap();

        let reloaded = IntensityMatrix::from_tsv(dir.path().join("intensities.tsv")).unwrap();
        assert_eq!(reloaded.n_features(), 10);
        let meta = Metadata::from_tsv(dir.path().join("metadata.tsv")).unwrap();
        assert_eq!(meta.n_samples(), 6);
        assert!(dir.path().join("config.yaml").exists());
    }
}
