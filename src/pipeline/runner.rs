//! Pipeline runner for composing and executing analysis steps.

use crate::correct::{create_results, AdjustMethod};
use crate::data::{
    Contrast, DesignMatrix, ExpressionMatrix, Formula, IntensityMatrix, Metadata, ResultTable,
};
use crate::error::{DaError, Result};
use crate::model::{fit_contrasts, model_lm, LinearFit};
use crate::preprocess::{
    as_log_scale, filter_missingness, filter_missingness_groupwise, log_transform,
    normalize_median, GroupwiseLogic, LogTransformConfig, MissingPolicy,
};
use crate::test::{ebayes, EBayesConfig, EBayesFit};
use serde::{Deserialize, Serialize};

/// A step in the analysis pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PipelineStep {
    // === Preprocessing ===
    /// Log-transform raw intensities. Must come first when present.
    LogTransform(LogTransformConfig),
    /// Keep features observed in at least `min_fraction` of samples.
    FilterMissingness { min_fraction: f64 },
    /// Keep features observed often enough within groups.
    FilterMissingnessGroupwise {
        min_fraction: f64,
        group_column: String,
        logic: GroupwiseLogic,
    },
    /// Centre sample medians.
    NormalizeMedian,

    // === Model Fitting ===
    /// Fit the per-feature linear model.
    ModelLm { formula: String },
    /// Add a contrast of the fitted coefficients.
    Contrast { expression: String },

    // === Testing ===
    /// Empirical-Bayes moderation of all contrasts.
    EBayes(EBayesConfig),

    // === Multiple Testing Correction ===
    Adjust { method: AdjustMethod },
}

impl PipelineStep {
    fn label(&self) -> &'static str {
        match self {
            Self::LogTransform(_) => "LogTransform",
            Self::FilterMissingness { .. } => "FilterMissingness",
            Self::FilterMissingnessGroupwise { .. } => "FilterMissingnessGroupwise",
            Self::NormalizeMedian => "NormalizeMedian",
            Self::ModelLm { .. } => "ModelLm",
            Self::Contrast { .. } => "Contrast",
            Self::EBayes(_) => "EBayes",
            Self::Adjust { .. } => "Adjust",
        }
    }
}

/// Pipeline configuration for serialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub name: String,
    pub description: Option<String>,
    pub steps: Vec<PipelineStep>,
}

impl PipelineConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(DaError::from)
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(DaError::from)
    }
}

/// Builder for constructing and running analysis pipelines.
#[derive(Debug, Clone)]
pub struct Pipeline {
    steps: Vec<PipelineStep>,
    name: String,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipeline {
    pub fn new() -> Self {
        Self {
            steps: Vec::new(),
            name: "unnamed".to_string(),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            steps: config.steps.clone(),
            name: config.name.clone(),
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn steps(&self) -> &[PipelineStep] {
        &self.steps
    }

    /// Log2 transform with the default zero-fill policy.
    pub fn log2(self) -> Self {
        self.log_transform(LogTransformConfig::default())
    }

    pub fn log_transform(mut self, config: LogTransformConfig) -> Self {
        self.steps.push(PipelineStep::LogTransform(config));
        self
    }

    pub fn filter_missingness(mut self, min_fraction: f64) -> Self {
        self.steps.push(PipelineStep::FilterMissingness { min_fraction });
        self
    }

    pub fn filter_missingness_groupwise(
        mut self,
        min_fraction: f64,
        group_column: &str,
        logic: GroupwiseLogic,
    ) -> Self {
        self.steps.push(PipelineStep::FilterMissingnessGroupwise {
            min_fraction,
            group_column: group_column.to_string(),
            logic,
        });
        self
    }

    pub fn normalize_median(mut self) -> Self {
        self.steps.push(PipelineStep::NormalizeMedian);
        self
    }

    pub fn model_lm(mut self, formula: &str) -> Self {
        self.steps.push(PipelineStep::ModelLm {
            formula: formula.to_string(),
        });
        self
    }

    /// Add a contrast such as `"groupB - groupA"`. May be repeated.
    pub fn contrast(mut self, expression: &str) -> Self {
        self.steps.push(PipelineStep::Contrast {
            expression: expression.to_string(),
        });
        self
    }

    pub fn ebayes(self) -> Self {
        self.ebayes_with_config(EBayesConfig::default())
    }

    pub fn ebayes_with_config(mut self, config: EBayesConfig) -> Self {
        self.steps.push(PipelineStep::EBayes(config));
        self
    }

    pub fn adjust(mut self, method: AdjustMethod) -> Self {
        self.steps.push(PipelineStep::Adjust { method });
        self
    }

    pub fn to_config(&self, description: Option<&str>) -> PipelineConfig {
        PipelineConfig {
            name: self.name.clone(),
            description: description.map(String::from),
            steps: self.steps.clone(),
        }
    }

    /// Run the pipeline on raw intensities.
    ///
    /// Metadata is aligned to the matrix's sample order first; both must
    /// describe the same samples.
    pub fn run(&self, matrix: &IntensityMatrix, metadata: &Metadata) -> Result<ResultTable> {
        let metadata = metadata.align_to(matrix.sample_ids())?;
        let mut state = PipelineState::new(matrix.clone(), metadata);

        for (i, step) in self.steps.iter().enumerate() {
            log::debug!("Step {}: {}", i + 1, step.label());
            state = state.apply(step).map_err(|e| {
                log::debug!("Step {} ({}) failed: {}", i + 1, step.label(), e);
                e
            })?;
        }

        state.finalize(&self.name)
    }
}

/// Internal state during pipeline execution.
struct PipelineState {
    intensities: IntensityMatrix,
    metadata: Metadata,
    expression: Option<ExpressionMatrix>,
    fit: Option<LinearFit>,
    contrasts: Vec<Contrast>,
    moderated: Option<EBayesFit>,
    adjust: Option<AdjustMethod>,
}

impl PipelineState {
    fn new(intensities: IntensityMatrix, metadata: Metadata) -> Self {
        Self {
            intensities,
            metadata,
            expression: None,
            fit: None,
            contrasts: Vec::new(),
            moderated: None,
            adjust: None,
        }
    }

    /// Current log-scale matrix; raw values are taken as already logged
    /// when no transform step ran.
    fn expression(&mut self) -> Result<&ExpressionMatrix> {
        if self.expression.is_none() {
            log::info!("No LogTransform step; treating intensities as log-scale values");
            self.expression = Some(as_log_scale(&self.intensities, MissingPolicy::default())?);
        }
        self.expression
            .as_ref()
            .ok_or_else(|| DaError::Pipeline("Expression matrix not available".to_string()))
    }

    fn require_no_model(&self, step: &str) -> Result<()> {
        if self.fit.is_some() {
            return Err(DaError::Pipeline(format!(
                "{} must come before ModelLm",
                step
            )));
        }
        Ok(())
    }

    fn apply(mut self, step: &PipelineStep) -> Result<Self> {
        match step {
            // === Preprocessing ===
            PipelineStep::LogTransform(config) => {
                if self.expression.is_some() {
                    return Err(DaError::Pipeline(
                        "LogTransform must be the first data step".to_string(),
                    ));
                }
                self.expression = Some(log_transform(&self.intensities, config)?);
            }
            PipelineStep::FilterMissingness { min_fraction } => {
                self.require_no_model("FilterMissingness")?;
                let filtered = filter_missingness(self.expression()?, *min_fraction)?;
                self.expression = Some(filtered);
            }
            PipelineStep::FilterMissingnessGroupwise {
                min_fraction,
                group_column,
                logic,
            } => {
                self.require_no_model("FilterMissingnessGroupwise")?;
                let metadata = self.metadata.clone();
                let filtered = filter_missingness_groupwise(
                    self.expression()?,
                    &metadata,
                    group_column,
                    *min_fraction,
                    *logic,
                )?;
                self.expression = Some(filtered);
            }
            PipelineStep::NormalizeMedian => {
                self.require_no_model("NormalizeMedian")?;
                let normalized = normalize_median(self.expression()?)?;
                self.expression = Some(normalized);
            }

            // === Model Fitting ===
            PipelineStep::ModelLm { formula } => {
                if self.fit.is_some() {
                    return Err(DaError::Pipeline(
                        "Pipeline may contain only one ModelLm step".to_string(),
                    ));
                }
                let parsed = Formula::parse(formula)?;
                let design = DesignMatrix::from_formula(&self.metadata, &parsed)?;
                let fit = model_lm(self.expression()?, &design)?;
                self.fit = Some(fit);
            }
            PipelineStep::Contrast { expression } => {
                let fit = self.fit.as_ref().ok_or_else(|| {
                    DaError::Pipeline("Must fit model before defining contrasts".to_string())
                })?;
                if self.moderated.is_some() {
                    return Err(DaError::Pipeline(
                        "Contrasts must come before EBayes".to_string(),
                    ));
                }
                self.contrasts
                    .push(Contrast::parse(expression, &fit.coefficient_names)?);
            }

            // === Testing ===
            PipelineStep::EBayes(config) => {
                let fit = self.fit.as_ref().ok_or_else(|| {
                    DaError::Pipeline("Must fit model before EBayes".to_string())
                })?;
                if self.contrasts.is_empty() {
                    self.contrasts = default_contrasts(fit)?;
                }
                let contrast_fits = fit_contrasts(fit, &self.contrasts)?;
                self.moderated = Some(ebayes(fit, &contrast_fits, config)?);
            }

            // === Correction ===
            PipelineStep::Adjust { method } => {
                if self.moderated.is_none() {
                    return Err(DaError::Pipeline(
                        "Must run EBayes before p-value adjustment".to_string(),
                    ));
                }
                self.adjust = Some(*method);
            }
        }
        Ok(self)
    }

    fn finalize(self, method_name: &str) -> Result<ResultTable> {
        let moderated = self.moderated.ok_or_else(|| {
            DaError::Pipeline("Pipeline must include an EBayes step".to_string())
        })?;
        let method = self.adjust.unwrap_or_default();
        Ok(create_results(&moderated, method, method_name))
    }
}

/// One contrast per non-intercept coefficient.
fn default_contrasts(fit: &LinearFit) -> Result<Vec<Contrast>> {
    let n = fit.n_coefficients();
    let contrasts = fit
        .coefficient_names
        .iter()
        .enumerate()
        .filter(|(_, name)| name.as_str() != "(Intercept)")
        .map(|(i, name)| Contrast::coefficient(name, i, n))
        .collect::<Result<Vec<_>>>()?;
    if contrasts.is_empty() {
        return Err(DaError::Pipeline(
            "No contrasts given and the model has only an intercept".to_string(),
        ));
    }
    log::info!("No contrasts given; testing {} coefficients", contrasts.len());
    Ok(contrasts)
}

/// Log2, missingness filter, median normalization, one contrast, BH.
pub fn run_moderated_t(
    matrix: &IntensityMatrix,
    metadata: &Metadata,
    formula: &str,
    contrast: &str,
) -> Result<ResultTable> {
    Pipeline::new()
        .name("moderated-t")
        .log2()
        .filter_missingness(0.7)
        .normalize_median()
        .model_lm(formula)
        .contrast(contrast)
        .ebayes()
        .adjust(AdjustMethod::BenjaminiHochberg)
        .run(matrix, metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::ResultFlag;
    use std::io::Write;
    use tempfile::NamedTempFile;

    /// 12 proteins × 8 samples, alternating control/treatment.
    fn create_test_intensities() -> IntensityMatrix {
        let mut rows = Vec::new();
        for feat in 0..12 {
            let row: Vec<f64> = (0..8)
                .map(|sample| {
                    let is_treatment = sample % 2 == 1;
                    let base = 2f64.powf(16.0 + feat as f64 * 0.3);
                    let noise = 1.0 + 0.04 * (((feat * 5 + sample * 3) % 7) as f64 - 3.0);
                    let effect = if feat < 3 && is_treatment { 8.0 } else { 1.0 };
                    base * noise * effect
                })
                .collect();
            rows.push(row);
        }
        // Feature 10 rarely observed, feature 11 has one gap.
        for (sample, v) in rows[10].iter_mut().enumerate() {
            if sample > 1 {
                *v = 0.0;
            }
        }
        rows[11][4] = 0.0;

        let feature_ids = (0..12).map(|i| format!("P{}", i)).collect();
        let sample_ids = (0..8).map(|i| format!("S{}", i)).collect();
        IntensityMatrix::from_rows(&rows, feature_ids, sample_ids).unwrap()
    }

    fn create_test_metadata() -> Metadata {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "sample_id\tgroup\tage").unwrap();
        // Written in reverse to exercise alignment.
        for i in (0..8).rev() {
            let group = if i % 2 == 0 { "control" } else { "treatment" };
            writeln!(file, "S{}\t{}\t{}", i, group, 25 + i * 2).unwrap();
        }
        file.flush().unwrap();
        Metadata::from_tsv(file.path()).unwrap()
    }

    #[test]
    fn test_pipeline_builder() {
        let pipeline = Pipeline::new()
            .name("test")
            .log2()
            .filter_missingness(0.7)
            .normalize_median()
            .model_lm("~ group")
            .contrast("grouptreatment")
            .ebayes()
            .adjust(AdjustMethod::BenjaminiHochberg);

        let config = pipeline.to_config(Some("Test pipeline"));
        assert_eq!(config.steps.len(), 7);
        assert_eq!(config.name, "test");
        assert_eq!(config.description.as_deref(), Some("Test pipeline"));
    }

    #[test]
    fn test_pipeline_run() {
        let results = Pipeline::new()
            .name("test")
            .log2()
            .filter_missingness(0.7)
            .model_lm("~ group")
            .contrast("grouptreatment")
            .ebayes()
            .adjust(AdjustMethod::BenjaminiHochberg)
            .run(&create_test_intensities(), &create_test_metadata())
            .unwrap();

        // P10 is filtered out.
        assert_eq!(results.len(), 11);
        assert!(results.get_feature("P10", "grouptreatment").is_none());
        assert_eq!(results.method, "test");

        for r in results.iter() {
            assert!(r.p_value >= 0.0 && r.p_value <= 1.0);
            assert!(r.adj_p_value >= r.p_value - 1e-12 && r.adj_p_value <= 1.0);
        }

        // The three shifted proteins lead the ranking with log2 FC near 3.
        let top: Vec<&str> = results.top(3).iter().map(|r| r.feature_id.as_str()).collect();
        for id in ["P0", "P1", "P2"] {
            assert!(top.contains(&id), "{} missing from {:?}", id, top);
        }
        let p0 = results.get_feature("P0", "grouptreatment").unwrap();
        assert!((p0.log_fc - 3.0).abs() < 0.2);
    }

    #[test]
    fn test_cell_means_contrast() {
        let results = Pipeline::new()
            .log2()
            .model_lm("~ 0 + group")
            .contrast("grouptreatment - groupcontrol")
            .ebayes()
            .run(&create_test_intensities(), &create_test_metadata())
            .unwrap();

        assert_eq!(results.contrasts(), vec!["grouptreatment - groupcontrol"]);
        let p1 = results.get_feature("P1", "grouptreatment - groupcontrol").unwrap();
        assert!(p1.log_fc > 2.5);
    }

    #[test]
    fn test_default_contrasts_cover_coefficients() {
        let results = Pipeline::new()
            .log2()
            .filter_missingness(1.0)
            .model_lm("~ group + age")
            .ebayes()
            .run(&create_test_intensities(), &create_test_metadata())
            .unwrap();

        let mut contrasts = results.contrasts();
        contrasts.sort();
        assert_eq!(contrasts, vec!["age", "grouptreatment"]);
        assert_eq!(results.len(), 2 * 10);
    }

    #[test]
    fn test_propagate_missing_values() {
        let config = LogTransformConfig {
            missing: MissingPolicy::Propagate,
            ..Default::default()
        };
        let results = Pipeline::new()
            .log_transform(config)
            .model_lm("~ group")
            .contrast("grouptreatment")
            .ebayes()
            .run(&create_test_intensities(), &create_test_metadata())
            .unwrap();

        // P10 has one observation per group: no residual df left.
        let p10 = results.get_feature("P10", "grouptreatment").unwrap();
        assert!(p10.has_flag(ResultFlag::InsufficientObservations));
        let p11 = results.get_feature("P11", "grouptreatment").unwrap();
        assert!(!p11.has_flag(ResultFlag::InsufficientObservations));
        assert!(p11.p_value.is_finite());
    }

    #[test]
    fn test_pipeline_config_yaml() {
        let pipeline = Pipeline::new()
            .name("example")
            .log2()
            .filter_missingness_groupwise(0.5, "group", GroupwiseLogic::All)
            .normalize_median()
            .model_lm("~ 0 + group")
            .contrast("grouptreatment - groupcontrol")
            .ebayes()
            .adjust(AdjustMethod::BenjaminiHochberg);

        let config = pipeline.to_config(Some("Example moderated t pipeline"));
        let yaml = config.to_yaml().unwrap();

        let parsed = PipelineConfig::from_yaml(&yaml).unwrap();
        assert_eq!(parsed.name, "example");
        assert_eq!(parsed.steps, pipeline.steps());
    }

    #[test]
    fn test_yaml_defaults() {
        let yaml = "\
name: minimal
description: null
steps:
  - !LogTransform {}
  - !ModelLm
    formula: ~ group
  - !Contrast
    expression: grouptreatment
  - !EBayes
    proportion: 0.05
  - !Adjust
    method: fdr
";
        let config = PipelineConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.steps[0], PipelineStep::LogTransform(LogTransformConfig::default()));
        match &config.steps[3] {
            PipelineStep::EBayes(c) => {
                assert_eq!(c.proportion, 0.05);
                assert_eq!(c.stdev_coef_lim, (0.1, 4.0));
            }
            other => panic!("unexpected step {:?}", other),
        }
        assert_eq!(
            config.steps[4],
            PipelineStep::Adjust { method: AdjustMethod::BenjaminiHochberg }
        );

        let results = Pipeline::from_config(&config)
            .run(&create_test_intensities(), &create_test_metadata())
            .unwrap();
        assert_eq!(results.method, "minimal");
    }

    #[test]
    fn test_pipeline_ordering_errors() {
        let intensities = create_test_intensities();
        let metadata = create_test_metadata();

        let contrast_first = Pipeline::new()
            .contrast("grouptreatment")
            .model_lm("~ group")
            .run(&intensities, &metadata);
        assert!(matches!(contrast_first, Err(DaError::Pipeline(_))));

        let late_log = Pipeline::new()
            .normalize_median()
            .log2()
            .run(&intensities, &metadata);
        assert!(matches!(late_log, Err(DaError::Pipeline(_))));

        let filter_after_model = Pipeline::new()
            .log2()
            .model_lm("~ group")
            .filter_missingness(0.5)
            .run(&intensities, &metadata);
        assert!(matches!(filter_after_model, Err(DaError::Pipeline(_))));

        let no_test = Pipeline::new().log2().model_lm("~ group").run(&intensities, &metadata);
        assert!(matches!(no_test, Err(DaError::Pipeline(_))));

        let adjust_early = Pipeline::new()
            .log2()
            .model_lm("~ group")
            .adjust(AdjustMethod::Bonferroni)
            .run(&intensities, &metadata);
        assert!(matches!(adjust_early, Err(DaError::Pipeline(_))));
    }

    #[test]
    fn test_configuration_errors_keep_their_kind() {
        let intensities = create_test_intensities();
        let metadata = create_test_metadata();

        let unknown = Pipeline::new()
            .log2()
            .model_lm("~ group")
            .contrast("groupplacebo")
            .run(&intensities, &metadata);
        assert!(matches!(unknown, Err(DaError::InvalidContrast(_))));

        let missing_column = Pipeline::new()
            .log2()
            .model_lm("~ batch")
            .run(&intensities, &metadata);
        assert!(matches!(missing_column, Err(DaError::MissingColumn(_))));
    }

    #[test]
    fn test_sample_mismatch() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "sample_id\tgroup").unwrap();
        for i in 0..7 {
            writeln!(file, "S{}\t{}", i, if i % 2 == 0 { "a" } else { "b" }).unwrap();
        }
        file.flush().unwrap();
        let metadata = Metadata::from_tsv(file.path()).unwrap();

        let result = run_moderated_t(&create_test_intensities(), &metadata, "~ group", "groupb");
        assert!(matches!(result, Err(DaError::SampleMismatch(_))));
    }

    #[test]
    fn test_run_moderated_t() {
        let results = run_moderated_t(
            &create_test_intensities(),
            &create_test_metadata(),
            "~ group",
            "grouptreatment",
        )
        .unwrap();

        assert_eq!(results.method, "moderated-t");
        assert!(results.prior_var > 0.0);
        assert!(!results.significant(0.05).is_empty());
    }
}
