//! mda - moderated differential abundance CLI
//!
//! Command-line interface for limma-style moderated t-tests on proteomics
//! intensity matrices.

use clap::{Parser, Subcommand, ValueEnum};
use log::{info, LevelFilter};
use moderated_da::correct::AdjustMethod;
use moderated_da::data::{IntensityMatrix, Metadata, ResultTable};
use moderated_da::error::Result;
use moderated_da::pipeline::{Pipeline, PipelineConfig};
use moderated_da::preprocess::{as_log_scale, log_transform, LogTransformConfig, MissingPolicy};
use moderated_da::profile::{mds, profile_missingness, profile_samples, MissingnessProfile, SampleProfile};
use moderated_da::simulate::{generate_synthetic, SimulationConfig};
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
    Yaml,
}

/// Moderated differential abundance analysis
#[derive(Parser)]
#[command(name = "mda")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a pipeline from a YAML configuration file
    Run {
        /// Path to pipeline configuration YAML
        #[arg(short, long)]
        config: PathBuf,

        /// Path to intensity matrix TSV
        #[arg(short, long)]
        intensities: PathBuf,

        /// Path to metadata TSV
        #[arg(short, long)]
        metadata: PathBuf,

        /// Output path for results TSV
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Log2, filter, median-normalize and test one contrast
    Quick {
        /// Path to intensity matrix TSV
        #[arg(short, long)]
        intensities: PathBuf,

        /// Path to metadata TSV
        #[arg(short, long)]
        metadata: PathBuf,

        /// Model formula (e.g. "~ 0 + group")
        #[arg(short, long)]
        formula: String,

        /// Contrast of coefficients (e.g. "grouptreatment - groupcontrol")
        #[arg(short = 't', long)]
        contrast: String,

        /// Output path for results TSV
        #[arg(short, long)]
        output: PathBuf,

        /// Minimum fraction of samples in which a protein is observed
        #[arg(long, default_value = "0.7")]
        min_observed: f64,

        /// Intensities are already on a log scale
        #[arg(long)]
        no_log: bool,

        /// Skip median normalization
        #[arg(long)]
        no_normalize: bool,

        /// Fit missing values as NaN on observed samples instead of zero
        #[arg(long)]
        propagate_missing: bool,
    },

    /// Profile missingness and sample distributions
    Profile {
        /// Path to intensity matrix TSV
        #[arg(short, long)]
        intensities: PathBuf,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,

        /// Intensities are already on a log scale
        #[arg(long)]
        no_log: bool,
    },

    /// Classical MDS coordinates of samples
    Mds {
        /// Path to intensity matrix TSV
        #[arg(short, long)]
        intensities: PathBuf,

        /// Output path for coordinates TSV
        #[arg(short, long)]
        output: PathBuf,

        /// Number of leading fold changes per sample pair
        #[arg(long, default_value = "500")]
        top: usize,

        /// Number of dimensions
        #[arg(long, default_value = "2")]
        dims: usize,

        /// Intensities are already on a log scale
        #[arg(long)]
        no_log: bool,
    },

    /// Write an example pipeline configuration
    Example {
        /// Output path for YAML
        #[arg(short, long, default_value = "pipeline.yaml")]
        output: PathBuf,
    },

    /// Generate a synthetic dataset with ground truth
    Simulate {
        /// Output directory
        #[arg(short, long)]
        output_dir: PathBuf,

        /// Number of proteins
        #[arg(long, default_value = "500")]
        n_features: usize,

        /// Samples per group
        #[arg(long, default_value = "4")]
        n_per_group: usize,

        /// Number of differential proteins
        #[arg(long, default_value = "50")]
        n_differential: usize,

        /// Log2 fold change of differential proteins
        #[arg(long, default_value = "1.5")]
        effect_size: f64,

        /// Fraction of values set to missing
        #[arg(long, default_value = "0.0")]
        missing: f64,

        /// Random seed
        #[arg(long, default_value = "42")]
        seed: u64,
    },
}

fn main() {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp(None)
        .init();

    let result = match cli.command {
        Commands::Run {
            config,
            intensities,
            metadata,
            output,
        } => cmd_run(&config, &intensities, &metadata, &output),

        Commands::Quick {
            intensities,
            metadata,
            formula,
            contrast,
            output,
            min_observed,
            no_log,
            no_normalize,
            propagate_missing,
        } => cmd_quick(
            &intensities,
            &metadata,
            &formula,
            &contrast,
            &output,
            QuickOptions {
                min_observed,
                no_log,
                no_normalize,
                propagate_missing,
            },
        ),

        Commands::Profile {
            intensities,
            format,
            no_log,
        } => cmd_profile(&intensities, format, no_log),

        Commands::Mds {
            intensities,
            output,
            top,
            dims,
            no_log,
        } => cmd_mds(&intensities, &output, top, dims, no_log),

        Commands::Example { output } => cmd_example(&output),

        Commands::Simulate {
            output_dir,
            n_features,
            n_per_group,
            n_differential,
            effect_size,
            missing,
            seed,
        } => {
            let config = SimulationConfig::new("cli")
                .with_dimensions(n_features, n_per_group)
                .with_differential(n_differential, effect_size)
                .with_missing(missing)
                .with_seed(seed);
            cmd_simulate(&config, &output_dir)
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn load_inputs(intensities: &Path, metadata: &Path) -> Result<(IntensityMatrix, Metadata)> {
    info!("Loading data...");
    let matrix = IntensityMatrix::from_tsv(intensities)?;
    let metadata = Metadata::from_tsv(metadata)?;
    info!(
        "Loaded {} proteins x {} samples",
        matrix.n_features(),
        matrix.n_samples()
    );
    Ok((matrix, metadata))
}

fn report(results: &ResultTable, output: &Path) -> Result<()> {
    info!("Writing results to {:?}...", output);
    results.to_tsv(output)?;

    eprintln!(
        "Done! {} tests (prior df {:.2}, prior var {:.4e})",
        results.len(),
        results.prior_df,
        results.prior_var
    );
    eprint!("{}", results.summary());

    let top = results.top(5);
    if !top.is_empty() {
        eprintln!("\nTop 5 hits:");
        for r in top {
            eprintln!(
                "  {} [{}]: logFC={:.3}, t={:.2}, adj.P={:.4}, B={:.2}",
                r.feature_id, r.contrast, r.log_fc, r.t, r.adj_p_value, r.b
            );
        }
    }
    Ok(())
}

fn cmd_run(config_path: &Path, intensities: &Path, metadata: &Path, output: &Path) -> Result<()> {
    info!("Loading pipeline configuration from {:?}...", config_path);
    let config_str = std::fs::read_to_string(config_path)?;
    let config = PipelineConfig::from_yaml(&config_str)?;

    let (matrix, metadata) = load_inputs(intensities, metadata)?;

    info!("Running pipeline '{}'...", config.name);
    let results = Pipeline::from_config(&config).run(&matrix, &metadata)?;
    report(&results, output)
}

struct QuickOptions {
    min_observed: f64,
    no_log: bool,
    no_normalize: bool,
    propagate_missing: bool,
}

fn cmd_quick(
    intensities: &Path,
    metadata: &Path,
    formula: &str,
    contrast: &str,
    output: &Path,
    options: QuickOptions,
) -> Result<()> {
    let (matrix, metadata) = load_inputs(intensities, metadata)?;

    info!("Formula: {}", formula);
    info!("Contrast: {}", contrast);
    info!("Minimum observed: {:.0}%", options.min_observed * 100.0);

    let missing = if options.propagate_missing {
        MissingPolicy::Propagate
    } else {
        MissingPolicy::ZeroFill
    };
    if options.no_log && options.propagate_missing {
        log::warn!("--propagate-missing has no effect with --no-log; zeros are treated as values");
    }

    let mut pipeline = Pipeline::new().name("moderated-t");
    if !options.no_log {
        pipeline = pipeline.log_transform(LogTransformConfig {
            missing,
            ..Default::default()
        });
    }
    pipeline = pipeline.filter_missingness(options.min_observed);
    if !options.no_normalize {
        pipeline = pipeline.normalize_median();
    }
    let results = pipeline
        .model_lm(formula)
        .contrast(contrast)
        .ebayes()
        .adjust(AdjustMethod::BenjaminiHochberg)
        .run(&matrix, &metadata)?;

    report(&results, output)
}

#[derive(Serialize)]
struct DataProfile {
    n_features: usize,
    n_samples: usize,
    missingness: MissingnessProfile,
    samples: SampleProfile,
}

fn cmd_profile(intensities: &Path, format: OutputFormat, no_log: bool) -> Result<()> {
    info!("Loading intensity matrix...");
    let matrix = IntensityMatrix::from_tsv(intensities)?;

    let expression = if no_log {
        as_log_scale(&matrix, MissingPolicy::Propagate)?
    } else {
        log_transform(
            &matrix,
            &LogTransformConfig {
                missing: MissingPolicy::Propagate,
                ..Default::default()
            },
        )?
    };
    let profile = DataProfile {
        n_features: matrix.n_features(),
        n_samples: matrix.n_samples(),
        missingness: profile_missingness(&matrix),
        samples: profile_samples(&expression),
    };

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&profile)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(&profile)?),
        OutputFormat::Text => {
            println!("Data Profile");
            println!("============");
            println!();
            println!("Dimensions:");
            println!("  Proteins: {}", profile.n_features);
            println!("  Samples:  {}", profile.n_samples);
            println!();
            print!("{}", profile.missingness);
            println!();
            print!("{}", profile.samples);
        }
    }

    Ok(())
}

fn cmd_mds(intensities: &Path, output: &Path, top: usize, dims: usize, no_log: bool) -> Result<()> {
    let matrix = IntensityMatrix::from_tsv(intensities)?;
    let expression = if no_log {
        as_log_scale(&matrix, MissingPolicy::Propagate)?
    } else {
        log_transform(
            &matrix,
            &LogTransformConfig {
                missing: MissingPolicy::Propagate,
                ..Default::default()
            },
        )?
    };

    let result = mds(&expression, top, dims)?;
    std::fs::write(output, result.to_tsv())?;

    eprintln!(
        "MDS on {} complete proteins (top {} per pair)",
        result.n_features_used, result.top
    );
    for (d, v) in result.variance_explained.iter().enumerate() {
        eprintln!("  dim{}: {:.1}%", d + 1, v * 100.0);
    }
    eprintln!("Wrote coordinates to {:?}", output);
    Ok(())
}

fn cmd_example(output: &Path) -> Result<()> {
    let pipeline = Pipeline::new()
        .name("example-moderated-t")
        .log2()
        .filter_missingness(0.7)
        .normalize_median()
        .model_lm("~ 0 + group")
        .contrast("grouptreatment - groupcontrol")
        .ebayes()
        .adjust(AdjustMethod::BenjaminiHochberg);

    let config = pipeline.to_config(Some(
        "Example limma-style moderated t-test for label-free proteomics",
    ));
    let yaml = config.to_yaml()?;

    std::fs::write(output, &yaml)?;
    eprintln!("Wrote example pipeline to {:?}", output);
    eprintln!();
    eprintln!("Contents:");
    println!("{}", yaml);

    Ok(())
}

fn cmd_simulate(config: &SimulationConfig, output_dir: &Path) -> Result<()> {
    let data = generate_synthetic(config)?;
    data.write_to_dir(output_dir)?;
    eprintln!(
        "Wrote {} proteins x {} samples ({} differential) to {:?}",
        data.intensities.n_features(),
        data.intensities.n_samples(),
        data.ground_truth.differential_features.len(),
        output_dir
    );
    Ok(())
}
