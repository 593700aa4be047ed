use std::fs::File;
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt};

use crate::pipeline::{self, PipelineConfig, PipelineError, RunSummary};
use crate::report::{EngineInfo, FilterInfo, InputInfo, RunReport, Statistics};
use crate::rscript::{EngineKind, RscriptEngineFactory};

#[derive(Debug, Parser)]
#[command(author, version, about = "Distance-based F test between a sample distance matrix and VCF genotypes", long_about = None)]
struct Cli {
    /// Square distance matrix CSV with sample names on both axes
    #[arg(long, value_name = "CSV")]
    distance_matrix: PathBuf,

    /// VCF genotype file, plain or gzip-compressed
    #[arg(long, value_name = "VCF")]
    genotypes: PathBuf,

    /// R script defining DBF.test
    #[arg(
        long,
        env = "DBF_TEST_SCRIPT",
        default_value = "DBF_test.R",
        value_name = "SCRIPT"
    )]
    dbf_test_script: PathBuf,

    /// How the R driver invokes DBF.test
    #[arg(long, value_enum, default_value_t = EngineKind::Compat)]
    engine: EngineKind,

    /// CSV translating genotype sample names to distance-matrix sample names
    #[arg(long, value_name = "CSV")]
    name_mapping: Option<PathBuf>,

    /// Mapping column holding the matrix-side names
    #[arg(long, default_value = "SampleID", value_name = "COLUMN")]
    name_column_matrix: String,

    /// Mapping column holding the genotype-side names
    #[arg(long, default_value = "IND_ID", value_name = "COLUMN")]
    name_column_genotypes: String,

    /// Skip sites that fail validation or DBF.test instead of terminating
    #[arg(long)]
    permissive: bool,

    /// Keep sites whose R2 is strictly greater than this value
    #[arg(long, default_value_t = 0.4, value_name = "R2")]
    min_r2: f64,

    /// Keep sites whose MAF is at least this value
    #[arg(long, default_value_t = 0.01, value_name = "MAF")]
    min_maf: f64,

    /// Number of worker threads computing the statistic
    #[arg(long, default_value_t = 1, value_name = "N")]
    threads: usize,

    /// Prepend CHROM and POS columns to the results table
    #[arg(long)]
    positions: bool,

    /// Emit only the first N result rows, then stop reading
    #[arg(long, value_name = "N", allow_negative_numbers = true)]
    head: Option<i64>,

    /// Write the results table to a file instead of stdout
    #[arg(long, value_name = "TSV")]
    output: Option<PathBuf>,

    /// Write a JSON run report to this path on success
    #[arg(long, value_name = "JSON")]
    report: Option<PathBuf>,

    /// Logging verbosity (e.g. error, warn, info, debug)
    #[arg(long, default_value = "info")]
    log_level: String,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    if cli.threads == 0 {
        anyhow::bail!("--threads must be at least 1");
    }

    require_file(&cli.distance_matrix, "distance matrix")?;
    require_file(&cli.genotypes, "genotype file")?;
    require_file(&cli.dbf_test_script, "DBF test script")?;
    if let Some(mapping) = &cli.name_mapping {
        require_file(mapping, "name mapping")?;
    }

    let config = PipelineConfig {
        distance_matrix: cli.distance_matrix.clone(),
        genotypes: cli.genotypes.clone(),
        name_mapping: cli.name_mapping.clone(),
        name_column_matrix: cli.name_column_matrix.clone(),
        name_column_genotypes: cli.name_column_genotypes.clone(),
        permissive: cli.permissive,
        min_r2: cli.min_r2,
        min_maf: cli.min_maf,
        threads: cli.threads,
        positions: cli.positions,
        head: cli.head,
    };
    let factory = RscriptEngineFactory::new(&cli.dbf_test_script, cli.engine);

    let outcome = match &cli.output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            pipeline::run_pipeline(&config, &factory, BufWriter::new(file))
        }
        None => pipeline::run_pipeline(&config, &factory, io::stdout().lock()),
    };

    let summary = match outcome {
        Ok(summary) => summary,
        Err(err) => {
            if let PipelineError::Io(io_err) = &err
                && io_err.kind() == io::ErrorKind::BrokenPipe
            {
                tracing::error!("output pipe closed before all results were written");
            }
            return Err(err.into());
        }
    };

    log_summary(&summary);

    if let Some(path) = &cli.report {
        let report = RunReport {
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: RunReport::timestamp_now(),
            input: InputInfo {
                distance_matrix: cli.distance_matrix.to_string_lossy().to_string(),
                genotypes: cli.genotypes.to_string_lossy().to_string(),
                name_mapping: cli
                    .name_mapping
                    .as_ref()
                    .map(|p| p.to_string_lossy().to_string()),
            },
            engine: EngineInfo {
                script: cli.dbf_test_script.to_string_lossy().to_string(),
                mode: cli.engine.as_str().to_string(),
            },
            filters: FilterInfo {
                min_r2: cli.min_r2,
                min_maf: cli.min_maf,
                permissive: cli.permissive,
            },
            threads: cli.threads,
            statistics: Statistics::from(&summary),
        };
        report
            .write(path)
            .with_context(|| format!("failed to write run report to {}", path.display()))?;
    }

    Ok(())
}

fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init()
        .ok();
    Ok(())
}

fn require_file(path: &Path, what: &str) -> Result<()> {
    if !path.is_file() {
        anyhow::bail!("{what} not found: {}", path.display());
    }
    Ok(())
}

fn log_summary(summary: &RunSummary) {
    tracing::info!(
        "Processed {read} records; emitted {emitted} result rows ({accepted} sites tested).",
        read = summary.records_read,
        emitted = summary.rows_emitted,
        accepted = summary.accepted,
    );

    if summary.skipped > 0 {
        tracing::info!(
            "Skipped {count} sites that failed validation or filtering.",
            count = summary.skipped
        );
    }

    if summary.monomorphic > 0 {
        tracing::info!(
            "Skipped {count} monomorphic sites.",
            count = summary.monomorphic
        );
    }

    if summary.engine_failures > 0 {
        tracing::warn!(
            "DBF.test failed on {count} sites.",
            count = summary.engine_failures
        );
    }
}
