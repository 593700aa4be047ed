use std::io::Write;
use std::path::PathBuf;

use thiserror::Error;

use crate::engine::{EngineError, EngineFactory};
use crate::filter::{SiteFilter, SiteValidationError, Verdict};
use crate::matrix::{DistanceMatrix, MatrixError};
use crate::output::ResultWriter;
use crate::pool::{Dispatcher, PoolError, TaskResult};
use crate::samples::{self, MappingError, NameMapping, SampleMismatchError};
use crate::smart_reader;
use crate::vcf;

const PROGRESS_INTERVAL: u64 = 100_000;

/// Configuration for one run, minus the engine factory and the output
/// destination, which the caller supplies separately.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub distance_matrix: PathBuf,
    pub genotypes: PathBuf,
    pub name_mapping: Option<PathBuf>,
    pub name_column_matrix: String,
    pub name_column_genotypes: String,
    pub permissive: bool,
    pub min_r2: f64,
    pub min_maf: f64,
    pub threads: usize,
    pub positions: bool,
    pub head: Option<i64>,
}

/// Counters for the run. `records_read` covers every data record in the
/// genotype file; the others partition what happened to them.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub records_read: u64,
    pub accepted: u64,
    pub skipped: u64,
    pub monomorphic: u64,
    pub engine_failures: u64,
    pub rows_emitted: u64,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to read the distance matrix: {0}")]
    Matrix(#[from] MatrixError),
    #[error("failed to read the name mapping: {0}")]
    Mapping(#[from] MappingError),
    #[error(transparent)]
    SampleMismatch(#[from] SampleMismatchError),
    #[error("failed to read the genotype file: {0}")]
    Vcf(#[from] vcf::ParseError),
    #[error("{0}; use --permissive to skip such sites")]
    Site(SiteValidationError),
    #[error("DBF.test failed at {chrom}:{pos} ({snp}): {source}")]
    Engine {
        chrom: String,
        pos: u64,
        snp: String,
        #[source]
        source: EngineError,
    },
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Runs the whole pipeline: load and validate inputs, resolve the cohort,
/// stream records through the filter into the worker pool, and write result
/// rows in input order.
///
/// In permissive mode invalid sites and per-site engine failures are logged
/// and counted. Otherwise the first one ends the run: rows for sites ahead
/// of it in the input are still emitted, nothing at or after it is, and the
/// in-flight work is drained before the error is returned.
pub fn run_pipeline<W: Write>(
    config: &PipelineConfig,
    factory: &dyn EngineFactory,
    out: W,
) -> Result<RunSummary, PipelineError> {
    tracing::info!(
        matrix = %config.distance_matrix.display(),
        genotypes = %config.genotypes.display(),
        threads = config.threads,
        permissive = config.permissive,
        "starting DBF run",
    );

    let matrix = DistanceMatrix::load(&config.distance_matrix)?;
    tracing::info!(samples = matrix.len(), "loaded distance matrix");

    let mapping = match &config.name_mapping {
        Some(path) => {
            let mapping = NameMapping::load(
                path,
                &config.name_column_matrix,
                &config.name_column_genotypes,
            )?;
            tracing::info!(entries = mapping.len(), "loaded name mapping");
            Some(mapping)
        }
        None => None,
    };

    let input = smart_reader::open_input(&config.genotypes)?;
    let mut reader = vcf::Reader::new(input);
    let vcf_samples = reader.read_header()?;
    let resolved = samples::resolve_samples(&matrix, &vcf_samples, mapping.as_ref())?;
    tracing::info!(samples = resolved.len(), "resolved analyzed samples");

    let submatrix = matrix.submatrix(&resolved.matrix_names)?;

    let mut writer = ResultWriter::new(out, config.positions);
    writer.write_header()?;

    let mut summary = RunSummary::default();
    let mut budget = match config.head {
        Some(n) if n <= 0 => {
            writer.flush()?;
            return Ok(summary);
        }
        Some(n) => Some(n as u64),
        None => None,
    };

    let filter = SiteFilter::new(&resolved, config.min_r2, config.min_maf, config.permissive);
    let mut dispatcher = Dispatcher::new(config.threads.max(1), factory, &submatrix)?;

    let mut ready: Vec<TaskResult> = Vec::new();
    let mut seq = 0u64;
    let mut budget_spent = false;
    let mut fatal: Option<PipelineError> = None;

    for record in &mut reader {
        let record = match record {
            Ok(record) => record,
            Err(error) => {
                // Malformed input is fatal in both modes; rows already in
                // flight are still drained and emitted below.
                fatal = Some(error.into());
                break;
            }
        };
        summary.records_read += 1;
        if summary.records_read % PROGRESS_INTERVAL == 0 {
            tracing::info!(records = summary.records_read, at = %record.id, "progress");
        }

        match filter.evaluate(&record, seq) {
            Verdict::Accepted(task) => {
                seq += 1;
                summary.accepted += 1;
                dispatcher.submit(task, &mut ready)?;
                if emit_ready(&mut writer, &mut summary, &mut budget, config.permissive, &mut ready)? {
                    budget_spent = true;
                    break;
                }
            }
            Verdict::Skipped(error) => {
                summary.skipped += 1;
                tracing::warn!(error = %error, "skipping invalid site");
            }
            Verdict::Monomorphic => {
                summary.monomorphic += 1;
                tracing::debug!(snp = %record.id, "skipping monomorphic site");
            }
            Verdict::Fatal(error) => {
                fatal = Some(PipelineError::Site(error));
                break;
            }
        }
    }

    dispatcher.finish(&mut ready)?;
    if budget_spent {
        // Results finished after the budget was spent are dropped without
        // touching the counters.
        ready.clear();
    } else {
        emit_ready(&mut writer, &mut summary, &mut budget, config.permissive, &mut ready)?;
    }

    writer.flush()?;
    if let Some(error) = fatal {
        return Err(error);
    }
    Ok(summary)
}

/// Writes released results in order until the row budget runs out. Returns
/// true when it does; the rest of `ready` is dropped. Engine failures are
/// counted and either logged (permissive) or returned as the terminal error.
fn emit_ready<W: Write>(
    writer: &mut ResultWriter<W>,
    summary: &mut RunSummary,
    budget: &mut Option<u64>,
    permissive: bool,
    ready: &mut Vec<TaskResult>,
) -> Result<bool, PipelineError> {
    for result in ready.drain(..) {
        match result.outcome {
            Ok(outcome) => {
                writer.write_row(&result.meta, &outcome)?;
                summary.rows_emitted += 1;
                if let Some(left) = budget {
                    *left -= 1;
                    if *left == 0 {
                        return Ok(true);
                    }
                }
            }
            Err(error) => {
                summary.engine_failures += 1;
                if permissive {
                    tracing::warn!(
                        chrom = %result.meta.chrom,
                        pos = result.meta.pos,
                        snp = %result.meta.snp,
                        error = %error,
                        "engine failed for site; skipping",
                    );
                } else {
                    return Err(PipelineError::Engine {
                        chrom: result.meta.chrom,
                        pos: result.meta.pos,
                        snp: result.meta.snp,
                        source: error,
                    });
                }
            }
        }
    }
    Ok(false)
}
