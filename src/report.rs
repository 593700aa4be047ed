//! Structured run report for downstream tool consumption.
//!
//! Writes a JSON file alongside the results containing all metadata
//! about the run: inputs, engine configuration, filters, statistics.

use serde::Serialize;
use std::path::Path;

use crate::pipeline::RunSummary;

/// Complete report of a test run.
/// Serialized to JSON at the path given by `--report`.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Tool version
    pub version: String,
    /// Timestamp of run (ISO 8601)
    pub timestamp: String,

    /// Input configuration
    pub input: InputInfo,
    /// R engine configuration
    pub engine: EngineInfo,
    /// Site filter thresholds
    pub filters: FilterInfo,

    /// Number of worker threads used
    pub threads: usize,

    /// Run statistics
    pub statistics: Statistics,
}

#[derive(Debug, Clone, Serialize)]
pub struct InputInfo {
    pub distance_matrix: String,
    pub genotypes: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name_mapping: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineInfo {
    pub script: String,
    pub mode: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FilterInfo {
    pub min_r2: f64,
    pub min_maf: f64,
    pub permissive: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Statistics {
    pub records_read: u64,
    pub accepted: u64,
    pub skipped: u64,
    pub monomorphic: u64,
    pub engine_failures: u64,
    pub rows_emitted: u64,
}

impl From<&RunSummary> for Statistics {
    fn from(s: &RunSummary) -> Self {
        Statistics {
            records_read: s.records_read,
            accepted: s.accepted,
            skipped: s.skipped,
            monomorphic: s.monomorphic,
            engine_failures: s.engine_failures,
            rows_emitted: s.rows_emitted,
        }
    }
}

impl RunReport {
    /// Write the report as pretty-printed JSON to the given path.
    pub fn write(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;

        std::fs::write(path, json)?;
        tracing::info!("Wrote run report to {}", path.display());

        Ok(())
    }

    pub fn timestamp_now() -> String {
        time::OffsetDateTime::now_utc()
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_else(|_| "unknown".to_string())
    }
}
