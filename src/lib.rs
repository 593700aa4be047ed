#![doc = include_str!("../README.md")]

pub mod cli;
pub mod engine;
pub mod filter;
pub mod matrix;
pub mod output;
pub mod pipeline;
pub mod pool;
pub mod report;
pub mod rscript;
pub mod samples;
pub mod smart_reader;
pub mod table;
pub mod vcf;

pub use pipeline::{PipelineConfig, PipelineError, RunSummary, run_pipeline};
