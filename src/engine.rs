use std::io;

use thiserror::Error;

use crate::matrix::Submatrix;

/// Statistic and p-value for one site.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TestOutcome {
    pub statistic: f64,
    pub p_value: f64,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to start the engine process: {0}")]
    Spawn(#[source] io::Error),
    #[error("engine I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("engine exited before replying")]
    Exited,
    #[error("malformed engine reply: {reply:?}")]
    Protocol { reply: String },
    #[error("DBF.test failed: {message}")]
    Computation { message: String },
}

/// A statistic engine. Implementations are not reentrant: `compute` takes
/// `&mut self` and each worker owns exactly one engine, so nothing here needs
/// internal locking. Dropping the engine releases whatever it holds (for the
/// Rscript engine, the child process).
pub trait Engine: Send {
    /// Runs the test for one site's dosage vector, in analyzed sample order.
    fn compute(&mut self, genotypes: &[u8]) -> Result<TestOutcome, EngineError>;
}

/// Builds one engine per worker. The aligned submatrix is handed over once
/// at construction and reused for every site the engine sees.
pub trait EngineFactory {
    fn create(&self, matrix: &Submatrix) -> Result<Box<dyn Engine>, EngineError>;
}
