use std::fmt::Write as _;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use clap::ValueEnum;

use crate::engine::{Engine, EngineError, EngineFactory, TestOutcome};
use crate::matrix::Submatrix;

/// How the R driver invokes `DBF.test`. The CRAN version of the function
/// reads a global `n` before defining it; `compat` assigns
/// `n <- length(genotypes)` into the global environment before every call to
/// keep that version working. `standard` omits the workaround.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EngineKind {
    Compat,
    Standard,
}

impl EngineKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EngineKind::Compat => "compat",
            EngineKind::Standard => "standard",
        }
    }
}

/// R program handed to `Rscript -e`. It sources the user's script, then
/// answers tab-separated requests on stdin: `INIT` stores the distance
/// matrix, `TEST` runs `DBF.test` for one dosage vector. Every request gets
/// exactly one reply line; computation errors become `ERR` replies instead
/// of killing the child.
const DRIVER: &str = r#"
args <- commandArgs(trailingOnly = TRUE)
source(args[[1]])
compat <- identical(args[[2]], "compat")
input <- file("stdin", open = "r")
distances <- NULL
repeat {
  line <- readLines(input, n = 1)
  if (length(line) == 0) break
  fields <- strsplit(line, "\t", fixed = TRUE)[[1]]
  if (fields[[1]] == "INIT") {
    size <- as.integer(fields[[2]])
    values <- as.numeric(strsplit(fields[[3]], ",", fixed = TRUE)[[1]])
    distances <- matrix(values, nrow = size, byrow = TRUE)
    cat("OK\n")
  } else if (fields[[1]] == "TEST") {
    genotypes <- as.integer(strsplit(fields[[2]], ",", fixed = TRUE)[[1]])
    if (compat) {
      assign("n", length(genotypes), envir = globalenv())
    }
    reply <- tryCatch({
      result <- DBF.test(distances, genotypes, nrow(distances))
      sprintf("OK\t%.17g\t%.17g", result[["dbf.statistic"]], result[["dbf.p.value"]])
    }, error = function(e) {
      sprintf("ERR\t%s", gsub("[\t\r\n]+", " ", conditionMessage(e)))
    })
    cat(reply, "\n", sep = "")
  } else {
    cat("ERR\tunknown request\n")
  }
  flush(stdout())
}
"#;

/// Builds one `Rscript` child per worker.
#[derive(Debug, Clone)]
pub struct RscriptEngineFactory {
    script: PathBuf,
    kind: EngineKind,
}

impl RscriptEngineFactory {
    pub fn new(script: impl Into<PathBuf>, kind: EngineKind) -> Self {
        Self {
            script: script.into(),
            kind,
        }
    }
}

impl EngineFactory for RscriptEngineFactory {
    fn create(&self, matrix: &Submatrix) -> Result<Box<dyn Engine>, EngineError> {
        Ok(Box::new(RscriptEngine::spawn(
            &self.script,
            self.kind,
            matrix,
        )?))
    }
}

/// One long-lived `Rscript` child speaking the driver protocol. The child's
/// stderr is inherited so R diagnostics reach the user directly.
pub struct RscriptEngine {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: BufReader<ChildStdout>,
    reply: String,
}

impl RscriptEngine {
    pub fn spawn(
        script: &Path,
        kind: EngineKind,
        matrix: &Submatrix,
    ) -> Result<Self, EngineError> {
        let mut child = Command::new("Rscript")
            .arg("--vanilla")
            .arg("-e")
            .arg(DRIVER)
            .arg(script)
            .arg(kind.as_str())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(EngineError::Spawn)?;

        tracing::debug!(
            pid = child.id(),
            script = %script.display(),
            mode = kind.as_str(),
            "started Rscript engine"
        );

        let stdin = child.stdin.take().expect("stdin was piped");
        let stdout = BufReader::new(child.stdout.take().expect("stdout was piped"));
        let mut engine = Self {
            child,
            stdin: Some(stdin),
            stdout,
            reply: String::new(),
        };

        engine.send(&format_init(matrix))?;
        let reply = engine.read_reply()?;
        if reply != "OK" {
            return Err(EngineError::Protocol { reply });
        }
        Ok(engine)
    }

    fn send(&mut self, request: &str) -> Result<(), EngineError> {
        let stdin = self.stdin.as_mut().ok_or(EngineError::Exited)?;
        stdin.write_all(request.as_bytes())?;
        Ok(())
    }

    fn read_reply(&mut self) -> Result<String, EngineError> {
        self.reply.clear();
        let n = self.stdout.read_line(&mut self.reply)?;
        if n == 0 {
            return Err(EngineError::Exited);
        }
        Ok(self.reply.trim_end().to_string())
    }
}

impl Engine for RscriptEngine {
    fn compute(&mut self, genotypes: &[u8]) -> Result<TestOutcome, EngineError> {
        self.send(&format_test(genotypes))?;
        let reply = self.read_reply()?;
        parse_reply(&reply)
    }
}

impl Drop for RscriptEngine {
    fn drop(&mut self) {
        // Closing stdin ends the driver loop; the child then exits on its own.
        self.stdin.take();
        match self.child.wait() {
            Ok(status) if !status.success() => {
                tracing::debug!(%status, "Rscript engine exited with nonzero status");
            }
            Err(error) => {
                tracing::warn!(%error, "failed to wait for Rscript engine");
            }
            Ok(_) => {}
        }
    }
}

fn format_init(matrix: &Submatrix) -> String {
    let mut line = String::with_capacity(8 + matrix.values().len() * 8);
    let _ = write!(line, "INIT\t{}\t", matrix.len());
    for (i, value) in matrix.values().iter().enumerate() {
        if i > 0 {
            line.push(',');
        }
        let _ = write!(line, "{value}");
    }
    line.push('\n');
    line
}

fn format_test(genotypes: &[u8]) -> String {
    let mut line = String::with_capacity(6 + genotypes.len() * 2);
    line.push_str("TEST\t");
    for (i, dosage) in genotypes.iter().enumerate() {
        if i > 0 {
            line.push(',');
        }
        let _ = write!(line, "{dosage}");
    }
    line.push('\n');
    line
}

fn parse_reply(line: &str) -> Result<TestOutcome, EngineError> {
    let (tag, rest) = line.split_once('\t').unwrap_or((line, ""));
    match tag {
        "OK" => {
            let Some((statistic, p_value)) = rest.split_once('\t') else {
                return Err(EngineError::Protocol {
                    reply: line.to_string(),
                });
            };
            let parsed = statistic
                .parse()
                .and_then(|s| p_value.parse().map(|p| (s, p)));
            match parsed {
                Ok((statistic, p_value)) => Ok(TestOutcome {
                    statistic,
                    p_value,
                }),
                Err(_) => Err(EngineError::Protocol {
                    reply: line.to_string(),
                }),
            }
        }
        "ERR" => Err(EngineError::Computation {
            message: rest.to_string(),
        }),
        _ => Err(EngineError::Protocol {
            reply: line.to_string(),
        }),
    }
}
