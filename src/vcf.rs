use std::io::{self, BufRead};

use thiserror::Error;

/// One VCF data record, kept close to the raw text: INFO, FORMAT, and the
/// per-sample fields are not decomposed here. Site admission does that work
/// and owns the associated failure semantics.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub chrom: String,
    pub pos: u64,
    pub id: String,
    pub reference: String,
    pub alternate: String,
    pub info: String,
    pub format: String,
    /// Raw sample columns, in header order.
    pub genotypes: Vec<String>,
}

#[derive(Debug, Error)]
#[error("line {line}: {kind}")]
pub struct ParseError {
    pub line: u64,
    #[source]
    pub kind: ParseErrorKind,
}

#[derive(Debug, Error)]
pub enum ParseErrorKind {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("missing #CHROM header line")]
    MissingHeader,
    #[error("no samples in the VCF header")]
    NoSamples,
    #[error("expected {expected} tab-separated fields, found {found}")]
    FieldCount { expected: usize, found: usize },
    #[error("invalid position {value:?}")]
    InvalidPosition { value: String },
}

/// Streaming VCF reader. `read_header` must run first; the iterator then
/// yields one record per data line and validates the field count against the
/// header's sample count.
pub struct Reader<R> {
    inner: R,
    line: u64,
    samples: Option<usize>,
    buf: String,
}

impl<R: BufRead> Reader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            line: 0,
            samples: None,
            buf: String::new(),
        }
    }

    /// Skips `##` meta lines, parses the `#CHROM` line, and returns the
    /// sample names in column order.
    pub fn read_header(&mut self) -> Result<Vec<String>, ParseError> {
        loop {
            if !self.fill_line()? {
                return Err(self.error(ParseErrorKind::MissingHeader));
            }
            let text = trimmed(&self.buf);
            if text.starts_with("##") {
                continue;
            }
            if !text.starts_with("#CHROM") {
                return Err(self.error(ParseErrorKind::MissingHeader));
            }
            let names: Vec<String> = text.split('\t').skip(9).map(str::to_string).collect();
            if names.is_empty() {
                return Err(self.error(ParseErrorKind::NoSamples));
            }
            self.samples = Some(names.len());
            return Ok(names);
        }
    }

    fn fill_line(&mut self) -> Result<bool, ParseError> {
        self.buf.clear();
        self.line += 1;
        match self.inner.read_line(&mut self.buf) {
            Ok(0) => Ok(false),
            Ok(_) => Ok(true),
            Err(e) => Err(self.error(ParseErrorKind::Io(e))),
        }
    }

    fn error(&self, kind: ParseErrorKind) -> ParseError {
        ParseError {
            line: self.line,
            kind,
        }
    }
}

impl<R: BufRead> Iterator for Reader<R> {
    type Item = Result<Record, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.fill_line() {
            Ok(false) => None,
            Ok(true) => Some(parse_record(trimmed(&self.buf), self.samples, self.line)),
            Err(e) => Some(Err(e)),
        }
    }
}

fn trimmed(line: &str) -> &str {
    line.trim_end_matches(['\n', '\r'])
}

fn parse_record(text: &str, samples: Option<usize>, line: u64) -> Result<Record, ParseError> {
    let fields: Vec<&str> = text.split('\t').collect();
    let expected = 9 + samples.unwrap_or(1);
    let enough = match samples {
        Some(n) => fields.len() == 9 + n,
        None => fields.len() >= 10,
    };
    if !enough {
        return Err(ParseError {
            line,
            kind: ParseErrorKind::FieldCount {
                expected,
                found: fields.len(),
            },
        });
    }

    let pos: u64 = fields[1].parse().map_err(|_| ParseError {
        line,
        kind: ParseErrorKind::InvalidPosition {
            value: fields[1].to_string(),
        },
    })?;

    Ok(Record {
        chrom: fields[0].to_string(),
        pos,
        id: fields[2].to_string(),
        reference: fields[3].to_string(),
        alternate: fields[4].to_string(),
        info: fields[7].to_string(),
        format: fields[8].to_string(),
        genotypes: fields[9..].iter().map(|s| s.to_string()).collect(),
    })
}
