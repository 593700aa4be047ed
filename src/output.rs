use std::io::{self, Write};

use crate::engine::TestOutcome;
use crate::filter::SiteMeta;

/// Tab-separated results writer. One row per tested site; floats use Rust's
/// shortest round-trip formatting.
pub struct ResultWriter<W> {
    inner: W,
    positions: bool,
}

impl<W: Write> ResultWriter<W> {
    pub fn new(inner: W, positions: bool) -> Self {
        Self { inner, positions }
    }

    /// Writes the column header. Always called, even for runs that produce
    /// zero data rows.
    pub fn write_header(&mut self) -> io::Result<()> {
        if self.positions {
            write!(self.inner, "CHROM\tPOS\t")?;
        }
        writeln!(self.inner, "SNP\tA1\tA2\tA2_FREQ\tALL_MAF\tR2\tSTAT\tP")
    }

    pub fn write_row(&mut self, meta: &SiteMeta, outcome: &TestOutcome) -> io::Result<()> {
        if self.positions {
            write!(self.inner, "{}\t{}\t", meta.chrom, meta.pos)?;
        }
        writeln!(
            self.inner,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            meta.snp,
            meta.a1,
            meta.a2,
            meta.a2_freq,
            meta.maf,
            meta.r2,
            outcome.statistic,
            outcome.p_value,
        )
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
