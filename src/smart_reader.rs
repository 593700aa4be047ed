use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use flate2::read::MultiGzDecoder;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Opens an input file for line-oriented reading, transparently decoding
/// gzip when the magic bytes are present. Every input this tool reads (VCF,
/// distance matrix, name mapping) goes through here.
pub fn open_input(path: &Path) -> io::Result<Box<dyn BufRead + Send>> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);

    let header = reader.fill_buf()?;
    if header.len() >= 2 && header[..2] == GZIP_MAGIC {
        tracing::debug!(input = %path.display(), "detected gzip-compressed input");
        // MultiGzDecoder handles concatenated members, so BGZF also works
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(reader))))
    } else {
        Ok(Box::new(reader))
    }
}
