#![no_main]

use libfuzzer_sys::fuzz_target;
use std::io::Cursor;

fuzz_target!(|data: &[u8]| {
    let mut reader = dbf_test::vcf::Reader::new(Cursor::new(data));

    // Random input rarely has a usable header; either way, neither header
    // parsing nor record iteration may panic.
    let _ = reader.read_header();
    for result in reader.take(1000) {
        match result {
            Ok(record) => {
                // Exercise the fields the pipeline reads
                let _ = record.genotypes.len();
                let _ = format!("{}:{} {}", record.chrom, record.pos, record.id);
            }
            Err(_) => {
                // Parse errors are expected for random input
            }
        }
    }
});
