#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let input = String::from_utf8_lossy(data);

    // INFO score extraction must never panic, whatever the field soup
    if let Ok((maf, r2)) = dbf_test::filter::parse_info_scores(&input) {
        // Parsed values come straight from f64::parse; they may be anything
        // numeric, but they must exist
        let _ = (maf, r2);
    }

    // Same for genotype coding; dosages are 0..=2 when coding succeeds
    for call in input.split(':') {
        if let Some(dosage) = dbf_test::filter::code_genotype(call) {
            assert!(dosage <= 2, "dosage out of range");
        }
    }
});
