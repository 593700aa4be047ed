use thiserror::Error;

use crate::samples::ResolvedSamples;
use crate::vcf::Record;

/// Everything about an admitted site that the output row needs, minus the
/// statistic itself. Travels with the task through the worker pool.
#[derive(Debug, Clone, PartialEq)]
pub struct SiteMeta {
    pub chrom: String,
    pub pos: u64,
    pub snp: String,
    pub a1: String,
    pub a2: String,
    pub a2_freq: f64,
    pub maf: f64,
    pub r2: f64,
}

/// A unit of work for the pool: dense sequence index, site metadata, and the
/// per-sample alternate-allele dosages in analyzed order.
#[derive(Debug, Clone, PartialEq)]
pub struct SiteTask {
    pub seq: u64,
    pub meta: SiteMeta,
    pub genotypes: Vec<u8>,
}

#[derive(Debug, Error)]
#[error("{kind} at {chrom}:{pos} ({snp})")]
pub struct SiteValidationError {
    pub chrom: String,
    pub pos: u64,
    pub snp: String,
    #[source]
    pub kind: SiteValidationKind,
}

#[derive(Debug, Error)]
pub enum SiteValidationKind {
    #[error("no GT field in the FORMAT column")]
    MissingGt,
    #[error("bad genotype {genotype:?} for sample {sample}")]
    BadGenotype { sample: String, genotype: String },
    #[error("invalid INFO field {field:?}")]
    InvalidInfo { field: String },
    #[error("missing MAF or R2 in INFO")]
    MissingScores,
    #[error("R2 {observed} is not above the minimum {minimum}")]
    LowR2 { observed: f64, minimum: f64 },
    #[error("MAF {observed} is below the minimum {minimum}")]
    LowMaf { observed: f64, minimum: f64 },
}

/// Outcome of evaluating one record. Monomorphic sites are skipped in both
/// modes; validation failures become skips in permissive mode and fatal
/// verdicts otherwise.
#[derive(Debug)]
pub enum Verdict {
    Accepted(SiteTask),
    Skipped(SiteValidationError),
    Monomorphic,
    Fatal(SiteValidationError),
}

pub struct SiteFilter {
    samples: Vec<String>,
    min_r2: f64,
    min_maf: f64,
    permissive: bool,
}

impl SiteFilter {
    pub fn new(samples: &ResolvedSamples, min_r2: f64, min_maf: f64, permissive: bool) -> Self {
        Self {
            samples: samples.vcf_names.clone(),
            min_r2,
            min_maf,
            permissive,
        }
    }

    /// Applies the admission rules in order: every genotype must code as a
    /// biallelic dosage, R2 must be strictly above the minimum, MAF at least
    /// the minimum. Sites passing all three but carrying a single distinct
    /// dosage are monomorphic and skipped.
    pub fn evaluate(&self, record: &Record, seq: u64) -> Verdict {
        match self.admit(record) {
            Ok((genotypes, maf, r2)) => {
                if is_monomorphic(&genotypes) {
                    return Verdict::Monomorphic;
                }
                let total: u64 = genotypes.iter().map(|&g| u64::from(g)).sum();
                let a2_freq = total as f64 / (2.0 * genotypes.len() as f64);
                Verdict::Accepted(SiteTask {
                    seq,
                    meta: SiteMeta {
                        chrom: record.chrom.clone(),
                        pos: record.pos,
                        snp: record.id.clone(),
                        a1: record.reference.clone(),
                        a2: record.alternate.clone(),
                        a2_freq,
                        maf,
                        r2,
                    },
                    genotypes,
                })
            }
            Err(kind) => {
                let error = SiteValidationError {
                    chrom: record.chrom.clone(),
                    pos: record.pos,
                    snp: record.id.clone(),
                    kind,
                };
                if self.permissive {
                    Verdict::Skipped(error)
                } else {
                    Verdict::Fatal(error)
                }
            }
        }
    }

    fn admit(&self, record: &Record) -> Result<(Vec<u8>, f64, f64), SiteValidationKind> {
        let gt_index = record
            .format
            .split(':')
            .position(|field| field == "GT")
            .ok_or(SiteValidationKind::MissingGt)?;

        let mut genotypes = Vec::with_capacity(record.genotypes.len());
        for (name, raw) in self.samples.iter().zip(&record.genotypes) {
            let call = raw.split(':').nth(gt_index).and_then(code_genotype);
            match call {
                Some(dosage) => genotypes.push(dosage),
                None => {
                    return Err(SiteValidationKind::BadGenotype {
                        sample: name.clone(),
                        genotype: raw.clone(),
                    });
                }
            }
        }

        let (maf, r2) = parse_info_scores(&record.info)?;
        if r2 <= self.min_r2 {
            return Err(SiteValidationKind::LowR2 {
                observed: r2,
                minimum: self.min_r2,
            });
        }
        if maf < self.min_maf {
            return Err(SiteValidationKind::LowMaf {
                observed: maf,
                minimum: self.min_maf,
            });
        }

        Ok((genotypes, maf, r2))
    }
}

/// Codes one GT call as an alternate-allele dosage. Only biallelic diploid
/// calls are recognized; anything else (multiallelic, missing, haploid)
/// fails coding.
pub fn code_genotype(call: &str) -> Option<u8> {
    match call {
        "0|0" | "0/0" => Some(0),
        "0|1" | "1|0" | "0/1" | "1/0" => Some(1),
        "1|1" | "1/1" => Some(2),
        _ => None,
    }
}

/// Pulls `MAF=` and `R2=` out of a raw INFO string. Both must be present and
/// numeric; when a key repeats, the last occurrence wins.
pub fn parse_info_scores(info: &str) -> Result<(f64, f64), SiteValidationKind> {
    let mut maf = None;
    let mut r2 = None;
    for field in info.split(';') {
        if let Some(value) = field.strip_prefix("MAF=") {
            maf = Some(parse_score(field, value)?);
        } else if let Some(value) = field.strip_prefix("R2=") {
            r2 = Some(parse_score(field, value)?);
        }
    }
    match (maf, r2) {
        (Some(maf), Some(r2)) => Ok((maf, r2)),
        _ => Err(SiteValidationKind::MissingScores),
    }
}

fn parse_score(field: &str, value: &str) -> Result<f64, SiteValidationKind> {
    value
        .parse()
        .map_err(|_| SiteValidationKind::InvalidInfo {
            field: field.to_string(),
        })
}

fn is_monomorphic(genotypes: &[u8]) -> bool {
    match genotypes.first() {
        Some(&first) => genotypes.iter().all(|&g| g == first),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(format: &str, info: &str, calls: &[&str]) -> Record {
        Record {
            chrom: "1".to_string(),
            pos: 100,
            id: "rs1".to_string(),
            reference: "A".to_string(),
            alternate: "T".to_string(),
            info: info.to_string(),
            format: format.to_string(),
            genotypes: calls.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn filter(min_r2: f64, min_maf: f64, permissive: bool, n: usize) -> SiteFilter {
        let names: Vec<String> = (0..n).map(|i| format!("s{i}")).collect();
        let resolved = ResolvedSamples {
            vcf_names: names.clone(),
            matrix_names: names,
        };
        SiteFilter::new(&resolved, min_r2, min_maf, permissive)
    }

    #[test]
    fn accepts_a_clean_site() {
        let f = filter(0.4, 0.01, false, 4);
        let rec = record("GT:DP", "R2=0.7;MAF=0.2", &["0|0:1", "0|1:2", "1|0:3", "1|1:4"]);
        match f.evaluate(&rec, 7) {
            Verdict::Accepted(task) => {
                assert_eq!(task.seq, 7);
                assert_eq!(task.genotypes, vec![0, 1, 1, 2]);
                assert_eq!(task.meta.a2_freq, 0.5);
                assert_eq!(task.meta.maf, 0.2);
                assert_eq!(task.meta.r2, 0.7);
                assert_eq!(task.meta.a1, "A");
                assert_eq!(task.meta.a2, "T");
            }
            other => panic!("unexpected verdict: {other:?}"),
        }
    }

    #[test]
    fn genotype_coding_table() {
        assert_eq!(code_genotype("0|0"), Some(0));
        assert_eq!(code_genotype("0/0"), Some(0));
        assert_eq!(code_genotype("0|1"), Some(1));
        assert_eq!(code_genotype("1|0"), Some(1));
        assert_eq!(code_genotype("0/1"), Some(1));
        assert_eq!(code_genotype("1/0"), Some(1));
        assert_eq!(code_genotype("1|1"), Some(2));
        assert_eq!(code_genotype("1/1"), Some(2));
        assert_eq!(code_genotype("1|2"), None);
        assert_eq!(code_genotype("./."), None);
        assert_eq!(code_genotype(".|."), None);
        assert_eq!(code_genotype("0"), None);
        assert_eq!(code_genotype(""), None);
    }

    #[test]
    fn missing_gt_field_is_rejected() {
        let f = filter(0.4, 0.01, true, 2);
        let rec = record("DP:PL", "R2=0.9;MAF=0.2", &["1:2", "3:4"]);
        match f.evaluate(&rec, 0) {
            Verdict::Skipped(err) => {
                assert!(matches!(err.kind, SiteValidationKind::MissingGt))
            }
            other => panic!("unexpected verdict: {other:?}"),
        }
    }

    #[test]
    fn multiallelic_call_fails_coding() {
        let f = filter(0.4, 0.01, false, 2);
        let rec = record("GT", "R2=0.9;MAF=0.2", &["0|0", "1|2"]);
        match f.evaluate(&rec, 0) {
            Verdict::Fatal(err) => match err.kind {
                SiteValidationKind::BadGenotype { sample, genotype } => {
                    assert_eq!(sample, "s1");
                    assert_eq!(genotype, "1|2");
                }
                other => panic!("unexpected kind: {other}"),
            },
            other => panic!("unexpected verdict: {other:?}"),
        }
    }

    #[test]
    fn sample_field_shorter_than_gt_index_fails() {
        let f = filter(0.4, 0.01, true, 2);
        let rec = record("DP:GT", "R2=0.9;MAF=0.2", &["1:0|0", "3"]);
        match f.evaluate(&rec, 0) {
            Verdict::Skipped(err) => {
                assert!(matches!(err.kind, SiteValidationKind::BadGenotype { .. }))
            }
            other => panic!("unexpected verdict: {other:?}"),
        }
    }

    #[test]
    fn info_scores_must_parse() {
        assert!(matches!(
            parse_info_scores("R2=abc;MAF=0.2"),
            Err(SiteValidationKind::InvalidInfo { .. })
        ));
        assert!(matches!(
            parse_info_scores("MAF=0.2"),
            Err(SiteValidationKind::MissingScores)
        ));
        assert!(matches!(
            parse_info_scores("DP=3"),
            Err(SiteValidationKind::MissingScores)
        ));
        assert_eq!(parse_info_scores("MAF=0.2;R2=0.9").unwrap(), (0.2, 0.9));
        assert_eq!(
            parse_info_scores("AC=2;R2=0.5;R2=0.9;MAF=0.1").unwrap(),
            (0.1, 0.9)
        );
    }

    #[test]
    fn r2_must_be_strictly_above_the_minimum() {
        let f = filter(0.4, 0.01, true, 2);
        let rec = record("GT", "R2=0.4;MAF=0.2", &["0|0", "0|1"]);
        match f.evaluate(&rec, 0) {
            Verdict::Skipped(err) => match err.kind {
                SiteValidationKind::LowR2 { observed, minimum } => {
                    assert_eq!(observed, 0.4);
                    assert_eq!(minimum, 0.4);
                }
                other => panic!("unexpected kind: {other}"),
            },
            other => panic!("unexpected verdict: {other:?}"),
        }
    }

    #[test]
    fn maf_at_the_minimum_is_accepted() {
        let f = filter(0.4, 0.01, false, 2);
        let rec = record("GT", "R2=0.9;MAF=0.01", &["0|0", "0|1"]);
        assert!(matches!(f.evaluate(&rec, 0), Verdict::Accepted(_)));

        let rec = record("GT", "R2=0.9;MAF=0.009", &["0|0", "0|1"]);
        match f.evaluate(&rec, 0) {
            Verdict::Fatal(err) => {
                assert!(matches!(err.kind, SiteValidationKind::LowMaf { .. }))
            }
            other => panic!("unexpected verdict: {other:?}"),
        }
    }

    #[test]
    fn monomorphic_site_is_skipped_in_both_modes() {
        for permissive in [false, true] {
            let f = filter(0.4, 0.01, permissive, 3);
            let rec = record("GT", "R2=0.9;MAF=0.2", &["1|1", "1|1", "1|1"]);
            assert!(matches!(f.evaluate(&rec, 0), Verdict::Monomorphic));
        }
    }

    #[test]
    fn coding_failure_beats_low_r2() {
        // Admission rules run in order, so the genotype problem is reported
        // even though R2 would also fail.
        let f = filter(0.4, 0.01, false, 2);
        let rec = record("GT", "R2=0.1;MAF=0.2", &["0|0", "2|2"]);
        match f.evaluate(&rec, 0) {
            Verdict::Fatal(err) => {
                assert!(matches!(err.kind, SiteValidationKind::BadGenotype { .. }))
            }
            other => panic!("unexpected verdict: {other:?}"),
        }
    }
}
