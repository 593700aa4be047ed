use std::collections::{HashMap, HashSet};
use std::path::Path;

use thiserror::Error;

use crate::matrix::DistanceMatrix;
use crate::table::{NamedTable, TableError};

/// Translation from genotype-source sample ids to distance-matrix ids, for
/// cohorts where the two files use different naming schemes.
#[derive(Debug, Clone, Default)]
pub struct NameMapping {
    to_matrix: HashMap<String, String>,
}

#[derive(Debug, Error)]
pub enum MappingError {
    #[error(transparent)]
    Table(#[from] TableError),
    #[error("name mapping has no column named {name:?}")]
    MissingColumn { name: String },
    #[error("duplicate mapping for matrix sample {name:?}")]
    DuplicateMatrixName { name: String },
    #[error("duplicate mapping for genotype sample {name:?}")]
    DuplicateGenotypeName { name: String },
}

impl NameMapping {
    pub fn load(
        path: &Path,
        matrix_column: &str,
        genotype_column: &str,
    ) -> Result<Self, MappingError> {
        let table = NamedTable::from_path(path)?;
        Self::from_table(&table, matrix_column, genotype_column)
    }

    pub fn from_table(
        table: &NamedTable,
        matrix_column: &str,
        genotype_column: &str,
    ) -> Result<Self, MappingError> {
        let matrix_idx =
            table
                .column_index(matrix_column)
                .ok_or_else(|| MappingError::MissingColumn {
                    name: matrix_column.to_string(),
                })?;
        let genotype_idx =
            table
                .column_index(genotype_column)
                .ok_or_else(|| MappingError::MissingColumn {
                    name: genotype_column.to_string(),
                })?;

        let mut to_matrix = HashMap::with_capacity(table.len());
        let mut matrix_names = HashSet::with_capacity(table.len());
        for row in &table.rows {
            let matrix_name = &row[matrix_idx];
            let genotype_name = &row[genotype_idx];
            if !matrix_names.insert(matrix_name.clone()) {
                return Err(MappingError::DuplicateMatrixName {
                    name: matrix_name.clone(),
                });
            }
            if to_matrix
                .insert(genotype_name.clone(), matrix_name.clone())
                .is_some()
            {
                return Err(MappingError::DuplicateGenotypeName {
                    name: genotype_name.clone(),
                });
            }
        }
        Ok(Self { to_matrix })
    }

    pub fn resolve(&self, genotype_id: &str) -> Option<&str> {
        self.to_matrix.get(genotype_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.to_matrix.len()
    }

    pub fn is_empty(&self) -> bool {
        self.to_matrix.is_empty()
    }
}

/// The analyzed cohort: genotype-source sample names in their VCF column
/// order, and the distance-matrix name each one resolved to, in the same
/// order. Genotype vectors and the engine submatrix both follow this order.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSamples {
    pub vcf_names: Vec<String>,
    pub matrix_names: Vec<String>,
}

impl ResolvedSamples {
    pub fn len(&self) -> usize {
        self.vcf_names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vcf_names.is_empty()
    }
}

#[derive(Debug, Error)]
pub enum SampleMismatchError {
    #[error("duplicate sample {name:?} in the genotype file header")]
    DuplicateVcfSample { name: String },
    #[error(
        "sample {name:?} from the genotype file is not in the distance matrix; \
         supply --name-mapping if the two files use different sample ids"
    )]
    UnknownSample { name: String },
    #[error("sample {name:?} from the genotype file has no entry in the name mapping")]
    UnmappedSample { name: String },
    #[error(
        "genotype sample {vcf:?} maps to {matrix:?}, which is not in the distance matrix"
    )]
    MappedToMissing { vcf: String, matrix: String },
}

/// Resolves every genotype-file sample against the distance matrix, applying
/// the optional name mapping. All samples must resolve; extra matrix samples
/// are simply never referenced.
pub fn resolve_samples(
    matrix: &DistanceMatrix,
    vcf_samples: &[String],
    mapping: Option<&NameMapping>,
) -> Result<ResolvedSamples, SampleMismatchError> {
    let mut seen = HashSet::with_capacity(vcf_samples.len());
    let mut matrix_names = Vec::with_capacity(vcf_samples.len());

    for name in vcf_samples {
        if !seen.insert(name.as_str()) {
            return Err(SampleMismatchError::DuplicateVcfSample { name: name.clone() });
        }
        let resolved = match mapping {
            Some(mapping) => {
                let target =
                    mapping
                        .resolve(name)
                        .ok_or_else(|| SampleMismatchError::UnmappedSample {
                            name: name.clone(),
                        })?;
                if !matrix.contains(target) {
                    return Err(SampleMismatchError::MappedToMissing {
                        vcf: name.clone(),
                        matrix: target.to_string(),
                    });
                }
                target.to_string()
            }
            None => {
                if !matrix.contains(name) {
                    return Err(SampleMismatchError::UnknownSample { name: name.clone() });
                }
                name.clone()
            }
        };
        matrix_names.push(resolved);
    }

    Ok(ResolvedSamples {
        vcf_names: vcf_samples.to_vec(),
        matrix_names,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn matrix(names: &[&str]) -> DistanceMatrix {
        let mut text = String::from("corner");
        for name in names {
            text.push(',');
            text.push_str(name);
        }
        text.push('\n');
        for name in names {
            text.push_str(name);
            for _ in names {
                text.push_str(",0");
            }
            text.push('\n');
        }
        let table = NamedTable::read(Cursor::new(text)).unwrap();
        DistanceMatrix::from_table(&table).unwrap()
    }

    fn mapping(text: &str) -> Result<NameMapping, MappingError> {
        let table = NamedTable::read(Cursor::new(text.to_string())).unwrap();
        NameMapping::from_table(&table, "SampleID", "IND_ID")
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn identity_resolution_keeps_vcf_order() {
        let m = matrix(&["s1", "s2", "s3"]);
        let resolved = resolve_samples(&m, &names(&["s3", "s1"]), None).unwrap();
        assert_eq!(resolved.vcf_names, names(&["s3", "s1"]));
        assert_eq!(resolved.matrix_names, names(&["s3", "s1"]));
    }

    #[test]
    fn unknown_sample_without_mapping_fails() {
        let m = matrix(&["s1"]);
        assert!(matches!(
            resolve_samples(&m, &names(&["s1", "zz"]), None),
            Err(SampleMismatchError::UnknownSample { .. })
        ));
    }

    #[test]
    fn duplicate_vcf_sample_fails() {
        let m = matrix(&["s1"]);
        assert!(matches!(
            resolve_samples(&m, &names(&["s1", "s1"]), None),
            Err(SampleMismatchError::DuplicateVcfSample { .. })
        ));
    }

    #[test]
    fn mapping_translates_names() {
        let m = matrix(&["m1", "m2"]);
        let map = mapping("idx,SampleID,IND_ID\n1,m1,g1\n2,m2,g2\n").unwrap();
        let resolved = resolve_samples(&m, &names(&["g2", "g1"]), Some(&map)).unwrap();
        assert_eq!(resolved.matrix_names, names(&["m2", "m1"]));
    }

    #[test]
    fn mapping_must_cover_every_vcf_sample() {
        let m = matrix(&["m1"]);
        let map = mapping("idx,SampleID,IND_ID\n1,m1,g1\n").unwrap();
        assert!(matches!(
            resolve_samples(&m, &names(&["g1", "g2"]), Some(&map)),
            Err(SampleMismatchError::UnmappedSample { .. })
        ));
    }

    #[test]
    fn mapping_to_missing_matrix_sample_fails() {
        let m = matrix(&["m1"]);
        let map = mapping("idx,SampleID,IND_ID\n1,m9,g1\n").unwrap();
        assert!(matches!(
            resolve_samples(&m, &names(&["g1"]), Some(&map)),
            Err(SampleMismatchError::MappedToMissing { .. })
        ));
    }

    #[test]
    fn duplicate_mapping_keys_are_rejected() {
        assert!(matches!(
            mapping("idx,SampleID,IND_ID\n1,m1,g1\n2,m1,g2\n"),
            Err(MappingError::DuplicateMatrixName { .. })
        ));
        assert!(matches!(
            mapping("idx,SampleID,IND_ID\n1,m1,g1\n2,m2,g1\n"),
            Err(MappingError::DuplicateGenotypeName { .. })
        ));
    }

    #[test]
    fn missing_mapping_column_is_reported() {
        assert!(matches!(
            mapping("idx,SampleID,OTHER\n1,m1,g1\n"),
            Err(MappingError::MissingColumn { .. })
        ));
    }
}
