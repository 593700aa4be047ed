use std::collections::HashMap;
use std::path::Path;

use thiserror::Error;

use crate::table::{NamedTable, TableError};

/// Square pairwise distance matrix keyed by sample name. Storage is
/// normalized to the column order of the source file, so a row permutation
/// in the input does not change behavior.
#[derive(Debug, Clone)]
pub struct DistanceMatrix {
    samples: Vec<String>,
    index: HashMap<String, usize>,
    values: Vec<f64>,
}

/// Distance matrix restricted and reordered to the analyzed samples,
/// row-major. This is what gets handed to the test engine.
#[derive(Debug, Clone, PartialEq)]
pub struct Submatrix {
    n: usize,
    values: Vec<f64>,
}

#[derive(Debug, Error)]
pub enum MatrixError {
    #[error(transparent)]
    Table(#[from] TableError),
    #[error("invalid value {value:?} in row {row} of the distance matrix")]
    InvalidValue { row: u64, value: String },
    #[error("distance matrix row and column names do not match")]
    NameMismatch,
    #[error("sample {name:?} is not in the distance matrix")]
    UnknownSample { name: String },
}

impl DistanceMatrix {
    pub fn load(path: &Path) -> Result<Self, MatrixError> {
        let table = NamedTable::from_path(path)?;
        Self::from_table(&table)
    }

    pub fn from_table(table: &NamedTable) -> Result<Self, MatrixError> {
        let samples = table.columns.clone();
        let n = samples.len();
        if table.rows.len() != n {
            return Err(MatrixError::NameMismatch);
        }

        let index: HashMap<String, usize> = samples
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();

        let mut values = vec![0.0; n * n];
        for (row_idx, (name, cells)) in table.row_names.iter().zip(&table.rows).enumerate() {
            let Some(&dest) = index.get(name) else {
                return Err(MatrixError::NameMismatch);
            };
            for (col, cell) in cells.iter().enumerate() {
                let value: f64 =
                    cell.trim()
                        .parse()
                        .map_err(|_| MatrixError::InvalidValue {
                            row: row_idx as u64 + 1,
                            value: cell.clone(),
                        })?;
                values[dest * n + col] = value;
            }
        }

        let matrix = Self {
            samples,
            index,
            values,
        };
        let asymmetric = matrix.asymmetric_pairs();
        if asymmetric > 0 {
            tracing::warn!(pairs = asymmetric, "distance matrix is numerically asymmetric");
        }
        Ok(matrix)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[String] {
        &self.samples
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Extracts the submatrix covering `order`, in that order. Callers are
    /// expected to have resolved the names already; an unknown name is still
    /// reported as an error rather than a panic.
    pub fn submatrix(&self, order: &[String]) -> Result<Submatrix, MatrixError> {
        let n = self.samples.len();
        let mut positions = Vec::with_capacity(order.len());
        for name in order {
            let Some(&pos) = self.index.get(name) else {
                return Err(MatrixError::UnknownSample { name: name.clone() });
            };
            positions.push(pos);
        }

        let mut values = Vec::with_capacity(order.len() * order.len());
        for &i in &positions {
            for &j in &positions {
                values.push(self.values[i * n + j]);
            }
        }
        Ok(Submatrix {
            n: order.len(),
            values,
        })
    }

    fn asymmetric_pairs(&self) -> usize {
        let n = self.samples.len();
        let mut count = 0;
        for i in 0..n {
            for j in (i + 1)..n {
                if self.values[i * n + j] != self.values[j * n + i] {
                    count += 1;
                }
            }
        }
        count
    }
}

impl Submatrix {
    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    /// Row-major values, length `len() * len()`.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.values[i * self.n + j]
    }
}
