use std::collections::HashSet;
use std::io::{self, BufRead};
use std::path::Path;

use thiserror::Error;

use crate::smart_reader;

/// A CSV table with named rows and named columns. The first header cell is a
/// corner label and is discarded; the first cell of every data row is the row
/// name. Both the distance matrix and the name mapping use this layout.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedTable {
    pub columns: Vec<String>,
    pub row_names: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

#[derive(Debug, Error)]
pub enum TableError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("empty CSV file")]
    Empty,
    #[error("wrong number of columns in row {row}")]
    ColumnCount { row: u64 },
    #[error("duplicate column name: {name}")]
    DuplicateColumn { name: String },
    #[error("duplicate row name: {name}")]
    DuplicateRow { name: String },
}

impl NamedTable {
    pub fn from_path(path: &Path) -> Result<Self, TableError> {
        let reader = smart_reader::open_input(path)?;
        Self::read(reader)
    }

    pub fn read<R: BufRead>(reader: R) -> Result<Self, TableError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(reader);
        let mut records = csv_reader.records();

        let header = match records.next() {
            Some(record) => record?,
            None => return Err(TableError::Empty),
        };
        let columns: Vec<String> = header.iter().skip(1).map(str::to_string).collect();

        let mut seen = HashSet::new();
        for name in &columns {
            if !seen.insert(name.as_str()) {
                return Err(TableError::DuplicateColumn { name: name.clone() });
            }
        }

        let mut row_names = Vec::new();
        let mut rows = Vec::new();
        let mut seen_rows = HashSet::new();
        for (idx, record) in records.enumerate() {
            let record = record?;
            if record.len() != columns.len() + 1 {
                return Err(TableError::ColumnCount {
                    row: idx as u64 + 1,
                });
            }
            let name = record[0].to_string();
            if !seen_rows.insert(name.clone()) {
                return Err(TableError::DuplicateRow { name });
            }
            row_names.push(name);
            rows.push(record.iter().skip(1).map(str::to_string).collect());
        }

        Ok(Self {
            columns,
            row_names,
            rows,
        })
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
