//! Column-oriented tables stored alongside artifact files.
//!
//! Tables serialize as `{"columns": [...], "data": [[...], ...]}`. A
//! [`JoinedTable`] only records which two stored tables to join and on which
//! key; [`join`] materializes it.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// File suffix for stored tables.
pub const TABLE_SUFFIX: &str = ".table.json";
/// File suffix for stored joined tables.
pub const JOINED_TABLE_SUFFIX: &str = ".joined-table.json";

#[derive(Debug, Error)]
pub enum TableError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown column {0:?}")]
    UnknownColumn(String),
    #[error("row has {actual} cells, table has {expected} columns")]
    RowWidth { expected: usize, actual: usize },
    #[error("duplicate key {key:?} in column {column:?}")]
    DuplicateKey { column: String, key: String },
    #[error("column {column:?} row {row}: expected {expected}")]
    CellType {
        column: String,
        row: usize,
        expected: &'static str,
    },
}

/// Reference to an image (and optionally its mask) stored in the same artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    /// Artifact-relative path of the image.
    pub path: String,
    /// Artifact-relative path of the segmentation mask.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mask: Option<String>,
}

/// A single table cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    Int(i64),
    Text(String),
    Image(ImageRef),
}

impl Cell {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Cell::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Cell::Text(value) => Some(value),
            _ => None,
        }
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::Text(value.to_string())
    }
}

impl From<String> for Cell {
    fn from(value: String) -> Self {
        Cell::Text(value)
    }
}

impl From<i64> for Cell {
    fn from(value: i64) -> Self {
        Cell::Int(value)
    }
}

impl From<ImageRef> for Cell {
    fn from(value: ImageRef) -> Self {
        Cell::Image(value)
    }
}

/// In-memory table with named columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    columns: Vec<String>,
    data: Vec<Vec<Cell>>,
}

impl Table {
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            data: Vec::new(),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Append a row; its width must match the column count.
    pub fn add_row(&mut self, row: Vec<Cell>) -> Result<(), TableError> {
        if row.len() != self.columns.len() {
            return Err(TableError::RowWidth {
                expected: self.columns.len(),
                actual: row.len(),
            });
        }
        self.data.push(row);
        Ok(())
    }

    pub fn column_index(&self, name: &str) -> Result<usize, TableError> {
        self.columns
            .iter()
            .position(|column| column == name)
            .ok_or_else(|| TableError::UnknownColumn(name.to_string()))
    }

    /// Borrow every cell of a column, in row order.
    pub fn column(&self, name: &str) -> Result<Vec<&Cell>, TableError> {
        let idx = self.column_index(name)?;
        Ok(self.data.iter().map(|row| &row[idx]).collect())
    }

    /// Map each text value of `column` to its row index; keys must be unique.
    pub fn index_by(&self, column: &str) -> Result<HashMap<&str, usize>, TableError> {
        let idx = self.column_index(column)?;
        let mut out = HashMap::with_capacity(self.data.len());
        for (row_idx, row) in self.data.iter().enumerate() {
            let key = row[idx].as_text().ok_or_else(|| TableError::CellType {
                column: column.to_string(),
                row: row_idx,
                expected: "text",
            })?;
            if out.insert(key, row_idx).is_some() {
                return Err(TableError::DuplicateKey {
                    column: column.to_string(),
                    key: key.to_string(),
                });
            }
        }
        Ok(out)
    }

    pub fn write_json(&self, path: &Path) -> Result<(), TableError> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }

    pub fn read_json(path: &Path) -> Result<Self, TableError> {
        let reader = BufReader::new(File::open(path)?);
        let table: Table = serde_json::from_reader(reader)?;
        if let Some(row) = table.data.iter().find(|row| row.len() != table.columns.len()) {
            return Err(TableError::RowWidth {
                expected: table.columns.len(),
                actual: row.len(),
            });
        }
        Ok(table)
    }
}

/// Lazy join of two tables stored in the same artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinedTable {
    /// Entry name of the left table.
    pub table1: String,
    /// Entry name of the right table.
    pub table2: String,
    /// Column present in both tables.
    pub join_key: String,
}

impl JoinedTable {
    pub fn new(table1: &str, table2: &str, join_key: &str) -> Self {
        Self {
            table1: table1.to_string(),
            table2: table2.to_string(),
            join_key: join_key.to_string(),
        }
    }
}

/// Inner join on `key`, keeping the left table's row order.
///
/// The right table's key column is dropped; other right columns whose names
/// clash with a left column get a `_2` suffix.
pub fn join(left: &Table, right: &Table, key: &str) -> Result<Table, TableError> {
    let left_key = left.column_index(key)?;
    let right_key = right.column_index(key)?;
    let right_index = right.index_by(key)?;

    let mut columns = left.columns.clone();
    for (idx, name) in right.columns.iter().enumerate() {
        if idx == right_key {
            continue;
        }
        if left.columns.contains(name) {
            columns.push(format!("{name}_2"));
        } else {
            columns.push(name.clone());
        }
    }

    let mut out = Table::new(columns);
    for (row_idx, row) in left.data.iter().enumerate() {
        let value = row[left_key].as_text().ok_or_else(|| TableError::CellType {
            column: key.to_string(),
            row: row_idx,
            expected: "text",
        })?;
        let Some(&matched) = right_index.get(value) else {
            continue;
        };
        let mut joined = row.clone();
        joined.extend(
            right.data[matched]
                .iter()
                .enumerate()
                .filter(|(idx, _)| *idx != right_key)
                .map(|(_, cell)| cell.clone()),
        );
        out.data.push(joined);
    }
    Ok(out)
}
