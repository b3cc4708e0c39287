//! Dataset handles, the shared registry and profiling
//!
//! A `Dataset` is immutable once built: its profile text is computed up front
//! so every prompt that mentions the dataset sees the same summary.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

mod loader;
mod profile;

pub use loader::{infer_cell, parse_dataset_arg};
pub use profile::{ColumnStats, Dtype, column_stats, concise_summary, profile_table};

/// Errors raised while building tables
#[derive(Debug, Error)]
pub enum DataError {
    #[error("Row {row} has {found} cells, expected {expected}")]
    RaggedRow { row: usize, expected: usize, found: usize },

    #[error("Duplicate column name: {0}")]
    DuplicateColumn(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid dataset argument '{0}': expected NAME=PATH")]
    InvalidArgument(String),
}

/// Column-major names plus row-major cells
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    /// Build a table, rejecting ragged rows and repeated column names
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Result<Self, DataError> {
        debug!(columns = columns.len(), rows = rows.len(), "Table::new: called");
        for (i, name) in columns.iter().enumerate() {
            if columns[..i].contains(name) {
                return Err(DataError::DuplicateColumn(name.clone()));
            }
        }
        for (row, cells) in rows.iter().enumerate() {
            if cells.len() != columns.len() {
                return Err(DataError::RaggedRow {
                    row,
                    expected: columns.len(),
                    found: cells.len(),
                });
            }
        }
        Ok(Self { columns, rows })
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    /// Cells of one column, top to bottom
    pub fn column(&self, name: &str) -> Option<Vec<&Value>> {
        let idx = self.columns.iter().position(|c| c == name)?;
        Some(self.rows.iter().map(|row| &row[idx]).collect())
    }

    /// Rows as JSON objects keyed by column name
    pub fn to_records(&self) -> Vec<serde_json::Map<String, Value>> {
        self.rows
            .iter()
            .map(|row| self.columns.iter().cloned().zip(row.iter().cloned()).collect())
            .collect()
    }
}

/// A named table with its precomputed profile
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    pub name: String,
    pub table: Table,
    pub profile: String,
}

impl Dataset {
    /// Wrap a table, computing its profile with `sample_rows` preview rows
    pub fn new(name: impl Into<String>, table: Table, sample_rows: usize) -> Self {
        let name = name.into();
        debug!(%name, sample_rows, "Dataset::new: called");
        let profile = profile_table(&table, sample_rows);
        Self { name, table, profile }
    }
}

/// Ordered name -> dataset mapping, shared read-only with the agent
#[derive(Debug, Clone, Default)]
pub struct DatasetRegistry {
    datasets: Vec<Arc<Dataset>>,
}

impl DatasetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a dataset; a dataset with the same name is replaced in place
    pub fn insert(&mut self, dataset: Dataset) {
        debug!(name = %dataset.name, "DatasetRegistry::insert: called");
        let dataset = Arc::new(dataset);
        match self.datasets.iter().position(|d| d.name == dataset.name) {
            Some(idx) => {
                debug!("DatasetRegistry::insert: replacing existing dataset");
                self.datasets[idx] = dataset;
            }
            None => self.datasets.push(dataset),
        }
    }

    /// Builder form of `insert`
    pub fn with(mut self, dataset: Dataset) -> Self {
        self.insert(dataset);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Dataset>> {
        self.datasets.iter().find(|d| d.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.datasets.iter().map(|d| d.name.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Dataset>> {
        self.datasets.iter()
    }

    pub fn len(&self) -> usize {
        self.datasets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }

    /// Names of the datasets that contain `column`
    pub fn datasets_with_column(&self, column: &str) -> Vec<&str> {
        self.datasets
            .iter()
            .filter(|d| d.table.has_column(column))
            .map(|d| d.name.as_str())
            .collect()
    }

    /// All dataset profiles, each headed by its name
    pub fn profiles(&self) -> String {
        self.datasets
            .iter()
            .map(|d| format!("=== Dataset: {} ===\n{}", d.name, d.profile))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Shape and column lines of every dataset
    pub fn summaries(&self) -> String {
        self.datasets
            .iter()
            .map(|d| format!("=== Dataset: {} ===\n{}", d.name, concise_summary(&d.table)))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}
