use std::fmt;

use thiserror::Error;

/// One payload row, keyed by column name.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// A chunk of records written with a single insert request.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordBatch {
    index: usize,
    rows: Vec<Record>,
}

impl RecordBatch {
    pub fn new(index: usize, rows: Vec<Record>) -> RecordBatch {
        RecordBatch { index, rows }
    }

    /// Position of this batch within its operation, starting at zero.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn rows(&self) -> &[Record] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn into_rows(self) -> Vec<Record> {
        self.rows
    }
}

/// A row the warehouse refused to write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowError {
    /// Index of the row within the insert request.
    pub row_index: usize,
    pub detail: String,
}

impl fmt::Display for RowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "row {}: {}", self.row_index, self.detail)
    }
}

/// The first rejected row of a batch, together with its record.
///
/// Attached as the source of [`crate::error::ErrorKind::DataValidationFailed`] errors.
#[derive(Debug, Clone, Error)]
#[error("batch {batch_index} rejected {row_error} for record {}", render_record(.record))]
pub struct FailedRow {
    pub batch_index: usize,
    pub row_error: RowError,
    pub record: Record,
}

fn render_record(record: &Record) -> String {
    serde_json::to_string(record).unwrap_or_else(|_| format!("{record:?}"))
}
