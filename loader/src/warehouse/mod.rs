//! The warehouse engine seam.

pub mod memory;

use std::future::Future;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::LoadResult;
use crate::identifier::TableIdentifier;
use crate::merge::{DuplicateKeysQuery, MergeStatement};
use crate::schema::Schema;
use crate::types::{Record, RowError};

/// Outcome of a merge the engine accepted or refused in an expected way.
///
/// Failures outside these cases are returned as
/// [`crate::error::ErrorKind::MergeExecutionFailed`] errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    Applied,
    /// The destination still has rows in its streaming buffer, so DML cannot touch it yet.
    StreamingBufferConflict(String),
    /// A destination row matched more than one staging row.
    AmbiguousTargetMatch(String),
}

/// Rows returned by a query, with JSON values typed from the result schema.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl QueryResult {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> QueryResult {
        QueryResult { columns, rows }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Returns each row keyed by column name.
    pub fn records(&self) -> Vec<Record> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect()
            })
            .collect()
    }
}

/// Primitives the loader needs from a warehouse engine.
///
/// Calls are awaited one at a time by the loader; implementations need not support
/// concurrent use of the same table.
pub trait WarehouseClient {
    /// Returns the schema of `table`, or [`None`] when it does not exist.
    fn get_table(
        &self,
        table: &TableIdentifier,
    ) -> impl Future<Output = LoadResult<Option<Schema>>> + Send;

    /// Creates `table`. With `exists_ok` an existing table is left untouched.
    fn create_table(
        &self,
        table: &TableIdentifier,
        schema: &Schema,
        exists_ok: bool,
    ) -> impl Future<Output = LoadResult<()>> + Send;

    /// Deletes `table`, returning whether it existed.
    fn delete_table(&self, table: &TableIdentifier) -> impl Future<Output = LoadResult<bool>> + Send;

    /// Schedules `table` for deletion by the engine at `expires_at`.
    fn update_table_expiration(
        &self,
        table: &TableIdentifier,
        expires_at: DateTime<Utc>,
    ) -> impl Future<Output = LoadResult<()>> + Send;

    /// Streams `rows` into `table`, returning the rows the engine rejected.
    fn insert_rows(
        &self,
        table: &TableIdentifier,
        rows: &[Record],
    ) -> impl Future<Output = LoadResult<Vec<RowError>>> + Send;

    /// Runs an arbitrary statement.
    fn query(&self, query: &str) -> impl Future<Output = LoadResult<QueryResult>> + Send;

    fn merge(
        &self,
        statement: &MergeStatement,
    ) -> impl Future<Output = LoadResult<MergeOutcome>> + Send;

    /// Fetches destination rows sharing a key tuple with another row.
    fn duplicate_key_rows(
        &self,
        query: &DuplicateKeysQuery,
    ) -> impl Future<Output = LoadResult<QueryResult>> + Send;
}
