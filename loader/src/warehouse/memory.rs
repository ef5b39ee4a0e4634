use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::bail;
use crate::error::{ErrorKind, LoadResult};
use crate::identifier::TableIdentifier;
use crate::merge::{DuplicateKeysQuery, MergeStatement};
use crate::schema::{FieldMode, Schema};
use crate::types::{Record, RowError};
use crate::warehouse::{MergeOutcome, QueryResult, WarehouseClient};

const AMBIGUOUS_MATCH_DETAIL: &str =
    "UPDATE/MERGE must match at most one source row for each target row";

/// A call received by [`MemoryWarehouse`], in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WarehouseCall {
    GetTable(TableIdentifier),
    CreateTable {
        table: TableIdentifier,
        exists_ok: bool,
    },
    DeleteTable(TableIdentifier),
    UpdateTableExpiration {
        table: TableIdentifier,
        expires_at: DateTime<Utc>,
    },
    InsertRows {
        table: TableIdentifier,
        rows: usize,
    },
    Query(String),
    Merge {
        destination: TableIdentifier,
        source: TableIdentifier,
    },
    DuplicateKeyRows(TableIdentifier),
}

/// Snapshot of a table held by [`MemoryWarehouse`].
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryTable {
    pub schema: Schema,
    pub rows: Vec<Record>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct Inner {
    tables: HashMap<TableIdentifier, MemoryTable>,
    calls: Vec<WarehouseCall>,
    query_results: HashMap<String, Result<QueryResult, String>>,
    streaming_buffer: HashSet<TableIdentifier>,
    ambiguous_matches: HashSet<TableIdentifier>,
    rejected_creations: Vec<String>,
    merge_failure: Option<String>,
}

/// In-memory warehouse for tests and local development.
///
/// Tables live in process memory. Inserts are checked against the table schema the way the
/// streaming API checks them, and merge statements are applied with the engine's semantics:
/// `NULL` keys never match, and a destination row matched by several staging rows aborts the
/// merge with [`MergeOutcome::AmbiguousTargetMatch`]. Arbitrary queries only return results
/// registered with [`MemoryWarehouse::set_query_result`]; registered results also take
/// precedence over the structural answer to duplicate key queries.
#[derive(Debug, Clone, Default)]
pub struct MemoryWarehouse {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates or overwrites `table` with the given rows.
    pub async fn add_table(&self, table: TableIdentifier, schema: Schema, rows: Vec<Record>) {
        let mut inner = self.inner.lock().await;
        inner.tables.insert(
            table,
            MemoryTable {
                schema,
                rows,
                expires_at: None,
            },
        );
    }

    pub async fn table(&self, table: &TableIdentifier) -> Option<MemoryTable> {
        let inner = self.inner.lock().await;
        inner.tables.get(table).cloned()
    }

    /// Returns the rows of `table`, or an empty list when it does not exist.
    pub async fn table_rows(&self, table: &TableIdentifier) -> Vec<Record> {
        let inner = self.inner.lock().await;
        inner
            .tables
            .get(table)
            .map(|table| table.rows.clone())
            .unwrap_or_default()
    }

    /// Returns every table identifier, sorted by name.
    pub async fn table_ids(&self) -> Vec<TableIdentifier> {
        let inner = self.inner.lock().await;
        let mut ids: Vec<_> = inner.tables.keys().cloned().collect();
        ids.sort_by_key(|id| id.to_string());
        ids
    }

    pub async fn calls(&self) -> Vec<WarehouseCall> {
        let inner = self.inner.lock().await;
        inner.calls.clone()
    }

    pub async fn set_query_result(&self, query: impl Into<String>, result: QueryResult) {
        let mut inner = self.inner.lock().await;
        inner.query_results.insert(query.into(), Ok(result));
    }

    /// Makes `query` fail with `message`.
    pub async fn set_query_error(&self, query: impl Into<String>, message: impl Into<String>) {
        let mut inner = self.inner.lock().await;
        inner.query_results.insert(query.into(), Err(message.into()));
    }

    /// Marks `table` as having rows in its streaming buffer, which blocks merges into it.
    pub async fn set_streaming_buffer(&self, table: &TableIdentifier, active: bool) {
        let mut inner = self.inner.lock().await;
        if active {
            inner.streaming_buffer.insert(table.clone());
        } else {
            inner.streaming_buffer.remove(table);
        }
    }

    /// Makes merges into `table` report an ambiguous match whatever the rows are.
    pub async fn set_ambiguous_match(&self, table: &TableIdentifier, active: bool) {
        let mut inner = self.inner.lock().await;
        if active {
            inner.ambiguous_matches.insert(table.clone());
        } else {
            inner.ambiguous_matches.remove(table);
        }
    }

    /// Rejects creation of every table whose name starts with `prefix`.
    pub async fn reject_table_creation(&self, prefix: impl Into<String>) {
        let mut inner = self.inner.lock().await;
        inner.rejected_creations.push(prefix.into());
    }

    /// Makes every following merge fail with `message`.
    pub async fn fail_merges(&self, message: impl Into<String>) {
        let mut inner = self.inner.lock().await;
        inner.merge_failure = Some(message.into());
    }
}

impl WarehouseClient for MemoryWarehouse {
    async fn get_table(&self, table: &TableIdentifier) -> LoadResult<Option<Schema>> {
        let mut inner = self.inner.lock().await;
        inner.calls.push(WarehouseCall::GetTable(table.clone()));

        Ok(inner.tables.get(table).map(|table| table.schema.clone()))
    }

    async fn create_table(
        &self,
        table: &TableIdentifier,
        schema: &Schema,
        exists_ok: bool,
    ) -> LoadResult<()> {
        let mut inner = self.inner.lock().await;
        inner.calls.push(WarehouseCall::CreateTable {
            table: table.clone(),
            exists_ok,
        });

        if inner
            .rejected_creations
            .iter()
            .any(|prefix| table.table().starts_with(prefix.as_str()))
        {
            bail!(
                ErrorKind::TableCreationFailed,
                "Table creation was rejected",
                format!("`{table}` is configured to be rejected")
            );
        }

        if inner.tables.contains_key(table) {
            if exists_ok {
                return Ok(());
            }
            bail!(
                ErrorKind::TableCreationFailed,
                "Table already exists",
                format!("`{table}` already exists")
            );
        }

        info!(%table, "creating table in memory");
        inner.tables.insert(
            table.clone(),
            MemoryTable {
                schema: schema.clone(),
                rows: Vec::new(),
                expires_at: None,
            },
        );

        Ok(())
    }

    async fn delete_table(&self, table: &TableIdentifier) -> LoadResult<bool> {
        let mut inner = self.inner.lock().await;
        inner.calls.push(WarehouseCall::DeleteTable(table.clone()));

        info!(%table, "deleting table in memory");
        inner.streaming_buffer.remove(table);

        Ok(inner.tables.remove(table).is_some())
    }

    async fn update_table_expiration(
        &self,
        table: &TableIdentifier,
        expires_at: DateTime<Utc>,
    ) -> LoadResult<()> {
        let mut inner = self.inner.lock().await;
        inner.calls.push(WarehouseCall::UpdateTableExpiration {
            table: table.clone(),
            expires_at,
        });

        let Some(stored) = inner.tables.get_mut(table) else {
            bail!(
                ErrorKind::TableNotFound,
                "Cannot set expiration of a missing table",
                table
            );
        };
        stored.expires_at = Some(expires_at);

        Ok(())
    }

    async fn insert_rows(
        &self,
        table: &TableIdentifier,
        rows: &[Record],
    ) -> LoadResult<Vec<RowError>> {
        let mut inner = self.inner.lock().await;
        inner.calls.push(WarehouseCall::InsertRows {
            table: table.clone(),
            rows: rows.len(),
        });

        let Some(stored) = inner.tables.get_mut(table) else {
            bail!(
                ErrorKind::TableNotFound,
                "Cannot insert into a missing table",
                table
            );
        };

        let row_errors: Vec<RowError> = rows
            .iter()
            .enumerate()
            .filter_map(|(row_index, row)| {
                check_row(&stored.schema, row).map(|detail| RowError { row_index, detail })
            })
            .collect();

        // The whole request is refused when any row is invalid.
        if row_errors.is_empty() {
            debug!(%table, rows = rows.len(), "inserting rows in memory");
            stored.rows.extend(rows.iter().cloned());
        }

        Ok(row_errors)
    }

    async fn query(&self, query: &str) -> LoadResult<QueryResult> {
        let mut inner = self.inner.lock().await;
        inner.calls.push(WarehouseCall::Query(query.to_string()));

        match inner.query_results.get(query) {
            Some(Ok(result)) => Ok(result.clone()),
            Some(Err(message)) => bail!(
                ErrorKind::DestinationQueryFailed,
                "Query failed",
                message.clone()
            ),
            None => bail!(
                ErrorKind::DestinationQueryFailed,
                "Query is not supported by the in-memory warehouse",
                query
            ),
        }
    }

    async fn merge(&self, statement: &MergeStatement) -> LoadResult<MergeOutcome> {
        let mut inner = self.inner.lock().await;
        let destination = statement.destination();
        let source = statement.source();
        inner.calls.push(WarehouseCall::Merge {
            destination: destination.clone(),
            source: source.clone(),
        });

        if let Some(message) = &inner.merge_failure {
            bail!(
                ErrorKind::MergeExecutionFailed,
                "Merge statement failed",
                message.clone()
            );
        }

        if inner.streaming_buffer.contains(destination) {
            return Ok(MergeOutcome::StreamingBufferConflict(format!(
                "UPDATE or DELETE statement over table {destination} would affect rows in the streaming buffer, which is not supported"
            )));
        }

        if inner.ambiguous_matches.contains(destination) {
            return Ok(MergeOutcome::AmbiguousTargetMatch(AMBIGUOUS_MATCH_DETAIL.to_string()));
        }

        let Some(staged) = inner.tables.get(source).map(|table| table.rows.clone()) else {
            bail!(
                ErrorKind::MergeExecutionFailed,
                "Merge statement failed",
                format!("Not found: Table {source}")
            );
        };
        let Some(target) = inner.tables.get_mut(destination) else {
            bail!(
                ErrorKind::MergeExecutionFailed,
                "Merge statement failed",
                format!("Not found: Table {destination}")
            );
        };

        let keys = statement.keys();
        let mut matched_by: Vec<Option<usize>> = vec![None; target.rows.len()];
        let mut source_matched = vec![false; staged.len()];
        for (source_index, source_row) in staged.iter().enumerate() {
            let Some(source_key) = keys.comparable_values(source_row) else {
                continue;
            };
            for (target_index, target_row) in target.rows.iter().enumerate() {
                if keys.comparable_values(target_row).as_ref() != Some(&source_key) {
                    continue;
                }
                if matched_by[target_index].is_some() {
                    return Ok(MergeOutcome::AmbiguousTargetMatch(
                        AMBIGUOUS_MATCH_DETAIL.to_string(),
                    ));
                }
                matched_by[target_index] = Some(source_index);
                source_matched[source_index] = true;
            }
        }

        for (target_row, source_index) in target.rows.iter_mut().zip(&matched_by) {
            let Some(source_index) = source_index else {
                continue;
            };
            let source_row = &staged[*source_index];
            for column in statement.columns() {
                let value = source_row.get(column).cloned().unwrap_or(Value::Null);
                target_row.insert(column.clone(), value);
            }
        }

        let inserted: Vec<Record> = staged
            .iter()
            .zip(&source_matched)
            .filter(|(_, matched)| !**matched)
            .map(|(row, _)| row.clone())
            .collect();
        let updated = matched_by.iter().filter(|m| m.is_some()).count();
        info!(%destination, %source, updated, inserted = inserted.len(), "merged tables in memory");
        target.rows.extend(inserted);

        Ok(MergeOutcome::Applied)
    }

    async fn duplicate_key_rows(&self, query: &DuplicateKeysQuery) -> LoadResult<QueryResult> {
        let mut inner = self.inner.lock().await;
        inner
            .calls
            .push(WarehouseCall::DuplicateKeyRows(query.table().clone()));

        match inner.query_results.get(&query.to_string()) {
            Some(Ok(result)) => return Ok(result.clone()),
            Some(Err(message)) => bail!(
                ErrorKind::DestinationQueryFailed,
                "Query failed",
                message.clone()
            ),
            None => {}
        }

        let Some(stored) = inner.tables.get(query.table()) else {
            bail!(
                ErrorKind::DestinationQueryFailed,
                "Query failed",
                format!("Not found: Table {}", query.table())
            );
        };

        let mut counts: HashMap<Vec<String>, usize> = HashMap::new();
        for row in &stored.rows {
            if let Some(key) = query.keys().comparable_values(row) {
                *counts.entry(key).or_default() += 1;
            }
        }

        let columns: Vec<String> = stored.schema.field_names().map(str::to_string).collect();
        let rows = stored
            .rows
            .iter()
            .filter(|row| {
                query.keys().comparable_values(row)
                    .and_then(|key| counts.get(&key))
                    .is_some_and(|count| *count > 1)
            })
            .take(query.limit())
            .map(|row| {
                columns
                    .iter()
                    .map(|column| row.get(column).cloned().unwrap_or(Value::Null))
                    .collect()
            })
            .collect();

        Ok(QueryResult::new(columns, rows))
    }
}

/// Returns why `row` does not fit `schema`, if it does not.
fn check_row(schema: &Schema, row: &Record) -> Option<String> {
    if let Some(unknown) = row.keys().find(|name| schema.field(name).is_none()) {
        return Some(format!("no such field: {unknown}"));
    }

    schema
        .fields()
        .iter()
        .filter(|field| field.mode == FieldMode::Required)
        .find(|field| matches!(row.get(&field.name), None | Some(Value::Null)))
        .map(|field| format!("missing required field: {}", field.name))
}
