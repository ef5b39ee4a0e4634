//! Applies a [`WriteStrategy`] to a destination table, batch by batch.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde_json::Value;
use tracing::{info, warn};

use crate::bail;
use crate::error::{ErrorKind, LoadError, LoadResult};
use crate::identifier::TableIdentifier;
use crate::load_error;
use crate::merge::{DUPLICATE_SAMPLE_LIMIT, DuplicateKeysQuery, MergeStatement};
use crate::schema::Schema;
use crate::strategy::{MergeKeys, WriteStrategy};
use crate::types::{FailedRow, Record, RecordBatch};
use crate::warehouse::{MergeOutcome, WarehouseClient};

const TEMP_SUFFIX_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const TEMP_SUFFIX_LEN: usize = 10;

/// A staging table created for one merge batch.
///
/// The loader never deletes staging tables; the engine drops them at `expires_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TempTableHandle {
    pub identifier: TableIdentifier,
    pub expires_at: DateTime<Utc>,
}

/// A merge condition that was logged and skipped instead of failing the load.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeWarning {
    /// The destination still had rows in its streaming buffer. The batch was not merged.
    StreamingBuffer { batch_index: usize, detail: String },
    /// The batch repeats these key tuples, so it was not merged.
    DuplicateBatchKeys {
        batch_index: usize,
        keys: Vec<Vec<Value>>,
    },
    /// The destination holds rows sharing a key tuple. A sample of them is kept. The batch was
    /// not merged.
    DuplicateDestinationKeys {
        batch_index: usize,
        rows: Vec<Record>,
    },
}

impl MergeWarning {
    pub fn batch_index(&self) -> usize {
        match self {
            MergeWarning::StreamingBuffer { batch_index, .. }
            | MergeWarning::DuplicateBatchKeys { batch_index, .. }
            | MergeWarning::DuplicateDestinationKeys { batch_index, .. } => *batch_index,
        }
    }
}

/// Summary of a completed load.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadReport {
    pub destination: TableIdentifier,
    /// Batches written, including merge batches skipped with a warning.
    pub batches: usize,
    pub rows: usize,
    pub temp_tables: Vec<TempTableHandle>,
    pub warnings: Vec<MergeWarning>,
}

impl LoadReport {
    pub fn empty(destination: TableIdentifier) -> LoadReport {
        LoadReport {
            destination,
            batches: 0,
            rows: 0,
            temp_tables: Vec::new(),
            warnings: Vec::new(),
        }
    }
}

/// Drives one write operation against a warehouse.
///
/// Batches are processed strictly in order and the first error aborts the remaining ones.
/// A replace drops and recreates the destination with the first batch only; `first_batch_done`
/// turns every later batch into a plain append.
pub struct Reconciler<'a, W> {
    warehouse: &'a W,
    destination: &'a TableIdentifier,
    schema: &'a Schema,
    strategy: &'a WriteStrategy,
    temp_table_expiration: Duration,
    first_batch_done: bool,
    temp_counter: usize,
    report: LoadReport,
}

impl<'a, W> Reconciler<'a, W>
where
    W: WarehouseClient,
{
    pub fn new(
        warehouse: &'a W,
        destination: &'a TableIdentifier,
        schema: &'a Schema,
        strategy: &'a WriteStrategy,
        temp_table_expiration_hours: u32,
    ) -> Reconciler<'a, W> {
        Reconciler {
            warehouse,
            destination,
            schema,
            strategy,
            temp_table_expiration: Duration::hours(i64::from(temp_table_expiration_hours)),
            first_batch_done: false,
            temp_counter: 0,
            report: LoadReport::empty(destination.clone()),
        }
    }

    /// Writes every batch and returns the report.
    pub async fn run(mut self, batches: Vec<RecordBatch>) -> LoadResult<LoadReport> {
        let strategy = self.strategy;
        if let WriteStrategy::Merge(keys) = strategy {
            keys.validate_against(self.schema)?;
        }

        info!(
            table = %self.destination,
            %strategy,
            batches = batches.len(),
            "starting load"
        );

        for batch in batches {
            info!(
                table = %self.destination,
                batch_index = batch.index(),
                rows = batch.len(),
                "writing batch"
            );

            let result = match strategy {
                WriteStrategy::Insert => self.insert_batch(&batch).await,
                WriteStrategy::Replace => self.replace_batch(&batch).await,
                WriteStrategy::Merge(keys) => self.merge_batch(&batch, keys).await,
            };

            if let Err(err) = result {
                warn!(
                    table = %self.destination,
                    batch_index = batch.index(),
                    kind = ?err.kind(),
                    "load failed"
                );
                return Err(err);
            }

            self.report.batches += 1;
            self.report.rows += batch.len();
        }

        info!(
            table = %self.destination,
            batches = self.report.batches,
            rows = self.report.rows,
            warnings = self.report.warnings.len(),
            "load finished"
        );

        Ok(self.report)
    }

    async fn insert_batch(&mut self, batch: &RecordBatch) -> LoadResult<()> {
        if self.warehouse.get_table(self.destination).await?.is_none() {
            bail!(
                ErrorKind::TableNotFound,
                "Destination table does not exist",
                self.destination
            );
        }

        self.insert_rows(self.destination, batch).await
    }

    async fn replace_batch(&mut self, batch: &RecordBatch) -> LoadResult<()> {
        if !self.first_batch_done {
            if self.warehouse.get_table(self.destination).await?.is_some() {
                info!(table = %self.destination, "dropping table before replace");
                self.warehouse.delete_table(self.destination).await?;
            }

            self.warehouse
                .create_table(self.destination, self.schema, true)
                .await
                .map_err(|err| creation_failure(err, self.destination))?;
            self.first_batch_done = true;
        }

        self.insert_rows(self.destination, batch).await
    }

    async fn merge_batch(&mut self, batch: &RecordBatch, keys: &MergeKeys) -> LoadResult<()> {
        let temp = self.next_temp_table();

        self.warehouse
            .create_table(&temp, self.schema, false)
            .await
            .map_err(|err| creation_failure(err, &temp))?;

        let expires_at = Utc::now() + self.temp_table_expiration;
        self.warehouse
            .update_table_expiration(&temp, expires_at)
            .await?;
        self.report.temp_tables.push(TempTableHandle {
            identifier: temp.clone(),
            expires_at,
        });
        info!(
            table = %self.destination,
            temp_table = %temp,
            %expires_at,
            batch_index = batch.index(),
            "staging merge batch"
        );

        self.insert_rows(&temp, batch).await?;

        let statement = MergeStatement::new(self.destination, &temp, keys, self.schema);
        match self.warehouse.merge(&statement).await? {
            MergeOutcome::Applied => {
                info!(
                    table = %self.destination,
                    temp_table = %temp,
                    batch_index = batch.index(),
                    "merged batch"
                );
            }
            MergeOutcome::StreamingBufferConflict(detail) => {
                warn!(
                    table = %self.destination,
                    batch_index = batch.index(),
                    %detail,
                    "destination has rows in its streaming buffer, batch not merged"
                );
                self.report.warnings.push(MergeWarning::StreamingBuffer {
                    batch_index: batch.index(),
                    detail,
                });
            }
            MergeOutcome::AmbiguousTargetMatch(detail) => {
                warn!(
                    table = %self.destination,
                    batch_index = batch.index(),
                    %detail,
                    "merge matched a destination row more than once, batch not merged"
                );
                self.diagnose_duplicates(batch, keys).await;
            }
        }

        Ok(())
    }

    /// Records why a merge was ambiguous: duplicate keys in the batch, or in the destination.
    async fn diagnose_duplicates(&mut self, batch: &RecordBatch, keys: &MergeKeys) {
        let duplicated = duplicate_batch_keys(batch.rows(), keys);
        if !duplicated.is_empty() {
            warn!(
                table = %self.destination,
                batch_index = batch.index(),
                keys = ?duplicated,
                "batch contains duplicate merge keys"
            );
            self.report.warnings.push(MergeWarning::DuplicateBatchKeys {
                batch_index: batch.index(),
                keys: duplicated,
            });
            return;
        }

        let query = DuplicateKeysQuery::new(self.destination, keys, DUPLICATE_SAMPLE_LIMIT);
        match self.warehouse.duplicate_key_rows(&query).await {
            Ok(result) => {
                let rows = result.records();
                warn!(
                    table = %self.destination,
                    batch_index = batch.index(),
                    sample = ?rows,
                    "destination contains duplicate merge keys"
                );
                self.report
                    .warnings
                    .push(MergeWarning::DuplicateDestinationKeys {
                        batch_index: batch.index(),
                        rows,
                    });
            }
            Err(err) => {
                warn!(
                    table = %self.destination,
                    batch_index = batch.index(),
                    error = %err,
                    "failed to sample duplicate destination keys"
                );
            }
        }
    }

    async fn insert_rows(&self, table: &TableIdentifier, batch: &RecordBatch) -> LoadResult<()> {
        let row_errors = self.warehouse.insert_rows(table, batch.rows()).await?;

        let Some(row_error) = row_errors.into_iter().min_by_key(|err| err.row_index) else {
            return Ok(());
        };

        let Some(record) = batch.rows().get(row_error.row_index).cloned() else {
            bail!(
                ErrorKind::DestinationError,
                "Destination rejected a row outside of the batch",
                format!(
                    "row {} of batch {} with {} rows: {}",
                    row_error.row_index,
                    batch.index(),
                    batch.len(),
                    row_error.detail
                )
            );
        };
        let failed = FailedRow {
            batch_index: batch.index(),
            row_error,
            record,
        };

        Err(load_error!(
            ErrorKind::DataValidationFailed,
            "Rows were rejected by the destination",
            detail = failed.to_string(),
            source: failed
        ))
    }

    /// Returns `<table>_tmp_<counter>_<random suffix>` for the next merge batch.
    fn next_temp_table(&mut self) -> TableIdentifier {
        let mut rng = rand::thread_rng();
        let random: String = (0..TEMP_SUFFIX_LEN)
            .map(|_| TEMP_SUFFIX_CHARSET[rng.gen_range(0..TEMP_SUFFIX_CHARSET.len())] as char)
            .collect();

        let temp = self
            .destination
            .staging(&format!("{}_{random}", self.temp_counter));
        self.temp_counter += 1;

        temp
    }
}

fn creation_failure(err: LoadError, table: &TableIdentifier) -> LoadError {
    if err.kind() == ErrorKind::TableCreationFailed {
        return err;
    }

    load_error!(
        ErrorKind::TableCreationFailed,
        "Table creation failed",
        format!("{table}: {err}")
    )
}

/// Returns up to [`DUPLICATE_SAMPLE_LIMIT`] key tuples repeated within `rows`.
///
/// Tuples containing a `NULL` are ignored since they never match.
fn duplicate_batch_keys(rows: &[Record], keys: &MergeKeys) -> Vec<Vec<Value>> {
    let mut seen: HashMap<Vec<String>, usize> = HashMap::new();
    let mut duplicated = Vec::new();

    for row in rows {
        let Some(comparable) = keys.comparable_values(row) else {
            continue;
        };

        let count = seen.entry(comparable).or_default();
        *count += 1;
        if *count == 2 {
            duplicated.push(
                keys.iter()
                    .map(|key| row.get(key).cloned().unwrap_or(Value::Null))
                    .collect(),
            );
            if duplicated.len() == DUPLICATE_SAMPLE_LIMIT {
                break;
            }
        }
    }

    duplicated
}
