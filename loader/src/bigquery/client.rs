use std::fmt;
use std::future::Future;

use chrono::{DateTime, Utc};
use gcp_bigquery_client::Client;
use gcp_bigquery_client::client_builder::ClientBuilder;
use gcp_bigquery_client::error::BQError;
use gcp_bigquery_client::model::error_proto::ErrorProto;
use gcp_bigquery_client::model::get_query_results_parameters::GetQueryResultsParameters;
use gcp_bigquery_client::model::get_query_results_response::GetQueryResultsResponse;
use gcp_bigquery_client::model::job_reference::JobReference;
use gcp_bigquery_client::model::query_request::QueryRequest;
use gcp_bigquery_client::model::query_response::QueryResponse;
use gcp_bigquery_client::model::table::Table;
use gcp_bigquery_client::model::table_data_insert_all_request::TableDataInsertAllRequest;
use gcp_bigquery_client::model::table_data_insert_all_response_insert_errors::TableDataInsertAllResponseInsertErrors;
use gcp_bigquery_client::model::table_row::TableRow;
use gcp_bigquery_client::model::table_schema::TableSchema;
use gcp_bigquery_client::yup_oauth2::parse_service_account_key;
use serde_json::{Number, Value};
use tracing::{debug, info};

use crate::bail;
use crate::error::{ErrorKind, LoadError, LoadResult};
use crate::identifier::TableIdentifier;
use crate::load_error;
use crate::merge::{DuplicateKeysQuery, MergeStatement};
use crate::schema::native::type_from_native;
use crate::schema::{FieldType, Schema};
use crate::types::{Record, RowError};
use crate::warehouse::{MergeOutcome, QueryResult, WarehouseClient};

/// Error text BigQuery returns when DML targets rows still in the streaming buffer.
const STREAMING_BUFFER_MESSAGE: &str = "streaming buffer";
/// Error text BigQuery returns when a target row is matched by several source rows.
const AMBIGUOUS_MATCH_MESSAGE: &str = "must match at most one source row";
/// Reason attached to valid rows of an `insertAll` request that was refused because of another row.
const STOPPED_ROW_REASON: &str = "stopped";
/// How long a single `getQueryResults` call waits server-side for the job to finish.
const JOB_POLL_TIMEOUT_MS: i32 = 10_000;

/// Converts BigQuery errors to load errors with appropriate classification.
pub(crate) fn bq_error_to_load_error(err: BQError) -> LoadError {
    let (kind, description) = match &err {
        BQError::InvalidServiceAccountKey(_) => (
            ErrorKind::AuthenticationError,
            "Invalid BigQuery service account key",
        ),
        BQError::InvalidServiceAccountAuthenticator(_) => (
            ErrorKind::AuthenticationError,
            "Invalid BigQuery service account authenticator",
        ),
        BQError::InvalidApplicationDefaultCredentialsAuthenticator(_) => (
            ErrorKind::AuthenticationError,
            "Invalid BigQuery application default credentials",
        ),
        BQError::AuthError(_) => (
            ErrorKind::AuthenticationError,
            "BigQuery authentication error",
        ),
        BQError::YupAuthError(_) => (
            ErrorKind::AuthenticationError,
            "BigQuery OAuth authentication error",
        ),
        BQError::NoToken => (
            ErrorKind::AuthenticationError,
            "BigQuery authentication token missing",
        ),
        BQError::RequestError(_) => (ErrorKind::DestinationIoError, "BigQuery request failed"),
        BQError::ResponseError { .. } => {
            (ErrorKind::DestinationQueryFailed, "BigQuery response error")
        }
        BQError::SerializationError(_) => (
            ErrorKind::SerializationError,
            "BigQuery JSON serialization error",
        ),
        _ => (ErrorKind::DestinationError, "BigQuery client error"),
    };

    load_error!(kind, description, err.to_string())
}

impl From<BQError> for LoadError {
    fn from(err: BQError) -> LoadError {
        bq_error_to_load_error(err)
    }
}

/// Maps a failed merge to the outcome the loader tolerates, if the failure is one of them.
pub(crate) fn merge_outcome_from_error(message: &str) -> Option<MergeOutcome> {
    let lowered = message.to_ascii_lowercase();

    if lowered.contains(STREAMING_BUFFER_MESSAGE) {
        Some(MergeOutcome::StreamingBufferConflict(message.to_string()))
    } else if lowered.contains(AMBIGUOUS_MATCH_MESSAGE) {
        Some(MergeOutcome::AmbiguousTargetMatch(message.to_string()))
    } else {
        None
    }
}

/// Classifies a finished merge job. Failures other than the tolerated ones are fatal.
fn merge_outcome(result: LoadResult<CompletedQuery>) -> LoadResult<MergeOutcome> {
    let err = match result {
        Ok(_) => return Ok(MergeOutcome::Applied),
        Err(err) => err,
    };

    let message = err.detail().unwrap_or_default().to_string();
    merge_outcome_from_error(&message).ok_or_else(|| {
        load_error!(
            ErrorKind::MergeExecutionFailed,
            "BigQuery merge failed",
            detail = message,
            source: err
        )
    })
}

/// Builds the statement that schedules `table` for deletion at `expires_at`.
fn expiration_statement(table: &TableIdentifier, expires_at: DateTime<Utc>) -> String {
    format!(
        "ALTER TABLE {} SET OPTIONS (expiration_timestamp = TIMESTAMP '{}')",
        table.quoted(),
        expires_at.format("%Y-%m-%d %H:%M:%S%.f UTC")
    )
}

/// Types a REST cell from its column type.
///
/// The REST API returns scalars as strings. Booleans, integers and floats are parsed, anything
/// else is kept as returned.
fn cell_value(field_type: FieldType, value: Option<Value>) -> Value {
    match (field_type, value) {
        (_, None) | (_, Some(Value::Null)) => Value::Null,
        (FieldType::Boolean, Some(Value::String(raw))) => match raw.parse::<bool>() {
            Ok(parsed) => Value::Bool(parsed),
            Err(_) => Value::String(raw),
        },
        (FieldType::Integer, Some(Value::String(raw))) => match raw.parse::<i64>() {
            Ok(parsed) => Value::from(parsed),
            Err(_) => Value::String(raw),
        },
        (FieldType::Float, Some(Value::String(raw))) => {
            match raw.parse::<f64>().ok().and_then(Number::from_f64) {
                Some(parsed) => Value::Number(parsed),
                None => Value::String(raw),
            }
        }
        (_, Some(other)) => other,
    }
}

/// Maps `insertAll` errors to row errors.
///
/// Rows reported as `stopped` were valid and are dropped unless no other row was reported. A
/// row error without an index cannot be paired with its record and fails the insert.
fn row_errors(
    insert_errors: Vec<TableDataInsertAllResponseInsertErrors>,
) -> LoadResult<Vec<RowError>> {
    let (stopped, rejected): (Vec<_>, Vec<_>) =
        insert_errors.into_iter().partition(|insert_error| {
            let errors = insert_error.errors.as_deref().unwrap_or_default();
            !errors.is_empty()
                && errors
                    .iter()
                    .all(|error| error.reason.as_deref() == Some(STOPPED_ROW_REASON))
        });
    let reported = if rejected.is_empty() { stopped } else { rejected };

    reported
        .into_iter()
        .map(|insert_error| {
            let errors = insert_error.errors.unwrap_or_default();
            let Some(row_index) = insert_error
                .index
                .and_then(|index| usize::try_from(index).ok())
            else {
                bail!(
                    ErrorKind::DestinationError,
                    "BigQuery rejected a row without reporting its index",
                    describe_errors(&errors)
                );
            };

            Ok(RowError {
                row_index,
                detail: describe_errors(&errors),
            })
        })
        .collect()
}

fn describe_errors(errors: &[ErrorProto]) -> String {
    errors
        .iter()
        .map(|error| {
            format!(
                "{}: {}",
                error.reason.as_deref().unwrap_or("unknown"),
                error.message.as_deref().unwrap_or_default()
            )
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// A query job the engine has not finished yet.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingJob {
    job_id: String,
    location: Option<String>,
}

/// Schema and rows of a finished query job.
#[derive(Debug, Default)]
struct CompletedQuery {
    schema: Option<TableSchema>,
    rows: Option<Vec<TableRow>>,
}

#[derive(Debug)]
enum JobState {
    Complete(CompletedQuery),
    Pending(PendingJob),
}

impl JobState {
    fn new(
        job_complete: Option<bool>,
        job_reference: Option<JobReference>,
        schema: Option<TableSchema>,
        rows: Option<Vec<TableRow>>,
    ) -> LoadResult<JobState> {
        if job_complete == Some(true) {
            return Ok(JobState::Complete(CompletedQuery { schema, rows }));
        }

        let Some(JobReference {
            job_id: Some(job_id),
            location,
            ..
        }) = job_reference
        else {
            bail!(
                ErrorKind::DestinationQueryFailed,
                "BigQuery job is not complete and has no job id to poll"
            );
        };

        Ok(JobState::Pending(PendingJob { job_id, location }))
    }
}

impl TryFrom<QueryResponse> for JobState {
    type Error = LoadError;

    fn try_from(response: QueryResponse) -> LoadResult<JobState> {
        JobState::new(
            response.job_complete,
            response.job_reference,
            response.schema,
            response.rows,
        )
    }
}

impl TryFrom<GetQueryResultsResponse> for JobState {
    type Error = LoadError;

    fn try_from(response: GetQueryResultsResponse) -> LoadResult<JobState> {
        JobState::new(
            response.job_complete,
            response.job_reference,
            response.schema,
            response.rows,
        )
    }
}

/// Polls a job until the engine reports it complete. A failed job surfaces as the poll's error.
async fn wait_for_job<F, Fut>(mut state: JobState, mut poll: F) -> LoadResult<CompletedQuery>
where
    F: FnMut(PendingJob) -> Fut,
    Fut: Future<Output = LoadResult<JobState>>,
{
    loop {
        match state {
            JobState::Complete(completed) => return Ok(completed),
            JobState::Pending(job) => {
                debug!(job_id = %job.job_id, "waiting for bigquery job to complete");
                state = poll(job).await?;
            }
        }
    }
}

fn query_result(response: CompletedQuery) -> LoadResult<QueryResult> {
    let fields = response
        .schema
        .and_then(|schema| schema.fields)
        .unwrap_or_default();
    let columns: Vec<String> = fields.iter().map(|field| field.name.clone()).collect();
    let types = fields
        .iter()
        .map(|field| type_from_native(&field.r#type, &field.name))
        .collect::<LoadResult<Vec<_>>>()?;

    let rows = response
        .rows
        .unwrap_or_default()
        .into_iter()
        .map(|row| {
            types
                .iter()
                .zip(row.columns.unwrap_or_default())
                .map(|(field_type, cell)| cell_value(*field_type, cell.value))
                .collect()
        })
        .collect();

    Ok(QueryResult::new(columns, rows))
}

/// Client for the BigQuery REST API.
///
/// Tables are managed through the tables API, rows are streamed with `tabledata.insertAll` and
/// statements run as synchronous query jobs billed to `project_id`.
#[derive(Clone)]
pub struct BigQueryClient {
    project_id: String,
    client: Client,
}

impl BigQueryClient {
    /// Creates a new [`BigQueryClient`] from a service account key file.
    pub async fn new_with_key_path(
        project_id: String,
        sa_key_path: &str,
    ) -> LoadResult<BigQueryClient> {
        let client = ClientBuilder::new()
            .build_from_service_account_key_file(sa_key_path)
            .await
            .map_err(bq_error_to_load_error)?;

        Ok(BigQueryClient { project_id, client })
    }

    /// Creates a new [`BigQueryClient`] from a service account key JSON string.
    pub async fn new_with_key(project_id: String, sa_key: &str) -> LoadResult<BigQueryClient> {
        let sa_key = parse_service_account_key(sa_key)
            .map_err(BQError::from)
            .map_err(bq_error_to_load_error)?;
        let client = ClientBuilder::new()
            .build_from_service_account_key(sa_key, false)
            .await
            .map_err(bq_error_to_load_error)?;

        Ok(BigQueryClient { project_id, client })
    }

    /// Creates a new [`BigQueryClient`] using Application Default Credentials.
    pub async fn new_with_adc(project_id: String) -> LoadResult<BigQueryClient> {
        let client = ClientBuilder::new()
            .build_from_application_default_credentials()
            .await
            .map_err(bq_error_to_load_error)?;

        Ok(BigQueryClient { project_id, client })
    }

    /// Creates a new [`BigQueryClient`] against custom OAuth and REST endpoints.
    ///
    /// Meant for emulators and mock servers.
    pub async fn new_with_custom_urls(
        project_id: String,
        auth_base_url: String,
        v2_base_url: String,
        sa_key: &str,
    ) -> LoadResult<BigQueryClient> {
        let sa_key = parse_service_account_key(sa_key)
            .map_err(BQError::from)
            .map_err(bq_error_to_load_error)?;
        let client = ClientBuilder::new()
            .with_auth_base_url(auth_base_url)
            .with_v2_base_url(v2_base_url)
            .build_from_service_account_key(sa_key, false)
            .await
            .map_err(bq_error_to_load_error)?;

        Ok(BigQueryClient { project_id, client })
    }

    /// Project that query jobs run in.
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Runs `statement` as a query job and waits for it to finish.
    async fn run(&self, statement: &str) -> LoadResult<CompletedQuery> {
        debug!(statement, "running bigquery statement");

        let response = self
            .client
            .job()
            .query(&self.project_id, QueryRequest::new(statement))
            .await?;

        wait_for_job(JobState::try_from(response)?, move |job| self.poll_job(job)).await
    }

    async fn poll_job(&self, job: PendingJob) -> LoadResult<JobState> {
        let parameters = GetQueryResultsParameters {
            location: job.location,
            timeout_ms: Some(JOB_POLL_TIMEOUT_MS),
            ..GetQueryResultsParameters::default()
        };

        let response = self
            .client
            .job()
            .get_query_results(&self.project_id, &job.job_id, parameters)
            .await?;

        JobState::try_from(response)
    }
}

impl WarehouseClient for BigQueryClient {
    async fn get_table(&self, table: &TableIdentifier) -> LoadResult<Option<Schema>> {
        let result = self
            .client
            .table()
            .get(table.namespace(), table.dataset(), table.table(), None)
            .await;

        match result {
            Ok(found) => Ok(Some(Schema::from_table_schema(&found.schema)?)),
            Err(BQError::ResponseError { error }) if error.error.code == 404 => Ok(None),
            Err(err) => Err(bq_error_to_load_error(err)),
        }
    }

    async fn create_table(
        &self,
        table: &TableIdentifier,
        schema: &Schema,
        exists_ok: bool,
    ) -> LoadResult<()> {
        info!(%table, "creating table in bigquery");

        let definition = Table::new(
            table.namespace(),
            table.dataset(),
            table.table(),
            TableSchema::new(schema.to_native()?),
        );

        match self.client.table().create(definition).await {
            Ok(_) => Ok(()),
            Err(BQError::ResponseError { error }) if exists_ok && error.error.code == 409 => {
                debug!(%table, "table already exists");
                Ok(())
            }
            Err(err) => Err(load_error!(
                ErrorKind::TableCreationFailed,
                "BigQuery table creation failed",
                format!("{table}: {err}")
            )),
        }
    }

    async fn delete_table(&self, table: &TableIdentifier) -> LoadResult<bool> {
        info!(%table, "deleting table from bigquery");

        let result = self
            .client
            .table()
            .delete(table.namespace(), table.dataset(), table.table())
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(BQError::ResponseError { error }) if error.error.code == 404 => Ok(false),
            Err(err) => Err(bq_error_to_load_error(err)),
        }
    }

    async fn update_table_expiration(
        &self,
        table: &TableIdentifier,
        expires_at: DateTime<Utc>,
    ) -> LoadResult<()> {
        self.run(&expiration_statement(table, expires_at)).await?;

        Ok(())
    }

    async fn insert_rows(
        &self,
        table: &TableIdentifier,
        rows: &[Record],
    ) -> LoadResult<Vec<RowError>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let mut request = TableDataInsertAllRequest::new();
        for row in rows {
            request
                .add_row(None, row)
                .map_err(bq_error_to_load_error)?;
        }

        let response = self
            .client
            .tabledata()
            .insert_all(table.namespace(), table.dataset(), table.table(), request)
            .await
            .map_err(bq_error_to_load_error)?;

        row_errors(response.insert_errors.unwrap_or_default())
    }

    async fn query(&self, query: &str) -> LoadResult<QueryResult> {
        query_result(self.run(query).await?)
    }

    async fn merge(&self, statement: &MergeStatement) -> LoadResult<MergeOutcome> {
        merge_outcome(self.run(&statement.to_string()).await)
    }

    async fn duplicate_key_rows(&self, query: &DuplicateKeysQuery) -> LoadResult<QueryResult> {
        self.query(&query.to_string()).await
    }
}

impl fmt::Debug for BigQueryClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BigQueryClient")
            .field("project_id", &self.project_id)
            .finish()
    }
}
