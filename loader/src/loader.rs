//! Entry point tying configuration, schema sourcing and reconciliation together.

use std::path::PathBuf;

use config::shared::LoaderConfig;
#[cfg(feature = "bigquery")]
use gcp_bigquery_client::model::table_field_schema::TableFieldSchema;
use tracing::info;

use crate::batch;
use crate::bail;
use crate::error::{ErrorKind, LoadResult};
use crate::identifier::TableIdentifier;
use crate::load_error;
use crate::reconcile::{LoadReport, Reconciler};
use crate::schema::{Schema, SchemaField};
use crate::strategy::WriteStrategy;
use crate::types::{Record, RecordBatch};
use crate::verify::{self, Verification};
use crate::warehouse::{QueryResult, WarehouseClient};

/// Where the schema of a load comes from.
#[derive(Debug, Clone)]
pub enum SchemaSource {
    /// Inserts and merges use the destination's schema; replaces infer it from the records.
    Auto,
    /// Inferred from the records being loaded.
    Infer,
    /// The flat field list.
    Flat(Vec<SchemaField>),
    /// A JSON file holding the flat field list.
    File(PathBuf),
    Explicit(Schema),
    /// Engine-native field descriptors.
    #[cfg(feature = "bigquery")]
    Native(Vec<TableFieldSchema>),
}

/// Loads batches of records into warehouse tables.
#[derive(Debug)]
pub struct Loader<W> {
    warehouse: W,
    config: LoaderConfig,
}

impl<W> Loader<W>
where
    W: WarehouseClient,
{
    /// Creates a loader, rejecting an invalid configuration.
    pub fn new(warehouse: W, config: LoaderConfig) -> LoadResult<Loader<W>> {
        config.validate()?;

        Ok(Loader { warehouse, config })
    }

    pub fn warehouse(&self) -> &W {
        &self.warehouse
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Qualifies `raw` with the configured project and default dataset.
    pub fn resolve(&self, raw: &str) -> LoadResult<TableIdentifier> {
        TableIdentifier::resolve(
            raw,
            Some(&self.config.destination.project_id),
            self.config.destination.default_dataset.as_deref(),
        )
    }

    /// Writes `records` to `table` with `strategy`.
    ///
    /// The table name is resolved and the records split before anything is sent to the
    /// warehouse. Loading no records is a no-op returning an empty report.
    pub async fn load(
        &self,
        records: Vec<Record>,
        table: &str,
        strategy: &WriteStrategy,
        schema: SchemaSource,
    ) -> LoadResult<LoadReport> {
        let destination = self.resolve(table)?;
        let batches = batch::split(records, self.config.batch.max_size)?;

        if batches.is_empty() {
            info!(table = %destination, %strategy, "no records to load");
            return Ok(LoadReport::empty(destination));
        }

        let schema = self
            .resolve_schema(&destination, strategy, schema, &batches)
            .await?;

        Reconciler::new(
            &self.warehouse,
            &destination,
            &schema,
            strategy,
            self.config.merge.temp_table_expiration_hours,
        )
        .run(batches)
        .await
    }

    /// Runs a boolean verification query, see [`verify::verify`].
    pub async fn verify(&self, query: &str) -> Verification {
        verify::verify(&self.warehouse, query).await
    }

    /// Runs an arbitrary statement and returns its rows.
    pub async fn execute(&self, query: &str) -> LoadResult<QueryResult> {
        self.warehouse.query(query).await.map_err(|err| {
            if err.kind() == ErrorKind::DestinationQueryFailed {
                err
            } else {
                load_error!(
                    ErrorKind::DestinationQueryFailed,
                    "Statement execution failed",
                    err
                )
            }
        })
    }

    async fn resolve_schema(
        &self,
        destination: &TableIdentifier,
        strategy: &WriteStrategy,
        source: SchemaSource,
        batches: &[RecordBatch],
    ) -> LoadResult<Schema> {
        let rows = || batches.iter().flat_map(|batch| batch.rows());

        match source {
            SchemaSource::Auto if *strategy == WriteStrategy::Replace => Schema::from_records(rows()),
            SchemaSource::Auto => match self.warehouse.get_table(destination).await? {
                Some(schema) => Ok(schema),
                None => bail!(
                    ErrorKind::TableNotFound,
                    "Destination table does not exist",
                    destination
                ),
            },
            SchemaSource::Infer => Schema::from_records(rows()),
            SchemaSource::Flat(fields) => Schema::from_flat(fields),
            SchemaSource::File(path) => Schema::from_file(path).await,
            SchemaSource::Explicit(schema) => Ok(schema),
            #[cfg(feature = "bigquery")]
            SchemaSource::Native(fields) => Schema::from_native(&fields),
        }
    }
}

#[cfg(feature = "bigquery")]
mod connect {
    use config::shared::{BigQueryCredentials, LoaderConfig};
    use secrecy::ExposeSecret;

    use super::Loader;
    use crate::bigquery::BigQueryClient;
    use crate::encryption::install_crypto_provider;
    use crate::error::LoadResult;

    impl Loader<BigQueryClient> {
        /// Creates a loader backed by BigQuery, authenticating with the configured credentials.
        pub async fn connect(config: LoaderConfig) -> LoadResult<Loader<BigQueryClient>> {
            config.validate()?;
            install_crypto_provider();

            let project_id = config.destination.project_id.clone();
            let client = match &config.destination.credentials {
                BigQueryCredentials::ServiceAccountKeyPath { path } => {
                    BigQueryClient::new_with_key_path(project_id, path).await?
                }
                BigQueryCredentials::ServiceAccountKey { key } => {
                    BigQueryClient::new_with_key(project_id, key.expose_secret()).await?
                }
                BigQueryCredentials::ApplicationDefault => {
                    BigQueryClient::new_with_adc(project_id).await?
                }
            };

            Loader::new(client, config)
        }
    }
}
