//! Loads a JSON array of records into a BigQuery table.
//!
//! Settings come from `./configuration` when present (see [`config::load_config`]). Flags
//! override them and can stand in for the whole destination when there is no such directory.
//!
//! ```text
//! cargo run -p loader --example bigquery -- \
//!     --project-id my-project --dataset raw --sa-key-file key.json \
//!     --table events --records events.json --strategy merge --merge-key id
//! ```

use std::error::Error;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use config::shared::{BatchConfig, BigQueryConfig, BigQueryCredentials, LoaderConfig, MergeConfig};
use config::{LoadConfigError, load_config};
use loader::strategy::WriteStrategy;
use loader::types::Record;
use loader::verify::Verification;
use loader::{Loader, SchemaSource};
use telemetry::init_tracing;
use tracing::{info, warn};

#[derive(Copy, Clone, Debug, ValueEnum)]
enum Strategy {
    Insert,
    Replace,
    Merge,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// BigQuery project id. Required without a configuration directory.
    #[arg(long)]
    project_id: Option<String>,

    /// Dataset used when the table name has none.
    #[arg(long)]
    dataset: Option<String>,

    /// Service account key file. Application default credentials are used when omitted.
    #[arg(long)]
    sa_key_file: Option<String>,

    /// Destination table, `table`, `dataset.table` or `project.dataset.table`.
    #[arg(long)]
    table: String,

    /// JSON file holding an array of records.
    #[arg(long)]
    records: PathBuf,

    #[arg(long, value_enum, default_value = "insert")]
    strategy: Strategy,

    /// Merge key column, repeat for composite keys.
    #[arg(long = "merge-key")]
    merge_keys: Vec<String>,

    /// JSON schema file. The destination's schema is used when omitted.
    #[arg(long)]
    schema: Option<PathBuf>,

    /// Rows per insert request.
    #[arg(long)]
    max_batch_size: Option<usize>,

    /// Boolean query checked after the load.
    #[arg(long)]
    verify: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    init_tracing("bigquery")?;

    main_impl().await
}

async fn main_impl() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    let config = loader_config(&args, load_config())?;

    let strategy = match args.strategy {
        Strategy::Insert => WriteStrategy::Insert,
        Strategy::Replace => WriteStrategy::Replace,
        Strategy::Merge => WriteStrategy::merge(args.merge_keys)?,
    };
    let schema = match args.schema {
        Some(path) => SchemaSource::File(path),
        None => SchemaSource::Auto,
    };

    let contents = tokio::fs::read(&args.records).await?;
    let records: Vec<Record> = serde_json::from_slice(&contents)?;

    let loader = Loader::connect(config).await?;
    let report = loader.load(records, &args.table, &strategy, schema).await?;

    info!(
        table = %report.destination,
        batches = report.batches,
        rows = report.rows,
        temp_tables = report.temp_tables.len(),
        "load finished"
    );
    for warning in &report.warnings {
        warn!(?warning, "merge warning");
    }

    if let Some(query) = args.verify {
        let verification = loader.verify(&query).await;
        info!(passed = verification.is_pass(), "verification finished");
        check_verification(verification)?;
    }

    Ok(())
}

/// Applies the flags on top of the settings loaded from `./configuration`.
fn loader_config(
    args: &Args,
    loaded: Result<LoaderConfig, LoadConfigError>,
) -> Result<LoaderConfig, Box<dyn Error>> {
    let mut config = match loaded {
        Ok(config) => config,
        Err(LoadConfigError::MissingConfigurationDirectory(_)) => {
            let project_id = args
                .project_id
                .clone()
                .ok_or("--project-id is required without a configuration directory")?;
            LoaderConfig {
                destination: BigQueryConfig {
                    project_id,
                    default_dataset: None,
                    credentials: BigQueryCredentials::default(),
                },
                batch: BatchConfig::default(),
                merge: MergeConfig::default(),
            }
        }
        Err(err) => return Err(err.into()),
    };

    if let Some(project_id) = &args.project_id {
        config.destination.project_id = project_id.clone();
    }
    if let Some(dataset) = &args.dataset {
        config.destination.default_dataset = Some(dataset.clone());
    }
    if let Some(path) = &args.sa_key_file {
        config.destination.credentials =
            BigQueryCredentials::ServiceAccountKeyPath { path: path.clone() };
    }
    if let Some(max_size) = args.max_batch_size {
        config.batch.max_size = max_size;
    }

    Ok(config)
}

fn check_verification(verification: Verification) -> Result<(), Box<dyn Error>> {
    match verification {
        Verification::Pass => Ok(()),
        other => Err(format!("verification did not pass: {other:?}").into()),
    }
}
