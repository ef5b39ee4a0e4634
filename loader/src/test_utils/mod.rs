//! Helpers shared by unit and integration tests.

use config::shared::{BatchConfig, BigQueryConfig, BigQueryCredentials, LoaderConfig, MergeConfig};
use serde_json::Value;

use crate::identifier::TableIdentifier;
use crate::types::Record;

/// Project used as the default namespace by [`test_config`].
pub const TEST_PROJECT: &str = "local-project";
/// Dataset used as the default dataset by [`test_config`].
pub const TEST_DATASET: &str = "loader_tests";

/// Returns a loader configuration with the given batch size and default merge settings.
pub fn test_config(max_batch_size: usize) -> LoaderConfig {
    LoaderConfig {
        destination: BigQueryConfig {
            project_id: TEST_PROJECT.to_string(),
            default_dataset: Some(TEST_DATASET.to_string()),
            credentials: BigQueryCredentials::ApplicationDefault,
        },
        batch: BatchConfig {
            max_size: max_batch_size,
        },
        merge: MergeConfig::default(),
    }
}

/// Returns the identifier `table` resolves to under [`test_config`].
pub fn test_table(table: &str) -> TableIdentifier {
    TableIdentifier::new(TEST_PROJECT, TEST_DATASET, table)
}

/// Converts a JSON object into a [`Record`].
///
/// # Panics
///
/// Panics if `value` is not an object.
pub fn record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}

/// Converts a JSON array of objects into records.
///
/// # Panics
///
/// Panics if `value` is not an array of objects.
pub fn records(value: Value) -> Vec<Record> {
    match value {
        Value::Array(items) => items.into_iter().map(record).collect(),
        other => panic!("expected a JSON array, got {other}"),
    }
}

/// Sorts rows by the string form of `column`, for order-insensitive comparisons.
pub fn sorted_by(mut rows: Vec<Record>, column: &str) -> Vec<Record> {
    rows.sort_by_key(|row| row.get(column).map(Value::to_string).unwrap_or_default());
    rows
}
