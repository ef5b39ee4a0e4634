//! Batch loader for BigQuery tables.
//!
//! Records are split into batches and written with one of three [`strategy::WriteStrategy`]s:
//! appended, replacing the table, or merged on key columns through expiring staging tables.
//! The warehouse is reached through the [`warehouse::WarehouseClient`] trait, implemented for
//! BigQuery (feature `bigquery`) and in memory.

pub mod batch;
#[cfg(feature = "bigquery")]
pub mod bigquery;
#[cfg(feature = "bigquery")]
pub mod encryption;
pub mod error;
pub mod identifier;
pub mod loader;
mod macros;
pub mod merge;
pub mod reconcile;
pub mod schema;
pub mod strategy;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;
pub mod verify;
pub mod warehouse;

pub use loader::{Loader, SchemaSource};
