//! BigQuery implementation of [`crate::warehouse::WarehouseClient`].

mod client;

pub use client::BigQueryClient;
