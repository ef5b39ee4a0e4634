
#[cfg(feature = "bigquery")]
mod bigquery_client_test;
mod merge_test;
mod replace_test;
mod schema_source_test;
mod verify_test;
