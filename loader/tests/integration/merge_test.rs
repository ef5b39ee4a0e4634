use chrono::{Duration, Utc};
use loader::SchemaSource;
use loader::error::ErrorKind;
use loader::merge::{DUPLICATE_SAMPLE_LIMIT, DuplicateKeysQuery};
use loader::reconcile::MergeWarning;
use loader::strategy::{MergeKeys, WriteStrategy};
use loader::test_utils::{records, sorted_by, test_table};
use loader::warehouse::memory::WarehouseCall;
use serde_json::json;
use telemetry::init_test_tracing;

use crate::common::{id_value_schema, memory_loader};

#[tokio::test]
async fn merge_updates_matches_and_inserts_the_rest_test() {
    init_test_tracing();
    let loader = memory_loader(4000);
    let table = test_table("events");
    loader
        .warehouse()
        .add_table(
            table.clone(),
            id_value_schema(),
            records(json!([{"id": 1, "v": "a"}])),
        )
        .await;

    let before = Utc::now();
    let report = loader
        .load(
            records(json!([{"id": 1, "v": "b"}, {"id": 2, "v": "c"}])),
            "events",
            &WriteStrategy::merge(["id"]).unwrap(),
            SchemaSource::Auto,
        )
        .await
        .unwrap();
    let after = Utc::now();

    let rows = sorted_by(loader.warehouse().table_rows(&table).await, "id");
    assert_eq!(
        rows,
        records(json!([{"id": 1, "v": "b"}, {"id": 2, "v": "c"}]))
    );
    assert!(report.warnings.is_empty());

    assert_eq!(report.temp_tables.len(), 1);
    let handle = &report.temp_tables[0];
    assert!(handle.expires_at >= before + Duration::hours(1));
    assert!(handle.expires_at <= after + Duration::hours(1));

    // The staging table is left for the warehouse to expire.
    let staged = loader
        .warehouse()
        .table(&handle.identifier)
        .await
        .unwrap();
    assert_eq!(staged.expires_at, Some(handle.expires_at));
    assert_eq!(staged.rows.len(), 2);
}

#[tokio::test]
async fn merge_twice_keeps_one_row_per_key_test() {
    init_test_tracing();
    let loader = memory_loader(1);
    let table = test_table("events");
    loader
        .warehouse()
        .add_table(table.clone(), id_value_schema(), vec![])
        .await;
    let strategy = WriteStrategy::merge(["id"]).unwrap();
    let batch = records(json!([{"id": 1, "v": "a"}, {"id": 2, "v": "b"}]));

    for _ in 0..2 {
        loader
            .load(batch.clone(), "events", &strategy, SchemaSource::Auto)
            .await
            .unwrap();
    }

    assert_eq!(
        sorted_by(loader.warehouse().table_rows(&table).await, "id"),
        batch
    );
}

#[tokio::test]
async fn merge_keys_must_be_columns_test() {
    init_test_tracing();
    let loader = memory_loader(4000);
    let table = test_table("events");
    loader
        .warehouse()
        .add_table(table.clone(), id_value_schema(), vec![])
        .await;

    let err = loader
        .load(
            records(json!([{"id": 1, "v": "a"}])),
            "events",
            &WriteStrategy::merge(["missing"]).unwrap(),
            SchemaSource::Auto,
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ConfigurationError);
    assert_eq!(
        loader.warehouse().calls().await,
        vec![WarehouseCall::GetTable(table)]
    );
}

#[tokio::test]
async fn streaming_buffer_conflict_is_a_warning_test() {
    init_test_tracing();
    let loader = memory_loader(1);
    let table = test_table("events");
    loader
        .warehouse()
        .add_table(
            table.clone(),
            id_value_schema(),
            records(json!([{"id": 1, "v": "a"}])),
        )
        .await;
    loader.warehouse().set_streaming_buffer(&table, true).await;

    let report = loader
        .load(
            records(json!([{"id": 1, "v": "b"}, {"id": 2, "v": "c"}])),
            "events",
            &WriteStrategy::merge(["id"]).unwrap(),
            SchemaSource::Auto,
        )
        .await
        .unwrap();

    assert_eq!(report.batches, 2);
    assert_eq!(report.warnings.len(), 2);
    assert!(
        report
            .warnings
            .iter()
            .all(|warning| matches!(warning, MergeWarning::StreamingBuffer { .. }))
    );
    assert_eq!(
        loader.warehouse().table_rows(&table).await,
        records(json!([{"id": 1, "v": "a"}]))
    );
}

#[tokio::test]
async fn duplicate_keys_in_batch_are_reported_test() {
    init_test_tracing();
    let loader = memory_loader(4000);
    let table = test_table("events");
    loader
        .warehouse()
        .add_table(
            table.clone(),
            id_value_schema(),
            records(json!([{"id": 1, "v": "a"}])),
        )
        .await;

    let report = loader
        .load(
            records(json!([{"id": 1, "v": "b"}, {"id": 1, "v": "c"}])),
            "events",
            &WriteStrategy::merge(["id"]).unwrap(),
            SchemaSource::Auto,
        )
        .await
        .unwrap();

    assert_eq!(
        report.warnings,
        vec![MergeWarning::DuplicateBatchKeys {
            batch_index: 0,
            keys: vec![vec![json!(1)]],
        }]
    );
    assert!(
        !loader
            .warehouse()
            .calls()
            .await
            .iter()
            .any(|call| matches!(call, WarehouseCall::DuplicateKeyRows(_)))
    );
    assert_eq!(
        loader.warehouse().table_rows(&table).await,
        records(json!([{"id": 1, "v": "a"}]))
    );
}

#[tokio::test]
async fn duplicate_keys_in_destination_are_sampled_test() {
    init_test_tracing();
    let loader = memory_loader(4000);
    let table = test_table("events");
    loader
        .warehouse()
        .add_table(
            table.clone(),
            id_value_schema(),
            records(json!([
                {"id": 1, "v": "a"},
                {"id": 2, "v": "x"},
                {"id": 2, "v": "y"}
            ])),
        )
        .await;
    loader.warehouse().set_ambiguous_match(&table, true).await;

    let report = loader
        .load(
            records(json!([{"id": 1, "v": "b"}, {"id": 2, "v": "z"}])),
            "events",
            &WriteStrategy::merge(["id"]).unwrap(),
            SchemaSource::Auto,
        )
        .await
        .unwrap();

    assert_eq!(
        report.warnings,
        vec![MergeWarning::DuplicateDestinationKeys {
            batch_index: 0,
            rows: records(json!([{"id": 2, "v": "x"}, {"id": 2, "v": "y"}])),
        }]
    );
    assert_eq!(
        loader.warehouse().table_rows(&table).await.len(),
        3,
        "an ambiguous merge applies nothing"
    );
}

#[tokio::test]
async fn failing_duplicate_diagnostic_does_not_fail_the_load_test() {
    init_test_tracing();
    let loader = memory_loader(4000);
    let table = test_table("events");
    let keys = MergeKeys::new(["id"]).unwrap();
    loader
        .warehouse()
        .add_table(table.clone(), id_value_schema(), vec![])
        .await;
    loader.warehouse().set_ambiguous_match(&table, true).await;
    loader
        .warehouse()
        .set_query_error(
            DuplicateKeysQuery::new(&table, &keys, DUPLICATE_SAMPLE_LIMIT).to_string(),
            "Access Denied: Table events",
        )
        .await;

    let report = loader
        .load(
            records(json!([{"id": 1, "v": "a"}])),
            "events",
            &WriteStrategy::Merge(keys),
            SchemaSource::Auto,
        )
        .await
        .unwrap();

    assert_eq!(report.batches, 1);
    assert!(report.warnings.is_empty());
    assert!(
        loader
            .warehouse()
            .calls()
            .await
            .iter()
            .any(|call| matches!(call, WarehouseCall::DuplicateKeyRows(_)))
    );
}

#[tokio::test]
async fn fatal_merge_failure_aborts_the_load_test() {
    init_test_tracing();
    let loader = memory_loader(1);
    let table = test_table("events");
    loader
        .warehouse()
        .add_table(table.clone(), id_value_schema(), vec![])
        .await;
    loader
        .warehouse()
        .fail_merges("Syntax error: Unexpected keyword MERGE")
        .await;

    let err = loader
        .load(
            records(json!([{"id": 1, "v": "a"}, {"id": 2, "v": "b"}])),
            "events",
            &WriteStrategy::merge(["id"]).unwrap(),
            SchemaSource::Auto,
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::MergeExecutionFailed);
    let merges = loader
        .warehouse()
        .calls()
        .await
        .into_iter()
        .filter(|call| matches!(call, WarehouseCall::Merge { .. }))
        .count();
    assert_eq!(merges, 1);
}

#[tokio::test]
async fn rejected_temp_table_creation_fails_the_load_test() {
    init_test_tracing();
    let loader = memory_loader(4000);
    let table = test_table("events");
    loader
        .warehouse()
        .add_table(table.clone(), id_value_schema(), vec![])
        .await;
    loader.warehouse().reject_table_creation("events_tmp_").await;

    let err = loader
        .load(
            records(json!([{"id": 1, "v": "a"}])),
            "events",
            &WriteStrategy::merge(["id"]).unwrap(),
            SchemaSource::Auto,
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::TableCreationFailed);
}
