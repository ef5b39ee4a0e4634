use loader::SchemaSource;
use loader::error::ErrorKind;
use loader::strategy::WriteStrategy;
use loader::test_utils::{records, sorted_by, test_table};
use loader::warehouse::memory::WarehouseCall;
use serde_json::json;
use telemetry::init_test_tracing;

use crate::common::{id_value_schema, memory_loader};

#[tokio::test]
async fn replace_twice_yields_the_same_rows_test() {
    init_test_tracing();
    let loader = memory_loader(4000);
    let table = test_table("events");
    loader
        .warehouse()
        .add_table(
            table.clone(),
            id_value_schema(),
            records(json!([{"id": 9, "v": "stale"}])),
        )
        .await;
    let data = records(json!([{"id": 1, "v": "a"}, {"id": 2, "v": "b"}]));

    loader
        .load(
            data.clone(),
            "events",
            &WriteStrategy::Replace,
            SchemaSource::Explicit(id_value_schema()),
        )
        .await
        .unwrap();
    let once = sorted_by(loader.warehouse().table_rows(&table).await, "id");

    loader
        .load(
            data.clone(),
            "events",
            &WriteStrategy::Replace,
            SchemaSource::Explicit(id_value_schema()),
        )
        .await
        .unwrap();
    let twice = sorted_by(loader.warehouse().table_rows(&table).await, "id");

    assert_eq!(once, data);
    assert_eq!(twice, once);
}

#[tokio::test]
async fn replace_drops_and_creates_once_across_batches_test() {
    init_test_tracing();
    let loader = memory_loader(2);
    let table = test_table("events");
    loader
        .warehouse()
        .add_table(
            table.clone(),
            id_value_schema(),
            records(json!([{"id": 9, "v": "stale"}])),
        )
        .await;

    let report = loader
        .load(
            records(json!([
                {"id": 1, "v": "a"},
                {"id": 2, "v": "b"},
                {"id": 3, "v": "c"},
                {"id": 4, "v": "d"},
                {"id": 5, "v": "e"}
            ])),
            "events",
            &WriteStrategy::Replace,
            SchemaSource::Explicit(id_value_schema()),
        )
        .await
        .unwrap();

    assert_eq!(report.batches, 3);
    assert_eq!(report.rows, 5);
    assert_eq!(
        loader.warehouse().calls().await,
        vec![
            WarehouseCall::GetTable(table.clone()),
            WarehouseCall::DeleteTable(table.clone()),
            WarehouseCall::CreateTable {
                table: table.clone(),
                exists_ok: true
            },
            WarehouseCall::InsertRows {
                table: table.clone(),
                rows: 2
            },
            WarehouseCall::InsertRows {
                table: table.clone(),
                rows: 2
            },
            WarehouseCall::InsertRows {
                table: table.clone(),
                rows: 1
            },
        ]
    );
    assert_eq!(loader.warehouse().table_rows(&table).await.len(), 5);
}

#[tokio::test]
async fn replace_creates_a_missing_table_test() {
    init_test_tracing();
    let loader = memory_loader(4000);
    let table = test_table("fresh");

    loader
        .load(
            records(json!([{"id": 1, "v": "a"}])),
            "fresh",
            &WriteStrategy::Replace,
            SchemaSource::Explicit(id_value_schema()),
        )
        .await
        .unwrap();

    let stored = loader.warehouse().table(&table).await.unwrap();
    assert_eq!(stored.schema, id_value_schema());
    assert_eq!(stored.rows.len(), 1);
    assert!(
        !loader
            .warehouse()
            .calls()
            .await
            .contains(&WarehouseCall::DeleteTable(table))
    );
}

#[tokio::test]
async fn replace_fails_when_creation_is_rejected_test() {
    init_test_tracing();
    let loader = memory_loader(4000);
    loader.warehouse().reject_table_creation("events").await;

    let err = loader
        .load(
            records(json!([{"id": 1, "v": "a"}])),
            "events",
            &WriteStrategy::Replace,
            SchemaSource::Explicit(id_value_schema()),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::TableCreationFailed);
}
