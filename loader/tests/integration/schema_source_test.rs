use std::io::Write;

use loader::SchemaSource;
use loader::error::ErrorKind;
use loader::schema::{FieldMode, FieldType, SchemaField};
use loader::strategy::WriteStrategy;
use loader::test_utils::{records, test_table};
use serde_json::json;
use telemetry::init_test_tracing;

use crate::common::{id_value_schema, memory_loader};

#[tokio::test]
async fn replace_with_inferred_nested_schema_test() {
    init_test_tracing();
    let loader = memory_loader(4000);
    let table = test_table("orders");

    loader
        .load(
            records(json!([
                {"id": 1, "placed_at": "2024-05-01T10:00:00Z", "lines": [{"sku": "a", "qty": 1}]},
                {"id": 2, "placed_at": null, "lines": [{"sku": "b", "qty": 2.5}]}
            ])),
            "orders",
            &WriteStrategy::Replace,
            SchemaSource::Infer,
        )
        .await
        .unwrap();

    let stored = loader.warehouse().table(&table).await.unwrap();
    assert_eq!(
        stored.schema.fields(),
        &[
            SchemaField::new("id", FieldType::Integer),
            SchemaField::record(
                "lines",
                vec![
                    SchemaField::new("qty", FieldType::Float),
                    SchemaField::new("sku", FieldType::String),
                ]
            )
            .with_mode(FieldMode::Repeated),
            SchemaField::new("placed_at", FieldType::Timestamp),
        ]
    );
}

#[tokio::test]
async fn schema_from_file_test() {
    init_test_tracing();
    let loader = memory_loader(4000);
    let table = test_table("events");
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"[{{"name": "id", "type": "INT64", "mode": "REQUIRED"}}, {{"name": "v", "type": "STRING"}}]"#
    )
    .unwrap();

    loader
        .load(
            records(json!([{"id": 1, "v": "a"}])),
            "events",
            &WriteStrategy::Replace,
            SchemaSource::File(file.path().to_path_buf()),
        )
        .await
        .unwrap();

    let stored = loader.warehouse().table(&table).await.unwrap();
    assert_eq!(stored.schema, id_value_schema());
}

#[tokio::test]
async fn missing_schema_file_test() {
    init_test_tracing();
    let loader = memory_loader(4000);
    let dir = tempfile::tempdir().unwrap();

    let err = loader
        .load(
            records(json!([{"id": 1}])),
            "events",
            &WriteStrategy::Replace,
            SchemaSource::File(dir.path().join("schema.json")),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::SchemaFileNotFound);
    assert!(loader.warehouse().calls().await.is_empty());
}

#[tokio::test]
async fn unresolvable_inference_fails_before_writing_test() {
    init_test_tracing();
    let loader = memory_loader(4000);

    let err = loader
        .load(
            records(json!([{"id": 1, "note": null}])),
            "events",
            &WriteStrategy::Replace,
            SchemaSource::Infer,
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::SchemaInferenceFailed);
    assert!(loader.warehouse().calls().await.is_empty());
}

#[tokio::test]
async fn flat_schema_source_is_validated_test() {
    init_test_tracing();
    let loader = memory_loader(4000);

    let err = loader
        .load(
            records(json!([{"id": 1}])),
            "events",
            &WriteStrategy::Replace,
            SchemaSource::Flat(vec![
                SchemaField::new("id", FieldType::Integer),
                SchemaField::new("ID", FieldType::String),
            ]),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidSchema);
}
