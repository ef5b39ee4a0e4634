//! Client tests against a mocked BigQuery REST API.
//!
//! Building the client also dials the BigQuery storage endpoint over gRPC, so these tests need
//! network access and are ignored by default.

use loader::merge::MergeStatement;
use loader::strategy::MergeKeys;
use loader::test_utils::test_table;
use loader::verify::{self, Verification};
use loader::warehouse::{MergeOutcome, WarehouseClient};
use serde_json::json;
use telemetry::init_test_tracing;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

use crate::common::bigquery::{MockBigQuery, error_body};
use crate::common::id_value_schema;

#[ignore]
#[tokio::test]
async fn missing_table_is_none_test() {
    init_test_tracing();
    let bigquery = MockBigQuery::start().await;

    Mock::given(method("GET"))
        .and(path(MockBigQuery::table_path("events")))
        .respond_with(ResponseTemplate::new(404).set_body_json(error_body(
            404,
            "NOT_FOUND",
            "notFound",
            "Not found: Table local-project:loader_tests.events",
        )))
        .expect(1)
        .mount(&bigquery.api)
        .await;

    let schema = bigquery
        .client
        .get_table(&test_table("events"))
        .await
        .unwrap();

    assert!(schema.is_none());
}

#[ignore]
#[tokio::test]
async fn streaming_buffer_merge_failure_is_an_outcome_test() {
    init_test_tracing();
    let bigquery = MockBigQuery::start().await;

    Mock::given(method("POST"))
        .and(path(MockBigQuery::queries_path()))
        .respond_with(ResponseTemplate::new(400).set_body_json(error_body(
            400,
            "INVALID_ARGUMENT",
            "invalidQuery",
            "UPDATE or DELETE statement over table local-project.loader_tests.events would affect rows in the streaming buffer, which is not supported",
        )))
        .expect(1)
        .mount(&bigquery.api)
        .await;

    let statement = MergeStatement::new(
        &test_table("events"),
        &test_table("events_tmp_1_ABCDEFGHIJ"),
        &MergeKeys::new(["id"]).unwrap(),
        &id_value_schema(),
    );
    let outcome = bigquery.client.merge(&statement).await.unwrap();

    assert!(matches!(outcome, MergeOutcome::StreamingBufferConflict(_)));
}

#[ignore]
#[tokio::test]
async fn query_cells_are_typed_by_column_test() {
    init_test_tracing();
    let bigquery = MockBigQuery::start().await;

    Mock::given(method("POST"))
        .and(path(MockBigQuery::queries_path()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "kind": "bigquery#queryResponse",
            "schema": {"fields": [{"name": "ok", "type": "BOOLEAN", "mode": "NULLABLE"}]},
            "jobComplete": true,
            "totalRows": "1",
            "rows": [{"f": [{"v": "true"}]}]
        })))
        .mount(&bigquery.api)
        .await;

    let verification = verify::verify(&bigquery.client, "SELECT COUNT(*) > 0 AS ok FROM t").await;

    assert_eq!(verification, Verification::Pass);
}

#[ignore]
#[tokio::test]
async fn incomplete_merge_job_is_polled_test() {
    init_test_tracing();
    let bigquery = MockBigQuery::start().await;

    Mock::given(method("POST"))
        .and(path(MockBigQuery::queries_path()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "kind": "bigquery#queryResponse",
            "jobComplete": false,
            "jobReference": {"projectId": "local-project", "jobId": "job_1", "location": "EU"}
        })))
        .expect(1)
        .mount(&bigquery.api)
        .await;
    Mock::given(method("GET"))
        .and(path(MockBigQuery::query_results_path("job_1")))
        .respond_with(ResponseTemplate::new(400).set_body_json(error_body(
            400,
            "INVALID_ARGUMENT",
            "invalidQuery",
            "UPDATE or DELETE statement over table local-project.loader_tests.events would affect rows in the streaming buffer, which is not supported",
        )))
        .expect(1)
        .mount(&bigquery.api)
        .await;

    let statement = MergeStatement::new(
        &test_table("events"),
        &test_table("events_tmp_1_ABCDEFGHIJ"),
        &MergeKeys::new(["id"]).unwrap(),
        &id_value_schema(),
    );
    let outcome = bigquery.client.merge(&statement).await.unwrap();

    assert!(matches!(outcome, MergeOutcome::StreamingBufferConflict(_)));
}
