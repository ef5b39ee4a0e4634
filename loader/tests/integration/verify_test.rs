use loader::test_utils::records;
use loader::verify::{Verification, VerificationDiagnostic};
use loader::warehouse::QueryResult;
use serde_json::json;
use telemetry::init_test_tracing;

use crate::common::memory_loader;

const CHECK: &str = "SELECT COUNT(*) = 4 FROM `local-project.loader_tests.events`";

fn single_value(value: serde_json::Value) -> QueryResult {
    QueryResult::new(vec!["f0_".to_string()], vec![vec![value]])
}

#[tokio::test]
async fn verify_true_and_false_test() {
    init_test_tracing();
    let loader = memory_loader(4000);

    loader
        .warehouse()
        .set_query_result(CHECK, single_value(json!(true)))
        .await;
    assert_eq!(loader.verify(CHECK).await, Verification::Pass);

    loader
        .warehouse()
        .set_query_result(CHECK, single_value(json!(false)))
        .await;
    assert_eq!(loader.verify(CHECK).await, Verification::Fail);
}

#[tokio::test]
async fn verify_two_rows_is_a_diagnostic_test() {
    init_test_tracing();
    let loader = memory_loader(4000);
    loader
        .warehouse()
        .set_query_result(
            CHECK,
            QueryResult::new(
                vec!["f0_".to_string()],
                vec![vec![json!(true)], vec![json!(true)]],
            ),
        )
        .await;

    match loader.verify(CHECK).await {
        Verification::Diagnostic(diagnostic) => {
            assert_eq!(diagnostic.to_string(), "expected exactly one row")
        }
        other => panic!("unexpected verification {other:?}"),
    }
}

#[tokio::test]
async fn verify_non_boolean_is_a_diagnostic_test() {
    init_test_tracing();
    let loader = memory_loader(4000);
    loader
        .warehouse()
        .set_query_result(CHECK, single_value(json!(4)))
        .await;

    assert_eq!(
        loader.verify(CHECK).await,
        Verification::Diagnostic(VerificationDiagnostic::NonBooleanResult { value: json!(4) })
    );
}

#[tokio::test]
async fn verify_bad_query_is_a_diagnostic_test() {
    init_test_tracing();
    let loader = memory_loader(4000);

    match loader.verify("SELECT nonsense").await {
        Verification::Diagnostic(diagnostic @ VerificationDiagnostic::BadQuery { .. }) => {
            assert_eq!(diagnostic.to_string(), "bad query")
        }
        other => panic!("unexpected verification {other:?}"),
    }
}

#[tokio::test]
async fn execute_returns_rows_keyed_by_column_test() {
    init_test_tracing();
    let loader = memory_loader(4000);
    loader
        .warehouse()
        .set_query_result(
            "SELECT 1 AS one",
            QueryResult::new(vec!["one".to_string()], vec![vec![json!(1)]]),
        )
        .await;

    let result = loader.execute("SELECT 1 AS one").await.unwrap();

    assert_eq!(result.records(), records(json!([{"one": 1}])));
}
