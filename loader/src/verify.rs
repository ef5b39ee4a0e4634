//! Reduces a boolean-returning query to pass or fail.

use std::fmt;

use serde_json::Value;
use tracing::warn;

use crate::error::LoadResult;
use crate::warehouse::{QueryResult, WarehouseClient};

/// Outcome of a verification query.
#[derive(Debug, Clone, PartialEq)]
pub enum Verification {
    Pass,
    Fail,
    /// The query could not be evaluated as a single boolean.
    Diagnostic(VerificationDiagnostic),
}

impl Verification {
    pub fn is_pass(&self) -> bool {
        matches!(self, Verification::Pass)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum VerificationDiagnostic {
    BadQuery { detail: String },
    UnexpectedRowCount { rows: usize },
    UnexpectedColumnCount { columns: usize },
    NonBooleanResult { value: Value },
}

impl fmt::Display for VerificationDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerificationDiagnostic::BadQuery { .. } => f.write_str("bad query"),
            VerificationDiagnostic::UnexpectedRowCount { .. } => {
                f.write_str("expected exactly one row")
            }
            VerificationDiagnostic::UnexpectedColumnCount { .. } => {
                f.write_str("expected exactly one column")
            }
            VerificationDiagnostic::NonBooleanResult { .. } => {
                f.write_str("expected boolean result")
            }
        }
    }
}

/// Classifies the result of a verification query.
///
/// Checks run in order: the query succeeded, it returned one row, that row has one column, and
/// the value is a boolean.
pub fn classify(result: LoadResult<QueryResult>) -> Verification {
    let result = match result {
        Ok(result) => result,
        Err(err) => {
            return Verification::Diagnostic(VerificationDiagnostic::BadQuery {
                detail: err.to_string(),
            });
        }
    };

    if result.row_count() != 1 {
        return Verification::Diagnostic(VerificationDiagnostic::UnexpectedRowCount {
            rows: result.row_count(),
        });
    }

    if result.column_count() != 1 {
        return Verification::Diagnostic(VerificationDiagnostic::UnexpectedColumnCount {
            columns: result.column_count(),
        });
    }

    match result.rows()[0].first() {
        Some(Value::Bool(true)) => Verification::Pass,
        Some(Value::Bool(false)) => Verification::Fail,
        other => Verification::Diagnostic(VerificationDiagnostic::NonBooleanResult {
            value: other.cloned().unwrap_or(Value::Null),
        }),
    }
}

/// Runs `query` and classifies its result. Anything but a pass is logged.
pub async fn verify<W>(warehouse: &W, query: &str) -> Verification
where
    W: WarehouseClient,
{
    let verification = classify(warehouse.query(query).await);

    match &verification {
        Verification::Pass => {}
        Verification::Fail => warn!(query, "verification failed"),
        Verification::Diagnostic(diagnostic) => {
            warn!(query, %diagnostic, details = ?diagnostic, "verification could not be evaluated")
        }
    }

    verification
}
