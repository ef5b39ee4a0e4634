use std::fmt;

use serde_json::Value;

use crate::bail;
use crate::error::{ErrorKind, LoadResult};
use crate::schema::{FieldMode, FieldType, Schema};
use crate::types::Record;

/// How a batch of records is written to its destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteStrategy {
    /// Appends to an existing table.
    Insert,
    /// Drops and recreates the table with the first batch, then appends the rest.
    Replace,
    /// Stages each batch in a temporary table and merges it on the key columns.
    Merge(MergeKeys),
}

impl WriteStrategy {
    /// Convenience for `WriteStrategy::Merge(MergeKeys::new(keys)?)`.
    pub fn merge<I, S>(keys: I) -> LoadResult<WriteStrategy>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Ok(WriteStrategy::Merge(MergeKeys::new(keys)?))
    }

    pub fn name(&self) -> &'static str {
        match self {
            WriteStrategy::Insert => "insert",
            WriteStrategy::Replace => "replace",
            WriteStrategy::Merge(_) => "merge",
        }
    }
}

impl fmt::Display for WriteStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteStrategy::Merge(keys) => write!(f, "merge on ({keys})"),
            other => f.write_str(other.name()),
        }
    }
}

/// Non-empty, ordered list of key columns for a merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeKeys(Vec<String>);

impl MergeKeys {
    pub fn new<I, S>(keys: I) -> LoadResult<MergeKeys>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let keys: Vec<String> = keys.into_iter().map(Into::into).collect();

        if keys.is_empty() {
            bail!(
                ErrorKind::ConfigurationError,
                "Merge requires at least one key column"
            );
        }

        if let Some(blank) = keys.iter().find(|key| key.trim().is_empty()) {
            bail!(
                ErrorKind::ConfigurationError,
                "Merge key columns cannot be blank",
                format!("got `{blank}`")
            );
        }

        Ok(MergeKeys(keys))
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Returns the key values of `row` in a form where equal keys compare equal, or [`None`] if
    /// any of them is `NULL` or missing.
    ///
    /// Integral floats compare equal to integers, so `1` and `1.0` are the same key.
    pub fn comparable_values(&self, row: &Record) -> Option<Vec<String>> {
        self.iter()
            .map(|key| match row.get(key) {
                None | Some(Value::Null) => None,
                Some(value) => Some(comparable_value(value)),
            })
            .collect()
    }

    /// Checks every key is a top-level scalar, non-repeated column of `schema`.
    pub fn validate_against(&self, schema: &Schema) -> LoadResult<()> {
        for key in self.iter() {
            let Some(field) = schema.field(key) else {
                bail!(
                    ErrorKind::ConfigurationError,
                    "Merge key is not a column of the destination schema",
                    format!("key `{key}` not found")
                );
            };

            if field.field_type == FieldType::Record || field.mode == FieldMode::Repeated {
                bail!(
                    ErrorKind::ConfigurationError,
                    "Merge keys must be scalar, non-repeated columns",
                    format!("key `{key}` is {} {}", field.mode, field.field_type)
                );
            }
        }

        Ok(())
    }
}

fn comparable_value(value: &Value) -> String {
    let Value::Number(number) = value else {
        return value.to_string();
    };
    if number.is_i64() || number.is_u64() {
        return number.to_string();
    }

    match number.as_f64() {
        Some(float) if float.fract() == 0.0 && float.abs() < i64::MAX as f64 => {
            (float as i64).to_string()
        }
        _ => number.to_string(),
    }
}

impl fmt::Display for MergeKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(", "))
    }
}
