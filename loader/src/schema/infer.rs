use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::Value;

use crate::bail;
use crate::error::{ErrorKind, LoadResult};
use crate::schema::{FieldMode, FieldType, Schema, SchemaField};
use crate::types::Record;

/// What has been learned about one field so far.
#[derive(Debug, Default)]
struct Candidate {
    repeated: Option<bool>,
    shape: Shape,
}

#[derive(Debug, Default)]
enum Shape {
    /// Only nulls, empty arrays or empty objects have been seen.
    #[default]
    Unresolved,
    Scalar(FieldType),
    Record(BTreeMap<String, Candidate>),
}

/// Infers a schema from sample records.
///
/// Every field that only ever held nulls (or empty arrays/objects) is reported in a single
/// [`ErrorKind::SchemaInferenceFailed`] error, since its type cannot be known.
pub(super) fn infer_schema<'a, I>(records: I) -> LoadResult<Schema>
where
    I: IntoIterator<Item = &'a Record>,
{
    let mut root: BTreeMap<String, Candidate> = BTreeMap::new();
    let mut seen = 0;
    for (row, record) in records.into_iter().enumerate() {
        for (name, value) in record {
            root.entry(name.clone())
                .or_default()
                .observe(name, value, row)?;
        }
        seen += 1;
    }

    if seen == 0 {
        bail!(
            ErrorKind::SchemaInferenceFailed,
            "Cannot infer a schema without records"
        );
    }

    let mut unresolved = Vec::new();
    let fields = finish_level(root, "", &mut unresolved);

    if !unresolved.is_empty() {
        bail!(
            ErrorKind::SchemaInferenceFailed,
            "Some fields have no values to infer a type from, provide a schema",
            format!("unresolved fields: {}", unresolved.join(", "))
        );
    }

    Schema::from_flat(fields)
}

impl Candidate {
    fn observe(&mut self, path: &str, value: &Value, row: usize) -> LoadResult<()> {
        match value {
            Value::Null => Ok(()),
            Value::Array(items) => {
                self.set_repeated(true, path, row)?;
                for item in items {
                    if item.is_array() {
                        bail!(
                            ErrorKind::SchemaInferenceFailed,
                            "Nested arrays cannot be represented",
                            format!("`{path}` holds an array of arrays in row {row}")
                        );
                    }
                    self.observe_element(path, item, row)?;
                }
                Ok(())
            }
            other => {
                self.set_repeated(false, path, row)?;
                self.observe_element(path, other, row)
            }
        }
    }

    fn set_repeated(&mut self, repeated: bool, path: &str, row: usize) -> LoadResult<()> {
        match self.repeated {
            Some(previous) if previous != repeated => bail!(
                ErrorKind::SchemaInferenceFailed,
                "Field mixes arrays and single values",
                format!("`{path}` changes between array and single value in row {row}")
            ),
            _ => {
                self.repeated = Some(repeated);
                Ok(())
            }
        }
    }

    fn observe_element(&mut self, path: &str, value: &Value, row: usize) -> LoadResult<()> {
        if let Value::Object(map) = value {
            if let Shape::Unresolved = self.shape {
                self.shape = Shape::Record(BTreeMap::new());
            }
            let Shape::Record(children) = &mut self.shape else {
                bail!(
                    ErrorKind::SchemaInferenceFailed,
                    "Field mixes records and scalar values",
                    format!("`{path}` holds an object in row {row} and a scalar elsewhere")
                );
            };
            for (name, child) in map {
                children
                    .entry(name.clone())
                    .or_default()
                    .observe(&format!("{path}.{name}"), child, row)?;
            }
            return Ok(());
        }

        let Some(observed) = scalar_type(value) else {
            return Ok(());
        };

        self.shape = match &self.shape {
            Shape::Unresolved => Shape::Scalar(observed),
            Shape::Scalar(current) => match widen(*current, observed) {
                Some(widened) => Shape::Scalar(widened),
                None => bail!(
                    ErrorKind::SchemaInferenceFailed,
                    "Field holds incompatible value types",
                    format!("`{path}` is {current} but row {row} holds {observed}")
                ),
            },
            Shape::Record(_) => bail!(
                ErrorKind::SchemaInferenceFailed,
                "Field mixes records and scalar values",
                format!("`{path}` holds a scalar in row {row} and an object elsewhere")
            ),
        };

        Ok(())
    }
}

fn finish_level(
    candidates: BTreeMap<String, Candidate>,
    parent: &str,
    unresolved: &mut Vec<String>,
) -> Vec<SchemaField> {
    let mut fields = Vec::with_capacity(candidates.len());

    for (name, candidate) in candidates {
        let path = if parent.is_empty() {
            name.clone()
        } else {
            format!("{parent}.{name}")
        };
        let mode = if candidate.repeated == Some(true) {
            FieldMode::Repeated
        } else {
            FieldMode::Nullable
        };

        match candidate.shape {
            Shape::Unresolved => unresolved.push(path),
            Shape::Scalar(field_type) => {
                fields.push(SchemaField::new(name, field_type).with_mode(mode))
            }
            Shape::Record(children) if children.is_empty() => unresolved.push(path),
            Shape::Record(children) => {
                let nested = finish_level(children, &path, unresolved);
                if !nested.is_empty() {
                    fields.push(SchemaField::record(name, nested).with_mode(mode));
                }
            }
        }
    }

    fields
}

fn scalar_type(value: &Value) -> Option<FieldType> {
    match value {
        Value::Bool(_) => Some(FieldType::Boolean),
        Value::Number(number) if number.is_i64() || number.is_u64() => Some(FieldType::Integer),
        Value::Number(_) => Some(FieldType::Float),
        Value::String(text) => Some(string_type(text)),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// Detects temporal types in string values, falling back to `STRING`.
fn string_type(text: &str) -> FieldType {
    const TIMESTAMP_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];
    const ZONED_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%.f %:z"];

    let text = text.trim();
    if DateTime::parse_from_rfc3339(text).is_ok()
        || ZONED_FORMATS
            .iter()
            .any(|format| DateTime::parse_from_str(text, format).is_ok())
        || TIMESTAMP_FORMATS
            .iter()
            .any(|format| NaiveDateTime::parse_from_str(text, format).is_ok())
        || text
            .strip_suffix(" UTC")
            .is_some_and(|naive| NaiveDateTime::parse_from_str(naive, TIMESTAMP_FORMATS[0]).is_ok())
    {
        return FieldType::Timestamp;
    }

    if NaiveDate::parse_from_str(text, "%Y-%m-%d").is_ok() {
        return FieldType::Date;
    }

    if NaiveTime::parse_from_str(text, "%H:%M:%S%.f").is_ok() {
        return FieldType::Time;
    }

    FieldType::String
}

/// Returns the narrowest type holding both observations, if any.
fn widen(current: FieldType, observed: FieldType) -> Option<FieldType> {
    use FieldType::*;

    match (current, observed) {
        (a, b) if a == b => Some(a),
        (Integer, Float) | (Float, Integer) => Some(Float),
        (Timestamp | Date | Time | String, Timestamp | Date | Time | String) => Some(String),
        _ => None,
    }
}
