//! Table schema model.
//!
//! A [`Schema`] is an ordered tree of [`SchemaField`]s, validated once when it is built. The
//! flat representation is the JSON list BigQuery uses for schema files; with the `bigquery`
//! feature the engine-native representation is the client's `TableFieldSchema` list.

mod infer;
#[cfg(feature = "bigquery")]
pub(crate) mod native;

use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::bail;
use crate::error::{ErrorKind, LoadError, LoadResult};
use crate::load_error;
use crate::types::Record;

/// Column data types.
///
/// Standard SQL spellings such as `INT64` or `STRUCT` are accepted and normalized to the
/// legacy names the tables API reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FieldType {
    String,
    Bytes,
    #[serde(alias = "INT64")]
    Integer,
    #[serde(alias = "FLOAT64")]
    Float,
    Numeric,
    #[serde(alias = "BIGDECIMAL")]
    Bignumeric,
    #[serde(alias = "BOOL")]
    Boolean,
    Timestamp,
    Date,
    Time,
    Datetime,
    Geography,
    Json,
    #[serde(alias = "STRUCT")]
    Record,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "STRING",
            FieldType::Bytes => "BYTES",
            FieldType::Integer => "INTEGER",
            FieldType::Float => "FLOAT",
            FieldType::Numeric => "NUMERIC",
            FieldType::Bignumeric => "BIGNUMERIC",
            FieldType::Boolean => "BOOLEAN",
            FieldType::Timestamp => "TIMESTAMP",
            FieldType::Date => "DATE",
            FieldType::Time => "TIME",
            FieldType::Datetime => "DATETIME",
            FieldType::Geography => "GEOGRAPHY",
            FieldType::Json => "JSON",
            FieldType::Record => "RECORD",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Column modes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FieldMode {
    #[default]
    Nullable,
    Required,
    Repeated,
}

impl FieldMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldMode::Nullable => "NULLABLE",
            FieldMode::Required => "REQUIRED",
            FieldMode::Repeated => "REPEATED",
        }
    }
}

impl fmt::Display for FieldMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One column of a schema, in the flat representation.
///
/// `fields` holds the children of a `RECORD` column and is empty for every other type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub mode: FieldMode,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<SchemaField>,
}

impl SchemaField {
    /// Creates a `NULLABLE` scalar field.
    pub fn new(name: impl Into<String>, field_type: FieldType) -> SchemaField {
        SchemaField {
            name: name.into(),
            field_type,
            mode: FieldMode::Nullable,
            fields: Vec::new(),
        }
    }

    /// Creates a `NULLABLE` record field with the given children.
    pub fn record(name: impl Into<String>, fields: Vec<SchemaField>) -> SchemaField {
        SchemaField {
            name: name.into(),
            field_type: FieldType::Record,
            mode: FieldMode::Nullable,
            fields,
        }
    }

    pub fn with_mode(mut self, mode: FieldMode) -> SchemaField {
        self.mode = mode;
        self
    }
}

/// Validated table schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    fields: Vec<SchemaField>,
}

impl Schema {
    /// Builds a schema from the flat representation, enforcing the structural invariants.
    ///
    /// Names must be non-empty and unique (case-insensitively) within each level, `RECORD`
    /// fields must have children and no other type may have any.
    pub fn from_flat(fields: Vec<SchemaField>) -> LoadResult<Schema> {
        if fields.is_empty() {
            bail!(ErrorKind::InvalidSchema, "Schema has no fields");
        }

        validate_level(&fields, "")?;

        Ok(Schema { fields })
    }

    /// Parses the flat representation from JSON text.
    pub fn from_json(json: &str) -> LoadResult<Schema> {
        let fields: Vec<SchemaField> = serde_json::from_str(json).map_err(|err| {
            load_error!(
                ErrorKind::SchemaFormatInvalid,
                "Schema is not a valid field list",
                err,
                source: err
            )
        })?;

        Schema::from_flat(fields)
    }

    /// Reads the flat representation from a JSON file.
    pub async fn from_file(path: impl AsRef<Path>) -> LoadResult<Schema> {
        let path = path.as_ref();
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|err| schema_file_error(path, err))?;

        Schema::from_json(&contents)
    }

    /// Infers a schema from sample records.
    pub fn from_data(records: &[Record]) -> LoadResult<Schema> {
        infer::infer_schema(records)
    }

    /// Infers a schema from records spread over several collections, such as batches.
    pub fn from_records<'a, I>(records: I) -> LoadResult<Schema>
    where
        I: IntoIterator<Item = &'a Record>,
    {
        infer::infer_schema(records)
    }

    pub fn fields(&self) -> &[SchemaField] {
        &self.fields
    }

    /// Returns a copy of the flat representation.
    pub fn to_flat(&self) -> Vec<SchemaField> {
        self.fields.clone()
    }

    /// Finds a top-level field by name.
    pub fn field(&self, name: &str) -> Option<&SchemaField> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|field| field.name.as_str())
    }

    pub fn into_fields(self) -> Vec<SchemaField> {
        self.fields
    }
}

fn schema_file_error(path: &Path, err: std::io::Error) -> LoadError {
    let detail = format!("{}: {err}", path.display());
    if err.kind() == std::io::ErrorKind::NotFound {
        load_error!(
            ErrorKind::SchemaFileNotFound,
            "Schema file not found",
            detail = detail,
            source: err
        )
    } else {
        load_error!(
            ErrorKind::IoError,
            "Failed to read schema file",
            detail = detail,
            source: err
        )
    }
}

fn validate_level(fields: &[SchemaField], parent: &str) -> LoadResult<()> {
    let mut seen = HashSet::with_capacity(fields.len());

    for field in fields {
        let path = if parent.is_empty() {
            field.name.clone()
        } else {
            format!("{parent}.{}", field.name)
        };

        if field.name.trim().is_empty() {
            bail!(
                ErrorKind::InvalidSchema,
                "Schema field has an empty name",
                format!("empty field name under `{parent}`")
            );
        }

        if !seen.insert(field.name.to_lowercase()) {
            bail!(
                ErrorKind::InvalidSchema,
                "Schema field names must be unique",
                format!("`{path}` is declared more than once")
            );
        }

        match (field.field_type, field.fields.is_empty()) {
            (FieldType::Record, true) => bail!(
                ErrorKind::InvalidSchema,
                "Record field has no children",
                format!("`{path}` is a RECORD without fields")
            ),
            (FieldType::Record, false) => validate_level(&field.fields, &path)?,
            (other, false) => bail!(
                ErrorKind::InvalidSchema,
                "Only record fields can have children",
                format!("`{path}` is {other} but declares nested fields")
            ),
            (_, true) => {}
        }
    }

    Ok(())
}
