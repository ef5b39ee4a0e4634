use gcp_bigquery_client::model::field_type::FieldType as NativeFieldType;
use gcp_bigquery_client::model::table_field_schema::TableFieldSchema;
use gcp_bigquery_client::model::table_schema::TableSchema;
use serde_json::Value;

use crate::bail;
use crate::error::{ErrorKind, LoadResult};
use crate::load_error;
use crate::schema::{FieldMode, FieldType, Schema, SchemaField};

impl Schema {
    /// Builds a schema from the engine-native field descriptors.
    pub fn from_native(fields: &[TableFieldSchema]) -> LoadResult<Schema> {
        let fields = fields
            .iter()
            .map(field_from_native)
            .collect::<LoadResult<Vec<_>>>()?;

        Schema::from_flat(fields)
    }

    /// Builds a schema from a table's native schema, as returned by the tables API.
    pub fn from_table_schema(schema: &TableSchema) -> LoadResult<Schema> {
        Schema::from_native(schema.fields.as_deref().unwrap_or_default())
    }

    /// Converts the schema into engine-native field descriptors.
    pub fn to_native(&self) -> LoadResult<Vec<TableFieldSchema>> {
        self.fields.iter().map(field_to_native).collect()
    }
}

fn field_from_native(field: &TableFieldSchema) -> LoadResult<SchemaField> {
    let field_type = type_from_native(&field.r#type, &field.name)?;
    let mode = mode_from_native(field.mode.as_deref(), &field.name)?;
    let fields = field
        .fields
        .as_deref()
        .unwrap_or_default()
        .iter()
        .map(field_from_native)
        .collect::<LoadResult<Vec<_>>>()?;

    Ok(SchemaField {
        name: field.name.clone(),
        field_type,
        mode,
        fields,
    })
}

fn field_to_native(field: &SchemaField) -> LoadResult<TableFieldSchema> {
    let mut native = TableFieldSchema::new(&field.name, type_to_native(field.field_type)?);
    native.mode = Some(field.mode.as_str().to_string());
    if !field.fields.is_empty() {
        native.fields = Some(
            field
                .fields
                .iter()
                .map(field_to_native)
                .collect::<LoadResult<Vec<_>>>()?,
        );
    }

    Ok(native)
}

/// Maps a native type through its wire name, which also normalizes standard SQL aliases.
pub(crate) fn type_from_native(native: &NativeFieldType, name: &str) -> LoadResult<FieldType> {
    let wire = serde_json::to_value(native)?;

    serde_json::from_value(wire.clone()).map_err(|_| {
        load_error!(
            ErrorKind::InvalidSchema,
            "Unsupported column type",
            format!("`{name}` has type {wire}")
        )
    })
}

fn type_to_native(field_type: FieldType) -> LoadResult<NativeFieldType> {
    serde_json::from_value(Value::String(field_type.as_str().to_string())).map_err(|err| {
        load_error!(
            ErrorKind::ConversionError,
            "Column type has no native counterpart",
            format!("{field_type}: {err}")
        )
    })
}

fn mode_from_native(mode: Option<&str>, name: &str) -> LoadResult<FieldMode> {
    let Some(mode) = mode else {
        return Ok(FieldMode::Nullable);
    };

    match mode.to_ascii_uppercase().as_str() {
        "NULLABLE" => Ok(FieldMode::Nullable),
        "REQUIRED" => Ok(FieldMode::Required),
        "REPEATED" => Ok(FieldMode::Repeated),
        other => bail!(
            ErrorKind::InvalidSchema,
            "Unsupported column mode",
            format!("`{name}` has mode {other}")
        ),
    }
}
