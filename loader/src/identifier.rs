use std::fmt;

use crate::bail;
use crate::error::{ErrorKind, LoadResult};

/// Fully qualified destination table: `namespace.dataset.table`.
///
/// In BigQuery terms the namespace is the project. Built once per write operation by
/// [`TableIdentifier::resolve`] and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableIdentifier {
    namespace: String,
    dataset: String,
    table: String,
}

impl TableIdentifier {
    /// Qualifies a user-supplied table name.
    ///
    /// `table` resolves against both defaults, `dataset.table` against the default namespace,
    /// and `namespace.dataset.table` is taken as is. Only ASCII letters, digits, underscores
    /// and the separating dots are accepted.
    pub fn resolve(
        raw: &str,
        default_namespace: Option<&str>,
        default_dataset: Option<&str>,
    ) -> LoadResult<TableIdentifier> {
        if raw.is_empty() {
            bail!(ErrorKind::InvalidTableName, "Table name must be set");
        }

        if let Some(invalid) = raw
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '.'))
        {
            bail!(
                ErrorKind::InvalidTableName,
                "Table name contains a disallowed character",
                format!(
                    "`{raw}` contains `{invalid}`; only letters, numbers and underscores are allowed"
                )
            );
        }

        let parts: Vec<&str> = raw.split('.').collect();
        if parts.iter().any(|part| part.is_empty()) {
            bail!(
                ErrorKind::InvalidTableName,
                "Table name has an empty component",
                format!("`{raw}` has an empty component between dots")
            );
        }

        match parts.as_slice() {
            [table] => Ok(TableIdentifier {
                namespace: required_default(default_namespace, "namespace", raw)?,
                dataset: required_default(default_dataset, "dataset", raw)?,
                table: table.to_string(),
            }),
            [dataset, table] => Ok(TableIdentifier {
                namespace: required_default(default_namespace, "namespace", raw)?,
                dataset: dataset.to_string(),
                table: table.to_string(),
            }),
            [namespace, dataset, table] => Ok(TableIdentifier::new(*namespace, *dataset, *table)),
            _ => bail!(
                ErrorKind::InvalidTableName,
                "Table name has too many components",
                format!(
                    "`{raw}` has {} dots, expected `table`, `dataset.table` or `namespace.dataset.table`",
                    parts.len() - 1
                )
            ),
        }
    }

    /// Builds an identifier from already validated parts.
    pub fn new(
        namespace: impl Into<String>,
        dataset: impl Into<String>,
        table: impl Into<String>,
    ) -> TableIdentifier {
        TableIdentifier {
            namespace: namespace.into(),
            dataset: dataset.into(),
            table: table.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Returns the staging table `<table>_tmp_<suffix>` next to this one.
    pub fn staging(&self, suffix: &str) -> TableIdentifier {
        TableIdentifier {
            namespace: self.namespace.clone(),
            dataset: self.dataset.clone(),
            table: format!("{}_tmp_{suffix}", self.table),
        }
    }

    /// Returns the identifier delimited for use in SQL text.
    pub fn quoted(&self) -> String {
        format!(
            "`{}.{}.{}`",
            escape_backticks(&self.namespace),
            escape_backticks(&self.dataset),
            escape_backticks(&self.table)
        )
    }
}

impl fmt::Display for TableIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.namespace, self.dataset, self.table)
    }
}

/// Escapes a name so it stays intact inside backticks.
///
/// Backticks and backslashes are backslash-escaped per GoogleSQL lexical rules.
pub(crate) fn escape_backticks(part: &str) -> String {
    let mut escaped = String::with_capacity(part.len());
    for ch in part.chars() {
        match ch {
            '`' => escaped.push_str("\\`"),
            '\\' => escaped.push_str("\\\\"),
            _ => escaped.push(ch),
        }
    }

    escaped
}

/// Delimits a column name for use in SQL text.
pub(crate) fn quote_column(name: &str) -> String {
    format!("`{}`", escape_backticks(name))
}

fn required_default(value: Option<&str>, name: &'static str, raw: &str) -> LoadResult<String> {
    match value.map(str::trim) {
        Some(value) if !value.is_empty() => Ok(value.to_string()),
        _ => bail!(
            ErrorKind::ConfigurationError,
            "Missing default for unqualified table name",
            format!("`{raw}` needs a default {name}, but none is configured")
        ),
    }
}
