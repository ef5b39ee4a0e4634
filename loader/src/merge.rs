//! SQL text for staged merges.

use std::fmt;

use crate::identifier::{TableIdentifier, quote_column};
use crate::schema::Schema;
use crate::strategy::MergeKeys;

/// Number of offending destination rows fetched when a merge hits duplicate keys.
pub const DUPLICATE_SAMPLE_LIMIT: usize = 3;

/// Merge of a staging table into its destination on a set of key columns.
///
/// Unmatched staging rows are inserted as they are and matched destination rows have every
/// column overwritten, keys included. Rendered through [`fmt::Display`]:
///
/// ```text
/// MERGE `p.d.t` T
/// USING `p.d.t_tmp_0_X` S
/// ON T.`id` = S.`id`
/// WHEN NOT MATCHED THEN
///   INSERT ROW
/// WHEN MATCHED THEN
///   UPDATE SET `id` = S.`id`, `v` = S.`v`
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeStatement {
    destination: TableIdentifier,
    source: TableIdentifier,
    keys: MergeKeys,
    columns: Vec<String>,
}

impl MergeStatement {
    pub fn new(
        destination: &TableIdentifier,
        source: &TableIdentifier,
        keys: &MergeKeys,
        schema: &Schema,
    ) -> MergeStatement {
        MergeStatement {
            destination: destination.clone(),
            source: source.clone(),
            keys: keys.clone(),
            columns: schema.field_names().map(str::to_string).collect(),
        }
    }

    pub fn destination(&self) -> &TableIdentifier {
        &self.destination
    }

    pub fn source(&self) -> &TableIdentifier {
        &self.source
    }

    pub fn keys(&self) -> &MergeKeys {
        &self.keys
    }

    /// Columns assigned when a destination row is matched.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }
}

impl fmt::Display for MergeStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let on = self
            .keys
            .iter()
            .map(|key| {
                let key = quote_column(key);
                format!("T.{key} = S.{key}")
            })
            .collect::<Vec<_>>()
            .join(" AND ");
        let set = self
            .columns
            .iter()
            .map(|column| {
                let column = quote_column(column);
                format!("{column} = S.{column}")
            })
            .collect::<Vec<_>>()
            .join(", ");

        writeln!(f, "MERGE {} T", self.destination.quoted())?;
        writeln!(f, "USING {} S", self.source.quoted())?;
        writeln!(f, "ON {on}")?;
        writeln!(f, "WHEN NOT MATCHED THEN")?;
        writeln!(f, "  INSERT ROW")?;
        writeln!(f, "WHEN MATCHED THEN")?;
        write!(f, "  UPDATE SET {set}")
    }
}

/// Query returning destination rows whose key tuple occurs more than once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateKeysQuery {
    table: TableIdentifier,
    keys: MergeKeys,
    limit: usize,
}

impl DuplicateKeysQuery {
    pub fn new(table: &TableIdentifier, keys: &MergeKeys, limit: usize) -> DuplicateKeysQuery {
        DuplicateKeysQuery {
            table: table.clone(),
            keys: keys.clone(),
            limit,
        }
    }

    pub fn table(&self) -> &TableIdentifier {
        &self.table
    }

    pub fn keys(&self) -> &MergeKeys {
        &self.keys
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

impl fmt::Display for DuplicateKeysQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys = self
            .keys
            .iter()
            .map(quote_column)
            .collect::<Vec<_>>()
            .join(", ");
        let table = self.table.quoted();

        writeln!(f, "SELECT T.* FROM {table} T")?;
        writeln!(f, "JOIN (")?;
        writeln!(f, "  SELECT {keys}")?;
        writeln!(f, "  FROM {table}")?;
        writeln!(f, "  GROUP BY {keys}")?;
        writeln!(f, "  HAVING COUNT(*) > 1")?;
        writeln!(f, ") D USING ({keys})")?;
        write!(f, "LIMIT {}", self.limit)
    }
}
