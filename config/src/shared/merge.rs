use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Settings for merges staged through temporary tables.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct MergeConfig {
    /// Hours a staging table lives before the warehouse drops it.
    #[serde(default = "default_temp_table_expiration_hours")]
    pub temp_table_expiration_hours: u32,
}

impl MergeConfig {
    pub const DEFAULT_TEMP_TABLE_EXPIRATION_HOURS: u32 = 1;

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.temp_table_expiration_hours == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "merge.temp_table_expiration_hours".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            temp_table_expiration_hours: default_temp_table_expiration_hours(),
        }
    }
}

fn default_temp_table_expiration_hours() -> u32 {
    MergeConfig::DEFAULT_TEMP_TABLE_EXPIRATION_HOURS
}
