use serde::Deserialize;

use crate::Config;
use crate::shared::{BatchConfig, BigQueryConfig, MergeConfig, ValidationError};

/// Complete configuration for a loader.
///
/// Passed explicitly to the loader at construction. This intentionally does
/// not implement [`serde::Serialize`] since the destination may carry secrets.
#[derive(Debug, Clone, Deserialize)]
pub struct LoaderConfig {
    pub destination: BigQueryConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub merge: MergeConfig,
}

impl LoaderConfig {
    /// Validates every section of the configuration.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.destination.validate()?;
        self.batch.validate()?;
        self.merge.validate()
    }
}

impl Config for LoaderConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &[];
}
