use secrecy::SecretString;
use serde::Deserialize;

use crate::shared::ValidationError;

/// How the BigQuery client authenticates.
///
/// This intentionally does not implement [`serde::Serialize`] to avoid
/// leaking the inline key into serialized forms.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum BigQueryCredentials {
    /// Path to a service account key file.
    ServiceAccountKeyPath { path: String },
    /// Service account key JSON.
    ServiceAccountKey { key: SecretString },
    /// Application default credentials from the environment.
    #[default]
    ApplicationDefault,
}

/// Destination warehouse settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BigQueryConfig {
    /// Google Cloud project, used as the default namespace of table names.
    pub project_id: String,
    /// Dataset used for table names given without one.
    #[serde(default)]
    pub default_dataset: Option<String>,
    #[serde(default)]
    pub credentials: BigQueryCredentials,
}

impl BigQueryConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.project_id.trim().is_empty() {
            return Err(ValidationError::EmptyField(
                "destination.project_id".to_string(),
            ));
        }

        if let Some(dataset) = &self.default_dataset {
            if dataset.trim().is_empty() {
                return Err(ValidationError::EmptyField(
                    "destination.default_dataset".to_string(),
                ));
            }
        }

        Ok(())
    }
}
