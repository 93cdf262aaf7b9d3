use std::fmt;

use serde::{Deserialize, Serialize};

use crate::SerializableSecretString;
use crate::shared::{DestinationKind, ValidationError};

/// Default key prefix for staged objects.
pub const DEFAULT_S3_PREFIX: &str = "tmp";

/// File format of a staged intermediate artifact.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StagingFormat {
    #[default]
    Parquet,
    Csv,
}

impl StagingFormat {
    /// File extension used for artifacts of this format.
    pub fn extension(&self) -> &'static str {
        match self {
            StagingFormat::Parquet => "parquet",
            StagingFormat::Csv => "csv",
        }
    }
}

impl fmt::Display for StagingFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Object storage settings for destinations that ingest from S3.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct S3StagingConfig {
    pub s3_bucket: String,
    #[serde(default)]
    pub s3_region: Option<String>,
    /// Key prefix for staged objects, without leading or trailing `/`.
    #[serde(default = "default_s3_prefix")]
    pub s3_prefix: String,
    /// Custom endpoint for S3 compatible stores.
    #[serde(default)]
    pub s3_endpoint_url: Option<String>,
    /// Static credentials. The default AWS credential chain is used when absent.
    #[serde(default)]
    pub aws_access_key_id: Option<String>,
    #[serde(default)]
    pub aws_secret_access_key: Option<SerializableSecretString>,
    #[serde(default)]
    pub aws_session_token: Option<SerializableSecretString>,
    #[serde(default)]
    pub staging_format: StagingFormat,
}

fn default_s3_prefix() -> String {
    DEFAULT_S3_PREFIX.to_string()
}

impl S3StagingConfig {
    /// Checks that static credentials come as a complete pair.
    pub fn validate(&self, kind: DestinationKind) -> Result<(), ValidationError> {
        match (&self.aws_access_key_id, &self.aws_secret_access_key) {
            (Some(_), None) => Err(ValidationError::MissingField {
                kind,
                field: "aws_secret_access_key",
            }),
            (None, Some(_)) => Err(ValidationError::MissingField {
                kind,
                field: "aws_access_key_id",
            }),
            _ => Ok(()),
        }
    }

    /// Returns the static key pair when one is configured.
    pub fn static_credentials(&self) -> Option<(&str, &SerializableSecretString)> {
        match (&self.aws_access_key_id, &self.aws_secret_access_key) {
            (Some(key_id), Some(secret)) => Some((key_id.as_str(), secret)),
            _ => None,
        }
    }

    /// Prefix with surrounding slashes removed.
    pub fn normalized_prefix(&self) -> &str {
        self.s3_prefix.trim_matches('/')
    }
}
