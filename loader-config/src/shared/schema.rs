use serde_json::{Map, Number, Value};

use crate::shared::{DestinationKind, ValidationError};

/// Expected shape of one descriptor field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    /// Non-empty string.
    Text,
    /// Non-empty string holding a credential.
    Secret,
    /// Filesystem path or URL-like location.
    Path,
    /// TCP port in `1..=65535`.
    Port,
    /// Positive integer.
    Count,
    Bool,
    /// Nested TLS settings map.
    Tls,
    /// `parquet` or `csv`.
    Format,
}

/// One entry of a destination kind's descriptor schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub ty: FieldType,
    pub required: bool,
}

const fn required(name: &'static str, ty: FieldType) -> FieldSpec {
    FieldSpec {
        name,
        ty,
        required: true,
    }
}

const fn optional(name: &'static str, ty: FieldType) -> FieldSpec {
    FieldSpec {
        name,
        ty,
        required: false,
    }
}

const SQLITE_FIELDS: &[FieldSpec] = &[required("path", FieldType::Path)];

const DUCKDB_FIELDS: &[FieldSpec] = &[required("path", FieldType::Path)];

const POSTGRES_FIELDS: &[FieldSpec] = &[
    required("host", FieldType::Text),
    required("user", FieldType::Text),
    required("database", FieldType::Text),
    optional("port", FieldType::Port),
    optional("password", FieldType::Secret),
    optional("tls", FieldType::Tls),
];

const MYSQL_FIELDS: &[FieldSpec] = &[
    required("host", FieldType::Text),
    required("user", FieldType::Text),
    required("password", FieldType::Secret),
    required("database", FieldType::Text),
    optional("port", FieldType::Port),
    optional("staging_dir", FieldType::Path),
];

const MSSQL_FIELDS: &[FieldSpec] = &[
    required("host", FieldType::Text),
    required("user", FieldType::Text),
    required("password", FieldType::Secret),
    required("database", FieldType::Text),
    required("staging_dir", FieldType::Path),
    optional("server_staging_dir", FieldType::Path),
    optional("port", FieldType::Port),
    optional("trust_server_certificate", FieldType::Bool),
];

const REDSHIFT_FIELDS: &[FieldSpec] = &[
    required("host", FieldType::Text),
    required("user", FieldType::Text),
    required("password", FieldType::Secret),
    required("database", FieldType::Text),
    required("iam_role_arn", FieldType::Text),
    optional("port", FieldType::Port),
    optional("tls", FieldType::Tls),
];

const SNOWFLAKE_FIELDS: &[FieldSpec] = &[
    required("account", FieldType::Text),
    required("user", FieldType::Text),
    required("token", FieldType::Secret),
    required("warehouse", FieldType::Text),
    required("database", FieldType::Text),
    required("schema", FieldType::Text),
    optional("role", FieldType::Text),
    optional("token_type", FieldType::Text),
    optional("iam_role_arn", FieldType::Text),
    optional("storage_integration", FieldType::Text),
    optional("api_base_url", FieldType::Path),
];

const BIGQUERY_FIELDS: &[FieldSpec] = &[
    required("project_id", FieldType::Text),
    required("dataset_id", FieldType::Text),
    required("service_account_key_path", FieldType::Path),
    optional("insert_batch_size", FieldType::Count),
];

const DATABRICKS_FIELDS: &[FieldSpec] = &[
    required("workspace_url", FieldType::Path),
    required("warehouse_id", FieldType::Text),
    required("access_token", FieldType::Secret),
    required("catalog", FieldType::Text),
    required("schema", FieldType::Text),
];

/// Object storage fields shared by every staged warehouse kind.
const S3_STAGING_FIELDS: &[FieldSpec] = &[
    required("s3_bucket", FieldType::Text),
    optional("s3_region", FieldType::Text),
    optional("s3_prefix", FieldType::Path),
    optional("s3_endpoint_url", FieldType::Path),
    optional("aws_access_key_id", FieldType::Text),
    optional("aws_secret_access_key", FieldType::Secret),
    optional("aws_session_token", FieldType::Secret),
    optional("staging_format", FieldType::Format),
];

impl DestinationKind {
    /// Descriptor schema of this kind, excluding the `kind` tag itself.
    pub fn fields(&self) -> Vec<FieldSpec> {
        let (own, staged): (&[FieldSpec], bool) = match self {
            DestinationKind::Sqlite => (SQLITE_FIELDS, false),
            DestinationKind::Duckdb => (DUCKDB_FIELDS, false),
            DestinationKind::Postgres => (POSTGRES_FIELDS, false),
            DestinationKind::Mysql => (MYSQL_FIELDS, false),
            DestinationKind::Mssql => (MSSQL_FIELDS, false),
            DestinationKind::Redshift => (REDSHIFT_FIELDS, true),
            DestinationKind::Snowflake => (SNOWFLAKE_FIELDS, true),
            DestinationKind::Bigquery => (BIGQUERY_FIELDS, false),
            DestinationKind::Databricks => (DATABRICKS_FIELDS, true),
        };

        let mut fields = own.to_vec();
        if staged {
            fields.extend_from_slice(S3_STAGING_FIELDS);
        }

        fields
    }

    /// Names of the fields that must be present and non-null.
    pub fn required_fields(&self) -> Vec<&'static str> {
        self.fields()
            .into_iter()
            .filter(|field| field.required)
            .map(|field| field.name)
            .collect()
    }
}

/// Reads the `kind` tag of a raw descriptor.
pub fn parse_kind(raw: &Value) -> Result<DestinationKind, ValidationError> {
    let map = raw.as_object().ok_or(ValidationError::NotAMap)?;

    match map.get("kind") {
        None | Some(Value::Null) => Err(ValidationError::MissingKind),
        Some(Value::String(tag)) => tag.trim().parse(),
        Some(other) => Err(ValidationError::UnknownKind(other.to_string())),
    }
}

/// Checks a raw descriptor against the schema of `kind`.
///
/// Returns a normalized copy: null optional entries are removed so defaults
/// apply, and scalar values that arrive as strings (typical of environment
/// overrides) are coerced to the type the schema expects. Fields unknown to
/// the schema are kept untouched and later ignored.
pub fn check_fields(
    kind: DestinationKind,
    raw: &Map<String, Value>,
) -> Result<Map<String, Value>, ValidationError> {
    let mut normalized = raw.clone();

    for expected in kind.fields() {
        let value = match raw.get(expected.name) {
            None | Some(Value::Null) => {
                if expected.required {
                    return Err(ValidationError::MissingField {
                        kind,
                        field: expected.name,
                    });
                }
                normalized.remove(expected.name);
                continue;
            }
            Some(value) => value,
        };

        let invalid = |reason: &str| ValidationError::InvalidField {
            kind,
            field: expected.name,
            reason: reason.to_string(),
        };

        let checked = match expected.ty {
            FieldType::Text | FieldType::Secret | FieldType::Path => match value {
                Value::String(s) if s.trim().is_empty() && expected.required => {
                    return Err(invalid("must not be empty"));
                }
                Value::String(s) => Value::String(s.clone()),
                // Environment overrides parse `1234` as a number.
                Value::Number(n) => Value::String(n.to_string()),
                _ => return Err(invalid("expected a string")),
            },
            FieldType::Port => {
                let port = as_unsigned(value).ok_or_else(|| invalid("expected a port number"))?;
                if port == 0 || port > u16::MAX as u64 {
                    return Err(invalid("port must be between 1 and 65535"));
                }
                Value::Number(Number::from(port))
            }
            FieldType::Count => {
                let count =
                    as_unsigned(value).ok_or_else(|| invalid("expected a positive integer"))?;
                if count == 0 {
                    return Err(invalid("must be greater than zero"));
                }
                Value::Number(Number::from(count))
            }
            FieldType::Bool => match value {
                Value::Bool(b) => Value::Bool(*b),
                Value::String(s) => match s.trim().to_lowercase().as_str() {
                    "true" => Value::Bool(true),
                    "false" => Value::Bool(false),
                    _ => return Err(invalid("expected `true` or `false`")),
                },
                _ => return Err(invalid("expected a boolean")),
            },
            FieldType::Tls => match value {
                Value::Object(_) => value.clone(),
                _ => return Err(invalid("expected a map with `enabled` and `trusted_root_certs`")),
            },
            FieldType::Format => match value.as_str().map(|s| s.trim().to_lowercase()) {
                Some(format) if format == "parquet" || format == "csv" => Value::String(format),
                _ => return Err(invalid("expected `parquet` or `csv`")),
            },
        };

        normalized.insert(expected.name.to_string(), checked);
    }

    Ok(normalized)
}

fn as_unsigned(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
