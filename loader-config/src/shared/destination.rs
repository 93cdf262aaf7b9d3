use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::SerializableSecretString;
use crate::shared::{
    DestinationKind, PgConnectionConfig, S3StagingConfig, StagingFormat, TlsConfig,
    ValidationError, check_fields,
};

/// Path that opens a private in-memory database for the embedded kinds.
pub const IN_MEMORY_PATH: &str = ":memory:";

const DEFAULT_POSTGRES_PORT: u16 = 5432;
const DEFAULT_MYSQL_PORT: u16 = 3306;
const DEFAULT_MSSQL_PORT: u16 = 1433;
const DEFAULT_REDSHIFT_PORT: u16 = 5439;
const DEFAULT_BIGQUERY_INSERT_BATCH_SIZE: usize = 500;
const DEFAULT_SNOWFLAKE_TOKEN_TYPE: &str = "PROGRAMMATIC_ACCESS_TOKEN";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqliteConfig {
    /// Database file, or `:memory:`.
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuckDbConfig {
    /// Database file, or `:memory:`.
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    pub host: String,
    #[serde(default = "default_postgres_port")]
    pub port: u16,
    pub user: String,
    #[serde(default)]
    pub password: Option<SerializableSecretString>,
    pub database: String,
    #[serde(default)]
    pub tls: TlsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MysqlConfig {
    pub host: String,
    #[serde(default = "default_mysql_port")]
    pub port: u16,
    pub user: String,
    pub password: SerializableSecretString,
    pub database: String,
    /// Directory for the temporary CSV file. The system temp dir when absent.
    #[serde(default)]
    pub staging_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MssqlConfig {
    pub host: String,
    #[serde(default = "default_mssql_port")]
    pub port: u16,
    pub user: String,
    pub password: SerializableSecretString,
    pub database: String,
    /// Directory the loader writes the CSV file into. The server must be able to
    /// read it, so it is usually a share mounted on both sides.
    pub staging_dir: PathBuf,
    /// Location of `staging_dir` as seen by the server, when it differs.
    #[serde(default)]
    pub server_staging_dir: Option<String>,
    #[serde(default)]
    pub trust_server_certificate: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedshiftConfig {
    pub host: String,
    #[serde(default = "default_redshift_port")]
    pub port: u16,
    pub user: String,
    pub password: SerializableSecretString,
    pub database: String,
    #[serde(default)]
    pub tls: TlsConfig,
    /// Role Redshift assumes to read the staged object.
    pub iam_role_arn: String,
    #[serde(flatten)]
    pub staging: S3StagingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnowflakeConfig {
    /// Account identifier, e.g. `myorg-myaccount`.
    pub account: String,
    pub user: String,
    /// Bearer token for the SQL API.
    pub token: SerializableSecretString,
    /// Value of `X-Snowflake-Authorization-Token-Type`.
    #[serde(default = "default_snowflake_token_type")]
    pub token_type: String,
    pub warehouse: String,
    pub database: String,
    pub schema: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub iam_role_arn: Option<String>,
    #[serde(default)]
    pub storage_integration: Option<String>,
    /// Overrides `https://{account}.snowflakecomputing.com`.
    #[serde(default)]
    pub api_base_url: Option<String>,
    #[serde(flatten)]
    pub staging: S3StagingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BigQueryConfig {
    pub project_id: String,
    pub dataset_id: String,
    pub service_account_key_path: PathBuf,
    /// Rows per `insertAll` request.
    #[serde(default = "default_bigquery_insert_batch_size")]
    pub insert_batch_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabricksConfig {
    pub workspace_url: String,
    pub warehouse_id: String,
    pub access_token: SerializableSecretString,
    pub catalog: String,
    pub schema: String,
    #[serde(flatten)]
    pub staging: S3StagingConfig,
}

/// Typed configuration of one destination, tagged by `kind`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DestinationConfig {
    Sqlite(SqliteConfig),
    Duckdb(DuckDbConfig),
    Postgres(PostgresConfig),
    Mysql(MysqlConfig),
    Mssql(MssqlConfig),
    Redshift(RedshiftConfig),
    Snowflake(SnowflakeConfig),
    Bigquery(BigQueryConfig),
    Databricks(DatabricksConfig),
}

impl DestinationConfig {
    /// Builds the typed configuration of `kind` from a raw descriptor map.
    ///
    /// Field presence and shape are checked first so that errors name the
    /// offending key, then the map is decoded and semantically validated.
    pub fn from_raw(
        kind: DestinationKind,
        raw: &Map<String, Value>,
    ) -> Result<DestinationConfig, ValidationError> {
        let mut normalized = check_fields(kind, raw)?;
        normalized.insert("kind".to_string(), Value::String(kind.as_str().to_string()));

        let config: DestinationConfig =
            serde_json::from_value(Value::Object(normalized)).map_err(|err| {
                ValidationError::Malformed {
                    kind,
                    reason: err.to_string(),
                }
            })?;
        config.validate()?;

        Ok(config)
    }

    pub fn kind(&self) -> DestinationKind {
        match self {
            DestinationConfig::Sqlite(_) => DestinationKind::Sqlite,
            DestinationConfig::Duckdb(_) => DestinationKind::Duckdb,
            DestinationConfig::Postgres(_) => DestinationKind::Postgres,
            DestinationConfig::Mysql(_) => DestinationKind::Mysql,
            DestinationConfig::Mssql(_) => DestinationKind::Mssql,
            DestinationConfig::Redshift(_) => DestinationKind::Redshift,
            DestinationConfig::Snowflake(_) => DestinationKind::Snowflake,
            DestinationConfig::Bigquery(_) => DestinationKind::Bigquery,
            DestinationConfig::Databricks(_) => DestinationKind::Databricks,
        }
    }

    /// Semantic checks that go beyond individual field shapes.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let kind = self.kind();
        match self {
            DestinationConfig::Sqlite(_)
            | DestinationConfig::Duckdb(_)
            | DestinationConfig::Mysql(_)
            | DestinationConfig::Mssql(_) => Ok(()),
            DestinationConfig::Postgres(config) => config.tls.validate(),
            DestinationConfig::Redshift(config) => {
                config.tls.validate()?;
                config.staging.validate(kind)
            }
            DestinationConfig::Snowflake(config) => {
                config.staging.validate(kind)?;
                let has_credentials = config.storage_integration.is_some()
                    || config.iam_role_arn.is_some()
                    || config.staging.static_credentials().is_some();
                if !has_credentials {
                    return Err(ValidationError::InvalidField {
                        kind,
                        field: "iam_role_arn",
                        reason: "one of `storage_integration`, `iam_role_arn` or an AWS key pair is needed to read staged objects".to_string(),
                    });
                }
                Ok(())
            }
            DestinationConfig::Bigquery(config) => {
                if config.insert_batch_size > 50_000 {
                    return Err(ValidationError::InvalidField {
                        kind,
                        field: "insert_batch_size",
                        reason: "at most 50000 rows are accepted per request".to_string(),
                    });
                }
                Ok(())
            }
            DestinationConfig::Databricks(config) => config.staging.validate(kind),
        }
    }

    /// Object storage settings of staged kinds.
    pub fn s3_staging(&self) -> Option<&S3StagingConfig> {
        match self {
            DestinationConfig::Redshift(config) => Some(&config.staging),
            DestinationConfig::Snowflake(config) => Some(&config.staging),
            DestinationConfig::Databricks(config) => Some(&config.staging),
            _ => None,
        }
    }

    /// Format of staged objects, for staged kinds.
    pub fn staging_format(&self) -> Option<StagingFormat> {
        self.s3_staging().map(|staging| staging.staging_format)
    }

    /// Directory for local staging files, for kinds that stage locally.
    pub fn staging_dir(&self) -> Option<&std::path::Path> {
        match self {
            DestinationConfig::Mysql(config) => config.staging_dir.as_deref(),
            DestinationConfig::Mssql(config) => Some(config.staging_dir.as_path()),
            _ => None,
        }
    }
}

impl PostgresConfig {
    pub fn connection(&self) -> PgConnectionConfig {
        PgConnectionConfig {
            host: self.host.clone(),
            port: self.port,
            name: self.database.clone(),
            username: self.user.clone(),
            password: self.password.clone(),
            tls: self.tls.clone(),
        }
    }
}

impl RedshiftConfig {
    pub fn connection(&self) -> PgConnectionConfig {
        PgConnectionConfig {
            host: self.host.clone(),
            port: self.port,
            name: self.database.clone(),
            username: self.user.clone(),
            password: Some(self.password.clone()),
            tls: self.tls.clone(),
        }
    }
}

impl SnowflakeConfig {
    /// Base URL of the account's SQL API.
    pub fn api_base_url(&self) -> String {
        match &self.api_base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("https://{}.snowflakecomputing.com", self.account),
        }
    }
}

fn default_postgres_port() -> u16 {
    DEFAULT_POSTGRES_PORT
}

fn default_mysql_port() -> u16 {
    DEFAULT_MYSQL_PORT
}

fn default_mssql_port() -> u16 {
    DEFAULT_MSSQL_PORT
}

fn default_redshift_port() -> u16 {
    DEFAULT_REDSHIFT_PORT
}

fn default_bigquery_insert_batch_size() -> usize {
    DEFAULT_BIGQUERY_INSERT_BATCH_SIZE
}

fn default_snowflake_token_type() -> String {
    DEFAULT_SNOWFLAKE_TOKEN_TYPE.to_string()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn from_json(value: Value) -> Result<DestinationConfig, ValidationError> {
        let map = value.as_object().cloned().unwrap();
        let kind = crate::shared::parse_kind(&value)?;
        DestinationConfig::from_raw(kind, &map)
    }

    #[test]
    fn postgres_defaults_are_applied() {
        let config = from_json(json!({
            "kind": "postgres",
            "host": "localhost",
            "user": "postgres",
            "database": "warehouse",
        }))
        .unwrap();

        let DestinationConfig::Postgres(postgres) = config else {
            panic!("expected a postgres config");
        };
        assert_eq!(postgres.port, 5432);
        assert!(postgres.password.is_none());
        assert!(!postgres.tls.enabled);
        assert_eq!(postgres.connection().name, "warehouse");
    }

    #[test]
    fn redshift_flattens_staging_settings() {
        let config = from_json(json!({
            "kind": "redshift",
            "host": "cluster.redshift.amazonaws.com",
            "user": "admin",
            "password": "pw",
            "database": "dev",
            "iam_role_arn": "arn:aws:iam::123456789012:role/loader",
            "s3_bucket": "staging-bucket",
            "s3_region": "eu-west-1",
            "staging_format": "CSV",
        }))
        .unwrap();

        assert_eq!(config.kind(), DestinationKind::Redshift);
        let staging = config.s3_staging().unwrap();
        assert_eq!(staging.s3_bucket, "staging-bucket");
        assert_eq!(staging.s3_prefix, "tmp");
        assert_eq!(config.staging_format(), Some(StagingFormat::Csv));
        let DestinationConfig::Redshift(redshift) = config else {
            panic!("expected a redshift config");
        };
        assert_eq!(redshift.port, 5439);
    }

    #[test]
    fn snowflake_needs_a_way_to_read_staged_objects() {
        let base = json!({
            "kind": "snowflake",
            "account": "org-acct",
            "user": "LOADER",
            "token": "pat",
            "warehouse": "WH",
            "database": "DB",
            "schema": "PUBLIC",
            "s3_bucket": "bucket",
        });

        let err = from_json(base.clone()).unwrap_err();
        assert_eq!(err.field(), Some("iam_role_arn"));

        let mut with_integration = base.clone();
        with_integration["storage_integration"] = json!("S3_INT");
        let config = from_json(with_integration).unwrap();
        let DestinationConfig::Snowflake(snowflake) = config else {
            panic!("expected a snowflake config");
        };
        assert_eq!(snowflake.token_type, "PROGRAMMATIC_ACCESS_TOKEN");
        assert_eq!(
            snowflake.api_base_url(),
            "https://org-acct.snowflakecomputing.com"
        );
    }

    #[test]
    fn mssql_requires_a_staging_dir() {
        let err = from_json(json!({
            "kind": "mssql",
            "host": "localhost",
            "user": "sa",
            "password": "pw",
            "database": "master",
        }))
        .unwrap_err();
        assert_eq!(err.field(), Some("staging_dir"));
    }

    #[test]
    fn local_staging_dirs_are_exposed() {
        let config = from_json(json!({
            "kind": "mysql",
            "host": "localhost",
            "user": "root",
            "password": "pw",
            "database": "test",
        }))
        .unwrap();
        assert!(config.staging_dir().is_none());
        assert!(config.staging_format().is_none());
    }

    #[test]
    fn tls_without_certificates_is_rejected() {
        let err = from_json(json!({
            "kind": "postgres",
            "host": "localhost",
            "user": "postgres",
            "database": "db",
            "tls": {"enabled": true},
        }))
        .unwrap_err();
        assert!(matches!(err, ValidationError::MissingTrustedRootCerts));
    }
}
