use std::sync::Arc;

use async_trait::async_trait;
use loader_config::shared::{DestinationConfig, DestinationKind, SnowflakeConfig, StagingFormat};
use tracing::debug;

use crate::bulk::{BulkExecutor, BulkInput, Connector};
use crate::clients::snowflake::SnowflakeClient;
use crate::clients::statement::StatementResult;
use crate::descriptor::DestinationDescriptor;
use crate::destinations::{
    escaped_literal, mismatched_descriptor, quote_qualified, staged_object,
};
use crate::error::{BulkPhase, LoadError, LoadResult};
use crate::store::ObjectStore;
use crate::store::s3::S3ObjectStore;
use crate::types::Cell;
use crate::types::text::infer_cell;

const SERVICE: &str = "snowflake";

pub fn connector(descriptor: &DestinationDescriptor) -> LoadResult<Box<dyn Connector>> {
    let DestinationConfig::Snowflake(config) = descriptor.config() else {
        return Err(mismatched_descriptor("snowflake"));
    };

    Ok(Box::new(SnowflakeConnector {
        config: config.clone(),
    }))
}

#[derive(Debug, Clone)]
pub struct SnowflakeConnector {
    config: SnowflakeConfig,
}

#[async_trait]
impl Connector for SnowflakeConnector {
    async fn connect(&self) -> LoadResult<Box<dyn BulkExecutor>> {
        let store = S3ObjectStore::new(&self.config.staging).await;
        store.test_connection().await?;

        let client = SnowflakeClient::new(&self.config);
        client
            .test_connection()
            .await
            .map_err(|err| err.into_connection_error(SERVICE))?;

        Ok(Box::new(SnowflakeExecutor {
            client,
            store: Arc::new(store),
            access_clause: access_clause(&self.config),
        }))
    }
}

/// Loads staged S3 objects with `COPY INTO` through the SQL API.
#[derive(Debug)]
pub struct SnowflakeExecutor {
    client: SnowflakeClient,
    store: Arc<S3ObjectStore>,
    access_clause: String,
}

/// How Snowflake is allowed to read the staged object. A storage integration
/// wins over a role, which wins over a static key pair. Descriptor validation
/// guarantees one of them.
fn access_clause(config: &SnowflakeConfig) -> String {
    if let Some(integration) = &config.storage_integration {
        return format!("STORAGE_INTEGRATION = {integration}");
    }
    if let Some(role) = &config.iam_role_arn {
        return format!("CREDENTIALS = (AWS_ROLE = {})", escaped_literal(role));
    }

    match config.staging.static_credentials() {
        Some((key_id, secret)) => {
            let mut clause = format!(
                "CREDENTIALS = (AWS_KEY_ID = {} AWS_SECRET_KEY = {}",
                escaped_literal(key_id),
                escaped_literal(secret.expose())
            );
            if let Some(token) = &config.staging.aws_session_token {
                clause.push_str(&format!(" AWS_TOKEN = {}", escaped_literal(token.expose())));
            }
            clause.push(')');
            clause
        }
        None => String::new(),
    }
}

fn copy_statement(table: &str, uri: &str, format: StagingFormat, access_clause: &str) -> String {
    let file_format = match format {
        StagingFormat::Parquet => {
            "FILE_FORMAT = (TYPE = PARQUET) MATCH_BY_COLUMN_NAME = CASE_INSENSITIVE"
        }
        StagingFormat::Csv => {
            r#"FILE_FORMAT = (TYPE = CSV FIELD_OPTIONALLY_ENCLOSED_BY = '"' NULL_IF = ('\\N') ESCAPE_UNENCLOSED_FIELD = NONE)"#
        }
    };

    format!(
        "COPY INTO {} FROM {} {access_clause} {file_format} ON_ERROR = ABORT_STATEMENT",
        quote_qualified(table),
        escaped_literal(uri),
    )
}

/// Checks the per-file status rows of a `COPY INTO` and returns the loaded rows.
fn loaded_rows(result: &StatementResult) -> LoadResult<Option<u64>> {
    if let Some(status) = result.column("status") {
        for row in &result.rows {
            let file_status = row.get(status).and_then(|value| value.as_deref());
            if let Some(file_status @ ("LOAD_FAILED" | "PARTIALLY_LOADED")) = file_status {
                return Err(LoadError::bulk(
                    BulkPhase::Interrupted,
                    "COPY INTO did not load every file",
                    format!("{SERVICE}: file status {file_status}"),
                ));
            }
        }
    }

    Ok(result.sum_column("rows_loaded"))
}

#[async_trait]
impl BulkExecutor for SnowflakeExecutor {
    async fn bulk_load(&mut self, table: &str, input: BulkInput<'_>) -> LoadResult<Option<u64>> {
        let (uri, format) = staged_object(DestinationKind::Snowflake, input)?;
        debug!(table, uri, %format, "copying staged object");
        let result = self
            .client
            .execute(&copy_statement(table, uri, format, &self.access_clause))
            .await
            .map_err(|err| err.into_bulk_error(SERVICE))?;

        loaded_rows(&result)
    }

    fn object_store(&self) -> Option<Arc<dyn ObjectStore>> {
        Some(self.store.clone())
    }

    async fn execute(&mut self, sql: &str) -> LoadResult<u64> {
        let result = self
            .client
            .execute(sql)
            .await
            .map_err(|err| err.into_statement_error(SERVICE))?;

        Ok(result
            .sum_column("number of rows inserted")
            .or_else(|| result.sum_column("number of rows updated"))
            .unwrap_or(0))
    }

    async fn query(&mut self, sql: &str) -> LoadResult<Vec<Vec<Cell>>> {
        let result = self
            .client
            .execute(sql)
            .await
            .map_err(|err| err.into_statement_error(SERVICE))?;

        Ok(result
            .rows
            .iter()
            .map(|row| {
                row.iter()
                    .map(|value| value.as_deref().map(infer_cell).unwrap_or(Cell::Null))
                    .collect()
            })
            .collect())
    }

    async fn close(self: Box<Self>) -> LoadResult<()> {
        // The SQL API is stateless.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn config(extra: serde_json::Value) -> SnowflakeConfig {
        let mut raw = json!({
            "kind": "snowflake",
            "account": "org-acct",
            "user": "LOADER",
            "token": "pat",
            "warehouse": "WH",
            "database": "DB",
            "schema": "PUBLIC",
            "s3_bucket": "bucket",
        });
        for (key, value) in extra.as_object().unwrap() {
            raw[key] = value.clone();
        }
        let descriptor = DestinationDescriptor::from_raw(&raw).unwrap();
        let DestinationConfig::Snowflake(config) = descriptor.config() else {
            panic!("expected a snowflake config");
        };
        config.clone()
    }

    #[test]
    fn storage_integration_is_preferred() {
        let config = config(json!({
            "storage_integration": "S3_INT",
            "iam_role_arn": "arn:aws:iam::1:role/r",
        }));
        assert_eq!(access_clause(&config), "STORAGE_INTEGRATION = S3_INT");
    }

    #[test]
    fn key_pairs_become_credentials() {
        let config = config(json!({
            "aws_access_key_id": "AKIA",
            "aws_secret_access_key": "s'ecret",
        }));
        assert_eq!(
            access_clause(&config),
            "CREDENTIALS = (AWS_KEY_ID = 'AKIA' AWS_SECRET_KEY = 's''ecret')"
        );
    }

    #[test]
    fn parquet_copies_match_columns_by_name() {
        let statement = copy_statement(
            "events",
            "s3://bucket/tmp/events_1.parquet",
            StagingFormat::Parquet,
            "STORAGE_INTEGRATION = S3_INT",
        );
        assert_eq!(
            statement,
            "COPY INTO events FROM 's3://bucket/tmp/events_1.parquet' STORAGE_INTEGRATION = S3_INT FILE_FORMAT = (TYPE = PARQUET) MATCH_BY_COLUMN_NAME = CASE_INSENSITIVE ON_ERROR = ABORT_STATEMENT"
        );
    }

    #[test]
    fn failed_files_fail_the_load() {
        let result = StatementResult {
            columns: vec!["file".into(), "status".into(), "rows_loaded".into()],
            rows: vec![vec![
                Some("s3://b/t.csv".into()),
                Some("PARTIALLY_LOADED".into()),
                Some("1".into()),
            ]],
        };
        let err = loaded_rows(&result).unwrap_err();
        assert_eq!(err.bulk_phase(), Some(BulkPhase::Interrupted));

        let result = StatementResult {
            rows: vec![vec![
                Some("s3://b/t.csv".into()),
                Some("LOADED".into()),
                Some("2".into()),
            ]],
            ..result
        };
        assert_eq!(loaded_rows(&result).unwrap(), Some(2));
    }
}
