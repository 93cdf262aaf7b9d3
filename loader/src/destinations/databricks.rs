use std::sync::Arc;

use async_trait::async_trait;
use loader_config::shared::{
    DatabricksConfig, DestinationConfig, DestinationKind, S3StagingConfig, StagingFormat,
};
use tracing::debug;

use crate::bulk::{BulkExecutor, BulkInput, Connector};
use crate::clients::databricks::DatabricksClient;
use crate::descriptor::DestinationDescriptor;
use crate::destinations::{escaped_literal, mismatched_descriptor, staged_object};
use crate::error::LoadResult;
use crate::store::ObjectStore;
use crate::store::s3::S3ObjectStore;
use crate::types::Cell;
use crate::types::text::infer_cell;

const SERVICE: &str = "databricks";

pub fn connector(descriptor: &DestinationDescriptor) -> LoadResult<Box<dyn Connector>> {
    let DestinationConfig::Databricks(config) = descriptor.config() else {
        return Err(mismatched_descriptor("databricks"));
    };

    Ok(Box::new(DatabricksConnector {
        config: config.clone(),
    }))
}

#[derive(Debug, Clone)]
pub struct DatabricksConnector {
    config: DatabricksConfig,
}

#[async_trait]
impl Connector for DatabricksConnector {
    async fn connect(&self) -> LoadResult<Box<dyn BulkExecutor>> {
        let store = S3ObjectStore::new(&self.config.staging).await;
        store.test_connection().await?;

        let client = DatabricksClient::new(&self.config);
        client
            .test_connection()
            .await
            .map_err(|err| err.into_connection_error(SERVICE))?;

        Ok(Box::new(DatabricksExecutor {
            client,
            store: Arc::new(store),
            credential_clause: credential_clause(&self.config.staging),
        }))
    }
}

/// Loads staged S3 objects with `COPY INTO` through the statement API.
#[derive(Debug)]
pub struct DatabricksExecutor {
    client: DatabricksClient,
    store: Arc<S3ObjectStore>,
    credential_clause: String,
}

/// Temporary credentials for reading the object. Without a key pair the
/// workspace's external location grants access.
fn credential_clause(staging: &S3StagingConfig) -> String {
    let Some((key_id, secret)) = staging.static_credentials() else {
        return String::new();
    };

    let mut credentials = format!(
        "AWS_ACCESS_KEY = {}, AWS_SECRET_KEY = {}",
        escaped_literal(key_id),
        escaped_literal(secret.expose())
    );
    if let Some(token) = &staging.aws_session_token {
        credentials.push_str(&format!(
            ", AWS_SESSION_TOKEN = {}",
            escaped_literal(token.expose())
        ));
    }

    format!(" WITH (CREDENTIAL ({credentials}))")
}

fn copy_statement(
    full_table_name: &str,
    uri: &str,
    format: StagingFormat,
    credential_clause: &str,
) -> String {
    let file_format = match format {
        StagingFormat::Parquet => "FILEFORMAT = PARQUET",
        StagingFormat::Csv => {
            r#"FILEFORMAT = CSV FORMAT_OPTIONS ('header' = 'false', 'nullValue' = '\\N', 'escape' = '"')"#
        }
    };

    format!(
        "COPY INTO {full_table_name} FROM {}{credential_clause} {file_format}",
        escaped_literal(uri)
    )
}

#[async_trait]
impl BulkExecutor for DatabricksExecutor {
    async fn bulk_load(&mut self, table: &str, input: BulkInput<'_>) -> LoadResult<Option<u64>> {
        let (uri, format) = staged_object(DestinationKind::Databricks, input)?;
        let full_table_name = self.client.full_table_name(table);

        debug!(table = %full_table_name, uri, %format, "copying staged object");
        let result = self
            .client
            .execute(&copy_statement(
                &full_table_name,
                uri,
                format,
                &self.credential_clause,
            ))
            .await
            .map_err(|err| err.into_bulk_error(SERVICE))?;

        Ok(result
            .sum_column("num_inserted_rows")
            .or_else(|| result.sum_column("num_affected_rows")))
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

        Ok(result.sum_column("num_affected_rows").unwrap_or(0))
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
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn staging(key: Option<&str>, secret: Option<&str>) -> S3StagingConfig {
        S3StagingConfig {
            s3_bucket: "bucket".to_string(),
            s3_region: None,
            s3_prefix: "tmp".to_string(),
            s3_endpoint_url: None,
            aws_access_key_id: key.map(str::to_string),
            aws_secret_access_key: secret.map(Into::into),
            aws_session_token: None,
            staging_format: StagingFormat::Parquet,
        }
    }

    #[test]
    fn credentials_are_only_sent_for_key_pairs() {
        assert_eq!(credential_clause(&staging(None, None)), "");
        assert_eq!(
            credential_clause(&staging(Some("AKIA"), Some("secret"))),
            " WITH (CREDENTIAL (AWS_ACCESS_KEY = 'AKIA', AWS_SECRET_KEY = 'secret'))"
        );
    }

    #[test]
    fn parquet_copy_into_fully_qualified_table() {
        assert_eq!(
            copy_statement(
                "`main`.`default`.`events`",
                "s3://bucket/tmp/events_1.parquet",
                StagingFormat::Parquet,
                "",
            ),
            "COPY INTO `main`.`default`.`events` FROM 's3://bucket/tmp/events_1.parquet' FILEFORMAT = PARQUET"
        );
    }
}
