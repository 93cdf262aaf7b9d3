use std::sync::Arc;

use async_trait::async_trait;
use loader_config::shared::{DestinationConfig, DestinationKind, RedshiftConfig, StagingFormat};
use pg_escape::quote_literal;
use tracing::debug;

use crate::bulk::{BulkExecutor, BulkInput, Connector};
use crate::clients::postgres::PgWireClient;
use crate::descriptor::DestinationDescriptor;
use crate::destinations::{mismatched_descriptor, quote_qualified, staged_object};
use crate::error::LoadResult;
use crate::store::ObjectStore;
use crate::store::s3::S3ObjectStore;
use crate::types::Cell;

pub fn connector(descriptor: &DestinationDescriptor) -> LoadResult<Box<dyn Connector>> {
    let DestinationConfig::Redshift(config) = descriptor.config() else {
        return Err(mismatched_descriptor("redshift"));
    };

    Ok(Box::new(RedshiftConnector {
        config: config.clone(),
    }))
}

#[derive(Debug, Clone)]
pub struct RedshiftConnector {
    config: RedshiftConfig,
}

#[async_trait]
impl Connector for RedshiftConnector {
    async fn connect(&self) -> LoadResult<Box<dyn BulkExecutor>> {
        let store = S3ObjectStore::new(&self.config.staging).await;
        store.test_connection().await?;

        let client = PgWireClient::connect(&self.config.connection(), "redshift").await?;

        Ok(Box::new(RedshiftExecutor {
            client,
            store: Arc::new(store),
            iam_role_arn: self.config.iam_role_arn.clone(),
            region: self.config.staging.s3_region.clone(),
        }))
    }
}

/// Loads staged S3 objects with `COPY ... FROM 's3://...'`.
#[derive(Debug)]
pub struct RedshiftExecutor {
    client: PgWireClient,
    store: Arc<S3ObjectStore>,
    iam_role_arn: String,
    region: Option<String>,
}

fn copy_statement(
    table: &str,
    uri: &str,
    format: StagingFormat,
    iam_role_arn: &str,
    region: Option<&str>,
) -> String {
    let format_clause = match format {
        StagingFormat::Parquet => "FORMAT AS PARQUET",
        StagingFormat::Csv => r"FORMAT AS CSV NULL AS '\N'",
    };

    let mut statement = format!(
        "COPY {} FROM {} IAM_ROLE {} {format_clause}",
        quote_qualified(table),
        quote_literal(uri),
        quote_literal(iam_role_arn),
    );
    if let Some(region) = region {
        statement.push_str(" REGION ");
        statement.push_str(&quote_literal(region));
    }

    statement
}

#[async_trait]
impl BulkExecutor for RedshiftExecutor {
    async fn bulk_load(&mut self, table: &str, input: BulkInput<'_>) -> LoadResult<Option<u64>> {
        let (uri, format) = staged_object(DestinationKind::Redshift, input)?;

        debug!(table, uri, %format, "copying staged object");
        let statement = copy_statement(
            table,
            uri,
            format,
            &self.iam_role_arn,
            self.region.as_deref(),
        );
        self.client.run_bulk(&statement).await?;

        // The command tag of a Redshift COPY carries no row count.
        self.client.query_count("SELECT pg_last_copy_count()").await
    }

    fn object_store(&self) -> Option<Arc<dyn ObjectStore>> {
        Some(self.store.clone())
    }

    async fn execute(&mut self, sql: &str) -> LoadResult<u64> {
        self.client.execute(sql).await
    }

    async fn query(&mut self, sql: &str) -> LoadResult<Vec<Vec<Cell>>> {
        self.client.query(sql).await
    }

    async fn close(self: Box<Self>) -> LoadResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parquet_copy_names_role_and_region() {
        assert_eq!(
            copy_statement(
                "events",
                "s3://b/tmp/events_1.parquet",
                StagingFormat::Parquet,
                "arn:aws:iam::1:role/r",
                Some("us-east-2"),
            ),
            "COPY events FROM 's3://b/tmp/events_1.parquet' IAM_ROLE 'arn:aws:iam::1:role/r' FORMAT AS PARQUET REGION 'us-east-2'"
        );
    }

    #[test]
    fn csv_copy_reads_the_null_marker() {
        let statement = copy_statement(
            "analytics.Events",
            "s3://b/events_1.csv",
            StagingFormat::Csv,
            "arn",
            None,
        );
        assert!(statement.starts_with(r#"COPY analytics."Events" FROM 's3://b/events_1.csv'"#));
        assert!(statement.ends_with(r"FORMAT AS CSV NULL AS '\N'"));
    }
}
