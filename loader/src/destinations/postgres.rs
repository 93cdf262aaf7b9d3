use async_trait::async_trait;
use loader_config::shared::{DestinationConfig, DestinationKind, PgConnectionConfig};
use tracing::debug;

use crate::bulk::{BulkExecutor, BulkInput, Connector};
use crate::clients::postgres::PgWireClient;
use crate::descriptor::DestinationDescriptor;
use crate::destinations::{mismatched_descriptor, quote_qualified, unexpected_input};
use crate::error::LoadResult;
use crate::types::Cell;

pub fn connector(descriptor: &DestinationDescriptor) -> LoadResult<Box<dyn Connector>> {
    let DestinationConfig::Postgres(config) = descriptor.config() else {
        return Err(mismatched_descriptor("postgres"));
    };

    Ok(Box::new(PostgresConnector {
        connection: config.connection(),
    }))
}

#[derive(Debug, Clone)]
pub struct PostgresConnector {
    connection: PgConnectionConfig,
}

#[async_trait]
impl Connector for PostgresConnector {
    async fn connect(&self) -> LoadResult<Box<dyn BulkExecutor>> {
        let client = PgWireClient::connect(&self.connection, "postgres").await?;
        Ok(Box::new(PostgresExecutor { client }))
    }
}

/// Streams CSV into `COPY ... FROM STDIN`.
#[derive(Debug)]
pub struct PostgresExecutor {
    client: PgWireClient,
}

/// The `COPY` statement reading the CSV produced by
/// [`CsvDialect::POSTGRES`](crate::encoding::CsvDialect::POSTGRES).
fn copy_statement(table: &str) -> String {
    format!(
        r"COPY {} FROM STDIN WITH (FORMAT csv, NULL '\N')",
        quote_qualified(table)
    )
}

#[async_trait]
impl BulkExecutor for PostgresExecutor {
    async fn bulk_load(&mut self, table: &str, input: BulkInput<'_>) -> LoadResult<Option<u64>> {
        let BulkInput::Stream(body) = input else {
            return Err(unexpected_input(DestinationKind::Postgres, &input));
        };

        debug!(table, bytes = body.len(), "streaming csv into copy");
        let copied = self.client.copy_in(&copy_statement(table), body.clone()).await?;

        Ok(Some(copied))
    }

    async fn execute(&mut self, sql: &str) -> LoadResult<u64> {
        self.client.execute(sql).await
    }

    async fn query(&mut self, sql: &str) -> LoadResult<Vec<Vec<Cell>>> {
        self.client.query(sql).await
    }

    async fn close(self: Box<Self>) -> LoadResult<()> {
        // Dropping the client ends the connection task.
        Ok(())
    }
}
