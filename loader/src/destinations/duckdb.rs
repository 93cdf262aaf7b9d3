use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use duckdb::Connection;
use duckdb::types::Value;
use duckdb::vtab::arrow::{ArrowVTab, arrow_recordbatch_to_query_params};
use loader_config::shared::{DestinationConfig, DestinationKind, DuckDbConfig, IN_MEMORY_PATH};
use tracing::debug;

use crate::bulk::{BulkExecutor, BulkInput, Connector};
use crate::descriptor::DestinationDescriptor;
use crate::destinations::{mismatched_descriptor, quote_qualified, unexpected_input};
use crate::encoding::columnar::to_record_batch;
use crate::error::{BulkPhase, ErrorKind, LoadError, LoadResult};
use crate::load_error;
use crate::types::Cell;

/// Name of the table function the source is exposed through.
const ARROW_TABLE_FUNCTION: &str = "arrow";

pub fn connector(descriptor: &DestinationDescriptor) -> LoadResult<Box<dyn Connector>> {
    let DestinationConfig::Duckdb(config) = descriptor.config() else {
        return Err(mismatched_descriptor("duckdb"));
    };

    Ok(Box::new(DuckDbConnector {
        config: config.clone(),
    }))
}

#[derive(Debug, Clone)]
pub struct DuckDbConnector {
    config: DuckDbConfig,
}

#[async_trait]
impl Connector for DuckDbConnector {
    async fn connect(&self) -> LoadResult<Box<dyn BulkExecutor>> {
        let path = self.config.path.clone();

        let connection = run_blocking(move || {
            let connection = if path == IN_MEMORY_PATH {
                Connection::open_in_memory()
            } else {
                Connection::open(&path)
            }
            .map_err(|err| connection_error(err, &path))?;

            connection
                .register_table_function::<ArrowVTab>(ARROW_TABLE_FUNCTION)
                .map_err(|err| connection_error(err, &path))?;

            Ok(connection)
        })
        .await?;

        Ok(Box::new(DuckDbExecutor {
            connection: Arc::new(Mutex::new(connection)),
        }))
    }
}

/// Session on an embedded DuckDB database.
///
/// DuckDB calls block, so they run on the blocking thread pool.
pub struct DuckDbExecutor {
    connection: Arc<Mutex<Connection>>,
}

impl DuckDbExecutor {
    async fn with_connection<T, F>(&self, f: F) -> LoadResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> LoadResult<T> + Send + 'static,
    {
        let connection = self.connection.clone();
        run_blocking(move || {
            let connection = connection.lock().map_err(|_| {
                load_error!(
                    ErrorKind::InvalidState,
                    "DuckDB connection lock is poisoned"
                )
            })?;
            f(&connection)
        })
        .await
    }
}

#[async_trait]
impl BulkExecutor for DuckDbExecutor {
    async fn bulk_load(&mut self, table: &str, input: BulkInput<'_>) -> LoadResult<Option<u64>> {
        let BulkInput::Source(source) = input else {
            return Err(unexpected_input(DestinationKind::Duckdb, &input));
        };

        let batch = to_record_batch(source)?;
        let sql = format!(
            "INSERT INTO {} SELECT * FROM {ARROW_TABLE_FUNCTION}(?, ?)",
            quote_qualified(table)
        );
        debug!(table, rows = batch.num_rows(), "inserting record batch");

        let inserted = self
            .with_connection(move |connection| {
                let params = arrow_recordbatch_to_query_params(batch);
                connection.execute(&sql, params).map_err(|err| {
                    LoadError::bulk(BulkPhase::NotStarted, "DuckDB INSERT failed", err)
                })
            })
            .await?;

        Ok(Some(inserted as u64))
    }

    async fn execute(&mut self, sql: &str) -> LoadResult<u64> {
        let sql = sql.to_string();
        self.with_connection(move |connection| {
            connection
                .execute(&sql, [])
                .map(|changed| changed as u64)
                .map_err(statement_error)
        })
        .await
    }

    async fn query(&mut self, sql: &str) -> LoadResult<Vec<Vec<Cell>>> {
        let sql = sql.to_string();
        self.with_connection(move |connection| {
            let mut statement = connection.prepare(&sql).map_err(statement_error)?;
            let mut rows = statement.query([]).map_err(statement_error)?;

            let mut result = Vec::new();
            while let Some(row) = rows.next().map_err(statement_error)? {
                let columns = row.as_ref().column_count();
                let mut cells = Vec::with_capacity(columns);
                for index in 0..columns {
                    let value: Value = row.get(index).map_err(statement_error)?;
                    cells.push(value_to_cell(value));
                }
                result.push(cells);
            }

            Ok(result)
        })
        .await
    }

    async fn close(self: Box<Self>) -> LoadResult<()> {
        // The database closes when the last handle is dropped.
        Ok(())
    }
}

fn value_to_cell(value: Value) -> Cell {
    match value {
        Value::Null => Cell::Null,
        Value::Boolean(v) => Cell::Bool(v),
        Value::TinyInt(v) => Cell::I64(v.into()),
        Value::SmallInt(v) => Cell::I64(v.into()),
        Value::Int(v) => Cell::I64(v.into()),
        Value::BigInt(v) => Cell::I64(v),
        Value::UTinyInt(v) => Cell::I64(v.into()),
        Value::USmallInt(v) => Cell::I64(v.into()),
        Value::UInt(v) => Cell::I64(v.into()),
        Value::Float(v) => Cell::F64(v.into()),
        Value::Double(v) => Cell::F64(v),
        Value::Text(v) => Cell::String(v),
        Value::Blob(v) => Cell::Bytes(v),
        other => Cell::String(format!("{other:?}")),
    }
}

async fn run_blocking<T, F>(f: F) -> LoadResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> LoadResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|err| {
        load_error!(
            ErrorKind::Unknown,
            "DuckDB task did not complete",
            err
        )
    })?
}

fn connection_error(err: duckdb::Error, path: &str) -> LoadError {
    load_error!(
        ErrorKind::ConnectionError,
        "DuckDB connection failed",
        format!("{path}: {err}")
    )
}

fn statement_error(err: duckdb::Error) -> LoadError {
    load_error!(ErrorKind::BulkCommandError, "DuckDB statement failed", err)
}
