use std::str::FromStr;

use async_trait::async_trait;
use loader_config::shared::{DestinationConfig, DestinationKind, IN_MEMORY_PATH, SqliteConfig};
use sqlx::query_builder::Separated;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteRow};
use sqlx::{Column as _, Connection, QueryBuilder, Row as _, Sqlite, TypeInfo, ValueRef};
use tracing::debug;

use crate::bulk::{BulkExecutor, BulkInput, Connector};
use crate::descriptor::DestinationDescriptor;
use crate::destinations::{mismatched_descriptor, quote_qualified, unexpected_input};
use crate::error::{BulkPhase, ErrorKind, LoadError, LoadResult};
use crate::load_error;
use crate::types::{Cell, Row, TabularSource};

/// Upper bound of bound parameters per `INSERT` statement.
const MAX_BIND_PARAMETERS: usize = 32_000;

pub fn connector(descriptor: &DestinationDescriptor) -> LoadResult<Box<dyn Connector>> {
    let DestinationConfig::Sqlite(config) = descriptor.config() else {
        return Err(mismatched_descriptor("sqlite"));
    };

    Ok(Box::new(SqliteConnector {
        config: config.clone(),
    }))
}

/// Opens one connection to a SQLite database file, or a private in-memory
/// database for `:memory:`.
#[derive(Debug, Clone)]
pub struct SqliteConnector {
    config: SqliteConfig,
}

impl SqliteConnector {
    fn connect_options(&self) -> LoadResult<SqliteConnectOptions> {
        if self.config.path == IN_MEMORY_PATH {
            return SqliteConnectOptions::from_str("sqlite::memory:")
                .map_err(|err| connection_error(err, &self.config.path));
        }

        Ok(SqliteConnectOptions::new()
            .filename(&self.config.path)
            .create_if_missing(true))
    }
}

#[async_trait]
impl Connector for SqliteConnector {
    async fn connect(&self) -> LoadResult<Box<dyn BulkExecutor>> {
        let options = self.connect_options()?;
        let connection = SqliteConnection::connect_with(&options)
            .await
            .map_err(|err| connection_error(err, &self.config.path))?;

        Ok(Box::new(SqliteExecutor { connection }))
    }
}

pub struct SqliteExecutor {
    connection: SqliteConnection,
}

impl SqliteExecutor {
    /// Inserts all rows in one transaction, each chunk bound as a `VALUES`
    /// relation and copied with `INSERT INTO t SELECT * FROM (VALUES ...)`.
    ///
    /// A failing statement rolls the transaction back, so nothing is loaded
    /// unless the commit itself fails.
    async fn insert_source(&mut self, table: &str, source: &TabularSource) -> LoadResult<u64> {
        let rows: Vec<Row<'_>> = source.rows().collect();
        let rows_per_statement = (MAX_BIND_PARAMETERS / source.num_columns().max(1)).max(1);
        let target = quote_qualified(table);

        let mut transaction = self.connection.begin().await.map_err(|err| {
            LoadError::bulk(BulkPhase::NotStarted, "Failed to begin transaction", err)
        })?;

        let mut inserted = 0;
        for chunk in rows.chunks(rows_per_statement) {
            let mut builder =
                QueryBuilder::<Sqlite>::new(insert_select_prefix(&target));
            builder.push_values(chunk.iter().copied(), |mut values, row| {
                for cell in row.cells() {
                    bind_cell(&mut values, cell);
                }
            });
            builder.push(")");

            let result = builder
                .build()
                .execute(&mut *transaction)
                .await
                .map_err(|err| LoadError::bulk(BulkPhase::NotStarted, "INSERT failed", err))?;
            inserted += result.rows_affected();
            debug!(table, rows = chunk.len(), "inserted chunk");
        }

        transaction.commit().await.map_err(|err| {
            LoadError::bulk(BulkPhase::Interrupted, "Failed to commit inserted rows", err)
        })?;

        Ok(inserted)
    }
}

fn insert_select_prefix(target: &str) -> String {
    format!("INSERT INTO {target} SELECT * FROM (")
}

#[async_trait]
impl BulkExecutor for SqliteExecutor {
    async fn bulk_load(&mut self, table: &str, input: BulkInput<'_>) -> LoadResult<Option<u64>> {
        let BulkInput::Source(source) = input else {
            return Err(unexpected_input(DestinationKind::Sqlite, &input));
        };

        let inserted = self.insert_source(table, source).await?;
        Ok(Some(inserted))
    }

    async fn execute(&mut self, sql: &str) -> LoadResult<u64> {
        let result = sqlx::Executor::execute(&mut self.connection, sqlx::raw_sql(sql))
            .await
            .map_err(statement_error)?;

        Ok(result.rows_affected())
    }

    async fn query(&mut self, sql: &str) -> LoadResult<Vec<Vec<Cell>>> {
        let rows = sqlx::query(sql)
            .fetch_all(&mut self.connection)
            .await
            .map_err(statement_error)?;

        rows.iter().map(decode_row).collect()
    }

    async fn close(self: Box<Self>) -> LoadResult<()> {
        self.connection
            .close()
            .await
            .map_err(|err| connection_error(err, "close"))
    }
}

fn bind_cell(values: &mut Separated<'_, '_, Sqlite, &'static str>, cell: &Cell) {
    match cell {
        Cell::Null => values.push_bind(None::<String>),
        Cell::Bool(v) => values.push_bind(*v),
        Cell::I64(v) => values.push_bind(*v),
        Cell::F64(v) => values.push_bind(*v),
        Cell::String(v) => values.push_bind(v.clone()),
        Cell::Date(v) => values.push_bind(*v),
        Cell::TimeStamp(v) => values.push_bind(*v),
        Cell::TimeStampTz(v) => values.push_bind(*v),
        Cell::Uuid(v) => values.push_bind(v.to_string()),
        Cell::Json(v) => values.push_bind(v.to_string()),
        Cell::Bytes(v) => values.push_bind(v.clone()),
    };
}

/// Decodes a row by the storage class of each value.
fn decode_row(row: &SqliteRow) -> LoadResult<Vec<Cell>> {
    let mut cells = Vec::with_capacity(row.columns().len());

    for column in row.columns() {
        let index = column.ordinal();
        let raw = row.try_get_raw(index).map_err(statement_error)?;
        if raw.is_null() {
            cells.push(Cell::Null);
            continue;
        }

        let cell = match raw.type_info().name() {
            "INTEGER" => Cell::I64(row.try_get(index).map_err(statement_error)?),
            "REAL" => Cell::F64(row.try_get(index).map_err(statement_error)?),
            "BLOB" => Cell::Bytes(row.try_get(index).map_err(statement_error)?),
            _ => Cell::String(row.try_get(index).map_err(statement_error)?),
        };
        cells.push(cell);
    }

    Ok(cells)
}

fn connection_error(err: sqlx::Error, path: &str) -> LoadError {
    load_error!(
        ErrorKind::ConnectionError,
        "SQLite connection failed",
        format!("{path}: {err}")
    )
}

fn statement_error(err: sqlx::Error) -> LoadError {
    load_error!(ErrorKind::BulkCommandError, "SQLite statement failed", err)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::test_utils::fixtures::two_column_source;

    async fn memory_executor() -> Box<dyn BulkExecutor> {
        let descriptor =
            DestinationDescriptor::from_raw(&json!({ "kind": "sqlite", "path": ":memory:" }))
                .unwrap();
        connector(&descriptor).unwrap().connect().await.unwrap()
    }

    #[tokio::test]
    async fn rows_are_inserted_by_position() {
        let mut executor = memory_executor().await;
        executor
            .execute("CREATE TABLE t (col1 INTEGER, col2 INTEGER)")
            .await
            .unwrap();

        let source = two_column_source();
        let rows = executor
            .bulk_load("t", BulkInput::Source(&source))
            .await
            .unwrap();
        assert_eq!(rows, Some(2));

        let rows = executor
            .query("SELECT col1, col2 FROM t ORDER BY col1")
            .await
            .unwrap();
        assert_eq!(
            rows,
            vec![
                vec![Cell::I64(1), Cell::I64(3)],
                vec![Cell::I64(2), Cell::I64(4)]
            ]
        );
    }

    #[test]
    fn chunks_are_selected_from_a_values_relation() {
        assert_eq!(
            insert_select_prefix(&quote_qualified("main.Events")),
            r#"INSERT INTO main."Events" SELECT * FROM ("#
        );
    }

    #[tokio::test]
    async fn source_names_need_not_match_the_table() {
        let mut executor = memory_executor().await;
        executor
            .execute("CREATE TABLE t (a INTEGER, b INTEGER)")
            .await
            .unwrap();

        let source = two_column_source();
        executor
            .bulk_load("t", BulkInput::Source(&source))
            .await
            .unwrap();

        let rows = executor.query("SELECT b FROM t ORDER BY a").await.unwrap();
        assert_eq!(rows, vec![vec![Cell::I64(3)], vec![Cell::I64(4)]]);
    }

    #[tokio::test]
    async fn failed_inserts_are_not_started_bulk_errors() {
        let mut executor = memory_executor().await;
        let source = two_column_source();

        let err = executor
            .bulk_load("missing", BulkInput::Source(&source))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BulkCommandError);
        assert_eq!(err.bulk_phase(), Some(BulkPhase::NotStarted));
    }

    #[tokio::test]
    async fn nulls_text_and_blobs_round_trip() {
        let mut executor = memory_executor().await;
        executor
            .execute("CREATE TABLE t (a TEXT, b BLOB, c REAL)")
            .await
            .unwrap();

        let source = TabularSource::new(vec![
            crate::types::Column::new("a", vec![Cell::from("x"), Cell::Null]),
            crate::types::Column::new("b", vec![Cell::Bytes(vec![1, 2]), Cell::Null]),
            crate::types::Column::new("c", vec![Cell::F64(0.5), Cell::Null]),
        ])
        .unwrap();
        executor
            .bulk_load("t", BulkInput::Source(&source))
            .await
            .unwrap();

        let rows = executor.query("SELECT a, b, c FROM t").await.unwrap();
        assert_eq!(
            rows,
            vec![
                vec![Cell::from("x"), Cell::Bytes(vec![1, 2]), Cell::F64(0.5)],
                vec![Cell::Null, Cell::Null, Cell::Null]
            ]
        );
    }
}
