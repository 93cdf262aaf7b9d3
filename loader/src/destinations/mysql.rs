use std::path::Path;

use async_trait::async_trait;
use futures::StreamExt;
use loader_config::shared::{DestinationConfig, DestinationKind, MysqlConfig};
use mysql_async::prelude::Queryable;
use mysql_async::{Conn, InfileData, OptsBuilder, Row, Value};
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

use crate::bulk::{BulkExecutor, BulkInput, Connector};
use crate::descriptor::DestinationDescriptor;
use crate::destinations::{mismatched_descriptor, unexpected_input};
use crate::error::{BulkPhase, ErrorKind, LoadError, LoadResult};
use crate::load_error;
use crate::types::Cell;
use crate::types::text::infer_cell;

/// Reads files written with [`CsvDialect::MYSQL`](crate::encoding::CsvDialect::MYSQL).
const LOAD_DATA_FORMAT: &str = r#"CHARACTER SET utf8mb4 FIELDS TERMINATED BY ',' OPTIONALLY ENCLOSED BY '"' ESCAPED BY '\\' LINES TERMINATED BY '\n'"#;

pub fn connector(descriptor: &DestinationDescriptor) -> LoadResult<Box<dyn Connector>> {
    let DestinationConfig::Mysql(config) = descriptor.config() else {
        return Err(mismatched_descriptor("mysql"));
    };

    Ok(Box::new(MysqlConnector {
        config: config.clone(),
    }))
}

#[derive(Debug, Clone)]
pub struct MysqlConnector {
    config: MysqlConfig,
}

#[async_trait]
impl Connector for MysqlConnector {
    async fn connect(&self) -> LoadResult<Box<dyn BulkExecutor>> {
        let options = OptsBuilder::default()
            .ip_or_hostname(self.config.host.clone())
            .tcp_port(self.config.port)
            .user(Some(self.config.user.clone()))
            .pass(Some(self.config.password.expose().to_string()))
            .db_name(Some(self.config.database.clone()));

        let connection = Conn::new(options).await.map_err(|err| {
            load_error!(
                ErrorKind::ConnectionError,
                "MySQL connection failed",
                format!("{}:{}: {err}", self.config.host, self.config.port)
            )
        })?;
        info!(host = %self.config.host, database = %self.config.database, "connected to mysql");

        Ok(Box::new(MysqlExecutor { connection }))
    }
}

/// Loads local files with `LOAD DATA LOCAL INFILE`.
pub struct MysqlExecutor {
    connection: Conn,
}

fn load_data_statement(table: &str, path: &str) -> String {
    format!(
        "LOAD DATA LOCAL INFILE {} INTO TABLE {} {LOAD_DATA_FORMAT}",
        quote_string(path),
        quote_table(table)
    )
}

/// Quotes each dot-separated part of a table name with backticks.
fn quote_table(name: &str) -> String {
    name.split('.')
        .map(|part| format!("`{}`", part.replace('`', "``")))
        .collect::<Vec<_>>()
        .join(".")
}

fn quote_string(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "''"))
}

async fn open_staged_file(path: &Path) -> LoadResult<File> {
    File::open(path).await.map_err(|err| {
        load_error!(
            ErrorKind::StagingError,
            "Staged file could not be opened",
            format!("{}: {err}", path.display())
        )
    })
}

/// Streams the staged file in chunks, never holding all of it in memory.
fn infile_data(file: File) -> InfileData {
    ReaderStream::new(file).boxed()
}

/// Server errors abort `LOAD DATA` as a whole. Other failures may happen while
/// the file is being sent.
fn bulk_error(err: mysql_async::Error) -> LoadError {
    let phase = match err {
        mysql_async::Error::Server(_) => BulkPhase::NotStarted,
        ref other if other.is_fatal() => BulkPhase::Interrupted,
        _ => BulkPhase::NotStarted,
    };

    LoadError::bulk(phase, "LOAD DATA failed", err)
}

fn statement_error(err: mysql_async::Error) -> LoadError {
    load_error!(ErrorKind::BulkCommandError, "MySQL statement failed", err)
}

#[async_trait]
impl BulkExecutor for MysqlExecutor {
    async fn bulk_load(&mut self, table: &str, input: BulkInput<'_>) -> LoadResult<Option<u64>> {
        let path = match input {
            BulkInput::LocalFile(artifact) => artifact.local_path(),
            _ => None,
        };
        let Some(path) = path else {
            return Err(unexpected_input(DestinationKind::Mysql, &input));
        };

        // The server pulls the file through this connection, the handler
        // answers that request.
        let file = open_staged_file(path).await?;
        self.connection
            .set_infile_handler(async move { Ok::<_, mysql_async::Error>(infile_data(file)) });

        let statement = load_data_statement(table, &path.display().to_string());
        debug!(table, path = %path.display(), "loading local file");
        self.connection
            .query_drop(statement)
            .await
            .map_err(bulk_error)?;

        Ok(Some(self.connection.affected_rows()))
    }

    async fn execute(&mut self, sql: &str) -> LoadResult<u64> {
        self.connection
            .query_drop(sql)
            .await
            .map_err(statement_error)?;

        Ok(self.connection.affected_rows())
    }

    async fn query(&mut self, sql: &str) -> LoadResult<Vec<Vec<Cell>>> {
        let rows: Vec<Row> = self.connection.query(sql).await.map_err(statement_error)?;

        Ok(rows
            .into_iter()
            .map(|mut row| {
                (0..row.len())
                    .map(|index| value_to_cell(row.take(index).unwrap_or(Value::NULL)))
                    .collect()
            })
            .collect())
    }

    async fn close(self: Box<Self>) -> LoadResult<()> {
        self.connection.disconnect().await.map_err(|err| {
            load_error!(
                ErrorKind::ConnectionError,
                "MySQL disconnect failed",
                err
            )
        })
    }
}

/// Text protocol values arrive as bytes and are typed like CSV input.
fn value_to_cell(value: Value) -> Cell {
    match value {
        Value::NULL => Cell::Null,
        Value::Int(v) => Cell::I64(v),
        Value::UInt(v) => i64::try_from(v)
            .map(Cell::I64)
            .unwrap_or_else(|_| Cell::String(v.to_string())),
        Value::Float(v) => Cell::F64(v.into()),
        Value::Double(v) => Cell::F64(v),
        Value::Bytes(bytes) => match String::from_utf8(bytes) {
            Ok(text) => infer_cell(&text),
            Err(err) => Cell::Bytes(err.into_bytes()),
        },
        other => Cell::String(other.as_sql(true)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_data_quotes_path_and_table() {
        let statement = load_data_statement("shop.order items", r"C:\tmp\o'k.csv");
        assert!(statement.starts_with(
            r"LOAD DATA LOCAL INFILE 'C:\\tmp\\o''k.csv' INTO TABLE `shop`.`order items` "
        ));
        assert!(statement.contains(r"ESCAPED BY '\\'"));
    }

    #[tokio::test]
    async fn staged_files_are_streamed_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.csv");
        let contents = "1,3\n2,4\n".repeat(10_000);
        std::fs::write(&path, &contents).unwrap();

        let file = open_staged_file(&path).await.unwrap();
        let chunks: Vec<_> = infile_data(file)
            .map(|chunk| chunk.unwrap())
            .collect()
            .await;
        assert!(chunks.len() > 1);
        assert_eq!(chunks.concat(), contents.as_bytes());

        let err = open_staged_file(&dir.path().join("missing.csv"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StagingError);
    }

    #[test]
    fn text_values_are_typed() {
        assert_eq!(value_to_cell(Value::Bytes(b"42".to_vec())), Cell::I64(42));
        assert_eq!(value_to_cell(Value::Bytes(b"abc".to_vec())), Cell::from("abc"));
        assert_eq!(value_to_cell(Value::NULL), Cell::Null);
        assert_eq!(value_to_cell(Value::UInt(7)), Cell::I64(7));
    }
}
