use std::path::Path;

use async_trait::async_trait;
use loader_config::shared::{DestinationConfig, DestinationKind, MssqlConfig};
use tiberius::{AuthMethod, Client, ColumnData, Config};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info};

use crate::bulk::{BulkExecutor, BulkInput, Connector};
use crate::descriptor::DestinationDescriptor;
use crate::destinations::{mismatched_descriptor, unexpected_input};
use crate::error::{BulkPhase, ErrorKind, LoadError, LoadResult};
use crate::load_error;
use crate::types::Cell;

/// Reads files written with [`CsvDialect::MSSQL`](crate::encoding::CsvDialect::MSSQL).
const BULK_INSERT_OPTIONS: &str = "FORMAT = 'CSV', FIELDQUOTE = '\"', FIELDTERMINATOR = ',', ROWTERMINATOR = '0x0a', KEEPNULLS, CODEPAGE = '65001', TABLOCK";

pub fn connector(descriptor: &DestinationDescriptor) -> LoadResult<Box<dyn Connector>> {
    let DestinationConfig::Mssql(config) = descriptor.config() else {
        return Err(mismatched_descriptor("mssql"));
    };

    Ok(Box::new(MssqlConnector {
        config: config.clone(),
    }))
}

#[derive(Debug, Clone)]
pub struct MssqlConnector {
    config: MssqlConfig,
}

impl MssqlConnector {
    fn client_config(&self) -> Config {
        let mut config = Config::new();
        config.host(&self.config.host);
        config.port(self.config.port);
        config.database(&self.config.database);
        config.authentication(AuthMethod::sql_server(
            &self.config.user,
            self.config.password.expose(),
        ));
        if self.config.trust_server_certificate {
            config.trust_cert();
        }

        config
    }
}

#[async_trait]
impl Connector for MssqlConnector {
    async fn connect(&self) -> LoadResult<Box<dyn BulkExecutor>> {
        let config = self.client_config();
        let address = config.get_addr();

        let tcp = TcpStream::connect(&address)
            .await
            .map_err(|err| connection_error(&address, err))?;
        tcp.set_nodelay(true)
            .map_err(|err| connection_error(&address, err))?;

        let client = Client::connect(config, tcp.compat_write())
            .await
            .map_err(|err| connection_error(&address, err))?;
        info!(address = %address, database = %self.config.database, "connected to sql server");

        Ok(Box::new(MssqlExecutor {
            client,
            server_staging_dir: self.config.server_staging_dir.clone(),
        }))
    }
}

/// Loads files from the shared staging directory with `BULK INSERT`.
pub struct MssqlExecutor {
    client: Client<Compat<TcpStream>>,
    server_staging_dir: Option<String>,
}

/// Location of `path` as the server sees it, inside `server_staging_dir` when
/// the share is mounted elsewhere on the server.
fn server_path(server_staging_dir: Option<&str>, path: &Path) -> String {
    let Some(dir) = server_staging_dir else {
        return path.display().to_string();
    };
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    let separator = if dir.contains('\\') && !dir.contains('/') {
        '\\'
    } else {
        '/'
    };
    format!(
        "{}{separator}{file_name}",
        dir.trim_end_matches(['/', '\\'])
    )
}

fn bulk_insert_statement(table: &str, server_path: &str) -> String {
    format!(
        "BULK INSERT {} FROM N'{}' WITH ({BULK_INSERT_OPTIONS})",
        quote_table(table),
        server_path.replace('\'', "''")
    )
}

/// Quotes each dot-separated part of a table name with brackets.
fn quote_table(name: &str) -> String {
    name.split('.')
        .map(|part| format!("[{}]", part.replace(']', "]]")))
        .collect::<Vec<_>>()
        .join(".")
}

/// Errors reported by the server roll the statement back. I/O failures leave
/// its outcome unknown.
fn bulk_error(err: tiberius::error::Error) -> LoadError {
    let phase = match err {
        tiberius::error::Error::Io { .. } => BulkPhase::Interrupted,
        _ => BulkPhase::NotStarted,
    };

    LoadError::bulk(phase, "BULK INSERT failed", err)
}

fn statement_error(err: tiberius::error::Error) -> LoadError {
    load_error!(
        ErrorKind::BulkCommandError,
        "SQL Server statement failed",
        err
    )
}

fn connection_error(address: &str, err: impl std::fmt::Display) -> LoadError {
    load_error!(
        ErrorKind::ConnectionError,
        "SQL Server connection failed",
        format!("{address}: {err}")
    )
}

#[async_trait]
impl BulkExecutor for MssqlExecutor {
    async fn bulk_load(&mut self, table: &str, input: BulkInput<'_>) -> LoadResult<Option<u64>> {
        let path = match input {
            BulkInput::LocalFile(artifact) => artifact.local_path(),
            _ => None,
        };
        let Some(path) = path else {
            return Err(unexpected_input(DestinationKind::Mssql, &input));
        };

        let server_path = server_path(self.server_staging_dir.as_deref(), path);
        debug!(table, path = %server_path, "bulk inserting staged file");

        let result = self
            .client
            .execute(bulk_insert_statement(table, &server_path), &[])
            .await
            .map_err(bulk_error)?;

        Ok(Some(result.total()))
    }

    async fn execute(&mut self, sql: &str) -> LoadResult<u64> {
        let result = self
            .client
            .execute(sql, &[])
            .await
            .map_err(statement_error)?;

        Ok(result.total())
    }

    async fn query(&mut self, sql: &str) -> LoadResult<Vec<Vec<Cell>>> {
        let rows = self
            .client
            .simple_query(sql)
            .await
            .map_err(statement_error)?
            .into_first_result()
            .await
            .map_err(statement_error)?;

        Ok(rows
            .into_iter()
            .map(|row| row.into_iter().map(column_to_cell).collect())
            .collect())
    }

    async fn close(self: Box<Self>) -> LoadResult<()> {
        self.client.close().await.map_err(|err| {
            load_error!(
                ErrorKind::ConnectionError,
                "SQL Server disconnect failed",
                err
            )
        })
    }
}

fn column_to_cell(data: ColumnData<'static>) -> Cell {
    match data {
        ColumnData::U8(v) => v.map(|v| Cell::I64(v.into())).unwrap_or(Cell::Null),
        ColumnData::I16(v) => v.map(|v| Cell::I64(v.into())).unwrap_or(Cell::Null),
        ColumnData::I32(v) => v.map(|v| Cell::I64(v.into())).unwrap_or(Cell::Null),
        ColumnData::I64(v) => v.map(Cell::I64).unwrap_or(Cell::Null),
        ColumnData::F32(v) => v.map(|v| Cell::F64(v.into())).unwrap_or(Cell::Null),
        ColumnData::F64(v) => v.map(Cell::F64).unwrap_or(Cell::Null),
        ColumnData::Bit(v) => v.map(Cell::Bool).unwrap_or(Cell::Null),
        ColumnData::String(v) => v
            .map(|v| Cell::String(v.into_owned()))
            .unwrap_or(Cell::Null),
        ColumnData::Guid(v) => v.map(Cell::Uuid).unwrap_or(Cell::Null),
        ColumnData::Binary(v) => v
            .map(|v| Cell::Bytes(v.into_owned()))
            .unwrap_or(Cell::Null),
        other => Cell::String(format!("{other:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bulk_insert_quotes_table_and_path() {
        assert_eq!(
            bulk_insert_statement("dbo.Order Items", "/mnt/share/o'k.csv"),
            format!(
                "BULK INSERT [dbo].[Order Items] FROM N'/mnt/share/o''k.csv' WITH ({BULK_INSERT_OPTIONS})"
            )
        );
    }

    #[test]
    fn server_paths_follow_the_server_directory_style() {
        let path = Path::new("/mnt/share/events_1.csv");
        assert_eq!(server_path(None, path), "/mnt/share/events_1.csv");
        assert_eq!(
            server_path(Some(r"D:\loads\"), path),
            r"D:\loads\events_1.csv"
        );
        assert_eq!(
            server_path(Some("/var/opt/mssql/loads"), path),
            "/var/opt/mssql/loads/events_1.csv"
        );
    }

    #[test]
    fn columns_map_to_cells() {
        assert_eq!(column_to_cell(ColumnData::I32(Some(3))), Cell::I64(3));
        assert_eq!(column_to_cell(ColumnData::I32(None)), Cell::Null);
        assert_eq!(
            column_to_cell(ColumnData::String(Some("a".into()))),
            Cell::from("a")
        );
    }
}
