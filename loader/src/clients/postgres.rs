use std::io::BufReader;
use std::pin::pin;

use bytes::Bytes;
use futures::SinkExt;
use loader_config::shared::{IntoConnectOptions, PgConnectionConfig};
use rustls::ClientConfig;
use tokio_postgres::tls::MakeTlsConnect;
use tokio_postgres::{Client, Config, Connection, NoTls, SimpleQueryMessage, Socket};
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::{Instrument, debug, error, info};

use crate::clients::tls::install_crypto_provider_once;
use crate::error::{BulkPhase, ErrorKind, LoadError, LoadResult};
use crate::load_error;
use crate::types::Cell;
use crate::types::text::infer_cell;

/// Spawns the task driving a connection until it terminates.
fn spawn_postgres_connection<T>(connection: Connection<Socket, T::Stream>)
where
    T: MakeTlsConnect<Socket>,
    T::Stream: Send + 'static,
{
    let span = tracing::Span::current();
    let task = async move {
        if let Err(err) = connection.await {
            error!("an error occurred during the postgres connection: {}", err);
            return;
        }

        debug!("postgres connection terminated");
    }
    .instrument(span);

    tokio::spawn(task);
}

/// Client for servers speaking the Postgres wire protocol.
///
/// Used by the PostgreSQL and Redshift destinations. `label` names the server
/// in errors and logs.
#[derive(Debug)]
pub struct PgWireClient {
    client: Client,
    label: &'static str,
}

impl PgWireClient {
    /// Connects with TLS when it is enabled in `config`.
    pub async fn connect(config: &PgConnectionConfig, label: &'static str) -> LoadResult<Self> {
        let options: Config = config.with_db();

        let client = if config.tls.enabled {
            install_crypto_provider_once();

            let mut root_store = rustls::RootCertStore::empty();
            let mut root_certs_reader = BufReader::new(config.tls.trusted_root_certs.as_bytes());
            for cert in rustls_pemfile::certs(&mut root_certs_reader) {
                let cert = cert.map_err(|err| {
                    load_error!(
                        ErrorKind::InvalidConfig,
                        "Invalid trusted root certificate",
                        err
                    )
                })?;
                root_store.add(cert).map_err(|err| {
                    load_error!(
                        ErrorKind::InvalidConfig,
                        "Invalid trusted root certificate",
                        err
                    )
                })?;
            }

            let tls_config = ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth();

            let (client, connection) = options
                .connect(MakeRustlsConnect::new(tls_config))
                .await
                .map_err(|err| connection_error(err, config))?;
            spawn_postgres_connection::<MakeRustlsConnect>(connection);
            client
        } else {
            let (client, connection) = options
                .connect(NoTls)
                .await
                .map_err(|err| connection_error(err, config))?;
            spawn_postgres_connection::<NoTls>(connection);
            client
        };

        info!(
            host = %config.host,
            database = %config.name,
            tls = config.tls.enabled,
            "connected to {label}"
        );

        Ok(PgWireClient { client, label })
    }

    /// Streams `body` into a `COPY ... FROM STDIN` statement and returns the
    /// number of copied rows.
    ///
    /// A statement the server rejects up front fails with
    /// [`BulkPhase::NotStarted`]. Failures once data is flowing are
    /// [`BulkPhase::Interrupted`].
    pub async fn copy_in(&self, statement: &str, body: Bytes) -> LoadResult<u64> {
        let sink = self
            .client
            .copy_in::<_, Bytes>(statement)
            .await
            .map_err(|err| LoadError::bulk(BulkPhase::NotStarted, "COPY was rejected", err))?;
        let mut sink = pin!(sink);

        sink.send(body)
            .await
            .map_err(|err| LoadError::bulk(BulkPhase::Interrupted, "COPY data transfer failed", err))?;

        sink.as_mut()
            .finish()
            .await
            .map_err(|err| LoadError::bulk(BulkPhase::Interrupted, "COPY did not complete", err))
    }

    /// Runs a bulk command that reads its data server side, like a `COPY` from
    /// object storage.
    ///
    /// The server reporting an error means the command was rolled back, a lost
    /// connection leaves its outcome unknown.
    pub async fn run_bulk(&self, statement: &str) -> LoadResult<u64> {
        self.execute_raw(statement).await.map_err(|err| {
            let phase = if err.as_db_error().is_some() {
                BulkPhase::NotStarted
            } else {
                BulkPhase::Interrupted
            };
            LoadError::bulk(phase, "Bulk command failed", format!("{}: {err}", self.label))
        })
    }

    /// Runs a statement that does not stream data and returns the affected rows.
    pub async fn execute(&self, statement: &str) -> LoadResult<u64> {
        self.execute_raw(statement)
            .await
            .map_err(|err| self.statement_error(err))
    }

    async fn execute_raw(&self, statement: &str) -> Result<u64, tokio_postgres::Error> {
        let messages = self.client.simple_query(statement).await?;

        Ok(messages
            .iter()
            .filter_map(|message| match message {
                SimpleQueryMessage::CommandComplete(rows) => Some(*rows),
                _ => None,
            })
            .sum())
    }

    /// Runs a query through the simple protocol.
    ///
    /// Values arrive as text and are typed by [`infer_cell`].
    pub async fn query(&self, statement: &str) -> LoadResult<Vec<Vec<Cell>>> {
        let messages = self
            .client
            .simple_query(statement)
            .await
            .map_err(|err| self.statement_error(err))?;

        let mut rows = Vec::new();
        for message in messages {
            if let SimpleQueryMessage::Row(row) = message {
                let cells = (0..row.len())
                    .map(|index| row.get(index).map(infer_cell).unwrap_or(Cell::Null))
                    .collect();
                rows.push(cells);
            }
        }

        Ok(rows)
    }

    /// Runs a query returning a single integer, like `SELECT pg_last_copy_count()`.
    pub async fn query_count(&self, statement: &str) -> LoadResult<Option<u64>> {
        let rows = self.query(statement).await?;

        Ok(rows.first().and_then(|row| match row.first() {
            Some(Cell::I64(count)) => u64::try_from(*count).ok(),
            _ => None,
        }))
    }

    fn statement_error(&self, err: tokio_postgres::Error) -> LoadError {
        if self.client.is_closed() {
            return load_error!(
                ErrorKind::ConnectionError,
                "Connection was closed",
                format!("{}: {err}", self.label)
            );
        }

        load_error!(
            ErrorKind::BulkCommandError,
            "Statement failed",
            format!("{}: {err}", self.label)
        )
    }
}

fn connection_error(err: tokio_postgres::Error, config: &PgConnectionConfig) -> LoadError {
    load_error!(
        ErrorKind::ConnectionError,
        "Failed to connect",
        format!("{}:{}/{}: {err}", config.host, config.port, config.name)
    )
}
