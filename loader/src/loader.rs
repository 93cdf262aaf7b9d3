use std::fmt;
use std::fs::File;
use std::io::BufWriter;
use std::mem;
use std::path::Path;
use std::time::{Duration, Instant};

use bytes::Bytes;
use loader_config::shared::{DestinationKind, StagingFormat};
use metrics::{counter, histogram};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::bulk::{BulkExecutor, BulkInput, Connector};
use crate::descriptor::DestinationDescriptor;
use crate::encoding::{encode, encode_csv, write_csv};
use crate::error::{ErrorKind, LoadError, LoadResult};
use crate::metrics::{
    FAILURE, KIND, LOADER_LOAD_DURATION_SECONDS, LOADER_LOADS_TOTAL, LOADER_ROWS_LOADED_TOTAL,
    OUTCOME, STRATEGY, SUCCESS, register_metrics,
};
use crate::staging::{
    ArtifactLocation, CleanupManager, CleanupOutcome, StagingArtifact, artifact_name, table_part,
};
use crate::strategy::StagingStrategy;
use crate::types::{Cell, TabularSource};
use crate::{bail, load_error};

/// Outcome of a successful [`Loader::load`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkLoadResult {
    pub rows_loaded: u64,
    pub elapsed: Duration,
}

/// Lifecycle state of a [`Loader`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderState {
    Disconnected,
    Connected,
    Closed,
}

enum Session {
    Disconnected,
    Connected(Box<dyn BulkExecutor>),
    Closed,
}

/// Loads tabular sources into one destination.
///
/// A loader starts disconnected, is connected once and closed once. Loads run
/// one at a time since [`Loader::load`] takes `&mut self`. Distinct loaders are
/// independent and may load concurrently, even into the same table.
pub struct Loader {
    id: Uuid,
    descriptor: DestinationDescriptor,
    connector: Box<dyn Connector>,
    session: Session,
}

impl Loader {
    pub fn new(descriptor: DestinationDescriptor, connector: Box<dyn Connector>) -> Loader {
        Loader {
            id: Uuid::new_v4(),
            descriptor,
            connector,
            session: Session::Disconnected,
        }
    }

    /// Identifier stamped on every artifact this loader stages.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> DestinationKind {
        self.descriptor.kind()
    }

    pub fn strategy(&self) -> StagingStrategy {
        self.descriptor.strategy()
    }

    pub fn descriptor(&self) -> &DestinationDescriptor {
        &self.descriptor
    }

    pub fn state(&self) -> LoaderState {
        match self.session {
            Session::Disconnected => LoaderState::Disconnected,
            Session::Connected(_) => LoaderState::Connected,
            Session::Closed => LoaderState::Closed,
        }
    }

    /// Opens the destination session.
    ///
    /// On failure the loader stays disconnected and the call may be retried.
    pub async fn connect(&mut self) -> LoadResult<()> {
        match self.session {
            Session::Disconnected => {}
            Session::Connected(_) => {
                bail!(ErrorKind::InvalidState, "Loader is already connected");
            }
            Session::Closed => bail!(ErrorKind::AlreadyClosed, "Loader is closed"),
        }

        let kind = self.kind();
        info!(%kind, loader_id = %self.id, "connecting to destination");

        match self.connector.connect().await {
            Ok(executor) => {
                self.session = Session::Connected(executor);
                info!(%kind, loader_id = %self.id, "connected to destination");
                Ok(())
            }
            Err(err) => {
                warn!(%kind, loader_id = %self.id, error = %err, "failed to connect to destination");
                Err(err)
            }
        }
    }

    /// Loads every row of `source` into the existing table `table`.
    ///
    /// Columns are matched by position, except Parquet staged for Snowflake or
    /// Databricks which is matched by name. Any artifact staged on the way is
    /// deleted before this returns, whatever the outcome. Failing to delete it
    /// is logged and does not change the result.
    pub async fn load(
        &mut self,
        source: &TabularSource,
        table: &str,
    ) -> LoadResult<BulkLoadResult> {
        let kind = self.descriptor.kind();
        let strategy = self.descriptor.strategy();
        let executor = match &mut self.session {
            Session::Connected(executor) => executor.as_mut(),
            Session::Disconnected => bail!(ErrorKind::InvalidState, "Loader is not connected"),
            Session::Closed => bail!(ErrorKind::AlreadyClosed, "Loader is closed"),
        };

        if table.trim().is_empty() {
            bail!(
                ErrorKind::InvalidSource,
                "Target table name must not be empty"
            );
        }

        register_metrics();
        let started = Instant::now();

        let result = if source.is_empty() {
            info!(%kind, table, "source has no rows, skipping load");
            Ok(0)
        } else {
            info!(
                %kind,
                table,
                %strategy,
                rows = source.num_rows(),
                columns = source.num_columns(),
                "loading source"
            );
            let run = LoadRun {
                loader_id: self.id,
                descriptor: &self.descriptor,
                source,
                table,
            };
            run.execute(executor).await
        };

        let elapsed = started.elapsed();
        histogram!(
            LOADER_LOAD_DURATION_SECONDS,
            KIND => kind.as_str(),
            STRATEGY => strategy.as_str()
        )
        .record(elapsed.as_secs_f64());

        match result {
            Ok(rows_loaded) => {
                counter!(LOADER_LOADS_TOTAL, KIND => kind.as_str(), OUTCOME => SUCCESS)
                    .increment(1);
                counter!(LOADER_ROWS_LOADED_TOTAL, KIND => kind.as_str()).increment(rows_loaded);
                info!(%kind, table, rows = rows_loaded, elapsed_ms = elapsed.as_millis() as u64, "load finished");

                Ok(BulkLoadResult {
                    rows_loaded,
                    elapsed,
                })
            }
            Err(err) => {
                counter!(LOADER_LOADS_TOTAL, KIND => kind.as_str(), OUTCOME => FAILURE)
                    .increment(1);
                error!(%kind, table, error = %err, "load failed");

                Err(err)
            }
        }
    }

    /// Executes a statement on the loader's session.
    pub async fn execute(&mut self, sql: &str) -> LoadResult<u64> {
        self.executor()?.execute(sql).await
    }

    /// Runs a query on the loader's session.
    pub async fn query(&mut self, sql: &str) -> LoadResult<Vec<Vec<Cell>>> {
        self.executor()?.query(sql).await
    }

    /// Closes the session. Every later call fails with
    /// [`ErrorKind::AlreadyClosed`], including a second close.
    pub async fn close(&mut self) -> LoadResult<()> {
        match mem::replace(&mut self.session, Session::Closed) {
            Session::Closed => bail!(ErrorKind::AlreadyClosed, "Loader is already closed"),
            Session::Disconnected => {}
            Session::Connected(executor) => {
                if let Err(err) = executor.close().await {
                    warn!(kind = %self.kind(), error = %err, "error while closing destination session");
                }
            }
        }

        info!(kind = %self.kind(), loader_id = %self.id, "loader closed");
        Ok(())
    }

    fn executor(&mut self) -> LoadResult<&mut dyn BulkExecutor> {
        match &mut self.session {
            Session::Connected(executor) => Ok(executor.as_mut()),
            Session::Disconnected => bail!(ErrorKind::InvalidState, "Loader is not connected"),
            Session::Closed => bail!(ErrorKind::AlreadyClosed, "Loader is closed"),
        }
    }
}

impl fmt::Debug for Loader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Loader")
            .field("id", &self.id)
            .field("kind", &self.kind())
            .field("strategy", &self.strategy())
            .field("state", &self.state())
            .finish()
    }
}

/// One load call: the source, its target and the descriptor it runs under.
struct LoadRun<'a> {
    loader_id: Uuid,
    descriptor: &'a DestinationDescriptor,
    source: &'a TabularSource,
    table: &'a str,
}

impl LoadRun<'_> {
    async fn execute(&self, executor: &mut dyn BulkExecutor) -> LoadResult<u64> {
        let strategy = self.descriptor.strategy();

        let reported = if strategy.creates_artifact() {
            let mut cleanup = CleanupManager::new(self.descriptor.kind());
            let result = match strategy {
                StagingStrategy::LocalTempFile => self.stage_local(executor, &mut cleanup).await,
                _ => self.stage_object(executor, &mut cleanup).await,
            };

            match cleanup.release().await {
                CleanupOutcome::Nothing | CleanupOutcome::Removed(_) => {}
                // Already logged and counted, it must not replace `result`.
                CleanupOutcome::Failed(artifact, _) => {
                    debug!(artifact = %artifact.location(), "staging artifact left behind");
                }
            }

            result?
        } else {
            match strategy {
                StagingStrategy::DirectStream => {
                    let body = encode_csv(self.source, self.descriptor.csv_dialect())
                        .map_err(|err| staging_error("Failed to encode the source", err))?;
                    let body = Bytes::from(body);
                    debug!(bytes = body.len(), "streaming encoded source");

                    executor.bulk_load(self.table, BulkInput::Stream(&body)).await?
                }
                _ => {
                    executor
                        .bulk_load(self.table, BulkInput::Source(self.source))
                        .await?
                }
            }
        };

        Ok(reported.unwrap_or(self.source.num_rows() as u64))
    }

    async fn stage_local(
        &self,
        executor: &mut dyn BulkExecutor,
        cleanup: &mut CleanupManager,
    ) -> LoadResult<Option<u64>> {
        let dir = self
            .descriptor
            .config()
            .staging_dir()
            .map(Path::to_path_buf)
            .unwrap_or_else(std::env::temp_dir);

        let dialect = self.descriptor.csv_dialect();
        let artifact = stage_local_file(&dir, self.table, self.loader_id, cleanup, |file| {
            write_csv(self.source, dialect, BufWriter::new(file))
        })?;

        executor
            .bulk_load(self.table, BulkInput::LocalFile(&artifact))
            .await
    }

    async fn stage_object(
        &self,
        executor: &mut dyn BulkExecutor,
        cleanup: &mut CleanupManager,
    ) -> LoadResult<Option<u64>> {
        let Some(store) = executor.object_store() else {
            bail!(
                ErrorKind::InvalidState,
                "Destination session has no object store to stage into",
                self.descriptor.kind()
            );
        };

        let format = self.descriptor.staging_format();
        let body = encode(self.source, format, self.descriptor.csv_dialect())
            .map_err(|err| staging_error("Failed to encode the source", err))?;

        let key = artifact_name(self.table, format);
        let artifact = StagingArtifact::new(
            ArtifactLocation::Object {
                key: key.clone(),
                uri: store.uri_for(&key),
            },
            format,
            self.loader_id,
        );
        let artifact = cleanup
            .track_object(artifact, key.clone(), store.clone())?
            .clone();

        store
            .put(&key, Bytes::from(body))
            .await
            .map_err(|err| staging_error("Failed to upload the staged file", err))?;
        debug!(artifact = %artifact.location(), "uploaded staged object");

        executor
            .bulk_load(self.table, BulkInput::Object(&artifact))
            .await
    }
}

/// Creates a CSV staging file for `table` in `dir` and fills it with `write`.
///
/// The file is tracked by `cleanup` before anything is written, so a failed
/// write leaves the partial file for the manager to remove.
fn stage_local_file(
    dir: &Path,
    table: &str,
    loader_id: Uuid,
    cleanup: &mut CleanupManager,
    write: impl FnOnce(File) -> LoadResult<()>,
) -> LoadResult<StagingArtifact> {
    let file = local_temp_file(dir, table)
        .map_err(|err| staging_error("Failed to create local staging file", err.into()))?;
    let (file, path) = file.into_parts();

    let artifact = StagingArtifact::new(
        ArtifactLocation::LocalFile(path.to_path_buf()),
        StagingFormat::Csv,
        loader_id,
    );
    let artifact = cleanup.track_local(artifact, path)?.clone();

    write(file).map_err(|err| staging_error("Failed to write local staging file", err))?;
    debug!(artifact = %artifact.location(), "wrote local staging file");

    Ok(artifact)
}

fn local_temp_file(dir: &Path, table: &str) -> std::io::Result<tempfile::NamedTempFile> {
    let prefix = format!("{}_", table_part(table));
    let mut builder = tempfile::Builder::new();
    builder.prefix(&prefix).suffix(".csv");

    // The destination server may read the file as another user.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        builder.permissions(std::fs::Permissions::from_mode(0o644));
    }

    builder.tempfile_in(dir)
}

/// Reports `err` as a [`ErrorKind::StagingError`], keeping it as detail when
/// it is of another kind.
fn staging_error(description: &'static str, err: LoadError) -> LoadError {
    if err.kind() == ErrorKind::StagingError {
        return err;
    }

    load_error!(ErrorKind::StagingError, description, err)
}
