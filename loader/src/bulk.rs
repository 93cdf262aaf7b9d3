use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::bail;
use crate::error::{ErrorKind, LoadResult};
use crate::staging::StagingArtifact;
use crate::store::ObjectStore;
use crate::types::{Cell, TabularSource};

/// Data handed to a destination's bulk command, shaped by the staging
/// strategy of its kind.
#[derive(Debug, Clone, Copy)]
pub enum BulkInput<'a> {
    /// CSV encoded rows to stream into the command.
    Stream(&'a Bytes),
    /// A local CSV file the command reads by path.
    LocalFile(&'a StagingArtifact),
    /// An uploaded object the command reads by URI.
    Object(&'a StagingArtifact),
    /// The source itself, for vendor APIs and embedded engines.
    Source(&'a TabularSource),
}

impl BulkInput<'_> {
    pub fn describe(&self) -> &'static str {
        match self {
            BulkInput::Stream(_) => "stream",
            BulkInput::LocalFile(_) => "local file",
            BulkInput::Object(_) => "object",
            BulkInput::Source(_) => "source",
        }
    }
}

/// Opens sessions against one destination.
///
/// Constructing a connector performs no I/O, all of it happens in
/// [`Connector::connect`].
#[async_trait]
pub trait Connector: fmt::Debug + Send + Sync {
    /// Establishes a session. Network and authentication failures are
    /// reported as [`ErrorKind::ConnectionError`].
    async fn connect(&self) -> LoadResult<Box<dyn BulkExecutor>>;
}

/// A live destination session able to run its native bulk command.
#[async_trait]
pub trait BulkExecutor: Send {
    /// Runs the bulk command loading `input` into `table`.
    ///
    /// Returns the number of rows the destination reports as loaded, or `None`
    /// when it reports nothing. Failures of the command itself are
    /// [`ErrorKind::BulkCommandError`]s carrying the phase they happened in.
    async fn bulk_load(&mut self, table: &str, input: BulkInput<'_>) -> LoadResult<Option<u64>>;

    /// Store that object-storage-staged loads upload to.
    fn object_store(&self) -> Option<Arc<dyn ObjectStore>> {
        None
    }

    /// Executes a statement on this session and returns the affected rows.
    async fn execute(&mut self, _sql: &str) -> LoadResult<u64> {
        bail!(
            ErrorKind::Unsupported,
            "Statements are not supported by this destination"
        );
    }

    /// Runs a query on this session and returns its rows.
    async fn query(&mut self, _sql: &str) -> LoadResult<Vec<Vec<Cell>>> {
        bail!(
            ErrorKind::Unsupported,
            "Queries are not supported by this destination"
        );
    }

    /// Ends the session.
    async fn close(self: Box<Self>) -> LoadResult<()>;
}
