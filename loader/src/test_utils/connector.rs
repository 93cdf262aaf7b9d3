use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::bail;
use crate::bulk::{BulkExecutor, BulkInput, Connector};
use crate::error::{BulkPhase, ErrorKind, LoadError, LoadResult};
use crate::store::ObjectStore;
use crate::store::memory::MemoryObjectStore;
use crate::types::Cell;

/// What a [`TestExecutor`] observed when its bulk command ran.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedInput {
    Stream {
        body: Vec<u8>,
    },
    LocalFile {
        path: PathBuf,
        /// Whether the file existed while the command ran.
        existed: bool,
        contents: Option<String>,
    },
    Object {
        uri: String,
        /// Whether the object existed in the store while the command ran.
        existed: bool,
    },
    Source {
        rows: usize,
        columns: usize,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedLoad {
    pub table: String,
    pub input: RecordedInput,
}

#[derive(Debug, Default)]
struct Inner {
    connect_attempts: usize,
    failing_connects: usize,
    bulk_failure: Option<BulkPhase>,
    reported_rows: Option<u64>,
    loads: Vec<RecordedLoad>,
    statements: Vec<String>,
    closed_sessions: usize,
}

/// [`Connector`] recording everything its sessions are asked to do.
///
/// Clones share their state, so a test can keep one clone and hand another to
/// a registry.
#[derive(Debug, Clone, Default)]
pub struct TestConnector {
    inner: Arc<Mutex<Inner>>,
    store: Option<MemoryObjectStore>,
}

impl TestConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sessions of this connector stage objects into `store`.
    pub fn with_object_store(store: MemoryObjectStore) -> Self {
        Self {
            inner: Arc::default(),
            store: Some(store),
        }
    }

    /// Makes the next `count` connection attempts fail.
    pub async fn fail_next_connects(&self, count: usize) {
        self.inner.lock().await.failing_connects = count;
    }

    /// Makes bulk commands fail in `phase`, `None` to let them succeed.
    pub async fn fail_bulk_loads(&self, phase: Option<BulkPhase>) {
        self.inner.lock().await.bulk_failure = phase;
    }

    /// Row count bulk commands report, `None` to report nothing.
    pub async fn report_rows(&self, rows: Option<u64>) {
        self.inner.lock().await.reported_rows = rows;
    }

    pub async fn connect_attempts(&self) -> usize {
        self.inner.lock().await.connect_attempts
    }

    pub async fn loads(&self) -> Vec<RecordedLoad> {
        self.inner.lock().await.loads.clone()
    }

    pub async fn statements(&self) -> Vec<String> {
        self.inner.lock().await.statements.clone()
    }

    pub async fn closed_sessions(&self) -> usize {
        self.inner.lock().await.closed_sessions
    }
}

#[async_trait]
impl Connector for TestConnector {
    async fn connect(&self) -> LoadResult<Box<dyn BulkExecutor>> {
        let mut inner = self.inner.lock().await;
        inner.connect_attempts += 1;

        if inner.failing_connects > 0 {
            inner.failing_connects -= 1;
            bail!(
                ErrorKind::ConnectionError,
                "Injected connection failure",
                format!("attempt {}", inner.connect_attempts)
            );
        }

        Ok(Box::new(TestExecutor {
            inner: self.inner.clone(),
            store: self.store.clone(),
        }))
    }
}

/// Session opened by a [`TestConnector`].
#[derive(Debug)]
pub struct TestExecutor {
    inner: Arc<Mutex<Inner>>,
    store: Option<MemoryObjectStore>,
}

impl TestExecutor {
    async fn observe(&self, input: BulkInput<'_>) -> RecordedInput {
        match input {
            BulkInput::Stream(body) => RecordedInput::Stream {
                body: body.to_vec(),
            },
            BulkInput::LocalFile(artifact) => {
                let path = artifact
                    .local_path()
                    .map(PathBuf::from)
                    .unwrap_or_default();
                let contents = tokio::fs::read_to_string(&path).await.ok();
                RecordedInput::LocalFile {
                    existed: contents.is_some(),
                    path,
                    contents,
                }
            }
            BulkInput::Object(artifact) => {
                let uri = artifact.uri().unwrap_or_default().to_string();
                let existed = match &self.store {
                    Some(store) => store.contains_uri(&uri).await,
                    None => false,
                };
                RecordedInput::Object { uri, existed }
            }
            BulkInput::Source(source) => RecordedInput::Source {
                rows: source.num_rows(),
                columns: source.num_columns(),
            },
        }
    }
}

#[async_trait]
impl BulkExecutor for TestExecutor {
    async fn bulk_load(&mut self, table: &str, input: BulkInput<'_>) -> LoadResult<Option<u64>> {
        let recorded = self.observe(input).await;

        let mut inner = self.inner.lock().await;
        inner.loads.push(RecordedLoad {
            table: table.to_string(),
            input: recorded,
        });

        if let Some(phase) = inner.bulk_failure {
            return Err(LoadError::bulk(
                phase,
                "Injected bulk command failure",
                format!("loading into `{table}`"),
            ));
        }

        Ok(inner.reported_rows)
    }

    fn object_store(&self) -> Option<Arc<dyn ObjectStore>> {
        self.store
            .clone()
            .map(|store| Arc::new(store) as Arc<dyn ObjectStore>)
    }

    async fn execute(&mut self, sql: &str) -> LoadResult<u64> {
        self.inner.lock().await.statements.push(sql.to_string());
        Ok(0)
    }

    async fn query(&mut self, sql: &str) -> LoadResult<Vec<Vec<Cell>>> {
        self.inner.lock().await.statements.push(sql.to_string());
        Ok(Vec::new())
    }

    async fn close(self: Box<Self>) -> LoadResult<()> {
        self.inner.lock().await.closed_sessions += 1;
        Ok(())
    }
}
