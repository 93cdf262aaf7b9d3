use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Mutex;

use crate::bail;
use crate::error::{ErrorKind, LoadResult};
use crate::store::ObjectStore;

/// Failure injected into [`MemoryObjectStore::put`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutFailure {
    /// The upload is refused and nothing is stored.
    Reject,
    /// Half of the body is stored before the upload fails.
    PartialWrite,
}

#[derive(Debug, Default)]
struct Inner {
    objects: BTreeMap<String, Bytes>,
    put_failure: Option<PutFailure>,
    fail_deletes: bool,
    deleted: Vec<String>,
}

/// In-process [`ObjectStore`] addressed as `memory://{bucket}/{key}`.
///
/// Clones share the same objects.
#[derive(Debug, Clone)]
pub struct MemoryObjectStore {
    bucket: String,
    inner: Arc<Mutex<Inner>>,
}

impl MemoryObjectStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    /// Makes every following upload fail in the given way, `None` to stop.
    pub async fn set_put_failure(&self, failure: Option<PutFailure>) {
        self.inner.lock().await.put_failure = failure;
    }

    /// Makes every following delete fail.
    pub async fn set_fail_deletes(&self, fail: bool) {
        self.inner.lock().await.fail_deletes = fail;
    }

    /// Keys currently stored, in order.
    pub async fn keys(&self) -> Vec<String> {
        self.inner.lock().await.objects.keys().cloned().collect()
    }

    pub async fn get(&self, key: &str) -> Option<Bytes> {
        self.inner.lock().await.objects.get(key).cloned()
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.inner.lock().await.objects.contains_key(key)
    }

    /// Whether the object behind a URI returned by [`ObjectStore::uri_for`]
    /// exists.
    pub async fn contains_uri(&self, uri: &str) -> bool {
        match self.key_of(uri) {
            Some(key) => self.contains(key).await,
            None => false,
        }
    }

    /// Keys that were successfully deleted, in order.
    pub async fn deleted(&self) -> Vec<String> {
        self.inner.lock().await.deleted.clone()
    }

    fn key_of<'a>(&self, uri: &'a str) -> Option<&'a str> {
        uri.strip_prefix("memory://")?
            .strip_prefix(self.bucket.as_str())?
            .strip_prefix('/')
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    fn uri_for(&self, key: &str) -> String {
        format!("memory://{}/{key}", self.bucket)
    }

    async fn put(&self, key: &str, body: Bytes) -> LoadResult<()> {
        let mut inner = self.inner.lock().await;

        match inner.put_failure {
            None => {
                inner.objects.insert(key.to_string(), body);
                Ok(())
            }
            Some(PutFailure::Reject) => {
                bail!(
                    ErrorKind::StagingError,
                    "Upload rejected by object store",
                    format!("put of `{key}` was rejected")
                );
            }
            Some(PutFailure::PartialWrite) => {
                let partial = body.slice(..body.len() / 2);
                inner.objects.insert(key.to_string(), partial);
                bail!(
                    ErrorKind::StagingError,
                    "Upload interrupted",
                    format!("connection lost while writing `{key}`")
                );
            }
        }
    }

    async fn delete(&self, key: &str) -> LoadResult<()> {
        let mut inner = self.inner.lock().await;

        if inner.fail_deletes {
            bail!(
                ErrorKind::CleanupError,
                "Delete refused by object store",
                format!("access denied for `{key}`")
            );
        }

        inner.objects.remove(key);
        inner.deleted.push(key.to_string());

        Ok(())
    }
}
