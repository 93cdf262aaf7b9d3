use std::sync::Arc;

use loader_config::shared::DestinationKind;
use metrics::counter;
use tempfile::TempPath;
use tracing::{Instrument, debug, warn};

use crate::bail;
use crate::error::{ErrorKind, LoadError, LoadResult};
use crate::load_error;
use crate::metrics::{KIND, LOADER_CLEANUP_FAILURES_TOTAL};
use crate::staging::StagingArtifact;
use crate::store::ObjectStore;

/// Artifact currently owned by a [`CleanupManager`], with what is needed to
/// remove it.
enum Tracked {
    Local {
        artifact: StagingArtifact,
        path: TempPath,
    },
    Object {
        artifact: StagingArtifact,
        key: String,
        store: Arc<dyn ObjectStore>,
    },
}

impl Tracked {
    fn artifact(&self) -> &StagingArtifact {
        match self {
            Tracked::Local { artifact, .. } | Tracked::Object { artifact, .. } => artifact,
        }
    }
}

/// Result of [`CleanupManager::release`].
#[derive(Debug)]
pub enum CleanupOutcome {
    /// Nothing was staged.
    Nothing,
    /// The artifact was deleted.
    Removed(StagingArtifact),
    /// Deleting the artifact failed. The error has kind
    /// [`ErrorKind::CleanupError`] and has already been logged.
    Failed(StagingArtifact, LoadError),
}

/// Owns the single staging artifact of one load call and deletes it once.
///
/// An artifact must be tracked before its content is written, so that partial
/// writes are removed too. [`CleanupManager::release`] deletes it and reports
/// failures without raising them. A manager dropped while still holding an
/// artifact, for example because the load future was cancelled, deletes it
/// from its destructor: local files synchronously, objects from a task
/// spawned on the current runtime.
pub struct CleanupManager {
    kind: DestinationKind,
    tracked: Option<Tracked>,
}

impl CleanupManager {
    pub fn new(kind: DestinationKind) -> Self {
        Self {
            kind,
            tracked: None,
        }
    }

    /// The tracked artifact, if any.
    pub fn artifact(&self) -> Option<&StagingArtifact> {
        self.tracked.as_ref().map(Tracked::artifact)
    }

    /// Takes ownership of a local temporary file. The file is removed on
    /// release.
    pub fn track_local(
        &mut self,
        artifact: StagingArtifact,
        path: TempPath,
    ) -> LoadResult<&StagingArtifact> {
        self.ensure_empty()?;
        debug!(artifact = %artifact.location(), "tracking local staging file");

        let tracked = self.tracked.insert(Tracked::Local { artifact, path });
        Ok(tracked.artifact())
    }

    /// Takes ownership of an object in `store`. The object is deleted on
    /// release, whether or not it was ever fully written.
    pub fn track_object(
        &mut self,
        artifact: StagingArtifact,
        key: String,
        store: Arc<dyn ObjectStore>,
    ) -> LoadResult<&StagingArtifact> {
        self.ensure_empty()?;
        debug!(artifact = %artifact.location(), "tracking staged object");

        let tracked = self.tracked.insert(Tracked::Object {
            artifact,
            key,
            store,
        });
        Ok(tracked.artifact())
    }

    /// Deletes the tracked artifact, if any.
    ///
    /// Calling it again after a release is a no-op.
    pub async fn release(&mut self) -> CleanupOutcome {
        let Some(tracked) = self.tracked.take() else {
            return CleanupOutcome::Nothing;
        };

        let (artifact, result) = match tracked {
            Tracked::Local { artifact, path } => {
                let result = path.close().map_err(|err| {
                    load_error!(
                        ErrorKind::CleanupError,
                        "Failed to remove local staging file",
                        format!("{}: {err}", artifact.location())
                    )
                });
                (artifact, result)
            }
            Tracked::Object {
                artifact,
                key,
                store,
            } => {
                let result = store.delete(&key).await.map_err(|err| {
                    load_error!(
                        ErrorKind::CleanupError,
                        "Failed to delete staged object",
                        format!("{}: {err}", artifact.location())
                    )
                });
                (artifact, result)
            }
        };

        match result {
            Ok(()) => {
                debug!(artifact = %artifact.location(), "removed staging artifact");
                CleanupOutcome::Removed(artifact)
            }
            Err(err) => {
                warn!(
                    kind = %self.kind,
                    artifact = %artifact.location(),
                    error = %err,
                    "failed to remove staging artifact"
                );
                counter!(LOADER_CLEANUP_FAILURES_TOTAL, KIND => self.kind.as_str()).increment(1);
                CleanupOutcome::Failed(artifact, err)
            }
        }
    }

    fn ensure_empty(&self) -> LoadResult<()> {
        if let Some(tracked) = &self.tracked {
            bail!(
                ErrorKind::InvalidState,
                "A staging artifact is already tracked",
                tracked.artifact().location()
            );
        }

        Ok(())
    }
}

impl Drop for CleanupManager {
    fn drop(&mut self) {
        let Some(tracked) = self.tracked.take() else {
            return;
        };

        match tracked {
            // Dropping the `TempPath` removes the file.
            Tracked::Local { artifact, path } => {
                debug!(artifact = %artifact.location(), "removing local staging file on drop");
                drop(path);
            }
            Tracked::Object {
                artifact,
                key,
                store,
            } => {
                let kind = self.kind;
                let Ok(handle) = tokio::runtime::Handle::try_current() else {
                    warn!(
                        kind = %kind,
                        artifact = %artifact.location(),
                        "no runtime available to delete staged object"
                    );
                    counter!(LOADER_CLEANUP_FAILURES_TOTAL, KIND => kind.as_str()).increment(1);
                    return;
                };

                let span = tracing::debug_span!("staged_object_cleanup", artifact = %artifact.location());
                handle.spawn(
                    async move {
                        if let Err(err) = store.delete(&key).await {
                            warn!(kind = %kind, error = %err, "failed to delete staged object");
                            counter!(LOADER_CLEANUP_FAILURES_TOTAL, KIND => kind.as_str())
                                .increment(1);
                        }
                    }
                    .instrument(span),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use bytes::Bytes;
    use loader_config::shared::StagingFormat;
    use uuid::Uuid;

    use super::*;
    use crate::staging::ArtifactLocation;
    use crate::store::memory::MemoryObjectStore;

    fn local_artifact(dir: &tempfile::TempDir) -> (StagingArtifact, TempPath) {
        let mut file = tempfile::Builder::new()
            .prefix("t_")
            .suffix(".csv")
            .tempfile_in(dir.path())
            .unwrap();
        file.write_all(b"1,2\n").unwrap();
        let path = file.into_temp_path();
        let artifact = StagingArtifact::new(
            ArtifactLocation::LocalFile(path.to_path_buf()),
            StagingFormat::Csv,
            Uuid::new_v4(),
        );
        (artifact, path)
    }

    async fn object_artifact(store: &MemoryObjectStore, key: &str) -> StagingArtifact {
        store.put(key, Bytes::from_static(b"data")).await.unwrap();
        StagingArtifact::new(
            ArtifactLocation::Object {
                key: key.to_string(),
                uri: store.uri_for(key),
            },
            StagingFormat::Parquet,
            Uuid::new_v4(),
        )
    }

    #[tokio::test]
    async fn local_files_are_removed_once() {
        let dir = tempfile::tempdir().unwrap();
        let (artifact, path) = local_artifact(&dir);
        let file = path.to_path_buf();

        let mut cleanup = CleanupManager::new(DestinationKind::Mysql);
        cleanup.track_local(artifact, path).unwrap();
        assert!(file.exists());

        assert!(matches!(cleanup.release().await, CleanupOutcome::Removed(_)));
        assert!(!file.exists());
        assert!(matches!(cleanup.release().await, CleanupOutcome::Nothing));
    }

    #[tokio::test]
    async fn only_one_artifact_can_be_tracked() {
        let dir = tempfile::tempdir().unwrap();
        let (first, first_path) = local_artifact(&dir);
        let (second, second_path) = local_artifact(&dir);
        let second_file = second_path.to_path_buf();

        let mut cleanup = CleanupManager::new(DestinationKind::Mysql);
        cleanup.track_local(first, first_path).unwrap();
        let err = cleanup.track_local(second, second_path).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        // The rejected path was dropped, which removed its file.
        assert!(!second_file.exists());
    }

    #[tokio::test]
    async fn delete_failures_are_reported_not_raised() {
        let store = MemoryObjectStore::new("bucket");
        let artifact = object_artifact(&store, "tmp/t.parquet").await;
        store.set_fail_deletes(true).await;

        let mut cleanup = CleanupManager::new(DestinationKind::Redshift);
        cleanup
            .track_object(artifact, "tmp/t.parquet".to_string(), Arc::new(store.clone()))
            .unwrap();

        let CleanupOutcome::Failed(_, err) = cleanup.release().await else {
            panic!("expected a failed cleanup");
        };
        assert_eq!(err.kind(), ErrorKind::CleanupError);
        assert!(store.contains("tmp/t.parquet").await);
    }

    #[tokio::test]
    async fn dropped_managers_delete_objects() {
        let store = MemoryObjectStore::new("bucket");
        let artifact = object_artifact(&store, "tmp/dropped.parquet").await;

        let mut cleanup = CleanupManager::new(DestinationKind::Databricks);
        cleanup
            .track_object(
                artifact,
                "tmp/dropped.parquet".to_string(),
                Arc::new(store.clone()),
            )
            .unwrap();
        drop(cleanup);

        for _ in 0..100 {
            if !store.contains("tmp/dropped.parquet").await {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("staged object was not deleted after drop");
    }
}
