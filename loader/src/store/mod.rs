//! Object storage used by the object-storage-staged destinations.
//!
//! Staged files are written with [`ObjectStore::put`] and removed with
//! [`ObjectStore::delete`] once the destination's bulk command finished. The
//! [`s3`] module talks to S3 and compatible stores, [`memory`] keeps objects in
//! process for tests and supports failure injection.

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::LoadResult;

pub mod memory;
#[cfg(feature = "s3")]
pub mod s3;

/// Minimal object storage operations needed to stage a file.
#[async_trait]
pub trait ObjectStore: fmt::Debug + Send + Sync {
    /// Returns the URI under which the destination reads `key`.
    fn uri_for(&self, key: &str) -> String;

    /// Uploads `body` as `key`, replacing any existing object.
    ///
    /// A failed upload may leave a partial object behind, callers must still
    /// delete `key`.
    async fn put(&self, key: &str, body: Bytes) -> LoadResult<()>;

    /// Deletes `key`. Deleting a missing object succeeds.
    async fn delete(&self, key: &str) -> LoadResult<()>;
}
