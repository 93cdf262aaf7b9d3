//! Staging artifacts and their guaranteed removal.

mod artifact;
mod cleanup;

pub use artifact::{ArtifactLocation, StagingArtifact, artifact_name, table_part};
pub use cleanup::{CleanupManager, CleanupOutcome};
