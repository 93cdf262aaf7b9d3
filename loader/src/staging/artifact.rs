use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use loader_config::shared::StagingFormat;
use uuid::Uuid;

const MAX_TABLE_PART_LEN: usize = 48;

/// Where a staged artifact lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactLocation {
    /// A file on the local file system.
    LocalFile(PathBuf),
    /// An object, by store key and the URI the destination reads it from.
    Object { key: String, uri: String },
}

impl fmt::Display for ArtifactLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactLocation::LocalFile(path) => write!(f, "{}", path.display()),
            ArtifactLocation::Object { uri, .. } => f.write_str(uri),
        }
    }
}

/// Intermediate file handed to a destination's bulk command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingArtifact {
    location: ArtifactLocation,
    format: StagingFormat,
    loader_id: Uuid,
    created_at: DateTime<Utc>,
}

impl StagingArtifact {
    pub fn new(location: ArtifactLocation, format: StagingFormat, loader_id: Uuid) -> Self {
        Self {
            location,
            format,
            loader_id,
            created_at: Utc::now(),
        }
    }

    pub fn location(&self) -> &ArtifactLocation {
        &self.location
    }

    pub fn local_path(&self) -> Option<&Path> {
        match &self.location {
            ArtifactLocation::LocalFile(path) => Some(path),
            ArtifactLocation::Object { .. } => None,
        }
    }

    pub fn uri(&self) -> Option<&str> {
        match &self.location {
            ArtifactLocation::Object { uri, .. } => Some(uri),
            ArtifactLocation::LocalFile(_) => None,
        }
    }

    pub fn format(&self) -> StagingFormat {
        self.format
    }

    /// Identifier of the loader that created this artifact.
    pub fn loader_id(&self) -> Uuid {
        self.loader_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Returns a fresh file name for an artifact loading into `table`.
///
/// The name starts with the sanitized table name and carries a random v4
/// UUID, so concurrent loads into the same table never collide.
pub fn artifact_name(table: &str, format: StagingFormat) -> String {
    format!(
        "{}_{}.{}",
        table_part(table),
        Uuid::new_v4().simple(),
        format.extension()
    )
}

/// Table name reduced to `[A-Za-z0-9_]`, usable as a file name prefix.
pub fn table_part(table: &str) -> String {
    let mut part: String = table
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .take(MAX_TABLE_PART_LEN)
        .collect();

    if part.is_empty() {
        part.push_str("table");
    }

    part
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn names_are_unique_per_call() {
        let names: HashSet<String> = (0..1000)
            .map(|_| artifact_name("events", StagingFormat::Parquet))
            .collect();
        assert_eq!(names.len(), 1000);
        assert!(names.iter().all(|n| n.starts_with("events_") && n.ends_with(".parquet")));
    }

    #[test]
    fn table_names_are_sanitized() {
        assert_eq!(table_part("public.\"Orders\""), "public__Orders_");
        assert_eq!(table_part("../etc/passwd"), "___etc_passwd");
        assert_eq!(table_part(""), "table");
        assert_eq!(table_part(&"x".repeat(100)).len(), MAX_TABLE_PART_LEN);
    }

    #[test]
    fn locations_display_as_path_or_uri() {
        let object = ArtifactLocation::Object {
            key: "tmp/t.csv".to_string(),
            uri: "s3://b/tmp/t.csv".to_string(),
        };
        assert_eq!(object.to_string(), "s3://b/tmp/t.csv");

        let artifact = StagingArtifact::new(object, StagingFormat::Csv, Uuid::nil());
        assert_eq!(artifact.uri(), Some("s3://b/tmp/t.csv"));
        assert!(artifact.local_path().is_none());
    }
}
