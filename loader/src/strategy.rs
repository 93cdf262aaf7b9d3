use std::fmt;

use loader_config::shared::DestinationKind;

/// Procedure used to get a source into a destination's bulk command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StagingStrategy {
    /// The source is encoded in memory and streamed into the bulk command.
    DirectStream,
    /// The source is written to a local file whose path the bulk command reads.
    LocalTempFile,
    /// The source is uploaded to object storage and the bulk command reads
    /// the object's URI.
    ObjectStorage,
    /// The source is handed to the vendor's load API.
    VendorApi,
    /// The source is registered with an embedded engine and inserted from
    /// there.
    InProcess,
}

impl StagingStrategy {
    /// Strategy used by destinations of `kind`.
    pub fn for_kind(kind: DestinationKind) -> StagingStrategy {
        match kind {
            DestinationKind::Sqlite | DestinationKind::Duckdb => StagingStrategy::InProcess,
            DestinationKind::Postgres => StagingStrategy::DirectStream,
            DestinationKind::Mysql | DestinationKind::Mssql => StagingStrategy::LocalTempFile,
            DestinationKind::Redshift
            | DestinationKind::Snowflake
            | DestinationKind::Databricks => StagingStrategy::ObjectStorage,
            DestinationKind::Bigquery => StagingStrategy::VendorApi,
        }
    }

    /// Whether this strategy creates an artifact that must be cleaned up.
    pub fn creates_artifact(&self) -> bool {
        matches!(
            self,
            StagingStrategy::LocalTempFile | StagingStrategy::ObjectStorage
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StagingStrategy::DirectStream => "direct_stream",
            StagingStrategy::LocalTempFile => "local_temp_file",
            StagingStrategy::ObjectStorage => "object_storage",
            StagingStrategy::VendorApi => "vendor_api",
            StagingStrategy::InProcess => "in_process",
        }
    }
}

impl fmt::Display for StagingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
