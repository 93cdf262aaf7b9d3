use loader_config::shared::{
    DestinationConfig, DestinationKind, StagingFormat, ValidationError, parse_kind,
};
use serde_json::Value;

use crate::encoding::CsvDialect;
use crate::error::LoadResult;
use crate::strategy::StagingStrategy;

/// Validated, immutable description of where and how to load.
#[derive(Debug, Clone)]
pub struct DestinationDescriptor {
    config: DestinationConfig,
    strategy: StagingStrategy,
}

impl DestinationDescriptor {
    /// Validates a raw descriptor: a map with a `kind` tag and the fields of
    /// that kind.
    pub fn from_raw(raw: &Value) -> LoadResult<DestinationDescriptor> {
        let kind = parse_kind(raw)?;
        Self::from_raw_with_kind(kind, raw)
    }

    pub(crate) fn from_raw_with_kind(
        kind: DestinationKind,
        raw: &Value,
    ) -> LoadResult<DestinationDescriptor> {
        let map = raw.as_object().ok_or(ValidationError::NotAMap)?;
        let config = DestinationConfig::from_raw(kind, map)?;

        Ok(Self::new_unchecked(config))
    }

    /// Wraps an already typed configuration after validating it.
    pub fn from_config(config: DestinationConfig) -> LoadResult<DestinationDescriptor> {
        config.validate()?;
        Ok(Self::new_unchecked(config))
    }

    fn new_unchecked(config: DestinationConfig) -> DestinationDescriptor {
        let strategy = StagingStrategy::for_kind(config.kind());
        DestinationDescriptor { config, strategy }
    }

    pub fn kind(&self) -> DestinationKind {
        self.config.kind()
    }

    pub fn strategy(&self) -> StagingStrategy {
        self.strategy
    }

    pub fn config(&self) -> &DestinationConfig {
        &self.config
    }

    /// Format of the staged artifact. Local files are always CSV.
    pub fn staging_format(&self) -> StagingFormat {
        self.config.staging_format().unwrap_or(StagingFormat::Csv)
    }

    pub fn csv_dialect(&self) -> CsvDialect {
        CsvDialect::for_kind(self.kind())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn sqlite_descriptor_needs_a_path() {
        let descriptor = DestinationDescriptor::from_raw(&json!({
            "kind": "sqlite",
            "path": ":memory:",
            "comment": "extra fields are ignored",
        }))
        .unwrap();
        assert_eq!(descriptor.kind(), DestinationKind::Sqlite);
        assert_eq!(descriptor.strategy(), StagingStrategy::InProcess);

        let err = DestinationDescriptor::from_raw(&json!({ "kind": "sqlite" })).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);
        assert!(err.detail().unwrap().contains("path"));
    }

    #[test]
    fn unknown_kinds_are_unknown_backends() {
        let err = DestinationDescriptor::from_raw(&json!({ "kind": "nonexistent" })).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownBackend);
    }

    #[test]
    fn staged_kinds_default_to_parquet() {
        let descriptor = DestinationDescriptor::from_raw(&json!({
            "kind": "databricks",
            "workspace_url": "https://dbc.cloud.databricks.com",
            "warehouse_id": "abc",
            "access_token": "dapi",
            "catalog": "main",
            "schema": "default",
            "s3_bucket": "bucket",
        }))
        .unwrap();
        assert_eq!(descriptor.staging_format(), StagingFormat::Parquet);
        assert_eq!(descriptor.strategy(), StagingStrategy::ObjectStorage);

        let descriptor = DestinationDescriptor::from_raw(&json!({
            "kind": "mysql",
            "host": "localhost",
            "user": "root",
            "password": "pw",
            "database": "db",
        }))
        .unwrap();
        assert_eq!(descriptor.staging_format(), StagingFormat::Csv);
        assert_eq!(descriptor.csv_dialect(), CsvDialect::MYSQL);
    }
}
