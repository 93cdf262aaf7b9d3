//! Encoders turning a [`TabularSource`] into the bytes a destination ingests.

pub mod columnar;
pub mod delimited;
pub mod parquet;

pub use delimited::{CsvDialect, encode_csv, write_csv};

use loader_config::shared::StagingFormat;

use crate::error::LoadResult;
use crate::types::TabularSource;

/// Encodes `source` in the given staging format.
pub fn encode(
    source: &TabularSource,
    format: StagingFormat,
    dialect: CsvDialect,
) -> LoadResult<Vec<u8>> {
    match format {
        StagingFormat::Parquet => self::parquet::encode_parquet(source),
        StagingFormat::Csv => encode_csv(source, dialect),
    }
}
