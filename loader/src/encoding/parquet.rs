use ::parquet::arrow::ArrowWriter;
use ::parquet::basic::Compression;
use ::parquet::file::properties::WriterProperties;

use crate::encoding::columnar::to_record_batch;
use crate::error::LoadResult;
use crate::types::TabularSource;

const MAX_ROW_GROUP_SIZE: usize = 128 * 1024;

/// Encodes `source` as a Snappy compressed Parquet file in memory.
pub fn encode_parquet(source: &TabularSource) -> LoadResult<Vec<u8>> {
    let batch = to_record_batch(source)?;

    let mut buffer = Vec::new();
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .set_max_row_group_size(MAX_ROW_GROUP_SIZE)
        .build();

    let mut writer = ArrowWriter::try_new(&mut buffer, batch.schema(), Some(props))?;
    writer.write(&batch)?;
    writer.close()?;

    Ok(buffer)
}
