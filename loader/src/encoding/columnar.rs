use std::sync::Arc;

use arrow::array::*;
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use chrono::NaiveDate;

use crate::bail;
use crate::error::{ErrorKind, LoadResult};
use crate::types::{Cell, CellType, Column, TabularSource};

/// Arrow type a non-null cell of type `typ` is stored as.
pub fn arrow_type(typ: CellType) -> DataType {
    match typ {
        CellType::Bool => DataType::Boolean,
        CellType::I64 => DataType::Int64,
        CellType::F64 => DataType::Float64,
        CellType::String | CellType::Uuid | CellType::Json => DataType::Utf8,
        CellType::Date => DataType::Date32,
        CellType::TimeStamp => DataType::Timestamp(TimeUnit::Microsecond, None),
        CellType::TimeStampTz => DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
        CellType::Bytes => DataType::Binary,
    }
}

/// Infers the Arrow type of a column from its non-null cells.
///
/// Integer columns that also hold floats widen to `Float64`, columns without
/// any value become `Utf8`. Any other mix of types is rejected.
pub fn infer_column_type(column: &Column) -> LoadResult<DataType> {
    let mut inferred: Option<DataType> = None;

    for cell in column.cells() {
        let Some(typ) = cell.cell_type() else {
            continue;
        };
        let dt = arrow_type(typ);

        inferred = Some(match inferred {
            None => dt,
            Some(current) if current == dt => current,
            Some(DataType::Int64) if dt == DataType::Float64 => DataType::Float64,
            Some(DataType::Float64) if dt == DataType::Int64 => DataType::Float64,
            Some(current) => bail!(
                ErrorKind::StagingError,
                "Column holds values of incompatible types",
                format!(
                    "column `{}` mixes {current} and {dt} values",
                    column.name()
                )
            ),
        });
    }

    Ok(inferred.unwrap_or(DataType::Utf8))
}

/// Builds an Arrow array of type `dt` from `cells`.
pub fn cells_to_array(cells: &[Cell], dt: &DataType) -> LoadResult<ArrayRef> {
    let n = cells.len();

    Ok(match dt {
        DataType::Boolean => {
            let mut b = BooleanBuilder::with_capacity(n);
            for c in cells {
                match c {
                    Cell::Null => b.append_null(),
                    Cell::Bool(v) => b.append_value(*v),
                    other => return Err(unexpected(other, dt)),
                }
            }
            Arc::new(b.finish())
        }

        DataType::Int64 => {
            let mut b = Int64Builder::with_capacity(n);
            for c in cells {
                match c {
                    Cell::Null => b.append_null(),
                    Cell::I64(v) => b.append_value(*v),
                    other => return Err(unexpected(other, dt)),
                }
            }
            Arc::new(b.finish())
        }

        DataType::Float64 => {
            let mut b = Float64Builder::with_capacity(n);
            for c in cells {
                match c {
                    Cell::Null => b.append_null(),
                    Cell::F64(v) => b.append_value(*v),
                    Cell::I64(v) => b.append_value(*v as f64),
                    other => return Err(unexpected(other, dt)),
                }
            }
            Arc::new(b.finish())
        }

        DataType::Utf8 => {
            let mut b = StringBuilder::new();
            for c in cells {
                match c {
                    Cell::Null => b.append_null(),
                    Cell::String(s) => b.append_value(s),
                    Cell::Json(j) => b.append_value(j.to_string()),
                    Cell::Uuid(u) => b.append_value(u.to_string()),
                    other => return Err(unexpected(other, dt)),
                }
            }
            Arc::new(b.finish())
        }

        DataType::Binary => {
            let mut b = BinaryBuilder::new();
            for c in cells {
                match c {
                    Cell::Null => b.append_null(),
                    Cell::Bytes(v) => b.append_value(v),
                    other => return Err(unexpected(other, dt)),
                }
            }
            Arc::new(b.finish())
        }

        DataType::Date32 => {
            let mut b = Date32Builder::with_capacity(n);
            let epoch = NaiveDate::default();
            for c in cells {
                match c {
                    Cell::Null => b.append_null(),
                    Cell::Date(d) => b.append_value((*d - epoch).num_days() as i32),
                    other => return Err(unexpected(other, dt)),
                }
            }
            Arc::new(b.finish())
        }

        DataType::Timestamp(TimeUnit::Microsecond, tz) => {
            let mut b = TimestampMicrosecondBuilder::with_capacity(n);
            for c in cells {
                match c {
                    Cell::Null => b.append_null(),
                    Cell::TimeStamp(ts) => b.append_value(ts.and_utc().timestamp_micros()),
                    Cell::TimeStampTz(ts) => b.append_value(ts.timestamp_micros()),
                    other => return Err(unexpected(other, dt)),
                }
            }
            let array = b.finish();
            Arc::new(array.with_timezone_opt(tz.clone()))
        }

        other => bail!(
            ErrorKind::StagingError,
            "Unsupported Arrow type",
            other.to_string()
        ),
    })
}

/// Converts the whole source into a single record batch.
///
/// Every field is nullable and named after its column.
pub fn to_record_batch(source: &TabularSource) -> LoadResult<RecordBatch> {
    let mut fields = Vec::with_capacity(source.num_columns());
    let mut arrays = Vec::with_capacity(source.num_columns());

    for column in source.columns() {
        let dt = infer_column_type(column)?;
        arrays.push(cells_to_array(column.cells(), &dt)?);
        fields.push(Field::new(column.name(), dt, true));
    }

    let schema = Arc::new(Schema::new(fields));
    let options = RecordBatchOptions::new().with_row_count(Some(source.num_rows()));
    let batch = RecordBatch::try_new_with_options(schema, arrays, &options)?;

    Ok(batch)
}

fn unexpected(cell: &Cell, dt: &DataType) -> crate::error::LoadError {
    let found = cell
        .cell_type()
        .map(|typ| typ.to_string())
        .unwrap_or_else(|| "null".to_string());

    crate::load_error!(
        ErrorKind::StagingError,
        "Value does not match the column type",
        format!("expected {dt}, found {found}")
    )
}
