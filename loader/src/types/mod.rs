use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::fmt;
use uuid::Uuid;

mod source;
pub mod text;

pub use source::{Column, Row, TabularSource};

/// A single scalar value of a [`TabularSource`].
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Bool(bool),
    I64(i64),
    F64(f64),
    String(String),
    Date(NaiveDate),
    TimeStamp(NaiveDateTime),
    TimeStampTz(DateTime<Utc>),
    Uuid(Uuid),
    Json(serde_json::Value),
    Bytes(Vec<u8>),
}

/// Logical type of a non-null [`Cell`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellType {
    Bool,
    I64,
    F64,
    String,
    Date,
    TimeStamp,
    TimeStampTz,
    Uuid,
    Json,
    Bytes,
}

impl Cell {
    /// Returns the type of this cell, `None` for [`Cell::Null`].
    pub fn cell_type(&self) -> Option<CellType> {
        Some(match self {
            Cell::Null => return None,
            Cell::Bool(_) => CellType::Bool,
            Cell::I64(_) => CellType::I64,
            Cell::F64(_) => CellType::F64,
            Cell::String(_) => CellType::String,
            Cell::Date(_) => CellType::Date,
            Cell::TimeStamp(_) => CellType::TimeStamp,
            Cell::TimeStampTz(_) => CellType::TimeStampTz,
            Cell::Uuid(_) => CellType::Uuid,
            Cell::Json(_) => CellType::Json,
            Cell::Bytes(_) => CellType::Bytes,
        })
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }
}

impl fmt::Display for CellType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CellType::Bool => "bool",
            CellType::I64 => "i64",
            CellType::F64 => "f64",
            CellType::String => "string",
            CellType::Date => "date",
            CellType::TimeStamp => "timestamp",
            CellType::TimeStampTz => "timestamptz",
            CellType::Uuid => "uuid",
            CellType::Json => "json",
            CellType::Bytes => "bytes",
        };
        f.write_str(name)
    }
}

impl From<bool> for Cell {
    fn from(value: bool) -> Self {
        Cell::Bool(value)
    }
}

impl From<i64> for Cell {
    fn from(value: i64) -> Self {
        Cell::I64(value)
    }
}

impl From<i32> for Cell {
    fn from(value: i32) -> Self {
        Cell::I64(value.into())
    }
}

impl From<f64> for Cell {
    fn from(value: f64) -> Self {
        Cell::F64(value)
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::String(value.to_string())
    }
}

impl From<String> for Cell {
    fn from(value: String) -> Self {
        Cell::String(value)
    }
}

impl From<NaiveDate> for Cell {
    fn from(value: NaiveDate) -> Self {
        Cell::Date(value)
    }
}

impl From<NaiveDateTime> for Cell {
    fn from(value: NaiveDateTime) -> Self {
        Cell::TimeStamp(value)
    }
}

impl From<DateTime<Utc>> for Cell {
    fn from(value: DateTime<Utc>) -> Self {
        Cell::TimeStampTz(value)
    }
}

impl From<Uuid> for Cell {
    fn from(value: Uuid) -> Self {
        Cell::Uuid(value)
    }
}

impl From<Vec<u8>> for Cell {
    fn from(value: Vec<u8>) -> Self {
        Cell::Bytes(value)
    }
}

impl<T: Into<Cell>> From<Option<T>> for Cell {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Cell::Null)
    }
}
