use std::borrow::Cow;
use std::fmt::Write as _;
use std::io;

use ::csv::{QuoteStyle, Terminator, WriterBuilder};
use loader_config::shared::DestinationKind;

use crate::error::LoadResult;
use crate::types::{Cell, TabularSource};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// How a destination's CSV reader expects values to be spelled.
///
/// Output never has a header row, uses `,` as delimiter, `"` as quote and `\n`
/// as record terminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CsvDialect {
    /// Unquoted marker written for [`Cell::Null`].
    pub null: &'static str,
    pub true_literal: &'static str,
    pub false_literal: &'static str,
    /// Whether `\` must be doubled because the reader treats it as an escape.
    pub escape_backslash: bool,
    /// Prefix of hex encoded binary values.
    pub bytes_prefix: &'static str,
    /// Whether timestamps with time zone carry an explicit `+00:00` offset.
    pub utc_offset: bool,
}

impl CsvDialect {
    /// `COPY ... WITH (FORMAT csv, NULL '\N')`.
    pub const POSTGRES: CsvDialect = CsvDialect {
        null: "\\N",
        true_literal: "true",
        false_literal: "false",
        escape_backslash: false,
        bytes_prefix: "\\x",
        utc_offset: true,
    };

    /// `LOAD DATA ... FIELDS ESCAPED BY '\\'`, where `\N` is null.
    pub const MYSQL: CsvDialect = CsvDialect {
        null: "\\N",
        true_literal: "1",
        false_literal: "0",
        escape_backslash: true,
        bytes_prefix: "",
        utc_offset: false,
    };

    /// `BULK INSERT ... WITH (FORMAT = 'CSV', KEEPNULLS)`, where an empty field
    /// is null and `""` is the empty string.
    ///
    /// A record made of a single empty field is always written as `""`, so a
    /// single column source cannot carry both nulls and empty strings.
    pub const MSSQL: CsvDialect = CsvDialect {
        null: "",
        true_literal: "1",
        false_literal: "0",
        escape_backslash: false,
        bytes_prefix: "",
        utc_offset: false,
    };

    /// CSV staged for the warehouses, read with `\N` as null marker.
    pub const WAREHOUSE: CsvDialect = CsvDialect {
        null: "\\N",
        true_literal: "true",
        false_literal: "false",
        escape_backslash: false,
        bytes_prefix: "",
        utc_offset: true,
    };

    pub fn for_kind(kind: DestinationKind) -> CsvDialect {
        match kind {
            DestinationKind::Postgres => CsvDialect::POSTGRES,
            DestinationKind::Mysql => CsvDialect::MYSQL,
            DestinationKind::Mssql => CsvDialect::MSSQL,
            DestinationKind::Sqlite
            | DestinationKind::Duckdb
            | DestinationKind::Redshift
            | DestinationKind::Snowflake
            | DestinationKind::Bigquery
            | DestinationKind::Databricks => CsvDialect::WAREHOUSE,
        }
    }

    /// Renders one cell as CSV field text, before quoting.
    pub fn render<'a>(&self, cell: &'a Cell) -> Cow<'a, str> {
        match cell {
            Cell::Null => Cow::Borrowed(self.null),
            Cell::Bool(true) => Cow::Borrowed(self.true_literal),
            Cell::Bool(false) => Cow::Borrowed(self.false_literal),
            Cell::I64(v) => Cow::Owned(v.to_string()),
            Cell::F64(v) => Cow::Owned(v.to_string()),
            Cell::String(s) => self.escape(s),
            Cell::Date(d) => Cow::Owned(d.format("%Y-%m-%d").to_string()),
            Cell::TimeStamp(ts) => Cow::Owned(ts.format(TIMESTAMP_FORMAT).to_string()),
            Cell::TimeStampTz(ts) => {
                let mut out = ts.naive_utc().format(TIMESTAMP_FORMAT).to_string();
                if self.utc_offset {
                    out.push_str("+00:00");
                }
                Cow::Owned(out)
            }
            Cell::Uuid(u) => Cow::Owned(u.to_string()),
            Cell::Json(j) => Cow::Owned(self.escape(&j.to_string()).into_owned()),
            Cell::Bytes(b) => {
                let mut out = String::with_capacity(self.bytes_prefix.len() + b.len() * 2);
                out.push_str(self.bytes_prefix);
                for byte in b {
                    // Writing into a String cannot fail.
                    let _ = write!(out, "{byte:02x}");
                }
                Cow::Owned(out)
            }
        }
    }

    fn escape<'a>(&self, value: &'a str) -> Cow<'a, str> {
        if self.escape_backslash && value.contains('\\') {
            Cow::Owned(value.replace('\\', "\\\\"))
        } else {
            Cow::Borrowed(value)
        }
    }
}

/// Quotes fields one at a time, so the null marker can be written bare while a
/// text value spelling the same marker is quoted.
struct FieldQuoter {
    rules: csv_core::Writer,
    scratch: Vec<u8>,
}

impl FieldQuoter {
    fn new() -> Self {
        FieldQuoter {
            rules: csv_core::WriterBuilder::new()
                .terminator(csv_core::Terminator::Any(b'\n'))
                .build(),
            scratch: Vec::new(),
        }
    }

    fn field(&mut self, value: &[u8], force: bool) -> &[u8] {
        self.scratch.clear();
        if !force && !self.rules.should_quote(value) {
            self.scratch.extend_from_slice(value);
            return &self.scratch;
        }

        // Doubling every byte is the worst case of quote escaping.
        self.scratch.resize(2 + 2 * value.len(), 0);
        self.scratch[0] = b'"';
        let (_, _, written) = csv_core::quote(value, &mut self.scratch[1..], b'"', b'\\', true);
        self.scratch.truncate(1 + written);
        self.scratch.push(b'"');
        &self.scratch
    }
}

/// Writes all rows of `source` as CSV into `writer`.
///
/// Null cells are written as the bare null marker. Any other value rendering
/// to the marker is quoted, which the destinations read as a value.
pub fn write_csv<W: io::Write>(
    source: &TabularSource,
    dialect: CsvDialect,
    writer: W,
) -> LoadResult<()> {
    let mut writer = WriterBuilder::new()
        .has_headers(false)
        .quote_style(QuoteStyle::Never)
        .terminator(Terminator::Any(b'\n'))
        .from_writer(writer);
    let mut quoter = FieldQuoter::new();

    for row in source.rows() {
        for cell in row.cells() {
            let rendered = dialect.render(cell);
            let field = match cell {
                Cell::Null => rendered.as_bytes(),
                _ => quoter.field(rendered.as_bytes(), rendered == dialect.null),
            };
            writer.write_field(field)?;
        }
        writer.write_record(None::<&[u8]>)?;
    }

    writer.flush()?;
    Ok(())
}

/// Encodes all rows of `source` as CSV in memory.
pub fn encode_csv(source: &TabularSource, dialect: CsvDialect) -> LoadResult<Vec<u8>> {
    let mut buffer = Vec::new();
    write_csv(source, dialect, &mut buffer)?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, TimeZone, Utc};

    use super::*;
    use crate::types::Column;

    fn encode(columns: Vec<Column>, dialect: CsvDialect) -> String {
        let source = TabularSource::new(columns).unwrap();
        String::from_utf8(encode_csv(&source, dialect).unwrap()).unwrap()
    }

    #[test]
    fn rows_are_written_without_header() {
        let csv = encode(
            vec![
                Column::from_values("col1", [1, 2]),
                Column::from_values("col2", [3, 4]),
            ],
            CsvDialect::POSTGRES,
        );
        assert_eq!(csv, "1,3\n2,4\n");
    }

    #[test]
    fn nulls_use_the_dialect_marker() {
        let column = Column::new("a", vec![Cell::Null, Cell::from("x")]);
        assert_eq!(
            encode(vec![column.clone()], CsvDialect::POSTGRES),
            "\\N\nx\n"
        );
        // A lone empty field is quoted so the record is not mistaken for a
        // blank line.
        assert_eq!(encode(vec![column], CsvDialect::MSSQL), "\"\"\nx\n");
    }

    #[test]
    fn text_spelling_the_null_marker_stays_text() {
        let columns = vec![
            Column::new("a", vec![Cell::from("\\N"), Cell::Null]),
            Column::new("b", vec![Cell::from(""), Cell::Null]),
        ];

        assert_eq!(
            encode(columns.clone(), CsvDialect::POSTGRES),
            "\"\\N\",\n\\N,\\N\n"
        );
        assert_eq!(
            encode(columns.clone(), CsvDialect::WAREHOUSE),
            "\"\\N\",\n\\N,\\N\n"
        );
        assert_eq!(encode(columns.clone(), CsvDialect::MSSQL), "\\N,\"\"\n,\n");
        // Backslash escaping already tells the two apart.
        assert_eq!(encode(columns, CsvDialect::MYSQL), "\\\\N,\n\\N,\\N\n");
    }

    #[test]
    fn text_is_quoted_only_when_needed() {
        let csv = encode(
            vec![
                Column::from_values("a", ["plain", "with,comma", "say \"hi\""]),
                Column::from_values("b", [1, 2, 3]),
            ],
            CsvDialect::POSTGRES,
        );
        assert_eq!(
            csv,
            "plain,1\n\"with,comma\",2\n\"say \"\"hi\"\"\",3\n"
        );
    }

    #[test]
    fn mysql_doubles_backslashes_and_uses_numeric_booleans() {
        let csv = encode(
            vec![
                Column::from_values("path", ["C:\\tmp"]),
                Column::from_values("flag", [true]),
            ],
            CsvDialect::MYSQL,
        );
        assert_eq!(csv, "C:\\\\tmp,1\n");
    }

    #[test]
    fn temporal_and_binary_values() {
        let date = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        let ts = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let row = vec![
            Column::from_values("d", [date]),
            Column::from_values("ts", [ts]),
            Column::new("b", vec![Cell::Bytes(vec![0xde, 0xad])]),
        ];

        assert_eq!(
            encode(row.clone(), CsvDialect::POSTGRES),
            "2024-02-29,2024-01-02 03:04:05+00:00,\\xdead\n"
        );
        assert_eq!(
            encode(row, CsvDialect::MSSQL),
            "2024-02-29,2024-01-02 03:04:05,dead\n"
        );
    }
}
