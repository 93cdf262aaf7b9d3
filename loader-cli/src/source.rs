use std::io::Read;

use loader::types::TabularSource;
use loader::types::text::infer_cell;

/// Reads CSV into a [`TabularSource`], inferring the type of every cell.
///
/// Without a header row, columns are named `col1`, `col2` and so on.
pub fn read_csv<R: Read>(reader: R, has_header: bool) -> anyhow::Result<TabularSource> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(has_header)
        .from_reader(reader);

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(record.iter().map(infer_cell).collect::<Vec<_>>());
    }

    let names: Vec<String> = if has_header {
        reader.headers()?.iter().map(str::to_string).collect()
    } else {
        let width = rows.first().map(Vec::len).unwrap_or(0);
        (1..=width).map(|i| format!("col{i}")).collect()
    };

    Ok(TabularSource::from_rows(names, rows)?)
}

#[cfg(test)]
mod tests {
    use loader::types::Cell;

    use super::*;

    #[test]
    fn header_names_the_columns() {
        let source = read_csv("id,name,score\n1,a,0.5\n2,,true\n".as_bytes(), true).unwrap();

        assert_eq!(
            source.column_names().collect::<Vec<_>>(),
            vec!["id", "name", "score"]
        );
        assert_eq!(source.num_rows(), 2);
        assert_eq!(
            source.columns()[1].cells(),
            &[Cell::from("a"), Cell::Null]
        );
        assert_eq!(
            source.columns()[2].cells(),
            &[Cell::F64(0.5), Cell::Bool(true)]
        );
    }

    #[test]
    fn headerless_columns_are_numbered() {
        let source = read_csv("1,3\n2,4\n".as_bytes(), false).unwrap();

        assert_eq!(
            source.column_names().collect::<Vec<_>>(),
            vec!["col1", "col2"]
        );
        assert_eq!(source.columns()[0].cells(), &[Cell::I64(1), Cell::I64(2)]);
    }

    #[test]
    fn ragged_rows_are_rejected() {
        assert!(read_csv("a,b\n1,2\n3\n".as_bytes(), true).is_err());
    }
}
