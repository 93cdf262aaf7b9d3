use std::collections::HashSet;

use crate::bail;
use crate::error::{ErrorKind, LoadResult};
use crate::types::Cell;

/// A named column of a [`TabularSource`].
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    name: String,
    cells: Vec<Cell>,
}

impl Column {
    pub fn new(name: impl Into<String>, cells: Vec<Cell>) -> Column {
        Column {
            name: name.into(),
            cells,
        }
    }

    /// Builds a column from any values convertible into [`Cell`]s.
    pub fn from_values<T, I>(name: impl Into<String>, values: I) -> Column
    where
        T: Into<Cell>,
        I: IntoIterator<Item = T>,
    {
        Column::new(name, values.into_iter().map(Into::into).collect())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }
}

/// Read-only, column-oriented view of the dataset handed to a load.
///
/// All columns have the same length and distinct, non-empty names. Destination
/// tables are matched by column position.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TabularSource {
    columns: Vec<Column>,
    num_rows: usize,
}

impl TabularSource {
    /// Validates and wraps `columns`.
    ///
    /// Fails with [`ErrorKind::InvalidSource`] when column lengths differ or
    /// names are empty or repeated.
    pub fn new(columns: Vec<Column>) -> LoadResult<TabularSource> {
        let num_rows = columns.first().map(|c| c.cells.len()).unwrap_or(0);

        let mut names = HashSet::with_capacity(columns.len());
        for column in &columns {
            if column.name.trim().is_empty() {
                bail!(ErrorKind::InvalidSource, "Column names must not be empty");
            }
            if !names.insert(column.name.as_str()) {
                bail!(
                    ErrorKind::InvalidSource,
                    "Column names must be unique",
                    format!("column `{}` appears more than once", column.name)
                );
            }
            if column.cells.len() != num_rows {
                bail!(
                    ErrorKind::InvalidSource,
                    "All columns must have the same length",
                    format!(
                        "column `{}` has {} values, expected {num_rows}",
                        column.name,
                        column.cells.len()
                    )
                );
            }
        }

        Ok(TabularSource { columns, num_rows })
    }

    /// Builds a source from a header and row-major values.
    pub fn from_rows(names: Vec<String>, rows: Vec<Vec<Cell>>) -> LoadResult<TabularSource> {
        let mut columns: Vec<Vec<Cell>> = names
            .iter()
            .map(|_| Vec::with_capacity(rows.len()))
            .collect();

        for (index, row) in rows.into_iter().enumerate() {
            if row.len() != names.len() {
                bail!(
                    ErrorKind::InvalidSource,
                    "Row width does not match the header",
                    format!(
                        "row {index} has {} values, expected {}",
                        row.len(),
                        names.len()
                    )
                );
            }
            for (column, cell) in columns.iter_mut().zip(row) {
                column.push(cell);
            }
        }

        TabularSource::new(
            names
                .into_iter()
                .zip(columns)
                .map(|(name, cells)| Column::new(name, cells))
                .collect(),
        )
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(Column::name)
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    /// Returns `true` when there are no rows to load.
    pub fn is_empty(&self) -> bool {
        self.num_rows == 0
    }

    /// Iterates rows in order.
    pub fn rows(&self) -> impl ExactSizeIterator<Item = Row<'_>> {
        (0..self.num_rows).map(move |index| Row {
            columns: &self.columns,
            index,
        })
    }
}

/// Borrowed view of one row of a [`TabularSource`].
#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    columns: &'a [Column],
    index: usize,
}

impl<'a> Row<'a> {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn get(&self, column: usize) -> Option<&'a Cell> {
        self.columns.get(column).map(|c| &c.cells[self.index])
    }

    pub fn cells(self) -> impl Iterator<Item = &'a Cell> + 'a {
        let index = self.index;
        self.columns.iter().map(move |c| &c.cells[index])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_follow_column_order() {
        let source = TabularSource::new(vec![
            Column::from_values("col1", [1, 2]),
            Column::from_values("col2", [3, 4]),
        ])
        .unwrap();

        assert_eq!(source.num_rows(), 2);
        assert_eq!(source.num_columns(), 2);
        let rows: Vec<Vec<Cell>> = source.rows().map(|r| r.cells().cloned().collect()).collect();
        assert_eq!(
            rows,
            vec![
                vec![Cell::I64(1), Cell::I64(3)],
                vec![Cell::I64(2), Cell::I64(4)]
            ]
        );
    }

    #[test]
    fn unequal_columns_are_rejected() {
        let err = TabularSource::new(vec![
            Column::from_values("a", [1, 2, 3]),
            Column::from_values("b", [1]),
        ])
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidSource);
        assert!(err.detail().unwrap().contains("`b` has 1 values"));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let err = TabularSource::new(vec![
            Column::from_values("a", [1]),
            Column::from_values("a", [2]),
        ])
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidSource);
    }

    #[test]
    fn sources_without_rows_are_empty() {
        assert!(TabularSource::new(vec![]).unwrap().is_empty());

        let source = TabularSource::new(vec![Column::new("a", vec![])]).unwrap();
        assert!(source.is_empty());
        assert_eq!(source.num_columns(), 1);
        assert_eq!(source.rows().len(), 0);
    }

    #[test]
    fn from_rows_transposes() {
        let source = TabularSource::from_rows(
            vec!["id".to_string(), "name".to_string()],
            vec![
                vec![Cell::I64(1), Cell::from("a")],
                vec![Cell::I64(2), Cell::Null],
            ],
        )
        .unwrap();

        assert_eq!(source.columns()[1].cells(), &[Cell::from("a"), Cell::Null]);

        let err = TabularSource::from_rows(vec!["id".to_string()], vec![vec![]]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidSource);
    }
}
