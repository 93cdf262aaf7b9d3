//! Pieces shared by the HTTP statement APIs of the warehouses.

use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

use crate::error::{BulkPhase, ErrorKind, LoadError};
use crate::load_error;

#[derive(Debug, Error)]
pub enum StatementError {
    /// The request never got an answer.
    #[error("Request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("Authentication failed ({status}): {message}")]
    AuthenticationFailed { status: u16, message: String },

    /// The service answered and reported the statement as failed.
    #[error("Statement execution failed: {0}")]
    StatementExecutionFailed(String),

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
}

impl StatementError {
    /// Failure while checking that a fresh session works.
    pub fn into_connection_error(self, service: &'static str) -> LoadError {
        load_error!(
            ErrorKind::ConnectionError,
            "Warehouse session could not be established",
            format!("{service}: {self}")
        )
    }

    /// Failure of a bulk command.
    ///
    /// Statements the service reports as failed were aborted as a whole. A
    /// lost answer leaves their outcome unknown.
    pub fn into_bulk_error(self, service: &'static str) -> LoadError {
        let phase = match self {
            StatementError::RequestFailed(_) | StatementError::UnexpectedResponse(_) => {
                BulkPhase::Interrupted
            }
            StatementError::AuthenticationFailed { .. }
            | StatementError::StatementExecutionFailed(_) => BulkPhase::NotStarted,
        };

        LoadError::bulk(phase, "Warehouse bulk command failed", format!("{service}: {self}"))
    }

    /// Failure of an auxiliary statement.
    pub fn into_statement_error(self, service: &'static str) -> LoadError {
        load_error!(
            ErrorKind::BulkCommandError,
            "Warehouse statement failed",
            format!("{service}: {self}")
        )
    }
}

/// Rows of a finished statement, with every value in its JSON text form.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatementResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl StatementResult {
    /// Index of the column called `name`, ignoring case.
    pub fn column(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|column| column.eq_ignore_ascii_case(name))
    }

    /// Sum of the integer values of column `name`, `None` when the column is
    /// absent.
    pub fn sum_column(&self, name: &str) -> Option<u64> {
        let index = self.column(name)?;

        Some(
            self.rows
                .iter()
                .filter_map(|row| row.get(index)?.as_deref()?.parse::<u64>().ok())
                .sum(),
        )
    }
}

/// Shortens statements for logging by eliding inline `VALUES` lists.
pub fn redact_statement(statement: &str) -> String {
    static VALUES: OnceLock<Option<Regex>> = OnceLock::new();

    let values = VALUES.get_or_init(|| {
        Regex::new(r"(?i)VALUES\s*\([^)]*\)(?:\s*,\s*\([^)]*\))*").ok()
    });
    match values {
        Some(regex) => regex.replace_all(statement, "VALUES (...)").into_owned(),
        None => statement.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn columns_are_summed_by_name() {
        let result = StatementResult {
            columns: vec!["file".to_string(), "ROWS_LOADED".to_string()],
            rows: vec![
                vec![Some("a.parquet".to_string()), Some("2".to_string())],
                vec![Some("b.parquet".to_string()), Some("3".to_string())],
            ],
        };

        assert_eq!(result.sum_column("rows_loaded"), Some(5));
        assert_eq!(result.sum_column("missing"), None);
    }

    #[test]
    fn values_lists_are_redacted() {
        assert_eq!(
            redact_statement("INSERT INTO t VALUES (1, 'a'), (2, 'b')"),
            "INSERT INTO t VALUES (...)"
        );
        assert_eq!(redact_statement("SELECT 1"), "SELECT 1");
    }

    #[test]
    fn failed_statements_did_not_start() {
        let err = StatementError::StatementExecutionFailed("bad file".to_string())
            .into_bulk_error("snowflake");
        assert_eq!(err.bulk_phase(), Some(BulkPhase::NotStarted));
    }
}
