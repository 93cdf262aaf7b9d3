//! Built-in destinations.
//!
//! Every module exposes a `connector` function with the
//! [`LoaderConstructor`](crate::registry::LoaderConstructor) signature. Only
//! destinations whose cargo feature is enabled are compiled and registered.

#[cfg(feature = "bigquery")]
pub mod bigquery;
#[cfg(feature = "databricks")]
pub mod databricks;
#[cfg(feature = "duckdb")]
pub mod duckdb;
#[cfg(feature = "mssql")]
pub mod mssql;
#[cfg(feature = "mysql")]
pub mod mysql;
#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "redshift")]
pub mod redshift;
#[cfg(feature = "snowflake")]
pub mod snowflake;
#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "destination")]
use std::sync::Arc;

#[cfg(feature = "destination")]
use loader_config::shared::DestinationKind;
#[cfg(any(feature = "redshift", feature = "snowflake", feature = "databricks"))]
use loader_config::shared::StagingFormat;

#[cfg(feature = "destination")]
use crate::bulk::BulkInput;
#[cfg(feature = "destination")]
use crate::error::{ErrorKind, LoadError};
#[cfg(feature = "destination")]
use crate::load_error;
use crate::registry::LoaderRegistry;

/// Registers every compiled-in destination, in
/// [`DestinationKind::ALL`](loader_config::shared::DestinationKind::ALL) order.
#[cfg_attr(not(feature = "destination"), allow(unused_variables))]
pub(crate) fn register_builtin(registry: &mut LoaderRegistry) {
    #[cfg(feature = "sqlite")]
    registry.insert(DestinationKind::Sqlite, Arc::new(sqlite::connector));
    #[cfg(feature = "duckdb")]
    registry.insert(DestinationKind::Duckdb, Arc::new(duckdb::connector));
    #[cfg(feature = "postgres")]
    registry.insert(DestinationKind::Postgres, Arc::new(postgres::connector));
    #[cfg(feature = "mysql")]
    registry.insert(DestinationKind::Mysql, Arc::new(mysql::connector));
    #[cfg(feature = "mssql")]
    registry.insert(DestinationKind::Mssql, Arc::new(mssql::connector));
    #[cfg(feature = "redshift")]
    registry.insert(DestinationKind::Redshift, Arc::new(redshift::connector));
    #[cfg(feature = "snowflake")]
    registry.insert(DestinationKind::Snowflake, Arc::new(snowflake::connector));
    #[cfg(feature = "bigquery")]
    registry.insert(DestinationKind::Bigquery, Arc::new(bigquery::connector));
    #[cfg(feature = "databricks")]
    registry.insert(DestinationKind::Databricks, Arc::new(databricks::connector));
}

/// Error for a constructor handed the descriptor of another kind.
#[cfg(feature = "destination")]
pub(crate) fn mismatched_descriptor(expected: &'static str) -> LoadError {
    load_error!(
        ErrorKind::InvalidConfig,
        "Descriptor does not belong to this destination",
        format!("expected a {expected} descriptor")
    )
}

/// Error for a session handed input its strategy never produces.
#[cfg(feature = "destination")]
pub(crate) fn unexpected_input(kind: DestinationKind, input: &BulkInput<'_>) -> LoadError {
    load_error!(
        ErrorKind::InvalidState,
        "Destination cannot load this kind of input",
        format!("{kind} received a {} input", input.describe())
    )
}

/// URI and format of the staged object an object-storage load hands over.
#[cfg(any(feature = "redshift", feature = "snowflake", feature = "databricks"))]
pub(crate) fn staged_object<'a>(
    kind: DestinationKind,
    input: BulkInput<'a>,
) -> Result<(&'a str, StagingFormat), LoadError> {
    match input {
        BulkInput::Object(artifact) => match artifact.uri() {
            Some(uri) => Ok((uri, artifact.format())),
            None => Err(unexpected_input(kind, &input)),
        },
        _ => Err(unexpected_input(kind, &input)),
    }
}

/// Quotes a possibly schema-qualified table name for double-quote dialects.
///
/// Each dot-separated part is quoted on its own, and only when needed.
#[cfg(any(
    test,
    feature = "sqlite",
    feature = "duckdb",
    feature = "postgres",
    feature = "redshift",
    feature = "snowflake"
))]
pub(crate) fn quote_qualified(name: &str) -> String {
    name.split('.')
        .map(|part| pg_escape::quote_identifier(part).into_owned())
        .collect::<Vec<_>>()
        .join(".")
}

/// Quotes a string literal for dialects where `\\` escapes inside literals.
#[cfg(any(test, feature = "snowflake", feature = "databricks"))]
pub(crate) fn escaped_literal(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "''"))
}
