//! Low-level clients shared by destinations that talk to the same service or
//! wire protocol.

#[cfg(feature = "databricks")]
pub mod databricks;
#[cfg(feature = "pg-wire")]
pub mod postgres;
#[cfg(feature = "snowflake")]
pub mod snowflake;
#[cfg(any(feature = "snowflake", feature = "databricks"))]
pub mod statement;
#[cfg(any(feature = "pg-wire", feature = "bigquery"))]
pub mod tls;
