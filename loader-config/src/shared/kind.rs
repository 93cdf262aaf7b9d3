use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Closed set of destination systems the loader knows how to target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationKind {
    Sqlite,
    Duckdb,
    Postgres,
    Mysql,
    Mssql,
    Redshift,
    Snowflake,
    Bigquery,
    Databricks,
}

impl DestinationKind {
    /// All kinds, in the order built-in backends are registered.
    pub const ALL: [DestinationKind; 9] = [
        DestinationKind::Sqlite,
        DestinationKind::Duckdb,
        DestinationKind::Postgres,
        DestinationKind::Mysql,
        DestinationKind::Mssql,
        DestinationKind::Redshift,
        DestinationKind::Snowflake,
        DestinationKind::Bigquery,
        DestinationKind::Databricks,
    ];

    /// Tag used for this kind in descriptors, logs and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            DestinationKind::Sqlite => "sqlite",
            DestinationKind::Duckdb => "duckdb",
            DestinationKind::Postgres => "postgres",
            DestinationKind::Mysql => "mysql",
            DestinationKind::Mssql => "mssql",
            DestinationKind::Redshift => "redshift",
            DestinationKind::Snowflake => "snowflake",
            DestinationKind::Bigquery => "bigquery",
            DestinationKind::Databricks => "databricks",
        }
    }
}

impl fmt::Display for DestinationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DestinationKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DestinationKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ValidationError::UnknownKind(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_round_trip_through_from_str() {
        for kind in DestinationKind::ALL {
            assert_eq!(kind.as_str().parse::<DestinationKind>().unwrap(), kind);
        }
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let err = "nonexistent".parse::<DestinationKind>().unwrap_err();
        assert!(matches!(err, ValidationError::UnknownKind(ref tag) if tag == "nonexistent"));
        assert_eq!(err.field(), Some("kind"));
    }

    #[test]
    fn tags_are_case_sensitive() {
        assert!("SQLite".parse::<DestinationKind>().is_err());
    }
}
