use std::path::Path;

use loader_config::shared::DestinationKind;
use serde_json::{Value, json};

use crate::bulk::Connector;
use crate::registry::LoaderRegistry;
use crate::test_utils::TestConnector;
use crate::types::{Column, TabularSource};

/// The source `{col1: [1, 2], col2: [3, 4]}`.
pub fn two_column_source() -> TabularSource {
    TabularSource::new(vec![
        Column::from_values("col1", [1, 2]),
        Column::from_values("col2", [3, 4]),
    ])
    .expect("fixture columns have equal lengths")
}

/// A source with `rows` rows of mixed types.
pub fn sample_source(rows: usize) -> TabularSource {
    let ids: Vec<i64> = (0..rows as i64).collect();
    let names: Vec<String> = (0..rows).map(|i| format!("name-{i}")).collect();
    let scores: Vec<Option<f64>> = (0..rows)
        .map(|i| (i % 3 != 0).then_some(i as f64 / 2.0))
        .collect();

    TabularSource::new(vec![
        Column::from_values("id", ids),
        Column::from_values("name", names),
        Column::from_values("score", scores),
    ])
    .expect("fixture columns have equal lengths")
}

/// A source with columns but no rows.
pub fn empty_source() -> TabularSource {
    TabularSource::new(vec![
        Column::new("col1", vec![]),
        Column::new("col2", vec![]),
    ])
    .expect("fixture columns have equal lengths")
}

/// A valid descriptor for `kind`.
///
/// Local staging files of `mysql` and `mssql` go to `staging_dir` when given.
pub fn valid_descriptor(kind: DestinationKind, staging_dir: Option<&Path>) -> Value {
    let staging_dir = staging_dir.map(|dir| dir.display().to_string());

    match kind {
        DestinationKind::Sqlite | DestinationKind::Duckdb => json!({
            "kind": kind.as_str(),
            "path": ":memory:",
        }),
        DestinationKind::Postgres => json!({
            "kind": "postgres",
            "host": "localhost",
            "user": "postgres",
            "database": "postgres",
        }),
        DestinationKind::Mysql => json!({
            "kind": "mysql",
            "host": "localhost",
            "user": "root",
            "password": "password",
            "database": "loads",
            "staging_dir": staging_dir,
        }),
        DestinationKind::Mssql => json!({
            "kind": "mssql",
            "host": "localhost",
            "user": "sa",
            "password": "Passw0rd!",
            "database": "loads",
            "staging_dir": staging_dir.unwrap_or_else(|| std::env::temp_dir().display().to_string()),
        }),
        DestinationKind::Redshift => json!({
            "kind": "redshift",
            "host": "localhost",
            "user": "admin",
            "password": "password",
            "database": "dev",
            "iam_role_arn": "arn:aws:iam::123456789012:role/loader",
            "s3_bucket": "staging",
        }),
        DestinationKind::Snowflake => json!({
            "kind": "snowflake",
            "account": "org-account",
            "user": "LOADER",
            "token": "token",
            "warehouse": "COMPUTE_WH",
            "database": "LOADS",
            "schema": "PUBLIC",
            "storage_integration": "S3_INT",
            "s3_bucket": "staging",
        }),
        DestinationKind::Bigquery => json!({
            "kind": "bigquery",
            "project_id": "project",
            "dataset_id": "dataset",
            "service_account_key_path": "/tmp/key.json",
        }),
        DestinationKind::Databricks => json!({
            "kind": "databricks",
            "workspace_url": "https://dbc.cloud.databricks.com",
            "warehouse_id": "warehouse",
            "access_token": "dapi-token",
            "catalog": "main",
            "schema": "default",
            "s3_bucket": "staging",
        }),
    }
}

/// A registry where every kind is served by `connector`.
pub fn registry_with(connector: &TestConnector) -> LoaderRegistry {
    let mut registry = LoaderRegistry::new();

    for kind in DestinationKind::ALL {
        let connector = connector.clone();
        registry
            .register(kind, move |_| {
                Ok(Box::new(connector.clone()) as Box<dyn Connector>)
            })
            .expect("each kind is registered once");
    }

    registry
}
