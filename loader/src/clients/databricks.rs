use loader_config::SerializableSecretString;
use loader_config::shared::DatabricksConfig;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::clients::statement::{StatementError, StatementResult, redact_statement};

#[derive(Debug, Serialize)]
struct ExecuteStatementRequest<'a> {
    statement: &'a str,
    warehouse_id: &'a str,
    catalog: &'a str,
    schema: &'a str,
    wait_timeout: &'static str,
    on_wait_timeout: &'static str,
    format: &'static str,
    disposition: &'static str,
}

#[derive(Debug, Deserialize)]
struct ExecuteStatementResponse {
    status: StatementStatus,
    manifest: Option<ResultManifest>,
    result: Option<ResultData>,
}

#[derive(Debug, Deserialize)]
struct StatementStatus {
    state: String,
    error: Option<ErrorInfo>,
}

#[derive(Debug, Deserialize)]
struct ErrorInfo {
    message: String,
}

#[derive(Debug, Deserialize)]
struct ResultManifest {
    schema: Option<ResultSchema>,
}

#[derive(Debug, Deserialize)]
struct ResultSchema {
    #[serde(default)]
    columns: Vec<ResultColumn>,
}

#[derive(Debug, Deserialize)]
struct ResultColumn {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ResultData {
    data_array: Option<Vec<Vec<Option<String>>>>,
}

/// Client of the Databricks SQL statement execution API.
#[derive(Debug, Clone)]
pub struct DatabricksClient {
    client: Client,
    workspace_url: String,
    warehouse_id: String,
    access_token: SerializableSecretString,
    catalog: String,
    schema: String,
}

impl DatabricksClient {
    pub fn new(config: &DatabricksConfig) -> DatabricksClient {
        DatabricksClient {
            client: Client::new(),
            workspace_url: config.workspace_url.trim_end_matches('/').to_string(),
            warehouse_id: config.warehouse_id.clone(),
            access_token: config.access_token.clone(),
            catalog: config.catalog.clone(),
            schema: config.schema.clone(),
        }
    }

    /// Full name of `table` inside the configured catalog and schema, unless
    /// it is already qualified.
    pub fn full_table_name(&self, table: &str) -> String {
        let parts: Vec<&str> = table.split('.').collect();
        let parts = match parts.as_slice() {
            [table] => vec![self.catalog.as_str(), self.schema.as_str(), table],
            [schema, table] => vec![self.catalog.as_str(), schema, table],
            _ => parts,
        };

        parts
            .iter()
            .map(|part| format!("`{}`", part.replace('`', "``")))
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Runs `SELECT 1` to check the workspace, token and warehouse.
    pub async fn test_connection(&self) -> Result<(), StatementError> {
        self.execute("SELECT 1").await?;
        info!(workspace = %self.workspace_url, "connected to databricks");

        Ok(())
    }

    /// Executes a statement and waits for it to finish.
    ///
    /// Statements still running after the API's wait timeout are cancelled.
    pub async fn execute(&self, statement: &str) -> Result<StatementResult, StatementError> {
        debug!("executing SQL: {}", redact_statement(statement));

        let request = ExecuteStatementRequest {
            statement,
            warehouse_id: &self.warehouse_id,
            catalog: &self.catalog,
            schema: &self.schema,
            wait_timeout: "50s",
            on_wait_timeout: "CANCEL",
            format: "JSON_ARRAY",
            disposition: "INLINE",
        };

        let url = format!("{}/api/2.0/sql/statements", self.workspace_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(self.access_token.expose())
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            let message = response.text().await.unwrap_or_default();
            return Err(StatementError::AuthenticationFailed {
                status: status.as_u16(),
                message,
            });
        }
        if !status.is_success() {
            let error_text = response.text().await?;
            return Err(StatementError::StatementExecutionFailed(error_text));
        }

        let response: ExecuteStatementResponse = response.json().await?;
        into_result(response)
    }
}

fn into_result(response: ExecuteStatementResponse) -> Result<StatementResult, StatementError> {
    if response.status.state != "SUCCEEDED" {
        let detail = response
            .status
            .error
            .map(|err| err.message)
            .unwrap_or_else(|| "no error details".to_string());
        return Err(StatementError::StatementExecutionFailed(format!(
            "statement finished as {}: {detail}",
            response.status.state
        )));
    }

    Ok(StatementResult {
        columns: response
            .manifest
            .and_then(|manifest| manifest.schema)
            .map(|schema| schema.columns.into_iter().map(|c| c.name).collect())
            .unwrap_or_default(),
        rows: response
            .result
            .and_then(|result| result.data_array)
            .unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn client() -> DatabricksClient {
        DatabricksClient {
            client: Client::new(),
            workspace_url: "https://dbc.cloud.databricks.com".to_string(),
            warehouse_id: "wh".to_string(),
            access_token: "dapi".into(),
            catalog: "main".to_string(),
            schema: "default".to_string(),
        }
    }

    #[test]
    fn table_names_are_qualified_with_catalog_and_schema() {
        let client = client();
        assert_eq!(client.full_table_name("events"), "`main`.`default`.`events`");
        assert_eq!(client.full_table_name("raw.events"), "`main`.`raw`.`events`");
        assert_eq!(client.full_table_name("c.s.t"), "`c`.`s`.`t`");
    }

    #[test]
    fn succeeded_statements_expose_columns_and_rows() {
        let response: ExecuteStatementResponse = serde_json::from_value(json!({
            "statement_id": "01",
            "status": {"state": "SUCCEEDED"},
            "manifest": {"schema": {"columns": [
                {"name": "num_affected_rows"}, {"name": "num_inserted_rows"}
            ]}},
            "result": {"data_array": [["2", "2"]]}
        }))
        .unwrap();

        let result = into_result(response).unwrap();
        assert_eq!(result.sum_column("num_inserted_rows"), Some(2));
    }

    #[test]
    fn failed_statements_carry_the_error_message() {
        let response: ExecuteStatementResponse = serde_json::from_value(json!({
            "statement_id": "01",
            "status": {"state": "FAILED", "error": {"message": "TABLE_OR_VIEW_NOT_FOUND"}}
        }))
        .unwrap();

        let err = into_result(response).unwrap_err();
        assert!(err.to_string().contains("TABLE_OR_VIEW_NOT_FOUND"));
    }
}
