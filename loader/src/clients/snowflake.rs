use std::time::Duration;

use loader_config::SerializableSecretString;
use loader_config::shared::SnowflakeConfig;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::clients::statement::{StatementError, StatementResult, redact_statement};

/// Seconds Snowflake may spend on a statement before cancelling it.
const STATEMENT_TIMEOUT_SECS: u64 = 3600;
/// Delay between polls of a statement that is still running.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Serialize)]
struct StatementRequest<'a> {
    statement: &'a str,
    timeout: u64,
    warehouse: &'a str,
    database: &'a str,
    schema: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatementResponse {
    statement_handle: Option<String>,
    code: Option<String>,
    message: Option<String>,
    result_set_meta_data: Option<ResultSetMetaData>,
    data: Option<Vec<Vec<Option<String>>>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResultSetMetaData {
    row_type: Vec<RowType>,
}

#[derive(Debug, Deserialize)]
struct RowType {
    name: String,
}

/// Client of the Snowflake SQL REST API (`/api/v2/statements`).
#[derive(Debug, Clone)]
pub struct SnowflakeClient {
    client: Client,
    base_url: String,
    token: SerializableSecretString,
    token_type: String,
    warehouse: String,
    database: String,
    schema: String,
    role: Option<String>,
}

impl SnowflakeClient {
    pub fn new(config: &SnowflakeConfig) -> SnowflakeClient {
        SnowflakeClient {
            client: Client::new(),
            base_url: config.api_base_url(),
            token: config.token.clone(),
            token_type: config.token_type.clone(),
            warehouse: config.warehouse.clone(),
            database: config.database.clone(),
            schema: config.schema.clone(),
            role: config.role.clone(),
        }
    }

    /// Runs `SELECT 1` to check the account, token and warehouse.
    pub async fn test_connection(&self) -> Result<(), StatementError> {
        self.execute("SELECT 1").await?;
        info!(url = %self.base_url, "connected to snowflake");

        Ok(())
    }

    /// Submits a statement and waits until it finished.
    pub async fn execute(&self, statement: &str) -> Result<StatementResult, StatementError> {
        debug!("executing SQL: {}", redact_statement(statement));

        let request = StatementRequest {
            statement,
            timeout: STATEMENT_TIMEOUT_SECS,
            warehouse: &self.warehouse,
            database: &self.database,
            schema: &self.schema,
            role: self.role.as_deref(),
        };

        let url = format!("{}/api/v2/statements", self.base_url);
        let response = self
            .authorized(self.client.post(&url))
            .json(&request)
            .send()
            .await?;

        let mut response = parse_response(response).await?;
        while let Some(handle) = response.pending_handle {
            tokio::time::sleep(POLL_INTERVAL).await;

            let url = format!("{}/api/v2/statements/{handle}", self.base_url);
            let poll = self.authorized(self.client.get(&url)).send().await?;
            response = parse_response(poll).await?;
        }

        Ok(response.result)
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .bearer_auth(self.token.expose())
            .header("X-Snowflake-Authorization-Token-Type", &self.token_type)
            .header(reqwest::header::ACCEPT, "application/json")
    }
}

struct ParsedResponse {
    /// Handle to poll when the statement is still running.
    pending_handle: Option<String>,
    result: StatementResult,
}

async fn parse_response(response: Response) -> Result<ParsedResponse, StatementError> {
    let status = response.status();

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        let message = response.text().await.unwrap_or_default();
        return Err(StatementError::AuthenticationFailed {
            status: status.as_u16(),
            message,
        });
    }

    if !status.is_success() {
        let body = response.text().await?;
        let message = serde_json::from_str::<StatementResponse>(&body)
            .ok()
            .and_then(|parsed| parsed.message)
            .unwrap_or(body);
        return Err(StatementError::StatementExecutionFailed(message));
    }

    let body: StatementResponse = response.json().await?;
    if status == StatusCode::ACCEPTED {
        let Some(handle) = body.statement_handle else {
            return Err(StatementError::UnexpectedResponse(format!(
                "statement is running but has no handle (code {:?})",
                body.code
            )));
        };
        return Ok(ParsedResponse {
            pending_handle: Some(handle),
            result: StatementResult::default(),
        });
    }

    Ok(ParsedResponse {
        pending_handle: None,
        result: into_result(body),
    })
}

fn into_result(body: StatementResponse) -> StatementResult {
    StatementResult {
        columns: body
            .result_set_meta_data
            .map(|meta| meta.row_type.into_iter().map(|row| row.name).collect())
            .unwrap_or_default(),
        rows: body.data.unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn results_keep_column_names_and_text_values() {
        let body: StatementResponse = serde_json::from_value(serde_json::json!({
            "statementHandle": "01b2",
            "code": "090001",
            "resultSetMetaData": {
                "numRows": 1,
                "rowType": [{"name": "file"}, {"name": "status"}, {"name": "rows_loaded"}]
            },
            "data": [["s3://b/t.parquet", "LOADED", "2"]]
        }))
        .unwrap();

        let result = into_result(body);
        assert_eq!(result.column("STATUS"), Some(1));
        assert_eq!(result.sum_column("rows_loaded"), Some(2));
        assert_eq!(result.rows[0][0].as_deref(), Some("s3://b/t.parquet"));
    }
}
