use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use gcp_bigquery_client::Client;
use gcp_bigquery_client::error::BQError;
use gcp_bigquery_client::model::query_request::QueryRequest;
use gcp_bigquery_client::model::query_response::ResultSet;
use gcp_bigquery_client::model::table_data_insert_all_request::TableDataInsertAllRequest;
use gcp_bigquery_client::model::table_data_insert_all_response::TableDataInsertAllResponse;
use gcp_bigquery_client::model::table_schema::TableSchema;
use loader_config::shared::{BigQueryConfig, DestinationConfig, DestinationKind};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::bulk::{BulkExecutor, BulkInput, Connector};
use crate::clients::tls::install_crypto_provider_once;
use crate::descriptor::DestinationDescriptor;
use crate::destinations::{mismatched_descriptor, unexpected_input};
use crate::error::{BulkPhase, ErrorKind, LoadError, LoadResult};
use crate::load_error;
use crate::types::text::infer_cell;
use crate::types::{Cell, TabularSource};

pub fn connector(descriptor: &DestinationDescriptor) -> LoadResult<Box<dyn Connector>> {
    let DestinationConfig::Bigquery(config) = descriptor.config() else {
        return Err(mismatched_descriptor("bigquery"));
    };

    Ok(Box::new(BigQueryConnector {
        config: config.clone(),
    }))
}

#[derive(Debug, Clone)]
pub struct BigQueryConnector {
    config: BigQueryConfig,
}

#[async_trait]
impl Connector for BigQueryConnector {
    async fn connect(&self) -> LoadResult<Box<dyn BulkExecutor>> {
        install_crypto_provider_once();

        let Some(key_path) = self.config.service_account_key_path.to_str() else {
            return Err(load_error!(
                ErrorKind::InvalidConfig,
                "Service account key path is not valid UTF-8",
                self.config.service_account_key_path.display().to_string()
            ));
        };

        let client = Client::from_service_account_key_file(key_path)
            .await
            .map_err(|err| {
                load_error!(
                    ErrorKind::ConnectionError,
                    "BigQuery authentication failed",
                    err
                )
            })?;
        info!(project = %self.config.project_id, dataset = %self.config.dataset_id, "connected to bigquery");

        Ok(Box::new(BigQueryExecutor {
            client,
            project_id: self.config.project_id.clone(),
            dataset_id: self.config.dataset_id.clone(),
            insert_batch_size: self.config.insert_batch_size.max(1),
        }))
    }
}

/// Loads rows through the `tabledata.insertAll` streaming API.
pub struct BigQueryExecutor {
    client: Client,
    project_id: String,
    dataset_id: String,
    insert_batch_size: usize,
}

impl BigQueryExecutor {
    /// Splits `table` into dataset and table, defaulting to the configured
    /// dataset.
    fn target<'a>(&'a self, table: &'a str) -> (&'a str, &'a str) {
        match table.split_once('.') {
            Some((dataset, table)) => (dataset, table),
            None => (self.dataset_id.as_str(), table),
        }
    }
}

/// Names of the table's top level fields in position order.
///
/// Source columns map onto them by position, so the counts must agree.
fn target_fields(schema: &TableSchema, source_columns: usize) -> LoadResult<Vec<String>> {
    let names: Vec<String> = schema
        .fields()
        .iter()
        .flatten()
        .map(|field| field.name.clone())
        .collect();

    if names.len() != source_columns {
        return Err(LoadError::bulk(
            BulkPhase::NotStarted,
            "Source columns do not match the BigQuery table",
            format!(
                "source has {source_columns} columns, table has {} fields",
                names.len()
            ),
        ));
    }

    Ok(names)
}

/// Builds the `insertAll` requests for `source`, `batch_size` rows each.
///
/// Each row is keyed by `fields`, the target's field names in position order.
fn insert_requests(
    source: &TabularSource,
    fields: &[String],
    batch_size: usize,
) -> LoadResult<Vec<(usize, TableDataInsertAllRequest)>> {
    let mut requests = Vec::new();
    let mut request = TableDataInsertAllRequest::new();
    let mut rows_in_request = 0;

    for row in source.rows() {
        let object: Map<String, Value> = fields
            .iter()
            .zip(row.cells())
            .map(|(name, cell)| (name.clone(), cell_to_json(cell)))
            .collect();
        request.add_row(None, object).map_err(|err| {
            load_error!(
                ErrorKind::SerializationError,
                "Row could not be encoded for BigQuery",
                err
            )
        })?;
        rows_in_request += 1;

        if rows_in_request == batch_size {
            requests.push((rows_in_request, request));
            request = TableDataInsertAllRequest::new();
            rows_in_request = 0;
        }
    }
    if rows_in_request > 0 {
        requests.push((rows_in_request, request));
    }

    Ok(requests)
}

fn cell_to_json(cell: &Cell) -> Value {
    match cell {
        Cell::Null => Value::Null,
        Cell::Bool(v) => Value::Bool(*v),
        Cell::I64(v) => Value::from(*v),
        Cell::F64(v) if v.is_nan() => Value::from("NaN"),
        Cell::F64(v) if v.is_infinite() => {
            Value::from(if *v > 0.0 { "Infinity" } else { "-Infinity" })
        }
        Cell::F64(v) => serde_json::Number::from_f64(*v)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Cell::String(v) => Value::String(v.clone()),
        Cell::Date(v) => Value::String(v.format("%Y-%m-%d").to_string()),
        Cell::TimeStamp(v) => Value::String(v.format("%Y-%m-%d %H:%M:%S%.f").to_string()),
        Cell::TimeStampTz(v) => Value::String(v.to_rfc3339()),
        Cell::Uuid(v) => Value::String(v.to_string()),
        Cell::Json(v) => Value::String(v.to_string()),
        Cell::Bytes(v) => Value::String(STANDARD.encode(v)),
    }
}

/// Rows of earlier requests stay inserted, so only a failure of the first
/// request leaves the table untouched.
fn phase_for_batch(batch: usize) -> BulkPhase {
    if batch == 0 {
        BulkPhase::NotStarted
    } else {
        BulkPhase::Interrupted
    }
}

fn request_error(batch: usize, err: BQError) -> LoadError {
    let phase = match err {
        BQError::ResponseError { .. } => phase_for_batch(batch),
        _ => BulkPhase::Interrupted,
    };

    LoadError::bulk(phase, "BigQuery insertAll request failed", err)
}

/// Rejects responses reporting row errors. BigQuery inserts none of the rows
/// of a request with errors unless it skips invalid rows, which we never ask.
fn check_insert_response(batch: usize, response: &TableDataInsertAllResponse) -> LoadResult<()> {
    let Some(errors) = response.insert_errors.as_ref().filter(|e| !e.is_empty()) else {
        return Ok(());
    };

    let detail = errors
        .iter()
        .take(5)
        .map(|row| {
            let messages = row
                .errors
                .iter()
                .flatten()
                .filter_map(|err| err.message.as_deref())
                .collect::<Vec<_>>()
                .join("; ");
            format!("row {:?}: {messages}", row.index)
        })
        .collect::<Vec<_>>()
        .join(", ");

    Err(LoadError::bulk(
        phase_for_batch(batch),
        "BigQuery rejected rows",
        format!("{} rows with errors, {detail}", errors.len()),
    ))
}

fn query_error(err: BQError) -> LoadError {
    load_error!(
        ErrorKind::BulkCommandError,
        "BigQuery query failed",
        err
    )
}

fn result_rows(mut result: ResultSet) -> LoadResult<Vec<Vec<Cell>>> {
    let columns = result.column_names().len();
    let mut rows = Vec::new();

    while result.next_row() {
        let mut row = Vec::with_capacity(columns);
        for index in 0..columns {
            let value = result.get_json_value(index).map_err(query_error)?;
            row.push(match value {
                None | Some(Value::Null) => Cell::Null,
                Some(Value::String(text)) => infer_cell(&text),
                Some(other) => Cell::Json(other),
            });
        }
        rows.push(row);
    }

    Ok(rows)
}

#[async_trait]
impl BulkExecutor for BigQueryExecutor {
    async fn bulk_load(&mut self, table: &str, input: BulkInput<'_>) -> LoadResult<Option<u64>> {
        let BulkInput::Source(source) = input else {
            return Err(unexpected_input(DestinationKind::Bigquery, &input));
        };

        let (dataset, table_id) = self.target(table);
        let target = self
            .client
            .table()
            .get(&self.project_id, dataset, table_id, None)
            .await
            .map_err(|err| {
                LoadError::bulk(BulkPhase::NotStarted, "BigQuery table could not be read", err)
            })?;
        let fields = target_fields(&target.schema, source.num_columns())?;
        let requests = insert_requests(source, &fields, self.insert_batch_size)?;
        let mut inserted = 0u64;

        for (batch, (rows, request)) in requests.into_iter().enumerate() {
            debug!(dataset, table = table_id, batch, rows, "streaming rows to bigquery");
            let response = self
                .client
                .tabledata()
                .insert_all(&self.project_id, dataset, table_id, request)
                .await
                .map_err(|err| request_error(batch, err))?;
            check_insert_response(batch, &response)?;

            inserted += rows as u64;
        }

        Ok(Some(inserted))
    }

    async fn execute(&mut self, sql: &str) -> LoadResult<u64> {
        let response = self
            .client
            .job()
            .query(&self.project_id, QueryRequest::new(sql))
            .await
            .map_err(query_error)?;

        Ok(response
            .num_dml_affected_rows
            .as_deref()
            .and_then(|rows| rows.parse().ok())
            .unwrap_or(0))
    }

    async fn query(&mut self, sql: &str) -> LoadResult<Vec<Vec<Cell>>> {
        let response = self
            .client
            .job()
            .query(&self.project_id, QueryRequest::new(sql))
            .await
            .map_err(query_error)?;

        result_rows(ResultSet::new_from_query_response(response))
    }

    async fn close(self: Box<Self>) -> LoadResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use gcp_bigquery_client::model::error_proto::ErrorProto;
    use gcp_bigquery_client::model::table_field_schema::TableFieldSchema;
    use gcp_bigquery_client::model::table_data_insert_all_response_insert_errors::TableDataInsertAllResponseInsertErrors;

    use super::*;
    use crate::types::Column;

    #[test]
    fn sources_are_split_into_batches() {
        let source = TabularSource::new(vec![Column::from_values("id", [1, 2, 3, 4, 5])]).unwrap();

        let batches: Vec<usize> = insert_requests(&source, &["id".to_string()], 2)
            .unwrap()
            .into_iter()
            .map(|(rows, _)| rows)
            .collect();
        assert_eq!(batches, vec![2, 2, 1]);
    }

    #[test]
    fn rows_are_keyed_by_table_field_position() {
        let source = TabularSource::new(vec![
            Column::from_values("col1", [1]),
            Column::from_values("col2", [3]),
        ])
        .unwrap();
        let schema = TableSchema::new(vec![
            TableFieldSchema::integer("a"),
            TableFieldSchema::integer("b"),
        ]);

        let fields = target_fields(&schema, source.num_columns()).unwrap();
        let (_, request) = insert_requests(&source, &fields, 10).unwrap().remove(0);
        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(body["rows"][0]["json"], serde_json::json!({"a": 1, "b": 3}));
    }

    #[test]
    fn column_count_mismatches_are_rejected_before_inserting() {
        let schema = TableSchema::new(vec![TableFieldSchema::integer("a")]);

        let err = target_fields(&schema, 2).unwrap_err();
        assert_eq!(err.bulk_phase(), Some(BulkPhase::NotStarted));
        assert!(err.detail().unwrap().contains("2 columns"));
    }

    #[test]
    fn non_finite_floats_use_bigquery_spellings() {
        assert_eq!(cell_to_json(&Cell::F64(f64::NAN)), Value::from("NaN"));
        assert_eq!(cell_to_json(&Cell::F64(f64::INFINITY)), Value::from("Infinity"));
        assert_eq!(
            cell_to_json(&Cell::F64(f64::NEG_INFINITY)),
            Value::from("-Infinity")
        );
        assert_eq!(cell_to_json(&Cell::F64(1.5)), Value::from(1.5));
    }

    #[test]
    fn cells_become_bigquery_json() {
        assert_eq!(cell_to_json(&Cell::Null), Value::Null);
        assert_eq!(cell_to_json(&Cell::I64(7)), Value::from(7));
        assert_eq!(cell_to_json(&Cell::Bytes(b"hi".to_vec())), Value::from("aGk="));
        assert_eq!(
            cell_to_json(&Cell::Date(NaiveDate::from_ymd_opt(2024, 1, 31).unwrap())),
            Value::from("2024-01-31")
        );
    }

    #[test]
    fn row_errors_fail_with_the_batch_phase() {
        let response = TableDataInsertAllResponse {
            insert_errors: Some(vec![TableDataInsertAllResponseInsertErrors {
                errors: Some(vec![ErrorProto {
                    message: Some("no such field: extra".to_string()),
                    ..Default::default()
                }]),
                index: Some(0),
            }]),
            kind: None,
        };

        let first = check_insert_response(0, &response).unwrap_err();
        assert_eq!(first.bulk_phase(), Some(BulkPhase::NotStarted));
        assert!(first.detail().unwrap().contains("no such field"));

        let later = check_insert_response(3, &response).unwrap_err();
        assert_eq!(later.bulk_phase(), Some(BulkPhase::Interrupted));

        assert!(check_insert_response(0, &TableDataInsertAllResponse::default()).is_ok());
    }
}
