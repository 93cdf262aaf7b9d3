#![cfg(feature = "test-utils")]

mod common;

use loader::LoaderState;
use loader::error::{BulkPhase, ErrorKind};
use loader::test_utils::fixtures::{empty_source, sample_source, two_column_source};
use loader::test_utils::{RecordedInput, TestConnector};
use loader_config::shared::DestinationKind;
use loader_telemetry::tracing::init_test_tracing;

use crate::common::test_loader;

#[tokio::test(flavor = "multi_thread")]
async fn loader_goes_through_connect_load_close() {
    init_test_tracing();

    let connector = TestConnector::new();
    let mut loader = test_loader(&connector, DestinationKind::Postgres, None);
    assert_eq!(loader.state(), LoaderState::Disconnected);

    loader.connect().await.unwrap();
    assert_eq!(loader.state(), LoaderState::Connected);

    let result = loader.load(&two_column_source(), "t").await.unwrap();
    assert_eq!(result.rows_loaded, 2);

    let loads = connector.loads().await;
    assert_eq!(loads.len(), 1);
    assert_eq!(loads[0].table, "t");
    assert_eq!(
        loads[0].input,
        RecordedInput::Stream {
            body: b"1,3\n2,4\n".to_vec()
        }
    );

    loader.close().await.unwrap();
    assert_eq!(loader.state(), LoaderState::Closed);
    assert_eq!(connector.closed_sessions().await, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn closed_loaders_reject_every_call() {
    init_test_tracing();

    let connector = TestConnector::new();
    let mut loader = test_loader(&connector, DestinationKind::Postgres, None);
    loader.connect().await.unwrap();
    loader.close().await.unwrap();

    let err = loader.close().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyClosed);

    let err = loader.load(&two_column_source(), "t").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyClosed);

    let err = loader.connect().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyClosed);

    assert!(connector.loads().await.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn loading_before_connecting_is_an_invalid_state() {
    init_test_tracing();

    let connector = TestConnector::new();
    let mut loader = test_loader(&connector, DestinationKind::Bigquery, None);

    let err = loader.load(&two_column_source(), "t").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
    assert_eq!(connector.connect_attempts().await, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_connects_can_be_retried() {
    init_test_tracing();

    let connector = TestConnector::new();
    connector.fail_next_connects(1).await;
    let mut loader = test_loader(&connector, DestinationKind::Postgres, None);

    let err = loader.connect().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConnectionError);
    assert_eq!(loader.state(), LoaderState::Disconnected);

    loader.connect().await.unwrap();
    assert_eq!(loader.state(), LoaderState::Connected);
    assert_eq!(connector.connect_attempts().await, 2);

    let err = loader.connect().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_sources_load_zero_rows_without_a_bulk_command() {
    init_test_tracing();

    let connector = TestConnector::new();
    let mut loader = test_loader(&connector, DestinationKind::Snowflake, None);
    loader.connect().await.unwrap();

    let result = loader.load(&empty_source(), "t").await.unwrap();
    assert_eq!(result.rows_loaded, 0);
    assert!(connector.loads().await.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn reported_row_counts_win_over_source_rows() {
    init_test_tracing();

    let connector = TestConnector::new();
    let mut loader = test_loader(&connector, DestinationKind::Bigquery, None);
    loader.connect().await.unwrap();

    let result = loader.load(&sample_source(10), "t").await.unwrap();
    assert_eq!(result.rows_loaded, 10);

    connector.report_rows(Some(7)).await;
    let result = loader.load(&sample_source(10), "t").await.unwrap();
    assert_eq!(result.rows_loaded, 7);

    let loads = connector.loads().await;
    assert_eq!(
        loads[0].input,
        RecordedInput::Source {
            rows: 10,
            columns: 3
        }
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn bulk_failures_keep_their_phase() {
    init_test_tracing();

    let connector = TestConnector::new();
    let mut loader = test_loader(&connector, DestinationKind::Postgres, None);
    loader.connect().await.unwrap();

    connector.fail_bulk_loads(Some(BulkPhase::Interrupted)).await;
    let err = loader.load(&two_column_source(), "t").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BulkCommandError);
    assert_eq!(err.bulk_phase(), Some(BulkPhase::Interrupted));

    // The session survives a failed load.
    connector.fail_bulk_loads(None).await;
    loader.load(&two_column_source(), "t").await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn blank_table_names_are_rejected() {
    init_test_tracing();

    let connector = TestConnector::new();
    let mut loader = test_loader(&connector, DestinationKind::Postgres, None);
    loader.connect().await.unwrap();

    let err = loader.load(&two_column_source(), "  ").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidSource);
    assert!(connector.loads().await.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn statements_run_on_the_loader_session() {
    init_test_tracing();

    let connector = TestConnector::new();
    let mut loader = test_loader(&connector, DestinationKind::Mysql, None);

    let err = loader.execute("TRUNCATE t").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    loader.connect().await.unwrap();
    loader.execute("TRUNCATE t").await.unwrap();
    loader.query("SELECT COUNT(*) FROM t").await.unwrap();

    assert_eq!(
        connector.statements().await,
        vec!["TRUNCATE t".to_string(), "SELECT COUNT(*) FROM t".to_string()]
    );
}
