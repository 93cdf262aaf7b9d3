#![cfg(feature = "test-utils")]

mod common;

use loader::error::{BulkPhase, ErrorKind};
use loader::store::memory::PutFailure;
use loader::test_utils::fixtures::{sample_source, two_column_source};
use loader::test_utils::{RecordedInput, TestConnector};
use loader_config::shared::DestinationKind;
use loader_telemetry::tracing::init_test_tracing;

use crate::common::{connected_object_loader, test_loader};

#[tokio::test(flavor = "multi_thread")]
async fn local_files_exist_during_the_command_only() {
    init_test_tracing();

    let dir = tempfile::tempdir().unwrap();
    let connector = TestConnector::new();
    let mut loader = test_loader(&connector, DestinationKind::Mysql, Some(dir.path()));
    loader.connect().await.unwrap();

    loader.load(&two_column_source(), "t").await.unwrap();

    let loads = connector.loads().await;
    let RecordedInput::LocalFile {
        path,
        existed,
        contents,
    } = &loads[0].input
    else {
        panic!("expected a local file load, got {:?}", loads[0].input);
    };
    assert!(existed);
    assert_eq!(contents.as_deref(), Some("1,3\n2,4\n"));
    assert!(path.starts_with(dir.path()));
    assert!(!path.exists());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn local_files_are_removed_after_bulk_failures() {
    init_test_tracing();

    let dir = tempfile::tempdir().unwrap();
    let connector = TestConnector::new();
    connector.fail_bulk_loads(Some(BulkPhase::NotStarted)).await;
    let mut loader = test_loader(&connector, DestinationKind::Mssql, Some(dir.path()));
    loader.connect().await.unwrap();

    let err = loader.load(&sample_source(5), "dbo.t").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BulkCommandError);
    assert_eq!(err.bulk_phase(), Some(BulkPhase::NotStarted));

    let loads = connector.loads().await;
    let RecordedInput::LocalFile { path, existed, .. } = &loads[0].input else {
        panic!("expected a local file load, got {:?}", loads[0].input);
    };
    assert!(existed);
    assert!(!path.exists());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn objects_exist_during_the_command_only() {
    init_test_tracing();

    let (mut loader, connector, store) = connected_object_loader(DestinationKind::Snowflake).await;

    let result = loader.load(&two_column_source(), "events").await.unwrap();
    assert_eq!(result.rows_loaded, 2);

    let loads = connector.loads().await;
    let RecordedInput::Object { uri, existed } = &loads[0].input else {
        panic!("expected an object load, got {:?}", loads[0].input);
    };
    assert!(existed);
    assert!(uri.starts_with("memory://staging/events_"));
    assert!(uri.ends_with(".parquet"));

    assert!(store.keys().await.is_empty());
    assert_eq!(store.deleted().await.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn rejected_uploads_are_staging_errors() {
    init_test_tracing();

    let (mut loader, connector, store) = connected_object_loader(DestinationKind::Redshift).await;

    for failure in [PutFailure::Reject, PutFailure::PartialWrite] {
        store.set_put_failure(Some(failure)).await;

        let err = loader.load(&two_column_source(), "t").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StagingError, "{failure:?}");
        assert!(store.keys().await.is_empty(), "{failure:?}");
    }

    // The bulk command never ran.
    assert!(connector.loads().await.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn objects_are_deleted_after_bulk_failures() {
    init_test_tracing();

    let (mut loader, connector, store) = connected_object_loader(DestinationKind::Databricks).await;
    connector.fail_bulk_loads(Some(BulkPhase::Interrupted)).await;

    let err = loader.load(&sample_source(3), "t").await.unwrap_err();
    assert_eq!(err.bulk_phase(), Some(BulkPhase::Interrupted));

    let loads = connector.loads().await;
    assert!(matches!(
        loads[0].input,
        RecordedInput::Object { existed: true, .. }
    ));
    assert!(store.keys().await.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_deletes_do_not_fail_the_load() {
    init_test_tracing();

    let (mut loader, _connector, store) = connected_object_loader(DestinationKind::Snowflake).await;
    store.set_fail_deletes(true).await;

    let result = loader.load(&two_column_source(), "t").await.unwrap();
    assert_eq!(result.rows_loaded, 2);

    // Left behind for out-of-band cleanup.
    assert_eq!(store.keys().await.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_loaders_stage_distinct_artifacts() {
    init_test_tracing();

    let (mut first, first_connector, first_store) =
        connected_object_loader(DestinationKind::Snowflake).await;
    let (mut second, second_connector, second_store) =
        connected_object_loader(DestinationKind::Snowflake).await;
    assert_ne!(first.id(), second.id());

    let source = sample_source(100);
    let (a, b) = tokio::join!(first.load(&source, "t"), second.load(&source, "t"));
    assert_eq!(a.unwrap().rows_loaded, 100);
    assert_eq!(b.unwrap().rows_loaded, 100);

    let uri_of = |input: &RecordedInput| match input {
        RecordedInput::Object { uri, .. } => uri.clone(),
        other => panic!("expected an object load, got {other:?}"),
    };
    let first_uri = uri_of(&first_connector.loads().await[0].input);
    let second_uri = uri_of(&second_connector.loads().await[0].input);
    assert_ne!(first_uri, second_uri);

    assert!(first_store.keys().await.is_empty());
    assert!(second_store.keys().await.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_loaders_share_a_staging_dir_without_collisions() {
    init_test_tracing();

    let dir = tempfile::tempdir().unwrap();
    let first_connector = TestConnector::new();
    let second_connector = TestConnector::new();
    let mut first = test_loader(&first_connector, DestinationKind::Mysql, Some(dir.path()));
    let mut second = test_loader(&second_connector, DestinationKind::Mysql, Some(dir.path()));
    first.connect().await.unwrap();
    second.connect().await.unwrap();

    let source = sample_source(100);
    let (a, b) = tokio::join!(first.load(&source, "t"), second.load(&source, "t"));
    assert_eq!(a.unwrap().rows_loaded, 100);
    assert_eq!(b.unwrap().rows_loaded, 100);

    let path_of = |input: &RecordedInput| match input {
        RecordedInput::LocalFile { path, existed, .. } => {
            assert!(existed);
            path.clone()
        }
        other => panic!("expected a local file load, got {other:?}"),
    };
    let first_path = path_of(&first_connector.loads().await[0].input);
    let second_path = path_of(&second_connector.loads().await[0].input);
    assert_ne!(first_path, second_path);
    assert!(first_path.starts_with(dir.path()));
    assert!(second_path.starts_with(dir.path()));

    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}
