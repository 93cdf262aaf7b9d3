use std::path::Path;

use loader::Loader;
use loader::store::memory::MemoryObjectStore;
use loader::test_utils::TestConnector;
use loader::test_utils::fixtures::{registry_with, valid_descriptor};
use loader_config::shared::DestinationKind;

/// A loader of `kind` whose sessions are served by `connector`.
pub fn test_loader(
    connector: &TestConnector,
    kind: DestinationKind,
    staging_dir: Option<&Path>,
) -> Loader {
    registry_with(connector)
        .create(&valid_descriptor(kind, staging_dir))
        .unwrap()
}

/// A connected loader of `kind` staging objects into a fresh in-memory store.
pub async fn connected_object_loader(
    kind: DestinationKind,
) -> (Loader, TestConnector, MemoryObjectStore) {
    let store = MemoryObjectStore::new("staging");
    let connector = TestConnector::with_object_store(store.clone());

    let mut loader = test_loader(&connector, kind, None);
    loader.connect().await.unwrap();

    (loader, connector, store)
}
