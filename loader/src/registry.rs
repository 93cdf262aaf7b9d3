use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use loader_config::shared::{DestinationConfig, DestinationKind, parse_kind};
use serde_json::Value;
use tracing::debug;

use crate::bail;
use crate::bulk::Connector;
use crate::descriptor::DestinationDescriptor;
use crate::error::{ErrorKind, LoadResult};
use crate::loader::Loader;

/// Builds the connector of one destination kind from its descriptor.
///
/// Constructors must not perform I/O.
pub type LoaderConstructor =
    Arc<dyn Fn(&DestinationDescriptor) -> LoadResult<Box<dyn Connector>> + Send + Sync>;

/// Maps destination kinds to loader constructors.
///
/// Built once at start up, usually with [`LoaderRegistry::with_builtin_backends`],
/// and only read afterwards. It can be shared freely once populated.
#[derive(Clone, Default)]
pub struct LoaderRegistry {
    constructors: BTreeMap<DestinationKind, LoaderConstructor>,
}

impl LoaderRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every destination compiled into this crate, in
    /// [`DestinationKind::ALL`] order.
    pub fn with_builtin_backends() -> Self {
        let mut registry = Self::new();
        crate::destinations::register_builtin(&mut registry);
        registry
    }

    /// Adds a destination kind. Fails with [`ErrorKind::DuplicateBackend`] if
    /// the kind is already registered.
    pub fn register<F>(&mut self, kind: DestinationKind, constructor: F) -> LoadResult<()>
    where
        F: Fn(&DestinationDescriptor) -> LoadResult<Box<dyn Connector>> + Send + Sync + 'static,
    {
        if self.is_registered(kind) {
            bail!(
                ErrorKind::DuplicateBackend,
                "Destination kind is already registered",
                kind
            );
        }

        self.insert(kind, Arc::new(constructor));
        Ok(())
    }

    pub(crate) fn insert(&mut self, kind: DestinationKind, constructor: LoaderConstructor) {
        debug!(%kind, "registering destination kind");
        self.constructors.insert(kind, constructor);
    }

    pub fn is_registered(&self, kind: DestinationKind) -> bool {
        self.constructors.contains_key(&kind)
    }

    /// Registered kinds, in [`DestinationKind`] order.
    pub fn kinds(&self) -> impl Iterator<Item = DestinationKind> + '_ {
        self.constructors.keys().copied()
    }

    /// Validates a raw descriptor and returns an unconnected loader for it.
    ///
    /// Fails with [`ErrorKind::UnknownBackend`] when the kind is not
    /// registered and with [`ErrorKind::InvalidConfig`], naming the field,
    /// when the descriptor does not fit the kind's schema. No I/O happens.
    pub fn create(&self, raw: &Value) -> LoadResult<Loader> {
        let kind = parse_kind(raw)?;
        let constructor = self.constructor(kind)?;
        let descriptor = DestinationDescriptor::from_raw_with_kind(kind, raw)?;

        Self::build(constructor, descriptor)
    }

    /// Like [`LoaderRegistry::create`], from an already typed configuration.
    pub fn create_from_config(&self, config: DestinationConfig) -> LoadResult<Loader> {
        let constructor = self.constructor(config.kind())?;
        let descriptor = DestinationDescriptor::from_config(config)?;

        Self::build(constructor, descriptor)
    }

    fn constructor(&self, kind: DestinationKind) -> LoadResult<&LoaderConstructor> {
        match self.constructors.get(&kind) {
            Some(constructor) => Ok(constructor),
            None => bail!(
                ErrorKind::UnknownBackend,
                "Destination kind is not registered",
                kind
            ),
        }
    }

    fn build(
        constructor: &LoaderConstructor,
        descriptor: DestinationDescriptor,
    ) -> LoadResult<Loader> {
        let connector = constructor(&descriptor)?;
        Ok(Loader::new(descriptor, connector))
    }
}

impl fmt::Debug for LoaderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoaderRegistry")
            .field("kinds", &self.constructors.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::loader::LoaderState;
    use crate::test_utils::TestConnector;

    fn test_registry() -> LoaderRegistry {
        let mut registry = LoaderRegistry::new();
        registry
            .register(DestinationKind::Sqlite, |_| {
                Ok(Box::new(TestConnector::new()) as Box<dyn Connector>)
            })
            .unwrap();
        registry
    }

    #[test]
    fn registering_a_kind_twice_fails() {
        let mut registry = test_registry();
        let err = registry
            .register(DestinationKind::Sqlite, |_| {
                Ok(Box::new(TestConnector::new()) as Box<dyn Connector>)
            })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DuplicateBackend);
    }

    #[test]
    fn create_returns_a_disconnected_loader() {
        let loader = test_registry()
            .create(&json!({ "kind": "sqlite", "path": ":memory:" }))
            .unwrap();
        assert_eq!(loader.kind(), DestinationKind::Sqlite);
        assert_eq!(loader.state(), LoaderState::Disconnected);
    }

    #[test]
    fn create_rejects_unknown_and_unregistered_kinds() {
        let registry = test_registry();

        let err = registry.create(&json!({ "kind": "nonexistent" })).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownBackend);

        // Known to the schema but not registered here.
        let err = registry
            .create(&json!({ "kind": "duckdb", "path": ":memory:" }))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownBackend);
    }

    #[test]
    fn create_names_the_missing_field() {
        let err = test_registry()
            .create(&json!({ "kind": "sqlite" }))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);
        assert!(err.detail().unwrap().contains("path"));

        let err = test_registry()
            .create(&json!({ "kind": "sqlite", "path": null }))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);
    }

    #[test]
    fn builtin_backends_follow_kind_order() {
        let registry = LoaderRegistry::with_builtin_backends();
        let kinds: Vec<DestinationKind> = registry.kinds().collect();
        let expected: Vec<DestinationKind> = DestinationKind::ALL
            .into_iter()
            .filter(|kind| registry.is_registered(*kind))
            .collect();
        assert_eq!(kinds, expected);
        #[cfg(feature = "sqlite")]
        assert!(registry.is_registered(DestinationKind::Sqlite));
    }
}
