//! Bulk loading of in-memory tabular data into databases and warehouses.
//!
//! A [`registry::LoaderRegistry`] turns a destination descriptor into a
//! [`loader::Loader`], which connects to the destination and loads
//! [`types::TabularSource`]s through the destination's native bulk command.
//! Depending on the destination kind the source is streamed, written to a
//! local file, uploaded to object storage, handed to a vendor API or
//! registered with an embedded engine. Staged files and objects never outlive
//! the load that created them.

pub mod bulk;
pub mod clients;
pub mod descriptor;
pub mod destinations;
pub mod encoding;
pub mod error;
pub mod loader;
mod macros;
pub mod metrics;
pub mod registry;
pub mod staging;
pub mod store;
pub mod strategy;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;

pub use loader::{BulkLoadResult, Loader, LoaderState};
pub use registry::LoaderRegistry;
