//! Logging and metrics initialization shared by the loader binaries and tests.

pub mod metrics;
pub mod tracing;
