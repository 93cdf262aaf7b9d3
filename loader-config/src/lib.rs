//! Configuration management for the bulk loader.
//!
//! Provides environment detection, configuration loading from YAML files,
//! secret handling, and the typed destination descriptors that every loader
//! is constructed from.

mod environment;
mod load;
mod secret;
pub mod shared;

pub use environment::*;
pub use load::*;
pub use secret::*;
