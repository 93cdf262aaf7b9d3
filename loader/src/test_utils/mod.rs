//! Test doubles and fixtures for exercising loaders without a real
//! destination.

mod connector;
pub mod fixtures;

pub use connector::{RecordedInput, RecordedLoad, TestConnector, TestExecutor};
