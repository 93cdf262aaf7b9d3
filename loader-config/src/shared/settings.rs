use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::Config;

/// Settings file of the `bulk-load` binary.
///
/// The destination is kept as a raw map: it is validated by the loader
/// registry, which knows which destination kinds are compiled in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderSettings {
    pub destination: Map<String, Value>,
}

impl LoaderSettings {
    /// Destination descriptor as a JSON value.
    pub fn destination_descriptor(&self) -> Value {
        Value::Object(self.destination.clone())
    }
}

impl Config for LoaderSettings {
    const LIST_PARSE_KEYS: &'static [&'static str] = &[];
}
