use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::ops::Deref;

/// Serializable wrapper around [`SecretString`].
///
/// Passwords and tokens in destination descriptors use this type so they are
/// redacted from `Debug` output and log lines.
#[derive(Clone, Debug)]
pub struct SerializableSecretString(SecretString);

impl SerializableSecretString {
    /// Returns the secret value. Call sites should pass it straight to a driver.
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl Deref for SerializableSecretString {
    type Target = SecretString;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<String> for SerializableSecretString {
    fn from(value: String) -> Self {
        Self(value.into())
    }
}

impl From<&str> for SerializableSecretString {
    fn from(value: &str) -> Self {
        Self(value.into())
    }
}

impl From<SerializableSecretString> for SecretString {
    fn from(value: SerializableSecretString) -> Self {
        value.0
    }
}

impl Serialize for SerializableSecretString {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.0.expose_secret())
    }
}

impl<'de> Deserialize<'de> for SerializableSecretString {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let string = String::deserialize(deserializer)?;
        Ok(Self(string.into()))
    }
}
