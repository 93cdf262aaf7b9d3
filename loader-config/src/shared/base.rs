use thiserror::Error;

use crate::shared::DestinationKind;

/// Destination descriptor validation errors.
///
/// Every variant that concerns a single field names it, so callers can surface
/// exactly which key of the descriptor needs fixing.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// The descriptor is not a key/value map.
    #[error("destination descriptor must be a map of settings")]
    NotAMap,
    /// The descriptor has no `kind` entry.
    #[error("destination descriptor is missing the `kind` field")]
    MissingKind,
    /// The `kind` entry does not name a known destination.
    #[error("unknown destination kind `{0}`")]
    UnknownKind(String),
    /// A field required by the destination kind is absent or null.
    #[error("`{field}` is required for {kind} destinations")]
    MissingField {
        kind: DestinationKind,
        field: &'static str,
    },
    /// A field is present but its value is unusable.
    #[error("`{field}` is invalid for {kind} destinations: {reason}")]
    InvalidField {
        kind: DestinationKind,
        field: &'static str,
        reason: String,
    },
    /// The descriptor passed field checks but could not be decoded.
    #[error("malformed {kind} destination descriptor: {reason}")]
    Malformed {
        kind: DestinationKind,
        reason: String,
    },
    /// TLS is enabled but no trusted root certificates are provided.
    #[error("invalid TLS config: `trusted_root_certs` must be set when `enabled` is true")]
    MissingTrustedRootCerts,
}

impl ValidationError {
    /// Returns the descriptor field this error is about, if any.
    pub fn field(&self) -> Option<&str> {
        match self {
            ValidationError::MissingKind | ValidationError::UnknownKind(_) => Some("kind"),
            ValidationError::MissingField { field, .. }
            | ValidationError::InvalidField { field, .. } => Some(field),
            ValidationError::MissingTrustedRootCerts => Some("tls"),
            ValidationError::NotAMap | ValidationError::Malformed { .. } => None,
        }
    }
}
