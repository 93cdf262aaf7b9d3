use serde::{Deserialize, Serialize};
use tokio_postgres::{Config as TokioPgConnectOptions, config::SslMode as TokioPgSslMode};

use crate::SerializableSecretString;
use crate::shared::ValidationError;

/// Connection settings for a server speaking the Postgres wire protocol.
///
/// Shared by the PostgreSQL and Redshift destinations.
#[derive(Debug, Clone)]
pub struct PgConnectionConfig {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub username: String,
    pub password: Option<SerializableSecretString>,
    pub tls: TlsConfig,
}

/// TLS settings for Postgres-protocol connections.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TlsConfig {
    /// PEM-encoded trusted root certificates.
    #[serde(default)]
    pub trusted_root_certs: String,
    #[serde(default)]
    pub enabled: bool,
}

impl TlsConfig {
    /// Returns [`ValidationError::MissingTrustedRootCerts`] when TLS is enabled
    /// without any root certificate.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.enabled && self.trusted_root_certs.trim().is_empty() {
            return Err(ValidationError::MissingTrustedRootCerts);
        }

        Ok(())
    }
}

/// Converts centralized connection settings into driver specific options.
pub trait IntoConnectOptions<Output> {
    /// Options targeting the configured database.
    fn with_db(&self) -> Output;
}

impl IntoConnectOptions<TokioPgConnectOptions> for PgConnectionConfig {
    fn with_db(&self) -> TokioPgConnectOptions {
        let ssl_mode = if self.tls.enabled {
            TokioPgSslMode::Require
        } else {
            TokioPgSslMode::Prefer
        };

        let mut config = TokioPgConnectOptions::new();
        config
            .host(self.host.clone())
            .port(self.port)
            .user(self.username.clone())
            .dbname(self.name.clone())
            .application_name("bulk-loader")
            // Certificates are verified by the rustls connector, the driver only
            // needs to know whether to negotiate TLS at all.
            .ssl_mode(ssl_mode);

        if let Some(password) = &self.password {
            config.password(password.expose());
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pg_config(tls: TlsConfig) -> PgConnectionConfig {
        PgConnectionConfig {
            host: "db.internal".to_string(),
            port: 6543,
            name: "analytics".to_string(),
            username: "loader".to_string(),
            password: Some("secret".into()),
            tls,
        }
    }

    #[test]
    fn tokio_postgres_options_carry_all_settings() {
        let options: TokioPgConnectOptions = pg_config(TlsConfig::default()).with_db();

        assert_eq!(options.get_ports(), &[6543]);
        assert_eq!(options.get_user(), Some("loader"));
        assert_eq!(options.get_dbname(), Some("analytics"));
        assert_eq!(options.get_password(), Some("secret".as_bytes()));
        assert_eq!(options.get_ssl_mode(), TokioPgSslMode::Prefer);
    }

    #[test]
    fn tls_requires_root_certificates() {
        let tls = TlsConfig {
            trusted_root_certs: String::new(),
            enabled: true,
        };
        assert!(matches!(
            tls.validate(),
            Err(ValidationError::MissingTrustedRootCerts)
        ));

        let options: TokioPgConnectOptions = pg_config(tls).with_db();
        assert_eq!(options.get_ssl_mode(), TokioPgSslMode::Require);
    }
}
