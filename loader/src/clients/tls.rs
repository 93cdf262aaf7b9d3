use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Installs the process-wide rustls crypto provider.
///
/// Installing fails when another component already installed one, which is
/// fine for our purposes.
pub fn install_crypto_provider_once() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    });
}
