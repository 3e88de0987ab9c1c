//! Choice of the rustls [`CryptoProvider`] used when the caller does not
//! supply one.

use rustls::crypto::CryptoProvider;
use std::sync::Arc;

/// The process-global default [`CryptoProvider`] if one is installed,
/// otherwise aws-lc-rs.
pub fn default_crypto_provider() -> Arc<CryptoProvider> {
    CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()))
}
