use std::sync::Once;

use tracing::debug;

static INIT_CRYPTO: Once = Once::new();

/// Installs the AWS LC rustls provider as the process default, once.
///
/// Must run before the first BigQuery client is built. A provider installed earlier by the host
/// application is kept.
pub fn install_crypto_provider() {
    INIT_CRYPTO.call_once(|| {
        if rustls::crypto::aws_lc_rs::default_provider()
            .install_default()
            .is_err()
        {
            debug!("a rustls crypto provider was already installed");
        }
    });
}
