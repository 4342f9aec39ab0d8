//! Test infrastructure for outpost delivery tests.
//!
//! Provides an ephemeral certificate authority, an HTTPS server that can
//! demand client certificates, and plain HTTP status responders. Certificate
//! generation lives here only; production code loads existing files.

#![forbid(unsafe_code)]

pub mod certs;
pub mod http;
pub mod tls_server;

pub use certs::{
    CertificateAuthority, ClientAuth, IssuedCertificate, MutualTlsFixture, RSA_CLIENT_KEY_PKCS1,
};
pub use http::{StatusResponder, CLASSIFIED_STATUSES};
pub use tls_server::TlsTestServer;
use tracing_subscriber::EnvFilter;

/// Installs a test-friendly tracing subscriber once per process.
///
/// Honours `RUST_LOG`, defaulting to `warn,outpost_delivery=debug`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,outpost_delivery=debug")),
        )
        .with_test_writer()
        .try_init();
}
