//! HTTP transport construction, with optional mutual TLS.
//!
//! A transport is built once per output and shared by every post from that
//! output. Connection pooling is left to `reqwest`.
//!
//! With mutual TLS enabled the transport presents `client.crt`/`client.key`
//! on every handshake and trusts only the certificates in `ca.crt`. Any
//! problem with that material fails construction; there is no fallback to a
//! plain transport.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use rustls::{crypto::CryptoProvider, sign::CertifiedKey, InconsistentKeys, RootCertStore};
use rustls_pki_types::{pem::PemObject, CertificateDer, PrivateKeyDer};
use tracing::{debug, warn};
use url::Url;

use crate::error::{BuildError, TlsError};

/// CA bundle used to verify the server.
pub const CA_FILE: &str = "ca.crt";
/// Client certificate chain presented to the server.
pub const CLIENT_CERT_FILE: &str = "client.crt";
/// Private key for [`CLIENT_CERT_FILE`].
pub const CLIENT_KEY_FILE: &str = "client.key";

/// TLS behaviour of one output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlsOptions {
    /// Present a client certificate and trust only the configured CA.
    pub mutual_tls: bool,
    /// Verify the server certificate. Only consulted when `mutual_tls` is
    /// off; mutual TLS always verifies the server against its CA.
    pub check_cert: bool,
}

impl Default for TlsOptions {
    fn default() -> Self {
        Self { mutual_tls: false, check_cert: true }
    }
}

/// Settings applied to every transport regardless of TLS mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportOptions {
    /// Whole-request timeout.
    pub timeout: Option<Duration>,
    /// Connect timeout.
    pub connect_timeout: Option<Duration>,
    /// User agent header value.
    pub user_agent: String,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            connect_timeout: None,
            user_agent: concat!("outpost/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Locations of the mutual TLS material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutualTlsFiles {
    /// CA bundle.
    pub ca: PathBuf,
    /// Client certificate chain.
    pub cert: PathBuf,
    /// Client private key.
    pub key: PathBuf,
}

impl MutualTlsFiles {
    /// Standard file names inside `dir`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            ca: dir.join(CA_FILE),
            cert: dir.join(CLIENT_CERT_FILE),
            key: dir.join(CLIENT_KEY_FILE),
        }
    }
}

/// A ready HTTP client. Cheap to clone, clones share the connection pool.
#[derive(Debug, Clone)]
pub struct Transport {
    client: reqwest::Client,
}

impl Transport {
    /// Builds a transport for the given TLS mode.
    ///
    /// `mutual_tls_dir` is only read when `tls.mutual_tls` is set.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::Tls`] when mutual TLS material is missing,
    /// malformed or inconsistent, and [`BuildError::Transport`] when
    /// `reqwest` rejects the configuration.
    pub fn build(
        options: &TransportOptions,
        tls: TlsOptions,
        mutual_tls_dir: &Path,
    ) -> Result<Self, BuildError> {
        let mut builder = reqwest::Client::builder().user_agent(options.user_agent.as_str());

        if let Some(timeout) = options.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(connect_timeout) = options.connect_timeout {
            builder = builder.connect_timeout(connect_timeout);
        }

        if tls.mutual_tls {
            let files = MutualTlsFiles::in_dir(mutual_tls_dir);
            let tls_config = load_client_config(&files)?;
            if !tls.check_cert {
                warn!(
                    dir = %mutual_tls_dir.display(),
                    "check_cert is ignored with mutual TLS, server is verified against the configured CA"
                );
            }
            builder = builder.use_preconfigured_tls(tls_config);
        } else if !tls.check_cert {
            warn!("server certificate verification disabled");
            builder = builder.danger_accept_invalid_certs(true);
        }

        let client = builder.build().map_err(BuildError::Transport)?;
        Ok(Self { client })
    }

    /// Starts a POST request to `url`.
    pub(crate) fn post(&self, url: Url) -> reqwest::RequestBuilder {
        self.client.post(url)
    }
}

/// Builds the rustls client configuration for mutual TLS.
///
/// # Errors
///
/// Each failure names the file involved: unreadable files, PEM that does not
/// decode, files without the expected sections, a CA certificate rustls
/// refuses as trust anchor, and a key that does not belong to the client
/// certificate.
pub fn load_client_config(files: &MutualTlsFiles) -> Result<rustls::ClientConfig, TlsError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());

    let roots = load_root_store(&files.ca)?;
    let chain = load_certificates(&files.cert)?;
    let key = load_private_key(&files.key)?;
    ensure_key_matches(&provider, &chain, &key, files)?;

    debug!(
        ca = %files.ca.display(),
        cert = %files.cert.display(),
        trust_anchors = roots.len(),
        "loaded mutual TLS material"
    );

    rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(TlsError::Config)?
        .with_root_certificates(roots)
        .with_client_auth_cert(chain, key)
        .map_err(TlsError::ClientCertificate)
}

fn read_file(path: &Path) -> Result<Vec<u8>, TlsError> {
    fs::read(path).map_err(|source| TlsError::ReadFile { path: path.to_path_buf(), source })
}

fn load_certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let pem = read_file(path)?;
    let certs = CertificateDer::pem_slice_iter(&pem)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::MalformedPem { path: path.to_path_buf(), source })?;

    if certs.is_empty() {
        return Err(TlsError::NoCertificates { path: path.to_path_buf() });
    }
    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let pem = read_file(path)?;
    PrivateKeyDer::from_pem_slice(&pem).map_err(|source| match source {
        rustls_pki_types::pem::Error::NoItemsFound => {
            TlsError::NoPrivateKey { path: path.to_path_buf() }
        },
        source => TlsError::MalformedPem { path: path.to_path_buf(), source },
    })
}

fn load_root_store(path: &Path) -> Result<RootCertStore, TlsError> {
    let mut roots = RootCertStore::empty();
    for cert in load_certificates(path)? {
        roots
            .add(cert)
            .map_err(|source| TlsError::InvalidCaCertificate { path: path.to_path_buf(), source })?;
    }
    Ok(roots)
}

fn ensure_key_matches(
    provider: &CryptoProvider,
    chain: &[CertificateDer<'static>],
    key: &PrivateKeyDer<'static>,
    files: &MutualTlsFiles,
) -> Result<(), TlsError> {
    let signing_key =
        provider.key_provider.load_private_key(key.clone_key()).map_err(TlsError::ClientCertificate)?;

    match CertifiedKey::new(chain.to_vec(), signing_key).keys_match() {
        // Keys that cannot expose their public half are accepted as-is.
        Ok(()) | Err(rustls::Error::InconsistentKeys(InconsistentKeys::Unknown)) => Ok(()),
        Err(rustls::Error::InconsistentKeys(InconsistentKeys::KeyMismatch)) => {
            Err(TlsError::KeyMismatch { cert_path: files.cert.clone(), key_path: files.key.clone() })
        },
        Err(source) => Err(TlsError::InvalidClientCertificate { path: files.cert.clone(), source }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mutual_tls_files_use_standard_names() {
        let files = MutualTlsFiles::in_dir("/etc/certs");
        assert_eq!(files.ca, PathBuf::from("/etc/certs/ca.crt"));
        assert_eq!(files.cert, PathBuf::from("/etc/certs/client.crt"));
        assert_eq!(files.key, PathBuf::from("/etc/certs/client.key"));
    }

    #[test]
    fn missing_ca_file_is_reported_first() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_client_config(&MutualTlsFiles::in_dir(dir.path())).unwrap_err();

        match err {
            TlsError::ReadFile { path, .. } => assert_eq!(path, dir.path().join(CA_FILE)),
            other => panic!("expected ReadFile, got {other:?}"),
        }
    }

    #[test]
    fn file_without_certificates_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CA_FILE);
        fs::write(&path, "this is not a certificate\n").unwrap();

        assert!(matches!(load_certificates(&path), Err(TlsError::NoCertificates { .. })));
    }

    #[test]
    fn file_without_private_key_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CLIENT_KEY_FILE);
        fs::write(&path, "").unwrap();

        assert!(matches!(load_private_key(&path), Err(TlsError::NoPrivateKey { .. })));
    }

    #[test]
    fn bad_base64_in_pem_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CA_FILE);
        fs::write(&path, "-----BEGIN CERTIFICATE-----\n!!!!\n-----END CERTIFICATE-----\n").unwrap();

        match load_certificates(&path) {
            Err(TlsError::MalformedPem { path: reported, .. }) => assert_eq!(reported, path),
            other => panic!("expected MalformedPem, got {other:?}"),
        }
    }

    #[test]
    fn default_transport_builds_without_tls_material() {
        let dir = tempfile::tempdir().unwrap();
        let transport =
            Transport::build(&TransportOptions::default(), TlsOptions::default(), dir.path());
        assert!(transport.is_ok());

        let insecure = TlsOptions { mutual_tls: false, check_cert: false };
        assert!(Transport::build(&TransportOptions::default(), insecure, dir.path()).is_ok());
    }
}
