//! Ephemeral certificate authority for mutual TLS tests.
//!
//! Generates a self-signed CA and leaf certificates valid for ten years, and
//! writes client material in the `ca.crt`/`client.crt`/`client.key` layout
//! that outputs load in production.

use std::{fs, path::Path, sync::Arc};

use anyhow::{Context, Result};
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType,
    ExtendedKeyUsagePurpose, IsCa, KeyPair, KeyUsagePurpose,
};
use rustls::{server::WebPkiClientVerifier, RootCertStore, ServerConfig};
use rustls_pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tempfile::TempDir;
use time::{Duration, OffsetDateTime};

/// Names the server certificate is valid for.
const SERVER_NAMES: [&str; 3] = ["localhost", "127.0.0.1", "::1"];

const VALIDITY_DAYS: i64 = 3650;

/// RSA-2048 client key in PKCS#8, the only encoding rcgen signs with.
const RSA_CLIENT_KEY_PKCS8: &str = include_str!("../fixtures/rsa-client-pkcs8.pem");

/// The same RSA key as a PKCS#1 `RSA PRIVATE KEY` block.
pub const RSA_CLIENT_KEY_PKCS1: &str = include_str!("../fixtures/rsa-client-pkcs1.pem");

/// Whether a test server demands client certificates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientAuth {
    /// Require a certificate signed by the CA.
    Required,
    /// Accept any client.
    None,
}

/// A certificate and its private key.
pub struct IssuedCertificate {
    /// PEM-encoded certificate.
    pub cert_pem: String,
    /// PEM-encoded private key.
    pub key_pem: String,
    cert_der: CertificateDer<'static>,
    key_der: Vec<u8>,
}

impl IssuedCertificate {
    fn new(cert: &Certificate, key: &KeyPair) -> Self {
        Self {
            cert_pem: cert.pem(),
            key_pem: key.serialize_pem(),
            cert_der: cert.der().clone(),
            key_der: key.serialize_der(),
        }
    }

    /// DER-encoded certificate.
    pub fn cert_der(&self) -> CertificateDer<'static> {
        self.cert_der.clone()
    }

    /// DER-encoded private key.
    pub fn key_der(&self) -> PrivateKeyDer<'static> {
        PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(self.key_der.clone()))
    }
}

/// Self-signed CA able to issue server and client certificates.
pub struct CertificateAuthority {
    cert: Certificate,
    key: KeyPair,
}

impl CertificateAuthority {
    /// Generates a fresh CA key and certificate.
    pub fn generate() -> Result<Self> {
        let mut params = CertificateParams::new(Vec::<String>::new())?;
        params.distinguished_name = distinguished_name("Outpost Test CA");
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        set_validity(&mut params);

        let key = KeyPair::generate().context("failed to generate CA key")?;
        let cert = params.self_signed(&key).context("failed to self-sign CA")?;
        Ok(Self { cert, key })
    }

    /// PEM-encoded CA certificate.
    pub fn ca_pem(&self) -> String {
        self.cert.pem()
    }

    /// DER-encoded CA certificate.
    pub fn ca_der(&self) -> CertificateDer<'static> {
        self.cert.der().clone()
    }

    /// Issues a server certificate for localhost and the loopback addresses.
    pub fn issue_server(&self) -> Result<IssuedCertificate> {
        let names: Vec<String> = SERVER_NAMES.iter().map(|n| n.to_string()).collect();
        let mut params = CertificateParams::new(names)?;
        params.distinguished_name = distinguished_name("Outpost Test Server");
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        self.sign(params)
    }

    /// Issues a client certificate.
    pub fn issue_client(&self) -> Result<IssuedCertificate> {
        self.sign(client_params()?)
    }

    /// Issues a client certificate for the bundled RSA key. The returned
    /// `key_pem` is the PKCS#1 encoding.
    pub fn issue_rsa_client(&self) -> Result<IssuedCertificate> {
        let key = KeyPair::from_pem(RSA_CLIENT_KEY_PKCS8).context("failed to load RSA key")?;
        let mut issued = self.sign_with(client_params()?, &key)?;
        issued.key_pem = RSA_CLIENT_KEY_PKCS1.to_string();
        Ok(issued)
    }

    fn sign(&self, params: CertificateParams) -> Result<IssuedCertificate> {
        let key = KeyPair::generate().context("failed to generate leaf key")?;
        self.sign_with(params, &key)
    }

    fn sign_with(&self, mut params: CertificateParams, key: &KeyPair) -> Result<IssuedCertificate> {
        set_validity(&mut params);
        let cert = params.signed_by(key, &self.cert, &self.key).context("failed to sign leaf")?;
        Ok(IssuedCertificate::new(&cert, key))
    }

    /// Writes `ca.crt`, `client.crt` and `client.key` into `dir` and returns
    /// the issued client certificate.
    pub fn write_client_files(&self, dir: &Path) -> Result<IssuedCertificate> {
        let client = self.issue_client()?;
        self.write_files(dir, &client)?;
        Ok(client)
    }

    fn write_files(&self, dir: &Path, client: &IssuedCertificate) -> Result<()> {
        write(&dir.join("ca.crt"), &self.ca_pem())?;
        write(&dir.join("client.crt"), &client.cert_pem)?;
        write(&dir.join("client.key"), &client.key_pem)
    }

    /// Server TLS configuration using a freshly issued server certificate.
    pub fn server_config(&self, client_auth: ClientAuth) -> Result<ServerConfig> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let server = self.issue_server()?;

        let builder = ServerConfig::builder_with_provider(Arc::clone(&provider))
            .with_safe_default_protocol_versions()?;
        let builder = match client_auth {
            ClientAuth::Required => {
                let mut roots = RootCertStore::empty();
                roots.add(self.ca_der())?;
                let verifier =
                    WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider)
                        .build()?;
                builder.with_client_cert_verifier(verifier)
            },
            ClientAuth::None => builder.with_no_client_auth(),
        };

        let config = builder.with_single_cert(vec![server.cert_der()], server.key_der())?;
        Ok(config)
    }
}

/// A CA with client material already written to a temporary directory.
///
/// The directory is removed when the fixture is dropped.
pub struct MutualTlsFixture {
    /// Issuing authority, for building matching server configurations.
    pub ca: CertificateAuthority,
    /// Client certificate written to `client.crt`.
    pub client: IssuedCertificate,
    dir: TempDir,
}

impl MutualTlsFixture {
    /// Generates a CA and writes the client files.
    pub fn provision() -> Result<Self> {
        let dir = tempfile::tempdir().context("failed to create certificate directory")?;
        let ca = CertificateAuthority::generate()?;
        let client = ca.write_client_files(dir.path())?;
        Ok(Self { ca, client, dir })
    }

    /// Like [`provision`](Self::provision), but the client key is RSA and
    /// `client.key` holds it as PKCS#1.
    pub fn provision_rsa_pkcs1() -> Result<Self> {
        let dir = tempfile::tempdir().context("failed to create certificate directory")?;
        let ca = CertificateAuthority::generate()?;
        let client = ca.issue_rsa_client()?;
        ca.write_files(dir.path(), &client)?;
        Ok(Self { ca, client, dir })
    }

    /// Directory holding the client files.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

fn client_params() -> Result<CertificateParams> {
    let mut params = CertificateParams::new(Vec::<String>::new())?;
    params.distinguished_name = distinguished_name("Outpost Test Client");
    params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
    Ok(params)
}

fn distinguished_name(common_name: &str) -> DistinguishedName {
    let mut name = DistinguishedName::new();
    name.push(DnType::OrganizationName, "Outpost");
    name.push(DnType::CountryName, "US");
    name.push(DnType::CommonName, common_name);
    name
}

fn set_validity(params: &mut CertificateParams) {
    let now = OffsetDateTime::now_utc();
    params.not_before = now - Duration::days(1);
    params.not_after = now + Duration::days(VALIDITY_DAYS);
}

fn write(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("failed to write {}", path.display()))
}
