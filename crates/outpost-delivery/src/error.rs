//! Error types for output delivery.
//!
//! Construction failures ([`BuildError`], [`TlsError`]) are kept apart from
//! send failures ([`PostError`]) so that a misconfigured output can never be
//! mistaken for a delivery that the remote endpoint rejected.

use std::{io, path::PathBuf};

use http::StatusCode;
use thiserror::Error;

use crate::outcome::Outcome;

/// Result type alias for send operations.
pub type Result<T> = std::result::Result<T, PostError>;

/// Errors raised while constructing a [`DeliveryClient`](crate::DeliveryClient).
#[derive(Debug, Error)]
pub enum BuildError {
    /// The destination address is not a well-formed absolute URL.
    #[error("invalid endpoint URL {address:?}: {source}")]
    InvalidEndpoint {
        /// Address as configured
        address: String,
        /// Parser failure
        #[source]
        source: url::ParseError,
    },

    /// The destination address parsed but names no host to connect to.
    #[error("endpoint URL {address:?} has no host")]
    MissingHost {
        /// Address as configured
        address: String,
    },

    /// Mutual TLS material could not be loaded.
    #[error(transparent)]
    Tls(#[from] TlsError),

    /// A configured header name or value is not valid HTTP.
    #[error("invalid header {name:?}: {message}")]
    InvalidHeader {
        /// Header name as configured
        name: String,
        /// Reason the header was rejected
        message: String,
    },

    /// The HTTP stack refused the transport configuration.
    #[error("failed to build HTTP transport: {0}")]
    Transport(#[source] reqwest::Error),
}

/// Errors raised while loading mutual TLS material from disk.
#[derive(Debug, Error)]
pub enum TlsError {
    /// File is missing or unreadable.
    #[error("failed to read {}: {source}", path.display())]
    ReadFile {
        /// File that could not be read
        path: PathBuf,
        /// Underlying I/O failure
        #[source]
        source: io::Error,
    },

    /// File contains a PEM section that does not decode.
    #[error("malformed PEM in {}: {source}", path.display())]
    MalformedPem {
        /// Offending file
        path: PathBuf,
        /// Decoder failure
        #[source]
        source: rustls_pki_types::pem::Error,
    },

    /// File holds no `CERTIFICATE` section.
    #[error("no certificates found in {}", path.display())]
    NoCertificates {
        /// Offending file
        path: PathBuf,
    },

    /// File holds no private key section.
    #[error("no private key found in {}", path.display())]
    NoPrivateKey {
        /// Offending file
        path: PathBuf,
    },

    /// A certificate from the CA bundle was rejected as a trust anchor.
    #[error("invalid CA certificate in {}: {source}", path.display())]
    InvalidCaCertificate {
        /// CA bundle
        path: PathBuf,
        /// Rejection reason
        #[source]
        source: rustls::Error,
    },

    /// The private key does not belong to the client certificate.
    #[error("private key {} does not match certificate {}", key_path.display(), cert_path.display())]
    KeyMismatch {
        /// Client certificate
        cert_path: PathBuf,
        /// Client private key
        key_path: PathBuf,
    },

    /// The client certificate decoded from PEM but is not a valid
    /// certificate.
    #[error("invalid client certificate in {}: {source}", path.display())]
    InvalidClientCertificate {
        /// Client certificate
        path: PathBuf,
        /// Parse failure
        #[source]
        source: rustls::Error,
    },

    /// The client certificate or key was rejected by the TLS stack.
    #[error("client certificate rejected: {0}")]
    ClientCertificate(#[source] rustls::Error),

    /// The TLS stack could not be configured.
    #[error("TLS configuration failed: {0}")]
    Config(#[source] rustls::Error),
}

/// Failure of a single post to an output.
///
/// Every HTTP status other than 2xx maps to exactly one variant. Transport
/// failures carry the underlying [`reqwest::Error`] untouched.
#[derive(Debug, Error)]
pub enum PostError {
    /// The endpoint answered 400.
    #[error("header missing")]
    HeaderMissing,

    /// The endpoint answered 401.
    #[error("authentication error")]
    ClientAuthentication,

    /// The endpoint answered 403.
    #[error("access denied")]
    Forbidden,

    /// The endpoint answered 404.
    #[error("resource not found")]
    NotFound,

    /// The endpoint answered 422.
    #[error("bad request")]
    UnprocessableEntity,

    /// The endpoint answered 429.
    #[error("exceeding post rate limit")]
    TooManyRequests,

    /// The endpoint answered any other non-2xx status.
    #[error("{status_line}")]
    UnexpectedStatus {
        /// Status received
        status: StatusCode,
        /// Status line text, such as `502 Bad Gateway`
        status_line: String,
    },

    /// The request did not complete before its deadline.
    #[error(transparent)]
    Timeout(reqwest::Error),

    /// Connection, DNS or TLS handshake failure.
    #[error(transparent)]
    Transport(reqwest::Error),
}

impl PostError {
    /// Creates the generic error for an unclassified status.
    pub fn unexpected_status(status: StatusCode) -> Self {
        let status_line = match status.canonical_reason() {
            Some(reason) => format!("{} {reason}", status.as_u16()),
            None => status.as_u16().to_string(),
        };
        Self::UnexpectedStatus { status, status_line }
    }

    /// Returns the outcome recorded in statistics for this error.
    pub fn outcome(&self) -> Outcome {
        match self {
            Self::HeaderMissing => Outcome::HeaderMissing,
            Self::ClientAuthentication => Outcome::ClientAuthentication,
            Self::Forbidden => Outcome::Forbidden,
            Self::NotFound => Outcome::NotFound,
            Self::UnprocessableEntity => Outcome::UnprocessableEntity,
            Self::TooManyRequests => Outcome::TooManyRequests,
            Self::UnexpectedStatus { .. } => Outcome::UnexpectedStatus,
            Self::Timeout(_) | Self::Transport(_) => Outcome::Error,
        }
    }

    /// Returns the HTTP status behind this error, if a response was received.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::HeaderMissing => Some(StatusCode::BAD_REQUEST),
            Self::ClientAuthentication => Some(StatusCode::UNAUTHORIZED),
            Self::Forbidden => Some(StatusCode::FORBIDDEN),
            Self::NotFound => Some(StatusCode::NOT_FOUND),
            Self::UnprocessableEntity => Some(StatusCode::UNPROCESSABLE_ENTITY),
            Self::TooManyRequests => Some(StatusCode::TOO_MANY_REQUESTS),
            Self::UnexpectedStatus { status, .. } => Some(*status),
            Self::Timeout(_) | Self::Transport(_) => None,
        }
    }

    /// Determines whether a caller may reasonably try the same post again.
    ///
    /// Returns `true` for transport failures, timeouts, rate limiting and
    /// 5xx responses. Returns `false` for the classified client errors, which
    /// will fail the same way until the payload or credentials change.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Transport(_) | Self::TooManyRequests => true,
            Self::UnexpectedStatus { status, .. } => status.is_server_error(),
            Self::HeaderMissing
            | Self::ClientAuthentication
            | Self::Forbidden
            | Self::NotFound
            | Self::UnprocessableEntity => false,
        }
    }
}

impl From<reqwest::Error> for PostError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout(error)
        } else {
            Self::Transport(error)
        }
    }
}
