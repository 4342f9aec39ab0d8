//! Outbound delivery client for event outputs.
//!
//! A [`DeliveryClient`] posts opaque payloads to one configured HTTP(S)
//! endpoint, optionally over mutual TLS, and classifies each response into a
//! fixed set of outcomes that callers use to drive retries, alerting and
//! statistics.
//!
//! # Architecture
//!
//! Construction does all validation up front:
//!
//! 1. **Endpoint** - the address must parse as an absolute URL with a host
//! 2. **Transport** - built once, with client certificate and CA pool when
//!    mutual TLS is enabled
//!
//! Each post then performs exactly one request:
//!
//! 1. **Send** - POST the payload with the configured headers
//! 2. **Classify** - map the status to an [`Outcome`] and a [`PostError`]
//! 3. **Record** - increment the shared [`StatsSink`]s
//!
//! There are no retries, no backoff and no background tasks; callers layer
//! those on top using [`PostError::is_retryable`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use outpost_delivery::{
//!     Config, DeliveryClient, PostError, PromStatistics, Statistics, TlsOptions,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Arc::new(Config::default());
//! let client = DeliveryClient::new(
//!     "webhook",
//!     "https://hooks.example.com/events",
//!     TlsOptions::default(),
//!     config,
//!     Arc::new(Statistics::new()),
//!     Arc::new(PromStatistics::new()),
//! )?;
//!
//! match client.post(r#"{"rule":"Test rule"}"#).await {
//!     Ok(()) => {},
//!     Err(PostError::TooManyRequests) => { /* back off */ },
//!     Err(e) => return Err(e.into()),
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod outcome;
pub mod stats;
pub mod transport;

pub use client::DeliveryClient;
pub use config::{Config, ConfigError, OutputConfig};
pub use error::{BuildError, PostError, Result, TlsError};
pub use outcome::{classify, Outcome};
pub use stats::{PromStatistics, Statistics, StatsSink};
pub use transport::{TlsOptions, Transport, TransportOptions};
