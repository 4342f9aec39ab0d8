//! Delivery client for a single output.
//!
//! Validates the destination at construction, builds the transport once, and
//! turns every post into exactly one [`Outcome`] that is reported to the
//! statistics sinks and returned to the caller.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use bytes::Bytes;
use http::{
    header::{HeaderName, CONTENT_TYPE},
    HeaderMap, HeaderValue,
};
use tracing::{debug, info, info_span, warn, Instrument};
use url::Url;
use uuid::Uuid;

use crate::{
    config::{Config, OutputConfig, DEFAULT_CONTENT_TYPE},
    error::{BuildError, PostError, Result},
    outcome::{classify, Outcome},
    stats::StatsSink,
    transport::{TlsOptions, Transport},
};

/// Posts payloads to one destination.
///
/// Built once per configured output and shared for the life of the process.
/// `post` takes `&self`, so a client behind an `Arc` can be used from any
/// number of tasks without further locking.
#[derive(Debug)]
pub struct DeliveryClient {
    output_kind: String,
    endpoint: Url,
    tls: TlsOptions,
    config: Arc<Config>,
    stats: Arc<dyn StatsSink>,
    prom_stats: Arc<dyn StatsSink>,
    transport: Transport,
    headers: HeaderMap,
}

impl DeliveryClient {
    /// Creates a client for `address`.
    ///
    /// No network I/O happens here. With mutual TLS enabled the certificate
    /// material is read from `config.mutual_tls_files_path`.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::InvalidEndpoint`] or [`BuildError::MissingHost`]
    /// when `address` is not an absolute URL with a host, and
    /// [`BuildError::Tls`] when mutual TLS material cannot be loaded.
    pub fn new(
        output_kind: impl Into<String>,
        address: &str,
        tls: TlsOptions,
        config: Arc<Config>,
        stats: Arc<dyn StatsSink>,
        prom_stats: Arc<dyn StatsSink>,
    ) -> std::result::Result<Self, BuildError> {
        let endpoint = parse_endpoint(address)?;
        let transport =
            Transport::build(&config.to_transport_options(), tls, &config.mutual_tls_files_path)?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(DEFAULT_CONTENT_TYPE));

        Ok(Self {
            output_kind: output_kind.into(),
            endpoint,
            tls,
            config,
            stats,
            prom_stats,
            transport,
            headers,
        })
    }

    /// Creates a client from an output definition, applying its content type
    /// and extra headers.
    pub fn from_output(
        output: &OutputConfig,
        config: Arc<Config>,
        stats: Arc<dyn StatsSink>,
        prom_stats: Arc<dyn StatsSink>,
    ) -> std::result::Result<Self, BuildError> {
        let mut client = Self::new(
            output.kind.as_str(),
            &output.address,
            output.tls_options(),
            config,
            stats,
            prom_stats,
        )?;

        if let Some(content_type) = &output.content_type {
            client = client.with_content_type(content_type)?;
        }
        for (name, value) in &output.headers {
            client = client.with_header(name, value)?;
        }
        Ok(client)
    }

    /// Replaces the content type sent with every post.
    pub fn with_content_type(self, content_type: &str) -> std::result::Result<Self, BuildError> {
        self.with_header(CONTENT_TYPE.as_str(), content_type)
    }

    /// Adds a header sent with every post, replacing any previous value.
    pub fn with_header(mut self, name: &str, value: &str) -> std::result::Result<Self, BuildError> {
        let invalid = |message: String| BuildError::InvalidHeader { name: name.to_string(), message };

        let header_name =
            HeaderName::from_bytes(name.as_bytes()).map_err(|e| invalid(e.to_string()))?;
        let header_value = HeaderValue::from_str(value).map_err(|e| invalid(e.to_string()))?;

        self.headers.insert(header_name, header_value);
        Ok(self)
    }

    /// Label of this output.
    pub fn output_kind(&self) -> &str {
        &self.output_kind
    }

    /// Destination URL.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Whether the transport presents a client certificate.
    pub fn mutual_tls_enabled(&self) -> bool {
        self.tls.mutual_tls
    }

    /// Whether server certificates are verified without mutual TLS.
    pub fn check_cert(&self) -> bool {
        self.tls.check_cert
    }

    /// Shared configuration this client was built from.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Headers sent with every post.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Posts `payload` once and classifies the response.
    ///
    /// # Errors
    ///
    /// Returns one of the classified [`PostError`] variants for non-2xx
    /// responses, [`PostError::Timeout`] when a configured timeout expires
    /// and [`PostError::Transport`] for any other failure to get a response.
    pub async fn post(&self, payload: impl Into<Bytes>) -> Result<()> {
        self.send(payload.into(), None).await
    }

    /// Same as [`post`](Self::post), bounded by `deadline` in addition to any
    /// transport timeout.
    pub async fn post_with_timeout(
        &self,
        payload: impl Into<Bytes>,
        deadline: Duration,
    ) -> Result<()> {
        self.send(payload.into(), Some(deadline)).await
    }

    async fn send(&self, body: Bytes, deadline: Option<Duration>) -> Result<()> {
        let span = info_span!(
            "output_post",
            output = %self.output_kind,
            endpoint = %self.endpoint,
            post_id = %Uuid::new_v4()
        );

        async move {
            let start_time = Instant::now();
            debug!(bytes = body.len(), "posting payload");

            let mut request =
                self.transport.post(self.endpoint.clone()).headers(self.headers.clone()).body(body);
            if let Some(deadline) = deadline {
                request = request.timeout(deadline);
            }

            let result = match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    debug!(status = status.as_u16(), "received response");

                    // Read the body to the end so the connection returns to the pool.
                    if let Err(e) = response.bytes().await {
                        debug!(error = %e, "failed to drain response body");
                    }
                    classify(status)
                },
                Err(e) => Err(PostError::from(e)),
            };

            let outcome = match &result {
                Ok(()) => Outcome::Accepted,
                Err(e) => e.outcome(),
            };
            self.stats.record(&self.output_kind, outcome);
            self.prom_stats.record(&self.output_kind, outcome);

            let duration_ms = start_time.elapsed().as_millis();
            match &result {
                Ok(()) => info!(duration_ms, "post delivered"),
                Err(e) => warn!(duration_ms, %outcome, error = %e, "post failed"),
            }

            result
        }
        .instrument(span)
        .await
    }
}

fn parse_endpoint(address: &str) -> std::result::Result<Url, BuildError> {
    let endpoint = Url::parse(address)
        .map_err(|source| BuildError::InvalidEndpoint { address: address.to_string(), source })?;

    if endpoint.host_str().map_or(true, str::is_empty) {
        return Err(BuildError::MissingHost { address: address.to_string() });
    }
    Ok(endpoint)
}
