//! Plain HTTP responders for delivery tests.

use std::time::Duration;

use bytes::Bytes;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

/// Statuses mounted by [`StatusResponder::start`], one path per status.
pub const CLASSIFIED_STATUSES: [u16; 8] = [200, 400, 401, 403, 404, 422, 429, 502];

/// HTTP server answering `POST /<status>` with that status.
pub struct StatusResponder {
    server: MockServer,
}

impl StatusResponder {
    /// Starts a responder with every status in [`CLASSIFIED_STATUSES`]
    /// mounted.
    pub async fn start() -> Self {
        let responder = Self { server: MockServer::start().await };
        for status in CLASSIFIED_STATUSES {
            responder.mount_status(status).await;
        }
        responder
    }

    /// Mounts `POST /<status>` for an additional status.
    pub async fn mount_status(&self, status: u16) {
        Mock::given(method("POST"))
            .and(path(format!("/{status}")))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
    }

    /// Mounts `POST <route>` answering 200 with `body` after `delay`.
    pub async fn mount_delayed(&self, route: &str, delay: Duration, body: impl Into<Bytes>) {
        let body: Bytes = body.into();
        Mock::given(method("POST"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.to_vec()).set_delay(delay))
            .mount(&self.server)
            .await;
    }

    /// Full URL for `route` on this server.
    pub fn url(&self, route: &str) -> String {
        format!("{}{route}", self.server.uri())
    }

    /// URL for the path mounted for `status`.
    pub fn status_url(&self, status: u16) -> String {
        self.url(&format!("/{status}"))
    }

    /// Underlying wiremock server, for tests that mount their own matchers.
    pub fn server(&self) -> &MockServer {
        &self.server
    }

    /// Number of requests received so far.
    pub async fn received_count(&self) -> usize {
        self.server.received_requests().await.map_or(0, |requests| requests.len())
    }
}
