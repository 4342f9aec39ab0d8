//! Status code classification.

use std::fmt;

use http::StatusCode;

use crate::error::PostError;

/// Result of a single post, as recorded in statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Outcome {
    /// 2xx response.
    Accepted,
    /// 400 response.
    HeaderMissing,
    /// 401 response.
    ClientAuthentication,
    /// 403 response.
    Forbidden,
    /// 404 response.
    NotFound,
    /// 422 response.
    UnprocessableEntity,
    /// 429 response.
    TooManyRequests,
    /// Any other non-2xx response.
    UnexpectedStatus,
    /// No response: connection, TLS or timeout failure.
    Error,
}

impl Outcome {
    /// Number of distinct outcomes.
    pub const COUNT: usize = 9;

    /// Every outcome, in declaration order.
    pub const ALL: [Outcome; Self::COUNT] = [
        Self::Accepted,
        Self::HeaderMissing,
        Self::ClientAuthentication,
        Self::Forbidden,
        Self::NotFound,
        Self::UnprocessableEntity,
        Self::TooManyRequests,
        Self::UnexpectedStatus,
        Self::Error,
    ];

    /// Stable label used as a statistics key.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::HeaderMissing => "header_missing",
            Self::ClientAuthentication => "client_authentication",
            Self::Forbidden => "forbidden",
            Self::NotFound => "not_found",
            Self::UnprocessableEntity => "unprocessable_entity",
            Self::TooManyRequests => "too_many_requests",
            Self::UnexpectedStatus => "unexpected_status",
            Self::Error => "error",
        }
    }

    /// Whether this outcome counts as a successful delivery.
    pub fn is_success(self) -> bool {
        matches!(self, Self::Accepted)
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps a response status to the post result.
///
/// Only 2xx is success. Redirects that reach this point were not followed by
/// the transport and are reported like any other unexpected status.
pub fn classify(status: StatusCode) -> Result<(), PostError> {
    if status.is_success() {
        return Ok(());
    }

    Err(match status {
        StatusCode::BAD_REQUEST => PostError::HeaderMissing,
        StatusCode::UNAUTHORIZED => PostError::ClientAuthentication,
        StatusCode::FORBIDDEN => PostError::Forbidden,
        StatusCode::NOT_FOUND => PostError::NotFound,
        StatusCode::UNPROCESSABLE_ENTITY => PostError::UnprocessableEntity,
        StatusCode::TOO_MANY_REQUESTS => PostError::TooManyRequests,
        other => PostError::unexpected_status(other),
    })
}
