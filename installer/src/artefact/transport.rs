//! HTTP transport for package archive retrieval.
//!
//! Provides a trait-based abstraction over opening a remote archive as a
//! byte stream, so the downloader's retry, progress, and cancellation logic
//! can be exercised without network access.

use std::fmt;
use std::io::Read;
use std::time::Duration;

/// An open response body ready to be streamed.
pub struct TransportResponse {
    /// The advertised body length, when the server sent one.
    pub content_length: Option<u64>,
    /// The response body.
    pub body: Box<dyn Read + Send>,
}

impl TransportResponse {
    /// Wrap an in-memory payload, advertising its length.
    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            content_length: u64::try_from(bytes.len()).ok(),
            body: Box::new(std::io::Cursor::new(bytes)),
        }
    }
}

impl fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportResponse")
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Trait for opening remote archives.
///
/// # Examples
///
/// ```
/// use runtime_installer::artefact::transport::HttpTransport;
/// use std::time::Duration;
///
/// let transport = HttpTransport::new(Duration::from_secs(30));
/// // Use transport.open("https://...") in production
/// ```
#[cfg_attr(test, mockall::automock)]
pub trait Transport: Send + Sync {
    /// Open `url` for reading.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server rejects it.
    fn open(&self, url: &str) -> Result<TransportResponse, TransportError>;
}

/// Errors arising from a single transport attempt.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The server answered with a non-success status.
    #[error("HTTP status {status}")]
    Status {
        /// The HTTP status code.
        status: u16,
    },

    /// The URL could not be used for a request.
    #[error("invalid URL: {reason}")]
    InvalidUrl {
        /// Description of the problem with the URL.
        reason: String,
    },

    /// The attempt exceeded its timeout.
    #[error("request timed out")]
    Timeout,

    /// The connection could not be established or was dropped.
    #[error("connection failed: {reason}")]
    Connection {
        /// Description of the connection failure.
        reason: String,
    },

    /// Reading the response body failed.
    #[error("I/O error reading response: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Whether another attempt could plausibly succeed.
    ///
    /// Client errors (4xx) other than request timeouts and rate limiting
    /// are final, as are malformed URLs.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Status { status } => matches!(status, 408 | 429) || *status >= 500,
            Self::InvalidUrl { .. } => false,
            Self::Timeout | Self::Connection { .. } | Self::Io(_) => true,
        }
    }
}

/// HTTP transport using `ureq`.
pub struct HttpTransport {
    agent: ureq::Agent,
}

impl HttpTransport {
    /// Create a transport whose attempts time out after `attempt_timeout`.
    #[must_use]
    pub fn new(attempt_timeout: Duration) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(attempt_timeout))
            .build();
        Self {
            agent: ureq::Agent::new_with_config(config),
        }
    }
}

impl Transport for HttpTransport {
    fn open(&self, url: &str) -> Result<TransportResponse, TransportError> {
        if !(url.starts_with("https://") || url.starts_with("http://")) {
            return Err(TransportError::InvalidUrl {
                reason: format!("unsupported scheme in {url}"),
            });
        }
        let response = self.agent.get(url).call().map_err(|e| map_ureq_error(&e))?;
        let content_length = response
            .headers()
            .get("content-length")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok());
        Ok(TransportResponse {
            content_length,
            body: Box::new(response.into_body().into_reader()),
        })
    }
}

fn map_ureq_error(err: &ureq::Error) -> TransportError {
    match err {
        ureq::Error::StatusCode(status) => TransportError::Status { status: *status },
        ureq::Error::BadUri(reason) => TransportError::InvalidUrl {
            reason: reason.clone(),
        },
        ureq::Error::Timeout(_) => TransportError::Timeout,
        other => TransportError::Connection {
            reason: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::not_found(404, false)]
    #[case::forbidden(403, false)]
    #[case::request_timeout(408, true)]
    #[case::rate_limited(429, true)]
    #[case::server_error(500, true)]
    #[case::bad_gateway(502, true)]
    fn status_retryability(#[case] status: u16, #[case] retryable: bool) {
        assert_eq!(
            TransportError::Status { status }.is_retryable(),
            retryable
        );
    }

    #[test]
    fn invalid_url_is_final() {
        let err = TransportError::InvalidUrl {
            reason: "no host".to_owned(),
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn map_ureq_error_maps_status_codes() {
        let mapped = map_ureq_error(&ureq::Error::StatusCode(404));
        assert!(matches!(mapped, TransportError::Status { status: 404 }));
    }

    #[test]
    fn http_transport_rejects_non_http_scheme() {
        let transport = HttpTransport::new(Duration::from_secs(1));
        let err = transport
            .open("ftp://example.test/archive.zip")
            .expect_err("expected scheme rejection");
        assert!(matches!(err, TransportError::InvalidUrl { .. }));
    }

    #[test]
    fn from_bytes_advertises_length() {
        let response = TransportResponse::from_bytes(vec![1, 2, 3]);
        assert_eq!(response.content_length, Some(3));
    }
}
