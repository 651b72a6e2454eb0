use thiserror::Error;

/// Errors produced by upstream connectors.
///
/// The dispatch loop keys its failover behavior off these variants: 429
/// advances immediately, 5xx retries the same connector with backoff,
/// timeouts and network errors advance immediately.
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("upstream rate limited")]
    RateLimited {
        /// Seconds the upstream asked us to wait, if it said.
        retry_after: Option<u64>,
    },

    #[error("upstream returned {status}: {message}")]
    Server { status: u16, message: String },

    #[error("upstream request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    /// The upstream answered with something the adapter cannot parse.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A client-side (4xx) rejection other than 429; not retried.
    #[error("upstream rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("secret resolution failed: {0}")]
    Secret(String),
}

impl ConnectorError {
    /// Classify a transport error from the HTTP client.
    #[must_use]
    pub fn from_transport(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Network(err.to_string())
        }
    }

    /// Classify a non-success upstream status.
    #[must_use]
    pub fn from_status(status: u16, message: String, retry_after: Option<u64>) -> Self {
        match status {
            429 => Self::RateLimited { retry_after },
            500..=599 => Self::Server { status, message },
            _ => Self::Rejected { status, message },
        }
    }
}
