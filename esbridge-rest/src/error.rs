//! Transport error types.

use thiserror::Error;

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Errors raised while executing a request against a cluster node.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The node could not be reached.
    #[error("Connection to [{node}] failed: {message}")]
    Connection {
        /// Target node.
        node: String,
        /// Underlying cause.
        message: String,
    },

    /// The node did not answer within the configured timeout.
    #[error("Request to [{node}] timed out")]
    Timeout {
        /// Target node.
        node: String,
    },

    /// The node answered with a status code >= 300.
    #[error("[{method}] on [{path}] failed; server returned [{status}] [{body}]")]
    Status {
        /// HTTP method.
        method: String,
        /// Request path, including the query string.
        path: String,
        /// HTTP status code.
        status: u16,
        /// Response body, captured for diagnostics.
        body: String,
    },

    /// A node address could not be parsed.
    #[error("Invalid node address: {0}")]
    InvalidAddress(String),

    /// The request could not be built.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The client has been closed.
    #[error("Client is closed")]
    Closed,

    /// Response body could not be decoded.
    #[error("Malformed response body: {0}")]
    Decode(String),

    /// Underlying HTTP client error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl TransportError {
    /// Check if retrying the same request may succeed.
    ///
    /// Connectivity failures, timeouts, 429 and 5xx answers qualify.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection { .. } | Self::Timeout { .. } => true,
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    /// Check if this is a timeout error.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. }) || matches!(self, Self::Http(e) if e.is_timeout())
    }

    /// Check if this is a connection error.
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection { .. }) || matches!(self, Self::Http(e) if e.is_connect())
    }

    /// Get the HTTP status code if the node answered.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Get the captured response body if the node answered with an error.
    pub fn body(&self) -> Option<&str> {
        match self {
            Self::Status { body, .. } => Some(body),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16) -> TransportError {
        TransportError::Status {
            method: "GET".to_string(),
            path: "/idx/_search".to_string(),
            status: code,
            body: "{\"error\":\"boom\"}".to_string(),
        }
    }

    #[test]
    fn test_retryable_classification() {
        assert!(status(503).is_retryable());
        assert!(status(429).is_retryable());
        assert!(!status(404).is_retryable());
        assert!(TransportError::Timeout { node: "a:9200".into() }.is_retryable());
        assert!(!TransportError::Closed.is_retryable());
    }

    #[test]
    fn test_status_message_carries_body() {
        let err = status(400);
        assert_eq!(err.status_code(), Some(400));
        assert_eq!(err.body(), Some("{\"error\":\"boom\"}"));
        assert!(err.to_string().contains("[GET] on [/idx/_search] failed"));
        assert!(err.to_string().contains("boom"));
    }
}
