//! Response wrapper.

use crate::{Result, TransportError};
use bytes::Bytes;
use http::StatusCode;
use serde::de::DeserializeOwned;

/// Successful (status < 300) answer of a cluster node.
#[derive(Debug, Clone)]
pub struct RestResponse {
    status: StatusCode,
    body: Bytes,
}

impl RestResponse {
    /// Create a response from its parts.
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Get the status code.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Get the response body as bytes.
    pub fn bytes(&self) -> &Bytes {
        &self.body
    }

    /// Consume the response and return the body.
    pub fn into_bytes(self) -> Bytes {
        self.body
    }

    /// Get the response body as text.
    pub fn text(&self) -> Result<String> {
        String::from_utf8(self.body.to_vec()).map_err(|e| TransportError::Decode(e.to_string()))
    }

    /// Parse the response body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|e| TransportError::Decode(e.to_string()))
    }
}
