//! # esbridge REST transport
//!
//! Blocking request/response execution against individual nodes of a
//! search cluster.
//!
//! ## Features
//!
//! - **Per-node pooling**: one connection pool per target node, released on
//!   [`Transport::close`]
//! - **Typed failures**: connection failures, timeouts and status codes
//!   >= 300 (with the response body attached) surface as [`TransportError`]
//! - **No hidden retries**: [`RetryPolicy`] is applied explicitly by callers
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use esbridge_rest::{NodeAddress, RestClient, RestConfig, RestRequest, Transport};
//! use std::time::Duration;
//!
//! let client = RestClient::new(
//!     RestConfig::builder().timeout(Duration::from_secs(30)).build(),
//! )?;
//! let node = NodeAddress::parse("localhost:9200", 9200)?;
//!
//! let response = client.execute(&node, RestRequest::get("/_nodes/http"))?;
//! println!("Status: {}", response.status());
//!
//! client.close();
//! # Ok::<(), esbridge_rest::TransportError>(())
//! ```

#![warn(missing_docs)]

mod client;
mod config;
mod error;
mod node;
mod request;
mod response;
pub mod retry;

pub use client::{RestClient, Transport};
pub use config::{RestConfig, RestConfigBuilder};
pub use error::{Result, TransportError};
pub use node::{DEFAULT_PORT, NodeAddress, Scheme};
pub use request::{ContentType, RestRequest};
pub use response::RestResponse;
pub use retry::{BackoffStrategy, RetryPolicy, Retryable};

// Re-export common types
pub use bytes::Bytes;
pub use http::{Method, StatusCode};

/// Prelude for common imports.
pub mod prelude {
    pub use crate::client::{RestClient, Transport};
    pub use crate::config::{RestConfig, RestConfigBuilder};
    pub use crate::error::{Result, TransportError};
    pub use crate::node::NodeAddress;
    pub use crate::request::RestRequest;
    pub use crate::response::RestResponse;
    pub use crate::retry::{RetryPolicy, Retryable};
}
