//! Blocking REST client implementation.

use http::{HeaderMap, HeaderName, HeaderValue};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{debug, info, trace};

use crate::{NodeAddress, RestConfig, RestRequest, RestResponse, Result, TransportError};

/// Executes requests against individual cluster nodes.
///
/// Every component that talks to the cluster goes through this trait, so
/// tests can substitute an in-process cluster. Implementations must not
/// retry: retry policy belongs to the caller.
pub trait Transport: Send + Sync {
    /// Execute one request/response round trip against `node`.
    ///
    /// Answers with a status code >= 300 are returned as
    /// [`TransportError::Status`] carrying the response body.
    fn execute(&self, node: &NodeAddress, request: RestRequest) -> Result<RestResponse>;

    /// Release pooled connections. Further requests fail with
    /// [`TransportError::Closed`].
    fn close(&self) {}
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn execute(&self, node: &NodeAddress, request: RestRequest) -> Result<RestResponse> {
        (**self).execute(node, request)
    }

    fn close(&self) {
        (**self).close()
    }
}

/// Blocking HTTP transport keeping one connection pool per node.
#[derive(Clone)]
pub struct RestClient {
    config: Arc<RestConfig>,
    headers: HeaderMap,
    pools: Arc<RwLock<HashMap<NodeAddress, reqwest::blocking::Client>>>,
    closed: Arc<AtomicBool>,
}

impl RestClient {
    /// Create a new client.
    ///
    /// Fails when a configured default header is not a valid HTTP header.
    pub fn new(config: RestConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        for (name, value) in &config.default_headers {
            let name = HeaderName::try_from(name.as_str())
                .map_err(|e| TransportError::InvalidRequest(format!("header {}: {}", name, e)))?;
            let value = HeaderValue::try_from(value.as_str())
                .map_err(|e| TransportError::InvalidRequest(format!("header {}: {}", name, e)))?;
            headers.insert(name, value);
        }

        if let Some((user, pass)) = &config.basic_auth {
            use base64::Engine;
            let encoded =
                base64::engine::general_purpose::STANDARD.encode(format!("{}:{}", user, pass));
            let mut value = HeaderValue::try_from(format!("Basic {}", encoded))
                .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
            value.set_sensitive(true);
            headers.insert(http::header::AUTHORIZATION, value);
        }

        Ok(Self {
            config: Arc::new(config),
            headers,
            pools: Arc::new(RwLock::new(HashMap::new())),
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Create a client with default configuration.
    pub fn with_defaults() -> Result<Self> {
        Self::new(RestConfig::default())
    }

    /// Get the client configuration.
    pub fn config(&self) -> &RestConfig {
        &self.config
    }

    /// Nodes that currently hold a connection pool.
    pub fn pooled_nodes(&self) -> Vec<NodeAddress> {
        let mut nodes: Vec<_> = self.pools.read().keys().cloned().collect();
        nodes.sort();
        nodes
    }

    /// Check whether [`Transport::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Get or create the pool for a node.
    fn client_for(&self, node: &NodeAddress) -> Result<reqwest::blocking::Client> {
        if let Some(client) = self.pools.read().get(node) {
            return Ok(client.clone());
        }

        let client = reqwest::blocking::Client::builder()
            .timeout(self.config.timeout)
            .connect_timeout(self.config.connect_timeout)
            .pool_idle_timeout(self.config.pool_idle_timeout)
            .pool_max_idle_per_host(self.config.pool_max_idle_per_host)
            .user_agent(&self.config.user_agent)
            .gzip(self.config.gzip)
            .default_headers(self.headers.clone())
            .build()?;

        let mut pools = self.pools.write();
        // close() flips the flag before clearing under this lock
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        debug!(node = %node, "Opened connection pool");
        Ok(pools.entry(node.clone()).or_insert(client).clone())
    }
}

impl Transport for RestClient {
    fn execute(&self, node: &NodeAddress, request: RestRequest) -> Result<RestResponse> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        let path = request.path_and_query()?;
        let url = node.url(&path)?;
        let client = self.client_for(node)?;

        let mut builder = client.request(request.method().clone(), url);
        if let Some(body) = request.body_bytes() {
            trace!(node = %node, bytes = body.len(), "Attaching request body");
            builder = builder
                .header(http::header::CONTENT_TYPE, request.content_type().as_str())
                .body(body.to_vec());
        }

        let start = Instant::now();
        let response = builder.send().map_err(|e| classify(node, e))?;
        let status = response.status();
        let body = response.bytes().map_err(|e| classify(node, e))?;

        debug!(
            node = %node,
            method = %request.method(),
            path = %path,
            status = status.as_u16(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Request completed"
        );

        if status.as_u16() >= 300 {
            return Err(TransportError::Status {
                method: request.method().to_string(),
                path,
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        Ok(RestResponse::new(status, body))
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let released = {
            let mut pools = self.pools.write();
            let count = pools.len();
            pools.clear();
            count
        };
        info!(nodes = released, "Released pooled connections");
    }
}

impl std::fmt::Debug for RestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestClient")
            .field("timeout", &self.config.timeout)
            .field("pooled_nodes", &self.pools.read().len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Map a reqwest failure onto the transport taxonomy.
fn classify(node: &NodeAddress, error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout {
            node: node.to_string(),
        }
    } else if error.is_connect() {
        TransportError::Connection {
            node: node.to_string(),
            message: error.to_string(),
        }
    } else {
        TransportError::Http(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_client_creation() {
        let client = RestClient::with_defaults().unwrap();
        assert!(client.config().gzip);
        assert!(client.pooled_nodes().is_empty());
        assert!(!client.is_closed());
    }

    #[test]
    fn test_invalid_default_header_is_rejected() {
        let config = RestConfig::builder()
            .default_header("bad header", "value")
            .build();
        assert!(matches!(
            RestClient::new(config),
            Err(TransportError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_closed_client_refuses_requests() {
        let config = RestConfig::builder()
            .timeout(Duration::from_secs(1))
            .build();
        let client = RestClient::new(config).unwrap();
        client.close();
        client.close();

        let err = client
            .execute(&NodeAddress::new("127.0.0.1", 9), RestRequest::get("/"))
            .unwrap_err();
        assert!(matches!(err, TransportError::Closed));
    }

    #[test]
    fn test_no_pool_survives_close() {
        let client = std::sync::Arc::new(RestClient::with_defaults().unwrap());
        let workers: Vec<_> = (0..4u16)
            .map(|n| {
                let client = client.clone();
                std::thread::spawn(move || {
                    for port in 0..50u16 {
                        let _ = client.client_for(&NodeAddress::new("10.0.0.1", 9200 + n * 100 + port));
                    }
                })
            })
            .collect();
        client.close();
        for worker in workers {
            worker.join().unwrap();
        }

        assert!(client.pooled_nodes().is_empty());
        assert!(matches!(
            client.client_for(&NodeAddress::new("10.0.0.2", 9200)),
            Err(TransportError::Closed)
        ));
    }
}
