//! Transport configuration.

use std::time::Duration;

/// Configuration of the REST transport.
#[derive(Debug, Clone)]
pub struct RestConfig {
    /// Read timeout of one request/response round trip.
    pub timeout: Duration,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// How long an idle pooled connection is kept open.
    pub pool_idle_timeout: Duration,
    /// Maximum idle connections kept per node.
    pub pool_max_idle_per_host: usize,
    /// Headers sent with every request.
    pub default_headers: Vec<(String, String)>,
    /// Basic auth credentials.
    pub basic_auth: Option<(String, String)>,
    /// User agent string.
    pub user_agent: String,
    /// Enable gzip response decompression.
    pub gzip: bool,
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
            pool_idle_timeout: Duration::from_secs(90),
            pool_max_idle_per_host: 8,
            default_headers: Vec::new(),
            basic_auth: None,
            user_agent: format!("esbridge-rest/{}", env!("CARGO_PKG_VERSION")),
            gzip: true,
        }
    }
}

impl RestConfig {
    /// Create a new configuration builder.
    pub fn builder() -> RestConfigBuilder {
        RestConfigBuilder::default()
    }
}

/// Builder for [`RestConfig`].
#[derive(Debug, Default)]
pub struct RestConfigBuilder {
    config: RestConfig,
}

impl RestConfigBuilder {
    /// Set the request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set the connection pool idle timeout.
    pub fn pool_idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.pool_idle_timeout = timeout;
        self
    }

    /// Set the maximum idle connections per node.
    pub fn pool_max_idle_per_host(mut self, max: usize) -> Self {
        self.config.pool_max_idle_per_host = max;
        self
    }

    /// Add a header sent with every request.
    pub fn default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.default_headers.push((name.into(), value.into()));
        self
    }

    /// Set basic authentication credentials.
    pub fn basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.basic_auth = Some((username.into(), password.into()));
        self
    }

    /// Set the user agent string.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Enable or disable gzip decompression.
    pub fn gzip(mut self, enable: bool) -> Self {
        self.config.gzip = enable;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> RestConfig {
        self.config
    }
}
