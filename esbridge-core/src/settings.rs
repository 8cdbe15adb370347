//! Client settings.
//!
//! [`Settings`] is the single configuration carrier of the crate. It is
//! assembled once, validated, and then handed by reference to the
//! components that need it; there is no process-wide settings state.
//!
//! Settings can be built in code or read from the flat `es.*` property map
//! a host framework carries in its job configuration:
//!
//! ```rust
//! use esbridge_core::Settings;
//! use std::collections::HashMap;
//!
//! let props = HashMap::from([
//!     ("es.nodes".to_string(), "es1:9200,es2".to_string()),
//!     ("es.resource".to_string(), "radio/artists".to_string()),
//!     ("es.batch.size.entries".to_string(), "500".to_string()),
//! ]);
//! let settings = Settings::from_properties(props)?;
//! assert_eq!(settings.nodes().len(), 2);
//! assert_eq!(settings.batch_size_entries(), 500);
//! # Ok::<(), esbridge_core::Error>(())
//! ```

use crate::bulk::BulkSettings;
use crate::error::{Result, SettingsError};
use crate::planner::{PlanOptions, PlanOverride};
use crate::resource::Resource;
use esbridge_rest::{DEFAULT_PORT, NodeAddress, RestConfig};
use std::time::Duration;

/// Property keys understood by [`Settings::from_properties`].
pub mod keys {
    /// Comma-separated seed nodes.
    pub const NODES: &str = "es.nodes";
    /// Single seed host (older name of `es.nodes`).
    pub const HOST: &str = "es.host";
    /// Default port for nodes given without one.
    pub const PORT: &str = "es.port";
    /// Resource locator.
    pub const RESOURCE: &str = "es.resource";
    /// Query: `?uri-query`, `{ dsl }` or plain `q=` text.
    pub const QUERY: &str = "es.query";
    /// Documents per scroll page.
    pub const SCROLL_SIZE: &str = "es.scroll.size";
    /// Scroll keep-alive.
    pub const SCROLL_KEEPALIVE: &str = "es.scroll.keepalive";
    /// Bulk byte ceiling.
    pub const BATCH_SIZE_BYTES: &str = "es.batch.size.bytes";
    /// Bulk item ceiling.
    pub const BATCH_SIZE_ENTRIES: &str = "es.batch.size.entries";
    /// Refresh the target index after each flush.
    pub const BATCH_WRITE_REFRESH: &str = "es.batch.write.refresh";
    /// Request timeout.
    pub const HTTP_TIMEOUT: &str = "es.http.timeout";
    /// Connect timeout.
    pub const HTTP_CONNECT_TIMEOUT: &str = "es.http.connect.timeout";
    /// Preferred node id or host for shard candidates.
    pub const NODES_PREFER: &str = "es.nodes.prefer";
    /// Pin reads to one shard number.
    pub const INPUT_SHARD: &str = "es.input.shard";
    /// Pin reads to one node id.
    pub const INPUT_NODE: &str = "es.input.node";
    /// Pin reads to one index (with `es.input.shard`).
    pub const INPUT_INDEX: &str = "es.input.index";
    /// Basic auth user.
    pub const AUTH_USER: &str = "es.net.http.auth.user";
    /// Basic auth password.
    pub const AUTH_PASS: &str = "es.net.http.auth.pass";
    /// Prefix of extra request headers.
    pub const HEADER_PREFIX: &str = "es.net.http.header.";
}

/// Prefix of environment variables read by [`Settings::from_env`].
pub const ENV_PREFIX: &str = "ESBRIDGE_";

/// Where the read query comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuerySource {
    /// A URI query string, passed through verbatim.
    Uri(String),
    /// A query DSL document sent as the search body.
    Dsl(String),
}

impl QuerySource {
    /// Interpret an `es.query` value.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if let Some(uri) = raw.strip_prefix('?') {
            QuerySource::Uri(uri.to_string())
        } else if raw.starts_with('{') {
            QuerySource::Dsl(raw.to_string())
        } else {
            let encoded = serde_urlencoded::to_string([("q", raw)]).unwrap_or_default();
            QuerySource::Uri(encoded)
        }
    }
}

/// Validated, immutable client settings.
#[derive(Debug, Clone)]
pub struct Settings {
    nodes: Vec<NodeAddress>,
    resource: Option<String>,
    query: Option<QuerySource>,
    scroll_size: usize,
    scroll_keep_alive: Duration,
    batch_size_bytes: usize,
    batch_size_entries: usize,
    batch_write_refresh: bool,
    request_timeout: Duration,
    connect_timeout: Duration,
    preferred_node: Option<String>,
    input_index: Option<String>,
    input_shard: Option<u32>,
    input_node: Option<String>,
    headers: Vec<(String, String)>,
    basic_auth: Option<(String, String)>,
}

impl Settings {
    /// Create a settings builder with defaults.
    pub fn builder() -> SettingsBuilder {
        SettingsBuilder::default()
    }

    /// Settings for a single seed node with all other values defaulted.
    pub fn for_node(node: impl Into<String>) -> Result<Self> {
        Self::builder().node(node).build()
    }

    /// Read settings from a flat property map.
    ///
    /// Unknown keys are ignored.
    pub fn from_properties<I, K, V>(props: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut builder = Self::builder();
        for (key, value) in props {
            builder = builder.property(key.as_ref(), value.as_ref())?;
        }
        builder.build()
    }

    /// Read settings from `ESBRIDGE_*` environment variables.
    ///
    /// `ESBRIDGE_SCROLL_SIZE` maps to `es.scroll.size`, and so on.
    pub fn from_env() -> Result<Self> {
        Self::from_env_vars(std::env::vars())
    }

    /// Same as [`from_env`](Self::from_env) over an explicit variable list.
    pub fn from_env_vars<I>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let props = vars.into_iter().filter_map(|(name, value)| {
            let rest = name.strip_prefix(ENV_PREFIX)?;
            let key = format!("es.{}", rest.to_lowercase().replace('_', "."));
            Some((key, value))
        });
        Self::from_properties(props)
    }

    /// Seed nodes.
    pub fn nodes(&self) -> &[NodeAddress] {
        &self.nodes
    }

    /// Raw resource locator.
    pub fn resource(&self) -> Option<&str> {
        self.resource.as_deref()
    }

    /// Read query.
    pub fn query(&self) -> Option<&QuerySource> {
        self.query.as_ref()
    }

    /// Documents per scroll page.
    pub fn scroll_size(&self) -> usize {
        self.scroll_size
    }

    /// Scroll keep-alive.
    pub fn scroll_keep_alive(&self) -> Duration {
        self.scroll_keep_alive
    }

    /// Bulk byte ceiling.
    pub fn batch_size_bytes(&self) -> usize {
        self.batch_size_bytes
    }

    /// Bulk item ceiling.
    pub fn batch_size_entries(&self) -> usize {
        self.batch_size_entries
    }

    /// Whether the target index is refreshed after each flush.
    pub fn batch_write_refresh(&self) -> bool {
        self.batch_write_refresh
    }

    /// Request timeout.
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Preferred node id or host.
    pub fn preferred_node(&self) -> Option<&str> {
        self.preferred_node.as_deref()
    }

    /// Read locator with the configured query applied.
    ///
    /// A URI query from `es.query` is used only when the locator carries
    /// none of its own.
    pub fn read_resource(&self) -> Result<Resource> {
        let raw = self.resource.as_deref().ok_or(SettingsError::Missing(keys::RESOURCE))?;
        let resource = Resource::for_read(raw)?;
        match &self.query {
            Some(QuerySource::Uri(q)) if resource.query().is_none() => Ok(resource.with_query(q)),
            _ => Ok(resource),
        }
    }

    /// Write locator.
    pub fn write_resource(&self) -> Result<Resource> {
        let raw = self.resource.as_deref().ok_or(SettingsError::Missing(keys::RESOURCE))?;
        Ok(Resource::for_write(raw)?)
    }

    /// Transport configuration derived from these settings.
    pub fn rest_config(&self) -> RestConfig {
        let mut builder = RestConfig::builder()
            .timeout(self.request_timeout)
            .connect_timeout(self.connect_timeout);
        for (name, value) in &self.headers {
            builder = builder.default_header(name, value);
        }
        if let Some((user, pass)) = &self.basic_auth {
            builder = builder.basic_auth(user, pass);
        }
        builder.build()
    }

    /// Planner options derived from these settings.
    pub fn plan_options(&self) -> PlanOptions {
        let pin = match (self.input_shard, &self.input_node) {
            (Some(shard), node) => Some(PlanOverride::Shard {
                index: self.input_index.clone(),
                shard,
                node: node.clone(),
            }),
            (None, Some(node)) => Some(PlanOverride::Node(node.clone())),
            (None, None) => None,
        };
        let body = match &self.query {
            Some(QuerySource::Dsl(dsl)) => Some(dsl.clone()),
            _ => None,
        };

        PlanOptions {
            page_size: self.scroll_size,
            keep_alive: self.scroll_keep_alive,
            preferred_node: self.preferred_node.clone(),
            pin,
            body,
        }
    }

    /// Bulk writer settings derived from these settings.
    pub fn bulk_settings(&self) -> BulkSettings {
        BulkSettings {
            max_bytes: self.batch_size_bytes,
            max_items: self.batch_size_entries,
            refresh_after_flush: self.batch_write_refresh,
        }
    }
}

/// Builder for [`Settings`].
#[derive(Debug, Clone)]
pub struct SettingsBuilder {
    nodes: Vec<String>,
    port: u16,
    resource: Option<String>,
    query: Option<QuerySource>,
    scroll_size: usize,
    scroll_keep_alive: Duration,
    batch_size_bytes: usize,
    batch_size_entries: usize,
    batch_write_refresh: bool,
    request_timeout: Duration,
    connect_timeout: Duration,
    preferred_node: Option<String>,
    input_index: Option<String>,
    input_shard: Option<u32>,
    input_node: Option<String>,
    headers: Vec<(String, String)>,
    auth_user: Option<String>,
    auth_pass: Option<String>,
}

impl Default for SettingsBuilder {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            port: DEFAULT_PORT,
            resource: None,
            query: None,
            scroll_size: 50,
            scroll_keep_alive: Duration::from_secs(10 * 60),
            batch_size_bytes: sizes::MB,
            batch_size_entries: 1000,
            batch_write_refresh: true,
            request_timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
            preferred_node: None,
            input_index: None,
            input_shard: None,
            input_node: None,
            headers: Vec::new(),
            auth_user: None,
            auth_pass: None,
        }
    }
}

impl SettingsBuilder {
    /// Add a seed node (`host`, `host:port` or a URL).
    pub fn node(mut self, node: impl Into<String>) -> Self {
        self.nodes.push(node.into());
        self
    }

    /// Default port for nodes given without one.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the resource locator.
    pub fn resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    /// Set the read query.
    pub fn query(mut self, query: QuerySource) -> Self {
        self.query = Some(query);
        self
    }

    /// Set documents per scroll page.
    pub fn scroll_size(mut self, size: usize) -> Self {
        self.scroll_size = size;
        self
    }

    /// Set the scroll keep-alive.
    pub fn scroll_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.scroll_keep_alive = keep_alive;
        self
    }

    /// Set the bulk byte ceiling.
    pub fn batch_size_bytes(mut self, bytes: usize) -> Self {
        self.batch_size_bytes = bytes;
        self
    }

    /// Set the bulk item ceiling.
    pub fn batch_size_entries(mut self, entries: usize) -> Self {
        self.batch_size_entries = entries;
        self
    }

    /// Refresh the target index after each flush.
    pub fn batch_write_refresh(mut self, refresh: bool) -> Self {
        self.batch_write_refresh = refresh;
        self
    }

    /// Set the request timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Prefer a node (id or host) among shard candidates.
    pub fn preferred_node(mut self, node: impl Into<String>) -> Self {
        self.preferred_node = Some(node.into());
        self
    }

    /// Pin reads to one shard.
    pub fn input_shard(mut self, index: Option<String>, shard: u32) -> Self {
        self.input_index = index;
        self.input_shard = Some(shard);
        self
    }

    /// Pin reads to one node.
    pub fn input_node(mut self, node: impl Into<String>) -> Self {
        self.input_node = Some(node.into());
        self
    }

    /// Add a header sent with every request.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set basic auth credentials.
    pub fn basic_auth(mut self, user: impl Into<String>, pass: impl Into<String>) -> Self {
        self.auth_user = Some(user.into());
        self.auth_pass = Some(pass.into());
        self
    }

    /// Apply one `es.*` property. Unknown keys are ignored.
    pub fn property(mut self, key: &str, value: &str) -> Result<Self> {
        let value = value.trim();
        match key {
            keys::NODES | keys::HOST => {
                self.nodes.extend(
                    value
                        .split(',')
                        .map(str::trim)
                        .filter(|n| !n.is_empty())
                        .map(str::to_string),
                );
            }
            keys::PORT => self.port = parse_number(key, value)?,
            keys::RESOURCE => self.resource = Some(value.to_string()),
            keys::QUERY => self.query = Some(QuerySource::parse(value)),
            keys::SCROLL_SIZE => self.scroll_size = parse_number(key, value)?,
            keys::SCROLL_KEEPALIVE => self.scroll_keep_alive = duration_property(key, value)?,
            keys::BATCH_SIZE_BYTES => {
                self.batch_size_bytes = parse_size(value).ok_or_else(|| invalid(key, value, "not a size"))?
            }
            keys::BATCH_SIZE_ENTRIES => self.batch_size_entries = parse_number(key, value)?,
            keys::BATCH_WRITE_REFRESH => self.batch_write_refresh = parse_bool(key, value)?,
            keys::HTTP_TIMEOUT => self.request_timeout = duration_property(key, value)?,
            keys::HTTP_CONNECT_TIMEOUT => self.connect_timeout = duration_property(key, value)?,
            keys::NODES_PREFER => self.preferred_node = Some(value.to_string()),
            keys::INPUT_SHARD => self.input_shard = Some(parse_number(key, value)?),
            keys::INPUT_INDEX => self.input_index = Some(value.to_string()),
            keys::INPUT_NODE => self.input_node = Some(value.to_string()),
            keys::AUTH_USER => self.auth_user = Some(value.to_string()),
            keys::AUTH_PASS => self.auth_pass = Some(value.to_string()),
            _ => {
                if let Some(name) = key.strip_prefix(keys::HEADER_PREFIX) {
                    self.headers.push((name.to_string(), value.to_string()));
                }
            }
        }
        Ok(self)
    }

    /// Validate and build the settings.
    pub fn build(self) -> Result<Settings> {
        let raw_nodes = if self.nodes.is_empty() {
            vec!["localhost".to_string()]
        } else {
            self.nodes
        };
        let nodes = raw_nodes
            .iter()
            .map(|n| NodeAddress::parse(n, self.port).map_err(|e| invalid(keys::NODES, n, &e.to_string())))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        if self.scroll_size == 0 {
            return Err(invalid(keys::SCROLL_SIZE, "0", "must be positive").into());
        }
        if self.batch_size_entries == 0 {
            return Err(invalid(keys::BATCH_SIZE_ENTRIES, "0", "must be positive").into());
        }
        if self.batch_size_bytes == 0 {
            return Err(invalid(keys::BATCH_SIZE_BYTES, "0", "must be positive").into());
        }
        if self.scroll_keep_alive.is_zero() {
            return Err(invalid(keys::SCROLL_KEEPALIVE, "0", "must be positive").into());
        }

        let basic_auth = match (self.auth_user, self.auth_pass) {
            (Some(user), pass) => Some((user, pass.unwrap_or_default())),
            (None, Some(_)) => {
                return Err(SettingsError::Missing(keys::AUTH_USER).into());
            }
            (None, None) => None,
        };

        Ok(Settings {
            nodes,
            resource: self.resource,
            query: self.query,
            scroll_size: self.scroll_size,
            scroll_keep_alive: self.scroll_keep_alive,
            batch_size_bytes: self.batch_size_bytes,
            batch_size_entries: self.batch_size_entries,
            batch_write_refresh: self.batch_write_refresh,
            request_timeout: self.request_timeout,
            connect_timeout: self.connect_timeout,
            preferred_node: self.preferred_node,
            input_index: self.input_index,
            input_shard: self.input_shard,
            input_node: self.input_node,
            headers: self.headers,
            basic_auth,
        })
    }
}

/// Size constants.
pub mod sizes {
    /// 1 Kilobyte
    pub const KB: usize = 1024;
    /// 1 Megabyte
    pub const MB: usize = 1024 * 1024;
    /// 1 Gigabyte
    pub const GB: usize = 1024 * 1024 * 1024;
}

/// Parses a size string into bytes.
///
/// Supports formats like "10mb", "512kb", "1gb", "1024" (bytes), "1024b".
pub fn parse_size(s: &str) -> Option<usize> {
    let s = s.trim().to_lowercase();

    if let Ok(bytes) = s.parse::<usize>() {
        return Some(bytes);
    }

    let (num_str, multiplier) = if let Some(n) = s.strip_suffix("gb") {
        (n, sizes::GB)
    } else if let Some(n) = s.strip_suffix("mb") {
        (n, sizes::MB)
    } else if let Some(n) = s.strip_suffix("kb") {
        (n, sizes::KB)
    } else if let Some(n) = s.strip_suffix('g') {
        (n, sizes::GB)
    } else if let Some(n) = s.strip_suffix('m') {
        (n, sizes::MB)
    } else if let Some(n) = s.strip_suffix('k') {
        (n, sizes::KB)
    } else if let Some(n) = s.strip_suffix('b') {
        (n, 1)
    } else {
        return None;
    };

    let num: f64 = num_str.trim().parse().ok()?;
    if num < 0.0 {
        return None;
    }
    Some((num * multiplier as f64) as usize)
}

/// Parses a duration string.
///
/// Supports "100ms", "30s", "5m", "1h", "1d"; a bare number is milliseconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim().to_lowercase();

    if let Ok(millis) = s.parse::<u64>() {
        return Some(Duration::from_millis(millis));
    }

    let (num_str, unit_millis) = if let Some(n) = s.strip_suffix("ms") {
        (n, 1)
    } else if let Some(n) = s.strip_suffix('s') {
        (n, 1_000)
    } else if let Some(n) = s.strip_suffix('m') {
        (n, 60_000)
    } else if let Some(n) = s.strip_suffix('h') {
        (n, 3_600_000)
    } else if let Some(n) = s.strip_suffix('d') {
        (n, 86_400_000)
    } else {
        return None;
    };

    let num: u64 = num_str.trim().parse().ok()?;
    Some(Duration::from_millis(num.checked_mul(unit_millis)?))
}

/// Formats a keep-alive in the cluster's time-unit notation.
pub fn format_keep_alive(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis % 60_000 == 0 {
        format!("{}m", millis / 60_000)
    } else if millis % 1_000 == 0 {
        format!("{}s", millis / 1_000)
    } else {
        format!("{}ms", millis)
    }
}

fn invalid(key: &str, value: &str, reason: &str) -> SettingsError {
    SettingsError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse::<T>()
        .map_err(|_| invalid(key, value, "not a number").into())
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_lowercase().as_str() {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        _ => Err(invalid(key, value, "not a boolean").into()),
    }
}

fn duration_property(key: &str, value: &str) -> Result<Duration> {
    parse_duration(value).ok_or_else(|| invalid(key, value, "not a duration").into())
}
