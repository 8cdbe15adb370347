//! Cluster node addressing.

use crate::{Result, TransportError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default HTTP port of a cluster node.
pub const DEFAULT_PORT: u16 = 9200;

/// URL scheme used to reach a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    /// Plain HTTP.
    #[default]
    Http,
    /// HTTP over TLS.
    Https,
}

impl Scheme {
    /// Get the scheme name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

/// Network address of one cluster node's HTTP endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeAddress {
    /// URL scheme.
    pub scheme: Scheme,
    /// Host name or IP (IPv6 without brackets).
    pub host: String,
    /// HTTP port.
    pub port: u16,
}

impl NodeAddress {
    /// Create an address from its parts.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            scheme: Scheme::Http,
            host: host.into(),
            port,
        }
    }

    /// Switch the address to HTTPS.
    pub fn with_scheme(mut self, scheme: Scheme) -> Self {
        self.scheme = scheme;
        self
    }

    /// Parse an address, falling back to `default_port` when none is given.
    ///
    /// Accepts `host`, `host:port`, `http(s)://host:port`, `[::1]:9200` and
    /// the publish formats reported by the cluster (`name/10.0.0.1:9200`,
    /// `inet[/10.0.0.1:9200]`).
    pub fn parse(input: &str, default_port: u16) -> Result<Self> {
        let invalid = || TransportError::InvalidAddress(input.to_string());

        let mut rest = input.trim();
        let mut scheme = Scheme::Http;
        if let Some(stripped) = rest.strip_prefix("https://") {
            scheme = Scheme::Https;
            rest = stripped;
        } else if let Some(stripped) = rest.strip_prefix("http://") {
            rest = stripped;
        }
        rest = rest.trim_end_matches('/');

        if let Some(inner) = rest.strip_prefix("inet[").and_then(|r| r.strip_suffix(']')) {
            rest = inner;
        }
        if let Some((_, addr)) = rest.rsplit_once('/') {
            rest = addr;
        }

        let (host, port) = if let Some(v6) = rest.strip_prefix('[') {
            let (host, tail) = v6.split_once(']').ok_or_else(invalid)?;
            let port = match tail.strip_prefix(':') {
                Some(p) => p.parse::<u16>().map_err(|_| invalid())?,
                None if tail.is_empty() => default_port,
                None => return Err(invalid()),
            };
            (host, port)
        } else {
            match rest.rsplit_once(':') {
                Some((host, port)) => (host, port.parse::<u16>().map_err(|_| invalid())?),
                None => (rest, default_port),
            }
        };

        if host.is_empty() || host.contains(char::is_whitespace) {
            return Err(invalid());
        }

        Ok(Self {
            scheme,
            host: host.to_string(),
            port,
        })
    }

    /// Base URL of the node, without a trailing slash.
    pub fn base_url(&self) -> String {
        format!("{}://{}", self.scheme.as_str(), self)
    }

    /// Full URL for a path (which may carry a query string).
    pub fn url(&self, path: &str) -> Result<url::Url> {
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        };
        url::Url::parse(&format!("{}{}", self.base_url(), path))
            .map_err(|e| TransportError::InvalidRequest(format!("{}: {}", path, e)))
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}
