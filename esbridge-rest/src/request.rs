//! Request description.

use crate::{Result, TransportError};
use bytes::Bytes;
use http::Method;
use serde::Serialize;

/// Content type of a request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    /// `application/json`.
    Json,
    /// `application/x-ndjson`, used by bulk requests.
    NdJson,
}

impl ContentType {
    /// Header value for this content type.
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Json => "application/json",
            ContentType::NdJson => "application/x-ndjson",
        }
    }
}

/// A request against a single cluster node.
///
/// Requests are plain values; they are executed through a
/// [`Transport`](crate::Transport).
#[derive(Debug, Clone)]
pub struct RestRequest {
    method: Method,
    path: String,
    raw_query: Option<String>,
    query: Vec<(String, String)>,
    body: Option<Bytes>,
    content_type: ContentType,
}

impl RestRequest {
    /// Create a request with the given method and path.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        let path = path.into();
        let path = if path.starts_with('/') {
            path
        } else {
            format!("/{}", path)
        };
        Self {
            method,
            path,
            raw_query: None,
            query: Vec::new(),
            body: None,
            content_type: ContentType::Json,
        }
    }

    /// Create a GET request.
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    /// Create a POST request.
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    /// Create a PUT request.
    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    /// Create a DELETE request.
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Add an encoded query parameter.
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Prepend an already encoded query string, passed through verbatim.
    pub fn raw_query(mut self, query: impl Into<String>) -> Self {
        let query = query.into();
        let query = query.trim_start_matches('?');
        self.raw_query = if query.is_empty() {
            None
        } else {
            Some(query.to_string())
        };
        self
    }

    /// Set a JSON body.
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self> {
        let bytes = serde_json::to_vec(body)
            .map_err(|e| TransportError::InvalidRequest(format!("JSON body: {}", e)))?;
        self.body = Some(Bytes::from(bytes));
        self.content_type = ContentType::Json;
        Ok(self)
    }

    /// Set a raw JSON body.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self.content_type = ContentType::Json;
        self
    }

    /// Set a newline-delimited JSON body.
    pub fn ndjson(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self.content_type = ContentType::NdJson;
        self
    }

    /// HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Path without the query string.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Encoded query parameters added through [`query`](Self::query).
    pub fn query_pairs(&self) -> &[(String, String)] {
        &self.query
    }

    /// Request body, if any.
    pub fn body_bytes(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    /// Content type of the body.
    pub fn content_type(&self) -> ContentType {
        self.content_type
    }

    /// Path followed by the full query string.
    pub fn path_and_query(&self) -> Result<String> {
        let mut parts = Vec::new();
        if let Some(raw) = &self.raw_query {
            parts.push(raw.clone());
        }
        if !self.query.is_empty() {
            let encoded = serde_urlencoded::to_string(&self.query)
                .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
            parts.push(encoded);
        }

        if parts.is_empty() {
            Ok(self.path.clone())
        } else {
            Ok(format!("{}?{}", self.path, parts.join("&")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_and_query() {
        let request = RestRequest::get("idx/_search")
            .raw_query("?q=user:kimchy")
            .query("scroll", "10m")
            .query("preference", "_shards:2|_local");

        assert_eq!(request.path(), "/idx/_search");
        assert_eq!(
            request.path_and_query().unwrap(),
            "/idx/_search?q=user:kimchy&scroll=10m&preference=_shards%3A2%7C_local"
        );
    }

    #[test]
    fn test_body_content_types() {
        let json = RestRequest::post("/_search/scroll")
            .json(&serde_json::json!({ "scroll_id": "abc" }))
            .unwrap();
        assert_eq!(json.content_type(), ContentType::Json);
        assert_eq!(json.body_bytes().unwrap().as_ref(), br#"{"scroll_id":"abc"}"#);

        let bulk = RestRequest::post("/_bulk").ndjson("{}\n");
        assert_eq!(bulk.content_type().as_str(), "application/x-ndjson");
    }

    #[test]
    fn test_empty_raw_query_is_dropped() {
        let request = RestRequest::delete("/idx").raw_query("?");
        assert_eq!(request.path_and_query().unwrap(), "/idx");
    }
}
