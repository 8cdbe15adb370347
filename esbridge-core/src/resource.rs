//! Resource locators: `<index>[/<type>][/_search][?<query>]`.

use crate::error::ResourceError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const SEARCH: &str = "_search";
const FORBIDDEN: &[char] = &['\\', '"', '<', '>', '|', '#', ' ', '\t', '\n'];

/// A parsed resource locator.
///
/// Parsed once, immutable afterwards. The query string is kept verbatim and
/// never interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resource {
    index: String,
    doc_type: Option<String>,
    operation: Option<String>,
    query: Option<String>,
}

impl Resource {
    /// Parse a locator without applying read or write rules.
    pub fn parse(locator: &str) -> Result<Self, ResourceError> {
        let trimmed = locator.trim().trim_start_matches('/');
        if trimmed.is_empty() {
            return Err(ResourceError::Empty);
        }

        let (path, query) = match trimmed.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (trimmed, None),
        };

        let mut segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let operation = match segments.last() {
            Some(last) if last.starts_with('_') && segments.len() > 1 => segments.pop(),
            _ => None,
        };

        let (index, doc_type) = match segments.as_slice() {
            [index] => (*index, None),
            [index, doc_type] => (*index, Some(*doc_type)),
            [] => return Err(ResourceError::InvalidIndex(locator.to_string())),
            _ => return Err(ResourceError::TooManySegments(locator.to_string())),
        };

        let valid_index = index == "_all" || !index.starts_with('_');
        if !valid_index || index.contains(FORBIDDEN) {
            return Err(ResourceError::InvalidIndex(locator.to_string()));
        }
        if doc_type.is_some_and(|t| t.starts_with('_') || t.contains(FORBIDDEN)) {
            return Err(ResourceError::InvalidIndex(locator.to_string()));
        }

        Ok(Self {
            index: index.to_string(),
            doc_type: doc_type.map(str::to_string),
            operation: operation.map(str::to_string),
            query: query.filter(|q| !q.is_empty()).map(str::to_string),
        })
    }

    /// Parse a read locator; the operation defaults to `_search`.
    pub fn for_read(locator: &str) -> Result<Self, ResourceError> {
        let mut resource = Self::parse(locator)?;
        resource.operation.get_or_insert_with(|| SEARCH.to_string());
        Ok(resource)
    }

    /// Parse a write locator: `<index>[/<type>]` only.
    pub fn for_write(locator: &str) -> Result<Self, ResourceError> {
        let resource = Self::parse(locator)?;
        if resource.operation.is_some() || resource.query.is_some() {
            return Err(ResourceError::NotWritable(locator.to_string()));
        }
        if resource.is_pattern() {
            return Err(ResourceError::NotWritable(locator.to_string()));
        }
        Ok(resource)
    }

    /// Index expression (may be a comma list or a wildcard pattern).
    pub fn index(&self) -> &str {
        &self.index
    }

    /// Individual index names or patterns of the expression.
    pub fn indices(&self) -> Vec<&str> {
        self.index.split(',').filter(|s| !s.is_empty()).collect()
    }

    /// Check whether the expression can match more than one index.
    pub fn is_pattern(&self) -> bool {
        self.index.contains(['*', ','])
    }

    /// Mapping type, if present.
    pub fn doc_type(&self) -> Option<&str> {
        self.doc_type.as_deref()
    }

    /// Operation suffix such as `_search`, if present.
    pub fn operation(&self) -> Option<&str> {
        self.operation.as_deref()
    }

    /// Raw query string (without the leading `?`), if present.
    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// Copy of this resource with another raw query string.
    pub fn with_query(&self, query: impl Into<String>) -> Self {
        let query = query.into();
        let query = query.trim_start_matches('?');
        Self {
            query: (!query.is_empty()).then(|| query.to_string()),
            ..self.clone()
        }
    }

    /// `/<index>[/<type>]`.
    pub fn base_path(&self) -> String {
        match &self.doc_type {
            Some(t) => format!("/{}/{}", self.index, t),
            None => format!("/{}", self.index),
        }
    }

    /// Search path for a concrete index of this resource's expression.
    pub fn search_path_for(&self, index: &str) -> String {
        match &self.doc_type {
            Some(t) => format!("/{}/{}/{}", index, t, SEARCH),
            None => format!("/{}/{}", index, SEARCH),
        }
    }

    /// `/<index>[/<type>]/_search`.
    pub fn search_path(&self) -> String {
        self.search_path_for(&self.index)
    }
}

impl FromStr for Resource {
    type Err = ResourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.base_path()[1..])?;
        if let Some(op) = &self.operation {
            write!(f, "/{}", op)?;
        }
        if let Some(q) = &self.query {
            write!(f, "?{}", q)?;
        }
        Ok(())
    }
}
