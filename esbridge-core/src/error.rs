//! Error types for cluster read and write operations.

use crate::bulk::{BulkOperation, BulkReport};
use esbridge_rest::TransportError;
use thiserror::Error;

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type.
///
/// Each variant is fatal to the operation that raised it and to nothing
/// else: a failed cursor does not affect other cursors, a failed batch does
/// not affect later batches.
#[derive(Error, Debug)]
pub enum Error {
    /// A request failed outside of a scroll or bulk context.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Cluster topology could not be resolved.
    #[error("Topology resolution failed: {0}")]
    Topology(#[from] TopologyError),

    /// A read plan could not be built.
    #[error("Query planning failed: {0}")]
    Plan(#[from] PlanError),

    /// A scroll cursor failed.
    #[error("Scroll failed: {0}")]
    Scroll(#[from] ScrollError),

    /// A bulk flush failed.
    #[error("Bulk flush failed: {0}")]
    Bulk(#[from] BulkError),

    /// Settings are invalid.
    #[error("Invalid settings: {0}")]
    Settings(#[from] SettingsError),

    /// A resource locator is invalid.
    #[error("Invalid resource: {0}")]
    Resource(#[from] ResourceError),

    /// A document could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Check if repeating the failed operation may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Transport(e) => e.is_retryable(),
            Error::Topology(TopologyError::SeedsUnreachable { last, .. }) => last.is_retryable(),
            Error::Topology(TopologyError::Request { source, .. }) => source.is_retryable(),
            Error::Bulk(BulkError::Flush { source, .. }) => source.is_retryable(),
            _ => false,
        }
    }
}

impl esbridge_rest::Retryable for Error {
    fn is_retryable(&self) -> bool {
        Error::is_retryable(self)
    }
}

/// Topology resolution failures.
#[derive(Error, Debug)]
pub enum TopologyError {
    /// No seed node answered.
    #[error("none of the seed nodes {seeds:?} could be reached: {last}")]
    SeedsUnreachable {
        /// Seed nodes tried, in order.
        seeds: Vec<String>,
        /// Failure of the last seed tried.
        #[source]
        last: TransportError,
    },

    /// The index expression matched no index.
    #[error("index [{0}] not found")]
    IndexNotFound(String),

    /// The index expression resolved to no shards.
    #[error("index expression [{0}] has no shards")]
    NoShards(String),

    /// A shard has no started copy on any node.
    #[error("shard [{index}][{shard}] has no started copy")]
    ShardUnavailable {
        /// Index name.
        index: String,
        /// Shard number.
        shard: u32,
    },

    /// No node exposes an HTTP endpoint.
    #[error("no node exposes an HTTP endpoint")]
    NoHttpNodes,

    /// A seed answered a resolution request with an error, or with a body
    /// that could not be decoded.
    #[error("{endpoint} request failed: {source}")]
    Request {
        /// Endpoint queried.
        endpoint: &'static str,
        /// Transport failure.
        #[source]
        source: TransportError,
    },

    /// The cluster answered with an unexpected document.
    #[error("malformed {endpoint} response: {reason}")]
    Malformed {
        /// Endpoint queried.
        endpoint: &'static str,
        /// What was wrong.
        reason: String,
    },
}

/// Query planning failures.
#[derive(Error, Debug)]
pub enum PlanError {
    /// The pinned shard is not part of the topology.
    #[error("shard [{shard}] not found{}", .index.as_deref().map(|i| format!(" in index [{i}]")).unwrap_or_default())]
    ShardNotFound {
        /// Index restriction, when given.
        index: Option<String>,
        /// Shard number.
        shard: u32,
    },

    /// The shard number matches shards of several indices.
    #[error("shard [{shard}] is ambiguous across indices {indices:?}; name the index")]
    AmbiguousShard {
        /// Shard number.
        shard: u32,
        /// Matching indices.
        indices: Vec<String>,
    },

    /// The pinned node is not part of the topology.
    #[error("node [{0}] not found")]
    NodeNotFound(String),

    /// The pinned node is not a candidate for the pinned shard.
    #[error("node [{node}] holds no copy of shard [{index}][{shard}]")]
    NodeNotCandidate {
        /// Node id.
        node: String,
        /// Index name.
        index: String,
        /// Shard number.
        shard: u32,
    },

    /// The shards assigned to the pinned node span several indices.
    #[error("node [{node}] is assigned shards of several indices {indices:?}")]
    NodeSpansIndices {
        /// Node id.
        node: String,
        /// Indices involved.
        indices: Vec<String>,
    },

    /// The pinned node was assigned no shard.
    #[error("node [{0}] is assigned no shard")]
    NodeUnassigned(String),
}

/// Scroll cursor failures. Each is fatal to the cursor that raised it.
#[derive(Error, Debug)]
pub enum ScrollError {
    /// Opening the scroll failed.
    #[error("opening scroll on {target} failed: {source}")]
    Open {
        /// Shard and node description.
        target: String,
        /// Transport failure.
        #[source]
        source: TransportError,
    },

    /// Fetching the next batch failed.
    #[error("fetching next batch on {target} failed: {source}")]
    Fetch {
        /// Shard and node description.
        target: String,
        /// Transport failure.
        #[source]
        source: TransportError,
    },

    /// Releasing the server-side scroll failed.
    #[error("releasing scroll on {target} failed: {source}")]
    Release {
        /// Shard and node description.
        target: String,
        /// Transport failure.
        #[source]
        source: TransportError,
    },

    /// The cluster answered with an unexpected document.
    #[error("malformed scroll response: {0}")]
    Malformed(String),

    /// The cursor failed earlier and cannot be resumed.
    #[error("cursor failed earlier and cannot be resumed")]
    Failed,

    /// The cursor was closed.
    #[error("cursor is closed")]
    Closed,
}

/// Bulk flush failures. Each is fatal to the batch that raised it.
#[derive(Error, Debug)]
pub enum BulkError {
    /// The bulk request failed; no operation of the batch may be assumed
    /// indexed. The operations are handed back to the caller.
    #[error("bulk request with {} operations failed: {source}", .operations.len())]
    Flush {
        /// Operations of the failed batch, in order.
        operations: Vec<BulkOperation>,
        /// Transport failure.
        #[source]
        source: TransportError,
        /// Report of a batch flushed earlier in the same call.
        completed: Option<BulkReport>,
    },

    /// The cluster answered with an unexpected document.
    #[error("malformed bulk response: {reason}")]
    Malformed {
        /// Operations of the batch, in order.
        operations: Vec<BulkOperation>,
        /// What was wrong.
        reason: String,
        /// Report of a batch flushed earlier in the same call.
        completed: Option<BulkReport>,
    },

    /// An operation is not valid for its action.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}

impl BulkError {
    /// Take back the operations of the failed batch.
    pub fn into_operations(self) -> Vec<BulkOperation> {
        match self {
            BulkError::Flush { operations, .. } | BulkError::Malformed { operations, .. } => {
                operations
            }
            BulkError::InvalidOperation(_) => Vec::new(),
        }
    }

    /// Report of a batch flushed successfully earlier in the same call.
    pub fn completed(&self) -> Option<&BulkReport> {
        match self {
            BulkError::Flush { completed, .. } | BulkError::Malformed { completed, .. } => {
                completed.as_ref()
            }
            BulkError::InvalidOperation(_) => None,
        }
    }

    pub(crate) fn with_completed(mut self, report: BulkReport) -> Self {
        if let BulkError::Flush { completed, .. } | BulkError::Malformed { completed, .. } = &mut self {
            *completed = Some(report);
        }
        self
    }
}

/// Invalid settings.
#[derive(Error, Debug)]
pub enum SettingsError {
    /// A value could not be parsed.
    #[error("invalid value [{value}] for [{key}]: {reason}")]
    InvalidValue {
        /// Setting key.
        key: String,
        /// Offending value.
        value: String,
        /// What was wrong.
        reason: String,
    },

    /// A required setting is missing.
    #[error("missing required setting [{0}]")]
    Missing(&'static str),
}

/// Invalid resource locators.
#[derive(Error, Debug)]
pub enum ResourceError {
    /// Nothing to parse.
    #[error("empty resource locator")]
    Empty,

    /// The index part is missing or invalid.
    #[error("invalid index in [{0}]")]
    InvalidIndex(String),

    /// More path segments than `index/type/operation`.
    #[error("too many path segments in [{0}]")]
    TooManySegments(String),

    /// Writes do not take an operation suffix or query.
    #[error("[{0}] is not a write target; expected <index>[/<type>]")]
    NotWritable(String),
}
