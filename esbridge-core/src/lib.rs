//! # esbridge core
//!
//! Parallel, shard-aware reads and batched writes between batch processing
//! engines and a search cluster.
//!
//! ## Features
//!
//! - **Topology resolution**: live nodes and shard placement from a seed list
//! - **Query planning**: one [`ShardQuery`] per shard, spread across nodes
//!   holding a copy, each meant for one worker
//! - **Scroll cursors**: lazy, page-buffered iteration that releases its
//!   server-side context on exhaustion or close
//! - **Bulk writes**: size- and count-bounded batches with per-item failure
//!   reports
//! - **Settings**: flat `es.*` properties, from code, property lists or the
//!   environment
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use esbridge_core::{EsClient, QuerySource, Resource, Settings};
//!
//! let settings = Settings::builder()
//!     .node("es1.internal:9200")
//!     .resource("radio/artists")
//!     .query(QuerySource::parse("?q=me*"))
//!     .build()?;
//! let client = EsClient::new(settings)?;
//!
//! let resource = client.settings().read_resource()?;
//! for query in client.build_plan(&resource)? {
//!     // Hand `query` to a worker; each opens its own cursor.
//!     let mut cursor = client.cursor(query);
//!     while let Some(hit) = cursor.next_hit()? {
//!         println!("{}: {:?}", hit.id, hit.document);
//!     }
//!     cursor.close()?;
//! }
//!
//! let mut writer = client.bulk_writer(&Resource::for_write("radio/artists")?);
//! writer.add_document(serde_json::Map::new())?;
//! writer.flush()?;
//! # Ok::<(), esbridge_core::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod adapter;
mod bulk;
mod client;
mod document;
mod error;
mod planner;
mod resource;
mod scroll;
mod topology;

pub mod settings;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use adapter::{
    Connector, DocumentCodec, EsConnector, RecordCodec, RecordReader, RecordSink, RecordWriter,
    SerdeCodec,
};
pub use bulk::{
    BulkAction, BulkOperation, BulkReport, BulkSettings, BulkStats, BulkWriter, ItemFailure,
};
pub use client::EsClient;
pub use document::{Document, Hit, from_document, to_document};
pub use error::{
    BulkError, Error, PlanError, ResourceError, Result, ScrollError, SettingsError, TopologyError,
};
pub use planner::{PlanOptions, PlanOverride, QueryPlanner, ShardQuery};
pub use resource::Resource;
pub use scroll::{CursorState, ScrollCursor, SearchPage};
pub use settings::{QuerySource, Settings, SettingsBuilder};
pub use topology::{Candidate, Node, ShardId, Topology, TopologyResolver};

pub use esbridge_rest::{NodeAddress, RestConfig, Transport, TransportError};

/// Prelude for common imports.
pub mod prelude {
    pub use crate::{
        BulkOperation, BulkWriter, Connector, Document, EsClient, EsConnector, Error, Hit,
        RecordSink, Resource, Result, ScrollCursor, Settings, ShardQuery,
    };
}
