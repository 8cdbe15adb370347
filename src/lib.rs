// esbridge - a connector core between batch processing engines and search
// clusters
//
// Shard-aware parallel reads through scroll cursors and batched bulk writes,
// over a blocking REST transport.

// Re-export core functionality
pub use esbridge_core::*;

// Re-export the transport crate
pub use esbridge_rest as rest;

// Prelude for common imports
pub mod prelude {
    pub use esbridge_core::prelude::*;
    pub use esbridge_core::{
        BulkReport, CursorState, DocumentCodec, QuerySource, RecordCodec, SerdeCodec, Topology,
        TopologyResolver,
    };
    pub use esbridge_rest::{NodeAddress, RestConfig, Transport};
}
