//! Bulk writes.
//!
//! [`BulkWriter`] buffers write operations as a newline-delimited
//! action/source stream and sends them as one `_bulk` request once the item
//! or byte ceiling is reached. Item-level rejections come back as a list of
//! [`ItemFailure`] on an otherwise successful [`BulkReport`]; a failed
//! request hands the whole batch back in the error.
//!
//! Pending operations are not flushed on drop. Call [`BulkWriter::flush`]
//! before letting the writer go.

use crate::document::Document;
use crate::error::{BulkError, Error, Result};
use crate::resource::Resource;
use esbridge_rest::{NodeAddress, RestRequest, Transport};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, trace, warn};

/// Kind of write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BulkAction {
    /// Index a document, replacing any existing one with the same id.
    Index,
    /// Create a document; fails if the id exists.
    Create,
    /// Merge a partial document into an existing one.
    Update,
    /// Delete a document.
    Delete,
}

impl BulkAction {
    /// Action name on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            BulkAction::Index => "index",
            BulkAction::Create => "create",
            BulkAction::Update => "update",
            BulkAction::Delete => "delete",
        }
    }
}

impl fmt::Display for BulkAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One write operation.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkOperation {
    /// Kind of write.
    pub action: BulkAction,
    /// Target index; the writer's target when absent.
    pub index: Option<String>,
    /// Mapping type; the writer's target type when absent.
    pub doc_type: Option<String>,
    /// Document id; generated by the cluster when absent.
    pub id: Option<String>,
    /// Routing value.
    pub routing: Option<String>,
    /// Document source. Partial document for updates, absent for deletes.
    pub document: Option<Document>,
}

impl BulkOperation {
    fn new(action: BulkAction, id: Option<String>, document: Option<Document>) -> Self {
        Self {
            action,
            index: None,
            doc_type: None,
            id,
            routing: None,
            document,
        }
    }

    /// Index a document.
    pub fn index(document: Document) -> Self {
        Self::new(BulkAction::Index, None, Some(document))
    }

    /// Create a document.
    pub fn create(document: Document) -> Self {
        Self::new(BulkAction::Create, None, Some(document))
    }

    /// Update a document with a partial document.
    pub fn update(id: impl Into<String>, partial: Document) -> Self {
        Self::new(BulkAction::Update, Some(id.into()), Some(partial))
    }

    /// Delete a document.
    pub fn delete(id: impl Into<String>) -> Self {
        Self::new(BulkAction::Delete, Some(id.into()), None)
    }

    /// Set the document id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set the target index.
    pub fn with_index(mut self, index: impl Into<String>) -> Self {
        self.index = Some(index.into());
        self
    }

    /// Set the mapping type.
    pub fn with_type(mut self, doc_type: impl Into<String>) -> Self {
        self.doc_type = Some(doc_type.into());
        self
    }

    /// Set the routing value.
    pub fn with_routing(mut self, routing: impl Into<String>) -> Self {
        self.routing = Some(routing.into());
        self
    }

    fn validate(&self) -> std::result::Result<(), BulkError> {
        match self.action {
            BulkAction::Update | BulkAction::Delete if self.id.is_none() => Err(
                BulkError::InvalidOperation(format!("{} requires a document id", self.action)),
            ),
            BulkAction::Index | BulkAction::Create | BulkAction::Update if self.document.is_none() => Err(
                BulkError::InvalidOperation(format!("{} requires a document", self.action)),
            ),
            _ => Ok(()),
        }
    }

    /// Append the action line and source line of this operation.
    fn encode_into(&self, target: &Resource, out: &mut Vec<u8>) -> serde_json::Result<()> {
        let mut meta = Map::new();
        meta.insert(
            "_index".into(),
            Value::String(self.index.clone().unwrap_or_else(|| target.index().to_string())),
        );
        if let Some(doc_type) = self.doc_type.as_deref().or(target.doc_type()) {
            meta.insert("_type".into(), Value::String(doc_type.to_string()));
        }
        if let Some(id) = &self.id {
            meta.insert("_id".into(), Value::String(id.clone()));
        }
        if let Some(routing) = &self.routing {
            meta.insert("routing".into(), Value::String(routing.clone()));
        }

        let mut action = Map::new();
        action.insert(self.action.as_str().into(), Value::Object(meta));
        serde_json::to_writer(&mut *out, &action)?;
        out.push(b'\n');

        if let Some(document) = &self.document {
            if self.action == BulkAction::Update {
                out.extend_from_slice(b"{\"doc\":");
                serde_json::to_writer(&mut *out, document)?;
                out.push(b'}');
            } else {
                serde_json::to_writer(&mut *out, document)?;
            }
            out.push(b'\n');
        }
        Ok(())
    }

    fn target_index<'a>(&'a self, target: &'a Resource) -> &'a str {
        self.index.as_deref().unwrap_or(target.index())
    }
}

/// Batch ceilings and flush behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkSettings {
    /// Encoded byte ceiling of a batch.
    pub max_bytes: usize,
    /// Item ceiling of a batch.
    pub max_items: usize,
    /// Refresh written indices after each successful flush.
    pub refresh_after_flush: bool,
}

impl Default for BulkSettings {
    fn default() -> Self {
        Self {
            max_bytes: 1024 * 1024,
            max_items: 1000,
            refresh_after_flush: true,
        }
    }
}

/// An item the cluster rejected within an otherwise successful batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFailure {
    /// Zero-based position of the operation within the flushed batch.
    pub position: usize,
    /// Document id, if known.
    pub id: Option<String>,
    /// Item status code.
    pub status: u16,
    /// Error type reported by the cluster.
    pub error_type: Option<String>,
    /// Error reason reported by the cluster.
    pub reason: String,
}

/// Outcome of one flush.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkReport {
    /// Operations sent.
    pub items: usize,
    /// Server-side processing time.
    pub took_ms: u64,
    /// Rejected items, in batch order.
    pub failures: Vec<ItemFailure>,
    /// Failure of the refresh that followed the flush. The batch itself was
    /// accepted.
    #[serde(default)]
    pub refresh_error: Option<String>,
}

impl BulkReport {
    /// Check whether every item was accepted.
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Number of accepted items.
    pub fn succeeded(&self) -> usize {
        self.items - self.failures.len()
    }

    /// Append the report of a later flush. Its failure positions are
    /// shifted past this report's items.
    fn absorb(&mut self, later: BulkReport) {
        let offset = self.items;
        self.failures.extend(later.failures.into_iter().map(|mut failure| {
            failure.position += offset;
            failure
        }));
        self.items += later.items;
        self.took_ms += later.took_ms;
        if self.refresh_error.is_none() {
            self.refresh_error = later.refresh_error;
        }
    }
}

/// Cumulative writer statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkStats {
    /// Bulk requests sent.
    pub batches: u64,
    /// Bulk requests that failed as a whole.
    pub failed_batches: u64,
    /// Operations sent.
    pub documents_sent: u64,
    /// Operations accepted.
    pub documents_accepted: u64,
    /// Operations rejected.
    pub documents_rejected: u64,
    /// Encoded bytes sent.
    pub bytes_sent: u64,
}

/// Buffers write operations and sends them in bulk.
///
/// One writer serves one worker; it is not shared across threads.
pub struct BulkWriter {
    transport: Arc<dyn Transport>,
    node: NodeAddress,
    target: Resource,
    settings: BulkSettings,
    buffer: Vec<u8>,
    operations: Vec<BulkOperation>,
    stats: BulkStats,
}

impl BulkWriter {
    /// Create a writer sending to `node`, defaulting operations to `target`.
    pub fn new(
        transport: Arc<dyn Transport>,
        node: NodeAddress,
        target: Resource,
        settings: BulkSettings,
    ) -> Self {
        Self {
            transport,
            node,
            target,
            settings,
            buffer: Vec::new(),
            operations: Vec::new(),
            stats: BulkStats::default(),
        }
    }

    /// Default write target.
    pub fn target(&self) -> &Resource {
        &self.target
    }

    /// Batch settings.
    pub fn settings(&self) -> &BulkSettings {
        &self.settings
    }

    /// Number of pending operations.
    pub fn pending(&self) -> usize {
        self.operations.len()
    }

    /// Encoded size of the pending batch.
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }

    /// Cumulative statistics.
    pub fn stats(&self) -> BulkStats {
        self.stats
    }

    /// Append an operation, flushing when a ceiling is reached.
    ///
    /// If the operation would push the batch over the byte ceiling, the
    /// pending batch is flushed first. When that flush fails, the error
    /// carries the failed batch and the new operation stays pending.
    ///
    /// The batch is then flushed once it reaches either ceiling, so an
    /// operation at or above the byte ceiling is sent alone right away. When
    /// two flushes happen in one call, the returned report covers both, with
    /// failure positions counted across the two batches; if the second one
    /// fails, its error carries the first report.
    pub fn add(&mut self, operation: BulkOperation) -> Result<Option<BulkReport>> {
        operation.validate()?;

        let mut encoded = Vec::new();
        operation.encode_into(&self.target, &mut encoded)?;

        let mut flushed = None;
        if !self.operations.is_empty() && self.buffer.len() + encoded.len() > self.settings.max_bytes {
            match self.flush() {
                Ok(report) => flushed = Some(report),
                Err(e) => {
                    self.append(operation, encoded);
                    return Err(e);
                }
            }
        }

        self.append(operation, encoded);
        if !self.at_ceiling() {
            return Ok(flushed);
        }

        match (flushed, self.flush()) {
            (None, result) => result.map(Some),
            (Some(mut first), Ok(second)) => {
                first.absorb(second);
                Ok(Some(first))
            }
            (Some(first), Err(Error::Bulk(e))) => Err(e.with_completed(first).into()),
            (Some(_), Err(e)) => Err(e),
        }
    }

    fn at_ceiling(&self) -> bool {
        self.operations.len() >= self.settings.max_items || self.buffer.len() >= self.settings.max_bytes
    }

    /// Index a document.
    pub fn add_document(&mut self, document: Document) -> Result<Option<BulkReport>> {
        self.add(BulkOperation::index(document))
    }

    fn append(&mut self, operation: BulkOperation, encoded: Vec<u8>) {
        trace!(action = %operation.action, bytes = encoded.len(), "Buffered bulk operation");
        self.buffer.extend_from_slice(&encoded);
        self.operations.push(operation);
    }

    /// Send the pending batch, even a partial one.
    ///
    /// An empty batch sends nothing and yields an empty report.
    pub fn flush(&mut self) -> Result<BulkReport> {
        if self.operations.is_empty() {
            return Ok(BulkReport::default());
        }

        let body = std::mem::take(&mut self.buffer);
        let operations = std::mem::take(&mut self.operations);
        let bytes = body.len();
        let start = Instant::now();

        let response = match self
            .transport
            .execute(&self.node, RestRequest::post("/_bulk").ndjson(body))
        {
            Ok(response) => response,
            Err(source) => {
                self.stats.failed_batches += 1;
                warn!(
                    node = %self.node,
                    items = operations.len(),
                    error = %source,
                    "Bulk request failed"
                );
                return Err(BulkError::Flush {
                    operations,
                    source,
                    completed: None,
                }
                .into());
            }
        };

        let mut report = match parse_report(response.bytes(), operations.len()) {
            Ok(report) => report,
            Err(reason) => {
                self.stats.failed_batches += 1;
                return Err(BulkError::Malformed {
                    operations,
                    reason,
                    completed: None,
                }
                .into());
            }
        };

        self.stats.batches += 1;
        self.stats.documents_sent += report.items as u64;
        self.stats.documents_accepted += report.succeeded() as u64;
        self.stats.documents_rejected += report.failures.len() as u64;
        self.stats.bytes_sent += bytes as u64;

        debug!(
            node = %self.node,
            items = report.items,
            bytes,
            took_ms = report.took_ms,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Flushed bulk batch"
        );
        if !report.is_success() {
            warn!(
                rejected = report.failures.len(),
                items = report.items,
                first_reason = %report.failures[0].reason,
                "Bulk batch had rejected items"
            );
        }

        if self.settings.refresh_after_flush {
            let mut indices: Vec<&str> = operations.iter().map(|op| op.target_index(&self.target)).collect();
            indices.sort_unstable();
            indices.dedup();
            let path = format!("/{}/_refresh", indices.join(","));
            if let Err(e) = self.transport.execute(&self.node, RestRequest::post(path)) {
                warn!(node = %self.node, error = %e, "Refresh after bulk flush failed");
                report.refresh_error = Some(e.to_string());
            }
        }

        Ok(report)
    }
}

impl fmt::Debug for BulkWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BulkWriter")
            .field("node", &self.node)
            .field("target", &self.target)
            .field("pending", &self.operations.len())
            .field("pending_bytes", &self.buffer.len())
            .finish()
    }
}

impl Drop for BulkWriter {
    fn drop(&mut self) {
        if !self.operations.is_empty() {
            warn!(
                pending = self.operations.len(),
                resource = %self.target,
                "Bulk writer dropped with unflushed operations"
            );
        }
    }
}

/// Parse a `_bulk` response into a report.
fn parse_report(body: &[u8], expected: usize) -> std::result::Result<BulkReport, String> {
    let body: Value = serde_json::from_slice(body).map_err(|e| e.to_string())?;
    let items = body["items"].as_array().ok_or("missing items array")?;
    if items.len() != expected {
        return Err(format!("expected {} items, got {}", expected, items.len()));
    }

    let failures = items
        .iter()
        .enumerate()
        .filter_map(|(position, item)| {
            let (_, result) = item.as_object()?.iter().next()?;
            let error = result.get("error").filter(|e| !e.is_null())?;
            let (error_type, reason) = match error {
                Value::String(reason) => (None, reason.clone()),
                other => (
                    other["type"].as_str().map(str::to_string),
                    other["reason"].as_str().map_or_else(|| other.to_string(), str::to_string),
                ),
            };
            Some(ItemFailure {
                position,
                id: result["_id"].as_str().map(str::to_string),
                status: result["status"].as_u64().and_then(|s| u16::try_from(s).ok()).unwrap_or(0),
                error_type,
                reason,
            })
        })
        .collect();

    Ok(BulkReport {
        items: expected,
        took_ms: body["took"].as_u64().unwrap_or(0),
        failures,
        refresh_error: None,
    })
}
