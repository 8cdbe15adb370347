//! Host framework boundary.
//!
//! Batch engines plug in through [`Connector`]: list the read partitions,
//! open a reader for one of them, open a writer, close. [`EsConnector`]
//! implements it on top of the planner, cursors and bulk writer; a
//! [`RecordCodec`] converts between the engine's native records and
//! [`Document`]s. Nothing shard, scroll or bulk related lives in codecs.

use crate::bulk::{BulkOperation, BulkReport, BulkWriter};
use crate::client::EsClient;
use crate::document::{Document, Hit, from_document, to_document};
use crate::error::Result;
use crate::planner::ShardQuery;
use crate::scroll::ScrollCursor;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::debug;

/// Converts native records to and from documents.
pub trait RecordCodec: Send + Sync {
    /// Native record type.
    type Record;

    /// Build a record from a read hit.
    fn decode(&self, hit: Hit) -> Result<Self::Record>;

    /// Build a document from a record.
    fn encode(&self, record: &Self::Record) -> Result<Document>;

    /// Document id to write an encoded record under. `None` lets the
    /// cluster assign one.
    fn id(&self, _document: &Document) -> Option<String> {
        None
    }
}

fn id_field_value(field: Option<&str>, document: &Document) -> Option<String> {
    match document.get(field?)? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// Passes documents through unchanged.
#[derive(Debug, Clone, Default)]
pub struct DocumentCodec {
    id_field: Option<String>,
}

impl DocumentCodec {
    /// Create a codec.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a document field as the document id.
    pub fn with_id_field(mut self, field: impl Into<String>) -> Self {
        self.id_field = Some(field.into());
        self
    }
}

impl RecordCodec for DocumentCodec {
    type Record = Document;

    fn decode(&self, hit: Hit) -> Result<Document> {
        Ok(hit.into_document())
    }

    fn encode(&self, record: &Document) -> Result<Document> {
        Ok(record.clone())
    }

    fn id(&self, document: &Document) -> Option<String> {
        id_field_value(self.id_field.as_deref(), document)
    }
}

/// Maps serde records to documents.
#[derive(Debug)]
pub struct SerdeCodec<T> {
    id_field: Option<String>,
    _record: PhantomData<fn() -> T>,
}

impl<T> SerdeCodec<T> {
    /// Create a codec.
    pub fn new() -> Self {
        Self {
            id_field: None,
            _record: PhantomData,
        }
    }

    /// Use a record field as the document id.
    pub fn with_id_field(mut self, field: impl Into<String>) -> Self {
        self.id_field = Some(field.into());
        self
    }
}

impl<T> Default for SerdeCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Serialize + DeserializeOwned> RecordCodec for SerdeCodec<T> {
    type Record = T;

    fn decode(&self, hit: Hit) -> Result<T> {
        from_document(hit.into_document())
    }

    fn encode(&self, record: &T) -> Result<Document> {
        to_document(record)
    }

    fn id(&self, document: &Document) -> Option<String> {
        id_field_value(self.id_field.as_deref(), document)
    }
}

/// Sink side of a connector.
pub trait RecordSink<R> {
    /// Write one record. Returns the report of a flush it triggered.
    fn write(&mut self, record: &R) -> Result<Option<BulkReport>>;

    /// Flush pending records and release the sink.
    fn close(self) -> Result<BulkReport>
    where
        Self: Sized;
}

/// Source/sink contract a host framework adapter implements.
pub trait Connector {
    /// Native record type.
    type Record;
    /// Reader over one partition.
    type Reader: Iterator<Item = Result<Self::Record>>;
    /// Writer into the configured resource.
    type Writer: RecordSink<Self::Record>;

    /// Read partitions, one per worker.
    fn partitions(&self) -> Result<Vec<ShardQuery>>;

    /// Open a reader for one partition.
    fn open_read(&self, partition: ShardQuery) -> Result<Self::Reader>;

    /// Open a writer.
    fn open_write(&self) -> Result<Self::Writer>;

    /// Release shared resources.
    fn close(&self);
}

/// [`Connector`] backed by an [`EsClient`].
///
/// Reads the settings' read resource and writes to its write resource.
#[derive(Debug)]
pub struct EsConnector<C> {
    client: EsClient,
    codec: Arc<C>,
}

impl<C: RecordCodec> EsConnector<C> {
    /// Create a connector.
    pub fn new(client: EsClient, codec: C) -> Self {
        Self {
            client,
            codec: Arc::new(codec),
        }
    }

    /// Underlying client.
    pub fn client(&self) -> &EsClient {
        &self.client
    }
}

impl<C: RecordCodec> Connector for EsConnector<C> {
    type Record = C::Record;
    type Reader = RecordReader<C>;
    type Writer = RecordWriter<C>;

    fn partitions(&self) -> Result<Vec<ShardQuery>> {
        let resource = self.client.settings().read_resource()?;
        self.client.build_plan(&resource)
    }

    fn open_read(&self, partition: ShardQuery) -> Result<RecordReader<C>> {
        debug!(partition = %partition, "Opening record reader");
        Ok(RecordReader {
            cursor: self.client.cursor(partition),
            codec: self.codec.clone(),
        })
    }

    fn open_write(&self) -> Result<RecordWriter<C>> {
        let resource = self.client.settings().write_resource()?;
        Ok(RecordWriter {
            writer: self.client.bulk_writer(&resource),
            codec: self.codec.clone(),
        })
    }

    fn close(&self) {
        self.client.close();
    }
}

/// Records of one partition.
#[derive(Debug)]
pub struct RecordReader<C> {
    cursor: ScrollCursor,
    codec: Arc<C>,
}

impl<C> RecordReader<C> {
    /// Underlying cursor.
    pub fn cursor(&self) -> &ScrollCursor {
        &self.cursor
    }

    /// Release the server-side scroll.
    pub fn close(&mut self) -> Result<()> {
        self.cursor.close()
    }
}

impl<C: RecordCodec> Iterator for RecordReader<C> {
    type Item = Result<C::Record>;

    fn next(&mut self) -> Option<Self::Item> {
        let hit = self.cursor.next()?;
        Some(hit.and_then(|hit| self.codec.decode(hit)))
    }
}

/// Writes records in bulk.
#[derive(Debug)]
pub struct RecordWriter<C> {
    writer: BulkWriter,
    codec: Arc<C>,
}

impl<C> RecordWriter<C> {
    /// Underlying bulk writer.
    pub fn bulk(&self) -> &BulkWriter {
        &self.writer
    }
}

impl<C: RecordCodec> RecordSink<C::Record> for RecordWriter<C> {
    fn write(&mut self, record: &C::Record) -> Result<Option<BulkReport>> {
        let document = self.codec.encode(record)?;
        let operation = match self.codec.id(&document) {
            Some(id) => BulkOperation::index(document).with_id(id),
            None => BulkOperation::index(document),
        };
        self.writer.add(operation)
    }

    fn close(mut self) -> Result<BulkReport> {
        self.writer.flush()
    }
}
