//! Cluster client.

use crate::bulk::{BulkReport, BulkWriter};
use crate::document::{Document, Hit};
use crate::error::{Result, ScrollError};
use crate::planner::{PlanOptions, QueryPlanner, ShardQuery};
use crate::resource::Resource;
use crate::scroll::{ScrollCursor, SearchPage};
use crate::settings::Settings;
use crate::topology::{Node, Topology, TopologyResolver};
use esbridge_rest::{NodeAddress, RestClient, RestRequest, Transport, TransportError};
use std::sync::Arc;
use tracing::{debug, info};

/// Entry point for reads and writes against one cluster.
///
/// Cheap to clone; clones share the transport and its connection pools.
#[derive(Clone)]
pub struct EsClient {
    transport: Arc<dyn Transport>,
    settings: Arc<Settings>,
}

impl EsClient {
    /// Create a client talking HTTP to the configured nodes.
    pub fn new(settings: Settings) -> Result<Self> {
        info!(nodes = ?settings.nodes(), "Initializing cluster client");
        let transport = RestClient::new(settings.rest_config())?;
        Ok(Self::with_transport(settings, Arc::new(transport)))
    }

    /// Create a client over an existing transport.
    pub fn with_transport(settings: Settings, transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            settings: Arc::new(settings),
        }
    }

    /// Get the settings.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Get the shared transport.
    pub fn transport(&self) -> Arc<dyn Transport> {
        self.transport.clone()
    }

    /// Topology resolver over the configured seeds.
    pub fn resolver(&self) -> TopologyResolver {
        TopologyResolver::from_settings(self.transport.clone(), &self.settings)
    }

    /// Discover the nodes of the cluster.
    pub fn discover_nodes(&self) -> Result<Vec<Node>> {
        self.resolver().discover_nodes()
    }

    /// Resolve the shards of an index expression.
    pub fn resolve_shards(&self, index_expression: &str) -> Result<Topology> {
        self.resolver().resolve_shards(index_expression)
    }

    /// Plan a read with the configured options.
    pub fn build_plan(&self, resource: &Resource) -> Result<Vec<ShardQuery>> {
        self.build_plan_with(resource, self.settings.plan_options())
    }

    /// Plan a read with explicit options.
    pub fn build_plan_with(&self, resource: &Resource, options: PlanOptions) -> Result<Vec<ShardQuery>> {
        let topology = self.resolve_shards(resource.index())?;
        QueryPlanner::new(options).build_plan(resource, &topology)
    }

    /// Unopened cursor for a shard query. The first call to
    /// [`ScrollCursor::has_next`] opens it.
    pub fn cursor(&self, query: ShardQuery) -> ScrollCursor {
        ScrollCursor::new(self.transport.clone(), query)
    }

    /// Cursor for a shard query, opened.
    pub fn open_cursor(&self, query: ShardQuery) -> Result<ScrollCursor> {
        let mut cursor = self.cursor(query);
        cursor.open()?;
        Ok(cursor)
    }

    /// Read every document of a resource, shard after shard.
    ///
    /// Loads the whole result set into memory; meant for small reads and
    /// tests. Use [`build_plan`](Self::build_plan) and cursors otherwise.
    pub fn scan(&self, resource: &Resource) -> Result<Vec<Hit>> {
        let mut hits = Vec::new();
        for query in self.build_plan(resource)? {
            let mut cursor = self.cursor(query);
            while let Some(hit) = cursor.next_hit()? {
                hits.push(hit);
            }
            cursor.close()?;
        }
        Ok(hits)
    }

    /// Bulk writer for a write resource, using the configured ceilings.
    pub fn bulk_writer(&self, target: &Resource) -> BulkWriter {
        BulkWriter::new(
            self.transport.clone(),
            self.write_node(),
            target.clone(),
            self.settings.bulk_settings(),
        )
    }

    /// One page of a plain search: `from`/`size` paging, no scroll.
    pub fn query(&self, resource: &Resource, from: u64, size: usize) -> Result<SearchPage> {
        let mut request = RestRequest::get(resource.search_path());
        if let Some(query) = resource.query() {
            request = request.raw_query(query);
        }
        let request = request.query("from", from.to_string()).query("size", size.to_string());

        let response = self.transport.execute(&self.write_node(), request)?;
        let page = SearchPage::parse(&response).map_err(ScrollError::Malformed)?;
        debug!(resource = %resource, from, size, hits = page.hits.len(), "Search page fetched");
        Ok(page)
    }

    /// Index documents into `index` in bulk and flush.
    ///
    /// Returns one report per bulk request sent.
    pub fn index_documents<I>(&self, index: &str, documents: I) -> Result<Vec<BulkReport>>
    where
        I: IntoIterator<Item = Document>,
    {
        let target = Resource::for_write(index)?;
        let mut writer = self.bulk_writer(&target);
        let mut reports = Vec::new();
        for document in documents {
            reports.extend(writer.add_document(document)?);
        }
        let last = writer.flush()?;
        if last.items > 0 {
            reports.push(last);
        }
        Ok(reports)
    }

    /// Make recent writes to `index` searchable.
    pub fn refresh(&self, index: &str) -> Result<()> {
        self.transport
            .execute(&self.write_node(), RestRequest::post(format!("/{}/_refresh", index)))?;
        Ok(())
    }

    /// Delete an index. Returns `false` when it did not exist.
    pub fn delete_index(&self, index: &str) -> Result<bool> {
        match self
            .transport
            .execute(&self.write_node(), RestRequest::delete(format!("/{}", index)))
        {
            Ok(_) => {
                info!(index = %index, "Deleted index");
                Ok(true)
            }
            Err(TransportError::Status { status: 404, .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Release pooled connections. Clones share the transport, so this
    /// closes them too.
    pub fn close(&self) {
        self.transport.close();
        info!("Cluster client closed");
    }

    /// Node receiving writes and plain searches: the first seed.
    fn write_node(&self) -> NodeAddress {
        self.settings
            .nodes()
            .first()
            .cloned()
            .unwrap_or_else(|| NodeAddress::new("localhost", esbridge_rest::DEFAULT_PORT))
    }
}

impl std::fmt::Debug for EsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EsClient")
            .field("nodes", &self.settings.nodes())
            .field("resource", &self.settings.resource())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryCluster;
    use serde_json::json;

    fn client(cluster: &Arc<MemoryCluster>) -> EsClient {
        let settings = Settings::builder()
            .node(cluster.seed().to_string())
            .scroll_size(3)
            .build()
            .unwrap();
        EsClient::with_transport(settings, cluster.clone())
    }

    fn document(value: serde_json::Value) -> Document {
        crate::document::to_document(&value).unwrap()
    }

    #[test]
    fn test_index_then_scan() {
        let cluster = Arc::new(MemoryCluster::with_nodes(2));
        cluster.create_index("radio", 3, 1);
        let client = client(&cluster);

        let reports = client
            .index_documents("radio", (0..10).map(|n| document(json!({ "n": n }))))
            .unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].items, 10);

        let hits = client.scan(&Resource::for_read("radio").unwrap()).unwrap();
        assert_eq!(hits.len(), 10);
        assert_eq!(cluster.open_scrolls(), 0);
    }

    #[test]
    fn test_query_pages_with_from_and_size() {
        let cluster = Arc::new(MemoryCluster::with_nodes(1));
        for n in 0..5 {
            cluster.index_document("radio", &n.to_string(), json!({ "n": n }));
        }
        let client = client(&cluster);

        let resource = Resource::for_read("radio/_search?q=*").unwrap();
        let page = client.query(&resource, 2, 2).unwrap();
        assert_eq!(page.total, Some(5));
        assert_eq!(page.hits.len(), 2);
        assert!(page.scroll_id.is_none());

        let request = cluster.requests().pop().unwrap();
        assert_eq!(request.method, "GET");
        assert_eq!(request.query, "q=*&from=2&size=2");
    }

    #[test]
    fn test_delete_and_refresh() {
        let cluster = Arc::new(MemoryCluster::with_nodes(1));
        cluster.create_index("radio", 1, 0);
        let client = client(&cluster);

        client.refresh("radio").unwrap();
        assert!(client.delete_index("radio").unwrap());
        assert!(!client.delete_index("radio").unwrap());
        assert!(client.refresh("radio").is_err());
    }

    #[test]
    fn test_close_shuts_the_transport() {
        let cluster = Arc::new(MemoryCluster::with_nodes(1));
        let client = client(&cluster);
        client.clone().close();
        assert!(cluster.is_closed());
        assert!(client.discover_nodes().is_err());
    }
}
