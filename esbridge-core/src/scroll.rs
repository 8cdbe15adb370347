//! Scroll cursors.
//!
//! A [`ScrollCursor`] pages through the results of one [`ShardQuery`] using
//! a server-side scroll. It holds at most one page in memory and fetches
//! the next page only once the current one is drained.
//!
//! ```text
//! Unopened --open--> Open --empty page--> Exhausted
//!     |               |  \                    |
//!     |               |   fetch failure --> Failed
//!     +---------------+-------close-----------+--> Closed
//! ```

use crate::document::Hit;
use crate::error::{Result, ScrollError};
use crate::planner::ShardQuery;
use esbridge_rest::{RestRequest, RestResponse, Transport, TransportError};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace, warn};

const SCROLL_PATH: &str = "/_search/scroll";

/// Lifecycle state of a cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CursorState {
    /// Created, no request sent yet.
    Unopened,
    /// Server-side scroll is live.
    Open,
    /// Every page was fetched.
    Exhausted,
    /// Closed by the caller.
    Closed,
    /// A request failed; the cursor cannot be resumed.
    Failed,
}

/// One page of search results.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchPage {
    /// Total matching documents, when reported.
    pub total: Option<u64>,
    /// Whether `total` is exact (`eq`) or a lower bound (`gte`).
    pub total_relation: String,
    /// Server-side processing time.
    pub took_ms: u64,
    /// Scroll token, when the search opened a scroll.
    pub scroll_id: Option<String>,
    /// Hits of this page.
    pub hits: Vec<Hit>,
}

impl SearchPage {
    /// Parse a search or scroll response.
    pub(crate) fn parse(response: &RestResponse) -> std::result::Result<Self, String> {
        let body: Value = serde_json::from_slice(response.bytes()).map_err(|e| e.to_string())?;

        // Older clusters report a plain number, newer ones {value, relation}.
        let (total, total_relation) = match &body["hits"]["total"] {
            Value::Number(n) => (n.as_u64(), "eq".to_string()),
            Value::Object(t) => (
                t.get("value").and_then(Value::as_u64),
                t.get("relation").and_then(Value::as_str).unwrap_or("eq").to_string(),
            ),
            _ => (None, "eq".to_string()),
        };

        let hits = match &body["hits"]["hits"] {
            Value::Array(raw) => raw.iter().map(Hit::from_json).collect::<std::result::Result<Vec<_>, _>>()?,
            Value::Null => Vec::new(),
            _ => return Err("hits.hits is not an array".to_string()),
        };

        Ok(Self {
            total,
            total_relation,
            took_ms: body["took"].as_u64().unwrap_or(0),
            scroll_id: body["_scroll_id"].as_str().map(str::to_string),
            hits,
        })
    }
}

/// Pages through the results of one shard query.
///
/// Documents can be pulled with [`has_next`](Self::has_next) and
/// [`next_hit`](Self::next_hit) or through the `Iterator` implementation.
/// Dropping a cursor sends nothing; an open scroll then expires after its
/// keep-alive. Call [`close`](Self::close) to release it right away.
pub struct ScrollCursor {
    transport: Arc<dyn Transport>,
    query: ShardQuery,
    state: CursorState,
    scroll_id: Option<String>,
    batch: VecDeque<Hit>,
    total_hits: Option<u64>,
    yielded: u64,
    error_reported: bool,
}

impl ScrollCursor {
    /// Create an unopened cursor.
    pub fn new(transport: Arc<dyn Transport>, query: ShardQuery) -> Self {
        Self {
            transport,
            query,
            state: CursorState::Unopened,
            scroll_id: None,
            batch: VecDeque::new(),
            total_hits: None,
            yielded: 0,
            error_reported: false,
        }
    }

    /// Current state.
    pub fn state(&self) -> CursorState {
        self.state
    }

    /// Query this cursor runs.
    pub fn query(&self) -> &ShardQuery {
        &self.query
    }

    /// Total hits reported when the scroll was opened.
    pub fn total_hits(&self) -> Option<u64> {
        self.total_hits
    }

    /// Documents yielded so far.
    pub fn yielded(&self) -> u64 {
        self.yielded
    }

    /// Documents not yet yielded, when the total is known.
    pub fn remaining(&self) -> Option<u64> {
        self.total_hits.map(|t| t.saturating_sub(self.yielded))
    }

    /// Documents of the current page not yet yielded.
    pub fn buffered(&self) -> usize {
        self.batch.len()
    }

    /// Open the server-side scroll and fetch the first page.
    ///
    /// A first page without hits moves the cursor straight to
    /// [`CursorState::Exhausted`]. Opening an open or exhausted cursor does
    /// nothing.
    pub fn open(&mut self) -> Result<()> {
        match self.state {
            CursorState::Unopened => {}
            CursorState::Open | CursorState::Exhausted => return Ok(()),
            CursorState::Closed => return Err(ScrollError::Closed.into()),
            CursorState::Failed => return Err(ScrollError::Failed.into()),
        }

        let mut request = RestRequest::post(self.query.search_path());
        if let Some(query) = &self.query.query {
            request = request.raw_query(query.clone());
        }
        request = request
            .query("scroll", self.query.keep_alive_param())
            .query("size", self.query.page_size.to_string())
            .query("preference", self.query.preference());
        if let Some(body) = &self.query.body {
            request = request.body(body.clone().into_bytes());
        }

        let response = match self.transport.execute(&self.query.node, request) {
            Ok(response) => response,
            Err(source) => {
                self.state = CursorState::Failed;
                return Err(ScrollError::Open {
                    target: self.query.to_string(),
                    source,
                }
                .into());
            }
        };

        let page = self.parse(&response)?;
        self.total_hits = page.total;
        self.state = CursorState::Open;
        debug!(
            cursor = %self.query,
            total = ?page.total,
            first_page = page.hits.len(),
            "Opened scroll"
        );
        self.accept(page);
        Ok(())
    }

    /// Check whether another document is available, fetching the next page
    /// when the current one is drained.
    pub fn has_next(&mut self) -> Result<bool> {
        loop {
            if !self.batch.is_empty() {
                return Ok(true);
            }
            match self.state {
                CursorState::Unopened => self.open()?,
                CursorState::Open => self.fetch_next()?,
                CursorState::Exhausted | CursorState::Closed => return Ok(false),
                CursorState::Failed => return Err(ScrollError::Failed.into()),
            }
        }
    }

    /// Take the next document, or `None` once the cursor is exhausted.
    pub fn next_hit(&mut self) -> Result<Option<Hit>> {
        if !self.has_next()? {
            return Ok(None);
        }
        let hit = self.batch.pop_front();
        if let Some(hit) = &hit {
            self.yielded += 1;
            trace!(id = %hit.id, index = %hit.index, "Yielded document");
        }
        Ok(hit)
    }

    /// Release the server-side scroll.
    ///
    /// Safe in every state; only the first call has an effect. A failed
    /// cursor's scroll is left to expire.
    pub fn close(&mut self) -> Result<()> {
        let previous = std::mem::replace(&mut self.state, CursorState::Closed);
        self.batch.clear();
        match previous {
            CursorState::Closed => Ok(()),
            CursorState::Failed | CursorState::Unopened => {
                self.scroll_id = None;
                Ok(())
            }
            CursorState::Open | CursorState::Exhausted => {
                let result = self.release();
                self.scroll_id = None;
                debug!(cursor = %self.query, yielded = self.yielded, "Closed scroll");
                result.map_err(Into::into)
            }
        }
    }

    fn fetch_next(&mut self) -> Result<()> {
        let Some(scroll_id) = self.scroll_id.clone() else {
            self.state = CursorState::Exhausted;
            return Ok(());
        };

        let body = json!({
            "scroll": self.query.keep_alive_param(),
            "scroll_id": scroll_id,
        });
        let result = RestRequest::post(SCROLL_PATH)
            .json(&body)
            .and_then(|request| self.transport.execute(&self.query.node, request));

        let response = match result {
            Ok(response) => response,
            Err(source) => {
                self.state = CursorState::Failed;
                warn!(cursor = %self.query, error = %source, "Scroll fetch failed");
                return Err(ScrollError::Fetch {
                    target: self.query.to_string(),
                    source,
                }
                .into());
            }
        };

        let page = self.parse(&response)?;
        trace!(cursor = %self.query, hits = page.hits.len(), "Fetched scroll page");
        self.accept(page);
        Ok(())
    }

    fn parse(&mut self, response: &RestResponse) -> Result<SearchPage> {
        SearchPage::parse(response).map_err(|reason| {
            self.state = CursorState::Failed;
            ScrollError::Malformed(reason).into()
        })
    }

    /// Take a page in, moving to `Exhausted` on an empty one.
    fn accept(&mut self, page: SearchPage) {
        if let Some(id) = page.scroll_id {
            self.scroll_id = Some(id);
        }

        if page.hits.is_empty() {
            self.state = CursorState::Exhausted;
            debug!(cursor = %self.query, yielded = self.yielded, "Scroll exhausted");
            if let Err(e) = self.release() {
                warn!(cursor = %self.query, error = %e, "Could not release exhausted scroll");
            }
        } else {
            self.batch.extend(page.hits);
        }
    }

    /// Clear the server-side scroll. The token is kept when the request
    /// fails so a later call can try again.
    fn release(&mut self) -> std::result::Result<(), ScrollError> {
        let Some(scroll_id) = self.scroll_id.take() else {
            return Ok(());
        };

        let result = RestRequest::delete(SCROLL_PATH)
            .json(&json!({ "scroll_id": [scroll_id] }))
            .and_then(|request| self.transport.execute(&self.query.node, request));

        match result {
            Ok(_) | Err(TransportError::Status { status: 404, .. }) => Ok(()),
            Err(source) => {
                self.scroll_id = Some(scroll_id);
                Err(ScrollError::Release {
                    target: self.query.to_string(),
                    source,
                })
            }
        }
    }
}

impl Iterator for ScrollCursor {
    type Item = Result<Hit>;

    /// Yields each document once, then `None`. A failure is yielded once,
    /// after which the iterator ends.
    fn next(&mut self) -> Option<Self::Item> {
        if self.error_reported {
            return None;
        }
        match self.next_hit() {
            Ok(hit) => hit.map(Ok),
            Err(e) => {
                self.error_reported = true;
                Some(Err(e))
            }
        }
    }
}

impl fmt::Debug for ScrollCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScrollCursor")
            .field("query", &self.query.to_string())
            .field("state", &self.state)
            .field("buffered", &self.batch.len())
            .field("yielded", &self.yielded)
            .finish()
    }
}

impl Drop for ScrollCursor {
    fn drop(&mut self) {
        if self.scroll_id.is_some() {
            debug!(
                cursor = %self.query,
                state = ?self.state,
                "Cursor dropped with a live scroll; it expires after its keep-alive"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::planner::{PlanOptions, QueryPlanner};
    use crate::resource::Resource;
    use crate::testing::MemoryCluster;
    use crate::topology::TopologyResolver;
    use esbridge_rest::StatusCode;
    use serde_json::json;
    use std::collections::HashSet;

    fn cursors(cluster: &Arc<MemoryCluster>, locator: &str, page_size: usize) -> Vec<ScrollCursor> {
        let resource = Resource::for_read(locator).unwrap();
        let topology = TopologyResolver::new(cluster.clone(), vec![cluster.seed()])
            .resolve_shards(resource.index())
            .unwrap();
        QueryPlanner::new(PlanOptions::default().with_page_size(page_size))
            .build_plan(&resource, &topology)
            .unwrap()
            .into_iter()
            .map(|q| ScrollCursor::new(cluster.clone(), q))
            .collect()
    }

    fn seeded(docs: usize) -> Arc<MemoryCluster> {
        let cluster = Arc::new(MemoryCluster::with_nodes(2));
        cluster.create_index("radio", 3, 0);
        for n in 0..docs {
            cluster.index_document("radio", &n.to_string(), json!({ "n": n, "name": format!("artist-{}", n) }));
        }
        cluster
    }

    #[test]
    fn test_drains_each_shard_exactly_once() {
        let cluster = seeded(25);
        let mut seen = HashSet::new();

        for mut cursor in cursors(&cluster, "radio/_search", 4) {
            let mut count = 0;
            while let Some(hit) = cursor.next_hit().unwrap() {
                assert!(cursor.buffered() < 4);
                assert!(seen.insert(hit.id.clone()), "duplicate {}", hit.id);
                count += 1;
            }
            assert_eq!(cursor.state(), CursorState::Exhausted);
            assert_eq!(cursor.total_hits(), Some(count));
            assert_eq!(cursor.remaining(), Some(0));
            cursor.close().unwrap();
        }

        assert_eq!(seen.len(), 25);
        assert_eq!(cluster.open_scrolls(), 0);
    }

    #[test]
    fn test_zero_matches_is_exhausted_after_open() {
        let cluster = seeded(5);
        let mut cursor = cursors(&cluster, "radio/_search?q=name:nobody", 10).remove(0);

        cursor.open().unwrap();
        assert_eq!(cursor.state(), CursorState::Exhausted);
        assert!(!cursor.has_next().unwrap());
        assert_eq!(cursor.total_hits(), Some(0));
        assert_eq!(cursor.count(), 0);
    }

    #[test]
    fn test_opens_lazily_with_preference() {
        let cluster = seeded(3);
        let mut cursor = cursors(&cluster, "radio/_search", 10).remove(1);
        assert_eq!(cursor.state(), CursorState::Unopened);
        assert!(cluster.requests().iter().all(|r| !r.path.ends_with("/_search")));

        cursor.has_next().unwrap();
        let open = cluster
            .requests()
            .into_iter()
            .find(|r| r.path == "/radio/_search")
            .unwrap();
        assert_eq!(open.method, "POST");
        assert!(open.query.contains("scroll=10m"));
        assert!(open.query.contains("size=10"));
        assert!(open.query.contains("preference=_shards%3A1%7C_local"));
    }

    #[test]
    fn test_close_is_idempotent() {
        let cluster = seeded(10);
        let mut cursor = cursors(&cluster, "radio/_search", 1).remove(0);
        assert!(cursor.next_hit().unwrap().is_some());
        assert_eq!(cluster.open_scrolls(), 1);

        cursor.close().unwrap();
        assert_eq!(cluster.open_scrolls(), 0);
        let requests = cluster.requests().len();

        cursor.close().unwrap();
        assert_eq!(cluster.requests().len(), requests);
        assert_eq!(cursor.state(), CursorState::Closed);
        assert!(!cursor.has_next().unwrap());
        assert!(matches!(cursor.open(), Err(Error::Scroll(ScrollError::Closed))));
    }

    #[test]
    fn test_fetch_failure_is_fatal_to_the_cursor_only() {
        let cluster = seeded(12);
        let mut all = cursors(&cluster, "radio/_search", 1);
        let mut failing = all.remove(0);
        let mut healthy = all.remove(0);

        assert!(failing.next_hit().unwrap().is_some());
        cluster.fail_next("POST", SCROLL_PATH, StatusCode::SERVICE_UNAVAILABLE.as_u16());
        let err = failing.next_hit().unwrap_err();
        assert!(matches!(err, Error::Scroll(ScrollError::Fetch { .. })));
        assert_eq!(failing.state(), CursorState::Failed);
        assert!(matches!(failing.next_hit(), Err(Error::Scroll(ScrollError::Failed))));

        let requests = cluster.requests().len();
        failing.close().unwrap();
        assert_eq!(cluster.requests().len(), requests);

        assert!(healthy.by_ref().all(|hit| hit.is_ok()));
        assert_eq!(healthy.state(), CursorState::Exhausted);
    }

    #[test]
    fn test_failed_release_is_retried_on_close() {
        let cluster = seeded(1);
        let mut all = cursors(&cluster, "radio/_search", 10);
        let position = all.iter().position(|c| c.query().shards == vec![cluster.shard_of("radio", "0")]).unwrap();
        let mut cursor = all.remove(position);

        assert!(cursor.next_hit().unwrap().is_some());
        cluster.fail_next("DELETE", SCROLL_PATH, 500);
        assert!(cursor.next_hit().unwrap().is_none());
        assert_eq!(cursor.state(), CursorState::Exhausted);
        assert_eq!(cluster.open_scrolls(), 1);

        cursor.close().unwrap();
        assert_eq!(cluster.open_scrolls(), 0);
    }

    #[test]
    fn test_iterator_stops_after_error() {
        let cluster = seeded(3);
        cluster.fail_next("POST", "/radio/_search", 500);
        let mut cursor = cursors(&cluster, "radio/_search", 10).remove(0);

        assert!(matches!(cursor.next(), Some(Err(Error::Scroll(ScrollError::Open { .. })))));
        assert!(cursor.next().is_none());
    }

    #[test]
    fn test_page_parsing_accepts_both_total_shapes() {
        let old = RestResponse::new(
            StatusCode::OK,
            r#"{"_scroll_id":"s1","hits":{"total":3,"hits":[]}}"#,
        );
        let page = SearchPage::parse(&old).unwrap();
        assert_eq!(page.total, Some(3));
        assert_eq!(page.scroll_id.as_deref(), Some("s1"));

        let new = RestResponse::new(
            StatusCode::OK,
            r#"{"took":4,"hits":{"total":{"value":10000,"relation":"gte"},"hits":[{"_id":"1","_source":{}}]}}"#,
        );
        let page = SearchPage::parse(&new).unwrap();
        assert_eq!(page.total, Some(10000));
        assert_eq!(page.total_relation, "gte");
        assert_eq!(page.hits.len(), 1);

        let bad = RestResponse::new(StatusCode::OK, r#"{"hits":{"hits":{}}}"#);
        assert!(SearchPage::parse(&bad).is_err());
    }
}
