//! In-process cluster for tests.
//!
//! [`MemoryCluster`] implements [`Transport`] and answers the endpoints the
//! connector uses: node info, search shards, scroll search, bulk, refresh
//! and index deletion. Every request is recorded, and failures can be
//! injected per request or per bulk item.
//!
//! ```rust
//! use esbridge_core::testing::MemoryCluster;
//! use serde_json::json;
//!
//! let cluster = MemoryCluster::with_nodes(2);
//! cluster.create_index("radio", 3, 1);
//! cluster.index_document("radio", "1", json!({ "name": "Led Zeppelin" }));
//! assert_eq!(cluster.document_count("radio"), 1);
//! ```

use crate::document::Document;
use esbridge_rest::{NodeAddress, RestRequest, RestResponse, StatusCode, Transport, TransportError};
use parking_lot::Mutex;
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, HashMap, HashSet};

/// A request the cluster received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    /// Node the request was sent to.
    pub node: NodeAddress,
    /// HTTP method.
    pub method: String,
    /// Path without query string.
    pub path: String,
    /// Encoded query string, empty when absent.
    pub query: String,
    /// Body as text.
    pub body: Option<String>,
}

#[derive(Debug, Clone)]
struct MemoryNode {
    id: String,
    address: Option<NodeAddress>,
    roles: Vec<String>,
}

impl MemoryNode {
    fn holds_data(&self) -> bool {
        self.roles.is_empty() || self.roles.iter().any(|r| r == "data" || r.starts_with("data_"))
    }
}

#[derive(Debug, Clone)]
struct StoredDoc {
    id: String,
    shard: u32,
    source: Document,
}

#[derive(Debug, Clone, Default)]
struct IndexState {
    shards: u32,
    replicas: u32,
    unassigned: HashSet<u32>,
    live: Vec<StoredDoc>,
    visible: Vec<StoredDoc>,
}

impl IndexState {
    fn new(shards: u32, replicas: u32) -> Self {
        Self {
            shards: shards.max(1),
            replicas,
            ..Self::default()
        }
    }

    fn shard_for(&self, key: &str) -> u32 {
        shard_for(key, self.shards)
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.live.iter().position(|d| d.id == id)
    }
}

#[derive(Debug)]
struct ScrollState {
    hits: Vec<Value>,
    offset: usize,
    size: usize,
    total: usize,
}

#[derive(Debug)]
struct InjectedFailure {
    method: String,
    path: String,
    status: u16,
}

#[derive(Debug)]
struct ItemRejection {
    position: usize,
    status: u16,
    error_type: String,
    reason: String,
}

#[derive(Debug, Default)]
struct ClusterState {
    nodes: Vec<MemoryNode>,
    indices: BTreeMap<String, IndexState>,
    scrolls: HashMap<String, ScrollState>,
    next_scroll: u64,
    next_auto_id: u64,
    requests: Vec<RecordedRequest>,
    unreachable: HashSet<NodeAddress>,
    failures: Vec<InjectedFailure>,
    rejections: Vec<ItemRejection>,
    closed: bool,
}

/// An in-memory search cluster.
#[derive(Debug, Default)]
pub struct MemoryCluster {
    state: Mutex<ClusterState>,
}

type Reply = std::result::Result<Value, (u16, Value)>;

impl MemoryCluster {
    /// Create a cluster without nodes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a cluster of `count` data nodes `node-0..`, reachable at
    /// `10.0.0.1:9200`, `10.0.0.2:9200`, ...
    pub fn with_nodes(count: usize) -> Self {
        let cluster = Self::new();
        for i in 0..count {
            cluster.add_node(
                &format!("node-{}", i),
                Some(NodeAddress::new(format!("10.0.0.{}", i + 1), 9200)),
                &["data", "master"],
            );
        }
        cluster
    }

    /// Add a node. Nodes without an address expose no HTTP endpoint.
    pub fn add_node(&self, id: &str, address: Option<NodeAddress>, roles: &[&str]) {
        self.state.lock().nodes.push(MemoryNode {
            id: id.to_string(),
            address,
            roles: roles.iter().map(|r| r.to_string()).collect(),
        });
    }

    /// Address of the first node exposing HTTP.
    pub fn seed(&self) -> NodeAddress {
        self.state
            .lock()
            .nodes
            .iter()
            .find_map(|n| n.address.clone())
            .unwrap_or_else(|| NodeAddress::new("localhost", esbridge_rest::DEFAULT_PORT))
    }

    /// Create an index. Primaries are spread round-robin over data nodes and
    /// replicas follow on the next nodes.
    pub fn create_index(&self, name: &str, shards: u32, replicas: u32) {
        self.state
            .lock()
            .indices
            .insert(name.to_string(), IndexState::new(shards, replicas));
    }

    /// Mark every copy of a shard as unassigned.
    pub fn unassign_shard(&self, index: &str, shard: u32) {
        if let Some(state) = self.state.lock().indices.get_mut(index) {
            state.unassigned.insert(shard);
        }
    }

    /// Store a document and make it searchable right away. Creates a
    /// single-shard index when missing.
    pub fn index_document(&self, index: &str, id: &str, source: Value) {
        let source = match source {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("value".into(), other);
                map
            }
        };
        let mut state = self.state.lock();
        let index = state
            .indices
            .entry(index.to_string())
            .or_insert_with(|| IndexState::new(1, 0));
        let doc = StoredDoc {
            id: id.to_string(),
            shard: index.shard_for(id),
            source,
        };
        match index.position(id) {
            Some(pos) => index.live[pos] = doc,
            None => index.live.push(doc),
        }
        index.visible = index.live.clone();
    }

    /// Stored document by id, searchable or not.
    pub fn document(&self, index: &str, id: &str) -> Option<Document> {
        let state = self.state.lock();
        let index = state.indices.get(index)?;
        index.live.iter().find(|d| d.id == id).map(|d| d.source.clone())
    }

    /// Number of searchable documents in an index.
    pub fn document_count(&self, index: &str) -> usize {
        self.state
            .lock()
            .indices
            .get(index)
            .map_or(0, |i| i.visible.len())
    }

    /// Shard a document id routes to.
    pub fn shard_of(&self, index: &str, id: &str) -> u32 {
        self.state
            .lock()
            .indices
            .get(index)
            .map_or(0, |i| i.shard_for(id))
    }

    /// Make a node refuse connections.
    pub fn set_unreachable(&self, node: &NodeAddress) {
        self.state.lock().unreachable.insert(node.clone());
    }

    /// Answer the next `method path` request with `status`.
    pub fn fail_next(&self, method: &str, path: &str, status: u16) {
        self.state.lock().failures.push(InjectedFailure {
            method: method.to_uppercase(),
            path: path.to_string(),
            status,
        });
    }

    /// Reject the item at `position` of the next bulk request.
    pub fn reject_bulk_item(&self, position: usize, status: u16, error_type: &str, reason: &str) {
        self.state.lock().rejections.push(ItemRejection {
            position,
            status,
            error_type: error_type.to_string(),
            reason: reason.to_string(),
        });
    }

    /// Requests received so far, in order.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().requests.clone()
    }

    /// Forget recorded requests.
    pub fn clear_requests(&self) {
        self.state.lock().requests.clear();
    }

    /// Number of `_bulk` requests received.
    pub fn bulk_requests(&self) -> usize {
        self.state
            .lock()
            .requests
            .iter()
            .filter(|r| r.path == "/_bulk")
            .count()
    }

    /// Number of live scrolls.
    pub fn open_scrolls(&self) -> usize {
        self.state.lock().scrolls.len()
    }

    /// Check whether [`Transport::close`] was called.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

impl Transport for MemoryCluster {
    fn execute(&self, node: &NodeAddress, request: RestRequest) -> esbridge_rest::Result<RestResponse> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(TransportError::Closed);
        }

        let known = state.nodes.iter().any(|n| n.address.as_ref() == Some(node));
        if !known || state.unreachable.contains(node) {
            return Err(TransportError::Connection {
                node: node.to_string(),
                message: "connection refused".to_string(),
            });
        }

        let full = request.path_and_query()?;
        let (path, query) = match full.split_once('?') {
            Some((path, query)) => (path.to_string(), query.to_string()),
            None => (full.clone(), String::new()),
        };
        let method = request.method().to_string();
        let body = request
            .body_bytes()
            .map(|b| String::from_utf8_lossy(b).into_owned());

        state.requests.push(RecordedRequest {
            node: node.clone(),
            method: method.clone(),
            path: path.clone(),
            query: query.clone(),
            body: body.clone(),
        });

        let injected = state
            .failures
            .iter()
            .position(|f| f.method == method && f.path == path);
        let reply = match injected {
            Some(pos) => {
                let failure = state.failures.remove(pos);
                Err((failure.status, error_body("injected_failure", "failure injected by test")))
            }
            None => state.route(&method, &path, &query, body.as_deref()),
        };

        match reply {
            Ok(value) => Ok(RestResponse::new(StatusCode::OK, value.to_string())),
            Err((status, value)) => Err(TransportError::Status {
                method,
                path,
                status,
                body: value.to_string(),
            }),
        }
    }

    fn close(&self) {
        self.state.lock().closed = true;
    }
}

impl ClusterState {
    fn route(&mut self, method: &str, path: &str, query: &str, body: Option<&str>) -> Reply {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let params: Vec<(String, String)> = serde_urlencoded::from_str(query).unwrap_or_default();

        match (method, segments.as_slice()) {
            ("GET", ["_nodes", "http"]) => Ok(self.nodes_info()),
            ("POST", ["_search", "scroll"]) => self.scroll_next(body),
            ("DELETE", ["_search", "scroll"]) => self.scroll_clear(body),
            ("POST", ["_bulk"]) => self.bulk(body.unwrap_or_default()),
            ("GET", [expr, "_search_shards"]) => self.search_shards(expr),
            ("GET" | "POST", [expr, "_search"]) | ("GET" | "POST", [expr, _, "_search"]) => {
                self.search(expr, &params, body)
            }
            ("POST", [expr, "_refresh"]) => self.refresh(expr),
            ("DELETE", [index]) => match self.indices.remove(*index) {
                Some(_) => Ok(json!({ "acknowledged": true })),
                None => Err(index_not_found(index)),
            },
            _ => Err((
                400,
                error_body("illegal_argument_exception", &format!("no handler for {} {}", method, path)),
            )),
        }
    }

    fn data_nodes(&self) -> Vec<&MemoryNode> {
        self.nodes.iter().filter(|n| n.holds_data()).collect()
    }

    fn nodes_info(&self) -> Value {
        let nodes: Map<String, Value> = self
            .nodes
            .iter()
            .map(|n| {
                let mut info = json!({ "name": n.id, "roles": n.roles });
                if let Some(address) = &n.address {
                    info["http"] = json!({
                        "publish_address": format!("{}/{}:{}", address.host, address.host, address.port),
                    });
                }
                (n.id.clone(), info)
            })
            .collect();
        json!({ "cluster_name": "memory", "nodes": nodes })
    }

    /// Concrete indices matching a comma-separated expression.
    fn resolve(&self, expr: &str) -> std::result::Result<Vec<String>, (u16, Value)> {
        let mut names = Vec::new();
        for part in expr.split(',').filter(|p| !p.is_empty()) {
            if part == "_all" || part.contains('*') {
                let pattern = if part == "_all" { "*" } else { part };
                names.extend(self.indices.keys().filter(|n| glob_match(pattern, n)).cloned());
            } else if self.indices.contains_key(part) {
                names.push(part.to_string());
            } else {
                return Err(index_not_found(part));
            }
        }
        names.sort();
        names.dedup();
        Ok(names)
    }

    fn search_shards(&self, expr: &str) -> Reply {
        let indices = self.resolve(expr)?;
        let data = self.data_nodes();

        let mut groups = Vec::new();
        for name in &indices {
            let Some(index) = self.indices.get(name) else {
                continue;
            };
            for shard in 0..index.shards {
                if data.is_empty() || index.unassigned.contains(&shard) {
                    groups.push(json!([{
                        "state": "UNASSIGNED", "primary": true, "node": null,
                        "shard": shard, "index": name,
                    }]));
                    continue;
                }
                let copies = (index.replicas as usize).min(data.len() - 1) + 1;
                let group: Vec<Value> = (0..copies)
                    .map(|copy| {
                        let node = data[(shard as usize + copy) % data.len()];
                        json!({
                            "state": "STARTED", "primary": copy == 0, "node": node.id,
                            "shard": shard, "index": name,
                        })
                    })
                    .collect();
                groups.push(Value::Array(group));
            }
        }

        let nodes: Map<String, Value> = self
            .nodes
            .iter()
            .map(|n| (n.id.clone(), json!({ "name": n.id })))
            .collect();
        Ok(json!({ "nodes": nodes, "shards": groups }))
    }

    fn search(&mut self, expr: &str, params: &[(String, String)], body: Option<&str>) -> Reply {
        let indices = self.resolve(expr)?;
        let param = |key: &str| params.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str());

        let shard_filter: Option<HashSet<u32>> = param("preference")
            .and_then(|p| p.strip_prefix("_shards:"))
            .map(|p| {
                p.split('|')
                    .next()
                    .unwrap_or_default()
                    .split(',')
                    .filter_map(|s| s.trim().parse().ok())
                    .collect()
            });
        let dsl: Option<Value> = match body.filter(|b| !b.trim().is_empty()) {
            Some(raw) => Some(serde_json::from_str(raw).map_err(|e| {
                (400, error_body("parse_exception", &e.to_string()))
            })?),
            None => None,
        };

        let mut hits = Vec::new();
        for name in &indices {
            let Some(index) = self.indices.get(name) else {
                continue;
            };
            let mut docs: Vec<&StoredDoc> = index
                .visible
                .iter()
                .filter(|d| shard_filter.as_ref().is_none_or(|s| s.contains(&d.shard)))
                .filter(|d| param("q").is_none_or(|q| uri_query_matches(&d.source, q)))
                .filter(|d| dsl.as_ref().is_none_or(|b| dsl_matches(&d.source, &b["query"])))
                .collect();
            docs.sort_by_key(|d| d.shard);
            hits.extend(docs.into_iter().map(|d| {
                json!({ "_index": name, "_id": d.id, "_score": 1.0, "_source": d.source })
            }));
        }

        let total = hits.len();
        let size = param("size").and_then(|s| s.parse().ok()).unwrap_or(10usize);

        if param("scroll").is_some() {
            self.next_scroll += 1;
            let scroll_id = format!("c2Nyb2xs{:08x}", self.next_scroll);
            let first: Vec<Value> = hits.iter().take(size).cloned().collect();
            self.scrolls.insert(
                scroll_id.clone(),
                ScrollState {
                    offset: first.len(),
                    hits,
                    size,
                    total,
                },
            );
            return Ok(page(Some(scroll_id.as_str()), total, first));
        }

        let from = param("from").and_then(|s| s.parse().ok()).unwrap_or(0usize);
        let window = hits.into_iter().skip(from).take(size).collect();
        Ok(page(None, total, window))
    }

    fn scroll_next(&mut self, body: Option<&str>) -> Reply {
        let request: Value = serde_json::from_str(body.unwrap_or("{}"))
            .map_err(|e| (400, error_body("parse_exception", &e.to_string())))?;
        let id = request["scroll_id"].as_str().unwrap_or_default().to_string();
        let Some(scroll) = self.scrolls.get_mut(&id) else {
            return Err((
                404,
                error_body("search_context_missing_exception", &format!("No search context found for id [{}]", id)),
            ));
        };

        let batch: Vec<Value> = scroll.hits.iter().skip(scroll.offset).take(scroll.size).cloned().collect();
        scroll.offset += batch.len();
        Ok(page(Some(id.as_str()), scroll.total, batch))
    }

    fn scroll_clear(&mut self, body: Option<&str>) -> Reply {
        let request: Value = serde_json::from_str(body.unwrap_or("{}"))
            .map_err(|e| (400, error_body("parse_exception", &e.to_string())))?;
        let ids: Vec<String> = match &request["scroll_id"] {
            Value::String(id) => vec![id.clone()],
            Value::Array(ids) => ids.iter().filter_map(Value::as_str).map(str::to_string).collect(),
            _ => Vec::new(),
        };
        let freed = ids.iter().filter(|id| self.scrolls.remove(*id).is_some()).count();
        if freed == 0 {
            return Err((404, json!({ "succeeded": true, "num_freed": 0 })));
        }
        Ok(json!({ "succeeded": true, "num_freed": freed }))
    }

    fn refresh(&mut self, expr: &str) -> Reply {
        let indices = self.resolve(expr)?;
        for name in &indices {
            if let Some(index) = self.indices.get_mut(name) {
                index.visible = index.live.clone();
            }
        }
        Ok(json!({ "_shards": { "total": indices.len(), "successful": indices.len(), "failed": 0 } }))
    }

    fn bulk(&mut self, body: &str) -> Reply {
        let mut lines = body.lines().filter(|l| !l.trim().is_empty());
        let mut items = Vec::new();
        let rejections = std::mem::take(&mut self.rejections);

        while let Some(line) = lines.next() {
            let action: Value = serde_json::from_str(line)
                .map_err(|e| (400, error_body("parse_exception", &e.to_string())))?;
            let Some((kind, meta)) = action.as_object().and_then(|o| o.iter().next()) else {
                return Err((400, error_body("illegal_argument_exception", "empty action line")));
            };
            let source = if kind == "delete" {
                None
            } else {
                let raw = lines
                    .next()
                    .ok_or_else(|| (400, error_body("illegal_argument_exception", "missing source line")))?;
                Some(
                    serde_json::from_str::<Value>(raw)
                        .map_err(|e| (400, error_body("parse_exception", &e.to_string())))?,
                )
            };

            let position = items.len();
            let index = meta["_index"].as_str().unwrap_or_default().to_string();
            let result = match rejections.iter().find(|r| r.position == position) {
                Some(r) => ItemOutcome::failed(
                    meta["_id"].as_str().unwrap_or_default().to_string(),
                    r.status,
                    &r.error_type,
                    &r.reason,
                ),
                None => self.apply(kind, &index, meta, source),
            };
            items.push(json!({ kind.clone(): result.to_json(&index) }));
        }

        let errors = items
            .iter()
            .any(|i| i.as_object().and_then(|o| o.values().next()).is_some_and(|r| r.get("error").is_some()));
        Ok(json!({ "took": 1, "errors": errors, "items": items }))
    }

    fn apply(&mut self, kind: &str, index: &str, meta: &Value, source: Option<Value>) -> ItemOutcome {
        if !self.indices.contains_key(index) {
            if kind != "index" && kind != "create" {
                return ItemOutcome::failed(
                    meta["_id"].as_str().unwrap_or_default().to_string(),
                    404,
                    "index_not_found_exception",
                    &format!("no such index [{}]", index),
                );
            }
            self.indices.insert(index.to_string(), IndexState::new(1, 0));
        }

        let id = match meta["_id"].as_str() {
            Some(id) => id.to_string(),
            None => {
                self.next_auto_id += 1;
                format!("auto-{}", self.next_auto_id)
            }
        };
        let routing = meta["routing"].as_str().map(str::to_string);
        let Some(state) = self.indices.get_mut(index) else {
            return ItemOutcome::failed(id, 500, "illegal_state_exception", "index vanished");
        };
        let existing = state.position(&id);
        let source = match source {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        };

        match (kind, existing) {
            ("create", Some(_)) => ItemOutcome::failed(
                id.clone(),
                409,
                "version_conflict_engine_exception",
                &format!("[{}]: version conflict, document already exists", id),
            ),
            ("index" | "create", _) => {
                let shard = state.shard_for(routing.as_deref().unwrap_or(&id));
                let doc = StoredDoc {
                    id: id.clone(),
                    shard,
                    source,
                };
                match existing {
                    Some(pos) => {
                        state.live[pos] = doc;
                        ItemOutcome::ok(id, 200, "updated")
                    }
                    None => {
                        state.live.push(doc);
                        ItemOutcome::ok(id, 201, "created")
                    }
                }
            }
            ("update", Some(pos)) => {
                if let Some(Value::Object(partial)) = source.get("doc") {
                    for (field, value) in partial {
                        state.live[pos].source.insert(field.clone(), value.clone());
                    }
                }
                ItemOutcome::ok(id, 200, "updated")
            }
            ("update", None) => ItemOutcome::failed(
                id.clone(),
                404,
                "document_missing_exception",
                &format!("[{}]: document missing", id),
            ),
            ("delete", Some(pos)) => {
                state.live.remove(pos);
                ItemOutcome::ok(id, 200, "deleted")
            }
            ("delete", None) => ItemOutcome::ok(id, 404, "not_found"),
            (other, _) => ItemOutcome::failed(
                id,
                400,
                "illegal_argument_exception",
                &format!("unknown action [{}]", other),
            ),
        }
    }
}

struct ItemOutcome {
    id: String,
    status: u16,
    result: Option<&'static str>,
    error: Option<Value>,
}

impl ItemOutcome {
    fn ok(id: String, status: u16, result: &'static str) -> Self {
        Self {
            id,
            status,
            result: Some(result),
            error: None,
        }
    }

    fn failed(id: String, status: u16, error_type: &str, reason: &str) -> Self {
        Self {
            id,
            status,
            result: None,
            error: Some(json!({ "type": error_type, "reason": reason })),
        }
    }

    fn to_json(&self, index: &str) -> Value {
        let mut item = json!({ "_index": index, "_id": self.id, "status": self.status });
        if let Some(result) = self.result {
            item["result"] = json!(result);
        }
        if let Some(error) = &self.error {
            item["error"] = error.clone();
        }
        item
    }
}

fn page(scroll_id: Option<&str>, total: usize, hits: Vec<Value>) -> Value {
    let mut body = json!({
        "took": 1,
        "timed_out": false,
        "hits": { "total": { "value": total, "relation": "eq" }, "hits": hits },
    });
    if let Some(id) = scroll_id {
        body["_scroll_id"] = json!(id);
    }
    body
}

fn error_body(error_type: &str, reason: &str) -> Value {
    json!({ "error": { "type": error_type, "reason": reason } })
}

fn index_not_found(index: &str) -> (u16, Value) {
    (404, error_body("index_not_found_exception", &format!("no such index [{}]", index)))
}

/// Sum of the key's bytes modulo the shard count.
fn shard_for(key: &str, shards: u32) -> u32 {
    let sum: u64 = key.bytes().map(u64::from).sum();
    (sum % u64::from(shards.max(1))) as u32
}

fn glob_match(pattern: &str, name: &str) -> bool {
    match pattern.split_once('*') {
        None => pattern == name,
        Some((prefix, rest)) => {
            let Some(tail) = name.strip_prefix(prefix) else {
                return false;
            };
            if rest.is_empty() {
                return true;
            }
            (0..=tail.len()).any(|i| tail.is_char_boundary(i) && glob_match(rest, &tail[i..]))
        }
    }
}

fn value_matches(value: &Value, expected: &str) -> bool {
    match value {
        Value::String(s) => match expected.strip_suffix('*') {
            Some(prefix) => s.starts_with(prefix),
            None => s == expected,
        },
        Value::Array(values) => values.iter().any(|v| value_matches(v, expected)),
        Value::Null => false,
        other => other.to_string() == expected,
    }
}

/// `*`, `field:value`, `field:prefix*` or a bare value matched against every
/// top-level field.
fn uri_query_matches(doc: &Document, q: &str) -> bool {
    let q = q.trim();
    if q.is_empty() || q == "*" || q == "*:*" {
        return true;
    }
    match q.split_once(':') {
        Some((field, expected)) => doc.get(field).is_some_and(|v| value_matches(v, expected)),
        None => doc.values().any(|v| value_matches(v, q)),
    }
}

/// `match_all`, `term` and `match` on a single field; anything else matches.
fn dsl_matches(doc: &Document, query: &Value) -> bool {
    let Some((kind, clause)) = query.as_object().and_then(|o| o.iter().next()) else {
        return true;
    };
    match kind.as_str() {
        "term" | "match" => clause.as_object().and_then(|c| c.iter().next()).is_none_or(|(field, expected)| {
            let expected = match expected {
                Value::Object(o) => o.get("value").or_else(|| o.get("query")).cloned().unwrap_or(Value::Null),
                other => other.clone(),
            };
            let expected = match expected {
                Value::String(s) => s,
                other => other.to_string(),
            };
            doc.get(field).is_some_and(|v| value_matches(v, &expected))
        }),
        _ => true,
    }
}
