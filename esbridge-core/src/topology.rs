//! Cluster topology discovery.
//!
//! The resolver asks a seed node two questions: which nodes expose an HTTP
//! endpoint (`GET /_nodes/http`) and where the shards of an index expression
//! live (`GET /<expr>/_search_shards`). The answer is a [`Topology`]: an
//! immutable snapshot mapping every shard to its ordered candidate nodes.
//!
//! Snapshots are never cached. Shard assignment changes between runs, so
//! every read resolves afresh.

use crate::error::{Result, TopologyError};
use crate::settings::Settings;
use esbridge_rest::{NodeAddress, RestRequest, RestResponse, Transport, TransportError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

const NODES_ENDPOINT: &str = "_nodes/http";
const SHARDS_ENDPOINT: &str = "_search_shards";

/// A cluster member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Opaque node id.
    pub id: String,
    /// Human-readable node name.
    pub name: String,
    /// HTTP endpoint, when the node exposes one.
    pub address: Option<NodeAddress>,
    /// Roles reported by the node (`data`, `master`, `ingest`, ...).
    pub roles: Vec<String>,
}

impl Node {
    /// Check whether the node holds data.
    ///
    /// Nodes that report no roles at all are treated as data nodes.
    pub fn is_data(&self) -> bool {
        self.roles.is_empty() || self.roles.iter().any(|r| r == "data" || r.starts_with("data_"))
    }

    /// Check whether the node only coordinates requests.
    pub fn is_coordinating_only(&self) -> bool {
        !self.roles.is_empty() && !self.is_data() && !self.roles.iter().any(|r| r == "master")
    }

    /// Check whether `key` names this node by id, name, host or `host:port`.
    pub fn matches(&self, key: &str) -> bool {
        if self.id == key || self.name == key {
            return true;
        }
        self.address
            .as_ref()
            .is_some_and(|a| a.host == key || a.to_string() == key)
    }
}

/// A shard of a concrete index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ShardId {
    /// Concrete index name.
    pub index: String,
    /// Shard number within the index.
    pub number: u32,
}

impl ShardId {
    /// Create a shard id.
    pub fn new(index: impl Into<String>, number: u32) -> Self {
        Self {
            index: index.into(),
            number,
        }
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}][{}]", self.index, self.number)
    }
}

/// A node able to serve a shard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    /// Node id.
    pub node_id: String,
    /// Whether the node holds the primary copy.
    pub primary: bool,
    /// Whether the node holds a copy at all. Nodes without a copy only
    /// appear when no copy holder exposes HTTP.
    pub hosts_copy: bool,
}

/// Snapshot of the nodes of a cluster and the shards of one index
/// expression.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Topology {
    nodes: BTreeMap<String, Node>,
    shards: BTreeMap<ShardId, Vec<Candidate>>,
}

impl Topology {
    /// Assemble a topology from known nodes and shard candidates.
    pub fn from_parts(
        nodes: impl IntoIterator<Item = Node>,
        shards: impl IntoIterator<Item = (ShardId, Vec<Candidate>)>,
    ) -> Self {
        Self {
            nodes: nodes.into_iter().map(|n| (n.id.clone(), n)).collect(),
            shards: shards.into_iter().collect(),
        }
    }

    /// Shards with their ordered candidates, sorted by index then number.
    pub fn shards(&self) -> impl Iterator<Item = (&ShardId, &[Candidate])> {
        self.shards.iter().map(|(id, c)| (id, c.as_slice()))
    }

    /// Number of shards.
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Ordered candidates of a shard.
    pub fn candidates(&self, shard: &ShardId) -> Option<&[Candidate]> {
        self.shards.get(shard).map(Vec::as_slice)
    }

    /// Ordered candidate nodes of a shard.
    pub fn candidate_nodes(&self, shard: &ShardId) -> Vec<&Node> {
        self.candidates(shard)
            .unwrap_or_default()
            .iter()
            .filter_map(|c| self.nodes.get(&c.node_id))
            .collect()
    }

    /// All known nodes, sorted by id.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Look up a node by id.
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Look up a node by id, name or host.
    pub fn find_node(&self, key: &str) -> Option<&Node> {
        self.nodes.get(key).or_else(|| self.nodes.values().find(|n| n.matches(key)))
    }

    /// Concrete indices covered by the snapshot.
    pub fn indices(&self) -> Vec<&str> {
        let mut indices: Vec<&str> = self.shards.keys().map(|s| s.index.as_str()).collect();
        indices.dedup();
        indices
    }
}

/// Resolves cluster topology through a list of seed nodes.
#[derive(Clone)]
pub struct TopologyResolver {
    transport: Arc<dyn Transport>,
    seeds: Vec<NodeAddress>,
    preferred_node: Option<String>,
}

impl TopologyResolver {
    /// Create a resolver over the given seeds.
    pub fn new(transport: Arc<dyn Transport>, seeds: Vec<NodeAddress>) -> Self {
        Self {
            transport,
            seeds,
            preferred_node: None,
        }
    }

    /// Create a resolver from settings.
    pub fn from_settings(transport: Arc<dyn Transport>, settings: &Settings) -> Self {
        let resolver = Self::new(transport, settings.nodes().to_vec());
        match settings.preferred_node() {
            Some(node) => resolver.with_preferred_node(node),
            None => resolver,
        }
    }

    /// Move the given node (id, name or host) to the front of every
    /// candidate list it appears in.
    pub fn with_preferred_node(mut self, node: impl Into<String>) -> Self {
        self.preferred_node = Some(node.into());
        self
    }

    /// Seed nodes, in the order they are tried.
    pub fn seeds(&self) -> &[NodeAddress] {
        &self.seeds
    }

    /// Discover the nodes of the cluster.
    pub fn discover_nodes(&self) -> Result<Vec<Node>> {
        let (seed, response) = self.call(NODES_ENDPOINT, || RestRequest::get(format!("/{}", NODES_ENDPOINT)))?;
        let nodes = parse_nodes(&response, &seed)?;
        debug!(seed = %seed, nodes = nodes.len(), "Discovered cluster nodes");
        Ok(nodes)
    }

    /// Resolve the shards of an index expression to their candidate nodes.
    ///
    /// Multi-index (`a,b`) and wildcard (`logs-*`) expressions include every
    /// matching index's shards.
    pub fn resolve_shards(&self, index_expression: &str) -> Result<Topology> {
        let nodes = self.discover_nodes()?;
        let path = format!("/{}/{}", index_expression, SHARDS_ENDPOINT);
        let (seed, response) = match self.call(SHARDS_ENDPOINT, || RestRequest::get(path.clone())) {
            Err(crate::Error::Topology(TopologyError::Request {
                source: TransportError::Status { status: 404, .. },
                ..
            })) => {
                return Err(TopologyError::IndexNotFound(index_expression.to_string()).into());
            }
            other => other?,
        };

        let copies = parse_shard_table(&response)?;
        if copies.is_empty() {
            return Err(TopologyError::NoShards(index_expression.to_string()).into());
        }

        let http_nodes: Vec<&Node> = nodes.iter().filter(|n| n.address.is_some()).collect();
        if http_nodes.is_empty() {
            return Err(TopologyError::NoHttpNodes.into());
        }

        let mut shards = BTreeMap::new();
        for (shard, started) in copies {
            if started.is_empty() {
                return Err(TopologyError::ShardUnavailable {
                    index: shard.index,
                    shard: shard.number,
                }
                .into());
            }
            let candidates = self.order_candidates(&shard, started, &nodes, &http_nodes);
            shards.insert(shard, candidates);
        }

        info!(
            seed = %seed,
            index = %index_expression,
            nodes = nodes.len(),
            shards = shards.len(),
            "Resolved shard topology"
        );
        Ok(Topology::from_parts(nodes, shards))
    }

    fn order_candidates(
        &self,
        shard: &ShardId,
        started: Vec<(String, bool)>,
        nodes: &[Node],
        http_nodes: &[&Node],
    ) -> Vec<Candidate> {
        let reachable = |id: &str| http_nodes.iter().any(|n| n.id == id);
        let mut candidates: Vec<Candidate> = started
            .into_iter()
            .filter(|(node, _)| reachable(node))
            .map(|(node_id, primary)| Candidate {
                node_id,
                primary,
                hosts_copy: true,
            })
            .collect();

        if candidates.is_empty() {
            warn!(shard = %shard, "No copy holder exposes HTTP; any node may coordinate");
            candidates = http_nodes
                .iter()
                .map(|n| Candidate {
                    node_id: n.id.clone(),
                    primary: false,
                    hosts_copy: false,
                })
                .collect();
        }

        candidates.sort_by(|a, b| b.primary.cmp(&a.primary).then_with(|| a.node_id.cmp(&b.node_id)));

        if let Some(key) = &self.preferred_node {
            let preferred = candidates.iter().position(|c| {
                nodes
                    .iter()
                    .find(|n| n.id == c.node_id)
                    .is_some_and(|n| n.matches(key))
            });
            if let Some(pos) = preferred {
                let candidate = candidates.remove(pos);
                candidates.insert(0, candidate);
            }
        }
        candidates
    }

    /// Send a request to the first seed that answers.
    fn call(
        &self,
        endpoint: &'static str,
        request: impl Fn() -> RestRequest,
    ) -> Result<(NodeAddress, RestResponse)> {
        let mut last = None;
        for seed in &self.seeds {
            match self.transport.execute(seed, request()) {
                Ok(response) => return Ok((seed.clone(), response)),
                Err(e) if e.is_retryable() => {
                    warn!(seed = %seed, error = %e, "Seed node did not answer");
                    last = Some(e);
                }
                Err(source) => return Err(TopologyError::Request { endpoint, source }.into()),
            }
        }

        Err(TopologyError::SeedsUnreachable {
            seeds: self.seeds.iter().map(ToString::to_string).collect(),
            last: last.unwrap_or_else(|| TransportError::InvalidRequest("no seed nodes configured".into())),
        }
        .into())
    }
}

impl fmt::Debug for TopologyResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TopologyResolver")
            .field("seeds", &self.seeds)
            .field("preferred_node", &self.preferred_node)
            .finish()
    }
}

fn malformed(endpoint: &'static str, reason: impl Into<String>) -> TopologyError {
    TopologyError::Malformed {
        endpoint,
        reason: reason.into(),
    }
}

fn parse_nodes(response: &RestResponse, seed: &NodeAddress) -> Result<Vec<Node>> {
    let body: Value = response.json().map_err(|source| TopologyError::Request {
        endpoint: NODES_ENDPOINT,
        source,
    })?;
    let entries = body["nodes"]
        .as_object()
        .ok_or_else(|| malformed(NODES_ENDPOINT, "missing nodes object"))?;

    let mut nodes = Vec::with_capacity(entries.len());
    for (id, info) in entries {
        let address = match info["http"]["publish_address"].as_str() {
            Some(raw) => Some(
                NodeAddress::parse(raw, seed.port)
                    .map_err(|e| malformed(NODES_ENDPOINT, e.to_string()))?
                    .with_scheme(seed.scheme),
            ),
            None => None,
        };
        let roles = info["roles"]
            .as_array()
            .map(|roles| roles.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default();

        nodes.push(Node {
            id: id.clone(),
            name: info["name"].as_str().unwrap_or(id.as_str()).to_string(),
            address,
            roles,
        });
    }
    nodes.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(nodes)
}

/// Started copies per shard as `(node id, primary)`.
fn parse_shard_table(response: &RestResponse) -> Result<BTreeMap<ShardId, Vec<(String, bool)>>> {
    let body: Value = response.json().map_err(|source| TopologyError::Request {
        endpoint: SHARDS_ENDPOINT,
        source,
    })?;
    let groups = body["shards"]
        .as_array()
        .ok_or_else(|| malformed(SHARDS_ENDPOINT, "missing shards array"))?;

    let mut table = BTreeMap::new();
    for group in groups {
        let copies = group
            .as_array()
            .ok_or_else(|| malformed(SHARDS_ENDPOINT, "shard group is not an array"))?;
        let Some(first) = copies.first() else {
            continue;
        };
        let index = first["index"]
            .as_str()
            .ok_or_else(|| malformed(SHARDS_ENDPOINT, "shard copy without index"))?;
        let number = first["shard"]
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| malformed(SHARDS_ENDPOINT, "shard copy without number"))?;

        let started = copies
            .iter()
            .filter(|c| c["state"].as_str() == Some("STARTED"))
            .filter_map(|c| {
                let node = c["node"].as_str()?;
                Some((node.to_string(), c["primary"].as_bool().unwrap_or(false)))
            })
            .collect();
        table.insert(ShardId::new(index, number), started);
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::testing::MemoryCluster;
    use esbridge_rest::StatusCode;

    fn resolver(cluster: &Arc<MemoryCluster>) -> TopologyResolver {
        TopologyResolver::new(cluster.clone(), vec![cluster.seed()])
    }

    #[test]
    fn test_two_nodes_three_shards() {
        let cluster = Arc::new(MemoryCluster::with_nodes(2));
        cluster.create_index("radio", 3, 0);

        let topology = resolver(&cluster).resolve_shards("radio").unwrap();
        assert_eq!(topology.shard_count(), 3);
        for (_, candidates) in topology.shards() {
            assert!(!candidates.is_empty());
            assert!(candidates[0].primary);
        }
        assert_eq!(topology.nodes().count(), 2);
    }

    #[test]
    fn test_replicas_follow_primary_and_affinity_moves_first() {
        let cluster = Arc::new(MemoryCluster::with_nodes(3));
        cluster.create_index("radio", 2, 2);

        let topology = resolver(&cluster).resolve_shards("radio").unwrap();
        let shard = ShardId::new("radio", 0);
        let ids: Vec<_> = topology.candidates(&shard).unwrap().iter().map(|c| c.node_id.clone()).collect();
        assert_eq!(ids, vec!["node-0", "node-1", "node-2"]);

        let topology = resolver(&cluster)
            .with_preferred_node("node-2")
            .resolve_shards("radio")
            .unwrap();
        let first = &topology.candidates(&shard).unwrap()[0];
        assert_eq!(first.node_id, "node-2");
        assert!(!first.primary);
    }

    #[test]
    fn test_wildcard_expression_covers_every_index() {
        let cluster = Arc::new(MemoryCluster::with_nodes(1));
        cluster.create_index("logs-1", 2, 0);
        cluster.create_index("logs-2", 1, 0);
        cluster.create_index("metrics", 1, 0);

        let topology = resolver(&cluster).resolve_shards("logs-*").unwrap();
        assert_eq!(topology.shard_count(), 3);
        assert_eq!(topology.indices(), vec!["logs-1", "logs-2"]);
    }

    #[test]
    fn test_missing_index() {
        let cluster = Arc::new(MemoryCluster::with_nodes(1));
        let err = resolver(&cluster).resolve_shards("nope").unwrap_err();
        assert!(matches!(err, Error::Topology(TopologyError::IndexNotFound(_))));

        let err = resolver(&cluster).resolve_shards("nope-*").unwrap_err();
        assert!(matches!(err, Error::Topology(TopologyError::NoShards(_))));
    }

    #[test]
    fn test_rejected_request_is_a_topology_error() {
        let cluster = Arc::new(MemoryCluster::with_nodes(1));
        cluster.create_index("radio", 1, 0);
        cluster.fail_next("GET", "/radio/_search_shards", 403);

        let err = resolver(&cluster).resolve_shards("radio").unwrap_err();
        assert!(matches!(
            err,
            Error::Topology(TopologyError::Request {
                endpoint: SHARDS_ENDPOINT,
                source: TransportError::Status { status: 403, .. },
            })
        ));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_undecodable_body_is_a_topology_error() {
        struct Garbled;

        impl Transport for Garbled {
            fn execute(&self, _node: &NodeAddress, _request: RestRequest) -> esbridge_rest::Result<RestResponse> {
                Ok(RestResponse::new(StatusCode::OK, "<html>proxy error</html>"))
            }

            fn close(&self) {}
        }

        let resolver = TopologyResolver::new(Arc::new(Garbled), vec![NodeAddress::new("10.0.0.1", 9200)]);
        let err = resolver.discover_nodes().unwrap_err();
        assert!(matches!(
            err,
            Error::Topology(TopologyError::Request {
                endpoint: NODES_ENDPOINT,
                source: TransportError::Decode(_),
            })
        ));
    }

    #[test]
    fn test_unassigned_shard() {
        let cluster = Arc::new(MemoryCluster::with_nodes(2));
        cluster.create_index("radio", 2, 0);
        cluster.unassign_shard("radio", 1);

        let err = resolver(&cluster).resolve_shards("radio").unwrap_err();
        assert!(matches!(
            err,
            Error::Topology(TopologyError::ShardUnavailable { shard: 1, .. })
        ));
    }

    #[test]
    fn test_falls_through_unreachable_seed() {
        let cluster = Arc::new(MemoryCluster::with_nodes(2));
        cluster.create_index("radio", 1, 0);
        let dead = NodeAddress::new("10.9.9.9", 9200);
        cluster.set_unreachable(&dead);

        let resolver = TopologyResolver::new(cluster.clone(), vec![dead.clone(), cluster.seed()]);
        assert_eq!(resolver.resolve_shards("radio").unwrap().shard_count(), 1);

        let resolver = TopologyResolver::new(cluster.clone(), vec![dead]);
        let err = resolver.discover_nodes().unwrap_err();
        assert!(matches!(err, Error::Topology(TopologyError::SeedsUnreachable { .. })));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_copy_holders_without_http_fall_back_to_any_node() {
        let cluster = Arc::new(MemoryCluster::new());
        cluster.add_node("coord", Some(NodeAddress::new("10.0.0.1", 9200)), &["ingest"]);
        cluster.add_node("data", None, &["data"]);
        cluster.create_index("radio", 1, 0);

        let topology = resolver(&cluster).resolve_shards("radio").unwrap();
        let candidates = topology.candidates(&ShardId::new("radio", 0)).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].node_id, "coord");
        assert!(!candidates[0].hosts_copy);
        assert!(topology.node("coord").unwrap().is_coordinating_only());
    }

    #[test]
    fn test_node_matching() {
        let node = Node {
            id: "abc".into(),
            name: "es-1".into(),
            address: Some(NodeAddress::new("10.0.0.5", 9200)),
            roles: vec!["data_hot".into()],
        };
        assert!(node.matches("abc"));
        assert!(node.matches("es-1"));
        assert!(node.matches("10.0.0.5"));
        assert!(node.matches("10.0.0.5:9200"));
        assert!(!node.matches("10.0.0.6"));
        assert!(node.is_data());
    }
}
