//! Read planning.
//!
//! A plan is the ordered list of [`ShardQuery`] values a read is split into,
//! one per shard. Planning is a pure function of the resource, the options
//! and the topology snapshot: workers of a distributed job can each compute
//! the same plan independently and pick their own entry without talking to
//! each other.

use crate::error::{PlanError, Result};
use crate::resource::Resource;
use crate::settings::format_keep_alive;
use crate::topology::{Node, ShardId, Topology};
use esbridge_rest::NodeAddress;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// Restriction of a plan to a single shard or node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlanOverride {
    /// Emit one query for this shard.
    Shard {
        /// Concrete index; required when the expression covers several
        /// indices with the same shard number.
        index: Option<String>,
        /// Shard number.
        shard: u32,
        /// Node to send it to; must be a candidate of the shard.
        node: Option<String>,
    },
    /// Emit one query covering every shard assigned to this node.
    Node(String),
}

/// Options of a read plan.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanOptions {
    /// Documents per scroll page.
    pub page_size: usize,
    /// Server-side scroll keep-alive.
    pub keep_alive: Duration,
    /// Node (id, name or host) preferred when it is a shard candidate.
    pub preferred_node: Option<String>,
    /// Single shard or node restriction.
    pub pin: Option<PlanOverride>,
    /// Query DSL document sent as the search body.
    pub body: Option<String>,
}

impl Default for PlanOptions {
    fn default() -> Self {
        Self {
            page_size: 50,
            keep_alive: Duration::from_secs(10 * 60),
            preferred_node: None,
            pin: None,
            body: None,
        }
    }
}

impl PlanOptions {
    /// Set documents per scroll page.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Set the scroll keep-alive.
    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Prefer a node among shard candidates.
    pub fn with_preferred_node(mut self, node: impl Into<String>) -> Self {
        self.preferred_node = Some(node.into());
        self
    }

    /// Restrict the plan to one shard or node.
    pub fn with_pin(mut self, pin: PlanOverride) -> Self {
        self.pin = Some(pin);
        self
    }

    /// Send a query DSL document as the search body.
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }
}

/// One unit of a read plan: a scroll query pinned to shards of one index
/// on one node.
///
/// Serializable so a framework can ship it to the worker that runs it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardQuery {
    /// Concrete index.
    pub index: String,
    /// Mapping type, if the resource names one.
    pub doc_type: Option<String>,
    /// Shard numbers covered, ascending.
    pub shards: Vec<u32>,
    /// Id of the target node.
    pub node_id: String,
    /// HTTP endpoint of the target node.
    pub node: NodeAddress,
    /// Raw URI query string.
    pub query: Option<String>,
    /// Query DSL body.
    pub body: Option<String>,
    /// Documents per page.
    pub page_size: usize,
    /// Server-side keep-alive.
    pub keep_alive: Duration,
}

impl ShardQuery {
    /// `/<index>[/<type>]/_search`.
    pub fn search_path(&self) -> String {
        match &self.doc_type {
            Some(t) => format!("/{}/{}/_search", self.index, t),
            None => format!("/{}/_search", self.index),
        }
    }

    /// Search preference restricting execution to the covered shards.
    pub fn preference(&self) -> String {
        let shards: Vec<String> = self.shards.iter().map(u32::to_string).collect();
        format!("_shards:{}|_local", shards.join(","))
    }

    /// Keep-alive in the cluster's time-unit notation.
    pub fn keep_alive_param(&self) -> String {
        format_keep_alive(self.keep_alive)
    }
}

impl fmt::Display for ShardQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shards: Vec<String> = self.shards.iter().map(u32::to_string).collect();
        write!(
            f,
            "[{}][{}] on {} ({})",
            self.index,
            shards.join(","),
            self.node_id,
            self.node
        )
    }
}

/// Builds read plans from topology snapshots.
#[derive(Debug, Clone, Default)]
pub struct QueryPlanner {
    options: PlanOptions,
}

impl QueryPlanner {
    /// Create a planner.
    pub fn new(options: PlanOptions) -> Self {
        Self { options }
    }

    /// Planner options.
    pub fn options(&self) -> &PlanOptions {
        &self.options
    }

    /// Shard to node assignment of an unrestricted plan, in plan order.
    ///
    /// The preferred node wins when it is a candidate; otherwise shards are
    /// spread round-robin over their candidates by plan position.
    pub fn assign<'t>(&self, topology: &'t Topology) -> Vec<(&'t ShardId, &'t str)> {
        topology
            .shards()
            .enumerate()
            .filter_map(|(ordinal, (shard, candidates))| {
                if candidates.is_empty() {
                    return None;
                }
                let preferred = self.options.preferred_node.as_deref().and_then(|key| {
                    candidates.iter().find(|c| {
                        topology.node(&c.node_id).is_some_and(|n| n.matches(key))
                    })
                });
                let chosen = preferred.unwrap_or(&candidates[ordinal % candidates.len()]);
                Some((shard, chosen.node_id.as_str()))
            })
            .collect()
    }

    /// Build the plan for a read resource.
    ///
    /// Without a pin the plan holds exactly one query per shard; with a pin
    /// it holds exactly one query.
    pub fn build_plan(&self, resource: &Resource, topology: &Topology) -> Result<Vec<ShardQuery>> {
        let assignment = self.assign(topology);

        let plan = match &self.options.pin {
            None => assignment
                .iter()
                .map(|(shard, node_id)| {
                    self.shard_query(resource, topology, &shard.index, vec![shard.number], node_id)
                })
                .collect::<Result<Vec<_>>>()?,
            Some(PlanOverride::Shard { index, shard, node }) => {
                vec![self.pin_shard(resource, topology, &assignment, index.as_deref(), *shard, node.as_deref())?]
            }
            Some(PlanOverride::Node(key)) => vec![self.pin_node(resource, topology, &assignment, key)?],
        };

        debug!(
            resource = %resource,
            shards = topology.shard_count(),
            queries = plan.len(),
            "Built read plan"
        );
        Ok(plan)
    }

    fn pin_shard(
        &self,
        resource: &Resource,
        topology: &Topology,
        assignment: &[(&ShardId, &str)],
        index: Option<&str>,
        shard: u32,
        node: Option<&str>,
    ) -> Result<ShardQuery> {
        let matching: Vec<&(&ShardId, &str)> = assignment
            .iter()
            .filter(|(id, _)| id.number == shard && index.is_none_or(|i| id.index == i))
            .collect();

        let (id, assigned) = match matching.as_slice() {
            [] => {
                return Err(PlanError::ShardNotFound {
                    index: index.map(str::to_string),
                    shard,
                }
                .into());
            }
            [single] => **single,
            many => {
                return Err(PlanError::AmbiguousShard {
                    shard,
                    indices: many.iter().map(|(id, _)| id.index.clone()).collect(),
                }
                .into());
            }
        };

        let node_id = match node {
            None => assigned,
            Some(key) => topology
                .candidate_nodes(id)
                .into_iter()
                .find(|n| n.matches(key))
                .map(|n| n.id.as_str())
                .ok_or_else(|| PlanError::NodeNotCandidate {
                    node: key.to_string(),
                    index: id.index.clone(),
                    shard,
                })?,
        };

        self.shard_query(resource, topology, &id.index, vec![shard], node_id)
    }

    fn pin_node(
        &self,
        resource: &Resource,
        topology: &Topology,
        assignment: &[(&ShardId, &str)],
        key: &str,
    ) -> Result<ShardQuery> {
        let node = topology
            .find_node(key)
            .ok_or_else(|| PlanError::NodeNotFound(key.to_string()))?;

        let owned: Vec<&ShardId> = assignment
            .iter()
            .filter(|(_, node_id)| *node_id == node.id)
            .map(|(shard, _)| *shard)
            .collect();

        let Some(first) = owned.first() else {
            return Err(PlanError::NodeUnassigned(node.id.clone()).into());
        };

        let mut indices: Vec<String> = owned.iter().map(|s| s.index.clone()).collect();
        indices.dedup();
        if indices.len() > 1 {
            return Err(PlanError::NodeSpansIndices {
                node: node.id.clone(),
                indices,
            }
            .into());
        }

        let shards = owned.iter().map(|s| s.number).collect();
        self.shard_query(resource, topology, &first.index, shards, &node.id)
    }

    fn shard_query(
        &self,
        resource: &Resource,
        topology: &Topology,
        index: &str,
        shards: Vec<u32>,
        node_id: &str,
    ) -> Result<ShardQuery> {
        let address = topology
            .node(node_id)
            .and_then(|n: &Node| n.address.clone())
            .ok_or_else(|| PlanError::NodeNotFound(node_id.to_string()))?;

        Ok(ShardQuery {
            index: index.to_string(),
            doc_type: resource.doc_type().map(str::to_string),
            shards,
            node_id: node_id.to_string(),
            node: address,
            query: resource.query().map(str::to_string),
            body: self.options.body.clone(),
            page_size: self.options.page_size,
            keep_alive: self.options.keep_alive,
        })
    }
}
