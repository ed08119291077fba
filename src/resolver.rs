//! # Node Resolver
//!
//! Maps the target selectors of a request (`agent_list`, `node_id`, `node_list`,
//! `group_id`) to the cluster nodes owning them. The output is a partition
//! `node name -> ids`; an empty id list means "run on that node with the kwargs
//! unchanged".

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::cluster::{ClusterState, ClusterTransport};
use crate::constants::UNKNOWN_NODE;
use crate::error::Result;

/// Partition of target ids by owning node
pub type NodePartition = BTreeMap<String, Vec<String>>;

/// Filter applied to the registered-agents index
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentQuery {
    /// Restrict to these ids; `None` selects every agent
    pub ids: Option<Vec<String>>,
    pub group: Option<String>,
    /// Caller's permitted resources, applied by the index
    pub rbac_permissions: Map<String, Value>,
}

/// Registered agent and the node it reports to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub id: String,
    pub node_name: Option<String>,
}

/// Registered-agents index (global database collaborator)
#[async_trait]
pub trait AgentIndex: Send + Sync + Debug {
    async fn agents(&self, query: &AgentQuery) -> Result<Vec<AgentRecord>>;
}

/// Resolves request targets to owning nodes
#[derive(Debug, Clone)]
pub struct NodeResolver {
    index: Arc<dyn AgentIndex>,
    transport: Arc<dyn ClusterTransport>,
    cluster: ClusterState,
}

impl NodeResolver {
    pub fn new(
        index: Arc<dyn AgentIndex>,
        transport: Arc<dyn ClusterTransport>,
        cluster: ClusterState,
    ) -> Self {
        Self {
            index,
            transport,
            cluster,
        }
    }

    /// Compute the node partition for a request
    pub async fn resolve(
        &self,
        f_kwargs: &Map<String, Value>,
        broadcasting: bool,
        rbac_permissions: &Map<String, Value>,
    ) -> Result<NodePartition> {
        let reported = self.transport.connected_nodes().await?;
        if reported.is_empty() {
            debug!("No connected nodes, nothing to resolve");
            return Ok(NodePartition::new());
        }
        let mut connected: BTreeSet<String> = reported.into_iter().collect();
        connected.insert(self.cluster.node.name.clone());

        if broadcasting {
            return Ok(whole_nodes(connected));
        }

        let query = |ids: Option<Vec<String>>, group: Option<String>| AgentQuery {
            ids,
            group,
            rbac_permissions: rbac_permissions.clone(),
        };

        if let Some(selector) = f_kwargs.get("agent_list").or_else(|| f_kwargs.get("agent_id")) {
            return match selector_ids(selector) {
                Selector::All => {
                    let agents = self.index.agents(&query(None, None)).await?;
                    Ok(self.owners_or_local(&agents, &connected))
                }
                Selector::Ids(ids) => {
                    if ids.is_empty() {
                        return Ok(NodePartition::new());
                    }
                    let agents = self.index.agents(&query(Some(ids.clone()), None)).await?;
                    Ok(partition_ids(&ids, &agents, &connected))
                }
            };
        }

        if let Some(selector) = f_kwargs.get("node_id").or_else(|| f_kwargs.get("node_list")) {
            return Ok(match selector_ids(selector) {
                Selector::All => whole_nodes(connected),
                Selector::Ids(nodes) => {
                    let (known, missing): (Vec<_>, Vec<_>) =
                        nodes.into_iter().partition(|node| connected.contains(node));
                    if !missing.is_empty() {
                        warn!(nodes = ?missing, "Ignoring requested nodes that are not connected");
                    }
                    whole_nodes(known)
                }
            });
        }

        if let Some(group) = f_kwargs.get("group_id").and_then(Value::as_str) {
            let agents = self.index.agents(&query(None, Some(group.to_string()))).await?;
            return Ok(self.owners_or_local(&agents, &connected));
        }

        let agents = self.index.agents(&query(None, None)).await?;
        Ok(self.owners_or_local(&agents, &connected))
    }

    /// Connected owners of `agents`, or the local node when none is connected
    fn owners_or_local(&self, agents: &[AgentRecord], connected: &BTreeSet<String>) -> NodePartition {
        let owners: BTreeSet<String> = agents
            .iter()
            .filter_map(|agent| agent.node_name.clone())
            .filter(|node| connected.contains(node))
            .collect();

        if owners.is_empty() {
            return whole_nodes([self.cluster.node.name.clone()]);
        }
        whole_nodes(owners)
    }
}

enum Selector {
    All,
    Ids(Vec<String>),
}

fn selector_ids(value: &Value) -> Selector {
    match value {
        Value::String(s) if s == "*" => Selector::All,
        Value::String(s) => Selector::Ids(vec![s.clone()]),
        Value::Number(n) => Selector::Ids(vec![n.to_string()]),
        Value::Array(items) => Selector::Ids(
            items
                .iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .collect(),
        ),
        _ => Selector::Ids(Vec::new()),
    }
}

fn whole_nodes<I: IntoIterator<Item = String>>(nodes: I) -> NodePartition {
    nodes.into_iter().map(|node| (node, Vec::new())).collect()
}

/// Group `ids` by owning node; unknown ids and disconnected owners go to `unknown-node`
fn partition_ids(
    ids: &[String],
    agents: &[AgentRecord],
    connected: &BTreeSet<String>,
) -> NodePartition {
    let owners: BTreeMap<&str, Option<&str>> = agents
        .iter()
        .map(|agent| (agent.id.as_str(), agent.node_name.as_deref()))
        .collect();

    let mut partition = NodePartition::new();
    for id in ids {
        let node = match owners.get(id.as_str()) {
            Some(Some(node)) if connected.contains(*node) => node.to_string(),
            _ => UNKNOWN_NODE.to_string(),
        };
        let bucket = partition.entry(node).or_default();
        if !bucket.contains(id) {
            bucket.push(id.clone());
        }
    }
    partition
}
