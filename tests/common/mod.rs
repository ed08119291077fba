//! Shared test doubles for the integration suites
//!
//! The cluster daemon, the agents database and the daemon status source are replaced
//! by in-memory fakes that record how the router talks to them.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};

use dapi_core::cluster::{ClusterTransport, NodeType};
use dapi_core::config::DapiConfig;
use dapi_core::constants::codes;
use dapi_core::resolver::{AgentIndex, AgentQuery, AgentRecord};
use dapi_core::results::{DapiResult, WireResponse};
use dapi_core::router::{
    DaemonStatusProvider, FunctionOutput, FunctionRegistry, RegisteredFunction, RequestRouter,
};
use dapi_core::{DapiError, Result};

/// One interaction with the transport
#[derive(Debug, Clone, PartialEq)]
pub enum TransportCall {
    Execute {
        node: String,
        command: String,
        payload: String,
    },
    SendFile {
        node: String,
        path: String,
        existed: bool,
    },
    SendRequest {
        node: String,
        command: String,
        payload: String,
    },
}

/// In-memory cluster: a fixed set of connected nodes, canned answers per node
#[derive(Debug, Default)]
pub struct MockTransport {
    nodes: Vec<String>,
    responses: Mutex<HashMap<String, Vec<u8>>>,
    calls: Mutex<Vec<TransportCall>>,
}

impl MockTransport {
    pub fn new<I, S>(nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            nodes: nodes.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Answer every `execute` on `node` with `response`
    pub fn respond(&self, node: &str, response: &WireResponse) {
        let encoded = response.encode().expect("encode canned response");
        self.responses
            .lock()
            .insert(node.to_string(), encoded.into_bytes());
    }

    /// Answer every `execute` on `node` with raw bytes
    pub fn respond_raw(&self, node: &str, response: &[u8]) {
        self.responses
            .lock()
            .insert(node.to_string(), response.to_vec());
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().clone()
    }

    pub fn executions(&self) -> Vec<(String, String, Value)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                TransportCall::Execute {
                    node,
                    command,
                    payload,
                } => Some((
                    node,
                    command,
                    serde_json::from_str(&payload).expect("request payload is JSON"),
                )),
                _ => None,
            })
            .collect()
    }

    pub fn sent_requests(&self) -> Vec<(String, String, String)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                TransportCall::SendRequest {
                    node,
                    command,
                    payload,
                } => Some((node, command, payload)),
                _ => None,
            })
            .collect()
    }

    fn check_node(&self, node: &str) -> Result<()> {
        if self.nodes.iter().any(|known| known == node) {
            Ok(())
        } else {
            Err(DapiError::cluster(codes::UNKNOWN_NODE).with_extra(node.to_string()))
        }
    }
}

#[async_trait]
impl ClusterTransport for MockTransport {
    async fn execute(&self, node: &str, command: &str, payload: &str) -> Result<Vec<u8>> {
        self.calls.lock().push(TransportCall::Execute {
            node: node.to_string(),
            command: command.to_string(),
            payload: payload.to_string(),
        });
        self.check_node(node)?;
        self.responses
            .lock()
            .get(node)
            .cloned()
            .ok_or_else(|| DapiError::cluster(codes::UNKNOWN_NODE).with_extra(node.to_string()))
    }

    async fn send_file(&self, node: &str, path: &Path) -> Result<Vec<u8>> {
        self.calls.lock().push(TransportCall::SendFile {
            node: node.to_string(),
            path: path.display().to_string(),
            existed: path.exists(),
        });
        self.check_node(node)?;
        Ok(b"File correctly sent".to_vec())
    }

    async fn send_request(&self, node: &str, command: &str, payload: &str) -> Result<Vec<u8>> {
        self.calls.lock().push(TransportCall::SendRequest {
            node: node.to_string(),
            command: command.to_string(),
            payload: payload.to_string(),
        });
        self.check_node(node)?;
        Ok(b"Request received".to_vec())
    }

    async fn connected_nodes(&self) -> Result<Vec<String>> {
        Ok(self.nodes.clone())
    }
}

/// Agents index backed by a vector
#[derive(Debug, Default)]
pub struct InMemoryAgentIndex {
    agents: Vec<AgentRecord>,
    groups: HashMap<String, Vec<String>>,
}

impl InMemoryAgentIndex {
    pub fn new(agents: &[(&str, &str)]) -> Self {
        Self {
            agents: agents
                .iter()
                .map(|(id, node)| AgentRecord {
                    id: id.to_string(),
                    node_name: Some(node.to_string()),
                })
                .collect(),
            groups: HashMap::new(),
        }
    }

    pub fn with_group(mut self, group: &str, ids: &[&str]) -> Self {
        self.groups
            .insert(group.to_string(), ids.iter().map(|id| id.to_string()).collect());
        self
    }
}

#[async_trait]
impl AgentIndex for InMemoryAgentIndex {
    async fn agents(&self, query: &AgentQuery) -> Result<Vec<AgentRecord>> {
        let group = query.group.as_ref().map(|group| {
            self.groups.get(group).cloned().unwrap_or_default()
        });
        Ok(self
            .agents
            .iter()
            .filter(|agent| query.ids.as_ref().map_or(true, |ids| ids.contains(&agent.id)))
            .filter(|agent| group.as_ref().map_or(true, |members| members.contains(&agent.id)))
            .cloned()
            .collect())
    }
}

/// Fixed daemon statuses
#[derive(Debug, Default)]
pub struct StaticDaemonStatus {
    statuses: HashMap<String, String>,
}

impl StaticDaemonStatus {
    pub fn new(statuses: &[(&str, &str)]) -> Self {
        Self {
            statuses: statuses
                .iter()
                .map(|(daemon, status)| (daemon.to_string(), status.to_string()))
                .collect(),
        }
    }
}

#[async_trait]
impl DaemonStatusProvider for StaticDaemonStatus {
    async fn statuses(&self) -> Result<HashMap<String, String>> {
        Ok(self.statuses.clone())
    }
}

/// Configuration for a node of a `master` + workers cluster
pub fn cluster_config(node_name: &str, node_type: NodeType) -> DapiConfig {
    let mut config = DapiConfig::default();
    config.cluster.enabled = true;
    config.cluster.node_name = node_name.to_string();
    config.cluster.node_type = node_type;
    config.cluster.master_node = "master".to_string();
    config.request_timeout_floor_secs = 1;
    config
}

/// Router with the given doubles attached
pub fn router(
    config: DapiConfig,
    registry: Arc<FunctionRegistry>,
    transport: Arc<MockTransport>,
    index: Arc<InMemoryAgentIndex>,
) -> RequestRouter {
    RequestRouter::new(Arc::new(config), registry)
        .with_transport(transport)
        .with_agent_index(index)
}

/// Counts how many times a registered function ran on this node
#[derive(Debug, Clone, Default)]
pub struct CallCounter(Arc<AtomicUsize>);

impl CallCounter {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn hit(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// Register `key` returning the affected items listed in `agent_list`
pub fn register_agent_echo(registry: &FunctionRegistry, key: &str) -> CallCounter {
    let counter = CallCounter::default();
    let calls = counter.clone();
    registry.register(RegisteredFunction::asynchronous(
        key,
        dapi_core::results::ResultKind::AffectedItems,
        move |_context, kwargs: Map<String, Value>| {
            calls.hit();
            async move {
                let ids = kwargs
                    .get("agent_list")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                Ok::<_, DapiError>(FunctionOutput::from(
                    dapi_core::results::AffectedItemsResult::with_items(ids),
                ))
            }
        },
    ));
    counter
}

/// Encoded successful answer carrying `result`
pub fn wire_result(result: impl Into<DapiResult>) -> WireResponse {
    WireResponse::Result(result.into())
}
