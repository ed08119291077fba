//! # Cluster
//!
//! Local node identity and the transport used to reach other nodes. The transport is
//! an external collaborator; [`LocalClient`] is the concrete client talking to the
//! local cluster daemon over its framed Unix socket.

pub mod local_client;
pub mod transport;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::DapiConfig;

pub use local_client::LocalClient;
pub use transport::ClusterTransport;

/// Cluster role of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Master,
    Worker,
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Master => f.write_str("master"),
            Self::Worker => f.write_str("worker"),
        }
    }
}

/// Identity of the local node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub name: String,
}

/// Process-wide cluster view, derived once from configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterState {
    pub enabled: bool,
    pub node: NodeInfo,
    pub master_node: String,
}

impl ClusterState {
    pub fn from_config(config: &DapiConfig) -> Self {
        Self {
            enabled: config.cluster.enabled,
            node: NodeInfo {
                node_type: config.cluster.node_type,
                name: config.cluster.node_name.clone(),
            },
            master_node: config.cluster.master_node.clone(),
        }
    }

    pub fn is_master(&self) -> bool {
        self.node.node_type == NodeType::Master
    }

    /// Whether `name` designates the local node
    pub fn is_local(&self, name: &str) -> bool {
        self.node.name == name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_from_config() {
        let mut config = DapiConfig::default();
        config.cluster.enabled = true;
        config.cluster.node_name = "worker1".to_string();
        config.cluster.node_type = NodeType::Worker;
        config.cluster.master_node = "master".to_string();

        let state = ClusterState::from_config(&config);
        assert!(state.enabled);
        assert!(!state.is_master());
        assert!(state.is_local("worker1"));
        assert_eq!(state.master_node, "master");
    }

    #[test]
    fn test_node_info_serializes_type_field() {
        let info = NodeInfo {
            node_type: NodeType::Master,
            name: "master".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&info).unwrap(),
            serde_json::json!({"type": "master", "name": "master"})
        );
    }
}
