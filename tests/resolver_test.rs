//! Target resolution against an in-memory cluster

mod common;

use std::sync::Arc;

use serde_json::{json, Map, Value};

use common::{cluster_config, InMemoryAgentIndex, MockTransport};
use dapi_core::cluster::{ClusterState, NodeType};
use dapi_core::constants::UNKNOWN_NODE;
use dapi_core::resolver::{NodePartition, NodeResolver};

fn resolver(nodes: &[&str], index: InMemoryAgentIndex) -> NodeResolver {
    let cluster = ClusterState::from_config(&cluster_config("master", NodeType::Master));
    NodeResolver::new(
        Arc::new(index),
        Arc::new(MockTransport::new(nodes.iter().copied())),
        cluster,
    )
}

fn kwargs(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

fn partition(entries: &[(&str, Vec<&str>)]) -> NodePartition {
    entries
        .iter()
        .map(|(node, ids)| (node.to_string(), ids.iter().map(|id| id.to_string()).collect()))
        .collect()
}

fn agents() -> InMemoryAgentIndex {
    InMemoryAgentIndex::new(&[
        ("000", "master"),
        ("001", "worker1"),
        ("002", "worker2"),
        ("003", "worker3"),
    ])
    .with_group("web", &["001", "003"])
}

#[tokio::test]
async fn test_no_connected_nodes_resolves_nothing() {
    let resolved = resolver(&[], agents())
        .resolve(&kwargs(json!({"agent_list": "*"})), true, &Map::new())
        .await
        .unwrap();
    assert!(resolved.is_empty());
}

#[tokio::test]
async fn test_broadcasting_targets_every_connected_node() {
    let resolved = resolver(&["master", "worker1", "worker2"], agents())
        .resolve(&kwargs(json!({"agent_list": ["001"]})), true, &Map::new())
        .await
        .unwrap();
    assert_eq!(
        resolved,
        partition(&[("master", vec![]), ("worker1", vec![]), ("worker2", vec![])])
    );
}

#[tokio::test]
async fn test_agent_ids_are_partitioned_by_owner() {
    // worker3 owns 003 but is not connected
    let resolved = resolver(&["master", "worker1", "worker2"], agents())
        .resolve(
            &kwargs(json!({"agent_list": ["000", "001", "002", "003", "999"]})),
            false,
            &Map::new(),
        )
        .await
        .unwrap();
    assert_eq!(
        resolved,
        partition(&[
            ("master", vec!["000"]),
            (UNKNOWN_NODE, vec!["003", "999"]),
            ("worker1", vec!["001"]),
            ("worker2", vec!["002"]),
        ])
    );
}

#[tokio::test]
async fn test_all_agents_selects_connected_owners() {
    let resolved = resolver(&["master", "worker1"], agents())
        .resolve(&kwargs(json!({"agent_list": "*"})), false, &Map::new())
        .await
        .unwrap();
    assert_eq!(resolved, partition(&[("master", vec![]), ("worker1", vec![])]));
}

#[tokio::test]
async fn test_empty_agent_list_resolves_nothing() {
    let resolved = resolver(&["master", "worker1"], agents())
        .resolve(&kwargs(json!({"agent_list": []})), false, &Map::new())
        .await
        .unwrap();
    assert!(resolved.is_empty());
}

#[tokio::test]
async fn test_node_list_skips_disconnected_nodes() {
    let resolved = resolver(&["master", "worker1"], agents())
        .resolve(
            &kwargs(json!({"node_list": ["worker1", "worker7"]})),
            false,
            &Map::new(),
        )
        .await
        .unwrap();
    assert_eq!(resolved, partition(&[("worker1", vec![])]));
}

#[tokio::test]
async fn test_group_resolves_to_member_owners() {
    let resolved = resolver(&["master", "worker1", "worker3"], agents())
        .resolve(&kwargs(json!({"group_id": "web"})), false, &Map::new())
        .await
        .unwrap();
    assert_eq!(resolved, partition(&[("worker1", vec![]), ("worker3", vec![])]));
}

#[tokio::test]
async fn test_group_without_connected_owner_falls_back_to_local() {
    let resolved = resolver(&["master", "worker2"], agents())
        .resolve(&kwargs(json!({"group_id": "web"})), false, &Map::new())
        .await
        .unwrap();
    assert_eq!(resolved, partition(&[("master", vec![])]));
}
