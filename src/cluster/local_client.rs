//! Client of the local cluster daemon.
//!
//! Every call opens the cluster socket, sends one Style B envelope and waits for one
//! response envelope, so concurrent callers never share a stream.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::time::timeout;
use tracing::debug;

use super::transport::ClusterTransport;
use crate::config::DapiConfig;
use crate::constants::codes;
use crate::constants::protocol::commands;
use crate::error::{DapiError, Result};
use crate::router::DistributedRequest;
use crate::wire::{JsonSocket, Origin};

const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_REQUEST_FLOOR: Duration = Duration::from_secs(10);
/// Extra wait so the peer's own timeout error arrives before ours fires
const REMOTE_REPLY_MARGIN: Duration = Duration::from_secs(1);

/// [`ClusterTransport`] over the cluster daemon's Unix socket
#[derive(Debug, Clone)]
pub struct LocalClient {
    socket_path: PathBuf,
    node_name: String,
    send_timeout: Duration,
    request_floor: Duration,
}

impl LocalClient {
    pub fn new(socket_path: impl Into<PathBuf>, node_name: impl Into<String>) -> Self {
        Self {
            socket_path: socket_path.into(),
            node_name: node_name.into(),
            send_timeout: DEFAULT_SEND_TIMEOUT,
            request_floor: DEFAULT_REQUEST_FLOOR,
        }
    }

    pub fn from_config(config: &DapiConfig) -> Self {
        Self::new(&config.sockets.cluster, &config.cluster.node_name)
            .with_request_floor(config.request_timeout_floor())
    }

    pub fn with_send_timeout(mut self, send_timeout: Duration) -> Self {
        self.send_timeout = send_timeout;
        self
    }

    pub fn with_request_floor(mut self, request_floor: Duration) -> Self {
        self.request_floor = request_floor;
        self
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Deadline for a forwarded request payload
    ///
    /// `None` when the request waits for completion. Otherwise the request's own
    /// deadline plus a margin, never below the send timeout. Payloads that are not
    /// requests use the send timeout.
    fn execute_deadline(&self, payload: &str) -> Option<Duration> {
        match serde_json::from_str::<DistributedRequest>(payload) {
            Ok(request) if request.wait_for_complete => None,
            Ok(request) => Some(
                (request.effective_timeout(self.request_floor) + REMOTE_REPLY_MARGIN)
                    .max(self.send_timeout),
            ),
            Err(_) => Some(self.send_timeout),
        }
    }

    async fn exchange(
        &self,
        command: &str,
        parameters: Map<String, Value>,
        deadline: Option<Duration>,
    ) -> Result<Value> {
        let request = async {
            let mut socket = JsonSocket::connect(&self.socket_path).await?;
            socket
                .send(
                    Some(Origin::node(&self.node_name)),
                    Some(command),
                    Some(parameters),
                )
                .await?;
            socket.receive().await
        };

        let Some(deadline) = deadline else {
            return request.await;
        };
        match timeout(deadline, request).await {
            Ok(response) => response,
            Err(_) => Err(DapiError::cluster(codes::TIMEOUT_SENDING_REQUEST)
                .with_extra(format!("command '{command}'"))),
        }
    }

    async fn exchange_bytes(
        &self,
        command: &str,
        parameters: Map<String, Value>,
        deadline: Option<Duration>,
    ) -> Result<Vec<u8>> {
        let data = self.exchange(command, parameters, deadline).await?;
        Ok(match data {
            Value::String(text) => text.into_bytes(),
            other => serde_json::to_vec(&other)?,
        })
    }
}

fn parameters(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

#[async_trait]
impl ClusterTransport for LocalClient {
    async fn execute(&self, node: &str, command: &str, payload: &str) -> Result<Vec<u8>> {
        debug!(node = %node, command = %command, "Sending command through cluster socket");
        self.exchange_bytes(
            command,
            parameters(json!({"node": node, "payload": payload})),
            self.execute_deadline(payload),
        )
        .await
    }

    async fn send_file(&self, node: &str, path: &Path) -> Result<Vec<u8>> {
        debug!(node = %node, path = %path.display(), "Sending file through cluster socket");
        self.exchange_bytes(
            commands::SEND_FILE,
            parameters(json!({"node": node, "path": path.to_string_lossy()})),
            Some(self.send_timeout),
        )
        .await
    }

    async fn send_request(&self, node: &str, command: &str, payload: &str) -> Result<Vec<u8>> {
        self.exchange_bytes(
            commands::SEND_REQUEST,
            parameters(json!({"node": node, "command": command, "payload": payload})),
            Some(self.send_timeout),
        )
        .await
    }

    async fn connected_nodes(&self) -> Result<Vec<String>> {
        let data = self
            .exchange(commands::GET_NODES, Map::new(), Some(self.send_timeout))
            .await?;
        let items = match &data {
            Value::Array(items) => items.as_slice(),
            Value::Object(map) => map
                .get("items")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default(),
            _ => &[],
        };

        Ok(items
            .iter()
            .filter_map(|item| match item {
                Value::String(name) => Some(name.clone()),
                Value::Object(node) => node.get("name").and_then(Value::as_str).map(str::to_string),
                _ => None,
            })
            .collect())
    }
}
