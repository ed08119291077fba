//! Transport contract used to reach other cluster nodes.

use std::fmt::Debug;
use std::path::Path;

use async_trait::async_trait;

use crate::error::Result;

/// Client able to address any node of the cluster by name
///
/// Implementations are shared by concurrent router invocations and must not assume
/// exclusive use of their connection.
#[async_trait]
pub trait ClusterTransport: Send + Sync + Debug {
    /// Run `command` on `node` and return its raw response
    async fn execute(&self, node: &str, command: &str, payload: &str) -> Result<Vec<u8>>;

    /// Ship a local file to `node`
    async fn send_file(&self, node: &str, path: &Path) -> Result<Vec<u8>>;

    /// Deliver a request to `node` without waiting for it to be executed
    async fn send_request(&self, node: &str, command: &str, payload: &str) -> Result<Vec<u8>>;

    /// Names of the nodes currently connected, the local node included
    async fn connected_nodes(&self) -> Result<Vec<String>>;
}
