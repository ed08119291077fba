//! # Distributed API Configuration
//!
//! Configuration consumed by the router, the queues and the wire layer. The cluster
//! daemon owns the authoritative cluster settings; this crate only reads the subset it
//! needs (role, node name, master name, socket paths, timeout floor).
//!
//! ## Usage
//!
//! ```rust,no_run
//! use dapi_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load_from_file("/etc/dapi/dapi.yaml")?;
//! let floor = manager.config().request_timeout_floor();
//! # Ok(())
//! # }
//! ```

pub mod loader;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cluster::NodeType;
use crate::constants::{DATABASE_LIMIT, DEFAULT_BASIC_SERVICES, DEFAULT_REQUEST_TIMEOUT};
use crate::error::{DapiError, Result};

pub use loader::ConfigManager;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DapiConfig {
    /// Minimum deadline, in seconds, for locally executed requests
    pub request_timeout_floor_secs: u64,

    /// Daemons that must be running before a request is accepted
    pub basic_services: Vec<String>,

    /// Root used to resolve relative `tmp_file` paths
    pub base_dir: PathBuf,

    /// Log file reported back to callers inside routed errors
    pub log_file: Option<String>,

    /// Priority list used when merging conflicting string values
    pub str_priority: Option<Vec<String>>,

    /// Default page size applied after merging generic results
    pub database_limit: usize,

    pub cluster: ClusterConfig,
    pub sockets: SocketConfig,
    pub logging: LoggingConfig,
}

impl Default for DapiConfig {
    fn default() -> Self {
        Self {
            request_timeout_floor_secs: DEFAULT_REQUEST_TIMEOUT.as_secs(),
            basic_services: DEFAULT_BASIC_SERVICES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            base_dir: PathBuf::from("/var/dapi"),
            log_file: Some("/var/dapi/logs/cluster.log".to_string()),
            str_priority: None,
            database_limit: DATABASE_LIMIT,
            cluster: ClusterConfig::default(),
            sockets: SocketConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl DapiConfig {
    /// Effective timeout floor
    pub fn request_timeout_floor(&self) -> Duration {
        Duration::from_secs(self.request_timeout_floor_secs)
    }

    /// Resolve a possibly relative path against `base_dir`
    pub fn resolve_path(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    /// Reject configurations the router cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.request_timeout_floor_secs == 0 {
            return Err(DapiError::Configuration(
                "request_timeout_floor_secs must be greater than 0".to_string(),
            ));
        }

        if self.cluster.node_name.trim().is_empty() {
            return Err(DapiError::Configuration(
                "cluster.node_name cannot be empty".to_string(),
            ));
        }

        if self.cluster.enabled && self.cluster.master_node.trim().is_empty() {
            return Err(DapiError::Configuration(
                "cluster.master_node cannot be empty when the cluster is enabled".to_string(),
            ));
        }

        if self.database_limit == 0 {
            return Err(DapiError::Configuration(
                "database_limit must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Cluster membership of the local node
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub enabled: bool,
    pub node_name: String,
    pub node_type: NodeType,
    /// Name of the master node, target of requests forwarded by workers
    pub master_node: String,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            node_name: "node01".to_string(),
            node_type: NodeType::Master,
            master_node: "node01".to_string(),
        }
    }
}

/// Local Unix socket paths
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SocketConfig {
    /// Socket of the local cluster daemon, used by [`crate::cluster::LocalClient`]
    pub cluster: PathBuf,
    /// Datagram socket accepting control messages
    pub control_queue: PathBuf,
    /// Socket path per daemon name, used by sendsync
    pub daemons: HashMap<String, PathBuf>,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            cluster: PathBuf::from("/var/dapi/queue/cluster/c-internal.sock"),
            control_queue: PathBuf::from("/var/dapi/queue/sockets/queue"),
            daemons: HashMap::new(),
        }
    }
}

/// Logging output settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Explicit filter directive; the environment default applies when unset
    pub level: Option<String>,
    /// Also write JSON lines into `directory`
    pub json: bool,
    pub directory: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: None,
            json: false,
            directory: PathBuf::from("log"),
        }
    }
}
