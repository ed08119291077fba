//! Request descriptor routed by [`super::RequestRouter`].

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::constants::{CLUSTER_LOGGER, DEFAULT_ORIGIN_MODULE, MASKED_KWARGS, SENSITIVE_KWARGS};

/// Where a request is allowed to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    /// Any node can answer
    LocalAny,
    /// Only the master can answer
    LocalMaster,
    /// The master splits the request among the nodes owning its targets
    DistributedMaster,
    /// Sent to an explicit node
    Remote,
}

impl RequestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LocalAny => "local_any",
            Self::LocalMaster => "local_master",
            Self::DistributedMaster => "distributed_master",
            Self::Remote => "remote",
        }
    }
}

/// A function invocation plus everything needed to decide where it runs
///
/// The descriptor is what travels between nodes, so every field is serialisable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistributedRequest {
    /// Registry key of the function to run
    pub function: String,
    pub f_kwargs: Map<String, Value>,
    pub request_type: RequestType,
    /// Whether the function runs as a coroutine; set from the registry when routed
    pub is_async: bool,
    /// Run without a deadline
    pub wait_for_complete: bool,
    pub api_timeout: Option<Duration>,
    /// Diagnostic mode: unclassified errors are returned untranslated
    pub debug: bool,
    pub broadcasting: bool,
    /// Target node list exposed to the function
    pub nodes: Option<Vec<String>>,
    /// Explicit destination for remote requests
    pub node: Option<String>,
    /// The request was sent by another node
    pub from_cluster: bool,
    /// Hand the cluster transport to the function under this name
    pub local_client_arg: Option<String>,
    /// Daemons that must be running; the configured list applies when unset
    pub basic_services: Option<Vec<String>>,
    pub rbac_permissions: Map<String, Value>,
    pub current_user: Option<String>,
    pub origin_module: String,
    /// Name of the logger the caller uses
    pub logger: String,
}

impl Default for DistributedRequest {
    fn default() -> Self {
        Self {
            function: String::new(),
            f_kwargs: Map::new(),
            request_type: RequestType::LocalAny,
            is_async: false,
            wait_for_complete: false,
            api_timeout: None,
            debug: false,
            broadcasting: false,
            nodes: None,
            node: None,
            from_cluster: false,
            local_client_arg: None,
            basic_services: None,
            rbac_permissions: Map::new(),
            current_user: None,
            origin_module: DEFAULT_ORIGIN_MODULE.to_string(),
            logger: CLUSTER_LOGGER.to_string(),
        }
    }
}

impl DistributedRequest {
    pub fn new(function: impl Into<String>, request_type: RequestType) -> Self {
        Self {
            function: function.into(),
            request_type,
            ..Self::default()
        }
    }

    pub fn with_kwargs(mut self, f_kwargs: Map<String, Value>) -> Self {
        self.f_kwargs = f_kwargs;
        self
    }

    pub fn with_kwarg(mut self, key: impl Into<String>, value: Value) -> Self {
        self.f_kwargs.insert(key.into(), value);
        self
    }

    pub fn with_timeout(mut self, api_timeout: Duration) -> Self {
        self.api_timeout = Some(api_timeout);
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_broadcasting(mut self, broadcasting: bool) -> Self {
        self.broadcasting = broadcasting;
        self
    }

    pub fn with_node(mut self, node: impl Into<String>) -> Self {
        self.node = Some(node.into());
        self
    }

    pub fn with_wait_for_complete(mut self, wait_for_complete: bool) -> Self {
        self.wait_for_complete = wait_for_complete;
        self
    }

    pub fn with_basic_services(mut self, basic_services: Vec<String>) -> Self {
        self.basic_services = Some(basic_services);
        self
    }

    pub fn with_rbac_permissions(mut self, rbac_permissions: Map<String, Value>) -> Self {
        self.rbac_permissions = rbac_permissions;
        self
    }

    pub fn with_logger(mut self, logger: impl Into<String>) -> Self {
        self.logger = logger.into();
        self
    }

    /// `max(api_timeout, floor)`
    pub fn effective_timeout(&self, floor: Duration) -> Duration {
        self.api_timeout.unwrap_or(Duration::ZERO).max(floor)
    }

    /// Kwargs safe to echo in errors: sensitive lists removed, secrets masked
    pub fn scrubbed_kwargs(&self) -> Map<String, Value> {
        let mut kwargs = self.masked_kwargs();
        for key in SENSITIVE_KWARGS {
            kwargs.remove(*key);
        }
        kwargs
    }

    /// Kwargs safe to log
    pub fn masked_kwargs(&self) -> Map<String, Value> {
        let mut kwargs = self.f_kwargs.clone();
        for key in MASKED_KWARGS {
            if let Some(value) = kwargs.get_mut(*key) {
                *value = Value::String("****".to_string());
            }
        }
        kwargs
    }

    /// Path of the temporary file attached to the request, if any
    pub fn tmp_file(&self) -> Option<&str> {
        self.f_kwargs.get("tmp_file").and_then(Value::as_str)
    }
}
