//! # Request Router
//!
//! Decides where a request runs and runs it there.
//!
//! The decision depends on whether the cluster is enabled, the request type and the role
//! of the local node:
//!
//! | cluster | request type | local role | action |
//! |---|---|---|---|
//! | disabled | any | any | execute locally |
//! | enabled | `local_any` | any | execute locally |
//! | enabled | `local_master` | master | execute locally |
//! | enabled | `local_master` | worker | forward to the master |
//! | enabled | `distributed_master` | master | resolve owners, dispatch partitions, merge |
//! | enabled | `distributed_master` | worker | forward to the master |
//! | enabled | `remote` | any | execute on the requested node |
//!
//! Requests received from another node (`from_cluster`) always execute locally.
//!
//! Local execution runs the registered function under a deadline of
//! `max(api_timeout, floor)` unless `wait_for_complete` is set. Failures are translated
//! into the coded error taxonomy before reaching the caller, except in debug mode where
//! unclassified errors are returned untouched.

pub mod context;
pub mod health;
pub mod registry;
pub mod request;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde_json::Value;
use tokio::time::timeout;
use tracing::{debug, error, trace, warn};

use crate::cluster::{ClusterState, ClusterTransport};
use crate::config::DapiConfig;
use crate::constants::protocol::commands;
use crate::constants::{codes, API_LOGGER, UNKNOWN_NODE};
use crate::error::{ApiError, DapiError, NodeErrorInfo, Result};
use crate::logging::log_request_operation;
use crate::resolver::{AgentIndex, NodeResolver};
use crate::results::{DapiResult, ResultKind, WireResponse};

pub use context::{CacheReset, ContextCache, ExecutionContext};
pub use health::{check_basic_services, DaemonStatusProvider};
pub use registry::{FunctionOutput, FunctionRegistry, Handler, RegisteredFunction};
pub use request::{DistributedRequest, RequestType};

/// Routing decision for one request
#[derive(Debug, Clone, PartialEq, Eq)]
enum Route {
    Local,
    Distribute,
    Forward {
        node: String,
        command: &'static str,
    },
}

/// Pagination re-applied after merging generic results from several nodes
#[derive(Debug, Clone, PartialEq)]
struct Page {
    offset: usize,
    limit: usize,
    sort: Option<(Vec<String>, bool)>,
}

impl Page {
    fn from_kwargs(kwargs: &serde_json::Map<String, Value>, default_limit: usize) -> Self {
        let number = |key: &str| kwargs.get(key).and_then(Value::as_u64).map(|n| n as usize);
        let sort = kwargs.get("sort").and_then(|sort| {
            let fields: Vec<String> = sort
                .get("fields")?
                .as_array()?
                .iter()
                .filter_map(|field| field.as_str().map(str::to_string))
                .collect();
            let ascending = sort.get("order").and_then(Value::as_str) != Some("desc");
            Some((fields, ascending))
        });

        Self {
            offset: number("offset").unwrap_or(0),
            limit: number("limit").unwrap_or(default_limit),
            sort,
        }
    }
}

/// Removes a request's temporary file once every node has received it
#[derive(Debug)]
struct TempFileGuard {
    path: PathBuf,
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "Could not remove temporary file");
            }
        }
    }
}

/// Central routing state machine
#[derive(Debug)]
pub struct RequestRouter {
    config: Arc<DapiConfig>,
    cluster: ClusterState,
    registry: Arc<FunctionRegistry>,
    transport: Option<Arc<dyn ClusterTransport>>,
    agent_index: Option<Arc<dyn AgentIndex>>,
    daemon_status: Option<Arc<dyn DaemonStatusProvider>>,
    cache: Arc<ContextCache>,
}

impl RequestRouter {
    pub fn new(config: Arc<DapiConfig>, registry: Arc<FunctionRegistry>) -> Self {
        let cluster = ClusterState::from_config(&config);
        Self {
            config,
            cluster,
            registry,
            transport: None,
            agent_index: None,
            daemon_status: None,
            cache: Arc::new(ContextCache::new()),
        }
    }

    pub fn with_transport(mut self, transport: Arc<dyn ClusterTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_agent_index(mut self, agent_index: Arc<dyn AgentIndex>) -> Self {
        self.agent_index = Some(agent_index);
        self
    }

    pub fn with_daemon_status(mut self, daemon_status: Arc<dyn DaemonStatusProvider>) -> Self {
        self.daemon_status = Some(daemon_status);
        self
    }

    pub fn cluster(&self) -> &ClusterState {
        &self.cluster
    }

    pub fn config(&self) -> &DapiConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<FunctionRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<ContextCache> {
        &self.cache
    }

    pub fn transport(&self) -> Result<&Arc<dyn ClusterTransport>> {
        self.transport.as_ref().ok_or_else(|| {
            DapiError::Configuration("cluster transport is not configured".to_string())
        })
    }

    /// Route and execute `request`, returning one merged result
    pub async fn distribute_function(&self, mut request: DistributedRequest) -> Result<DapiResult> {
        let started = Instant::now();
        let route = self.route_for(&request);

        let outcome = match self.registry.get(&request.function) {
            Ok(entry) => {
                request.is_async = entry.is_async();
                self.debug_log(
                    &request,
                    &format!(
                        "Receiving parameters {}",
                        Value::Object(request.masked_kwargs())
                    ),
                );
                self.run(&request, &entry, &route).await
            }
            Err(e) => Err(e),
        };

        let elapsed = format!("{}ms", started.elapsed().as_millis());
        match outcome {
            Ok(result) => {
                log_request_operation(
                    "distribute_function",
                    &request.function,
                    request.request_type.as_str(),
                    Some(&self.cluster.node.name),
                    "completed",
                    Some(&elapsed),
                );
                Ok(result)
            }
            Err(error) => {
                let error = self.translate_error(error, &request);
                log_request_operation(
                    "distribute_function",
                    &request.function,
                    request.request_type.as_str(),
                    Some(&self.cluster.node.name),
                    "failed",
                    Some(&elapsed),
                );
                Err(error)
            }
        }
    }

    fn route_for(&self, request: &DistributedRequest) -> Route {
        if !self.cluster.enabled || request.from_cluster {
            return Route::Local;
        }

        let master = self.cluster.is_master();
        match request.request_type {
            RequestType::LocalAny => Route::Local,
            RequestType::LocalMaster if master => Route::Local,
            RequestType::DistributedMaster if master => Route::Distribute,
            RequestType::Remote => match &request.node {
                Some(node) if self.cluster.is_local(node) => Route::Local,
                Some(node) => Route::Forward {
                    node: node.clone(),
                    command: commands::DAPI_FORWARD,
                },
                None => Route::Forward {
                    node: self.cluster.master_node.clone(),
                    command: commands::DAPI_FORWARD,
                },
            },
            RequestType::LocalMaster | RequestType::DistributedMaster => Route::Forward {
                node: self.cluster.master_node.clone(),
                command: commands::DAPI,
            },
        }
    }

    async fn run(
        &self,
        request: &DistributedRequest,
        entry: &RegisteredFunction,
        route: &Route,
    ) -> Result<DapiResult> {
        if *route == Route::Local {
            return self.execute_local(request, entry).await;
        }

        let _tmp_file = request.tmp_file().map(|path| TempFileGuard {
            path: self.config.resolve_path(path),
        });
        match route {
            Route::Distribute => self.distribute(request, entry).await,
            Route::Forward { node, command } => self.execute_remote(node, command, request).await,
            Route::Local => self.execute_local(request, entry).await,
        }
    }

    /// Run the function on this node under the request's deadline
    async fn execute_local(
        &self,
        request: &DistributedRequest,
        entry: &RegisteredFunction,
    ) -> Result<DapiResult> {
        if !entry.health_exempt {
            if let Some(provider) = &self.daemon_status {
                let services = request
                    .basic_services
                    .as_deref()
                    .unwrap_or(&self.config.basic_services);
                check_basic_services(provider.as_ref(), services, &self.cluster.node.name).await?;
            }
        }

        let context = self.context_for(request);
        let _reset = self.cache.reset_on_drop();
        let invocation = invoke(entry.handler.clone(), context, request.f_kwargs.clone());

        let output = if request.wait_for_complete {
            invocation.await?
        } else {
            let deadline = request.effective_timeout(self.config.request_timeout_floor());
            match timeout(deadline, invocation).await {
                Ok(output) => output?,
                Err(_) => return Err(timeout_error(request, deadline)),
            }
        };

        let result = match output {
            FunctionOutput::Result(result) => result,
            FunctionOutput::Payload(payload) => DapiResult::from_payload(entry.result_kind, payload)?,
        };
        Ok(self.with_str_priority(result))
    }

    /// Send the request to `node` and decode its answer
    async fn execute_remote(
        &self,
        node: &str,
        command: &str,
        request: &DistributedRequest,
    ) -> Result<DapiResult> {
        let transport = self.transport()?;

        let mut outgoing = request.clone();
        if command == commands::DAPI_FORWARD {
            outgoing.from_cluster = true;
        }

        if let Some(tmp_file) = request.tmp_file() {
            let path = self.config.resolve_path(tmp_file);
            self.debug_log(request, &format!("Sending file {} to {node}", path.display()));
            transport.send_file(node, Path::new(&path)).await?;
        }

        self.debug_log(request, &format!("Forwarding request to {node} ({command})"));
        let payload = serde_json::to_string(&outgoing)?;
        let response = transport.execute(node, command, &payload).await?;
        let result = WireResponse::decode(&response)?.into_result()?;
        Ok(self.with_str_priority(result))
    }

    /// Attach this node's string priority to generic results that carry none
    fn with_str_priority(&self, result: DapiResult) -> DapiResult {
        match (result, &self.config.str_priority) {
            (DapiResult::Generic(generic), Some(priority)) if generic.str_priority.is_none() => {
                DapiResult::Generic(generic.with_priority(priority.clone()))
            }
            (result, _) => result,
        }
    }

    /// Split the request among owning nodes and merge the partial results
    async fn distribute(
        &self,
        request: &DistributedRequest,
        entry: &RegisteredFunction,
    ) -> Result<DapiResult> {
        let transport = self.transport()?;
        let index = self.agent_index.as_ref().ok_or_else(|| {
            DapiError::Configuration("agent index is not configured".to_string())
        })?;
        let resolver = NodeResolver::new(Arc::clone(index), Arc::clone(transport), self.cluster.clone());

        let partition = resolver
            .resolve(&request.f_kwargs, request.broadcasting, &request.rbac_permissions)
            .await?;
        self.debug_log(request, &format!("Resolved nodes {partition:?}"));

        if partition.is_empty() {
            return self.execute_local(request, entry).await;
        }

        let page = (entry.result_kind == ResultKind::Generic && partition.len() > 1)
            .then(|| Page::from_kwargs(&request.f_kwargs, self.config.database_limit));

        let dispatches = partition.iter().map(|(node, ids)| {
            let sub_request = partition_request(request, ids, page.as_ref());
            async move {
                let outcome = if node.is_empty() || node == UNKNOWN_NODE || self.cluster.is_local(node) {
                    self.execute_local(&sub_request, entry).await
                } else {
                    self.execute_remote(node, commands::DAPI_FORWARD, &sub_request).await
                };
                (node.as_str(), ids.as_slice(), outcome)
            }
        });
        let outcomes = join_all(dispatches).await;

        let mut merged = merge_partitions(outcomes, request.debug)?;
        if let (DapiResult::Generic(result), Some(page)) = (&mut merged, page) {
            if let Some((fields, ascending)) = &page.sort {
                result.sort_affected_items(fields, *ascending);
            }
            result.paginate(page.offset, page.limit);
        }
        Ok(merged)
    }

    fn context_for(&self, request: &DistributedRequest) -> ExecutionContext {
        ExecutionContext {
            rbac_permissions: request.rbac_permissions.clone(),
            broadcasting: request.broadcasting,
            nodes: request.nodes.clone().unwrap_or_default(),
            current_user: request.current_user.clone(),
            origin_module: request.origin_module.clone(),
            node: self.cluster.node.clone(),
            local_client: request
                .local_client_arg
                .as_ref()
                .and(self.transport.clone()),
            cache: Arc::clone(&self.cache),
        }
    }

    /// Map any failure onto the coded taxonomy
    fn translate_error(&self, error: DapiError, request: &DistributedRequest) -> DapiError {
        let mut translated = match error {
            DapiError::Persistence { message } if message.to_lowercase().contains("disk is full") => {
                DapiError::Internal(ApiError::new(codes::DATABASE_FULL).with_extra(message))
            }
            DapiError::Serialization(e) => {
                DapiError::Internal(ApiError::new(codes::BAD_RESPONSE).with_extra(e.to_string()))
            }
            classified @ (DapiError::Domain(_) | DapiError::Internal(_) | DapiError::Cluster(_)) => {
                classified
            }
            other if request.debug => {
                error!(function = %request.function, error = %other, "Unhandled exception in debug mode");
                return other;
            }
            other => {
                error!(function = %request.function, error = %other, "Unhandled exception");
                DapiError::generic()
            }
        };

        if let Some(class) = translated.class() {
            error!(
                function = %request.function,
                class = ?class,
                code = translated.code(),
                "{translated}"
            );
        }
        if !request.debug {
            let info = self.error_info(&translated);
            if let Some(api) = translated.api_error_mut() {
                api.dapi_errors.extend(info);
            }
        }
        translated
    }

    /// `{node: {error, logfile}}` describing a failure on this node
    fn error_info(&self, error: &DapiError) -> Vec<(String, NodeErrorInfo)> {
        let node = if self.cluster.node.name.is_empty() {
            UNKNOWN_NODE.to_string()
        } else {
            self.cluster.node.name.clone()
        };
        let message = match error.api_error() {
            Some(api) => api.message.clone(),
            None => error.to_string(),
        };
        vec![(
            node,
            NodeErrorInfo {
                error: message,
                logfile: self.config.log_file.clone(),
            },
        )]
    }

    fn debug_log(&self, request: &DistributedRequest, message: &str) {
        if request.logger == API_LOGGER {
            trace!(function = %request.function, "{message}");
        } else {
            debug!(function = %request.function, "{message}");
        }
    }
}

async fn invoke(
    handler: Handler,
    context: ExecutionContext,
    kwargs: serde_json::Map<String, Value>,
) -> Result<FunctionOutput> {
    match handler {
        Handler::Async(function) => function(context, kwargs).await,
        Handler::Blocking(function) => {
            match tokio::task::spawn_blocking(move || function(context, kwargs)).await {
                Ok(outcome) => outcome,
                Err(e) => Err(DapiError::Unhandled(anyhow::anyhow!(
                    "blocking function did not complete: {e}"
                ))),
            }
        }
    }
}

fn timeout_error(request: &DistributedRequest, deadline: Duration) -> DapiError {
    warn!(
        function = %request.function,
        timeout_secs = deadline.as_secs_f64(),
        "Timeout executing API request"
    );
    DapiError::Internal(
        ApiError::new(codes::TIMEOUT_EXECUTING_REQUEST)
            .with_context("function", Value::from(request.function.clone()))
            .with_context("f_kwargs", Value::Object(request.scrubbed_kwargs())),
    )
}

/// Request for one partition: target ids rewritten, marked as coming from the cluster
fn partition_request(
    request: &DistributedRequest,
    ids: &[String],
    page: Option<&Page>,
) -> DistributedRequest {
    let mut sub_request = request.clone();
    sub_request.from_cluster = true;

    if !ids.is_empty() {
        let key = if !request.f_kwargs.contains_key("agent_list")
            && request.f_kwargs.contains_key("agent_id")
        {
            "agent_id"
        } else {
            "agent_list"
        };
        let ids = ids.iter().cloned().map(Value::from).collect();
        sub_request.f_kwargs.insert(key.to_string(), Value::Array(ids));
    }

    // Every node returns the first offset + limit items; the page is cut after merging
    if let Some(page) = page {
        if sub_request.f_kwargs.contains_key("offset") {
            sub_request.f_kwargs.insert("offset".to_string(), Value::from(0));
            sub_request
                .f_kwargs
                .insert("limit".to_string(), Value::from(page.offset + page.limit));
        }
    }

    sub_request
}

/// Merge partial results in node order
///
/// Failed partitions become failed items of an affected-items result; a generic result
/// cannot hold them, so the first failure is returned instead.
fn merge_partitions(
    outcomes: Vec<(&str, &[String], Result<DapiResult>)>,
    debug_mode: bool,
) -> Result<DapiResult> {
    let mut merged: Option<DapiResult> = None;
    let mut failures = Vec::new();

    for (node, ids, outcome) in outcomes {
        match outcome {
            Ok(result) => {
                merged = Some(match merged {
                    None => result,
                    Some(acc) => acc.union(result)?,
                });
            }
            Err(error) => {
                warn!(node = %node, error = %error, "Partial request failed");
                failures.push((node, ids, error));
            }
        }
    }

    let mut merged = match merged {
        Some(merged) => merged,
        None => {
            return Err(failures
                .into_iter()
                .next()
                .map(|(_, _, error)| error)
                .unwrap_or_else(DapiError::generic))
        }
    };

    for (node, ids, error) in failures {
        if matches!(merged, DapiResult::Generic(_)) || (debug_mode && error.api_error().is_none()) {
            return Err(error);
        }
        let message = error.to_string();
        let api = error
            .into_parts()
            .map(|(_, api)| api)
            .unwrap_or_else(|| ApiError::new(codes::INTERNAL_ERROR).with_extra(message));
        let api = if api.ids.is_empty() {
            api.with_ids(ids.iter().cloned())
        } else {
            api
        };
        merged = merged.union_error(api, node)?;
    }

    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::NodeType;
    use crate::results::{AffectedItemsResult, GenericResult};
    use serde_json::json;

    fn router(enabled: bool, node_type: NodeType) -> RequestRouter {
        let mut config = DapiConfig::default();
        config.cluster.enabled = enabled;
        config.cluster.node_type = node_type;
        config.cluster.node_name = match node_type {
            NodeType::Master => "master".to_string(),
            NodeType::Worker => "worker1".to_string(),
        };
        config.cluster.master_node = "master".to_string();
        RequestRouter::new(Arc::new(config), Arc::new(FunctionRegistry::new()))
    }

    #[test]
    fn test_route_table() {
        let request = |request_type| DistributedRequest::new("f", request_type);

        let disabled = router(false, NodeType::Worker);
        for request_type in [
            RequestType::LocalAny,
            RequestType::LocalMaster,
            RequestType::DistributedMaster,
            RequestType::Remote,
        ] {
            assert_eq!(disabled.route_for(&request(request_type)), Route::Local);
        }

        let master = router(true, NodeType::Master);
        assert_eq!(master.route_for(&request(RequestType::LocalAny)), Route::Local);
        assert_eq!(master.route_for(&request(RequestType::LocalMaster)), Route::Local);
        assert_eq!(
            master.route_for(&request(RequestType::DistributedMaster)),
            Route::Distribute
        );

        let worker = router(true, NodeType::Worker);
        let to_master = Route::Forward {
            node: "master".to_string(),
            command: commands::DAPI,
        };
        assert_eq!(worker.route_for(&request(RequestType::LocalAny)), Route::Local);
        assert_eq!(worker.route_for(&request(RequestType::LocalMaster)), to_master);
        assert_eq!(worker.route_for(&request(RequestType::DistributedMaster)), to_master);
        assert_eq!(
            worker.route_for(&request(RequestType::Remote).with_node("worker2")),
            Route::Forward {
                node: "worker2".to_string(),
                command: commands::DAPI_FORWARD,
            }
        );
        assert_eq!(
            worker.route_for(&request(RequestType::Remote).with_node("worker1")),
            Route::Local
        );
    }

    #[test]
    fn test_configured_priority_is_attached_to_generic_results() {
        let mut config = DapiConfig::default();
        config.str_priority = Some(vec!["active".to_string()]);
        let router = RequestRouter::new(Arc::new(config), Arc::new(FunctionRegistry::new()));

        let DapiResult::Generic(result) =
            router.with_str_priority(DapiResult::Generic(GenericResult::default()))
        else {
            panic!("expected a generic result");
        };
        assert_eq!(result.str_priority, Some(vec!["active".to_string()]));

        let own = GenericResult::default().with_priority(vec!["KO".to_string()]);
        let DapiResult::Generic(result) = router.with_str_priority(DapiResult::Generic(own)) else {
            panic!("expected a generic result");
        };
        assert_eq!(result.str_priority, Some(vec!["KO".to_string()]));
    }

    #[test]
    fn test_from_cluster_executes_locally() {
        let worker = router(true, NodeType::Worker);
        let mut request = DistributedRequest::new("f", RequestType::DistributedMaster);
        request.from_cluster = true;
        assert_eq!(worker.route_for(&request), Route::Local);
    }

    #[test]
    fn test_partition_request_rewrites_targets() {
        let request = DistributedRequest::new("f", RequestType::DistributedMaster)
            .with_kwarg("agent_list", json!("*"))
            .with_kwarg("offset", json!(5))
            .with_kwarg("limit", json!(10));
        let page = Page::from_kwargs(&request.f_kwargs, 500);

        let ids = vec!["001".to_string(), "002".to_string()];
        let sub_request = partition_request(&request, &ids, Some(&page));
        assert!(sub_request.from_cluster);
        assert_eq!(sub_request.f_kwargs["agent_list"], json!(["001", "002"]));
        assert_eq!(sub_request.f_kwargs["offset"], json!(0));
        assert_eq!(sub_request.f_kwargs["limit"], json!(15));

        let unchanged = partition_request(&request, &[], None);
        assert_eq!(unchanged.f_kwargs["agent_list"], json!("*"));
    }

    #[test]
    fn test_partition_request_keeps_agent_id_key() {
        let request = DistributedRequest::new("f", RequestType::DistributedMaster)
            .with_kwarg("agent_id", json!("003"));
        let sub_request = partition_request(&request, &["003".to_string()], None);
        assert_eq!(sub_request.f_kwargs["agent_id"], json!(["003"]));
        assert!(!sub_request.f_kwargs.contains_key("agent_list"));
    }

    #[test]
    fn test_merge_partitions_records_failed_nodes() {
        let ids_1 = vec!["001".to_string()];
        let ids_2 = vec!["002".to_string()];
        let outcomes = vec![
            (
                "master",
                ids_1.as_slice(),
                Ok(DapiResult::from(AffectedItemsResult::with_items(["001"]))),
            ),
            (
                "worker1",
                ids_2.as_slice(),
                Err(DapiError::cluster(codes::UNKNOWN_NODE)),
            ),
        ];

        let DapiResult::AffectedItems(merged) = merge_partitions(outcomes, false).unwrap() else {
            panic!("expected affected items");
        };
        assert_eq!(merged.total_affected_items, 1);
        let key = ApiError::new(codes::UNKNOWN_NODE).key();
        assert!(merged.failed_ids(&key).is_some_and(|ids| ids.contains("002")));
    }

    #[test]
    fn test_merge_partitions_generic_returns_first_error() {
        let outcomes = vec![
            (
                "master",
                &[][..],
                Ok(DapiResult::Generic(crate::results::GenericResult::default())),
            ),
            ("worker1", &[][..], Err(DapiError::cluster(codes::UNKNOWN_NODE))),
            ("worker2", &[][..], Err(DapiError::internal(codes::SOCKET_COMMUNICATION))),
        ];
        let error = merge_partitions(outcomes, false).unwrap_err();
        assert_eq!(error.code(), Some(codes::UNKNOWN_NODE));
    }

    #[test]
    fn test_page_from_kwargs() {
        let kwargs = json!({"offset": 2, "sort": {"fields": ["name"], "order": "desc"}});
        let page = Page::from_kwargs(kwargs.as_object().unwrap(), 500);
        assert_eq!(page.offset, 2);
        assert_eq!(page.limit, 500);
        assert_eq!(page.sort, Some((vec!["name".to_string()], false)));
    }
}
