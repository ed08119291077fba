#![allow(clippy::doc_markdown)] // Allow technical terms like JSON, DAPI in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # DAPI Core
//!
//! Distributed-execution core of a multi-node security-management cluster.
//!
//! ## Overview
//!
//! Given an API-level operation, the crate decides *where* in the cluster it must run
//! (the calling node, the master, the workers owning its targets, or every node), runs it
//! there and returns a single, well-ordered result even though agents and their data are
//! partitioned across nodes.
//!
//! ## Architecture
//!
//! ```text
//! caller -> RequestRouter::distribute_function
//!             |-- local execution (registry function under a deadline)
//!             `-- NodeResolver -> ClusterTransport -> remote ApiRequestQueue
//!                                                       `-> RequestRouter (locally)
//!          <- DapiResult (union / k-way merge of partial results)
//! ```
//!
//! ## Module Organization
//!
//! - [`wire`] - Length-prefixed framing, control messages and JSON envelopes
//! - [`results`] - Generic and affected-items results, union and k-way merge
//! - [`cluster`] - Node identity and the cluster transport contract
//! - [`resolver`] - Target selectors to owning nodes
//! - [`router`] - Routing state machine, function registry, execution context
//! - [`queues`] - Consumers of requests sent by other nodes
//! - [`config`] - Configuration management
//! - [`error`] - Structured error handling
//! - [`logging`] - Structured logging
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use dapi_core::config::DapiConfig;
//! use dapi_core::results::ResultKind;
//! use dapi_core::router::{
//!     DistributedRequest, FunctionOutput, FunctionRegistry, RegisteredFunction, RequestRouter,
//!     RequestType,
//! };
//!
//! # async fn example() -> dapi_core::Result<()> {
//! let registry = Arc::new(FunctionRegistry::new());
//! registry.register(RegisteredFunction::blocking(
//!     "manager.info",
//!     ResultKind::Generic,
//!     |context, _kwargs| {
//!         Ok(FunctionOutput::from(serde_json::json!({"data": {"node": context.node.name}})))
//!     },
//! ));
//!
//! let router = RequestRouter::new(Arc::new(DapiConfig::default()), registry);
//! let result = router
//!     .distribute_function(DistributedRequest::new("manager.info", RequestType::LocalAny))
//!     .await?;
//! println!("{}", result.render());
//! # Ok(())
//! # }
//! ```

pub mod cluster;
pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod queues;
pub mod resolver;
pub mod results;
pub mod router;
pub mod wire;

pub use cluster::{ClusterState, ClusterTransport, LocalClient, NodeInfo, NodeType};
pub use config::{ConfigManager, DapiConfig};
pub use error::{ApiError, DapiError, ErrorClass, Result};
pub use queues::{ApiRequestQueue, QueueHandle, SendSyncRequestQueue};
pub use resolver::{AgentIndex, NodeResolver};
pub use results::{AffectedItemsResult, DapiResult, GenericResult, WireResponse};
pub use router::{DistributedRequest, FunctionRegistry, RequestRouter, RequestType};
