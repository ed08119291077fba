//! Registry of routable functions.
//!
//! Requests name functions by a stable key. Keys are registered at startup and unknown
//! keys are rejected instead of being resolved dynamically.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use tracing::{info, warn};

use super::context::ExecutionContext;
use crate::constants::codes;
use crate::error::{DapiError, Result};
use crate::results::{AffectedItemsResult, DapiResult, GenericResult, ResultKind};

/// What a routed function returns
#[derive(Debug, Clone, PartialEq)]
pub enum FunctionOutput {
    /// A result object, returned as is
    Result(DapiResult),
    /// Raw JSON, wrapped according to the declared [`ResultKind`]
    Payload(Value),
}

impl From<DapiResult> for FunctionOutput {
    fn from(result: DapiResult) -> Self {
        Self::Result(result)
    }
}

impl From<AffectedItemsResult> for FunctionOutput {
    fn from(result: AffectedItemsResult) -> Self {
        Self::Result(DapiResult::AffectedItems(result))
    }
}

impl From<GenericResult> for FunctionOutput {
    fn from(result: GenericResult) -> Self {
        Self::Result(DapiResult::Generic(result))
    }
}

impl From<Value> for FunctionOutput {
    fn from(value: Value) -> Self {
        Self::Payload(value)
    }
}

pub type AsyncHandler = Arc<
    dyn Fn(ExecutionContext, Map<String, Value>) -> BoxFuture<'static, Result<FunctionOutput>>
        + Send
        + Sync,
>;

pub type BlockingHandler =
    Arc<dyn Fn(ExecutionContext, Map<String, Value>) -> Result<FunctionOutput> + Send + Sync>;

/// How a function is invoked
#[derive(Clone)]
pub enum Handler {
    /// Awaited on the event loop
    Async(AsyncHandler),
    /// Run on the blocking pool
    Blocking(BlockingHandler),
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Async(_) => f.write_str("Handler::Async"),
            Self::Blocking(_) => f.write_str("Handler::Blocking"),
        }
    }
}

/// A function available to the router
#[derive(Debug, Clone)]
pub struct RegisteredFunction {
    pub key: String,
    pub handler: Handler,
    pub result_kind: ResultKind,
    /// Skip the basic-services check (daemon status functions)
    pub health_exempt: bool,
}

impl RegisteredFunction {
    pub fn asynchronous<F, Fut>(key: impl Into<String>, result_kind: ResultKind, function: F) -> Self
    where
        F: Fn(ExecutionContext, Map<String, Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<FunctionOutput>> + Send + 'static,
    {
        let handler: AsyncHandler = Arc::new(move |context, kwargs| function(context, kwargs).boxed());
        Self {
            key: key.into(),
            handler: Handler::Async(handler),
            result_kind,
            health_exempt: false,
        }
    }

    pub fn blocking<F>(key: impl Into<String>, result_kind: ResultKind, function: F) -> Self
    where
        F: Fn(ExecutionContext, Map<String, Value>) -> Result<FunctionOutput> + Send + Sync + 'static,
    {
        Self {
            key: key.into(),
            handler: Handler::Blocking(Arc::new(function)),
            result_kind,
            health_exempt: false,
        }
    }

    pub fn health_exempt(mut self) -> Self {
        self.health_exempt = true;
        self
    }

    pub fn is_async(&self) -> bool {
        matches!(self.handler, Handler::Async(_))
    }
}

/// Key to function mapping populated at startup
#[derive(Debug, Default)]
pub struct FunctionRegistry {
    functions: RwLock<HashMap<String, Arc<RegisteredFunction>>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a function, replacing any previous one under the same key
    pub fn register(&self, function: RegisteredFunction) {
        let key = function.key.clone();
        let mut functions = self.functions.write();
        if functions.contains_key(&key) {
            warn!(function = %key, "Replacing existing registered function");
        }
        functions.insert(key.clone(), Arc::new(function));
        info!(function = %key, "Registered routable function");
    }

    pub fn unregister(&self, key: &str) -> bool {
        let removed = self.functions.write().remove(key).is_some();
        if !removed {
            warn!(function = %key, "Attempted to unregister unknown function");
        }
        removed
    }

    /// Look up `key`; unknown keys are an internal error
    pub fn get(&self, key: &str) -> Result<Arc<RegisteredFunction>> {
        self.functions.read().get(key).cloned().ok_or_else(|| {
            DapiError::internal(codes::INTERNAL_ERROR)
                .with_extra(format!("unknown function '{key}'"))
        })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.functions.read().contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.functions.read().keys().cloned().collect();
        keys.sort();
        keys
    }
}
