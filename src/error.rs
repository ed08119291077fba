//! # Error Types
//!
//! Structured error handling for the distributed API using thiserror.
//!
//! Two layers exist:
//!
//! - [`ApiError`]: the coded, serialisable error that crosses node boundaries. Its
//!   grouping identity is `(code, message)`, exposed as [`ErrorKey`].
//! - [`DapiError`]: everything the router can observe while serving a request. Coded
//!   errors are wrapped by class (domain, internal, cluster); the remaining variants
//!   (persistence, serialization, unhandled) are translated by the router before they
//!   reach a caller, unless the request runs in debug mode.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::constants::{codes, error_message};

/// Result type alias for distributed API operations
pub type Result<T> = std::result::Result<T, DapiError>;

/// Identity used to group failed items under the same error
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ErrorKey {
    pub code: i32,
    pub message: String,
}

/// Per-node failure detail attached to routed errors
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeErrorInfo {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logfile: Option<String>,
}

/// Coded error shared by every node of the cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_message: Option<String>,
    /// Item ids this error applies to, if any
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub ids: BTreeSet<String>,
    /// Structured context (offending daemons, scrubbed request parameters...)
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub context: Map<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dapi_errors: BTreeMap<String, NodeErrorInfo>,
}

impl ApiError {
    /// Create an error with the registered message for `code`
    pub fn new(code: i32) -> Self {
        Self::with_message(code, error_message(code))
    }

    /// Create an error with an explicit message, as received from a peer
    pub fn with_message(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            extra_message: None,
            ids: BTreeSet::new(),
            context: Map::new(),
            dapi_errors: BTreeMap::new(),
        }
    }

    /// Append detail to the message. The detail always ends the message.
    pub fn with_extra(mut self, extra: impl Into<String>) -> Self {
        let extra = extra.into();
        self.message = format!("{}: {}", self.message, extra);
        self.extra_message = Some(extra);
        self
    }

    /// Attach the item ids this error applies to
    pub fn with_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ids.extend(ids.into_iter().map(Into::into));
        self
    }

    /// Attach a structured context entry
    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    /// Grouping identity
    pub fn key(&self) -> ErrorKey {
        ErrorKey {
            code: self.code,
            message: self.message.clone(),
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error {} - {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

/// Class of a coded error, preserved when errors travel between nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Pre-classified, user-facing error
    Domain,
    /// Internal fault of the local node
    Internal,
    /// Fault of the cluster layer
    Cluster,
}

/// Errors observed while routing and executing a request
#[derive(Debug, Error)]
pub enum DapiError {
    #[error("{0}")]
    Domain(ApiError),

    #[error("{0}")]
    Internal(ApiError),

    #[error("{0}")]
    Cluster(ApiError),

    #[error("Persistence error: {message}")]
    Persistence { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Unhandled(#[from] anyhow::Error),
}

impl DapiError {
    /// Create a domain error
    pub fn domain(code: i32) -> Self {
        Self::Domain(ApiError::new(code))
    }

    /// Create an internal error
    pub fn internal(code: i32) -> Self {
        Self::Internal(ApiError::new(code))
    }

    /// Create a cluster-layer error
    pub fn cluster(code: i32) -> Self {
        Self::Cluster(ApiError::new(code))
    }

    /// Create a persistence-layer error carrying the driver message
    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence {
            message: message.into(),
        }
    }

    /// Generic internal error used for type mismatches and unclassified faults
    pub fn generic() -> Self {
        Self::internal(codes::INTERNAL_ERROR)
    }

    /// Rebuild an error from its wire parts
    pub fn from_parts(class: ErrorClass, error: ApiError) -> Self {
        match class {
            ErrorClass::Domain => Self::Domain(error),
            ErrorClass::Internal => Self::Internal(error),
            ErrorClass::Cluster => Self::Cluster(error),
        }
    }

    /// Coded payload, if the error is classified
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            Self::Domain(e) | Self::Internal(e) | Self::Cluster(e) => Some(e),
            _ => None,
        }
    }

    /// Mutable coded payload, if the error is classified
    pub fn api_error_mut(&mut self) -> Option<&mut ApiError> {
        match self {
            Self::Domain(e) | Self::Internal(e) | Self::Cluster(e) => Some(e),
            _ => None,
        }
    }

    /// Class of the error, if classified
    pub fn class(&self) -> Option<ErrorClass> {
        match self {
            Self::Domain(_) => Some(ErrorClass::Domain),
            Self::Internal(_) => Some(ErrorClass::Internal),
            Self::Cluster(_) => Some(ErrorClass::Cluster),
            _ => None,
        }
    }

    /// Numeric code, if classified
    pub fn code(&self) -> Option<i32> {
        self.api_error().map(|e| e.code)
    }

    /// Split into wire parts, if classified
    pub fn into_parts(self) -> Option<(ErrorClass, ApiError)> {
        match self {
            Self::Domain(e) => Some((ErrorClass::Domain, e)),
            Self::Internal(e) => Some((ErrorClass::Internal, e)),
            Self::Cluster(e) => Some((ErrorClass::Cluster, e)),
            _ => None,
        }
    }

    /// Append detail to a classified error's message
    pub fn with_extra(self, extra: impl Into<String>) -> Self {
        match self.into_parts_or_self() {
            Ok((class, error)) => Self::from_parts(class, error.with_extra(extra)),
            Err(other) => other,
        }
    }

    fn into_parts_or_self(self) -> std::result::Result<(ErrorClass, ApiError), Self> {
        match self {
            Self::Domain(e) => Ok((ErrorClass::Domain, e)),
            Self::Internal(e) => Ok((ErrorClass::Internal, e)),
            Self::Cluster(e) => Ok((ErrorClass::Cluster, e)),
            other => Err(other),
        }
    }
}

impl From<config::ConfigError> for DapiError {
    fn from(error: config::ConfigError) -> Self {
        Self::Configuration(error.to_string())
    }
}
