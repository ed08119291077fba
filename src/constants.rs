//! # System Constants
//!
//! Core constants that define the operational boundaries of the distributed API:
//! error codes shared with every node of the cluster, protocol versions, reserved
//! node names and request defaults.
//!
//! Error codes travel over the wire inside JSON envelopes, so they must stay stable
//! across releases. New codes are appended, never renumbered.

use std::time::Duration;

/// Minimum deadline applied to any locally executed request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Default page size applied after merging generic results from several nodes.
pub const DATABASE_LIMIT: usize = 500;

/// Synthetic node bucket for items whose owner is not a connected node.
pub const UNKNOWN_NODE: &str = "unknown-node";

/// Name of the logger used by the API layer. Requests carrying it log at trace level.
pub const API_LOGGER: &str = "dapi-api";

/// Default logger name for requests that do not carry one.
pub const CLUSTER_LOGGER: &str = "dapi-cluster";

/// Origin module recorded in the execution context when none is supplied.
pub const DEFAULT_ORIGIN_MODULE: &str = "framework";

/// Keyword arguments scrubbed from any echoed request context on timeout.
pub const SENSITIVE_KWARGS: &[&str] = &["agent_list"];

/// Keyword arguments masked when request parameters are logged.
pub const MASKED_KWARGS: &[&str] = &["password", "token_nbf_time"];

/// Daemons checked before executing a request when the request names none.
pub const DEFAULT_BASIC_SERVICES: &[&str] =
    &["dapi-modulesd", "dapi-analysisd", "dapi-execd", "dapi-db"];

/// Wire protocol constants
pub mod protocol {
    /// Version stamped on every Style B envelope.
    pub const SOCKET_COMMUNICATION_PROTOCOL_VERSION: u32 = 1;

    /// Size of the little-endian length prefix of every frame.
    pub const FRAME_HEADER_SIZE: usize = 4;

    /// Upper bound for a single frame payload.
    pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

    /// Cluster commands understood by the transport.
    pub mod commands {
        /// Worker to master request.
        pub const DAPI: &str = "dapi";
        /// Master to worker forwarded request.
        pub const DAPI_FORWARD: &str = "dapi_fwd";
        /// Successful reply from a request queue.
        pub const DAPI_RESPONSE: &str = "dapi_res";
        /// Failed reply from a request queue.
        pub const DAPI_ERROR: &str = "dapi_err";
        /// Successful reply from the sendsync queue.
        pub const SENDSYNC_RESPONSE: &str = "sendsync_res";
        /// Failed reply from the sendsync queue.
        pub const SENDSYNC_ERROR: &str = "sendsync_err";
        /// Ship a file to a node.
        pub const SEND_FILE: &str = "send_file";
        /// Relay a request to a named node.
        pub const SEND_REQUEST: &str = "send_request";
        /// List connected nodes.
        pub const GET_NODES: &str = "get_nodes";
    }
}

/// Error codes shared with every node of the cluster
pub mod codes {
    pub const INTERNAL_ERROR: i32 = 1000;
    pub const SOCKET_UNAVAILABLE: i32 = 1013;
    pub const SOCKET_COMMUNICATION: i32 = 1014;
    pub const SYSTEM_NOT_READY: i32 = 1017;
    pub const DATABASE_FULL: i32 = 2008;
    pub const TIMEOUT_SENDING_REQUEST: i32 = 3020;
    pub const TIMEOUT_EXECUTING_REQUEST: i32 = 3021;
    pub const UNKNOWN_NODE: i32 = 3022;
    pub const BAD_RESPONSE: i32 = 3036;
}

/// Base message for a known error code.
pub fn error_message(code: i32) -> &'static str {
    match code {
        codes::INTERNAL_ERROR => "Internal error. See log for more detail",
        codes::SOCKET_UNAVAILABLE => "Unable to connect with socket",
        codes::SOCKET_COMMUNICATION => "Error communicating with socket",
        codes::SYSTEM_NOT_READY => "Some daemons are not ready yet in node",
        codes::DATABASE_FULL => "Database or disk is full",
        codes::TIMEOUT_SENDING_REQUEST => "Timeout sending request",
        codes::TIMEOUT_EXECUTING_REQUEST => "Timeout executing API request",
        codes::UNKNOWN_NODE => "Unknown node or node not connected",
        codes::BAD_RESPONSE => "Received response is not a valid JSON",
        _ => "Unknown error",
    }
}
