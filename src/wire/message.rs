//! Message bodies carried inside frames.
//!
//! Style A control messages are flat text tokens addressed to agents. Style B messages
//! are versioned JSON envelopes exchanged with local daemons and the cluster socket.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::constants::codes;
use crate::constants::protocol::SOCKET_COMMUNICATION_PROTOCOL_VERSION;
use crate::constants::DEFAULT_ORIGIN_MODULE;
use crate::error::{ApiError, DapiError, Result};

/// Commands that are not active-response capable and use the `!` flags
const NON_ACTIVE_RESPONSE_COMMANDS: &[&str] = &["syscheck restart", "force_reconnect"];

/// Destination of a control message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlTarget {
    Agent(String),
    AllAgents,
}

/// Style A control message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlMessage {
    pub body: String,
    pub target: ControlTarget,
}

impl ControlMessage {
    pub fn to_agent(agent_id: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            target: ControlTarget::Agent(agent_id.into()),
        }
    }

    pub fn to_all_agents(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            target: ControlTarget::AllAgents,
        }
    }

    /// Whether the body is an active-response command
    pub fn is_active_response(&self) -> bool {
        !NON_ACTIVE_RESPONSE_COMMANDS.contains(&self.body.as_str())
    }

    /// Flag token encoding destination and command kind
    pub fn flag(&self) -> &'static str {
        match (&self.target, self.is_active_response()) {
            (ControlTarget::Agent(_), true) => "NNS",
            (ControlTarget::AllAgents, true) => "ANN",
            (ControlTarget::Agent(_), false) => "N!S",
            (ControlTarget::AllAgents, false) => "A!N",
        }
    }

    /// Text payload, ready to be framed
    pub fn encode(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ControlMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let agent = match &self.target {
            ControlTarget::Agent(id) => id.as_str(),
            ControlTarget::AllAgents => "(null)",
        };
        write!(f, "(msg_to_agent) [] {} {} {}", self.flag(), agent, self.body)
    }
}

/// Sender identity stamped on Style B envelopes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Origin {
    pub name: String,
    pub module: String,
}

impl Origin {
    pub fn new(name: impl Into<String>, module: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            module: module.into(),
        }
    }

    /// Origin for a node, tagged with the default module
    pub fn node(name: impl Into<String>) -> Self {
        Self::new(name, DEFAULT_ORIGIN_MODULE)
    }
}

/// Style B request envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<Origin>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Map<String, Value>>,
}

impl RequestEnvelope {
    /// Build an envelope stamped with the current protocol version
    pub fn new(
        origin: Option<Origin>,
        command: Option<&str>,
        parameters: Option<Map<String, Value>>,
    ) -> Self {
        Self {
            version: SOCKET_COMMUNICATION_PROTOCOL_VERSION,
            origin,
            command: command.map(str::to_string),
            parameters,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Style B response envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub error: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub data: Value,
}

impl ResponseEnvelope {
    pub fn ok(data: Value) -> Self {
        Self {
            error: 0,
            message: None,
            data,
        }
    }

    pub fn failure(error: &ApiError) -> Self {
        Self {
            error: error.code,
            message: Some(error.message.clone()),
            data: Value::Null,
        }
    }

    /// Parse a response payload; malformed JSON is a bad response
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| {
            DapiError::cluster(codes::BAD_RESPONSE).with_extra(e.to_string())
        })
    }

    /// Turn a non-zero `error` into a typed error, returning `data` otherwise
    pub fn into_result(self) -> Result<Value> {
        if self.error == 0 {
            return Ok(self.data);
        }
        let error = match self.message {
            Some(message) => ApiError::with_message(self.error, message),
            None => ApiError::new(self.error),
        };
        Err(DapiError::Domain(error))
    }
}
