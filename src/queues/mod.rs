//! # Cross-Node Request Queues
//!
//! Consumers for requests sent by other nodes. The cluster daemon pushes raw envelopes
//! `"<origin-node> <request-id> <body>"` through a [`QueueHandle`]; each consumer handles
//! them one at a time and replies to the origin node through the transport, using the
//! request id as correlation key.
//!
//! A reply that cannot be delivered is logged and the consumer moves on. A closed queue
//! ends the consumer with an error.

pub mod api_request;
pub mod sendsync;

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error};
use uuid::Uuid;

use crate::cluster::ClusterTransport;
use crate::constants::codes;
use crate::error::{DapiError, Result};

pub use api_request::ApiRequestQueue;
pub use sendsync::{SendSyncRequest, SendSyncRequestQueue};

/// Parsed queue item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEnvelope {
    pub origin: String,
    pub request_id: String,
    pub body: String,
}

impl QueueEnvelope {
    /// New envelope with a fresh request id
    pub fn new(origin: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            request_id: Uuid::new_v4().simple().to_string(),
            body: body.into(),
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let mut parts = raw.splitn(3, ' ');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(origin), Some(request_id), Some(body))
                if !origin.is_empty() && !request_id.is_empty() =>
            {
                Ok(Self {
                    origin: origin.to_string(),
                    request_id: request_id.to_string(),
                    body: body.to_string(),
                })
            }
            _ => Err(DapiError::internal(codes::INTERNAL_ERROR)
                .with_extra("queue item is not '<origin> <request-id> <body>'")),
        }
    }
}

impl fmt::Display for QueueEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.origin, self.request_id, self.body)
    }
}

/// Producer side of a request queue
#[derive(Debug, Clone)]
pub struct QueueHandle {
    sender: mpsc::UnboundedSender<String>,
}

impl QueueHandle {
    fn channel() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    /// Enqueue a raw envelope
    pub fn add_request(&self, request: impl Into<String>) -> Result<()> {
        self.sender.send(request.into()).map_err(|_| {
            DapiError::internal(codes::INTERNAL_ERROR).with_extra("request queue is closed")
        })
    }
}

/// Next raw item; a closed queue is fatal for the consumer
async fn next_item(receiver: &mut mpsc::UnboundedReceiver<String>, queue: &str) -> Result<String> {
    receiver.recv().await.ok_or_else(|| {
        error!(queue = %queue, "Request queue closed, stopping consumer");
        DapiError::internal(codes::INTERNAL_ERROR)
            .with_extra(format!("{queue} queue closed"))
    })
}

/// Send a reply to the origin node; delivery failures are logged, never raised
async fn reply(
    transport: &Arc<dyn ClusterTransport>,
    origin: &str,
    command: &str,
    payload: String,
    log_prefix: &str,
) {
    match transport.send_request(origin, command, &payload).await {
        Ok(_) => debug!(node = %origin, command = %command, "Reply delivered"),
        Err(e) if e.code() == Some(codes::UNKNOWN_NODE) => error!(
            "{log_prefix}. The destination node is not connected or does not exist: '{origin}'."
        ),
        Err(e) => error!(
            node = %origin,
            command = %command,
            error = %e,
            "{log_prefix}. Could not deliver reply"
        ),
    }
}
