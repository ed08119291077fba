//! Consumer of one-shot daemon commands sent by other nodes.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{error, info};

use super::{next_item, reply, QueueEnvelope, QueueHandle};
use crate::cluster::ClusterTransport;
use crate::constants::codes;
use crate::constants::protocol::commands;
use crate::error::{DapiError, Result};
use crate::logging::log_queue_operation;
use crate::wire;

const QUEUE_NAME: &str = "sendsync";

/// Body of a sendsync queue item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendSyncRequest {
    pub daemon_name: String,
    pub message: Value,
}

/// Relays messages to local daemons and replies with their raw answer
#[derive(Debug)]
pub struct SendSyncRequestQueue {
    receiver: mpsc::UnboundedReceiver<String>,
    daemons: HashMap<String, PathBuf>,
    transport: Arc<dyn ClusterTransport>,
}

impl SendSyncRequestQueue {
    /// `daemons` maps daemon names to their socket paths
    pub fn new(
        daemons: HashMap<String, PathBuf>,
        transport: Arc<dyn ClusterTransport>,
    ) -> (Self, QueueHandle) {
        let (handle, receiver) = QueueHandle::channel();
        (
            Self {
                receiver,
                daemons,
                transport,
            },
            handle,
        )
    }

    /// Consume until the queue closes
    pub async fn run(mut self) -> Result<()> {
        info!(queue = QUEUE_NAME, "Starting sendsync queue consumer");
        loop {
            let raw = next_item(&mut self.receiver, QUEUE_NAME).await?;
            self.process(&raw).await;
        }
    }

    /// Handle one raw envelope
    pub async fn process(&self, raw: &str) {
        let envelope = match QueueEnvelope::parse(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                error!(queue = QUEUE_NAME, error = %e, "Discarding malformed queue item");
                return;
            }
        };
        log_queue_operation(QUEUE_NAME, &envelope.origin, &envelope.request_id, "received", None);

        let (command, payload, status) = match self.relay(&envelope.body).await {
            Ok(response) => (
                commands::SENDSYNC_RESPONSE,
                format!("{} {}", envelope.request_id, response),
                "completed",
            ),
            Err(e) => {
                error!(
                    origin = %envelope.origin,
                    request_id = %envelope.request_id,
                    error = %e,
                    "Error in Sendsync"
                );
                (
                    commands::SENDSYNC_ERROR,
                    format!("{} Error in Sendsync: {e}", envelope.request_id),
                    "failed",
                )
            }
        };

        reply(&self.transport, &envelope.origin, command, payload, "Error in Sendsync").await;
        log_queue_operation(QUEUE_NAME, &envelope.origin, &envelope.request_id, status, None);
    }

    async fn relay(&self, body: &str) -> Result<String> {
        let request: SendSyncRequest = serde_json::from_str(body)?;
        let socket = self.daemons.get(&request.daemon_name).ok_or_else(|| {
            DapiError::internal(codes::INTERNAL_ERROR)
                .with_extra(format!("unknown daemon '{}'", request.daemon_name))
        })?;
        wire::sendsync(socket, &request.message).await
    }
}
