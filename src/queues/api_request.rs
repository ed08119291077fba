//! Consumer of distributed API requests sent by other nodes.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info};

use super::{next_item, reply, QueueEnvelope, QueueHandle};
use crate::cluster::ClusterTransport;
use crate::constants::protocol::commands;
use crate::error::Result;
use crate::logging::log_queue_operation;
use crate::results::WireResponse;
use crate::router::{DistributedRequest, RequestRouter};

const QUEUE_NAME: &str = "dapi";

/// Runs serialized requests through the local router and replies with the result
#[derive(Debug)]
pub struct ApiRequestQueue {
    receiver: mpsc::UnboundedReceiver<String>,
    router: Arc<RequestRouter>,
    transport: Arc<dyn ClusterTransport>,
}

impl ApiRequestQueue {
    pub fn new(
        router: Arc<RequestRouter>,
        transport: Arc<dyn ClusterTransport>,
    ) -> (Self, QueueHandle) {
        let (handle, receiver) = QueueHandle::channel();
        (
            Self {
                receiver,
                router,
                transport,
            },
            handle,
        )
    }

    /// Consume until the queue closes
    pub async fn run(mut self) -> Result<()> {
        info!(queue = QUEUE_NAME, "Starting request queue consumer");
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

        let encoded = match serde_json::from_str::<DistributedRequest>(&envelope.body) {
            Ok(request) => {
                let outcome = self.router.distribute_function(request).await;
                WireResponse::from_outcome(outcome).encode()
            }
            Err(e) => Err(e.into()),
        };

        let (command, payload, status) = match encoded {
            Ok(json) => (
                commands::DAPI_RESPONSE,
                format!("{} {}", envelope.request_id, json),
                "completed",
            ),
            Err(e) => {
                error!(
                    origin = %envelope.origin,
                    request_id = %envelope.request_id,
                    error = %e,
                    "Error in distributed API"
                );
                (
                    commands::DAPI_ERROR,
                    format!("{} Error in distributed API: {e}", envelope.request_id),
                    "failed",
                )
            }
        };

        reply(
            &self.transport,
            &envelope.origin,
            command,
            payload,
            "Error in DAPI request",
        )
        .await;
        log_queue_operation(QUEUE_NAME, &envelope.origin, &envelope.request_id, status, None);
    }
}
