//! In-process request/reply bus keyed by logical address.
//!
//! Consumers register an address and receive JSON messages carrying a
//! one-shot reply handle. Requesters send a JSON payload and wait, bounded by
//! a timeout, for exactly one reply.

use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("No consumer registered at address '{0}'")]
    NoConsumer(String),
    #[error("Consumer at address '{0}' is no longer running")]
    ConsumerClosed(String),
    #[error("Consumer at address '{0}' dropped the request without replying")]
    NoReply(String),
    #[error("Timed out waiting for a reply from '{0}'")]
    Timeout(String),
}

#[derive(Debug)]
pub struct BusMessage {
    pub body: Value,
    pub reply: oneshot::Sender<Value>,
}

impl BusMessage {
    pub fn respond(self, body: Value) {
        if self.reply.send(body).is_err() {
            debug!("Requester went away before the reply was delivered.");
        }
    }
}

#[derive(Clone, Default)]
pub struct EventBus {
    consumers: Arc<DashMap<String, mpsc::Sender<BusMessage>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the consumer for `address`, replacing any previous one.
    pub fn consumer(&self, address: &str, capacity: usize) -> mpsc::Receiver<BusMessage> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        if self.consumers.insert(address.to_string(), tx).is_some() {
            warn!(address = %address, "Replaced existing bus consumer.");
        }
        rx
    }

    pub async fn request(
        &self,
        address: &str,
        body: Value,
        timeout: Duration,
    ) -> Result<Value, BusError> {
        let sender = self
            .consumers
            .get(address)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| BusError::NoConsumer(address.to_string()))?;

        // One bound covers queueing behind a full inbox and the reply wait.
        let exchange = async {
            let (reply_tx, reply_rx) = oneshot::channel();
            sender
                .send(BusMessage {
                    body,
                    reply: reply_tx,
                })
                .await
                .map_err(|_| BusError::ConsumerClosed(address.to_string()))?;
            reply_rx
                .await
                .map_err(|_| BusError::NoReply(address.to_string()))
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(BusError::Timeout(address.to_string())),
        }
    }
}
