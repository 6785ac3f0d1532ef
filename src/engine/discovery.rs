//! One-shot discovery of a single target.
//!
//! A run resolves the target's credentials, checks reachability, asks the
//! collector to verify access and finally stores `up` or `down` on the
//! discovery row. Every path ends with a verdict; nothing is raised to the
//! requester.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::db::enums::DiscoveryStatus;
use crate::db::store::EngineStore;
use crate::engine::availability::AvailabilityProbe;
use crate::engine::collector::Collector;
use crate::engine::credentials::CredentialResolver;
use crate::engine::protocol::{CollectorContext, CollectorRequest, lenient_i32};
use crate::server::bus::BusMessage;

/// Bus address the discovery engine consumes.
pub const DISCOVERY_ADDRESS: &str = "discovery.engine";

const DEFAULT_PORT: i32 = 22;

fn default_port() -> i32 {
    DEFAULT_PORT
}

/// Payload accepted on [`DISCOVERY_ADDRESS`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryRequest {
    #[serde(rename = "requestType", default, skip_serializing_if = "Option::is_none")]
    pub request_type: Option<String>,
    /// Number or numeric string; kept raw so a bad id still gets a reply.
    #[serde(rename = "discoveryId", alias = "discovery_id", default)]
    pub discovery_id: Value,
    #[serde(default)]
    pub ip: String,
    #[serde(default = "default_port")]
    pub port: i32,
    #[serde(default)]
    pub credential_ids: Vec<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscoveryOutcome {
    Success,
    Fail,
}

impl DiscoveryOutcome {
    pub fn status(self) -> DiscoveryStatus {
        match self {
            DiscoveryOutcome::Success => DiscoveryStatus::Up,
            DiscoveryOutcome::Fail => DiscoveryStatus::Down,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryReply {
    pub status: DiscoveryOutcome,
}

pub struct DiscoveryEngine {
    store: Arc<dyn EngineStore>,
    resolver: CredentialResolver,
    prober: Arc<dyn AvailabilityProbe>,
    collector: Arc<dyn Collector>,
}

impl DiscoveryEngine {
    pub fn new(
        store: Arc<dyn EngineStore>,
        prober: Arc<dyn AvailabilityProbe>,
        collector: Arc<dyn Collector>,
    ) -> Self {
        Self {
            resolver: CredentialResolver::new(store.clone()),
            store,
            prober,
            collector,
        }
    }

    /// Runs discovery for one target and records the verdict.
    ///
    /// The returned outcome is the collector's answer; a failed status write
    /// is logged and does not change it.
    pub async fn run(&self, request: &DiscoveryRequest) -> DiscoveryOutcome {
        let outcome = self.evaluate(request).await;
        self.record_status(&request.discovery_id, outcome).await;
        outcome
    }

    async fn evaluate(&self, request: &DiscoveryRequest) -> DiscoveryOutcome {
        let credentials = self
            .resolver
            .resolve_formatted(&request.credential_ids)
            .await;
        if credentials.is_empty() {
            warn!(ip = %request.ip, "No usable credentials for discovery target.");
            return DiscoveryOutcome::Fail;
        }

        if !self.prober.probe(&request.ip, request.port).await {
            return DiscoveryOutcome::Fail;
        }

        let collector_request = CollectorRequest::discovery(CollectorContext {
            ip: request.ip.clone(),
            port: request.port,
            credentials,
            provision_id: None,
        });

        let results = match self.collector.invoke(&collector_request).await {
            Ok(results) => results,
            Err(e) => {
                error!(ip = %request.ip, error = %e, "Collector invocation failed.");
                return DiscoveryOutcome::Fail;
            }
        };

        match results.first() {
            Some(first) if first.is_success() => DiscoveryOutcome::Success,
            Some(first) => {
                info!(ip = %request.ip, status = %first.status, "Collector rejected discovery target.");
                DiscoveryOutcome::Fail
            }
            None => {
                warn!(ip = %request.ip, "Collector returned no results.");
                DiscoveryOutcome::Fail
            }
        }
    }

    async fn record_status(&self, raw_id: &Value, outcome: DiscoveryOutcome) {
        let Some(discovery_id) = lenient_i32(raw_id) else {
            error!(discovery_id = %raw_id, "Cannot record discovery status: invalid discovery id.");
            return;
        };

        let status = outcome.status();
        match self.store.update_discovery_status(discovery_id, status).await {
            Ok(0) => warn!(discovery_id, "Discovery row not found, status not recorded."),
            Ok(_) => info!(discovery_id, %status, "Discovery status updated."),
            Err(e) => {
                error!(discovery_id, error = %e, "Failed to update discovery status.")
            }
        }
    }

    /// Serves discovery requests from the bus until shutdown.
    pub async fn serve(
        self: Arc<Self>,
        mut inbox: mpsc::Receiver<BusMessage>,
        mut shutdown_rx: watch::Receiver<()>,
    ) {
        info!(address = DISCOVERY_ADDRESS, "Discovery engine started.");
        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    info!("Shutdown signal received, stopping discovery engine.");
                    break;
                }

                message = inbox.recv() => {
                    let Some(message) = message else {
                        info!("Discovery inbox closed.");
                        break;
                    };
                    let engine = self.clone();
                    tokio::spawn(async move { engine.handle_message(message).await });
                }
            }
        }
    }

    async fn handle_message(self: Arc<Self>, message: BusMessage) {
        let request = match serde_json::from_value::<DiscoveryRequest>(message.body.clone()) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "Rejecting malformed discovery request.");
                // A usable id still gets its row moved out of pending.
                if let Some(raw_id) = message
                    .body
                    .get("discoveryId")
                    .or_else(|| message.body.get("discovery_id"))
                    .filter(|raw_id| lenient_i32(raw_id).is_some())
                {
                    self.record_status(raw_id, DiscoveryOutcome::Fail).await;
                }
                message.respond(json!(DiscoveryReply { status: DiscoveryOutcome::Fail }));
                return;
            }
        };

        let discovery_id = request.discovery_id.clone();
        debug!(discovery_id = %discovery_id, ip = %request.ip, "Discovery request received.");

        // Run in its own task so a panic still produces a reply.
        let engine = self.clone();
        let status = match tokio::spawn(async move { engine.run(&request).await }).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(discovery_id = %discovery_id, error = %e, "Discovery run aborted unexpectedly.");
                self.record_status(&discovery_id, DiscoveryOutcome::Fail).await;
                DiscoveryOutcome::Fail
            }
        };

        info!(discovery_id = %discovery_id, status = ?status, "Discovery process completed.");
        message.respond(json!(DiscoveryReply { status }));
    }
}
