//! Recurring metric collection across all provisioned devices.
//!
//! Each tick builds one collector context per reachable device with usable
//! credentials, invokes the collector once for the whole batch and appends a
//! metric row for every successful result.

use chrono::Utc;
use sea_orm::DbErr;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::time::{Instant, MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};

use crate::db::entities::prelude::ProvisionModel;
use crate::db::store::{EngineStore, NewMetric};
use crate::engine::availability::AvailabilityProbe;
use crate::engine::collector::{Collector, CollectorError};
use crate::engine::credentials::{CredentialResolver, parse_credential_ids};
use crate::engine::protocol::{CollectorContext, CollectorRequest, CollectorResult};

#[derive(Debug, thiserror::Error)]
pub enum PollingError {
    #[error("Failed to fetch provisioned devices: {0}")]
    FetchDevices(#[from] DbErr),
    #[error("Collector invocation failed: {0}")]
    Collector(#[from] CollectorError),
}

#[derive(Debug, Clone, Copy)]
pub struct PollingConfig {
    pub interval: Duration,
    /// When set, a device is skipped until this much time has passed since
    /// it was last polled.
    pub min_poll_interval: Option<Duration>,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            min_poll_interval: None,
        }
    }
}

/// Counters describing one polling cycle.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleSummary {
    pub devices: usize,
    pub due: usize,
    pub contexts: usize,
    pub results: usize,
    pub stored: usize,
}

pub struct PollingEngine {
    store: Arc<dyn EngineStore>,
    resolver: CredentialResolver,
    prober: Arc<dyn AvailabilityProbe>,
    collector: Arc<dyn Collector>,
    config: PollingConfig,
    // Process-local; forgotten on restart.
    last_polled: Mutex<HashMap<i32, Instant>>,
}

impl PollingEngine {
    pub fn new(
        store: Arc<dyn EngineStore>,
        prober: Arc<dyn AvailabilityProbe>,
        collector: Arc<dyn Collector>,
        config: PollingConfig,
    ) -> Self {
        Self {
            resolver: CredentialResolver::new(store.clone()),
            store,
            prober,
            collector,
            config,
            last_polled: Mutex::new(HashMap::new()),
        }
    }

    /// Runs a cycle on every tick until shutdown.
    ///
    /// Cycles never overlap: the next tick is only taken once the current
    /// cycle finished, and ticks missed meanwhile are dropped.
    pub async fn start(self: Arc<Self>, mut shutdown_rx: watch::Receiver<()>) {
        info!(
            interval_ms = self.config.interval.as_millis() as u64,
            "Polling engine started."
        );
        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    info!("Shutdown signal received, stopping polling engine.");
                    break;
                }

                _ = ticker.tick() => {
                    debug!("Starting device polling cycle.");
                    match self.run_cycle().await {
                        Ok(summary) => debug!(?summary, "Polling cycle finished."),
                        Err(e) => error!(error = %e, "Polling cycle failed."),
                    }
                }
            }
        }
    }

    pub async fn run_cycle(&self) -> Result<CycleSummary, PollingError> {
        let devices = self.store.list_provisions().await?;
        let mut summary = CycleSummary {
            devices: devices.len(),
            ..Default::default()
        };
        if devices.is_empty() {
            debug!("No provisioned devices found.");
            return Ok(summary);
        }

        let due = self.due_devices(devices).await;
        summary.due = due.len();
        if due.is_empty() {
            debug!("No devices due for polling in this cycle.");
            return Ok(summary);
        }
        info!(count = due.len(), "Processing devices that are due for polling.");

        // One device at a time keeps at most one probe in flight.
        let mut contexts = Vec::with_capacity(due.len());
        for device in &due {
            if let Some(context) = self.build_context(device).await {
                contexts.push(context);
            }
        }
        summary.contexts = contexts.len();

        let polled: Vec<i32> = due.iter().map(|device| device.id).collect();
        if contexts.is_empty() {
            debug!("No valid device contexts to process.");
            self.mark_polled(&polled).await;
            return Ok(summary);
        }

        let batch: HashSet<i32> = contexts.iter().filter_map(|c| c.provision_id).collect();
        let request = CollectorRequest::collect(contexts);
        let invoked = self.collector.invoke(&request).await;
        self.mark_polled(&polled).await;

        let results = invoked?;
        summary.results = results.len();
        if results.is_empty() {
            warn!(devices = batch.len(), "Collector returned no results for the batch.");
            return Ok(summary);
        }

        summary.stored = self.store_results(&results, &batch).await;
        info!(
            results = summary.results,
            stored = summary.stored,
            "Stored collected metrics."
        );
        Ok(summary)
    }

    async fn due_devices(&self, devices: Vec<ProvisionModel>) -> Vec<ProvisionModel> {
        let Some(min_interval) = self.config.min_poll_interval else {
            return devices;
        };
        let last_polled = self.last_polled.lock().await;
        devices
            .into_iter()
            .filter(|device| {
                last_polled
                    .get(&device.id)
                    .is_none_or(|at| at.elapsed() >= min_interval)
            })
            .collect()
    }

    async fn mark_polled(&self, ids: &[i32]) {
        let now = Instant::now();
        let mut last_polled = self.last_polled.lock().await;
        for id in ids {
            last_polled.insert(*id, now);
        }
    }

    async fn build_context(&self, device: &ProvisionModel) -> Option<CollectorContext> {
        let credential_ids = match parse_credential_ids(&device.credential_ids) {
            Ok(ids) => ids,
            Err(e) => {
                warn!(
                    provision_id = device.id,
                    ip = %device.ip,
                    credential_ids = %device.credential_ids,
                    error = %e,
                    "Invalid credential_ids format, skipping device."
                );
                return None;
            }
        };

        if !self.prober.probe(&device.ip, device.port).await {
            warn!(provision_id = device.id, ip = %device.ip, port = device.port, "Device not available.");
            return None;
        }

        let credentials = self.resolver.resolve_formatted(&credential_ids).await;
        if credentials.is_empty() {
            warn!(provision_id = device.id, ip = %device.ip, "No valid credentials for device.");
            return None;
        }

        Some(CollectorContext {
            ip: device.ip.clone(),
            port: device.port,
            credentials,
            provision_id: Some(device.id),
        })
    }

    /// Persists every usable result and returns how many rows were written.
    async fn store_results(&self, results: &[CollectorResult], batch: &HashSet<i32>) -> usize {
        let mut seen = HashSet::new();
        let mut stored = 0;

        for result in results {
            if !result.is_success() {
                warn!(status = %result.status, provision_id = ?result.provision_id, "Result has non-success status.");
                continue;
            }
            let Some(provision_id) = result.provision_id else {
                warn!("Result missing provision ID, skipping metrics storage.");
                continue;
            };
            if !batch.contains(&provision_id) {
                warn!(provision_id, "Result names a device outside this batch, skipping.");
                continue;
            }
            let Some(metrics) = result.metrics() else {
                warn!(provision_id, "No metrics data found.");
                continue;
            };
            if !seen.insert(provision_id) {
                warn!(provision_id, "Duplicate result for device in one batch, skipping.");
                continue;
            }

            let metric = NewMetric {
                provision_id,
                data: Value::Object(metrics.clone()),
                timestamp: Utc::now(),
            };
            match self.store.insert_metric(metric).await {
                Ok(()) => {
                    stored += 1;
                    debug!(provision_id, "Metrics stored.");
                }
                Err(e) => error!(provision_id, error = %e, "Failed to store metrics."),
            }
        }

        stored
    }
}
