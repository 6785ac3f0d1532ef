//! In-memory doubles shared by the engine and web tests.

use async_trait::async_trait;
use sea_orm::DbErr;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::db::entities::prelude::*;
use crate::db::enums::DiscoveryStatus;
use crate::db::store::{EngineStore, NewMetric, NewProvision};
use crate::engine::availability::AvailabilityProbe;
use crate::engine::collector::{Collector, CollectorError};
use crate::engine::protocol::{CollectorRequest, CollectorResult};

pub fn credential(id: i32, name: Option<&str>, attributes: &str) -> CredentialModel {
    CredentialModel {
        id,
        name: name.map(str::to_string),
        credential_type: Some("ssh".to_string()),
        attributes: attributes.to_string(),
    }
}

pub fn discovery(id: i32, ip: &str, credential_ids: &str, status: &str) -> DiscoveryModel {
    DiscoveryModel {
        id,
        name: format!("target-{id}"),
        ip: ip.to_string(),
        port: 22,
        credential_ids: credential_ids.to_string(),
        status: status.to_string(),
    }
}

pub fn provision(id: i32, ip: &str, credential_ids: &str) -> ProvisionModel {
    ProvisionModel {
        id,
        ip: ip.to_string(),
        port: 22,
        credential_ids: credential_ids.to_string(),
    }
}

#[derive(Default)]
pub struct MemoryStore {
    pub credentials: Mutex<HashMap<i32, CredentialModel>>,
    pub discoveries: Mutex<HashMap<i32, DiscoveryModel>>,
    pub provisions: Mutex<Vec<ProvisionModel>>,
    pub metrics: Mutex<Vec<NewMetric>>,
    pub fail_writes: bool,
    /// Devices whose metric inserts are rejected.
    pub failing_metric_ids: HashSet<i32>,
}

impl MemoryStore {
    pub fn failing_writes() -> Self {
        Self {
            fail_writes: true,
            ..Self::default()
        }
    }

    pub fn failing_metrics_for(ids: &[i32]) -> Self {
        Self {
            failing_metric_ids: ids.iter().copied().collect(),
            ..Self::default()
        }
    }

    pub fn add_credential(&self, credential: CredentialModel) {
        self.credentials
            .lock()
            .unwrap()
            .insert(credential.id, credential);
    }

    pub fn add_discovery(&self, discovery: DiscoveryModel) {
        self.discoveries
            .lock()
            .unwrap()
            .insert(discovery.id, discovery);
    }

    pub fn add_provision(&self, provision: ProvisionModel) {
        self.provisions.lock().unwrap().push(provision);
    }

    pub fn discovery_status(&self, id: i32) -> Option<String> {
        self.discoveries
            .lock()
            .unwrap()
            .get(&id)
            .map(|d| d.status.clone())
    }

    pub fn stored_metrics(&self) -> Vec<NewMetric> {
        self.metrics.lock().unwrap().clone()
    }
}

#[async_trait]
impl EngineStore for MemoryStore {
    async fn find_credential(&self, id: i32) -> Result<Option<CredentialModel>, DbErr> {
        Ok(self.credentials.lock().unwrap().get(&id).cloned())
    }

    async fn find_discovery(&self, id: i32) -> Result<Option<DiscoveryModel>, DbErr> {
        Ok(self.discoveries.lock().unwrap().get(&id).cloned())
    }

    async fn update_discovery_status(
        &self,
        id: i32,
        status: DiscoveryStatus,
    ) -> Result<u64, DbErr> {
        if self.fail_writes {
            return Err(DbErr::Custom("write rejected".to_string()));
        }
        let mut discoveries = self.discoveries.lock().unwrap();
        match discoveries.get_mut(&id) {
            Some(row) => {
                row.status = status.to_string();
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn list_provisions(&self) -> Result<Vec<ProvisionModel>, DbErr> {
        Ok(self.provisions.lock().unwrap().clone())
    }

    async fn find_provision_by_ip(&self, ip: &str) -> Result<Option<ProvisionModel>, DbErr> {
        Ok(self
            .provisions
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.ip == ip)
            .cloned())
    }

    async fn insert_provision(&self, new: NewProvision) -> Result<ProvisionModel, DbErr> {
        if self.fail_writes {
            return Err(DbErr::Custom("write rejected".to_string()));
        }
        let mut provisions = self.provisions.lock().unwrap();
        let row = ProvisionModel {
            id: provisions.iter().map(|p| p.id).max().unwrap_or(0) + 1,
            ip: new.ip,
            port: new.port,
            credential_ids: new.credential_ids,
        };
        provisions.push(row.clone());
        Ok(row)
    }

    async fn insert_metric(&self, metric: NewMetric) -> Result<(), DbErr> {
        if self.fail_writes || self.failing_metric_ids.contains(&metric.provision_id) {
            return Err(DbErr::Custom("write rejected".to_string()));
        }
        self.metrics.lock().unwrap().push(metric);
        Ok(())
    }
}

/// Reports every address in `reachable` as available.
#[derive(Default)]
pub struct FakeProber {
    pub reachable: HashSet<String>,
    pub probed: Mutex<Vec<String>>,
}

impl FakeProber {
    pub fn reaching(ips: &[&str]) -> Self {
        Self {
            reachable: ips.iter().map(|ip| ip.to_string()).collect(),
            probed: Mutex::new(Vec::new()),
        }
    }

    pub fn probe_count(&self) -> usize {
        self.probed.lock().unwrap().len()
    }
}

#[async_trait]
impl AvailabilityProbe for FakeProber {
    async fn probe(&self, ip: &str, _port: i32) -> bool {
        self.probed.lock().unwrap().push(ip.to_string());
        self.reachable.contains(ip)
    }
}

/// Records requests and answers with canned result lines.
pub struct FakeCollector {
    pub reply: Result<Vec<String>, ()>,
    pub requests: Mutex<Vec<CollectorRequest>>,
}

impl FakeCollector {
    pub fn replying(lines: &[&str]) -> Self {
        Self {
            reply: Ok(lines.iter().map(|l| l.to_string()).collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            reply: Err(()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<CollectorRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Collector for FakeCollector {
    async fn invoke(
        &self,
        request: &CollectorRequest,
    ) -> Result<Vec<CollectorResult>, CollectorError> {
        self.requests.lock().unwrap().push(request.clone());
        match &self.reply {
            Ok(lines) => Ok(lines
                .iter()
                .filter_map(|line| CollectorResult::parse_line(line).ok())
                .collect()),
            Err(()) => Err(CollectorError::BinaryNotFound("fake".into())),
        }
    }
}
