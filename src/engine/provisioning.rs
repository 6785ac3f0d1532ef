//! Promotion of a discovered target into the polled device set.

use sea_orm::DbErr;
use tracing::{info, warn};

use crate::db::entities::prelude::ProvisionModel;
use crate::db::enums::DiscoveryStatus;
use crate::db::store::{EngineStore, NewProvision};
use crate::engine::credentials::parse_credential_ids;

#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("Discovery {0} not found")]
    NotFound(i32),
    #[error("Discovery {0} has not completed yet")]
    NotReady(i32),
    #[error("Discovery {id} has invalid credential_ids: {reason}")]
    InvalidCredentialIds { id: i32, reason: String },
    #[error("IP {0} is already provisioned")]
    AlreadyProvisioned(String),
    #[error("Database error: {0}")]
    Database(#[from] DbErr),
}

/// Copies the target of a finished discovery into `provisions`.
///
/// Both `up` and `down` targets are accepted; only a pending run blocks.
pub async fn provision_from_discovery(
    store: &dyn EngineStore,
    discovery_id: i32,
) -> Result<ProvisionModel, ProvisionError> {
    let discovery = store
        .find_discovery(discovery_id)
        .await?
        .ok_or(ProvisionError::NotFound(discovery_id))?;

    match discovery.status.parse::<DiscoveryStatus>() {
        Ok(DiscoveryStatus::Up | DiscoveryStatus::Down) => {}
        _ => {
            warn!(discovery_id, status = %discovery.status, "Discovery is not finished, refusing to provision.");
            return Err(ProvisionError::NotReady(discovery_id));
        }
    }

    if let Err(e) = parse_credential_ids(&discovery.credential_ids) {
        return Err(ProvisionError::InvalidCredentialIds {
            id: discovery_id,
            reason: e.to_string(),
        });
    }

    if store.find_provision_by_ip(&discovery.ip).await?.is_some() {
        return Err(ProvisionError::AlreadyProvisioned(discovery.ip));
    }

    let provision = store
        .insert_provision(NewProvision {
            ip: discovery.ip,
            port: discovery.port,
            credential_ids: discovery.credential_ids,
        })
        .await?;
    info!(
        discovery_id,
        provision_id = provision.id,
        ip = %provision.ip,
        "Device provisioned."
    );
    Ok(provision)
}
