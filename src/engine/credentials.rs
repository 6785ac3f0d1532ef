//! Loads credential rows and shapes them for the collector.

use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::db::entities::prelude::CredentialModel;
use crate::db::store::EngineStore;
use crate::engine::protocol::FormattedCredential;

const DEFAULT_CREDENTIAL_TYPE: &str = "ssh";

#[derive(Clone)]
pub struct CredentialResolver {
    store: Arc<dyn EngineStore>,
}

impl CredentialResolver {
    pub fn new(store: Arc<dyn EngineStore>) -> Self {
        Self { store }
    }

    /// Looks up every id in order. Ids that are not integers, have no row,
    /// or fail to load are logged and left out.
    pub async fn resolve(&self, ids: &[Value]) -> Vec<CredentialModel> {
        let mut credentials = Vec::with_capacity(ids.len());

        for (index, raw_id) in ids.iter().enumerate() {
            let Some(id) = raw_id.as_i64().and_then(|v| i32::try_from(v).ok()) else {
                warn!(index = index, value = %raw_id, "Invalid credential ID format.");
                continue;
            };

            match self.store.find_credential(id).await {
                Ok(Some(credential)) => credentials.push(credential),
                Ok(None) => warn!(credential_id = id, "Credential not found."),
                Err(e) => {
                    error!(credential_id = id, error = %e, "Failed to load credential.")
                }
            }
        }

        debug!(
            requested = ids.len(),
            resolved = credentials.len(),
            "Credential resolution finished."
        );
        credentials
    }

    /// Resolves and formats in one step.
    pub async fn resolve_formatted(&self, ids: &[Value]) -> Vec<FormattedCredential> {
        format_credentials(&self.resolve(ids).await)
    }
}

/// Turns credential rows into the collector's credential objects.
///
/// A credential whose `attributes` column is not a JSON object is dropped.
pub fn format_credentials(credentials: &[CredentialModel]) -> Vec<FormattedCredential> {
    credentials
        .iter()
        .filter_map(|credential| {
            let attributes = match serde_json::from_str::<Value>(&credential.attributes) {
                Ok(Value::Object(map)) => map,
                Ok(_) => {
                    warn!(credential_id = credential.id, "Skipping credential: attributes are not a JSON object.");
                    return None;
                }
                Err(e) => {
                    warn!(credential_id = credential.id, error = %e, "Skipping credential due to invalid attributes JSON.");
                    return None;
                }
            };

            Some(FormattedCredential {
                name: credential
                    .name
                    .clone()
                    .unwrap_or_else(|| format!("credential_{}", credential.id)),
                credential_type: credential
                    .credential_type
                    .clone()
                    .unwrap_or_else(|| DEFAULT_CREDENTIAL_TYPE.to_string()),
                attributes,
            })
        })
        .collect()
}

/// Parses a stored `credential_ids` column such as `[1, 2]`.
pub fn parse_credential_ids(raw: &str) -> Result<Vec<Value>, serde_json::Error> {
    serde_json::from_str(raw)
}
