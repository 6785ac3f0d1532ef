use crate::engine::credentials::parse_credential_ids;
use crate::engine::discovery::{DISCOVERY_ADDRESS, DiscoveryRequest};
use crate::engine::protocol::RequestType;
use crate::web::{AppError, AppState};
use axum::{
    Json, Router,
    extract::{Path, State},
    routing::post,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

/// Sends the stored target to the discovery engine and waits for its verdict.
async fn run_discovery_handler(
    State(app_state): State<Arc<AppState>>,
    Path(discovery_id): Path<i32>,
) -> Result<Json<Value>, AppError> {
    let target = app_state
        .store
        .find_discovery(discovery_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Discovery {discovery_id} not found")))?;

    let credential_ids = parse_credential_ids(&target.credential_ids)
        .map_err(|e| AppError::InvalidInput(format!("Invalid credential_ids: {e}")))?;

    let request = DiscoveryRequest {
        request_type: Some(RequestType::Discovery.as_str().to_string()),
        discovery_id: Value::from(discovery_id),
        ip: target.ip,
        port: target.port,
        credential_ids,
    };
    info!(discovery_id, ip = %request.ip, "Dispatching discovery request.");

    let reply = app_state
        .bus
        .request(
            DISCOVERY_ADDRESS,
            serde_json::to_value(&request)?,
            app_state.config.discovery_request_timeout(),
        )
        .await?;
    Ok(Json(reply))
}

pub fn create_discovery_router() -> Router<Arc<AppState>> {
    Router::new().route("/{discovery_id}/run", post(run_discovery_handler))
}
