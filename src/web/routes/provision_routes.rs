use crate::db::entities::provision;
use crate::engine::provisioning::provision_from_discovery;
use crate::web::{AppError, AppState};
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::post,
};
use std::sync::Arc;

async fn provision_discovery_handler(
    State(app_state): State<Arc<AppState>>,
    Path(discovery_id): Path<i32>,
) -> Result<(StatusCode, Json<provision::Model>), AppError> {
    let provision = provision_from_discovery(app_state.store.as_ref(), discovery_id).await?;
    Ok((StatusCode::CREATED, Json(provision)))
}

pub fn create_provision_router() -> Router<Arc<AppState>> {
    Router::new().route("/{discovery_id}", post(provision_discovery_handler))
}
