use axum::{Router, routing::get};
use std::sync::Arc;

use crate::db::store::EngineStore;
use crate::server::bus::EventBus;
use crate::server::config::ServerConfig;
use crate::web::routes::*;

pub mod error;
pub mod routes;

pub use error::AppError;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn EngineStore>,
    pub bus: EventBus,
    pub config: Arc<ServerConfig>,
}

async fn health_check_handler() -> &'static str {
    "OK"
}

pub fn create_axum_router(
    store: Arc<dyn EngineStore>,
    bus: EventBus,
    config: Arc<ServerConfig>,
) -> Router {
    let app_state = Arc::new(AppState { store, bus, config });

    Router::new()
        .route("/api/health", get(health_check_handler))
        .nest("/api/discoveries", discovery_routes::create_discovery_router())
        .nest("/api/provisions", provision_routes::create_provision_router())
        .with_state(app_state)
}
