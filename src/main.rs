use clap::Parser;
use nms_engine::db::schema::ensure_tables;
use nms_engine::db::store::{EngineStore, SeaOrmStore};
use nms_engine::engine::availability::{AvailabilityProbe, AvailabilityProber};
use nms_engine::engine::collector::{Collector, ProcessCollector};
use nms_engine::engine::discovery::{DISCOVERY_ADDRESS, DiscoveryEngine};
use nms_engine::engine::polling::PollingEngine;
use nms_engine::server::bus::EventBus;
use nms_engine::server::config::ServerConfig;
use nms_engine::web::create_axum_router;
use sea_orm::{ConnectOptions, Database};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const DISCOVERY_INBOX_CAPACITY: usize = 64;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<String>,
}

fn init_logging(log_dir: &str) {
    // Log to a file: JSON format, daily rotation
    let file_appender = rolling::daily(log_dir, "engine.log");
    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .json();

    // Log to stdout: human-readable format
    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sea_orm=warn,sqlx::query=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for the shutdown signal.");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received.");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();

    // --- Server Config Setup ---
    let server_config = Arc::new(ServerConfig::load(args.config.as_deref())?);

    init_logging(&server_config.log_dir);
    info!("Starting NMS engine, version: {}", env!("CARGO_PKG_VERSION"));

    // --- Database Pool Setup ---
    let mut opt = ConnectOptions::new(server_config.database_url.clone());
    opt.max_connections(10);
    let db_pool = match Database::connect(opt).await {
        Ok(pool) => pool,
        Err(e) => {
            error!(error = %e, "Failed to create database connection.");
            return Err(e.into());
        }
    };
    if server_config.auto_create_schema {
        ensure_tables(&db_pool).await?;
    }

    // --- Engine Setup ---
    let store: Arc<dyn EngineStore> = Arc::new(SeaOrmStore::new(db_pool));
    let prober: Arc<dyn AvailabilityProbe> =
        Arc::new(AvailabilityProber::new(server_config.probe()));
    let collector: Arc<dyn Collector> =
        Arc::new(ProcessCollector::new(server_config.collector()));
    info!(
        collector = %server_config.collector_path,
        polling_interval_secs = server_config.polling_interval_secs,
        "Engine components initialized."
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let bus = EventBus::new();

    let discovery_engine = Arc::new(DiscoveryEngine::new(
        store.clone(),
        prober.clone(),
        collector.clone(),
    ));
    let discovery_task = tokio::spawn(discovery_engine.serve(
        bus.consumer(DISCOVERY_ADDRESS, DISCOVERY_INBOX_CAPACITY),
        shutdown_rx.clone(),
    ));

    let polling_engine = Arc::new(PollingEngine::new(
        store.clone(),
        prober,
        collector,
        server_config.polling(),
    ));
    let polling_task = tokio::spawn(polling_engine.start(shutdown_rx));

    // --- HTTP Server ---
    let app = create_axum_router(store, bus, server_config.clone());
    let listener = tokio::net::TcpListener::bind(&server_config.listen_address).await?;
    info!(address = %server_config.listen_address, "HTTP server listening.");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server stopped, stopping background tasks.");
    if shutdown_tx.send(()).is_err() {
        info!("Background tasks already stopped.");
    }
    for (name, task) in [("discovery", discovery_task), ("polling", polling_task)] {
        if let Err(e) = task.await {
            error!(task = name, error = %e, "Background task ended abnormally.");
        }
    }

    Ok(())
}
