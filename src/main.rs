//! Offline librarian server
//!
//! Polls an offline-download service for finished tasks and organizes their
//! files into media libraries. A small REST API submits and inspects tasks.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use offline_librarian::AppState;
use offline_librarian::app::build_app;
use offline_librarian::config::Config;
use offline_librarian::db::Database;
use offline_librarian::jobs::{RandomInterval, TaskMonitor};
use offline_librarian::services::{
    DownloadClient, FileOperations, HttpDownloadClient, LocalFileOperations, OrganizerService,
    ServicesManager, TaskService,
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "offline_librarian=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting offline librarian");

    let config = Arc::new(Config::load().context("Failed to load configuration")?);
    let rules = config.parser_rules()?;

    tracing::info!(
        libraries = config.media.libraries.len(),
        poll_interval_min = config.remote.poll_interval_min,
        poll_interval_max = config.remote.poll_interval_max,
        "Configuration loaded"
    );

    let db = Database::connect(&config.database.url).await?;

    let client: Arc<dyn DownloadClient> = Arc::new(HttpDownloadClient::new(&config.remote)?);
    let files: Arc<dyn FileOperations> = Arc::new(LocalFileOperations);

    let organizer = Arc::new(OrganizerService::new(
        db.clone(),
        files,
        client.clone(),
        rules,
        config.clone(),
    ));
    let monitor = Arc::new(TaskMonitor::new(
        db.clone(),
        client.clone(),
        organizer.clone(),
        config.clone(),
        Arc::new(RandomInterval::from_secs(
            config.remote.poll_interval_min,
            config.remote.poll_interval_max,
        )),
    ));
    let tasks = Arc::new(TaskService::new(db.clone(), client, config.clone()));

    let mut services = ServicesManager::new();
    services.register(monitor.clone());
    let services = Arc::new(services);
    services.start_all().await?;

    let state = AppState {
        config: config.clone(),
        db,
        tasks,
        organizer,
        monitor,
        services: services.clone(),
    };
    let app = build_app(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_address))?;
    tracing::info!(address = %config.server.bind_address, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down");
    services.stop_all().await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
