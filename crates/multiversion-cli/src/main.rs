// SPDX-License-Identifier: GPL-3.0-or-later
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::serve;
use multiversion_api::router;
use multiversion_application::{
    AcquisitionRunner, AppState, DelayScheduler, DownloadHistoryIngest, DownloadService,
    EventSource, InMemoryEventBus, Orchestrator, ProcessingRegistry, RecentRuns, SearchService,
};
use multiversion_config::{load as load_config, AppConfig, TelemetryConfig};
use multiversion_domain::EventKind;
use multiversion_infrastructure::{
    http_client, init_database, HttpSearchService, QBittorrentClient, RecordingDownloadService,
    SqliteDownloadHistoryStore, UnconfiguredDownloadService, UnconfiguredSearchService,
};
use multiversion_scheduler::TokioDelayScheduler;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Optional first argument: path to a TOML config file.
    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = load_config(config_path.as_deref())?;
    init_tracing(&config.telemetry);
    info!(target: "cli", config = ?config_path, "configuration loaded");

    let pool = init_database(&config).await?;
    let history = Arc::new(SqliteDownloadHistoryStore::new(pool));
    let (search, downloads) = build_services(&config, history.clone())?;

    let runs = RecentRuns::new(config.runs.retained);
    let bus = InMemoryEventBus::new();
    bus.subscribe(
        EventKind::DownloadAdded,
        Arc::new(DownloadHistoryIngest::new(history.clone())),
    );
    let runner = AcquisitionRunner::new(search, downloads, history)
        .with_reporter(Arc::new(runs.clone()))
        .with_reporter(Arc::new(bus.clone()));

    let scheduler = Arc::new(TokioDelayScheduler::new());
    let orchestrator = Arc::new(Orchestrator::new(
        config.orchestrator.settings(),
        ProcessingRegistry::new(),
        Arc::new(runner),
        scheduler.clone(),
    ));
    orchestrator.start(Arc::new(bus.clone()));

    let state = AppState::new(config.clone(), orchestrator.clone(), bus, runs);
    state.on_start();

    let listener = TcpListener::bind(bind_addr(&config.http)?).await?;
    let addr = listener.local_addr()?;
    info!(target: "cli", "listening on {}", addr);

    serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    orchestrator.stop();
    scheduler.shutdown();
    info!(target: "cli", "shutdown complete");
    Ok(())
}

fn build_services(
    config: &AppConfig,
    history: Arc<SqliteDownloadHistoryStore>,
) -> Result<(Arc<dyn SearchService>, Arc<dyn DownloadService>)> {
    let client = http_client(Duration::from_secs(config.search.timeout_seconds))?;

    let search: Arc<dyn SearchService> =
        match HttpSearchService::from_config(client.clone(), &config.search) {
            Some(search) => Arc::new(search),
            None => {
                warn!(target: "cli", "search.base_url not set, searches will find nothing");
                Arc::new(UnconfiguredSearchService)
            }
        };

    let downloads: Arc<dyn DownloadService> =
        match QBittorrentClient::from_config(client, &config.download_client) {
            Some(qbittorrent) => Arc::new(RecordingDownloadService::new(qbittorrent, history)),
            None => {
                warn!(target: "cli", "download_client.base_url not set, downloads will fail");
                Arc::new(UnconfiguredDownloadService)
            }
        };

    Ok((search, downloads))
}

fn init_tracing(telemetry: &TelemetryConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(telemetry.log_level.as_str()));

    let json_layer = telemetry
        .json
        .then(|| fmt::layer().json().with_target(true).with_level(true));
    let text_layer = (!telemetry.json).then(|| {
        fmt::layer()
            .with_target(true)
            .with_thread_names(true)
            .with_level(true)
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .init();
}

fn bind_addr(http: &multiversion_config::HttpConfig) -> Result<SocketAddr> {
    let addr = format!("{}:{}", http.host, http.port);
    addr.parse::<SocketAddr>()
        .with_context(|| format!("invalid listen address {addr}"))
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
            (Ok(mut interrupt), Ok(mut terminate)) => {
                tokio::select! {
                    _ = interrupt.recv() => {},
                    _ = terminate.recv() => {},
                }
            }
            (Err(err), _) | (_, Err(err)) => {
                error!(target: "cli", error = %err, "failed to install signal handlers, falling back to ctrl-c");
                wait_for_ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    wait_for_ctrl_c().await;

    info!(target: "cli", "shutdown signal received");
}

async fn wait_for_ctrl_c() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(target: "cli", error = %err, "ctrl-c handler failed");
        std::future::pending::<()>().await;
    }
}
