// SPDX-License-Identifier: GPL-3.0-or-later
pub mod history;
pub mod qbittorrent;
pub mod recording;
pub mod search;

pub use history::SqliteDownloadHistoryStore;
pub use qbittorrent::QBittorrentClient;
pub use recording::RecordingDownloadService;
pub use search::{HttpSearchService, UnconfiguredDownloadService, UnconfiguredSearchService};

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use multiversion_config::AppConfig;
use reqwest::Client;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tracing::info;

pub fn http_client(timeout: Duration) -> Result<Client> {
    Ok(Client::builder()
        .pool_max_idle_per_host(8)
        .timeout(timeout)
        .build()?)
}

/// Turn a relative `sqlite://` url into an absolute one SQLite may create.
fn normalize_sqlite_url(url: &str) -> Result<String> {
    if !url.starts_with("sqlite://") || url.starts_with("sqlite://:memory:") {
        return Ok(url.to_string());
    }

    let path = Path::new(url.trim_start_matches("sqlite://"));
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
            info!(target: "infrastructure", path = %parent.display(), "created database directory");
        }
    }

    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    let path_str = absolute.to_string_lossy().replace('\\', "/");
    Ok(format!("sqlite://{path_str}?mode=rwc"))
}

pub async fn init_database(config: &AppConfig) -> Result<SqlitePool> {
    info!(target: "infrastructure", "initializing database");

    let db_url = normalize_sqlite_url(&config.database.url)?;
    info!(target: "infrastructure", db_url = %db_url, "connecting to database");

    let pool = SqlitePoolOptions::new()
        .max_connections(config.database.pool_max_size)
        .connect(&db_url)
        .await?;

    info!(target: "infrastructure", db_url = %config.database.url, "running migrations");
    sqlx::migrate!("../../migrations").run(&pool).await?;

    info!(target: "infrastructure", "database initialized successfully");
    Ok(pool)
}
