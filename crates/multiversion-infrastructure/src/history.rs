// SPDX-License-Identifier: GPL-3.0-or-later
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use multiversion_application::{DownloadHistoryStore, HistoryError};
use multiversion_domain::{DownloadRecord, MediaIdentity};
use sqlx::{Row, SqlitePool};
use tracing::debug;

/// SQLx-backed download history, one row per content hash.
pub struct SqliteDownloadHistoryStore {
    pool: SqlitePool,
}

impl SqliteDownloadHistoryStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Most recent rows first.
    pub async fn list_recent(&self, limit: i64) -> Result<Vec<DownloadRecord>> {
        debug!(target: "history", limit, "listing download history");
        let rows = sqlx::query("SELECT * FROM download_history ORDER BY created_at DESC LIMIT ?")
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_record).collect()
    }

    async fn fetch(&self, hash: &str) -> Result<Option<DownloadRecord>> {
        let row = sqlx::query("SELECT * FROM download_history WHERE hash = ? LIMIT 1")
            .bind(hash)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_record).transpose()
    }

    async fn insert(&self, record: &DownloadRecord) -> Result<()> {
        let q = r#"
            INSERT INTO download_history (
                hash, title, media_key, rule_group, source, username, download_id, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(hash) DO NOTHING
        "#;
        sqlx::query(q)
            .bind(&record.hash)
            .bind(&record.title)
            .bind(record.media.as_str())
            .bind(record.rule_group.as_deref())
            .bind(&record.source)
            .bind(&record.username)
            .bind(&record.download_id)
            .bind(record.created_at.to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl DownloadHistoryStore for SqliteDownloadHistoryStore {
    async fn get_by_hash(&self, hash: &str) -> Result<Option<DownloadRecord>, HistoryError> {
        debug!(target: "history", hash, "looking up download by hash");
        self.fetch(hash)
            .await
            .map_err(|err| HistoryError::Storage(err.to_string()))
    }

    async fn record(&self, record: DownloadRecord) -> Result<(), HistoryError> {
        debug!(
            target: "history",
            hash = %record.hash,
            media = %record.media,
            "recording download"
        );
        self.insert(&record)
            .await
            .map_err(|err| HistoryError::Storage(err.to_string()))
    }
}

fn parse_dt(s: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    // SQLite CURRENT_TIMESTAMP format
    let ndt = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")?;
    Ok(DateTime::<Utc>::from_naive_utc_and_offset(ndt, Utc))
}

fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<DownloadRecord> {
    let media_key: String = row.try_get("media_key")?;
    let media: MediaIdentity = media_key
        .parse()
        .map_err(|err| anyhow!("download_history row: {err}"))?;
    let created_at: String = row.try_get("created_at")?;

    Ok(DownloadRecord {
        hash: row.try_get("hash")?,
        title: row.try_get("title")?,
        media,
        rule_group: row.try_get("rule_group")?,
        source: row.try_get("source")?,
        username: row.try_get("username")?,
        download_id: row.try_get("download_id")?,
        created_at: parse_dt(&created_at)?,
    })
}
