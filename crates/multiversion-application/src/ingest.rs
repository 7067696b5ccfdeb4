// SPDX-License-Identifier: GPL-3.0-or-later
use std::sync::Arc;

use chrono::Utc;
use multiversion_domain::{DownloadAddedPayload, DownloadRecord, EventKind, HostEvent};
use tracing::{debug, warn};

use crate::events::EventHandler;
use crate::ports::{DownloadHistoryStore, HistoryError};

/// Records every hashed `DownloadAdded` notification, whatever its source,
/// so later acquisitions never fetch the same content again.
#[derive(Clone)]
pub struct DownloadHistoryIngest {
    history: Arc<dyn DownloadHistoryStore>,
}

impl DownloadHistoryIngest {
    pub fn new(history: Arc<dyn DownloadHistoryStore>) -> Self {
        Self { history }
    }

    /// Store the download carried by `event`. `Ok(false)` when there is
    /// nothing to record.
    pub async fn ingest(&self, event: &HostEvent) -> Result<bool, HistoryError> {
        match history_record(event) {
            Some(record) => {
                self.history.record(record).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// History row for a `DownloadAdded` event that names both a content hash
/// and a catalog identity.
pub fn history_record(event: &HostEvent) -> Option<DownloadRecord> {
    if event.kind != EventKind::DownloadAdded {
        return None;
    }
    let payload: DownloadAddedPayload = event.decode()?.ok()?;
    let hash = payload.content_hash()?.to_string();

    let context = payload.context.unwrap_or_default();
    let media_info = context.media_info?;
    let media = media_info.identity()?;
    let title = context
        .torrent_info
        .map(|torrent| torrent.title)
        .unwrap_or_else(|| media_info.title_year());

    Some(DownloadRecord {
        download_id: hash.clone(),
        hash,
        title,
        media,
        rule_group: None,
        source: payload.source.unwrap_or_default(),
        username: payload.username.unwrap_or_default(),
        created_at: Utc::now(),
    })
}

impl EventHandler for DownloadHistoryIngest {
    fn handle(&self, event: &HostEvent) {
        let Some(record) = history_record(event) else {
            debug!(target: "history", "download event without hash or identity, not recorded");
            return;
        };

        let history = self.history.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    let hash = record.hash.clone();
                    match history.record(record).await {
                        Ok(()) => debug!(target: "history", %hash, "download recorded"),
                        Err(err) => {
                            warn!(target: "history", %hash, error = %err, "failed to record download")
                        }
                    }
                });
            }
            Err(_) => {
                warn!(target: "history", hash = %record.hash, "no async runtime, download not recorded")
            }
        }
    }
}
