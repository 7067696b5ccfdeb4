// SPDX-License-Identifier: GPL-3.0-or-later
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use multiversion_application::{DownloadClientError, DownloadHistoryStore, DownloadService};
use multiversion_domain::{DownloadOrder, DownloadRecord};
use tracing::warn;

/// Writes a history row for every successful download so later runs see the
/// hash as already taken.
pub struct RecordingDownloadService<D, H: ?Sized> {
    inner: D,
    history: Arc<H>,
}

impl<D, H: ?Sized> RecordingDownloadService<D, H> {
    pub fn new(inner: D, history: Arc<H>) -> Self {
        Self { inner, history }
    }
}

#[async_trait]
impl<D, H> DownloadService for RecordingDownloadService<D, H>
where
    D: DownloadService,
    H: DownloadHistoryStore + ?Sized,
{
    async fn download_single(
        &self,
        order: &DownloadOrder,
    ) -> Result<Option<String>, DownloadClientError> {
        let download_id = self.inner.download_single(order).await?;

        if let (Some(download_id), Some(hash)) = (&download_id, order.candidate.content_hash()) {
            let record = DownloadRecord {
                hash: hash.to_string(),
                title: order.candidate.title.clone(),
                media: order.media.clone(),
                rule_group: Some(order.rule_group.clone()),
                source: order.attribution.source.clone(),
                username: order.attribution.username.clone(),
                download_id: download_id.clone(),
                created_at: Utc::now(),
            };
            // The download itself went through; a lost history row only
            // weakens duplicate detection.
            if let Err(err) = self.history.record(record).await {
                warn!(
                    target: "history",
                    media = %order.media,
                    hash,
                    error = %err,
                    "failed to record download"
                );
            }
        }

        Ok(download_id)
    }
}
