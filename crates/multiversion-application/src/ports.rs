// SPDX-License-Identifier: GPL-3.0-or-later
//! Collaborators the orchestrator calls into. Search ranking, the download
//! client protocol and history persistence all live behind these traits.

use async_trait::async_trait;
use multiversion_domain::{Candidate, DownloadOrder, DownloadRecord, MediaInfo};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("search service is not configured")]
    NotConfigured,
    #[error("search request failed: {0}")]
    Request(String),
    #[error("search host responded with status {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("deserialization failed: {0}")]
    Deserialization(String),
}

#[derive(Debug, Error)]
pub enum DownloadClientError {
    #[error("download client is not configured")]
    NotConfigured,
    #[error("candidate {0:?} has neither a download url nor a hash")]
    MissingSource(String),
    #[error("request failed: {0}")]
    Request(String),
    #[error("authentication failed")]
    Authentication,
    #[error("invalid base url: {0}")]
    InvalidBaseUrl(String),
    #[error("download client responded with status {status}: {body}")]
    HttpStatus { status: u16, body: String },
}

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("history storage failed: {0}")]
    Storage(String),
}

/// Runs a search for one media item restricted to the given rule groups.
/// Results come back ranked, best first.
#[async_trait]
pub trait SearchService: Send + Sync {
    async fn process(
        &self,
        media: &MediaInfo,
        rule_groups: &[String],
    ) -> Result<Vec<Candidate>, SearchError>;
}

/// Issues a direct download, bypassing any subscription-level gating.
///
/// `Ok(None)` is a soft refusal, e.g. the client already has the torrent.
#[async_trait]
pub trait DownloadService: Send + Sync {
    async fn download_single(
        &self,
        order: &DownloadOrder,
    ) -> Result<Option<String>, DownloadClientError>;
}

#[async_trait]
pub trait DownloadHistoryStore: Send + Sync {
    async fn get_by_hash(&self, hash: &str) -> Result<Option<DownloadRecord>, HistoryError>;
    async fn record(&self, record: DownloadRecord) -> Result<(), HistoryError>;
}
