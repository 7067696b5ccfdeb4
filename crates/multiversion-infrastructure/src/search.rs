// SPDX-License-Identifier: GPL-3.0-or-later
use async_trait::async_trait;
use multiversion_application::{
    DownloadClientError, DownloadService, SearchError, SearchService,
};
use multiversion_config::SearchConfig;
use multiversion_domain::{Candidate, DownloadOrder, MediaInfo};
use reqwest::{Client, Url};
use serde::Serialize;
use tracing::{debug, warn};

#[derive(Serialize)]
struct SearchRequest<'a> {
    media: &'a MediaInfo,
    rule_groups: &'a [String],
}

/// Client for the host's search endpoint. Ranking is done host-side; results
/// come back best first.
pub struct HttpSearchService {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpSearchService {
    pub fn new(client: Client, base_url: String, api_key: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    /// `None` when no base url is configured.
    pub fn from_config(client: Client, config: &SearchConfig) -> Option<Self> {
        let base_url = config.base_url.clone()?;
        Some(Self::new(client, base_url, config.api_key.clone()))
    }

    fn endpoint(&self) -> Result<Url, SearchError> {
        Url::parse(&format!("{}/api/v1/search", self.base_url))
            .map_err(|err| SearchError::Request(err.to_string()))
    }
}

#[async_trait]
impl SearchService for HttpSearchService {
    async fn process(
        &self,
        media: &MediaInfo,
        rule_groups: &[String],
    ) -> Result<Vec<Candidate>, SearchError> {
        debug!(target: "search", title = %media.title, rules = ?rule_groups, "searching");

        let mut request = self
            .client
            .post(self.endpoint()?)
            .json(&SearchRequest { media, rule_groups });
        if let Some(key) = &self.api_key {
            request = request.header("X-Api-Key", key);
        }
        let response = request
            .send()
            .await
            .map_err(|e| SearchError::Request(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SearchError::Request(e.to_string()))?;

        if !status.is_success() {
            return Err(SearchError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        let candidates: Vec<Candidate> = serde_json::from_str(&body)
            .map_err(|e| SearchError::Deserialization(e.to_string()))?;
        debug!(target: "search", title = %media.title, found = candidates.len(), "search finished");
        Ok(candidates)
    }
}

/// Stand-in when no search host is configured: every search comes back empty.
pub struct UnconfiguredSearchService;

#[async_trait]
impl SearchService for UnconfiguredSearchService {
    async fn process(
        &self,
        media: &MediaInfo,
        _rule_groups: &[String],
    ) -> Result<Vec<Candidate>, SearchError> {
        warn!(target: "search", title = %media.title, "no search host configured, returning nothing");
        Ok(Vec::new())
    }
}

/// Stand-in when no download client is configured.
pub struct UnconfiguredDownloadService;

#[async_trait]
impl DownloadService for UnconfiguredDownloadService {
    async fn download_single(
        &self,
        _order: &DownloadOrder,
    ) -> Result<Option<String>, DownloadClientError> {
        Err(DownloadClientError::NotConfigured)
    }
}
