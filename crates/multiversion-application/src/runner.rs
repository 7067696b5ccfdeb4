// SPDX-License-Identifier: GPL-3.0-or-later
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Utc;
use futures_util::FutureExt;
use multiversion_domain::{
    AcquisitionRequest, DownloadOrder, RuleOutcome, RuleReport, RunStatus, RunSummary, SkipReason,
};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::ports::{
    DownloadClientError, DownloadHistoryStore, DownloadService, HistoryError, SearchError,
    SearchService,
};
use crate::reporting::{log_summary, RunReporter};

/// Upstream failure while processing a single rule group.
#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("search failed: {0}")]
    Search(#[from] SearchError),
    #[error("history lookup failed: {0}")]
    HistoryLookup(#[from] HistoryError),
    #[error("download failed: {0}")]
    Download(#[from] DownloadClientError),
    #[error("unexpected failure: {0}")]
    Panicked(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleDisposition {
    Downloaded { download_id: String },
    Skipped(SkipReason),
}

pub type RuleResult = Result<RuleDisposition, AcquisitionError>;

fn outcome_of(result: RuleResult) -> RuleOutcome {
    match result {
        Ok(RuleDisposition::Downloaded { download_id }) => RuleOutcome::Success { download_id },
        Ok(RuleDisposition::Skipped(reason)) => RuleOutcome::Skipped { reason },
        Err(err) => RuleOutcome::Failed {
            reason: err.to_string(),
        },
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Walks the rule groups of one request: search, history check, download.
pub struct AcquisitionRunner {
    search: Arc<dyn SearchService>,
    downloads: Arc<dyn DownloadService>,
    history: Arc<dyn DownloadHistoryStore>,
    reporters: Vec<Arc<dyn RunReporter>>,
}

impl AcquisitionRunner {
    pub fn new(
        search: Arc<dyn SearchService>,
        downloads: Arc<dyn DownloadService>,
        history: Arc<dyn DownloadHistoryStore>,
    ) -> Self {
        Self {
            search,
            downloads,
            history,
            reporters: Vec::new(),
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn RunReporter>) -> Self {
        self.reporters.push(reporter);
        self
    }

    /// Process every rule group of `request` in captured order, then report.
    ///
    /// Rules are isolated from each other: one failing, or panicking, never
    /// stops the rest. A panic outside a rule ends the run as `Aborted`.
    pub async fn run_acquisition(&self, request: &AcquisitionRequest) -> RunSummary {
        let started_at = Utc::now();
        info!(
            target: "orchestrator",
            media = %request.media,
            title = %request.title,
            rules = ?request.rule_groups,
            "starting multi-version acquisition"
        );

        let mut rules = Vec::with_capacity(request.rule_groups.len());
        let status = match AssertUnwindSafe(self.process_rules(request, &mut rules))
            .catch_unwind()
            .await
        {
            Ok(()) => RunStatus::Completed,
            Err(payload) => {
                let reason = panic_message(payload.as_ref());
                error!(
                    target: "orchestrator",
                    media = %request.media,
                    %reason,
                    "unexpected failure during acquisition"
                );
                RunStatus::Aborted { reason }
            }
        };

        let summary = RunSummary {
            media: request.media.clone(),
            title: request.title.clone(),
            started_at,
            finished_at: Utc::now(),
            rules,
            status,
        };

        log_summary(&summary);
        for reporter in &self.reporters {
            reporter.report(&summary);
        }
        summary
    }

    async fn process_rules(&self, request: &AcquisitionRequest, reports: &mut Vec<RuleReport>) {
        for rule in &request.rule_groups {
            info!(target: "orchestrator", media = %request.media, %rule, "processing rule group");
            let mut candidate = None;
            let result = match AssertUnwindSafe(self.acquire_rule(request, rule, &mut candidate))
                .catch_unwind()
                .await
            {
                Ok(result) => result,
                Err(payload) => Err(AcquisitionError::Panicked(panic_message(payload.as_ref()))),
            };
            if let Err(err) = &result {
                warn!(
                    target: "orchestrator",
                    media = %request.media,
                    %rule,
                    error = %err,
                    "rule group failed"
                );
            }
            reports.push(RuleReport {
                rule: rule.clone(),
                candidate,
                outcome: outcome_of(result),
            });
        }
    }

    async fn acquire_rule(
        &self,
        request: &AcquisitionRequest,
        rule: &str,
        matched: &mut Option<String>,
    ) -> RuleResult {
        let rule_groups = [rule.to_string()];
        let candidates = self
            .search
            .process(&request.media_info, &rule_groups)
            .await?;

        // Ranking belongs to the search service; take its best result as is.
        let Some(best) = candidates.into_iter().next() else {
            info!(target: "orchestrator", media = %request.media, %rule, "no candidates found");
            return Ok(RuleDisposition::Skipped(SkipReason::NoCandidates));
        };
        *matched = Some(best.title.clone());
        info!(
            target: "orchestrator",
            media = %request.media,
            %rule,
            candidate = %best.title,
            priority = best.priority,
            "matched candidate"
        );

        if let Some(hash) = best.content_hash() {
            // The triggering download may not have reached the history store yet.
            let is_origin = request.origin_hash.as_deref() == Some(hash);
            if is_origin || self.history.get_by_hash(hash).await?.is_some() {
                info!(target: "orchestrator", media = %request.media, %rule, %hash, "already downloaded, skipping");
                return Ok(RuleDisposition::Skipped(SkipReason::DuplicateHash {
                    hash: hash.to_string(),
                }));
            }
        }

        let order = DownloadOrder {
            candidate: best,
            media: request.media.clone(),
            title: request.title.clone(),
            rule_group: rule.to_string(),
            attribution: request.attribution.clone(),
        };
        match self.downloads.download_single(&order).await? {
            Some(download_id) if !download_id.is_empty() => {
                Ok(RuleDisposition::Downloaded { download_id })
            }
            _ => {
                info!(target: "orchestrator", media = %request.media, %rule, "download client refused candidate");
                Ok(RuleDisposition::Skipped(SkipReason::DownloadRejected))
            }
        }
    }
}
