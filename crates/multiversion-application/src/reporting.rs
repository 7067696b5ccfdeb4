// SPDX-License-Identifier: GPL-3.0-or-later
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use multiversion_domain::{RuleOutcome, RunStatus, RunSummary};
use tracing::{error, info, warn};

/// Observes finished runs. Never feeds back into control flow.
pub trait RunReporter: Send + Sync {
    fn report(&self, summary: &RunSummary);
}

/// Write the run summary to the log, one line per rule plus a totals line.
pub fn log_summary(summary: &RunSummary) {
    for rule in &summary.rules {
        let candidate = rule.candidate.as_deref().unwrap_or("-");
        match &rule.outcome {
            RuleOutcome::Success { download_id } => info!(
                target: "orchestrator",
                media = %summary.media,
                rule = %rule.rule,
                candidate,
                %download_id,
                "rule succeeded"
            ),
            RuleOutcome::Skipped { reason } => info!(
                target: "orchestrator",
                media = %summary.media,
                rule = %rule.rule,
                candidate,
                %reason,
                "rule skipped"
            ),
            RuleOutcome::Failed { reason } => warn!(
                target: "orchestrator",
                media = %summary.media,
                rule = %rule.rule,
                candidate,
                %reason,
                "rule failed"
            ),
        }
    }

    let elapsed_ms = (summary.finished_at - summary.started_at).num_milliseconds();
    match &summary.status {
        RunStatus::Completed => info!(
            target: "orchestrator",
            media = %summary.media,
            title = %summary.title,
            success = summary.success_count(),
            skipped = summary.skipped_count(),
            failed = summary.failed_count(),
            elapsed_ms,
            "multi-version acquisition finished"
        ),
        RunStatus::Aborted { reason } => error!(
            target: "orchestrator",
            media = %summary.media,
            title = %summary.title,
            success = summary.success_count(),
            skipped = summary.skipped_count(),
            failed = summary.failed_count(),
            %reason,
            "multi-version acquisition aborted"
        ),
    }
}

/// Bounded, newest-first history of run summaries.
#[derive(Clone)]
pub struct RecentRuns {
    inner: Arc<Mutex<VecDeque<RunSummary>>>,
    capacity: usize,
}

impl RecentRuns {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    pub fn list(&self) -> Vec<RunSummary> {
        match self.inner.lock() {
            Ok(runs) => runs.iter().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().iter().cloned().collect(),
        }
    }
}

impl RunReporter for RecentRuns {
    fn report(&self, summary: &RunSummary) {
        if self.capacity == 0 {
            return;
        }
        let mut runs = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if runs.len() == self.capacity {
            runs.pop_back();
        }
        runs.push_front(summary.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use multiversion_domain::MediaIdentity;

    fn summary(id: u64) -> RunSummary {
        RunSummary {
            media: MediaIdentity::tmdb(id),
            title: format!("title {id}"),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            rules: Vec::new(),
            status: RunStatus::Completed,
        }
    }

    #[test]
    fn recent_runs_keeps_newest_first_within_capacity() {
        let runs = RecentRuns::new(2);
        runs.report(&summary(1));
        runs.report(&summary(2));
        runs.report(&summary(3));

        let listed = runs.list();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].media, MediaIdentity::tmdb(3));
        assert_eq!(listed[1].media, MediaIdentity::tmdb(2));
    }

    #[test]
    fn zero_capacity_keeps_nothing() {
        let runs = RecentRuns::new(0);
        runs.report(&summary(1));
        assert!(runs.list().is_empty());
    }
}
