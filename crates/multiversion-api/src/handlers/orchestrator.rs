// SPDX-License-Identifier: GPL-3.0-or-later
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use indexmap::IndexMap;
use multiversion_application::{AppState, ProcessingEntry};
use multiversion_domain::{
    Attribution, OrchestratorSettings, RuleOutcome, RuleReport, RunStatus, RunSummary,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use super::ErrorResponse;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize, ToSchema)]
pub struct ProcessingEntryResponse {
    pub media: String,
    pub title: String,
    pub triggered_at: String,
    pub age_seconds: f64,
}

impl From<ProcessingEntry> for ProcessingEntryResponse {
    fn from(entry: ProcessingEntry) -> Self {
        Self {
            media: entry.media.to_string(),
            title: entry.title,
            triggered_at: entry.triggered_at.to_rfc3339(),
            age_seconds: entry.age_seconds,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RuleReportResponse {
    pub rule: String,
    pub candidate: Option<String>,
    /// `success`, `skipped` or `failed`.
    pub outcome: String,
    pub download_id: Option<String>,
    pub reason: Option<String>,
}

impl From<RuleReport> for RuleReportResponse {
    fn from(report: RuleReport) -> Self {
        let (outcome, download_id, reason) = match report.outcome {
            RuleOutcome::Success { download_id } => ("success", Some(download_id), None),
            RuleOutcome::Skipped { reason } => ("skipped", None, Some(reason.to_string())),
            RuleOutcome::Failed { reason } => ("failed", None, Some(reason)),
        };
        Self {
            rule: report.rule,
            candidate: report.candidate,
            outcome: outcome.to_string(),
            download_id,
            reason,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RunSummaryResponse {
    pub media: String,
    pub title: String,
    pub started_at: String,
    pub finished_at: String,
    /// `completed` or `aborted`.
    pub status: String,
    pub abort_reason: Option<String>,
    pub success: usize,
    pub skipped: usize,
    pub failed: usize,
    pub rules: Vec<RuleReportResponse>,
}

impl From<RunSummary> for RunSummaryResponse {
    fn from(summary: RunSummary) -> Self {
        let (success, skipped, failed) = (
            summary.success_count(),
            summary.skipped_count(),
            summary.failed_count(),
        );
        let (status, abort_reason) = match summary.status {
            RunStatus::Completed => ("completed", None),
            RunStatus::Aborted { reason } => ("aborted", Some(reason)),
        };
        Self {
            media: summary.media.to_string(),
            title: summary.title,
            started_at: summary.started_at.to_rfc3339(),
            finished_at: summary.finished_at.to_rfc3339(),
            status: status.to_string(),
            abort_reason,
            success,
            skipped,
            failed,
            rules: summary.rules.into_iter().map(Into::into).collect(),
        }
    }
}

/// Orchestrator settings in the host's form shape. Omitted fields take their
/// defaults; the whole document replaces the current settings.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SettingsDocument {
    #[serde(default)]
    pub enabled: bool,
    /// Rule group name to selected flag, in priority order.
    #[serde(default)]
    #[schema(value_type = Object)]
    pub selected_rules: IndexMap<String, bool>,
    pub delay_seconds: Option<f64>,
    pub debounce_seconds: Option<u64>,
    pub subscription_marker: Option<String>,
    pub attribution_username: Option<String>,
    pub attribution_source: Option<String>,
}

impl From<&OrchestratorSettings> for SettingsDocument {
    fn from(settings: &OrchestratorSettings) -> Self {
        Self {
            enabled: settings.enabled,
            selected_rules: settings.selected_rules.clone(),
            delay_seconds: Some(settings.delay_seconds),
            debounce_seconds: Some(settings.debounce_seconds),
            subscription_marker: Some(settings.subscription_marker.clone()),
            attribution_username: Some(settings.attribution.username.clone()),
            attribution_source: Some(settings.attribution.source.clone()),
        }
    }
}

impl From<SettingsDocument> for OrchestratorSettings {
    fn from(doc: SettingsDocument) -> Self {
        let defaults = OrchestratorSettings::default();
        let attribution = Attribution {
            username: doc
                .attribution_username
                .unwrap_or(defaults.attribution.username),
            source: doc.attribution_source.unwrap_or(defaults.attribution.source),
        };
        Self {
            enabled: doc.enabled,
            selected_rules: doc.selected_rules,
            delay_seconds: doc.delay_seconds.unwrap_or(defaults.delay_seconds),
            debounce_seconds: doc.debounce_seconds.unwrap_or(defaults.debounce_seconds),
            subscription_marker: doc
                .subscription_marker
                .unwrap_or(defaults.subscription_marker),
            attribution,
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Media items with a scheduled or running acquisition.
#[utoipa::path(
    get,
    path = "/api/v1/processing",
    responses(
        (status = 200, description = "Processing registry snapshot", body = Vec<ProcessingEntryResponse>)
    ),
    tag = "orchestrator"
)]
pub async fn list_processing(State(state): State<AppState>) -> impl IntoResponse {
    let entries: Vec<ProcessingEntryResponse> = state
        .orchestrator
        .registry()
        .snapshot()
        .into_iter()
        .map(Into::into)
        .collect();
    debug!(target: "api", count = entries.len(), "listing processing entries");
    Json(entries)
}

/// Summaries of recent acquisition runs, newest first.
#[utoipa::path(
    get,
    path = "/api/v1/runs",
    responses(
        (status = 200, description = "Recent run summaries", body = Vec<RunSummaryResponse>)
    ),
    tag = "orchestrator"
)]
pub async fn list_runs(State(state): State<AppState>) -> impl IntoResponse {
    let runs: Vec<RunSummaryResponse> = state.runs.list().into_iter().map(Into::into).collect();
    debug!(target: "api", count = runs.len(), "listing recent runs");
    Json(runs)
}

#[utoipa::path(
    get,
    path = "/api/v1/settings",
    responses(
        (status = 200, description = "Current orchestrator settings", body = SettingsDocument)
    ),
    tag = "orchestrator"
)]
pub async fn get_settings(State(state): State<AppState>) -> impl IntoResponse {
    Json(SettingsDocument::from(state.orchestrator.settings().as_ref()))
}

/// Replace the orchestrator settings. Already scheduled runs keep the rule
/// list they were scheduled with.
#[utoipa::path(
    put,
    path = "/api/v1/settings",
    request_body = SettingsDocument,
    responses(
        (status = 200, description = "Settings replaced", body = SettingsDocument),
        (status = 400, description = "Invalid settings", body = ErrorResponse)
    ),
    tag = "orchestrator"
)]
pub async fn put_settings(
    State(state): State<AppState>,
    Json(doc): Json<SettingsDocument>,
) -> impl IntoResponse {
    let settings = OrchestratorSettings::from(doc);
    match state.orchestrator.reconfigure(settings) {
        Ok(()) => {
            info!(target: "api", "orchestrator settings replaced");
            (
                StatusCode::OK,
                Json(SettingsDocument::from(state.orchestrator.settings().as_ref())),
            )
                .into_response()
        }
        Err(err) => {
            warn!(target: "api", error = %err, "rejected settings update");
            (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    error: err.to_string(),
                }),
            )
                .into_response()
        }
    }
}
