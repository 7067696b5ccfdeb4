// SPDX-License-Identifier: GPL-3.0-or-later
use std::time::Duration;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Value Objects & IDs
// ============================================================================

/// Stable key for a media item, derived from its catalog ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MediaIdentity(String);

impl MediaIdentity {
    pub fn tmdb(id: u64) -> Self {
        Self(format!("tmdb:{id}"))
    }

    pub fn douban(id: &str) -> Self {
        Self(format!("douban:{}", id.trim()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MediaIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid media identity: {0:?}")]
pub struct InvalidMediaIdentity(pub String);

impl std::str::FromStr for MediaIdentity {
    type Err = InvalidMediaIdentity;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some(("tmdb", id)) => id
                .parse::<u64>()
                .ok()
                .filter(|id| *id > 0)
                .map(Self::tmdb)
                .ok_or_else(|| InvalidMediaIdentity(s.to_string())),
            Some(("douban", id)) if !id.trim().is_empty() => Ok(Self::douban(id)),
            _ => Err(InvalidMediaIdentity(s.to_string())),
        }
    }
}

// ============================================================================
// Enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Movie,
    Tv,
    #[default]
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Movie => write!(f, "movie"),
            Self::Tv => write!(f, "tv"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Notification kinds published by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    DownloadAdded,
    TransferComplete,
    SubscribeComplete,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DownloadAdded => "download_added",
            Self::TransferComplete => "transfer_complete",
            Self::SubscribeComplete => "subscribe_complete",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Entities
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaInfo {
    #[serde(default)]
    pub tmdb_id: Option<u64>,
    #[serde(default)]
    pub douban_id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub year: Option<u16>,
    #[serde(default)]
    pub media_type: MediaType,
}

impl MediaInfo {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            tmdb_id: None,
            douban_id: None,
            title: title.into(),
            year: None,
            media_type: MediaType::Unknown,
        }
    }

    /// Primary catalog id first, secondary as fallback. `None` when neither is usable.
    pub fn identity(&self) -> Option<MediaIdentity> {
        if let Some(id) = self.tmdb_id.filter(|id| *id > 0) {
            return Some(MediaIdentity::tmdb(id));
        }
        self.douban_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(MediaIdentity::douban)
    }

    pub fn title_year(&self) -> String {
        match self.year {
            Some(year) => format!("{} ({})", self.title, year),
            None => self.title.clone(),
        }
    }
}

/// A ranked search result that can be handed to the download service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub title: String,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub download_url: Option<String>,
    #[serde(default)]
    pub site: Option<String>,
    #[serde(default)]
    pub size_bytes: Option<u64>,
    #[serde(default)]
    pub seeders: Option<u32>,
}

impl Candidate {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            priority: 0,
            hash: None,
            download_url: None,
            site: None,
            size_bytes: None,
            seeders: None,
        }
    }

    pub fn with_hash(mut self, hash: impl Into<String>) -> Self {
        self.hash = Some(hash.into());
        self
    }

    pub fn with_download_url(mut self, url: impl Into<String>) -> Self {
        self.download_url = Some(url.into());
        self
    }

    pub fn content_hash(&self) -> Option<&str> {
        self.hash
            .as_deref()
            .map(str::trim)
            .filter(|hash| !hash.is_empty())
    }
}

/// Who a download is attributed to when the orchestrator issues it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribution {
    pub username: String,
    pub source: String,
}

impl Default for Attribution {
    fn default() -> Self {
        Self {
            username: "MultiVersion Download".to_string(),
            source: "MultiVersion".to_string(),
        }
    }
}

/// Work item captured when a qualifying event is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcquisitionRequest {
    pub media: MediaIdentity,
    pub media_info: MediaInfo,
    pub title: String,
    pub rule_groups: Vec<String>,
    pub attribution: Attribution,
    pub scheduled_for: DateTime<Utc>,
    /// Content hash of the subscription download that triggered the request.
    #[serde(default)]
    pub origin_hash: Option<String>,
}

/// A download known to the history store, by content hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRecord {
    pub hash: String,
    pub title: String,
    pub media: MediaIdentity,
    pub rule_group: Option<String>,
    pub source: String,
    pub username: String,
    pub download_id: String,
    pub created_at: DateTime<Utc>,
}

/// Everything the download service needs to issue one direct download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadOrder {
    pub candidate: Candidate,
    pub media: MediaIdentity,
    pub title: String,
    pub rule_group: String,
    pub attribution: Attribution,
}

// ============================================================================
// Settings
// ============================================================================

#[derive(Debug, Error, PartialEq)]
pub enum SettingsError {
    #[error("delay_seconds must be a finite number between 0 and 604800 (one week), got {0}")]
    InvalidDelay(f64),
    #[error("subscription_marker must not be empty")]
    EmptySubscriptionMarker,
    #[error("rule group names must not be empty")]
    EmptyRuleName,
    #[error("attribution source {attribution_source:?} contains subscription marker {marker:?}")]
    SelfTriggeringAttribution {
        attribution_source: String,
        marker: String,
    },
}

/// Longest accepted acquisition delay: one week.
pub const MAX_DELAY_SECONDS: f64 = 7.0 * 24.0 * 60.0 * 60.0;

/// Resolved orchestrator configuration. Replaced wholesale, never edited in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub selected_rules: IndexMap<String, bool>,
    #[serde(default = "default_delay_seconds")]
    pub delay_seconds: f64,
    #[serde(default = "default_debounce_seconds")]
    pub debounce_seconds: u64,
    #[serde(default = "default_subscription_marker")]
    pub subscription_marker: String,
    #[serde(default)]
    pub attribution: Attribution,
}

fn default_delay_seconds() -> f64 {
    15.0
}

fn default_debounce_seconds() -> u64 {
    60
}

fn default_subscription_marker() -> String {
    "Subscribe".to_string()
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            selected_rules: IndexMap::new(),
            delay_seconds: default_delay_seconds(),
            debounce_seconds: default_debounce_seconds(),
            subscription_marker: default_subscription_marker(),
            attribution: Attribution::default(),
        }
    }
}

impl OrchestratorSettings {
    /// Enabled rule-group names in configured order.
    pub fn enabled_rules(&self) -> Vec<String> {
        self.selected_rules
            .iter()
            .filter(|(_, enabled)| **enabled)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Unvalidated values are clamped into `0..=MAX_DELAY_SECONDS`; NaN is zero.
    pub fn delay(&self) -> Duration {
        Duration::try_from_secs_f64(self.delay_seconds.clamp(0.0, MAX_DELAY_SECONDS))
            .unwrap_or(Duration::ZERO)
    }

    pub fn debounce_window(&self) -> Duration {
        Duration::from_secs(self.debounce_seconds)
    }

    pub fn is_subscription_source(&self, source: &str) -> bool {
        !source.is_empty() && source.contains(&self.subscription_marker)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if !(0.0..=MAX_DELAY_SECONDS).contains(&self.delay_seconds) {
            return Err(SettingsError::InvalidDelay(self.delay_seconds));
        }
        if self.subscription_marker.trim().is_empty() {
            return Err(SettingsError::EmptySubscriptionMarker);
        }
        if self.selected_rules.keys().any(|name| name.trim().is_empty()) {
            return Err(SettingsError::EmptyRuleName);
        }
        // Our own downloads must never look like subscription downloads.
        if self.attribution.source.contains(&self.subscription_marker) {
            return Err(SettingsError::SelfTriggeringAttribution {
                attribution_source: self.attribution.source.clone(),
                marker: self.subscription_marker.clone(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// Outcomes
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
    NoCandidates,
    DuplicateHash { hash: String },
    DownloadRejected,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoCandidates => write!(f, "no candidates"),
            Self::DuplicateHash { hash } => write!(f, "already downloaded ({hash})"),
            Self::DownloadRejected => write!(f, "rejected by download client"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RuleOutcome {
    Success { download_id: String },
    Skipped { reason: SkipReason },
    Failed { reason: String },
}

impl RuleOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleReport {
    pub rule: String,
    pub candidate: Option<String>,
    pub outcome: RuleOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Aborted { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub media: MediaIdentity,
    pub title: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub rules: Vec<RuleReport>,
    pub status: RunStatus,
}

impl RunSummary {
    pub fn success_count(&self) -> usize {
        self.rules.iter().filter(|r| r.outcome.is_success()).count()
    }

    pub fn skipped_count(&self) -> usize {
        self.rules.iter().filter(|r| r.outcome.is_skipped()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.rules.iter().filter(|r| r.outcome.is_failed()).count()
    }
}

// ============================================================================
// Events
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct DomainEvent<TPayload> {
    pub name: &'static str,
    pub occurred_at: DateTime<Utc>,
    pub payload: TPayload,
}

impl<TPayload> DomainEvent<TPayload> {
    pub fn new(name: &'static str, payload: TPayload) -> Self {
        Self {
            name,
            occurred_at: Utc::now(),
            payload,
        }
    }
}

pub type AcquisitionCompleted = DomainEvent<RunSummary>;

/// Notification as delivered by the host. The payload stays untyped until a
/// handler decides it cares about it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostEvent {
    pub kind: EventKind,
    #[serde(default = "Utc::now")]
    pub occurred_at: DateTime<Utc>,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

impl HostEvent {
    pub fn new(kind: EventKind, data: Option<serde_json::Value>) -> Self {
        Self {
            kind,
            occurred_at: Utc::now(),
            data,
        }
    }

    pub fn download_added(payload: &DownloadAddedPayload) -> Self {
        Self::new(EventKind::DownloadAdded, serde_json::to_value(payload).ok())
    }

    /// `None` when the event carries no data.
    pub fn decode<T: DeserializeOwned>(&self) -> Option<Result<T, serde_json::Error>> {
        match &self.data {
            None | Some(serde_json::Value::Null) => None,
            Some(value) => Some(T::deserialize(value)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DownloadAddedPayload {
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub context: Option<DownloadContext>,
}

impl DownloadAddedPayload {
    /// The download's own hash, else the hash of the torrent it came from.
    pub fn content_hash(&self) -> Option<&str> {
        self.hash
            .as_deref()
            .map(str::trim)
            .filter(|hash| !hash.is_empty())
            .or_else(|| {
                self.context
                    .as_ref()?
                    .torrent_info
                    .as_ref()?
                    .content_hash()
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DownloadContext {
    #[serde(default)]
    pub media_info: Option<MediaInfo>,
    #[serde(default)]
    pub torrent_info: Option<Candidate>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn movie() -> MediaInfo {
        MediaInfo {
            tmdb_id: Some(100),
            douban_id: Some("2000".to_string()),
            title: "Arrival".to_string(),
            year: Some(2016),
            media_type: MediaType::Movie,
        }
    }

    #[test]
    fn identity_prefers_tmdb_over_douban() {
        assert_eq!(movie().identity(), Some(MediaIdentity::tmdb(100)));
        assert_eq!(movie().identity().unwrap().as_str(), "tmdb:100");
    }

    #[test]
    fn identity_parses_from_stored_key() {
        assert_eq!("tmdb:100".parse(), Ok(MediaIdentity::tmdb(100)));
        assert_eq!("douban:2000".parse(), Ok(MediaIdentity::douban("2000")));
        assert!("tmdb:0".parse::<MediaIdentity>().is_err());
        assert!("imdb:tt1".parse::<MediaIdentity>().is_err());
        assert!("douban: ".parse::<MediaIdentity>().is_err());
    }

    #[test]
    fn identity_falls_back_to_douban() {
        let mut info = movie();
        info.tmdb_id = None;
        assert_eq!(info.identity(), Some(MediaIdentity::douban("2000")));

        info.tmdb_id = Some(0);
        assert_eq!(info.identity().unwrap().as_str(), "douban:2000");
    }

    #[test]
    fn identity_missing_when_no_ids() {
        let mut info = MediaInfo::new("Unknown");
        assert_eq!(info.identity(), None);

        info.douban_id = Some("   ".to_string());
        assert_eq!(info.identity(), None);
    }

    #[test]
    fn title_year_includes_year_when_known() {
        assert_eq!(movie().title_year(), "Arrival (2016)");
        assert_eq!(MediaInfo::new("Arrival").title_year(), "Arrival");
    }

    #[test]
    fn candidate_content_hash_ignores_blank() {
        assert_eq!(Candidate::new("a").content_hash(), None);
        assert_eq!(Candidate::new("a").with_hash("  ").content_hash(), None);
        assert_eq!(
            Candidate::new("a").with_hash("abc").content_hash(),
            Some("abc")
        );
    }

    #[test]
    fn settings_from_host_form_keep_rule_order() {
        let settings: OrchestratorSettings = serde_json::from_value(json!({
            "enabled": true,
            "selected_rules": {"4K": true, "Web": false, "1080p": true},
            "delay_seconds": 1
        }))
        .expect("settings should deserialize");

        assert!(settings.enabled);
        assert_eq!(settings.enabled_rules(), vec!["4K", "1080p"]);
        assert_eq!(settings.delay(), Duration::from_secs(1));
        assert_eq!(settings.debounce_window(), Duration::from_secs(60));
        assert_eq!(settings.subscription_marker, "Subscribe");
    }

    #[test]
    fn settings_validation_rejects_negative_delay() {
        let settings = OrchestratorSettings {
            delay_seconds: -1.0,
            ..Default::default()
        };
        assert_eq!(settings.validate(), Err(SettingsError::InvalidDelay(-1.0)));
    }

    #[test]
    fn settings_validation_caps_delay_at_one_week() {
        let mut settings = OrchestratorSettings {
            delay_seconds: MAX_DELAY_SECONDS,
            ..Default::default()
        };
        assert!(settings.validate().is_ok());

        for delay in [MAX_DELAY_SECONDS + 1.0, 1e13, f64::INFINITY, f64::NAN] {
            settings.delay_seconds = delay;
            assert!(matches!(
                settings.validate(),
                Err(SettingsError::InvalidDelay(_))
            ));
        }
    }

    #[test]
    fn unvalidated_delay_is_clamped_not_zeroed() {
        let mut settings = OrchestratorSettings {
            delay_seconds: 1e13,
            ..Default::default()
        };
        assert_eq!(settings.delay(), Duration::from_secs(7 * 24 * 60 * 60));

        settings.delay_seconds = -5.0;
        assert_eq!(settings.delay(), Duration::ZERO);
        settings.delay_seconds = f64::NAN;
        assert_eq!(settings.delay(), Duration::ZERO);
    }

    #[test]
    fn payload_hash_falls_back_to_torrent_info() {
        let mut payload = DownloadAddedPayload {
            context: Some(DownloadContext {
                media_info: Some(movie()),
                torrent_info: Some(Candidate::new("Arrival 2160p").with_hash("aa11")),
            }),
            ..Default::default()
        };
        assert_eq!(payload.content_hash(), Some("aa11"));

        payload.hash = Some("  ".to_string());
        assert_eq!(payload.content_hash(), Some("aa11"));

        payload.hash = Some("bb22".to_string());
        assert_eq!(payload.content_hash(), Some("bb22"));

        assert_eq!(DownloadAddedPayload::default().content_hash(), None);
    }

    #[test]
    fn settings_validation_rejects_self_triggering_attribution() {
        let settings = OrchestratorSettings {
            attribution: Attribution {
                username: "x".to_string(),
                source: "SubscribeAgain".to_string(),
            },
            ..Default::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(SettingsError::SelfTriggeringAttribution { .. })
        ));
        assert!(OrchestratorSettings::default().validate().is_ok());
    }

    #[test]
    fn subscription_source_is_substring_match() {
        let settings = OrchestratorSettings::default();
        assert!(settings.is_subscription_source("Subscribe|Arrival"));
        assert!(settings.is_subscription_source("RssSubscribe"));
        assert!(!settings.is_subscription_source("MultiVersion"));
        assert!(!settings.is_subscription_source(""));
    }

    #[test]
    fn run_summary_counts_each_outcome() {
        let report = |rule: &str, outcome| RuleReport {
            rule: rule.to_string(),
            candidate: None,
            outcome,
        };
        let summary = RunSummary {
            media: MediaIdentity::tmdb(1),
            title: "t".to_string(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            rules: vec![
                report(
                    "4K",
                    RuleOutcome::Success {
                        download_id: "id".to_string(),
                    },
                ),
                report(
                    "1080p",
                    RuleOutcome::Skipped {
                        reason: SkipReason::NoCandidates,
                    },
                ),
                report(
                    "720p",
                    RuleOutcome::Failed {
                        reason: "boom".to_string(),
                    },
                ),
            ],
            status: RunStatus::Completed,
        };

        assert_eq!(summary.success_count(), 1);
        assert_eq!(summary.skipped_count(), 1);
        assert_eq!(summary.failed_count(), 1);
    }

    #[test]
    fn host_event_decodes_download_payload() {
        let payload = DownloadAddedPayload {
            source: Some("Subscribe".to_string()),
            context: Some(DownloadContext {
                media_info: Some(movie()),
                torrent_info: None,
            }),
            ..Default::default()
        };
        let event = HostEvent::download_added(&payload);
        assert_eq!(event.kind, EventKind::DownloadAdded);

        let decoded = event
            .decode::<DownloadAddedPayload>()
            .expect("event should carry data")
            .expect("payload should decode");
        assert_eq!(decoded, payload);

        let empty = HostEvent::new(EventKind::DownloadAdded, None);
        assert!(empty.decode::<DownloadAddedPayload>().is_none());
    }
}
