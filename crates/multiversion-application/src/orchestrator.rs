// SPDX-License-Identifier: GPL-3.0-or-later
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use multiversion_domain::{
    AcquisitionRequest, DownloadAddedPayload, EventKind, HostEvent, MediaIdentity,
    OrchestratorSettings, SettingsError,
};
use tracing::{debug, error, info, warn};

use crate::events::{EventHandler, EventSource, SubscriptionId};
use crate::registry::{ProcessingGuard, ProcessingRegistry};
use crate::runner::AcquisitionRunner;
use crate::scheduling::{DelayScheduler, DelayedTask, TaskId};

/// Why an event did not lead to an acquisition. None of these are errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterReason {
    Disabled,
    NoRulesSelected,
    WrongKind(EventKind),
    MissingData,
    MalformedPayload(String),
    NotFromSubscription(String),
    MissingContext,
    MissingMediaInfo,
    MissingIdentity,
    Debounced(MediaIdentity),
}

impl std::fmt::Display for FilterReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disabled => write!(f, "orchestrator disabled"),
            Self::NoRulesSelected => write!(f, "no rule group selected"),
            Self::WrongKind(kind) => write!(f, "not a download event ({kind})"),
            Self::MissingData => write!(f, "event carries no data"),
            Self::MalformedPayload(err) => write!(f, "malformed payload: {err}"),
            Self::NotFromSubscription(source) => write!(f, "source {source:?} is not a subscription"),
            Self::MissingContext => write!(f, "no download context"),
            Self::MissingMediaInfo => write!(f, "no resolved media info"),
            Self::MissingIdentity => write!(f, "media info has no catalog id"),
            Self::Debounced(media) => write!(f, "{media} is already being processed"),
        }
    }
}

/// An accepted event: the request to run later, its registry claim and the
/// delay it was scheduled with.
#[derive(Debug)]
pub struct Admission {
    pub request: AcquisitionRequest,
    pub guard: ProcessingGuard,
    pub delay: Duration,
}

/// Reacts to subscription downloads by fetching the other configured
/// versions of the same item after a delay.
pub struct Orchestrator {
    settings: RwLock<Arc<OrchestratorSettings>>,
    registry: ProcessingRegistry,
    runner: Arc<AcquisitionRunner>,
    scheduler: Arc<dyn DelayScheduler>,
    subscription: Mutex<Option<(Arc<dyn EventSource>, SubscriptionId)>>,
}

impl Orchestrator {
    pub fn new(
        settings: OrchestratorSettings,
        registry: ProcessingRegistry,
        runner: Arc<AcquisitionRunner>,
        scheduler: Arc<dyn DelayScheduler>,
    ) -> Self {
        log_settings(&settings);
        Self {
            settings: RwLock::new(Arc::new(settings)),
            registry,
            runner,
            scheduler,
            subscription: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> Arc<OrchestratorSettings> {
        match self.settings.read() {
            Ok(settings) => settings.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Swap in a whole new configuration. Requests already scheduled keep
    /// the rule list they captured.
    pub fn reconfigure(&self, settings: OrchestratorSettings) -> Result<(), SettingsError> {
        settings.validate()?;
        log_settings(&settings);
        let settings = Arc::new(settings);
        match self.settings.write() {
            Ok(mut current) => *current = settings,
            Err(poisoned) => *poisoned.into_inner() = settings,
        }
        Ok(())
    }

    pub fn registry(&self) -> &ProcessingRegistry {
        &self.registry
    }

    /// Subscribe to `DownloadAdded` on `source`. Replaces any earlier subscription.
    pub fn start(self: &Arc<Self>, source: Arc<dyn EventSource>) {
        self.stop();
        let id = source.subscribe(EventKind::DownloadAdded, self.clone());
        let mut subscription = self
            .subscription
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *subscription = Some((source, id));
        info!(target: "orchestrator", "listening for subscription downloads");
    }

    /// Stop reacting to new events. Pending delayed runs are left alone.
    pub fn stop(&self) {
        let previous = self
            .subscription
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some((source, id)) = previous {
            source.unsubscribe(id);
            info!(target: "orchestrator", "orchestrator stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.subscription
            .lock()
            .map(|subscription| subscription.is_some())
            .unwrap_or(false)
    }

    /// Decide whether `event` qualifies and, if so, claim its media item.
    ///
    /// The registry claim is taken here, synchronously, before anything is
    /// scheduled.
    pub fn admit(&self, event: &HostEvent) -> Result<Admission, FilterReason> {
        let settings = self.settings();
        if !settings.enabled {
            return Err(FilterReason::Disabled);
        }

        let rule_groups = settings.enabled_rules();
        if rule_groups.is_empty() {
            return Err(FilterReason::NoRulesSelected);
        }

        if event.kind != EventKind::DownloadAdded {
            return Err(FilterReason::WrongKind(event.kind));
        }

        let payload: DownloadAddedPayload = match event.decode() {
            None => return Err(FilterReason::MissingData),
            Some(Err(err)) => return Err(FilterReason::MalformedPayload(err.to_string())),
            Some(Ok(payload)) => payload,
        };
        let origin_hash = payload.content_hash().map(str::to_string);

        let source = payload.source.unwrap_or_default();
        if !settings.is_subscription_source(&source) {
            return Err(FilterReason::NotFromSubscription(source));
        }

        let context = payload.context.ok_or(FilterReason::MissingContext)?;
        let media_info = context.media_info.ok_or(FilterReason::MissingMediaInfo)?;
        let media = media_info.identity().ok_or(FilterReason::MissingIdentity)?;
        let title = media_info.title_year();

        let guard = self
            .registry
            .try_begin_processing(&media, &title, settings.debounce_window())
            .ok_or_else(|| FilterReason::Debounced(media.clone()))?;

        let delay = settings.delay();
        let request = AcquisitionRequest {
            media,
            media_info,
            title,
            rule_groups,
            attribution: settings.attribution.clone(),
            scheduled_for: scheduled_for(delay),
            origin_hash,
        };

        Ok(Admission {
            request,
            guard,
            delay,
        })
    }

    /// Filter `event` and schedule an acquisition for it.
    ///
    /// Returns the scheduled request, or `None` when the event was filtered
    /// or could not be scheduled. Never fails towards the caller.
    pub fn on_event(&self, event: &HostEvent) -> Option<AcquisitionRequest> {
        let Admission {
            request,
            guard,
            delay,
        } = match self.admit(event) {
            Ok(admission) => admission,
            Err(reason) => {
                debug!(target: "orchestrator", %reason, "event ignored");
                return None;
            }
        };

        info!(
            target: "orchestrator",
            media = %request.media,
            title = %request.title,
            delay_secs = delay.as_secs_f64(),
            "subscription download detected, acquisition scheduled"
        );

        let task = AcquisitionTask {
            request: request.clone(),
            guard,
            runner: self.runner.clone(),
        };
        match self.scheduler.schedule(Box::new(task), delay) {
            Ok(task_id) => {
                debug!(target: "orchestrator", media = %request.media, %task_id, "task queued");
                Some(request)
            }
            Err(err) => {
                // The task, and with it the registry claim, is already dropped.
                error!(
                    target: "orchestrator",
                    media = %request.media,
                    error = %err,
                    "failed to schedule acquisition, claim released"
                );
                None
            }
        }
    }

    pub fn cancel(&self, task_id: TaskId) -> bool {
        self.scheduler.cancel(task_id)
    }

    pub fn pending(&self) -> usize {
        self.scheduler.pending()
    }
}

impl EventHandler for Orchestrator {
    fn handle(&self, event: &HostEvent) {
        self.on_event(event);
    }
}

fn scheduled_for(delay: Duration) -> DateTime<Utc> {
    let now = Utc::now();
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delay| now.checked_add_signed(delay))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn log_settings(settings: &OrchestratorSettings) {
    info!(
        target: "orchestrator",
        enabled = settings.enabled,
        "multi-version orchestrator configured"
    );
    if settings.enabled {
        info!(
            target: "orchestrator",
            delay_secs = settings.delay_seconds,
            debounce_secs = settings.debounce_seconds,
            rules = ?settings.enabled_rules(),
            "orchestrator settings"
        );
        if settings.enabled_rules().is_empty() {
            warn!(target: "orchestrator", "enabled without any rule group selected");
        }
    }
}

/// Delayed unit holding one request and its registry claim. The claim is
/// released when the task is dropped, whether it ran, was cancelled, or
/// never got scheduled.
struct AcquisitionTask {
    request: AcquisitionRequest,
    guard: ProcessingGuard,
    runner: Arc<AcquisitionRunner>,
}

impl DelayedTask for AcquisitionTask {
    fn label(&self) -> String {
        format!("acquisition {}", self.request.media)
    }

    fn run(self: Box<Self>) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            let AcquisitionTask {
                request,
                guard,
                runner,
            } = *self;
            runner.run_acquisition(&request).await;
            drop(guard);
        })
    }

    fn abandon(self: Box<Self>) {
        warn!(
            target: "orchestrator",
            media = %self.request.media,
            "pending acquisition abandoned"
        );
    }
}
