// SPDX-License-Identifier: GPL-3.0-or-later
use std::sync::Arc;

use multiversion_config::AppConfig;

pub mod events;
pub mod ingest;
pub mod orchestrator;
pub mod ports;
pub mod registry;
pub mod reporting;
pub mod runner;
pub mod scheduling;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use events::{EventHandler, EventPublisher, EventSource, InMemoryEventBus, SubscriptionId};
pub use ingest::{history_record, DownloadHistoryIngest};
pub use orchestrator::{Admission, FilterReason, Orchestrator};
pub use ports::{
    DownloadClientError, DownloadHistoryStore, DownloadService, HistoryError, SearchError,
    SearchService,
};
pub use registry::{ProcessingEntry, ProcessingGuard, ProcessingRegistry};
pub use reporting::{log_summary, RecentRuns, RunReporter};
pub use runner::{AcquisitionError, AcquisitionRunner, RuleDisposition, RuleResult};
pub use scheduling::{DelayScheduler, DelayedTask, ScheduleError, TaskId};

use tracing::info;

/// Shared handles for the HTTP layer.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub orchestrator: Arc<Orchestrator>,
    pub bus: InMemoryEventBus,
    pub runs: RecentRuns,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        orchestrator: Arc<Orchestrator>,
        bus: InMemoryEventBus,
        runs: RecentRuns,
    ) -> Self {
        Self {
            config,
            orchestrator,
            bus,
            runs,
        }
    }

    pub fn on_start(&self) {
        info!(target: "application", "application state initialized");
    }
}
