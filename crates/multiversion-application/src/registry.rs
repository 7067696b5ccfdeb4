// SPDX-License-Identifier: GPL-3.0-or-later
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use multiversion_domain::MediaIdentity;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, warn};

struct Entry {
    generation: u64,
    started: Instant,
    triggered_at: DateTime<Utc>,
    title: String,
}

#[derive(Default)]
struct RegistryState {
    entries: HashMap<MediaIdentity, Entry>,
    next_generation: u64,
}

/// Tracks which media items have a scheduled or running acquisition.
///
/// Every check-and-insert and every removal happens under one lock, so two
/// events for the same item can never both pass the debounce check.
#[derive(Clone, Default)]
pub struct ProcessingRegistry {
    inner: Arc<Mutex<RegistryState>>,
}

/// Point-in-time view of one registry entry.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessingEntry {
    pub media: MediaIdentity,
    pub title: String,
    pub triggered_at: DateTime<Utc>,
    pub age_seconds: f64,
}

impl ProcessingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, RegistryState> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            warn!(target: "registry", "processing registry mutex poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Claim `media` unless it was claimed less than `window` ago.
    ///
    /// The returned guard releases the claim when dropped.
    pub fn try_begin_processing(
        &self,
        media: &MediaIdentity,
        title: &str,
        window: Duration,
    ) -> Option<ProcessingGuard> {
        let now = Instant::now();
        let mut state = self.state();

        if let Some(entry) = state.entries.get(media) {
            if now.saturating_duration_since(entry.started) < window {
                return None;
            }
            debug!(target: "registry", %media, "previous claim outlived debounce window, replacing");
        }

        state.next_generation += 1;
        let generation = state.next_generation;
        state.entries.insert(
            media.clone(),
            Entry {
                generation,
                started: now,
                triggered_at: Utc::now(),
                title: title.to_string(),
            },
        );

        Some(ProcessingGuard {
            registry: self.clone(),
            media: media.clone(),
            generation,
        })
    }

    fn end_processing(&self, media: &MediaIdentity, generation: u64) {
        let mut state = self.state();
        // A newer claim for the same media must survive an older guard.
        if state
            .entries
            .get(media)
            .is_some_and(|entry| entry.generation == generation)
        {
            state.entries.remove(media);
            debug!(target: "registry", %media, "processing claim released");
        }
    }

    pub fn is_processing(&self, media: &MediaIdentity) -> bool {
        self.state().entries.contains_key(media)
    }

    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<ProcessingEntry> {
        let now = Instant::now();
        let state = self.state();
        let mut entries: Vec<ProcessingEntry> = state
            .entries
            .iter()
            .map(|(media, entry)| ProcessingEntry {
                media: media.clone(),
                title: entry.title.clone(),
                triggered_at: entry.triggered_at,
                age_seconds: now.saturating_duration_since(entry.started).as_secs_f64(),
            })
            .collect();
        entries.sort_by(|a, b| a.triggered_at.cmp(&b.triggered_at));
        entries
    }
}

/// Claim on one media item for the lifetime of a single acquisition run.
pub struct ProcessingGuard {
    registry: ProcessingRegistry,
    media: MediaIdentity,
    generation: u64,
}

impl ProcessingGuard {
    pub fn media(&self) -> &MediaIdentity {
        &self.media
    }
}

impl std::fmt::Debug for ProcessingGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessingGuard")
            .field("media", &self.media)
            .field("generation", &self.generation)
            .finish()
    }
}

impl Drop for ProcessingGuard {
    fn drop(&mut self) {
        self.registry.end_processing(&self.media, self.generation);
    }
}
