// SPDX-License-Identifier: GPL-3.0-or-later
//! In-memory collaborators for tests in this and downstream crates.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use multiversion_domain::{
    AcquisitionRequest, Attribution, Candidate, DownloadAddedPayload, DownloadContext,
    DownloadOrder, DownloadRecord, HostEvent, MediaIdentity, MediaInfo, MediaType,
};

use crate::ports::{
    DownloadClientError, DownloadHistoryStore, DownloadService, HistoryError, SearchError,
    SearchService,
};
use crate::scheduling::{DelayScheduler, DelayedTask, ScheduleError, TaskId};

pub fn arrival() -> MediaInfo {
    MediaInfo {
        tmdb_id: Some(100),
        douban_id: None,
        title: "Arrival".to_string(),
        year: Some(2016),
        media_type: MediaType::Movie,
    }
}

pub fn movie_request(rules: &[&str]) -> AcquisitionRequest {
    let info = arrival();
    AcquisitionRequest {
        media: MediaIdentity::tmdb(100),
        title: info.title_year(),
        media_info: info,
        rule_groups: rules.iter().map(|r| r.to_string()).collect(),
        attribution: Attribution::default(),
        scheduled_for: Utc::now(),
        origin_hash: None,
    }
}

/// A `DownloadAdded` notification as the host emits it for `source`.
pub fn download_added(source: &str, media: MediaInfo) -> HostEvent {
    HostEvent::download_added(&DownloadAddedPayload {
        source: Some(source.to_string()),
        username: None,
        hash: None,
        context: Some(DownloadContext {
            media_info: Some(media),
            torrent_info: None,
        }),
    })
}

enum Scripted {
    Results(Vec<Candidate>),
    Failure(String),
    Panic,
}

#[derive(Default)]
pub struct FakeSearchService {
    script: HashMap<String, Scripted>,
    calls: Mutex<Vec<(MediaIdentity, Vec<String>)>>,
}

impl FakeSearchService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_results(mut self, rule: &str, results: Vec<Candidate>) -> Self {
        self.script.insert(rule.to_string(), Scripted::Results(results));
        self
    }

    pub fn with_failure(mut self, rule: &str, message: &str) -> Self {
        self.script
            .insert(rule.to_string(), Scripted::Failure(message.to_string()));
        self
    }

    pub fn panicking_on(mut self, rule: &str) -> Self {
        self.script.insert(rule.to_string(), Scripted::Panic);
        self
    }

    pub fn calls(&self) -> Vec<(MediaIdentity, Vec<String>)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl SearchService for FakeSearchService {
    async fn process(
        &self,
        media: &MediaInfo,
        rule_groups: &[String],
    ) -> Result<Vec<Candidate>, SearchError> {
        if let (Ok(mut calls), Some(identity)) = (self.calls.lock(), media.identity()) {
            calls.push((identity, rule_groups.to_vec()));
        }

        let rule = rule_groups.first().map(String::as_str).unwrap_or_default();
        match self.script.get(rule) {
            Some(Scripted::Results(results)) => Ok(results.clone()),
            Some(Scripted::Failure(message)) => Err(SearchError::Request(message.clone())),
            Some(Scripted::Panic) => panic!("search exploded for {rule}"),
            None => Ok(Vec::new()),
        }
    }
}

#[derive(Default)]
pub struct FakeDownloadService {
    refuse: HashSet<String>,
    fail: HashSet<String>,
    orders: Mutex<Vec<DownloadOrder>>,
    counter: AtomicU64,
}

impl FakeDownloadService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Soft-refuse candidates with this title.
    pub fn refusing(mut self, title: &str) -> Self {
        self.refuse.insert(title.to_string());
        self
    }

    /// Hard-fail candidates with this title.
    pub fn failing_for(mut self, title: &str) -> Self {
        self.fail.insert(title.to_string());
        self
    }

    pub fn orders(&self) -> Vec<DownloadOrder> {
        self.orders.lock().map(|o| o.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl DownloadService for FakeDownloadService {
    async fn download_single(
        &self,
        order: &DownloadOrder,
    ) -> Result<Option<String>, DownloadClientError> {
        if let Ok(mut orders) = self.orders.lock() {
            orders.push(order.clone());
        }
        let title = &order.candidate.title;
        if self.fail.contains(title) {
            return Err(DownloadClientError::Request(format!("cannot add {title}")));
        }
        if self.refuse.contains(title) {
            return Ok(None);
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Some(format!("dl-{n}")))
    }
}

#[derive(Default)]
pub struct InMemoryDownloadHistory {
    records: Mutex<HashMap<String, DownloadRecord>>,
    unavailable: AtomicBool,
}

impl InMemoryDownloadHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hash(self, hash: &str) -> Self {
        if let Ok(mut records) = self.records.lock() {
            records.insert(
                hash.to_string(),
                DownloadRecord {
                    hash: hash.to_string(),
                    title: "previous download".to_string(),
                    media: MediaIdentity::tmdb(100),
                    rule_group: None,
                    source: "Subscribe".to_string(),
                    username: "admin".to_string(),
                    download_id: format!("prior-{hash}"),
                    created_at: Utc::now(),
                },
            );
        }
        self
    }

    pub fn unavailable(self) -> Self {
        self.unavailable.store(true, Ordering::SeqCst);
        self
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DownloadHistoryStore for InMemoryDownloadHistory {
    async fn get_by_hash(&self, hash: &str) -> Result<Option<DownloadRecord>, HistoryError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(HistoryError::Storage("history offline".to_string()));
        }
        Ok(self
            .records
            .lock()
            .ok()
            .and_then(|records| records.get(hash).cloned()))
    }

    async fn record(&self, record: DownloadRecord) -> Result<(), HistoryError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(HistoryError::Storage("history offline".to_string()));
        }
        if let Ok(mut records) = self.records.lock() {
            records.insert(record.hash.clone(), record);
        }
        Ok(())
    }
}

/// Scheduler that only holds tasks; tests decide when they fire.
#[derive(Default)]
pub struct ManualScheduler {
    tasks: Mutex<Vec<(TaskId, Duration, Box<dyn DelayedTask>)>>,
    next_id: AtomicU64,
    reject: AtomicBool,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `schedule` call fail.
    pub fn rejecting() -> Self {
        let scheduler = Self::default();
        scheduler.reject.store(true, Ordering::SeqCst);
        scheduler
    }

    pub fn delays(&self) -> Vec<Duration> {
        self.tasks
            .lock()
            .map(|tasks| tasks.iter().map(|(_, delay, _)| *delay).collect())
            .unwrap_or_default()
    }

    /// Run every held task to completion, in scheduling order.
    pub async fn fire_all(&self) {
        let tasks = match self.tasks.lock() {
            Ok(mut tasks) => std::mem::take(&mut *tasks),
            Err(_) => return,
        };
        for (_, _, task) in tasks {
            task.run().await;
        }
    }
}

impl DelayScheduler for ManualScheduler {
    fn schedule(
        &self,
        task: Box<dyn DelayedTask>,
        delay: Duration,
    ) -> Result<TaskId, ScheduleError> {
        if self.reject.load(Ordering::SeqCst) {
            return Err(ScheduleError::Rejected(task.label()));
        }
        let id = TaskId(self.next_id.fetch_add(1, Ordering::SeqCst));
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.push((id, delay, task));
        }
        Ok(id)
    }

    fn cancel(&self, id: TaskId) -> bool {
        let Ok(mut tasks) = self.tasks.lock() else {
            return false;
        };
        match tasks.iter().position(|(task_id, _, _)| *task_id == id) {
            Some(index) => {
                let (_, _, task) = tasks.remove(index);
                task.abandon();
                true
            }
            None => false,
        }
    }

    fn pending(&self) -> usize {
        self.tasks.lock().map(|tasks| tasks.len()).unwrap_or_default()
    }

    fn shutdown(&self) {
        let tasks = match self.tasks.lock() {
            Ok(mut tasks) => std::mem::take(&mut *tasks),
            Err(_) => return,
        };
        for (_, _, task) in tasks {
            task.abandon();
        }
    }
}
