// SPDX-License-Identifier: GPL-3.0-or-later
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use multiversion_application::{DelayScheduler, DelayedTask, ScheduleError, TaskId};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

struct PendingTask {
    label: String,
    deadline: Instant,
    cancel: oneshot::Sender<()>,
}

#[derive(Default)]
struct SchedulerState {
    pending: HashMap<TaskId, PendingTask>,
    next_id: u64,
    closed: bool,
}

/// Delayed one-shot task queue on the tokio runtime.
///
/// Every task gets its own tokio task racing a monotonic deadline against a
/// cancel signal. Nothing is persisted: pending tasks die with the process.
#[derive(Clone)]
pub struct TokioDelayScheduler {
    state: Arc<Mutex<SchedulerState>>,
    runtime: Option<Handle>,
}

impl TokioDelayScheduler {
    /// Bind to the runtime of the caller if there is one; otherwise tasks are
    /// spawned on whatever runtime `schedule` is called from.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SchedulerState::default())),
            runtime: Handle::try_current().ok(),
        }
    }

    pub fn with_handle(handle: Handle) -> Self {
        Self {
            state: Arc::new(Mutex::new(SchedulerState::default())),
            runtime: Some(handle),
        }
    }

    fn state(&self) -> MutexGuard<'_, SchedulerState> {
        lock(&self.state)
    }

    /// Labels and remaining time of every task that has not fired yet.
    pub fn pending_tasks(&self) -> Vec<(TaskId, String, Duration)> {
        let now = Instant::now();
        let mut tasks: Vec<_> = self
            .state()
            .pending
            .iter()
            .map(|(id, task)| {
                (
                    *id,
                    task.label.clone(),
                    task.deadline.saturating_duration_since(now),
                )
            })
            .collect();
        tasks.sort_by_key(|(id, _, _)| *id);
        tasks
    }
}

impl Default for TokioDelayScheduler {
    fn default() -> Self {
        Self::new()
    }
}

fn lock(state: &Mutex<SchedulerState>) -> MutexGuard<'_, SchedulerState> {
    state.lock().unwrap_or_else(|poisoned| {
        warn!(target: "scheduler", "scheduler mutex poisoned, recovering");
        poisoned.into_inner()
    })
}

impl DelayScheduler for TokioDelayScheduler {
    fn schedule(
        &self,
        task: Box<dyn DelayedTask>,
        delay: Duration,
    ) -> Result<TaskId, ScheduleError> {
        let runtime = match self.runtime.clone().or_else(|| Handle::try_current().ok()) {
            Some(runtime) => runtime,
            None => return Err(ScheduleError::Rejected("no tokio runtime available".to_string())),
        };

        let label = task.label();
        let deadline = Instant::now() + delay;
        let (cancel_tx, cancel_rx) = oneshot::channel();

        let id = {
            let mut state = self.state();
            if state.closed {
                return Err(ScheduleError::ShuttingDown);
            }
            let id = TaskId(state.next_id);
            state.next_id += 1;
            state.pending.insert(
                id,
                PendingTask {
                    label: label.clone(),
                    deadline,
                    cancel: cancel_tx,
                },
            );
            id
        };

        debug!(target: "scheduler", task_id = %id, %label, delay_secs = delay.as_secs_f64(), "task scheduled");

        let shared = self.state.clone();
        runtime.spawn(async move {
            tokio::select! {
                _ = sleep_until(deadline) => {
                    // Whoever removes the entry first owns the task's fate.
                    let fire = lock(&shared).pending.remove(&id).is_some();
                    if fire {
                        info!(target: "scheduler", task_id = %id, %label, "task firing");
                        task.run().await;
                        debug!(target: "scheduler", task_id = %id, "task finished");
                    } else {
                        task.abandon();
                    }
                }
                _ = cancel_rx => {
                    debug!(target: "scheduler", task_id = %id, %label, "task cancelled");
                    task.abandon();
                }
            }
        });

        Ok(id)
    }

    fn cancel(&self, id: TaskId) -> bool {
        match self.state().pending.remove(&id) {
            Some(task) => {
                // The receiver may already be gone if the timer won the race.
                let _ = task.cancel.send(());
                true
            }
            None => false,
        }
    }

    fn pending(&self) -> usize {
        self.state().pending.len()
    }

    fn shutdown(&self) {
        let drained: Vec<(TaskId, PendingTask)> = {
            let mut state = self.state();
            state.closed = true;
            state.pending.drain().collect()
        };
        info!(target: "scheduler", abandoned = drained.len(), "scheduler shutting down");
        for (_, task) in drained {
            let _ = task.cancel.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::future::BoxFuture;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counters {
        ran: AtomicUsize,
        abandoned: AtomicUsize,
    }

    struct CountingTask {
        name: &'static str,
        counters: Arc<Counters>,
        order: Option<Arc<Mutex<Vec<&'static str>>>>,
    }

    impl DelayedTask for CountingTask {
        fn label(&self) -> String {
            self.name.to_string()
        }

        fn run(self: Box<Self>) -> BoxFuture<'static, ()> {
            Box::pin(async move {
                self.counters.ran.fetch_add(1, Ordering::SeqCst);
                if let Some(order) = &self.order {
                    order.lock().expect("order lock").push(self.name);
                }
            })
        }

        fn abandon(self: Box<Self>) {
            self.counters.abandoned.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn task(name: &'static str, counters: &Arc<Counters>) -> Box<dyn DelayedTask> {
        Box::new(CountingTask {
            name,
            counters: counters.clone(),
            order: None,
        })
    }

    async fn settle() {
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn task_fires_only_after_delay() {
        let scheduler = TokioDelayScheduler::new();
        let counters = Arc::new(Counters::default());

        scheduler
            .schedule(task("a", &counters), Duration::from_secs(5))
            .expect("schedule");
        assert_eq!(scheduler.pending(), 1);

        tokio::time::advance(Duration::from_secs(4)).await;
        settle().await;
        assert_eq!(counters.ran.load(Ordering::SeqCst), 0);

        tokio::time::advance(Duration::from_secs(2)).await;
        settle().await;
        assert_eq!(counters.ran.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_task_is_abandoned_not_run() {
        let scheduler = TokioDelayScheduler::new();
        let counters = Arc::new(Counters::default());

        let id = scheduler
            .schedule(task("a", &counters), Duration::from_secs(5))
            .expect("schedule");
        assert!(scheduler.cancel(id));
        assert!(!scheduler.cancel(id));

        tokio::time::sleep(Duration::from_secs(10)).await;
        settle().await;
        assert_eq!(counters.ran.load(Ordering::SeqCst), 0);
        assert_eq!(counters.abandoned.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_abandons_pending_and_refuses_new_work() {
        let scheduler = TokioDelayScheduler::new();
        let counters = Arc::new(Counters::default());

        scheduler
            .schedule(task("a", &counters), Duration::from_secs(5))
            .expect("schedule");
        scheduler
            .schedule(task("b", &counters), Duration::from_secs(50))
            .expect("schedule");
        scheduler.shutdown();
        settle().await;

        assert_eq!(counters.abandoned.load(Ordering::SeqCst), 2);
        assert!(matches!(
            scheduler.schedule(task("c", &counters), Duration::ZERO),
            Err(ScheduleError::ShuttingDown)
        ));
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(counters.ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn independent_tasks_fire_by_deadline() {
        let scheduler = TokioDelayScheduler::new();
        let counters = Arc::new(Counters::default());
        let order = Arc::new(Mutex::new(Vec::new()));

        for (name, secs) in [("slow", 30), ("fast", 1), ("mid", 10)] {
            scheduler
                .schedule(
                    Box::new(CountingTask {
                        name,
                        counters: counters.clone(),
                        order: Some(order.clone()),
                    }),
                    Duration::from_secs(secs),
                )
                .expect("schedule");
        }
        let labels: Vec<String> = scheduler
            .pending_tasks()
            .into_iter()
            .map(|(_, label, _)| label)
            .collect();
        assert_eq!(labels, vec!["slow", "fast", "mid"]);

        tokio::time::sleep(Duration::from_secs(31)).await;
        settle().await;
        assert_eq!(*order.lock().expect("order lock"), vec!["fast", "mid", "slow"]);
    }

    #[test]
    fn schedule_without_runtime_is_rejected() {
        let scheduler = TokioDelayScheduler::new();
        let counters = Arc::new(Counters::default());

        let result = scheduler.schedule(task("a", &counters), Duration::from_secs(1));
        assert!(matches!(result, Err(ScheduleError::Rejected(_))));
        assert_eq!(scheduler.pending(), 0);
    }
}
