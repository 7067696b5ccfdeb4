// SPDX-License-Identifier: GPL-3.0-or-later
use std::fmt;
use std::time::Duration;

use futures_util::future::BoxFuture;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("scheduler is shutting down")]
    ShuttingDown,
    #[error("scheduler rejected task: {0}")]
    Rejected(String),
}

/// One-shot unit of work owned by the scheduler until it fires or is dropped.
pub trait DelayedTask: Send + 'static {
    fn label(&self) -> String;

    /// Consume the task once its delay has elapsed.
    fn run(self: Box<Self>) -> BoxFuture<'static, ()>;

    /// Consume the task without running it (cancelled or scheduler stopped).
    fn abandon(self: Box<Self>);
}

/// Fires tasks after a delay on an execution context other than the caller's.
///
/// `schedule` must not block. A task that cannot be scheduled is dropped
/// before the error is returned; it is never retried.
pub trait DelayScheduler: Send + Sync {
    fn schedule(&self, task: Box<dyn DelayedTask>, delay: Duration)
        -> Result<TaskId, ScheduleError>;

    /// Cancel a task that has not fired yet. Returns false if it already fired.
    fn cancel(&self, id: TaskId) -> bool;

    fn pending(&self) -> usize;

    /// Refuse new tasks and abandon every pending one.
    fn shutdown(&self);
}
