//! Queue module: bounded-concurrency task runner with retry and backoff.
//!
//! Both deploy pipelines are built from [`TaskQueue`]s: the hosting uploader
//! chains three of them, and every stage relies on the same contract:
//! - `add` schedules immediately, `close` declares the end of input
//! - at most `concurrency` handlers run at once
//! - a failed task is retried with exponential backoff, and a task that runs
//!   out of retries finishes the whole queue with an error

mod record;
mod retry;
mod state;
mod stats;
mod task_queue;

pub use record::{TaskRecord, TaskSnapshot};
pub use retry::RetryPolicy;
pub use state::{QueueState, TaskState};
pub use stats::QueueStats;
pub use task_queue::TaskQueue;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::DeployError;

/// Handles one task. Invoked again with a clone of the task on retry.
#[async_trait]
pub trait TaskHandler<T: Send + 'static>: Send + Sync {
    async fn handle(&self, task: T) -> Result<(), DeployError>;
}

/// Adapts an async closure into a [`TaskHandler`].
pub struct FnHandler<F>(F);

pub fn handler_fn<F>(f: F) -> FnHandler<F> {
    FnHandler(f)
}

#[async_trait]
impl<T, F, Fut> TaskHandler<T> for FnHandler<F>
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), DeployError>> + Send,
{
    async fn handle(&self, task: T) -> Result<(), DeployError> {
        (self.0)(task).await
    }
}

/// Queue settings.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Used in log lines and errors.
    pub name: String,

    /// Maximum number of tasks holding a slot at once. Clamped to at least 1.
    pub concurrency: usize,

    /// Extra attempts allowed per task after the first failure.
    pub retries: u32,

    pub retry_policy: RetryPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: "queue".to_string(),
            concurrency: 200,
            retries: 0,
            retry_policy: RetryPolicy::default(),
        }
    }
}

impl QueueConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn backoff(mut self, base_delay: Duration) -> Self {
        self.retry_policy.base_delay = base_delay;
        self
    }
}
