//! Task record: payload + bookkeeping.

use std::time::{Duration, Instant};

use serde::Serialize;

use super::TaskState;

/// Per-task bookkeeping kept by the queue.
///
/// The payload is taken out when the task is dispatched; the running future
/// owns it from then on and clones it for each attempt.
#[derive(Debug)]
pub struct TaskRecord<T> {
    pub task: Option<T>,
    pub state: TaskState,

    /// Number of times the handler has been invoked for this task.
    pub attempts: u32,

    pub last_error: Option<String>,

    pub created_at: Instant,
    pub updated_at: Instant,
}

/// Read-only view of a [`TaskRecord`], without the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskSnapshot {
    /// Position in submission order.
    pub index: usize,
    pub state: TaskState,
    pub attempts: u32,
    pub last_error: Option<String>,

    /// Time from `add` to the last state change.
    #[serde(serialize_with = "serialize_millis")]
    pub age: Duration,
}

fn serialize_millis<S: serde::Serializer>(age: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(u64::try_from(age.as_millis()).unwrap_or(u64::MAX))
}

impl<T> TaskRecord<T> {
    pub fn new(task: T) -> Self {
        let now = Instant::now();
        Self {
            task: Some(task),
            state: TaskState::Queued,
            attempts: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Hand the payload to a runner.
    pub fn dispatch(&mut self) -> Option<T> {
        self.state = TaskState::Active;
        self.updated_at = Instant::now();
        self.task.take()
    }

    pub fn start_attempt(&mut self) {
        self.state = TaskState::Active;
        self.attempts += 1;
        self.updated_at = Instant::now();
    }

    pub fn mark_succeeded(&mut self) {
        self.state = TaskState::Succeeded;
        self.updated_at = Instant::now();
    }

    pub fn schedule_retry(&mut self, error: String) {
        self.state = TaskState::Retrying;
        self.last_error = Some(error);
        self.updated_at = Instant::now();
    }

    pub fn mark_errored(&mut self, error: String) {
        self.state = TaskState::Errored;
        self.last_error = Some(error);
        self.updated_at = Instant::now();
    }

    pub fn snapshot(&self, index: usize) -> TaskSnapshot {
        TaskSnapshot {
            index,
            state: self.state,
            attempts: self.attempts,
            last_error: self.last_error.clone(),
            age: self.updated_at.duration_since(self.created_at),
        }
    }
}
