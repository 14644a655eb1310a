//! Task and queue state machines.

use serde::{Deserialize, Serialize};

/// Task state inside a [`TaskQueue`](super::TaskQueue).
///
/// State transitions:
/// - Queued -> Active -> Succeeded
/// - Queued -> Active -> Retrying -> Active (until the retry limit)
/// - Queued -> Active -> Errored (retries exhausted or permanent failure)
///
/// A retrying task keeps its concurrency slot while it waits out the backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Added but not yet handed to the handler.
    Queued,

    /// Handler running.
    Active,

    /// Failed, waiting for the backoff delay before running again.
    Retrying,

    Succeeded,

    /// Failed permanently. Finishes the whole queue.
    Errored,
}

impl TaskState {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Succeeded | TaskState::Errored)
    }
}

/// Queue lifecycle: `Open -> Closed -> Finished`.
///
/// `Finished` is terminal. An errored task moves an open or closed queue
/// straight to `Finished`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueState {
    Open,
    Closed,
    Finished,
}

impl QueueState {
    pub fn accepts_tasks(self) -> bool {
        self == QueueState::Open
    }
}
