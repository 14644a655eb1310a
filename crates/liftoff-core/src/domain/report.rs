//! Deploy results.
//!
//! A [`DeployReport`] is created per deploy and threaded through every stage
//! that can succeed or fail per function. Nothing is counted in shared state.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::function::short_name;
use super::operation::{FunctionRequest, OperationKind, RpcCode};
use crate::error::DeployError;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationSuccess {
    pub target: String,
    pub kind: OperationKind,
    pub elapsed_ms: u64,

    /// URL of a created or updated HTTPS function.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationFailure {
    pub target: String,
    pub kind: OperationKind,

    /// `None` when the failure happened before the backend produced a code
    /// (rejected submission, unreachable status endpoint).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<RpcCode>,

    pub message: String,
}

impl OperationFailure {
    /// Failure of `request`. Operation errors keep their code; anything else
    /// (rejected submission, unreachable backend) has none.
    pub fn from_error(request: &FunctionRequest, err: &DeployError) -> Self {
        let (code, message) = match err {
            DeployError::Operation { code, message } => (Some(*code), message.clone()),
            other => (None, other.to_string()),
        };
        Self {
            target: request.target().to_string(),
            kind: request.kind(),
            code,
            message,
        }
    }
}

/// Per-operation outcomes of one polling run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollReport {
    pub succeeded: Vec<OperationSuccess>,
    pub failed: Vec<OperationFailure>,

    /// Too many operations to poll; their outcome is unknown.
    pub abandoned: bool,
}

/// Outcome of a functions deploy.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployReport {
    pub started_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,

    pub succeeded: Vec<OperationSuccess>,

    /// Failures of the last attempt. Functions that failed earlier and
    /// succeeded on a later attempt are listed under `succeeded` only.
    pub failed: Vec<OperationFailure>,
    pub abandoned: bool,

    /// Release attempts made, including automatic retries of failed functions.
    pub attempts: u32,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unmatched_filters: Vec<String>,
}

impl DeployReport {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            finished_at: None,
            succeeded: Vec::new(),
            failed: Vec::new(),
            abandoned: false,
            attempts: 0,
            unmatched_filters: Vec::new(),
        }
    }

    pub fn record_failure(&mut self, failure: OperationFailure) {
        self.failed.push(failure);
    }

    pub fn absorb(&mut self, poll: PollReport) {
        self.succeeded.extend(poll.succeeded);
        self.failed.extend(poll.failed);
        self.abandoned |= poll.abandoned;
    }

    pub fn succeeded_count(&self) -> usize {
        self.succeeded.len()
    }

    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    /// False when any function failed. An abandoned poll is not a failure.
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// Distinct ids of failed functions, in failure order.
    pub fn failed_targets(&self) -> Vec<&str> {
        let mut targets: Vec<&str> = Vec::new();
        for failure in &self.failed {
            let id = short_name(&failure.target);
            if !targets.contains(&id) {
                targets.push(id);
            }
        }
        targets
    }

    /// `--only` selector that redeploys just the failed functions.
    pub fn retry_hint(&self) -> Option<String> {
        let targets = self.failed_targets();
        if targets.is_empty() {
            return None;
        }
        let selector = targets
            .iter()
            .map(|id| format!("functions:{id}"))
            .collect::<Vec<_>>()
            .join(",");
        Some(format!("--only {selector}"))
    }
}
