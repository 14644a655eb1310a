//! Drives submitted function operations to a terminal state.

use std::sync::Arc;
use std::time::Duration;

use crate::domain::function::label;
use crate::domain::{
    FunctionRequest, Operation, OperationError, OperationFailure, OperationStatus, OperationSuccess,
    PollReport, RpcCode,
};
use crate::error::DeployError;
use crate::ports::FunctionsApi;

const QUOTA_HINT: &str = "You have exceeded your deployment quota, please deploy your functions in \
                          batches by using the --only flag, and wait a few minutes before deploying again.";

/// Polling thresholds and limits.
#[derive(Debug, Clone, PartialEq)]
pub struct PollerConfig {
    /// More operations than this are not polled at all.
    pub abandon_above: usize,

    pub slow_above: usize,
    pub slow_interval: Duration,
    pub medium_above: usize,
    pub medium_interval: Duration,
    pub fast_interval: Duration,

    /// Error codes that resubmit the request instead of failing.
    pub retryable_codes: Vec<RpcCode>,

    pub max_resubmits: u32,

    /// Consecutive status checks that may fail before giving up.
    pub max_check_failures: u32,

    /// Where to look when polling is abandoned.
    pub console_url: Option<String>,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            abandon_above: 90,
            slow_above: 40,
            slow_interval: Duration::from_secs(10),
            medium_above: 15,
            medium_interval: Duration::from_secs(5),
            fast_interval: Duration::from_secs(2),
            retryable_codes: RpcCode::RETRYABLE.to_vec(),
            max_resubmits: 5,
            max_check_failures: 5,
            console_url: None,
        }
    }
}

impl PollerConfig {
    /// Tick interval for `count` operations; `None` means do not poll.
    pub fn interval_for(&self, count: usize) -> Option<Duration> {
        if count > self.abandon_above {
            None
        } else if count > self.slow_above {
            Some(self.slow_interval)
        } else if count > self.medium_above {
            Some(self.medium_interval)
        } else {
            Some(self.fast_interval)
        }
    }

    fn is_retryable(&self, code: RpcCode) -> bool {
        self.retryable_codes.contains(&code)
    }
}

/// Send a function request to the backend.
pub async fn submit(
    api: &dyn FunctionsApi,
    request: &FunctionRequest,
    source_url: &str,
) -> Result<OperationStatus, DeployError> {
    match request {
        FunctionRequest::Create(function) => api.create_function(function, source_url).await,
        FunctionRequest::Update(function) => api.update_function(function, source_url).await,
        FunctionRequest::Delete { name } => api.delete_function(name).await,
    }
}

pub struct OperationPoller {
    api: Arc<dyn FunctionsApi>,
    config: PollerConfig,
    source_url: String,
}

impl OperationPoller {
    /// `source_url` is sent again when a request is resubmitted.
    pub fn new(api: Arc<dyn FunctionsApi>, config: PollerConfig, source_url: impl Into<String>) -> Self {
        Self {
            api,
            config,
            source_url: source_url.into(),
        }
    }

    /// Poll until every operation succeeded or failed for good.
    ///
    /// One operation failing never stops the others.
    pub async fn poll(&self, operations: Vec<Operation>) -> PollReport {
        let mut report = PollReport::default();
        if operations.is_empty() {
            return report;
        }

        let Some(interval) = self.config.interval_for(operations.len()) else {
            tracing::warn!(
                operations = operations.len(),
                console = self.config.console_url.as_deref().unwrap_or("the console"),
                "too many functions to track, check the console for deployment status"
            );
            report.abandoned = true;
            return report;
        };
        tracing::debug!(
            operations = operations.len(),
            interval_ms = interval.as_millis() as u64,
            "polling operations"
        );

        let mut pending = operations;
        while !pending.is_empty() {
            tokio::time::sleep(interval).await;
            let mut next = Vec::with_capacity(pending.len());
            for operation in pending {
                if let Some(operation) = self.check(operation, &mut report).await {
                    next.push(operation);
                }
            }
            pending = next;
        }
        report
    }

    /// One status check. Returns the operation if it is still in flight.
    async fn check(&self, mut operation: Operation, report: &mut PollReport) -> Option<Operation> {
        let status = match self.api.get_operation(&operation.status.name).await {
            Ok(status) => {
                operation.check_failures = 0;
                status
            }
            Err(err) => {
                operation.check_failures += 1;
                if operation.check_failures >= self.config.max_check_failures {
                    let err = DeployError::transport(format!("could not check operation status: {err}"));
                    self.fail(operation, &err, report);
                    return None;
                }
                tracing::debug!(
                    function = %label(operation.target()),
                    failures = operation.check_failures,
                    error = %err,
                    "status check failed, trying again next tick"
                );
                return Some(operation);
            }
        };

        if !status.done {
            operation.status = status;
            return Some(operation);
        }

        match status.error {
            None => {
                tracing::info!(
                    function = %label(operation.target()),
                    "successful {} operation",
                    operation.kind()
                );
                report.succeeded.push(OperationSuccess {
                    target: operation.target().to_string(),
                    kind: operation.kind(),
                    elapsed_ms: u64::try_from(operation.submitted_at.elapsed().as_millis()).unwrap_or(u64::MAX),
                    trigger_url: None,
                });
                None
            }
            Some(error)
                if self.config.is_retryable(error.code) && operation.resubmits < self.config.max_resubmits =>
            {
                self.resubmit(operation, error, report).await
            }
            Some(error) => {
                let err = DeployError::Operation {
                    code: error.code,
                    message: failure_message(&error),
                };
                self.fail(operation, &err, report);
                None
            }
        }
    }

    async fn resubmit(&self, mut operation: Operation, error: OperationError, report: &mut PollReport) -> Option<Operation> {
        operation.resubmits += 1;
        tracing::debug!(
            function = %label(operation.target()),
            code = %error.code,
            attempt = operation.resubmits,
            "retryable operation error, resubmitting"
        );
        match submit(self.api.as_ref(), &operation.request, &self.source_url).await {
            Ok(status) => {
                operation.status = status;
                Some(operation)
            }
            Err(err) => {
                let err = DeployError::Operation {
                    code: error.code,
                    message: format!("{}; resubmission failed: {err}", error.message),
                };
                self.fail(operation, &err, report);
                None
            }
        }
    }

    fn fail(&self, operation: Operation, err: &DeployError, report: &mut PollReport) {
        tracing::error!(
            function = %label(operation.target()),
            "failed to {} function: {err}",
            operation.kind()
        );
        report.failed.push(OperationFailure::from_error(&operation.request, err));
    }
}

fn failure_message(error: &OperationError) -> String {
    if error.code == RpcCode::ResourceExhausted {
        format!("{} {QUOTA_HINT}", error.message)
    } else {
        error.message.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DesiredFunction, OperationKind};
    use crate::impls::{InMemoryFunctionsApi, ScriptedOutcome};
    use rstest::rstest;
    use tokio::time::Instant;

    const SOURCE: &str = "gs://bucket/source.zip";

    async fn create_all(api: &InMemoryFunctionsApi, names: &[String]) -> Vec<Operation> {
        let mut operations = Vec::new();
        for name in names {
            let request = FunctionRequest::Create(DesiredFunction::new(name.as_str()));
            let status = submit(api, &request, SOURCE).await.unwrap();
            operations.push(Operation::new(request, status));
        }
        operations
    }

    fn function_names(count: usize) -> Vec<String> {
        (0..count).map(|i| format!("fn{i}")).collect()
    }

    fn poller(api: &Arc<InMemoryFunctionsApi>, config: PollerConfig) -> OperationPoller {
        OperationPoller::new(api.clone(), config, SOURCE)
    }

    #[rstest]
    #[case::few(5, Some(2_000))]
    #[case::fast_edge(15, Some(2_000))]
    #[case::medium_edge(16, Some(5_000))]
    #[case::medium(20, Some(5_000))]
    #[case::slow_edge(41, Some(10_000))]
    #[case::slow(60, Some(10_000))]
    #[case::abandon_edge(90, Some(10_000))]
    #[case::too_many(95, None)]
    fn interval_follows_operation_count(#[case] count: usize, #[case] expected_ms: Option<u64>) {
        let interval = PollerConfig::default().interval_for(count);
        assert_eq!(interval.map(|d| d.as_millis() as u64), expected_ms);
    }

    #[rstest]
    #[case::few(5, 2)]
    #[case::medium(20, 5)]
    #[case::slow(60, 10)]
    #[tokio::test(start_paused = true)]
    async fn operations_are_checked_at_the_selected_interval(#[case] count: usize, #[case] secs: u64) {
        let api = Arc::new(InMemoryFunctionsApi::new());
        let operations = create_all(&api, &function_names(count)).await;

        let started = Instant::now();
        let report = poller(&api, PollerConfig::default()).poll(operations).await;

        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(secs) && elapsed < Duration::from_secs(secs + 1));
        assert_eq!(report.succeeded.len(), count);
        assert!(!report.abandoned);
    }

    #[tokio::test(start_paused = true)]
    async fn too_many_operations_are_abandoned() {
        let api = Arc::new(InMemoryFunctionsApi::new());
        let operations = create_all(&api, &function_names(95)).await;

        let started = Instant::now();
        let report = poller(&api, PollerConfig::default()).poll(operations).await;

        assert!(report.abandoned);
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert_eq!(api.status_checks(), 0);
        assert!(report.succeeded.is_empty() && report.failed.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn retryable_errors_resubmit_the_request() {
        let api = Arc::new(InMemoryFunctionsApi::new());
        api.script("fn0", [ScriptedOutcome::fail(RpcCode::Unavailable), ScriptedOutcome::fail(RpcCode::Aborted)]);
        let operations = create_all(&api, &function_names(1)).await;

        let report = poller(&api, PollerConfig::default()).poll(operations).await;

        assert_eq!(report.succeeded.len(), 1);
        assert!(report.failed.is_empty());
        assert_eq!(api.submissions().len(), 3);
        assert_eq!(api.functions().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn resubmissions_are_capped() {
        let api = Arc::new(InMemoryFunctionsApi::new());
        api.script("fn0", std::iter::repeat_n(ScriptedOutcome::fail(RpcCode::Unavailable), 10));
        let operations = create_all(&api, &function_names(1)).await;
        let config = PollerConfig {
            max_resubmits: 2,
            ..PollerConfig::default()
        };

        let report = poller(&api, config).poll(operations).await;

        assert_eq!(api.submissions().len(), 3);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].code, Some(RpcCode::Unavailable));
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_errors_fail_only_their_function() {
        let api = Arc::new(InMemoryFunctionsApi::new());
        api.script("fn1", [ScriptedOutcome::fail(RpcCode::InvalidArgument)]);
        api.script("fn2", [ScriptedOutcome::fail(RpcCode::ResourceExhausted)]);
        let operations = create_all(&api, &function_names(4)).await;

        let report = poller(&api, PollerConfig::default()).poll(operations).await;

        assert_eq!(report.succeeded.len(), 2);
        assert_eq!(report.failed.len(), 2);
        let quota = report.failed.iter().find(|f| f.target == "fn2").unwrap();
        assert!(quota.message.contains("--only"));
        let invalid = report.failed.iter().find(|f| f.target == "fn1").unwrap();
        assert_eq!(invalid.kind, OperationKind::Create);
        assert!(!invalid.message.contains("--only"));
        assert_eq!(api.submissions().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn status_check_failures_are_tolerated_then_fatal() {
        let api = Arc::new(InMemoryFunctionsApi::new());
        let operations = create_all(&api, &function_names(1)).await;
        api.fail_checks(2);
        let report = poller(&api, PollerConfig::default()).poll(operations).await;
        assert_eq!(report.succeeded.len(), 1);

        let api = Arc::new(InMemoryFunctionsApi::new());
        let operations = create_all(&api, &function_names(1)).await;
        api.fail_checks(10);
        let config = PollerConfig {
            max_check_failures: 3,
            ..PollerConfig::default()
        };
        let report = poller(&api, config).poll(operations).await;
        assert_eq!(api.status_checks(), 3);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].code, None);
        assert!(report.failed[0].message.contains("could not check operation status"));
    }

    #[tokio::test(start_paused = true)]
    async fn pending_operations_keep_polling() {
        let api = Arc::new(InMemoryFunctionsApi::new().checks_until_done(3));
        let operations = create_all(&api, &function_names(2)).await;

        let started = Instant::now();
        let report = poller(&api, PollerConfig::default()).poll(operations).await;

        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(6) && elapsed < Duration::from_secs(7));
        assert_eq!(report.succeeded.len(), 2);
        assert_eq!(api.status_checks(), 6);
    }
}
