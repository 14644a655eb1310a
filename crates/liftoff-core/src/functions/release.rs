//! Functions release: list, plan, submit, poll, report.
//!
//! A release can run more than once: when some functions fail, the failed
//! subset is released again (up to `max_release_attempts`) unless every
//! function failed or the backend reported an exhausted quota.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::mem;
use std::sync::Arc;

use tokio::task::JoinSet;

use super::filter::FilterGroup;
use super::poller::{OperationPoller, PollerConfig, submit};
use super::reconciler::{DEPLOYMENT_TOOL_LABEL, Ownership, TOOL_NAME, plan};
use crate::domain::function::{label, short_name};
use crate::domain::{
    DeployReport, DesiredFunction, FunctionRequest, IamPolicy, Operation, OperationFailure, OperationKind,
    PollReport, RpcCode,
};
use crate::error::DeployError;
use crate::ports::{Clock, FunctionsApi};

/// Settings for one functions release.
#[derive(Debug, Clone)]
pub struct ReleaseConfig {
    pub project: String,

    /// Archive the functions are deployed from; also decides ownership.
    pub source_url: String,

    /// Older archive locations whose functions this tool still owns.
    pub legacy_source_urls: Vec<String>,

    /// Value of the `deployment-tool` label; `None` disables labelling.
    pub tool_label: Option<String>,

    /// Total release attempts. `1` disables automatic retries.
    pub max_release_attempts: u32,

    pub poller: PollerConfig,
}

impl ReleaseConfig {
    pub fn new(project: impl Into<String>, source_url: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            source_url: source_url.into(),
            legacy_source_urls: Vec::new(),
            tool_label: Some(TOOL_NAME.to_string()),
            max_release_attempts: 1,
            poller: PollerConfig::default(),
        }
    }

    fn ownership(&self) -> Ownership {
        let mut ownership = Ownership::new(self.source_url.clone()).tool_label(self.tool_label.clone());
        ownership.legacy_source_urls = self.legacy_source_urls.clone();
        ownership
    }
}

/// What one pass over the plan did.
#[derive(Debug, Default)]
struct Attempt {
    outcome: PollReport,
    requested: usize,
    unmatched_filters: Vec<String>,

    /// A submission was throttled (HTTP 429) or an operation ran out of quota.
    quota_exceeded: bool,
}

pub struct FunctionRelease {
    api: Arc<dyn FunctionsApi>,
    clock: Arc<dyn Clock>,
    config: ReleaseConfig,
}

impl FunctionRelease {
    pub fn new(api: Arc<dyn FunctionsApi>, clock: Arc<dyn Clock>, config: ReleaseConfig) -> Self {
        Self { api, clock, config }
    }

    /// Bring the backend in line with `desired`.
    ///
    /// Per-function failures end up in the report; only failing to list the
    /// existing functions is an error.
    pub async fn run(&self, desired: Vec<DesiredFunction>, filters: &[FilterGroup]) -> Result<DeployReport, DeployError> {
        let mut report = DeployReport::new(self.clock.now());
        let desired: Vec<DesiredFunction> = desired.into_iter().map(|function| self.labelled(function)).collect();
        let max_attempts = self.config.max_release_attempts.max(1);

        let mut filters = filters.to_vec();
        loop {
            let attempt = self.release(&desired, &filters).await?;
            report.attempts += 1;
            if report.attempts == 1 {
                report.unmatched_filters = attempt.unmatched_filters;
            }
            let all_failed = attempt.outcome.failed.len() == attempt.requested;
            report.failed.clear();
            report.absorb(attempt.outcome);

            if report.failed.is_empty() || report.attempts >= max_attempts {
                break;
            }
            if all_failed || attempt.quota_exceeded {
                tracing::info!(
                    all_failed,
                    quota_exceeded = attempt.quota_exceeded,
                    "not retrying failed functions"
                );
                break;
            }

            let failed = report.failed_targets();
            tracing::info!(
                attempt = report.attempts + 1,
                of = max_attempts,
                functions = ?failed,
                "trying to deploy failed functions again"
            );
            filters = failed.iter().map(|id| FilterGroup::new(id.split('-'))).collect();
        }

        report.finished_at = Some(self.clock.now());
        if let Some(hint) = report.retry_hint() {
            tracing::warn!(
                failed = report.failed_count(),
                succeeded = report.succeeded_count(),
                "functions deploy had errors, to retry run: deploy {hint}"
            );
        } else {
            tracing::info!(succeeded = report.succeeded_count(), "functions deploy complete");
        }
        Ok(report)
    }

    /// One pass: plan against the current backend state, submit, poll.
    async fn release(&self, desired: &[DesiredFunction], filters: &[FilterGroup]) -> Result<Attempt, DeployError> {
        let existing = self.api.list_functions().await?;
        let mut desired: BTreeMap<String, DesiredFunction> = desired
            .iter()
            .map(|function| (function.name.clone(), function.clone()))
            .collect();
        let uploaded: Vec<&str> = desired.keys().map(String::as_str).collect();

        let release = plan(&uploaded, &existing, filters, &self.config.ownership());
        tracing::debug!(
            release = ?release.release_names,
            "functions selected for release"
        );
        let mut attempt = Attempt {
            unmatched_filters: release.unmatched_filters,
            ..Attempt::default()
        };

        let mut requests = Vec::with_capacity(release.diff.len());
        for name in &release.diff.create {
            if let Some(function) = desired.remove(name) {
                requests.push(FunctionRequest::Create(function));
            }
        }
        for name in &release.diff.update {
            if let Some(function) = desired.remove(name) {
                requests.push(FunctionRequest::Update(function));
            }
        }
        for name in release.diff.delete {
            requests.push(FunctionRequest::Delete { name });
        }

        if requests.is_empty() {
            tracing::info!("no functions to deploy");
        }
        let mut https = BTreeSet::new();
        let mut public = BTreeSet::new();
        for request in &requests {
            if let FunctionRequest::Create(function) | FunctionRequest::Update(function) = request {
                if function.is_https() {
                    https.insert(function.name.clone());
                    if request.kind() == OperationKind::Create {
                        public.insert(function.name.clone());
                    }
                }
            }
            let verb = match request.kind() {
                OperationKind::Create => "creating",
                OperationKind::Update => "updating",
                OperationKind::Delete => "deleting",
            };
            tracing::info!("{verb} function {}", label(request.target()));
        }
        attempt.requested = requests.len();

        let operations = self.submit_all(requests, &mut attempt).await?;
        if !operations.is_empty() {
            let poller = OperationPoller::new(
                Arc::clone(&self.api),
                self.config.poller.clone(),
                self.config.source_url.clone(),
            );
            let polled = poller.poll(operations).await;
            attempt.outcome.succeeded.extend(polled.succeeded);
            attempt.outcome.failed.extend(polled.failed);
            attempt.outcome.abandoned |= polled.abandoned;
        }
        attempt.quota_exceeded |= attempt
            .outcome
            .failed
            .iter()
            .any(|failure| failure.code == Some(RpcCode::ResourceExhausted));

        self.grant_public_access(&mut attempt.outcome, &public).await;
        self.fetch_trigger_urls(&mut attempt.outcome, &https).await;
        Ok(attempt)
    }

    fn labelled(&self, mut function: DesiredFunction) -> DesiredFunction {
        if let Some(tool) = &self.config.tool_label {
            function
                .labels
                .insert(DEPLOYMENT_TOOL_LABEL.to_string(), tool.clone());
        }
        function
    }

    /// Submit every request concurrently. Rejected submissions are recorded
    /// as failures right away.
    async fn submit_all(
        &self,
        requests: Vec<FunctionRequest>,
        attempt: &mut Attempt,
    ) -> Result<Vec<Operation>, DeployError> {
        let mut submissions = JoinSet::new();
        for request in requests {
            let api = Arc::clone(&self.api);
            let source_url = self.config.source_url.clone();
            submissions.spawn(async move {
                let submitted = submit(api.as_ref(), &request, &source_url).await;
                (request, submitted)
            });
        }

        let mut operations = Vec::new();
        while let Some(joined) = submissions.join_next().await {
            let (request, submitted) =
                joined.map_err(|err| DeployError::transport(format!("submission task failed: {err}")))?;
            match submitted {
                Ok(status) => operations.push(Operation::new(request, status)),
                Err(err) => {
                    tracing::error!(
                        function = %label(request.target()),
                        "failed to {} function: {err}",
                        request.kind()
                    );
                    if matches!(err, DeployError::HttpStatus { status: 429, .. }) {
                        attempt.quota_exceeded = true;
                    }
                    attempt
                        .outcome
                        .failed
                        .push(OperationFailure::from_error(&request, &err));
                }
            }
        }
        Ok(operations)
    }

    /// Let anyone invoke newly created HTTPS functions. A function whose
    /// policy cannot be set counts as failed.
    async fn grant_public_access(&self, outcome: &mut PollReport, created: &BTreeSet<String>) {
        if created.is_empty() {
            return;
        }
        let policy = IamPolicy::public_invoker();
        for success in mem::take(&mut outcome.succeeded) {
            if !created.contains(&success.target) {
                outcome.succeeded.push(success);
                continue;
            }
            tracing::debug!(function = %label(&success.target), "setting public invoker policy");
            match self.api.set_iam_policy(&success.target, &policy).await {
                Ok(()) => outcome.succeeded.push(success),
                Err(err) => {
                    tracing::error!(
                        function = %label(&success.target),
                        "failed to set invoker policy: {err}"
                    );
                    outcome.failed.push(OperationFailure {
                        target: success.target,
                        kind: success.kind,
                        code: None,
                        message: format!("failed to set invoker policy: {err}"),
                    });
                }
            }
        }
    }

    /// Attach trigger URLs to created or updated HTTPS functions and log them.
    async fn fetch_trigger_urls(&self, outcome: &mut PollReport, https: &BTreeSet<String>) {
        let wanted = outcome
            .succeeded
            .iter()
            .any(|success| success.kind != OperationKind::Delete && https.contains(&success.target));
        if !wanted {
            return;
        }
        let functions = match self.api.list_functions().await {
            Ok(functions) => functions,
            Err(err) => {
                tracing::warn!(error = %err, "could not fetch function URLs");
                return;
            }
        };
        let urls: HashMap<String, String> = functions
            .into_iter()
            .filter(|function| function.source_archive_url.as_deref() == Some(self.config.source_url.as_str()))
            .filter_map(|function| {
                let url = function.trigger_url()?.to_string();
                Some((function.name, url))
            })
            .collect();

        for success in &mut outcome.succeeded {
            if success.kind == OperationKind::Delete {
                continue;
            }
            if let Some(url) = urls.get(&success.target) {
                tracing::info!("Function URL ({}): {url}", short_name(&success.target));
                success.trigger_url = Some(url.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ExistingFunction;
    use crate::impls::{InMemoryFunctionsApi, ScriptedOutcome};
    use crate::ports::FixedClock;
    use chrono::{TimeZone, Utc};

    const SOURCE: &str = "gs://liftoff-uploads/demo/source.zip";

    fn release(api: &Arc<InMemoryFunctionsApi>) -> FunctionRelease {
        release_with(api, ReleaseConfig::new("demo", SOURCE))
    }

    fn release_with(api: &Arc<InMemoryFunctionsApi>, config: ReleaseConfig) -> FunctionRelease {
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap());
        FunctionRelease::new(api.clone(), Arc::new(clock), config)
    }

    fn retrying(attempts: u32) -> ReleaseConfig {
        ReleaseConfig {
            max_release_attempts: attempts,
            ..ReleaseConfig::new("demo", SOURCE)
        }
    }

    fn https(name: &str) -> DesiredFunction {
        DesiredFunction::new(format!("projects/demo/locations/us-central1/functions/{name}"))
            .with_spec("httpsTrigger", serde_json::json!({}))
    }

    fn desired(names: &[&str]) -> Vec<DesiredFunction> {
        names.iter().map(|name| DesiredFunction::new(*name)).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn deploy_creates_updates_and_spares_foreign_functions() {
        let api = Arc::new(
            InMemoryFunctionsApi::new()
                .with_function(ExistingFunction::new("fnB").with_source(SOURCE))
                .with_function(ExistingFunction::new("fnC").with_source("gs://elsewhere/source.zip")),
        );

        let report = release(&api).run(desired(&["fnA", "fnB"]), &[]).await.unwrap();

        assert!(report.is_success());
        assert_eq!(report.succeeded_count(), 2);
        let mut submissions = api.submissions();
        submissions.sort();
        assert_eq!(
            submissions,
            vec![
                (OperationKind::Create, "fnA".to_string()),
                (OperationKind::Update, "fnB".to_string()),
            ]
        );
        let names: Vec<String> = api.functions().into_iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["fnA", "fnB", "fnC"]);
        assert_eq!(report.started_at, Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap());
        assert!(report.finished_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn owned_functions_not_in_source_are_deleted() {
        let api = Arc::new(
            InMemoryFunctionsApi::new()
                .with_function(ExistingFunction::new("stale").with_label(DEPLOYMENT_TOOL_LABEL, TOOL_NAME))
                .with_function(ExistingFunction::new("keep").with_source(SOURCE)),
        );

        let report = release(&api).run(desired(&["keep"]), &[]).await.unwrap();

        assert_eq!(report.succeeded_count(), 2);
        let names: Vec<String> = api.functions().into_iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["keep"]);
        assert_eq!(api.functions()[0].labels[DEPLOYMENT_TOOL_LABEL], TOOL_NAME);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_reported_with_retry_hint() {
        let api = Arc::new(InMemoryFunctionsApi::new());
        api.script("api-users", [ScriptedOutcome::Reject { status: 403 }]);
        api.script("api-orders", [ScriptedOutcome::fail(crate::domain::RpcCode::InvalidArgument)]);

        let report = release(&api)
            .run(desired(&["api-users", "api-orders", "jobs-nightly"]), &[])
            .await
            .unwrap();

        assert!(!report.is_success());
        assert_eq!(report.succeeded_count(), 1);
        assert_eq!(report.failed_count(), 2);
        let rejected = report.failed.iter().find(|f| f.target == "api-users").unwrap();
        assert_eq!(rejected.code, None);
        assert_eq!(report.attempts, 1);
        let hint = report.retry_hint().unwrap();
        assert!(hint.contains("functions:api-users"));
        assert!(hint.contains("functions:api-orders"));
    }

    #[tokio::test(start_paused = true)]
    async fn filters_limit_the_release() {
        let api = Arc::new(
            InMemoryFunctionsApi::new().with_function(ExistingFunction::new("jobs-old").with_source(SOURCE)),
        );
        let filters = FilterGroup::parse_only("functions:api,functions:missing");

        let report = release(&api)
            .run(desired(&["api-users", "jobs-nightly"]), &filters)
            .await
            .unwrap();

        assert_eq!(api.submissions(), vec![(OperationKind::Create, "api-users".to_string())]);
        assert_eq!(report.unmatched_filters, vec!["missing".to_string()]);
        assert!(report.is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_to_do_is_a_success() {
        let api = Arc::new(InMemoryFunctionsApi::new());

        let report = release(&api).run(Vec::new(), &[]).await.unwrap();

        assert!(report.is_success());
        assert_eq!(report.succeeded_count(), 0);
        assert_eq!(api.status_checks(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_subset_is_released_again() {
        let api = Arc::new(InMemoryFunctionsApi::new());
        api.script("api-orders", [ScriptedOutcome::fail(crate::domain::RpcCode::Internal)]);

        let report = release_with(&api, retrying(3))
            .run(desired(&["api-users", "api-orders"]), &[])
            .await
            .unwrap();

        assert!(report.is_success());
        assert_eq!(report.attempts, 2);
        assert_eq!(report.succeeded_count(), 2);
        let submissions = api.submissions();
        assert_eq!(submissions.len(), 3);
        assert_eq!(submissions[2], (OperationKind::Create, "api-orders".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_stop_at_the_attempt_limit() {
        let api = Arc::new(InMemoryFunctionsApi::new());
        api.script("flaky", std::iter::repeat_n(ScriptedOutcome::fail(crate::domain::RpcCode::Internal), 5));
        api.script("shaky", [ScriptedOutcome::fail(crate::domain::RpcCode::Internal)]);

        let report = release_with(&api, retrying(2))
            .run(desired(&["flaky", "shaky", "steady"]), &[])
            .await
            .unwrap();

        assert_eq!(report.attempts, 2);
        assert_eq!(api.submissions().len(), 5);
        assert_eq!(report.succeeded_count(), 2);
        assert_eq!(report.retry_hint().as_deref(), Some("--only functions:flaky"));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_round_that_fails_entirely_ends_the_release() {
        let api = Arc::new(InMemoryFunctionsApi::new());
        api.script("flaky", std::iter::repeat_n(ScriptedOutcome::fail(crate::domain::RpcCode::Internal), 5));

        let report = release_with(&api, retrying(5))
            .run(desired(&["flaky", "steady"]), &[])
            .await
            .unwrap();

        assert_eq!(report.attempts, 2);
        assert_eq!(report.failed_count(), 1);
        assert_eq!(report.succeeded_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn no_retry_when_everything_failed() {
        let api = Arc::new(InMemoryFunctionsApi::new());
        api.script("only", [ScriptedOutcome::fail(crate::domain::RpcCode::Internal)]);

        let report = release_with(&api, retrying(3)).run(desired(&["only"]), &[]).await.unwrap();

        assert_eq!(report.attempts, 1);
        assert_eq!(api.submissions().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn no_retry_after_quota_errors() {
        let api = Arc::new(InMemoryFunctionsApi::new());
        api.script("throttled", [ScriptedOutcome::Reject { status: 429 }]);

        let report = release_with(&api, retrying(3))
            .run(desired(&["throttled", "fine"]), &[])
            .await
            .unwrap();

        assert_eq!(report.attempts, 1);
        assert_eq!(report.failed_count(), 1);
        assert_eq!(api.submissions().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn new_https_functions_are_public_and_report_urls() {
        let api = Arc::new(InMemoryFunctionsApi::new().with_function(
            ExistingFunction::new("projects/demo/locations/us-central1/functions/web").with_source(SOURCE),
        ));
        let mut functions = vec![https("api"), https("web")];
        functions.push(DesiredFunction::new("projects/demo/locations/us-central1/functions/job"));

        let report = release(&api).run(functions, &[]).await.unwrap();

        assert!(report.is_success());
        let policies = api.policies();
        assert_eq!(
            policies.keys().collect::<Vec<_>>(),
            vec!["projects/demo/locations/us-central1/functions/api"]
        );
        assert_eq!(
            policies["projects/demo/locations/us-central1/functions/api"],
            IamPolicy::public_invoker()
        );
        let url = |id: &str| {
            report
                .succeeded
                .iter()
                .find(|success| short_name(&success.target) == id)
                .and_then(|success| success.trigger_url.clone())
        };
        assert_eq!(url("api").as_deref(), Some("https://us-central1-demo.cloudfunctions.net/api"));
        assert_eq!(url("web").as_deref(), Some("https://us-central1-demo.cloudfunctions.net/web"));
        assert_eq!(url("job"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_invoker_policy_fails_the_function() {
        let api = Arc::new(InMemoryFunctionsApi::new());
        api.reject_policy("projects/demo/locations/us-central1/functions/api");

        let report = release(&api).run(vec![https("api")], &[]).await.unwrap();

        assert!(!report.is_success());
        assert_eq!(report.failed[0].kind, OperationKind::Create);
        assert!(report.failed[0].message.contains("invoker policy"));
        assert_eq!(report.retry_hint().as_deref(), Some("--only functions:api"));
    }
}
