//! InMemoryFunctionsApi: functions backend kept in memory.
//!
//! Every mutation returns a pending operation that completes after a
//! configurable number of status checks. Outcomes are scripted per target
//! name; unscripted submissions succeed and apply their change.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::domain::function::{region, short_name};
use crate::domain::{
    DesiredFunction, ExistingFunction, HttpsTrigger, IamPolicy, OperationError, OperationKind, OperationStatus,
    RpcCode,
};
use crate::error::DeployError;
use crate::ports::FunctionsApi;

/// What the next submission for a target does.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptedOutcome {
    Succeed,

    /// Accepted, then the operation finishes with this error.
    Fail { code: RpcCode, message: String },

    /// The submission itself is refused with this HTTP status.
    Reject { status: u16 },
}

impl ScriptedOutcome {
    pub fn fail(code: RpcCode) -> Self {
        ScriptedOutcome::Fail {
            code,
            message: format!("operation failed with {code}"),
        }
    }
}

#[derive(Debug, Clone)]
enum Change {
    Upsert(ExistingFunction),
    Remove(String),
}

#[derive(Debug)]
struct PendingOperation {
    checks_left: u32,
    error: Option<OperationError>,
    change: Change,
}

#[derive(Default)]
struct State {
    functions: BTreeMap<String, ExistingFunction>,
    scripts: HashMap<String, VecDeque<ScriptedOutcome>>,
    operations: HashMap<String, PendingOperation>,
    submissions: Vec<(OperationKind, String)>,
    policies: BTreeMap<String, IamPolicy>,
    rejected_policies: HashSet<String>,
    check_failures: u32,
    checks: u32,
    next_id: u64,
}

pub struct InMemoryFunctionsApi {
    state: Mutex<State>,
    checks_until_done: u32,
}

impl Default for InMemoryFunctionsApi {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryFunctionsApi {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            checks_until_done: 1,
        }
    }

    /// Operations report `done` on the `checks`-th status check.
    pub fn checks_until_done(mut self, checks: u32) -> Self {
        self.checks_until_done = checks.max(1);
        self
    }

    pub fn with_function(self, function: ExistingFunction) -> Self {
        self.lock().functions.insert(function.name.clone(), function);
        self
    }

    /// Queue outcomes for successive submissions targeting `name`.
    pub fn script(&self, name: &str, outcomes: impl IntoIterator<Item = ScriptedOutcome>) {
        self.lock()
            .scripts
            .entry(name.to_string())
            .or_default()
            .extend(outcomes);
    }

    /// The next `count` status checks fail at transport level.
    pub fn fail_checks(&self, count: u32) {
        self.lock().check_failures += count;
    }

    /// `set_iam_policy` for `name` fails with HTTP 403.
    pub fn reject_policy(&self, name: &str) {
        self.lock().rejected_policies.insert(name.to_string());
    }

    /// Policies set so far, by function name.
    pub fn policies(&self) -> BTreeMap<String, IamPolicy> {
        self.lock().policies.clone()
    }

    pub fn functions(&self) -> Vec<ExistingFunction> {
        self.lock().functions.values().cloned().collect()
    }

    pub fn submissions(&self) -> Vec<(OperationKind, String)> {
        self.lock().submissions.clone()
    }

    pub fn status_checks(&self) -> u32 {
        self.lock().checks
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn submit(&self, kind: OperationKind, target: &str, change: Change) -> Result<OperationStatus, DeployError> {
        let mut state = self.lock();
        state.submissions.push((kind, target.to_string()));
        let outcome = state
            .scripts
            .get_mut(target)
            .and_then(VecDeque::pop_front)
            .unwrap_or(ScriptedOutcome::Succeed);

        let error = match outcome {
            ScriptedOutcome::Succeed => None,
            ScriptedOutcome::Fail { code, message } => Some(OperationError { code, message }),
            ScriptedOutcome::Reject { status } => {
                return Err(DeployError::HttpStatus {
                    status,
                    body: format!("{kind} {target} rejected"),
                });
            }
        };

        state.next_id += 1;
        let name = format!("operations/{}", state.next_id);
        state.operations.insert(
            name.clone(),
            PendingOperation {
                checks_left: self.checks_until_done,
                error,
                change,
            },
        );
        Ok(OperationStatus::pending(name))
    }

    fn deployed(function: &DesiredFunction, source_url: &str) -> ExistingFunction {
        let https_trigger = function.is_https().then(|| HttpsTrigger {
            url: Some(trigger_url(&function.name)),
        });
        ExistingFunction {
            name: function.name.clone(),
            source_archive_url: Some(source_url.to_string()),
            labels: function.labels.clone(),
            https_trigger,
        }
    }
}

/// `https://{region}-{project}.cloudfunctions.net/{id}` for full names.
fn trigger_url(name: &str) -> String {
    match (region(name), name.split('/').nth(1)) {
        (Some(region), Some(project)) => {
            format!("https://{region}-{project}.cloudfunctions.net/{}", short_name(name))
        }
        _ => format!("https://functions.invalid/{}", short_name(name)),
    }
}

#[async_trait]
impl FunctionsApi for InMemoryFunctionsApi {
    async fn list_functions(&self) -> Result<Vec<ExistingFunction>, DeployError> {
        Ok(self.functions())
    }

    async fn create_function(
        &self,
        function: &DesiredFunction,
        source_url: &str,
    ) -> Result<OperationStatus, DeployError> {
        let change = Change::Upsert(Self::deployed(function, source_url));
        self.submit(OperationKind::Create, &function.name, change)
    }

    async fn update_function(
        &self,
        function: &DesiredFunction,
        source_url: &str,
    ) -> Result<OperationStatus, DeployError> {
        let change = Change::Upsert(Self::deployed(function, source_url));
        self.submit(OperationKind::Update, &function.name, change)
    }

    async fn delete_function(&self, name: &str) -> Result<OperationStatus, DeployError> {
        self.submit(OperationKind::Delete, name, Change::Remove(name.to_string()))
    }

    async fn get_operation(&self, name: &str) -> Result<OperationStatus, DeployError> {
        let mut state = self.lock();
        state.checks += 1;
        if state.check_failures > 0 {
            state.check_failures -= 1;
            return Err(DeployError::transport("status check failed"));
        }

        let Some(operation) = state.operations.get_mut(name) else {
            return Err(DeployError::HttpStatus {
                status: 404,
                body: format!("{name} not found"),
            });
        };
        operation.checks_left = operation.checks_left.saturating_sub(1);
        if operation.checks_left > 0 {
            return Ok(OperationStatus::pending(name));
        }

        let error = operation.error.clone();
        if error.is_none() {
            match operation.change.clone() {
                Change::Upsert(function) => {
                    state.functions.insert(function.name.clone(), function);
                }
                Change::Remove(target) => {
                    state.functions.remove(&target);
                }
            }
        }
        Ok(OperationStatus {
            name: name.to_string(),
            done: true,
            error,
        })
    }

    async fn set_iam_policy(&self, name: &str, policy: &IamPolicy) -> Result<(), DeployError> {
        let mut state = self.lock();
        if state.rejected_policies.contains(name) {
            return Err(DeployError::HttpStatus {
                status: 403,
                body: format!("setIamPolicy on {name} denied"),
            });
        }
        state.policies.insert(name.to_string(), policy.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn successful_create_applies_once_done() {
        let api = InMemoryFunctionsApi::new().checks_until_done(2);
        let function = DesiredFunction::new("fnA");

        let op = api.create_function(&function, "gs://src").await.unwrap();
        assert!(!op.done);
        assert!(!api.get_operation(&op.name).await.unwrap().done);
        assert!(api.functions().is_empty());

        let done = api.get_operation(&op.name).await.unwrap();
        assert!(done.done && done.error.is_none());
        assert_eq!(api.functions()[0].source_archive_url.as_deref(), Some("gs://src"));
    }

    #[tokio::test]
    async fn scripted_outcomes_apply_in_order() {
        let api = InMemoryFunctionsApi::new().with_function(ExistingFunction::new("fnB"));
        api.script(
            "fnB",
            [ScriptedOutcome::Reject { status: 403 }, ScriptedOutcome::fail(RpcCode::NotFound)],
        );

        let rejected = api.delete_function("fnB").await.unwrap_err();
        assert!(matches!(rejected, DeployError::HttpStatus { status: 403, .. }));

        let op = api.delete_function("fnB").await.unwrap();
        let done = api.get_operation(&op.name).await.unwrap();
        assert_eq!(done.error.map(|e| e.code), Some(RpcCode::NotFound));
        assert_eq!(api.functions().len(), 1);

        let op = api.delete_function("fnB").await.unwrap();
        api.get_operation(&op.name).await.unwrap();
        assert!(api.functions().is_empty());
    }

    #[tokio::test]
    async fn https_functions_get_a_trigger_url() {
        let api = InMemoryFunctionsApi::new();
        let function = DesiredFunction::new("projects/demo/locations/europe-west1/functions/api")
            .with_spec("httpsTrigger", serde_json::json!({}));

        let op = api.create_function(&function, "gs://src").await.unwrap();
        api.get_operation(&op.name).await.unwrap();

        assert_eq!(
            api.functions()[0].trigger_url(),
            Some("https://europe-west1-demo.cloudfunctions.net/api")
        );
    }

    #[tokio::test]
    async fn policies_are_recorded_unless_rejected() {
        let api = InMemoryFunctionsApi::new();
        api.reject_policy("locked");

        api.set_iam_policy("open", &IamPolicy::public_invoker()).await.unwrap();
        let err = api.set_iam_policy("locked", &IamPolicy::public_invoker()).await.unwrap_err();

        assert!(matches!(err, DeployError::HttpStatus { status: 403, .. }));
        assert_eq!(api.policies().keys().collect::<Vec<_>>(), vec!["open"]);
    }
}
