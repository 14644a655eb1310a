//! FunctionsApi port: list, mutate and observe functions.

use async_trait::async_trait;

use crate::domain::{DesiredFunction, ExistingFunction, IamPolicy, OperationStatus};
use crate::error::DeployError;

/// Functions backend. Mutations return a long-running operation handle.
#[async_trait]
pub trait FunctionsApi: Send + Sync {
    async fn list_functions(&self) -> Result<Vec<ExistingFunction>, DeployError>;

    /// `source_url` is the archive this deploy uploaded.
    async fn create_function(
        &self,
        function: &DesiredFunction,
        source_url: &str,
    ) -> Result<OperationStatus, DeployError>;

    async fn update_function(
        &self,
        function: &DesiredFunction,
        source_url: &str,
    ) -> Result<OperationStatus, DeployError>;

    async fn delete_function(&self, name: &str) -> Result<OperationStatus, DeployError>;

    async fn get_operation(&self, name: &str) -> Result<OperationStatus, DeployError>;

    /// Replace the IAM policy of function `name`.
    async fn set_iam_policy(&self, name: &str, policy: &IamPolicy) -> Result<(), DeployError>;
}
