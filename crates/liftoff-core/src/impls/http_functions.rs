//! Functions REST backend.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::http::{HttpClient, trim_base};
use crate::domain::function::region;
use crate::domain::{DesiredFunction, ExistingFunction, IamPolicy, OperationStatus};
use crate::error::DeployError;
use crate::ports::FunctionsApi;

#[derive(Debug, Serialize)]
struct SetIamPolicyRequest<'a> {
    policy: &'a IamPolicy,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListFunctionsResponse {
    #[serde(default)]
    functions: Vec<ExistingFunction>,

    #[serde(default)]
    next_page_token: Option<String>,
}

/// `FunctionsApi` over `{api}/v1/projects/{project}/locations/...`.
pub struct HttpFunctionsApi {
    http: HttpClient,
    base_url: String,
    project: String,
}

impl HttpFunctionsApi {
    pub fn new(http: HttpClient, base_url: impl Into<String>, project: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            project: project.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", trim_base(&self.base_url), path.trim_start_matches('/'))
    }

    fn body(function: &DesiredFunction, source_url: &str) -> Result<Value, DeployError> {
        let mut body = serde_json::to_value(function)?;
        if let Value::Object(map) = &mut body {
            map.insert("sourceArchiveUrl".to_string(), Value::String(source_url.to_string()));
        }
        Ok(body)
    }
}

#[async_trait]
impl FunctionsApi for HttpFunctionsApi {
    async fn list_functions(&self) -> Result<Vec<ExistingFunction>, DeployError> {
        let url = self.url(&format!("projects/{}/locations/-/functions", self.project));
        let mut functions = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut req = self.http.get(&url);
            if let Some(token) = &page_token {
                req = req.query(&[("pageToken", token)]);
            }
            let page: ListFunctionsResponse = HttpClient::send_json(req).await?;
            functions.extend(page.functions);
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }
        Ok(functions)
    }

    async fn create_function(
        &self,
        function: &DesiredFunction,
        source_url: &str,
    ) -> Result<OperationStatus, DeployError> {
        let location = region(&function.name).ok_or_else(|| {
            DeployError::Config(format!("not a full function name: {}", function.name))
        })?;
        let url = self.url(&format!("projects/{}/locations/{location}/functions", self.project));
        let req = self.http.post(&url).json(&Self::body(function, source_url)?);
        HttpClient::send_json(req).await
    }

    async fn update_function(
        &self,
        function: &DesiredFunction,
        source_url: &str,
    ) -> Result<OperationStatus, DeployError> {
        let req = self
            .http
            .patch(&self.url(&function.name))
            .json(&Self::body(function, source_url)?);
        HttpClient::send_json(req).await
    }

    async fn delete_function(&self, name: &str) -> Result<OperationStatus, DeployError> {
        HttpClient::send_json(self.http.delete(&self.url(name))).await
    }

    async fn get_operation(&self, name: &str) -> Result<OperationStatus, DeployError> {
        HttpClient::send_json(self.http.get(&self.url(name))).await
    }

    async fn set_iam_policy(&self, name: &str, policy: &IamPolicy) -> Result<(), DeployError> {
        let url = format!("{}:setIamPolicy", self.url(name));
        let req = self.http.post(&url).json(&SetIamPolicyRequest { policy });
        HttpClient::send(req).await?;
        Ok(())
    }
}
