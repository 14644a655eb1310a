//! Shared reqwest plumbing for the HTTP backends.

use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;

use crate::error::DeployError;

/// Default per-request timeout. Uploads override it per request.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// reqwest client plus the optional bearer token every call carries.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    token: Option<String>,
}

impl HttpClient {
    pub fn new(token: Option<String>) -> Result<Self, DeployError> {
        let client = Client::builder().timeout(DEFAULT_TIMEOUT).build()?;
        Ok(Self { client, token })
    }

    /// Wrap a preconfigured client (proxy, TLS roots, timeouts).
    pub fn from_client(client: Client, token: Option<String>) -> Self {
        Self { client, token }
    }

    pub fn get(&self, url: &str) -> RequestBuilder {
        self.authorize(self.client.get(url))
    }

    pub fn post(&self, url: &str) -> RequestBuilder {
        self.authorize(self.client.post(url))
    }

    pub fn patch(&self, url: &str) -> RequestBuilder {
        self.authorize(self.client.patch(url))
    }

    pub fn delete(&self, url: &str) -> RequestBuilder {
        self.authorize(self.client.delete(url))
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    /// Send and decode a JSON body, mapping non-2xx to [`DeployError::HttpStatus`].
    pub async fn send_json<R: DeserializeOwned>(req: RequestBuilder) -> Result<R, DeployError> {
        let response = Self::send(req).await?;
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Send and discard the body.
    pub async fn send(req: RequestBuilder) -> Result<Response, DeployError> {
        let response = req.send().await?;
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            Err(DeployError::HttpStatus { status, body })
        }
    }
}

pub(crate) fn trim_base(url: &str) -> &str {
    url.trim_end_matches('/')
}
