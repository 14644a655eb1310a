//! Hosting REST backend.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;

use super::http::{HttpClient, trim_base};
use crate::error::DeployError;
use crate::ports::{HostingApi, PopulateFilesResponse};

#[derive(Debug, Serialize)]
struct PopulateFilesRequest<'a> {
    files: &'a BTreeMap<String, String>,
}

/// `HostingApi` over `{api}/v1beta1/{version}:populateFiles` and the upload URL
/// it returns.
pub struct HttpHostingApi {
    http: HttpClient,
    base_url: String,
}

impl HttpHostingApi {
    pub fn new(http: HttpClient, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl HostingApi for HttpHostingApi {
    async fn populate_files(
        &self,
        version: &str,
        files: &BTreeMap<String, String>,
    ) -> Result<PopulateFilesResponse, DeployError> {
        let url = format!("{}/v1beta1/{version}:populateFiles", trim_base(&self.base_url));
        let req = self.http.post(&url).json(&PopulateFilesRequest { files });
        HttpClient::send_json(req).await
    }

    async fn upload(
        &self,
        upload_url: &str,
        hash: &str,
        gzipped: Vec<u8>,
        timeout: Duration,
    ) -> Result<(), DeployError> {
        let url = format!("{}/{hash}", trim_base(upload_url));
        let req = self
            .http
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .timeout(timeout)
            .body(gzipped);
        let response = HttpClient::send(req).await?;
        // The upload endpoint confirms stored content with exactly 200.
        if response.status() != StatusCode::OK {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(DeployError::HttpStatus { status, body });
        }
        Ok(())
    }
}
