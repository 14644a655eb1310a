//! HostingApi port: the two endpoints the uploader talks to.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::DeployError;

/// Response of `POST {version}:populateFiles`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PopulateFilesResponse {
    pub upload_url: String,

    /// Submitted hashes the backend does not store yet.
    #[serde(default)]
    pub upload_required_hashes: Vec<String>,
}

/// Content-addressed file storage of a hosting version.
#[async_trait]
pub trait HostingApi: Send + Sync {
    /// Register `"/path" -> hash` pairs with a version.
    async fn populate_files(
        &self,
        version: &str,
        files: &BTreeMap<String, String>,
    ) -> Result<PopulateFilesResponse, DeployError>;

    /// Upload gzipped content for one hash to `{upload_url}/{hash}`.
    async fn upload(
        &self,
        upload_url: &str,
        hash: &str,
        gzipped: Vec<u8>,
        timeout: Duration,
    ) -> Result<(), DeployError>;
}
