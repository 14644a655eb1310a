//! InMemoryHostingApi: content-addressed hosting backend kept in memory.
//!
//! Used by tests. It behaves like the real service where the
//! uploader can tell the difference:
//! - `populate_files` answers with the hashes it has not stored yet
//! - a hash requested once is not requested again by later batches
//! - failures can be scripted per call

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::DeployError;
use crate::ports::{HostingApi, PopulateFilesResponse};

#[derive(Default)]
struct State {
    stored: BTreeSet<String>,
    requested: BTreeSet<String>,
    batches: Vec<BTreeMap<String, String>>,
    uploads: Vec<(String, Vec<u8>)>,
    populate_failures: VecDeque<DeployError>,
    upload_failures: VecDeque<DeployError>,
}

#[derive(Default)]
pub struct InMemoryHostingApi {
    state: Mutex<State>,
}

impl InMemoryHostingApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with content the backend already stores.
    pub fn with_stored<I, S>(self, hashes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lock().stored.extend(hashes.into_iter().map(Into::into));
        self
    }

    /// The next `populate_files` call fails with `err`.
    pub fn fail_next_populate(&self, err: DeployError) {
        self.lock().populate_failures.push_back(err);
    }

    /// The next `upload` call fails with `err`.
    pub fn fail_next_upload(&self, err: DeployError) {
        self.lock().upload_failures.push_back(err);
    }

    /// Successful populate batches, in arrival order.
    pub fn batches(&self) -> Vec<BTreeMap<String, String>> {
        self.lock().batches.clone()
    }

    /// Hashes received by successful uploads, in arrival order.
    pub fn uploaded_hashes(&self) -> Vec<String> {
        self.lock().uploads.iter().map(|(hash, _)| hash.clone()).collect()
    }

    pub fn uploaded_body(&self, hash: &str) -> Option<Vec<u8>> {
        self.lock()
            .uploads
            .iter()
            .find(|(uploaded, _)| uploaded == hash)
            .map(|(_, body)| body.clone())
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl HostingApi for InMemoryHostingApi {
    async fn populate_files(
        &self,
        version: &str,
        files: &BTreeMap<String, String>,
    ) -> Result<PopulateFilesResponse, DeployError> {
        let mut state = self.lock();
        if let Some(err) = state.populate_failures.pop_front() {
            return Err(err);
        }
        state.batches.push(files.clone());

        let mut required = Vec::new();
        for hash in files.values().collect::<BTreeSet<_>>() {
            if !state.stored.contains(hash) && state.requested.insert(hash.clone()) {
                required.push(hash.clone());
            }
        }
        Ok(PopulateFilesResponse {
            upload_url: format!("memory://{version}/files"),
            upload_required_hashes: required,
        })
    }

    async fn upload(
        &self,
        _upload_url: &str,
        hash: &str,
        gzipped: Vec<u8>,
        _timeout: Duration,
    ) -> Result<(), DeployError> {
        let mut state = self.lock();
        if let Some(err) = state.upload_failures.pop_front() {
            return Err(err);
        }
        state.stored.insert(hash.to_string());
        state.uploads.push((hash.to_string(), gzipped));
        Ok(())
    }
}
