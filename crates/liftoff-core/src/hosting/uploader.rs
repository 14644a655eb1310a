//! Hosting uploader: hash → populate → upload.
//!
//! Three [`TaskQueue`]s chained downstream only:
//! - hash (per file): stat, reuse or compute the gzip hash, fill the batch
//! - populate (per batch): register `"/path" -> hash`, learn required hashes
//! - upload (per required hash): gzip and send the content
//!
//! Each queue is closed once everything upstream of it has finished, so
//! `start` resolves only when the upload queue drains.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::mem;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde::Serialize;

use super::config::UploaderConfig;
use super::hasher::{self, FileDigest, upload_timeout};
use crate::domain::FileEntry;
use crate::error::DeployError;
use crate::hashcache::{CacheEntries, CacheEntry, HashCache};
use crate::ports::HostingApi;
use crate::queue::{QueueConfig, QueueStats, TaskHandler, TaskQueue};

/// `"/path" -> hash` pairs for one `populateFiles` call.
type Batch = Arc<BTreeMap<String, String>>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    #[default]
    Pending,
    Hashing,
    Populating,
    Uploading,
    Complete,
}

/// Snapshot returned by [`Uploader::progress`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UploadProgress {
    pub stage: Stage,
    pub done: usize,
    pub total: usize,
}

impl fmt::Display for UploadProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self.stage {
            Stage::Pending => return f.write_str("waiting to start"),
            Stage::Complete => return f.write_str("upload complete"),
            Stage::Hashing => "hashing files",
            Stage::Populating => "adding files to version",
            Stage::Uploading => "uploading new files",
        };
        write!(f, "{label} [{}/{}]", self.done, self.total)
    }
}

/// What one `start` call did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSummary {
    pub files: usize,
    pub hashes_computed: usize,
    pub hashes_reused: usize,
    pub batches: usize,
    pub uploads_requested: usize,
    pub uploads_completed: usize,
    pub hash_stats: QueueStats,
    pub populate_stats: QueueStats,
    pub upload_stats: QueueStats,
}

/// State of the current run, shared by the stage handlers.
#[derive(Debug, Default)]
struct Pipeline {
    stage: Stage,
    files: usize,
    hashed: usize,
    hashes_computed: usize,
    hashes_reused: usize,
    populated: usize,
    batches: usize,
    uploads_requested: usize,
    uploads_completed: usize,

    /// Batch being filled by the hash stage.
    batch: BTreeMap<String, String>,

    /// Cache entries for this run, written once hashing is done.
    cache: CacheEntries,

    manifest: Vec<FileEntry>,

    /// Hash -> (absolute path, size) of a file with that content.
    sources: HashMap<String, (PathBuf, u64)>,

    upload_url: Option<String>,
}

impl Pipeline {
    fn new(files: usize) -> Self {
        Self {
            files,
            ..Self::default()
        }
    }

    fn record(&mut self, path: &str, source: PathBuf, digest: FileDigest) {
        if digest.reused {
            self.hashes_reused += 1;
        } else {
            self.hashes_computed += 1;
        }
        self.hashed += 1;
        self.sources
            .entry(digest.hash.clone())
            .or_insert((source, digest.size));
        let entry = FileEntry {
            path: path.to_string(),
            mtime: digest.mtime,
            size: digest.size,
            hash: digest.hash,
        };
        self.batch.insert(entry.populate_key(), entry.hash.clone());
        self.cache
            .insert(entry.path.clone(), CacheEntry::new(entry.mtime, entry.hash.clone()));
        self.manifest.push(entry);
    }

    /// Hand off the batch once it reaches `batch_size`.
    fn take_full_batch(&mut self, batch_size: usize) -> Option<Batch> {
        if self.batch.len() >= batch_size {
            self.take_batch()
        } else {
            None
        }
    }

    /// Hand off whatever is left. Never produces an empty batch.
    fn take_batch(&mut self) -> Option<Batch> {
        if self.batch.is_empty() {
            return None;
        }
        self.batches += 1;
        Some(Arc::new(mem::take(&mut self.batch)))
    }

    fn progress(&self) -> UploadProgress {
        let (done, total) = match self.stage {
            Stage::Pending | Stage::Hashing => (self.hashed, self.files),
            Stage::Populating => (self.populated, self.files),
            Stage::Uploading | Stage::Complete => (self.uploads_completed, self.uploads_requested),
        };
        UploadProgress {
            stage: self.stage,
            done,
            total,
        }
    }
}

type SharedPipeline = Arc<Mutex<Pipeline>>;

fn lock(pipeline: &SharedPipeline) -> MutexGuard<'_, Pipeline> {
    pipeline.lock().unwrap_or_else(PoisonError::into_inner)
}

struct HashStage {
    config: Arc<UploaderConfig>,
    pipeline: SharedPipeline,
    cached: Arc<CacheEntries>,
    populate: TaskQueue<Batch>,
}

#[async_trait]
impl TaskHandler<String> for HashStage {
    async fn handle(&self, path: String) -> Result<(), DeployError> {
        let cached = self.cached.get(&path).cloned();
        let level = self.config.gzip_level;
        let source = self.config.public_dir.join(&path);
        let digest = hasher::blocking(source.clone(), move |file| {
            hasher::digest_file(file, cached.as_ref(), level)
        })
        .await?;

        let full = {
            let mut pipeline = lock(&self.pipeline);
            pipeline.record(&path, source, digest);
            pipeline.take_full_batch(self.config.batch_size)
        };
        if let Some(batch) = full {
            self.populate.add(batch)?;
        }
        Ok(())
    }
}

struct PopulateStage {
    config: Arc<UploaderConfig>,
    api: Arc<dyn HostingApi>,
    pipeline: SharedPipeline,
    uploads: TaskQueue<String>,
}

#[async_trait]
impl TaskHandler<Batch> for PopulateStage {
    async fn handle(&self, batch: Batch) -> Result<(), DeployError> {
        let response = self.api.populate_files(&self.config.version, &batch).await?;
        {
            let mut pipeline = lock(&self.pipeline);
            pipeline.upload_url = Some(response.upload_url);
            pipeline.populated += batch.len();
            pipeline.uploads_requested += response.upload_required_hashes.len();
        }
        for hash in response.upload_required_hashes {
            self.uploads.add(hash)?;
        }
        Ok(())
    }
}

struct UploadStage {
    config: Arc<UploaderConfig>,
    api: Arc<dyn HostingApi>,
    pipeline: SharedPipeline,
}

#[async_trait]
impl TaskHandler<String> for UploadStage {
    async fn handle(&self, hash: String) -> Result<(), DeployError> {
        let (upload_url, source) = {
            let pipeline = lock(&self.pipeline);
            (pipeline.upload_url.clone(), pipeline.sources.get(&hash).cloned())
        };
        let upload_url = upload_url
            .ok_or_else(|| DeployError::Config("upload requested before populateFiles".to_string()))?;
        let (path, size) = source
            .ok_or_else(|| DeployError::Config(format!("upload requested for unknown hash {hash}")))?;

        let level = self.config.gzip_level;
        let body = hasher::blocking(path, move |file| hasher::gzip_file(file, level)).await?;
        self.api
            .upload(&upload_url, &hash, body, upload_timeout(size))
            .await?;

        lock(&self.pipeline).uploads_completed += 1;
        Ok(())
    }
}

/// Uploads a hosting manifest into a version.
pub struct Uploader {
    config: Arc<UploaderConfig>,
    api: Arc<dyn HostingApi>,
    pipeline: SharedPipeline,
}

impl Uploader {
    pub fn new(config: UploaderConfig, api: Arc<dyn HostingApi>) -> Self {
        Self {
            config: Arc::new(config),
            api,
            pipeline: Arc::new(Mutex::new(Pipeline::default())),
        }
    }

    pub fn progress(&self) -> UploadProgress {
        lock(&self.pipeline).progress()
    }

    /// Files hashed by the current or last run, sorted by path.
    pub fn manifest(&self) -> Vec<FileEntry> {
        let mut manifest = lock(&self.pipeline).manifest.clone();
        manifest.sort_by(|a, b| a.path.cmp(&b.path));
        manifest
    }

    /// Upload `files` (paths relative to the public directory). Resolves once
    /// every file is present in the version.
    ///
    /// A path listed more than once is hashed and registered once.
    pub async fn start(&self, mut files: Vec<String>) -> Result<UploadSummary, DeployError> {
        let mut seen = HashSet::with_capacity(files.len());
        files.retain(|path| seen.insert(path.clone()));
        *lock(&self.pipeline) = Pipeline::new(files.len());
        if files.is_empty() {
            self.set_stage(Stage::Complete);
            return Ok(UploadSummary::default());
        }

        let cache = HashCache::new(&self.config.project_root, &self.config.cache_id);
        let cached = Arc::new(cache.load());

        let uploads = TaskQueue::new(
            QueueConfig::named("upload")
                .concurrency(self.config.upload_concurrency)
                .retries(self.config.upload_retries)
                .backoff(self.config.backoff),
            UploadStage {
                config: Arc::clone(&self.config),
                api: Arc::clone(&self.api),
                pipeline: Arc::clone(&self.pipeline),
            },
        );
        let populate = TaskQueue::new(
            QueueConfig::named("populate")
                .concurrency(self.config.populate_concurrency)
                .retries(self.config.populate_retries)
                .backoff(self.config.backoff),
            PopulateStage {
                config: Arc::clone(&self.config),
                api: Arc::clone(&self.api),
                pipeline: Arc::clone(&self.pipeline),
                uploads: uploads.clone(),
            },
        );
        let hashing = TaskQueue::new(
            QueueConfig::named("hash").concurrency(self.config.hash_concurrency),
            HashStage {
                config: Arc::clone(&self.config),
                pipeline: Arc::clone(&self.pipeline),
                cached,
                populate: populate.clone(),
            },
        );

        self.set_stage(Stage::Hashing);
        for path in files {
            hashing.add(path)?;
        }
        hashing.close();

        let stages = async {
            hashing.wait().await?;
            let (remainder, entries) = {
                let mut pipeline = lock(&self.pipeline);
                (pipeline.take_batch(), mem::take(&mut pipeline.cache))
            };
            if let Err(err) = cache.dump(&entries) {
                tracing::warn!(error = %err, "could not write hash cache");
            }
            if let Some(batch) = remainder {
                populate.add(batch)?;
            }
            self.set_stage(Stage::Populating);
            populate.close();

            populate.wait().await?;
            self.set_stage(Stage::Uploading);
            uploads.close();
            Ok::<(), DeployError>(())
        };
        let uploaded = async { uploads.wait().await.map_err(DeployError::from) };

        if let Err(err) = tokio::try_join!(stages, uploaded) {
            log_task_errors(&hashing);
            log_task_errors(&populate);
            log_task_errors(&uploads);
            if err.to_string().contains("content hash") {
                tracing::warn!("upload rejected a content hash, clearing the hash cache");
                if let Err(reset) = cache.reset() {
                    tracing::warn!(error = %reset, "could not clear hash cache");
                }
            }
            return Err(err);
        }
        self.set_stage(Stage::Complete);

        let summary = {
            let pipeline = lock(&self.pipeline);
            UploadSummary {
                files: pipeline.files,
                hashes_computed: pipeline.hashes_computed,
                hashes_reused: pipeline.hashes_reused,
                batches: pipeline.batches,
                uploads_requested: pipeline.uploads_requested,
                uploads_completed: pipeline.uploads_completed,
                hash_stats: hashing.stats(),
                populate_stats: populate.stats(),
                upload_stats: uploads.stats(),
            }
        };
        for (stage, stats) in [
            ("hash", &summary.hash_stats),
            ("populate", &summary.populate_stats),
            ("upload", &summary.upload_stats),
        ] {
            tracing::debug!(
                stage,
                total = stats.total,
                retried = stats.retried,
                avg_ms = stats.avg,
                max_ms = stats.max,
                elapsed_ms = stats.elapsed,
                "stage finished"
            );
        }
        Ok(summary)
    }

    fn set_stage(&self, stage: Stage) {
        lock(&self.pipeline).stage = stage;
    }
}

/// Debug log of every task that hit an error, plus what was left unfinished.
fn log_task_errors<T: Clone + Send + 'static>(queue: &TaskQueue<T>) {
    let records = queue.records();
    for record in &records {
        if let Some(error) = &record.last_error {
            tracing::debug!(
                queue = queue.name(),
                task = record.index,
                state = ?record.state,
                attempts = record.attempts,
                error = %error,
                "task error"
            );
        }
    }
    let unfinished = records.iter().filter(|record| !record.state.is_terminal()).count();
    if unfinished > 0 {
        tracing::debug!(queue = queue.name(), unfinished, "tasks left unfinished");
    }
}
