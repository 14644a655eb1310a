use std::path::PathBuf;
use std::time::Duration;

/// Hosting upload settings.
#[derive(Debug, Clone)]
pub struct UploaderConfig {
    /// Version resource the files are added to, e.g. `sites/demo/versions/abc`.
    pub version: String,

    /// Directory the manifest paths are relative to.
    pub public_dir: PathBuf,

    /// Directory holding `.liftoff/`.
    pub project_root: PathBuf,

    /// Hosting target (site) name; selects the hash cache file.
    pub cache_id: String,

    pub gzip_level: u32,

    pub hash_concurrency: usize,
    pub populate_concurrency: usize,
    pub populate_retries: u32,
    pub upload_concurrency: usize,
    pub upload_retries: u32,

    /// Files per `populateFiles` request.
    pub batch_size: usize,

    /// Base delay of the populate and upload retry backoff.
    pub backoff: Duration,
}

impl UploaderConfig {
    pub fn new(version: impl Into<String>, public_dir: impl Into<PathBuf>) -> Self {
        let public_dir = public_dir.into();
        Self {
            version: version.into(),
            project_root: public_dir.clone(),
            public_dir,
            cache_id: "default".to_string(),
            gzip_level: 9,
            hash_concurrency: 50,
            populate_concurrency: 10,
            populate_retries: 3,
            upload_concurrency: 200,
            upload_retries: 5,
            batch_size: 1000,
            backoff: Duration::from_millis(200),
        }
    }

    pub fn project_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.project_root = root.into();
        self
    }

    pub fn cache_id(mut self, cache_id: impl Into<String>) -> Self {
        self.cache_id = cache_id.into();
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }
}
