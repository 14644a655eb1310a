//! Per-target hash cache for hosting deploys.
//!
//! One file per cache id at `{root}/.liftoff/hosting.{id}.cache`, one line
//! per file:
//!
//! ```text
//! path,mtime,hash
//! ```
//!
//! Paths may contain commas, so lines are split from the right. A cache that
//! cannot be read is treated as empty: the worst case is rehashing.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use tempfile::NamedTempFile;

use crate::error::DeployError;

pub const CACHE_DIR: &str = ".liftoff";

/// Cached result of hashing one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Milliseconds since the Unix epoch.
    pub mtime: u64,
    pub hash: String,
}

impl CacheEntry {
    pub fn new(mtime: u64, hash: impl Into<String>) -> Self {
        Self {
            mtime,
            hash: hash.into(),
        }
    }
}

pub type CacheEntries = BTreeMap<String, CacheEntry>;

#[derive(Debug, Clone)]
pub struct HashCache {
    path: PathBuf,
}

impl HashCache {
    pub fn new(root: impl AsRef<Path>, cache_id: &str) -> Self {
        let file = format!("hosting.{}.cache", sanitize_id(cache_id));
        Self {
            path: root.as_ref().join(CACHE_DIR).join(file),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the cache. Missing, unreadable and corrupt files all yield an
    /// empty map.
    pub fn load(&self) -> CacheEntries {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) => {
                if err.kind() != std::io::ErrorKind::NotFound {
                    tracing::debug!(path = %self.path.display(), error = %err, "hash cache unreadable");
                }
                return CacheEntries::new();
            }
        };

        match parse(&content) {
            Some(entries) => {
                tracing::debug!(path = %self.path.display(), entries = entries.len(), "hash cache loaded");
                entries
            }
            None => {
                tracing::debug!(path = %self.path.display(), "hash cache corrupt, ignoring");
                CacheEntries::new()
            }
        }
    }

    /// Replace the cache with `entries`, atomically.
    pub fn dump(&self, entries: &CacheEntries) -> Result<(), DeployError> {
        let dir = self
            .path
            .parent()
            .ok_or_else(|| DeployError::Config(format!("invalid cache path {}", self.path.display())))?;
        std::fs::create_dir_all(dir).map_err(|e| DeployError::io(dir, e))?;

        let mut file = NamedTempFile::new_in(dir).map_err(|e| DeployError::io(dir, e))?;
        file.write_all(render(entries).as_bytes())
            .map_err(|e| DeployError::io(file.path(), e))?;
        file.persist(&self.path)
            .map_err(|e| DeployError::io(&self.path, e.error))?;
        tracing::debug!(path = %self.path.display(), entries = entries.len(), "hash cache written");
        Ok(())
    }

    /// Forget every entry so the next deploy rehashes all files.
    pub fn reset(&self) -> Result<(), DeployError> {
        self.dump(&CacheEntries::new())
    }
}

pub fn load(root: impl AsRef<Path>, cache_id: &str) -> CacheEntries {
    HashCache::new(root, cache_id).load()
}

pub fn dump(root: impl AsRef<Path>, cache_id: &str, entries: &CacheEntries) -> Result<(), DeployError> {
    HashCache::new(root, cache_id).dump(entries)
}

/// Bytes kept as-is in cache file names. `%` is escaped like the rest, so
/// distinct ids never share a file.
const ID_KEEP: &AsciiSet = &NON_ALPHANUMERIC.remove(b'.').remove(b'_').remove(b'-');

/// Percent-encode everything outside `[A-Za-z0-9._-]`. An empty id is the
/// default cache.
pub fn sanitize_id(cache_id: &str) -> String {
    if cache_id.is_empty() {
        return "default".to_string();
    }
    utf8_percent_encode(cache_id, ID_KEEP).to_string()
}

fn parse(content: &str) -> Option<CacheEntries> {
    let mut entries = CacheEntries::new();
    for line in content.lines().filter(|line| !line.trim().is_empty()) {
        let mut fields = line.rsplitn(3, ',');
        let hash = fields.next()?;
        let mtime = fields.next()?.parse::<u64>().ok()?;
        let path = fields.next()?;
        if path.is_empty() || hash.is_empty() {
            return None;
        }
        entries.insert(path.to_string(), CacheEntry::new(mtime, hash));
    }
    Some(entries)
}

fn render(entries: &CacheEntries) -> String {
    let mut out = String::new();
    for (path, entry) in entries {
        out.push_str(&format!("{path},{},{}\n", entry.mtime, entry.hash));
    }
    out
}
