//! File digests: SHA-256 over the gzipped content.
//!
//! The service addresses content by the hash of the gzip bytes it receives,
//! so the same gzip level must be used for hashing and uploading.

use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};

use flate2::Compression;
use flate2::write::GzEncoder;
use sha2::{Digest, Sha256};

use crate::error::DeployError;
use crate::hashcache::CacheEntry;

const MIN_UPLOAD_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_UPLOAD_TIMEOUT: Duration = Duration::from_secs(2 * 60 * 60);

/// Result of looking at one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDigest {
    pub mtime: u64,
    pub size: u64,
    pub hash: String,

    /// Hash taken from the cache instead of computed.
    pub reused: bool,
}

/// Stat `path`, reusing `cached` when its mtime matches exactly.
pub fn digest_file(path: &Path, cached: Option<&CacheEntry>, level: u32) -> Result<FileDigest, DeployError> {
    let metadata = std::fs::metadata(path).map_err(|e| DeployError::io(path, e))?;
    let mtime = metadata
        .modified()
        .ok()
        .and_then(|modified| modified.duration_since(UNIX_EPOCH).ok())
        .map(|since| u64::try_from(since.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default();
    let size = metadata.len();

    if let Some(entry) = cached.filter(|entry| entry.mtime == mtime) {
        return Ok(FileDigest {
            mtime,
            size,
            hash: entry.hash.clone(),
            reused: true,
        });
    }

    Ok(FileDigest {
        mtime,
        size,
        hash: gzip_hash(path, level)?,
        reused: false,
    })
}

/// Stream the file through gzip into SHA-256; hex digest.
pub fn gzip_hash(path: &Path, level: u32) -> Result<String, DeployError> {
    let file = File::open(path).map_err(|e| DeployError::io(path, e))?;
    let mut encoder = GzEncoder::new(Sha256::new(), Compression::new(level));
    io::copy(&mut BufReader::new(file), &mut encoder).map_err(|e| DeployError::io(path, e))?;
    let hasher = encoder.finish().map_err(|e| DeployError::io(path, e))?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// Gzipped file content, as uploaded.
pub fn gzip_file(path: &Path, level: u32) -> Result<Vec<u8>, DeployError> {
    let file = File::open(path).map_err(|e| DeployError::io(path, e))?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::new(level));
    io::copy(&mut BufReader::new(file), &mut encoder).map_err(|e| DeployError::io(path, e))?;
    encoder.finish().map_err(|e| DeployError::io(path, e))
}

/// Run file work on the blocking pool.
pub async fn blocking<F, R>(path: PathBuf, work: F) -> Result<R, DeployError>
where
    F: FnOnce(&Path) -> Result<R, DeployError> + Send + 'static,
    R: Send + 'static,
{
    let display = path.clone();
    tokio::task::spawn_blocking(move || work(&path))
        .await
        .map_err(|err| DeployError::io(display, io::Error::other(err)))?
}

/// 20 ms per KB, bounded to [30 s, 2 h].
pub fn upload_timeout(size: u64) -> Duration {
    let scaled = Duration::from_millis(size / 1024 * 20);
    scaled.clamp(MIN_UPLOAD_TIMEOUT, MAX_UPLOAD_TIMEOUT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::Read;
    use tempfile::tempdir;

    #[test]
    fn hash_covers_gzip_bytes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index.html");
        std::fs::write(&path, "<h1>hello</h1>").unwrap();

        let gzipped = gzip_file(&path, 9).unwrap();
        let expected = format!("{:x}", Sha256::digest(&gzipped));
        assert_eq!(gzip_hash(&path, 9).unwrap(), expected);
        assert_eq!(expected.len(), 64);

        let mut plain = String::new();
        flate2::read::GzDecoder::new(&gzipped[..])
            .read_to_string(&mut plain)
            .unwrap();
        assert_eq!(plain, "<h1>hello</h1>");
    }

    #[test]
    fn cached_hash_is_reused_only_on_exact_mtime() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "a").unwrap();

        let fresh = digest_file(&path, None, 9).unwrap();
        assert!(!fresh.reused);
        assert_eq!(fresh.size, 1);

        let hit = CacheEntry::new(fresh.mtime, "cached");
        let reused = digest_file(&path, Some(&hit), 9).unwrap();
        assert!(reused.reused);
        assert_eq!(reused.hash, "cached");

        let stale = CacheEntry::new(fresh.mtime + 1, "cached");
        let rehashed = digest_file(&path, Some(&stale), 9).unwrap();
        assert!(!rehashed.reused);
        assert_eq!(rehashed.hash, fresh.hash);
    }

    #[test]
    fn missing_file_reports_path() {
        let err = gzip_hash(Path::new("/nonexistent/file"), 9).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/file"));
    }

    #[rstest]
    #[case::empty(0, 30)]
    #[case::one_mb(1024 * 1024, 30)]
    #[case::ten_mb(10 * 1024 * 1024, 204)]
    #[case::huge(u64::MAX / 2, 7200)]
    fn upload_timeout_scales_with_size(#[case] size: u64, #[case] secs: u64) {
        assert_eq!(upload_timeout(size).as_secs(), secs);
    }
}
