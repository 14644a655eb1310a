//! Hosting deploy: upload a public directory into a version.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::Args;
use walkdir::WalkDir;

use liftoff_core::hashcache::CACHE_DIR;
use liftoff_core::hosting::{Uploader, UploaderConfig};
use liftoff_core::impls::{HttpClient, HttpHostingApi};

use crate::{Config, OutputFormat};

#[derive(Debug, Args)]
pub struct HostingArgs {
    /// Directory to upload.
    #[arg(long)]
    pub public: PathBuf,

    /// Hosting site; names the hash cache.
    #[arg(long)]
    pub site: String,

    /// Version resource, e.g. `sites/demo/versions/abc123`.
    #[arg(long = "version-name")]
    pub version: String,

    /// Directory holding the `.liftoff` cache.
    #[arg(long, default_value = ".")]
    pub project_root: PathBuf,

    /// Files per populateFiles request.
    #[arg(long, default_value_t = 1000)]
    pub batch_size: usize,
}

/// Execute the hosting deploy.
///
/// # Errors
///
/// Returns an error if the public directory cannot be listed or the upload
/// fails.
pub async fn execute(args: HostingArgs, config: &Config) -> Result<()> {
    let files = list_files(&args.public)?;
    tracing::info!(files = files.len(), public = %args.public.display(), "found files to deploy");

    let http = HttpClient::new(config.token.clone()).context("Failed to create HTTP client")?;
    let api = Arc::new(HttpHostingApi::new(http, config.hosting_url.clone()));
    let uploader_config = UploaderConfig::new(args.version, args.public)
        .project_root(args.project_root)
        .cache_id(args.site)
        .batch_size(args.batch_size);
    let uploader = Arc::new(Uploader::new(uploader_config, api));

    let reporter = {
        let uploader = Arc::clone(&uploader);
        tokio::spawn(async move {
            let mut ticks = tokio::time::interval(Duration::from_secs(2));
            ticks.tick().await;
            loop {
                ticks.tick().await;
                tracing::info!("{}", uploader.progress());
            }
        })
    };
    let result = uploader.start(files).await;
    reporter.abort();
    let summary = result.context("Hosting upload failed")?;

    match config.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&summary).context("Failed to serialize summary")?
            );
        }
        OutputFormat::Text => {
            println!("Upload complete!");
            println!();
            println!("  Files:           {}", summary.files);
            println!("  Hashed:          {}", summary.hashes_computed);
            println!("  From cache:      {}", summary.hashes_reused);
            println!("  Uploaded:        {}", summary.uploads_completed);
        }
    }
    Ok(())
}

/// Regular files under `public`, relative and `/`-separated, sorted.
fn list_files(public: &Path) -> Result<Vec<String>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(public).follow_links(true) {
        let entry = entry.with_context(|| format!("Failed to list {}", public.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(public)
            .with_context(|| format!("{} is outside {}", entry.path().display(), public.display()))?;
        if relative.components().any(|part| part.as_os_str() == CACHE_DIR) {
            continue;
        }
        let path = relative
            .components()
            .map(|part| {
                part.as_os_str()
                    .to_str()
                    .ok_or_else(|| anyhow!("non-UTF-8 path: {}", entry.path().display()))
            })
            .collect::<Result<Vec<&str>>>()?;
        files.push(path.join("/"));
    }
    files.sort();
    Ok(files)
}
