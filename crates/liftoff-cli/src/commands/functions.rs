//! Functions deploy: reconcile the project's functions with a manifest.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;

use liftoff_core::domain::FunctionTrigger;
use liftoff_core::domain::function::expand_regions;
use liftoff_core::functions::{FilterGroup, FunctionRelease, ReleaseConfig};
use liftoff_core::impls::{HttpClient, HttpFunctionsApi};
use liftoff_core::ports::SystemClock;

use crate::{Config, OutputFormat};

#[derive(Debug, Args)]
pub struct FunctionsArgs {
    /// Function triggers (JSON array).
    #[arg(long, short = 'f')]
    pub manifest: PathBuf,

    /// Archive the functions are deployed from.
    #[arg(long)]
    pub source_url: String,

    /// Restrict the deploy, e.g. `functions:api,functions:jobs.nightly`.
    #[arg(long)]
    pub only: Option<String>,

    /// Older archive locations whose functions may be deleted.
    #[arg(long)]
    pub legacy_source_url: Vec<String>,

    /// Shown when there are too many functions to track.
    #[arg(long)]
    pub console_url: Option<String>,

    /// Redeploy failed functions up to this many more times.
    #[arg(long, default_value_t = 0)]
    pub retry: u32,
}

/// Execute the functions deploy.
///
/// # Errors
///
/// Returns an error if the project is missing, the manifest is invalid, the
/// functions cannot be listed, or any function failed to deploy.
pub async fn execute(args: FunctionsArgs, config: &Config) -> Result<()> {
    let project = config
        .project
        .as_ref()
        .context("Project is required. Set LIFTOFF_PROJECT or use --project")?;

    let manifest = std::fs::read_to_string(&args.manifest)
        .with_context(|| format!("Failed to read manifest file: {:?}", args.manifest))?;
    let triggers: Vec<FunctionTrigger> =
        serde_json::from_str(&manifest).context("Failed to parse manifest JSON")?;
    let desired = expand_regions(project, &triggers);
    let filters = args
        .only
        .as_deref()
        .map(FilterGroup::parse_only)
        .unwrap_or_default();

    let http = HttpClient::new(config.token.clone()).context("Failed to create HTTP client")?;
    let api = Arc::new(HttpFunctionsApi::new(http, config.api_url.clone(), project.clone()));
    let mut release_config = ReleaseConfig::new(project.clone(), args.source_url);
    release_config.legacy_source_urls = args.legacy_source_url;
    release_config.poller.console_url = args.console_url;
    release_config.max_release_attempts = args.retry.saturating_add(1);

    let release = FunctionRelease::new(api, Arc::new(SystemClock), release_config);
    let report = release
        .run(desired, &filters)
        .await
        .context("Functions deploy failed")?;

    match config.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("Failed to serialize report")?
            );
        }
        OutputFormat::Text => {
            println!("Functions deploy finished.");
            println!();
            println!("  Succeeded:       {}", report.succeeded_count());
            println!("  Failed:          {}", report.failed_count());
            for success in &report.succeeded {
                if let Some(url) = &success.trigger_url {
                    println!("  Function URL ({}): {url}", success.target);
                }
            }
            if report.attempts > 1 {
                println!("  Attempts:        {}", report.attempts);
            }
            if report.abandoned {
                println!("  Some operations were not tracked; check the console for their status.");
            }
            for failure in &report.failed {
                println!("  ✖ {} ({}): {}", failure.target, failure.kind, failure.message);
            }
        }
    }

    if let Some(hint) = report.retry_hint() {
        anyhow::bail!(
            "{} function(s) failed to deploy. To try redeploying those functions, run: liftoff deploy functions {hint}",
            report.failed_count()
        );
    }
    Ok(())
}
