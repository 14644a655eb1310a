//! liftoff CLI entry point.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use liftoff_cli::{Cli, Commands, DeployTarget};

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.config();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        match cli.command {
            Commands::Deploy(DeployTarget::Hosting(args)) => {
                liftoff_cli::commands::hosting::execute(args, &config).await
            }
            Commands::Deploy(DeployTarget::Functions(args)) => {
                liftoff_cli::commands::functions::execute(args, &config).await
            }
        }
    })
}
