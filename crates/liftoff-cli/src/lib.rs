//! # liftoff-cli
//!
//! Command-line interface for liftoff deploys.
//!
//! ## Commands
//!
//! - `liftoff deploy hosting` - Upload a public directory into a hosting version
//! - `liftoff deploy functions` - Create, update and delete functions
//!
//! ## Configuration
//!
//! - `LIFTOFF_API_URL` - Functions API endpoint
//! - `LIFTOFF_HOSTING_URL` - Hosting API endpoint
//! - `LIFTOFF_PROJECT` - Project ID
//! - `LIFTOFF_TOKEN` - Bearer token sent with every request

#![forbid(unsafe_code)]
#![allow(clippy::print_stdout)]

pub mod commands;

use clap::{Parser, Subcommand};

/// liftoff - deployment execution engine.
#[derive(Debug, Parser)]
#[command(name = "liftoff")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Functions API URL.
    #[arg(long, env = "LIFTOFF_API_URL", default_value = "https://cloudfunctions.googleapis.com")]
    pub api_url: String,

    /// Hosting API URL.
    #[arg(long, env = "LIFTOFF_HOSTING_URL", default_value = "https://firebasehosting.googleapis.com")]
    pub hosting_url: String,

    /// Project ID.
    #[arg(long, env = "LIFTOFF_PROJECT")]
    pub project: Option<String>,

    /// Bearer token.
    #[arg(long, env = "LIFTOFF_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Output format.
    #[arg(long, default_value = "text")]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    #[must_use]
    pub fn config(&self) -> Config {
        Config {
            api_url: self.api_url.clone(),
            hosting_url: self.hosting_url.clone(),
            project: self.project.clone(),
            token: self.token.clone(),
            format: self.format.clone(),
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Deploy hosting content or functions.
    #[command(subcommand)]
    Deploy(DeployTarget),
}

#[derive(Debug, Subcommand)]
pub enum DeployTarget {
    /// Upload a public directory into a hosting version.
    Hosting(commands::hosting::HostingArgs),
    /// Reconcile functions with a manifest.
    Functions(commands::functions::FunctionsArgs),
}

#[derive(Debug, Clone, Default, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Settings shared by every command.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub api_url: String,
    pub hosting_url: String,
    pub project: Option<String>,
    pub token: Option<String>,
    pub format: OutputFormat,
}
