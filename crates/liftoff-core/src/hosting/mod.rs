//! Hosting deploys: content-addressed file upload into a version.

pub mod config;
pub mod hasher;
pub mod uploader;

pub use config::UploaderConfig;
pub use uploader::{Stage, UploadProgress, UploadSummary, Uploader};
