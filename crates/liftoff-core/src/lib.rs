//! liftoff-core
//!
//! Deployment execution engine: uploads hosting content and reconciles
//! functions against a backend.
//!
//! # Modules
//! - **queue**: bounded-concurrency task queue with retry/backoff
//! - **domain**: files, functions, operations, deploy reports
//! - **ports**: backend seams (HostingApi, FunctionsApi, Clock)
//! - **impls**: HTTP and in-memory implementations of the ports
//! - **hashcache**: on-disk `path,mtime,hash` cache
//! - **hosting**: hash → populate → upload pipeline
//! - **functions**: filters, reconciler, operation poller, release
//! - **error**: DeployError / QueueError

pub mod domain;
pub mod error;
pub mod functions;
pub mod hashcache;
pub mod hosting;
pub mod impls;
pub mod ports;
pub mod queue;

pub use error::{DeployError, QueueError};
