//! Functions deploys.
//!
//! - `filter`: `--only` selectors
//! - `reconciler`: what to create, update and delete
//! - `poller`: wait for submitted operations
//! - `release`: the whole flow, producing a [`DeployReport`](crate::domain::DeployReport)

pub mod filter;
pub mod poller;
pub mod reconciler;
pub mod release;

pub use filter::FilterGroup;
pub use poller::{OperationPoller, PollerConfig};
pub use reconciler::{FunctionDiff, Ownership, ReleasePlan, plan};
pub use release::{FunctionRelease, ReleaseConfig};
