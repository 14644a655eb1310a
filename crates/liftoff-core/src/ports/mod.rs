//! Ports: the seams between the deploy engine and the outside world.
//!
//! The engine only talks to backends through these traits. `impls` provides
//! HTTP implementations and in-memory ones for tests.

pub mod clock;
pub mod functions_api;
pub mod hosting_api;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::functions_api::FunctionsApi;
pub use self::hosting_api::{HostingApi, PopulateFilesResponse};
