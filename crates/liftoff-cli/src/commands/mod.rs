//! CLI command implementations.

pub mod functions;
pub mod hosting;
