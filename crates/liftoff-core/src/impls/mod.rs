//! Implementations of the ports.
//!
//! - `http_*`: REST backends over reqwest
//! - `inmem_*`: in-memory backends for tests

pub mod http;
pub mod http_functions;
pub mod http_hosting;
pub mod inmem_functions;
pub mod inmem_hosting;

pub use self::http::HttpClient;
pub use self::http_functions::HttpFunctionsApi;
pub use self::http_hosting::HttpHostingApi;
pub use self::inmem_functions::{InMemoryFunctionsApi, ScriptedOutcome};
pub use self::inmem_hosting::InMemoryHostingApi;
