//! protomock: a filesystem-routed mock server whose responses are produced
//! by small sandboxed JavaScript programs.
//!
//! The directory tree under the mocks root is the routing table; each
//! matched request runs its script in a fresh, capability-free JavaScript
//! context and maps the returned object to an HTTP or RPC response.

pub mod config;
pub mod engine;
pub mod errors;
pub mod metrics;
pub mod model;
pub mod response;
pub mod routing;
pub mod scripting;
pub mod server;
pub mod watcher;

pub use engine::{MockEngine, ReloadSummary};
pub use errors::{translate, FailureKind, LoadError};
pub use model::{IncomingRequest, MockFailure, MockResponse, MockResult, Protocol, Status, Target};
