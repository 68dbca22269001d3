//! Trace server interface for the weave client.
//!
//! The client core talks to persistence exclusively through the
//! [`TraceServer`] trait. Requests and responses are plain serde records in
//! [`types`], so a remote transport can ship them as JSON unchanged.
//!
//! # Backends
//!
//! - [`InMemoryTraceServer`] -- `HashMap`-based server for tests and embedding
//!
//! # Design Rules
//!
//! 1. Objects, tables, rows and files are content-addressed.
//! 2. `latest` and `v<N>` digests are resolved server-side.
//! 3. Deletion is soft: a deleted version reports when it was deleted.
//! 4. Errors are propagated unchanged to the caller.

pub mod error;
pub mod memory;
pub mod traits;
pub mod types;

pub use error::{ServerError, ServerResult};
pub use memory::{InMemoryTraceServer, ServerStats, StatsSnapshot};
pub use traits::TraceServer;
pub use types::*;
