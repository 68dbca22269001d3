//! Live views of persisted values and the in-process call tree.
//!
//! A fetched value is wrapped by [`make_trace_obj`] into a [`TraceValue`]
//! that remembers the ref it came from. Reading a field, key, index or row
//! yields another proxy whose ref is one path segment longer, so anything
//! reached this way can be addressed again later.
//!
//! # Components
//!
//! - [`proxy`] -- `TraceObject`, `TraceList`, `TraceDict`, `TraceScalar` and ref resolution
//! - [`table`] -- `TraceTable`, a lazily paged table view with an LRU page cache
//! - [`mutation`] -- local writes recorded against a proxy root
//! - [`call`] -- shared, mutable call records
//! - [`context`] -- the task-local call stack
//!
//! # Design Rules
//!
//! 1. Proxies never hand out raw nested values; every child carries a ref.
//! 2. Dereferencing an object ref starts a new root.
//! 3. Writes require an object ref and are applied locally at once.
//! 4. Call-stack bookkeeping never fails the traced code.
//! 5. Only scoped tasks carry a call stack; nothing is shared between tasks.

pub mod call;
pub mod context;
pub mod error;
pub mod mutation;
pub mod proxy;
pub mod table;

pub use call::{generate_id, Call, CallData};
pub use context::{
    current_call, current_stack, in_scope, pop_call, push_call, scoped, spawn, sync_with_run_stack,
    with_run_stack, CallStack,
};
pub use error::{TraceError, TraceResult};
pub use mutation::{Mutation, TraceRoot};
pub use proxy::{
    deref_object, make_trace_obj, TraceBackend, TraceDict, TraceInput, TraceList, TraceObject,
    TraceScalar, TraceValue, DEFAULT_TABLE_CACHE_PAGES, DEFAULT_TABLE_PAGE_SIZE,
};
pub use table::TraceTable;
