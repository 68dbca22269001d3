//! Foundation types for the weave trace client.
//!
//! Every other weave crate depends on `weave-types`.
//!
//! # Key Types
//!
//! - [`Ref`] — immutable address of an object version, table, or call, with
//!   an optional extra path ([`ObjectRef`], [`TableRef`], [`CallRef`])
//! - [`Value`] — the in-process value model that gets published and traced
//! - [`ObjectRecord`] — a flattened instance of a user-defined type
//! - [`Table`] — an in-memory row collection, persisted as a table
//! - [`CustomValue`] — an opaque Rust value persisted through a serializer
//! - [`Op`] — a persistable function with an explicit receiver slot
//! - [`ContentHasher`] — domain-separated BLAKE3 digests

pub mod custom;
pub mod digest;
pub mod error;
pub mod names;
pub mod op;
pub mod refs;
pub mod value;

pub use custom::CustomValue;
pub use digest::{ContentHasher, DigestKind, LATEST_DIGEST};
pub use error::{TypeError, TypeResult};
pub use names::{sanitize_object_name, split_project_id};
pub use op::{Op, OpArgs, OpBody, OpFailure, Receiver};
pub use refs::{
    is_ref_uri, parse_uri, CallRef, EdgeType, ObjectRef, Ref, RefSegment, TableRef, URI_PREFIX,
};
pub use value::{ObjectRecord, SavedRef, Table, Value, BASES_KEY, CLASS_NAME_KEY, TYPE_KEY};
