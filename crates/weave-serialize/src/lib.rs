//! Serialize/deserialize pipeline for weave values.
//!
//! [`SerializeContext::to_json`] and [`SerializeContext::from_json`] are the
//! single choke point between in-process [`Value`](weave_types::Value)s and
//! what the trace server stores.
//!
//! # Components
//!
//! - [`SerializerRegistry`] -- ordered save/load functions for custom values
//! - [`codec`] -- custom-object envelopes (files, inline data, load op)
//! - [`MemTraceFilesArtifact`] -- in-memory staging for serializer files
//! - [`CustomObjectCache`] -- per-project upload and decode caches
//! - [`OpCatalog`] -- in-process implementations of persisted ops
//! - [`fallback_encode`] -- lossy text for values nothing else handles

pub mod artifact;
pub mod cache;
pub mod catalog;
pub mod codec;
pub mod datetime;
pub mod error;
pub mod fallback;
pub mod json;
pub mod registry;

pub use artifact::MemTraceFilesArtifact;
pub use cache::CustomObjectCache;
pub use catalog::{op_digest, OpCatalog};
pub use codec::{CustomEnvelope, WeaveTypeDescriptor, CUSTOM_TYPE_TAG};
pub use error::{SerializeError, SerializeResult};
pub use fallback::{fallback_encode, FALLBACK_MAX_CHARS};
pub use json::{op_record, plain_json, SerializeContext, OP_TYPE_TAG};
pub use registry::{Serializer, SerializerRegistry, SerializerTarget};
