use chrono::{DateTime, Utc};
use weave_serialize::SerializeError;
use weave_server::ServerError;
use weave_types::TypeError;

/// Errors raised by trace proxies.
#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    #[error("key not found: {key:?}")]
    KeyNotFound { key: String },

    #[error("{class} has no attribute {name:?}")]
    AttributeNotFound { class: String, name: String },

    #[error("index {index} out of range for length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("no row with digest {digest:?}")]
    RowNotFound { digest: String },

    /// A write through a proxy that is not addressed by an object ref.
    #[error("invalid mutation: {0}")]
    InvalidMutation(String),

    /// A path segment was applied to a value that cannot take it.
    #[error("cannot apply {edge} {arg:?} to a {kind}")]
    NotAContainer {
        kind: &'static str,
        edge: String,
        arg: String,
    },

    #[error("server error: {0}")]
    Server(#[from] ServerError),

    #[error("serialize error: {0}")]
    Serialize(#[from] SerializeError),

    #[error("type error: {0}")]
    Type(#[from] TypeError),
}

impl TraceError {
    /// `true` if the lookup failed because the target was deleted.
    pub fn is_deleted(&self) -> bool {
        match self {
            Self::Server(e) => e.is_deleted(),
            Self::Serialize(e) => e.is_deleted(),
            _ => false,
        }
    }

    pub fn deleted_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Server(e) => e.deleted_at(),
            Self::Serialize(e) => e.deleted_at(),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            Self::KeyNotFound { .. }
            | Self::AttributeNotFound { .. }
            | Self::IndexOutOfRange { .. }
            | Self::RowNotFound { .. } => true,
            Self::Server(e) => e.is_not_found(),
            _ => false,
        }
    }
}

/// Result alias for trace operations.
pub type TraceResult<T> = Result<T, TraceError>;
