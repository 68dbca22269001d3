use chrono::{DateTime, Utc};
use weave_server::ServerError;
use weave_types::TypeError;

/// Errors raised while converting values to or from their persisted form.
#[derive(Debug, thiserror::Error)]
pub enum SerializeError {
    #[error("server error: {0}")]
    Server(#[from] ServerError),

    #[error("type error: {0}")]
    Type(#[from] TypeError),

    /// A custom envelope names a serializer that is neither registered nor
    /// reachable through its load op.
    #[error("no serializer for weave type {weave_type:?}")]
    UnknownType { weave_type: String },

    /// A serializer's save or load function failed.
    #[error("serializer {serializer} failed: {message}")]
    Codec { serializer: String, message: String },

    /// A persisted record does not have the expected shape.
    #[error("invalid {kind} record: {reason}")]
    InvalidRecord { kind: &'static str, reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SerializeError {
    pub fn codec(serializer: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Codec {
            serializer: serializer.into(),
            message: err.to_string(),
        }
    }

    pub fn invalid(kind: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidRecord {
            kind,
            reason: reason.into(),
        }
    }

    pub fn is_deleted(&self) -> bool {
        matches!(self, Self::Server(e) if e.is_deleted())
    }

    pub fn deleted_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Server(e) => e.deleted_at(),
            _ => None,
        }
    }
}

/// Result alias for serialize operations.
pub type SerializeResult<T> = Result<T, SerializeError>;
