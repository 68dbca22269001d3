use chrono::{DateTime, Utc};
use thiserror::Error;
use weave_serialize::SerializeError;
use weave_server::ServerError;
use weave_trace::TraceError;
use weave_types::{OpFailure, TypeError};

/// Errors raised by the weave client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Publishing a custom value no serializer accepts.
    #[error("no serializer registered for {type_name}; cannot publish it")]
    NotPersistable { type_name: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The traced op body failed. The call was still finished and recorded.
    #[error("op failed: {0}")]
    OpFailed(#[from] OpFailure),

    #[error("config error: {0}")]
    Config(String),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("server error: {0}")]
    Server(#[from] ServerError),

    #[error("serialize error: {0}")]
    Serialize(#[from] SerializeError),

    #[error("trace error: {0}")]
    Trace(#[from] TraceError),

    #[error("type error: {0}")]
    Type(#[from] TypeError),
}

impl ClientError {
    /// `true` if the target was deleted. Deletion is terminal; retrying
    /// will not help.
    pub fn is_deleted(&self) -> bool {
        match self {
            Self::Server(e) => e.is_deleted(),
            Self::Serialize(e) => e.is_deleted(),
            Self::Trace(e) => e.is_deleted(),
            _ => false,
        }
    }

    pub fn deleted_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Server(e) => e.deleted_at(),
            Self::Serialize(e) => e.deleted_at(),
            Self::Trace(e) => e.deleted_at(),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Server(e) => e.is_not_found(),
            Self::Trace(e) => e.is_not_found(),
            _ => false,
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;
