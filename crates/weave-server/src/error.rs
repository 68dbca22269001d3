use chrono::{DateTime, Utc};

/// Errors returned by a trace server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// No version of the object matches the requested digest.
    #[error("object not found: {project_id}/{object_id}:{digest}")]
    ObjectNotFound {
        project_id: String,
        object_id: String,
        digest: String,
    },

    /// The requested version exists but was deleted.
    #[error("object {project_id}/{object_id}:{digest} was deleted at {deleted_at}")]
    ObjectDeleted {
        project_id: String,
        object_id: String,
        digest: String,
        deleted_at: DateTime<Utc>,
    },

    #[error("table not found: {project_id}/{digest}")]
    TableNotFound { project_id: String, digest: String },

    #[error("file not found: {project_id}/{digest}")]
    FileNotFound { project_id: String, digest: String },

    #[error("call not found: {project_id}/{call_id}")]
    CallNotFound { project_id: String, call_id: String },

    /// A ref path could not be followed to a value.
    #[error("cannot resolve {uri}: {reason}")]
    RefNotResolvable { uri: String, reason: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    /// Network or transport failure in a remote backend.
    #[error("transport error: {0}")]
    Transport(String),
}

impl ServerError {
    /// `true` if the target was deleted, a terminal state not worth retrying.
    pub fn is_deleted(&self) -> bool {
        matches!(self, Self::ObjectDeleted { .. })
    }

    pub fn deleted_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::ObjectDeleted { deleted_at, .. } => Some(*deleted_at),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::ObjectNotFound { .. }
                | Self::TableNotFound { .. }
                | Self::FileNotFound { .. }
                | Self::CallNotFound { .. }
                | Self::RefNotResolvable { .. }
        )
    }
}

impl From<weave_types::TypeError> for ServerError {
    fn from(err: weave_types::TypeError) -> Self {
        Self::InvalidRequest(err.to_string())
    }
}

/// Result alias for server operations.
pub type ServerResult<T> = Result<T, ServerError>;
