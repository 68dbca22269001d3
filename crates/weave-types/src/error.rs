use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("malformed ref uri {uri:?}: {reason}")]
    MalformedUri { uri: String, reason: String },

    #[error("invalid ref component {component}: {reason}")]
    InvalidComponent { component: &'static str, reason: String },

    #[error("invalid object name {name:?}: {reason}")]
    InvalidName { name: String, reason: String },

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl TypeError {
    pub(crate) fn malformed(uri: &str, reason: impl Into<String>) -> Self {
        Self::MalformedUri {
            uri: uri.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result alias for type operations.
pub type TypeResult<T> = Result<T, TypeError>;
