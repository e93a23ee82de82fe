//! Error types for amem-core.

use thiserror::Error;

use crate::memory::NoteId;

/// Result type alias using amem-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during memory operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Operation referenced a note that does not exist
    #[error("Note not found: {id}")]
    NotFound { id: NoteId },

    /// An external collaborator exceeded its deadline
    #[error("{collaborator} timed out after {duration_ms}ms")]
    CollaboratorTimeout {
        collaborator: String,
        duration_ms: u64,
    },

    /// An external collaborator returned an error or malformed response
    #[error("{collaborator} error: {message}")]
    Collaborator {
        collaborator: String,
        message: String,
    },

    /// Note store error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Caller supplied an invalid value
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a not-found error.
    pub fn not_found(id: NoteId) -> Self {
        Self::NotFound { id }
    }

    /// Create a collaborator timeout error.
    pub fn collaborator_timeout(collaborator: impl Into<String>, duration_ms: u64) -> Self {
        Self::CollaboratorTimeout {
            collaborator: collaborator.into(),
            duration_ms,
        }
    }

    /// Create a collaborator error.
    pub fn collaborator(collaborator: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Collaborator {
            collaborator: collaborator.into(),
            message: message.into(),
        }
    }

    /// Whether a retry could succeed. Only collaborator failures qualify.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::CollaboratorTimeout { .. } | Self::Collaborator { .. }
        )
    }

    /// Whether this is a not-found error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Self::Storage(e.to_string())
    }
}
