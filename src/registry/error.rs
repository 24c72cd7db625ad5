//! Registry error types

/// Error type for registry operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Start request is missing or has malformed fields
    #[error("Invalid stream request: {message}")]
    Validation {
        /// Stream id, when one was supplied
        id: Option<String>,
        /// What is wrong with the request
        message: String,
    },

    /// The transcoder could not be launched
    #[error("Failed to start transcoder for {id}: {cause}")]
    Start {
        /// Stream id
        id: String,
        /// Underlying spawn failure
        cause: String,
    },
}

impl RegistryError {
    /// Stream id the error refers to, if known
    pub fn id(&self) -> Option<&str> {
        match self {
            RegistryError::Validation { id, .. } => id.as_deref(),
            RegistryError::Start { id, .. } => Some(id),
        }
    }
}
