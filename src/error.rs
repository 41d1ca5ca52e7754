//! Crate-level error type.

use crate::backend::BackendError;

/// Result type for fabric operations.
pub type Result<T> = std::result::Result<T, FabricError>;

/// Errors surfaced by reconcile, publish and consume operations.
#[derive(Debug, thiserror::Error)]
pub enum FabricError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("Policy on queue '{queue}' is malformed: {message}")]
    Policy { queue: String, message: String },

    #[error("Failed to encode envelope: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("No handler registered for channel '{0}'")]
    HandlerNotRegistered(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl FabricError {
    /// True when the underlying backend reported a missing resource.
    pub fn is_not_found(&self) -> bool {
        matches!(self, FabricError::Backend(BackendError::NotFound { .. }))
    }
}
