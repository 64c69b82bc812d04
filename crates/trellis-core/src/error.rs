//! Unified error system for the Trellis engine
//!
//! A single error type covers every operation the engine exposes.
//! Structural anomalies the engine recovers from internally (orphans,
//! duplicate notifications, sequence gaps) are *not* errors and never
//! appear here; only conditions a caller must react to do.

use serde::{Deserialize, Serialize};

/// Unified error type for all Trellis operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum TrellisError {
    /// Invalid input or configuration
    #[error("Invalid: {message}")]
    Invalid {
        /// Description of the invalid input
        message: String,
    },

    /// Resource not found
    #[error("Not found: {message}")]
    NotFound {
        /// Description of what was not found
        message: String,
    },

    /// Permission denied
    #[error("Permission denied: {message}")]
    PermissionDenied {
        /// Description of the permission issue
        message: String,
    },

    /// Network or transport error
    #[error("Network error: {message}")]
    Network {
        /// Description of the network issue
        message: String,
    },

    /// Serialization/deserialization error
    #[error("Serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure
        message: String,
    },

    /// Storage operation failed
    #[error("Storage error: {message}")]
    Storage {
        /// Description of the storage failure
        message: String,
    },

    /// A store mutation failed and local optimistic state was rolled
    /// back; the operation is safe to retry.
    #[error("Mutation failed: {message}")]
    MutationFailed {
        /// Description of the failed mutation
        message: String,
    },

    /// The one-time view budget for an ephemeral media item was already
    /// consumed (locally or by a concurrent device that won the race).
    #[error("View already consumed for {message_id}")]
    ViewAlreadyConsumed {
        /// The media message whose budget is spent
        message_id: crate::identifiers::MessageId,
    },

    /// The live forest can no longer be patched incrementally; the
    /// caller must run a full resync before further mutation.
    #[error("Resync required: {message}")]
    ResyncRequired {
        /// What invalidated the incremental stream
        message: String,
    },

    /// Internal engine error
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error
        message: String,
    },
}

impl TrellisError {
    /// Create an invalid input error
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Create a permission denied error
    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::PermissionDenied {
            message: message.into(),
        }
    }

    /// Create a network error
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Create a mutation failed error
    pub fn mutation_failed(message: impl Into<String>) -> Self {
        Self::MutationFailed {
            message: message.into(),
        }
    }

    /// Create a view already consumed error
    pub fn view_already_consumed(message_id: crate::identifiers::MessageId) -> Self {
        Self::ViewAlreadyConsumed { message_id }
    }

    /// Create a resync required error
    pub fn resync_required(message: impl Into<String>) -> Self {
        Self::ResyncRequired {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether the caller may simply retry the failed operation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network { .. } | Self::MutationFailed { .. } | Self::Storage { .. }
        )
    }
}

/// Standard Result type for Trellis operations
pub type Result<T> = std::result::Result<T, TrellisError>;
