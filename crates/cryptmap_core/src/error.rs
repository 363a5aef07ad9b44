//! Error types for cryptmap core.
//!
//! Only conditions an application can act on are errors. Broken barrier
//! protocol usage (an address outside the window, a write barrier on a page
//! that was never opened for writing, a lock from another file) is an engine
//! bug and panics instead.

use cryptmap_storage::StorageError;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in cryptmap core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A non-empty page failed authentication while being decrypted.
    ///
    /// Signals a corrupted file or a wrong key. Retrying will not help.
    #[error("decryption failed for page {page}: {message}")]
    DecryptionFailed {
        /// Global (file-relative) index of the page.
        page: usize,
        /// Description of the failure.
        message: String,
    },

    /// Mapping configuration is invalid.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the problem.
        message: String,
    },
}

impl CoreError {
    /// Creates a decryption failed error.
    pub fn decryption_failed(page: usize, message: impl Into<String>) -> Self {
        Self::DecryptionFailed {
            page,
            message: message.into(),
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Returns true if this error reports unreadable encrypted data.
    #[must_use]
    pub fn is_decryption_failure(&self) -> bool {
        matches!(
            self,
            Self::DecryptionFailed { .. }
                | Self::Storage(StorageError::DecryptionFailed { .. })
                | Self::Storage(StorageError::NotEncrypted { .. })
        )
    }
}
