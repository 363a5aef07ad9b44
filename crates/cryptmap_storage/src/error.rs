//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attempted to read beyond the end of storage.
    #[error("read beyond end of storage: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// The requested read offset.
        offset: u64,
        /// The requested read length.
        len: usize,
        /// The current storage size.
        size: u64,
    },

    /// A block failed its authentication check.
    ///
    /// Signals corruption or a key mismatch, never a transient condition.
    #[error("decryption failed for block {block}")]
    DecryptionFailed {
        /// Index of the data block (file-relative).
        block: u64,
    },

    /// The file is non-empty but too small to hold encrypted data.
    #[error("file of {size} bytes is too small to be an encrypted file")]
    NotEncrypted {
        /// Physical size of the file.
        size: u64,
    },

    /// Encryption failed.
    #[error("encryption error: {0}")]
    Encryption(String),
}
