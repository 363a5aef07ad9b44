//! Storage backend trait definition.

use crate::error::StorageResult;

/// A low-level random-access byte store holding an encrypted file image.
///
/// Backends are **opaque byte stores**. They know nothing about IV tables,
/// blocks or pages; [`crate::PageCryptor`] owns all layout interpretation.
///
/// Every method takes `&self`: backends lock internally, so one backend can be
/// shared (through an `Arc`) by several independent openers of the same file.
/// Each opener plays the role of a separate process.
///
/// # Invariants
///
/// - `read_at` returns exactly the bytes last written at that range
/// - `write_at` past the current end extends the store, zero-filling any gap
/// - `sync` makes every completed `write_at` durable
///
/// # Implementors
///
/// - [`super::InMemoryBackend`] - For testing
/// - [`super::FileBackend`] - For persistent storage
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The read would extend beyond the current size
    /// - An I/O error occurs
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Writes `data` at `offset`, growing the store if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn write_at(&self, offset: u64, data: &[u8]) -> StorageResult<()>;

    /// Pushes buffered writes to the operating system.
    ///
    /// Written data is visible to other openers of the same file after this
    /// returns, but is not necessarily durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush operation fails.
    fn flush(&self) -> StorageResult<()>;

    /// Returns the current size of the storage in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Syncs all data and metadata to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync operation fails.
    fn sync(&self) -> StorageResult<()>;

    /// Sets the size of the storage, truncating or zero-extending.
    ///
    /// # Errors
    ///
    /// Returns an error if the resize fails.
    fn set_len(&self, new_size: u64) -> StorageResult<()>;
}
