//! Per-file state shared by every mapping of one opened file.
//!
//! The cryptor and every access to the ciphertext image sit behind a single
//! mutex. Mapping operations that reach the shared image take a [`FileLock`],
//! so "called with the file mutex held" is checked by the compiler instead of
//! by a comment.

use crate::error::CoreResult;
use crate::stats::MappingStats;
use cryptmap_storage::{
    layout, EncryptionKey, IvEntry, PageCryptor, StorageBackend, StorageResult,
};
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;
use tracing::debug;

/// One opened encrypted file, as seen by one process.
///
/// Opening the same backend twice yields two independent `SharedFile`s that
/// only meet through the ciphertext image, exactly like two processes.
pub struct SharedFile {
    backend: Arc<dyn StorageBackend>,
    state: Mutex<FileState>,
    stats: MappingStats,
}

struct FileState {
    cryptor: PageCryptor,
}

impl SharedFile {
    /// Opens an encrypted file image.
    ///
    /// # Errors
    ///
    /// Returns a decryption failure if the file is non-empty but smaller than
    /// [`cryptmap_storage::MIN_ENCRYPTED_FILE_SIZE`], and backend errors.
    pub fn open(backend: Arc<dyn StorageBackend>, key: &EncryptionKey) -> CoreResult<Arc<Self>> {
        let size = backend.size()?;
        layout::check_encrypted_size(size)?;
        debug!(size, "opened encrypted file");

        Ok(Arc::new(Self {
            backend,
            state: Mutex::new(FileState {
                cryptor: PageCryptor::new(key),
            }),
            stats: MappingStats::new(),
        }))
    }

    /// Acquires the file mutex.
    pub fn lock(&self) -> FileLock<'_> {
        FileLock {
            file: self,
            state: self.state.lock(),
        }
    }

    /// Returns the statistics shared by all mappings of this file.
    pub fn stats(&self) -> &MappingStats {
        &self.stats
    }

    /// Returns the plaintext capacity of the current file image.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend size cannot be read.
    pub fn data_size(&self) -> CoreResult<u64> {
        Ok(layout::encrypted_size_to_data_size(self.backend.size()?))
    }
}

impl std::fmt::Debug for SharedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedFile")
            .field("stats", &self.stats.snapshot())
            .finish_non_exhaustive()
    }
}

/// Proof that the caller holds the mutex of one [`SharedFile`].
pub struct FileLock<'a> {
    file: &'a SharedFile,
    state: MutexGuard<'a, FileState>,
}

impl FileLock<'_> {
    /// Returns true if this lock guards `file`.
    #[must_use]
    pub fn guards(&self, file: &SharedFile) -> bool {
        std::ptr::eq(self.file, file)
    }

    /// Returns the statistics of the locked file.
    pub fn stats(&self) -> &MappingStats {
        &self.file.stats
    }

    pub(crate) fn read_iv(&self, block: u64) -> StorageResult<IvEntry> {
        self.state.cryptor.read_iv(self.file.backend.as_ref(), block)
    }

    pub(crate) fn read_block(&self, block: u64, out: &mut [u8]) -> StorageResult<(usize, IvEntry)> {
        self.state.cryptor.read(self.file.backend.as_ref(), block, out)
    }

    pub(crate) fn write_block(&self, block: u64, plaintext: &[u8]) -> StorageResult<IvEntry> {
        self.state
            .cryptor
            .write(self.file.backend.as_ref(), block, plaintext)
    }

    pub(crate) fn sync(&self) -> StorageResult<()> {
        self.file.backend.flush()?;
        self.file.backend.sync()
    }
}
