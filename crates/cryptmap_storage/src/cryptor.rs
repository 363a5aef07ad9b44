//! Block encryption using AES-256-GCM.
//!
//! ## Security Model
//!
//! - Every data block is encrypted independently with a fresh random nonce
//! - The nonce and authentication tag live in the IV table, so ciphertext
//!   blocks keep their plaintext size and stay block-aligned on disk
//! - The associated data binds each ciphertext to its block index and write
//!   counter; a block copied to another position or rolled back fails
//!   authentication
//! - Keys are never stored; they are zeroized when dropped

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use crate::layout::{self, IvEntry, BLOCK_SIZE, IV_ENTRY_SIZE};
use aes_gcm::{
    aead::{generic_array::GenericArray, AeadInPlace, KeyInit},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of the AES-256 key in bytes.
pub const KEY_SIZE: usize = 32;
/// Size of the GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;
/// Size of the GCM authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// Encryption key for AES-256-GCM.
///
/// The key is automatically zeroized when dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey {
    bytes: [u8; KEY_SIZE],
}

impl EncryptionKey {
    /// Generates a new random encryption key.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Creates a key from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes slice is not exactly 32 bytes.
    pub fn from_bytes(bytes: &[u8]) -> StorageResult<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(StorageError::Encryption(format!(
                "invalid key size: expected {KEY_SIZE}, got {}",
                bytes.len()
            )));
        }
        let mut key_bytes = [0u8; KEY_SIZE];
        key_bytes.copy_from_slice(bytes);
        Ok(Self { bytes: key_bytes })
    }

    /// Returns the key as a byte slice.
    ///
    /// # Security
    ///
    /// Be careful with this method - don't log or serialize the result.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Encrypts and decrypts data blocks of an encrypted file.
///
/// The cryptor is stateless apart from the cipher: every call goes to the
/// backend, so IVs written by another opener of the same file are always
/// observed.
pub struct PageCryptor {
    cipher: Aes256Gcm,
}

impl PageCryptor {
    /// Creates a cryptor for the given key.
    #[must_use]
    pub fn new(key: &EncryptionKey) -> Self {
        let cipher = Aes256Gcm::new(GenericArray::from_slice(key.as_bytes()));
        Self { cipher }
    }

    /// Reads the current on-disk IV entry of `block`.
    ///
    /// Blocks past the end of the file report the unwritten entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend read fails.
    pub fn read_iv(&self, backend: &dyn StorageBackend, block: u64) -> StorageResult<IvEntry> {
        let offset = layout::iv_entry_offset(block);
        if offset + IV_ENTRY_SIZE as u64 > backend.size()? {
            return Ok(IvEntry::default());
        }
        let bytes = backend.read_at(offset, IV_ENTRY_SIZE)?;
        Ok(IvEntry::decode(&bytes))
    }

    /// Decrypts `block` into `out`.
    ///
    /// Returns the number of valid plaintext bytes (zero for a block that was
    /// never written, in which case `out` is zero-filled) together with the IV
    /// entry the plaintext belongs to.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::DecryptionFailed`] if the ciphertext fails
    /// authentication or is missing, and I/O errors from the backend.
    ///
    /// # Panics
    ///
    /// Panics if `out` is not exactly one block long.
    pub fn read(
        &self,
        backend: &dyn StorageBackend,
        block: u64,
        out: &mut [u8],
    ) -> StorageResult<(usize, IvEntry)> {
        assert_eq!(out.len(), BLOCK_SIZE, "decrypt target must be one block");

        let iv = self.read_iv(backend, block)?;
        if iv.is_unwritten() {
            out.fill(0);
            return Ok((0, iv));
        }

        let ciphertext = match backend.read_at(layout::block_offset(block), BLOCK_SIZE) {
            Ok(data) => data,
            Err(StorageError::ReadPastEnd { .. }) => {
                return Err(StorageError::DecryptionFailed { block })
            }
            Err(e) => return Err(e),
        };
        out.copy_from_slice(&ciphertext);

        self.cipher
            .decrypt_in_place_detached(
                Nonce::from_slice(&iv.nonce),
                &associated_data(block, iv.counter),
                out,
                GenericArray::from_slice(&iv.tag),
            )
            .map_err(|_| StorageError::DecryptionFailed { block })?;

        Ok((BLOCK_SIZE, iv))
    }

    /// Encrypts `plaintext` as the new content of `block`.
    ///
    /// The ciphertext is written first, then the IV entry carrying the bumped
    /// write counter, a fresh nonce and the new tag.
    ///
    /// # Errors
    ///
    /// Returns an error if encryption or a backend write fails.
    ///
    /// # Panics
    ///
    /// Panics if `plaintext` is not exactly one block long.
    pub fn write(
        &self,
        backend: &dyn StorageBackend,
        block: u64,
        plaintext: &[u8],
    ) -> StorageResult<IvEntry> {
        assert_eq!(plaintext.len(), BLOCK_SIZE, "encrypt source must be one block");

        let previous = self.read_iv(backend, block)?;
        let counter = match previous.counter.wrapping_add(1) {
            0 => 1,
            c => c,
        };

        let mut nonce = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce);

        let mut buffer = plaintext.to_vec();
        let tag = self
            .cipher
            .encrypt_in_place_detached(
                Nonce::from_slice(&nonce),
                &associated_data(block, counter),
                &mut buffer,
            )
            .map_err(|_| StorageError::Encryption(format!("encryption of block {block} failed")))?;

        let mut tag_bytes = [0u8; TAG_SIZE];
        tag_bytes.copy_from_slice(&tag);
        let entry = IvEntry {
            counter,
            nonce,
            tag: tag_bytes,
        };

        backend.write_at(layout::block_offset(block), &buffer)?;
        backend.write_at(layout::iv_entry_offset(block), &entry.encode())?;

        Ok(entry)
    }
}

impl std::fmt::Debug for PageCryptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageCryptor")
            .field("cipher", &"Aes256Gcm")
            .finish()
    }
}

fn associated_data(block: u64, counter: u32) -> [u8; 12] {
    let mut aad = [0u8; 12];
    aad[..8].copy_from_slice(&block.to_le_bytes());
    aad[8..].copy_from_slice(&counter.to_le_bytes());
    aad
}
