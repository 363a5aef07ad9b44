//! On-disk layout of an encrypted file.
//!
//! The file is a sequence of 4 KiB blocks. Every run of
//! [`BLOCKS_PER_METADATA_BLOCK`] data blocks is preceded by one metadata block
//! holding the IV table entries for those data blocks:
//!
//! ```text
//! | meta 0 | data 0 | data 1 | ... | data 127 | meta 1 | data 128 | ...
//! ```
//!
//! An IV entry is 32 bytes, little-endian:
//!
//! ```text
//! counter (4) || nonce (12) || tag (16)
//! ```
//!
//! A counter of zero marks a block that has never been written.

use crate::cryptor::{NONCE_SIZE, TAG_SIZE};
use crate::error::{StorageError, StorageResult};

/// Size of one encryption block in bytes.
pub const BLOCK_SIZE: usize = 4096;

/// Size of one encoded IV table entry.
pub const IV_ENTRY_SIZE: usize = 4 + NONCE_SIZE + TAG_SIZE;

/// Number of data blocks described by one metadata block.
pub const BLOCKS_PER_METADATA_BLOCK: u64 = (BLOCK_SIZE / IV_ENTRY_SIZE) as u64;

/// Smallest non-empty encrypted file: one metadata block plus one data block.
pub const MIN_ENCRYPTED_FILE_SIZE: u64 = 8192;

const GROUP_SIZE: u64 = (BLOCKS_PER_METADATA_BLOCK + 1) * BLOCK_SIZE as u64;

/// The IV table entry of one data block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IvEntry {
    /// Write counter, bumped on every encryption of the block. Zero means unwritten.
    pub counter: u32,
    /// GCM nonce used for the current ciphertext.
    pub nonce: [u8; NONCE_SIZE],
    /// GCM authentication tag of the current ciphertext.
    pub tag: [u8; TAG_SIZE],
}

impl IvEntry {
    /// Returns true if the block has never been written.
    #[must_use]
    pub fn is_unwritten(&self) -> bool {
        self.counter == 0
    }

    /// Encodes the entry into its on-disk form.
    #[must_use]
    pub fn encode(&self) -> [u8; IV_ENTRY_SIZE] {
        let mut out = [0u8; IV_ENTRY_SIZE];
        out[..4].copy_from_slice(&self.counter.to_le_bytes());
        out[4..4 + NONCE_SIZE].copy_from_slice(&self.nonce);
        out[4 + NONCE_SIZE..].copy_from_slice(&self.tag);
        out
    }

    /// Decodes an entry from its on-disk form.
    ///
    /// # Panics
    ///
    /// Panics if `bytes` is shorter than [`IV_ENTRY_SIZE`].
    #[must_use]
    pub fn decode(bytes: &[u8]) -> Self {
        let mut counter = [0u8; 4];
        counter.copy_from_slice(&bytes[..4]);
        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&bytes[4..4 + NONCE_SIZE]);
        let mut tag = [0u8; TAG_SIZE];
        tag.copy_from_slice(&bytes[4 + NONCE_SIZE..IV_ENTRY_SIZE]);
        Self {
            counter: u32::from_le_bytes(counter),
            nonce,
            tag,
        }
    }
}

/// Physical offset of the IV entry describing data block `block`.
#[must_use]
pub fn iv_entry_offset(block: u64) -> u64 {
    let group = block / BLOCKS_PER_METADATA_BLOCK;
    let slot = block % BLOCKS_PER_METADATA_BLOCK;
    group * GROUP_SIZE + slot * IV_ENTRY_SIZE as u64
}

/// Physical offset of data block `block`.
#[must_use]
pub fn block_offset(block: u64) -> u64 {
    let group = block / BLOCKS_PER_METADATA_BLOCK;
    let slot = block % BLOCKS_PER_METADATA_BLOCK;
    group * GROUP_SIZE + (slot + 1) * BLOCK_SIZE as u64
}

/// Physical size needed to hold `data_size` bytes of plaintext.
#[must_use]
pub fn data_size_to_encrypted_size(data_size: u64) -> u64 {
    let blocks = data_size.div_ceil(BLOCK_SIZE as u64);
    if blocks == 0 {
        return 0;
    }
    let groups = blocks.div_ceil(BLOCKS_PER_METADATA_BLOCK);
    (blocks + groups) * BLOCK_SIZE as u64
}

/// Plaintext capacity of a physical file of `size` bytes.
///
/// Files below [`MIN_ENCRYPTED_FILE_SIZE`] hold no data.
#[must_use]
pub fn encrypted_size_to_data_size(size: u64) -> u64 {
    if size < MIN_ENCRYPTED_FILE_SIZE {
        return 0;
    }
    let full_groups = size / GROUP_SIZE;
    let rest = size % GROUP_SIZE;
    let rest_blocks = (rest / BLOCK_SIZE as u64).saturating_sub(1);
    (full_groups * BLOCKS_PER_METADATA_BLOCK + rest_blocks) * BLOCK_SIZE as u64
}

/// Rejects files that are non-empty yet too small to be encrypted.
///
/// # Errors
///
/// Returns [`StorageError::NotEncrypted`] for sizes in `1..MIN_ENCRYPTED_FILE_SIZE`.
pub fn check_encrypted_size(size: u64) -> StorageResult<()> {
    if size > 0 && size < MIN_ENCRYPTED_FILE_SIZE {
        return Err(StorageError::NotEncrypted { size });
    }
    Ok(())
}
