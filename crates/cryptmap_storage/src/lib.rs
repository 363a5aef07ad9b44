//! # cryptmap storage
//!
//! Byte stores and block encryption underneath an encrypted file mapping.
//!
//! This crate provides the lowest layer of cryptmap: it knows how an
//! encrypted file is laid out on disk and how a single 4 KiB block is
//! encrypted, decrypted and authenticated. It knows nothing about pages,
//! barriers or mappings.
//!
//! ## Design Principles
//!
//! - Backends are simple random-access byte stores (read, write, sync)
//! - The IV table lives inside the file, interleaved with data blocks
//! - Every block read goes to the backend, so writes by another opener of
//!   the same file are observed without any coordination
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For testing and simulated multi-process setups
//! - [`FileBackend`] - For persistent storage using OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use cryptmap_storage::{EncryptionKey, InMemoryBackend, PageCryptor, BLOCK_SIZE};
//!
//! let backend = InMemoryBackend::new();
//! let cryptor = PageCryptor::new(&EncryptionKey::generate());
//!
//! cryptor.write(&backend, 0, &[7u8; BLOCK_SIZE]).unwrap();
//!
//! let mut out = vec![0u8; BLOCK_SIZE];
//! let (valid, _iv) = cryptor.read(&backend, 0, &mut out).unwrap();
//! assert_eq!(valid, BLOCK_SIZE);
//! assert_eq!(out, vec![7u8; BLOCK_SIZE]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod cryptor;
mod error;
mod file;
pub mod layout;
mod memory;

pub use backend::StorageBackend;
pub use cryptor::{EncryptionKey, PageCryptor, KEY_SIZE, NONCE_SIZE, TAG_SIZE};
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use layout::{IvEntry, BLOCK_SIZE, MIN_ENCRYPTED_FILE_SIZE};
pub use memory::InMemoryBackend;
