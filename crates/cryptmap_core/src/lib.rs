//! # cryptmap core
//!
//! Page-granular, transparently encrypted file mappings.
//!
//! This crate provides:
//! - [`SharedFile`] - one opened encrypted file and its mutex
//! - [`EncryptedFileMapping`] - a window of that file, decrypted page by page
//! - [`PageState`] - the per-page state machine driven by the barriers
//! - [`ChunkMap`] - skip bits that keep flush and reclaim proportional to work
//!
//! ## Barrier protocol
//!
//! Memory of a window is only valid between barriers:
//!
//! 1. `read_barrier` decrypts what the caller is about to read, or opens it
//!    for writing with `to_modify`;
//! 2. the caller reads or writes plaintext;
//! 3. `write_barrier` marks modified pages `Dirty`;
//! 4. `flush` encrypts dirty pages, `sync` makes them durable.
//!
//! When another process commits, `mark_pages_for_iv_check` arranges for each
//! cached page to be compared against the on-disk IVs on its next access.
//! `reclaim_untouched` releases plaintext that nobody touched for a while.
//!
//! ## Example
//!
//! ```rust
//! use cryptmap_core::{EncryptedFileMapping, MappingConfig, SharedFile};
//! use cryptmap_storage::{EncryptionKey, InMemoryBackend};
//! use std::sync::Arc;
//!
//! let file = SharedFile::open(Arc::new(InMemoryBackend::new()), &EncryptionKey::generate())?;
//! let base = 0x1000_0000;
//! let mut window =
//!     EncryptedFileMapping::new(Arc::clone(&file), MappingConfig::default(), 0, base, 2 * 4096)?;
//!
//! let lock = file.lock();
//! window.read_barrier(&lock, base + 10, 5, None, true)?;
//! window.write_bytes(base + 10, b"hello");
//! window.write_barrier(base + 10, 5);
//! window.flush(&lock);
//!
//! let mut out = [0u8; 5];
//! window.read_bytes(base + 10, &mut out);
//! assert_eq!(&out, b"hello");
//! # Ok::<(), cryptmap_core::CoreError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod chunk;
mod config;
mod error;
mod mapping;
mod observer;
mod page_state;
mod shared;
mod stats;

pub use chunk::{chunk_of, first_page_of, ChunkMap, PAGES_PER_CHUNK, PAGE_TO_CHUNK_SHIFT};
pub use config::{AccessMode, MappingConfig};
pub use error::{CoreError, CoreResult};
pub use mapping::{EncryptedFileMapping, HeaderToSize, DECRYPT_RETRY_LIMIT};
pub use observer::{WriteMarker, WriteObserver};
pub use page_state::PageState;
pub use shared::{FileLock, SharedFile};
pub use stats::{MappingStats, StatsSnapshot};
