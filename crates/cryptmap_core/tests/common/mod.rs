//! Helpers shared by the integration tests.

#![allow(dead_code)]

use cryptmap_core::{EncryptedFileMapping, FileLock, MappingConfig, SharedFile};
use cryptmap_storage::{EncryptionKey, InMemoryBackend, StorageBackend};
use std::sync::{Arc, Once};

/// Base address handed to test windows.
pub const BASE: usize = 0x7f00_0000_0000;
/// Default page size.
pub const PAGE: usize = 4096;

static TRACING: Once = Once::new();

/// Routes `tracing` output to the test harness; filter with `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// One backend opened twice with the same key, as two processes would.
pub struct TwoProcesses {
    pub backend: Arc<InMemoryBackend>,
    pub first: Arc<SharedFile>,
    pub second: Arc<SharedFile>,
}

impl TwoProcesses {
    pub fn new() -> Self {
        init_tracing();
        let key = EncryptionKey::generate();
        let backend = Arc::new(InMemoryBackend::new());
        let shared: Arc<dyn StorageBackend> = backend.clone();
        Self {
            first: SharedFile::open(Arc::clone(&shared), &key).unwrap(),
            second: SharedFile::open(shared, &key).unwrap(),
            backend,
        }
    }
}

/// Opens a fresh in-memory file.
pub fn open_file() -> Arc<SharedFile> {
    init_tracing();
    SharedFile::open(Arc::new(InMemoryBackend::new()), &EncryptionKey::generate()).unwrap()
}

/// Maps `pages` default-sized pages of `file` from offset zero.
pub fn window(file: &Arc<SharedFile>, pages: usize) -> EncryptedFileMapping {
    EncryptedFileMapping::new(Arc::clone(file), MappingConfig::default(), 0, BASE, pages * PAGE)
        .unwrap()
}

/// Writes `data` at `addr` through the full barrier protocol and flushes.
pub fn commit(m: &mut EncryptedFileMapping, lock: &FileLock<'_>, addr: usize, data: &[u8]) {
    m.read_barrier(lock, addr, data.len(), None, true).unwrap();
    m.write_bytes(addr, data);
    m.write_barrier(addr, data.len());
    m.flush(lock);
}

/// Reads `len` bytes at `addr` after a read barrier.
pub fn fetch(m: &mut EncryptedFileMapping, lock: &FileLock<'_>, addr: usize, len: usize) -> Vec<u8> {
    m.read_barrier(lock, addr, len, None, false).unwrap();
    let mut out = vec![0u8; len];
    m.read_bytes(addr, &mut out);
    out
}
