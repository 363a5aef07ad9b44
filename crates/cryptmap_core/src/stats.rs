//! Per-file mapping statistics.
//!
//! Counters are shared by every mapping of one [`crate::SharedFile`] and are
//! diagnostics only; no decision in the barrier protocol reads them.

use std::sync::atomic::{AtomicU64, Ordering};

/// Mapping statistics for one shared file.
///
/// All counters are atomic, monotonically increasing, and can be read while
/// operations are in progress.
#[derive(Debug, Default)]
pub struct MappingStats {
    /// Pages decrypted into process memory.
    pages_decrypted: AtomicU64,
    /// Pages encrypted and written by flush.
    pages_encrypted: AtomicU64,
    /// Decrypted pages released by the reclaimer.
    pages_reclaimed: AtomicU64,
    /// On-disk IV comparisons performed for stale pages.
    iv_checks: AtomicU64,
    /// IV comparisons that found the page changed by another process.
    iv_mismatches: AtomicU64,
    /// Durable syncs performed.
    syncs: AtomicU64,
    /// Block reads retried because another process was mid-write.
    decrypt_retries: AtomicU64,
}

impl MappingStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_decrypt(&self) {
        self.pages_decrypted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_encrypt(&self) {
        self.pages_encrypted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_reclaim(&self, pages: u64) {
        self.pages_reclaimed.fetch_add(pages, Ordering::Relaxed);
    }

    pub(crate) fn record_iv_check(&self, changed: bool) {
        self.iv_checks.fetch_add(1, Ordering::Relaxed);
        if changed {
            self.iv_mismatches.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_sync(&self) {
        self.syncs.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_decrypt_retry(&self) {
        self.decrypt_retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of pages decrypted.
    pub fn pages_decrypted(&self) -> u64 {
        self.pages_decrypted.load(Ordering::Relaxed)
    }

    /// Returns the number of pages encrypted.
    pub fn pages_encrypted(&self) -> u64 {
        self.pages_encrypted.load(Ordering::Relaxed)
    }

    /// Returns the number of pages reclaimed.
    pub fn pages_reclaimed(&self) -> u64 {
        self.pages_reclaimed.load(Ordering::Relaxed)
    }

    /// Returns the number of IV checks.
    pub fn iv_checks(&self) -> u64 {
        self.iv_checks.load(Ordering::Relaxed)
    }

    /// Returns the number of IV checks that detected a foreign write.
    pub fn iv_mismatches(&self) -> u64 {
        self.iv_mismatches.load(Ordering::Relaxed)
    }

    /// Returns the number of syncs.
    pub fn syncs(&self) -> u64 {
        self.syncs.load(Ordering::Relaxed)
    }

    /// Returns the number of retried block reads.
    pub fn decrypt_retries(&self) -> u64 {
        self.decrypt_retries.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of all stats.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            pages_decrypted: self.pages_decrypted(),
            pages_encrypted: self.pages_encrypted(),
            pages_reclaimed: self.pages_reclaimed(),
            iv_checks: self.iv_checks(),
            iv_mismatches: self.iv_mismatches(),
            syncs: self.syncs(),
            decrypt_retries: self.decrypt_retries(),
        }
    }
}

/// A point-in-time snapshot of mapping statistics.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Pages decrypted into process memory.
    pub pages_decrypted: u64,
    /// Pages encrypted and written by flush.
    pub pages_encrypted: u64,
    /// Decrypted pages released by the reclaimer.
    pub pages_reclaimed: u64,
    /// On-disk IV comparisons performed.
    pub iv_checks: u64,
    /// IV comparisons that found a change.
    pub iv_mismatches: u64,
    /// Durable syncs performed.
    pub syncs: u64,
    /// Retried block reads.
    pub decrypt_retries: u64,
}
