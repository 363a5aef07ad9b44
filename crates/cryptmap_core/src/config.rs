//! Mapping configuration.

use crate::error::{CoreError, CoreResult};
use cryptmap_storage::BLOCK_SIZE;

/// Whether a mapping may be opened for modification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Pages may only be read.
    ReadOnly,
    /// Pages may be opened for writing through `read_barrier(.., to_modify = true)`.
    ReadWrite,
}

/// Configuration for an encrypted file mapping.
#[derive(Debug, Clone, Copy)]
pub struct MappingConfig {
    /// Size of a mapping page in bytes.
    ///
    /// Must be a power of two and a multiple of the 4 KiB encryption block.
    pub page_size: usize,

    /// Access mode of the mapping.
    pub access: AccessMode,

    /// Maximum number of pages one `reclaim_untouched` call visits.
    ///
    /// Pages inside skipped chunks do not count.
    pub reclaim_scan_limit: usize,
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            page_size: BLOCK_SIZE,
            access: AccessMode::ReadWrite,
            reclaim_scan_limit: 4096,
        }
    }
}

impl MappingConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the page size.
    #[must_use]
    pub const fn page_size(mut self, size: usize) -> Self {
        self.page_size = size;
        self
    }

    /// Sets the access mode.
    #[must_use]
    pub const fn access(mut self, access: AccessMode) -> Self {
        self.access = access;
        self
    }

    /// Sets the per-call reclaim scan limit.
    #[must_use]
    pub const fn reclaim_scan_limit(mut self, pages: usize) -> Self {
        self.reclaim_scan_limit = pages;
        self
    }

    /// Checks that the configuration describes a usable mapping.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] if the page size is not a power of
    /// two multiple of the block size, or the scan limit is zero.
    pub fn validate(&self) -> CoreResult<()> {
        if !self.page_size.is_power_of_two() || self.page_size < BLOCK_SIZE {
            return Err(CoreError::invalid_config(format!(
                "page size {} must be a power of two of at least {BLOCK_SIZE}",
                self.page_size
            )));
        }
        if self.reclaim_scan_limit == 0 {
            return Err(CoreError::invalid_config("reclaim scan limit must be positive"));
        }
        Ok(())
    }

    /// Returns `log2(page_size)`.
    #[must_use]
    pub fn page_shift(&self) -> u32 {
        self.page_size.trailing_zeros()
    }

    /// Returns the number of encryption blocks per page.
    #[must_use]
    pub fn blocks_per_page(&self) -> usize {
        self.page_size / BLOCK_SIZE
    }
}
