//! Read/write barriers, flush, sync and cross-process staleness checks.

use super::{EncryptedFileMapping, HeaderToSize, PageSlot};
use crate::chunk::{chunk_of, first_page_of};
use crate::config::AccessMode;
use crate::error::{CoreError, CoreResult};
use crate::observer::WriteObserver;
use crate::shared::FileLock;
use cryptmap_storage::{IvEntry, StorageError, StorageResult, BLOCK_SIZE};
use tracing::{debug, error, trace};

/// Attempts made to read a block that fails authentication while another
/// process reports an ongoing write.
pub const DECRYPT_RETRY_LIMIT: usize = 5;

impl EncryptedFileMapping {
    /// Makes `size` bytes at `addr` current in memory.
    ///
    /// For every overlapped page:
    /// 1. a `StaleIV` page compares its recorded IVs with the on-disk ones and
    ///    drops `UpToDate` if another process rewrote it;
    /// 2. a page that is not `UpToDate` is decrypted and authenticated;
    /// 3. with `to_modify`, the page is opened for writing.
    ///
    /// With `header_to_size`, the first page is made current before the
    /// callback reads the record header at `addr`; its answer replaces `size`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DecryptionFailed`] if a page fails authentication,
    /// or if a read (not `to_modify`) needs bytes that were never written.
    ///
    /// # Panics
    ///
    /// Panics if the range leaves the window, `to_modify` is requested on a
    /// read-only mapping, or the lock belongs to another file.
    pub fn read_barrier(
        &mut self,
        lock: &FileLock<'_>,
        addr: usize,
        size: usize,
        header_to_size: Option<HeaderToSize<'_>>,
        to_modify: bool,
    ) -> CoreResult<()> {
        self.check_lock(lock);
        assert!(
            !to_modify || self.config.access == AccessMode::ReadWrite,
            "modification requested through a read-only mapping"
        );

        let page_size = self.page_size();
        let first = self.get_local_index_of_address(addr, 0);
        let offset = self.get_offset_of_address(addr);
        // Bounds are checked before any page changes state.
        let mut last = self.last_index_of(addr, size);
        // An empty range needs no written bytes.
        let mut required = if size == 0 { 0 } else { offset + size };
        let needed = |required: usize| if to_modify { 0 } else { required.min(page_size) };

        self.prepare_page(lock, first, needed(required), to_modify)?;

        let mut size = size;
        if let Some(header_to_size) = header_to_size {
            // The header sits inside the first page, which is now valid.
            size = header_to_size(&self.page_data(first)[offset..]);
            last = self.last_index_of(addr, size);
            required = offset + size;
        }
        if size == 0 {
            return Ok(());
        }

        for local in first + 1..=last {
            required -= page_size;
            self.prepare_page(lock, local, needed(required), to_modify)?;
        }
        Ok(())
    }

    /// Marks the pages overlapping `size` bytes at `addr` as `Dirty`.
    ///
    /// No encryption happens here; it is deferred to [`flush`](Self::flush).
    ///
    /// # Panics
    ///
    /// Panics if the range leaves the window or covers a page that was not
    /// opened for writing by an earlier `read_barrier(.., to_modify = true)`.
    pub fn write_barrier(&mut self, addr: usize, size: usize) {
        if size == 0 {
            return;
        }
        let first = self.get_local_index_of_address(addr, 0);
        let last = self.last_index_of(addr, size);
        for local in first..=last {
            let page_in_file = self.first_page + local;
            assert!(
                self.states[local].is_writable(),
                "write barrier on page {page_in_file} which is not open for writing"
            );
            self.states[local].mark_dirty();
            self.flush_chunks.touch(local);
            if let Some(observer) = &self.observer {
                observer.page_modified(page_in_file);
            }
        }
    }

    /// Encrypts every `Dirty` page into the shared ciphertext image.
    ///
    /// Flushed pages lose `Dirty` and `Writable` and stay `UpToDate`. Nothing
    /// is made durable; see [`sync`](Self::sync).
    ///
    /// # Panics
    ///
    /// Any failure leaves plaintext and ciphertext inconsistent and panics.
    pub fn flush(&mut self, lock: &FileLock<'_>) {
        self.check_lock(lock);

        let num_pages = self.states.len();
        let mut flushed = 0usize;
        let mut local = 0;
        while local < num_pages {
            let chunk_end = first_page_of(chunk_of(local) + 1).min(num_pages);
            if self.flush_chunks.is_skipped(local) {
                local = chunk_end;
                continue;
            }

            let mut idle = true;
            for page in local..chunk_end {
                if self.states[page].is_dirty() {
                    self.flush_page(lock, page);
                    flushed += 1;
                }
                if !self.states[page].is_committed() {
                    idle = false;
                }
            }
            if idle {
                self.flush_chunks.skip_chunk_of(local);
            }
            local = chunk_end;
        }

        if flushed > 0 {
            debug!(flushed, first_page = self.first_page, "flushed dirty pages");
        }

        #[cfg(any(debug_assertions, feature = "validate"))]
        self.validate(lock);
    }

    /// Makes the shared ciphertext image durable.
    ///
    /// Does not flush; call [`flush`](Self::flush) first if writes are pending.
    ///
    /// # Panics
    ///
    /// Panics if the backend fails to sync.
    pub fn sync(&self, lock: &FileLock<'_>) {
        self.check_lock(lock);
        if let Err(e) = lock.sync() {
            error!(error = %e, "sync of encrypted file failed");
            panic!("sync of encrypted file failed: {e}");
        }
        lock.stats().record_sync();
    }

    /// Schedules an IV check for every committed, up-to-date page.
    ///
    /// Called when another process may have committed new versions of pages
    /// this window caches. Nothing is decrypted here; the next read barrier
    /// touching each page decides whether it must be refreshed.
    pub fn mark_pages_for_iv_check(&mut self) {
        let mut marked = 0usize;
        for state in &mut self.states {
            if state.is_up_to_date() && state.is_committed() {
                state.mark_stale_iv();
                marked += 1;
            }
        }
        trace!(marked, first_page = self.first_page, "pages marked for IV check");
    }

    /// Local index of the last page overlapped by `size` bytes at `addr`.
    fn last_index_of(&self, addr: usize, size: usize) -> usize {
        self.get_local_index_of_address(addr, size.saturating_sub(1))
    }

    fn prepare_page(
        &mut self,
        lock: &FileLock<'_>,
        local: usize,
        required: usize,
        to_modify: bool,
    ) -> CoreResult<()> {
        self.reclaim_chunks.touch(local);

        let mut state = self.states[local];
        state.mark_touched();
        if state.is_stale_iv() {
            let changed = self.iv_changed(lock, local)?;
            lock.stats().record_iv_check(changed);
            if changed {
                state.mark_outdated();
            }
            state.clear_stale_iv();
        }
        self.states[local] = state;

        if !state.is_up_to_date() {
            self.refresh_page(lock, local, required)?;
        }

        if to_modify && !self.states[local].is_writable() {
            self.states[local].mark_writable();
            self.flush_chunks.touch(local);
            if let Some(observer) = &self.observer {
                observer.page_opened_for_write(self.first_page + local);
            }
        }
        Ok(())
    }

    fn iv_changed(&self, lock: &FileLock<'_>, local: usize) -> CoreResult<bool> {
        let Some(slot) = &self.slots[local] else {
            return Ok(true);
        };
        let first_block = self.first_block_of(local);
        for (i, recorded) in slot.ivs.iter().enumerate() {
            if lock.read_iv(first_block + i as u64)? != *recorded {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn refresh_page(&mut self, lock: &FileLock<'_>, local: usize, required: usize) -> CoreResult<()> {
        let page_in_file = self.first_page + local;
        let state = self.states[local];
        assert!(
            state.is_committed(),
            "refresh of page {page_in_file} would discard pending writes: {state}"
        );

        let first_block = self.first_block_of(local);
        let observer = self.observer.clone();
        let (page_size, blocks_per_page) = (self.page_size(), self.blocks_per_page);
        let slot = self.slots[local].get_or_insert_with(|| PageSlot::new(page_size, blocks_per_page));

        let mut valid = 0;
        for (i, block) in slot.data.chunks_mut(BLOCK_SIZE).enumerate() {
            let block_in_file = first_block + i as u64;
            let (bytes, iv) = read_block_with_retry(lock, observer.as_deref(), block_in_file, block)
                .map_err(|e| match e {
                    StorageError::DecryptionFailed { block } => CoreError::decryption_failed(
                        page_in_file,
                        format!("block {block} failed authentication"),
                    ),
                    other => CoreError::from(other),
                })?;
            slot.ivs[i] = iv;
            valid += bytes;
        }

        if valid < required {
            return Err(CoreError::decryption_failed(
                page_in_file,
                format!("{required} bytes required but only {valid} were ever written"),
            ));
        }

        self.states[local].mark_up_to_date();
        self.num_decrypted += 1;
        lock.stats().record_decrypt();
        trace!(page = page_in_file, "decrypted page");
        Ok(())
    }

    fn flush_page(&mut self, lock: &FileLock<'_>, local: usize) {
        let page_in_file = self.first_page + local;
        let first_block = self.first_block_of(local);
        let file_pos = (page_in_file as u64) << self.page_shift;

        let Some(slot) = self.slots[local].as_mut() else {
            error!(page = page_in_file, "dirty page has no plaintext");
            panic!("dirty page {page_in_file} has no plaintext");
        };

        if let Some(marker) = &self.marker {
            marker.mark(file_pos);
        }
        for (i, block) in slot.data.chunks(BLOCK_SIZE).enumerate() {
            match lock.write_block(first_block + i as u64, block) {
                Ok(iv) => slot.ivs[i] = iv,
                Err(e) => {
                    error!(page = page_in_file, error = %e, "flush of encrypted page failed");
                    panic!("flush of page {page_in_file} failed: {e}");
                }
            }
        }
        if let Some(marker) = &self.marker {
            marker.unmark();
        }

        self.states[local].clear_dirty_after_flush();
        lock.stats().record_encrypt();
        trace!(page = page_in_file, "flushed page");
    }
}

fn read_block_with_retry(
    lock: &FileLock<'_>,
    observer: Option<&dyn WriteObserver>,
    block: u64,
    out: &mut [u8],
) -> StorageResult<(usize, IvEntry)> {
    let mut attempts = 1;
    loop {
        match lock.read_block(block, out) {
            Err(StorageError::DecryptionFailed { .. })
                if attempts < DECRYPT_RETRY_LIMIT
                    && observer.is_some_and(|o| o.concurrent_writer_active()) =>
            {
                attempts += 1;
                lock.stats().record_decrypt_retry();
                std::thread::yield_now();
            }
            result => return result,
        }
    }
}
