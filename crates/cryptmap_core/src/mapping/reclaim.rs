//! Eviction of idle decrypted pages.

use super::EncryptedFileMapping;
use crate::chunk::{chunk_of, first_page_of, PAGES_PER_CHUNK};
use crate::shared::FileLock;
use tracing::debug;

impl EncryptedFileMapping {
    /// Releases decrypted memory of committed pages untouched since the last pass.
    ///
    /// Scans from the global page index in `progress` towards the end of the
    /// window, visiting at most `reclaim_scan_limit` pages, and leaves
    /// `progress` where it stopped so the next call resumes there. A cursor
    /// before the window starts at its first page; the caller wraps the cursor
    /// once it reaches [`end_index`](Self::end_index).
    ///
    /// For every visited page that is neither `Dirty` nor `Writable`:
    /// - a `Touched` page loses `Touched` and survives this pass;
    /// - an untouched page drops its plaintext and becomes `Clean`, and one
    ///   page size is added to `accumulated_savings` if memory was released.
    ///
    /// A chunk whose pages were all visited in one pass and hold no memory
    /// afterwards is skipped by later passes until a read barrier touches it.
    ///
    /// # Panics
    ///
    /// Panics if the lock belongs to another file.
    pub fn reclaim_untouched(
        &mut self,
        lock: &FileLock<'_>,
        progress: &mut usize,
        accumulated_savings: &mut usize,
    ) {
        self.check_lock(lock);

        let end = self.end_index();
        if *progress < self.first_page {
            *progress = self.first_page;
        }

        let page_size = self.page_size();
        let num_pages = self.states.len();
        let mut visited = 0usize;
        let mut reclaimed = 0u64;
        let mut chunk_idle = false;

        while *progress < end && visited < self.config.reclaim_scan_limit {
            let local = *progress - self.first_page;
            if self.reclaim_chunks.is_skipped(local) {
                *progress = self.first_page + first_page_of(chunk_of(local) + 1).min(num_pages);
                continue;
            }

            if local % PAGES_PER_CHUNK == 0 {
                chunk_idle = true;
            }
            if self.reclaim_page_if_idle(local) {
                reclaimed += 1;
                *accumulated_savings += page_size;
            }
            if !self.states[local].is_clean() || self.slots[local].is_some() {
                chunk_idle = false;
            }

            visited += 1;
            *progress += 1;

            let last_in_chunk = local % PAGES_PER_CHUNK == PAGES_PER_CHUNK - 1 || local + 1 == num_pages;
            if last_in_chunk {
                if chunk_idle {
                    self.reclaim_chunks.skip_chunk_of(local);
                }
                chunk_idle = false;
            }
        }

        if reclaimed > 0 {
            lock.stats().record_reclaim(reclaimed);
            debug!(
                reclaimed,
                visited,
                first_page = self.first_page,
                "reclaimed decrypted pages"
            );
        }
    }

    /// Second-chance visit of one page; returns true if memory was released.
    fn reclaim_page_if_idle(&mut self, local: usize) -> bool {
        let state = &mut self.states[local];
        if !state.is_committed() {
            return false;
        }
        if state.is_touched() {
            state.clear_touched();
            return false;
        }
        state.reset();
        self.slots[local].take().is_some()
    }
}
