//! Encrypted mapping of a file window into process memory.
//!
//! An [`EncryptedFileMapping`] covers `size` bytes of the file starting at
//! `file_offset`, presented to its owner at base address `addr`. The owner
//! keeps using plain addresses; the mapping turns every address into a page
//! index of its own table and never hands out memory it has not validated.
//!
//! Plaintext lives in per-page slots owned by the mapping. A slot is
//! allocated when its page is first decrypted and dropped when the reclaimer
//! evicts the page.
//!
//! ## Barrier protocol
//!
//! ```text
//! read_barrier(to_modify) --> write bytes --> write_barrier --> flush --> sync
//! ```
//!
//! See [`EncryptedFileMapping::read_barrier`] for the per-page transitions.

mod barrier;
mod reclaim;
#[cfg(any(debug_assertions, feature = "validate"))]
mod validate;

pub use barrier::DECRYPT_RETRY_LIMIT;

use crate::chunk::ChunkMap;
use crate::config::MappingConfig;
use crate::error::{CoreError, CoreResult};
use crate::observer::{WriteMarker, WriteObserver};
use crate::page_state::PageState;
use crate::shared::{FileLock, SharedFile};
use cryptmap_storage::{IvEntry, BLOCK_SIZE};
use std::sync::Arc;
use tracing::{debug, warn};

/// Callback reporting the byte size of the record whose header starts the slice.
pub type HeaderToSize<'a> = &'a dyn Fn(&[u8]) -> usize;

/// Plaintext of one resident page and the IVs it corresponds to.
struct PageSlot {
    data: Box<[u8]>,
    ivs: Vec<IvEntry>,
}

impl PageSlot {
    fn new(page_size: usize, blocks_per_page: usize) -> Self {
        Self {
            data: vec![0u8; page_size].into_boxed_slice(),
            ivs: vec![IvEntry::default(); blocks_per_page],
        }
    }
}

/// A transparently encrypted view of one window of a [`SharedFile`].
pub struct EncryptedFileMapping {
    file: Arc<SharedFile>,
    config: MappingConfig,
    page_shift: u32,
    blocks_per_page: usize,

    addr: usize,
    size: usize,
    file_offset: usize,
    first_page: usize,
    num_decrypted: usize,

    states: Vec<PageState>,
    slots: Vec<Option<PageSlot>>,
    // Set: no resident page in the chunk.
    reclaim_chunks: ChunkMap,
    // Set: no Dirty or Writable page in the chunk.
    flush_chunks: ChunkMap,

    observer: Option<Arc<dyn WriteObserver>>,
    marker: Option<Arc<dyn WriteMarker>>,
}

impl EncryptedFileMapping {
    /// Creates a mapping of `size` bytes of `file` starting at `file_offset`,
    /// addressed from base address `addr`. All pages start `Clean`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] if the configuration is invalid or
    /// `file_offset`/`size` are not multiples of the page size.
    pub fn new(
        file: Arc<SharedFile>,
        config: MappingConfig,
        file_offset: usize,
        addr: usize,
        size: usize,
    ) -> CoreResult<Self> {
        config.validate()?;
        let page_size = config.page_size;
        if file_offset % page_size != 0 || size % page_size != 0 {
            return Err(CoreError::invalid_config(format!(
                "window at offset {file_offset} of {size} bytes is not aligned to {page_size}-byte pages"
            )));
        }

        let page_shift = config.page_shift();
        let num_pages = size >> page_shift;
        debug!(
            file_offset,
            size,
            page_size,
            access = ?config.access,
            "created encrypted mapping"
        );

        Ok(Self {
            file,
            blocks_per_page: config.blocks_per_page(),
            config,
            page_shift,
            addr,
            size,
            file_offset,
            first_page: file_offset >> page_shift,
            num_decrypted: 0,
            states: vec![PageState::CLEAN; num_pages],
            slots: (0..num_pages).map(|_| None).collect(),
            reclaim_chunks: ChunkMap::for_pages(num_pages),
            flush_chunks: ChunkMap::for_pages(num_pages),
            observer: None,
            marker: None,
        })
    }

    /// Attaches a write observer.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn WriteObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Attaches a write marker.
    #[must_use]
    pub fn with_marker(mut self, marker: Arc<dyn WriteMarker>) -> Self {
        self.marker = Some(marker);
        self
    }

    /// Replaces the write observer.
    pub fn set_observer(&mut self, observer: Option<Arc<dyn WriteObserver>>) {
        self.observer = observer;
    }

    /// Replaces the write marker.
    pub fn set_marker(&mut self, marker: Option<Arc<dyn WriteMarker>>) {
        self.marker = marker;
    }

    /// The shared file this window belongs to.
    pub fn file(&self) -> &Arc<SharedFile> {
        &self.file
    }

    /// Page size in bytes.
    #[inline]
    pub fn page_size(&self) -> usize {
        1 << self.page_shift
    }

    /// Base address of the window.
    pub fn addr(&self) -> usize {
        self.addr
    }

    /// Size of the window in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// File offset of the window's first byte.
    pub fn file_offset(&self) -> usize {
        self.file_offset
    }

    /// Number of pages in the window.
    pub fn page_count(&self) -> usize {
        self.states.len()
    }

    /// Global index of the window's first page.
    pub fn start_index(&self) -> usize {
        self.first_page
    }

    /// Global index one past the window's last page.
    pub fn end_index(&self) -> usize {
        self.first_page + self.states.len()
    }

    /// Pages decrypted by this window since it was created or last `set`.
    pub fn decryption_count(&self) -> usize {
        self.num_decrypted
    }

    /// State of the page at local index `local`.
    ///
    /// # Panics
    ///
    /// Panics if `local` is out of range.
    pub fn page_state(&self, local: usize) -> PageState {
        self.states[local]
    }

    /// Returns true if the page at `local` currently holds decrypted memory.
    pub fn is_resident(&self, local: usize) -> bool {
        self.slots[local].is_some()
    }

    /// Number of pages currently holding decrypted memory.
    pub fn resident_pages(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Local page index of `addr + offset`.
    ///
    /// # Panics
    ///
    /// Panics if `addr` precedes the window or the result lies past its end,
    /// including when `addr + offset` overflows.
    #[inline]
    pub fn get_local_index_of_address(&self, addr: usize, offset: usize) -> usize {
        assert!(
            addr >= self.addr,
            "address {addr:#x} precedes mapping base {:#x}",
            self.addr
        );
        let Some(delta) = (addr - self.addr).checked_add(offset) else {
            panic!(
                "address {addr:#x}+{offset} overflows the {}-page window at {:#x}",
                self.states.len(),
                self.addr
            );
        };
        let local = delta >> self.page_shift;
        assert!(
            local < self.states.len(),
            "address {addr:#x}+{offset} maps to page {local} of a {}-page window at {:#x}",
            self.states.len(),
            self.addr
        );
        local
    }

    /// Byte offset of `addr` within its page.
    ///
    /// # Panics
    ///
    /// Panics if `addr` precedes the window.
    #[inline]
    pub fn get_offset_of_address(&self, addr: usize) -> usize {
        assert!(
            addr >= self.addr,
            "address {addr:#x} precedes mapping base {:#x}",
            self.addr
        );
        (addr - self.addr) & (self.page_size() - 1)
    }

    /// Returns true if global page `page_in_file` lies inside this window.
    #[inline]
    pub fn contains_page(&self, page_in_file: usize) -> bool {
        // Compare first so the subtraction cannot wrap.
        page_in_file >= self.first_page && page_in_file - self.first_page < self.states.len()
    }

    /// Copies `out.len()` bytes starting at `addr` out of the window.
    ///
    /// # Panics
    ///
    /// Panics if the range leaves the window or covers a page that has not
    /// been brought up to date by a read barrier.
    pub fn read_bytes(&self, addr: usize, out: &mut [u8]) {
        let mut done = 0;
        while done < out.len() {
            let at = addr + done;
            let local = self.get_local_index_of_address(at, 0);
            let offset = self.get_offset_of_address(at);
            let n = (self.page_size() - offset).min(out.len() - done);
            out[done..done + n].copy_from_slice(&self.page_data(local)[offset..offset + n]);
            done += n;
        }
    }

    /// Copies `data` into the window at `addr`.
    ///
    /// The covered pages must have been opened for writing by
    /// `read_barrier(.., to_modify = true)`; follow up with
    /// [`write_barrier`](Self::write_barrier) to make the change flushable.
    ///
    /// # Panics
    ///
    /// Panics if the range leaves the window or covers a page that is not writable.
    pub fn write_bytes(&mut self, addr: usize, data: &[u8]) {
        let mut done = 0;
        while done < data.len() {
            let at = addr + done;
            let local = self.get_local_index_of_address(at, 0);
            let offset = self.get_offset_of_address(at);
            let n = (self.page_size() - offset).min(data.len() - done);
            self.page_data_mut(local)[offset..offset + n].copy_from_slice(&data[done..done + n]);
            done += n;
        }
    }

    /// Decrypted plaintext of the page at `local`.
    ///
    /// # Panics
    ///
    /// Panics if the page is not up to date.
    pub fn page_data(&self, local: usize) -> &[u8] {
        let state = self.states[local];
        assert!(
            state.is_up_to_date(),
            "page {} read without a read barrier: {state}",
            self.first_page + local
        );
        match &self.slots[local] {
            Some(slot) => &slot.data,
            None => panic!("up-to-date page {} has no plaintext", self.first_page + local),
        }
    }

    fn page_data_mut(&mut self, local: usize) -> &mut [u8] {
        let state = self.states[local];
        assert!(
            state.is_writable(),
            "page {} written without being opened for writing: {state}",
            self.first_page + local
        );
        match &mut self.slots[local] {
            Some(slot) => &mut slot.data,
            None => panic!("writable page {} has no plaintext", self.first_page + local),
        }
    }

    /// Moves the window to a new address, size and file offset.
    ///
    /// Dirty pages of the old window are flushed first. The new table starts
    /// `Clean`: no decrypted memory carries over, since the physical mapping
    /// may have moved.
    ///
    /// # Panics
    ///
    /// Panics if the new window is not page aligned, or if the lock belongs to
    /// another file.
    pub fn set(&mut self, lock: &FileLock<'_>, new_addr: usize, new_size: usize, new_file_offset: usize) {
        let page_size = self.page_size();
        assert!(
            new_file_offset % page_size == 0 && new_size % page_size == 0,
            "window at offset {new_file_offset} of {new_size} bytes is not page aligned"
        );
        self.flush(lock);

        let num_pages = new_size >> self.page_shift;
        self.addr = new_addr;
        self.size = new_size;
        self.file_offset = new_file_offset;
        self.first_page = new_file_offset >> self.page_shift;
        self.num_decrypted = 0;
        self.states = vec![PageState::CLEAN; num_pages];
        self.slots = (0..num_pages).map(|_| None).collect();
        self.reclaim_chunks = ChunkMap::for_pages(num_pages);
        self.flush_chunks = ChunkMap::for_pages(num_pages);

        debug!(
            addr = new_addr,
            size = new_size,
            file_offset = new_file_offset,
            "remapped encrypted window"
        );
    }

    /// Grows the window to `new_size` bytes.
    ///
    /// `offset` is the file offset of the window and must not change. Existing
    /// pages keep their state; added pages start `Clean`.
    ///
    /// # Panics
    ///
    /// Panics if `offset` differs from the window's offset, or if `new_size`
    /// is unaligned or smaller than the current size.
    pub fn extend_to(&mut self, offset: usize, new_size: usize) {
        assert_eq!(offset, self.file_offset, "extend_to must keep the window offset");
        assert!(
            new_size % self.page_size() == 0,
            "new size {new_size} is not page aligned"
        );
        assert!(
            new_size >= self.size,
            "extend_to cannot shrink a window from {} to {new_size}",
            self.size
        );

        let num_pages = new_size >> self.page_shift;
        self.states.resize(num_pages, PageState::CLEAN);
        self.slots.resize_with(num_pages, || None);
        self.reclaim_chunks.resize(num_pages);
        self.flush_chunks.resize(num_pages);
        self.size = new_size;

        debug!(file_offset = offset, size = new_size, "extended encrypted window");
    }

    /// Flushes and syncs the window, then tears it down.
    pub fn close(mut self, lock: &FileLock<'_>) {
        self.flush(lock);
        self.sync(lock);
    }

    /// One-line description of every page state, for diagnostics.
    pub fn debug_summary(&self) -> String {
        let states: Vec<String> = self.states.iter().map(ToString::to_string).collect();
        format!(
            "{} pages from {} to {}: {}",
            self.states.len(),
            self.first_page,
            self.end_index(),
            states.join(", ")
        )
    }

    fn check_lock(&self, lock: &FileLock<'_>) {
        assert!(
            lock.guards(&self.file),
            "file lock does not belong to this mapping's file"
        );
    }

    fn first_block_of(&self, local: usize) -> u64 {
        ((self.first_page + local) * self.blocks_per_page) as u64
    }
}

impl Drop for EncryptedFileMapping {
    fn drop(&mut self) {
        let dirty = self.states.iter().filter(|s| s.is_dirty()).count();
        if dirty > 0 {
            warn!(
                dirty,
                first_page = self.first_page,
                "encrypted mapping dropped with unflushed pages"
            );
        }
    }
}

impl std::fmt::Debug for EncryptedFileMapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedFileMapping")
            .field("addr", &format_args!("{:#x}", self.addr))
            .field("size", &self.size)
            .field("file_offset", &self.file_offset)
            .field("page_size", &self.page_size())
            .field("pages", &self.states.len())
            .field("resident", &self.resident_pages())
            .finish_non_exhaustive()
    }
}
