//! Hooks for the layer that owns a mapping.

/// Observes page write transitions of a mapping.
///
/// Lets the engine track which logical objects were modified without looking
/// at page mechanics, and tells the mapping whether another process is
/// currently writing to the file.
pub trait WriteObserver: Send + Sync {
    /// A page became `Writable` through a read barrier.
    fn page_opened_for_write(&self, _page_in_file: usize) {}

    /// A page became `Dirty` through a write barrier.
    fn page_modified(&self, _page_in_file: usize) {}

    /// Returns true while some other process is known to be writing the file.
    ///
    /// A block read that fails authentication while this holds is treated as
    /// a torn read and retried instead of being reported as corruption.
    fn concurrent_writer_active(&self) -> bool {
        false
    }
}

/// Publishes the file position currently being written by flush.
///
/// Readers in other processes use the mark to recognise blocks that are
/// mid-write.
pub trait WriteMarker: Send + Sync {
    /// Called before the ciphertext of the page at `file_pos` is written.
    fn mark(&self, file_pos: u64);

    /// Called once that page's ciphertext and IV are written.
    fn unmark(&self);
}
