//! Coarse skip bitmap over groups of pages.

/// log2 of the number of pages grouped into one chunk.
pub const PAGE_TO_CHUNK_SHIFT: u32 = 10;
/// Number of pages grouped into one chunk.
pub const PAGES_PER_CHUNK: usize = 1 << PAGE_TO_CHUNK_SHIFT;

/// One "nothing to do here" bit per chunk of [`PAGES_PER_CHUNK`] pages.
///
/// A set bit lets a traversal jump over the whole chunk. Bits are only set by
/// the traversal that just proved the chunk idle, and are cleared by every
/// transition that gives one of its pages work to do, so a set bit never hides
/// a required transition.
#[derive(Debug, Clone, Default)]
pub struct ChunkMap {
    skip: Vec<bool>,
}

impl ChunkMap {
    /// Creates a map covering `num_pages` pages with no chunk skipped.
    #[must_use]
    pub fn for_pages(num_pages: usize) -> Self {
        Self {
            skip: vec![false; chunks_for(num_pages)],
        }
    }

    /// Grows or shrinks the map to cover `num_pages`; new chunks are not skipped.
    pub fn resize(&mut self, num_pages: usize) {
        self.skip.resize(chunks_for(num_pages), false);
    }

    /// Returns true if the chunk holding `page` may be skipped.
    #[inline]
    #[must_use]
    pub fn is_skipped(&self, page: usize) -> bool {
        self.skip[chunk_of(page)]
    }

    /// Marks the chunk holding `page` as needing no work.
    #[inline]
    pub fn skip_chunk_of(&mut self, page: usize) {
        self.skip[chunk_of(page)] = true;
    }

    /// Forces the next traversal to look into the chunk holding `page`.
    #[inline]
    pub fn touch(&mut self, page: usize) {
        let chunk = chunk_of(page);
        if self.skip[chunk] {
            self.skip[chunk] = false;
        }
    }

    /// Number of chunks covered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.skip.len()
    }

    /// Returns true if the map covers no pages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.skip.is_empty()
    }
}

/// Chunk index of a local page index.
#[inline]
#[must_use]
pub fn chunk_of(page: usize) -> usize {
    page >> PAGE_TO_CHUNK_SHIFT
}

/// First local page index of `chunk`.
#[inline]
#[must_use]
pub fn first_page_of(chunk: usize) -> usize {
    chunk << PAGE_TO_CHUNK_SHIFT
}

fn chunks_for(num_pages: usize) -> usize {
    (num_pages + PAGES_PER_CHUNK - 1) >> PAGE_TO_CHUNK_SHIFT
}
