//! Per-page state of an encrypted mapping.
//!
//! A page moves through these facets:
//!
//! - `Touched`: an address inside it went through a read barrier since the
//!   reclaimer last looked at it
//! - `UpToDate`: the plaintext in memory matches the committed ciphertext
//! - `StaleIV`: another process may have rewritten the page; the on-disk IV
//!   must be compared before `UpToDate` can be trusted again
//! - `Writable`: the page is open for in-place modification
//! - `Dirty`: the page was modified since it was last flushed
//!
//! The facets are only changed through the named transitions below, which
//! keep `Dirty => Writable => UpToDate` and `StaleIV => UpToDate && !Writable`.

use bitflags::bitflags;
use std::fmt;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    struct Flags: u8 {
        const TOUCHED = 1 << 0;
        const UP_TO_DATE = 1 << 1;
        const STALE_IV = 1 << 2;
        const WRITABLE = 1 << 3;
        const DIRTY = 1 << 4;
    }
}

/// State of one page of a mapping window.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct PageState(Flags);

impl PageState {
    /// A page that was never touched or has been fully reclaimed.
    pub const CLEAN: Self = Self(Flags::empty());

    /// Returns true if no facet is set.
    #[inline]
    #[must_use]
    pub fn is_clean(self) -> bool {
        self.0.is_empty()
    }

    /// Returns true if the page was touched since the last reclaim pass.
    #[inline]
    #[must_use]
    pub fn is_touched(self) -> bool {
        self.0.contains(Flags::TOUCHED)
    }

    /// Returns true if the plaintext matches the committed ciphertext.
    #[inline]
    #[must_use]
    pub fn is_up_to_date(self) -> bool {
        self.0.contains(Flags::UP_TO_DATE)
    }

    /// Returns true if the on-disk IV must be checked before use.
    #[inline]
    #[must_use]
    pub fn is_stale_iv(self) -> bool {
        self.0.contains(Flags::STALE_IV)
    }

    /// Returns true if the page is open for modification.
    #[inline]
    #[must_use]
    pub fn is_writable(self) -> bool {
        self.0.contains(Flags::WRITABLE)
    }

    /// Returns true if the page holds unflushed modifications.
    #[inline]
    #[must_use]
    pub fn is_dirty(self) -> bool {
        self.0.contains(Flags::DIRTY)
    }

    /// Returns true if nothing about the page is pending: neither `Dirty` nor `Writable`.
    #[inline]
    #[must_use]
    pub fn is_committed(self) -> bool {
        !self.0.intersects(Flags::DIRTY | Flags::WRITABLE)
    }

    #[inline]
    pub(crate) fn mark_touched(&mut self) {
        self.0.insert(Flags::TOUCHED);
    }

    #[inline]
    pub(crate) fn clear_touched(&mut self) {
        self.0.remove(Flags::TOUCHED);
    }

    /// Plaintext was just decrypted (or verified) against the current ciphertext.
    pub(crate) fn mark_up_to_date(&mut self) {
        self.0.insert(Flags::UP_TO_DATE);
        self.0.remove(Flags::STALE_IV);
    }

    /// The plaintext no longer matches the committed ciphertext.
    pub(crate) fn mark_outdated(&mut self) {
        assert!(
            self.is_committed(),
            "cannot invalidate a page with pending writes: {self}"
        );
        self.0.remove(Flags::UP_TO_DATE);
    }

    pub(crate) fn mark_stale_iv(&mut self) {
        debug_assert!(self.is_up_to_date() && self.is_committed(), "{self}");
        self.0.insert(Flags::STALE_IV);
    }

    pub(crate) fn clear_stale_iv(&mut self) {
        self.0.remove(Flags::STALE_IV);
    }

    pub(crate) fn mark_writable(&mut self) {
        assert!(
            self.is_up_to_date() && !self.is_stale_iv(),
            "page must be current before it is opened for writing: {self}"
        );
        self.0.insert(Flags::WRITABLE);
    }

    pub(crate) fn mark_dirty(&mut self) {
        assert!(
            self.is_writable(),
            "write barrier on a page not opened for writing: {self}"
        );
        self.0.insert(Flags::DIRTY);
    }

    /// The page's plaintext was encrypted and committed to the shared cache.
    pub(crate) fn clear_dirty_after_flush(&mut self) {
        debug_assert!(self.is_dirty() && self.is_up_to_date(), "{self}");
        self.0.remove(Flags::DIRTY | Flags::WRITABLE);
    }

    /// The page's plaintext was released.
    pub(crate) fn reset(&mut self) {
        assert!(
            self.is_committed(),
            "cannot reclaim a page with pending writes: {self}"
        );
        *self = Self::CLEAN;
    }
}

impl fmt::Display for PageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_clean() {
            return f.write_str("Clean");
        }
        let names = [
            (Flags::TOUCHED, "Touched"),
            (Flags::UP_TO_DATE, "UpToDate"),
            (Flags::STALE_IV, "StaleIV"),
            (Flags::WRITABLE, "Writable"),
            (Flags::DIRTY, "Dirty"),
        ];
        f.write_str("{")?;
        let mut first = true;
        for (flag, name) in names {
            if self.0.contains(flag) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        f.write_str("}")
    }
}

impl fmt::Debug for PageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PageState({self})")
    }
}
