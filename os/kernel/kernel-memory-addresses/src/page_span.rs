use crate::PageSize;
use core::fmt;
use core::marker::PhantomData;

/// A length in whole pages of size `S`; never empty.
///
/// This is the unit the allocator hands out: any byte request is rounded up
/// to the next page boundary, and a request for zero bytes still yields one
/// page.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PageSpan<S: PageSize> {
    pages: u64,
    _phantom: PhantomData<S>,
}

impl<S: PageSize> PageSpan<S> {
    /// Smallest span whose byte length is `>= bytes` and `>= S::SIZE`.
    ///
    /// Returns `None` if the rounded length does not fit in a `u64`.
    #[must_use]
    pub const fn covering(bytes: u64) -> Option<Self> {
        let pages = if bytes == 0 { 1 } else { bytes.div_ceil(S::SIZE) };
        match pages.checked_mul(S::SIZE) {
            Some(_) => Some(Self {
                pages,
                _phantom: PhantomData,
            }),
            None => None,
        }
    }

    /// Number of pages in the span (at least one).
    #[inline]
    #[must_use]
    pub const fn pages(self) -> u64 {
        self.pages
    }

    /// Length of the span in bytes; always a multiple of `S::SIZE`.
    #[inline]
    #[must_use]
    pub const fn bytes(self) -> u64 {
        self.pages << S::SHIFT
    }
}

impl<S: PageSize> fmt::Debug for PageSpan<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PageSpan<{}>({} pages)", S::as_str(), self.pages)
    }
}

impl<S: PageSize> fmt::Display for PageSpan<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} x {}", self.pages, S::as_str())
    }
}
