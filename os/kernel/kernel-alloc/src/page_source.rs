//! Sources of raw page memory for the [`BlockAllocator`](crate::BlockAllocator).

use core::alloc::Layout;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicU64, Ordering};

/// The underlying system allocator.
///
/// Implementations hand out uninitialized memory; zeroing and alignment
/// checks are the block allocator's job, so a source is free to be sloppy
/// about `layout.align()` (the allocator will reject what it returns).
pub trait PageSource: Send + Sync {
    /// Obtain `layout.size()` bytes, or `None` if exhausted.
    fn alloc_raw(&self, layout: Layout) -> Option<NonNull<u8>>;

    /// Return memory obtained from [`alloc_raw`](Self::alloc_raw).
    ///
    /// # Safety
    /// `ptr` must come from `alloc_raw` on this source with the same
    /// `layout`, and must not be used afterwards.
    unsafe fn free_raw(&self, ptr: NonNull<u8>, layout: Layout);
}

/// Pages from the global heap.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPageSource;

impl PageSource for SystemPageSource {
    fn alloc_raw(&self, layout: Layout) -> Option<NonNull<u8>> {
        if layout.size() == 0 {
            return None;
        }
        // SAFETY: non-zero size checked above.
        NonNull::new(unsafe { alloc::alloc::alloc(layout) })
    }

    unsafe fn free_raw(&self, ptr: NonNull<u8>, layout: Layout) {
        unsafe { alloc::alloc::dealloc(ptr.as_ptr(), layout) }
    }
}

/// Caps the number of bytes outstanding from an inner source.
///
/// Models a fixed memory budget: once `capacity` bytes are handed out,
/// further requests fail until something is returned.
#[derive(Debug)]
pub struct BoundedPageSource<P> {
    inner: P,
    capacity: u64,
    in_use: AtomicU64,
}

impl<P: PageSource> BoundedPageSource<P> {
    pub const fn new(inner: P, capacity: u64) -> Self {
        Self {
            inner,
            capacity,
            in_use: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub const fn capacity(&self) -> u64 {
        self.capacity
    }

    #[must_use]
    pub fn in_use(&self) -> u64 {
        self.in_use.load(Ordering::Acquire)
    }

    fn reserve(&self, bytes: u64) -> bool {
        self.in_use
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(bytes).filter(|&next| next <= self.capacity)
            })
            .is_ok()
    }

    fn unreserve(&self, bytes: u64) {
        self.in_use.fetch_sub(bytes, Ordering::AcqRel);
    }
}

impl<P: PageSource> PageSource for BoundedPageSource<P> {
    fn alloc_raw(&self, layout: Layout) -> Option<NonNull<u8>> {
        let bytes = layout.size() as u64;
        if !self.reserve(bytes) {
            log::debug!(
                "page budget exhausted: {} of {} bytes in use, {bytes} requested",
                self.in_use(),
                self.capacity
            );
            return None;
        }
        let ptr = self.inner.alloc_raw(layout);
        if ptr.is_none() {
            self.unreserve(bytes);
        }
        ptr
    }

    unsafe fn free_raw(&self, ptr: NonNull<u8>, layout: Layout) {
        unsafe { self.inner.free_raw(ptr, layout) };
        self.unreserve(layout.size() as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PAGE_SIZE;

    fn page_layout(pages: usize) -> Layout {
        Layout::from_size_align(pages * PAGE_SIZE, PAGE_SIZE).unwrap()
    }

    #[test]
    fn system_source_honors_page_alignment() {
        let layout = page_layout(2);
        let ptr = SystemPageSource.alloc_raw(layout).unwrap();
        assert_eq!(ptr.as_ptr().addr() % PAGE_SIZE, 0);
        unsafe { SystemPageSource.free_raw(ptr, layout) };
    }

    #[test]
    fn bounded_source_refuses_past_capacity() {
        let source = BoundedPageSource::new(SystemPageSource, 2 * PAGE_SIZE as u64);
        let a = source.alloc_raw(page_layout(1)).unwrap();
        let b = source.alloc_raw(page_layout(1)).unwrap();
        assert!(source.alloc_raw(page_layout(1)).is_none());
        assert_eq!(source.in_use(), 2 * PAGE_SIZE as u64);

        unsafe { source.free_raw(a, page_layout(1)) };
        assert_eq!(source.in_use(), PAGE_SIZE as u64);
        let c = source.alloc_raw(page_layout(1)).unwrap();

        unsafe {
            source.free_raw(b, page_layout(1));
            source.free_raw(c, page_layout(1));
        }
        assert_eq!(source.in_use(), 0);
    }

    #[test]
    fn bounded_source_rejects_single_oversized_request() {
        let source = BoundedPageSource::new(SystemPageSource, PAGE_SIZE as u64);
        assert!(source.alloc_raw(page_layout(2)).is_none());
        assert_eq!(source.in_use(), 0);
    }
}
