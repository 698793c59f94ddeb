use crate::block::Block;
use crate::error::AllocError;
use crate::page_source::PageSource;
use alloc::sync::Arc;
use core::alloc::Layout;
use core::fmt;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use kernel_memory_addresses::{MemoryAddress, MemoryPage, PageSpan, Size4K};

/// Live allocation counters, shared with every block. A block counts as
/// live from allocation until it is released or dropped, independent of
/// any pins still holding its pages.
#[derive(Debug, Default)]
pub struct AllocStats {
    live_blocks: AtomicUsize,
    live_bytes: AtomicU64,
    total_allocations: AtomicU64,
}

impl AllocStats {
    fn on_allocate(&self, bytes: u64) {
        self.live_blocks.fetch_add(1, Ordering::AcqRel);
        self.live_bytes.fetch_add(bytes, Ordering::AcqRel);
        self.total_allocations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn on_release(&self, bytes: u64) {
        self.live_blocks.fetch_sub(1, Ordering::AcqRel);
        self.live_bytes.fetch_sub(bytes, Ordering::AcqRel);
    }

    #[must_use]
    pub fn live_blocks(&self) -> usize {
        self.live_blocks.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn live_bytes(&self) -> u64 {
        self.live_bytes.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn total_allocations(&self) -> u64 {
        self.total_allocations.load(Ordering::Relaxed)
    }
}

/// Produces zero-filled, page-aligned [`Block`]s from a [`PageSource`].
pub struct BlockAllocator {
    source: Arc<dyn PageSource>,
    stats: Arc<AllocStats>,
}

impl BlockAllocator {
    pub fn new(source: impl PageSource + 'static) -> Self {
        Self::with_source(Arc::new(source))
    }

    /// Use a source that the caller keeps a handle to.
    pub fn with_source(source: Arc<dyn PageSource>) -> Self {
        Self {
            source,
            stats: Arc::new(AllocStats::default()),
        }
    }

    /// Allocate at least `size` bytes, rounded up to whole pages (at least
    /// one), zero-filled.
    ///
    /// # Errors
    /// - [`AllocError::OutOfMemory`] if the rounded size overflows or the
    ///   source is exhausted.
    /// - [`AllocError::AlignmentViolation`] if the source returned memory that
    ///   is not page-aligned; that memory has already been given back.
    pub fn allocate(&self, size: u64) -> Result<Block, AllocError> {
        let oom = AllocError::OutOfMemory { requested: size };
        let span = PageSpan::<Size4K>::covering(size).ok_or(oom)?;
        let bytes = usize::try_from(span.bytes()).map_err(|_| oom)?;
        let layout = Layout::from_size_align(bytes, crate::PAGE_SIZE).map_err(|_| oom)?;

        let Some(ptr) = self.source.alloc_raw(layout) else {
            log::warn!("page source could not provide {span} for a {size} byte request");
            return Err(oom);
        };

        let addr = MemoryAddress::from_nonnull(ptr);
        let Some(base) = MemoryPage::<Size4K>::try_from_addr(addr) else {
            log::warn!("page source returned misaligned memory at {addr}; releasing it");
            // SAFETY: fresh from `alloc_raw` with this layout, never handed out.
            unsafe { self.source.free_raw(ptr, layout) };
            return Err(AllocError::AlignmentViolation { addr });
        };

        // SAFETY: `bytes` writable bytes starting at `ptr` were just obtained.
        unsafe { zero_fill(ptr, bytes) };
        self.stats.on_allocate(span.bytes());

        log::debug!("allocated {span} at {base} for a {size} byte request");
        Ok(Block::new(
            ptr,
            layout,
            base,
            size,
            Arc::clone(&self.source),
            Arc::clone(&self.stats),
        ))
    }

    /// Give a block's pages back to the source.
    pub fn release(&self, block: Block) {
        log::debug!(
            "releasing {} bytes at {}",
            block.size_bytes(),
            block.base()
        );
        drop(block);
    }

    #[must_use]
    pub fn live_blocks(&self) -> usize {
        self.stats.live_blocks()
    }

    #[must_use]
    pub fn live_bytes(&self) -> u64 {
        self.stats.live_bytes()
    }

    #[must_use]
    pub fn stats(&self) -> &AllocStats {
        &self.stats
    }
}

impl fmt::Debug for BlockAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockAllocator")
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

unsafe fn zero_fill(ptr: NonNull<u8>, bytes: usize) {
    unsafe { ptr.as_ptr().write_bytes(0, bytes) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PAGE_SIZE, SystemPageSource};

    #[test]
    fn rounds_up_to_whole_pages() {
        let a = BlockAllocator::new(SystemPageSource);
        for (req, want) in [(1, 4096), (4096, 4096), (4097, 8192), (10_000, 12_288)] {
            let b = a.allocate(req).unwrap();
            assert_eq!(b.size_bytes(), want, "request {req}");
            assert_eq!(b.requested_bytes(), req);
            assert_eq!(b.base().base().as_u64() % PAGE_SIZE as u64, 0);
            a.release(b);
        }
    }

    #[test]
    fn zero_request_still_gets_a_page() {
        let a = BlockAllocator::new(SystemPageSource);
        let b = a.allocate(0).unwrap();
        assert_eq!(b.pages(), 1);
    }

    #[test]
    fn memory_is_zeroed_even_when_reused() {
        let a = BlockAllocator::new(SystemPageSource);
        let b = a.allocate(4096).unwrap();
        b.fill(0xAB);
        a.release(b);

        let b = a.allocate(4096).unwrap();
        assert!(b.is_zeroed());
    }

    #[test]
    fn counts_track_live_blocks_and_bytes() {
        let a = BlockAllocator::new(SystemPageSource);
        let x = a.allocate(1).unwrap();
        let y = a.allocate(8192).unwrap();
        assert_eq!(a.live_blocks(), 2);
        assert_eq!(a.live_bytes(), 4096 + 8192);

        a.release(x);
        assert_eq!(a.live_blocks(), 1);
        assert_eq!(a.live_bytes(), 8192);
        drop(y);
        assert_eq!(a.live_blocks(), 0);
        assert_eq!(a.stats().total_allocations(), 2);
    }

    #[test]
    fn overflowing_request_is_out_of_memory() {
        let a = BlockAllocator::new(SystemPageSource);
        assert_eq!(
            a.allocate(u64::MAX).unwrap_err(),
            AllocError::OutOfMemory {
                requested: u64::MAX
            }
        );
        assert_eq!(a.live_blocks(), 0);
    }

    #[test]
    fn weak_block_is_revoked_by_release() {
        let a = BlockAllocator::new(SystemPageSource);
        let b = a.allocate(4096).unwrap();
        let weak = b.downgrade();

        weak.pin().unwrap().write(10, b"hi").unwrap();
        assert_eq!(b.read_byte(10).unwrap(), b'h');

        a.release(b);
        assert!(!weak.is_live());
        assert!(weak.pin().is_none());
    }

    #[test]
    fn release_is_counted_before_outstanding_pin_drops() {
        let source = Arc::new(crate::BoundedPageSource::new(SystemPageSource, 4096));
        let a = BlockAllocator::with_source(source.clone());
        let b = a.allocate(4096).unwrap();
        let weak = b.downgrade();
        let pin = weak.pin().unwrap();

        a.release(b);
        assert_eq!(a.live_blocks(), 0);
        assert_eq!(a.live_bytes(), 0);
        // The pages stay with the pin until it goes away.
        assert_eq!(source.in_use(), 4096);
        assert_eq!(pin.read_byte(0), Ok(0));

        drop(pin);
        assert_eq!(source.in_use(), 0);
        assert!(weak.pin().is_none());
    }

    #[test]
    fn out_of_range_access_is_rejected() {
        let a = BlockAllocator::new(SystemPageSource);
        let b = a.allocate(1).unwrap();
        assert!(b.write(4095, b"x").is_ok());
        assert!(b.write(4095, b"xy").is_err());
        assert!(b.read_byte(4096).is_err());
        assert!(b.read(u64::MAX, &mut [0u8; 2]).is_err());
    }
}
