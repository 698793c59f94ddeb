use crate::allocator::AllocStats;
use crate::error::OutOfBounds;
use crate::page_source::PageSource;
use alloc::sync::{Arc, Weak};
use core::alloc::Layout;
use core::fmt;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicU8, Ordering};
use kernel_memory_addresses::{MemoryPage, Size4K};

/// The raw pages behind a [`Block`]. Returned to their source once the
/// block and every [`BlockPin`] are gone.
struct Frames {
    ptr: NonNull<u8>,
    layout: Layout,
    source: Arc<dyn PageSource>,
}

// SAFETY: the pages are only ever accessed through `AtomicU8` cells, and the
// pointer is exclusively owned by this struct.
unsafe impl Send for Frames {}
unsafe impl Sync for Frames {}

impl Frames {
    #[inline]
    fn cells(&self) -> &[AtomicU8] {
        // SAFETY: `AtomicU8` has the size and alignment of `u8`; the region is
        // initialized (zero-filled at allocation) and lives as long as `self`.
        unsafe {
            core::slice::from_raw_parts(self.ptr.as_ptr().cast::<AtomicU8>(), self.layout.size())
        }
    }
}

impl Drop for Frames {
    fn drop(&mut self) {
        log::trace!(
            "returning {} bytes at {:p} to page source",
            self.layout.size(),
            self.ptr
        );
        // SAFETY: obtained from `source` with `layout`; this is the last owner.
        unsafe { self.source.free_raw(self.ptr, self.layout) };
    }
}

/// A page-aligned, page-rounded block of memory with a single owner.
///
/// # Invariants
/// - `size_bytes()` is a positive multiple of the page size.
/// - `base()` is page-aligned.
/// - There is exactly one `Block` per allocation; views onto it are
///   [`WeakBlock`]s and do not keep it alive.
///
/// Dropping the block counts it as released in [`AllocStats`] right away.
/// The pages themselves go back to the source when the last [`BlockPin`]
/// is dropped, so a source's own usage figure may lag briefly.
pub struct Block {
    frames: Arc<Frames>,
    base: MemoryPage<Size4K>,
    requested: u64,
    stats: Arc<AllocStats>,
}

impl Block {
    pub(crate) fn new(
        ptr: NonNull<u8>,
        layout: Layout,
        base: MemoryPage<Size4K>,
        requested: u64,
        source: Arc<dyn PageSource>,
        stats: Arc<AllocStats>,
    ) -> Self {
        Self {
            frames: Arc::new(Frames {
                ptr,
                layout,
                source,
            }),
            base,
            requested,
            stats,
        }
    }

    /// Size in bytes, rounded up to whole pages.
    #[inline]
    #[must_use]
    pub fn size_bytes(&self) -> u64 {
        self.frames.layout.size() as u64
    }

    /// The size originally asked for.
    #[inline]
    #[must_use]
    pub const fn requested_bytes(&self) -> u64 {
        self.requested
    }

    #[inline]
    #[must_use]
    pub fn pages(&self) -> u64 {
        self.size_bytes() / crate::PAGE_SIZE as u64
    }

    #[inline]
    #[must_use]
    pub const fn base(&self) -> MemoryPage<Size4K> {
        self.base
    }

    /// A non-owning handle for mappings.
    #[must_use]
    pub fn downgrade(&self) -> WeakBlock {
        WeakBlock {
            frames: Arc::downgrade(&self.frames),
            base: self.base,
            size: self.size_bytes(),
        }
    }

    pub fn read(&self, offset: u64, buf: &mut [u8]) -> Result<(), OutOfBounds> {
        copy_out(self.frames.cells(), offset, buf)
    }

    pub fn write(&self, offset: u64, data: &[u8]) -> Result<(), OutOfBounds> {
        copy_in(self.frames.cells(), offset, data)
    }

    pub fn read_byte(&self, offset: u64) -> Result<u8, OutOfBounds> {
        let mut b = [0u8];
        self.read(offset, &mut b)?;
        Ok(b[0])
    }

    pub fn write_byte(&self, offset: u64, byte: u8) -> Result<(), OutOfBounds> {
        self.write(offset, &[byte])
    }

    pub fn fill(&self, byte: u8) {
        for cell in self.frames.cells() {
            cell.store(byte, Ordering::Relaxed);
        }
    }

    /// Whether every byte of the block is zero.
    #[must_use]
    pub fn is_zeroed(&self) -> bool {
        self.frames
            .cells()
            .iter()
            .all(|c| c.load(Ordering::Relaxed) == 0)
    }
}

impl Drop for Block {
    fn drop(&mut self) {
        self.stats.on_release(self.size_bytes());
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("base", &self.base)
            .field("size_bytes", &self.size_bytes())
            .field("requested", &self.requested)
            .finish()
    }
}

/// A non-owning reference to a [`Block`]'s storage.
#[derive(Clone)]
pub struct WeakBlock {
    frames: Weak<Frames>,
    base: MemoryPage<Size4K>,
    size: u64,
}

impl WeakBlock {
    /// Hold the storage for the duration of one access, or `None` if the
    /// block has been released.
    #[must_use]
    pub fn pin(&self) -> Option<BlockPin> {
        self.frames.upgrade().map(|frames| BlockPin { frames })
    }

    /// Whether the block still exists. Racy by nature.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.frames.strong_count() > 0
    }

    #[inline]
    #[must_use]
    pub const fn base(&self) -> MemoryPage<Size4K> {
        self.base
    }

    #[inline]
    #[must_use]
    pub const fn size_bytes(&self) -> u64 {
        self.size
    }
}

impl fmt::Debug for WeakBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakBlock")
            .field("base", &self.base)
            .field("size_bytes", &self.size)
            .field("live", &self.is_live())
            .finish()
    }
}

/// Short-lived access to a block's bytes obtained from [`WeakBlock::pin`].
///
/// While a pin exists, releasing the block defers returning its pages until
/// the pin is dropped. Keep pins scoped to a single read or write.
pub struct BlockPin {
    frames: Arc<Frames>,
}

impl BlockPin {
    #[inline]
    #[must_use]
    pub fn len(&self) -> u64 {
        self.frames.layout.size() as u64
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn read(&self, offset: u64, buf: &mut [u8]) -> Result<(), OutOfBounds> {
        copy_out(self.frames.cells(), offset, buf)
    }

    pub fn write(&self, offset: u64, data: &[u8]) -> Result<(), OutOfBounds> {
        copy_in(self.frames.cells(), offset, data)
    }

    pub fn read_byte(&self, offset: u64) -> Result<u8, OutOfBounds> {
        let mut b = [0u8];
        self.read(offset, &mut b)?;
        Ok(b[0])
    }

    pub fn write_byte(&self, offset: u64, byte: u8) -> Result<(), OutOfBounds> {
        self.write(offset, &[byte])
    }

    #[must_use]
    pub fn is_zeroed(&self) -> bool {
        self.frames
            .cells()
            .iter()
            .all(|c| c.load(Ordering::Relaxed) == 0)
    }

    /// Store `byte` into `range_len` bytes starting at `offset`.
    pub fn fill(&self, offset: u64, range_len: u64, byte: u8) -> Result<(), OutOfBounds> {
        let cells = range(self.frames.cells(), offset, range_len)?;
        for cell in cells {
            cell.store(byte, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Index of the first zero byte in `offset..offset + limit`, if any.
    pub fn find_zero(&self, offset: u64, limit: u64) -> Result<Option<u64>, OutOfBounds> {
        let cells = range(self.frames.cells(), offset, limit)?;
        Ok(cells
            .iter()
            .position(|c| c.load(Ordering::Relaxed) == 0)
            .map(|i| i as u64))
    }
}

fn range(cells: &[AtomicU8], offset: u64, len: u64) -> Result<&[AtomicU8], OutOfBounds> {
    let size = cells.len() as u64;
    let oob = OutOfBounds { offset, len, size };
    let end = offset.checked_add(len).ok_or(oob)?;
    if end > size {
        return Err(oob);
    }
    // Both bounds are <= cells.len(), so they fit in usize.
    let (Ok(start), Ok(end)) = (usize::try_from(offset), usize::try_from(end)) else {
        return Err(oob);
    };
    Ok(&cells[start..end])
}

fn copy_out(cells: &[AtomicU8], offset: u64, buf: &mut [u8]) -> Result<(), OutOfBounds> {
    let src = range(cells, offset, buf.len() as u64)?;
    for (dst, cell) in buf.iter_mut().zip(src) {
        *dst = cell.load(Ordering::Relaxed);
    }
    Ok(())
}

fn copy_in(cells: &[AtomicU8], offset: u64, data: &[u8]) -> Result<(), OutOfBounds> {
    let dst = range(cells, offset, data.len() as u64)?;
    for (cell, &b) in dst.iter().zip(data) {
        cell.store(b, Ordering::Relaxed);
    }
    Ok(())
}
