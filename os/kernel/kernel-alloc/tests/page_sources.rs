use kernel_alloc::{
    AllocError, BlockAllocator, BoundedPageSource, PAGE_SIZE, PageSource, SystemPageSource,
};
use std::alloc::Layout;
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Hands out memory that is deliberately 8 bytes past a page boundary.
#[derive(Default)]
struct SkewedSource {
    outstanding: AtomicUsize,
}

const SKEW: usize = 8;

fn padded(layout: Layout) -> Layout {
    Layout::from_size_align(layout.size() + PAGE_SIZE, PAGE_SIZE).unwrap()
}

impl PageSource for SkewedSource {
    fn alloc_raw(&self, layout: Layout) -> Option<NonNull<u8>> {
        let raw = NonNull::new(unsafe { std::alloc::alloc(padded(layout)) })?;
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        Some(unsafe { raw.add(SKEW) })
    }

    unsafe fn free_raw(&self, ptr: NonNull<u8>, layout: Layout) {
        self.outstanding.fetch_sub(1, Ordering::SeqCst);
        unsafe { std::alloc::dealloc(ptr.sub(SKEW).as_ptr(), padded(layout)) }
    }
}

/// Never has memory.
struct EmptySource;

impl PageSource for EmptySource {
    fn alloc_raw(&self, _layout: Layout) -> Option<NonNull<u8>> {
        None
    }

    unsafe fn free_raw(&self, _ptr: NonNull<u8>, _layout: Layout) {
        unreachable!("nothing was ever handed out");
    }
}

#[test]
fn misaligned_memory_is_released_and_reported() {
    let source = Arc::new(SkewedSource::default());
    let allocator = BlockAllocator::with_source(source.clone());

    let err = allocator.allocate(4096).unwrap_err();
    let AllocError::AlignmentViolation { addr } = err else {
        panic!("expected an alignment violation, got {err:?}");
    };
    assert_eq!(addr.as_u64() % PAGE_SIZE as u64, SKEW as u64);
    assert_eq!(source.outstanding.load(Ordering::SeqCst), 0);
    assert_eq!(allocator.live_blocks(), 0);
}

#[test]
fn exhausted_source_is_out_of_memory() {
    let allocator = BlockAllocator::new(EmptySource);
    assert_eq!(
        allocator.allocate(1).unwrap_err(),
        AllocError::OutOfMemory { requested: 1 }
    );
}

#[test]
fn budget_is_enforced_across_blocks() {
    let source = Arc::new(BoundedPageSource::new(SystemPageSource, 3 * PAGE_SIZE as u64));
    let allocator = BlockAllocator::with_source(source.clone());

    let a = allocator.allocate(2 * PAGE_SIZE as u64).unwrap();
    assert!(matches!(
        allocator.allocate(2 * PAGE_SIZE as u64),
        Err(AllocError::OutOfMemory { .. })
    ));
    let b = allocator.allocate(1).unwrap();
    assert_eq!(source.in_use(), 3 * PAGE_SIZE as u64);

    allocator.release(a);
    allocator.release(b);
    assert_eq!(source.in_use(), 0);
    assert_eq!(allocator.live_bytes(), 0);
}

#[test]
fn blocks_never_overlap() {
    let allocator = BlockAllocator::new(SystemPageSource);
    let blocks: Vec<_> = (1..=4)
        .map(|pages| allocator.allocate(pages * PAGE_SIZE as u64).unwrap())
        .collect();

    for (i, a) in blocks.iter().enumerate() {
        for b in &blocks[i + 1..] {
            let (a0, a1) = (a.base().base().as_u64(), a.base().base().as_u64() + a.size_bytes());
            let (b0, b1) = (b.base().base().as_u64(), b.base().base().as_u64() + b.size_bytes());
            assert!(a1 <= b0 || b1 <= a0, "{a:?} overlaps {b:?}");
        }
    }
}
