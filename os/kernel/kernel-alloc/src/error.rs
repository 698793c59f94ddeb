use kernel_memory_addresses::MemoryAddress;

/// Why the allocator could not produce a block.
///
/// Both variants guarantee that no raw memory is left outstanding: either
/// none was obtained, or it was returned to the page source before the error
/// was reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AllocError {
    #[error("out of memory (requested {requested} bytes)")]
    OutOfMemory { requested: u64 },
    #[error("page source returned misaligned memory at {addr}")]
    AlignmentViolation { addr: MemoryAddress },
}

/// A byte range that does not fit inside the addressed storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("range {offset}+{len} exceeds {size} bytes")]
pub struct OutOfBounds {
    pub offset: u64,
    pub len: u64,
    pub size: u64,
}
