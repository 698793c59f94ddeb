//! # Page-Granular Block Allocation
//!
//! This crate hands out zero-filled, page-aligned blocks of raw memory and
//! takes them back. It is the bottom layer of the shared-memory driver: the
//! driver binds one [`Block`] to each client session and exposes a window
//! onto it, but it never touches raw memory itself.
//!
//! ## Layers
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                  BlockAllocator                     │
//! │    • rounds requests up to whole 4 KiB pages        │
//! │    • verifies page alignment, zero-fills            │
//! │    • live block / byte accounting                   │
//! └─────────────────┬───────────────────────────────────┘
//!                   │ Layout { size: n * 4096, align: 4096 }
//! ┌─────────────────▼───────────────────────────────────┐
//! │                   PageSource                        │
//! │    • SystemPageSource: the global heap              │
//! │    • BoundedPageSource: fixed memory budget         │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Ownership
//!
//! A [`Block`] owns its storage exclusively and is not `Clone`. Anything
//! that merely needs to look at the bytes for a while gets a [`WeakBlock`],
//! which has to be [pinned](WeakBlock::pin) for every access and fails once
//! the block has been released. Releasing a block therefore never leaves a
//! dangling reference behind.
//!
//! Block bytes are exposed as relaxed atomic cells: both sides of a shared
//! mapping may read and write concurrently without undefined behavior, but
//! no ordering between them is promised.
//!
//! ## Usage
//!
//! ```rust
//! use kernel_alloc::{BlockAllocator, SystemPageSource};
//!
//! let allocator = BlockAllocator::new(SystemPageSource);
//! let block = allocator.allocate(1).unwrap();
//! assert_eq!(block.size_bytes(), 4096);
//! assert!(block.is_zeroed());
//! assert_eq!(allocator.live_blocks(), 1);
//!
//! allocator.release(block);
//! assert_eq!(allocator.live_blocks(), 0);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

extern crate alloc;

mod allocator;
mod block;
mod error;
mod page_source;

pub use allocator::{AllocStats, BlockAllocator};
pub use block::{Block, BlockPin, WeakBlock};
pub use error::{AllocError, OutOfBounds};
pub use page_source::{BoundedPageSource, PageSource, SystemPageSource};

use kernel_memory_addresses::{PageSize, Size4K};

/// Allocation and mapping granularity in bytes.
#[allow(clippy::cast_possible_truncation)]
pub const PAGE_SIZE: usize = Size4K::SIZE as usize;
