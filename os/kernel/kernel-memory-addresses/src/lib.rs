//! # Page-Typed Memory Addresses
//!
//! Strongly typed wrappers for the raw addresses, page bases and page spans
//! handed around by the block allocator and the mapping service.
//!
//! ## Overview
//!
//! | Concept | Generic | Description |
//! |----------|----------|-------------|
//! | [`MemoryAddress`] | – | A raw 64-bit address. |
//! | [`MemoryPage<S>`] | [`S: PageSize`](PageSize) | A page-aligned base address of a page of size `S`. |
//! | [`PageSpan<S>`] | [`S: PageSize`](PageSize) | A byte length rounded up to whole pages (at least one). |
//!
//! The allocation granularity is [`Size4K`]; [`PageSize`] is sealed so no
//! other granularity can sneak into the allocator.
//!
//! ## Typical Usage
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! // A request for a single byte still occupies a whole page.
//! let span = PageSpan::<Size4K>::covering(1).unwrap();
//! assert_eq!(span.bytes(), 4096);
//!
//! // Page bases must already be aligned.
//! let page = MemoryPage::<Size4K>::try_from_addr(MemoryAddress::new(0x4242_4000)).unwrap();
//! assert_eq!(page.base().as_u64(), 0x4242_4000);
//! assert!(MemoryPage::<Size4K>::try_from_addr(MemoryAddress::new(0x4242_4123)).is_none());
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(clippy::inline_always)]

mod memory_address;
mod memory_page;
mod page_size;
mod page_span;

pub use memory_address::MemoryAddress;
pub use memory_page::MemoryPage;
pub use page_size::{PageSize, Size4K};
pub use page_span::PageSpan;
