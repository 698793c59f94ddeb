//! # Shared Memory Device
//!
//! A character-device style service that lets a client allocate one
//! page-granular, zero-filled block of memory, map it, exchange bytes with
//! the device side through it, and free it again.
//!
//! ```text
//!   client                     Session (one per open)
//!     │ allocate(n) / free()  ──► ControlChannel ── ticket mutex ──┐
//!     │                                 │                          │
//!     │                                 ▼                          ▼
//!     │ map() ──────────────────► SessionRegistry ◄──────── BlockAllocator
//!     │                            (spin lock)                     │
//!     ▼                                 │                          ▼
//!   View ─── pin() per access ──► WeakBlock ──────────────────► Block
//! ```
//!
//! Allocation and free are serialized by the control channel. Views take no
//! part in that serialization: they reach the block through a weak handle
//! and are revoked once the block is released, which happens when the
//! session is dropped while still bound.
//!
//! ```
//! use custom_mem::Device;
//!
//! let device = Device::default();
//! let session = device.open();
//! session.allocate(4096).unwrap();
//!
//! session.with_block(|b| b.write(0, b"Hello from kernel space\0")).unwrap().unwrap();
//! let view = session.map().unwrap();
//! assert_eq!(view.read_cstr(0).unwrap(), b"Hello from kernel space");
//!
//! session.unmap(view);
//! session.free().unwrap();
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

mod config;
mod control;
mod device;
mod error;
mod mapping;
pub mod protocol;
mod registry;

pub use config::{CLASS_NAME, DEFAULT_MAX_REQUEST_BYTES, DEVICE_NAME, DriverConfig};
pub use control::{ControlChannel, ControlStats};
pub use device::{Device, Session};
pub use error::{ControlError, ErrorClass, MapError, ViewError};
pub use kernel_alloc::{AllocError, Block, BlockPin, PAGE_SIZE, PageSource, WeakBlock};
pub use mapping::{MappingService, Protection, View};
pub use registry::{BindError, BlockInfo, InUse, SessionId, SessionRegistry, SessionState, ViewGrant};

/// Size of every view, regardless of the block size.
pub const VIEW_BYTES: u64 = PAGE_SIZE as u64;
