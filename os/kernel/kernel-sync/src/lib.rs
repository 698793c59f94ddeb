//! # Synchronization primitives
//!
//! Busy-waiting locks for short critical sections:
//!
//! - [`SpinLock`]: test-and-test-and-set lock, used where the protected
//!   section is a handful of loads and stores (registry lookups, view
//!   accounting).
//! - [`TicketMutex`]: FIFO-fair mutex; waiters are served in arrival order,
//!   so one busy session cannot starve the others. Used as the control lock.
//! - [`SyncOnceCell`]: write-once cell for statics such as the installed
//!   logger.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod mutex;
mod raw_ticket;
mod spin_lock;
mod sync_once_cell;

pub use mutex::{Mutex, MutexGuard};
pub use raw_ticket::RawTicket;
pub use spin_lock::{SpinLock, SpinLockGuard};
pub use sync_once_cell::SyncOnceCell;

pub type TicketMutex<T> = Mutex<T, RawTicket>;

impl<T> TicketMutex<T> {
    pub const fn new(value: T) -> Self {
        Self::from_raw(RawTicket::new(), value)
    }
}

pub trait RawLock {
    fn raw_lock(&self);
    fn raw_try_lock(&self) -> bool;
    /// Snapshot of whether someone holds the lock right now.
    fn raw_is_locked(&self) -> bool;
}

pub trait RawUnlock {
    /// # Safety
    /// The caller must currently hold the lock.
    unsafe fn raw_unlock(&self);
}
