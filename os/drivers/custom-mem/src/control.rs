//! Allocate and Free, serialized.
//!
//! Every change to a session's binding goes through the control channel's
//! ticket mutex: allocation followed by bind, unbind followed by release, and
//! forced cleanup when a session ends. While the mutex is held the number of
//! bound sessions equals the allocator's live block count.

use crate::error::ControlError;
use crate::registry::{BindError, BlockInfo, SessionId, SessionRegistry};
use alloc::sync::Arc;
use core::fmt;
use kernel_alloc::BlockAllocator;
use kernel_sync::TicketMutex;
use log::{debug, info};

/// Counters kept under the control lock.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ControlStats {
    pub allocations: u64,
    pub frees: u64,
    /// Blocks released because their session ended while still bound.
    pub forced_frees: u64,
    /// Control requests that returned an error.
    pub rejected: u64,
}

pub struct ControlChannel {
    lock: TicketMutex<ControlStats>,
    allocator: BlockAllocator,
    registry: Arc<SessionRegistry>,
    max_request_bytes: u64,
}

impl ControlChannel {
    #[must_use]
    pub const fn new(
        allocator: BlockAllocator,
        registry: Arc<SessionRegistry>,
        max_request_bytes: u64,
    ) -> Self {
        Self {
            lock: TicketMutex::new(ControlStats {
                allocations: 0,
                frees: 0,
                forced_frees: 0,
                rejected: 0,
            }),
            allocator,
            registry,
            max_request_bytes,
        }
    }

    /// Register a new session.
    #[must_use]
    pub fn begin_session(&self) -> SessionId {
        self.lock.with_lock(|_| self.registry.open())
    }

    /// Allocate a zero-filled block of at least `size` bytes and bind it to
    /// `session`.
    ///
    /// # Errors
    /// - [`ControlError::InvalidArgument`] for `size == 0`.
    /// - [`ControlError::OutOfMemory`] if the request exceeds the configured
    ///   maximum or the page source is exhausted.
    /// - [`ControlError::AlignmentViolation`] if the page source misbehaved.
    /// - [`ControlError::AlreadyBound`] if the session already holds a block.
    ///   The freshly allocated block is released again.
    pub fn allocate(&self, session: SessionId, size: u64) -> Result<BlockInfo, ControlError> {
        let mut stats = self.lock.lock();
        let result = self.allocate_locked(session, size);
        match &result {
            Ok(_) => stats.allocations += 1,
            Err(e) => {
                stats.rejected += 1;
                debug!("{session}: allocate({size}) rejected: {e}");
            }
        }
        result
    }

    fn allocate_locked(&self, session: SessionId, size: u64) -> Result<BlockInfo, ControlError> {
        if size == 0 {
            return Err(ControlError::InvalidArgument);
        }
        if size > self.max_request_bytes {
            return Err(ControlError::OutOfMemory { requested: size });
        }

        let block = self.allocator.allocate(size)?;
        let info = BlockInfo::from(&block);
        match self.registry.bind(session, block) {
            Ok(()) => {
                info!(
                    "{session}: bound {} bytes at {} ({size} requested)",
                    info.size_bytes, info.base
                );
                Ok(info)
            }
            Err(e) => {
                let err = match &e {
                    BindError::AlreadyBound(_) => ControlError::AlreadyBound,
                    BindError::Closed(_) => ControlError::NotBound,
                };
                self.allocator.release(e.into_block());
                Err(err)
            }
        }
    }

    /// Release the block bound to `session`.
    ///
    /// # Errors
    /// - [`ControlError::NotBound`] if there is nothing to free. No state
    ///   changes.
    /// - [`ControlError::BlockInUse`] while a view onto the block is live.
    pub fn free(&self, session: SessionId) -> Result<(), ControlError> {
        let mut stats = self.lock.lock();
        match self.registry.unbind_idle(session) {
            Ok(Some(block)) => {
                info!("{session}: freed {} bytes at {}", block.size_bytes(), block.base());
                self.allocator.release(block);
                stats.frees += 1;
                Ok(())
            }
            Ok(None) => {
                stats.rejected += 1;
                Err(ControlError::NotBound)
            }
            Err(in_use) => {
                stats.rejected += 1;
                debug!("{session}: free refused, {} view(s) live", in_use.views);
                Err(ControlError::BlockInUse)
            }
        }
    }

    /// Drop the session, releasing its block even if views are still live.
    /// Those views are revoked.
    pub fn end_session(&self, session: SessionId) {
        let mut stats = self.lock.lock();
        if let Some(block) = self.registry.close(session) {
            debug!(
                "{session}: closed while bound, releasing {} bytes at {}",
                block.size_bytes(),
                block.base()
            );
            self.allocator.release(block);
            stats.forced_frees += 1;
        } else {
            debug!("{session}: closed");
        }
    }

    /// Run `f` while no control operation is in progress.
    pub fn quiesce<R>(&self, f: impl FnOnce(&ControlStats) -> R) -> R {
        self.lock.with_lock(|stats| f(stats))
    }

    #[must_use]
    pub fn stats(&self) -> ControlStats {
        self.quiesce(|stats| *stats)
    }

    #[must_use]
    pub const fn allocator(&self) -> &BlockAllocator {
        &self.allocator
    }

    #[must_use]
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    #[must_use]
    pub const fn max_request_bytes(&self) -> u64 {
        self.max_request_bytes
    }
}

impl fmt::Debug for ControlChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlChannel")
            .field("busy", &self.lock.is_locked())
            .field("allocator", &self.allocator)
            .field("max_request_bytes", &self.max_request_bytes)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_alloc::{BoundedPageSource, PAGE_SIZE, SystemPageSource};

    fn channel(max: u64) -> ControlChannel {
        ControlChannel::new(
            BlockAllocator::new(SystemPageSource),
            Arc::new(SessionRegistry::new()),
            max,
        )
    }

    #[test]
    fn allocate_rounds_up_and_binds() {
        let c = channel(1 << 20);
        let s = c.begin_session();
        let info = c.allocate(s, 100).unwrap();
        assert_eq!(info.size_bytes, PAGE_SIZE as u64);
        assert_eq!(info.requested_bytes, 100);
        assert_eq!(c.registry().lookup(s), Some(info));
        assert_eq!(c.allocator().live_blocks(), 1);
    }

    #[test]
    fn zero_and_oversized_requests() {
        let c = channel(8192);
        let s = c.begin_session();
        assert_eq!(c.allocate(s, 0), Err(ControlError::InvalidArgument));
        assert_eq!(
            c.allocate(s, 8193),
            Err(ControlError::OutOfMemory { requested: 8193 })
        );
        assert_eq!(c.allocator().live_blocks(), 0);
        assert_eq!(c.stats().rejected, 2);
    }

    #[test]
    fn second_allocate_releases_the_new_block() {
        let c = channel(1 << 20);
        let s = c.begin_session();
        let first = c.allocate(s, 4096).unwrap();
        assert_eq!(c.allocate(s, 4096), Err(ControlError::AlreadyBound));
        assert_eq!(c.allocator().live_blocks(), 1);
        assert_eq!(c.registry().lookup(s), Some(first));
    }

    #[test]
    fn exhausted_source_reports_oom() {
        let c = ControlChannel::new(
            BlockAllocator::new(BoundedPageSource::new(SystemPageSource, 4096)),
            Arc::new(SessionRegistry::new()),
            1 << 20,
        );
        let a = c.begin_session();
        let b = c.allocate(a, 4096);
        assert!(b.is_ok());
        let s = c.begin_session();
        assert!(matches!(
            c.allocate(s, 1),
            Err(ControlError::OutOfMemory { .. })
        ));
        assert_eq!(c.registry().bound_sessions(), 1);
    }

    #[test]
    fn free_then_free_again() {
        let c = channel(1 << 20);
        let s = c.begin_session();
        c.allocate(s, 1).unwrap();
        assert_eq!(c.free(s), Ok(()));
        assert_eq!(c.free(s), Err(ControlError::NotBound));
        assert_eq!(c.allocator().live_blocks(), 0);
        let stats = c.stats();
        assert_eq!((stats.allocations, stats.frees), (1, 1));
    }

    #[test]
    fn end_session_forces_release() {
        let c = channel(1 << 20);
        let s = c.begin_session();
        c.allocate(s, 3 * 4096).unwrap();
        let _grant = c.registry().acquire_view(s).unwrap();
        c.end_session(s);
        assert_eq!(c.allocator().live_blocks(), 0);
        assert_eq!(c.registry().session_count(), 0);
        assert_eq!(c.stats().forced_frees, 1);
    }
}
