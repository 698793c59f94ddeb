use crate::config::DriverConfig;
use crate::control::ControlChannel;
use crate::error::{ControlError, MapError};
use crate::mapping::{MappingService, Protection, View};
use crate::protocol;
use crate::registry::{BlockInfo, SessionId, SessionRegistry, SessionState};
use alloc::sync::Arc;
use core::fmt;
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use kernel_alloc::{BlockAllocator, BlockPin, BoundedPageSource, PageSource, SystemPageSource};
use log::info;

struct Inner {
    config: DriverConfig,
    registry: Arc<SessionRegistry>,
    control: ControlChannel,
    mapping: MappingService,
    open_sessions: AtomicUsize,
    total_opens: AtomicU64,
}

/// The published device. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct Device {
    inner: Arc<Inner>,
}

impl Device {
    /// Create a device backed by the global heap, bounded by
    /// [`DriverConfig::capacity_bytes`] if set.
    #[must_use]
    pub fn new(config: DriverConfig) -> Self {
        let source: Arc<dyn PageSource> = match config.capacity_bytes() {
            Some(capacity) => Arc::new(BoundedPageSource::new(SystemPageSource, capacity)),
            None => Arc::new(SystemPageSource),
        };
        Self::with_page_source(config, source)
    }

    #[must_use]
    pub fn with_page_source(config: DriverConfig, source: Arc<dyn PageSource>) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        let control = ControlChannel::new(
            BlockAllocator::with_source(source),
            Arc::clone(&registry),
            config.max_request_bytes(),
        );
        info!(
            "{}: device ready (class {}, capacity {:?})",
            config.device_name(),
            config.class_name(),
            config.capacity_bytes()
        );
        Self {
            inner: Arc::new(Inner {
                mapping: MappingService::new(Arc::clone(&registry)),
                config,
                registry,
                control,
                open_sessions: AtomicUsize::new(0),
                total_opens: AtomicU64::new(0),
            }),
        }
    }

    /// Open a new client session.
    #[must_use]
    pub fn open(&self) -> Session {
        let id = self.inner.control.begin_session();
        let open = self.inner.open_sessions.fetch_add(1, Ordering::Relaxed) + 1;
        self.inner.total_opens.fetch_add(1, Ordering::Relaxed);
        info!("{}: {id} opened ({open} open)", self.inner.config.device_name());
        Session {
            id,
            inner: Arc::clone(&self.inner),
        }
    }

    #[must_use]
    pub fn config(&self) -> &DriverConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn control(&self) -> &ControlChannel {
        &self.inner.control
    }

    #[must_use]
    pub fn mapping(&self) -> &MappingService {
        &self.inner.mapping
    }

    #[must_use]
    pub fn registry(&self) -> &SessionRegistry {
        &self.inner.registry
    }

    /// Sessions currently open.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.inner.open_sessions.load(Ordering::Relaxed)
    }

    /// Sessions opened since the device was created.
    #[must_use]
    pub fn total_opens(&self) -> u64 {
        self.inner.total_opens.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn live_blocks(&self) -> usize {
        self.inner.control.allocator().live_blocks()
    }

    #[must_use]
    pub fn bound_sessions(&self) -> usize {
        self.inner.registry.bound_sessions()
    }
}

impl Default for Device {
    fn default() -> Self {
        Self::new(DriverConfig::default())
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("config", &self.inner.config)
            .field("open", &self.open_count())
            .field("registry", &self.inner.registry)
            .finish_non_exhaustive()
    }
}

/// One client's handle on the device.
///
/// Dropping the session ends it: a block still bound is released, and any
/// views onto it are revoked.
pub struct Session {
    id: SessionId,
    inner: Arc<Inner>,
}

impl Session {
    #[must_use]
    pub const fn id(&self) -> SessionId {
        self.id
    }

    /// # Errors
    /// See [`ControlChannel::allocate`].
    pub fn allocate(&self, size: u64) -> Result<BlockInfo, ControlError> {
        self.inner.control.allocate(self.id, size)
    }

    /// # Errors
    /// See [`ControlChannel::free`].
    pub fn free(&self) -> Result<(), ControlError> {
        self.inner.control.free(self.id)
    }

    /// Map the bound block for reading and writing.
    ///
    /// # Errors
    /// [`MapError::NotBound`] if no block is bound.
    pub fn map(&self) -> Result<View, MapError> {
        self.map_with(Protection::READ_WRITE)
    }

    /// # Errors
    /// See [`MappingService::map`].
    pub fn map_with(&self, protection: Protection) -> Result<View, MapError> {
        self.inner.mapping.map(self.id, protection)
    }

    pub fn unmap(&self, view: View) {
        self.inner.mapping.unmap(view);
    }

    /// Raw control entry point: `0` on success, `-errno` on failure.
    #[must_use]
    pub fn ioctl(&self, cmd: u32, arg: u64) -> i64 {
        protocol::dispatch(&self.inner.control, self.id, cmd, arg)
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.inner
            .registry
            .state(self.id)
            .unwrap_or(SessionState::Unbound)
    }

    #[must_use]
    pub fn block(&self) -> Option<BlockInfo> {
        self.inner.registry.lookup(self.id)
    }

    /// Device-side access to the bound block.
    ///
    /// `f` runs on a pin taken outside the registry lock, so it may use this
    /// session (or any other) freely. A free or session end racing with `f`
    /// unbinds the block but leaves its pages readable until `f` returns.
    pub fn with_block<R>(&self, f: impl FnOnce(&BlockPin) -> R) -> Option<R> {
        self.inner.registry.pin(self.id).map(|pin| f(&pin))
    }

    /// End the session now. Same as dropping it.
    pub fn close(self) {
        drop(self);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.inner.control.end_session(self.id);
        self.inner.open_sessions.fetch_sub(1, Ordering::Relaxed);
        info!("{}: {} released", self.inner.config.device_name(), self.id);
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_and_close_are_counted() {
        let d = Device::default();
        let a = d.open();
        let b = d.open();
        assert_ne!(a.id(), b.id());
        assert_eq!(d.open_count(), 2);
        a.close();
        assert_eq!(d.open_count(), 1);
        assert_eq!(d.total_opens(), 2);
        drop(b);
        assert_eq!(d.registry().session_count(), 0);
    }

    #[test]
    fn capacity_bounds_the_device() {
        let d = Device::new(DriverConfig::new().with_capacity_bytes(Some(8192)));
        let a = d.open();
        let b = d.open();
        a.allocate(8192).unwrap();
        assert!(matches!(
            b.allocate(1),
            Err(ControlError::OutOfMemory { .. })
        ));
        a.free().unwrap();
        assert!(b.allocate(1).is_ok());
    }

    #[test]
    fn device_side_access_can_reenter_the_session() {
        let d = Device::default();
        let s = d.open();
        s.allocate(4096).unwrap();

        let info = s
            .with_block(|pin| {
                assert_eq!(s.state(), SessionState::Bound);
                let view = s.map().unwrap();
                assert_eq!(s.state(), SessionState::Mapped);
                pin.write_byte(7, 0x5A).unwrap();
                assert_eq!(view.read_byte(7), Ok(0x5A));
                drop(view);
                assert_eq!(s.state(), SessionState::Bound);
                s.block()
            })
            .unwrap();
        assert_eq!(info, s.block());
    }

    #[test]
    fn device_side_access_does_not_stall_other_sessions() {
        let d = Device::default();
        let a = d.open();
        let b = d.open();
        a.allocate(4096).unwrap();

        a.with_block(|_| {
            b.allocate(4096).unwrap();
            b.free().unwrap();
            drop(d.open());
        })
        .unwrap();
        assert_eq!(d.live_blocks(), 1);
    }

    #[test]
    fn ioctl_round_trip() {
        let d = Device::default();
        let s = d.open();
        assert_eq!(s.ioctl(0, 4096), 0);
        assert_eq!(s.state(), SessionState::Bound);
        assert_eq!(s.ioctl(0, 4096), -17);
        assert_eq!(s.ioctl(1, 0), 0);
        assert_eq!(s.ioctl(1, 0), -6);
        assert_eq!(s.ioctl(0, 0), -22);
        assert_eq!(s.ioctl(7, 0), -25);
    }
}
