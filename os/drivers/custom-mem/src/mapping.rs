//! Windows onto a session's block.
//!
//! A [`View`] exposes the first page of the bound block and never owns it.
//! Each access pins the block for its duration; once the block is released
//! (the session ended) every access fails with [`ViewError::Revoked`].

use crate::VIEW_BYTES;
use crate::error::{MapError, ViewError};
use crate::registry::{SessionId, SessionRegistry};
use alloc::sync::Arc;
use alloc::vec::Vec;
use bitfield_struct::bitfield;
use core::fmt;
use kernel_alloc::{BlockPin, OutOfBounds, WeakBlock};
use kernel_memory_addresses::{MemoryPage, Size4K};
use log::debug;

/// Access rights requested for a view.
#[bitfield(u8)]
#[derive(PartialEq, Eq)]
pub struct Protection {
    pub read: bool,
    pub write: bool,
    #[bits(6)]
    __: u8,
}

impl Protection {
    pub const READ: Self = Self::new().with_read(true);
    pub const WRITE: Self = Self::new().with_write(true);
    pub const READ_WRITE: Self = Self::new().with_read(true).with_write(true);

    #[must_use]
    pub const fn is_empty(self) -> bool {
        !self.read() && !self.write()
    }
}

pub struct MappingService {
    registry: Arc<SessionRegistry>,
}

impl MappingService {
    #[must_use]
    pub const fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    /// Establish a view onto the block currently bound to `session`.
    ///
    /// # Errors
    /// - [`MapError::InvalidProtection`] for an empty protection.
    /// - [`MapError::NotBound`] if the session holds no block.
    pub fn map(&self, session: SessionId, protection: Protection) -> Result<View, MapError> {
        if protection.is_empty() {
            return Err(MapError::InvalidProtection);
        }
        let grant = self
            .registry
            .acquire_view(session)
            .ok_or(MapError::NotBound)?;
        debug!("{session}: mapped {:?}", grant.block);
        Ok(View {
            session,
            block: grant.block,
            epoch: grant.epoch,
            protection,
            registry: Arc::clone(&self.registry),
        })
    }

    /// Tear down a view. Equivalent to dropping it.
    pub fn unmap(&self, view: View) {
        debug!("{}: unmapped {:?}", view.session, view.block);
        drop(view);
    }
}

impl fmt::Debug for MappingService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappingService").finish_non_exhaustive()
    }
}

/// A one-page window onto a bound block.
pub struct View {
    session: SessionId,
    block: WeakBlock,
    epoch: u64,
    protection: Protection,
    registry: Arc<SessionRegistry>,
}

impl View {
    #[must_use]
    pub const fn session(&self) -> SessionId {
        self.session
    }

    /// Size of the window in bytes; always one page.
    #[must_use]
    pub const fn len(&self) -> u64 {
        VIEW_BYTES
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        false
    }

    /// Base of the block the view was created on.
    #[must_use]
    pub const fn base(&self) -> MemoryPage<Size4K> {
        self.block.base()
    }

    #[must_use]
    pub const fn protection(&self) -> Protection {
        self.protection
    }

    /// Whether the underlying block still exists.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.block.is_live()
    }

    /// # Errors
    /// See [`ViewError`].
    pub fn read(&self, offset: u64, buf: &mut [u8]) -> Result<(), ViewError> {
        let pin = self.readable(offset, buf.len() as u64)?;
        Ok(pin.read(offset, buf)?)
    }

    /// # Errors
    /// See [`ViewError`].
    pub fn write(&self, offset: u64, data: &[u8]) -> Result<(), ViewError> {
        let pin = self.writable(offset, data.len() as u64)?;
        Ok(pin.write(offset, data)?)
    }

    /// # Errors
    /// See [`ViewError`].
    pub fn read_byte(&self, offset: u64) -> Result<u8, ViewError> {
        let mut b = [0u8];
        self.read(offset, &mut b)?;
        Ok(b[0])
    }

    /// # Errors
    /// See [`ViewError`].
    pub fn write_byte(&self, offset: u64, byte: u8) -> Result<(), ViewError> {
        self.write(offset, &[byte])
    }

    /// Set every byte of the window to `byte`.
    ///
    /// # Errors
    /// See [`ViewError`].
    pub fn fill(&self, byte: u8) -> Result<(), ViewError> {
        let pin = self.writable(0, VIEW_BYTES)?;
        Ok(pin.fill(0, VIEW_BYTES, byte)?)
    }

    /// Bytes from `offset` up to the first NUL, or to the end of the window
    /// if there is none. The NUL is not included.
    ///
    /// # Errors
    /// See [`ViewError`].
    pub fn read_cstr(&self, offset: u64) -> Result<Vec<u8>, ViewError> {
        let rest = VIEW_BYTES.checked_sub(offset).ok_or(OutOfBounds {
            offset,
            len: 0,
            size: VIEW_BYTES,
        })?;
        let pin = self.readable(offset, rest)?;
        let len = pin.find_zero(offset, rest)?.unwrap_or(rest);
        let mut out = alloc::vec![0u8; usize::try_from(len).unwrap_or(0)];
        pin.read(offset, &mut out)?;
        Ok(out)
    }

    fn readable(&self, offset: u64, len: u64) -> Result<BlockPin, ViewError> {
        if !self.protection.read() {
            return Err(ViewError::WriteOnly);
        }
        self.pin(offset, len)
    }

    fn writable(&self, offset: u64, len: u64) -> Result<BlockPin, ViewError> {
        if !self.protection.write() {
            return Err(ViewError::ReadOnly);
        }
        self.pin(offset, len)
    }

    fn pin(&self, offset: u64, len: u64) -> Result<BlockPin, ViewError> {
        let oob = OutOfBounds {
            offset,
            len,
            size: VIEW_BYTES,
        };
        let end = offset.checked_add(len).ok_or(oob)?;
        if end > VIEW_BYTES {
            return Err(oob.into());
        }
        self.block.pin().ok_or(ViewError::Revoked)
    }
}

impl Drop for View {
    fn drop(&mut self) {
        self.registry.release_view(self.session, self.epoch);
    }
}

impl fmt::Debug for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("View")
            .field("session", &self.session)
            .field("block", &self.block)
            .field("protection", &self.protection)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_alloc::{BlockAllocator, SystemPageSource};

    struct Fixture {
        registry: Arc<SessionRegistry>,
        mapping: MappingService,
        alloc: BlockAllocator,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(SessionRegistry::new());
        Fixture {
            mapping: MappingService::new(Arc::clone(&registry)),
            registry,
            alloc: BlockAllocator::new(SystemPageSource),
        }
    }

    #[test]
    fn protection_bits() {
        assert_eq!(Protection::READ_WRITE.into_bits(), 0b11);
        assert!(Protection::new().is_empty());
        assert!(!Protection::WRITE.is_empty());
    }

    #[test]
    fn map_requires_binding_and_access() {
        let f = fixture();
        let s = f.registry.open();
        assert_eq!(
            f.mapping.map(s, Protection::READ).unwrap_err(),
            MapError::NotBound
        );
        f.registry.bind(s, f.alloc.allocate(1).unwrap()).unwrap();
        assert_eq!(
            f.mapping.map(s, Protection::new()).unwrap_err(),
            MapError::InvalidProtection
        );
        let v = f.mapping.map(s, Protection::READ).unwrap();
        assert_eq!(v.len(), VIEW_BYTES);
        assert_eq!(f.registry.views(s), 1);
        f.mapping.unmap(v);
        assert_eq!(f.registry.views(s), 0);
    }

    #[test]
    fn protection_is_enforced() {
        let f = fixture();
        let s = f.registry.open();
        f.registry.bind(s, f.alloc.allocate(1).unwrap()).unwrap();
        let ro = f.mapping.map(s, Protection::READ).unwrap();
        let wo = f.mapping.map(s, Protection::WRITE).unwrap();
        assert_eq!(ro.write_byte(0, 1), Err(ViewError::ReadOnly));
        assert_eq!(wo.read_byte(0), Err(ViewError::WriteOnly));
        wo.write_byte(0, 7).unwrap();
        assert_eq!(ro.read_byte(0), Ok(7));
    }

    #[test]
    fn window_is_one_page_even_for_larger_blocks() {
        let f = fixture();
        let s = f.registry.open();
        f.registry
            .bind(s, f.alloc.allocate(3 * VIEW_BYTES).unwrap())
            .unwrap();
        let v = f.mapping.map(s, Protection::READ_WRITE).unwrap();
        v.write_byte(VIEW_BYTES - 1, 1).unwrap();
        assert!(matches!(
            v.write_byte(VIEW_BYTES, 1),
            Err(ViewError::OutOfBounds(_))
        ));
        assert!(matches!(
            v.read(u64::MAX, &mut [0u8; 2]),
            Err(ViewError::OutOfBounds(_))
        ));
    }

    #[test]
    fn read_cstr_stops_at_nul_or_end() {
        let f = fixture();
        let s = f.registry.open();
        f.registry.bind(s, f.alloc.allocate(1).unwrap()).unwrap();
        let v = f.mapping.map(s, Protection::READ_WRITE).unwrap();
        v.write(0, b"abc\0def").unwrap();
        assert_eq!(v.read_cstr(0).unwrap(), b"abc");
        assert_eq!(v.read_cstr(4).unwrap(), b"def");
        v.fill(b'x').unwrap();
        assert_eq!(v.read_cstr(VIEW_BYTES - 2).unwrap(), b"xx");
        assert!(v.read_cstr(VIEW_BYTES).unwrap().is_empty());
    }

    #[test]
    fn released_block_revokes_view() {
        let f = fixture();
        let s = f.registry.open();
        f.registry.bind(s, f.alloc.allocate(1).unwrap()).unwrap();
        let v = f.mapping.map(s, Protection::READ_WRITE).unwrap();
        assert!(v.is_valid());
        f.alloc.release(f.registry.close(s).unwrap());
        assert!(!v.is_valid());
        assert_eq!(v.read_byte(0), Err(ViewError::Revoked));
        assert_eq!(v.fill(0), Err(ViewError::Revoked));
    }
}
