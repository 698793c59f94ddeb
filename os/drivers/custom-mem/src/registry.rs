//! Per-session binding table.
//!
//! Each open session owns a slot holding at most one [`Block`] plus the
//! number of live views onto it. Every method is a single short critical
//! section under the registry's spin lock, so lookups always see the latest
//! binding without taking the control lock.

use alloc::collections::BTreeMap;
use core::fmt;
use kernel_alloc::{Block, BlockPin, WeakBlock};
use kernel_memory_addresses::{MemoryPage, Size4K};
use kernel_sync::SpinLock;

/// Opaque handle of a client session. Never reused within a registry.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SessionId(u64);

impl SessionId {
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session#{}", self.0)
    }
}

/// Where a session stands in the bind/map lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unbound,
    Bound,
    /// Bound, with at least one live view.
    Mapped,
}

/// Read-only description of a bound block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    pub base: MemoryPage<Size4K>,
    pub size_bytes: u64,
    pub requested_bytes: u64,
}

impl From<&Block> for BlockInfo {
    fn from(block: &Block) -> Self {
        Self {
            base: block.base(),
            size_bytes: block.size_bytes(),
            requested_bytes: block.requested_bytes(),
        }
    }
}

/// A rejected [`SessionRegistry::bind`]. The block is handed back untouched.
#[derive(Debug)]
pub enum BindError {
    /// The session already holds a block.
    AlreadyBound(Block),
    /// The session is not (or no longer) open.
    Closed(Block),
}

impl BindError {
    #[must_use]
    pub fn into_block(self) -> Block {
        match self {
            Self::AlreadyBound(b) | Self::Closed(b) => b,
        }
    }
}

/// Returned by [`SessionRegistry::unbind_idle`] while views are live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InUse {
    pub views: usize,
}

/// What a new view needs to reach the block: a weak handle, and the binding
/// epoch so that a late unmap cannot touch a later binding's accounting.
#[derive(Debug, Clone)]
pub struct ViewGrant {
    pub block: WeakBlock,
    pub epoch: u64,
}

#[derive(Default)]
struct Slot {
    block: Option<Block>,
    views: usize,
    epoch: u64,
}

impl Slot {
    const fn state(&self) -> SessionState {
        match (&self.block, self.views) {
            (None, _) => SessionState::Unbound,
            (Some(_), 0) => SessionState::Bound,
            (Some(_), _) => SessionState::Mapped,
        }
    }
}

struct Table {
    next_id: u64,
    slots: BTreeMap<SessionId, Slot>,
}

pub struct SessionRegistry {
    table: SpinLock<Table>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            table: SpinLock::new(Table {
                next_id: 1,
                slots: BTreeMap::new(),
            }),
        }
    }

    /// Create an empty slot for a new session.
    #[must_use]
    pub fn open(&self) -> SessionId {
        self.table.with_lock(|t| {
            let id = SessionId(t.next_id);
            t.next_id += 1;
            t.slots.insert(id, Slot::default());
            id
        })
    }

    /// Remove the session's slot, handing back any block it still held.
    pub fn close(&self, id: SessionId) -> Option<Block> {
        self.table
            .with_lock(|t| t.slots.remove(&id))
            .and_then(|slot| slot.block)
    }

    /// Attach `block` to the session.
    ///
    /// # Errors
    /// Leaves the registry unchanged and returns the block if the session
    /// already holds one or is not open.
    pub fn bind(&self, id: SessionId, block: Block) -> Result<(), BindError> {
        self.table.with_lock(|t| match t.slots.get_mut(&id) {
            None => Err(BindError::Closed(block)),
            Some(slot) if slot.block.is_some() => Err(BindError::AlreadyBound(block)),
            Some(slot) => {
                slot.block = Some(block);
                slot.views = 0;
                slot.epoch += 1;
                Ok(())
            }
        })
    }

    /// Detach and return the session's block regardless of live views.
    ///
    /// Views onto the block become revoked as soon as the block is dropped.
    pub fn unbind(&self, id: SessionId) -> Option<Block> {
        self.table.with_lock(|t| {
            let slot = t.slots.get_mut(&id)?;
            slot.views = 0;
            slot.block.take()
        })
    }

    /// Detach and return the session's block, unless a view is still live.
    ///
    /// # Errors
    /// [`InUse`] if the block is mapped; nothing is changed.
    pub fn unbind_idle(&self, id: SessionId) -> Result<Option<Block>, InUse> {
        self.table.with_lock(|t| {
            let Some(slot) = t.slots.get_mut(&id) else {
                return Ok(None);
            };
            if slot.block.is_some() && slot.views > 0 {
                return Err(InUse { views: slot.views });
            }
            Ok(slot.block.take())
        })
    }

    #[must_use]
    pub fn lookup(&self, id: SessionId) -> Option<BlockInfo> {
        self.table
            .with_lock(|t| t.slots.get(&id)?.block.as_ref().map(BlockInfo::from))
    }

    /// Pin the session's block for device-side access.
    ///
    /// Only the weak handle is taken under the lock; the pin is made after
    /// it is released, so holders may call back into the registry.
    #[must_use]
    pub fn pin(&self, id: SessionId) -> Option<BlockPin> {
        self.table
            .with_lock(|t| t.slots.get(&id)?.block.as_ref().map(Block::downgrade))?
            .pin()
    }

    /// Look up the block and count a new view onto it, atomically.
    #[must_use]
    pub fn acquire_view(&self, id: SessionId) -> Option<ViewGrant> {
        self.table.with_lock(|t| {
            let slot = t.slots.get_mut(&id)?;
            let block = slot.block.as_ref()?.downgrade();
            slot.views += 1;
            Some(ViewGrant {
                block,
                epoch: slot.epoch,
            })
        })
    }

    /// Forget one view granted under `epoch`. Stale grants are ignored.
    pub fn release_view(&self, id: SessionId, epoch: u64) {
        self.table.with_lock(|t| {
            if let Some(slot) = t.slots.get_mut(&id)
                && slot.epoch == epoch
                && slot.block.is_some()
            {
                slot.views = slot.views.saturating_sub(1);
            }
        });
    }

    #[must_use]
    pub fn state(&self, id: SessionId) -> Option<SessionState> {
        self.table.with_lock(|t| t.slots.get(&id).map(Slot::state))
    }

    #[must_use]
    pub fn views(&self, id: SessionId) -> usize {
        self.table
            .with_lock(|t| t.slots.get(&id).map_or(0, |slot| slot.views))
    }

    /// Number of sessions currently holding a block.
    #[must_use]
    pub fn bound_sessions(&self) -> usize {
        self.table
            .with_lock(|t| t.slots.values().filter(|s| s.block.is_some()).count())
    }

    /// Number of open sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.table.with_lock(|t| t.slots.len())
    }
}

impl fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.session_count())
            .field("bound", &self.bound_sessions())
            .finish()
    }
}
