use kernel_alloc::{AllocError, OutOfBounds};
use kernel_memory_addresses::MemoryAddress;

/// Errors returned by the two control operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ControlError {
    #[error("invalid argument: allocation size must be non-zero")]
    InvalidArgument,
    #[error("unknown control command {0:#x}")]
    UnknownCommand(u32),
    #[error("out of memory (requested {requested} bytes)")]
    OutOfMemory { requested: u64 },
    #[error("page source returned misaligned memory at {addr}")]
    AlignmentViolation { addr: MemoryAddress },
    #[error("session already holds a block; free it first")]
    AlreadyBound,
    #[error("session holds no block")]
    NotBound,
    #[error("block is still mapped; unmap all views first")]
    BlockInUse,
}

/// Broad category of a [`ControlError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The request itself is malformed.
    Argument,
    /// Memory could not be provided. Nothing was leaked.
    Resource,
    /// The request does not fit the session's current state.
    Protocol,
}

impl ControlError {
    #[must_use]
    pub const fn class(self) -> ErrorClass {
        match self {
            Self::InvalidArgument | Self::UnknownCommand(_) => ErrorClass::Argument,
            Self::OutOfMemory { .. } | Self::AlignmentViolation { .. } => ErrorClass::Resource,
            Self::AlreadyBound | Self::NotBound | Self::BlockInUse => ErrorClass::Protocol,
        }
    }
}

impl From<AllocError> for ControlError {
    fn from(value: AllocError) -> Self {
        match value {
            AllocError::OutOfMemory { requested } => Self::OutOfMemory { requested },
            AllocError::AlignmentViolation { addr } => Self::AlignmentViolation { addr },
        }
    }
}

/// Errors establishing a view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MapError {
    #[error("session holds no block to map")]
    NotBound,
    #[error("a view needs read and/or write access")]
    InvalidProtection,
}

/// Errors accessing memory through a view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ViewError {
    #[error("the block behind this view has been released")]
    Revoked,
    #[error("view is not writable")]
    ReadOnly,
    #[error("view is not readable")]
    WriteOnly,
    #[error(transparent)]
    OutOfBounds(#[from] OutOfBounds),
}
