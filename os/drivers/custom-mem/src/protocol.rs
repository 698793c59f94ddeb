//! Numeric control interface.
//!
//! Commands are 32-bit words laid out like Linux ioctl numbers. The bare
//! values `0` and `1` still decode as Allocate and Free.
//!
//! ```
//! use custom_mem::protocol::{DEV_MEM_ALLOC, IoctlCommand, Request};
//!
//! assert_eq!(Request::decode(0, 4096), Ok(Request::Allocate { size: 4096 }));
//!
//! let cmd = Request::Free.command();
//! assert_eq!(cmd.nr(), 1);
//! assert_eq!(Request::decode(cmd.into_bits(), 0), Ok(Request::Free));
//! # let _ = DEV_MEM_ALLOC;
//! ```

use crate::control::ControlChannel;
use crate::error::ControlError;
use crate::registry::SessionId;
use bitfield_struct::bitfield;
use log::warn;

/// Command number of Allocate.
pub const DEV_MEM_ALLOC: u8 = 0;
/// Command number of Free.
pub const DEV_MEM_FREE: u8 = 1;
/// Type byte shared by all commands of this device.
pub const IOCTL_KIND: u8 = 0;

/// Size of the Allocate argument word.
const ARG_BYTES: u16 = 8;

pub const DIR_NONE: u8 = 0;
pub const DIR_WRITE: u8 = 1;

#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct IoctlCommand {
    pub nr: u8,
    pub kind: u8,
    /// Size of the argument in bytes.
    #[bits(14)]
    pub size: u16,
    #[bits(2)]
    pub dir: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    Allocate { size: u64 },
    Free,
}

impl Request {
    /// # Errors
    /// [`ControlError::UnknownCommand`] for anything that is not Allocate or
    /// Free of this device.
    pub fn decode(cmd: u32, arg: u64) -> Result<Self, ControlError> {
        let command = IoctlCommand::from_bits(cmd);
        if command.kind() != IOCTL_KIND {
            return Err(ControlError::UnknownCommand(cmd));
        }
        match command.nr() {
            DEV_MEM_ALLOC => Ok(Self::Allocate { size: arg }),
            DEV_MEM_FREE => Ok(Self::Free),
            _ => Err(ControlError::UnknownCommand(cmd)),
        }
    }

    #[must_use]
    pub const fn command(&self) -> IoctlCommand {
        match self {
            Self::Allocate { .. } => IoctlCommand::new()
                .with_nr(DEV_MEM_ALLOC)
                .with_kind(IOCTL_KIND)
                .with_size(ARG_BYTES)
                .with_dir(DIR_WRITE),
            Self::Free => IoctlCommand::new()
                .with_nr(DEV_MEM_FREE)
                .with_kind(IOCTL_KIND)
                .with_dir(DIR_NONE),
        }
    }

    /// The argument word that goes with [`command`](Self::command).
    #[must_use]
    pub const fn arg(&self) -> u64 {
        match self {
            Self::Allocate { size } => *size,
            Self::Free => 0,
        }
    }
}

/// Linux errno values returned (negated) by [`dispatch`].
pub mod errno {
    pub const ENXIO: i32 = 6;
    pub const ENOMEM: i32 = 12;
    pub const EFAULT: i32 = 14;
    pub const EBUSY: i32 = 16;
    pub const EEXIST: i32 = 17;
    pub const EINVAL: i32 = 22;
    pub const ENOTTY: i32 = 25;

    /// Short description of an errno value, for client diagnostics.
    #[must_use]
    pub const fn describe(errno: i32) -> &'static str {
        match errno {
            ENXIO => "no block bound",
            ENOMEM => "out of memory",
            EFAULT => "misaligned allocation",
            EBUSY => "block is mapped",
            EEXIST => "block already bound",
            EINVAL => "invalid argument",
            ENOTTY => "unknown command",
            _ => "unknown error",
        }
    }
}

impl ControlError {
    #[must_use]
    pub const fn errno(self) -> i32 {
        match self {
            Self::InvalidArgument => errno::EINVAL,
            Self::UnknownCommand(_) => errno::ENOTTY,
            Self::OutOfMemory { .. } => errno::ENOMEM,
            Self::AlignmentViolation { .. } => errno::EFAULT,
            Self::AlreadyBound => errno::EEXIST,
            Self::NotBound => errno::ENXIO,
            Self::BlockInUse => errno::EBUSY,
        }
    }
}

/// Decode and execute one raw command: `0` on success, `-errno` on failure.
pub fn dispatch(control: &ControlChannel, session: SessionId, cmd: u32, arg: u64) -> i64 {
    let result = Request::decode(cmd, arg).and_then(|request| match request {
        Request::Allocate { size } => control.allocate(session, size).map(|_| ()),
        Request::Free => control.free(session),
    });
    match result {
        Ok(()) => 0,
        Err(e) => {
            if let ControlError::UnknownCommand(_) = e {
                warn!("{session}: {e}");
            }
            -i64::from(e.errno())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_numbers_decode() {
        assert_eq!(Request::decode(0, 17), Ok(Request::Allocate { size: 17 }));
        assert_eq!(Request::decode(1, 99), Ok(Request::Free));
    }

    #[test]
    fn encoded_commands_decode() {
        for request in [Request::Allocate { size: 4096 }, Request::Free] {
            let cmd = request.command();
            assert_eq!(Request::decode(cmd.into_bits(), request.arg()), Ok(request));
        }
        let alloc = Request::Allocate { size: 1 }.command();
        assert_eq!(alloc.dir(), DIR_WRITE);
        assert_eq!(alloc.size(), 8);
    }

    #[test]
    fn unknown_commands() {
        assert_eq!(Request::decode(2, 0), Err(ControlError::UnknownCommand(2)));
        let foreign = IoctlCommand::new().with_kind(b'T').into_bits();
        assert_eq!(
            Request::decode(foreign, 0),
            Err(ControlError::UnknownCommand(foreign))
        );
    }

    #[test]
    fn errno_mapping() {
        assert_eq!(ControlError::InvalidArgument.errno(), 22);
        assert_eq!(ControlError::OutOfMemory { requested: 1 }.errno(), 12);
        assert_eq!(ControlError::AlreadyBound.errno(), 17);
        assert_eq!(ControlError::NotBound.errno(), 6);
        assert_eq!(ControlError::BlockInUse.errno(), 16);
        assert_eq!(ControlError::UnknownCommand(9).errno(), 25);
        assert_eq!(errno::describe(errno::EBUSY), "block is mapped");
    }
}
