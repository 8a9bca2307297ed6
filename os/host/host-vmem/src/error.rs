use crate::NativeStatus;
use host_info::GuestAddress;

/// Linux `EACCES`.
pub const EACCES: i32 = 13;
/// Linux `EEXIST`.
pub const EEXIST: i32 = 17;
/// Linux `EINVAL`.
pub const EINVAL: i32 = 22;
/// Linux `ENOMEM`.
pub const ENOMEM: i32 = 12;

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MemoryError {
    /// Zero length, null address, or a range that overflows or leaves the
    /// application address space.
    #[error("invalid argument")]
    InvalidArgument,
    /// Part of the range has no section behind it, or is not allocated.
    #[error("address {0} is not reserved")]
    AddressNotReserved(GuestAddress),
    /// Part of the range is not allocated within its section.
    #[error("address {0} is not allocated")]
    AddressNotAllocated(GuestAddress),
    /// An allocation targets pages that are already allocated.
    #[error("address {0} is already in use")]
    AddressInUse(GuestAddress),
    /// Creating or mapping a backing object failed.
    #[error("out of memory: {0}")]
    OutOfMemory(NativeStatus),
    /// A native protect, read, write or lock call failed.
    #[error("access denied: {0}")]
    AccessDenied(NativeStatus),
    /// An unmap was given a mapping that does not exist.
    #[error("address {0} is not a local mapping")]
    InvalidAddress(GuestAddress),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidArgument,
    AddressNotReserved,
    AddressNotAllocated,
    AddressInUse,
    OutOfMemory,
    AccessDenied,
    InvalidAddress,
}

impl MemoryError {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument => ErrorKind::InvalidArgument,
            Self::AddressNotReserved(_) => ErrorKind::AddressNotReserved,
            Self::AddressNotAllocated(_) => ErrorKind::AddressNotAllocated,
            Self::AddressInUse(_) => ErrorKind::AddressInUse,
            Self::OutOfMemory(_) => ErrorKind::OutOfMemory,
            Self::AccessDenied(_) => ErrorKind::AccessDenied,
            Self::InvalidAddress(_) => ErrorKind::InvalidAddress,
        }
    }

    /// The native status behind the error, if a native call failed.
    #[must_use]
    pub const fn status(&self) -> Option<NativeStatus> {
        match self {
            Self::OutOfMemory(status) | Self::AccessDenied(status) => Some(*status),
            _ => None,
        }
    }

    /// Linux errno reported to the guest.
    #[must_use]
    pub const fn errno(&self) -> i32 {
        match self {
            Self::InvalidArgument | Self::InvalidAddress(_) => EINVAL,
            Self::AddressNotReserved(_) | Self::AddressNotAllocated(_) | Self::AccessDenied(_) => EACCES,
            Self::AddressInUse(_) => EEXIST,
            Self::OutOfMemory(_) => ENOMEM,
        }
    }
}
