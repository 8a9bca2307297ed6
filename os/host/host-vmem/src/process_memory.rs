use crate::{MapFlags, MemoryError, Protection};
use host_info::GuestAddress;

/// Virtual memory of a guest process, driven from outside the process.
///
/// Addresses are guest addresses and are never dereferenced by the caller.
/// Every operation takes `&self`; implementations synchronize internally.
///
/// The lifecycle of a page is `Free -> Reserved -> Allocated`, and
/// [`release`](Self::release) takes it back to `Reserved`. Reserved space is
/// returned to the host once nothing in its section is allocated any more.
pub trait ProcessMemory {
    /// Allocate `length` bytes anywhere.
    ///
    /// # Errors
    /// [`MemoryError::InvalidArgument`] for bad arguments,
    /// [`MemoryError::OutOfMemory`] if no space can be found.
    fn allocate(&self, length: u64, protection: Protection, flags: MapFlags) -> Result<GuestAddress, MemoryError>;

    /// Allocate `[address, address + length)`, reserving whatever is not
    /// reserved yet. A null `address` behaves like [`allocate`](Self::allocate).
    ///
    /// # Errors
    /// [`MemoryError::AddressInUse`] if any page is already allocated.
    fn allocate_at(&self, address: GuestAddress, length: u64, protection: Protection) -> Result<GuestAddress, MemoryError>;

    /// Reserve `length` bytes anywhere without allocating them.
    ///
    /// # Errors
    /// [`MemoryError::OutOfMemory`] if no space can be found.
    fn reserve(&self, length: u64, flags: MapFlags) -> Result<GuestAddress, MemoryError>;

    /// Reserve `[address, address + length)`. Already reserved parts are
    /// left alone, so reserving twice is harmless.
    ///
    /// # Errors
    /// [`MemoryError::OutOfMemory`] if a gap cannot be reserved.
    fn reserve_at(&self, address: GuestAddress, length: u64) -> Result<GuestAddress, MemoryError>;

    /// Change the protection of allocated pages.
    ///
    /// # Errors
    /// [`MemoryError::AddressNotReserved`] if any page is not allocated.
    fn protect(&self, address: GuestAddress, length: u64, protection: Protection) -> Result<(), MemoryError>;

    /// Protect allocated pages and mark them as guard pages.
    ///
    /// # Errors
    /// As [`protect`](Self::protect).
    fn guard(&self, address: GuestAddress, length: u64, protection: Protection) -> Result<(), MemoryError> {
        self.protect(address, length, protection | Protection::GUARD)
    }

    /// Copy guest memory into `buffer`; returns the number of bytes read.
    ///
    /// # Errors
    /// [`MemoryError::AddressNotReserved`] if the range is not allocated,
    /// [`MemoryError::AccessDenied`] if the pages are not readable, with
    /// `PARTIAL_COPY` if the host moved fewer bytes than asked.
    fn read(&self, address: GuestAddress, buffer: &mut [u8]) -> Result<usize, MemoryError>;

    /// Copy `data` into guest memory; returns the number of bytes written.
    ///
    /// # Errors
    /// [`MemoryError::AddressNotReserved`] if the range is not allocated,
    /// [`MemoryError::AccessDenied`] if the pages are not writable, with
    /// `PARTIAL_COPY` if the host moved fewer bytes than asked.
    fn write(&self, address: GuestAddress, data: &[u8]) -> Result<usize, MemoryError>;

    /// # Errors
    /// [`MemoryError::AddressNotReserved`] if any page is not allocated.
    fn lock(&self, address: GuestAddress, length: u64) -> Result<(), MemoryError>;

    /// # Errors
    /// [`MemoryError::AddressNotReserved`] if any page is not allocated.
    fn unlock(&self, address: GuestAddress, length: u64) -> Result<(), MemoryError>;

    /// Return allocated pages to the reserved state.
    ///
    /// # Errors
    /// [`MemoryError::AddressNotReserved`] if part of the range was never reserved.
    fn release(&self, address: GuestAddress, length: u64) -> Result<(), MemoryError>;

    /// Map the sections behind `[address, address + length)` into the
    /// calling process and return a token locating `address` in that mapping.
    ///
    /// The token stays valid until [`unmap`](Self::unmap).
    ///
    /// # Errors
    /// [`MemoryError::InvalidArgument`] for guard protection.
    fn map(&self, address: GuestAddress, length: u64, protection: Protection) -> Result<GuestAddress, MemoryError>;

    /// Undo a [`map`](Self::map).
    ///
    /// # Errors
    /// [`MemoryError::InvalidAddress`] for a token [`map`](Self::map) did not return.
    fn unmap(&self, token: GuestAddress) -> Result<(), MemoryError>;

    /// Drop every local mapping and every section.
    fn clear(&self);
}
