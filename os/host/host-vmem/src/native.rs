//! Native virtual-memory interface.
//!
//! Everything the manager needs from the host, expressed over opaque handles.
//! The manager never dereferences guest addresses; bytes only move through
//! [`NativeApi::read`] and [`NativeApi::write`].

use crate::{HostProtection, NativeStatus};
use host_info::GuestAddress;

/// Opaque handle to a process address space.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessHandle(u64);

impl ProcessHandle {
    #[inline]
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Opaque handle to a section (backing object).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SectionHandle(usize);

impl SectionHandle {
    #[inline]
    #[must_use]
    pub const fn new(raw: usize) -> Self {
        Self(raw)
    }

    #[inline]
    #[must_use]
    pub const fn raw(self) -> usize {
        self.0
    }
}

bitflags::bitflags! {
    /// Access granted through a section handle.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct SectionAccess: u32 {
        const QUERY = 0x0001;
        const MAP_WRITE = 0x0002;
        const MAP_READ = 0x0004;
        const MAP_EXECUTE = 0x0008;
        const ALL = Self::QUERY.bits()
            | Self::MAP_WRITE.bits()
            | Self::MAP_READ.bits()
            | Self::MAP_EXECUTE.bits();
    }
}

bitflags::bitflags! {
    /// Options for placing a new view.
    #[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
    pub struct MapFlags: u32 {
        /// Place the view at the highest available address.
        const TOP_DOWN = 0x0010_0000;
    }
}

/// A view of a section mapped into a process.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MappedView {
    pub base: GuestAddress,
    pub length: u64,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RegionState {
    /// Backed by a mapped view; all view pages are committed.
    Committed,
    /// Nothing is mapped here.
    Free,
}

/// Run of pages with identical state and protection, as reported by [`NativeApi::query`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RegionInfo {
    pub base: GuestAddress,
    pub length: u64,
    pub state: RegionState,
    pub protection: HostProtection,
}

impl RegionInfo {
    #[inline]
    #[must_use]
    pub const fn end(&self) -> GuestAddress {
        GuestAddress::new(self.base.as_u64() + self.length)
    }
}

/// Native operations, named for failure injection and diagnostics.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum NativeOp {
    CreateSection,
    DuplicateSection,
    CloseSection,
    MapView,
    UnmapView,
    Protect,
    Read,
    Write,
    Query,
    Reset,
    Lock,
    Unlock,
}

/// Host primitives for sections and cross-process memory access.
///
/// Ranges are byte granular; implementations widen them to whole pages.
pub trait NativeApi: Send + Sync {
    /// The calling process, target of local mappings.
    fn current_process(&self) -> ProcessHandle;

    /// Create a committed section of `length` bytes whose views may never
    /// exceed `max_protection`. The returned handle has full access.
    ///
    /// # Errors
    /// The host status, e.g. `COMMITMENT_LIMIT`.
    fn create_section(&self, length: u64, max_protection: HostProtection) -> Result<SectionHandle, NativeStatus>;

    /// Open a second handle to the same section with (at most) `access`.
    ///
    /// # Errors
    /// `ACCESS_DENIED` if `access` is wider than the source handle's.
    fn duplicate_section(&self, section: SectionHandle, access: SectionAccess) -> Result<SectionHandle, NativeStatus>;

    /// # Errors
    /// `INVALID_HANDLE` for an unknown handle.
    fn close_section(&self, section: SectionHandle) -> Result<(), NativeStatus>;

    /// Map the whole section into `process`, at `address` if given.
    ///
    /// Every page of the new view starts out at `protection`.
    ///
    /// # Errors
    /// `CONFLICTING_ADDRESSES` if `address` is taken, `SECTION_PROTECTION` if
    /// `protection` exceeds the section's maximum, `ACCESS_DENIED` if the
    /// handle lacks the access `protection` needs.
    fn map_view(
        &self,
        section: SectionHandle,
        process: ProcessHandle,
        address: Option<GuestAddress>,
        protection: HostProtection,
        flags: MapFlags,
    ) -> Result<MappedView, NativeStatus>;

    /// # Errors
    /// `NOT_MAPPED_VIEW` if no view contains `address`.
    fn unmap_view(&self, process: ProcessHandle, address: GuestAddress) -> Result<(), NativeStatus>;

    /// Change page protection and return the previous protection of the first page.
    ///
    /// # Errors
    /// The host status; the range must lie within one view.
    fn protect(
        &self,
        process: ProcessHandle,
        address: GuestAddress,
        length: u64,
        protection: HostProtection,
    ) -> Result<HostProtection, NativeStatus>;

    /// # Errors
    /// `ACCESS_VIOLATION` if any byte is unmapped or unreadable.
    fn read(&self, process: ProcessHandle, address: GuestAddress, buffer: &mut [u8]) -> Result<usize, NativeStatus>;

    /// # Errors
    /// `ACCESS_VIOLATION` if any byte is unmapped or not writable.
    fn write(&self, process: ProcessHandle, address: GuestAddress, data: &[u8]) -> Result<usize, NativeStatus>;

    /// Describe the region containing `address`.
    ///
    /// # Errors
    /// `INVALID_PARAMETER` if `address` is outside the application range.
    fn query(&self, process: ProcessHandle, address: GuestAddress) -> Result<RegionInfo, NativeStatus>;

    /// Discard page contents; the pages stay committed.
    ///
    /// # Errors
    /// The host status.
    fn reset(&self, process: ProcessHandle, address: GuestAddress, length: u64) -> Result<(), NativeStatus>;

    /// # Errors
    /// The host status.
    fn lock(&self, process: ProcessHandle, address: GuestAddress, length: u64) -> Result<(), NativeStatus>;

    /// # Errors
    /// `NOT_LOCKED` if any page is not locked.
    fn unlock(&self, process: ProcessHandle, address: GuestAddress, length: u64) -> Result<(), NativeStatus>;
}
