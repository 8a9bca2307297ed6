//! # Sections
//!
//! A [`Section`] is one host backing object mapped into a target process at a
//! granularity-aligned base. Mapping commits every page at once and there is
//! no way to decommit part of it, so page ownership is tracked in software:
//!
//! ```text
//!   page state   bitmap bit   host protection
//!   ----------   ----------   -------------------------------
//!   Reserved     0            NOACCESS
//!   Allocated    1            caller's, adjusted for the mode
//! ```
//!
//! A section starts out fully reserved. Allocation and release only flip
//! bits and re-protect pages; the backing object lives until the section is
//! dropped, which unmaps the view and closes the handle.

use crate::{
    HostProtection, MapFlags, MappedView, MemoryError, Mode, NativeApi, NativeStatus, ProcessHandle, RegionState,
    SectionAccess, SectionHandle, adjust_protection_for_mode,
};
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::fmt;
use host_bitmap::AllocationBitmap;
use host_info::{GuestAddress, SystemInfo};
use log::{debug, trace, warn};

/// Upper bound for the bounce buffer used by [`Section::duplicate_into`].
const COPY_CHUNK: usize = 0x1_0000;

/// Run of allocated pages sharing one host protection.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct AllocatedRegion {
    pub base: GuestAddress,
    pub length: u64,
    pub protection: HostProtection,
}

/// Whole pages touched by a byte range.
#[derive(Debug, Copy, Clone)]
struct PageSpan {
    first: usize,
    count: usize,
    address: GuestAddress,
    length: u64,
}

pub struct Section<N: NativeApi> {
    native: Arc<N>,
    info: Arc<SystemInfo>,
    process: ProcessHandle,
    handle: SectionHandle,
    base: GuestAddress,
    length: u64,
    mapped: bool,
    bitmap: AllocationBitmap,
    mode: Mode,
}

#[inline]
fn to_index(value: u64) -> usize {
    usize::try_from(value).unwrap_or(usize::MAX)
}

/// The owning process can read these pages without faulting.
const fn readable_in_place(protection: HostProtection) -> bool {
    protection.is_readable() && !protection.guard()
}

/// Largest protection a section in `mode` will ever need.
const fn max_protection_for(mode: Mode) -> HostProtection {
    match mode {
        Mode::CopyOnWrite => HostProtection::EXECUTE_WRITE_COPY,
        Mode::Private | Mode::Shared => HostProtection::EXECUTE_READ_WRITE,
    }
}

impl<N: NativeApi> Section<N> {
    /// Create a backing object and map it into `process`.
    ///
    /// `address` is aligned down and `length` up to the allocation
    /// granularity; without an address the host picks the base. The new view
    /// is re-protected to `NOACCESS` so that no page is reachable before it
    /// is allocated. Anything set up before a failure is torn down again.
    ///
    /// # Errors
    /// [`MemoryError::InvalidArgument`] for a zero length or flags other than
    /// [`MapFlags::TOP_DOWN`]; [`MemoryError::OutOfMemory`] if creating or
    /// mapping the backing object fails; [`MemoryError::AccessDenied`] if the
    /// initial re-protection fails.
    pub fn create(
        native: &Arc<N>,
        info: &Arc<SystemInfo>,
        process: ProcessHandle,
        address: Option<GuestAddress>,
        length: u64,
        mode: Mode,
        flags: MapFlags,
    ) -> Result<Self, MemoryError> {
        if length == 0 || !MapFlags::TOP_DOWN.contains(flags) {
            return Err(MemoryError::InvalidArgument);
        }

        let hint = address.filter(|a| !a.is_null()).map(|a| info.granularity_floor(a));
        let length = hint
            .zip(address)
            .map_or(Some(length), |(base, a)| length.checked_add(a.offset_from(base)))
            .and_then(|l| l.checked_next_multiple_of(info.allocation_granularity()))
            .ok_or(MemoryError::InvalidArgument)?;

        let max_protection = max_protection_for(mode);
        let handle = native
            .create_section(length, max_protection)
            .map_err(MemoryError::OutOfMemory)?;

        // from here on, dropping `section` unwinds whatever was set up
        let mut section = Self::unmapped(native, info, process, handle, hint.unwrap_or_default(), length, mode);
        let view = native
            .map_view(handle, process, hint, max_protection, flags)
            .map_err(MemoryError::OutOfMemory)?;
        section.attach(view);

        native
            .protect(process, view.base, view.length, HostProtection::NO_ACCESS)
            .map_err(MemoryError::AccessDenied)?;

        debug!("created {section:?} in {process:?}");
        Ok(section)
    }

    fn unmapped(
        native: &Arc<N>,
        info: &Arc<SystemInfo>,
        process: ProcessHandle,
        handle: SectionHandle,
        base: GuestAddress,
        length: u64,
        mode: Mode,
    ) -> Self {
        Self {
            native: Arc::clone(native),
            info: Arc::clone(info),
            process,
            handle,
            base,
            length,
            mapped: false,
            bitmap: AllocationBitmap::new(0),
            mode,
        }
    }

    fn attach(&mut self, view: MappedView) {
        self.base = view.base;
        self.length = view.length;
        self.mapped = true;
        self.bitmap = AllocationBitmap::new(to_index(view.length / self.info.page_size()));
    }

    #[inline]
    #[must_use]
    pub const fn base(&self) -> GuestAddress {
        self.base
    }

    #[inline]
    #[must_use]
    pub const fn length(&self) -> u64 {
        self.length
    }

    /// First address past the section.
    #[inline]
    #[must_use]
    pub const fn end(&self) -> GuestAddress {
        GuestAddress::new(self.base.as_u64() + self.length)
    }

    #[inline]
    #[must_use]
    pub const fn mode(&self) -> Mode {
        self.mode
    }

    #[inline]
    #[must_use]
    pub const fn handle(&self) -> SectionHandle {
        self.handle
    }

    #[inline]
    #[must_use]
    pub const fn process(&self) -> ProcessHandle {
        self.process
    }

    #[inline]
    #[must_use]
    pub const fn bitmap(&self) -> &AllocationBitmap {
        &self.bitmap
    }

    #[inline]
    #[must_use]
    pub fn contains(&self, address: GuestAddress) -> bool {
        address >= self.base && address < self.end()
    }

    #[must_use]
    pub fn allocated_pages(&self) -> usize {
        self.bitmap.count_set()
    }

    /// No page is allocated; the section can be destroyed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bitmap.is_empty()
    }

    fn page_address(&self, index: usize) -> GuestAddress {
        self.base + index as u64 * self.info.page_size()
    }

    fn span(&self, address: GuestAddress, length: u64) -> Result<PageSpan, MemoryError> {
        let end = address.checked_add(length).ok_or(MemoryError::InvalidArgument)?;
        if length == 0 || address < self.base || end > self.end() {
            return Err(MemoryError::InvalidArgument);
        }

        let page = self.info.page_size();
        let first = address.offset_from(self.base) / page;
        let last = end.offset_from(self.base).div_ceil(page);
        Ok(PageSpan {
            first: to_index(first),
            count: to_index(last - first),
            address: self.base + first * page,
            length: (last - first) * page,
        })
    }

    fn first_where(&self, span: PageSpan, set: bool) -> Option<GuestAddress> {
        (span.first..span.first + span.count)
            .find(|&bit| self.bitmap.test(bit) == set)
            .map(|bit| self.page_address(bit))
    }

    /// First allocated page overlapping the range, clamped to this section.
    #[must_use]
    pub fn first_allocated_in(&self, address: GuestAddress, length: u64) -> Option<GuestAddress> {
        let start = address.max(self.base);
        let end = address.checked_add(length).map_or(self.end(), |end| end.min(self.end()));
        if start >= end {
            return None;
        }
        let span = self.span(start, end.offset_from(start)).ok()?;
        self.first_where(span, true)
    }

    /// Every page of the range must be allocated.
    ///
    /// # Errors
    /// [`MemoryError::AddressNotAllocated`] naming the first page that is not,
    /// or [`MemoryError::InvalidArgument`] if the range leaves the section.
    pub fn ensure_allocated(&self, address: GuestAddress, length: u64) -> Result<(), MemoryError> {
        let span = self.span(address, length)?;
        match self.first_where(span, false) {
            Some(page) => Err(MemoryError::AddressNotAllocated(page)),
            None => Ok(()),
        }
    }

    /// Allocate pages: apply `protection` (adjusted for the mode) and set their bits.
    ///
    /// Pages are already committed, so no commit is issued.
    ///
    /// # Errors
    /// [`MemoryError::AddressInUse`] if any page is already allocated,
    /// [`MemoryError::AccessDenied`] if the host refuses the protection.
    pub fn allocate(&mut self, address: GuestAddress, length: u64, protection: HostProtection) -> Result<(), MemoryError> {
        let span = self.span(address, length)?;
        if let Some(used) = self.first_where(span, true) {
            return Err(MemoryError::AddressInUse(used));
        }

        let protection = adjust_protection_for_mode(protection, self.mode);
        self.native
            .protect(self.process, span.address, span.length, protection)
            .map_err(MemoryError::AccessDenied)?;
        self.bitmap.set_range(span.first, span.count);

        trace!("allocated {}+{:#x} as {protection} in {:?}", span.address, span.length, self.process);
        Ok(())
    }

    /// Change the protection of allocated pages.
    ///
    /// # Errors
    /// [`MemoryError::AddressNotAllocated`] if any page is not allocated,
    /// [`MemoryError::AccessDenied`] if the host refuses the protection.
    pub fn protect(&self, address: GuestAddress, length: u64, protection: HostProtection) -> Result<(), MemoryError> {
        let span = self.span(address, length)?;
        if let Some(page) = self.first_where(span, false) {
            return Err(MemoryError::AddressNotAllocated(page));
        }

        let protection = adjust_protection_for_mode(protection, self.mode);
        self.native
            .protect(self.process, span.address, span.length, protection)
            .map_err(MemoryError::AccessDenied)?;

        trace!("protected {}+{:#x} as {protection} in {:?}", span.address, span.length, self.process);
        Ok(())
    }

    /// Release pages back to the reserved state.
    ///
    /// Releasing pages that are not allocated is not an error. Discarding the
    /// contents and unlocking are best effort.
    ///
    /// # Errors
    /// [`MemoryError::AccessDenied`] if the pages cannot be made inaccessible.
    pub fn release(&mut self, address: GuestAddress, length: u64) -> Result<(), MemoryError> {
        let span = self.span(address, length)?;
        self.native
            .protect(self.process, span.address, span.length, HostProtection::NO_ACCESS)
            .map_err(MemoryError::AccessDenied)?;

        if let Err(status) = self.native.reset(self.process, span.address, span.length) {
            warn!("ignoring failed reset of {}+{:#x}: {status}", span.address, span.length);
        }
        match self.native.unlock(self.process, span.address, span.length) {
            Ok(()) | Err(NativeStatus::NOT_LOCKED) => {}
            Err(status) => warn!("ignoring failed unlock of {}+{:#x}: {status}", span.address, span.length),
        }

        self.bitmap.clear_range(span.first, span.count);
        trace!("released {}+{:#x} in {:?}", span.address, span.length, self.process);
        Ok(())
    }

    /// Allocated pages grouped into runs of equal host protection.
    ///
    /// # Errors
    /// [`MemoryError::AccessDenied`] if the host cannot describe the pages.
    pub fn allocated_regions(&self) -> Result<Vec<AllocatedRegion>, MemoryError> {
        let mut regions = Vec::new();
        for run in self.bitmap.set_runs() {
            let mut address = self.page_address(run.start);
            let end = self.page_address(run.end);
            while address < end {
                let region = self
                    .native
                    .query(self.process, address)
                    .map_err(MemoryError::AccessDenied)?;
                let stop = region.end().min(end);
                if region.state != RegionState::Committed || region.base > address || stop <= address {
                    return Err(MemoryError::AccessDenied(NativeStatus::INVALID_PARAMETER));
                }
                regions.push(AllocatedRegion {
                    base: address,
                    length: stop.offset_from(address),
                    protection: region.protection,
                });
                address = stop;
            }
        }
        Ok(regions)
    }

    /// Switch the sharing mode, re-protecting allocated pages that need it.
    ///
    /// # Errors
    /// [`MemoryError::AccessDenied`] if a region cannot be re-protected.
    pub fn change_mode(&mut self, mode: Mode) -> Result<(), MemoryError> {
        if mode == self.mode {
            return Ok(());
        }

        for region in self.allocated_regions()? {
            let adjusted = adjust_protection_for_mode(region.protection, mode);
            if adjusted != region.protection {
                self.native
                    .protect(self.process, region.base, region.length, adjusted)
                    .map_err(MemoryError::AccessDenied)?;
            }
        }

        debug!("{self:?} switches to {mode:?}");
        self.mode = mode;
        Ok(())
    }

    /// Build the equivalent section in `process`: a private copy for
    /// [`Mode::Private`], otherwise a second mapping of the same pages.
    ///
    /// # Errors
    /// See [`duplicate_into`](Self::duplicate_into) and [`clone_into`](Self::clone_into).
    pub fn fork_into(&self, process: ProcessHandle, mode: Mode) -> Result<Self, MemoryError> {
        match mode {
            Mode::Private => self.duplicate_into(process),
            Mode::Shared | Mode::CopyOnWrite => self.clone_into(process, mode),
        }
    }

    /// Independent private copy at the same address in `process`.
    ///
    /// Allocated regions get the source's protection. Readable regions are
    /// copied from the source process itself, so pages it already copied on
    /// write carry over; the rest are read through a read-only view of the
    /// backing object in the calling process.
    ///
    /// # Errors
    /// Any failure creating the copy; the partial copy is destroyed.
    pub fn duplicate_into(&self, process: ProcessHandle) -> Result<Self, MemoryError> {
        let mut duplicate = Self::create(
            &self.native,
            &self.info,
            process,
            Some(self.base),
            self.length,
            Mode::Private,
            MapFlags::empty(),
        )?;

        let regions = self.allocated_regions()?;
        let local = if regions.iter().all(|r| readable_in_place(r.protection)) {
            None
        } else {
            Some(LocalView::map(&*self.native, self.handle, HostProtection::READ_ONLY)?)
        };
        let mut buffer = vec![0_u8; COPY_CHUNK.min(to_index(self.length))];

        for region in regions {
            duplicate.allocate(region.base, region.length, HostProtection::READ_WRITE)?;

            let (from, from_base) = match local.as_ref() {
                Some(view) if !readable_in_place(region.protection) => {
                    (view.process, view.base + region.base.offset_from(self.base))
                }
                _ => (self.process, region.base),
            };

            let mut offset = 0;
            while offset < region.length {
                let chunk = (region.length - offset).min(buffer.len() as u64);
                let bytes = &mut buffer[..to_index(chunk)];
                let read = self
                    .native
                    .read(from, from_base + offset, bytes)
                    .map_err(MemoryError::AccessDenied)?;
                let written = self
                    .native
                    .write(process, region.base + offset, bytes)
                    .map_err(MemoryError::AccessDenied)?;
                if read != bytes.len() || written != bytes.len() {
                    return Err(MemoryError::AccessDenied(NativeStatus::PARTIAL_COPY));
                }
                offset += chunk;
            }

            duplicate.protect(region.base, region.length, region.protection)?;
        }

        debug!("duplicated {self:?} into {process:?}");
        Ok(duplicate)
    }

    /// Map the same backing object into `process` as [`Mode::Shared`] or
    /// [`Mode::CopyOnWrite`].
    ///
    /// The new mapping starts at `NOACCESS` and then takes the protection of
    /// every allocated source region, adjusted for `mode`. No data is copied.
    ///
    /// # Errors
    /// [`MemoryError::InvalidArgument`] for [`Mode::Private`], otherwise the
    /// failing native step; the partial clone is torn down.
    pub fn clone_into(&self, process: ProcessHandle, mode: Mode) -> Result<Self, MemoryError> {
        let (access, protection) = match mode {
            Mode::Private => return Err(MemoryError::InvalidArgument),
            Mode::Shared => (SectionAccess::ALL, HostProtection::EXECUTE_READ_WRITE),
            Mode::CopyOnWrite => (
                SectionAccess::QUERY | SectionAccess::MAP_READ | SectionAccess::MAP_EXECUTE,
                HostProtection::EXECUTE_WRITE_COPY,
            ),
        };

        let handle = self
            .native
            .duplicate_section(self.handle, access)
            .map_err(MemoryError::AccessDenied)?;
        let mut clone = Self::unmapped(&self.native, &self.info, process, handle, self.base, self.length, mode);

        let view = self
            .native
            .map_view(handle, process, Some(self.base), protection, MapFlags::empty())
            .map_err(MemoryError::OutOfMemory)?;
        clone.attach(view);

        self.native
            .protect(process, view.base, view.length, HostProtection::NO_ACCESS)
            .map_err(MemoryError::AccessDenied)?;

        for region in self.allocated_regions()? {
            let adjusted = adjust_protection_for_mode(region.protection, mode);
            self.native
                .protect(process, region.base, region.length, adjusted)
                .map_err(MemoryError::AccessDenied)?;
        }
        clone.bitmap = self.bitmap.clone();

        debug!("cloned {self:?} into {process:?} as {mode:?}");
        Ok(clone)
    }
}

impl<N: NativeApi> fmt::Debug for Section<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Section({:?}, {}+{:#x}, {:?}, {}/{} pages)",
            self.handle,
            self.base,
            self.length,
            self.mode,
            self.bitmap.count_set(),
            self.bitmap.size()
        )
    }
}

impl<N: NativeApi> Drop for Section<N> {
    fn drop(&mut self) {
        if self.mapped
            && let Err(status) = self.native.unmap_view(self.process, self.base)
        {
            warn!("failed to unmap section at {} from {:?}: {status}", self.base, self.process);
        }
        if let Err(status) = self.native.close_section(self.handle) {
            warn!("failed to close {:?}: {status}", self.handle);
        }
        debug!("destroyed section {:?} at {} in {:?}", self.handle, self.base, self.process);
    }
}

/// Temporary view of a section in the calling process, unmapped on drop.
struct LocalView<'a, N: NativeApi> {
    native: &'a N,
    process: ProcessHandle,
    base: GuestAddress,
}

impl<'a, N: NativeApi> LocalView<'a, N> {
    fn map(native: &'a N, section: SectionHandle, protection: HostProtection) -> Result<Self, MemoryError> {
        let process = native.current_process();
        let view = native
            .map_view(section, process, None, protection, MapFlags::empty())
            .map_err(MemoryError::OutOfMemory)?;
        Ok(Self {
            native,
            process,
            base: view.base,
        })
    }
}

impl<N: NativeApi> Drop for LocalView<'_, N> {
    fn drop(&mut self) {
        if let Err(status) = self.native.unmap_view(self.process, self.base) {
            warn!("failed to unmap local view at {}: {status}", self.base);
        }
    }
}
