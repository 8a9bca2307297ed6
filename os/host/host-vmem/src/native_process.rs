//! # Native process memory
//!
//! [`NativeProcess`] keeps an ordered, non-overlapping set of [`Section`]s
//! keyed by base address and implements [`ProcessMemory`] on top of it.
//!
//! A range operation is split into *chunks*, one per covering section:
//!
//! ```text
//!   range            [=========================)
//!   sections    [--- A ---)[------ B ------)[--- C ---)
//!   chunks           [====)[===============)[==)
//! ```
//!
//! A hole anywhere in the range fails the operation before any chunk is
//! touched. Allocating or reserving at an address first fills every hole
//! with a new section. Releasing drops every section left without
//! allocated pages.
//!
//! Operations that change the set (or its boundaries) take the write lock;
//! the others only need the read lock.

use crate::{
    HostProtection, MapFlags, MemoryError, Mode, NativeApi, NativeStatus, ProcessHandle, ProcessMemory, Protection,
    Section, adjust_protection_for_mode,
};
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::ops::Range;
use host_info::{GuestAddress, SystemInfo};
use host_sync::RwLock;
use log::{debug, warn};

/// Snapshot of one section, for diagnostics.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SectionInfo {
    pub base: GuestAddress,
    pub length: u64,
    pub mode: Mode,
    pub allocated_pages: usize,
}

/// Part of a range that falls into one section.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
struct Chunk {
    section: GuestAddress,
    address: GuestAddress,
    length: u64,
}

struct State<N: NativeApi> {
    sections: BTreeMap<GuestAddress, Section<N>>,
    /// Local mapping token to the bases of the views behind it.
    local_mappings: BTreeMap<GuestAddress, Vec<GuestAddress>>,
}

impl<N: NativeApi> State<N> {
    const fn new(sections: BTreeMap<GuestAddress, Section<N>>) -> Self {
        Self {
            sections,
            local_mappings: BTreeMap::new(),
        }
    }

    fn section_containing(&self, address: GuestAddress) -> Option<&Section<N>> {
        self.sections
            .range(..=address)
            .next_back()
            .map(|(_, section)| section)
            .filter(|section| section.contains(address))
    }

    fn section(&self, chunk: &Chunk) -> Result<&Section<N>, MemoryError> {
        self.sections
            .get(&chunk.section)
            .ok_or(MemoryError::AddressNotReserved(chunk.address))
    }

    fn section_mut(&mut self, chunk: &Chunk) -> Result<&mut Section<N>, MemoryError> {
        self.sections
            .get_mut(&chunk.section)
            .ok_or(MemoryError::AddressNotReserved(chunk.address))
    }

    /// Split a validated range across the sections covering it.
    fn chunks(&self, address: GuestAddress, length: u64) -> Result<Vec<Chunk>, MemoryError> {
        let end = address + length;
        let mut cursor = address;
        let mut chunks = Vec::new();
        while cursor < end {
            let section = self
                .section_containing(cursor)
                .ok_or(MemoryError::AddressNotReserved(cursor))?;
            let stop = section.end().min(end);
            chunks.push(Chunk {
                section: section.base(),
                address: cursor,
                length: stop.offset_from(cursor),
            });
            cursor = stop;
        }
        Ok(chunks)
    }

    /// As [`chunks`](Self::chunks), additionally requiring every page to be allocated.
    fn allocated_chunks(&self, address: GuestAddress, length: u64) -> Result<Vec<Chunk>, MemoryError> {
        let chunks = self.chunks(address, length)?;
        for chunk in &chunks {
            self.section(chunk)?
                .ensure_allocated(chunk.address, chunk.length)
                .map_err(not_reserved)?;
        }
        Ok(chunks)
    }

    fn first_allocated(&self, address: GuestAddress, length: u64) -> Option<GuestAddress> {
        let end = address + length;
        let first = self.section_containing(address).map_or(address, Section::base);
        self.sections
            .range(first..end)
            .find_map(|(_, section)| section.first_allocated_in(address, length))
    }

    /// Drop every section without allocated pages.
    fn collect_garbage(&mut self) {
        let before = self.sections.len();
        self.sections.retain(|_, section| !section.is_empty());
        let collected = before - self.sections.len();
        if collected > 0 {
            debug!("collected {collected} empty section(s)");
        }
    }
}

/// Outside the section layer an unallocated page is simply not usable.
fn not_reserved(error: MemoryError) -> MemoryError {
    match error {
        MemoryError::AddressNotAllocated(address) => MemoryError::AddressNotReserved(address),
        other => other,
    }
}

fn host_protection(protection: Protection) -> Result<HostProtection, MemoryError> {
    let host = protection.to_host();
    if host.is_valid() {
        Ok(host)
    } else {
        Err(MemoryError::InvalidArgument)
    }
}

/// Position of a chunk within the caller's buffer for a transfer starting at `start`.
fn chunk_range(start: GuestAddress, chunk: &Chunk) -> Result<Range<usize>, MemoryError> {
    let offset = usize::try_from(chunk.address.offset_from(start)).map_err(|_| MemoryError::InvalidArgument)?;
    let length = usize::try_from(chunk.length).map_err(|_| MemoryError::InvalidArgument)?;
    Ok(offset..offset + length)
}

fn unmap_local<N: NativeApi>(native: &N, bases: &[GuestAddress]) {
    let process = native.current_process();
    for &base in bases.iter().rev() {
        if let Err(status) = native.unmap_view(process, base) {
            warn!("failed to unmap local view at {base}: {status}");
        }
    }
}

/// Virtual memory of one target process, built from host sections.
pub struct NativeProcess<N: NativeApi> {
    native: Arc<N>,
    info: Arc<SystemInfo>,
    process: ProcessHandle,
    state: RwLock<State<N>>,
}

impl<N: NativeApi> NativeProcess<N> {
    /// Manage the (empty) address space of `process`.
    #[must_use]
    pub fn new(native: Arc<N>, info: Arc<SystemInfo>, process: ProcessHandle) -> Self {
        Self::with_sections(native, info, process, BTreeMap::new())
    }

    const fn with_sections(
        native: Arc<N>,
        info: Arc<SystemInfo>,
        process: ProcessHandle,
        sections: BTreeMap<GuestAddress, Section<N>>,
    ) -> Self {
        Self {
            native,
            info,
            process,
            state: RwLock::new(State::new(sections)),
        }
    }

    #[inline]
    #[must_use]
    pub const fn process(&self) -> ProcessHandle {
        self.process
    }

    #[inline]
    #[must_use]
    pub fn info(&self) -> &SystemInfo {
        &self.info
    }

    #[inline]
    #[must_use]
    pub fn native(&self) -> &Arc<N> {
        &self.native
    }

    /// Current sections, lowest first.
    #[must_use]
    pub fn sections(&self) -> Vec<SectionInfo> {
        self.state.with_read(|state| {
            state
                .sections
                .values()
                .map(|section| SectionInfo {
                    base: section.base(),
                    length: section.length(),
                    mode: section.mode(),
                    allocated_pages: section.allocated_pages(),
                })
                .collect()
        })
    }

    /// Number of live local mappings.
    #[must_use]
    pub fn local_mappings(&self) -> usize {
        self.state.with_read(|state| state.local_mappings.len())
    }

    fn validate(&self, address: GuestAddress, length: u64) -> Result<(), MemoryError> {
        let end = address.checked_add(length).ok_or(MemoryError::InvalidArgument)?;
        if length == 0
            || address.is_null()
            || address < self.info.minimum_address()
            || end.offset_from(self.info.maximum_address()) > 1
        {
            return Err(MemoryError::InvalidArgument);
        }
        Ok(())
    }

    /// Cover `[address, address + length)`, widened to the allocation
    /// granularity, with sections. Returns the bases of the new ones; on
    /// failure the new ones are destroyed again.
    fn reserve_range(
        &self,
        state: &mut State<N>,
        address: GuestAddress,
        length: u64,
    ) -> Result<Vec<GuestAddress>, MemoryError> {
        let start = self.info.granularity_floor(address);
        let end = self
            .info
            .granularity_ceil(address + length)
            .ok_or(MemoryError::InvalidArgument)?;

        let mut created = Vec::new();
        let mut cursor = start;
        while cursor < end {
            if let Some(section) = state.section_containing(cursor) {
                cursor = section.end();
                continue;
            }

            let gap_end = state
                .sections
                .range(cursor..)
                .next()
                .map_or(end, |(&base, _)| base.min(end));
            let section = Section::create(
                &self.native,
                &self.info,
                self.process,
                Some(cursor),
                gap_end.offset_from(cursor),
                Mode::Private,
                MapFlags::empty(),
            );
            match section {
                Ok(section) => {
                    created.push(section.base());
                    state.sections.insert(section.base(), section);
                }
                Err(error) => {
                    for base in &created {
                        state.sections.remove(base);
                    }
                    return Err(error);
                }
            }
            cursor = gap_end;
        }

        if !created.is_empty() {
            debug!("reserved {} filler section(s) for {address}+{length:#x}", created.len());
        }
        Ok(created)
    }

    /// Duplicate every section into `target` as an independent private copy.
    ///
    /// # Errors
    /// The first failing section; nothing is left behind in `target`.
    pub fn duplicate_into(&self, target: ProcessHandle) -> Result<Self, MemoryError> {
        let state = self.state.read();
        let mut sections = BTreeMap::new();
        for (&base, section) in &state.sections {
            sections.insert(base, section.duplicate_into(target)?);
        }

        debug!("duplicated {} section(s) from {:?} into {target:?}", sections.len(), self.process);
        Ok(Self::with_sections(Arc::clone(&self.native), Arc::clone(&self.info), target, sections))
    }

    /// Map every section into `target` as [`Mode::Shared`] or [`Mode::CopyOnWrite`].
    ///
    /// For copy-on-write the source sections switch to copy-on-write first,
    /// so writes on either side stay private to that side.
    ///
    /// # Errors
    /// [`MemoryError::InvalidArgument`] for [`Mode::Private`], otherwise the
    /// first failing section.
    pub fn clone_into(&self, target: ProcessHandle, mode: Mode) -> Result<Self, MemoryError> {
        if mode == Mode::Private {
            return Err(MemoryError::InvalidArgument);
        }

        let mut state = self.state.write();
        if mode == Mode::CopyOnWrite {
            for section in state.sections.values_mut() {
                section.change_mode(Mode::CopyOnWrite)?;
            }
        }

        let mut sections = BTreeMap::new();
        for (&base, section) in &state.sections {
            sections.insert(base, section.clone_into(target, mode)?);
        }

        debug!(
            "cloned {} section(s) from {:?} into {target:?} as {mode:?}",
            sections.len(),
            self.process
        );
        Ok(Self::with_sections(Arc::clone(&self.native), Arc::clone(&self.info), target, sections))
    }

    /// Fork the address space into `target`: a private duplicate, or a clone
    /// sharing the backing objects.
    ///
    /// # Errors
    /// See [`duplicate_into`](Self::duplicate_into) and [`clone_into`](Self::clone_into).
    pub fn fork_into(&self, target: ProcessHandle, mode: Mode) -> Result<Self, MemoryError> {
        match mode {
            Mode::Private => self.duplicate_into(target),
            Mode::Shared | Mode::CopyOnWrite => self.clone_into(target, mode),
        }
    }
}

impl<N: NativeApi> ProcessMemory for NativeProcess<N> {
    fn allocate(&self, length: u64, protection: Protection, flags: MapFlags) -> Result<GuestAddress, MemoryError> {
        if length == 0 {
            return Err(MemoryError::InvalidArgument);
        }
        let protection = host_protection(protection)?;

        let mut state = self.state.write();
        let mut section = Section::create(&self.native, &self.info, self.process, None, length, Mode::Private, flags)?;
        let base = section.base();
        section.allocate(base, length, protection)?;
        state.sections.insert(base, section);
        Ok(base)
    }

    fn allocate_at(&self, address: GuestAddress, length: u64, protection: Protection) -> Result<GuestAddress, MemoryError> {
        if address.is_null() {
            return self.allocate(length, protection, MapFlags::empty());
        }
        self.validate(address, length)?;
        let protection = host_protection(protection)?;

        let mut state = self.state.write();
        if let Some(used) = state.first_allocated(address, length) {
            return Err(MemoryError::AddressInUse(used));
        }

        let created = self.reserve_range(&mut state, address, length)?;
        let result = state.chunks(address, length).and_then(|chunks| {
            chunks
                .iter()
                .try_for_each(|chunk| state.section_mut(chunk)?.allocate(chunk.address, chunk.length, protection))
        });

        if result.is_err() {
            for base in created {
                if state.sections.get(&base).is_some_and(Section::is_empty) {
                    state.sections.remove(&base);
                }
            }
        }
        result.map(|()| address)
    }

    fn reserve(&self, length: u64, flags: MapFlags) -> Result<GuestAddress, MemoryError> {
        if length == 0 {
            return Err(MemoryError::InvalidArgument);
        }

        let mut state = self.state.write();
        let section = Section::create(&self.native, &self.info, self.process, None, length, Mode::Private, flags)?;
        let base = section.base();
        state.sections.insert(base, section);
        Ok(base)
    }

    fn reserve_at(&self, address: GuestAddress, length: u64) -> Result<GuestAddress, MemoryError> {
        if address.is_null() {
            return self.reserve(length, MapFlags::empty());
        }
        self.validate(address, length)?;

        let mut state = self.state.write();
        self.reserve_range(&mut state, address, length)?;
        Ok(address)
    }

    fn protect(&self, address: GuestAddress, length: u64, protection: Protection) -> Result<(), MemoryError> {
        self.validate(address, length)?;
        let protection = host_protection(protection)?;

        let state = self.state.read();
        for chunk in state.allocated_chunks(address, length)? {
            state
                .section(&chunk)?
                .protect(chunk.address, chunk.length, protection)
                .map_err(not_reserved)?;
        }
        Ok(())
    }

    fn read(&self, address: GuestAddress, buffer: &mut [u8]) -> Result<usize, MemoryError> {
        self.validate(address, buffer.len() as u64)?;

        let state = self.state.read();
        for chunk in state.allocated_chunks(address, buffer.len() as u64)? {
            let range = chunk_range(address, &chunk)?;
            let expected = range.len();
            let copied = self
                .native
                .read(self.process, chunk.address, &mut buffer[range])
                .map_err(MemoryError::AccessDenied)?;
            if copied != expected {
                return Err(MemoryError::AccessDenied(NativeStatus::PARTIAL_COPY));
            }
        }
        Ok(buffer.len())
    }

    fn write(&self, address: GuestAddress, data: &[u8]) -> Result<usize, MemoryError> {
        self.validate(address, data.len() as u64)?;

        let state = self.state.read();
        for chunk in state.allocated_chunks(address, data.len() as u64)? {
            let range = chunk_range(address, &chunk)?;
            let expected = range.len();
            let copied = self
                .native
                .write(self.process, chunk.address, &data[range])
                .map_err(MemoryError::AccessDenied)?;
            if copied != expected {
                return Err(MemoryError::AccessDenied(NativeStatus::PARTIAL_COPY));
            }
        }
        Ok(data.len())
    }

    fn lock(&self, address: GuestAddress, length: u64) -> Result<(), MemoryError> {
        self.validate(address, length)?;

        let state = self.state.read();
        for chunk in state.allocated_chunks(address, length)? {
            self.native
                .lock(self.process, chunk.address, chunk.length)
                .map_err(MemoryError::AccessDenied)?;
        }
        Ok(())
    }

    fn unlock(&self, address: GuestAddress, length: u64) -> Result<(), MemoryError> {
        self.validate(address, length)?;

        let state = self.state.read();
        for chunk in state.allocated_chunks(address, length)? {
            self.native
                .unlock(self.process, chunk.address, chunk.length)
                .map_err(MemoryError::AccessDenied)?;
        }
        Ok(())
    }

    fn release(&self, address: GuestAddress, length: u64) -> Result<(), MemoryError> {
        self.validate(address, length)?;

        let mut state = self.state.write();
        let result = state.chunks(address, length).and_then(|chunks| {
            chunks
                .iter()
                .try_for_each(|chunk| state.section_mut(chunk)?.release(chunk.address, chunk.length))
        });
        state.collect_garbage();
        result
    }

    fn map(&self, address: GuestAddress, length: u64, protection: Protection) -> Result<GuestAddress, MemoryError> {
        if protection.contains(Protection::GUARD) {
            return Err(MemoryError::InvalidArgument);
        }
        self.validate(address, length)?;
        let protection = host_protection(protection)?;

        let mut state = self.state.write();
        let mut targets = Vec::new();
        for chunk in state.allocated_chunks(address, length)? {
            let section = state.section(&chunk)?;
            targets.push((
                section.handle(),
                adjust_protection_for_mode(protection, section.mode()),
                chunk.address.offset_from(section.base()),
            ));
        }

        let current = self.native.current_process();
        let mut bases = Vec::new();
        let mut token = None;
        let mut next = None;
        for (handle, protection, offset) in targets {
            match self
                .native
                .map_view(handle, current, next, protection, MapFlags::empty())
            {
                Ok(view) => {
                    if token.is_none() {
                        token = Some(view.base + offset);
                    }
                    bases.push(view.base);
                    next = Some(view.base + view.length);
                }
                Err(status) => {
                    unmap_local(&*self.native, &bases);
                    return Err(MemoryError::AccessDenied(status));
                }
            }
        }

        let token = token.ok_or(MemoryError::InvalidArgument)?;
        debug!("mapped {address}+{length:#x} of {:?} locally at {token}", self.process);
        state.local_mappings.insert(token, bases);
        Ok(token)
    }

    fn unmap(&self, token: GuestAddress) -> Result<(), MemoryError> {
        let mut state = self.state.write();
        let bases = state
            .local_mappings
            .remove(&token)
            .ok_or(MemoryError::InvalidAddress(token))?;
        unmap_local(&*self.native, &bases);
        debug!("unmapped local mapping {token}");
        Ok(())
    }

    fn clear(&self) {
        let mut state = self.state.write();
        for bases in core::mem::take(&mut state.local_mappings).values() {
            unmap_local(&*self.native, bases);
        }
        state.sections.clear();
    }
}

impl<N: NativeApi> Drop for NativeProcess<N> {
    fn drop(&mut self) {
        let Self { native, state, .. } = self;
        let state = state.get_mut();
        for bases in core::mem::take(&mut state.local_mappings).values() {
            unmap_local(&**native, bases);
        }
        state.sections.clear();
    }
}
