//! # Simulated host
//!
//! [`SimulatedHost`] implements [`NativeApi`] entirely in memory. It follows
//! the host rules the manager relies on:
//!
//! - a view maps the whole section and reserves a granularity-aligned range;
//! - every page of a view is committed and carries its own protection;
//! - a page protection must stay within the view protection, which in turn
//!   must stay within the section maximum and the handle's access;
//! - the first write to a write-copy page gives that view a private copy and
//!   turns the page read-write;
//! - cross-process reads and writes check every page before copying a byte.
//!
//! Failures can be injected per [`NativeOp`] to exercise unwinding.

use crate::{
    HostProtection, MapFlags, MappedView, NativeApi, NativeOp, NativeStatus, ProcessHandle, RegionInfo, RegionState,
    SectionAccess, SectionHandle,
};
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use host_bitmap::IndexPool;
use host_info::{GuestAddress, SystemInfo};
use host_sync::RwLock;
use log::warn;

const HANDLE_CAPACITY: usize = 4096;
const CURRENT_PROCESS: u64 = 1;

// capabilities
const R: u8 = 0b0001;
const W: u8 = 0b0010;
const C: u8 = 0b0100;
const X: u8 = 0b1000;

/// Capabilities a section maximum or view protection hands out.
const fn grants(protection: HostProtection) -> u8 {
    let p = protection.access();
    if p.read_only() {
        R
    } else if p.read_write() {
        R | W | C
    } else if p.write_copy() {
        R | C
    } else if p.execute() {
        X
    } else if p.execute_read() {
        R | X
    } else if p.execute_read_write() {
        R | W | C | X
    } else if p.execute_write_copy() {
        R | C | X
    } else {
        0
    }
}

/// Capabilities a protection needs from its container.
const fn requires(protection: HostProtection) -> u8 {
    let p = protection.access();
    if p.read_only() {
        R
    } else if p.read_write() {
        R | W
    } else if p.write_copy() {
        R | C
    } else if p.execute() {
        X
    } else if p.execute_read() {
        R | X
    } else if p.execute_read_write() {
        R | W | X
    } else if p.execute_write_copy() {
        R | C | X
    } else {
        0
    }
}

fn access_for(required: u8) -> SectionAccess {
    let mut access = SectionAccess::empty();
    if required & (R | C) != 0 {
        access |= SectionAccess::MAP_READ;
    }
    if required & W != 0 {
        access |= SectionAccess::MAP_WRITE;
    }
    if required & X != 0 {
        access |= SectionAccess::MAP_EXECUTE;
    }
    access
}

#[inline]
fn to_index(value: u64) -> usize {
    usize::try_from(value).unwrap_or(usize::MAX)
}

struct Backing {
    data: Vec<u8>,
    max_protection: HostProtection,
    refs: usize,
}

#[derive(Copy, Clone)]
struct HandleEntry {
    backing: u64,
    access: SectionAccess,
}

#[derive(Clone)]
struct Page {
    protection: HostProtection,
    private: Option<Vec<u8>>,
    locked: bool,
}

struct View {
    backing: u64,
    length: u64,
    protection: HostProtection,
    pages: Vec<Page>,
}

/// Why a page walk stopped.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Fault {
    Unmapped,
    Denied,
}

/// Part of a byte range that lies within one page.
#[derive(Debug, Copy, Clone)]
struct Segment {
    view: u64,
    page: usize,
    page_offset: usize,
    view_offset: usize,
    len: usize,
}

#[derive(Default)]
struct AddressSpace {
    views: BTreeMap<u64, View>,
}

impl AddressSpace {
    fn view_containing(&self, address: u64) -> Option<(u64, &View)> {
        self.views
            .range(..=address)
            .next_back()
            .filter(|(base, view)| address - **base < view.length)
            .map(|(base, view)| (*base, view))
    }

    /// A view's reservation overlaps `[start, end)`.
    fn overlaps(&self, start: u64, end: u64, granularity: u64) -> bool {
        self.views
            .range(..end)
            .next_back()
            .is_some_and(|(base, view)| base + view.length.next_multiple_of(granularity) > start)
    }

    fn find_free(&self, length: u64, info: &SystemInfo, top_down: bool) -> Option<u64> {
        let granularity = info.allocation_granularity();
        let minimum = info.minimum_address().as_u64();
        let maximum = info.maximum_address().as_u64();

        if top_down {
            let mut top = maximum.checked_add(1)?;
            for (&base, view) in self.views.iter().rev() {
                let end = (base + view.length).next_multiple_of(granularity);
                if let Some(candidate) = top.checked_sub(length).map(|c| c & !(granularity - 1))
                    && candidate >= end
                    && candidate >= minimum
                {
                    return Some(candidate);
                }
                top = top.min(base);
            }
            let candidate = top.checked_sub(length)? & !(granularity - 1);
            return (candidate >= minimum).then_some(candidate);
        }

        let mut candidate = minimum;
        for (&base, view) in &self.views {
            if candidate.checked_add(length)? <= base {
                break;
            }
            candidate = candidate.max((base + view.length).next_multiple_of(granularity));
        }
        let last = candidate.checked_add(length - 1)?;
        (last <= maximum).then_some(candidate)
    }

    fn segments(
        &self,
        start: u64,
        end: u64,
        page_size: u64,
        allowed: impl Fn(&Page) -> bool,
    ) -> Result<Vec<Segment>, Fault> {
        let mut segments = Vec::new();
        let mut cursor = start;
        while cursor < end {
            let (base, view) = self.view_containing(cursor).ok_or(Fault::Unmapped)?;
            let view_offset = cursor - base;
            let index = to_index(view_offset / page_size);
            let page = view.pages.get(index).ok_or(Fault::Unmapped)?;
            if !allowed(page) {
                return Err(Fault::Denied);
            }

            let page_end = (base + (index as u64 + 1) * page_size).min(end);
            segments.push(Segment {
                view: base,
                page: index,
                page_offset: to_index(view_offset % page_size),
                view_offset: to_index(view_offset),
                len: to_index(page_end - cursor),
            });
            cursor = page_end;
        }
        Ok(segments)
    }
}

struct Injection {
    op: NativeOp,
    skip: usize,
    status: NativeStatus,
}

#[derive(Default)]
struct State {
    backings: BTreeMap<u64, Backing>,
    handles: BTreeMap<usize, HandleEntry>,
    processes: BTreeMap<u64, AddressSpace>,
    next_backing: u64,
    next_process: u64,
    committed: u64,
    commit_limit: Option<u64>,
    injections: Vec<Injection>,
}

impl State {
    fn check_injection(&mut self, op: NativeOp) -> Result<(), NativeStatus> {
        let Some(index) = self.injections.iter().position(|i| i.op == op) else {
            return Ok(());
        };
        if self.injections[index].skip > 0 {
            self.injections[index].skip -= 1;
            return Ok(());
        }
        Err(self.injections.remove(index).status)
    }

    fn space(&self, process: ProcessHandle) -> Result<&AddressSpace, NativeStatus> {
        self.processes.get(&process.raw()).ok_or(NativeStatus::INVALID_HANDLE)
    }

    fn space_mut(&mut self, process: ProcessHandle) -> Result<&mut AddressSpace, NativeStatus> {
        self.processes.get_mut(&process.raw()).ok_or(NativeStatus::INVALID_HANDLE)
    }

    fn drop_backing_ref(&mut self, id: u64) {
        let Some(backing) = self.backings.get_mut(&id) else {
            return;
        };
        backing.refs -= 1;
        if backing.refs == 0
            && let Some(backing) = self.backings.remove(&id)
        {
            self.committed -= backing.data.len() as u64;
        }
    }
}

/// In-memory [`NativeApi`] with any number of processes.
pub struct SimulatedHost {
    info: Arc<SystemInfo>,
    handles: IndexPool,
    state: RwLock<State>,
}

impl SimulatedHost {
    /// A host with one process, the caller itself.
    #[must_use]
    pub fn new(info: Arc<SystemInfo>) -> Self {
        let mut state = State {
            next_backing: 1,
            next_process: CURRENT_PROCESS + 1,
            ..State::default()
        };
        state.processes.insert(CURRENT_PROCESS, AddressSpace::default());
        Self {
            info,
            handles: IndexPool::with_reserved(HANDLE_CAPACITY, 1),
            state: RwLock::new(state),
        }
    }

    /// Refuse section creation once `bytes` are committed.
    #[must_use]
    pub fn with_commit_limit(mut self, bytes: u64) -> Self {
        self.state.get_mut().commit_limit = Some(bytes);
        self
    }

    #[inline]
    #[must_use]
    pub fn info(&self) -> &SystemInfo {
        &self.info
    }

    /// Add an empty address space.
    pub fn create_process(&self) -> ProcessHandle {
        self.state.with_write(|state| {
            let raw = state.next_process;
            state.next_process += 1;
            state.processes.insert(raw, AddressSpace::default());
            ProcessHandle::new(raw)
        })
    }

    /// Fail the next call of `op` with `status`.
    pub fn fail_next(&self, op: NativeOp, status: NativeStatus) {
        self.fail_nth(op, 0, status);
    }

    /// Let `skip` calls of `op` succeed, then fail one with `status`.
    pub fn fail_nth(&self, op: NativeOp, skip: usize, status: NativeStatus) {
        self.state
            .with_write(|state| state.injections.push(Injection { op, skip, status }));
    }

    /// Number of views mapped into `process`.
    #[must_use]
    pub fn view_count(&self, process: ProcessHandle) -> usize {
        self.state
            .with_read(|state| state.space(process).map_or(0, |space| space.views.len()))
    }

    /// Views mapped into `process`, lowest first.
    #[must_use]
    pub fn views(&self, process: ProcessHandle) -> Vec<MappedView> {
        self.state.with_read(|state| {
            state.space(process).map_or_else(
                |_| Vec::new(),
                |space| {
                    space
                        .views
                        .iter()
                        .map(|(&base, view)| MappedView {
                            base: GuestAddress::new(base),
                            length: view.length,
                        })
                        .collect()
                },
            )
        })
    }

    /// Open section handles.
    #[must_use]
    pub fn open_handles(&self) -> usize {
        self.state.with_read(|state| state.handles.len())
    }

    /// Sections still referenced by a handle or a view.
    #[must_use]
    pub fn live_sections(&self) -> usize {
        self.state.with_read(|state| state.backings.len())
    }

    /// Bytes held by live sections.
    #[must_use]
    pub fn committed(&self) -> u64 {
        self.state.with_read(|state| state.committed)
    }

    /// Protection of the page containing `address`, if mapped.
    #[must_use]
    pub fn page_protection(&self, process: ProcessHandle, address: GuestAddress) -> Option<HostProtection> {
        self.with_page(process, address, |page| page.protection)
    }

    #[must_use]
    pub fn is_locked(&self, process: ProcessHandle, address: GuestAddress) -> bool {
        self.with_page(process, address, |page| page.locked).unwrap_or(false)
    }

    fn with_page<U>(&self, process: ProcessHandle, address: GuestAddress, f: impl FnOnce(&Page) -> U) -> Option<U> {
        let page_size = self.info.page_size();
        self.state.with_read(|state| {
            let space = state.space(process).ok()?;
            let (base, view) = space.view_containing(address.as_u64())?;
            view.pages.get(to_index((address.as_u64() - base) / page_size)).map(f)
        })
    }

    /// Page-aligned `[start, end)` covering a byte range.
    fn page_range(&self, address: GuestAddress, length: u64) -> Result<(u64, u64), NativeStatus> {
        let end = address.checked_add(length).ok_or(NativeStatus::INVALID_PARAMETER)?;
        let end = self.info.page_ceil(end).ok_or(NativeStatus::INVALID_PARAMETER)?;
        if length == 0 {
            return Err(NativeStatus::INVALID_PARAMETER);
        }
        Ok((self.info.page_floor(address).as_u64(), end.as_u64()))
    }

    fn byte_range(address: GuestAddress, length: usize) -> Result<(u64, u64), NativeStatus> {
        let end = address
            .checked_add(length as u64)
            .ok_or(NativeStatus::ACCESS_VIOLATION)?;
        Ok((address.as_u64(), end.as_u64()))
    }
}

impl NativeApi for SimulatedHost {
    fn current_process(&self) -> ProcessHandle {
        ProcessHandle::new(CURRENT_PROCESS)
    }

    fn create_section(&self, length: u64, max_protection: HostProtection) -> Result<SectionHandle, NativeStatus> {
        let mut state = self.state.write();
        state.check_injection(NativeOp::CreateSection)?;
        if length == 0 || !max_protection.is_valid() || max_protection.guard() {
            return Err(NativeStatus::INVALID_PARAMETER);
        }

        let length = length
            .checked_next_multiple_of(self.info.page_size())
            .ok_or(NativeStatus::INVALID_PARAMETER)?;
        if let Some(limit) = state.commit_limit
            && state.committed.saturating_add(length) > limit
        {
            return Err(NativeStatus::COMMITMENT_LIMIT);
        }
        let size = usize::try_from(length).map_err(|_| NativeStatus::NO_MEMORY)?;
        let raw = self.handles.allocate().map_err(|_| NativeStatus::NO_MEMORY)?;

        let id = state.next_backing;
        state.next_backing += 1;
        state.backings.insert(
            id,
            Backing {
                data: vec![0; size],
                max_protection,
                refs: 1,
            },
        );
        state.handles.insert(
            raw,
            HandleEntry {
                backing: id,
                access: SectionAccess::ALL,
            },
        );
        state.committed += length;
        Ok(SectionHandle::new(raw))
    }

    fn duplicate_section(&self, section: SectionHandle, access: SectionAccess) -> Result<SectionHandle, NativeStatus> {
        let mut state = self.state.write();
        state.check_injection(NativeOp::DuplicateSection)?;
        let entry = *state
            .handles
            .get(&section.raw())
            .ok_or(NativeStatus::INVALID_HANDLE)?;
        if !entry.access.contains(access) {
            return Err(NativeStatus::ACCESS_DENIED);
        }

        let raw = self.handles.allocate().map_err(|_| NativeStatus::NO_MEMORY)?;
        state.handles.insert(
            raw,
            HandleEntry {
                backing: entry.backing,
                access,
            },
        );
        if let Some(backing) = state.backings.get_mut(&entry.backing) {
            backing.refs += 1;
        }
        Ok(SectionHandle::new(raw))
    }

    fn close_section(&self, section: SectionHandle) -> Result<(), NativeStatus> {
        let mut state = self.state.write();
        state.check_injection(NativeOp::CloseSection)?;
        let entry = state
            .handles
            .remove(&section.raw())
            .ok_or(NativeStatus::INVALID_HANDLE)?;
        if let Err(error) = self.handles.release(section.raw()) {
            warn!("handle pool out of sync closing {section:?}: {error}");
        }
        state.drop_backing_ref(entry.backing);
        Ok(())
    }

    fn map_view(
        &self,
        section: SectionHandle,
        process: ProcessHandle,
        address: Option<GuestAddress>,
        protection: HostProtection,
        flags: MapFlags,
    ) -> Result<MappedView, NativeStatus> {
        let mut state = self.state.write();
        state.check_injection(NativeOp::MapView)?;
        if !protection.is_valid() || protection.guard() || !MapFlags::TOP_DOWN.contains(flags) {
            return Err(NativeStatus::INVALID_PARAMETER);
        }

        let entry = *state
            .handles
            .get(&section.raw())
            .ok_or(NativeStatus::INVALID_HANDLE)?;
        let backing = state.backings.get(&entry.backing).ok_or(NativeStatus::INVALID_HANDLE)?;
        let needed = requires(protection);
        if needed & !grants(backing.max_protection) != 0 {
            return Err(NativeStatus::SECTION_PROTECTION);
        }
        if !entry.access.contains(access_for(needed)) {
            return Err(NativeStatus::ACCESS_DENIED);
        }

        let length = backing.data.len() as u64;
        let granularity = self.info.allocation_granularity();
        let reserved = length.next_multiple_of(granularity);
        let space = state.space(process)?;
        let base = match address {
            Some(address) => {
                let base = address.as_u64();
                let last = base.checked_add(reserved - 1).ok_or(NativeStatus::INVALID_PARAMETER)?;
                if !address.is_aligned(granularity)
                    || address < self.info.minimum_address()
                    || last > self.info.maximum_address().as_u64()
                {
                    return Err(NativeStatus::INVALID_PARAMETER);
                }
                if space.overlaps(base, last + 1, granularity) {
                    return Err(NativeStatus::CONFLICTING_ADDRESSES);
                }
                base
            }
            None => space
                .find_free(reserved, &self.info, flags.contains(MapFlags::TOP_DOWN))
                .ok_or(NativeStatus::NO_MEMORY)?,
        };

        let page = Page {
            protection,
            private: None,
            locked: false,
        };
        let view = View {
            backing: entry.backing,
            length,
            protection,
            pages: vec![page; to_index(length / self.info.page_size())],
        };
        state.space_mut(process)?.views.insert(base, view);
        if let Some(backing) = state.backings.get_mut(&entry.backing) {
            backing.refs += 1;
        }

        Ok(MappedView {
            base: GuestAddress::new(base),
            length,
        })
    }

    fn unmap_view(&self, process: ProcessHandle, address: GuestAddress) -> Result<(), NativeStatus> {
        let mut state = self.state.write();
        state.check_injection(NativeOp::UnmapView)?;
        let space = state.space_mut(process)?;
        let base = space
            .view_containing(address.as_u64())
            .map(|(base, _)| base)
            .ok_or(NativeStatus::NOT_MAPPED_VIEW)?;
        let view = space.views.remove(&base).ok_or(NativeStatus::NOT_MAPPED_VIEW)?;
        state.drop_backing_ref(view.backing);
        Ok(())
    }

    fn protect(
        &self,
        process: ProcessHandle,
        address: GuestAddress,
        length: u64,
        protection: HostProtection,
    ) -> Result<HostProtection, NativeStatus> {
        let mut state = self.state.write();
        state.check_injection(NativeOp::Protect)?;
        if !protection.is_valid() {
            return Err(NativeStatus::INVALID_PARAMETER);
        }
        let (start, end) = self.page_range(address, length)?;
        let page_size = self.info.page_size();

        let space = state.space_mut(process)?;
        let base = space
            .view_containing(start)
            .map(|(base, _)| base)
            .ok_or(NativeStatus::NOT_MAPPED_VIEW)?;
        let view = space.views.get_mut(&base).ok_or(NativeStatus::NOT_MAPPED_VIEW)?;
        if end > base + view.length {
            return Err(NativeStatus::CONFLICTING_ADDRESSES);
        }
        if requires(protection) & !grants(view.protection) != 0 {
            return Err(NativeStatus::SECTION_PROTECTION);
        }

        let first = to_index((start - base) / page_size);
        let last = to_index((end - base) / page_size);
        let previous = view.pages[first].protection;
        for page in &mut view.pages[first..last] {
            page.protection = protection;
        }
        Ok(previous)
    }

    fn read(&self, process: ProcessHandle, address: GuestAddress, buffer: &mut [u8]) -> Result<usize, NativeStatus> {
        let mut state = self.state.write();
        state.check_injection(NativeOp::Read)?;
        if buffer.is_empty() {
            return Ok(0);
        }
        let (start, end) = Self::byte_range(address, buffer.len())?;

        let space = state.space(process)?;
        let segments = space
            .segments(start, end, self.info.page_size(), |page| {
                page.protection.is_readable() && !page.protection.guard()
            })
            .map_err(|_| NativeStatus::ACCESS_VIOLATION)?;

        let mut done = 0;
        for segment in segments {
            let view = space.views.get(&segment.view).ok_or(NativeStatus::ACCESS_VIOLATION)?;
            let source = match &view.pages[segment.page].private {
                Some(copy) => &copy[segment.page_offset..segment.page_offset + segment.len],
                None => {
                    let backing = state.backings.get(&view.backing).ok_or(NativeStatus::ACCESS_VIOLATION)?;
                    &backing.data[segment.view_offset..segment.view_offset + segment.len]
                }
            };
            buffer[done..done + segment.len].copy_from_slice(source);
            done += segment.len;
        }
        Ok(done)
    }

    fn write(&self, process: ProcessHandle, address: GuestAddress, data: &[u8]) -> Result<usize, NativeStatus> {
        let mut state = self.state.write();
        state.check_injection(NativeOp::Write)?;
        if data.is_empty() {
            return Ok(0);
        }
        let (start, end) = Self::byte_range(address, data.len())?;
        let page_size = self.info.page_size();

        let segments = state
            .space(process)?
            .segments(start, end, page_size, |page| {
                page.protection.is_writable() && !page.protection.guard()
            })
            .map_err(|_| NativeStatus::ACCESS_VIOLATION)?;

        let State {
            backings, processes, ..
        } = &mut *state;
        let space = processes.get_mut(&process.raw()).ok_or(NativeStatus::INVALID_HANDLE)?;

        let mut done = 0;
        for segment in segments {
            let view = space.views.get_mut(&segment.view).ok_or(NativeStatus::ACCESS_VIOLATION)?;
            let backing = backings.get_mut(&view.backing).ok_or(NativeStatus::ACCESS_VIOLATION)?;
            let page = &mut view.pages[segment.page];

            if page.private.is_none() && page.protection.is_write_copy() {
                let page_start = segment.view_offset - segment.page_offset;
                page.private = Some(backing.data[page_start..page_start + to_index(page_size)].to_vec());
                let access = if page.protection.execute_write_copy() {
                    HostProtection::EXECUTE_READ_WRITE
                } else {
                    HostProtection::READ_WRITE
                };
                page.protection = page.protection.with_access(access);
            }

            let source = &data[done..done + segment.len];
            match &mut page.private {
                Some(copy) => copy[segment.page_offset..segment.page_offset + segment.len].copy_from_slice(source),
                None => backing.data[segment.view_offset..segment.view_offset + segment.len].copy_from_slice(source),
            }
            done += segment.len;
        }
        Ok(done)
    }

    fn query(&self, process: ProcessHandle, address: GuestAddress) -> Result<RegionInfo, NativeStatus> {
        let mut state = self.state.write();
        state.check_injection(NativeOp::Query)?;
        if address > self.info.maximum_address() {
            return Err(NativeStatus::INVALID_PARAMETER);
        }
        let page_size = self.info.page_size();
        let page_base = self.info.page_floor(address);
        let space = state.space(process)?;

        if let Some((base, view)) = space.view_containing(address.as_u64()) {
            let first = to_index((page_base.as_u64() - base) / page_size);
            let protection = view.pages[first].protection;
            let run = view.pages[first..]
                .iter()
                .take_while(|page| page.protection == protection)
                .count();
            return Ok(RegionInfo {
                base: page_base,
                length: run as u64 * page_size,
                state: RegionState::Committed,
                protection,
            });
        }

        let next = space
            .views
            .range(address.as_u64()..)
            .next()
            .map_or(self.info.maximum_address().as_u64() + 1, |(&base, _)| base);
        Ok(RegionInfo {
            base: page_base,
            length: next - page_base.as_u64(),
            state: RegionState::Free,
            protection: HostProtection::NO_ACCESS,
        })
    }

    fn reset(&self, process: ProcessHandle, address: GuestAddress, length: u64) -> Result<(), NativeStatus> {
        let mut state = self.state.write();
        state.check_injection(NativeOp::Reset)?;
        let (start, end) = self.page_range(address, length)?;
        state
            .space(process)?
            .segments(start, end, self.info.page_size(), |_| true)
            .map(|_| ())
            .map_err(|_| NativeStatus::NOT_MAPPED_VIEW)
    }

    fn lock(&self, process: ProcessHandle, address: GuestAddress, length: u64) -> Result<(), NativeStatus> {
        self.set_locked(NativeOp::Lock, process, address, length, true)
    }

    fn unlock(&self, process: ProcessHandle, address: GuestAddress, length: u64) -> Result<(), NativeStatus> {
        self.set_locked(NativeOp::Unlock, process, address, length, false)
    }
}

impl SimulatedHost {
    fn set_locked(
        &self,
        op: NativeOp,
        process: ProcessHandle,
        address: GuestAddress,
        length: u64,
        locked: bool,
    ) -> Result<(), NativeStatus> {
        let mut state = self.state.write();
        state.check_injection(op)?;
        let (start, end) = self.page_range(address, length)?;

        let segments = state
            .space(process)?
            .segments(start, end, self.info.page_size(), |page| {
                if locked {
                    !page.protection.no_access() && !page.protection.guard()
                } else {
                    page.locked
                }
            })
            .map_err(|fault| match (fault, locked) {
                (Fault::Unmapped, _) => NativeStatus::NOT_MAPPED_VIEW,
                (Fault::Denied, true) => NativeStatus::ACCESS_VIOLATION,
                (Fault::Denied, false) => NativeStatus::NOT_LOCKED,
            })?;

        let space = state.space_mut(process)?;
        for segment in segments {
            if let Some(view) = space.views.get_mut(&segment.view) {
                view.pages[segment.page].locked = locked;
            }
        }
        Ok(())
    }
}
