//! # Guest virtual memory over host sections
//!
//! Allocate, reserve, protect, read, write, map and release memory inside a
//! *separate* process whose address space the host only lets us populate with
//! sections: shareable backing objects that commit every page once mapped
//! and cannot be partially decommitted.
//!
//! ## Layers
//!
//! | Item | Role |
//! |------|------|
//! | [`NativeApi`] | Host primitives over opaque process and section handles. |
//! | [`Section`] | One mapped backing object plus a page bitmap that records which pages the guest owns. |
//! | [`ProcessMemory`] | The range operations a loader or syscall layer consumes. |
//! | [`NativeProcess`] | Splits ranges across sections, fills holes, collects empty sections, forks. |
//! | [`SimulatedHost`] | In-memory [`NativeApi`] used by the tests and tools. |
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use host_info::{GuestAddress, SystemInfo};
//! use host_vmem::{NativeProcess, ProcessMemory, Protection, SimulatedHost};
//!
//! let info = Arc::new(SystemInfo::default());
//! let host = Arc::new(SimulatedHost::new(Arc::clone(&info)));
//! let target = host.create_process();
//! let memory = NativeProcess::new(host, info, target);
//!
//! let at = GuestAddress::new(0x40_0000);
//! memory.allocate_at(at, 0x3000, Protection::READ_WRITE).unwrap();
//! memory.write(at, b"hello").unwrap();
//!
//! let mut buf = [0_u8; 5];
//! memory.read(at, &mut buf).unwrap();
//! assert_eq!(&buf, b"hello");
//!
//! memory.release(at, 0x3000).unwrap();
//! assert!(memory.sections().is_empty());
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

mod error;
mod native;
mod native_process;
mod process_memory;
mod protection;
mod section;
mod sim;
mod status;

pub use error::{EACCES, EEXIST, EINVAL, ENOMEM, ErrorKind, MemoryError};
pub use native::{
    MapFlags, MappedView, NativeApi, NativeOp, ProcessHandle, RegionInfo, RegionState, SectionAccess, SectionHandle,
};
pub use native_process::{NativeProcess, SectionInfo};
pub use process_memory::ProcessMemory;
pub use protection::{HostProtection, Mode, Protection, adjust_protection_for_mode};
pub use section::{AllocatedRegion, Section};
pub use sim::SimulatedHost;
pub use status::NativeStatus;
