//! # Host system information
//!
//! Address types and the read-only configuration shared by the guest
//! address-space manager and the native layer below it.
//!
//! The host hands out two granularities:
//!
//! | Constant                 | Typical x86-64 value | Governs                                  |
//! |--------------------------|---------------------:|------------------------------------------|
//! | `page_size`              |                4 KiB | protection, allocation bitmap bits       |
//! | `allocation_granularity` |               64 KiB | section base addresses and section sizes |
//!
//! [`SystemInfo`] is built once at startup and passed around behind an `Arc`;
//! nothing in this crate is global.
//!
//! ```rust
//! use host_info::{GuestAddress, SystemInfo};
//!
//! let info = SystemInfo::default();
//! let va = GuestAddress::new(0x1_2345);
//! assert_eq!(info.granularity_floor(va), GuestAddress::new(0x1_0000));
//! assert_eq!(info.page_ceil(va), Some(GuestAddress::new(0x1_3000)));
//! assert_eq!(info.pages_in(0x2001), 3);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]

mod address;
mod system_info;

pub use address::GuestAddress;
pub use system_info::{SystemInfo, SystemInfoError};
