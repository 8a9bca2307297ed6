//! # Host synchronization primitives
//!
//! [`RwLock`] is a spinning reader/writer lock: many concurrent readers or
//! one writer. Writers announce themselves so that a steady stream of readers
//! cannot starve them. Owners that only ever mutate take the write side.
//!
//! ```rust
//! use host_sync::RwLock;
//!
//! let sections = RwLock::new(vec![0x1_0000_u64]);
//! assert_eq!(sections.read().len(), 1);
//! sections.write().push(0x2_0000);
//! assert_eq!(sections.read().len(), 2);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod rw_lock;

pub use rw_lock::{RwLock, RwLockReadGuard, RwLockWriteGuard};
