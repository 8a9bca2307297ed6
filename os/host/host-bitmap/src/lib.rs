//! # Allocation bitmaps
//!
//! [`AllocationBitmap`] is a resizable bit vector with range operations and
//! run searches. It tracks which pages of a section are soft-allocated to the
//! guest, one bit per page. It is not synchronized; owners serialize access.
//!
//! [`IndexPool`] hands out unique indices from a bitmap behind a reader/writer lock,
//! optionally offset by a reserved prefix (e.g. to keep `0` invalid).
//!
//! ```rust
//! use host_bitmap::AllocationBitmap;
//!
//! let mut pages = AllocationBitmap::new(16);
//! pages.set_range(2, 3);
//! assert!(pages.are_bits_set(2, 3));
//! assert_eq!(pages.find_clear(4, 0), Some(5));
//! assert_eq!(pages.set_runs().collect::<Vec<_>>(), vec![2..5]);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

mod bitmap;
mod index_pool;

pub use bitmap::{AllocationBitmap, SetRuns};
pub use index_pool::{IndexPool, IndexPoolError};
