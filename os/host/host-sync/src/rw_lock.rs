//! Reader/writer spin lock.
//!
//! State word layout:
//!
//! ```text
//!   bit 0      WRITER   a writer holds the lock
//!   bit 1      PENDING  a writer is waiting; new readers back off
//!   bits 2..   reader count
//! ```

use core::cell::UnsafeCell;
use core::hint::spin_loop;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicUsize, Ordering};

const WRITER: usize = 0b01;
const PENDING: usize = 0b10;
const READER: usize = 0b100;

pub struct RwLock<T> {
    state: AtomicUsize,
    cell: UnsafeCell<T>,
}

// SAFETY: readers share `&T` across threads (needs `T: Sync`); a writer
// may move values in and out through `&mut T` (needs `T: Send`).
unsafe impl<T: Send + Sync> Sync for RwLock<T> {}
// SAFETY: the lock owns its value.
unsafe impl<T: Send> Send for RwLock<T> {}

impl<T> RwLock<T> {
    pub const fn new(value: T) -> Self {
        Self {
            state: AtomicUsize::new(0),
            cell: UnsafeCell::new(value),
        }
    }

    #[inline]
    pub const fn get_mut(&mut self) -> &mut T {
        self.cell.get_mut()
    }

    #[inline]
    pub fn into_inner(self) -> T {
        self.cell.into_inner()
    }

    /// Acquire shared access, spinning while a writer holds or awaits the lock.
    #[must_use]
    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        loop {
            if let Some(guard) = self.try_read() {
                return guard;
            }
            spin_loop();
        }
    }

    #[must_use]
    pub fn try_read(&self) -> Option<RwLockReadGuard<'_, T>> {
        let s = self.state.load(Ordering::Relaxed);
        if s & (WRITER | PENDING) != 0 {
            return None;
        }
        self.state
            .compare_exchange_weak(s, s + READER, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| RwLockReadGuard { lock: self })
    }

    /// Acquire exclusive access.
    #[must_use]
    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        loop {
            let s = self.state.load(Ordering::Relaxed);
            if s & WRITER == 0 && s < READER {
                if self
                    .state
                    .compare_exchange_weak(s, WRITER, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
                {
                    return RwLockWriteGuard { lock: self };
                }
            } else if s & PENDING == 0 {
                self.state.fetch_or(PENDING, Ordering::Relaxed);
            }
            spin_loop();
        }
    }

    #[must_use]
    pub fn try_write(&self) -> Option<RwLockWriteGuard<'_, T>> {
        let s = self.state.load(Ordering::Relaxed);
        if s & WRITER != 0 || s >= READER {
            return None;
        }
        self.state
            .compare_exchange(s, WRITER, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| RwLockWriteGuard { lock: self })
    }

    #[inline]
    pub fn with_read<U>(&self, f: impl FnOnce(&T) -> U) -> U {
        let g = self.read();
        f(&g)
    }

    #[inline]
    pub fn with_write<U>(&self, f: impl FnOnce(&mut T) -> U) -> U {
        let mut g = self.write();
        f(&mut g)
    }

    /// Number of readers currently holding the lock.
    #[inline]
    #[must_use]
    pub fn reader_count(&self) -> usize {
        self.state.load(Ordering::Relaxed) / READER
    }

    #[inline]
    #[must_use]
    pub fn is_write_locked(&self) -> bool {
        self.state.load(Ordering::Relaxed) & WRITER != 0
    }
}

impl<T: Default> Default for RwLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

pub struct RwLockReadGuard<'a, T> {
    lock: &'a RwLock<T>,
}

impl<T> Deref for RwLockReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: a read guard holds one READER count, so no writer can
        // hold the lock while this guard lives.
        unsafe { &*self.lock.cell.get() }
    }
}

impl<T> Drop for RwLockReadGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.state.fetch_sub(READER, Ordering::Release);
    }
}

pub struct RwLockWriteGuard<'a, T> {
    lock: &'a RwLock<T>,
}

impl<T> Deref for RwLockWriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the WRITER bit is ours; there are no readers and no other writer.
        unsafe { &*self.lock.cell.get() }
    }
}

impl<T> DerefMut for RwLockWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the WRITER bit is ours, and `&mut self` makes this the only
        // live borrow through the guard.
        unsafe { &mut *self.lock.cell.get() }
    }
}

impl<T> Drop for RwLockWriteGuard<'_, T> {
    fn drop(&mut self) {
        // PENDING stays set if another writer raised it meanwhile
        self.lock.state.fetch_and(!WRITER, Ordering::Release);
    }
}
