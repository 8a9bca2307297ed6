use crate::AllocationBitmap;
use host_sync::RwLock;

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum IndexPoolError {
    #[error("index pool exhausted")]
    Exhausted,
    #[error("index {0} is not allocated from this pool")]
    NotAllocated(usize),
}

/// Thread-safe allocator of unique indices in `reserved..reserved + capacity`.
pub struct IndexPool {
    bitmap: RwLock<AllocationBitmap>,
    reserved: usize,
}

impl IndexPool {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self::with_reserved(capacity, 0)
    }

    /// Indices below `reserved` are never handed out.
    #[must_use]
    pub fn with_reserved(capacity: usize, reserved: usize) -> Self {
        Self {
            bitmap: RwLock::new(AllocationBitmap::new(capacity)),
            reserved,
        }
    }

    /// Claim the lowest free index.
    ///
    /// # Errors
    /// [`IndexPoolError::Exhausted`] if every index is in use.
    pub fn allocate(&self) -> Result<usize, IndexPoolError> {
        self.bitmap
            .write()
            .find_clear_and_set(1, 0)
            .map(|bit| bit + self.reserved)
            .ok_or(IndexPoolError::Exhausted)
    }

    /// Return an index to the pool.
    ///
    /// # Errors
    /// [`IndexPoolError::NotAllocated`] if `index` is not currently handed out.
    pub fn release(&self, index: usize) -> Result<(), IndexPoolError> {
        let bit = index
            .checked_sub(self.reserved)
            .ok_or(IndexPoolError::NotAllocated(index))?;
        let mut bitmap = self.bitmap.write();
        if !bitmap.test(bit) {
            return Err(IndexPoolError::NotAllocated(index));
        }
        bitmap.clear(bit);
        Ok(())
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.bitmap.read().size()
    }

    #[must_use]
    pub fn in_use(&self) -> usize {
        self.bitmap.read().count_set()
    }
}
