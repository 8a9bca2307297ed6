use alloc::vec;
use alloc::vec::Vec;
use core::ops::Range;

const WORD_BITS: usize = usize::BITS as usize;

/// Fixed-size, resizable bit vector.
///
/// Storage is rounded up to whole machine words; bits past [`size`](Self::size)
/// are always zero so that word-wise scans never see stale data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllocationBitmap {
    words: Vec<usize>,
    size: usize,
}

impl AllocationBitmap {
    /// A bitmap of `size` bits, all clear.
    #[must_use]
    pub fn new(size: usize) -> Self {
        Self {
            words: vec![0; size.div_ceil(WORD_BITS)],
            size,
        }
    }

    #[inline]
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Change the number of bits. Growth zero-fills; shrinking clears the
    /// removed tail first so a later regrow sees clear bits.
    pub fn resize(&mut self, size: usize) {
        if size < self.size {
            self.clear_range(size, self.size - size);
        }
        self.words.resize(size.div_ceil(WORD_BITS), 0);
        self.size = size;
    }

    #[inline]
    #[must_use]
    pub fn test(&self, bit: usize) -> bool {
        bit < self.size && self.words[bit / WORD_BITS] & (1 << (bit % WORD_BITS)) != 0
    }

    /// Set a single bit; out of range is a no-op.
    #[inline]
    pub fn set(&mut self, bit: usize) {
        if bit < self.size {
            self.words[bit / WORD_BITS] |= 1 << (bit % WORD_BITS);
        }
    }

    /// Clear a single bit; out of range is a no-op.
    #[inline]
    pub fn clear(&mut self, bit: usize) {
        if bit < self.size {
            self.words[bit / WORD_BITS] &= !(1 << (bit % WORD_BITS));
        }
    }

    /// Set `count` bits from `start`, clamped to the bitmap.
    pub fn set_range(&mut self, start: usize, count: usize) {
        self.fill(start, count, true);
    }

    /// Clear `count` bits from `start`, clamped to the bitmap.
    pub fn clear_range(&mut self, start: usize, count: usize) {
        self.fill(start, count, false);
    }

    pub fn set_all(&mut self) {
        self.words.fill(!0);
        self.mask_tail();
    }

    pub fn clear_all(&mut self) {
        self.words.fill(0);
    }

    /// Whether all of `start..start + count` are set.
    ///
    /// A range that does not fit, or is empty, is never satisfied.
    #[must_use]
    pub fn are_bits_set(&self, start: usize, count: usize) -> bool {
        self.covers(start, count) && self.run_length(start, start + count, true) == count
    }

    /// Whether all of `start..start + count` are clear.
    ///
    /// A range that does not fit, or is empty, is never satisfied.
    #[must_use]
    pub fn are_bits_clear(&self, start: usize, count: usize) -> bool {
        self.covers(start, count) && self.run_length(start, start + count, false) == count
    }

    /// Lowest start of `quantity` contiguous clear bits, looking at or after
    /// `hint` first and then from bit zero.
    #[must_use]
    pub fn find_clear(&self, quantity: usize, hint: usize) -> Option<usize> {
        self.find(quantity, hint, false)
    }

    /// Lowest start of `quantity` contiguous set bits, looking at or after
    /// `hint` first and then from bit zero.
    #[must_use]
    pub fn find_set(&self, quantity: usize, hint: usize) -> Option<usize> {
        self.find(quantity, hint, true)
    }

    /// [`find_clear`](Self::find_clear), then set the run that was found.
    pub fn find_clear_and_set(&mut self, quantity: usize, hint: usize) -> Option<usize> {
        let start = self.find_clear(quantity, hint)?;
        self.set_range(start, quantity);
        Some(start)
    }

    /// [`find_set`](Self::find_set), then clear the run that was found.
    pub fn find_set_and_clear(&mut self, quantity: usize, hint: usize) -> Option<usize> {
        let start = self.find_set(quantity, hint)?;
        self.clear_range(start, quantity);
        Some(start)
    }

    /// No bit is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// Every bit is set.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.count_set() == self.size
    }

    #[must_use]
    pub fn count_set(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Maximal runs of set bits, in ascending order.
    #[must_use]
    pub const fn set_runs(&self) -> SetRuns<'_> {
        SetRuns {
            bitmap: self,
            next: 0,
        }
    }

    fn covers(&self, start: usize, count: usize) -> bool {
        count != 0 && start.checked_add(count).is_some_and(|end| end <= self.size)
    }

    fn mask_tail(&mut self) {
        let tail = self.size % WORD_BITS;
        if tail != 0
            && let Some(last) = self.words.last_mut()
        {
            *last &= (1 << tail) - 1;
        }
    }

    fn fill(&mut self, start: usize, count: usize, value: bool) {
        let end = start.saturating_add(count).min(self.size);
        let mut bit = start;
        while bit < end {
            let offset = bit % WORD_BITS;
            let span = (WORD_BITS - offset).min(end - bit);
            let mask = if span == WORD_BITS {
                !0
            } else {
                ((1 << span) - 1) << offset
            };
            let word = &mut self.words[bit / WORD_BITS];
            if value {
                *word |= mask;
            } else {
                *word &= !mask;
            }
            bit += span;
        }
    }

    /// Length of the run of `value` bits starting at `start`, stopping at `limit`.
    fn run_length(&self, start: usize, limit: usize, value: bool) -> usize {
        let mut bit = start;
        while bit < limit {
            let offset = bit % WORD_BITS;
            let word = self.words[bit / WORD_BITS];
            let word = if value { !word } else { word };
            // first bit at or after `offset` that differs from `value`
            let differing = (word >> offset).trailing_zeros() as usize;
            if differing < WORD_BITS - offset {
                return (bit + differing).min(limit) - start;
            }
            bit += WORD_BITS - offset;
        }
        limit - start
    }

    fn find(&self, quantity: usize, hint: usize, value: bool) -> Option<usize> {
        if quantity == 0 || quantity > self.size {
            return None;
        }
        let hint = if hint >= self.size { 0 } else { hint };
        self.find_from(quantity, hint, value)
            .or_else(|| self.find_from(quantity, 0, value).filter(|&s| s < hint))
    }

    fn find_from(&self, quantity: usize, from: usize, value: bool) -> Option<usize> {
        let mut start = from;
        while start + quantity <= self.size {
            let run = self.run_length(start, start + quantity, value);
            if run == quantity {
                return Some(start);
            }
            // skip past the mismatch and the opposite-valued run after it
            let mismatch = start + run;
            start = mismatch + self.run_length(mismatch, self.size, !value);
        }
        None
    }
}

/// Iterator over maximal runs of set bits; see [`AllocationBitmap::set_runs`].
#[derive(Debug, Clone)]
pub struct SetRuns<'a> {
    bitmap: &'a AllocationBitmap,
    next: usize,
}

impl Iterator for SetRuns<'_> {
    type Item = Range<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        let size = self.bitmap.size;
        if self.next >= size {
            return None;
        }
        let start = self.next + self.bitmap.run_length(self.next, size, false);
        if start >= size {
            self.next = size;
            return None;
        }
        let end = start + self.bitmap.run_length(start, size, true);
        self.next = end;
        Some(start..end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_bitmap_is_clear() {
        let b = AllocationBitmap::new(70);
        assert_eq!(b.size(), 70);
        assert!(b.is_empty());
        assert!(!b.is_full());
        assert!(b.are_bits_clear(0, 70));
        assert_eq!(b.count_set(), 0);
    }

    #[test]
    fn single_bits_ignore_out_of_range() {
        let mut b = AllocationBitmap::new(10);
        b.set(3);
        b.set(10);
        b.set(usize::MAX);
        assert!(b.test(3));
        assert!(!b.test(10));
        assert_eq!(b.count_set(), 1);
        b.clear(3);
        b.clear(11);
        assert!(b.is_empty());
    }

    #[test]
    fn range_ops_clamp_and_span_words() {
        let mut b = AllocationBitmap::new(200);
        b.set_range(60, 10);
        assert!(b.are_bits_set(60, 10));
        assert!(!b.test(59));
        assert!(!b.test(70));
        b.set_range(190, 100);
        assert_eq!(b.count_set(), 20);
        b.clear_range(62, 1_000);
        assert_eq!(b.count_set(), 2);
        b.set_range(5, usize::MAX);
        assert_eq!(b.count_set(), 195);
    }

    #[test]
    fn queries_outside_the_bitmap_are_false() {
        let mut b = AllocationBitmap::new(8);
        b.set_all();
        assert!(b.are_bits_set(0, 8));
        assert!(!b.are_bits_set(4, 5));
        assert!(!b.are_bits_set(usize::MAX, 2));
        assert!(!b.are_bits_set(0, 0));
        assert!(!b.are_bits_clear(8, 1));
    }

    #[test]
    fn set_all_keeps_tail_clear() {
        let mut b = AllocationBitmap::new(65);
        b.set_all();
        assert!(b.is_full());
        assert_eq!(b.count_set(), 65);
        b.resize(130);
        assert_eq!(b.count_set(), 65);
        assert!(b.are_bits_clear(65, 65));
    }

    #[test]
    fn shrink_then_grow_zero_fills() {
        let mut b = AllocationBitmap::new(100);
        b.set_all();
        b.resize(40);
        assert_eq!(b.size(), 40);
        assert!(b.is_full());
        b.resize(100);
        assert_eq!(b.count_set(), 40);
        assert!(b.are_bits_clear(40, 60));
    }

    #[test]
    fn find_prefers_hint_then_wraps() {
        let mut b = AllocationBitmap::new(32);
        b.set_range(0, 4);
        b.set_range(10, 4);
        assert_eq!(b.find_clear(3, 0), Some(4));
        assert_eq!(b.find_clear(3, 8), Some(14));
        assert_eq!(b.find_clear(3, 30), Some(4));
        assert_eq!(b.find_clear(19, 0), None);
        assert_eq!(b.find_clear(18, 0), Some(14));
        assert_eq!(b.find_set(4, 5), Some(10));
        assert_eq!(b.find_set(4, 12), Some(0));
        assert_eq!(b.find_set(5, 0), None);
        assert_eq!(b.find_clear(0, 0), None);
    }

    #[test]
    fn find_and_flip() {
        let mut b = AllocationBitmap::new(8);
        assert_eq!(b.find_clear_and_set(3, 0), Some(0));
        assert_eq!(b.find_clear_and_set(3, 0), Some(3));
        assert_eq!(b.find_clear_and_set(3, 0), None);
        assert_eq!(b.find_set_and_clear(2, 2), Some(2));
        assert!(b.are_bits_clear(2, 2));
        assert!(b.test(1));
        assert!(b.test(4));
    }

    #[test]
    fn runs_cover_exactly_the_set_bits() {
        let mut b = AllocationBitmap::new(150);
        b.set_range(0, 2);
        b.set_range(63, 3);
        b.set(149);
        let runs: Vec<_> = b.set_runs().collect();
        assert_eq!(runs, vec![0..2, 63..66, 149..150]);
        assert_eq!(AllocationBitmap::new(5).set_runs().count(), 0);
    }

    #[test]
    fn clone_is_deep() {
        let mut a = AllocationBitmap::new(16);
        a.set(1);
        let b = a.clone();
        a.clear(1);
        assert!(b.test(1));
        assert_ne!(a, b);
    }
}
