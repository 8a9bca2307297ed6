use core::fmt;
use core::ops::{Add, AddAssign, Sub};

/// Virtual address inside a guest (target) process.
///
/// Never dereferenced by the controlling process; it is only passed to native
/// calls. Arithmetic helpers take the alignment explicitly because the page
/// size and allocation granularity are runtime configuration.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct GuestAddress(u64);

impl GuestAddress {
    #[inline]
    #[must_use]
    pub const fn new(v: u64) -> Self {
        Self(v)
    }

    #[inline]
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Round down to a multiple of `align` (a power of two).
    #[inline]
    #[must_use]
    pub const fn align_down(self, align: u64) -> Self {
        debug_assert!(align.is_power_of_two());
        Self(self.0 & !(align - 1))
    }

    /// Round up to a multiple of `align` (a power of two); `None` on overflow.
    #[inline]
    #[must_use]
    pub const fn align_up(self, align: u64) -> Option<Self> {
        debug_assert!(align.is_power_of_two());
        match self.0.checked_add(align - 1) {
            Some(v) => Some(Self(v & !(align - 1))),
            None => None,
        }
    }

    #[inline]
    #[must_use]
    pub const fn is_aligned(self, align: u64) -> bool {
        self.0 & (align - 1) == 0
    }

    #[inline]
    #[must_use]
    pub const fn checked_add(self, len: u64) -> Option<Self> {
        match self.0.checked_add(len) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Byte distance from `base` up to `self`; saturates at zero.
    #[inline]
    #[must_use]
    pub const fn offset_from(self, base: Self) -> u64 {
        self.0.saturating_sub(base.0)
    }
}

impl fmt::Debug for GuestAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GA(0x{:016X})", self.0)
    }
}

impl fmt::Display for GuestAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.0)
    }
}

impl From<u64> for GuestAddress {
    #[inline]
    fn from(v: u64) -> Self {
        Self::new(v)
    }
}

impl From<GuestAddress> for u64 {
    #[inline]
    fn from(a: GuestAddress) -> Self {
        a.as_u64()
    }
}

impl Add<u64> for GuestAddress {
    type Output = Self;
    #[inline]
    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl AddAssign<u64> for GuestAddress {
    #[inline]
    fn add_assign(&mut self, rhs: u64) {
        self.0 += rhs;
    }
}

impl Sub<u64> for GuestAddress {
    type Output = Self;
    #[inline]
    fn sub(self, rhs: u64) -> Self::Output {
        Self(self.0 - rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alignment_round_trips() {
        let a = GuestAddress::new(0x1_2345);
        assert_eq!(a.align_down(0x1000), GuestAddress::new(0x1_2000));
        assert_eq!(a.align_up(0x1000), Some(GuestAddress::new(0x1_3000)));
        assert_eq!(a.align_up(0x1_0000), Some(GuestAddress::new(0x2_0000)));
        assert!(GuestAddress::new(0x3_0000).is_aligned(0x1_0000));
        assert!(!a.is_aligned(0x1000));
    }

    #[test]
    fn align_up_reports_overflow() {
        assert_eq!(GuestAddress::new(u64::MAX).align_up(0x1000), None);
        assert_eq!(GuestAddress::new(u64::MAX).checked_add(1), None);
    }

    #[test]
    fn formatting() {
        let a = GuestAddress::new(0xDEAD_0000);
        assert_eq!(format!("{a}"), "0x00000000DEAD0000");
        assert_eq!(format!("{a:?}"), "GA(0x00000000DEAD0000)");
    }

    #[test]
    fn offsets_saturate() {
        let base = GuestAddress::new(0x1000);
        assert_eq!((base + 0x20).offset_from(base), 0x20);
        assert_eq!(base.offset_from(base + 0x20), 0);
    }
}
