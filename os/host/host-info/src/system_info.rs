use crate::GuestAddress;

/// Read-only host memory configuration.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct SystemInfo {
    page_size: u64,
    allocation_granularity: u64,
    minimum_address: GuestAddress,
    maximum_address: GuestAddress,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum SystemInfoError {
    #[error("{name} {value:#x} is not a non-zero power of two")]
    NotPowerOfTwo { name: &'static str, value: u64 },
    #[error("allocation granularity {granularity:#x} is smaller than the page size {page_size:#x}")]
    GranularityBelowPageSize { page_size: u64, granularity: u64 },
    #[error("application address range {minimum}..={maximum} is empty or unaligned")]
    InvalidAddressRange {
        minimum: GuestAddress,
        maximum: GuestAddress,
    },
}

/// x86-64 host defaults.
const DEFAULT_PAGE_SIZE: u64 = 0x1000;
const DEFAULT_GRANULARITY: u64 = 0x1_0000;
const DEFAULT_MINIMUM_ADDRESS: u64 = 0x1_0000;
const DEFAULT_MAXIMUM_ADDRESS: u64 = 0x7FFF_FFFE_FFFF;

impl Default for SystemInfo {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            allocation_granularity: DEFAULT_GRANULARITY,
            minimum_address: GuestAddress::new(DEFAULT_MINIMUM_ADDRESS),
            maximum_address: GuestAddress::new(DEFAULT_MAXIMUM_ADDRESS),
        }
    }
}

impl SystemInfo {
    /// Build a configuration with the default application address bounds.
    ///
    /// # Errors
    /// Either size is zero or not a power of two, or the granularity is
    /// smaller than the page size.
    pub fn new(page_size: u64, allocation_granularity: u64) -> Result<Self, SystemInfoError> {
        if !page_size.is_power_of_two() {
            return Err(SystemInfoError::NotPowerOfTwo {
                name: "page size",
                value: page_size,
            });
        }
        if !allocation_granularity.is_power_of_two() {
            return Err(SystemInfoError::NotPowerOfTwo {
                name: "allocation granularity",
                value: allocation_granularity,
            });
        }
        if allocation_granularity < page_size {
            return Err(SystemInfoError::GranularityBelowPageSize {
                page_size,
                granularity: allocation_granularity,
            });
        }

        let defaults = Self::default();
        Self {
            page_size,
            allocation_granularity,
            ..defaults
        }
        .with_address_bounds(
            GuestAddress::new(allocation_granularity.max(DEFAULT_MINIMUM_ADDRESS)),
            defaults.maximum_address,
        )
    }

    /// Replace the lowest and highest addresses available to applications.
    ///
    /// `minimum` must be granularity aligned and `maximum` must end a page.
    ///
    /// # Errors
    /// [`SystemInfoError::InvalidAddressRange`] if the bounds are inverted or misaligned.
    pub fn with_address_bounds(
        self,
        minimum: GuestAddress,
        maximum: GuestAddress,
    ) -> Result<Self, SystemInfoError> {
        let end_aligned = maximum
            .checked_add(1)
            .is_some_and(|end| end.is_aligned(self.page_size));
        if minimum.is_null()
            || minimum >= maximum
            || !minimum.is_aligned(self.allocation_granularity)
            || !end_aligned
        {
            return Err(SystemInfoError::InvalidAddressRange { minimum, maximum });
        }
        Ok(Self {
            minimum_address: minimum,
            maximum_address: maximum,
            ..self
        })
    }

    #[inline]
    #[must_use]
    pub const fn page_size(&self) -> u64 {
        self.page_size
    }

    #[inline]
    #[must_use]
    pub const fn allocation_granularity(&self) -> u64 {
        self.allocation_granularity
    }

    /// Lowest address a section may be placed at.
    #[inline]
    #[must_use]
    pub const fn minimum_address(&self) -> GuestAddress {
        self.minimum_address
    }

    /// Highest addressable byte (inclusive).
    #[inline]
    #[must_use]
    pub const fn maximum_address(&self) -> GuestAddress {
        self.maximum_address
    }

    /// Number of pages needed to hold `length` bytes.
    #[inline]
    #[must_use]
    pub const fn pages_in(&self, length: u64) -> u64 {
        length.div_ceil(self.page_size)
    }

    #[inline]
    #[must_use]
    pub const fn page_floor(&self, va: GuestAddress) -> GuestAddress {
        va.align_down(self.page_size)
    }

    #[inline]
    #[must_use]
    pub const fn page_ceil(&self, va: GuestAddress) -> Option<GuestAddress> {
        va.align_up(self.page_size)
    }

    #[inline]
    #[must_use]
    pub const fn granularity_floor(&self, va: GuestAddress) -> GuestAddress {
        va.align_down(self.allocation_granularity)
    }

    #[inline]
    #[must_use]
    pub const fn granularity_ceil(&self, va: GuestAddress) -> Option<GuestAddress> {
        va.align_up(self.allocation_granularity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_x86_64_host() {
        let info = SystemInfo::default();
        assert_eq!(info.page_size(), 4096);
        assert_eq!(info.allocation_granularity(), 65536);
        assert_eq!(info.minimum_address(), GuestAddress::new(0x1_0000));
        assert_eq!(info.maximum_address(), GuestAddress::new(0x7FFF_FFFE_FFFF));
    }

    #[test]
    fn rejects_bad_sizes() {
        assert!(matches!(
            SystemInfo::new(3000, 65536),
            Err(SystemInfoError::NotPowerOfTwo { .. })
        ));
        assert!(matches!(
            SystemInfo::new(4096, 0),
            Err(SystemInfoError::NotPowerOfTwo { .. })
        ));
        assert!(matches!(
            SystemInfo::new(65536, 4096),
            Err(SystemInfoError::GranularityBelowPageSize { .. })
        ));
    }

    #[test]
    fn equal_page_and_granularity_is_fine() {
        let info = SystemInfo::new(4096, 4096).unwrap();
        assert_eq!(info.granularity_ceil(GuestAddress::new(1)), Some(GuestAddress::new(4096)));
    }

    #[test]
    fn address_bounds_are_validated() {
        let info = SystemInfo::default();
        assert!(info
            .with_address_bounds(GuestAddress::new(0x2_0000), GuestAddress::new(0xFFFF_FFFF))
            .is_ok());
        assert!(info
            .with_address_bounds(GuestAddress::new(0x2_1000), GuestAddress::new(0xFFFF_FFFF))
            .is_err());
        assert!(info
            .with_address_bounds(GuestAddress::new(0x2_0000), GuestAddress::new(0x1_0000))
            .is_err());
        assert!(info
            .with_address_bounds(GuestAddress::zero(), GuestAddress::new(0xFFFF_FFFF))
            .is_err());
    }

    #[test]
    fn page_math() {
        let info = SystemInfo::default();
        assert_eq!(info.pages_in(0), 0);
        assert_eq!(info.pages_in(1), 1);
        assert_eq!(info.pages_in(4096), 1);
        assert_eq!(info.pages_in(4097), 2);
        assert_eq!(info.page_floor(GuestAddress::new(0x1FFF)), GuestAddress::new(0x1000));
    }
}
