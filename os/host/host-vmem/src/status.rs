/// Status code returned by a failed native call.
#[derive(Copy, Clone, PartialEq, Eq, Hash, thiserror::Error)]
#[error("{} (0x{:08X})", name_of(.0), .0)]
pub struct NativeStatus(u32);

impl NativeStatus {
    pub const PARTIAL_COPY: Self = Self(0x8000_000D);
    pub const ACCESS_VIOLATION: Self = Self(0xC000_0005);
    pub const INVALID_HANDLE: Self = Self(0xC000_0008);
    pub const INVALID_PARAMETER: Self = Self(0xC000_000D);
    pub const NO_MEMORY: Self = Self(0xC000_0017);
    pub const CONFLICTING_ADDRESSES: Self = Self(0xC000_0018);
    pub const NOT_MAPPED_VIEW: Self = Self(0xC000_0019);
    pub const ACCESS_DENIED: Self = Self(0xC000_0022);
    pub const NOT_LOCKED: Self = Self(0xC000_002A);
    pub const SECTION_PROTECTION: Self = Self(0xC000_004E);
    pub const COMMITMENT_LIMIT: Self = Self(0xC000_012D);

    #[inline]
    #[must_use]
    pub const fn new(code: u32) -> Self {
        Self(code)
    }

    #[inline]
    #[must_use]
    pub const fn code(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        name_of(&self.0)
    }
}

const fn name_of(code: &u32) -> &'static str {
    match *code {
        0x8000_000D => "STATUS_PARTIAL_COPY",
        0xC000_0005 => "STATUS_ACCESS_VIOLATION",
        0xC000_0008 => "STATUS_INVALID_HANDLE",
        0xC000_000D => "STATUS_INVALID_PARAMETER",
        0xC000_0017 => "STATUS_NO_MEMORY",
        0xC000_0018 => "STATUS_CONFLICTING_ADDRESSES",
        0xC000_0019 => "STATUS_NOT_MAPPED_VIEW",
        0xC000_0022 => "STATUS_ACCESS_DENIED",
        0xC000_002A => "STATUS_NOT_LOCKED",
        0xC000_004E => "STATUS_SECTION_PROTECTION",
        0xC000_012D => "STATUS_COMMITMENT_LIMIT",
        _ => "STATUS_UNKNOWN",
    }
}

impl core::fmt::Debug for NativeStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "NativeStatus({}, 0x{:08X})", self.name(), self.0)
    }
}

impl From<u32> for NativeStatus {
    #[inline]
    fn from(code: u32) -> Self {
        Self::new(code)
    }
}
