//! Guest and host page protections.
//!
//! The guest speaks Linux `PROT_*` bits ([`Protection`]); the host speaks a
//! one-hot protection word ([`HostProtection`]) with optional modifiers.
//! Sections additionally carry a sharing [`Mode`] that decides whether
//! writable pages are mapped read-write or write-copy; that decision lives in
//! [`adjust_protection_for_mode`] and nowhere else.

use bitfield_struct::bitfield;
use core::fmt;

bitflags::bitflags! {
    /// Guest page protection, bit compatible with Linux `PROT_*`.
    #[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
    pub struct Protection: u32 {
        /// `PROT_READ`
        const READ = 0x01;
        /// `PROT_WRITE`; implies read on the host.
        const WRITE = 0x02;
        /// `PROT_EXEC`
        const EXEC = 0x04;
        /// `PROT_SEM`; accepted and ignored.
        const SEM = 0x08;
        /// Guard page: the first touch faults. Not a Linux bit.
        const GUARD = 0x80;
    }
}

impl Protection {
    pub const NONE: Self = Self::empty();
    pub const READ_WRITE: Self = Self::READ.union(Self::WRITE);

    /// Host protection word for this guest protection.
    #[must_use]
    pub const fn to_host(self) -> HostProtection {
        let exec = self.contains(Self::EXEC);
        let read = self.contains(Self::READ);
        let write = self.contains(Self::WRITE);
        let base = match (exec, read, write) {
            (false, false, false) => HostProtection::NO_ACCESS,
            (false, true, false) => HostProtection::READ_ONLY,
            (false, _, true) => HostProtection::READ_WRITE,
            (true, false, false) => HostProtection::EXECUTE,
            (true, true, false) => HostProtection::EXECUTE_READ,
            (true, _, true) => HostProtection::EXECUTE_READ_WRITE,
        };
        base.with_guard(self.contains(Self::GUARD))
    }
}

impl From<Protection> for HostProtection {
    #[inline]
    fn from(value: Protection) -> Self {
        value.to_host()
    }
}

/// Host page protection word.
///
/// Exactly one of the low eight bits selects the access; `guard`,
/// `no_cache` and `write_combine` modify it.
///
/// ```text
///   bit 0  NOACCESS            bit 4  EXECUTE
///   bit 1  READONLY            bit 5  EXECUTE_READ
///   bit 2  READWRITE           bit 6  EXECUTE_READWRITE
///   bit 3  WRITECOPY           bit 7  EXECUTE_WRITECOPY
///   bit 8  GUARD   bit 9  NOCACHE   bit 10  WRITECOMBINE
/// ```
#[bitfield(u32)]
#[derive(PartialEq, Eq, Hash)]
pub struct HostProtection {
    pub no_access: bool,
    pub read_only: bool,
    pub read_write: bool,
    pub write_copy: bool,
    pub execute: bool,
    pub execute_read: bool,
    pub execute_read_write: bool,
    pub execute_write_copy: bool,
    /// First access raises a guard-page exception.
    pub guard: bool,
    pub no_cache: bool,
    pub write_combine: bool,
    #[bits(21)]
    __: u32,
}

const ACCESS_MASK: u32 = 0xFF;

impl HostProtection {
    pub const NO_ACCESS: Self = Self::new().with_no_access(true);
    pub const READ_ONLY: Self = Self::new().with_read_only(true);
    pub const READ_WRITE: Self = Self::new().with_read_write(true);
    pub const WRITE_COPY: Self = Self::new().with_write_copy(true);
    pub const EXECUTE: Self = Self::new().with_execute(true);
    pub const EXECUTE_READ: Self = Self::new().with_execute_read(true);
    pub const EXECUTE_READ_WRITE: Self = Self::new().with_execute_read_write(true);
    pub const EXECUTE_WRITE_COPY: Self = Self::new().with_execute_write_copy(true);

    /// The access selector without modifiers.
    #[inline]
    #[must_use]
    pub const fn access(self) -> Self {
        Self::from_bits(self.into_bits() & ACCESS_MASK)
    }

    /// Replace the access selector, keeping modifiers.
    #[inline]
    #[must_use]
    pub const fn with_access(self, access: Self) -> Self {
        Self::from_bits((self.into_bits() & !ACCESS_MASK) | (access.into_bits() & ACCESS_MASK))
    }

    /// Exactly one access bit is set and `guard` is not combined with `NOACCESS`.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.access().into_bits().count_ones() == 1 && !(self.guard() && self.no_access())
    }

    #[inline]
    #[must_use]
    pub const fn is_readable(self) -> bool {
        self.read_only()
            || self.read_write()
            || self.write_copy()
            || self.execute_read()
            || self.execute_read_write()
            || self.execute_write_copy()
    }

    /// Writes land directly or through a private copy.
    #[inline]
    #[must_use]
    pub const fn is_writable(self) -> bool {
        self.read_write() || self.write_copy() || self.execute_read_write() || self.execute_write_copy()
    }

    #[inline]
    #[must_use]
    pub const fn is_write_copy(self) -> bool {
        self.write_copy() || self.execute_write_copy()
    }

    #[inline]
    #[must_use]
    pub const fn is_executable(self) -> bool {
        self.execute() || self.execute_read() || self.execute_read_write() || self.execute_write_copy()
    }

    const fn access_name(self) -> &'static str {
        match self.access().into_bits() {
            0x01 => "NOACCESS",
            0x02 => "READONLY",
            0x04 => "READWRITE",
            0x08 => "WRITECOPY",
            0x10 => "EXECUTE",
            0x20 => "EXECUTE_READ",
            0x40 => "EXECUTE_READWRITE",
            0x80 => "EXECUTE_WRITECOPY",
            _ => "INVALID",
        }
    }
}

impl fmt::Display for HostProtection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.access_name())?;
        if self.guard() {
            f.write_str("|GUARD")?;
        }
        if self.no_cache() {
            f.write_str("|NOCACHE")?;
        }
        if self.write_combine() {
            f.write_str("|WRITECOMBINE")?;
        }
        Ok(())
    }
}

/// How a section's pages relate to other mappings of the same backing object.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Only this process maps the section.
    Private,
    /// Other processes map the same pages and observe each other's writes.
    Shared,
    /// Pages are shared until written; a write produces a private copy.
    CopyOnWrite,
}

/// Adjust a protection for a section mode.
///
/// Copy-on-write sections turn read-write into write-copy; private and shared
/// sections turn write-copy back into read-write. Modifiers are kept and every
/// other access is returned unchanged.
#[must_use]
pub const fn adjust_protection_for_mode(protection: HostProtection, mode: Mode) -> HostProtection {
    let access = protection.access().into_bits();
    let adjusted = match mode {
        Mode::CopyOnWrite if access == HostProtection::READ_WRITE.into_bits() => HostProtection::WRITE_COPY,
        Mode::CopyOnWrite if access == HostProtection::EXECUTE_READ_WRITE.into_bits() => {
            HostProtection::EXECUTE_WRITE_COPY
        }
        Mode::Private | Mode::Shared if access == HostProtection::WRITE_COPY.into_bits() => HostProtection::READ_WRITE,
        Mode::Private | Mode::Shared if access == HostProtection::EXECUTE_WRITE_COPY.into_bits() => {
            HostProtection::EXECUTE_READ_WRITE
        }
        _ => return protection,
    };
    protection.with_access(adjusted)
}
