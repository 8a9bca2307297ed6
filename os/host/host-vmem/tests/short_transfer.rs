use host_info::{GuestAddress, SystemInfo};
use host_vmem::{
    HostProtection, MapFlags, MappedView, MemoryError, NativeApi, NativeProcess, NativeStatus, ProcessHandle,
    ProcessMemory, Protection, RegionInfo, SectionAccess, SectionHandle, SimulatedHost,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

const PAGE: u64 = 0x1000;
const GRANULARITY: u64 = 0x1_0000;
const X: GuestAddress = GuestAddress::new(0x40_0000);

/// Simulated host whose next read or write may stop one byte short.
struct ShortHost {
    inner: SimulatedHost,
    short_read: AtomicBool,
    short_write: AtomicBool,
}

impl ShortHost {
    fn new(info: Arc<SystemInfo>) -> Self {
        Self {
            inner: SimulatedHost::new(info),
            short_read: AtomicBool::new(false),
            short_write: AtomicBool::new(false),
        }
    }
}

impl NativeApi for ShortHost {
    fn current_process(&self) -> ProcessHandle {
        self.inner.current_process()
    }

    fn create_section(&self, length: u64, max_protection: HostProtection) -> Result<SectionHandle, NativeStatus> {
        self.inner.create_section(length, max_protection)
    }

    fn duplicate_section(&self, section: SectionHandle, access: SectionAccess) -> Result<SectionHandle, NativeStatus> {
        self.inner.duplicate_section(section, access)
    }

    fn close_section(&self, section: SectionHandle) -> Result<(), NativeStatus> {
        self.inner.close_section(section)
    }

    fn map_view(
        &self,
        section: SectionHandle,
        process: ProcessHandle,
        address: Option<GuestAddress>,
        protection: HostProtection,
        flags: MapFlags,
    ) -> Result<MappedView, NativeStatus> {
        self.inner.map_view(section, process, address, protection, flags)
    }

    fn unmap_view(&self, process: ProcessHandle, address: GuestAddress) -> Result<(), NativeStatus> {
        self.inner.unmap_view(process, address)
    }

    fn protect(
        &self,
        process: ProcessHandle,
        address: GuestAddress,
        length: u64,
        protection: HostProtection,
    ) -> Result<HostProtection, NativeStatus> {
        self.inner.protect(process, address, length, protection)
    }

    fn read(&self, process: ProcessHandle, address: GuestAddress, buffer: &mut [u8]) -> Result<usize, NativeStatus> {
        let len = buffer.len();
        if len > 1 && self.short_read.swap(false, Ordering::SeqCst) {
            return self.inner.read(process, address, &mut buffer[..len - 1]);
        }
        self.inner.read(process, address, buffer)
    }

    fn write(&self, process: ProcessHandle, address: GuestAddress, data: &[u8]) -> Result<usize, NativeStatus> {
        if data.len() > 1 && self.short_write.swap(false, Ordering::SeqCst) {
            return self.inner.write(process, address, &data[..data.len() - 1]);
        }
        self.inner.write(process, address, data)
    }

    fn query(&self, process: ProcessHandle, address: GuestAddress) -> Result<RegionInfo, NativeStatus> {
        self.inner.query(process, address)
    }

    fn reset(&self, process: ProcessHandle, address: GuestAddress, length: u64) -> Result<(), NativeStatus> {
        self.inner.reset(process, address, length)
    }

    fn lock(&self, process: ProcessHandle, address: GuestAddress, length: u64) -> Result<(), NativeStatus> {
        self.inner.lock(process, address, length)
    }

    fn unlock(&self, process: ProcessHandle, address: GuestAddress, length: u64) -> Result<(), NativeStatus> {
        self.inner.unlock(process, address, length)
    }
}

/// Two allocated pages straddling a section boundary, filled with a pattern.
fn setup() -> (Arc<ShortHost>, NativeProcess<ShortHost>, GuestAddress, Vec<u8>) {
    let info = Arc::new(SystemInfo::default());
    let host = Arc::new(ShortHost::new(Arc::clone(&info)));
    let memory = NativeProcess::new(Arc::clone(&host), info, host.inner.create_process());

    memory.reserve_at(X, GRANULARITY).unwrap();
    let at = X + GRANULARITY - PAGE;
    memory.allocate_at(at, 2 * PAGE, Protection::READ_WRITE).unwrap();
    assert_eq!(memory.sections().len(), 2);

    let pattern: Vec<u8> = (0..2 * PAGE).map(|i| (i % 251) as u8).collect();
    memory.write(at, &pattern).unwrap();
    (host, memory, at, pattern)
}

#[test]
fn short_read_in_one_section_fails_the_read() {
    let (host, memory, at, pattern) = setup();
    host.short_read.store(true, Ordering::SeqCst);

    let mut buf = vec![0_u8; pattern.len()];
    assert_eq!(
        memory.read(at, &mut buf),
        Err(MemoryError::AccessDenied(NativeStatus::PARTIAL_COPY))
    );

    buf.fill(0);
    assert_eq!(memory.read(at, &mut buf), Ok(pattern.len()));
    assert_eq!(buf[PAGE as usize], pattern[PAGE as usize]);
    assert_eq!(buf, pattern);
}

#[test]
fn short_write_in_one_section_fails_the_write() {
    let (host, memory, at, pattern) = setup();
    let update: Vec<u8> = pattern.iter().map(|b| b.wrapping_add(1)).collect();
    host.short_write.store(true, Ordering::SeqCst);

    assert_eq!(
        memory.write(at, &update),
        Err(MemoryError::AccessDenied(NativeStatus::PARTIAL_COPY))
    );

    assert_eq!(memory.write(at, &update), Ok(update.len()));
    let mut back = vec![0_u8; update.len()];
    memory.read(at, &mut back).unwrap();
    assert_eq!(back, update);
}

#[test]
fn chunks_land_at_their_offset_in_the_buffer() {
    let (_host, memory, at, pattern) = setup();

    // start mid-page so the first chunk is shorter than a page
    let from = at + 0x10;
    let mut buf = vec![0_u8; pattern.len() - 0x10];
    assert_eq!(memory.read(from, &mut buf), Ok(buf.len()));
    assert_eq!(buf, pattern[0x10..]);
}
