mod logger;

use host_info::{GuestAddress, SystemInfo};
use host_vmem::{ErrorKind, MemoryError, Mode, NativeProcess, ProcessMemory, Protection, SimulatedHost};
use log::{LevelFilter, error, info, warn};
use logger::StderrLogger;
use std::env;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
enum TraceError {
    #[error("usage: vmem-trace [--level <off|error|warn|info|debug|trace>] [--address <hex>] ({0})")]
    Usage(String),
    #[error(transparent)]
    Logger(#[from] log::SetLoggerError),
    #[error(transparent)]
    Memory(#[from] MemoryError),
    #[error("unexpected outcome: {0}")]
    Unexpected(&'static str),
}

struct Options {
    level: LevelFilter,
    address: GuestAddress,
}

fn parse_args() -> Result<Options, TraceError> {
    let mut options = Options {
        level: LevelFilter::Debug,
        address: GuestAddress::new(0x40_0000),
    };

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        let value = args
            .next()
            .ok_or_else(|| TraceError::Usage(format!("missing value for {arg}")))?;
        match arg.as_str() {
            "--level" => {
                options.level = value
                    .parse()
                    .map_err(|_| TraceError::Usage(format!("bad level {value}")))?;
            }
            "--address" => {
                let digits = value.trim_start_matches("0x");
                let raw = u64::from_str_radix(digits, 16)
                    .map_err(|_| TraceError::Usage(format!("bad address {value}")))?;
                options.address = GuestAddress::new(raw);
            }
            _ => return Err(TraceError::Usage(format!("unknown option {arg}"))),
        }
    }
    Ok(options)
}

/// Allocate three pages, write them, make the middle one read-only, try to
/// write it, then release everything.
fn protection_scenario(memory: &NativeProcess<SimulatedHost>, at: GuestAddress) -> Result<(), TraceError> {
    let page = memory.info().page_size();
    let length = 3 * page;

    memory.allocate_at(at, length, Protection::READ_WRITE)?;
    info!("allocated {at}+{length:#x}: {:?}", memory.sections());

    let pattern: Vec<u8> = (0..length).map(|i| u8::try_from(i % 251).unwrap_or(0)).collect();
    memory.write(at, &pattern)?;

    memory.protect(at + page, page, Protection::READ)?;
    match memory.write(at + page, &pattern[..16]) {
        Err(e) if e.kind() == ErrorKind::AccessDenied => info!("write to read-only page refused: {e}"),
        Err(e) => return Err(e.into()),
        Ok(_) => return Err(TraceError::Unexpected("read-only page accepted a write")),
    }

    let mut readback = vec![0_u8; pattern.len()];
    memory.read(at, &mut readback)?;
    if readback != pattern {
        return Err(TraceError::Unexpected("read back differs from what was written"));
    }
    info!("read back {} bytes intact", readback.len());

    memory.release(at, length)?;
    if !memory.sections().is_empty() {
        return Err(TraceError::Unexpected("section survived a full release"));
    }
    match memory.read(at, &mut readback[..1]) {
        Err(MemoryError::AddressNotReserved(_)) => info!("released range is gone"),
        _ => return Err(TraceError::Unexpected("released range is still readable")),
    }
    Ok(())
}

/// Copy-on-write fork: both sides keep their own writes.
fn fork_scenario(
    host: &Arc<SimulatedHost>,
    memory: &NativeProcess<SimulatedHost>,
    at: GuestAddress,
) -> Result<(), TraceError> {
    let page = memory.info().page_size();
    memory.allocate_at(at, page, Protection::READ_WRITE)?;
    memory.write(at, b"parent")?;

    let child = memory.clone_into(host.create_process(), Mode::CopyOnWrite)?;
    child.write(at, b"child!")?;

    let mut parent_view = [0_u8; 6];
    let mut child_view = [0_u8; 6];
    memory.read(at, &mut parent_view)?;
    child.read(at, &mut child_view)?;
    info!(
        "after fork: parent sees {:?}, child sees {:?}",
        String::from_utf8_lossy(&parent_view),
        String::from_utf8_lossy(&child_view)
    );
    if &parent_view != b"parent" || &child_view != b"child!" {
        return Err(TraceError::Unexpected("copy-on-write pages leaked between processes"));
    }

    drop(child);
    memory.release(at, page)?;
    Ok(())
}

fn run() -> Result<(), TraceError> {
    let options = parse_args()?;
    StderrLogger::new(options.level).init()?;

    let info = Arc::new(SystemInfo::default());
    let host = Arc::new(SimulatedHost::new(Arc::clone(&info)));
    let memory = NativeProcess::new(Arc::clone(&host), info, host.create_process());

    protection_scenario(&memory, options.address)?;
    fork_scenario(&host, &memory, options.address)?;

    if host.open_handles() != 0 {
        warn!("{} section handle(s) still open", host.open_handles());
    }
    info!("done");
    Ok(())
}

fn main() -> std::process::ExitCode {
    match run() {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            eprintln!("vmem-trace: {e}");
            std::process::ExitCode::FAILURE
        }
    }
}
