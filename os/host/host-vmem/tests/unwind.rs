use host_info::{GuestAddress, SystemInfo};
use host_vmem::{
    ENOMEM, MemoryError, Mode, NativeApi, NativeOp, NativeProcess, NativeStatus, ProcessMemory, Protection,
    SimulatedHost,
};
use std::sync::Arc;

const PAGE: u64 = 0x1000;
const GRANULARITY: u64 = 0x1_0000;
const X: GuestAddress = GuestAddress::new(0x40_0000);

fn setup() -> (Arc<SimulatedHost>, NativeProcess<SimulatedHost>) {
    let info = Arc::new(SystemInfo::default());
    let host = Arc::new(SimulatedHost::new(Arc::clone(&info)));
    let memory = NativeProcess::new(Arc::clone(&host), info, host.create_process());
    (host, memory)
}

#[test]
fn failed_section_creation_leaves_nothing() {
    let (host, memory) = setup();
    host.fail_next(NativeOp::CreateSection, NativeStatus::COMMITMENT_LIMIT);

    let err = memory
        .allocate_at(X, PAGE, Protection::READ_WRITE)
        .unwrap_err();
    assert_eq!(err, MemoryError::OutOfMemory(NativeStatus::COMMITMENT_LIMIT));
    assert_eq!(err.errno(), ENOMEM);
    assert_eq!(err.status(), Some(NativeStatus::COMMITMENT_LIMIT));
    assert!(memory.sections().is_empty());
    assert_eq!(host.open_handles(), 0);
}

#[test]
fn commit_limit_surfaces_as_out_of_memory() {
    let info = Arc::new(SystemInfo::default());
    let host = Arc::new(SimulatedHost::new(Arc::clone(&info)).with_commit_limit(2 * GRANULARITY));
    let memory = NativeProcess::new(Arc::clone(&host), info, host.create_process());

    memory.allocate_at(X, 2 * GRANULARITY, Protection::READ).unwrap();
    assert_eq!(
        memory.allocate(PAGE, Protection::READ, host_vmem::MapFlags::empty()),
        Err(MemoryError::OutOfMemory(NativeStatus::COMMITMENT_LIMIT))
    );
}

#[test]
fn failed_allocation_discards_new_fillers() {
    let (host, memory) = setup();
    // the section's own NOACCESS protect succeeds, the allocation's fails
    host.fail_nth(NativeOp::Protect, 1, NativeStatus::ACCESS_DENIED);

    let err = memory
        .allocate_at(X, PAGE, Protection::READ_WRITE)
        .unwrap_err();
    assert_eq!(err, MemoryError::AccessDenied(NativeStatus::ACCESS_DENIED));
    assert!(memory.sections().is_empty());
    assert_eq!(host.view_count(memory.process()), 0);
}

#[test]
fn failed_fill_keeps_existing_sections() {
    let (host, memory) = setup();
    memory.reserve_at(X + GRANULARITY, GRANULARITY).unwrap();
    host.fail_nth(NativeOp::MapView, 1, NativeStatus::NO_MEMORY);

    let err = memory
        .allocate_at(X, 3 * GRANULARITY, Protection::READ_WRITE)
        .unwrap_err();
    assert_eq!(err, MemoryError::OutOfMemory(NativeStatus::NO_MEMORY));

    let sections = memory.sections();
    assert_eq!(sections.len(), 1);
    assert_eq!(sections[0].base, X + GRANULARITY);
    assert_eq!(sections[0].allocated_pages, 0);
    assert_eq!(host.view_count(memory.process()), 1);
}

#[test]
fn multi_section_failures_are_not_rolled_back() {
    let (host, memory) = setup();
    memory.reserve_at(X, GRANULARITY).unwrap();
    memory.reserve_at(X + GRANULARITY, GRANULARITY).unwrap();
    host.fail_nth(NativeOp::Protect, 1, NativeStatus::ACCESS_DENIED);

    let err = memory
        .allocate_at(X + GRANULARITY - PAGE, 2 * PAGE, Protection::READ_WRITE)
        .unwrap_err();
    assert_eq!(err, MemoryError::AccessDenied(NativeStatus::ACCESS_DENIED));

    // the first chunk stays allocated
    let sections = memory.sections();
    assert_eq!(sections[0].allocated_pages, 1);
    assert_eq!(sections[1].allocated_pages, 0);
    memory.write(X + GRANULARITY - PAGE, b"ok").unwrap();
}

#[test]
fn failed_map_unmaps_earlier_views() {
    let (host, memory) = setup();
    let local = host.current_process();
    memory.reserve_at(X, GRANULARITY).unwrap();
    memory
        .allocate_at(X + GRANULARITY - PAGE, 2 * PAGE, Protection::READ_WRITE)
        .unwrap();
    host.fail_nth(NativeOp::MapView, 1, NativeStatus::CONFLICTING_ADDRESSES);

    let err = memory
        .map(X + GRANULARITY - PAGE, 2 * PAGE, Protection::READ)
        .unwrap_err();
    assert_eq!(err, MemoryError::AccessDenied(NativeStatus::CONFLICTING_ADDRESSES));
    assert_eq!(host.view_count(local), 0);
    assert_eq!(memory.local_mappings(), 0);
}

#[test]
fn best_effort_cleanup_never_fails_a_release() {
    let (host, memory) = setup();
    memory.allocate_at(X, PAGE, Protection::READ_WRITE).unwrap();
    host.fail_next(NativeOp::Reset, NativeStatus::INVALID_PARAMETER);
    host.fail_next(NativeOp::Unlock, NativeStatus::ACCESS_DENIED);

    memory.release(X, PAGE).unwrap();
    assert!(memory.sections().is_empty());
}

#[test]
fn failed_release_still_collects_empty_sections() {
    let (host, memory) = setup();
    memory.allocate_at(X, PAGE, Protection::READ_WRITE).unwrap();
    memory.allocate_at(X + GRANULARITY, PAGE, Protection::READ_WRITE).unwrap();
    host.fail_nth(NativeOp::Protect, 1, NativeStatus::ACCESS_DENIED);

    let err = memory.release(X, GRANULARITY + PAGE).unwrap_err();
    assert_eq!(err, MemoryError::AccessDenied(NativeStatus::ACCESS_DENIED));

    let sections = memory.sections();
    assert_eq!(sections.len(), 1);
    assert_eq!(sections[0].base, X + GRANULARITY);
}

#[test]
fn failed_duplicate_leaves_target_empty() {
    let (host, parent) = setup();
    parent.allocate_at(X, PAGE, Protection::READ_WRITE).unwrap();
    parent.allocate_at(X + GRANULARITY, PAGE, Protection::READ_WRITE).unwrap();
    let target = host.create_process();
    host.fail_nth(NativeOp::CreateSection, 1, NativeStatus::NO_MEMORY);

    let err = parent.duplicate_into(target).err();
    assert_eq!(err, Some(MemoryError::OutOfMemory(NativeStatus::NO_MEMORY)));
    assert_eq!(host.view_count(target), 0);
    assert_eq!(host.view_count(host.current_process()), 0);
    assert_eq!(host.open_handles(), 2);
}

#[test]
fn failed_clone_leaves_target_empty() {
    let (host, parent) = setup();
    parent.allocate_at(X, PAGE, Protection::READ_WRITE).unwrap();
    let target = host.create_process();
    host.fail_next(NativeOp::DuplicateSection, NativeStatus::ACCESS_DENIED);

    let err = parent.clone_into(target, Mode::Shared).err();
    assert_eq!(err, Some(MemoryError::AccessDenied(NativeStatus::ACCESS_DENIED)));
    assert_eq!(host.view_count(target), 0);
    assert_eq!(host.open_handles(), 1);
}
