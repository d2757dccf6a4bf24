//! Family teardown renders its table only when something will read it.

use zmem_alloc::{BlockTracker, OwnerHeader, SingleThreaded, SizeClassConfig, SizeClassFamily};
use zmem_core::AllocatorLogLevel;
use zmem_core::log;

fn family_teardowns(classes: usize) -> usize {
    log::snapshot_records()
        .iter()
        .filter(|r| r.symbol == "family" && r.event == "teardown" && r.size == Some(classes))
        .count()
}

#[test]
fn teardown_record_follows_log_threshold() {
    let tracker = BlockTracker::<SingleThreaded>::new();

    // Debug is the default threshold: the table is rendered into details.
    let cfg = SizeClassConfig::geometric(32, 2, 7);
    drop(SizeClassFamily::<OwnerHeader, _>::new(&cfg, &tracker).expect("family"));
    let record = log::snapshot_records()
        .into_iter()
        .rev()
        .find(|r| r.symbol == "family" && r.event == "teardown" && r.size == Some(7))
        .expect("teardown record");
    assert!(record.details.contains("capacity"));
    assert_eq!(record.details.lines().count(), 8);

    // Above Debug nothing is recorded.
    log::set_min_level(AllocatorLogLevel::Info);
    let cfg = SizeClassConfig::geometric(32, 2, 5);
    drop(SizeClassFamily::<OwnerHeader, _>::new(&cfg, &tracker).expect("family"));
    log::set_min_level(AllocatorLogLevel::Debug);
    assert_eq!(family_teardowns(5), 0);
}
