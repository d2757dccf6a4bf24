//! Slow-path events land in the structured log and export as JSONL.

use zmem_alloc::{Allocator, IndexedHeader, SingleThreaded, SizeClassConfig};
use zmem_core::log;

#[test]
fn growth_and_teardown_export_as_json_lines() {
    // A distinctive unit makes this test's block size easy to find.
    let unit = 12_288;
    let cfg = SizeClassConfig::geometric(48, 2, 3).with_allocation_unit(unit);
    let a = Allocator::<IndexedHeader, SingleThreaded>::new(&cfg).expect("allocator");
    a.apply(1);
    let base_class = a.family().route(1).expect("route");
    assert_eq!(base_class, 0);

    let records = log::snapshot_records();
    let block = records
        .iter()
        .find(|r| r.symbol == "tracker" && r.event == "block_acquire" && r.size == Some(unit))
        .expect("block_acquire record");
    let line = block.to_jsonl();
    let value: serde_json::Value = serde_json::from_str(&line).expect("valid json");
    assert_eq!(value["level"], "debug");
    assert_eq!(value["symbol"], "tracker");
    assert_eq!(value["size"], unit);
    assert!(value["trace_id"].as_str().expect("trace id").starts_with("zmem::tracker::"));

    let grown = records.iter().any(|r| {
        r.symbol == "pool" && r.event == "extend_capacity" && r.class == Some(0)
            && r.size == Some(unit)
    });
    assert!(grown, "extend_capacity record for class 0");

    let report = a.shutdown();
    let torn_down = log::snapshot_records().into_iter().any(|r| {
        r.symbol == "tracker" && r.event == "teardown" && r.size == Some(report.bytes)
    });
    assert!(torn_down);
}
