//! Structured allocator lifecycle log.
//!
//! Slow-path events (block acquisition, pool growth, teardown, fatal faults)
//! append an [`AllocatorLogRecord`] to a bounded process-wide ring. The
//! acquire/release fast paths never log. Records export as JSONL.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;

/// Maximum records retained before the oldest are dropped.
pub const LOG_CAPACITY: usize = 4096;

/// Allocator lifecycle log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AllocatorLogLevel {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
}

impl AllocatorLogLevel {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Trace,
            1 => Self::Debug,
            2 => Self::Info,
            3 => Self::Warn,
            _ => Self::Error,
        }
    }
}

/// Structured allocator lifecycle record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AllocatorLogRecord {
    /// Monotonic event id.
    pub decision_id: u64,
    /// Correlation id for this record.
    pub trace_id: String,
    /// Severity level.
    pub level: AllocatorLogLevel,
    /// Component that emitted the event (`tracker`, `pool`, `family`, `facade`).
    pub symbol: &'static str,
    /// Event kind (`block_acquire`, `extend_capacity`, `teardown`, ...).
    pub event: &'static str,
    /// Address involved in the event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ptr: Option<usize>,
    /// Size value involved in the event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,
    /// Size class involved in the event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class: Option<usize>,
    /// Machine-readable outcome label.
    pub outcome: &'static str,
    /// Free-form details for debugging.
    pub details: String,
}

impl AllocatorLogRecord {
    /// Renders the record as one JSON line.
    #[must_use]
    pub fn to_jsonl(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|err| {
            format!(
                "{{\"decision_id\":{},\"event\":\"{}\",\"encode_error\":\"{}\"}}",
                self.decision_id, self.event, err
            )
        })
    }
}

/// Borrowed description of an event, filled in by the caller.
#[derive(Debug, Clone, Copy)]
pub struct LogEvent<'a> {
    pub level: AllocatorLogLevel,
    pub symbol: &'static str,
    pub event: &'static str,
    pub ptr: Option<usize>,
    pub size: Option<usize>,
    pub class: Option<usize>,
    pub outcome: &'static str,
    pub details: &'a str,
}

impl<'a> LogEvent<'a> {
    /// Event with no pointer, size or class attached.
    #[must_use]
    pub const fn new(
        level: AllocatorLogLevel,
        symbol: &'static str,
        event: &'static str,
        outcome: &'static str,
    ) -> Self {
        Self {
            level,
            symbol,
            event,
            ptr: None,
            size: None,
            class: None,
            outcome,
            details: "",
        }
    }

    #[must_use]
    pub const fn ptr(mut self, ptr: usize) -> Self {
        self.ptr = Some(ptr);
        self
    }

    #[must_use]
    pub const fn size(mut self, size: usize) -> Self {
        self.size = Some(size);
        self
    }

    #[must_use]
    pub const fn class(mut self, class: usize) -> Self {
        self.class = Some(class);
        self
    }

    #[must_use]
    pub const fn details(mut self, details: &'a str) -> Self {
        self.details = details;
        self
    }
}

static NEXT_DECISION_ID: AtomicU64 = AtomicU64::new(1);
static MIN_LEVEL: AtomicU8 = AtomicU8::new(AllocatorLogLevel::Debug as u8);
static RING: Mutex<VecDeque<AllocatorLogRecord>> = Mutex::new(VecDeque::new());

/// Sets the lowest level that is retained.
pub fn set_min_level(level: AllocatorLogLevel) {
    MIN_LEVEL.store(level as u8, Ordering::Relaxed);
}

/// Lowest level currently retained.
#[must_use]
pub fn min_level() -> AllocatorLogLevel {
    AllocatorLogLevel::from_u8(MIN_LEVEL.load(Ordering::Relaxed))
}

/// Returns true if an event at `level` would be retained.
#[must_use]
pub fn enabled(level: AllocatorLogLevel) -> bool {
    level >= min_level()
}

/// Appends an event to the ring. Returns the assigned id, or `None` when
/// the level is filtered out.
pub fn record(event: LogEvent<'_>) -> Option<u64> {
    if !enabled(event.level) {
        return None;
    }
    let decision_id = NEXT_DECISION_ID.fetch_add(1, Ordering::Relaxed);
    let trace_id = format!("zmem::{}::{}::{:016x}", event.symbol, event.event, decision_id);
    let entry = AllocatorLogRecord {
        decision_id,
        trace_id,
        level: event.level,
        symbol: event.symbol,
        event: event.event,
        ptr: event.ptr,
        size: event.size,
        class: event.class,
        outcome: event.outcome,
        details: event.details.to_owned(),
    };

    let mut ring = RING.lock();
    if ring.len() == LOG_CAPACITY {
        ring.pop_front();
    }
    ring.push_back(entry);
    Some(decision_id)
}

/// Removes and returns every retained record, oldest first.
pub fn drain_records() -> Vec<AllocatorLogRecord> {
    RING.lock().drain(..).collect()
}

/// Copies every retained record, oldest first.
#[must_use]
pub fn snapshot_records() -> Vec<AllocatorLogRecord> {
    RING.lock().iter().cloned().collect()
}
