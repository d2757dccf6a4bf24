//! Per-class pool snapshots and the teardown report table.

use std::fmt::Write as _;

use serde::Serialize;

/// Issue counters kept when instrumentation is compiled in.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IssueCounters {
    /// Pieces currently held by callers.
    pub issued_now: u64,
    /// Pieces ever handed out.
    pub issued_total: u64,
    /// Highest value `issued_now` has reached.
    pub issued_peak: u64,
}

impl IssueCounters {
    /// Accounts for one piece leaving the free list.
    pub fn on_issue(&mut self) {
        self.issued_now += 1;
        self.issued_total += 1;
        if self.issued_now > self.issued_peak {
            self.issued_peak = self.issued_now;
        }
    }

    /// Accounts for one piece returning to the free list.
    pub fn on_return(&mut self) {
        self.issued_now = self.issued_now.saturating_sub(1);
    }
}

/// Point-in-time view of one size-class pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub class: usize,
    pub piece_size: usize,
    pub usable_size: usize,
    /// Pieces carved so far.
    pub capacity: usize,
    /// `None` when instrumentation is compiled out.
    pub counters: Option<IssueCounters>,
}

/// Renders snapshots as a fixed-width table, one row per class.
#[must_use]
pub fn render_table(stats: &[PoolStats]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:>5} {:>10} {:>10} {:>10} {:>10} {:>12} {:>10}",
        "class", "piece", "usable", "capacity", "issued", "total", "peak"
    );
    for s in stats {
        let (now, total, peak) = match s.counters {
            Some(c) => (
                c.issued_now.to_string(),
                c.issued_total.to_string(),
                c.issued_peak.to_string(),
            ),
            None => ("-".to_owned(), "-".to_owned(), "-".to_owned()),
        };
        let _ = writeln!(
            out,
            "{:>5} {:>10} {:>10} {:>10} {:>10} {:>12} {:>10}",
            s.class, s.piece_size, s.usable_size, s.capacity, now, total, peak
        );
    }
    out
}
