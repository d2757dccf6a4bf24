//! # zmem-core
//!
//! Safe policy layer of the zmem pool allocator.
//!
//! - **Configuration** (`config`): class progression, block sizing, growth policy
//! - **Size classes** (`size_class`): class array plus O(1) bucket lookup table
//! - **Errors** (`error`): fatal fault kinds and configuration errors
//! - **Log** (`log`): structured lifecycle records for slow-path events
//! - **Stats** (`stats`): per-class snapshots and the teardown report table
//!
//! No `unsafe` code is permitted here; raw memory lives in `zmem-alloc`.

#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod log;
pub mod size_class;
pub mod stats;

pub use config::{MAX_LOOKUP_BUCKETS, PIECE_ALIGN, SizeClassConfig, growth_amount};
pub use error::{AllocatorFault, ConfigError};
pub use log::{AllocatorLogLevel, AllocatorLogRecord, LogEvent};
pub use size_class::SizeClassTable;
pub use stats::{IssueCounters, PoolStats, render_table};
