//! Fault and configuration error types.
//!
//! The public allocator surface has no error channel: every [`AllocatorFault`]
//! that reaches it terminates the process. The types exist so the inner
//! layers can propagate with `?` and so the fatal conditions can be observed
//! in tests through the `try_*` entry points.

use thiserror::Error;

/// Conditions the allocator cannot recover from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocatorFault {
    /// The system allocator returned null for a block request.
    #[error("system allocator exhausted while requesting {bytes} bytes")]
    OsExhausted { bytes: usize },
    /// A block size could not be expressed as a valid layout.
    #[error("block request of {bytes} bytes has no valid layout")]
    BlockLayout { bytes: usize },
    /// The request is larger than the largest configured size class.
    #[error("no large-object pool: request of {size} bytes exceeds every size class")]
    NoLargePool { size: usize },
    /// A piece header carries a tag byte no pool family claims.
    #[error("unrecognized pool tag 0x{raw:02x} in piece header")]
    UnrecognizedTag { raw: u8 },
    /// An indexed header names a class outside the family.
    #[error("piece header names size class {class}, which this family does not have")]
    UnknownClass { class: u8 },
}

/// Rejected size-class configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("minimum piece size {size} must be a non-zero multiple of {align}")]
    MisalignedMinimum { size: usize, align: usize },
    #[error("minimum piece size {size} leaves no room after the {header}-byte header")]
    MinimumBelowHeader { size: usize, header: usize },
    #[error("growth factor {0} must be at least 2")]
    GrowthFactor(usize),
    #[error("class count {0} must be between 1 and 255")]
    ClassCount(usize),
    #[error("allocation unit {unit} must be a non-zero multiple of {align}")]
    AllocationUnit { unit: usize, align: usize },
    #[error("size class {index} overflows usize")]
    ClassOverflow { index: usize },
    #[error("routing table would need {buckets} entries, more than the {max} allowed")]
    LookupTooLarge { buckets: usize, max: usize },
}
