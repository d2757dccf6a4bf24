//! Process termination on unrecoverable allocator faults.

use std::fmt::Display;

use zmem_core::AllocatorFault;
use zmem_core::log::{self, AllocatorLogLevel, LogEvent};

/// Records `fault`, reports it on stderr and aborts.
#[cold]
#[inline(never)]
pub fn fatal(fault: AllocatorFault) -> ! {
    abort_with(fault_kind(&fault), &fault)
}

#[cold]
#[inline(never)]
pub(crate) fn abort_with(kind: &'static str, reason: &dyn Display) -> ! {
    let details = reason.to_string();
    log::record(LogEvent::new(AllocatorLogLevel::Error, "fatal", kind, "abort").details(&details));
    eprintln!("zmem: fatal: {details}");
    std::process::abort()
}

fn fault_kind(fault: &AllocatorFault) -> &'static str {
    match fault {
        AllocatorFault::OsExhausted { .. } => "os_exhausted",
        AllocatorFault::BlockLayout { .. } => "block_layout",
        AllocatorFault::NoLargePool { .. } => "no_large_pool",
        AllocatorFault::UnrecognizedTag { .. } => "unrecognized_tag",
        AllocatorFault::UnknownClass { .. } => "unknown_class",
    }
}
