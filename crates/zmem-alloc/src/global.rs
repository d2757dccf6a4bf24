//! Process-wide allocator and its free-function surface.
//!
//! With `thread-safe` the allocator is one lazily built static shared by all
//! threads. It is never dropped, so its tracker never runs `release_all`:
//! the blocks are reclaimed by the OS when the process exits, not freed
//! block by block beforehand. Other threads and later exit hooks may still
//! hold pieces at that point. An [`Allocator`] built directly and ended with
//! [`Allocator::shutdown`] frees every block through its tracker.
//!
//! Without `thread-safe` each thread lazily builds its own instance, torn
//! down (tracker included) when the thread exits; pointers must be released
//! on the thread that applied for them.
//!
//! With `instrumentation` the shared allocator prints its counter table at
//! process exit; per-thread instances print theirs at teardown.

use std::ptr::NonNull;

use zmem_core::config::SizeClassConfig;
use zmem_core::stats::PoolStats;

use crate::facade::Allocator;
use crate::family::FamilyError;
use crate::fatal::{abort_with, fatal};
use crate::header::OwnerHeader;
use crate::sync::DefaultLock;

/// Type of the process-wide allocator.
pub type GlobalAllocator = Allocator<OwnerHeader, DefaultLock>;

fn build() -> GlobalAllocator {
    match Allocator::new(&SizeClassConfig::DEFAULT) {
        Ok(allocator) => allocator,
        Err(FamilyError::Fault(fault)) => fatal(fault),
        Err(FamilyError::Config(err)) => abort_with("config", &err),
    }
}

#[cfg(feature = "thread-safe")]
mod instance {
    use std::sync::OnceLock;

    use super::{GlobalAllocator, build};

    static GLOBAL: OnceLock<GlobalAllocator> = OnceLock::new();

    pub(super) fn with<T>(f: impl FnOnce(&GlobalAllocator) -> T) -> T {
        f(GLOBAL.get_or_init(|| {
            let allocator = build();
            #[cfg(feature = "instrumentation")]
            register_exit_report();
            allocator
        }))
    }

    #[cfg(feature = "instrumentation")]
    fn register_exit_report() {
        extern "C" fn report() {
            if let Some(allocator) = GLOBAL.get() {
                eprintln!(
                    "zmem: process allocator at exit\n{}",
                    allocator.family().render_stats()
                );
            }
        }
        // SAFETY: `report` takes no arguments, never unwinds across the FFI
        // boundary, and only reads the already-initialized static.
        unsafe {
            libc::atexit(report);
        }
    }
}

#[cfg(not(feature = "thread-safe"))]
mod instance {
    use super::{GlobalAllocator, build};

    thread_local! {
        static LOCAL: GlobalAllocator = build();
    }

    pub(super) fn with<T>(f: impl FnOnce(&GlobalAllocator) -> T) -> T {
        LOCAL.with(f)
    }
}

/// Runs `f` against the process-wide allocator, building it on first use.
pub fn with_global<T>(f: impl FnOnce(&GlobalAllocator) -> T) -> T {
    instance::with(f)
}

/// Piece with room for at least `size` bytes. Aborts if no class fits.
pub fn apply_memory(size: usize) -> NonNull<u8> {
    with_global(|a| a.apply(size))
}

/// Like [`apply_memory`], also returning the usable size actually granted.
pub fn apply_memory_with_usable(size: usize) -> (NonNull<u8>, usize) {
    with_global(|a| a.apply_with_usable(size))
}

/// Whether `ptr` already holds `size` bytes; a "grow without copy" query.
///
/// # Safety
///
/// `ptr` must be null or a live pointer from [`apply_memory`].
pub unsafe fn check_memory(ptr: *mut u8, size: usize) -> bool {
    // SAFETY: forwarded from the caller's contract.
    with_global(|a| unsafe { a.check(ptr, size) })
}

/// # Safety
///
/// Same contract as [`check_memory`].
pub unsafe fn check_memory_with_usable(ptr: *mut u8, size: usize) -> (bool, usize) {
    // SAFETY: forwarded from the caller's contract.
    with_global(|a| unsafe { a.check_with_usable(ptr, size) })
}

/// Usable size [`apply_memory`] would grant for `size`, without allocating.
pub fn calculate_memory(size: usize) -> usize {
    with_global(|a| a.calculate(size))
}

/// Returns `ptr` to its pool. Null is a no-op.
///
/// # Safety
///
/// `ptr` must be null or a live pointer from [`apply_memory`], released once.
pub unsafe fn release_memory(ptr: *mut u8) {
    if ptr.is_null() {
        return;
    }
    // SAFETY: forwarded from the caller's contract.
    with_global(|a| unsafe { a.release(ptr) });
}

/// Per-class snapshot of the process-wide allocator.
pub fn global_stats() -> Vec<PoolStats> {
    with_global(GlobalAllocator::stats)
}
