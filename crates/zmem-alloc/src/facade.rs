//! Allocator facade.
//!
//! [`Allocator`] owns the block tracker and the size-class family. The family
//! is declared first so it is dropped first; the tracker, which owns every
//! block the family carved from, goes last.
//!
//! Each operation comes in a `try_*` form returning the underlying fault and
//! an infallible form that routes faults to [`fatal`].

use std::ptr::NonNull;

use zmem_core::AllocatorFault;
use zmem_core::config::SizeClassConfig;
use zmem_core::stats::PoolStats;

use crate::family::{FamilyError, SizeClassFamily};
use crate::fatal::fatal;
use crate::header::{HeaderLayout, OwnerHeader};
use crate::sync::{DefaultLock, RawMutex};
use crate::tracker::{BlockTracker, TeardownReport};

/// Pool allocator instance.
pub struct Allocator<H: HeaderLayout = OwnerHeader, R: RawMutex = DefaultLock> {
    family: SizeClassFamily<H, R>,
    tracker: BlockTracker<R>,
}

impl<H: HeaderLayout, R: RawMutex> Allocator<H, R> {
    /// Builds the tracker, then every class pool on top of it.
    pub fn new(config: &SizeClassConfig) -> Result<Self, FamilyError> {
        let tracker = BlockTracker::new();
        let family = SizeClassFamily::new(config, &tracker)?;
        Ok(Self { family, tracker })
    }

    #[must_use]
    pub fn family(&self) -> &SizeClassFamily<H, R> {
        &self.family
    }

    #[must_use]
    pub fn tracker(&self) -> &BlockTracker<R> {
        &self.tracker
    }

    /// Acquires a piece for `size` caller bytes and reports the class's
    /// usable size. A zero-byte request is served like a one-byte one.
    pub fn try_apply(&self, size: usize) -> Result<(NonNull<u8>, usize), AllocatorFault> {
        self.family.route_and_acquire(size, &self.tracker)
    }

    pub fn apply(&self, size: usize) -> NonNull<u8> {
        self.apply_with_usable(size).0
    }

    pub fn apply_with_usable(&self, size: usize) -> (NonNull<u8>, usize) {
        self.try_apply(size).unwrap_or_else(|fault| fatal(fault))
    }

    /// Whether the piece at `ptr` can hold `size` bytes without moving, and
    /// its usable size. Null yields `(false, 0)`.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live pointer issued by this allocator.
    pub unsafe fn try_check(&self, ptr: *mut u8, size: usize) -> Result<(bool, usize), AllocatorFault> {
        let Some(user) = NonNull::new(ptr) else {
            return Ok((false, 0));
        };
        // SAFETY: forwarded from the caller's contract.
        unsafe { self.family.check_can_grow_in_place(user, size) }
    }

    /// # Safety
    ///
    /// Same contract as [`try_check`](Self::try_check).
    pub unsafe fn check(&self, ptr: *mut u8, size: usize) -> bool {
        // SAFETY: forwarded from the caller's contract.
        unsafe { self.check_with_usable(ptr, size).0 }
    }

    /// # Safety
    ///
    /// Same contract as [`try_check`](Self::try_check).
    pub unsafe fn check_with_usable(&self, ptr: *mut u8, size: usize) -> (bool, usize) {
        // SAFETY: forwarded from the caller's contract.
        unsafe { self.try_check(ptr, size) }.unwrap_or_else(|fault| fatal(fault))
    }

    /// Usable size `try_apply(size)` would report, without allocating.
    pub fn try_calculate(&self, size: usize) -> Result<usize, AllocatorFault> {
        self.family.table().routed_usable_size(size)
    }

    pub fn calculate(&self, size: usize) -> usize {
        self.try_calculate(size).unwrap_or_else(|fault| fatal(fault))
    }

    /// Returns the piece at `ptr` to the pool that issued it. Null is a no-op.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live pointer issued by this allocator; it is
    /// dangling once this returns.
    pub unsafe fn try_release(&self, ptr: *mut u8) -> Result<(), AllocatorFault> {
        let Some(user) = NonNull::new(ptr) else {
            return Ok(());
        };
        // SAFETY: forwarded from the caller's contract.
        unsafe {
            let pool = self.family.owning_pool(user)?;
            pool.release(user);
        }
        Ok(())
    }

    /// # Safety
    ///
    /// Same contract as [`try_release`](Self::try_release).
    pub unsafe fn release(&self, ptr: *mut u8) {
        // SAFETY: forwarded from the caller's contract.
        if let Err(fault) = unsafe { self.try_release(ptr) } {
            fatal(fault);
        }
    }

    pub fn stats(&self) -> Vec<PoolStats> {
        self.family.stats()
    }

    /// Drops every pool, then returns every block to the system allocator.
    ///
    /// Pointers still issued by this allocator dangle afterwards.
    pub fn shutdown(self) -> TeardownReport {
        let Self { family, tracker } = self;
        drop(family);
        tracker.release_all()
    }
}
