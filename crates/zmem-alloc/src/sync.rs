//! Thread-safety shim.
//!
//! Pools and the block tracker guard their state with
//! `lock_api::Mutex<R, T>`, generic over the raw lock `R`. Two raw locks are
//! provided:
//!
//! - [`ThreadSafe`]: `parking_lot::RawMutex`, a real mutual-exclusion lock.
//! - [`SingleThreaded`]: [`LocalRawMutex`], a one-byte flag with no atomics
//!   or parking. It is `!Sync`, so anything guarded by it cannot be shared
//!   across threads.
//!
//! [`DefaultLock`] picks between them from the `thread-safe` feature.

use std::cell::Cell;

pub use parking_lot::lock_api::RawMutex;

/// Raw lock for single-threaded use: a plain flag, no atomics.
///
/// Locking it again while held panics instead of deadlocking.
pub struct LocalRawMutex {
    locked: Cell<bool>,
}

// SAFETY: the flag makes every guard exclusive: `lock` refuses a second
// holder and `try_lock` reports it. `Cell` makes the type `!Sync`, so the
// flag is only ever touched from one thread.
unsafe impl RawMutex for LocalRawMutex {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = Self {
        locked: Cell::new(false),
    };

    type GuardMarker = parking_lot::lock_api::GuardNoSend;

    #[inline]
    fn lock(&self) {
        assert!(
            !self.locked.replace(true),
            "zmem: single-threaded lock re-entered while held"
        );
    }

    #[inline]
    fn try_lock(&self) -> bool {
        !self.locked.replace(true)
    }

    #[inline]
    unsafe fn unlock(&self) {
        self.locked.set(false);
    }

    #[inline]
    fn is_locked(&self) -> bool {
        self.locked.get()
    }
}

/// Real lock.
pub type ThreadSafe = parking_lot::RawMutex;

/// Flag-only lock for single-threaded builds.
pub type SingleThreaded = LocalRawMutex;

/// Lock selected by the `thread-safe` feature.
#[cfg(feature = "thread-safe")]
pub type DefaultLock = ThreadSafe;

/// Lock selected by the `thread-safe` feature.
#[cfg(not(feature = "thread-safe"))]
pub type DefaultLock = SingleThreaded;

/// Mutex over the raw lock `R`.
pub type Guarded<R, T> = parking_lot::lock_api::Mutex<R, T>;
