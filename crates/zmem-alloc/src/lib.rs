//! # zmem-alloc
//!
//! Segregated free-list pool allocator.
//!
//! - **Sync** (`sync`): real or single-thread flag lock, picked at compile time
//! - **Tracker** (`tracker`): the only caller of the system allocator; frees every block at teardown
//! - **Header** (`header`): 16-byte piece header, pool tag, and the two header layouts
//! - **Pool** (`pool`): intrusive free list for one piece size, auto-growing
//! - **Family** (`family`): one pool per size class, O(1) routing
//! - **Facade** (`facade`): the [`Allocator`] instance API
//! - **Global** (`global`): process-wide `apply_memory` / `check_memory` /
//!   `calculate_memory` / `release_memory`
//!
//! Faults that reach the infallible entry points abort the process through
//! [`fatal`].

pub mod facade;
pub mod family;
pub mod fatal;
pub mod global;
pub mod header;
pub mod pool;
pub mod sync;
pub mod tracker;

pub use facade::Allocator;
pub use family::{FamilyError, SizeClassFamily};
pub use fatal::fatal;
pub use global::{
    GlobalAllocator, apply_memory, apply_memory_with_usable, calculate_memory, check_memory,
    check_memory_with_usable, global_stats, release_memory, with_global,
};
pub use header::{HEADER_SIZE, HeaderLayout, IndexedHeader, OwnerHeader, PieceHeader, PoolTag};
pub use pool::PoolEngine;
pub use sync::{DefaultLock, LocalRawMutex, SingleThreaded, ThreadSafe};
pub use tracker::{BlockTracker, TeardownReport};
pub use zmem_core::{AllocatorFault, ConfigError, SizeClassConfig};
