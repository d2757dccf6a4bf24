//! Size-class pool family.
//!
//! One [`PoolEngine`] per class of a [`SizeClassTable`], all constructed
//! together when the family is built. Requests route through the table's
//! bucket lookup; issued pieces route back through their header.

use std::ptr::NonNull;

use zmem_core::config::SizeClassConfig;
use zmem_core::log::{self, AllocatorLogLevel, LogEvent};
use zmem_core::stats::{PoolStats, render_table};
use zmem_core::{AllocatorFault, ConfigError, SizeClassTable};

use crate::header::{HEADER_SIZE, HeaderLayout, PieceHeader, PoolTag};
use crate::pool::PoolEngine;
use crate::sync::RawMutex;
use crate::tracker::BlockTracker;

/// Fixed array of per-class pools plus the routing table.
pub struct SizeClassFamily<H: HeaderLayout, R: RawMutex> {
    table: SizeClassTable,
    pools: Box<[PoolEngine<H, R>]>,
}

impl<H: HeaderLayout, R: RawMutex> SizeClassFamily<H, R> {
    /// Builds the table and initializes every class pool.
    ///
    /// Configuration problems surface as [`FamilyError::Config`], block
    /// failures during initial carving as [`FamilyError::Fault`].
    pub fn new(config: &SizeClassConfig, tracker: &BlockTracker<R>) -> Result<Self, FamilyError> {
        let table = SizeClassTable::build(config, HEADER_SIZE)?;
        let pools = table
            .piece_sizes()
            .iter()
            .enumerate()
            // class_count <= 255 is enforced by the table build.
            .map(|(class, &piece)| PoolEngine::initialize(class as u8, piece, config, tracker))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            table,
            pools: pools.into_boxed_slice(),
        })
    }

    #[must_use]
    pub fn table(&self) -> &SizeClassTable {
        &self.table
    }

    /// Number of class pools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pools.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    #[must_use]
    pub fn pool(&self, class: usize) -> Option<&PoolEngine<H, R>> {
        self.pools.get(class)
    }

    /// Class serving `size` caller bytes.
    pub fn route(&self, size: usize) -> Result<usize, AllocatorFault> {
        self.table.route(size)
    }

    /// Routes `size` to its class and acquires a piece there.
    ///
    /// Returns the piece and the class's usable size.
    pub fn route_and_acquire(
        &self,
        size: usize,
        tracker: &BlockTracker<R>,
    ) -> Result<(NonNull<u8>, usize), AllocatorFault> {
        let pool = &self.pools[self.route(size)?];
        let piece = pool.acquire(tracker)?;
        Ok((piece, pool.usable_size()))
    }

    /// True if the piece at `user` already holds `size` caller bytes.
    ///
    /// # Safety
    ///
    /// Same contract as [`owning_pool`](Self::owning_pool).
    pub unsafe fn check_can_grow_in_place(
        &self,
        user: NonNull<u8>,
        size: usize,
    ) -> Result<(bool, usize), AllocatorFault> {
        // SAFETY: forwarded from the caller's contract.
        let pool = unsafe { self.owning_pool(user)? };
        Ok((pool.can_grow_in_place(size), pool.usable_size()))
    }

    /// Pool that issued `user`, found through the piece header.
    ///
    /// # Safety
    ///
    /// `user` must have been issued by this family and not released.
    pub unsafe fn owning_pool(&self, user: NonNull<u8>) -> Result<&PoolEngine<H, R>, AllocatorFault> {
        // SAFETY: forwarded from the caller's contract.
        let header = unsafe { PieceHeader::from_user(user).as_ref() };
        // No large-object pool is configured, so its tag is as foreign as
        // an unknown one.
        if PoolTag::from_raw(header.raw_tag()) != Some(PoolTag::SizeClass) {
            return Err(AllocatorFault::UnrecognizedTag {
                raw: header.raw_tag(),
            });
        }
        match H::recorded_owner(header) {
            // SAFETY: the layout stamped the issuing pool's address, and
            // pools never move once the family is built.
            Some(owner) => Ok(unsafe { owner.cast::<PoolEngine<H, R>>().as_ref() }),
            None => self
                .pools
                .get(usize::from(header.class()))
                .ok_or(AllocatorFault::UnknownClass {
                    class: header.class(),
                }),
        }
    }

    /// Snapshot of every class pool.
    pub fn stats(&self) -> Vec<PoolStats> {
        self.pools.iter().map(PoolEngine::stats).collect()
    }

    /// Counter table for every class pool.
    pub fn render_stats(&self) -> String {
        render_table(&self.stats())
    }
}

impl<H: HeaderLayout, R: RawMutex> Drop for SizeClassFamily<H, R> {
    fn drop(&mut self) {
        let instrumented = cfg!(feature = "instrumentation");
        let logged = log::enabled(AllocatorLogLevel::Debug);
        if !instrumented && !logged {
            return;
        }
        let report = self.render_stats();
        if instrumented {
            eprintln!("zmem: {} pool family teardown\n{report}", H::NAME);
        }
        if logged {
            log::record(
                LogEvent::new(AllocatorLogLevel::Debug, "family", "teardown", "dropped")
                    .size(self.pools.len())
                    .details(&report),
            );
        }
    }
}

/// Failure while building a family.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FamilyError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Fault(#[from] AllocatorFault),
}
