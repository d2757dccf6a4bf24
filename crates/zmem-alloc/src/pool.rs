//! Free-list pool engine.
//!
//! A pool of equal-size pieces carved from tracker blocks. Free pieces form
//! an intrusive singly-linked list threaded through their headers; acquire
//! pops the head, release pushes onto it. When the list runs dry the pool
//! grows by a fifth of its capacity (at least one piece), rounded up to the
//! configured allocation unit.
//!
//! The pool lock covers the pop, the push and the whole of a grow. A grow
//! takes the tracker lock while holding the pool lock, never the reverse.

use std::marker::PhantomData;
use std::ptr::{self, NonNull};

use zmem_core::config::{SizeClassConfig, growth_amount};
use zmem_core::log::{self, AllocatorLogLevel, LogEvent};
use zmem_core::stats::{IssueCounters, PoolStats};
use zmem_core::AllocatorFault;

use crate::header::{HEADER_SIZE, HeaderLayout, PieceHeader};
use crate::sync::{Guarded, RawMutex};
use crate::tracker::BlockTracker;

#[cfg(feature = "instrumentation")]
#[derive(Debug, Default)]
struct Counters(IssueCounters);

#[cfg(feature = "instrumentation")]
impl Counters {
    #[inline]
    fn on_issue(&mut self) {
        self.0.on_issue();
    }

    #[inline]
    fn on_return(&mut self) {
        self.0.on_return();
    }

    fn snapshot(&self) -> Option<IssueCounters> {
        Some(self.0)
    }
}

#[cfg(not(feature = "instrumentation"))]
#[derive(Debug, Default)]
struct Counters;

#[cfg(not(feature = "instrumentation"))]
impl Counters {
    #[inline(always)]
    fn on_issue(&mut self) {}

    #[inline(always)]
    fn on_return(&mut self) {}

    fn snapshot(&self) -> Option<IssueCounters> {
        None
    }
}

/// Lock-protected pool state.
struct FreeList {
    /// First free piece, or null when every carved piece is issued.
    head: *mut PieceHeader,
    /// Pieces carved so far.
    capacity: usize,
    counters: Counters,
}

// SAFETY: the list only points into tracker blocks, which outlive the pool,
// and is only walked under the pool lock.
unsafe impl Send for FreeList {}

/// Pool of fixed-size pieces for one size class.
pub struct PoolEngine<H: HeaderLayout, R: RawMutex> {
    class: u8,
    piece_size: usize,
    usable_size: usize,
    config: SizeClassConfig,
    state: Guarded<R, FreeList>,
    _layout: PhantomData<H>,
}

impl<H: HeaderLayout, R: RawMutex> PoolEngine<H, R> {
    /// Creates the pool and carves `config.initial_capacity` pieces.
    ///
    /// `piece_size` includes the header and must be a multiple of the piece
    /// alignment; the usable size is `piece_size - HEADER_SIZE`.
    pub fn initialize(
        class: u8,
        piece_size: usize,
        config: &SizeClassConfig,
        tracker: &BlockTracker<R>,
    ) -> Result<Self, AllocatorFault> {
        debug_assert!(piece_size > HEADER_SIZE);
        let pool = Self {
            class,
            piece_size,
            usable_size: piece_size - HEADER_SIZE,
            config: *config,
            state: Guarded::new(FreeList {
                head: ptr::null_mut(),
                capacity: 0,
                counters: Counters::default(),
            }),
            _layout: PhantomData,
        };
        if config.initial_capacity > 0 {
            pool.extend_capacity(config.initial_capacity, tracker)?;
        }
        log::record(
            LogEvent::new(AllocatorLogLevel::Trace, "pool", "initialize", "active")
                .size(piece_size)
                .class(usize::from(class))
                .details(H::NAME),
        );
        Ok(pool)
    }

    #[must_use]
    pub fn class_index(&self) -> u8 {
        self.class
    }

    /// Piece size including the header.
    #[must_use]
    pub fn piece_size(&self) -> usize {
        self.piece_size
    }

    /// Caller-visible bytes per piece.
    #[must_use]
    pub fn usable_size(&self) -> usize {
        self.usable_size
    }

    /// Pieces carved so far.
    pub fn capacity(&self) -> usize {
        self.state.lock().capacity
    }

    /// Counts free pieces by walking the list. Diagnostic only.
    pub fn free_count(&self) -> usize {
        let list = self.state.lock();
        let mut count = 0;
        let mut cursor = list.head;
        while !cursor.is_null() {
            count += 1;
            // SAFETY: every node on the list is a carved, free piece header.
            cursor = unsafe { (*cursor).link().cast::<PieceHeader>() };
        }
        count
    }

    /// True if a piece of this pool already holds `size` caller bytes.
    #[inline]
    #[must_use]
    pub fn can_grow_in_place(&self, size: usize) -> bool {
        self.usable_size >= size
    }

    /// Pops a free piece, growing first if none is left.
    ///
    /// The returned region is `usable_size` bytes, uninitialized, and
    /// 16-byte aligned.
    pub fn acquire(&self, tracker: &BlockTracker<R>) -> Result<NonNull<u8>, AllocatorFault> {
        let mut list = self.state.lock();
        if list.head.is_null() {
            let wanted = growth_amount(list.capacity);
            self.extend_locked(&mut list, wanted, tracker)?;
        }
        let Some(mut header) = NonNull::new(list.head) else {
            return Err(AllocatorFault::OsExhausted {
                bytes: self.piece_size,
            });
        };
        // SAFETY: the head is a free piece header written by `extend_locked`
        // or `release`, and the lock gives us exclusive access to it.
        unsafe {
            let h = header.as_mut();
            list.head = h.link().cast::<PieceHeader>();
            H::stamp_issued(h, ptr::from_ref(self).cast::<()>());
        }
        list.counters.on_issue();
        drop(list);
        Ok(PieceHeader::user_ptr(header))
    }

    /// Pushes a piece back onto the free list.
    ///
    /// # Safety
    ///
    /// `user` must have been returned by [`acquire`](Self::acquire) on this
    /// same pool and not released since. Releasing a foreign or already
    /// released pointer corrupts the free list.
    pub unsafe fn release(&self, user: NonNull<u8>) {
        // SAFETY: forwarded from the caller's contract.
        let mut header = unsafe { PieceHeader::from_user(user) };
        let mut list = self.state.lock();
        // SAFETY: the piece is issued by this pool, so its header is ours to
        // rewrite under the lock.
        unsafe { header.as_mut().set_link(list.head.cast::<u8>()) };
        list.head = header.as_ptr();
        list.counters.on_return();
    }

    /// Carves at least `pieces` more pieces. Returns the number actually
    /// carved, which rounding may push above the request.
    pub fn extend_capacity(
        &self,
        pieces: usize,
        tracker: &BlockTracker<R>,
    ) -> Result<usize, AllocatorFault> {
        let mut list = self.state.lock();
        self.extend_locked(&mut list, pieces, tracker)
    }

    fn extend_locked(
        &self,
        list: &mut FreeList,
        pieces: usize,
        tracker: &BlockTracker<R>,
    ) -> Result<usize, AllocatorFault> {
        let bytes = self.config.block_bytes_for(pieces.max(1), self.piece_size);
        let block = tracker.acquire(bytes)?;
        let carved = bytes / self.piece_size;
        let base = block.as_ptr();

        // Link piece i to piece i + 1; the last one adopts the old head.
        for i in 0..carved {
            let next = if i + 1 < carved {
                // SAFETY: (i + 1) * piece_size < carved * piece_size <= bytes.
                unsafe { base.add((i + 1) * self.piece_size) }
            } else {
                list.head.cast::<u8>()
            };
            // SAFETY: piece i lies inside the block, is 16-byte aligned
            // (block and piece size both are), and is not yet reachable.
            unsafe {
                base.add(i * self.piece_size)
                    .cast::<PieceHeader>()
                    .write(PieceHeader::free(self.class, next));
            }
        }
        list.head = base.cast::<PieceHeader>();
        list.capacity += carved;

        if log::enabled(AllocatorLogLevel::Debug) {
            let details = format!(
                "requested={} carved={} capacity={}",
                pieces, carved, list.capacity
            );
            log::record(
                LogEvent::new(AllocatorLogLevel::Debug, "pool", "extend_capacity", "grown")
                    .ptr(base as usize)
                    .size(bytes)
                    .class(usize::from(self.class))
                    .details(&details),
            );
        }
        Ok(carved)
    }

    /// Snapshot of this pool's capacity and issue counters.
    pub fn stats(&self) -> PoolStats {
        let list = self.state.lock();
        PoolStats {
            class: usize::from(self.class),
            piece_size: self.piece_size,
            usable_size: self.usable_size,
            capacity: list.capacity,
            counters: list.counters.snapshot(),
        }
    }
}

impl<H: HeaderLayout, R: RawMutex> Drop for PoolEngine<H, R> {
    fn drop(&mut self) {
        // Blocks belong to the tracker; only the list head is dropped here.
        let list = self.state.get_mut();
        list.head = ptr::null_mut();
        if list.capacity > 0 {
            let details = format!("capacity={}", list.capacity);
            log::record(
                LogEvent::new(AllocatorLogLevel::Trace, "pool", "teardown", "dropped")
                    .size(self.piece_size)
                    .class(usize::from(self.class))
                    .details(&details),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{IndexedHeader, OwnerHeader, PoolTag};
    use crate::sync::{SingleThreaded, ThreadSafe};

    fn small_config() -> SizeClassConfig {
        SizeClassConfig::geometric(64, 2, 4).with_allocation_unit(4096)
    }

    fn pool<H: HeaderLayout, R: RawMutex>(
        piece: usize,
        config: &SizeClassConfig,
        tracker: &BlockTracker<R>,
    ) -> PoolEngine<H, R> {
        PoolEngine::initialize(0, piece, config, tracker).expect("pool")
    }

    #[test]
    fn initialize_carves_rounded_capacity() {
        let tracker = BlockTracker::<SingleThreaded>::new();
        let config = small_config().with_initial_capacity(10);
        let p: PoolEngine<IndexedHeader, _> = pool(64, &config, &tracker);
        // 10 pieces round up to one 4096-byte unit = 64 pieces.
        assert_eq!(p.capacity(), 64);
        assert_eq!(p.free_count(), 64);
        assert_eq!(tracker.live_blocks(), 1);
    }

    #[test]
    fn zero_initial_capacity_defers_carving() {
        let tracker = BlockTracker::<SingleThreaded>::new();
        let p: PoolEngine<IndexedHeader, _> = pool(64, &small_config(), &tracker);
        assert_eq!(p.capacity(), 0);
        assert_eq!(tracker.live_blocks(), 0);

        let piece = p.acquire(&tracker).expect("piece");
        assert_eq!(p.capacity(), 64);
        assert_eq!(p.free_count(), 63);
        // SAFETY: piece came from p.
        unsafe { p.release(piece) };
        assert_eq!(p.free_count(), 64);
    }

    #[test]
    fn acquire_is_lifo_with_release() {
        let tracker = BlockTracker::<SingleThreaded>::new();
        let p: PoolEngine<IndexedHeader, _> = pool(128, &small_config(), &tracker);
        let a = p.acquire(&tracker).unwrap();
        let b = p.acquire(&tracker).unwrap();
        assert_ne!(a, b);
        // SAFETY: b came from p.
        unsafe { p.release(b) };
        assert_eq!(p.acquire(&tracker).unwrap(), b);
    }

    #[test]
    fn pieces_are_disjoint_and_aligned() {
        let tracker = BlockTracker::<SingleThreaded>::new();
        let p: PoolEngine<IndexedHeader, _> = pool(64, &small_config(), &tracker);
        let mut addrs: Vec<usize> = (0..200)
            .map(|_| p.acquire(&tracker).unwrap().as_ptr() as usize)
            .collect();
        addrs.sort_unstable();
        for w in addrs.windows(2) {
            assert!(w[1] - w[0] >= 64, "pieces overlap: {:#x} {:#x}", w[0], w[1]);
        }
        assert!(addrs.iter().all(|a| a % 16 == 0));
    }

    #[test]
    fn usable_region_is_fully_writable() {
        let tracker = BlockTracker::<SingleThreaded>::new();
        let p: PoolEngine<IndexedHeader, _> = pool(256, &small_config(), &tracker);
        let pieces: Vec<_> = (0..32).map(|_| p.acquire(&tracker).unwrap()).collect();
        for (i, piece) in pieces.iter().enumerate() {
            // SAFETY: each piece is valid for usable_size bytes.
            unsafe { ptr::write_bytes(piece.as_ptr(), i as u8, p.usable_size()) };
        }
        for (i, piece) in pieces.iter().enumerate() {
            // SAFETY: as above; the slice covers exactly the usable region.
            let bytes = unsafe { std::slice::from_raw_parts(piece.as_ptr(), p.usable_size()) };
            assert!(bytes.iter().all(|&b| b == i as u8), "piece {i} was overwritten");
        }
    }

    #[test]
    fn growth_is_monotonic_and_at_least_one_piece() {
        let tracker = BlockTracker::<SingleThreaded>::new();
        let config = small_config().with_allocation_unit(64);
        let p: PoolEngine<IndexedHeader, _> = pool(64, &config, &tracker);
        let mut last = p.capacity();
        for _ in 0..50 {
            p.acquire(&tracker).unwrap();
            let now = p.capacity();
            assert!(now >= last);
            last = now;
        }
        assert!(last >= 50);

        let before = p.capacity();
        let carved = p.extend_capacity(1, &tracker).unwrap();
        assert!(carved >= 1);
        assert_eq!(p.capacity(), before + carved);
    }

    #[test]
    fn auto_grow_adds_a_fifth_of_capacity() {
        let tracker = BlockTracker::<SingleThreaded>::new();
        // Unit equals one piece, so realized growth equals the request.
        let config = small_config().with_allocation_unit(64);
        let p: PoolEngine<IndexedHeader, _> = pool(64, &config, &tracker);
        p.extend_capacity(100, &tracker).unwrap();
        assert_eq!(p.capacity(), 100);
        for _ in 0..100 {
            p.acquire(&tracker).unwrap();
        }
        assert_eq!(p.free_count(), 0);
        p.acquire(&tracker).unwrap();
        assert_eq!(p.capacity(), 120);
        assert_eq!(p.free_count(), 19);
    }

    #[test]
    fn extend_splices_onto_existing_free_list() {
        let tracker = BlockTracker::<SingleThreaded>::new();
        let config = small_config().with_allocation_unit(64);
        let p: PoolEngine<IndexedHeader, _> = pool(64, &config, &tracker);
        p.extend_capacity(3, &tracker).unwrap();
        p.extend_capacity(2, &tracker).unwrap();
        assert_eq!(p.capacity(), 5);
        assert_eq!(p.free_count(), 5);
        assert_eq!(tracker.live_blocks(), 2);
    }

    #[test]
    fn max_block_cap_still_yields_one_piece() {
        let tracker = BlockTracker::<SingleThreaded>::new();
        let config = small_config().with_max_block_bytes(128);
        let p: PoolEngine<IndexedHeader, _> = pool(512, &config, &tracker);
        assert_eq!(p.extend_capacity(10, &tracker).unwrap(), 1);
        assert_eq!(tracker.bytes_acquired(), 512);
    }

    #[test]
    fn headers_keep_tag_and_class_when_issued() {
        let tracker = BlockTracker::<SingleThreaded>::new();
        let p: PoolEngine<OwnerHeader, SingleThreaded> =
            PoolEngine::initialize(2, 256, &small_config(), &tracker).unwrap();
        let piece = p.acquire(&tracker).unwrap();
        // SAFETY: piece came from p.
        let header = unsafe { PieceHeader::from_user(piece).as_ref() };
        assert_eq!(header.raw_tag(), PoolTag::SizeClass.raw());
        assert_eq!(header.class(), 2);
        let owner = OwnerHeader::recorded_owner(header).unwrap();
        assert_eq!(owner.as_ptr().cast_const(), ptr::from_ref(&p).cast::<()>());
    }

    #[test]
    fn can_grow_in_place_is_usable_bound() {
        let tracker = BlockTracker::<SingleThreaded>::new();
        let p: PoolEngine<IndexedHeader, _> = pool(128, &small_config(), &tracker);
        assert!(p.can_grow_in_place(0));
        assert!(p.can_grow_in_place(128 - HEADER_SIZE));
        assert!(!p.can_grow_in_place(128 - HEADER_SIZE + 1));
    }

    #[test]
    fn concurrent_acquire_release_keeps_pieces_unique() {
        use std::collections::HashSet;
        use std::sync::Arc;

        let tracker = Arc::new(BlockTracker::<ThreadSafe>::new());
        let p: Arc<PoolEngine<IndexedHeader, ThreadSafe>> =
            Arc::new(PoolEngine::initialize(0, 64, &small_config(), &tracker).unwrap());

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let tracker = Arc::clone(&tracker);
                let p = Arc::clone(&p);
                std::thread::spawn(move || {
                    let mut held = Vec::new();
                    for round in 0..500 {
                        held.push(p.acquire(&tracker).unwrap().as_ptr() as usize);
                        if round % 3 == 0 {
                            let addr = held.swap_remove(0);
                            // SAFETY: addr came from p and is released once.
                            unsafe { p.release(NonNull::new(addr as *mut u8).unwrap()) };
                        }
                    }
                    held
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for h in handles {
            for addr in h.join().unwrap() {
                assert!(seen.insert(addr), "piece {addr:#x} issued twice");
            }
        }
        assert_eq!(p.free_count() + seen.len(), p.capacity());
    }

    #[cfg(feature = "instrumentation")]
    #[test]
    fn counters_track_issue_and_peak() {
        let tracker = BlockTracker::<SingleThreaded>::new();
        let p: PoolEngine<IndexedHeader, _> = pool(64, &small_config(), &tracker);
        let a = p.acquire(&tracker).unwrap();
        let b = p.acquire(&tracker).unwrap();
        // SAFETY: both came from p.
        unsafe {
            p.release(a);
            p.release(b);
        }
        p.acquire(&tracker).unwrap();
        let c = p.stats().counters.unwrap();
        assert_eq!(c.issued_now, 1);
        assert_eq!(c.issued_total, 3);
        assert_eq!(c.issued_peak, 2);
    }

    #[cfg(not(feature = "instrumentation"))]
    #[test]
    fn counters_absent_without_instrumentation() {
        let tracker = BlockTracker::<SingleThreaded>::new();
        let p: PoolEngine<IndexedHeader, _> = pool(64, &small_config(), &tracker);
        p.acquire(&tracker).unwrap();
        assert_eq!(p.stats().counters, None);
        assert_eq!(p.stats().capacity, 64);
    }
}
