//! OS block tracker.
//!
//! The only component that calls the system allocator. Every block it hands
//! out is remembered in a chain of fixed-capacity record arrays so the whole
//! set can be freed in one pass at teardown. The chain is append-only until
//! then; nothing is freed block-by-block.

use std::alloc::{self, Layout};
use std::ptr::{self, NonNull};

use zmem_core::config::PIECE_ALIGN;
use zmem_core::log::{self, AllocatorLogLevel, LogEvent};
use zmem_core::AllocatorFault;

use crate::sync::{Guarded, RawMutex};

/// Block records per chain node.
pub const NODE_CAPACITY: usize = 64;

/// One block handed out by the system allocator.
#[derive(Debug, Clone, Copy)]
struct BlockRecord {
    base: *mut u8,
    size: usize,
}

impl BlockRecord {
    const EMPTY: Self = Self {
        base: ptr::null_mut(),
        size: 0,
    };
}

/// Fixed-capacity array of block records, linked to the previous node.
struct BlockNode {
    records: [BlockRecord; NODE_CAPACITY],
    len: usize,
    next: Option<Box<BlockNode>>,
}

impl BlockNode {
    fn new(next: Option<Box<BlockNode>>) -> Box<Self> {
        Box::new(Self {
            records: [BlockRecord::EMPTY; NODE_CAPACITY],
            len: 0,
            next,
        })
    }

    fn is_full(&self) -> bool {
        self.len == NODE_CAPACITY
    }
}

/// Lock-protected tracker state. The newest node is at the head.
struct BlockChain {
    head: Option<Box<BlockNode>>,
    blocks: usize,
    bytes: usize,
    acquired_total: usize,
}

// SAFETY: the raw block pointers are owned exclusively by the chain and are
// only dereferenced by `release_all` under the tracker's lock.
unsafe impl Send for BlockChain {}

impl BlockChain {
    const fn new() -> Self {
        Self {
            head: None,
            blocks: 0,
            bytes: 0,
            acquired_total: 0,
        }
    }

    fn remember(&mut self, record: BlockRecord) {
        let needs_node = self.head.as_ref().is_none_or(|node| node.is_full());
        if needs_node {
            let previous = self.head.take();
            self.head = Some(BlockNode::new(previous));
        }
        if let Some(node) = self.head.as_mut() {
            node.records[node.len] = record;
            node.len += 1;
        }
        self.blocks += 1;
        self.bytes += record.size;
        self.acquired_total += 1;
    }
}

/// Summary of one teardown pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TeardownReport {
    /// Blocks returned to the system allocator.
    pub blocks: usize,
    /// Bytes returned to the system allocator.
    pub bytes: usize,
    /// Chain nodes freed.
    pub nodes: usize,
}

/// Remembers every block it has acquired and frees them all at teardown.
pub struct BlockTracker<R: RawMutex> {
    chain: Guarded<R, BlockChain>,
}

impl<R: RawMutex> BlockTracker<R> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            chain: Guarded::new(BlockChain::new()),
        }
    }

    /// Requests `size` bytes from the system allocator and remembers the block.
    ///
    /// The block is aligned to [`PIECE_ALIGN`] and uninitialized.
    pub fn acquire(&self, size: usize) -> Result<NonNull<u8>, AllocatorFault> {
        let layout = Layout::from_size_align(size.max(1), PIECE_ALIGN)
            .map_err(|_| AllocatorFault::BlockLayout { bytes: size })?;
        // SAFETY: layout has non-zero size.
        let raw = unsafe { alloc::alloc(layout) };
        let Some(base) = NonNull::new(raw) else {
            return Err(AllocatorFault::OsExhausted { bytes: size });
        };

        let mut chain = self.chain.lock();
        chain.remember(BlockRecord {
            base: base.as_ptr(),
            size: layout.size(),
        });
        let live = chain.blocks;
        drop(chain);

        if log::enabled(AllocatorLogLevel::Debug) {
            let details = format!("live_blocks={live}");
            log::record(
                LogEvent::new(AllocatorLogLevel::Debug, "tracker", "block_acquire", "success")
                    .ptr(base.as_ptr() as usize)
                    .size(layout.size())
                    .details(&details),
            );
        }
        Ok(base)
    }

    /// Blocks ever acquired, including ones already released by teardown.
    pub fn blocks_acquired(&self) -> usize {
        self.chain.lock().acquired_total
    }

    /// Blocks currently held.
    pub fn live_blocks(&self) -> usize {
        self.chain.lock().blocks
    }

    /// Bytes currently held.
    pub fn bytes_acquired(&self) -> usize {
        self.chain.lock().bytes
    }

    /// Frees every remembered block, then every chain node.
    ///
    /// Idempotent: a second call finds an empty chain and frees nothing.
    /// Any piece still issued from these blocks dangles afterwards.
    pub fn release_all(&self) -> TeardownReport {
        let mut chain = self.chain.lock();
        let mut report = TeardownReport::default();
        let mut cursor = chain.head.take();
        while let Some(mut node) = cursor {
            for record in &node.records[..node.len] {
                // SAFETY: every record was produced by `acquire` with exactly
                // this size and alignment, and `take()` above guarantees each
                // record is visited once.
                unsafe {
                    let layout = Layout::from_size_align_unchecked(record.size, PIECE_ALIGN);
                    alloc::dealloc(record.base, layout);
                }
                report.blocks += 1;
                report.bytes += record.size;
            }
            cursor = node.next.take();
            report.nodes += 1;
        }
        chain.blocks = 0;
        chain.bytes = 0;
        drop(chain);

        if report.blocks > 0 {
            let details = format!("nodes={}", report.nodes);
            log::record(
                LogEvent::new(AllocatorLogLevel::Info, "tracker", "teardown", "released")
                    .size(report.bytes)
                    .details(&details),
            );
        }
        report
    }
}

impl<R: RawMutex> Default for BlockTracker<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: RawMutex> Drop for BlockTracker<R> {
    fn drop(&mut self) {
        self.release_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::{SingleThreaded, ThreadSafe};

    #[test]
    fn acquire_returns_aligned_writable_block() {
        let tracker = BlockTracker::<SingleThreaded>::new();
        let block = tracker.acquire(4096).expect("block");
        assert_eq!(block.as_ptr() as usize % PIECE_ALIGN, 0);
        // SAFETY: block is valid for 4096 bytes.
        unsafe {
            ptr::write_bytes(block.as_ptr(), 0xAB, 4096);
            assert_eq!(*block.as_ptr().add(4095), 0xAB);
        }
        assert_eq!(tracker.live_blocks(), 1);
        assert_eq!(tracker.bytes_acquired(), 4096);
    }

    #[test]
    fn chain_spills_into_new_nodes() {
        let tracker = BlockTracker::<SingleThreaded>::new();
        let count = NODE_CAPACITY * 2 + 3;
        for _ in 0..count {
            tracker.acquire(64).expect("block");
        }
        assert_eq!(tracker.live_blocks(), count);

        let report = tracker.release_all();
        assert_eq!(report.blocks, count);
        assert_eq!(report.bytes, count * 64);
        assert_eq!(report.nodes, 3);
    }

    #[test]
    fn release_all_is_idempotent() {
        let tracker = BlockTracker::<ThreadSafe>::new();
        tracker.acquire(128).expect("block");
        tracker.acquire(256).expect("block");

        let first = tracker.release_all();
        assert_eq!(first.blocks, 2);
        assert_eq!(first.bytes, 384);

        let second = tracker.release_all();
        assert_eq!(second, TeardownReport::default());
        assert_eq!(tracker.live_blocks(), 0);
        assert_eq!(tracker.blocks_acquired(), 2);
    }

    #[test]
    fn empty_tracker_tears_down_cleanly() {
        let tracker = BlockTracker::<SingleThreaded>::new();
        assert_eq!(tracker.release_all(), TeardownReport::default());
    }

    #[test]
    fn oversized_request_is_a_layout_fault() {
        let tracker = BlockTracker::<SingleThreaded>::new();
        assert_eq!(
            tracker.acquire(usize::MAX).unwrap_err(),
            AllocatorFault::BlockLayout { bytes: usize::MAX }
        );
        assert_eq!(tracker.live_blocks(), 0);
    }

    #[test]
    fn acquire_logs_slow_path_event() {
        let tracker = BlockTracker::<ThreadSafe>::new();
        let block = tracker.acquire(8192).expect("block");
        let found = log::snapshot_records().into_iter().any(|r| {
            r.symbol == "tracker"
                && r.event == "block_acquire"
                && r.ptr == Some(block.as_ptr() as usize)
        });
        assert!(found);
    }
}
