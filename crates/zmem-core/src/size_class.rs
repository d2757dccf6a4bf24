//! Size-class table and O(1) request routing.
//!
//! Classes follow the geometric progression of a [`SizeClassConfig`]. Next
//! to the class array sits a lookup table with one entry per
//! `min_piece_size`-sized bucket up to the largest class: entry `k` holds the
//! smallest class whose piece covers bucket `k`. Routing a request is then
//! `table[ceil((usable + header) / min) - 1]`, an index rather than a search.

use crate::config::SizeClassConfig;
use crate::error::{AllocatorFault, ConfigError};

/// Immutable class array plus its bucket lookup table.
#[derive(Debug, Clone)]
pub struct SizeClassTable {
    /// Piece size per class (header included), strictly increasing.
    piece_sizes: Box<[usize]>,
    /// Bucket -> class index.
    lookup: Box<[u8]>,
    /// Bucket width (the smallest piece size).
    min_piece_size: usize,
    /// Bytes of every piece reserved for the header.
    header_size: usize,
}

impl SizeClassTable {
    /// Builds the class array and lookup table in one forward pass.
    pub fn build(config: &SizeClassConfig, header_size: usize) -> Result<Self, ConfigError> {
        config.validate(header_size)?;
        let piece_sizes = config.class_sizes()?;
        let min = config.min_piece_size;
        let largest = piece_sizes[piece_sizes.len() - 1];
        let buckets = largest / min;

        let mut lookup = Vec::with_capacity(buckets);
        let mut class = 0usize;
        for bucket in 0..buckets {
            let bucket_end = (bucket + 1) * min;
            while piece_sizes[class] < bucket_end {
                class += 1;
            }
            // class_count <= 255 is enforced by validate().
            lookup.push(class as u8);
        }

        Ok(Self {
            piece_sizes: piece_sizes.into_boxed_slice(),
            lookup: lookup.into_boxed_slice(),
            min_piece_size: min,
            header_size,
        })
    }

    /// Number of classes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.piece_sizes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.piece_sizes.is_empty()
    }

    #[must_use]
    pub fn header_size(&self) -> usize {
        self.header_size
    }

    #[must_use]
    pub fn min_piece_size(&self) -> usize {
        self.min_piece_size
    }

    /// Number of buckets in the lookup table.
    #[must_use]
    pub fn bucket_count(&self) -> usize {
        self.lookup.len()
    }

    /// Piece size of `class`, or `None` past the last class.
    #[must_use]
    pub fn piece_size(&self, class: usize) -> Option<usize> {
        self.piece_sizes.get(class).copied()
    }

    /// Caller-visible bytes of a piece in `class`.
    #[must_use]
    pub fn usable_size(&self, class: usize) -> Option<usize> {
        self.piece_size(class).map(|size| size - self.header_size)
    }

    /// Largest request any class can satisfy.
    #[must_use]
    pub fn max_usable_size(&self) -> usize {
        self.piece_sizes[self.piece_sizes.len() - 1] - self.header_size
    }

    /// All piece sizes, smallest first.
    #[must_use]
    pub fn piece_sizes(&self) -> &[usize] {
        &self.piece_sizes
    }

    /// Class index serving a request of `usable` caller bytes.
    ///
    /// A request of 0 routes like a request of 1.
    pub fn route(&self, usable: usize) -> Result<usize, AllocatorFault> {
        let needed = usable
            .max(1)
            .checked_add(self.header_size)
            .ok_or(AllocatorFault::NoLargePool { size: usable })?;
        let bucket = needed.div_ceil(self.min_piece_size) - 1;
        self.lookup
            .get(bucket)
            .map(|&class| usize::from(class))
            .ok_or(AllocatorFault::NoLargePool { size: usable })
    }

    /// Usable size of the class `usable` routes to.
    pub fn routed_usable_size(&self, usable: usize) -> Result<usize, AllocatorFault> {
        let class = self.route(usable)?;
        Ok(self.piece_sizes[class] - self.header_size)
    }
}
