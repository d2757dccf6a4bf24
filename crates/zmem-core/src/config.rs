//! Build-time allocator configuration.
//!
//! Everything that shapes the pools is fixed when the allocator is
//! constructed. Nothing here reads the environment: the process-wide
//! allocator always uses [`SizeClassConfig::DEFAULT`].

use crate::error::ConfigError;

/// Alignment of every block and piece handed out by the allocator.
pub const PIECE_ALIGN: usize = 16;

/// Default smallest piece size (bytes, header included).
pub const DEFAULT_MIN_PIECE_SIZE: usize = 32;

/// Default multiplier between consecutive size classes.
pub const DEFAULT_GROWTH_FACTOR: usize = 2;

/// Default number of size classes (32 B .. 1 MiB pieces).
pub const DEFAULT_CLASS_COUNT: usize = 16;

/// Default tracker request granularity.
pub const DEFAULT_ALLOCATION_UNIT: usize = 64 * 1024; // 64KB

/// Default cap on a single tracker request.
pub const DEFAULT_MAX_BLOCK_BYTES: usize = 16 * 1024 * 1024; // 16MB

/// Shape of a size-class pool family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeClassConfig {
    /// Piece size of class 0, header included.
    pub min_piece_size: usize,
    /// `class[i] = class[i - 1] * growth_factor`.
    pub growth_factor: usize,
    /// Number of classes in the progression.
    pub class_count: usize,
    /// Pieces carved per pool during initialization (0 defers to first acquire).
    pub initial_capacity: usize,
    /// Block requests are rounded up to a multiple of this many bytes.
    pub allocation_unit: usize,
    /// Upper bound for one block request. Never enforced below one piece.
    pub max_block_bytes: usize,
}

impl SizeClassConfig {
    /// Configuration used by the process-wide allocator.
    pub const DEFAULT: Self = Self {
        min_piece_size: DEFAULT_MIN_PIECE_SIZE,
        growth_factor: DEFAULT_GROWTH_FACTOR,
        class_count: DEFAULT_CLASS_COUNT,
        initial_capacity: 0,
        allocation_unit: DEFAULT_ALLOCATION_UNIT,
        max_block_bytes: DEFAULT_MAX_BLOCK_BYTES,
    };

    /// Geometric configuration with default growth parameters.
    #[must_use]
    pub const fn geometric(min_piece_size: usize, growth_factor: usize, class_count: usize) -> Self {
        Self {
            min_piece_size,
            growth_factor,
            class_count,
            ..Self::DEFAULT
        }
    }

    #[must_use]
    pub const fn with_initial_capacity(mut self, pieces: usize) -> Self {
        self.initial_capacity = pieces;
        self
    }

    #[must_use]
    pub const fn with_allocation_unit(mut self, unit: usize) -> Self {
        self.allocation_unit = unit;
        self
    }

    #[must_use]
    pub const fn with_max_block_bytes(mut self, bytes: usize) -> Self {
        self.max_block_bytes = bytes;
        self
    }

    /// Checks the configuration against a piece header of `header_size` bytes.
    pub fn validate(&self, header_size: usize) -> Result<(), ConfigError> {
        if self.min_piece_size == 0 || self.min_piece_size % PIECE_ALIGN != 0 {
            return Err(ConfigError::MisalignedMinimum {
                size: self.min_piece_size,
                align: PIECE_ALIGN,
            });
        }
        if self.min_piece_size <= header_size {
            return Err(ConfigError::MinimumBelowHeader {
                size: self.min_piece_size,
                header: header_size,
            });
        }
        if self.growth_factor < 2 {
            return Err(ConfigError::GrowthFactor(self.growth_factor));
        }
        if self.class_count == 0 || self.class_count > usize::from(u8::MAX) {
            return Err(ConfigError::ClassCount(self.class_count));
        }
        if self.allocation_unit == 0 || self.allocation_unit % PIECE_ALIGN != 0 {
            return Err(ConfigError::AllocationUnit {
                unit: self.allocation_unit,
                align: PIECE_ALIGN,
            });
        }
        let sizes = self.class_sizes()?;
        let largest = sizes.last().copied().unwrap_or(self.min_piece_size);
        let buckets = largest / self.min_piece_size;
        if buckets > MAX_LOOKUP_BUCKETS {
            return Err(ConfigError::LookupTooLarge {
                buckets,
                max: MAX_LOOKUP_BUCKETS,
            });
        }
        Ok(())
    }

    /// Generates the piece-size progression.
    pub fn class_sizes(&self) -> Result<Vec<usize>, ConfigError> {
        let mut sizes = Vec::with_capacity(self.class_count);
        let mut size = self.min_piece_size;
        for index in 0..self.class_count {
            if index > 0 {
                size = size
                    .checked_mul(self.growth_factor)
                    .ok_or(ConfigError::ClassOverflow { index })?;
            }
            sizes.push(size);
        }
        Ok(sizes)
    }

    /// Bytes to request from the tracker for `pieces` pieces of `piece_size`.
    ///
    /// Rounded up to the allocation unit, capped at `max_block_bytes`, and
    /// never smaller than a single piece.
    #[must_use]
    pub fn block_bytes_for(&self, pieces: usize, piece_size: usize) -> usize {
        let wanted = pieces.saturating_mul(piece_size);
        let unit = self.allocation_unit;
        let rounded = wanted
            .checked_next_multiple_of(unit)
            .unwrap_or(usize::MAX - (usize::MAX % unit));
        rounded.min(self.max_block_bytes).max(piece_size)
    }
}

impl Default for SizeClassConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Upper bound on routing table entries (`largest piece / min_piece_size`).
///
/// The default configuration needs 32 768.
pub const MAX_LOOKUP_BUCKETS: usize = 1 << 20;

/// Pieces added by an automatic grow: `max(1, floor(capacity * 0.2))`.
#[must_use]
pub const fn growth_amount(capacity: usize) -> usize {
    let step = capacity / 5;
    if step == 0 { 1 } else { step }
}
