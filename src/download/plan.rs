//! Worker scheduling: splits a resource into contiguous byte ranges.
//!
//! The number of workers is `min(max_workers, ceil(total / min_bytes_per_worker))`,
//! never less than one. Range boundaries use integer division so the ranges
//! partition `[0, total)` exactly.

use std::fmt;

use tracing::debug;

/// An inclusive byte interval `[start, end]` requested by one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ByteRange {
    /// First byte offset (inclusive).
    pub start: u64,
    /// Last byte offset (inclusive).
    pub end: u64,
}

impl ByteRange {
    /// Creates a range covering `start..=end`.
    #[must_use]
    pub fn new(start: u64, end: u64) -> Self {
        debug_assert!(start <= end, "byte range start must not exceed end");
        Self { start, end }
    }

    /// Number of bytes in the range.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Always false; a `ByteRange` holds at least one byte.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Value for the HTTP `Range` request header.
    #[must_use]
    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }

    /// Whether `offset` falls inside the range.
    #[must_use]
    pub fn contains(&self, offset: u64) -> bool {
        (self.start..=self.end).contains(&offset)
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// How a transfer will be fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchPlan {
    /// Size unknown: one worker, no `Range` header, offsets start at 0.
    Unranged,
    /// Size known: one worker per range, in offset order.
    Ranged {
        /// Total resource size the ranges partition.
        total_size: u64,
        /// Contiguous, non-overlapping ranges covering `[0, total_size)`.
        ranges: Vec<ByteRange>,
    },
}

impl FetchPlan {
    /// Number of workers the plan launches.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        match self {
            Self::Unranged => 1,
            Self::Ranged { ranges, .. } => ranges.len(),
        }
    }

    /// The planned ranges, or `None` for an unranged fetch.
    #[must_use]
    pub fn ranges(&self) -> Option<&[ByteRange]> {
        match self {
            Self::Unranged => None,
            Self::Ranged { ranges, .. } => Some(ranges),
        }
    }

    /// True when the plan is a single range spanning the whole resource.
    #[must_use]
    pub fn is_single_full_range(&self) -> bool {
        matches!(self, Self::Ranged { total_size, ranges }
            if ranges.len() == 1 && ranges[0].start == 0 && ranges[0].len() == *total_size)
    }
}

/// Computes how many workers a resource of `total_size` bytes gets.
///
/// Zero limits are treated as one.
#[must_use]
pub fn worker_count(total_size: u64, max_workers: usize, min_bytes_per_worker: u64) -> usize {
    let wanted = total_size.div_ceil(min_bytes_per_worker.max(1));
    let cap = u64::try_from(max_workers.max(1)).unwrap_or(u64::MAX);
    let count = wanted.clamp(1, cap);
    usize::try_from(count).unwrap_or(usize::MAX)
}

/// Plans the fetch for a resource of `total_size` bytes (0 meaning unknown).
#[must_use]
pub fn plan(total_size: u64, max_workers: usize, min_bytes_per_worker: u64) -> FetchPlan {
    if total_size == 0 {
        debug!("resource size unknown; planning single unranged fetch");
        return FetchPlan::Unranged;
    }

    let count = worker_count(total_size, max_workers, min_bytes_per_worker);
    let total = u128::from(total_size);
    let workers = count as u128;
    let boundary = |i: u128| -> u64 {
        // i * total / workers <= total, which fits in u64.
        u64::try_from(i * total / workers).unwrap_or(total_size)
    };

    let ranges = (0..workers)
        .map(|i| ByteRange::new(boundary(i), boundary(i + 1) - 1))
        .collect::<Vec<_>>();

    debug!(total_size, workers = count, "planned ranged fetch");
    FetchPlan::Ranged { total_size, ranges }
}
