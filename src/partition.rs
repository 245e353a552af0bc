//! Splitting the outer (scan position) axis into balanced work ranges

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;

/// Half-open interval `[start, stop)` over one axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexRange {
    pub start: usize,
    pub stop: usize,
}

impl IndexRange {
    #[must_use]
    pub const fn new(start: usize, stop: usize) -> Self {
        Self { start, stop }
    }

    /// The full extent `[0, len)`
    #[must_use]
    pub const fn full(len: usize) -> Self {
        Self { start: 0, stop: len }
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.stop.saturating_sub(self.start)
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.stop <= self.start
    }

    #[must_use]
    pub const fn contains(&self, index: usize) -> bool {
        index >= self.start && index < self.stop
    }

    #[must_use]
    pub const fn as_range(&self) -> Range<usize> {
        self.start..self.stop
    }
}

impl From<Range<usize>> for IndexRange {
    fn from(range: Range<usize>) -> Self {
        Self::new(range.start, range.end)
    }
}

impl fmt::Display for IndexRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.stop)
    }
}

/// The unit of work a worker failure is attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkUnit {
    /// Contiguous range of outer positions
    Range(IndexRange),
    /// Single outer position
    Index(usize),
    /// Detector tile (row range, column range)
    Tile(IndexRange, IndexRange),
}

impl fmt::Display for WorkUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkUnit::Range(r) => write!(f, "range {}", r),
            WorkUnit::Index(i) => write!(f, "index {}", i),
            WorkUnit::Tile(rows, cols) => write!(f, "tile rows {} cols {}", rows, cols),
        }
    }
}

/// Split `[0, n)` into `parts` contiguous ranges.
///
/// Every range holds `n / parts` elements except the last, which also takes
/// the remainder. `parts` is clamped to `1..=n`; `n == 0` yields no ranges.
#[must_use]
pub fn partition(n: usize, parts: usize) -> Vec<IndexRange> {
    partition_span(IndexRange::full(n), parts)
}

/// Same as [`partition`] but over an arbitrary span.
#[must_use]
pub fn partition_span(span: IndexRange, parts: usize) -> Vec<IndexRange> {
    let n = span.len();
    if n == 0 {
        return Vec::new();
    }
    let parts = parts.clamp(1, n);
    if parts == 1 {
        return vec![span];
    }

    let base = n / parts;
    let mut ranges: Vec<IndexRange> = (0..parts)
        .map(|i| IndexRange::new(span.start + i * base, span.start + (i + 1) * base))
        .collect();
    if let Some(last) = ranges.last_mut() {
        last.stop = span.stop;
    }
    ranges
}

/// Partition the two leading inner axes independently.
///
/// Used when parallelizing over detector pixels instead of scan positions.
/// When `roi` is given (one range per inner axis) only the ROI span of each
/// axis is partitioned.
#[must_use]
pub fn partition_inner(
    inner_shape: &[usize],
    parts: usize,
    roi: Option<&[IndexRange]>,
) -> (Vec<IndexRange>, Vec<IndexRange>) {
    let span = |axis: usize| -> IndexRange {
        roi.and_then(|r| r.get(axis).copied())
            .unwrap_or_else(|| IndexRange::full(inner_shape.get(axis).copied().unwrap_or(0)))
    };
    (
        partition_span(span(0), parts),
        partition_span(span(1), parts),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check_cover(n: usize, parts: usize) {
        let ranges = partition(n, parts);
        assert_eq!(ranges.len(), parts.min(n));
        assert_eq!(ranges.first().unwrap().start, 0);
        assert_eq!(ranges.last().unwrap().stop, n);
        for pair in ranges.windows(2) {
            assert_eq!(pair[0].stop, pair[1].start);
        }
        let sizes: Vec<usize> = ranges.iter().map(IndexRange::len).collect();
        let max = *sizes.iter().max().unwrap();
        let min = *sizes.iter().min().unwrap();
        assert!(max - min <= n % ranges.len());
    }

    #[test]
    fn test_partition_covers_exactly() {
        for n in 1..60 {
            for parts in 1..=n {
                check_cover(n, parts);
            }
        }
    }

    #[test]
    fn test_single_worker_fast_path() {
        assert_eq!(partition(17, 1), vec![IndexRange::new(0, 17)]);
    }

    #[test]
    fn test_remainder_goes_to_last_range() {
        let ranges = partition(10, 3);
        assert_eq!(
            ranges,
            vec![
                IndexRange::new(0, 3),
                IndexRange::new(3, 6),
                IndexRange::new(6, 10)
            ]
        );
    }

    #[test]
    fn test_more_workers_than_positions_is_clamped() {
        let ranges = partition(3, 8);
        assert_eq!(ranges.len(), 3);
        assert!(ranges.iter().all(|r| r.len() == 1));
        assert!(partition(0, 4).is_empty());
    }

    #[test]
    fn test_partition_inner_respects_roi() {
        let roi = [IndexRange::new(2, 10), IndexRange::new(0, 5)];
        let (rows, cols) = partition_inner(&[16, 16], 2, Some(&roi));
        assert_eq!(rows, vec![IndexRange::new(2, 6), IndexRange::new(6, 10)]);
        assert_eq!(cols, vec![IndexRange::new(0, 2), IndexRange::new(2, 5)]);

        let (rows, cols) = partition_inner(&[4, 6], 4, None);
        assert_eq!(rows.len(), 4);
        assert_eq!(cols.last().unwrap().stop, 6);
    }
}
