//! Weight intervals: recent insertion activity over a window's elements.
//!
//! An interval covers the element ranks `start..end` of the window being
//! rebalanced (the pending insert counted) and carries the heat recorded for
//! that stretch. The intervals of a window are contiguous, ordered, and
//! cover `0..cardinality` exactly.

use smallvec::SmallVec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeightInterval {
    pub start: usize,
    pub end: usize,
    pub weight: u64,
    /// Segment the elements came from, when they came from a single one.
    pub origin: Option<usize>,
}

impl WeightInterval {
    #[inline]
    pub fn len(&self) -> usize {
        self.end - self.start
    }
}

pub type Intervals = SmallVec<[WeightInterval; 16]>;

/// Builds a covering interval list one stretch at a time.
#[derive(Debug, Default)]
pub struct WeightsBuilder {
    intervals: Intervals,
    position: usize,
}

impl WeightsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the next `len` elements with the given heat. Empty stretches
    /// are dropped and consecutive cold stretches are coalesced.
    pub fn push(&mut self, len: usize, weight: u64, origin: Option<usize>) {
        if len == 0 {
            return;
        }
        let start = self.position;
        self.position += len;
        if weight == 0 {
            if let Some(last) = self.intervals.last_mut() {
                if last.weight == 0 {
                    last.end = self.position;
                    if last.origin != origin {
                        last.origin = None;
                    }
                    return;
                }
            }
        }
        self.intervals.push(WeightInterval {
            start,
            end: self.position,
            weight,
            origin,
        });
    }

    /// Total elements covered so far.
    pub fn cardinality(&self) -> usize {
        self.position
    }

    pub fn finish(self) -> Intervals {
        self.intervals
    }
}

/// Sum of the weights.
pub fn total_weight(intervals: &[WeightInterval]) -> u64 {
    intervals.iter().map(|w| w.weight).sum()
}

/// Panics unless `intervals` are ordered, contiguous and cover
/// `0..cardinality`.
pub fn assert_coverage(intervals: &[WeightInterval], cardinality: usize) {
    let mut expected = 0;
    for w in intervals {
        assert!(
            w.start == expected && w.end > w.start,
            "malformed weight intervals: {w:?} does not continue at {expected}"
        );
        expected = w.end;
    }
    assert_eq!(
        expected, cardinality,
        "weight intervals cover {expected} elements, expected {cardinality}"
    );
}

/// Split `intervals` at element rank `at`. The right half is rebased to
/// start at zero; an interval straddling the cut passes on a share of its
/// weight proportional to the elements on each side.
pub fn split_at(intervals: &[WeightInterval], at: usize) -> (Intervals, Intervals) {
    let mut left = Intervals::new();
    let mut right = Intervals::new();
    for w in intervals {
        if w.end <= at {
            left.push(*w);
        } else if w.start >= at {
            right.push(WeightInterval {
                start: w.start - at,
                end: w.end - at,
                ..*w
            });
        } else {
            let left_len = (at - w.start) as u128;
            let left_weight = (w.weight as u128 * left_len / w.len() as u128) as u64;
            left.push(WeightInterval {
                start: w.start,
                end: at,
                weight: left_weight,
                origin: w.origin,
            });
            right.push(WeightInterval {
                start: 0,
                end: w.end - at,
                weight: w.weight - left_weight,
                origin: w.origin,
            });
        }
    }
    (left, right)
}
