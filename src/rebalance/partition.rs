//! Target element counts for the segments of a window.

use std::fmt;
use std::ops::Index;

/// One target cardinality per segment of a window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    cardinalities: Vec<usize>,
}

impl Partition {
    pub fn new(cardinalities: Vec<usize>) -> Self {
        Self { cardinalities }
    }

    /// Number of segments.
    #[inline]
    pub fn len(&self) -> usize {
        self.cardinalities.len()
    }

    /// Elements placed across all segments.
    pub fn total(&self) -> usize {
        self.cardinalities.iter().sum()
    }

    #[inline]
    pub fn as_slice(&self) -> &[usize] {
        &self.cardinalities
    }
}

impl Index<usize> for Partition {
    type Output = usize;

    #[inline]
    fn index(&self, segment: usize) -> &usize {
        &self.cardinalities[segment]
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, c) in self.cardinalities.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{c}")?;
        }
        write!(f, "] (total: {})", self.total())
    }
}

/// Walks a partition element by element: which segment the next output
/// element belongs to, and how much room is left in it.
#[derive(Debug, Clone, Copy, Default)]
pub struct PartitionCursor {
    segment: usize,
    offset: usize,
}

impl PartitionCursor {
    /// Segment currently being filled, relative to the window.
    #[inline]
    pub fn segment(&self) -> usize {
        self.segment
    }

    /// Elements already emitted into the current segment.
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Elements still owed to the current segment.
    #[inline]
    pub fn current(&self, partition: &Partition) -> usize {
        partition
            .as_slice()
            .get(self.segment)
            .map_or(0, |&c| c - self.offset)
    }

    /// Cardinality of the segment after the current one.
    #[inline]
    pub fn next(&self, partition: &Partition) -> usize {
        partition
            .as_slice()
            .get(self.segment + 1)
            .copied()
            .unwrap_or(0)
    }

    /// Advance by `n` emitted elements, skipping over segments that fill up
    /// (empty segments included).
    pub fn move_forwards_by(&mut self, partition: &Partition, mut n: usize) {
        while self.segment < partition.len() {
            let remaining = self.current(partition);
            if n < remaining {
                self.offset += n;
                return;
            }
            n -= remaining;
            self.segment += 1;
            self.offset = 0;
            if n == 0 && self.current(partition) > 0 {
                return;
            }
        }
        assert_eq!(n, 0, "advanced past the end of the partition");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let p = Partition::new(vec![3, 0, 2]);
        assert_eq!(p.to_string(), "[3, 0, 2] (total: 5)");
    }

    #[test]
    fn test_cursor_walks_segments() {
        let p = Partition::new(vec![2, 0, 3, 1]);
        let mut c = PartitionCursor::default();
        assert_eq!(c.current(&p), 2);
        assert_eq!(c.next(&p), 0);

        c.move_forwards_by(&p, 1);
        assert_eq!((c.segment(), c.offset()), (0, 1));
        assert_eq!(c.current(&p), 1);

        // Finishing segment 0 skips the empty segment 1.
        c.move_forwards_by(&p, 1);
        assert_eq!((c.segment(), c.offset()), (2, 0));
        assert_eq!(c.current(&p), 3);
        assert_eq!(c.next(&p), 1);

        c.move_forwards_by(&p, 4);
        assert_eq!(c.segment(), 4);
        assert_eq!(c.current(&p), 0);
    }

    #[test]
    #[should_panic(expected = "past the end")]
    fn test_cursor_overrun() {
        let p = Partition::new(vec![1, 1]);
        let mut c = PartitionCursor::default();
        c.move_forwards_by(&p, 3);
    }
}
