//! Segmented slot arrays.
//!
//! Keys and values live in two parallel arrays of `segments *
//! segment_capacity` slots. Every segment keeps its elements packed at its
//! start, in key order; `sizes` says how many slots of each are occupied.

use crate::rebalance::Partition;
use crate::rewiring::ExtentArray;

#[derive(Debug)]
pub struct Storage {
    pub(crate) keys: ExtentArray,
    pub(crate) values: ExtentArray,
    pub(crate) sizes: Vec<usize>,
    segment_capacity: usize,
    cardinality: usize,
}

impl Storage {
    pub fn new(segments: usize, segment_capacity: usize, rewiring: bool) -> Self {
        let slots = segments * segment_capacity;
        Self {
            keys: ExtentArray::new(slots, segment_capacity, rewiring),
            values: ExtentArray::new(slots, segment_capacity, rewiring),
            sizes: vec![0; segments],
            segment_capacity,
            cardinality: 0,
        }
    }

    /// Fresh storage of `segments` segments filled with `entries` laid out
    /// per `partition`.
    ///
    /// # Panics
    /// Panics if the number of entries differs from the partition total.
    pub fn from_sorted(
        segments: usize,
        segment_capacity: usize,
        rewiring: bool,
        partition: &Partition,
        entries: impl IntoIterator<Item = (i64, i64)>,
    ) -> Self {
        assert_eq!(partition.len(), segments, "partition does not match segment count");
        let mut storage = Self::new(segments, segment_capacity, rewiring);
        let mut entries = entries.into_iter();
        {
            let keys = storage.keys.as_mut_slice();
            let values = storage.values.as_mut_slice();
            for (segment, &count) in partition.as_slice().iter().enumerate() {
                let base = segment * segment_capacity;
                for slot in base..base + count {
                    let Some((k, v)) = entries.next() else {
                        panic!("ran out of entries filling segment {segment}");
                    };
                    keys[slot] = k;
                    values[slot] = v;
                }
            }
        }
        assert!(entries.next().is_none(), "more entries than the partition holds");
        storage.sizes.copy_from_slice(partition.as_slice());
        storage.cardinality = partition.total();
        storage
    }

    #[inline]
    pub fn segments(&self) -> usize {
        self.sizes.len()
    }

    #[inline]
    pub fn segment_capacity(&self) -> usize {
        self.segment_capacity
    }

    #[inline]
    pub fn cardinality(&self) -> usize {
        self.cardinality
    }

    #[inline]
    pub fn size(&self, segment: usize) -> usize {
        self.sizes[segment]
    }

    /// Elements held by `segments` consecutive segments from `start`.
    pub fn count(&self, start: usize, segments: usize) -> usize {
        self.sizes[start..start + segments].iter().sum()
    }

    /// Occupied keys of `segment`.
    #[inline]
    pub fn keys(&self, segment: usize) -> &[i64] {
        let base = segment * self.segment_capacity;
        &self.keys.as_slice()[base..base + self.sizes[segment]]
    }

    /// Occupied values of `segment`.
    #[inline]
    pub fn values(&self, segment: usize) -> &[i64] {
        let base = segment * self.segment_capacity;
        &self.values.as_slice()[base..base + self.sizes[segment]]
    }

    #[inline]
    pub fn min_key(&self, segment: usize) -> Option<i64> {
        self.keys(segment).first().copied()
    }

    /// Position of `key` in `segment`: `Ok` when present, `Err` with the
    /// insertion point otherwise.
    #[inline]
    pub fn search(&self, segment: usize, key: i64) -> Result<usize, usize> {
        self.keys(segment).binary_search(&key)
    }

    pub fn set_value(&mut self, segment: usize, position: usize, value: i64) -> i64 {
        debug_assert!(position < self.sizes[segment]);
        let slot = segment * self.segment_capacity + position;
        std::mem::replace(&mut self.values.as_mut_slice()[slot], value)
    }

    /// Insert at `position` of a segment with a free slot, shifting the
    /// tail one slot right.
    pub fn insert_at(&mut self, segment: usize, position: usize, key: i64, value: i64) {
        let size = self.sizes[segment];
        assert!(size < self.segment_capacity, "segment {segment} is full");
        debug_assert!(position <= size);
        let base = segment * self.segment_capacity;
        let (from, to) = (base + position, base + size);

        let keys = self.keys.as_mut_slice();
        keys.copy_within(from..to, from + 1);
        keys[from] = key;
        let values = self.values.as_mut_slice();
        values.copy_within(from..to, from + 1);
        values[from] = value;

        self.sizes[segment] += 1;
        self.cardinality += 1;
    }

    /// Record the outcome of a spread over `start..start + partition.len()`.
    pub(crate) fn apply_partition(&mut self, start: usize, partition: &Partition, inserted: bool) {
        self.sizes[start..start + partition.len()].copy_from_slice(partition.as_slice());
        if inserted {
            self.cardinality += 1;
        }
    }

    /// All entries in key order.
    pub fn entries(&self) -> impl Iterator<Item = (i64, i64)> + '_ {
        (0..self.segments()).flat_map(move |s| {
            self.keys(s)
                .iter()
                .copied()
                .zip(self.values(s).iter().copied())
        })
    }

    pub fn memory_usage(&self) -> usize {
        self.keys.memory_usage()
            + self.values.memory_usage()
            + self.sizes.capacity() * std::mem::size_of::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_at_shifts_tail() {
        let mut s = Storage::new(2, 4, false);
        s.insert_at(1, 0, 20, 200);
        s.insert_at(1, 0, 10, 100);
        s.insert_at(1, 2, 30, 300);
        s.insert_at(1, 1, 15, 150);
        assert_eq!(s.keys(1), &[10, 15, 20, 30]);
        assert_eq!(s.values(1), &[100, 150, 200, 300]);
        assert_eq!(s.cardinality(), 4);
        assert_eq!(s.min_key(0), None);
        assert_eq!(s.search(1, 20), Ok(2));
        assert_eq!(s.search(1, 25), Err(3));
    }

    #[test]
    #[should_panic(expected = "is full")]
    fn test_insert_into_full_segment() {
        let mut s = Storage::new(1, 4, false);
        for k in 0..5 {
            s.insert_at(0, k, k as i64, 0);
        }
    }

    #[test]
    fn test_from_sorted_follows_partition() {
        let p = Partition::new(vec![2, 0, 3, 1]);
        let s = Storage::from_sorted(4, 4, false, &p, (1..=6).map(|k| (k, -k)));
        assert_eq!(s.keys(0), &[1, 2]);
        assert!(s.keys(1).is_empty());
        assert_eq!(s.keys(2), &[3, 4, 5]);
        assert_eq!(s.values(3), &[-6]);
        assert_eq!(s.count(1, 2), 3);
        assert_eq!(s.entries().map(|(k, _)| k).collect::<Vec<_>>(), vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    #[should_panic(expected = "ran out of entries")]
    fn test_from_sorted_short_input() {
        let p = Partition::new(vec![2, 2]);
        let _ = Storage::from_sorted(2, 4, false, &p, [(1, 1), (2, 2), (3, 3)]);
    }

    #[test]
    fn test_set_value() {
        let mut s = Storage::new(1, 4, false);
        s.insert_at(0, 0, 7, 1);
        assert_eq!(s.set_value(0, 0, 2), 1);
        assert_eq!(s.values(0), &[2]);
    }
}
