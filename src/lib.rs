//! # pma-rs
//!
//! A packed memory array: an ordered `i64 -> i64` map stored as one sorted
//! array with gaps, split into fixed-size segments.
//!
//! Inserts go into their segment while it has a free slot. A full segment
//! triggers a rebalance of the smallest enclosing window of the calibrator
//! tree whose density stays within bounds. Rebalancing is adaptive: the
//! element counts per segment follow the recent insertion heat, so hot key
//! ranges get more gaps. On Linux the redistributed window is installed by
//! rewiring virtual memory pages instead of copying them.
//!
//! ## Example
//!
//! ```rust
//! use pma_rs::PackedMemoryArray;
//!
//! let mut pma = PackedMemoryArray::new();
//! for k in [5, 6, 1, 3, 2, 10, 4, 11] {
//!     pma.insert(k, k * 10);
//! }
//!
//! assert_eq!(pma.find(3), Some(30));
//! assert_eq!(pma.find(7), None);
//! assert_eq!(pma.range(2, 5).map(|(k, _)| k).collect::<Vec<_>>(), vec![2, 3, 4, 5]);
//! assert_eq!(pma.sum(1, 4).sum_values, 100);
//! ```

#![deny(unsafe_op_in_unsafe_fn)]

pub mod config;
pub mod density;
pub mod detector;
pub mod error;
pub mod index;
pub mod rebalance;
pub mod rewiring;
pub mod storage;

use std::fmt;
use std::iter::FusedIterator;

pub use config::{Config, DensityConfig};
pub use error::{Error, Result};

use density::DensityBounds;
use detector::{Detector, MoveDetectorInfo};
use index::StaticIndex;
use rebalance::{AdaptiveRebalancing, WeightsBuilder};
use rewiring::SpreadWithRewiring;
use storage::Storage;

// =============================================================================
// Results and counters
// =============================================================================

/// Aggregate over a closed key interval, see [`PackedMemoryArray::sum`].
///
/// All fields are zero when the interval holds no element. Sums wrap on
/// overflow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SumResult {
    pub first_key: i64,
    pub last_key: i64,
    pub num_elements: u64,
    pub sum_keys: i64,
    pub sum_values: i64,
}

/// Counters of the maintenance work done so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    /// Windows rebalanced by an insert.
    pub rebalances: u64,
    /// Full rebuilds that changed the number of segments.
    pub resizes: u64,
    /// Extents installed by remapping memory.
    pub rewired_extents: u64,
    /// Extents written in place or copied over from scratch.
    pub copied_extents: u64,
    /// Hot stretches that moved to another segment during rebalances.
    pub relocated: u64,
}

// =============================================================================
// PackedMemoryArray
// =============================================================================

/// An ordered map from `i64` keys to `i64` values with adaptive rebalancing.
pub struct PackedMemoryArray {
    config: Config,
    storage: Storage,
    index: StaticIndex,
    detector: Detector,
    bounds: DensityBounds,
    stats: Stats,
}

impl PackedMemoryArray {
    /// An empty array with the default configuration.
    pub fn new() -> Self {
        Self::from_validated(Config::default())
    }

    /// An empty array with the given configuration.
    pub fn with_config(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_validated(config))
    }

    fn from_validated(config: Config) -> Self {
        let segments = config.initial_segments;
        Self {
            storage: Storage::new(segments, config.segment_capacity, config.rewiring),
            index: StaticIndex::new(segments),
            detector: Detector::new(segments, config.history_capacity),
            bounds: DensityBounds::new(&config.density, tree_height(segments)),
            stats: Stats::default(),
            config,
        }
    }

    /// Number of elements.
    #[inline]
    pub fn len(&self) -> usize {
        self.storage.cardinality()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total number of slots.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.segment_count() * self.segment_capacity()
    }

    #[inline]
    pub fn segment_count(&self) -> usize {
        self.storage.segments()
    }

    #[inline]
    pub fn segment_capacity(&self) -> usize {
        self.storage.segment_capacity()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn stats(&self) -> Stats {
        self.stats
    }

    pub fn memory_usage(&self) -> usize {
        self.storage.memory_usage()
            + self.index.len() * std::mem::size_of::<i64>()
            + self.detector.memory_usage()
    }

    /// Value stored under `key`.
    pub fn find(&self, key: i64) -> Option<i64> {
        let segment = self.index.locate(key);
        self.storage
            .search(segment, key)
            .ok()
            .map(|pos| self.storage.values(segment)[pos])
    }

    pub fn contains_key(&self, key: i64) -> bool {
        self.find(key).is_some()
    }

    /// Insert `key`, or update its value when already present. Returns the
    /// previous value.
    pub fn insert(&mut self, key: i64, value: i64) -> Option<i64> {
        loop {
            let segment = self.index.locate(key);
            let position = match self.storage.search(segment, key) {
                Ok(pos) => return Some(self.storage.set_value(segment, pos, value)),
                Err(pos) => pos,
            };

            if self.storage.size(segment) < self.storage.segment_capacity() {
                self.detector.touch(segment);
                self.storage.insert_at(segment, position, key, value);
                if position == 0 {
                    self.refresh_index(segment, segment + 1);
                }
                self.remember(key);
                return None;
            }

            if let Some((start, length)) = self.find_window(segment) {
                self.rebalance(start, length, segment, key, value);
                self.remember(key);
                return None;
            }

            self.rebuild(self.storage.segments() * 2, &[]);
        }
    }

    /// Insert a batch of pairs in one pass. Later pairs win over earlier
    /// ones with the same key; keys already present are updated in place.
    pub fn load(&mut self, batch: &[(i64, i64)]) {
        let mut sorted = batch.to_vec();
        sorted.sort_by_key(|&(k, _)| k);
        let mut deduped: Vec<(i64, i64)> = Vec::with_capacity(sorted.len());
        for (k, v) in sorted {
            match deduped.last_mut() {
                Some(last) if last.0 == k => last.1 = v,
                _ => deduped.push((k, v)),
            }
        }

        let mut fresh = Vec::with_capacity(deduped.len());
        for (k, v) in deduped {
            let segment = self.index.locate(k);
            match self.storage.search(segment, k) {
                Ok(pos) => {
                    self.storage.set_value(segment, pos, v);
                }
                Err(_) => fresh.push((k, v)),
            }
        }
        if fresh.is_empty() {
            return;
        }

        for &(k, _) in &fresh {
            // Heat is recounted from the history by the rebuild.
            let _ = self.detector.remember(k);
        }
        tracing::debug!(
            target: "pma::resize",
            batch = batch.len(),
            inserted = fresh.len(),
            "bulk load"
        );
        self.rebuild(self.storage.segments(), &fresh);
    }

    /// Redistribute all elements over the segments in one adaptive pass,
    /// filling segments completely where the heat allows.
    pub fn build(&mut self) {
        tracing::debug!(target: "pma::resize", elements = self.len(), "full rebuild");
        self.rebuild(self.storage.segments(), &[]);
    }

    /// Elements with keys in `min..=max`, in key order.
    pub fn range(&self, min: i64, max: i64) -> Range<'_> {
        let segments = self.storage.segments();
        if min > max || self.is_empty() {
            return Range {
                pma: self,
                segment: segments,
                position: 0,
                max,
            };
        }
        let segment = self.index.locate(min);
        let position = self.storage.keys(segment).partition_point(|&k| k < min);
        Range {
            pma: self,
            segment,
            position,
            max,
        }
    }

    /// All elements in key order.
    pub fn iter(&self) -> Range<'_> {
        self.range(i64::MIN, i64::MAX)
    }

    /// Aggregate the elements with keys in `min..=max`.
    pub fn sum(&self, min: i64, max: i64) -> SumResult {
        let mut result = SumResult::default();
        for (k, v) in self.range(min, max) {
            if result.num_elements == 0 {
                result.first_key = k;
            }
            result.last_key = k;
            result.num_elements += 1;
            result.sum_keys = result.sum_keys.wrapping_add(k);
            result.sum_values = result.sum_values.wrapping_add(v);
        }
        result
    }

    /// Smallest element.
    pub fn first(&self) -> Result<(i64, i64)> {
        self.iter().next().ok_or(Error::Empty)
    }

    /// Largest element.
    pub fn last(&self) -> Result<(i64, i64)> {
        (0..self.storage.segments())
            .rev()
            .find_map(|s| {
                let keys = self.storage.keys(s);
                let values = self.storage.values(s);
                keys.last().copied().zip(values.last().copied())
            })
            .ok_or(Error::Empty)
    }

    /// Element of the given rank, counting from zero.
    pub fn entry_at(&self, rank: usize) -> Result<(i64, i64)> {
        if rank >= self.len() {
            return Err(Error::OutOfRange {
                index: rank,
                len: self.len(),
            });
        }
        let mut remaining = rank;
        for s in 0..self.storage.segments() {
            let size = self.storage.size(s);
            if remaining < size {
                return Ok((
                    self.storage.keys(s)[remaining],
                    self.storage.values(s)[remaining],
                ));
            }
            remaining -= size;
        }
        unreachable!("segment sizes add up to the length")
    }

    // -------------------------------------------------------------------------
    // Maintenance
    // -------------------------------------------------------------------------

    /// Smallest window around `segment` that can take one more element.
    fn find_window(&self, segment: usize) -> Option<(usize, usize)> {
        let cap = self.storage.segment_capacity();
        for height in 1..=self.bounds.root_height() {
            let length = 1usize << height;
            let start = segment & !(length - 1);
            let cardinality = self.storage.count(start, length) + 1;
            if cardinality <= self.bounds.max_load(height, length, cap, false) {
                return Some((start, length));
            }
        }
        None
    }

    /// Spread the window `start..start + length` with `key` merged in.
    fn rebalance(&mut self, start: usize, length: usize, segment: usize, key: i64, value: i64) {
        self.detector.touch(segment);

        let mut weights = WeightsBuilder::new();
        for s in start..start + length {
            let len = self.storage.size(s) + usize::from(s == segment);
            weights.push(len, self.detector.heat(s), Some(s));
        }
        let cardinality = weights.cardinality();
        let balance = if segment - start < length / 2 { -1 } else { 1 };

        let mut info = MoveDetectorInfo::new(start, length);
        let partition = AdaptiveRebalancing::new(
            &self.bounds,
            self.storage.segment_capacity(),
            weights.finish(),
            balance,
            length,
            cardinality,
            Some(&mut info),
            false,
        )
        .release();

        let mut spread = SpreadWithRewiring::new(&mut self.storage, start, length, &partition);
        spread.set_element_to_insert(key, value);
        spread.execute();
        let landing = spread.insert_segment();
        let installs = spread.stats();

        let relocated = info.relocated();
        info.apply(&mut self.detector);
        self.refresh_index(start, start + length);

        self.stats.rebalances += 1;
        self.stats.rewired_extents += installs.rewired as u64;
        self.stats.copied_extents += installs.copied as u64;
        self.stats.relocated += relocated as u64;
        tracing::trace!(
            target: "pma::rebalance",
            window_start = start,
            window_length = length,
            cardinality,
            landing = ?landing,
            relocated,
            partition = %partition,
            "rebalanced window"
        );
    }

    /// Rebuild all storage with at least `min_segments` segments, merging in
    /// `extra`, which must be sorted and hold keys not present yet.
    fn rebuild(&mut self, min_segments: usize, extra: &[(i64, i64)]) {
        let cap = self.storage.segment_capacity();
        let cardinality = self.len() + extra.len();
        let mut segments = min_segments;
        let bounds = loop {
            let bounds = DensityBounds::new(&self.config.density, tree_height(segments));
            if cardinality <= bounds.max_load(bounds.root_height(), segments, cap, true) {
                break bounds;
            }
            segments *= 2;
        };

        let old_segments = self.storage.segments();
        let mut extra_per_segment = vec![0usize; old_segments];
        for &(k, _) in extra {
            extra_per_segment[self.index.locate(k)] += 1;
        }
        let mut weights = WeightsBuilder::new();
        for (s, &added) in extra_per_segment.iter().enumerate() {
            weights.push(self.storage.size(s) + added, self.detector.heat(s), Some(s));
        }

        let partition = AdaptiveRebalancing::new(
            &bounds,
            cap,
            weights.finish(),
            0,
            segments,
            cardinality,
            None,
            true,
        )
        .release();

        let storage = Storage::from_sorted(
            segments,
            cap,
            self.config.rewiring,
            &partition,
            merge_sorted(self.storage.entries(), extra.iter().copied()),
        );
        self.storage = storage;
        self.bounds = bounds;
        self.index = StaticIndex::new(segments);
        self.refresh_index(0, segments);
        let index = &self.index;
        self.detector.recount(segments, |k| index.locate(k));

        if segments != old_segments {
            self.stats.resizes += 1;
            tracing::debug!(
                target: "pma::resize",
                from = old_segments,
                to = segments,
                elements = cardinality,
                "resized"
            );
        }
    }

    fn refresh_index(&mut self, start: usize, end: usize) {
        let storage = &self.storage;
        self.index.refresh(start, end, |s| storage.min_key(s));
    }

    fn remember(&mut self, key: i64) {
        if let Some(evicted) = self.detector.remember(key) {
            let segment = self.index.locate(evicted);
            self.detector.debit(segment);
        }
    }
}

impl Default for PackedMemoryArray {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PackedMemoryArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<'a> IntoIterator for &'a PackedMemoryArray {
    type Item = (i64, i64);
    type IntoIter = Range<'a>;

    fn into_iter(self) -> Range<'a> {
        self.iter()
    }
}

#[inline]
fn tree_height(segments: usize) -> usize {
    debug_assert!(segments.is_power_of_two());
    segments.trailing_zeros() as usize
}

/// Merge two key-ordered streams with disjoint keys.
fn merge_sorted(
    a: impl Iterator<Item = (i64, i64)>,
    b: impl Iterator<Item = (i64, i64)>,
) -> impl Iterator<Item = (i64, i64)> {
    let mut a = a.peekable();
    let mut b = b.peekable();
    std::iter::from_fn(move || match (a.peek(), b.peek()) {
        (Some(x), Some(y)) => {
            if x.0 <= y.0 {
                a.next()
            } else {
                b.next()
            }
        }
        (Some(_), None) => a.next(),
        (None, _) => b.next(),
    })
}

// =============================================================================
// Range iterator
// =============================================================================

/// Iterator over the elements of a key interval, see
/// [`PackedMemoryArray::range`].
pub struct Range<'a> {
    pma: &'a PackedMemoryArray,
    segment: usize,
    position: usize,
    max: i64,
}

impl Iterator for Range<'_> {
    type Item = (i64, i64);

    fn next(&mut self) -> Option<Self::Item> {
        let storage = &self.pma.storage;
        while self.segment < storage.segments() {
            let keys = storage.keys(self.segment);
            if self.position < keys.len() {
                let key = keys[self.position];
                if key > self.max {
                    self.segment = storage.segments();
                    return None;
                }
                let value = storage.values(self.segment)[self.position];
                self.position += 1;
                return Some((key, value));
            }
            self.segment += 1;
            self.position = 0;
        }
        None
    }
}

impl FusedIterator for Range<'_> {}

#[cfg(test)]
mod proptests;
