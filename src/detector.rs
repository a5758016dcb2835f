//! Recent-insertion tracking.
//!
//! Every segment carries a heat counter: the number of inserts among the
//! last `history_capacity` that landed in it. The keys themselves sit in a
//! bounded FIFO so the oldest insert can be debited again when it falls out
//! of the history. A rebalance moves elements between segments, so the heat
//! of a window is redistributed along with its contents through
//! [`MoveDetectorInfo`].

use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct Detector {
    heat: Vec<u64>,
    history: VecDeque<i64>,
    capacity: usize,
}

impl Detector {
    pub fn new(segments: usize, capacity: usize) -> Self {
        Self {
            heat: vec![0; segments],
            history: VecDeque::with_capacity(capacity.min(4096)),
            capacity,
        }
    }

    #[inline]
    pub fn heat(&self, segment: usize) -> u64 {
        self.heat[segment]
    }

    /// Heat of the segments `start..end`.
    #[inline]
    pub fn window(&self, start: usize, end: usize) -> &[u64] {
        &self.heat[start..end]
    }

    /// Count an insert landing in `segment`.
    #[inline]
    pub fn touch(&mut self, segment: usize) {
        self.heat[segment] += 1;
    }

    /// Append `key` to the history. Returns the key that fell out, whose
    /// segment the caller must [`debit`](Self::debit).
    pub fn remember(&mut self, key: i64) -> Option<i64> {
        if self.capacity == 0 {
            return None;
        }
        let evicted = if self.history.len() == self.capacity {
            self.history.pop_front()
        } else {
            None
        };
        self.history.push_back(key);
        evicted
    }

    /// Forget one insert into `segment`.
    #[inline]
    pub fn debit(&mut self, segment: usize) {
        self.heat[segment] = self.heat[segment].saturating_sub(1);
    }

    /// Recompute all counters for a new layout of `segments` segments,
    /// mapping every remembered key through `locate`.
    pub fn recount(&mut self, segments: usize, locate: impl Fn(i64) -> usize) {
        self.heat.clear();
        self.heat.resize(segments, 0);
        for &key in &self.history {
            self.heat[locate(key)] += 1;
        }
    }

    /// Keys in the history, oldest first.
    pub fn history(&self) -> impl Iterator<Item = i64> + '_ {
        self.history.iter().copied()
    }

    pub fn segments(&self) -> usize {
        self.heat.len()
    }

    pub fn memory_usage(&self) -> usize {
        self.heat.capacity() * std::mem::size_of::<u64>()
            + self.history.capacity() * std::mem::size_of::<i64>()
    }
}

/// Heat of a window as it lands after a rebalance, accumulated while the
/// partition is computed.
#[derive(Debug, Clone)]
pub struct MoveDetectorInfo {
    window_start: usize,
    heat: Vec<u64>,
    relocated: usize,
}

impl MoveDetectorInfo {
    /// Tracker for the window of `window_length` segments at `window_start`.
    pub fn new(window_start: usize, window_length: usize) -> Self {
        Self {
            window_start,
            heat: vec![0; window_length],
            relocated: 0,
        }
    }

    /// Credit `weight` to `segment` (relative to the window), coming from
    /// absolute segment `origin` when known.
    pub fn record(&mut self, segment: usize, origin: Option<usize>, weight: u64) {
        self.heat[segment] += weight;
        if weight > 0 && origin != Some(self.window_start + segment) {
            self.relocated += 1;
        }
    }

    pub fn heat(&self) -> &[u64] {
        &self.heat
    }

    /// Hot stretches that ended up in a different segment.
    pub fn relocated(&self) -> usize {
        self.relocated
    }

    /// Write the accumulated heat back into `detector`.
    pub fn apply(self, detector: &mut Detector) {
        let end = self.window_start + self.heat.len();
        detector.heat[self.window_start..end].copy_from_slice(&self.heat);
    }
}
