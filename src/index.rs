//! Static index over segment boundaries.
//!
//! One separator per segment: the segment's minimum key, or for an empty
//! segment the separator of the next non-empty one (`i64::MAX` when none
//! follows). Separators are therefore non-decreasing and a binary search
//! maps a key to the only segment that can hold it.

#[derive(Debug, Clone)]
pub struct StaticIndex {
    separators: Vec<i64>,
    /// Last segment holding at least one element.
    last_occupied: Option<usize>,
}

impl StaticIndex {
    /// An index over `segments` empty segments.
    pub fn new(segments: usize) -> Self {
        Self {
            separators: vec![i64::MAX; segments],
            last_occupied: None,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.separators.len()
    }

    /// Separator of `segment`.
    #[inline]
    pub fn separator(&self, segment: usize) -> i64 {
        self.separators[segment]
    }

    /// Candidate segment for `key`: the last segment whose separator is at
    /// most `key`, never past the last occupied segment. Keys below every
    /// separator map to segment 0.
    pub fn locate(&self, key: i64) -> usize {
        let idx = self
            .separators
            .partition_point(|&sep| sep <= key)
            .saturating_sub(1);
        match self.last_occupied {
            Some(last) => idx.min(last),
            None => 0,
        }
    }

    /// Recompute the separators of `start..end` from `min_key`, which
    /// returns a segment's minimum key or `None` when it is empty. Empty
    /// segments preceding the range are fixed up as well.
    pub fn refresh(&mut self, start: usize, end: usize, min_key: impl Fn(usize) -> Option<i64>) {
        debug_assert!(start < end && end <= self.len());
        let mut next = self.separators.get(end).copied().unwrap_or(i64::MAX);
        for segment in (start..end).rev() {
            let sep = min_key(segment).unwrap_or(next);
            self.separators[segment] = sep;
            next = sep;
        }
        for segment in (0..start).rev() {
            if min_key(segment).is_some() {
                break;
            }
            self.separators[segment] = next;
        }

        // The occupied tail may have moved into, or out of, the range.
        let mut last = self.last_occupied.map_or(end - 1, |l| l.max(end - 1));
        loop {
            if min_key(last).is_some() {
                self.last_occupied = Some(last);
                break;
            }
            if last == 0 {
                self.last_occupied = None;
                break;
            }
            last -= 1;
        }
    }
}
