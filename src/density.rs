//! Density thresholds of the calibrator tree.
//!
//! Height 0 is a single segment, height `h` a window of `2^h` segments. The
//! leaf has the widest range; moving towards the root the lower threshold
//! rises and the upper threshold falls, linearly in the height. This is what
//! lets a rebalanced window hand every child a load inside the child's own
//! range.

use crate::config::DensityConfig;

// Absorbs representation error in `threshold * slots` before rounding.
const EPSILON: f64 = 1e-9;

/// Cached `[lower(h), upper(h)]` for every height of one tree shape.
#[derive(Debug, Clone)]
pub struct DensityBounds {
    lower: Vec<f64>,
    upper: Vec<f64>,
}

impl DensityBounds {
    /// Compute the thresholds for a tree whose root sits at `root_height`.
    pub fn new(config: &DensityConfig, root_height: usize) -> Self {
        let mut lower = Vec::with_capacity(root_height + 1);
        let mut upper = Vec::with_capacity(root_height + 1);
        for h in 0..=root_height {
            if root_height == 0 {
                lower.push(config.leaf_lower);
                upper.push(config.leaf_upper);
                continue;
            }
            if h == root_height {
                lower.push(config.root_lower);
                upper.push(config.root_upper);
                continue;
            }
            let t = h as f64 / root_height as f64;
            lower.push(config.leaf_lower + (config.root_lower - config.leaf_lower) * t);
            upper.push(config.leaf_upper - (config.leaf_upper - config.root_upper) * t);
        }
        Self { lower, upper }
    }

    /// Height of the root node.
    #[inline]
    pub fn root_height(&self) -> usize {
        self.lower.len() - 1
    }

    /// `(lower, upper)` density for a node at `height`.
    ///
    /// # Panics
    /// Panics if `height` exceeds the root height.
    #[inline]
    pub fn bounds(&self, height: usize) -> (f64, f64) {
        assert!(
            height <= self.root_height(),
            "height {height} above root height {}",
            self.root_height()
        );
        (self.lower[height], self.upper[height])
    }

    /// Largest element count a node at `height` spanning `segments`
    /// segments may hold. When `fill_segments` is false every segment keeps
    /// one slot free.
    pub fn max_load(
        &self,
        height: usize,
        segments: usize,
        segment_capacity: usize,
        fill_segments: bool,
    ) -> usize {
        let (_, upper) = self.bounds(height);
        let slots = segments * segment_capacity;
        let by_density = (upper * slots as f64 + EPSILON).floor() as usize;
        by_density.min(segments * usable_capacity(segment_capacity, fill_segments))
    }

    /// Smallest element count a node at `height` spanning `segments`
    /// segments should hold.
    pub fn min_load(&self, height: usize, segments: usize, segment_capacity: usize) -> usize {
        let (lower, _) = self.bounds(height);
        let slots = segments * segment_capacity;
        (lower * slots as f64 - EPSILON).ceil().max(0.0) as usize
    }
}

/// Slots of a segment a rebalance may fill.
#[inline]
pub fn usable_capacity(segment_capacity: usize, fill_segments: bool) -> usize {
    if fill_segments {
        segment_capacity
    } else {
        segment_capacity - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_level_uses_leaf_bounds() {
        let d = DensityBounds::new(&DensityConfig::default(), 0);
        assert_eq!(d.root_height(), 0);
        assert_eq!(d.bounds(0), (0.08, 1.0));
    }

    #[test]
    fn test_monotone_and_ordered() {
        let config = DensityConfig::default();
        for root in 1..12 {
            let d = DensityBounds::new(&config, root);
            for h in 0..=root {
                let (lo, hi) = d.bounds(h);
                assert!(lo > 0.0 && hi <= 1.0);
                assert!(lo < hi);
                if h > 0 {
                    let (plo, phi) = d.bounds(h - 1);
                    assert!(lo > plo, "lower must rise with height");
                    assert!(hi < phi, "upper must fall with height");
                }
            }
            assert_eq!(d.bounds(root), (config.root_lower, config.root_upper));
        }
    }

    #[test]
    fn test_loads() {
        let d = DensityBounds::new(&DensityConfig::default(), 2);
        // Root: 4 segments of 8 slots at 0.75.
        assert_eq!(d.max_load(2, 4, 8, true), 24);
        // Leaf: upper 1.0, capped by the reserved slot.
        assert_eq!(d.max_load(0, 1, 8, true), 8);
        assert_eq!(d.max_load(0, 1, 8, false), 7);
        // 0.30 * 32 = 9.6
        assert_eq!(d.min_load(2, 4, 8), 10);
    }

    #[test]
    #[should_panic(expected = "above root height")]
    fn test_height_out_of_range() {
        let d = DensityBounds::new(&DensityConfig::default(), 1);
        let _ = d.bounds(2);
    }
}
