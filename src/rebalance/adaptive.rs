//! Adaptive weighted partitioning.
//!
//! Decides how many elements each segment of a window receives. The window
//! is bisected along the calibrator tree; at every node the left child gets
//! the elements up to the weighted median of the recent-insertion heat, so
//! a hot stretch ends up spread over more segments and keeps more gaps for
//! the inserts that are likely to follow. Each proposed split is then
//! clamped into the child's density range, so the heuristic never breaks
//! the thresholds the amortized bound relies on.

use crate::density::{usable_capacity, DensityBounds};
use crate::detector::MoveDetectorInfo;
use crate::rebalance::partition::Partition;
use crate::rebalance::weights::{self, Intervals, WeightInterval};

/// Proposed split of a node before the density clamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Optimum {
    left_cardinality: usize,
}

pub struct AdaptiveRebalancing<'a> {
    densities: &'a DensityBounds,
    segment_capacity: usize,
    /// Whether segments may be filled completely or must keep a free slot.
    fill_segments: bool,
    move_detector_info: Option<&'a mut MoveDetectorInfo>,
    cardinalities: Vec<usize>,
    output: Option<Partition>,
}

impl<'a> AdaptiveRebalancing<'a> {
    /// Compute the partition of `cardinality` elements over `num_partitions`
    /// segments.
    ///
    /// `weights` must cover `0..cardinality`. `balance` breaks rounding ties:
    /// negative hands the odd element to the right, otherwise to the left.
    ///
    /// # Panics
    /// Panics if `num_partitions` is not a power of two, the window is taller
    /// than the tree `densities` describes, the elements cannot fit even in
    /// completely usable segments, or `weights` is malformed.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        densities: &'a DensityBounds,
        segment_capacity: usize,
        weights: Intervals,
        balance: i32,
        num_partitions: usize,
        cardinality: usize,
        move_detector_info: Option<&'a mut MoveDetectorInfo>,
        fill_segments: bool,
    ) -> Self {
        assert!(
            num_partitions.is_power_of_two(),
            "number of partitions must be a power of two, got {num_partitions}"
        );
        let height = num_partitions.trailing_zeros() as usize;
        assert!(
            height <= densities.root_height(),
            "window of {num_partitions} segments is taller than the calibrator tree"
        );
        let window_capacity = num_partitions * usable_capacity(segment_capacity, fill_segments);
        assert!(
            cardinality <= window_capacity,
            "cannot place {cardinality} elements in a window with {window_capacity} usable slots"
        );
        weights::assert_coverage(&weights, cardinality);

        let mut this = Self {
            densities,
            segment_capacity,
            fill_segments,
            move_detector_info,
            cardinalities: vec![0; num_partitions],
            output: None,
        };
        this.recursion(0, num_partitions, height, &weights, balance, cardinality);
        let cardinalities = std::mem::take(&mut this.cardinalities);
        this.output = Some(Partition::new(cardinalities));
        this
    }

    /// Hand the computed partition over to the caller.
    ///
    /// # Panics
    /// Panics when called a second time.
    pub fn release(&mut self) -> Partition {
        match self.output.take() {
            Some(partition) => partition,
            None => panic!("partition already released"),
        }
    }

    fn recursion(
        &mut self,
        part_start: usize,
        part_length: usize,
        height: usize,
        weights: &[WeightInterval],
        balance: i32,
        cardinality: usize,
    ) {
        debug_assert_eq!(part_length, 1 << height);
        if part_length == 1 {
            self.emit(part_start, cardinality, weights);
            return;
        }

        let half = part_length / 2;
        let opt = find_optimum(weights, balance, cardinality);
        let left = self.validate_thresholds(height - 1, half, cardinality, opt);
        let (left_weights, right_weights) = weights::split_at(weights, left);
        let child_balance = if 2 * left > cardinality { -1 } else { 1 };

        self.recursion(part_start, half, height - 1, &left_weights, child_balance, left);
        self.recursion(
            part_start + half,
            half,
            height - 1,
            &right_weights,
            child_balance,
            cardinality - left,
        );
    }

    /// Clamp the proposed left cardinality into the range both children can
    /// take at `child_height`. A side of the range that cannot be honored by
    /// both children at once is relaxed: too dense falls back to the hard
    /// segment capacity, too sparse to an even floor.
    fn validate_thresholds(
        &self,
        child_height: usize,
        child_segments: usize,
        cardinality: usize,
        opt: Optimum,
    ) -> usize {
        let cap = self.segment_capacity;
        let hard_max = child_segments * usable_capacity(cap, self.fill_segments);
        let mut max = self
            .densities
            .max_load(child_height, child_segments, cap, self.fill_segments);
        let mut min = self
            .densities
            .min_load(child_height, child_segments, cap)
            .min(max);
        if cardinality > 2 * max {
            max = hard_max;
        }
        if cardinality < 2 * min {
            min = cardinality / 2;
        }

        let lo = min.max(cardinality.saturating_sub(max));
        let hi = max.min(cardinality - min);
        opt.left_cardinality.clamp(lo, hi)
    }

    fn emit(&mut self, segment: usize, cardinality: usize, weights: &[WeightInterval]) {
        let usable = usable_capacity(self.segment_capacity, self.fill_segments);
        assert!(
            cardinality <= usable,
            "segment {segment} assigned {cardinality} elements, only {usable} usable slots"
        );
        self.cardinalities[segment] = cardinality;
        if let Some(info) = self.move_detector_info.as_deref_mut() {
            for w in weights {
                info.record(segment, w.origin, w.weight);
            }
        }
    }
}

/// Split point ignoring the density thresholds: the weighted median of the
/// heat, or an even split when the heat is balanced on an interval boundary
/// or there is none.
fn find_optimum(weights: &[WeightInterval], balance: i32, cardinality: usize) -> Optimum {
    let even = Optimum {
        left_cardinality: even_split(cardinality, balance),
    };
    let total = weights::total_weight(weights);
    if total == 0 {
        return even;
    }

    let mut before = 0u64;
    for (i, w) in weights.iter().enumerate() {
        let after = before + w.weight;
        if 2 * after == total && i + 1 < weights.len() {
            return even;
        }
        if 2 * after >= total && w.weight > 0 {
            // Share of this interval needed to reach half the heat, in
            // half-units to stay integral.
            let needed = (total - 2 * before) as u128;
            let num = w.len() as u128 * needed;
            let den = 2 * w.weight as u128;
            let offset = if balance >= 0 {
                num.div_ceil(den)
            } else {
                num / den
            };
            return Optimum {
                left_cardinality: w.start + offset as usize,
            };
        }
        before = after;
    }
    even
}

#[inline]
fn even_split(cardinality: usize, balance: i32) -> usize {
    if balance >= 0 {
        cardinality.div_ceil(2)
    } else {
        cardinality / 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DensityConfig;
    use crate::rebalance::weights::WeightsBuilder;
    use proptest::prelude::*;

    fn uniform(cardinality: usize) -> Intervals {
        let mut b = WeightsBuilder::new();
        b.push(cardinality, 0, None);
        b.finish()
    }

    fn partition(
        segments: usize,
        cap: usize,
        weights: Intervals,
        balance: i32,
        cardinality: usize,
        fill: bool,
    ) -> Vec<usize> {
        let densities = DensityBounds::new(
            &DensityConfig::default(),
            segments.trailing_zeros() as usize,
        );
        let mut ar = AdaptiveRebalancing::new(
            &densities,
            cap,
            weights,
            balance,
            segments,
            cardinality,
            None,
            fill,
        );
        ar.release().as_slice().to_vec()
    }

    #[test]
    fn test_even_split_without_heat() {
        assert_eq!(partition(4, 8, uniform(10), 0, 10, false), vec![3, 2, 3, 2]);
        assert_eq!(partition(4, 8, uniform(12), 0, 12, false), vec![3, 3, 3, 3]);
    }

    #[test]
    fn test_balance_picks_side_of_odd_element() {
        assert_eq!(partition(2, 8, uniform(7), 1, 7, false), vec![4, 3]);
        assert_eq!(partition(2, 8, uniform(7), 0, 7, false), vec![4, 3]);
        assert_eq!(partition(2, 8, uniform(7), -1, 7, false), vec![3, 4]);
    }

    #[test]
    fn test_median_inside_an_interval() {
        // Half the heat of a single interval is 3.5 of its 7 elements.
        let single = || {
            let mut b = WeightsBuilder::new();
            b.push(7, 3, Some(0));
            b.finish()
        };
        assert_eq!(partition(2, 16, single(), 1, 7, false), vec![4, 3]);
        assert_eq!(partition(2, 16, single(), 0, 7, false), vec![4, 3]);
        assert_eq!(partition(2, 16, single(), -1, 7, false), vec![3, 4]);

        // The median falls 8/3 elements into the hot second interval.
        let skewed = || {
            let mut b = WeightsBuilder::new();
            b.push(4, 1, Some(0));
            b.push(8, 3, Some(1));
            b.finish()
        };
        assert_eq!(partition(2, 16, skewed(), 1, 12, false), vec![7, 5]);
        assert_eq!(partition(2, 16, skewed(), -1, 12, false), vec![6, 6]);
    }

    #[test]
    fn test_single_segment() {
        assert_eq!(partition(1, 8, uniform(7), 0, 7, false), vec![7]);
        assert_eq!(partition(1, 8, uniform(8), 0, 8, true), vec![8]);
        assert_eq!(partition(1, 8, Intervals::new(), 0, 0, true), vec![0]);
    }

    #[test]
    fn test_hot_prefix_gets_more_room() {
        let mut b = WeightsBuilder::new();
        b.push(4, 10, Some(0));
        b.push(36, 0, None);
        let p = partition(8, 8, b.finish(), 0, 40, false);
        assert_eq!(p.iter().sum::<usize>(), 40);
        let left: usize = p[..4].iter().sum();
        let right: usize = p[4..].iter().sum();
        assert!(left < right, "hot half should be sparser: {p:?}");
        assert!(p.iter().all(|&c| c <= 7), "{p:?}");
        // The weighted median (rank 2) is clamped up to the left half's floor.
        assert_eq!(left, 14);
    }

    #[test]
    fn test_heat_balanced_on_boundary_splits_evenly() {
        let mut b = WeightsBuilder::new();
        b.push(6, 3, Some(0));
        b.push(14, 3, Some(1));
        let p = partition(2, 16, b.finish(), 0, 20, false);
        assert_eq!(p, vec![10, 10]);
    }

    #[test]
    fn test_move_detector_info_follows_content() {
        let densities = DensityBounds::new(&DensityConfig::default(), 1);
        let mut b = WeightsBuilder::new();
        b.push(2, 4, Some(0));
        b.push(10, 0, Some(1));
        let mut info = MoveDetectorInfo::new(0, 2);
        let mut ar = AdaptiveRebalancing::new(
            &densities,
            8,
            b.finish(),
            0,
            2,
            12,
            Some(&mut info),
            false,
        );
        let p = ar.release();
        assert_eq!(p.total(), 12);
        drop(ar);
        assert_eq!(info.heat(), &[4, 0]);
        assert_eq!(info.relocated(), 0);
    }

    #[test]
    #[should_panic(expected = "already released")]
    fn test_double_release() {
        let densities = DensityBounds::new(&DensityConfig::default(), 1);
        let mut ar =
            AdaptiveRebalancing::new(&densities, 8, uniform(4), 0, 2, 4, None, false);
        let _ = ar.release();
        let _ = ar.release();
    }

    #[test]
    #[should_panic(expected = "usable slots")]
    fn test_overfull_window() {
        let densities = DensityBounds::new(&DensityConfig::default(), 1);
        let _ = AdaptiveRebalancing::new(&densities, 8, uniform(15), 0, 2, 15, None, false);
    }

    #[test]
    #[should_panic(expected = "cover")]
    fn test_weights_must_cover_cardinality() {
        let densities = DensityBounds::new(&DensityConfig::default(), 1);
        let _ = AdaptiveRebalancing::new(&densities, 8, uniform(5), 0, 2, 6, None, false);
    }

    fn weights_strategy() -> impl Strategy<Value = (u32, usize, Vec<(usize, u64)>, i32, bool)> {
        (0u32..=5, 2usize..=5, -1i32..=1, any::<bool>()).prop_flat_map(
            |(height, cap_log, balance, fill)| {
                let cap = 1usize << cap_log;
                let usable = usable_capacity(cap, fill);
                let max = (1usize << height) * usable;
                (
                    Just(height),
                    Just(cap),
                    prop::collection::vec((1usize..=max.max(1), 0u64..50), 0..12),
                    Just(balance),
                    Just(fill),
                )
            },
        )
    }

    proptest! {
        #[test]
        fn prop_partition_conserves_and_fits(
            (height, cap, raw, balance, fill) in weights_strategy()
        ) {
            let segments = 1usize << height;
            let usable = usable_capacity(cap, fill);
            let max = segments * usable;

            let mut b = WeightsBuilder::new();
            for (len, weight) in raw {
                let room = max - b.cardinality();
                b.push(len.min(room), weight, None);
            }
            let cardinality = b.cardinality();
            let densities = DensityBounds::new(&DensityConfig::default(), height as usize);
            let mut info = MoveDetectorInfo::new(0, segments);
            let intervals = b.finish();
            let heat = weights::total_weight(&intervals);
            let mut ar = AdaptiveRebalancing::new(
                &densities, cap, intervals, balance, segments, cardinality, Some(&mut info), fill,
            );
            let p = ar.release();
            drop(ar);

            prop_assert_eq!(p.len(), segments);
            prop_assert_eq!(p.total(), cardinality);
            prop_assert!(p.as_slice().iter().all(|&c| c <= usable));
            prop_assert_eq!(info.heat().iter().sum::<u64>(), heat);

            // Every node whose own load sits in its density range hands
            // its children loads inside theirs.
            for h in 1..=height as usize {
                let width = 1usize << h;
                for node in p.as_slice().chunks(width) {
                    let load: usize = node.iter().sum();
                    let child = width / 2;
                    let child_min = densities.min_load(h - 1, child, cap);
                    let child_max = densities.max_load(h - 1, child, cap, fill);
                    if load >= 2 * child_min && load <= 2 * child_max {
                        let left: usize = node[..child].iter().sum();
                        prop_assert!(left >= child_min && left <= child_max);
                        prop_assert!(load - left >= child_min && load - left <= child_max);
                    }
                }
            }
        }
    }
}
