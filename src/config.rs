//! Configuration for [`PackedMemoryArray`](crate::PackedMemoryArray).

use crate::error::{Error, Result};

/// Density thresholds at the two ends of the calibrator tree.
///
/// Intermediate heights are interpolated linearly, see
/// [`DensityBounds`](crate::density::DensityBounds).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DensityConfig {
    /// Minimum density of a single segment.
    pub leaf_lower: f64,
    /// Minimum density of the whole array.
    pub root_lower: f64,
    /// Maximum density of the whole array; exceeding it doubles the capacity.
    pub root_upper: f64,
    /// Maximum density of a single segment.
    pub leaf_upper: f64,
}

impl Default for DensityConfig {
    fn default() -> Self {
        Self {
            leaf_lower: 0.08,
            root_lower: 0.30,
            root_upper: 0.75,
            leaf_upper: 1.0,
        }
    }
}

impl DensityConfig {
    fn validate(&self) -> Result<()> {
        let in_unit = |v: f64| v > 0.0 && v <= 1.0;
        if ![self.leaf_lower, self.root_lower, self.root_upper, self.leaf_upper]
            .into_iter()
            .all(in_unit)
        {
            return Err(Error::InvalidConfig(format!(
                "density thresholds must lie in (0, 1]: {self:?}"
            )));
        }
        if !(self.leaf_lower < self.root_lower
            && self.root_lower < self.root_upper
            && self.root_upper < self.leaf_upper)
        {
            return Err(Error::InvalidConfig(format!(
                "density thresholds must satisfy leaf_lower < root_lower < root_upper < leaf_upper: {self:?}"
            )));
        }
        // Doubling halves the global density; it must land above the root's floor.
        if self.root_upper / 2.0 < self.root_lower {
            return Err(Error::InvalidConfig(format!(
                "root_upper / 2 must be at least root_lower: {self:?}"
            )));
        }
        Ok(())
    }
}

/// Configuration for the packed memory array.
#[derive(Debug, Clone)]
pub struct Config {
    /// Slots per segment. Power of two, at least 4.
    pub segment_capacity: usize,
    /// Number of segments allocated up front. Power of two, at least 1.
    pub initial_segments: usize,
    /// Calibrator tree thresholds.
    pub density: DensityConfig,
    /// Number of recent insertions remembered to bias rebalancing.
    pub history_capacity: usize,
    /// Remap pages instead of copying them when the platform allows it.
    pub rewiring: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            segment_capacity: 64,
            initial_segments: 1,
            density: DensityConfig::default(),
            history_capacity: 1024,
            rewiring: true,
        }
    }
}

impl Config {
    /// Check every field, returning the first rejected one.
    pub fn validate(&self) -> Result<()> {
        if self.segment_capacity < 4 || !self.segment_capacity.is_power_of_two() {
            return Err(Error::InvalidConfig(format!(
                "segment_capacity must be a power of two >= 4, got {}",
                self.segment_capacity
            )));
        }
        if self.initial_segments == 0 || !self.initial_segments.is_power_of_two() {
            return Err(Error::InvalidConfig(format!(
                "initial_segments must be a power of two >= 1, got {}",
                self.initial_segments
            )));
        }
        self.density.validate()
    }
}
