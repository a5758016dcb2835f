//! Deciding where elements go during a rebalance.

mod adaptive;
mod partition;
pub mod weights;

pub use adaptive::AdaptiveRebalancing;
pub use partition::{Partition, PartitionCursor};
pub use weights::{Intervals, WeightInterval, WeightsBuilder};
