//! Memory that can swap whole extents in place, and the spreader built on it.

mod memory;
#[cfg(target_os = "linux")]
mod region;
mod spread;

pub use memory::{ExtentArray, Scratch};
pub use spread::{SpreadStats, SpreadWithRewiring};
