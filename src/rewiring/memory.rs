//! Slot arrays that can take over a written buffer by rewiring memory.
//!
//! On Linux a large enough array is backed by a [`RewiredRegion`] and a
//! scratch extent is installed by swapping page mappings. Everywhere else,
//! and whenever the region cannot be set up, the array is a plain vector and
//! installing copies.

use std::mem;

#[cfg(target_os = "linux")]
use super::region::{self, MappedScratch, Rewire, RewiredRegion};

#[derive(Debug)]
enum Backing {
    Heap(Vec<i64>),
    #[cfg(target_os = "linux")]
    Rewired(RewiredRegion),
}

/// Buffer the spreader writes a chunk of output into.
#[derive(Debug)]
pub enum Scratch {
    Heap(Vec<i64>),
    #[cfg(target_os = "linux")]
    Mapped(MappedScratch),
}

impl Scratch {
    #[inline]
    pub fn as_slice(&self) -> &[i64] {
        match self {
            Scratch::Heap(buf) => buf,
            #[cfg(target_os = "linux")]
            Scratch::Mapped(m) => m.as_slice(),
        }
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [i64] {
        match self {
            Scratch::Heap(buf) => buf,
            #[cfg(target_os = "linux")]
            Scratch::Mapped(m) => m.as_mut_slice(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    /// Whether installing this buffer remaps memory instead of copying.
    #[inline]
    pub fn is_mapped(&self) -> bool {
        match self {
            Scratch::Heap(_) => false,
            #[cfg(target_os = "linux")]
            Scratch::Mapped(_) => true,
        }
    }
}

#[derive(Debug)]
pub struct ExtentArray {
    backing: Backing,
    len: usize,
    extent_slots: usize,
}

impl ExtentArray {
    /// An array of `len` zeroed slots. Extents are whole pages and never
    /// smaller than a segment; rewiring is attempted only when `rewiring` is
    /// set and the array spans at least one extent.
    pub fn new(len: usize, segment_capacity: usize, rewiring: bool) -> Self {
        let extent_slots = extent_slots(segment_capacity);
        Self {
            backing: Self::backing(len, extent_slots, rewiring),
            len,
            extent_slots,
        }
    }

    #[cfg(target_os = "linux")]
    fn backing(len: usize, extent_slots: usize, rewiring: bool) -> Backing {
        if !rewiring || len < extent_slots {
            return Backing::Heap(vec![0; len]);
        }
        let extents = len.div_ceil(extent_slots);
        match RewiredRegion::new(extents, extent_slots * mem::size_of::<i64>()) {
            Ok(region) => Backing::Rewired(region),
            Err(e) => {
                tracing::warn!(
                    target: "pma::rewiring",
                    error = %e,
                    "cannot set up rewired memory, falling back to copying"
                );
                Backing::Heap(vec![0; len])
            }
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn backing(len: usize, _extent_slots: usize, _rewiring: bool) -> Backing {
        Backing::Heap(vec![0; len])
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Slots per extent; windows at least this large are installed one
    /// extent at a time.
    #[inline]
    pub fn extent_slots(&self) -> usize {
        self.extent_slots
    }

    #[inline]
    pub fn is_rewired(&self) -> bool {
        match self.backing {
            Backing::Heap(_) => false,
            #[cfg(target_os = "linux")]
            Backing::Rewired(_) => true,
        }
    }

    #[inline]
    pub fn as_slice(&self) -> &[i64] {
        match &self.backing {
            Backing::Heap(v) => v,
            #[cfg(target_os = "linux")]
            Backing::Rewired(r) => &r.as_slice()[..self.len],
        }
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [i64] {
        match &mut self.backing {
            Backing::Heap(v) => v,
            #[cfg(target_os = "linux")]
            Backing::Rewired(r) => &mut r.as_mut_slice()[..self.len],
        }
    }

    /// A scratch buffer of `slots` slots. Mapped when a whole extent is
    /// asked of a rewired array, heap otherwise.
    pub fn acquire_scratch(&mut self, slots: usize) -> Scratch {
        #[cfg(target_os = "linux")]
        if let Backing::Rewired(region) = &mut self.backing {
            if slots == self.extent_slots {
                match region.acquire() {
                    Ok(m) => return Scratch::Mapped(m),
                    Err(e) => tracing::warn!(
                        target: "pma::rewiring",
                        error = %e,
                        "cannot map scratch extent, using heap memory"
                    ),
                }
            }
        }
        Scratch::Heap(vec![0; slots])
    }

    /// Make `slot_offset..slot_offset + scratch.len()` show the contents of
    /// `scratch`. Returns a buffer of the same size to reuse; its contents
    /// are unspecified.
    pub fn install(&mut self, slot_offset: usize, scratch: Scratch) -> Scratch {
        let len = scratch.len();
        debug_assert!(slot_offset + len <= self.len);
        match scratch {
            #[cfg(target_os = "linux")]
            Scratch::Mapped(m) => {
                debug_assert_eq!(slot_offset % self.extent_slots, 0);
                let extent = slot_offset / self.extent_slots;
                let Backing::Rewired(region) = &mut self.backing else {
                    unreachable!("mapped scratch on a heap array");
                };
                match region.rewire(extent, m) {
                    Rewire::Swapped(m) => Scratch::Mapped(m),
                    Rewire::Detached(e) => {
                        tracing::warn!(
                            target: "pma::rewiring",
                            extent,
                            error = %e,
                            "scratch extent lost after rewiring"
                        );
                        Scratch::Heap(vec![0; len])
                    }
                    Rewire::Failed(m, e) => {
                        tracing::warn!(
                            target: "pma::rewiring",
                            extent,
                            error = %e,
                            "rewiring failed, copying extent"
                        );
                        self.as_mut_slice()[slot_offset..slot_offset + len]
                            .copy_from_slice(m.as_slice());
                        Scratch::Mapped(m)
                    }
                }
            }
            Scratch::Heap(buf) => {
                self.as_mut_slice()[slot_offset..slot_offset + len].copy_from_slice(&buf);
                Scratch::Heap(buf)
            }
        }
    }

    /// Return a scratch buffer that is no longer needed.
    pub fn release_scratch(&mut self, scratch: Scratch) {
        match scratch {
            Scratch::Heap(_) => {}
            #[cfg(target_os = "linux")]
            Scratch::Mapped(m) => {
                if let Backing::Rewired(region) = &mut self.backing {
                    region.release(m);
                }
            }
        }
    }

    pub fn memory_usage(&self) -> usize {
        match &self.backing {
            Backing::Heap(v) => v.capacity() * mem::size_of::<i64>(),
            #[cfg(target_os = "linux")]
            Backing::Rewired(r) => r.memory_usage(),
        }
    }
}

/// Slots per extent: a page, or a segment when segments are larger. Both are
/// powers of two, so either is a multiple of the other.
fn extent_slots(segment_capacity: usize) -> usize {
    #[cfg(target_os = "linux")]
    let page_slots = region::page_size() / mem::size_of::<i64>();
    #[cfg(not(target_os = "linux"))]
    let page_slots = 4096 / mem::size_of::<i64>();
    page_slots.max(segment_capacity)
}
