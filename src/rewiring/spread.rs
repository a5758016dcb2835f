//! Redistributing a window according to a partition.
//!
//! The window's elements are first packed against its right end, so the
//! read position never falls behind the write position. Output then goes
//! left to right in chunks of one extent, or the whole window when that is
//! smaller. A chunk whose old memory still holds unread input is written
//! into a scratch extent and swapped in by rewiring once the input has moved
//! past it; every other chunk is written in place. One scratch pair serves
//! the whole pass: the memory a swap hands back becomes the next scratch.

use crate::rebalance::{Partition, PartitionCursor};
use crate::rewiring::Scratch;
use crate::storage::Storage;

/// What one spread did with its chunks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpreadStats {
    /// Chunks swapped in by remapping memory.
    pub rewired: usize,
    /// Chunks written in place or copied over from scratch.
    pub copied: usize,
    /// Scratch pairs taken from the storage arrays.
    pub allocated: usize,
}

/// Scratch space for the keys and values of one chunk.
struct ChunkBuffers {
    keys: Scratch,
    values: Scratch,
}

pub struct SpreadWithRewiring<'a> {
    storage: &'a mut Storage,
    window_start: usize,
    window_length: usize,
    partition: &'a Partition,
    insert: Option<(i64, i64)>,
    insert_segment: Option<usize>,
    stats: SpreadStats,
}

impl<'a> SpreadWithRewiring<'a> {
    /// Prepare to lay out the `window_length` segments at `window_start` as
    /// `partition` dictates.
    ///
    /// # Panics
    /// Panics if the partition does not have one entry per segment.
    pub fn new(
        storage: &'a mut Storage,
        window_start: usize,
        window_length: usize,
        partition: &'a Partition,
    ) -> Self {
        assert_eq!(
            partition.len(),
            window_length,
            "partition of {} segments for a window of {window_length}",
            partition.len()
        );
        debug_assert!(window_length.is_power_of_two() && window_start % window_length == 0);
        Self {
            storage,
            window_start,
            window_length,
            partition,
            insert: None,
            insert_segment: None,
            stats: SpreadStats::default(),
        }
    }

    /// Merge `key` into the window while spreading. The key must not be
    /// present yet.
    pub fn set_element_to_insert(&mut self, key: i64, value: i64) {
        self.insert = Some((key, value));
    }

    /// Absolute segment the inserted element landed in.
    pub fn insert_segment(&self) -> Option<usize> {
        self.insert_segment
    }

    pub fn stats(&self) -> SpreadStats {
        self.stats
    }

    pub fn execute(&mut self) {
        let inserting = self.insert.is_some();
        let cardinality = self.storage.count(self.window_start, self.window_length);
        assert_eq!(
            self.partition.total(),
            cardinality + usize::from(inserting),
            "partition total does not match the window contents"
        );

        if self.partition.total() == 0 {
            self.storage
                .apply_partition(self.window_start, self.partition, false);
            return;
        }

        let cap = self.storage.segment_capacity();
        let window_slots = self.window_length * cap;
        let base = self.window_start * cap;
        let extent_slots = self.storage.keys.extent_slots();
        let chunk_slots = window_slots.min(extent_slots);
        let rewire = chunk_slots == extent_slots && self.storage.keys.is_rewired();

        // Window slot of the next element to read.
        let mut input = self.compact(base, window_slots);

        let mut output = PartitionCursor::default();
        output.move_forwards_by(self.partition, 0);

        // The pass's scratch pair is idle, being written, or waiting for the
        // input to drain the chunk it replaces.
        let mut idle: Option<ChunkBuffers> = None;
        let mut writing: Option<(usize, ChunkBuffers)> = None;
        let mut waiting: Option<(usize, ChunkBuffers)> = None;
        let mut chunk = usize::MAX;

        let mut remaining = self.partition.total();
        while remaining > 0 {
            let slot = output.segment() * cap + output.offset();
            if slot / chunk_slots != chunk {
                if let Some(done) = writing.take() {
                    debug_assert!(waiting.is_none());
                    waiting = Some(done);
                }
                self.install_drained(&mut waiting, &mut idle, base, input, chunk_slots);

                chunk = slot / chunk_slots;
                if rewire && input < (chunk + 1) * chunk_slots {
                    let buffers = match idle.take() {
                        Some(b) => Some(b),
                        None if self.stats.allocated == 0 => Some(self.acquire(chunk_slots)),
                        None => None,
                    };
                    writing = buffers.map(|b| (chunk, b));
                }
                if writing.is_none() {
                    self.stats.copied += 1;
                }
            }

            let room = output.current(self.partition);
            let next_key = (input < window_slots).then(|| self.storage.keys.as_slice()[base + input]);

            let emitted = match self.insert {
                Some((key, value)) if next_key.map_or(true, |k| key < k) => {
                    self.put(&mut writing, base, chunk_slots, slot, key, value);
                    self.insert = None;
                    self.insert_segment = Some(self.window_start + output.segment());
                    1
                }
                _ => {
                    let mut n = (window_slots - input).min(room);
                    if let Some((key, _)) = self.insert {
                        let run = &self.storage.keys.as_slice()[base + input..base + input + n];
                        n = run.partition_point(|&k| k < key);
                    }
                    debug_assert!(n > 0);
                    self.transfer(&mut writing, base, chunk_slots, input, slot, n);
                    input += n;
                    n
                }
            };

            output.move_forwards_by(self.partition, emitted);
            remaining -= emitted;
            self.install_drained(&mut waiting, &mut idle, base, input, chunk_slots);
        }

        debug_assert!(waiting.is_none());
        if let Some((c, b)) = writing.take() {
            idle = Some(self.install(base + c * chunk_slots, b));
        }
        if let Some(b) = idle {
            self.storage.keys.release_scratch(b.keys);
            self.storage.values.release_scratch(b.values);
        }

        self.storage
            .apply_partition(self.window_start, self.partition, inserting);

        tracing::trace!(
            target: "pma::rewiring",
            window_start = self.window_start,
            window_length = self.window_length,
            rewired = self.stats.rewired,
            copied = self.stats.copied,
            allocated = self.stats.allocated,
            "spread window"
        );
    }

    /// Pack the window's elements against its right end and return the
    /// window slot of the first one. Reading from there, no element is
    /// written past the slot it is read from.
    fn compact(&mut self, base: usize, window_slots: usize) -> usize {
        let cap = self.storage.segment_capacity();
        let mut to = window_slots;
        for s in (0..self.window_length).rev() {
            let size = self.storage.size(self.window_start + s);
            let from = base + s * cap;
            to -= size;
            self.storage
                .keys
                .as_mut_slice()
                .copy_within(from..from + size, base + to);
            self.storage
                .values
                .as_mut_slice()
                .copy_within(from..from + size, base + to);
        }
        to
    }

    /// Copy `n` elements from window slot `from` to window slot `to`, into
    /// the scratch chunk when one is being written.
    fn transfer(
        &mut self,
        writing: &mut Option<(usize, ChunkBuffers)>,
        base: usize,
        chunk_slots: usize,
        from: usize,
        to: usize,
        n: usize,
    ) {
        let src = base + from..base + from + n;
        match writing {
            Some((c, b)) => {
                let dst = to - *c * chunk_slots;
                b.keys.as_mut_slice()[dst..dst + n]
                    .copy_from_slice(&self.storage.keys.as_slice()[src.clone()]);
                b.values.as_mut_slice()[dst..dst + n]
                    .copy_from_slice(&self.storage.values.as_slice()[src]);
            }
            None => {
                self.storage.keys.as_mut_slice().copy_within(src.clone(), base + to);
                self.storage.values.as_mut_slice().copy_within(src, base + to);
            }
        }
    }

    fn put(
        &mut self,
        writing: &mut Option<(usize, ChunkBuffers)>,
        base: usize,
        chunk_slots: usize,
        to: usize,
        key: i64,
        value: i64,
    ) {
        match writing {
            Some((c, b)) => {
                let dst = to - *c * chunk_slots;
                b.keys.as_mut_slice()[dst] = key;
                b.values.as_mut_slice()[dst] = value;
            }
            None => {
                self.storage.keys.as_mut_slice()[base + to] = key;
                self.storage.values.as_mut_slice()[base + to] = value;
            }
        }
    }

    /// Swap in the waiting chunk once the input has left it.
    fn install_drained(
        &mut self,
        waiting: &mut Option<(usize, ChunkBuffers)>,
        idle: &mut Option<ChunkBuffers>,
        base: usize,
        input: usize,
        chunk_slots: usize,
    ) {
        match waiting.take() {
            Some((c, b)) if input >= (c + 1) * chunk_slots => {
                *idle = Some(self.install(base + c * chunk_slots, b));
            }
            other => *waiting = other,
        }
    }

    fn acquire(&mut self, slots: usize) -> ChunkBuffers {
        self.stats.allocated += 1;
        ChunkBuffers {
            keys: self.storage.keys.acquire_scratch(slots),
            values: self.storage.values.acquire_scratch(slots),
        }
    }

    fn install(&mut self, slot_offset: usize, buffers: ChunkBuffers) -> ChunkBuffers {
        if buffers.keys.is_mapped() {
            self.stats.rewired += 1;
        } else {
            self.stats.copied += 1;
        }
        ChunkBuffers {
            keys: self.storage.keys.install(slot_offset, buffers.keys),
            values: self.storage.values.install(slot_offset, buffers.values),
        }
    }
}
