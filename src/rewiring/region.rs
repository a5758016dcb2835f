//! Virtual memory rewiring on Linux.
//!
//! The array lives in an anonymous memory file. Its virtual range is split
//! into extents, each mapped onto some extent of the file; a table keeps the
//! current assignment. Installing a freshly written scratch extent is two
//! `mmap(MAP_FIXED)` calls that exchange the physical backing of the array
//! extent and the scratch, with no data copied.

use std::fs::File;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd};

use memmap2::{MmapMut, MmapOptions};

/// A standalone mapping of one file extent, written before being swapped
/// into the array.
#[derive(Debug)]
pub struct MappedScratch {
    map: MmapMut,
    physical: usize,
}

impl MappedScratch {
    #[inline]
    pub fn as_slice(&self) -> &[i64] {
        // SAFETY: the mapping is page aligned, `extent_bytes` long and a
        // multiple of eight bytes; any bit pattern is a valid i64.
        unsafe { std::slice::from_raw_parts(self.map.as_ptr().cast(), self.map.len() / 8) }
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [i64] {
        // SAFETY: as above, and `&mut self` guarantees exclusivity.
        unsafe {
            std::slice::from_raw_parts_mut(self.map.as_mut_ptr().cast(), self.map.len() / 8)
        }
    }
}

/// Outcome of [`RewiredRegion::rewire`].
#[derive(Debug)]
pub enum Rewire {
    /// The extent now shows the scratch contents; the returned scratch holds
    /// the old ones.
    Swapped(MappedScratch),
    /// The extent shows the scratch contents but the scratch could not be
    /// remapped and is gone.
    Detached(io::Error),
    /// Nothing changed.
    Failed(MappedScratch, io::Error),
}

#[derive(Debug)]
pub struct RewiredRegion {
    file: File,
    map: MmapMut,
    extent_bytes: usize,
    /// Physical file extent behind every virtual extent.
    physical: Vec<usize>,
    /// File extents not mapped anywhere.
    free: Vec<usize>,
    file_extents: usize,
}

impl RewiredRegion {
    /// Map `extents` extents of `extent_bytes` each. `extent_bytes` must be a
    /// multiple of the page size.
    pub fn new(extents: usize, extent_bytes: usize) -> io::Result<Self> {
        debug_assert!(extents > 0 && extent_bytes % page_size() == 0);
        // SAFETY: the name is NUL terminated.
        let fd = unsafe { libc::memfd_create(b"pma-rs\0".as_ptr().cast(), libc::MFD_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: `fd` was just created and is owned by nothing else.
        let file = unsafe { File::from_raw_fd(fd) };
        file.set_len((extents * extent_bytes) as u64)?;
        // SAFETY: the file is private to this region and never truncated
        // below the mapped length.
        let map = unsafe { MmapOptions::new().len(extents * extent_bytes).map_mut(&file)? };
        Ok(Self {
            file,
            map,
            extent_bytes,
            physical: (0..extents).collect(),
            free: Vec::new(),
            file_extents: extents,
        })
    }

    #[inline]
    pub fn extents(&self) -> usize {
        self.physical.len()
    }

    #[inline]
    pub fn as_slice(&self) -> &[i64] {
        // SAFETY: page aligned, a multiple of eight bytes long.
        unsafe { std::slice::from_raw_parts(self.map.as_ptr().cast(), self.map.len() / 8) }
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [i64] {
        // SAFETY: as above, exclusive through `&mut self`.
        unsafe {
            std::slice::from_raw_parts_mut(self.map.as_mut_ptr().cast(), self.map.len() / 8)
        }
    }

    /// Bytes of the memory file currently allocated.
    pub fn memory_usage(&self) -> usize {
        (self.file_extents - self.free.len()) * self.extent_bytes
    }

    /// Map a spare file extent as scratch space, growing the file when none
    /// is free.
    pub fn acquire(&mut self) -> io::Result<MappedScratch> {
        let physical = match self.free.pop() {
            Some(p) => p,
            None => {
                self.file
                    .set_len(((self.file_extents + 1) * self.extent_bytes) as u64)?;
                self.file_extents += 1;
                self.file_extents - 1
            }
        };
        // SAFETY: the extent lies within the file and no other mapping of
        // it is live.
        let map = unsafe {
            MmapOptions::new()
                .offset((physical * self.extent_bytes) as u64)
                .len(self.extent_bytes)
                .map_mut(&self.file)
        };
        match map {
            Ok(map) => Ok(MappedScratch { map, physical }),
            Err(e) => {
                self.free.push(physical);
                Err(e)
            }
        }
    }

    /// Give a scratch extent back and drop its memory.
    pub fn release(&mut self, scratch: MappedScratch) {
        let physical = scratch.physical;
        drop(scratch);
        self.punch(physical);
        self.free.push(physical);
    }

    /// Swap the physical backing of virtual `extent` with `scratch`.
    pub fn rewire(&mut self, extent: usize, mut scratch: MappedScratch) -> Rewire {
        let old = self.physical[extent];
        let target = self.extent_ptr(extent);
        if let Err(e) = self.map_fixed(target, scratch.physical) {
            // A failed MAP_FIXED may already have torn down the old mapping.
            if let Err(restore) = self.map_fixed(target, old) {
                panic!("lost mapping of extent {extent} after failed rewire: {restore}");
            }
            return Rewire::Failed(scratch, e);
        }
        self.physical[extent] = scratch.physical;

        let scratch_ptr = scratch.map.as_mut_ptr();
        match self.map_fixed(scratch_ptr, old) {
            Ok(()) => {
                scratch.physical = old;
                Rewire::Swapped(scratch)
            }
            Err(e) => {
                drop(scratch);
                self.punch(old);
                self.free.push(old);
                Rewire::Detached(e)
            }
        }
    }

    #[inline]
    fn extent_ptr(&mut self, extent: usize) -> *mut u8 {
        debug_assert!(extent < self.extents());
        // SAFETY: in bounds of the mapping.
        unsafe { self.map.as_mut_ptr().add(extent * self.extent_bytes) }
    }

    fn map_fixed(&self, addr: *mut u8, physical: usize) -> io::Result<()> {
        // SAFETY: `addr` is the page aligned start of an extent owned by this
        // region (either inside `map` or a scratch mapping), so replacing its
        // backing cannot clobber foreign memory. Callers hold `&mut` access to
        // the owner, so no slice into the range is alive.
        let res = unsafe {
            libc::mmap(
                addr.cast(),
                self.extent_bytes,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_FIXED,
                self.file.as_raw_fd(),
                (physical * self.extent_bytes) as libc::off_t,
            )
        };
        if res == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn punch(&self, physical: usize) {
        // SAFETY: plain syscall on an owned descriptor.
        let res = unsafe {
            libc::fallocate(
                self.file.as_raw_fd(),
                libc::FALLOC_FL_PUNCH_HOLE | libc::FALLOC_FL_KEEP_SIZE,
                (physical * self.extent_bytes) as libc::off_t,
                self.extent_bytes as libc::off_t,
            )
        };
        if res != 0 {
            tracing::trace!(
                target: "pma::rewiring",
                physical,
                error = %io::Error::last_os_error(),
                "punching hole failed"
            );
        }
    }
}

/// System page size in bytes.
pub fn page_size() -> usize {
    // SAFETY: sysconf has no preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size <= 0 {
        4096
    } else {
        size as usize
    }
}
