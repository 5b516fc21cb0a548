//! First-fit physical frame allocator.
//!
//! The arena keeps one [`Frame`] record per physical frame up to the highest usable
//! address the boot map reports. Every frame starts out reserved; usable regions are then
//! released into the arena. Allocation scans forward from the last allocation and wraps
//! around once.

use alloc::vec::Vec;
use core::fmt;

use crate::{Frame, FrameFlag, FrameFlags, FrameNumber, PhysicalAddress, layout};

/// Errors that can occur during physical memory allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// No suitable run of free frames is available.
    OutOfMemory,
    /// Attempted to deallocate a frame that is not allocated.
    InvalidDeallocation,
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory => f.write_str("out of physical memory"),
            Self::InvalidDeallocation => f.write_str("frame is not allocated"),
        }
    }
}

/// Represents a single entry in a boot-time memory map.
///
/// Implement this trait on loader-specific memory map entry types to allow pmm to build
/// its arena from the boot map.
pub trait BootMemoryRegion {
    /// Returns the base physical address of this region.
    fn base(&self) -> PhysicalAddress;

    /// Returns the size of this region in bytes.
    fn size(&self) -> usize;

    /// Returns whether this region contains memory the kernel may hand out.
    fn is_usable(&self) -> bool;
}

/// Physical frame allocator.
pub struct FrameArena {
    frames: Vec<Frame>,
    next: usize,
    allocated: usize,
    free: usize,
}

impl FrameArena {
    /// Creates an arena tracking `frame_count` frames, all of them reserved.
    pub fn new(frame_count: usize) -> Self {
        let mut frames = Vec::with_capacity(frame_count);
        frames.resize(
            frame_count,
            Frame {
                flags: FrameFlags::with(FrameFlag::Reserved),
            },
        );
        Self {
            frames,
            next: 0,
            allocated: 0,
            free: 0,
        }
    }

    /// Builds an arena from the boot memory map.
    ///
    /// Frame zero is kept reserved even when the map reports it as usable, so a null
    /// physical address never names a live frame.
    pub fn from_boot_map<R: BootMemoryRegion>(regions: &[R]) -> Self {
        let limit = regions
            .iter()
            .filter(|r| r.is_usable())
            .map(|r| (r.base().as_usize() + r.size()) / layout::PAGE_SIZE)
            .max()
            .unwrap_or(0);

        let mut arena = Self::new(limit);
        for region in regions.iter().filter(|r| r.is_usable()) {
            // Partial frames at either end of a region are not usable.
            let first = region.base().align_up(layout::PAGE_SIZE).frame_number();
            let end = (region.base().as_usize() + region.size()) / layout::PAGE_SIZE;
            if end > first.as_usize() {
                arena.release(first, end - first.as_usize());
            }
        }
        arena.reserve(FrameNumber::new(0), 1);

        log::debug!(
            "frame arena: {} frames tracked, {} free",
            arena.total_frames(),
            arena.free_frames()
        );
        arena
    }

    /// Marks a run of reserved frames as free.
    pub fn release(&mut self, first: FrameNumber, count: usize) {
        for frame in self.range_mut(first, count) {
            if frame.flags.test(FrameFlag::Reserved) && !frame.flags.test(FrameFlag::Allocated) {
                frame.flags.clear(FrameFlag::Reserved);
            }
        }
        self.recount();
    }

    /// Marks a run of frames as reserved so they are never handed out.
    pub fn reserve(&mut self, first: FrameNumber, count: usize) {
        for frame in self.range_mut(first, count) {
            frame.flags.set(FrameFlag::Reserved);
        }
        self.recount();
    }

    /// Allocates a single frame.
    pub fn allocate(&mut self) -> Result<FrameNumber, AllocError> {
        self.allocate_contiguous(1)
    }

    /// Allocates `count` physically contiguous frames and returns the first one.
    pub fn allocate_contiguous(&mut self, count: usize) -> Result<FrameNumber, AllocError> {
        if count == 0 || count > self.free {
            return Err(AllocError::OutOfMemory);
        }

        let first = self
            .find_run(self.next, self.frames.len(), count)
            .or_else(|| self.find_run(0, self.next, count))
            .ok_or(AllocError::OutOfMemory)?;

        for frame in &mut self.frames[first..first + count] {
            frame.flags.set(FrameFlag::Allocated);
        }
        self.allocated += count;
        self.free -= count;
        self.next = first + count;
        Ok(FrameNumber::new(first))
    }

    /// Returns a single frame to the arena.
    pub fn deallocate(&mut self, frame: FrameNumber) -> Result<(), AllocError> {
        let entry = self
            .frames
            .get_mut(frame.as_usize())
            .ok_or(AllocError::InvalidDeallocation)?;
        if !entry.flags.test(FrameFlag::Allocated) {
            return Err(AllocError::InvalidDeallocation);
        }

        entry.flags.clear(FrameFlag::Allocated);
        self.allocated -= 1;
        if !entry.flags.test(FrameFlag::Reserved) {
            self.free += 1;
        }
        Ok(())
    }

    /// Returns `count` contiguous frames starting at `first` to the arena.
    pub fn deallocate_contiguous(
        &mut self,
        first: FrameNumber,
        count: usize,
    ) -> Result<(), AllocError> {
        for i in 0..count {
            self.deallocate(first + i)?;
        }
        Ok(())
    }

    /// Returns true if the frame is currently allocated.
    pub fn is_allocated(&self, frame: FrameNumber) -> bool {
        self.frames
            .get(frame.as_usize())
            .is_some_and(|f| f.flags.test(FrameFlag::Allocated))
    }

    /// Returns the number of frames the arena tracks.
    pub fn total_frames(&self) -> usize {
        self.frames.len()
    }

    /// Returns the number of frames available for allocation.
    pub fn free_frames(&self) -> usize {
        self.free
    }

    /// Returns the number of frames currently allocated.
    pub fn allocated_frames(&self) -> usize {
        self.allocated
    }

    fn find_run(&self, start: usize, end: usize, count: usize) -> Option<usize> {
        let mut run_start = start;
        let mut run_len = 0;
        for index in start..end {
            if self.frames[index].is_free() {
                if run_len == 0 {
                    run_start = index;
                }
                run_len += 1;
                if run_len == count {
                    return Some(run_start);
                }
            } else {
                run_len = 0;
            }
        }
        None
    }

    fn range_mut(&mut self, first: FrameNumber, count: usize) -> &mut [Frame] {
        let start = first.as_usize().min(self.frames.len());
        let end = (first.as_usize() + count).min(self.frames.len());
        &mut self.frames[start..end]
    }

    fn recount(&mut self) {
        self.free = self.frames.iter().filter(|f| f.is_free()).count();
        self.allocated = self
            .frames
            .iter()
            .filter(|f| f.flags.test(FrameFlag::Allocated))
            .count();
    }
}
