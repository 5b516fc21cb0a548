//! Software emulation implementation for testing and development.
//!
//! Physical memory is a host buffer of page-aligned frames, and the "CR3" register is a
//! thread-local value, so each test thread runs against its own machine. The paging
//! geometry is identical to x86_64, which lets the same page table walker run unchanged.

mod flags;

pub use flags::PageFlags;

use alloc::boxed::Box;
use alloc::vec;
use core::cell::Cell;

use crate::{PhysicalAddress, VirtualAddress, layout};

std::thread_local! {
    static ACTIVE_ROOT: Cell<usize> = const { Cell::new(0) };
}

/// Returns the root table most recently loaded on this thread.
pub fn active_root() -> PhysicalAddress {
    PhysicalAddress::new(ACTIVE_ROOT.with(Cell::get))
}

/// Records a new root table for this thread.
///
/// # Safety
///
/// Always safe in emulation; the signature matches the hardware implementation.
pub unsafe fn set_active_root(root: PhysicalAddress) {
    ACTIVE_ROOT.with(|r| r.set(root.as_usize()));
}

/// There is no TLB to flush in emulation.
pub fn flush(_virt: VirtualAddress) {}

#[repr(C, align(4096))]
#[derive(Clone, Copy)]
struct EmulatedFrame([u8; layout::PAGE_SIZE]);

/// Emulated memory for software simulation.
///
/// This provides a simulated physical memory space for testing page table operations
/// without requiring actual hardware or virtual memory support from the host OS.
pub struct EmulatedMemory {
    base: *mut EmulatedFrame,
    frames: usize,
}

impl EmulatedMemory {
    /// Creates a new emulated memory region of at least the specified size.
    pub fn new(size: usize) -> Self {
        let frames = layout::pages_for(size);
        let memory = vec![EmulatedFrame([0; layout::PAGE_SIZE]); frames].into_boxed_slice();
        Self {
            base: Box::into_raw(memory) as *mut EmulatedFrame,
            frames,
        }
    }

    /// Translates a physical address to a pointer into the buffer.
    pub fn translate(&self, phys: usize) -> *mut u8 {
        assert!(phys < self.size(), "physical address out of bounds");
        // SAFETY: bounds checked above.
        unsafe { (self.base as *mut u8).add(phys) }
    }

    /// Translates a pointer into the buffer back to a physical address.
    pub fn ptr_to_phys(&self, ptr: *const u8) -> usize {
        let offset = (ptr as usize).wrapping_sub(self.base as usize);
        assert!(offset < self.size(), "pointer not within emulated memory");
        offset
    }

    /// Returns the size of the emulated memory region.
    pub fn size(&self) -> usize {
        self.frames * layout::PAGE_SIZE
    }
}

impl Drop for EmulatedMemory {
    fn drop(&mut self) {
        let slice = core::ptr::slice_from_raw_parts_mut(self.base, self.frames);
        // SAFETY: `base` came from `Box::into_raw` on a slice of exactly `frames` frames.
        drop(unsafe { Box::from_raw(slice) });
    }
}
