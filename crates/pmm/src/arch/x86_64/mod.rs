//! x86_64 architecture-specific implementation.
//!
//! This module provides the hardware implementation for x86_64: page table flags backed
//! by the `x86_64` crate, and access to CR3 and the TLB.

mod flags;

pub use flags::PageFlags;

use ::x86_64::{
    PhysAddr, VirtAddr,
    instructions::tlb,
    registers::control::{Cr3, Cr3Flags},
    structures::paging::PhysFrame,
};

use crate::{PhysicalAddress, VirtualAddress};

/// Returns the physical address of the root table the CPU is translating through.
pub fn active_root() -> PhysicalAddress {
    let (frame, _) = Cr3::read();
    PhysicalAddress::new(frame.start_address().as_u64() as usize)
}

/// Loads a new root table into CR3.
///
/// # Safety
///
/// The root must map the currently executing code and stack.
pub unsafe fn set_active_root(root: PhysicalAddress) {
    let frame = PhysFrame::containing_address(PhysAddr::new(root.as_u64()));
    unsafe { Cr3::write(frame, Cr3Flags::empty()) };
}

/// Invalidates the TLB entry for a single page.
pub fn flush(virt: VirtualAddress) {
    tlb::flush(VirtAddr::new(virt.as_u64()));
}
