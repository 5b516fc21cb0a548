//! Page table primitives shared by the hardware and emulated backends.

use crate::{PhysicalAddress, arch::PageFlags, layout};

/// A single 64-bit page table entry.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct PageEntry(u64);

impl PageEntry {
    /// Bits 12-51 contain the physical address.
    const ADDRESS_MASK: u64 = 0x000F_FFFF_FFFF_F000;

    /// Creates a new page table entry.
    ///
    /// The physical address must be page-aligned.
    pub fn new(address: PhysicalAddress, flags: PageFlags) -> Self {
        debug_assert!(
            address.is_aligned(layout::PAGE_SIZE),
            "physical address must be page-aligned"
        );
        Self((address.as_u64() & Self::ADDRESS_MASK) | (flags.bits() & !Self::ADDRESS_MASK))
    }

    /// Returns the physical address stored in this entry, or `None` if not present.
    pub fn address(self) -> Option<PhysicalAddress> {
        if self.is_present() {
            Some(PhysicalAddress::new((self.0 & Self::ADDRESS_MASK) as usize))
        } else {
            None
        }
    }

    /// Returns the flags for this entry.
    pub fn flags(self) -> PageFlags {
        PageFlags::from_bits(self.0 & !Self::ADDRESS_MASK)
    }

    /// Sets the flags for this entry, preserving the address.
    pub fn set_flags(&mut self, flags: PageFlags) {
        self.0 = (self.0 & Self::ADDRESS_MASK) | (flags.bits() & !Self::ADDRESS_MASK);
    }

    /// Returns whether this entry is present.
    pub fn is_present(self) -> bool {
        self.flags().is_present()
    }

    /// Clears this entry.
    pub fn clear(&mut self) {
        self.0 = 0;
    }

    /// Returns the raw value of this entry.
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl core::fmt::Debug for PageEntry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "PageEntry({:#x})", self.0)
    }
}

/// One page-sized table of 512 entries, at any level of the hierarchy.
#[derive(Clone)]
#[repr(C, align(4096))]
pub struct PageTable {
    pub entries: [PageEntry; layout::ENTRY_COUNT],
}

impl PageTable {
    /// Creates a table with every entry cleared.
    pub const fn new() -> Self {
        Self {
            entries: [PageEntry(0); layout::ENTRY_COUNT],
        }
    }
}

impl Default for PageTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Flags for an intermediate table owned by the address space that points at it.
pub(crate) fn owned_table_flags() -> PageFlags {
    let mut flags = PageFlags::empty();
    flags.set_present(true);
    flags.set_writable(true);
    flags.set_user(true);
    flags.set_owned(true);
    flags
}
