//! Paging geometry and the fixed split of the virtual address space.
//!
//! The kernel lives in the lower half (root slots 0-255) and is shared by every address
//! space. Applications live in the upper half (root slots 256-511), which each process
//! owns privately.

use core::ops::Range;

/// Page size in bytes (4 KiB).
pub const PAGE_SIZE: usize = 4096;

/// Size of a large page mapped directly by a page directory entry (2 MiB).
pub const LARGE_PAGE_SIZE: usize = 512 * PAGE_SIZE;

/// Number of entries in every page table.
pub const ENTRY_COUNT: usize = 512;

/// Number of page table levels (4-level paging).
pub const PAGE_TABLE_LEVELS: usize = 4;

/// Maximum number of bits in a physical address.
pub const MAX_PHYSICAL_BITS: usize = 48;

/// Root slots shared by every address space.
pub const KERNEL_SLOTS: Range<usize> = 0..256;

/// Root slots private to each application.
pub const USER_SLOTS: Range<usize> = 256..512;

/// First virtual address of the application half.
pub const USER_SPACE_START: usize = 0xffff_8000_0000_0000;

/// Returns the number of pages needed to cover `bytes`.
#[inline]
pub const fn pages_for(bytes: usize) -> usize {
    bytes.div_ceil(PAGE_SIZE)
}

/// Returns the page table index for a given virtual address at the specified level.
///
/// Level 0 is the page table (PT), level 1 the page directory (PD), level 2 the page
/// directory pointer table (PDPT) and level 3 the root (PML4).
#[inline]
pub const fn page_index(address: usize, level: usize) -> usize {
    assert!(level < PAGE_TABLE_LEVELS, "page table level out of range");
    (address >> (12 + level * 9)) & (ENTRY_COUNT - 1)
}

/// Physical addresses must not exceed the maximum physical address width.
#[inline]
pub const fn validate_physical(addr: usize) -> bool {
    addr < (1usize << MAX_PHYSICAL_BITS)
}

/// Virtual addresses must be canonical (bits 48-63 sign-extended from bit 47).
#[inline]
pub const fn validate_virtual(addr: usize) -> bool {
    let canonical = if (addr & (1 << 47)) != 0 {
        addr | 0xFFFF_0000_0000_0000
    } else {
        addr & 0x0000_FFFF_FFFF_FFFF
    };
    canonical == addr
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_space_starts_at_first_user_slot() {
        assert_eq!(page_index(USER_SPACE_START, 3), USER_SLOTS.start);
        assert_eq!(page_index(USER_SPACE_START - 1, 3), KERNEL_SLOTS.end - 1);
    }

    #[test]
    fn pages_for_rounds_up() {
        assert_eq!(pages_for(0), 0);
        assert_eq!(pages_for(1), 1);
        assert_eq!(pages_for(PAGE_SIZE), 1);
        assert_eq!(pages_for(PAGE_SIZE + 1), 2);
    }

    #[test]
    #[should_panic(expected = "page table level out of range")]
    fn page_index_rejects_fifth_level() {
        page_index(0, 4);
    }
}
