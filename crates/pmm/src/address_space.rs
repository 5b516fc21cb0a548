//! Address space management.
//!
//! An [`AddressSpace`] is a handle to a root page table. Root tables are created, aliased
//! and released explicitly by the code that owns them, because the same tables are shared
//! between the load cache and running processes.
//!
//! Every entry carries an ownership bit. An entry with the bit set points at a frame that
//! belongs to the address space holding the entry, and is freed when that space is cleaned.
//! Entries copied from another space have the bit cleared, so their targets are shared and
//! left alone. Mapping a new page underneath a shared table first gives the space a
//! private copy of that table.

use core::fmt;
use core::ops::Range;

use crate::{
    AllocError, FrameArena, PhysicalAddress, VirtualAddress,
    arch::{self, PageFlags},
    layout,
    page_table::{PageEntry, PageTable, owned_table_flags},
};

/// Errors that can occur while editing page tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapError {
    /// A table or page frame could not be allocated.
    OutOfMemory,
    /// The address has no mapping.
    NotMapped(VirtualAddress),
    /// The address is already mapped.
    AlreadyMapped(VirtualAddress),
}

impl From<AllocError> for MapError {
    fn from(_: AllocError) -> Self {
        Self::OutOfMemory
    }
}

impl fmt::Display for MapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory => f.write_str("out of memory for page tables"),
            Self::NotMapped(addr) => write!(f, "{addr} is not mapped"),
            Self::AlreadyMapped(addr) => write!(f, "{addr} is already mapped"),
        }
    }
}

/// A root page table.
#[derive(Debug, PartialEq, Eq)]
pub struct AddressSpace {
    root: PhysicalAddress,
}

impl AddressSpace {
    /// Wraps an existing root table.
    ///
    /// # Safety
    ///
    /// `root` must be the physical address of a valid root page table.
    pub const unsafe fn from_root(root: PhysicalAddress) -> Self {
        Self { root }
    }

    /// Returns a handle to the root table the CPU is currently using.
    pub fn active() -> Self {
        Self {
            root: arch::active_root(),
        }
    }

    /// Allocates a root table with no mappings.
    pub fn new_empty(arena: &mut FrameArena) -> Result<Self, MapError> {
        Ok(Self {
            root: allocate_zeroed(arena)?,
        })
    }

    /// Allocates a root table whose kernel half mirrors the active root.
    ///
    /// The kernel slots are copied as-is, so every space built this way shares the kernel's
    /// lower-level tables. The user slots start empty.
    pub fn create_root(arena: &mut FrameArena) -> Result<Self, MapError> {
        let space = Self::new_empty(arena)?;
        let current = table(arch::active_root());
        let new = table_mut(space.root);
        for slot in layout::KERNEL_SLOTS {
            new.entries[slot] = current.entries[slot];
        }
        Ok(space)
    }

    /// Returns the physical address of the root table.
    pub fn root(&self) -> PhysicalAddress {
        self.root
    }

    /// Makes this the active root.
    ///
    /// # Safety
    ///
    /// The kernel half must map the running code and stack.
    pub unsafe fn activate(&self) {
        unsafe { arch::set_active_root(self.root) };
    }

    /// Copies root entries `slots` from `source` without copying anything beneath them.
    ///
    /// The copies lose their ownership bit, so cleaning this space never frees the
    /// source's tables or pages.
    pub fn alias_range(&mut self, source: &AddressSpace, slots: Range<usize>) {
        let src = table(source.root);
        let dst = table_mut(self.root);
        for slot in slots {
            dst.entries[slot] = shared(src.entries[slot]);
        }
    }

    /// Maps `pages` zero-filled pages starting at `virt`.
    ///
    /// Pages already owned by this space are left untouched. Pages shared with another
    /// space are replaced by a private copy.
    pub fn map_zeroed(
        &mut self,
        arena: &mut FrameArena,
        virt: VirtualAddress,
        pages: usize,
        flags: PageFlags,
    ) -> Result<(), MapError> {
        let base = virt.align_down(layout::PAGE_SIZE);
        for page in 0..pages {
            let addr = base + page * layout::PAGE_SIZE;
            let entry = self.leaf_entry_or_create(arena, addr)?;
            if entry.is_present() && entry.flags().is_owned() {
                continue;
            }

            let frame = allocate_zeroed(arena)?;
            if let Some(source) = entry.address() {
                copy_frame(source, frame);
            }
            *entry = PageEntry::new(frame, leaf_flags(flags));
            arch::flush(addr);
        }
        Ok(())
    }

    /// Maps a single page at `virt` to an existing frame the space takes ownership of.
    pub fn map_frame(
        &mut self,
        arena: &mut FrameArena,
        virt: VirtualAddress,
        frame: PhysicalAddress,
        flags: PageFlags,
    ) -> Result<(), MapError> {
        let entry = self.leaf_entry_or_create(arena, virt.align_down(layout::PAGE_SIZE))?;
        if entry.is_present() {
            return Err(MapError::AlreadyMapped(virt));
        }
        *entry = PageEntry::new(frame, leaf_flags(flags));
        arch::flush(virt);
        Ok(())
    }

    /// Returns the physical address `virt` maps to.
    pub fn translate(&self, virt: VirtualAddress) -> Option<PhysicalAddress> {
        let mut current = table(self.root);
        for level in (0..layout::PAGE_TABLE_LEVELS).rev() {
            let entry = current.entries[virt.page_index(level)];
            let target = entry.address()?;
            if level == 0 {
                return Some(target + virt.page_offset());
            }
            if entry.flags().is_huge() {
                let span = layout::PAGE_SIZE << (9 * level);
                return Some(target + (virt.as_usize() & (span - 1)));
            }
            current = table(target);
        }
        None
    }

    /// Copies `data` into the space at `virt`. Every touched page must be mapped.
    pub fn write_bytes(&self, virt: VirtualAddress, data: &[u8]) -> Result<(), MapError> {
        self.for_each_chunk(virt, data.len(), |ptr, offset, len| {
            // SAFETY: `ptr` addresses `len` bytes inside one mapped frame.
            unsafe { core::ptr::copy_nonoverlapping(data[offset..].as_ptr(), ptr, len) };
        })
    }

    /// Sets `len` bytes at `virt` to `value`.
    pub fn fill(&self, virt: VirtualAddress, len: usize, value: u8) -> Result<(), MapError> {
        self.for_each_chunk(virt, len, |ptr, _, len| {
            // SAFETY: `ptr` addresses `len` bytes inside one mapped frame.
            unsafe { core::ptr::write_bytes(ptr, value, len) };
        })
    }

    /// Copies bytes from the space at `virt` into `buf`.
    pub fn read_bytes(&self, virt: VirtualAddress, buf: &mut [u8]) -> Result<(), MapError> {
        self.for_each_chunk(virt, buf.len(), |ptr, offset, len| {
            // SAFETY: `ptr` addresses `len` bytes inside one mapped frame.
            unsafe { core::ptr::copy_nonoverlapping(ptr, buf[offset..].as_mut_ptr(), len) };
        })
    }

    /// Frees everything this space owns in the user half and clears the user slots.
    ///
    /// Shared entries are cleared without touching their targets.
    pub fn clean_user_mappings(&mut self, arena: &mut FrameArena) -> Result<(), AllocError> {
        let root = table_mut(self.root);
        for slot in layout::USER_SLOTS {
            let entry = root.entries[slot];
            if let Some(target) = entry.address()
                && entry.flags().is_owned()
            {
                free_table(arena, target, layout::PAGE_TABLE_LEVELS - 2)?;
            }
            root.entries[slot].clear();
        }
        Ok(())
    }

    /// Frees the root table itself, and nothing below it.
    pub fn release(self, arena: &mut FrameArena) -> Result<(), AllocError> {
        arena.deallocate(self.root.frame_number())
    }

    fn leaf_entry_or_create(
        &mut self,
        arena: &mut FrameArena,
        virt: VirtualAddress,
    ) -> Result<&'static mut PageEntry, MapError> {
        let mut current = table_mut(self.root);
        for level in (1..layout::PAGE_TABLE_LEVELS).rev() {
            let entry = &mut current.entries[virt.page_index(level)];
            match entry.address() {
                None => *entry = PageEntry::new(allocate_zeroed(arena)?, owned_table_flags()),
                Some(_) if entry.flags().is_huge() => return Err(MapError::AlreadyMapped(virt)),
                Some(source) if !entry.flags().is_owned() => {
                    let copy = allocate_zeroed(arena)?;
                    let (src, dst) = (table(source), table_mut(copy));
                    for (to, from) in dst.entries.iter_mut().zip(src.entries.iter()) {
                        *to = shared(*from);
                    }
                    *entry = PageEntry::new(copy, owned_table_flags());
                }
                Some(_) => {}
            }
            let next = entry.address().ok_or(MapError::NotMapped(virt))?;
            current = table_mut(next);
        }
        Ok(&mut current.entries[virt.page_index(0)])
    }

    fn for_each_chunk(
        &self,
        virt: VirtualAddress,
        len: usize,
        mut f: impl FnMut(*mut u8, usize, usize),
    ) -> Result<(), MapError> {
        let mut done = 0;
        while done < len {
            let addr = virt + done;
            let phys = self.translate(addr).ok_or(MapError::NotMapped(addr))?;
            let chunk = (layout::PAGE_SIZE - addr.page_offset()).min(len - done);
            f(VirtualAddress::direct_mapped(phys).as_mut_ptr(), done, chunk);
            done += chunk;
        }
        Ok(())
    }
}

fn table<'a>(phys: PhysicalAddress) -> &'a PageTable {
    // SAFETY: callers only pass addresses read from present table entries or roots.
    unsafe { &*VirtualAddress::direct_mapped(phys).as_ptr::<PageTable>() }
}

fn table_mut<'a>(phys: PhysicalAddress) -> &'a mut PageTable {
    // SAFETY: as for `table`; the frame-owning address space is the only writer.
    unsafe { &mut *VirtualAddress::direct_mapped(phys).as_mut_ptr::<PageTable>() }
}

fn allocate_zeroed(arena: &mut FrameArena) -> Result<PhysicalAddress, AllocError> {
    let frame = arena.allocate()?.start();
    // SAFETY: the frame was just allocated and is reachable through the direct map.
    unsafe {
        core::ptr::write_bytes(
            VirtualAddress::direct_mapped(frame).as_mut_ptr::<u8>(),
            0,
            layout::PAGE_SIZE,
        )
    };
    Ok(frame)
}

fn copy_frame(from: PhysicalAddress, to: PhysicalAddress) {
    // SAFETY: both are whole frames reachable through the direct map.
    unsafe {
        core::ptr::copy_nonoverlapping(
            VirtualAddress::direct_mapped(from).as_ptr::<u8>(),
            VirtualAddress::direct_mapped(to).as_mut_ptr::<u8>(),
            layout::PAGE_SIZE,
        )
    };
}

fn shared(mut entry: PageEntry) -> PageEntry {
    let mut flags = entry.flags();
    flags.set_owned(false);
    entry.set_flags(flags);
    entry
}

fn leaf_flags(requested: PageFlags) -> PageFlags {
    let mut flags = requested;
    flags.set_present(true);
    flags.set_owned(true);
    flags
}

/// Frees an owned table at `level` and every owned frame beneath it.
fn free_table(
    arena: &mut FrameArena,
    phys: PhysicalAddress,
    level: usize,
) -> Result<(), AllocError> {
    let current = table_mut(phys);
    for entry in current.entries.iter_mut() {
        if let Some(target) = entry.address()
            && entry.flags().is_owned()
        {
            if level == 0 || entry.flags().is_huge() {
                arena.deallocate(target.frame_number())?;
            } else {
                free_table(arena, target, level - 1)?;
            }
        }
        entry.clear();
    }
    arena.deallocate(phys.frame_number())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emulation;

    const USER_BASE: usize = layout::USER_SPACE_START;

    fn user_rw() -> PageFlags {
        let mut flags = PageFlags::empty();
        flags.set_writable(true);
        flags.set_user(true);
        flags
    }

    #[test]
    fn create_root_copies_kernel_half_only() {
        let (mut arena, mut kernel) = emulation::boot(64);
        kernel
            .map_zeroed(&mut arena, VirtualAddress::new(0x20_0000), 1, user_rw())
            .unwrap();
        kernel
            .map_zeroed(&mut arena, VirtualAddress::new(USER_BASE), 1, user_rw())
            .unwrap();

        let space = AddressSpace::create_root(&mut arena).unwrap();
        assert_eq!(
            space.translate(VirtualAddress::new(0x20_0000)),
            kernel.translate(VirtualAddress::new(0x20_0000))
        );
        assert_eq!(space.translate(VirtualAddress::new(USER_BASE)), None);
    }

    #[test]
    fn writes_span_pages() {
        let (mut arena, _kernel) = emulation::boot(64);
        let mut space = AddressSpace::create_root(&mut arena).unwrap();
        let start = VirtualAddress::new(USER_BASE + layout::PAGE_SIZE - 2);
        space.map_zeroed(&mut arena, start, 2, user_rw()).unwrap();

        space.write_bytes(start, b"abcd").unwrap();
        let mut buf = [0u8; 4];
        space.read_bytes(start, &mut buf).unwrap();
        assert_eq!(&buf, b"abcd");
    }

    #[test]
    fn unmapped_write_reports_address() {
        let (mut arena, _kernel) = emulation::boot(64);
        let space = AddressSpace::create_root(&mut arena).unwrap();
        let addr = VirtualAddress::new(USER_BASE);
        assert_eq!(space.write_bytes(addr, b"x"), Err(MapError::NotMapped(addr)));
    }

    #[test]
    fn map_frame_rejects_existing_mapping() {
        let (mut arena, _kernel) = emulation::boot(64);
        let mut space = AddressSpace::create_root(&mut arena).unwrap();
        let addr = VirtualAddress::new(USER_BASE);
        space.map_zeroed(&mut arena, addr, 1, user_rw()).unwrap();

        let frame = arena.allocate().unwrap().start();
        assert_eq!(
            space.map_frame(&mut arena, addr, frame, user_rw()),
            Err(MapError::AlreadyMapped(addr))
        );
    }

    #[test]
    fn clean_and_release_return_every_frame() {
        let (mut arena, _kernel) = emulation::boot(64);
        let before = arena.free_frames();

        let mut space = AddressSpace::create_root(&mut arena).unwrap();
        space
            .map_zeroed(&mut arena, VirtualAddress::new(USER_BASE), 3, user_rw())
            .unwrap();
        space
            .map_zeroed(
                &mut arena,
                VirtualAddress::new(0xffff_ffff_ffff_f000),
                1,
                user_rw(),
            )
            .unwrap();
        assert!(arena.free_frames() < before);

        space.clean_user_mappings(&mut arena).unwrap();
        space.release(&mut arena).unwrap();
        assert_eq!(arena.free_frames(), before);
    }

    #[test]
    fn aliased_pages_survive_cleanup_of_the_alias() {
        let (mut arena, _kernel) = emulation::boot(64);
        let addr = VirtualAddress::new(USER_BASE);

        let mut image = AddressSpace::create_root(&mut arena).unwrap();
        image.map_zeroed(&mut arena, addr, 1, user_rw()).unwrap();
        image.write_bytes(addr, b"cached").unwrap();
        let after_image = arena.free_frames();

        let mut process = AddressSpace::create_root(&mut arena).unwrap();
        process.alias_range(&image, layout::USER_SLOTS);
        assert_eq!(process.translate(addr), image.translate(addr));

        process.clean_user_mappings(&mut arena).unwrap();
        process.release(&mut arena).unwrap();
        assert_eq!(arena.free_frames(), after_image);

        let mut buf = [0u8; 6];
        image.read_bytes(addr, &mut buf).unwrap();
        assert_eq!(&buf, b"cached");
    }

    #[test]
    fn mapping_under_alias_does_not_touch_source() {
        let (mut arena, _kernel) = emulation::boot(64);
        let image_page = VirtualAddress::new(USER_BASE);
        let heap_page = VirtualAddress::new(USER_BASE + layout::PAGE_SIZE);

        let mut image = AddressSpace::create_root(&mut arena).unwrap();
        image.map_zeroed(&mut arena, image_page, 1, user_rw()).unwrap();
        let after_image = arena.free_frames();

        let mut process = AddressSpace::create_root(&mut arena).unwrap();
        process.alias_range(&image, layout::USER_SLOTS);
        process.map_zeroed(&mut arena, heap_page, 1, user_rw()).unwrap();

        assert!(process.translate(heap_page).is_some());
        assert_eq!(image.translate(heap_page), None);
        assert_eq!(process.translate(image_page), image.translate(image_page));

        process.clean_user_mappings(&mut arena).unwrap();
        process.release(&mut arena).unwrap();
        assert_eq!(arena.free_frames(), after_image);
        assert!(image.translate(image_page).is_some());
    }

    #[test]
    fn remapping_shared_page_makes_private_copy() {
        let (mut arena, _kernel) = emulation::boot(64);
        let addr = VirtualAddress::new(USER_BASE);

        let mut image = AddressSpace::create_root(&mut arena).unwrap();
        image.map_zeroed(&mut arena, addr, 1, user_rw()).unwrap();
        image.write_bytes(addr, b"orig").unwrap();

        let mut process = AddressSpace::create_root(&mut arena).unwrap();
        process.alias_range(&image, layout::USER_SLOTS);
        process.map_zeroed(&mut arena, addr, 1, user_rw()).unwrap();
        process.write_bytes(addr, b"new!").unwrap();

        let mut buf = [0u8; 4];
        image.read_bytes(addr, &mut buf).unwrap();
        assert_eq!(&buf, b"orig");
        process.read_bytes(addr, &mut buf).unwrap();
        assert_eq!(&buf, b"new!");
    }

    #[test]
    fn release_frees_exactly_one_frame() {
        let (mut arena, _kernel) = emulation::boot(64);
        let before = arena.free_frames();
        let space = AddressSpace::create_root(&mut arena).unwrap();
        assert_eq!(arena.free_frames(), before - 1);
        space.release(&mut arena).unwrap();
        assert_eq!(arena.free_frames(), before);
    }
}
