//! Kernel memory: the identity map, the heap, and the frame arena.

use alloc::vec::Vec;
use core::{alloc::Layout, ptr::NonNull};

use linked_list_allocator::Heap;
use pmm::{
    AddressSpace, AddressTranslator, BootMemoryRegion, FrameArena, PAGE_SIZE, PageEntry,
    PageFlags, PageTable, PhysicalAddress, layout,
};
use spin::{Mutex, Once};

use crate::{
    arch,
    boot::{BootInfo, MemoryDescriptor},
};

/// Gigabytes of physical memory mapped one-to-one in the kernel half.
const IDENTITY_GIB: usize = 64;
const HEAP_BYTES: usize = 16 * 1024 * 1024;

#[repr(C, align(4096))]
struct IdentityTables {
    pml4: PageTable,
    pdpt: PageTable,
    directories: [PageTable; IDENTITY_GIB],
}

static mut IDENTITY_TABLES: IdentityTables = IdentityTables {
    pml4: PageTable::new(),
    pdpt: PageTable::new(),
    directories: [const { PageTable::new() }; IDENTITY_GIB],
};

static FRAMES: Once<Mutex<FrameArena>> = Once::new();

/// Sets up paging, the heap and the frame arena, in that order.
pub fn init(boot_info: &BootInfo) {
    AddressTranslator::set_current(AddressTranslator::hardware(0));
    setup_identity_paging();
    log::debug!("identity mapped {IDENTITY_GIB} GiB");

    let heap = init_heap(boot_info);
    log::debug!("kernel heap at {heap} ({} KiB)", HEAP_BYTES / 1024);

    let regions: Vec<MemoryDescriptor> = boot_info.memory_map().collect();
    let mut arena = FrameArena::from_boot_map(&regions);
    arena.reserve(heap.frame_number(), HEAP_BYTES / PAGE_SIZE);
    log::info!(
        "physical memory: {} of {} frames free",
        arena.free_frames(),
        arena.total_frames()
    );
    FRAMES.call_once(|| Mutex::new(arena));
}

/// The arena every physical frame outside the heap is allocated from.
pub fn frames() -> &'static Mutex<FrameArena> {
    FRAMES.get().expect("frame arena used before mem::init")
}

fn setup_identity_paging() {
    let mut table_flags = PageFlags::empty();
    table_flags.set_present(true);
    table_flags.set_writable(true);
    let mut page_flags = table_flags;
    page_flags.set_huge(true);

    // SAFETY: runs once on the boot CPU before anything else can see the tables.
    let tables = unsafe { &mut *(&raw mut IDENTITY_TABLES) };
    for (gib, directory) in tables.directories.iter_mut().enumerate() {
        for (slot, entry) in directory.entries.iter_mut().enumerate() {
            let base = (gib * layout::ENTRY_COUNT + slot) * layout::LARGE_PAGE_SIZE;
            *entry = PageEntry::new(PhysicalAddress::new(base), page_flags);
        }
        tables.pdpt.entries[gib] = PageEntry::new(physical(directory), table_flags);
    }
    tables.pml4.entries[0] = PageEntry::new(physical(&tables.pdpt), table_flags);

    // SAFETY: the loader runs us identity mapped, and the new root maps the same addresses.
    unsafe { AddressSpace::from_root(physical(&tables.pml4)).activate() };
}

/// Kernel statics are identity mapped.
fn physical(table: &PageTable) -> PhysicalAddress {
    PhysicalAddress::new(table as *const PageTable as usize)
}

/// Carves the heap out of the first usable region large enough to hold it.
fn init_heap(boot_info: &BootInfo) -> PhysicalAddress {
    let start = boot_info
        .memory_map()
        .filter(|region| region.is_usable())
        .map(|region| {
            let base = region.base().align_up(PAGE_SIZE).max(PhysicalAddress::new(PAGE_SIZE));
            let end = region.base() + region.size();
            (base, end)
        })
        .find(|&(base, end)| end > base && end - base >= HEAP_BYTES)
        .map(|(base, _)| base)
        .expect("no usable region can hold the kernel heap");

    // SAFETY: the region is free RAM, identity mapped, and reserved in the arena below.
    unsafe {
        KERNEL_ALLOCATOR
            .heap
            .lock()
            .init(start.as_usize() as *mut u8, HEAP_BYTES)
    };
    start
}

#[cfg_attr(not(test), global_allocator)]
static KERNEL_ALLOCATOR: KernelAllocator = KernelAllocator {
    heap: Mutex::new(Heap::empty()),
};

struct KernelAllocator {
    heap: Mutex<Heap>,
}

unsafe impl alloc::alloc::GlobalAlloc for KernelAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        arch::without_interrupts(|| {
            self.heap
                .lock()
                .allocate_first_fit(layout)
                .map(NonNull::as_ptr)
                .unwrap_or(core::ptr::null_mut())
        })
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        let Some(ptr) = NonNull::new(ptr) else {
            return;
        };
        arch::without_interrupts(|| unsafe {
            self.heap.lock().deallocate(ptr, layout)
        });
    }
}
