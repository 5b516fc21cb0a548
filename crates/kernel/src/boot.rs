//! The hand-off record from the UEFI loader.

use pmm::{BootMemoryRegion, PAGE_SIZE, PhysicalAddress};

/// Passed by the loader in `rdi` to `kenter`.
///
/// Every buffer it points at lives in loader-data memory, which the kernel never hands out.
#[repr(C)]
pub struct BootInfo {
    memory_map: *const u8,
    memory_map_size: usize,
    descriptor_size: usize,
    volume_image: *const u8,
    volume_size: usize,
    command_line: *const u8,
    command_line_len: usize,
}

// SAFETY: the record and its buffers are immutable after boot.
unsafe impl Sync for BootInfo {}

impl BootInfo {
    /// Iterates the UEFI memory map.
    pub fn memory_map(&self) -> impl Iterator<Item = MemoryDescriptor> + '_ {
        let count = self
            .memory_map_size
            .checked_div(self.descriptor_size)
            .unwrap_or(0);
        (0..count).map(move |i| {
            // SAFETY: the loader provides `count` descriptors, `descriptor_size` bytes apart.
            unsafe {
                self.memory_map
                    .add(i * self.descriptor_size)
                    .cast::<MemoryDescriptor>()
                    .read_unaligned()
            }
        })
    }

    /// The FAT volume the loader read from the boot device.
    pub fn volume_image(&self) -> &'static [u8] {
        if self.volume_image.is_null() {
            return &[];
        }
        // SAFETY: the loader keeps the image in memory for the kernel's lifetime.
        unsafe { core::slice::from_raw_parts(self.volume_image, self.volume_size) }
    }

    /// Text the loader wants typed into the shell at startup.
    pub fn command_line(&self) -> &'static str {
        if self.command_line.is_null() {
            return "";
        }
        // SAFETY: as for `volume_image`.
        let bytes = unsafe { core::slice::from_raw_parts(self.command_line, self.command_line_len) };
        core::str::from_utf8(bytes).unwrap_or("")
    }
}

/// `EFI_MEMORY_DESCRIPTOR`.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct MemoryDescriptor {
    pub memory_type: u32,
    pub physical_start: u64,
    pub virtual_start: u64,
    pub number_of_pages: u64,
    pub attribute: u64,
}

impl MemoryDescriptor {
    const BOOT_SERVICES_CODE: u32 = 3;
    const BOOT_SERVICES_DATA: u32 = 4;
    const CONVENTIONAL: u32 = 7;
}

impl BootMemoryRegion for MemoryDescriptor {
    fn base(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.physical_start as usize)
    }

    fn size(&self) -> usize {
        self.number_of_pages as usize * PAGE_SIZE
    }

    /// Boot services memory is free once the loader has exited boot services.
    fn is_usable(&self) -> bool {
        matches!(
            self.memory_type,
            Self::BOOT_SERVICES_CODE | Self::BOOT_SERVICES_DATA | Self::CONVENTIONAL
        )
    }
}
