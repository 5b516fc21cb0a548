//! Address types for physical and virtual memory management.
//!
//! This module provides architecture-independent wrappers around physical and virtual
//! addresses, plus the translator the paging code uses to reach physical memory.

use core::fmt;
use core::ops::{Add, Sub};

use crate::{FrameNumber, layout};

#[cfg(any(test, feature = "software-emulation"))]
use crate::arch::EmulatedMemory;

/// Address translator for converting between physical and virtual addresses.
///
/// This enum supports two modes:
/// - Hardware: physical memory is mapped at a fixed offset (zero for an identity-mapped kernel)
/// - Emulated: physical memory is a host buffer (testing mode)
pub enum AddressTranslator {
    /// Hardware translation using a direct-map offset.
    Hardware { direct_map_offset: usize },
    /// Emulated translation using a simulated memory region.
    #[cfg(any(test, feature = "software-emulation"))]
    Emulated(EmulatedMemory),
}

impl AddressTranslator {
    /// Creates a new hardware translator with the given direct-map offset.
    pub const fn hardware(direct_map_offset: usize) -> Self {
        Self::Hardware { direct_map_offset }
    }

    /// Creates a new emulated translator backed by `size` bytes of host memory.
    #[cfg(any(test, feature = "software-emulation"))]
    pub fn emulated(size: usize) -> Self {
        Self::Emulated(EmulatedMemory::new(size))
    }

    /// Sets the global address translator.
    ///
    /// # Panics
    ///
    /// Panics if the translator has already been set.
    pub fn set_current(translator: AddressTranslator) {
        #[cfg(not(any(test, feature = "software-emulation")))]
        {
            if ADDRESS_TRANSLATOR.get().is_some() {
                panic!("address translator already set");
            }
            ADDRESS_TRANSLATOR.call_once(|| translator);
        }

        #[cfg(any(test, feature = "software-emulation"))]
        {
            ADDRESS_TRANSLATOR.with(|t| {
                if t.get().is_some() {
                    panic!("address translator already set");
                }
                t.call_once(|| translator);
            });
        }
    }

    /// Returns a reference to the current global address translator.
    ///
    /// # Panics
    ///
    /// Panics if the translator has not been set yet.
    pub fn current() -> &'static AddressTranslator {
        Self::try_current().expect(
            "address translator not set; call AddressTranslator::set_current during initialization",
        )
    }

    /// Returns the current global address translator if it has been set.
    pub fn try_current() -> Option<&'static AddressTranslator> {
        #[cfg(not(any(test, feature = "software-emulation")))]
        {
            ADDRESS_TRANSLATOR.get()
        }

        #[cfg(any(test, feature = "software-emulation"))]
        {
            ADDRESS_TRANSLATOR.with(|t| {
                // SAFETY: each thread owns its translator, and `spin::Once` never hands out
                // a value that is later replaced, so the reference lives as long as the thread.
                t.get()
                    .map(|translator| unsafe { &*(translator as *const AddressTranslator) })
            })
        }
    }

    /// Translates a physical address to a virtual address.
    pub fn phys_to_virt(&self, phys: usize) -> usize {
        match self {
            Self::Hardware { direct_map_offset } => phys.wrapping_add(*direct_map_offset),
            #[cfg(any(test, feature = "software-emulation"))]
            Self::Emulated(mem) => mem.translate(phys) as usize,
        }
    }

    /// Translates a virtual address to a physical address.
    pub fn virt_to_phys(&self, virt: usize) -> usize {
        match self {
            Self::Hardware { direct_map_offset } => virt.wrapping_sub(*direct_map_offset),
            #[cfg(any(test, feature = "software-emulation"))]
            Self::Emulated(mem) => mem.ptr_to_phys(virt as *const u8),
        }
    }

    /// Translates a physical address to a typed pointer.
    pub fn phys_to_ptr<T>(&self, phys: usize) -> *mut T {
        self.phys_to_virt(phys) as *mut T
    }

    /// Returns the number of bytes of emulated physical memory, if emulated.
    #[cfg(any(test, feature = "software-emulation"))]
    pub fn emulated_size(&self) -> Option<usize> {
        match self {
            Self::Hardware { .. } => None,
            Self::Emulated(mem) => Some(mem.size()),
        }
    }
}

/// Global address translator.
///
/// In test/software-emulation mode, this is thread-local so each test gets its own
/// emulated physical memory.
#[cfg(not(any(test, feature = "software-emulation")))]
static ADDRESS_TRANSLATOR: spin::Once<AddressTranslator> = spin::Once::new();

#[cfg(any(test, feature = "software-emulation"))]
std::thread_local! {
    static ADDRESS_TRANSLATOR: spin::Once<AddressTranslator> = spin::Once::new();
}

macro_rules! impl_address_common {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[repr(transparent)]
        pub struct $name(usize);

        impl $name {
            /// Returns the raw address value.
            #[inline]
            pub const fn as_usize(self) -> usize {
                self.0
            }

            /// Returns the raw address value as a `u64`.
            #[inline]
            pub const fn as_u64(self) -> u64 {
                self.0 as u64
            }

            /// Adds `rhs` bytes, returning `None` if the sum leaves the address space.
            #[inline]
            pub fn checked_add(self, rhs: usize) -> Option<Self> {
                self.0.checked_add(rhs).and_then(Self::try_new)
            }

            /// Checks if the address is aligned to the given power-of-two alignment.
            #[inline]
            pub const fn is_aligned(self, align: usize) -> bool {
                assert!(align.is_power_of_two(), "alignment must be a power of two");
                self.0 & (align - 1) == 0
            }

            /// Aligns the address down to the given power-of-two alignment.
            #[inline]
            pub const fn align_down(self, align: usize) -> Self {
                assert!(align.is_power_of_two(), "alignment must be a power of two");
                Self(self.0 & !(align - 1))
            }

            /// Aligns the address up to the given power-of-two alignment.
            #[inline]
            pub const fn align_up(self, align: usize) -> Self {
                assert!(align.is_power_of_two(), "alignment must be a power of two");
                Self(self.0.wrapping_add(align - 1) & !(align - 1))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:#x})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:#x}", self.0)
            }
        }

        impl From<u64> for $name {
            #[inline]
            fn from(addr: u64) -> Self {
                Self::new(addr as usize)
            }
        }

        impl From<usize> for $name {
            #[inline]
            fn from(addr: usize) -> Self {
                Self::new(addr)
            }
        }

        impl Add<usize> for $name {
            type Output = Self;

            #[inline]
            fn add(self, rhs: usize) -> Self::Output {
                match self.checked_add(rhs) {
                    Some(addr) => addr,
                    None => panic!("address arithmetic overflowed"),
                }
            }
        }

        impl Sub<usize> for $name {
            type Output = Self;

            #[inline]
            fn sub(self, rhs: usize) -> Self::Output {
                Self::new(self.0 - rhs)
            }
        }

        impl Sub<$name> for $name {
            type Output = usize;

            #[inline]
            fn sub(self, rhs: $name) -> Self::Output {
                self.0 - rhs.0
            }
        }
    };
}

impl_address_common!(
    PhysicalAddress,
    "A physical memory address.\n\n\
     Physical addresses are limited to the architecture's physical address width."
);

impl PhysicalAddress {
    /// Creates a new physical address.
    ///
    /// # Panics
    ///
    /// Panics if the address exceeds the maximum physical address width.
    #[inline]
    pub const fn new(addr: usize) -> Self {
        assert!(
            layout::validate_physical(addr),
            "physical address exceeds maximum width"
        );
        Self(addr)
    }

    /// Creates a physical address, returning `None` past the maximum width.
    #[inline]
    pub const fn try_new(addr: usize) -> Option<Self> {
        if layout::validate_physical(addr) {
            Some(Self(addr))
        } else {
            None
        }
    }

    /// Converts a direct-mapped virtual address back to a physical address.
    #[inline]
    pub fn from_direct_mapped(virt: VirtualAddress) -> Self {
        let translator = AddressTranslator::current();
        Self::new(translator.virt_to_phys(virt.as_usize()))
    }

    /// Returns the frame number containing this physical address.
    #[inline]
    pub fn frame_number(self) -> FrameNumber {
        FrameNumber::new(self.0 / layout::PAGE_SIZE)
    }
}

impl_address_common!(
    VirtualAddress,
    "A virtual memory address.\n\n\
     Virtual addresses are always canonical: bits 48-63 repeat bit 47."
);

impl VirtualAddress {
    /// Creates a new virtual address.
    ///
    /// # Panics
    ///
    /// Panics if the address is not canonical.
    #[inline]
    pub const fn new(addr: usize) -> Self {
        assert!(layout::validate_virtual(addr), "address is not canonical");
        Self(addr)
    }

    /// Creates a virtual address, returning `None` for non-canonical values.
    #[inline]
    pub const fn try_new(addr: usize) -> Option<Self> {
        if layout::validate_virtual(addr) {
            Some(Self(addr))
        } else {
            None
        }
    }

    /// Returns the address through which the kernel reaches the given physical address.
    ///
    /// In emulated mode this is a host pointer, which is not canonical for the guest, so
    /// the validity check is bypassed.
    #[inline]
    pub fn direct_mapped(phys: PhysicalAddress) -> Self {
        let translator = AddressTranslator::current();
        let virt = translator.phys_to_virt(phys.as_usize());

        #[cfg(any(test, feature = "software-emulation"))]
        if matches!(translator, AddressTranslator::Emulated(_)) {
            return Self(virt);
        }

        Self::new(virt)
    }

    /// Converts the address to a pointer.
    #[inline]
    pub const fn as_ptr<T>(self) -> *const T {
        self.0 as *const T
    }

    /// Converts the address to a mutable pointer.
    #[inline]
    pub const fn as_mut_ptr<T>(self) -> *mut T {
        self.0 as *mut T
    }

    /// Returns the byte offset within the containing page.
    #[inline]
    pub const fn page_offset(self) -> usize {
        self.0 & (layout::PAGE_SIZE - 1)
    }

    /// Returns the page table index at the specified level (0 = page table, 3 = PML4).
    #[inline]
    pub const fn page_index(self, level: usize) -> usize {
        layout::page_index(self.0, level)
    }

    /// Returns true if this address lies in the user half of the address space.
    #[inline]
    pub const fn is_user(self) -> bool {
        self.0 >= layout::USER_SPACE_START
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod physical_address {
        use super::*;

        #[test]
        fn new_max_valid_address() {
            let max_addr = (1usize << layout::MAX_PHYSICAL_BITS) - 1;
            assert_eq!(PhysicalAddress::new(max_addr).as_usize(), max_addr);
        }

        #[test]
        #[should_panic(expected = "physical address exceeds maximum width")]
        fn new_exceeds_max() {
            PhysicalAddress::new(1usize << layout::MAX_PHYSICAL_BITS);
        }

        #[test]
        fn frame_number_of_unaligned_address() {
            let addr = PhysicalAddress::new(3 * layout::PAGE_SIZE + 12);
            assert_eq!(addr.frame_number(), FrameNumber::new(3));
        }

        #[test]
        fn align_to_page() {
            let addr = PhysicalAddress::new(0x1234);
            assert_eq!(addr.align_down(layout::PAGE_SIZE), PhysicalAddress::new(0x1000));
            assert_eq!(addr.align_up(layout::PAGE_SIZE), PhysicalAddress::new(0x2000));
        }
    }

    mod virtual_address {
        use super::*;

        #[test]
        fn upper_half_is_canonical() {
            let addr = VirtualAddress::new(0xffff_8000_0000_0000);
            assert!(addr.is_user());
            assert_eq!(addr.page_index(3), 256);
        }

        #[test]
        #[should_panic(expected = "address is not canonical")]
        fn rejects_non_canonical() {
            VirtualAddress::new(0x0000_8000_0000_0000);
        }

        #[test]
        fn try_new_reports_non_canonical() {
            assert_eq!(VirtualAddress::try_new(0x0001_0000_0000_0000), None);
            assert!(VirtualAddress::try_new(0x1000).is_some());
        }

        #[test]
        fn page_indices_of_top_page() {
            let addr = VirtualAddress::new(0xffff_ffff_ffff_f123);
            assert_eq!(addr.page_offset(), 0x123);
            for level in 0..layout::PAGE_TABLE_LEVELS {
                assert_eq!(addr.page_index(level), 511);
            }
        }

        #[test]
        fn checked_add_stops_at_top_of_memory() {
            let top = VirtualAddress::new(0xffff_ffff_ffff_f000);
            assert_eq!(top.checked_add(0xfff), Some(VirtualAddress::new(usize::MAX)));
            assert_eq!(top.checked_add(0x1000), None);
        }

        #[test]
        #[should_panic(expected = "address arithmetic overflowed")]
        fn add_past_top_of_memory_panics() {
            let _ = VirtualAddress::new(0xffff_ffff_ffff_f000) + 0x2000;
        }

        #[test]
        fn kernel_half_is_not_user() {
            assert!(!VirtualAddress::new(0x10_0000).is_user());
        }

        #[test]
        fn align_up_to_next_page() {
            let addr = VirtualAddress::new(0xffff_8000_0000_0001);
            assert_eq!(
                addr.align_up(layout::PAGE_SIZE),
                VirtualAddress::new(0xffff_8000_0000_1000)
            );
        }
    }

    mod direct_mapping {
        use super::*;

        fn setup_offset() {
            if AddressTranslator::try_current().is_none() {
                AddressTranslator::set_current(AddressTranslator::hardware(0));
            }
        }

        #[test]
        fn identity_offset_round_trip() {
            setup_offset();
            let phys = PhysicalAddress::new(0x1234);
            let virt = VirtualAddress::direct_mapped(phys);
            assert_eq!(virt.as_usize(), 0x1234);
            assert_eq!(PhysicalAddress::from_direct_mapped(virt), phys);
        }

        #[test]
        #[should_panic(expected = "address translator already set")]
        fn panics_on_double_set() {
            AddressTranslator::set_current(AddressTranslator::hardware(0));
            AddressTranslator::set_current(AddressTranslator::hardware(0x1000));
        }
    }
}
