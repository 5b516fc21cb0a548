//! Page table entry flags for x86_64 architecture.

use x86_64::structures::paging::PageTableFlags;

/// Page table entry flags for x86_64.
///
/// This wraps the x86_64 crate's page table entry flags. The first software-available
/// bit marks entries whose target frame belongs to the address space holding the entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageFlags(PageTableFlags);

impl PageFlags {
    const OWNED: PageTableFlags = PageTableFlags::BIT_9;

    /// Creates empty page flags (page not present).
    pub const fn empty() -> Self {
        Self(PageTableFlags::empty())
    }

    /// Creates page flags from raw entry bits, dropping any address bits.
    pub const fn from_bits(bits: u64) -> Self {
        Self(PageTableFlags::from_bits_truncate(bits))
    }

    /// Returns the raw bits of these flags.
    pub const fn bits(self) -> u64 {
        self.0.bits()
    }

    /// Returns whether the present bit is set.
    pub fn is_present(self) -> bool {
        self.0.contains(PageTableFlags::PRESENT)
    }

    /// Sets or clears the present bit.
    pub fn set_present(&mut self, present: bool) {
        self.0.set(PageTableFlags::PRESENT, present);
    }

    /// Returns whether the writable bit is set.
    pub fn is_writable(self) -> bool {
        self.0.contains(PageTableFlags::WRITABLE)
    }

    /// Sets or clears the writable bit.
    pub fn set_writable(&mut self, writable: bool) {
        self.0.set(PageTableFlags::WRITABLE, writable);
    }

    /// Returns whether the user-accessible bit is set.
    pub fn is_user(self) -> bool {
        self.0.contains(PageTableFlags::USER_ACCESSIBLE)
    }

    /// Sets or clears the user-accessible bit.
    pub fn set_user(&mut self, user: bool) {
        self.0.set(PageTableFlags::USER_ACCESSIBLE, user);
    }

    /// Returns whether the entry maps a large page directly.
    pub fn is_huge(self) -> bool {
        self.0.contains(PageTableFlags::HUGE_PAGE)
    }

    /// Sets or clears the large page bit.
    pub fn set_huge(&mut self, huge: bool) {
        self.0.set(PageTableFlags::HUGE_PAGE, huge);
    }

    /// Returns whether the target frame is owned by this address space.
    pub fn is_owned(self) -> bool {
        self.0.contains(Self::OWNED)
    }

    /// Sets or clears the ownership bit.
    pub fn set_owned(&mut self, owned: bool) {
        self.0.set(Self::OWNED, owned);
    }
}

impl Default for PageFlags {
    fn default() -> Self {
        Self::empty()
    }
}
