//! Page table entry flags for software emulation.

/// Page table entry flags for software emulation.
///
/// Bits sit where x86_64 puts them so emulated tables read the same as real ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageFlags(u64);

impl PageFlags {
    const PRESENT: u64 = 1 << 0;
    const WRITABLE: u64 = 1 << 1;
    const USER: u64 = 1 << 2;
    const HUGE: u64 = 1 << 7;
    const OWNED: u64 = 1 << 9;
    const NO_EXECUTE: u64 = 1 << 63;

    const ALL: u64 = Self::PRESENT
        | Self::WRITABLE
        | Self::USER
        | Self::HUGE
        | Self::OWNED
        | Self::NO_EXECUTE;

    /// Creates empty page flags (page not present).
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Creates page flags from raw entry bits, dropping any address bits.
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits & Self::ALL)
    }

    /// Returns the raw bits of these flags.
    pub const fn bits(self) -> u64 {
        self.0
    }

    fn set(&mut self, bit: u64, value: bool) {
        if value {
            self.0 |= bit;
        } else {
            self.0 &= !bit;
        }
    }

    /// Returns whether the present bit is set.
    pub fn is_present(self) -> bool {
        (self.0 & Self::PRESENT) != 0
    }

    /// Sets or clears the present bit.
    pub fn set_present(&mut self, present: bool) {
        self.set(Self::PRESENT, present);
    }

    /// Returns whether the writable bit is set.
    pub fn is_writable(self) -> bool {
        (self.0 & Self::WRITABLE) != 0
    }

    /// Sets or clears the writable bit.
    pub fn set_writable(&mut self, writable: bool) {
        self.set(Self::WRITABLE, writable);
    }

    /// Returns whether the user-accessible bit is set.
    pub fn is_user(self) -> bool {
        (self.0 & Self::USER) != 0
    }

    /// Sets or clears the user-accessible bit.
    pub fn set_user(&mut self, user: bool) {
        self.set(Self::USER, user);
    }

    /// Returns whether the entry maps a large page directly.
    pub fn is_huge(self) -> bool {
        (self.0 & Self::HUGE) != 0
    }

    /// Sets or clears the large page bit.
    pub fn set_huge(&mut self, huge: bool) {
        self.set(Self::HUGE, huge);
    }

    /// Returns whether the target frame is owned by this address space.
    pub fn is_owned(self) -> bool {
        (self.0 & Self::OWNED) != 0
    }

    /// Sets or clears the ownership bit.
    pub fn set_owned(&mut self, owned: bool) {
        self.set(Self::OWNED, owned);
    }
}

impl Default for PageFlags {
    fn default() -> Self {
        Self::empty()
    }
}
