/// Holds metadata for a physical memory frame.
///
/// Modeled after Linux's `struct page`, one of these exists for every frame the
/// [`FrameArena`](crate::FrameArena) manages.
#[derive(Clone, Copy, Default)]
pub struct Frame {
    /// Flags identifying the state of this frame.
    pub flags: FrameFlags,
}

impl Frame {
    /// Returns true if the frame can be handed out.
    pub fn is_free(&self) -> bool {
        !self.flags.test(FrameFlag::Allocated) && !self.flags.test(FrameFlag::Reserved)
    }
}

#[derive(Clone, Copy)]
pub enum FrameFlag {
    /// Frame is allocated.
    Allocated = 1 << 0,
    /// Frame is reserved and should not be allocated.
    Reserved = 1 << 1,
}

/// Flags for a physical memory frame.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameFlags(u8);

impl FrameFlags {
    /// Creates a new `FrameFlags` instance with all flags cleared.
    pub const fn new() -> Self {
        Self(0)
    }

    /// Creates a new `FrameFlags` instance with the given flag set.
    pub const fn with(flag: FrameFlag) -> Self {
        Self(flag as u8)
    }

    /// Sets the given flag.
    pub fn set(&mut self, flag: FrameFlag) {
        self.0 |= flag as u8;
    }

    /// Clears the given flag.
    pub fn clear(&mut self, flag: FrameFlag) {
        self.0 &= !(flag as u8);
    }

    /// Tests if the given flag is set.
    pub fn test(&self, flag: FrameFlag) -> bool {
        self.0 & (flag as u8) != 0
    }

    /// Tests the given flag and sets it, returning the previous value.
    pub fn test_and_set(&mut self, flag: FrameFlag) -> bool {
        let old = self.test(flag);
        self.set(flag);
        old
    }
}

impl core::fmt::Debug for FrameFlags {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FrameFlags")
            .field("allocated", &self.test(FrameFlag::Allocated))
            .field("reserved", &self.test(FrameFlag::Reserved))
            .finish()
    }
}
