//! Frame numbers for physical memory management.

use core::fmt;
use core::ops::{Add, Sub};

use crate::{PhysicalAddress, layout};

/// A physical memory frame number.
///
/// Frame numbers are zero-indexed and correspond to PAGE_SIZE-aligned physical addresses.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct FrameNumber(usize);

impl FrameNumber {
    /// Creates a new frame number.
    #[inline]
    pub const fn new(number: usize) -> Self {
        Self(number)
    }

    /// Returns the raw frame number.
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0
    }

    /// Returns the physical address at the start of this frame.
    #[inline]
    pub const fn start(self) -> PhysicalAddress {
        PhysicalAddress::new(self.0 * layout::PAGE_SIZE)
    }
}

impl fmt::Debug for FrameNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FrameNumber({})", self.0)
    }
}

impl fmt::Display for FrameNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<PhysicalAddress> for FrameNumber {
    #[inline]
    fn from(addr: PhysicalAddress) -> Self {
        addr.frame_number()
    }
}

impl Add<usize> for FrameNumber {
    type Output = Self;

    #[inline]
    fn add(self, rhs: usize) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl Sub<FrameNumber> for FrameNumber {
    type Output = usize;

    #[inline]
    fn sub(self, rhs: FrameNumber) -> Self::Output {
        self.0 - rhs.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_address() {
        assert_eq!(FrameNumber::new(2).start().as_usize(), 2 * layout::PAGE_SIZE);
    }

    #[test]
    fn from_unaligned_address() {
        let addr = PhysicalAddress::new(layout::PAGE_SIZE * 3 + 10);
        assert_eq!(FrameNumber::from(addr), FrameNumber::new(3));
    }

    #[test]
    fn distance_between_frames() {
        assert_eq!(FrameNumber::new(10) - FrameNumber::new(3), 7);
        assert_eq!(FrameNumber::new(10) + 5, FrameNumber::new(15));
    }
}
