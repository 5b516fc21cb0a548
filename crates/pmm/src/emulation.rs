//! Fixtures for running the memory manager on a host.
//!
//! Each thread gets its own emulated machine: physical memory, a frame arena over it and
//! a kernel root table loaded into the emulated CR3.

use crate::{AddressSpace, AddressTranslator, FrameArena, FrameNumber, layout};

/// Sets up `frames` frames of emulated memory for this thread and returns an arena over it.
///
/// Frame zero stays reserved. If this thread already has emulated memory, the arena covers
/// the existing buffer.
pub fn arena(frames: usize) -> FrameArena {
    if AddressTranslator::try_current().is_none() {
        AddressTranslator::set_current(AddressTranslator::emulated(frames * layout::PAGE_SIZE));
    }

    let total = AddressTranslator::current()
        .emulated_size()
        .expect("emulated translator required")
        / layout::PAGE_SIZE;
    let mut arena = FrameArena::new(total);
    arena.release(FrameNumber::new(1), total.saturating_sub(1));
    arena
}

/// Sets up emulated memory plus an empty kernel root, and makes that root active.
pub fn boot(frames: usize) -> (FrameArena, AddressSpace) {
    let mut arena = arena(frames);
    let kernel = AddressSpace::new_empty(&mut arena).expect("emulated memory too small");
    // SAFETY: emulated roots never affect the host's translation.
    unsafe { kernel.activate() };
    (arena, kernel)
}
