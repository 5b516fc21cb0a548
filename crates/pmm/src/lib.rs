#![cfg_attr(not(any(test, feature = "software-emulation")), no_std)]

//! # Kestrel Memory Manager (PMM)
//!
//! The Kestrel Memory Manager is the low-level memory management crate for the Kestrel
//! kernel. It provides:
//!
//! - Physical frame allocation from the boot memory map.
//! - 4-level page tables split into a shared kernel half and a private application half.
//! - Root table creation, aliasing and release for process address spaces.
//! - Software emulation for testing in non-kernel environments.

extern crate alloc;

mod address;
mod address_space;
mod arch;
mod frame;
mod frame_arena;
pub mod layout;
mod numbers;
mod page_table;

#[cfg(any(test, feature = "software-emulation"))]
pub mod emulation;

pub use address::{AddressTranslator, PhysicalAddress, VirtualAddress};
pub use address_space::{AddressSpace, MapError};
pub use arch::{PageFlags, flush};
pub use frame::{Frame, FrameFlag, FrameFlags};
pub use frame_arena::{AllocError, BootMemoryRegion, FrameArena};
pub use numbers::FrameNumber;
pub use page_table::{PageEntry, PageTable};

pub use layout::PAGE_SIZE;
