//! Argument vector marshaling.
//!
//! The argument frame starts with `ARGV_CAPACITY` pointers; the strings they point at are
//! packed, NUL-terminated, into the rest of the frame.

use alloc::{boxed::Box, vec};

use pmm::{AddressSpace, PAGE_SIZE, VirtualAddress};

use crate::Error;

/// Maximum number of arguments, including the command name.
pub const ARGV_CAPACITY: usize = 32;

const POINTER_BYTES: usize = ARGV_CAPACITY * size_of::<u64>();

/// An argument frame under construction, addressed as it will be seen at `base`.
pub struct ArgVector {
    base: VirtualAddress,
    frame: Box<[u8]>,
    argc: usize,
    used: usize,
}

impl ArgVector {
    pub fn new(base: VirtualAddress) -> Self {
        Self {
            base,
            frame: vec![0; PAGE_SIZE].into_boxed_slice(),
            argc: 0,
            used: 0,
        }
    }

    /// Appends one argument.
    ///
    /// Fails with [`Error::Full`] when all pointer slots are taken or the string does not
    /// fit with its terminator; the vector is unchanged in that case.
    pub fn push(&mut self, arg: &str) -> Result<(), Error> {
        let at = POINTER_BYTES + self.used;
        if self.argc >= ARGV_CAPACITY || at + arg.len() + 1 > PAGE_SIZE {
            return Err(Error::Full);
        }

        self.frame[at..at + arg.len()].copy_from_slice(arg.as_bytes());
        self.frame[at + arg.len()] = 0;

        let slot = self.argc * size_of::<u64>();
        let pointer = (self.base + at).as_u64();
        self.frame[slot..slot + size_of::<u64>()].copy_from_slice(&pointer.to_le_bytes());

        self.argc += 1;
        self.used += arg.len() + 1;
        Ok(())
    }

    /// Pushes `command`, then every whitespace-separated token of `args`, and returns the
    /// argument count.
    ///
    /// On failure the arguments pushed so far stay in place and their count comes back with
    /// the error.
    pub fn fill(&mut self, command: &str, args: &str) -> Result<usize, (usize, Error)> {
        let tokens = core::iter::once(command).chain(args.split_ascii_whitespace());
        for token in tokens {
            self.push(token).map_err(|err| (self.argc, err))?;
        }
        Ok(self.argc)
    }

    pub fn argc(&self) -> usize {
        self.argc
    }

    /// Address of `argv[0]` as seen by the application.
    pub fn argv(&self) -> VirtualAddress {
        self.base
    }

    /// Returns argument `index`.
    pub fn get(&self, index: usize) -> Option<&str> {
        if index >= self.argc {
            return None;
        }
        let slot = index * size_of::<u64>();
        let mut pointer = [0u8; 8];
        pointer.copy_from_slice(&self.frame[slot..slot + 8]);
        let start = u64::from_le_bytes(pointer) as usize - self.base.as_usize();
        let len = self.frame[start..].iter().position(|&b| b == 0)?;
        core::str::from_utf8(&self.frame[start..start + len]).ok()
    }

    /// Copies the frame into `space` at its base address, which must be mapped.
    pub fn write_to(&self, space: &AddressSpace) -> Result<(), Error> {
        space.write_bytes(self.base, &self.frame)?;
        Ok(())
    }
}
