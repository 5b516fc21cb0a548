//! ELF executable validation.

use alloc::vec::Vec;

use ::elf::{ElfBytes, ParseError, abi, endian::AnyEndian, file::Class};
use pmm::{VirtualAddress, layout};

use crate::Error;

/// A PT_LOAD segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadSegment {
    pub vaddr: VirtualAddress,
    /// Offset of the segment's bytes in the file.
    pub offset: usize,
    pub file_size: usize,
    pub mem_size: usize,
}

impl LoadSegment {
    pub fn end(&self) -> VirtualAddress {
        self.vaddr + self.mem_size
    }

    /// Returns the number of pages the segment touches.
    pub fn pages(&self) -> usize {
        layout::pages_for(self.vaddr.page_offset() + self.mem_size)
    }
}

/// An executable that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutableImage {
    pub entry: VirtualAddress,
    pub segments: Vec<LoadSegment>,
}

impl ExecutableImage {
    /// Validates `bytes` as a statically linked x86_64 executable placed in the
    /// application half of the address space.
    ///
    /// A file without the ELF magic fails with [`Error::InvalidFile`]. Anything else this
    /// loader cannot run, such as shared objects, fails with [`Error::InvalidFormat`].
    pub fn parse(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() < abi::EI_NIDENT {
            return Err(Error::InvalidFile);
        }
        let file = ElfBytes::<AnyEndian>::minimal_parse(bytes).map_err(|err| match err {
            ParseError::BadMagic(_) => Error::InvalidFile,
            other => {
                log::debug!("rejecting ELF image: {other:?}");
                Error::InvalidFormat
            }
        })?;

        let ehdr = &file.ehdr;
        if ehdr.class != Class::ELF64 || ehdr.e_type != abi::ET_EXEC {
            return Err(Error::InvalidFormat);
        }
        if ehdr.e_machine != abi::EM_X86_64 {
            return Err(Error::InvalidFormat);
        }

        let table = file.segments().ok_or(Error::InvalidFormat)?;
        let mut segments = Vec::new();
        for phdr in table.iter().filter(|p| p.p_type == abi::PT_LOAD) {
            let segment = LoadSegment {
                vaddr: user_address(phdr.p_vaddr)?,
                offset: phdr.p_offset as usize,
                file_size: phdr.p_filesz as usize,
                mem_size: phdr.p_memsz as usize,
            };
            let in_file = segment
                .offset
                .checked_add(segment.file_size)
                .is_some_and(|end| end <= bytes.len());
            if !in_file || segment.file_size > segment.mem_size {
                return Err(Error::InvalidFormat);
            }
            let end = phdr
                .p_vaddr
                .checked_add(phdr.p_memsz)
                .ok_or(Error::InvalidFormat)?;
            user_address(end)?;
            segments.push(segment);
        }
        if segments.is_empty() {
            return Err(Error::InvalidFormat);
        }

        Ok(Self {
            entry: user_address(ehdr.e_entry)?,
            segments,
        })
    }

    /// Returns the highest address any segment reaches.
    pub fn load_end(&self) -> VirtualAddress {
        self.segments
            .iter()
            .map(LoadSegment::end)
            .max()
            .unwrap_or(self.entry)
    }
}

fn user_address(addr: u64) -> Result<VirtualAddress, Error> {
    VirtualAddress::try_new(addr as usize)
        .filter(|addr| addr.is_user())
        .ok_or(Error::InvalidFormat)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use alloc::vec;

    pub(crate) const BASE: u64 = 0xffff_8000_0000_0000;

    /// Writes minimal little-endian ELF64 images.
    pub(crate) struct ElfBuilder {
        e_type: u16,
        entry: u64,
        segments: Vec<(u64, Vec<u8>, u64)>,
    }

    impl ElfBuilder {
        pub(crate) fn executable(entry: u64) -> Self {
            Self {
                e_type: abi::ET_EXEC,
                entry,
                segments: Vec::new(),
            }
        }

        pub(crate) fn e_type(mut self, e_type: u16) -> Self {
            self.e_type = e_type;
            self
        }

        pub(crate) fn segment(mut self, vaddr: u64, data: &[u8], mem_size: u64) -> Self {
            self.segments.push((vaddr, data.to_vec(), mem_size));
            self
        }

        pub(crate) fn build(&self) -> Vec<u8> {
            const EHDR: usize = 64;
            const PHDR: usize = 56;

            let mut out = vec![0x7f, b'E', b'L', b'F', 2, 1, 1, 0];
            out.resize(16, 0);
            out.extend_from_slice(&self.e_type.to_le_bytes());
            out.extend_from_slice(&abi::EM_X86_64.to_le_bytes());
            out.extend_from_slice(&1u32.to_le_bytes());
            out.extend_from_slice(&self.entry.to_le_bytes());
            out.extend_from_slice(&(EHDR as u64).to_le_bytes()); // e_phoff
            out.extend_from_slice(&0u64.to_le_bytes()); // e_shoff
            out.extend_from_slice(&0u32.to_le_bytes()); // e_flags
            out.extend_from_slice(&(EHDR as u16).to_le_bytes());
            out.extend_from_slice(&(PHDR as u16).to_le_bytes());
            out.extend_from_slice(&(self.segments.len() as u16).to_le_bytes());
            out.extend_from_slice(&64u16.to_le_bytes()); // e_shentsize
            out.extend_from_slice(&0u16.to_le_bytes()); // e_shnum
            out.extend_from_slice(&0u16.to_le_bytes()); // e_shstrndx

            let mut offset = EHDR + PHDR * self.segments.len();
            for (vaddr, data, mem_size) in &self.segments {
                out.extend_from_slice(&abi::PT_LOAD.to_le_bytes());
                out.extend_from_slice(&(abi::PF_R | abi::PF_W | abi::PF_X).to_le_bytes());
                out.extend_from_slice(&(offset as u64).to_le_bytes());
                out.extend_from_slice(&vaddr.to_le_bytes());
                out.extend_from_slice(&vaddr.to_le_bytes());
                out.extend_from_slice(&(data.len() as u64).to_le_bytes());
                out.extend_from_slice(&mem_size.to_le_bytes());
                out.extend_from_slice(&0x1000u64.to_le_bytes());
                offset += data.len();
            }
            for (_, data, _) in &self.segments {
                out.extend_from_slice(data);
            }
            out
        }
    }

    #[test]
    fn parses_segments_and_load_end() {
        let bytes = ElfBuilder::executable(BASE + 0x10)
            .segment(BASE, b"code", 4)
            .segment(BASE + 0x2000, b"data", 0x1800)
            .build();

        let image = ExecutableImage::parse(&bytes).unwrap();
        assert_eq!(image.entry, VirtualAddress::new(BASE as usize + 0x10));
        assert_eq!(image.segments.len(), 2);
        assert_eq!(image.segments[1].file_size, 4);
        assert_eq!(image.segments[1].pages(), 2);
        assert_eq!(image.load_end(), VirtualAddress::new(BASE as usize + 0x3800));
    }

    #[test]
    fn missing_magic_is_invalid_file() {
        let mut bytes = ElfBuilder::executable(BASE).segment(BASE, b"x", 1).build();
        bytes[1] = b'X';
        assert_eq!(ExecutableImage::parse(&bytes), Err(Error::InvalidFile));
        assert_eq!(ExecutableImage::parse(b"#!/bin/sh"), Err(Error::InvalidFile));
        assert_eq!(ExecutableImage::parse(b""), Err(Error::InvalidFile));
    }

    #[test]
    fn shared_object_is_invalid_format() {
        let bytes = ElfBuilder::executable(BASE)
            .e_type(abi::ET_DYN)
            .segment(BASE, b"x", 1)
            .build();
        assert_eq!(ExecutableImage::parse(&bytes), Err(Error::InvalidFormat));
    }

    #[test]
    fn lower_half_image_is_invalid_format() {
        let bytes = ElfBuilder::executable(0x40_1000)
            .segment(0x40_0000, b"x", 1)
            .build();
        assert_eq!(ExecutableImage::parse(&bytes), Err(Error::InvalidFormat));
    }

    #[test]
    fn truncated_segment_is_invalid_format() {
        let mut bytes = ElfBuilder::executable(BASE).segment(BASE, b"abcd", 4).build();
        bytes.truncate(bytes.len() - 2);
        assert_eq!(ExecutableImage::parse(&bytes), Err(Error::InvalidFormat));
    }

    #[test]
    fn segment_wrapping_past_top_of_memory_is_invalid_format() {
        let top = 0xffff_ffff_ffff_f000;
        let bytes = ElfBuilder::executable(top).segment(top, b"x", 0x2000).build();
        assert_eq!(ExecutableImage::parse(&bytes), Err(Error::InvalidFormat));
    }

    #[test]
    fn segment_in_top_page_is_accepted() {
        let top = 0xffff_ffff_ffff_f000;
        let bytes = ElfBuilder::executable(top).segment(top, b"x", 0x800).build();
        let image = ExecutableImage::parse(&bytes).unwrap();
        assert_eq!(image.segments[0].pages(), 1);
    }
}
