use core::fmt;

use pmm::{AllocError, MapError};

/// Errors surfaced while loading or running an application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A task or file could not be found.
    NotFound,
    /// The argument vector is out of room.
    Full,
    /// The file is not an ELF image.
    InvalidFile,
    /// The ELF image is not a supported executable.
    InvalidFormat,
    /// A frame or page table could not be allocated.
    OutOfMemory,
    /// An access touched an address without a mapping.
    NotMapped,
    /// A path component is not a directory.
    NotADirectory,
    /// A directory was named where a file is needed.
    IsADirectory,
}

impl Error {
    /// Stable name shown to the user.
    pub const fn name(self) -> &'static str {
        match self {
            Self::NotFound => "NotFound",
            Self::Full => "Full",
            Self::InvalidFile => "InvalidFile",
            Self::InvalidFormat => "InvalidFormat",
            Self::OutOfMemory => "OutOfMemory",
            Self::NotMapped => "NotMapped",
            Self::NotADirectory => "NotADirectory",
            Self::IsADirectory => "IsADirectory",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<AllocError> for Error {
    fn from(_: AllocError) -> Self {
        Self::OutOfMemory
    }
}

impl From<MapError> for Error {
    fn from(err: MapError) -> Self {
        match err {
            MapError::OutOfMemory => Self::OutOfMemory,
            MapError::NotMapped(_) | MapError::AlreadyMapped(_) => Self::NotMapped,
        }
    }
}

impl From<task::Error> for Error {
    fn from(err: task::Error) -> Self {
        match err {
            task::Error::NotFound => Self::NotFound,
        }
    }
}
