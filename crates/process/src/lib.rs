#![cfg_attr(not(test), no_std)]

//! # Kestrel Processes
//!
//! Everything between "the user typed a command" and "the application returned":
//!
//! - ELF validation and segment loading into a fresh address space ([`ProcessLoader`]),
//!   backed by a load cache so each executable is read from disk only once.
//! - Argument marshaling, user stack setup, standard descriptors and teardown
//!   ([`ProcessRunner`]).
//! - Files opened by applications, and the page-fault policy for demand-paged heap and
//!   file mappings.
//! - The shell that drives all of it from keyboard messages.

extern crate alloc;

mod args;
mod cache;
mod error;
mod fault;
mod file;
mod fs;
mod image;
mod loader;
mod runner;
mod shell;
mod terminal;

pub use args::{ARGV_CAPACITY, ArgVector};
pub use cache::{CachedImage, LoadCache};
pub use error::Error;
pub use fault::{fault_in_range, handle_page_fault};
pub use file::{VolumeFile, map_file, open_file};
pub use fs::{DirectoryEntry, FileId, FileSystem};
pub use image::{ExecutableImage, LoadSegment};
pub use loader::{AppLoadInfo, ProcessLoader};
pub use runner::{ARGS_FRAME, Launch, ProcessRunner, STACK_FRAMES, UserEntry};
pub use shell::Shell;
pub use terminal::{Terminal, TerminalFileDescriptor};
