//! System calls made by applications.
//!
//! | rax | call           | arguments            | returns                       |
//! |-----|----------------|----------------------|-------------------------------|
//! | 0   | `exit`         | status               | does not return               |
//! | 1   | `write`        | fd, buffer, length   | bytes written                 |
//! | 2   | `read`         | fd, buffer, length   | bytes read, 0 at end of input |
//! | 3   | `demand_pages` | page count           | start of the new pages        |
//! | 4   | `open`         | path, length, flags  | descriptor                    |
//! | 5   | `map_file`     | fd, size out, flags  | start of the mapping          |
//!
//! Errors come back in rdx as errno values, with rax zero. The boot volume is read-only,
//! so `open` refuses write access and `O_CREAT` with `EROFS`. `map_file` stores the file
//! size through its second argument unless that is null.

use core::{slice, str};

use pmm::VirtualAddress;
use task::FileDescriptor;

use crate::{arch, tasks};

const ENOENT: i64 = 2;
const EBADF: i64 = 9;
const ENOMEM: i64 = 12;
const EFAULT: i64 = 14;
const ENOTDIR: i64 = 20;
const EISDIR: i64 = 21;
const EINVAL: i64 = 22;
const EROFS: i64 = 30;
const ENOSYS: i64 = 38;

const O_ACCMODE: u64 = 0o3;
const O_CREAT: u64 = 0o100;

#[repr(C)]
pub struct SyscallResult {
    value: u64,
    error: i64,
}

impl SyscallResult {
    fn ok(value: u64) -> Self {
        Self { value, error: 0 }
    }

    fn error(error: i64) -> Self {
        Self { value: 0, error }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Syscall {
    Exit,
    Write,
    Read,
    DemandPages,
    Open,
    MapFile,
}

impl Syscall {
    fn from_number(number: u64) -> Option<Self> {
        Some(match number {
            0 => Self::Exit,
            1 => Self::Write,
            2 => Self::Read,
            3 => Self::DemandPages,
            4 => Self::Open,
            5 => Self::MapFile,
            _ => return None,
        })
    }
}

/// The kernel stack pointer saved when the running application was entered.
pub extern "sysv64" fn current_os_stack() -> u64 {
    tasks::scheduler().with_current(|task| {
        // SAFETY: the slot lives as long as the task.
        unsafe { *task.os_stack_ptr() }
    })
}

/// Called from the syscall entry on the task's kernel stack, with interrupts masked by
/// `SFMASK`.
pub extern "sysv64" fn dispatch(
    a0: u64,
    a1: u64,
    a2: u64,
    a3: u64,
    a4: u64,
    number: u64,
) -> SyscallResult {
    arch::enable_interrupts();
    let result = serve(number, [a0, a1, a2, a3, a4]);
    // sysret switches back to the application's stack, so nothing may interrupt until then.
    arch::disable_interrupts();
    tasks::load_privilege_stack();
    result
}

fn serve(number: u64, [a0, a1, a2, _, _]: [u64; 5]) -> SyscallResult {
    let Some(call) = Syscall::from_number(number) else {
        log::warn!("unknown system call {number:#x}");
        return SyscallResult::error(ENOSYS);
    };
    log::trace!("syscall {call:?}({a0:#x}, {a1:#x}, {a2:#x})");

    match call {
        Syscall::Exit => terminate(a0 as i32),
        Syscall::Write => match user_buffer(a1, a2) {
            // SAFETY: the range was checked to lie in the application half, which the
            // active root maps for the running process.
            Some((ptr, len)) => with_file(a0, |file| {
                file.write(unsafe { slice::from_raw_parts(ptr, len) })
            }),
            None => SyscallResult::error(EFAULT),
        },
        Syscall::Read => match user_buffer(a1, a2) {
            // SAFETY: as for `write`.
            Some((ptr, len)) => with_file(a0, |file| {
                file.read(unsafe { slice::from_raw_parts_mut(ptr, len) })
            }),
            None => SyscallResult::error(EFAULT),
        },
        Syscall::DemandPages => demand_pages(a0 as usize),
        Syscall::Open => open(a0, a1, a2),
        Syscall::MapFile => map_file(a0, a1),
    }
}

/// Stops the running application, returning `status` from its `call_app`.
pub fn terminate(status: i32) -> ! {
    let os_stack = current_os_stack();
    log::debug!("task {}: application exit {status}", tasks::scheduler().current_id());
    arch::enable_interrupts();
    // SAFETY: `os_stack` is the value call_app stored for this application.
    unsafe { arch::exit_app(os_stack, status) }
}

/// Checks that `[addr, addr + len)` lies in the application half and makes it present, so
/// the kernel never faults while copying.
fn user_buffer(addr: u64, len: u64) -> Option<(*mut u8, usize)> {
    let len = usize::try_from(len).ok()?;
    let begin = VirtualAddress::try_new(addr as usize)?;
    if let Err(err) = tasks::fault_in_user_range(begin, len) {
        log::debug!("rejecting buffer {begin} ({len} bytes): {err}");
        return None;
    }
    Some((begin.as_mut_ptr(), len))
}

/// Runs `f` on descriptor `fd` of the running task without holding the scheduler.
fn with_file(fd: u64, f: impl FnOnce(&dyn FileDescriptor) -> usize) -> SyscallResult {
    let file = tasks::scheduler().with_current(|task| task.file(fd as usize));
    match file {
        Some(file) => SyscallResult::ok(f(file.as_ref()) as u64),
        None => SyscallResult::error(EBADF),
    }
}

fn demand_pages(pages: usize) -> SyscallResult {
    tasks::scheduler().with_current(|task| {
        let limit = task.file_map_end();
        match task.demand_paging_mut().try_grow(pages, limit) {
            Some(begin) => SyscallResult::ok(begin.as_u64()),
            None => SyscallResult::error(ENOMEM),
        }
    })
}

fn open(path: u64, len: u64, flags: u64) -> SyscallResult {
    if flags & (O_ACCMODE | O_CREAT) != 0 {
        return SyscallResult::error(EROFS);
    }
    let Some((ptr, len)) = user_buffer(path, len) else {
        return SyscallResult::error(EFAULT);
    };
    // SAFETY: as for `write`.
    let Ok(path) = str::from_utf8(unsafe { slice::from_raw_parts(ptr, len) }) else {
        return SyscallResult::error(EINVAL);
    };
    let volume = tasks::volume();
    match tasks::scheduler().with_current(|task| process::open_file(task, volume, path)) {
        Ok(fd) => SyscallResult::ok(fd as u64),
        Err(err) => SyscallResult::error(errno(err)),
    }
}

fn map_file(fd: u64, size_out: u64) -> SyscallResult {
    let size_out = match size_out {
        0 => None,
        addr => match user_buffer(addr, size_of::<u64>() as u64) {
            Some((ptr, _)) => Some(ptr.cast::<u64>()),
            None => return SyscallResult::error(EFAULT),
        },
    };
    match tasks::scheduler().with_current(|task| process::map_file(task, fd as usize)) {
        Ok((begin, size)) => {
            if let Some(out) = size_out {
                // SAFETY: checked and faulted in by `user_buffer` above.
                unsafe { out.write_unaligned(size as u64) };
            }
            SyscallResult::ok(begin.as_u64())
        }
        Err(process::Error::NotFound) => SyscallResult::error(EBADF),
        Err(err) => SyscallResult::error(errno(err)),
    }
}

fn errno(err: process::Error) -> i64 {
    match err {
        process::Error::NotFound => ENOENT,
        process::Error::NotADirectory => ENOTDIR,
        process::Error::IsADirectory => EISDIR,
        process::Error::OutOfMemory => ENOMEM,
        process::Error::NotMapped => EFAULT,
        _ => EINVAL,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_past_the_table_are_unknown() {
        assert_eq!(Syscall::from_number(4), Some(Syscall::Open));
        assert_eq!(Syscall::from_number(5), Some(Syscall::MapFile));
        assert_eq!(Syscall::from_number(6), None);
    }

    #[test]
    fn file_errors_map_to_errno() {
        assert_eq!(errno(process::Error::NotFound), ENOENT);
        assert_eq!(errno(process::Error::IsADirectory), EISDIR);
        assert_eq!(errno(process::Error::NotADirectory), ENOTDIR);
        assert_eq!(errno(process::Error::OutOfMemory), ENOMEM);
        assert_eq!(errno(process::Error::InvalidFile), EINVAL);
    }

    #[test]
    fn writable_opens_are_refused_before_touching_memory() {
        const O_WRONLY: u64 = 1;
        const O_RDWR: u64 = 2;
        for flags in [O_WRONLY, O_RDWR, O_CREAT] {
            let result = open(0, 0, flags);
            assert_eq!((result.value, result.error), (0, EROFS));
        }
    }
}
