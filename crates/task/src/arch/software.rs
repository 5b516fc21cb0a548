//! Hosted stand-ins: there is one thread of execution and nothing to mask.

use crate::TaskContext;

pub fn without_interrupts<R>(f: impl FnOnce() -> R) -> R {
    f()
}

/// Leaves the host thread running; only the run queue changes.
///
/// # Safety
///
/// Always safe; the signature matches the hardware implementation.
pub unsafe fn switch_context(_next: *const TaskContext, _current: *mut TaskContext) {}
