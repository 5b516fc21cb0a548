#![cfg_attr(not(any(test, feature = "software-emulation")), no_std)]

//! # Kestrel Tasks
//!
//! Multitasking for the Kestrel kernel:
//!
//! - [`Task`]: saved CPU context, private kernel stack, mailbox, and the per-process
//!   state (demand-paging window, file descriptors, file maps) of whatever it is running.
//! - [`TaskManager`]: owns every task and the run queue.
//! - [`Scheduler`]: the interrupt-safe handle the rest of the kernel uses to switch, sleep,
//!   wake and message tasks, and to arm timers.

extern crate alloc;

mod arch;
mod context;
mod error;
mod fd;
mod manager;
mod message;
mod scheduler;
mod task;
mod timer;

pub use context::{KERNEL_CS, KERNEL_SS, TaskContext, TaskEntry};
pub use error::Error;
pub use fd::FileDescriptor;
pub use manager::{Switch, TaskManager};
pub use message::{Message, Modifiers, Rectangle};
pub use scheduler::Scheduler;
pub use task::{DEFAULT_STACK_BYTES, DemandPaging, FileMapping, Task, TaskId};
pub use timer::{TIMER_FREQ, TimerQueue};
