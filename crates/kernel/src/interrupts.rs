//! What the kernel does with a trap once the architecture has decoded it.

use core::fmt;

use pmm::VirtualAddress;

use crate::{arch, input, syscall, tasks};

/// Status reported for an application stopped by a fault it caused.
const SEGFAULT_STATUS: i32 = 139;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapCause {
    /// A CPU exception other than a page fault.
    Exception(u8),
    /// Carries CR2 when it held a canonical address.
    PageFault(Option<VirtualAddress>),
    /// A line of the interrupt controller.
    Irq(u8),
}

impl fmt::Display for TrapCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exception(vector) => {
                write!(f, "{} (vector {vector})", arch::exception_name(*vector))
            }
            Self::PageFault(Some(addr)) => write!(f, "page fault at {addr}"),
            Self::PageFault(None) => f.write_str("page fault at a non-canonical address"),
            Self::Irq(line) => write!(f, "IRQ {line}"),
        }
    }
}

#[derive(Debug)]
pub struct Trap {
    pub cause: TrapCause,
    pub ip: VirtualAddress,
    pub error_code: Option<u64>,
    /// The CPU was running an application.
    pub from_user: bool,
    /// Interrupts were enabled in the code that trapped.
    pub interruptible: bool,
}

pub fn handle_trap(trap: &Trap) {
    log::trace!("{trap:?}");
    match trap.cause {
        TrapCause::Irq(arch::TIMER_IRQ) => timer_tick(),
        TrapCause::Irq(line) => {
            if line == arch::SERIAL_IRQ {
                input::serial_received(tasks::SHELL_TASK);
            } else {
                log::debug!("spurious IRQ {line}");
            }
            arch::end_of_interrupt(line);
        }
        TrapCause::PageFault(addr) if trap.from_user => demand_fault(trap, addr),
        // The kernel touching application memory on the application's behalf.
        TrapCause::PageFault(Some(addr)) if addr.is_user() => demand_fault(trap, Some(addr)),
        cause if trap.from_user => {
            log::warn!("application raised {cause} at {}", trap.ip);
            syscall::terminate(SEGFAULT_STATUS)
        }
        cause => panic!(
            "{cause} in the kernel at {} (error {:?})",
            trap.ip, trap.error_code
        ),
    }
}

/// Advances the clock, then lets the next runnable task have the CPU.
fn timer_tick() {
    arch::end_of_interrupt(arch::TIMER_IRQ);
    let Some(scheduler) = tasks::try_scheduler() else {
        return;
    };
    scheduler.tick();
    scheduler.switch_task(false);
    // Whichever task runs now may go straight back to ring 3.
    tasks::load_privilege_stack();
}

fn demand_fault(trap: &Trap, addr: Option<VirtualAddress>) {
    let result = match addr {
        Some(addr) if trap.interruptible => {
            // The frame arena is locked with interrupts on, so its holder may be preempted.
            arch::enable_interrupts();
            let result = tasks::handle_user_fault(addr);
            arch::disable_interrupts();
            result
        }
        Some(addr) => tasks::handle_user_fault(addr),
        None => Err(process::Error::NotMapped),
    };
    if let Err(err) = result {
        log::warn!(
            "application fault at {addr:?} (ip {}, error {:#x}): {err}",
            trap.ip,
            trap.error_code.unwrap_or(0)
        );
        syscall::terminate(SEGFAULT_STATUS);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn causes_read_as_the_cpu_names_them() {
        let addr = VirtualAddress::new(0x4000);
        assert_eq!(
            TrapCause::Exception(13).to_string(),
            "general protection fault (vector 13)"
        );
        assert_eq!(TrapCause::Exception(15).to_string(), "reserved (vector 15)");
        assert_eq!(TrapCause::Exception(30).to_string(), "reserved (vector 30)");
        assert_eq!(
            TrapCause::PageFault(Some(addr)).to_string(),
            format!("page fault at {addr}")
        );
        assert_eq!(TrapCause::Irq(4).to_string(), "IRQ 4");
    }
}
