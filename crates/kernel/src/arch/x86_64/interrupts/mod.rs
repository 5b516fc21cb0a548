//! The IDT, and the translation of raw trap frames into [`Trap`]s.

use pmm::VirtualAddress;
use x86_64::{
    PrivilegeLevel,
    registers::{control::Cr2, rflags::RFlags},
    structures::idt::{InterruptDescriptorTable, InterruptStackFrame},
};

use super::pic;
use crate::interrupts::{Trap, TrapCause, handle_trap};

mod handlers;

pub const DOUBLE_FAULT_IST_INDEX: u16 = 0;

const PAGE_FAULT_VECTOR: u8 = 14;
const CONTROLLER_LINES: u8 = 16;

const EXCEPTIONS: [&str; 22] = [
    "divide error",
    "debug",
    "non-maskable interrupt",
    "breakpoint",
    "overflow",
    "bound range exceeded",
    "invalid opcode",
    "device not available",
    "double fault",
    "coprocessor segment overrun",
    "invalid TSS",
    "segment not present",
    "stack-segment fault",
    "general protection fault",
    "page fault",
    "reserved",
    "x87 floating-point exception",
    "alignment check",
    "machine check",
    "SIMD floating-point exception",
    "virtualization exception",
    "control protection exception",
];

static IDT: spin::Once<InterruptDescriptorTable> = spin::Once::new();

pub fn idt() -> &'static InterruptDescriptorTable {
    IDT.call_once(|| {
        let mut idt = InterruptDescriptorTable::new();
        handlers::install(&mut idt, DOUBLE_FAULT_IST_INDEX);
        idt
    })
}

pub fn exception_name(vector: u8) -> &'static str {
    EXCEPTIONS
        .get(usize::from(vector))
        .copied()
        .unwrap_or("reserved")
}

fn cause_of(vector: u8) -> TrapCause {
    match vector.checked_sub(pic::PRIMARY_OFFSET) {
        Some(line) if line < CONTROLLER_LINES => TrapCause::Irq(line),
        _ if vector == PAGE_FAULT_VECTOR => {
            let addr = Cr2::read()
                .ok()
                .map(|addr| VirtualAddress::new(addr.as_u64() as usize));
            TrapCause::PageFault(addr)
        }
        _ => TrapCause::Exception(vector),
    }
}

/// Where every stub lands, with interrupts still masked by the gate.
fn trap_entry(vector: u8, frame: &InterruptStackFrame, error_code: Option<u64>) {
    handle_trap(&Trap {
        cause: cause_of(vector),
        ip: VirtualAddress::new(frame.instruction_pointer.as_u64() as usize),
        error_code,
        from_user: frame.code_segment.rpl() == PrivilegeLevel::Ring3,
        interruptible: frame.cpu_flags.contains(RFlags::INTERRUPT_FLAG),
    });
}
