//! One `x86-interrupt` stub per installed vector, each forwarding to `trap_entry`.

use x86_64::structures::idt::{
    HandlerFunc, HandlerFuncWithErrCode, InterruptDescriptorTable, InterruptStackFrame,
    PageFaultErrorCode,
};

use super::{PAGE_FAULT_VECTOR, trap_entry};

macro_rules! stubs {
    ($($name:ident => $vector:literal),* $(,)?) => {$(
        extern "x86-interrupt" fn $name(frame: InterruptStackFrame) {
            trap_entry($vector, &frame, None);
        }
    )*};
}

macro_rules! stubs_with_code {
    ($($name:ident => $vector:literal),* $(,)?) => {$(
        extern "x86-interrupt" fn $name(frame: InterruptStackFrame, code: u64) {
            trap_entry($vector, &frame, Some(code));
        }
    )*};
}

stubs! {
    divide_error => 0,
    debug => 1,
    nmi => 2,
    breakpoint => 3,
    overflow => 4,
    bound_range => 5,
    invalid_opcode => 6,
    no_fpu => 7,
    x87_fpu => 16,
    simd => 19,
    virtualization => 20,
}

stubs_with_code! {
    invalid_tss => 10,
    segment_not_present => 11,
    stack_segment => 12,
    general_protection => 13,
    alignment_check => 17,
    control_protection => 21,
}

stubs! {
    irq0 => 32, irq1 => 33, irq2 => 34, irq3 => 35,
    irq4 => 36, irq5 => 37, irq6 => 38, irq7 => 39,
    irq8 => 40, irq9 => 41, irq10 => 42, irq11 => 43,
    irq12 => 44, irq13 => 45, irq14 => 46, irq15 => 47,
}

const IRQS: [HandlerFunc; 16] = [
    irq0, irq1, irq2, irq3, irq4, irq5, irq6, irq7, irq8, irq9, irq10, irq11, irq12, irq13,
    irq14, irq15,
];

extern "x86-interrupt" fn page_fault(frame: InterruptStackFrame, code: PageFaultErrorCode) {
    trap_entry(PAGE_FAULT_VECTOR, &frame, Some(code.bits()));
}

extern "x86-interrupt" fn double_fault(frame: InterruptStackFrame, code: u64) -> ! {
    trap_entry(8, &frame, Some(code));
    unreachable!("double fault handled");
}

extern "x86-interrupt" fn machine_check(frame: InterruptStackFrame) -> ! {
    trap_entry(18, &frame, None);
    unreachable!("machine check handled");
}

pub(super) fn install(idt: &mut InterruptDescriptorTable, double_fault_ist: u16) {
    let plain: [(_, HandlerFunc); 11] = [
        (&mut idt.divide_error, divide_error),
        (&mut idt.debug, debug),
        (&mut idt.non_maskable_interrupt, nmi),
        (&mut idt.breakpoint, breakpoint),
        (&mut idt.overflow, overflow),
        (&mut idt.bound_range_exceeded, bound_range),
        (&mut idt.invalid_opcode, invalid_opcode),
        (&mut idt.device_not_available, no_fpu),
        (&mut idt.x87_floating_point, x87_fpu),
        (&mut idt.simd_floating_point, simd),
        (&mut idt.virtualization, virtualization),
    ];
    for (entry, stub) in plain {
        entry.set_handler_fn(stub);
    }

    let with_code: [(_, HandlerFuncWithErrCode); 6] = [
        (&mut idt.invalid_tss, invalid_tss),
        (&mut idt.segment_not_present, segment_not_present),
        (&mut idt.stack_segment_fault, stack_segment),
        (&mut idt.general_protection_fault, general_protection),
        (&mut idt.alignment_check, alignment_check),
        (&mut idt.cp_protection_exception, control_protection),
    ];
    for (entry, stub) in with_code {
        entry.set_handler_fn(stub);
    }

    idt.page_fault.set_handler_fn(page_fault);
    idt.machine_check.set_handler_fn(machine_check);
    // SAFETY: the IST slot is set up in the TSS before the IDT is loaded.
    unsafe {
        idt.double_fault
            .set_handler_fn(double_fault)
            .set_stack_index(double_fault_ist);
    }

    for (vector, stub) in (32u8..).zip(IRQS) {
        idt[vector].set_handler_fn(stub);
    }
}
