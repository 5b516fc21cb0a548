//! x86_64 context switch.

use core::arch::global_asm;

use crate::TaskContext;

pub use ::x86_64::instructions::interrupts::without_interrupts;

unsafe extern "sysv64" {
    fn kestrel_switch_context(next: *const TaskContext, current: *mut TaskContext);
}

/// Saves the running CPU state into `current` and resumes `next`.
///
/// # Safety
///
/// Both pointers must reference live contexts, `next` must have been prepared or saved
/// earlier, and interrupts must be disabled.
pub unsafe fn switch_context(next: *const TaskContext, current: *mut TaskContext) {
    unsafe { kestrel_switch_context(next, current) };
}

// rdi = next, rsi = current. The resumed context returns through iretq so CS, SS, RSP and
// RFLAGS are restored together.
global_asm!(
    ".global kestrel_switch_context",
    "kestrel_switch_context:",
    "mov [rsi + 0x40], rax",
    "mov [rsi + 0x48], rbx",
    "mov [rsi + 0x50], rcx",
    "mov [rsi + 0x58], rdx",
    "mov [rsi + 0x60], rdi",
    "mov [rsi + 0x68], rsi",
    "lea rax, [rsp + 8]",
    "mov [rsi + 0x70], rax",
    "mov [rsi + 0x78], rbp",
    "mov [rsi + 0x80], r8",
    "mov [rsi + 0x88], r9",
    "mov [rsi + 0x90], r10",
    "mov [rsi + 0x98], r11",
    "mov [rsi + 0xa0], r12",
    "mov [rsi + 0xa8], r13",
    "mov [rsi + 0xb0], r14",
    "mov [rsi + 0xb8], r15",
    "mov rax, cr3",
    "mov [rsi + 0x00], rax",
    "mov rax, [rsp]",
    "mov [rsi + 0x08], rax",
    "pushfq",
    "pop qword ptr [rsi + 0x10]",
    "xor eax, eax",
    "mov ax, cs",
    "mov [rsi + 0x20], rax",
    "mov ax, ss",
    "mov [rsi + 0x28], rax",
    "mov ax, fs",
    "mov [rsi + 0x30], rax",
    "mov ax, gs",
    "mov [rsi + 0x38], rax",
    "fxsave64 [rsi + 0xc0]",
    // iretq frame
    "push qword ptr [rdi + 0x28]",
    "push qword ptr [rdi + 0x70]",
    "push qword ptr [rdi + 0x10]",
    "push qword ptr [rdi + 0x20]",
    "push qword ptr [rdi + 0x08]",
    "fxrstor64 [rdi + 0xc0]",
    "mov rax, [rdi + 0x00]",
    "mov cr3, rax",
    "mov rax, [rdi + 0x30]",
    "mov fs, ax",
    "mov rax, [rdi + 0x38]",
    "mov gs, ax",
    "mov rax, [rdi + 0x40]",
    "mov rbx, [rdi + 0x48]",
    "mov rcx, [rdi + 0x50]",
    "mov rdx, [rdi + 0x58]",
    "mov rsi, [rdi + 0x68]",
    "mov rbp, [rdi + 0x78]",
    "mov r8, [rdi + 0x80]",
    "mov r9, [rdi + 0x88]",
    "mov r10, [rdi + 0x90]",
    "mov r11, [rdi + 0x98]",
    "mov r12, [rdi + 0xa0]",
    "mov r13, [rdi + 0xa8]",
    "mov r14, [rdi + 0xb0]",
    "mov r15, [rdi + 0xb8]",
    "mov rdi, [rdi + 0x60]",
    "iretq",
);
