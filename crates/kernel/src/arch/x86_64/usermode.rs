//! Entering and leaving ring 3.

use core::arch::global_asm;

use process::{Launch, UserEntry};

unsafe extern "sysv64" {
    fn kestrel_call_app(
        argc: u64,
        argv: u64,
        ss: u64,
        rip: u64,
        rsp: u64,
        os_stack_ptr: *mut u64,
    ) -> i32;
    fn kestrel_exit_app(rsp: u64, status: i32) -> !;
    fn kestrel_syscall_entry();
}

/// Runs applications with a far return into ring 3.
pub struct Ring3;

impl UserEntry for Ring3 {
    fn call_app(&self, launch: &Launch<'_>) -> i32 {
        let ss = u64::from(super::user_stack_selector());
        // SAFETY: the launch's root is active and maps the entry point, the argument frame
        // and the stack. `os_stack_ptr` belongs to the current task.
        unsafe {
            kestrel_call_app(
                launch.argc as u64,
                launch.argv.as_u64(),
                ss,
                launch.entry.as_u64(),
                launch.stack_pointer.as_u64(),
                launch.os_stack_ptr,
            )
        }
    }
}

/// Unwinds to the `call_app` that started the running application, which then returns
/// `status`.
///
/// # Safety
///
/// `os_stack` must be the value `call_app` stored for the running application.
pub unsafe fn exit_app(os_stack: u64, status: i32) -> ! {
    unsafe { kestrel_exit_app(os_stack, status) }
}

pub(super) fn syscall_entry_address() -> u64 {
    kestrel_syscall_entry as usize as u64
}

// rdi = argc, rsi = argv, rdx = user SS, rcx = entry, r8 = user stack, r9 = os_stack_ptr.
// The callee-saved registers stay on the kernel stack until `kestrel_exit_app` pops them.
// The same stack pointer becomes the TSS rsp0, which sits 4 bytes into the TSS.
global_asm!(
    ".global kestrel_call_app",
    "kestrel_call_app:",
    "push rbx",
    "push rbp",
    "push r12",
    "push r13",
    "push r14",
    "push r15",
    "mov [r9], rsp",
    "mov qword ptr [rip + {tss} + 4], rsp",
    "push rdx",
    "push r8",
    "push 0x202",
    "add rdx, 8",
    "push rdx",
    "push rcx",
    "iretq",
    "",
    ".global kestrel_exit_app",
    "kestrel_exit_app:",
    "mov rsp, rdi",
    "mov eax, esi",
    "pop r15",
    "pop r14",
    "pop r13",
    "pop r12",
    "pop rbp",
    "pop rbx",
    "ret",
    tss = sym super::TSS,
);

// Arguments arrive in rdi, rsi, rdx, r10, r8 with the number in rax. The handler runs on
// the kernel stack `call_app` parked, below the registers it saved there, and returns
// value and error in rax:rdx.
global_asm!(
    ".global kestrel_syscall_entry",
    "kestrel_syscall_entry:",
    "push rbp",
    "push rcx",
    "push r11",
    "mov rbp, rsp",
    "and rsp, -16",
    "push rax",
    "push rdi",
    "push rsi",
    "push rdx",
    "push r10",
    "push r8",
    "call {os_stack}",
    "mov r11, rax",
    "pop r8",
    "pop r10",
    "pop rdx",
    "pop rsi",
    "pop rdi",
    "pop rax",
    "mov rsp, r11",
    "and rsp, -16",
    "push rbp",
    "push rax",
    "mov rcx, r10",
    "mov r9, rax",
    "call {dispatch}",
    "add rsp, 8",
    "pop rbp",
    "mov rsp, rbp",
    "pop r11",
    "pop rcx",
    "pop rbp",
    "sysretq",
    os_stack = sym crate::syscall::current_os_stack,
    dispatch = sym crate::syscall::dispatch,
);
