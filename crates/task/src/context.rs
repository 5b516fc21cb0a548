//! Saved CPU state of a task.

/// Kernel code segment selector (GDT entry 1).
pub const KERNEL_CS: u64 = 1 << 3;

/// Kernel data/stack segment selector (GDT entry 2).
pub const KERNEL_SS: u64 = 2 << 3;

/// RFLAGS with interrupts enabled and the reserved bit 1 set.
const INITIAL_RFLAGS: u64 = 0x202;

/// Default x87 control word (all exceptions masked).
const INITIAL_FCW: u16 = 0x037f;

/// Default MXCSR (all SIMD exceptions masked).
const INITIAL_MXCSR: u32 = 0x1f80;

/// Entry point of a kernel task, called with the task's id and an argument.
pub type TaskEntry = extern "sysv64" fn(u64, i64) -> !;

/// Register snapshot saved and restored by the context switch.
///
/// Field offsets are part of the switch routine's contract.
#[derive(Clone)]
#[repr(C, align(16))]
pub struct TaskContext {
    // offset 0x00
    pub cr3: u64,
    pub rip: u64,
    pub rflags: u64,
    reserved1: u64,
    // offset 0x20
    pub cs: u64,
    pub ss: u64,
    pub fs: u64,
    pub gs: u64,
    // offset 0x40
    pub rax: u64,
    pub rbx: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rdi: u64,
    pub rsi: u64,
    pub rsp: u64,
    pub rbp: u64,
    // offset 0x80
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
    // offset 0xc0
    pub fxsave_area: [u8; 512],
}

impl TaskContext {
    /// Returns a context with every register cleared.
    pub const fn new() -> Self {
        Self {
            cr3: 0,
            rip: 0,
            rflags: 0,
            reserved1: 0,
            cs: 0,
            ss: 0,
            fs: 0,
            gs: 0,
            rax: 0,
            rbx: 0,
            rcx: 0,
            rdx: 0,
            rdi: 0,
            rsi: 0,
            rsp: 0,
            rbp: 0,
            r8: 0,
            r9: 0,
            r10: 0,
            r11: 0,
            r12: 0,
            r13: 0,
            r14: 0,
            r15: 0,
            fxsave_area: [0; 512],
        }
    }

    /// Sets up the context so the first dispatch calls `entry(id, data)` on the given stack.
    ///
    /// `stack_end` is one past the highest byte of the stack. The stack pointer is placed
    /// as if `entry` had just been called, so it sees a correctly aligned frame.
    pub fn prepare(&mut self, entry: TaskEntry, id: u64, data: i64, stack_end: u64, root: u64) {
        *self = Self::new();
        self.cr3 = root;
        self.rip = entry as usize as u64;
        self.rflags = INITIAL_RFLAGS;
        self.cs = KERNEL_CS;
        self.ss = KERNEL_SS;
        self.rsp = (stack_end & !0xf) - 8;
        self.rdi = id;
        self.rsi = data as u64;

        self.fxsave_area[0..2].copy_from_slice(&INITIAL_FCW.to_le_bytes());
        self.fxsave_area[24..28].copy_from_slice(&INITIAL_MXCSR.to_le_bytes());
    }
}

impl Default for TaskContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::mem::{align_of, offset_of, size_of};

    extern "sysv64" fn never(_: u64, _: i64) -> ! {
        unreachable!()
    }

    #[test]
    fn layout_matches_switch_routine() {
        assert_eq!(offset_of!(TaskContext, cs), 0x20);
        assert_eq!(offset_of!(TaskContext, rax), 0x40);
        assert_eq!(offset_of!(TaskContext, rsp), 0x70);
        assert_eq!(offset_of!(TaskContext, r8), 0x80);
        assert_eq!(offset_of!(TaskContext, fxsave_area), 0xc0);
        assert_eq!(size_of::<TaskContext>(), 0x2c0);
        assert_eq!(align_of::<TaskContext>(), 16);
    }

    #[test]
    fn prepare_sets_entry_arguments_and_stack() {
        let mut context = TaskContext::new();
        context.prepare(never, 3, -5, 0x1_0009, 0x4000);

        assert_eq!(context.rip, never as usize as u64);
        assert_eq!(context.rdi, 3);
        assert_eq!(context.rsi as i64, -5);
        assert_eq!(context.rsp, 0x1_0000 - 8);
        assert_eq!(context.cr3, 0x4000);
        assert_eq!(context.cs, KERNEL_CS);
        assert_eq!(context.ss, KERNEL_SS);
        assert_eq!(context.rflags & 0x200, 0x200);
        assert_eq!(&context.fxsave_area[24..28], &0x1f80u32.to_le_bytes());
    }
}
