#[cfg(target_arch = "x86_64")]
pub(crate) mod x86_64;

#[cfg(target_arch = "x86_64")]
pub use self::x86_64::*;

/// Halts the CPU forever, waking only to service interrupts.
pub fn park() -> ! {
    use core::arch::asm;

    loop {
        // SAFETY: `hlt` only pauses until the next interrupt.
        unsafe {
            asm!("hlt");
        }
    }
}
