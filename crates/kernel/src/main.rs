#![cfg_attr(not(test), no_std)]
#![no_main]

#[cfg(not(test))]
#[panic_handler]
fn rust_panic(info: &core::panic::PanicInfo) -> ! {
    x86_64::instructions::interrupts::disable();
    if kestrel_kernel::Console::default().has_output() {
        log::error!("kernel panic: {info}");
    }
    kestrel_kernel::park()
}
