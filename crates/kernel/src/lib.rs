#![cfg_attr(not(test), no_std)]
#![cfg_attr(target_arch = "x86_64", feature(abi_x86_interrupt))]

extern crate alloc;

mod arch;
mod boot;
mod console;
mod fat;
mod input;
mod interrupts;
mod mem;
mod serial;
mod syscall;
mod tasks;

pub use arch::{kenter, park};
pub use boot::BootInfo;
pub use console::Console;

/// Brings the machine up and becomes the main task. Entered from `kenter` on the kernel
/// stack.
pub extern "sysv64" fn kernel_main(boot_info: &'static BootInfo) -> ! {
    let console = console::Console::init();
    serial::init(console);
    log::info!("kestrel starting");

    arch::init();
    log::debug!("GDT, IDT, PIC and syscall entry initialized");

    mem::init(boot_info);
    log::debug!("heap and frame arena initialized");

    tasks::init(boot_info.volume_image());
    arch::enable_interrupts();

    tasks::run_main(boot_info.command_line())
}
