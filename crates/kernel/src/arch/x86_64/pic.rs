//! The legacy 8259 interrupt controllers.

use x86_64::instructions::port::Port;

const PRIMARY_COMMAND: u16 = 0x20;
const PRIMARY_DATA: u16 = 0x21;
const SECONDARY_COMMAND: u16 = 0xa0;
const SECONDARY_DATA: u16 = 0xa1;

const ICW1_INIT: u8 = 0x11;
const ICW4_8086: u8 = 0x01;
const EOI: u8 = 0x20;

pub const PRIMARY_OFFSET: u8 = 0x20;
const SECONDARY_OFFSET: u8 = 0x28;

pub const TIMER_IRQ: u8 = 0;
pub const SERIAL_IRQ: u8 = 4;

/// Moves both controllers above the exception vectors and masks every line except the
/// timer and COM1.
pub(super) fn init() {
    let mut primary_command = Port::<u8>::new(PRIMARY_COMMAND);
    let mut primary_data = Port::<u8>::new(PRIMARY_DATA);
    let mut secondary_command = Port::<u8>::new(SECONDARY_COMMAND);
    let mut secondary_data = Port::<u8>::new(SECONDARY_DATA);

    // SAFETY: the 8259 ports belong to the controllers and nothing else touches them.
    unsafe {
        primary_command.write(ICW1_INIT);
        secondary_command.write(ICW1_INIT);
        primary_data.write(PRIMARY_OFFSET);
        secondary_data.write(SECONDARY_OFFSET);
        // Secondary cascades through IRQ2.
        primary_data.write(1 << 2);
        secondary_data.write(2);
        primary_data.write(ICW4_8086);
        secondary_data.write(ICW4_8086);

        primary_data.write(!(1 << TIMER_IRQ | 1 << SERIAL_IRQ));
        secondary_data.write(0xff);
    }
    log::debug!("8259 remapped to {PRIMARY_OFFSET:#x}/{SECONDARY_OFFSET:#x}");
}

/// Acknowledges controller line `irq` so it can fire again.
pub fn end_of_interrupt(irq: u8) {
    // SAFETY: as for `init`.
    unsafe {
        if irq >= 8 {
            Port::<u8>::new(SECONDARY_COMMAND).write(EOI);
        }
        Port::<u8>::new(PRIMARY_COMMAND).write(EOI);
    }
}
