use x86_64::instructions::port::Port;

use crate::console::Console;

pub const COM1: u16 = 0x3F8;
const LINE_STATUS: u16 = COM1 + 5;
const DATA_READY: u8 = 1 << 0;

pub struct SerialWriter {
    port: uart_16550::SerialPort,
}

impl core::fmt::Write for SerialWriter {
    /// Terminals expect CR LF line endings.
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        let mut lines = s.split('\n');
        if let Some(first) = lines.next() {
            self.port.write_str(first)?;
        }
        for line in lines {
            self.port.write_str("\r\n")?;
            self.port.write_str(line)?;
        }
        Ok(())
    }
}

// cSpell:ignore uart
/// Brings up COM1 with receive interrupts enabled and attaches it to `console`.
pub fn init(console: &Console) {
    // SAFETY: COM1 is only driven through this writer and `try_read`.
    let mut port = unsafe { uart_16550::SerialPort::new(COM1) };
    port.init();
    console.attach_serial(SerialWriter { port });
}

/// Returns the next received byte, if one is waiting.
///
/// Reads the receive register directly rather than through the console's lock.
pub fn try_read() -> Option<u8> {
    // SAFETY: reading the line status and receive registers has no effect on transmission.
    unsafe {
        if Port::<u8>::new(LINE_STATUS).read() & DATA_READY == 0 {
            return None;
        }
        Some(Port::<u8>::new(COM1).read())
    }
}
