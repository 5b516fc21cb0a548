//! Standard input and output for applications.

use alloc::{string::String, sync::Arc};

use task::{FileDescriptor, Message, Modifiers, Scheduler};

/// HID usage code of the `D` key.
const KEYCODE_D: u8 = 0x07;

/// A text console.
pub trait Terminal: Send + Sync {
    fn print(&self, text: &str);
}

/// Connects a descriptor to a terminal and to the keyboard messages of the task reading it.
pub struct TerminalFileDescriptor {
    terminal: Arc<dyn Terminal>,
    scheduler: &'static Scheduler,
}

impl TerminalFileDescriptor {
    pub fn new(terminal: Arc<dyn Terminal>, scheduler: &'static Scheduler) -> Self {
        Self {
            terminal,
            scheduler,
        }
    }
}

impl FileDescriptor for TerminalFileDescriptor {
    /// Blocks until a key is pressed and returns its byte, echoed to the terminal.
    ///
    /// Control combinations are echoed as `^X` and otherwise ignored, except Ctrl+D, which
    /// ends the input and returns 0.
    fn read(&self, buf: &mut [u8]) -> usize {
        let Some(first) = buf.first_mut() else {
            return 0;
        };
        loop {
            let Message::KeyPush {
                modifier,
                keycode,
                ascii,
                press: true,
            } = self.scheduler.wait_message()
            else {
                continue;
            };

            if Modifiers::control(modifier) {
                let mut echo = String::from("^");
                echo.push(ascii.to_ascii_uppercase() as char);
                self.terminal.print(&echo);
                if keycode == KEYCODE_D {
                    return 0;
                }
                continue;
            }
            if ascii == 0 {
                continue;
            }

            *first = ascii;
            self.terminal
                .print(&String::from_utf8_lossy(core::slice::from_ref(first)));
            return 1;
        }
    }

    fn write(&self, buf: &[u8]) -> usize {
        self.terminal.print(&String::from_utf8_lossy(buf));
        buf.len()
    }

    fn size(&self) -> usize {
        0
    }

    fn load(&self, _buf: &mut [u8], _offset: usize) -> usize {
        0
    }
}
