//! Turns bytes from the serial line into key presses.
//!
//! Keycodes are HID usage IDs, the same numbers a USB keyboard would report.

use spin::Mutex;
use task::{Message, Modifiers, TaskId};

use crate::{serial, tasks};

const KEYCODE_A: u8 = 0x04;
const KEYCODE_1: u8 = 0x1E;
const KEYCODE_0: u8 = 0x27;
const KEYCODE_ENTER: u8 = 0x28;
const KEYCODE_BACKSPACE: u8 = 0x2A;
const KEYCODE_TAB: u8 = 0x2B;
const KEYCODE_SPACE: u8 = 0x2C;
const KEYCODE_RIGHT: u8 = 0x4F;
const KEYCODE_LEFT: u8 = 0x50;
const KEYCODE_DOWN: u8 = 0x51;
const KEYCODE_UP: u8 = 0x52;

const ESC: u8 = 0x1B;
const DEL: u8 = 0x7F;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Ground,
    Escape,
    /// Inside `ESC [`, waiting for the final byte.
    Sequence,
}

/// Decodes what a VT100-style terminal sends.
#[derive(Debug)]
pub struct KeyDecoder {
    state: State,
}

impl KeyDecoder {
    pub const fn new() -> Self {
        Self {
            state: State::Ground,
        }
    }

    pub fn feed(&mut self, byte: u8) -> Option<Message> {
        match self.state {
            State::Ground => self.ground(byte),
            State::Escape => {
                self.state = if byte == b'[' {
                    State::Sequence
                } else {
                    State::Ground
                };
                None
            }
            State::Sequence => {
                // Parameter bytes keep the sequence open.
                if (0x30..=0x3F).contains(&byte) {
                    return None;
                }
                self.state = State::Ground;
                let keycode = match byte {
                    b'A' => KEYCODE_UP,
                    b'B' => KEYCODE_DOWN,
                    b'C' => KEYCODE_RIGHT,
                    b'D' => KEYCODE_LEFT,
                    _ => return None,
                };
                Some(key(0, keycode, 0))
            }
        }
    }

    fn ground(&mut self, byte: u8) -> Option<Message> {
        match byte {
            ESC => {
                self.state = State::Escape;
                None
            }
            b'\r' | b'\n' => Some(key(0, KEYCODE_ENTER, b'\n')),
            DEL | 0x08 => Some(key(0, KEYCODE_BACKSPACE, 0x08)),
            b'\t' => Some(key(0, KEYCODE_TAB, b'\t')),
            // Ctrl+A through Ctrl+Z.
            0x01..=0x1A => {
                let offset = byte - 1;
                Some(key(Modifiers::LEFT_CONTROL, KEYCODE_A + offset, b'a' + offset))
            }
            b' '..=b'~' => {
                let modifier = if byte.is_ascii_uppercase() {
                    Modifiers::LEFT_SHIFT
                } else {
                    0
                };
                Some(key(modifier, printable_keycode(byte), byte))
            }
            _ => None,
        }
    }
}

fn printable_keycode(byte: u8) -> u8 {
    match byte.to_ascii_lowercase() {
        letter @ b'a'..=b'z' => KEYCODE_A + (letter - b'a'),
        b'0' => KEYCODE_0,
        digit @ b'1'..=b'9' => KEYCODE_1 + (digit - b'1'),
        b' ' => KEYCODE_SPACE,
        _ => 0,
    }
}

fn key(modifier: u8, keycode: u8, ascii: u8) -> Message {
    Message::KeyPush {
        modifier,
        keycode,
        ascii,
        press: true,
    }
}

static DECODER: Mutex<KeyDecoder> = Mutex::new(KeyDecoder::new());

/// Drains the receive buffer into `target`'s mailbox. Runs in the serial interrupt.
pub fn serial_received(target: TaskId) {
    let mut decoder = DECODER.lock();
    while let Some(byte) = serial::try_read() {
        let Some(msg) = decoder.feed(byte) else {
            continue;
        };
        if let Err(err) = tasks::scheduler().send_message(target, msg) {
            log::warn!("dropping key for task {target}: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    fn decode(bytes: &[u8]) -> Vec<Message> {
        let mut decoder = KeyDecoder::new();
        bytes.iter().filter_map(|&byte| decoder.feed(byte)).collect()
    }

    #[test]
    fn printable_bytes_carry_hid_keycodes() {
        assert_eq!(
            decode(b"a Z9"),
            [
                key(0, KEYCODE_A, b'a'),
                key(0, KEYCODE_SPACE, b' '),
                key(Modifiers::LEFT_SHIFT, KEYCODE_A + 25, b'Z'),
                key(0, KEYCODE_1 + 8, b'9'),
            ]
        );
        assert_eq!(decode(b"0"), [key(0, KEYCODE_0, b'0')]);
    }

    #[test]
    fn line_endings_and_erase_keys() {
        assert_eq!(
            decode(b"\r\n\x7f\x08"),
            [
                key(0, KEYCODE_ENTER, b'\n'),
                key(0, KEYCODE_ENTER, b'\n'),
                key(0, KEYCODE_BACKSPACE, 0x08),
                key(0, KEYCODE_BACKSPACE, 0x08),
            ]
        );
    }

    #[test]
    fn control_letters_set_the_control_modifier() {
        let msgs = decode(b"\x04");
        let [msg] = msgs.as_slice() else {
            panic!("expected one key, got {msgs:?}");
        };
        assert_eq!(*msg, key(Modifiers::LEFT_CONTROL, 0x07, b'd'));
        let Message::KeyPush { modifier, .. } = *msg else {
            unreachable!()
        };
        assert!(Modifiers::control(modifier));
    }

    #[test]
    fn arrow_sequences_become_arrow_keys() {
        assert_eq!(
            decode(b"\x1b[A\x1b[B\x1b[1;5C\x1b[D"),
            [
                key(0, KEYCODE_UP, 0),
                key(0, KEYCODE_DOWN, 0),
                key(0, KEYCODE_RIGHT, 0),
                key(0, KEYCODE_LEFT, 0),
            ]
        );
    }

    #[test]
    fn unknown_sequences_are_dropped_without_losing_later_keys() {
        assert_eq!(
            decode(b"\x1b[Hx\x1bOy"),
            [key(0, KEYCODE_A + 23, b'x'), key(0, KEYCODE_A + 24, b'y')]
        );
    }
}
