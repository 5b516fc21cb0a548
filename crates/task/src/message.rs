//! Messages delivered through task mailboxes.

use crate::TaskId;

/// Modifier key bits as reported by the keyboard driver.
pub struct Modifiers;

impl Modifiers {
    pub const LEFT_CONTROL: u8 = 1 << 0;
    pub const LEFT_SHIFT: u8 = 1 << 1;
    pub const LEFT_ALT: u8 = 1 << 2;
    pub const LEFT_GUI: u8 = 1 << 3;
    pub const RIGHT_CONTROL: u8 = 1 << 4;
    pub const RIGHT_SHIFT: u8 = 1 << 5;
    pub const RIGHT_ALT: u8 = 1 << 6;
    pub const RIGHT_GUI: u8 = 1 << 7;

    /// Returns true if either control key is held.
    pub const fn control(modifier: u8) -> bool {
        modifier & (Self::LEFT_CONTROL | Self::RIGHT_CONTROL) != 0
    }
}

/// A screen rectangle in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rectangle {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

/// A mailbox message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Message {
    /// A timer armed by `task_id` reached `timeout` ticks.
    TimerTimeout { timeout: u64, task_id: TaskId },
    /// A key was pressed or released.
    KeyPush {
        modifier: u8,
        keycode: u8,
        ascii: u8,
        press: bool,
    },
    /// Part of a layer needs to be redrawn.
    DrawArea { layer_id: u32, area: Rectangle },
    /// The window owning the recipient gained or lost focus.
    WindowActive { activate: bool },
}
