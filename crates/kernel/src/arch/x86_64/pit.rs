//! The 8253/8254 programmable interval timer, which drives IRQ0.

use x86_64::instructions::port::Port;

const CHANNEL0_DATA: u16 = 0x40;
const MODE_COMMAND: u16 = 0x43;

/// Channel 0, low then high divisor byte, square wave.
const SQUARE_WAVE_CHANNEL0: u8 = 0x36;

const INPUT_HZ: u64 = 1_193_182;

/// Programs channel 0 to fire `hz` times a second.
pub(super) fn init(hz: u64) {
    let divisor = (INPUT_HZ / hz.max(1)).clamp(1, u64::from(u16::MAX)) as u16;
    let [low, high] = divisor.to_le_bytes();

    // SAFETY: the PIT ports belong to the timer and nothing else touches them.
    unsafe {
        Port::<u8>::new(MODE_COMMAND).write(SQUARE_WAVE_CHANNEL0);
        let mut data = Port::<u8>::new(CHANNEL0_DATA);
        data.write(low);
        data.write(high);
    }
    log::debug!("PIT running at {hz} Hz (divisor {divisor})");
}
