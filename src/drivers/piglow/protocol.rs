//! SN3218 register writes used by the PiGlow board.

/// PWM channels on the chip; the PiGlow wires one LED to each.
pub const CHANNELS: usize = 18;

const REG_SHUTDOWN: u8 = 0x00;
const REG_PWM_FIRST: u8 = 0x01;
const REG_LED_CONTROL_FIRST: u8 = 0x13;
const REG_UPDATE: u8 = 0x16;
const REG_RESET: u8 = 0x17;

/// Each LED-control register enables six channels.
const LED_CONTROL_ALL: u8 = 0x3F;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    /// Restore power-on register values.
    Reset,
    /// Leave software shutdown mode.
    EnableOutput,
    /// Enable all 18 channels.
    EnableLeds,
    /// Latch one PWM value into every channel.
    SetAll(u8),
    /// Copy latched PWM and LED-control registers to the outputs.
    Update,
}

impl Command {
    /// Register address followed by the data bytes, as one I²C write.
    pub fn to_bytes(&self) -> Vec<u8> {
        match *self {
            Command::Reset => vec![REG_RESET, 0xFF],
            Command::EnableOutput => vec![REG_SHUTDOWN, 0x01],
            Command::EnableLeds => vec![
                REG_LED_CONTROL_FIRST,
                LED_CONTROL_ALL,
                LED_CONTROL_ALL,
                LED_CONTROL_ALL,
            ],
            Command::SetAll(value) => {
                let mut buf = Vec::with_capacity(1 + CHANNELS);
                buf.push(REG_PWM_FIRST);
                buf.extend_from_slice(&[value; CHANNELS]);
                buf
            }
            Command::Update => vec![REG_UPDATE, 0xFF],
        }
    }
}
