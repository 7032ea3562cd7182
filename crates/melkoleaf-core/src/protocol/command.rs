//! MELK / ELK-BLEDOM wire commands.
//!
//! Wire format (every command is exactly 9 bytes, framed by `7E … EF`):
//! ```text
//! Color       7E 00 05 03  R   G   B  00 EF
//! Mode        7E 05 03 mode 06  FF  FF 00 EF
//! Speed       7E 04 02 spd  FF  FF  FF 00 EF
//! PowerOn     7E 00 04 F0  00  01  FF 00 EF
//! Brightness  7E 00 01 pct 00  00  00 00 EF
//! ```
//!
//! The encoder is pure: no state, no I/O.  Values that arrive as arbitrary
//! integers (HTTP bodies, config) go through the clamping constructors so the
//! byte that reaches the strip is always in range.

use crate::domain::color::{clamp_channel, Rgb};

/// Length in bytes of every encoded command.
pub const WIRE_COMMAND_LEN: usize = 9;

const START: u8 = 0x7E;
const END: u8 = 0xEF;

/// Highest brightness percentage the strips understand.
pub const MAX_BRIGHTNESS: u8 = 100;

/// A logical command for a MELK strip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireCommand {
    /// Solid color.
    Color(Rgb),
    /// Built-in effect selected by id.
    Mode(u8),
    /// Speed of the current built-in effect.
    Speed(u8),
    /// Switch the strip on.
    PowerOn,
    /// Brightness as a percentage (`0..=100`).
    Brightness(u8),
}

impl WireCommand {
    /// Color command with each channel clamped to `0..=255`.
    pub fn color(r: i64, g: i64, b: i64) -> Self {
        Self::Color(Rgb::clamped(r, g, b))
    }

    /// Mode command with the id clamped to `0..=255`.
    pub fn mode(mode: i64) -> Self {
        Self::Mode(clamp_channel(mode))
    }

    /// Speed command with the value clamped to `0..=255`.
    pub fn speed(speed: i64) -> Self {
        Self::Speed(clamp_channel(speed))
    }

    /// Brightness command with the percentage clamped to `0..=100`.
    pub fn brightness(percent: i64) -> Self {
        Self::Brightness(clamp_channel(percent).min(MAX_BRIGHTNESS))
    }

    /// Encodes the command into its 9-byte wire form.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use melkoleaf_core::{Rgb, WireCommand};
    ///
    /// let bytes = WireCommand::Color(Rgb::new(0xFF, 0x10, 0x00)).encode();
    /// assert_eq!(bytes, [0x7E, 0x00, 0x05, 0x03, 0xFF, 0x10, 0x00, 0x00, 0xEF]);
    /// ```
    pub fn encode(&self) -> [u8; WIRE_COMMAND_LEN] {
        match *self {
            Self::Color(color) => encode_color(color),
            Self::Mode(mode) => [START, 0x05, 0x03, mode, 0x06, 0xFF, 0xFF, 0x00, END],
            Self::Speed(speed) => [START, 0x04, 0x02, speed, 0xFF, 0xFF, 0xFF, 0x00, END],
            Self::PowerOn => [START, 0x00, 0x04, 0xF0, 0x00, 0x01, 0xFF, 0x00, END],
            Self::Brightness(pct) => {
                [START, 0x00, 0x01, pct.min(MAX_BRIGHTNESS), 0x00, 0x00, 0x00, 0x00, END]
            }
        }
    }
}

/// Encodes a solid color command.  Used on the broadcast hot path.
#[inline]
pub fn encode_color(color: Rgb) -> [u8; WIRE_COMMAND_LEN] {
    [START, 0x00, 0x05, 0x03, color.r, color.g, color.b, 0x00, END]
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_command_has_exact_layout() {
        for (r, g, b) in [(0u8, 0u8, 0u8), (255, 255, 255), (1, 128, 254)] {
            assert_eq!(
                encode_color(Rgb::new(r, g, b)),
                [0x7E, 0x00, 0x05, 0x03, r, g, b, 0x00, 0xEF]
            );
        }
    }

    #[test]
    fn test_color_constructor_clamps_out_of_range_channels() {
        // Arrange
        let cmd = WireCommand::color(-20, 300, 77);

        // Act
        let bytes = cmd.encode();

        // Assert
        assert_eq!(bytes, [0x7E, 0x00, 0x05, 0x03, 0, 255, 77, 0x00, 0xEF]);
    }

    #[test]
    fn test_mode_command_layout() {
        assert_eq!(
            WireCommand::mode(0x25).encode(),
            [0x7E, 0x05, 0x03, 0x25, 0x06, 0xFF, 0xFF, 0x00, 0xEF]
        );
    }

    #[test]
    fn test_mode_clamps_to_byte() {
        assert_eq!(WireCommand::mode(1_000), WireCommand::Mode(255));
        assert_eq!(WireCommand::mode(-1), WireCommand::Mode(0));
    }

    #[test]
    fn test_speed_command_layout() {
        assert_eq!(
            WireCommand::speed(50).encode(),
            [0x7E, 0x04, 0x02, 50, 0xFF, 0xFF, 0xFF, 0x00, 0xEF]
        );
    }

    #[test]
    fn test_power_on_command_layout() {
        assert_eq!(
            WireCommand::PowerOn.encode(),
            [0x7E, 0x00, 0x04, 0xF0, 0x00, 0x01, 0xFF, 0x00, 0xEF]
        );
    }

    #[test]
    fn test_brightness_is_capped_at_one_hundred_percent() {
        assert_eq!(WireCommand::brightness(250), WireCommand::Brightness(100));
        assert_eq!(WireCommand::Brightness(180).encode()[3], 100);
        assert_eq!(
            WireCommand::brightness(40).encode(),
            [0x7E, 0x00, 0x01, 40, 0x00, 0x00, 0x00, 0x00, 0xEF]
        );
    }

    #[test]
    fn test_every_command_is_framed() {
        let cmds = [
            WireCommand::Color(Rgb::BLACK),
            WireCommand::Mode(1),
            WireCommand::Speed(1),
            WireCommand::PowerOn,
            WireCommand::Brightness(1),
        ];
        for cmd in cmds {
            let bytes = cmd.encode();
            assert_eq!(bytes.len(), WIRE_COMMAND_LEN);
            assert_eq!(bytes[0], 0x7E, "{cmd:?}");
            assert_eq!(bytes[8], 0xEF, "{cmd:?}");
        }
    }
}
