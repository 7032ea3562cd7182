//! RGB color value.
//!
//! Every color that enters the bridge, whether from a UDP datagram, an HTTP
//! body, or a configuration file, ends up as an [`Rgb`].  Datagram channels are
//! already bytes, but HTTP and config input are arbitrary integers, so the
//! constructors clamp each channel into `0..=255` instead of wrapping.

use serde::{Deserialize, Serialize};

/// A solid color with 8-bit red, green, and blue channels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    /// Pure black; also the color of a strip that has received nothing.
    pub const BLACK: Rgb = Rgb::new(0, 0, 0);

    /// Creates a color from channels that are already in range.
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Creates a color from arbitrary integers, clamping each to `0..=255`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use melkoleaf_core::Rgb;
    ///
    /// assert_eq!(Rgb::clamped(300, -5, 128), Rgb::new(255, 0, 128));
    /// ```
    pub fn clamped(r: i64, g: i64, b: i64) -> Self {
        Self {
            r: clamp_channel(r),
            g: clamp_channel(g),
            b: clamp_channel(b),
        }
    }

    /// Returns the channels as a `[r, g, b]` array.
    pub fn to_array(self) -> [u8; 3] {
        [self.r, self.g, self.b]
    }
}

impl From<[u8; 3]> for Rgb {
    fn from([r, g, b]: [u8; 3]) -> Self {
        Self { r, g, b }
    }
}

impl std::fmt::Display for Rgb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

/// Clamps an arbitrary integer into a single 8-bit channel.
pub fn clamp_channel(value: i64) -> u8 {
    // The clamp guarantees the value fits, so the conversion cannot fail.
    u8::try_from(value.clamp(0, 255)).unwrap_or(u8::MAX)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
