//! Parser for the textual `animData` of a static Nanoleaf effect.
//!
//! A static effect sent to a one-panel device looks like
//! `"1 1 1 R G B W T"`: panel count, panel id, frame count, then the frame's
//! color, white channel and transition time.  Only the color is used.

use crate::domain::color::Rgb;

/// Index of the red channel token; green and blue follow it.
const RED_TOKEN: usize = 3;

/// Extracts the first panel's color from static `animData`.
///
/// Returns `None` when the string has fewer than six tokens or any of the
/// color tokens is not an integer.  Out-of-range integers are clamped.
///
/// # Examples
///
/// ```rust
/// use melkoleaf_core::{parse_static_anim_data, Rgb};
///
/// assert_eq!(parse_static_anim_data("1 1 1 0 0 255 0 1"), Some(Rgb::new(0, 0, 255)));
/// assert_eq!(parse_static_anim_data("1 1 1"), None);
/// ```
pub fn parse_static_anim_data(anim_data: &str) -> Option<Rgb> {
    let mut channels = anim_data
        .split_whitespace()
        .skip(RED_TOKEN)
        .take(3)
        .map(|token| token.parse::<i64>().ok());

    let r = channels.next()??;
    let g = channels.next()??;
    let b = channels.next()??;
    Some(Rgb::clamped(r, g, b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_color_tokens() {
        assert_eq!(
            parse_static_anim_data("1 1 1 255 128 0 0 1"),
            Some(Rgb::new(255, 128, 0))
        );
    }

    #[test]
    fn test_tolerates_extra_whitespace() {
        assert_eq!(
            parse_static_anim_data("  1  1 1\t10 20 30  "),
            Some(Rgb::new(10, 20, 30))
        );
    }

    #[test]
    fn test_clamps_out_of_range_values() {
        assert_eq!(
            parse_static_anim_data("1 1 1 999 -4 12 0 1"),
            Some(Rgb::new(255, 0, 12))
        );
    }

    #[test]
    fn test_rejects_short_input() {
        assert_eq!(parse_static_anim_data(""), None);
        assert_eq!(parse_static_anim_data("1 1 1 255 0"), None);
    }

    #[test]
    fn test_rejects_non_numeric_channel() {
        assert_eq!(parse_static_anim_data("1 1 1 red 0 0 0 1"), None);
    }
}
