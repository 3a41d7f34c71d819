//! RGB color value type and the brightness transform.
//!
//! Colors travel through lockglow as [`Rgb`], whose channels are `u8` and
//! therefore always within 0–255.  Loosely-typed integer triples coming from
//! configuration or a UI are validated once by [`Rgb::try_from_channels`];
//! conversion to a device's own color representation happens only at the
//! device adapter.
//!
//! # Brightness scaling
//!
//! [`scale_brightness`] keeps the hue of a color and moves its strongest
//! channel to `brightness / 100 * 255`:
//!
//! ```text
//! (200, 100, 0) @ 50%   max = 200, target = 127.5
//!                       r = 200/200 * 127.5 = 127.5 -> 128
//!                       g = 100/200 * 127.5 =  63.75 -> 64
//!                       b =   0/200 * 127.5 =   0    -> 0
//! ```
//!
//! A black input has no hue to preserve and stays black at every brightness.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for color parsing and validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ColorError {
    /// A channel value was outside 0–255.
    #[error("{channel} channel value {value} is outside 0-255")]
    ChannelOutOfRange { channel: &'static str, value: i32 },

    /// A hex color string was not of the form `#RRGGBB`.
    #[error("invalid hex color {0:?}; expected #RRGGBB")]
    InvalidHex(String),
}

/// An opaque 24-bit RGB color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb::new(0, 0, 0);
    pub const WHITE: Rgb = Rgb::new(255, 255, 255);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Builds a color from untyped integer channels.
    ///
    /// # Errors
    ///
    /// Returns [`ColorError::ChannelOutOfRange`] for the first channel that
    /// does not fit in 0–255.
    pub fn try_from_channels(r: i32, g: i32, b: i32) -> Result<Self, ColorError> {
        Ok(Self {
            r: channel("red", r)?,
            g: channel("green", g)?,
            b: channel("blue", b)?,
        })
    }

    /// Largest of the three channels.
    pub fn max_channel(self) -> u8 {
        self.r.max(self.g).max(self.b)
    }

    /// Formats the color as `#RRGGBB`.
    pub fn to_hex(self) -> String {
        format!("#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

fn channel(name: &'static str, value: i32) -> Result<u8, ColorError> {
    u8::try_from(value).map_err(|_| ColorError::ChannelOutOfRange {
        channel: name,
        value,
    })
}

impl FromStr for Rgb {
    type Err = ColorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s
            .strip_prefix('#')
            .filter(|h| h.len() == 6 && h.chars().all(|c| c.is_ascii_hexdigit()))
            .ok_or_else(|| ColorError::InvalidHex(s.to_string()))?;

        let byte = |i: usize| {
            u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| ColorError::InvalidHex(s.to_string()))
        };
        Ok(Self::new(byte(0)?, byte(2)?, byte(4)?))
    }
}

impl TryFrom<String> for Rgb {
    type Error = ColorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Rgb> for String {
    fn from(color: Rgb) -> Self {
        color.to_hex()
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Global brightness percentage, always within 0–100.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "i64", into = "u8")]
pub struct Brightness(u8);

impl Brightness {
    pub const MAX: Brightness = Brightness(100);

    /// Creates a brightness, clamping `percent` into 0–100.
    pub fn new(percent: i64) -> Self {
        Self(percent.clamp(0, 100) as u8)
    }

    pub fn percent(self) -> u8 {
        self.0
    }
}

impl Default for Brightness {
    fn default() -> Self {
        Self::MAX
    }
}

impl From<i64> for Brightness {
    fn from(percent: i64) -> Self {
        Self::new(percent)
    }
}

impl From<Brightness> for u8 {
    fn from(b: Brightness) -> Self {
        b.0
    }
}

/// Scales `color` so its strongest channel lands on `brightness / 100 * 255`
/// while every channel keeps its proportion of that strongest channel.
///
/// Each channel is rounded to the nearest integer and clamped to 0–255.
/// Black maps to black for every brightness.
pub fn scale_brightness(color: Rgb, brightness: Brightness) -> Rgb {
    let max = color.max_channel();
    if max == 0 {
        return Rgb::BLACK;
    }

    let target = f64::from(brightness.percent()) / 100.0 * 255.0;
    let max = f64::from(max);
    let scale = |c: u8| -> u8 {
        let proportion = f64::from(c) / max;
        (proportion * target).round().clamp(0.0, 255.0) as u8
    };

    Rgb::new(scale(color.r), scale(color.g), scale(color.b))
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── Validation ────────────────────────────────────────────────────────────

    #[test]
    fn test_try_from_channels_accepts_full_range() {
        assert_eq!(Rgb::try_from_channels(0, 128, 255), Ok(Rgb::new(0, 128, 255)));
    }

    #[test]
    fn test_try_from_channels_rejects_out_of_range_channel() {
        let err = Rgb::try_from_channels(10, 256, 0).unwrap_err();
        assert_eq!(
            err,
            ColorError::ChannelOutOfRange {
                channel: "green",
                value: 256
            }
        );
        assert!(Rgb::try_from_channels(-1, 0, 0).is_err());
    }

    #[test]
    fn test_hex_parse_and_format() {
        let color: Rgb = "#FF8000".parse().expect("valid hex");
        assert_eq!(color, Rgb::new(255, 128, 0));
        assert_eq!(color.to_hex(), "#FF8000");
        assert_eq!("#ff8000".parse::<Rgb>(), Ok(color));
    }

    #[test]
    fn test_hex_parse_rejects_malformed_input() {
        assert!("FF8000".parse::<Rgb>().is_err());
        assert!("#FF80".parse::<Rgb>().is_err());
        assert!("#GG8000".parse::<Rgb>().is_err());
        assert!("#FF80001".parse::<Rgb>().is_err());
    }

    #[test]
    fn test_brightness_clamps_into_percent_range() {
        assert_eq!(Brightness::new(-20).percent(), 0);
        assert_eq!(Brightness::new(55).percent(), 55);
        assert_eq!(Brightness::new(400).percent(), 100);
    }

    // ── Brightness scaling ────────────────────────────────────────────────────

    #[test]
    fn test_scale_at_zero_is_black() {
        for color in [Rgb::WHITE, Rgb::new(12, 200, 7), Rgb::new(1, 0, 0)] {
            assert_eq!(scale_brightness(color, Brightness::new(0)), Rgb::BLACK);
        }
    }

    #[test]
    fn test_scale_of_black_is_black() {
        for pct in [0, 1, 50, 100] {
            assert_eq!(scale_brightness(Rgb::BLACK, Brightness::new(pct)), Rgb::BLACK);
        }
    }

    #[test]
    fn test_scale_at_full_keeps_saturated_colors() {
        for color in [Rgb::WHITE, Rgb::new(255, 0, 0), Rgb::new(255, 128, 64), Rgb::new(3, 255, 90)] {
            assert_eq!(scale_brightness(color, Brightness::MAX), color);
        }
    }

    #[test]
    fn test_scale_at_full_is_idempotent() {
        for color in [Rgb::new(100, 50, 0), Rgb::new(7, 9, 11), Rgb::new(200, 200, 1)] {
            let once = scale_brightness(color, Brightness::MAX);
            let twice = scale_brightness(once, Brightness::MAX);
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn test_scale_normalises_dim_color_to_target_max() {
        // (100, 50, 0) at 100% -> strongest channel moves to 255.
        assert_eq!(
            scale_brightness(Rgb::new(100, 50, 0), Brightness::MAX),
            Rgb::new(255, 128, 0)
        );
    }

    #[test]
    fn test_scale_at_half_brightness() {
        assert_eq!(
            scale_brightness(Rgb::new(200, 100, 0), Brightness::new(50)),
            Rgb::new(128, 64, 0)
        );
        assert_eq!(
            scale_brightness(Rgb::WHITE, Brightness::new(50)),
            Rgb::new(128, 128, 128)
        );
    }

    #[test]
    fn test_scale_preserves_ratio_of_two_largest_channels() {
        let inputs = [
            Rgb::new(240, 120, 30),
            Rgb::new(10, 200, 150),
            Rgb::new(90, 60, 255),
        ];
        for color in inputs {
            let mut channels = [color.r, color.g, color.b];
            channels.sort_unstable_by(|a, b| b.cmp(a));
            let before = f64::from(channels[1]) / f64::from(channels[0]);

            let scaled = scale_brightness(color, Brightness::new(80));
            let mut out = [scaled.r, scaled.g, scaled.b];
            out.sort_unstable_by(|a, b| b.cmp(a));
            let after = f64::from(out[1]) / f64::from(out[0]);

            // One unit of rounding on a ~200 channel bounds the drift.
            assert!((before - after).abs() < 0.01, "{color}: {before} vs {after}");
        }
    }

    #[test]
    fn test_rgb_serde_as_hex_string() {
        #[derive(Serialize, Deserialize)]
        struct Wrapper {
            color: Rgb,
            brightness: Brightness,
        }

        let parsed: Wrapper = toml::from_str("color = \"#102030\"\nbrightness = 150\n").unwrap();
        assert_eq!(parsed.color, Rgb::new(0x10, 0x20, 0x30));
        assert_eq!(parsed.brightness.percent(), 100);

        let text = toml::to_string(&parsed).unwrap();
        assert!(text.contains("\"#102030\""));
    }
}
