use std::str::FromStr;

use anyhow::anyhow;
use clap::ValueEnum;
use palette::{FromColor, Hsv, Srgb};
use serde::{Deserialize, Serialize};

/// Coldest white the lights can do, 6500 K.
pub const MIN_MIREDS: u16 = 153;
/// Warmest white the lights can do, 2700 K.
pub const MAX_MIREDS: u16 = 370;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RGB {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

impl From<RGB> for (u8, u8, u8) {
    fn from(rgb: RGB) -> Self {
        (rgb.red, rgb.green, rgb.blue)
    }
}

impl From<(u8, u8, u8)> for RGB {
    fn from((red, green, blue): (u8, u8, u8)) -> Self {
        RGB { red, green, blue }
    }
}

/// Maps `value` from `[min_from, max_from]` onto `[min_to, max_to]`.
///
/// The result is rounded and clamped to the target range.
pub fn convert_value_to_available_range(
    value: f64,
    min_from: f64,
    max_from: f64,
    min_to: f64,
    max_to: f64,
) -> i64 {
    let normalized = (value - min_from) / (max_from - min_from);
    let new_value = ((normalized * (max_to - min_to)) + min_to).round();
    new_value.min(max_to).max(min_to) as i64
}

/// Same as [`convert_value_to_available_range`] for device byte ranges.
pub fn convert_to_u8(value: f64, min_from: f64, max_from: f64, min_to: u8, max_to: u8) -> u8 {
    convert_value_to_available_range(value, min_from, max_from, min_to as f64, max_to as f64) as u8
}

/// Converts hue (0..360) and saturation (0..100) at full value to RGB.
pub fn hs_to_rgb(hue: f32, saturation: f32) -> RGB {
    let hsv = Hsv::new(hue, (saturation / 100.0).clamp(0.0, 1.0), 1.0);
    let rgb = Srgb::from_color(hsv);
    let (r, g, b) = rgb.into_components();
    RGB {
        red: (r * 255.0).round() as u8,
        green: (g * 255.0).round() as u8,
        blue: (b * 255.0).round() as u8,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CliColors {
    Red,
    Green,
    Blue,
    Yellow,
    Orange,
    Purple,
    Cyan,
    Magenta,
    Pink,
    WarmWhite,
    White,
}

impl FromStr for CliColors {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CliColors::from_str_ignore_case(s)
    }
}

impl CliColors {
    fn from_str_ignore_case(s: &str) -> anyhow::Result<Self> {
        <CliColors as ValueEnum>::from_str(s, true).map_err(|_| anyhow!("Invalid color"))
    }
}

impl From<CliColors> for RGB {
    fn from(color: CliColors) -> Self {
        let rgb = match color {
            CliColors::Red => (255, 0, 0),
            CliColors::Green => (0, 255, 0),
            CliColors::Blue => (0, 0, 255),
            CliColors::Yellow => (255, 255, 0),
            CliColors::Orange => (255, 165, 0),
            CliColors::Purple => (128, 0, 128),
            CliColors::Cyan => (0, 255, 255),
            CliColors::Magenta => (255, 0, 255),
            CliColors::Pink => (255, 192, 203),
            CliColors::WarmWhite => (255, 180, 107),
            CliColors::White => (255, 255, 255),
        };
        rgb.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convert_value_endpoints() {
        assert_eq!(convert_value_to_available_range(0.0, 0.0, 255.0, 1.0, 127.0), 1);
        assert_eq!(convert_value_to_available_range(255.0, 0.0, 255.0, 1.0, 127.0), 127);
        assert_eq!(convert_value_to_available_range(0.0, 0.0, 255.0, 10.0, 100.0), 10);
        assert_eq!(convert_value_to_available_range(255.0, 0.0, 255.0, 10.0, 100.0), 100);
    }

    #[test]
    fn test_convert_value_rounds() {
        // 128 / 255 * 126 + 1 = 64.25
        assert_eq!(convert_value_to_available_range(128.0, 0.0, 255.0, 1.0, 127.0), 64);
        // 0x40 of 1..0x7f back to 0..255
        assert_eq!(convert_value_to_available_range(64.0, 1.0, 127.0, 0.0, 255.0), 128);
    }

    #[test]
    fn test_convert_value_clamps() {
        assert_eq!(convert_value_to_available_range(400.0, 153.0, 370.0, 0.0, 127.0), 127);
        assert_eq!(convert_value_to_available_range(100.0, 153.0, 370.0, 0.0, 127.0), 0);
        assert_eq!(convert_to_u8(-5.0, 0.0, 255.0, 1, 0x7f), 1);
    }

    #[test]
    fn test_mired_conversion() {
        assert_eq!(convert_to_u8(MIN_MIREDS as f64, 153.0, 370.0, 0, 0x7f), 0);
        assert_eq!(convert_to_u8(MAX_MIREDS as f64, 153.0, 370.0, 0, 0x7f), 0x7f);
    }

    #[test]
    fn test_hs_to_rgb() {
        assert_eq!(hs_to_rgb(0.0, 100.0), RGB { red: 255, green: 0, blue: 0 });
        assert_eq!(hs_to_rgb(120.0, 100.0), RGB { red: 0, green: 255, blue: 0 });
        assert_eq!(hs_to_rgb(240.0, 0.0), RGB { red: 255, green: 255, blue: 255 });
    }

    #[test]
    fn test_named_colors() {
        assert_eq!(RGB::from(CliColors::Green), RGB { red: 0, green: 255, blue: 0 });
        assert_eq!("warm-white".parse::<CliColors>().unwrap(), CliColors::WarmWhite);
        assert!("chartreuse".parse::<CliColors>().is_err());
    }
}
