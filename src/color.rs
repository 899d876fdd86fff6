use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Parses `#rrggbb`, `rrggbb` or the short `#rgb` form.
    pub fn from_hex(raw: &str) -> Result<Self, PipelineError> {
        let value = raw.trim();
        let digits = value.strip_prefix('#').unwrap_or(value);
        let invalid = || PipelineError::invalid_config(format!("invalid color '{raw}'"));
        if !digits.chars().all(|ch| ch.is_ascii_hexdigit()) {
            return Err(invalid());
        }
        let channel = |slice: &str| u8::from_str_radix(slice, 16).map_err(|_| invalid());
        match digits.len() {
            6 => Ok(Self::new(
                channel(&digits[0..2])?,
                channel(&digits[2..4])?,
                channel(&digits[4..6])?,
            )),
            3 => {
                let expand = |slice: &str| channel(slice).map(|v| v * 17);
                Ok(Self::new(
                    expand(&digits[0..1])?,
                    expand(&digits[1..2])?,
                    expand(&digits[2..3])?,
                ))
            }
            _ => Err(invalid()),
        }
    }

    pub fn to_hex(self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }

    /// Perceptual luminance, `round(0.299r + 0.587g + 0.114b)`.
    pub fn luminance(self) -> u8 {
        let value = 0.299 * f64::from(self.r) + 0.587 * f64::from(self.g) + 0.114 * f64::from(self.b);
        value.round().clamp(0.0, 255.0) as u8
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for Rgb {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Rgb {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::from_hex(&raw).map_err(serde::de::Error::custom)
    }
}

/// How a cell's sampled color becomes its display color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorMode {
    /// Every glyph in the configured foreground color.
    #[default]
    Monochrome,
    TrueColor,
    Grayscale,
}

impl ColorMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Monochrome => "monochrome",
            Self::TrueColor => "true_color",
            Self::Grayscale => "grayscale",
        }
    }
}

impl FromStr for ColorMode {
    type Err = PipelineError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "monochrome" | "mono" | "green" => Ok(Self::Monochrome),
            "true_color" | "truecolor" | "color" => Ok(Self::TrueColor),
            "grayscale" | "greyscale" | "gray" | "grey" => Ok(Self::Grayscale),
            _ => Err(PipelineError::UnknownColorMode {
                mode: raw.to_owned(),
            }),
        }
    }
}

/// Resolves a raw mode name, falling back to true color for names it does not know.
pub fn parse_mode_or_true_color(raw: &str) -> ColorMode {
    raw.parse().unwrap_or_else(|error: PipelineError| {
        log::warn!("{error}; falling back to true color");
        ColorMode::TrueColor
    })
}

pub fn resolve(sample: Rgb, mode: ColorMode, foreground: Rgb) -> Rgb {
    match mode {
        ColorMode::Monochrome => foreground,
        ColorMode::TrueColor => sample,
        ColorMode::Grayscale => {
            let luma = sample.luminance();
            Rgb::new(luma, luma, luma)
        }
    }
}
