use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::frame::RgbaFrame;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterKind {
    #[default]
    None,
    Invert,
    Sepia,
    Grayscale,
}

impl FilterKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Invert => "invert",
            Self::Sepia => "sepia",
            Self::Grayscale => "grayscale",
        }
    }
}

impl fmt::Display for FilterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FilterKind {
    type Err = PipelineError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "invert" => Ok(Self::Invert),
            "sepia" => Ok(Self::Sepia),
            "grayscale" | "greyscale" => Ok(Self::Grayscale),
            other => Err(PipelineError::invalid_config(format!(
                "unknown filter '{other}' (expected none, invert, sepia or grayscale)"
            ))),
        }
    }
}

/// Transforms the frame in place. Alpha is never touched.
pub fn apply(frame: &mut RgbaFrame, kind: FilterKind) {
    let transform: fn(u8, u8, u8) -> [u8; 3] = match kind {
        FilterKind::None => return,
        FilterKind::Invert => invert,
        FilterKind::Sepia => sepia,
        FilterKind::Grayscale => grayscale,
    };
    for pixel in frame.data_mut().chunks_exact_mut(4) {
        let [r, g, b] = transform(pixel[0], pixel[1], pixel[2]);
        pixel[0] = r;
        pixel[1] = g;
        pixel[2] = b;
    }
}

fn invert(r: u8, g: u8, b: u8) -> [u8; 3] {
    [255 - r, 255 - g, 255 - b]
}

fn sepia(r: u8, g: u8, b: u8) -> [u8; 3] {
    let (r, g, b) = (f32::from(r), f32::from(g), f32::from(b));
    let channel = |value: f32| value.round().min(255.0) as u8;
    [
        channel(0.393 * r + 0.769 * g + 0.189 * b),
        channel(0.349 * r + 0.686 * g + 0.168 * b),
        channel(0.272 * r + 0.534 * g + 0.131 * b),
    ]
}

fn grayscale(r: u8, g: u8, b: u8) -> [u8; 3] {
    let mean = mean_rgb(r, g, b);
    [mean, mean, mean]
}

/// Unweighted channel mean rounded to the nearest integer.
pub fn mean_rgb(r: u8, g: u8, b: u8) -> u8 {
    let sum = u16::from(r) + u16::from(g) + u16::from(b);
    ((sum + 1) / 3) as u8
}

#[cfg(test)]
mod tests {
    use super::{apply, mean_rgb, FilterKind};
    use crate::frame::RgbaFrame;

    fn single(rgba: [u8; 4]) -> RgbaFrame {
        RgbaFrame::filled(1, 1, rgba)
    }

    #[test]
    fn invert_flips_channels_and_keeps_alpha() {
        let mut frame = single([10, 20, 30, 77]);
        apply(&mut frame, FilterKind::Invert);
        assert_eq!(frame.pixel(0, 0), Some([245, 235, 225, 77]));
    }

    #[test]
    fn sepia_clamps_white() {
        let mut frame = single([255, 255, 255, 255]);
        apply(&mut frame, FilterKind::Sepia);
        assert_eq!(frame.pixel(0, 0), Some([255, 255, 255, 255]));
    }

    #[test]
    fn sepia_weights_mid_gray() {
        let mut frame = single([100, 100, 100, 9]);
        apply(&mut frame, FilterKind::Sepia);
        // 135.1, 120.3, 93.7
        assert_eq!(frame.pixel(0, 0), Some([135, 120, 94, 9]));
    }

    #[test]
    fn grayscale_is_unweighted_mean() {
        let mut frame = single([255, 0, 0, 200]);
        apply(&mut frame, FilterKind::Grayscale);
        assert_eq!(frame.pixel(0, 0), Some([85, 85, 85, 200]));
    }

    #[test]
    fn none_is_identity() {
        let mut frame = RgbaFrame::new(2, 1, vec![1, 2, 3, 4, 250, 251, 252, 253]).expect("frame");
        let before = frame.clone();
        apply(&mut frame, FilterKind::None);
        assert_eq!(frame, before);
    }

    #[test]
    fn mean_rounds_to_nearest() {
        assert_eq!(mean_rgb(0, 0, 1), 0);
        assert_eq!(mean_rgb(0, 1, 1), 1);
        assert_eq!(mean_rgb(255, 255, 255), 255);
    }

    #[test]
    fn filter_names_parse() {
        assert_eq!("Sepia".parse::<FilterKind>().expect("filter"), FilterKind::Sepia);
        assert!("blur".parse::<FilterKind>().is_err());
    }
}
