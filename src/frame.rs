use crate::color::Rgb;
use crate::error::{PipelineError, Result};

pub const MAX_DENSITY: u32 = 400;
const ASPECT_MULTIPLIER: f64 = 1.33;

/// Character-cell grid size derived from the density setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GridDimensions {
    pub width: u32,
    pub height: u32,
}

impl GridDimensions {
    pub fn from_density(density: u32) -> Result<Self> {
        if density == 0 || density > MAX_DENSITY {
            return Err(PipelineError::InvalidDensity {
                density,
                max: MAX_DENSITY,
            });
        }
        let width = (f64::from(density) * ASPECT_MULTIPLIER).floor() as u32;
        Ok(Self {
            width: width.max(1),
            height: density,
        })
    }

    pub fn cell_count(self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// Tightly packed RGBA8 pixels in scan order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbaFrame {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl RgbaFrame {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * 4;
        if data.len() != expected {
            return Err(PipelineError::capture(format!(
                "frame buffer size mismatch for {width}x{height} (expected {expected} bytes, got {})",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    pub fn filled(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let data = rgba
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 4)
            .collect();
        Self {
            width,
            height,
            data,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let index = (y as usize * self.width as usize + x as usize) * 4;
        let px = &self.data[index..index + 4];
        Some([px[0], px[1], px[2], px[3]])
    }

    pub fn into_raw(self) -> Vec<u8> {
        self.data
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameCell {
    pub glyph: String,
    pub color_sample: Rgb,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameMetadata {
    pub frame_index: u64,
    pub timestamp_ms: u64,
}

/// One converted frame, row-major from the top-left cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grid {
    dims: GridDimensions,
    cells: Vec<FrameCell>,
    emoji: bool,
    pub metadata: Option<FrameMetadata>,
}

impl Grid {
    pub(crate) fn from_cells(dims: GridDimensions, cells: Vec<FrameCell>, emoji: bool) -> Self {
        debug_assert_eq!(cells.len(), dims.cell_count());
        Self {
            dims,
            cells,
            emoji,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: FrameMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn dims(&self) -> GridDimensions {
        self.dims
    }

    /// True when glyphs came from an emoji set rather than the base palette.
    pub fn uses_emoji(&self) -> bool {
        self.emoji
    }

    pub fn cells(&self) -> &[FrameCell] {
        &self.cells
    }

    pub fn cell(&self, column: u32, row: u32) -> Option<&FrameCell> {
        if column >= self.dims.width || row >= self.dims.height {
            return None;
        }
        self.cells
            .get(row as usize * self.dims.width as usize + column as usize)
    }

    pub fn rows(&self) -> impl Iterator<Item = &[FrameCell]> {
        self.cells.chunks(self.dims.width.max(1) as usize)
    }

    pub fn lines(&self) -> Vec<String> {
        self.rows()
            .map(|row| row.iter().map(|cell| cell.glyph.as_str()).collect())
            .collect()
    }

    pub fn to_text(&self) -> String {
        if self.cells.is_empty() {
            return String::new();
        }
        let mut value = self.lines().join("\n");
        value.push('\n');
        value
    }
}
