//! Frame → character grid conversion.
//!
//! The source frame is expected to be scaled to exactly one pixel per cell
//! before it arrives here; there is no area averaging. Each cell keeps its
//! post-filter RGB sample so any color mode can be derived when drawing.

use crate::color::Rgb;
use crate::error::{PipelineError, Result};
use crate::filter::{self, mean_rgb, FilterKind};
use crate::frame::{FrameCell, Grid, GridDimensions, RgbaFrame};
use crate::palette::{BrightnessLut, GlyphTables};

pub fn convert(
    frame: &RgbaFrame,
    dims: GridDimensions,
    lut: &BrightnessLut,
    emoji: Option<&BrightnessLut>,
) -> Result<Grid> {
    if frame.width() != dims.width || frame.height() != dims.height {
        return Err(PipelineError::capture(format!(
            "frame is {}x{} but grid is {}x{}",
            frame.width(),
            frame.height(),
            dims.width,
            dims.height
        )));
    }

    let table = emoji.unwrap_or(lut);
    let cells = frame
        .data()
        .chunks_exact(4)
        .map(|px| {
            let brightness = mean_rgb(px[0], px[1], px[2]);
            FrameCell {
                glyph: table.glyph(brightness).to_owned(),
                color_sample: Rgb::new(px[0], px[1], px[2]),
            }
        })
        .collect::<Vec<_>>();

    Ok(Grid::from_cells(dims, cells, emoji.is_some()))
}

/// Filter stage followed by conversion; the frame is consumed because the
/// filter rewrites it in place.
pub fn process_frame(
    mut frame: RgbaFrame,
    filter_kind: FilterKind,
    dims: GridDimensions,
    tables: &GlyphTables,
) -> Result<Grid> {
    filter::apply(&mut frame, filter_kind);
    convert(&frame, dims, &tables.base, tables.emoji.as_ref())
}

#[cfg(test)]
mod tests {
    use super::{convert, process_frame};
    use crate::color::Rgb;
    use crate::filter::FilterKind;
    use crate::frame::{GridDimensions, RgbaFrame};
    use crate::palette::{BrightnessLut, GlyphPalette, GlyphTables, PaletteChoice};

    fn gradient(width: u32, height: u32) -> RgbaFrame {
        let mut data = Vec::new();
        for y in 0..height {
            for x in 0..width {
                let v = ((x + y * width) * 255 / (width * height - 1)) as u8;
                data.extend_from_slice(&[v, v, v, 255]);
            }
        }
        RgbaFrame::new(width, height, data).expect("frame")
    }

    #[test]
    fn cells_follow_scan_order() {
        let lut = BrightnessLut::rebuild(&GlyphPalette::new(["a", "b"]).expect("palette"))
            .expect("lut");
        let dims = GridDimensions { width: 2, height: 2 };
        let frame = RgbaFrame::new(
            2,
            2,
            vec![
                0, 0, 0, 255, 255, 255, 255, 255, //
                255, 255, 255, 255, 0, 0, 0, 255,
            ],
        )
        .expect("frame");
        let grid = convert(&frame, dims, &lut, None).expect("convert");
        assert_eq!(grid.to_text(), "ab\nba\n");
    }

    #[test]
    fn color_sample_is_kept_in_true_color() {
        let lut = BrightnessLut::rebuild(&GlyphPalette::named("standard").expect("palette"))
            .expect("lut");
        let frame = RgbaFrame::filled(1, 1, [200, 10, 30, 0]);
        let grid = convert(&frame, GridDimensions { width: 1, height: 1 }, &lut, None)
            .expect("convert");
        assert_eq!(grid.cells()[0].color_sample, Rgb::new(200, 10, 30));
        // mean(200, 10, 30) = 80 → floor(80 / 255 * 10) = 3
        assert_eq!(grid.cells()[0].glyph, "%");
    }

    #[test]
    fn emoji_table_overrides_base_palette() {
        let tables = GlyphTables::build(&PaletteChoice {
            emoji_set: Some("moon".to_owned()),
            ..PaletteChoice::default()
        })
        .expect("tables");
        let frame = RgbaFrame::filled(2, 1, [255, 255, 255, 255]);
        let grid = process_frame(
            frame,
            FilterKind::None,
            GridDimensions { width: 2, height: 1 },
            &tables,
        )
        .expect("process");
        assert_eq!(grid.to_text(), "🌕🌕\n");
        assert!(grid.uses_emoji());
    }

    #[test]
    fn filter_runs_before_sampling() {
        let tables = GlyphTables::build(&PaletteChoice {
            palette: "simple".to_owned(),
            ..PaletteChoice::default()
        })
        .expect("tables");
        let frame = RgbaFrame::filled(1, 1, [0, 0, 0, 255]);
        let grid = process_frame(
            frame,
            FilterKind::Invert,
            GridDimensions { width: 1, height: 1 },
            &tables,
        )
        .expect("process");
        assert_eq!(grid.cells()[0].glyph, ".");
        assert_eq!(grid.cells()[0].color_sample, Rgb::new(255, 255, 255));
    }

    #[test]
    fn conversion_is_deterministic() {
        let tables = GlyphTables::build(&PaletteChoice::default()).expect("tables");
        let dims = GridDimensions { width: 16, height: 9 };
        let first = process_frame(gradient(16, 9), FilterKind::Sepia, dims, &tables)
            .expect("process");
        let second = process_frame(gradient(16, 9), FilterKind::Sepia, dims, &tables)
            .expect("process");
        assert_eq!(first, second);
    }

    #[test]
    fn mismatched_frame_size_is_rejected() {
        let tables = GlyphTables::build(&PaletteChoice::default()).expect("tables");
        let result = process_frame(
            gradient(4, 4),
            FilterKind::None,
            GridDimensions { width: 5, height: 4 },
            &tables,
        );
        assert!(result.is_err());
    }
}
