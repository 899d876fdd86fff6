use std::io::Write;

use crate::config::RenderConfig;
use crate::error::Result;
use crate::frame::Grid;

use super::RenderSink;

/// Plain glyph text, one grid per frame with a blank line between frames.
/// Colors are not emitted.
pub struct TextSink<W: Write> {
    out: W,
    frames_written: u64,
}

impl<W: Write> TextSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            frames_written: 0,
        }
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    pub fn get_ref(&self) -> &W {
        &self.out
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> RenderSink for TextSink<W> {
    fn draw(&mut self, grid: &Grid, _config: &RenderConfig) -> Result<()> {
        if self.frames_written > 0 {
            self.out.write_all(b"\n")?;
        }
        self.out.write_all(grid.to_text().as_bytes())?;
        self.out.flush()?;
        self.frames_written += 1;
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::TextSink;
    use crate::config::RenderConfig;
    use crate::filter::FilterKind;
    use crate::frame::{GridDimensions, RgbaFrame};
    use crate::palette::{GlyphTables, PaletteChoice};
    use crate::sampler::process_frame;
    use crate::sink::RenderSink;

    #[test]
    fn frames_are_separated_by_blank_lines() {
        let tables = GlyphTables::build(&PaletteChoice {
            palette: "simple".to_owned(),
            ..PaletteChoice::default()
        })
        .expect("tables");
        let dims = GridDimensions { width: 3, height: 1 };
        let grid = process_frame(
            RgbaFrame::filled(3, 1, [255, 255, 255, 255]),
            FilterKind::None,
            dims,
            &tables,
        )
        .expect("grid");

        let mut sink = TextSink::new(Vec::new());
        let config = RenderConfig::default();
        sink.draw(&grid, &config).expect("draw");
        sink.draw(&grid, &config).expect("draw");
        assert_eq!(sink.frames_written(), 2);
        let text = String::from_utf8(sink.into_inner()).expect("utf8");
        assert_eq!(text, "...\n\n...\n");
    }
}
