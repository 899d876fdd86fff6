use std::io::Write;

use crossterm::style::{Color, Print, ResetColor, SetBackgroundColor, SetForegroundColor};
use crossterm::terminal::{
    BeginSynchronizedUpdate, Clear, ClearType, DisableLineWrap, EnableLineWrap,
    EndSynchronizedUpdate, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::{cursor, execute, queue};
use log::debug;

use crate::color::Rgb;
use crate::config::RenderConfig;
use crate::error::{PipelineError, Result};
use crate::frame::{Grid, GridDimensions};

use super::RenderSink;

/// ANSI truecolor output. The alternate screen is entered on the first draw
/// and left again on `clear` or drop.
pub struct TerminalSink<W: Write> {
    out: W,
    alternate_screen: bool,
    entered: bool,
    last_dims: Option<GridDimensions>,
}

impl<W: Write> TerminalSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            alternate_screen: true,
            entered: false,
            last_dims: None,
        }
    }

    /// Draw in place on the main screen instead of the alternate one.
    pub fn inline(out: W) -> Self {
        Self {
            out,
            alternate_screen: false,
            entered: false,
            last_dims: None,
        }
    }

    pub fn get_ref(&self) -> &W {
        &self.out
    }

    fn enter(&mut self) -> std::io::Result<()> {
        if self.entered {
            return Ok(());
        }
        if self.alternate_screen {
            execute!(self.out, EnterAlternateScreen)?;
        }
        execute!(self.out, DisableLineWrap, cursor::Hide)?;
        self.entered = true;
        Ok(())
    }

    fn leave(&mut self) -> std::io::Result<()> {
        if !self.entered {
            return Ok(());
        }
        self.entered = false;
        self.last_dims = None;
        execute!(self.out, ResetColor, cursor::Show, EnableLineWrap)?;
        if self.alternate_screen {
            execute!(self.out, LeaveAlternateScreen)?;
        }
        Ok(())
    }

    fn write_grid(&mut self, grid: &Grid, config: &RenderConfig) -> std::io::Result<()> {
        self.enter()?;
        queue!(self.out, BeginSynchronizedUpdate)?;
        if self.last_dims != Some(grid.dims()) {
            debug!(
                "terminal grid now {}x{}",
                grid.dims().width,
                grid.dims().height
            );
            queue!(self.out, Clear(ClearType::All))?;
            self.last_dims = Some(grid.dims());
        }
        queue!(self.out, SetBackgroundColor(to_color(config.background)))?;

        let mut last_fg: Option<Rgb> = None;
        for (row_index, row) in grid.rows().enumerate() {
            let row_index = u16::try_from(row_index).unwrap_or(u16::MAX);
            queue!(self.out, cursor::MoveTo(0, row_index))?;
            for cell in row {
                let color = config.resolve_color(cell.color_sample);
                if last_fg != Some(color) {
                    queue!(self.out, SetForegroundColor(to_color(color)))?;
                    last_fg = Some(color);
                }
                queue!(self.out, Print(&cell.glyph))?;
            }
        }
        queue!(self.out, ResetColor, EndSynchronizedUpdate)?;
        self.out.flush()
    }
}

impl<W: Write> RenderSink for TerminalSink<W> {
    fn draw(&mut self, grid: &Grid, config: &RenderConfig) -> Result<()> {
        self.write_grid(grid, config)
            .map_err(|error| PipelineError::render(format!("terminal write failed: {error}")))
    }

    fn clear(&mut self) -> Result<()> {
        self.leave()?;
        Ok(())
    }
}

impl<W: Write> Drop for TerminalSink<W> {
    fn drop(&mut self) {
        let _ = self.leave();
    }
}

/// Writes the grid as newline-separated rows with inline truecolor escapes,
/// suitable for piping. No cursor movement or screen control is emitted.
pub fn write_colored_lines<W: Write>(
    out: &mut W,
    grid: &Grid,
    config: &RenderConfig,
) -> std::io::Result<()> {
    for row in grid.rows() {
        let mut last_fg: Option<Rgb> = None;
        for cell in row {
            let color = config.resolve_color(cell.color_sample);
            if last_fg != Some(color) {
                queue!(out, SetForegroundColor(to_color(color)))?;
                last_fg = Some(color);
            }
            queue!(out, Print(&cell.glyph))?;
        }
        queue!(out, ResetColor, Print("\n"))?;
    }
    out.flush()
}

fn to_color(rgb: Rgb) -> Color {
    Color::Rgb {
        r: rgb.r,
        g: rgb.g,
        b: rgb.b,
    }
}
