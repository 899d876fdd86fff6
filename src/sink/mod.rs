//! Draw targets for converted grids.

mod canvas;
mod terminal;
mod text;

pub use canvas::{CanvasSink, FfplayWindow, GlyphPainter};
pub use terminal::{write_colored_lines, TerminalSink};
pub use text::TextSink;

use std::str::FromStr;

use crate::config::RenderConfig;
use crate::error::{PipelineError, Result};
use crate::frame::Grid;

pub trait RenderSink {
    /// Draws every cell at `cell index × cell size` using the color resolved
    /// from `config`.
    fn draw(&mut self, grid: &Grid, config: &RenderConfig) -> Result<()>;

    /// Called once when the loop stops.
    fn clear(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<S: RenderSink + ?Sized> RenderSink for Box<S> {
    fn draw(&mut self, grid: &Grid, config: &RenderConfig) -> Result<()> {
        (**self).draw(grid, config)
    }

    fn clear(&mut self) -> Result<()> {
        (**self).clear()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SinkKind {
    #[default]
    Terminal,
    Text,
    Window,
}

impl FromStr for SinkKind {
    type Err = PipelineError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "terminal" | "tty" => Ok(Self::Terminal),
            "text" | "stdout" => Ok(Self::Text),
            "window" | "canvas" => Ok(Self::Window),
            other => Err(PipelineError::invalid_config(format!(
                "unknown sink '{other}' (expected terminal, text or window)"
            ))),
        }
    }
}
