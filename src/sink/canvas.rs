use std::collections::HashMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};

use fontdue::layout::{CoordinateSystem, Layout, LayoutSettings, TextStyle};
use fontdue::{Font, FontSettings};
use log::{debug, info, warn};
use tiny_skia::{Color, Pixmap};

use crate::color::Rgb;
use crate::config::{FontStyle, RenderConfig};
use crate::error::{PipelineError, Result};
use crate::frame::Grid;

use super::RenderSink;

const SYSTEM_MONO_FONTS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSansMono.ttf",
    "/usr/share/fonts/TTF/DejaVuSansMono.ttf",
    "/usr/share/fonts/dejavu-sans-mono-fonts/DejaVuSansMono.ttf",
    "/System/Library/Fonts/Menlo.ttc",
    "/Library/Fonts/Courier New.ttf",
    "C:\\Windows\\Fonts\\consola.ttf",
];

struct GlyphBitmap {
    x: i32,
    y: i32,
    width: usize,
    height: usize,
    bitmap: Vec<u8>,
}

/// Rasterizes glyph strings with fontdue. Bitmaps are cached per glyph and
/// size, so steady-state frames do no rasterization.
pub struct GlyphPainter {
    font: Font,
    source: PathBuf,
    cache: HashMap<(String, u32), Vec<GlyphBitmap>>,
}

impl GlyphPainter {
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).map_err(|error| {
            PipelineError::render(format!("failed to read font '{}': {error}", path.display()))
        })?;
        let font = Font::from_bytes(bytes, FontSettings::default()).map_err(|error| {
            PipelineError::render(format!("failed to parse font '{}': {error}", path.display()))
        })?;
        Ok(Self {
            font,
            source: path.to_path_buf(),
            cache: HashMap::new(),
        })
    }

    /// First usable monospace font found in the usual system locations.
    pub fn system_default() -> Option<Self> {
        SYSTEM_MONO_FONTS
            .iter()
            .map(Path::new)
            .filter(|path| path.is_file())
            .find_map(|path| Self::load(path).ok())
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    fn paint(
        &mut self,
        frame: &mut [u8],
        frame_width: u32,
        frame_height: u32,
        x: i32,
        y: i32,
        glyph: &str,
        size: f32,
        color: [u8; 4],
    ) {
        let key = (glyph.to_owned(), size.to_bits());
        if !self.cache.contains_key(&key) {
            let parts = rasterize(&self.font, glyph, size);
            self.cache.insert(key.clone(), parts);
        }
        let Some(parts) = self.cache.get(&key) else {
            return;
        };
        for part in parts {
            blend_glyph(
                frame,
                frame_width,
                frame_height,
                x + part.x,
                y + part.y,
                part,
                color,
            );
        }
    }
}

fn rasterize(font: &Font, glyph: &str, size: f32) -> Vec<GlyphBitmap> {
    let mut layout = Layout::new(CoordinateSystem::PositiveYDown);
    layout.reset(&LayoutSettings {
        x: 0.0,
        y: 0.0,
        max_width: None,
        max_height: None,
        horizontal_align: fontdue::layout::HorizontalAlign::Left,
        vertical_align: fontdue::layout::VerticalAlign::Top,
        line_height: 1.0,
        wrap_style: fontdue::layout::WrapStyle::Letter,
        wrap_hard_breaks: true,
    });
    layout.append(&[font], &TextStyle::new(glyph, size, 0));
    layout
        .glyphs()
        .iter()
        .filter(|placed| placed.width > 0 && placed.height > 0)
        .map(|placed| {
            let (_, bitmap) = font.rasterize_config(placed.key);
            GlyphBitmap {
                x: placed.x.round() as i32,
                y: placed.y.round() as i32,
                width: placed.width,
                height: placed.height,
                bitmap,
            }
        })
        .collect()
}

/// Pixel canvas: `cell_pixel_size` square cells, glyphs drawn at
/// `glyph_pixel_size`. Without any font each non-blank cell becomes a solid
/// block of the glyph size.
pub struct CanvasSink {
    pixmap: Option<Pixmap>,
    painter: Option<GlyphPainter>,
    font_request: Option<Option<PathBuf>>,
    presenter: Option<FfplayWindow>,
}

impl CanvasSink {
    pub fn new() -> Self {
        Self {
            pixmap: None,
            painter: None,
            font_request: None,
            presenter: None,
        }
    }

    pub fn with_presenter(mut self, presenter: FfplayWindow) -> Self {
        self.presenter = Some(presenter);
        self
    }

    pub fn pixmap(&self) -> Option<&Pixmap> {
        self.pixmap.as_ref()
    }

    pub fn has_font(&self) -> bool {
        self.painter.is_some()
    }

    fn ensure_font(&mut self, config: &RenderConfig) -> Result<()> {
        if self.font_request.as_ref() == Some(&config.font_path) {
            return Ok(());
        }
        self.painter = match &config.font_path {
            Some(path) => Some(GlyphPainter::load(path)?),
            None => GlyphPainter::system_default(),
        };
        match &self.painter {
            Some(painter) => info!("canvas font {}", painter.source().display()),
            None => warn!("no font available; drawing cells as solid blocks"),
        }
        self.font_request = Some(config.font_path.clone());
        Ok(())
    }

    fn ensure_pixmap(&mut self, width: u32, height: u32) -> Result<()> {
        let resize = self
            .pixmap
            .as_ref()
            .map_or(true, |pixmap| pixmap.width() != width || pixmap.height() != height);
        if resize {
            debug!("canvas resized to {width}x{height}");
            let pixmap = Pixmap::new(width, height).ok_or_else(|| {
                PipelineError::render(format!("invalid canvas size {width}x{height}"))
            })?;
            self.pixmap = Some(pixmap);
        }
        Ok(())
    }
}

impl Default for CanvasSink {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderSink for CanvasSink {
    fn draw(&mut self, grid: &Grid, config: &RenderConfig) -> Result<()> {
        self.ensure_font(config)?;

        let cell = config.cell_pixel_size;
        let dims = grid.dims();
        let width = dims.width.saturating_mul(cell);
        let height = dims.height.saturating_mul(cell);
        let alpha = if grid.uses_emoji() {
            (config.emoji_alpha.clamp(0.0, 1.0) * 255.0).round() as u8
        } else {
            255
        };
        let glyph_size = config.glyph_pixel_size;
        let passes: &[i32] = match config.font_style {
            FontStyle::Regular => &[0],
            FontStyle::Bold => &[0, 1],
        };

        self.ensure_pixmap(width, height)?;
        let Some(pixmap) = self.pixmap.as_mut() else {
            return Err(PipelineError::render("canvas was not allocated"));
        };
        let painter = &mut self.painter;
        let background = config.background;
        pixmap.fill(Color::from_rgba8(background.r, background.g, background.b, 255));
        let frame = pixmap.data_mut();

        for (index, cell_value) in grid.cells().iter().enumerate() {
            if cell_value.glyph.trim().is_empty() {
                continue;
            }
            let column = (index % dims.width as usize) as i32;
            let row = (index / dims.width as usize) as i32;
            let x = column * cell as i32;
            let y = row * cell as i32;
            let Rgb { r, g, b } = config.resolve_color(cell_value.color_sample);
            let color = [r, g, b, alpha];
            for offset in passes {
                match painter.as_mut() {
                    Some(painter) => painter.paint(
                        frame,
                        width,
                        height,
                        x + offset,
                        y,
                        &cell_value.glyph,
                        glyph_size,
                        color,
                    ),
                    None => fill_block(frame, width, height, x + offset, y, glyph_size, color),
                }
            }
        }

        if let (Some(presenter), Some(pixmap)) = (self.presenter.as_mut(), self.pixmap.as_ref()) {
            presenter.present(pixmap)?;
        }
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        self.pixmap = None;
        if let Some(presenter) = self.presenter.as_mut() {
            presenter.close();
        }
        Ok(())
    }
}

fn fill_block(
    frame: &mut [u8],
    frame_width: u32,
    frame_height: u32,
    x: i32,
    y: i32,
    size: f32,
    color: [u8; 4],
) {
    let side = size.round().max(1.0) as usize;
    let block = GlyphBitmap {
        x: 0,
        y: 0,
        width: side,
        height: side,
        bitmap: vec![255; side * side],
    };
    blend_glyph(frame, frame_width, frame_height, x, y, &block, color);
}

fn blend_glyph(
    frame: &mut [u8],
    frame_width: u32,
    frame_height: u32,
    x: i32,
    y: i32,
    glyph: &GlyphBitmap,
    color: [u8; 4],
) {
    for row in 0..glyph.height {
        let py = y + row as i32;
        if py < 0 || py >= frame_height as i32 {
            continue;
        }

        for col in 0..glyph.width {
            let px = x + col as i32;
            if px < 0 || px >= frame_width as i32 {
                continue;
            }
            let mask = glyph.bitmap[row * glyph.width + col];
            if mask == 0 {
                continue;
            }
            let alpha = ((u16::from(mask) * u16::from(color[3])) / 255) as u8;
            let idx = ((py as u32 * frame_width + px as u32) * 4) as usize;
            blend_pixel(frame, idx, [color[0], color[1], color[2], alpha]);
        }
    }
}

fn blend_pixel(frame: &mut [u8], idx: usize, src: [u8; 4]) {
    let alpha = u16::from(src[3]);
    if alpha == 0 {
        return;
    }
    let inv_alpha = 255_u16.saturating_sub(alpha);
    for channel in 0..3 {
        let dst = u16::from(frame[idx + channel]);
        let src_c = u16::from(src[channel]);
        frame[idx + channel] = ((src_c * alpha + dst * inv_alpha + 127) / 255) as u8;
    }
    frame[idx + 3] = 255;
}

/// Shows canvas frames in an `ffplay` window fed raw RGBA over stdin. The
/// player is restarted whenever the canvas size changes.
pub struct FfplayWindow {
    ffplay: PathBuf,
    title: String,
    fps: u32,
    child: Option<(Child, ChildStdin, u32, u32)>,
}

impl FfplayWindow {
    pub fn new(title: impl Into<String>, fps: u32) -> Self {
        Self {
            ffplay: PathBuf::from("ffplay"),
            title: title.into(),
            fps: fps.max(1),
            child: None,
        }
    }

    pub fn with_ffplay_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ffplay = path.into();
        self
    }

    fn spawn(&self, width: u32, height: u32) -> Result<(Child, ChildStdin)> {
        let mut child = Command::new(&self.ffplay)
            .args([
                "-hide_banner",
                "-loglevel",
                "error",
                "-f",
                "rawvideo",
                "-pixel_format",
                "rgba",
                "-video_size",
                &format!("{width}x{height}"),
                "-framerate",
                &self.fps.to_string(),
                "-window_title",
                &self.title,
                "-i",
                "-",
            ])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|error| {
                if error.kind() == ErrorKind::NotFound {
                    PipelineError::render(format!(
                        "ffplay executable '{}' not found; install ffmpeg or use the terminal sink",
                        self.ffplay.display()
                    ))
                } else {
                    PipelineError::render(format!("failed to spawn ffplay: {error}"))
                }
            })?;
        let Some(stdin) = child.stdin.take() else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(PipelineError::render("failed to open ffplay stdin"));
        };
        Ok((child, stdin))
    }

    pub fn present(&mut self, pixmap: &Pixmap) -> Result<()> {
        let (width, height) = (pixmap.width(), pixmap.height());
        let stale = self
            .child
            .as_ref()
            .map_or(true, |(_, _, w, h)| *w != width || *h != height);
        if stale {
            self.close();
            let (child, stdin) = self.spawn(width, height)?;
            self.child = Some((child, stdin, width, height));
        }
        let Some((_, stdin, _, _)) = self.child.as_mut() else {
            return Ok(());
        };
        if let Err(error) = stdin.write_all(pixmap.data()) {
            self.close();
            return Err(PipelineError::render(format!(
                "preview window closed: {error}"
            )));
        }
        Ok(())
    }

    pub fn close(&mut self) {
        if let Some((mut child, stdin, _, _)) = self.child.take() {
            drop(stdin);
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

impl Drop for FfplayWindow {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::{CanvasSink, FfplayWindow};
    use crate::color::{ColorMode, Rgb};
    use crate::config::{FontStyle, RenderConfig};
    use crate::filter::FilterKind;
    use crate::frame::{Grid, GridDimensions, RgbaFrame};
    use crate::palette::{GlyphTables, PaletteChoice};
    use crate::sampler::process_frame;
    use crate::sink::RenderSink;
    use std::path::PathBuf;

    fn grid_of(choice: PaletteChoice, rgba: [u8; 4], width: u32, height: u32) -> Grid {
        let tables = GlyphTables::build(&choice).expect("tables");
        process_frame(
            RgbaFrame::filled(width, height, rgba),
            FilterKind::None,
            GridDimensions { width, height },
            &tables,
        )
        .expect("grid")
    }

    fn pixel(sink: &CanvasSink, x: u32, y: u32) -> [u8; 4] {
        let pixmap = sink.pixmap().expect("pixmap");
        let idx = ((y * pixmap.width() + x) * 4) as usize;
        let data = pixmap.data();
        [data[idx], data[idx + 1], data[idx + 2], data[idx + 3]]
    }

    fn block_sink() -> CanvasSink {
        // Pre-resolve the font choice so tests draw with the block fallback.
        let mut sink = CanvasSink::new();
        sink.font_request = Some(None);
        sink
    }

    #[test]
    fn canvas_size_follows_grid_and_cell_size() {
        let mut sink = block_sink();
        let config = RenderConfig {
            cell_pixel_size: 6,
            ..RenderConfig::default()
        };
        let grid = grid_of(PaletteChoice::default(), [0, 0, 0, 255], 4, 3);
        sink.draw(&grid, &config).expect("draw");
        let pixmap = sink.pixmap().expect("pixmap");
        assert_eq!((pixmap.width(), pixmap.height()), (24, 18));
    }

    #[test]
    fn blank_glyphs_leave_background() {
        let mut sink = block_sink();
        let config = RenderConfig {
            background: Rgb::new(9, 8, 7),
            ..RenderConfig::default()
        };
        // blocks palette maps white to a space
        let choice = PaletteChoice {
            palette: "blocks".to_owned(),
            ..PaletteChoice::default()
        };
        let grid = grid_of(choice, [255, 255, 255, 255], 2, 2);
        sink.draw(&grid, &config).expect("draw");
        assert_eq!(pixel(&sink, 5, 5), [9, 8, 7, 255]);
    }

    #[test]
    fn blocks_use_resolved_color_at_cell_origin() {
        let mut sink = block_sink();
        let config = RenderConfig {
            color_mode: ColorMode::TrueColor,
            cell_pixel_size: 4,
            glyph_pixel_size: 2.0,
            ..RenderConfig::default()
        };
        let grid = grid_of(PaletteChoice::default(), [200, 100, 50, 255], 2, 1);
        sink.draw(&grid, &config).expect("draw");
        assert_eq!(pixel(&sink, 4, 0), [200, 100, 50, 255]);
        assert_eq!(pixel(&sink, 7, 3), [0, 0, 0, 255]);
    }

    #[test]
    fn bold_widens_each_glyph_by_one_pixel() {
        let mut sink = block_sink();
        let config = RenderConfig {
            cell_pixel_size: 4,
            glyph_pixel_size: 2.0,
            font_style: FontStyle::Bold,
            ..RenderConfig::default()
        };
        let grid = grid_of(PaletteChoice::default(), [0, 0, 0, 255], 1, 1);
        sink.draw(&grid, &config).expect("draw");
        assert_eq!(pixel(&sink, 2, 0), [0, 255, 0, 255]);
        assert_eq!(pixel(&sink, 3, 0), [0, 0, 0, 255]);
    }

    #[test]
    fn emoji_alpha_blends_with_background() {
        let mut sink = block_sink();
        let config = RenderConfig {
            color_mode: ColorMode::TrueColor,
            emoji_alpha: 0.0,
            ..RenderConfig::default()
        };
        let choice = PaletteChoice {
            emoji_set: Some("moon".to_owned()),
            ..PaletteChoice::default()
        };
        let grid = grid_of(choice, [255, 255, 255, 255], 1, 1);
        sink.draw(&grid, &config).expect("draw");
        assert_eq!(pixel(&sink, 0, 0), [0, 0, 0, 255]);
    }

    #[test]
    fn missing_font_path_is_a_render_error() {
        let mut sink = CanvasSink::new();
        let config = RenderConfig {
            font_path: Some(PathBuf::from("/definitely/not/a/font.ttf")),
            ..RenderConfig::default()
        };
        let grid = grid_of(PaletteChoice::default(), [0, 0, 0, 255], 1, 1);
        let error = sink.draw(&grid, &config).expect_err("font should fail");
        assert_eq!(error.code(), "render.failed");
    }

    #[test]
    fn missing_ffplay_is_reported() {
        let mut sink = block_sink()
            .with_presenter(FfplayWindow::new("test", 30).with_ffplay_path("/definitely/not/ffplay"));
        let grid = grid_of(PaletteChoice::default(), [0, 0, 0, 255], 1, 1);
        let error = sink
            .draw(&grid, &RenderConfig::default())
            .expect_err("presenter should fail");
        assert!(error.to_string().contains("not found"), "{error}");
    }
}
