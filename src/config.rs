//! Settings file format and the per-tick configuration snapshot.
//!
//! `Settings` is what a user writes (YAML, every field optional). `RenderConfig`
//! is the resolved, immutable snapshot the pipeline reads once per tick.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::color::{self, ColorMode, Rgb};
use crate::error::{PipelineError, Result};
use crate::filter::FilterKind;
use crate::frame::GridDimensions;
use crate::palette::{PaletteChoice, DEFAULT_PALETTE};

pub const DEFAULT_DENSITY: u32 = 60;
pub const DEFAULT_FPS: f64 = 30.0;
pub const MAX_FPS: f64 = 240.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FontStyle {
    #[default]
    Regular,
    Bold,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub palette: String,
    pub custom_chars: Option<String>,
    pub emoji_set: Option<String>,
    pub color_mode: String,
    pub filter: FilterKind,
    pub density: u32,
    pub cell_size: u32,
    pub glyph_size: f32,
    pub font_style: FontStyle,
    pub font_path: Option<PathBuf>,
    pub foreground: Rgb,
    pub background: Rgb,
    pub emoji_alpha: f32,
    pub fps: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            palette: DEFAULT_PALETTE.to_owned(),
            custom_chars: None,
            emoji_set: None,
            color_mode: ColorMode::Monochrome.as_str().to_owned(),
            filter: FilterKind::None,
            density: DEFAULT_DENSITY,
            cell_size: 10,
            glyph_size: 10.0,
            font_style: FontStyle::Regular,
            font_path: None,
            foreground: Rgb::new(0x00, 0xff, 0x00),
            background: Rgb::new(0x00, 0x00, 0x00),
            emoji_alpha: 1.0,
            fps: DEFAULT_FPS,
        }
    }
}

impl Settings {
    pub fn resolve(&self) -> Result<RenderConfig> {
        let dims = GridDimensions::from_density(self.density)?;
        if self.cell_size == 0 {
            return Err(PipelineError::invalid_config("cell_size must be > 0"));
        }
        if !self.glyph_size.is_finite() || self.glyph_size <= 0.0 {
            return Err(PipelineError::invalid_config("glyph_size must be > 0"));
        }
        if !self.emoji_alpha.is_finite() || !(0.0..=1.0).contains(&self.emoji_alpha) {
            return Err(PipelineError::invalid_config(
                "emoji_alpha must be in [0.0, 1.0]",
            ));
        }
        if !self.fps.is_finite() || self.fps <= 0.0 || self.fps > MAX_FPS {
            return Err(PipelineError::invalid_config(format!(
                "fps must be in (0, {MAX_FPS}]"
            )));
        }

        Ok(RenderConfig {
            palette: PaletteChoice {
                palette: self.palette.clone(),
                custom_chars: self.custom_chars.clone(),
                emoji_set: self.emoji_set.clone(),
            },
            color_mode: color::parse_mode_or_true_color(&self.color_mode),
            filter: self.filter,
            dims,
            cell_pixel_size: self.cell_size,
            glyph_pixel_size: self.glyph_size,
            font_style: self.font_style,
            font_path: self.font_path.clone(),
            foreground: self.foreground,
            background: self.background,
            emoji_alpha: self.emoji_alpha,
            frame_interval: Duration::from_secs_f64(1.0 / self.fps),
        })
    }
}

/// Command-line values layered over whatever the settings file says.
#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub palette: Option<String>,
    pub custom_chars: Option<String>,
    pub emoji_set: Option<String>,
    pub color_mode: Option<String>,
    pub filter: Option<FilterKind>,
    pub density: Option<u32>,
    pub cell_size: Option<u32>,
    pub glyph_size: Option<f32>,
    pub font_style: Option<FontStyle>,
    pub font_path: Option<PathBuf>,
    pub foreground: Option<Rgb>,
    pub background: Option<Rgb>,
    pub emoji_alpha: Option<f32>,
    pub fps: Option<f64>,
}

impl SettingsOverrides {
    pub fn apply(&self, settings: &mut Settings) {
        if let Some(value) = &self.palette {
            settings.palette = value.clone();
        }
        if let Some(value) = &self.custom_chars {
            settings.custom_chars = Some(value.clone());
        }
        if let Some(value) = &self.emoji_set {
            settings.emoji_set = Some(value.clone());
        }
        if let Some(value) = &self.color_mode {
            settings.color_mode = value.clone();
        }
        if let Some(value) = self.filter {
            settings.filter = value;
        }
        if let Some(value) = self.density {
            settings.density = value;
        }
        if let Some(value) = self.cell_size {
            settings.cell_size = value;
        }
        if let Some(value) = self.glyph_size {
            settings.glyph_size = value;
        }
        if let Some(value) = self.font_style {
            settings.font_style = value;
        }
        if let Some(value) = &self.font_path {
            settings.font_path = Some(value.clone());
        }
        if let Some(value) = self.foreground {
            settings.foreground = value;
        }
        if let Some(value) = self.background {
            settings.background = value;
        }
        if let Some(value) = self.emoji_alpha {
            settings.emoji_alpha = value;
        }
        if let Some(value) = self.fps {
            settings.fps = value;
        }
    }
}

/// Immutable per-tick snapshot of everything the pipeline and sinks read.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderConfig {
    pub palette: PaletteChoice,
    pub color_mode: ColorMode,
    pub filter: FilterKind,
    pub dims: GridDimensions,
    pub cell_pixel_size: u32,
    pub glyph_pixel_size: f32,
    pub font_style: FontStyle,
    pub font_path: Option<PathBuf>,
    pub foreground: Rgb,
    pub background: Rgb,
    pub emoji_alpha: f32,
    pub frame_interval: Duration,
}

impl RenderConfig {
    pub fn resolve_color(&self, sample: Rgb) -> Rgb {
        color::resolve(sample, self.color_mode, self.foreground)
    }

    /// Target frames per second implied by `frame_interval`.
    pub fn fps(&self) -> f64 {
        let seconds = self.frame_interval.as_secs_f64();
        if seconds > 0.0 {
            1.0 / seconds
        } else {
            MAX_FPS
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        let settings = Settings::default();
        Self {
            palette: PaletteChoice::default(),
            color_mode: ColorMode::Monochrome,
            filter: settings.filter,
            dims: GridDimensions {
                width: 79,
                height: DEFAULT_DENSITY,
            },
            cell_pixel_size: settings.cell_size,
            glyph_pixel_size: settings.glyph_size,
            font_style: settings.font_style,
            font_path: None,
            foreground: settings.foreground,
            background: settings.background,
            emoji_alpha: settings.emoji_alpha,
            frame_interval: Duration::from_secs_f64(1.0 / DEFAULT_FPS),
        }
    }
}

pub fn load_settings(path: &Path) -> Result<Settings> {
    let contents = fs::read_to_string(path).map_err(|error| {
        PipelineError::invalid_config(format!("failed to read {}: {error}", path.display()))
    })?;
    parse_settings(&contents).map_err(|error| match error {
        PipelineError::InvalidConfig { message } => {
            PipelineError::invalid_config(format!("{}: {message}", path.display()))
        }
        other => other,
    })
}

pub fn parse_settings(contents: &str) -> Result<Settings> {
    if contents.trim().is_empty() {
        return Ok(Settings::default());
    }
    serde_yaml::from_str(contents).map_err(|error| {
        let location = error
            .location()
            .map(|location| format!("line {}, column {}", location.line(), location.column()))
            .unwrap_or_else(|| "unknown location".to_owned());
        PipelineError::invalid_config(format!("yaml error at {location}: {error}"))
    })
}

/// Read-only view of the current configuration, polled once per tick.
pub trait ConfigProvider {
    fn snapshot(&mut self) -> RenderConfig;
}

impl<P: ConfigProvider + ?Sized> ConfigProvider for Box<P> {
    fn snapshot(&mut self) -> RenderConfig {
        (**self).snapshot()
    }
}

#[derive(Debug, Clone)]
pub struct StaticConfig(pub RenderConfig);

impl ConfigProvider for StaticConfig {
    fn snapshot(&mut self) -> RenderConfig {
        self.0.clone()
    }
}

/// Settings file that is re-read whenever its modification time changes.
/// A reload that fails to parse or validate keeps the last good snapshot.
#[derive(Debug)]
pub struct FileConfig {
    path: PathBuf,
    overrides: SettingsOverrides,
    modified: Option<SystemTime>,
    current: RenderConfig,
}

impl FileConfig {
    pub fn open(path: &Path, overrides: SettingsOverrides) -> Result<Self> {
        let modified = modified_time(path);
        let current = load_with_overrides(path, &overrides)?;
        Ok(Self {
            path: path.to_path_buf(),
            overrides,
            modified,
            current,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn poll(&mut self) {
        let modified = modified_time(&self.path);
        if modified.is_none() || modified == self.modified {
            return;
        }
        self.modified = modified;
        match load_with_overrides(&self.path, &self.overrides) {
            Ok(next) => {
                info!("reloaded settings from {}", self.path.display());
                self.current = next;
            }
            Err(error) => {
                warn!("ignoring settings reload: {error}");
            }
        }
    }
}

impl ConfigProvider for FileConfig {
    fn snapshot(&mut self) -> RenderConfig {
        self.poll();
        self.current.clone()
    }
}

fn load_with_overrides(path: &Path, overrides: &SettingsOverrides) -> Result<RenderConfig> {
    let mut settings = load_settings(path)?;
    overrides.apply(&mut settings);
    settings.resolve()
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|meta| meta.modified()).ok()
}

#[cfg(test)]
mod tests {
    use std::fs::{self, File};
    use std::time::{Duration, SystemTime};

    use tempfile::tempdir;

    use super::*;

    #[test]
    fn defaults_resolve_to_monochrome_green_at_thirty_fps() {
        let config = RenderConfig::default();
        assert_eq!(config.color_mode, ColorMode::Monochrome);
        assert_eq!(config.foreground, Rgb::new(0, 255, 0));
        assert_eq!(config.dims, GridDimensions { width: 79, height: 60 });
        assert_eq!(config.frame_interval, Duration::from_secs_f64(1.0 / 30.0));
        assert!((config.fps() - 30.0).abs() < 1e-6);
    }

    #[test]
    fn default_snapshot_matches_resolved_default_settings() {
        let resolved = Settings::default().resolve().expect("defaults should resolve");
        assert_eq!(resolved, RenderConfig::default());
    }

    #[test]
    fn yaml_settings_parse_with_partial_fields() {
        let settings = parse_settings(
            r##"
palette: complex
color_mode: grayscale
filter: sepia
density: 20
foreground: "#ff8800"
"##,
        )
        .expect("settings should parse");
        let config = settings.resolve().expect("settings should resolve");
        assert_eq!(config.palette.palette, "complex");
        assert_eq!(config.color_mode, ColorMode::Grayscale);
        assert_eq!(config.filter, FilterKind::Sepia);
        assert_eq!(config.dims.height, 20);
        assert_eq!(config.foreground, Rgb::new(0xff, 0x88, 0x00));
    }

    #[test]
    fn unknown_fields_are_rejected_with_location() {
        let error = parse_settings("palete: simple\n").expect_err("typo should fail");
        assert!(error.to_string().contains("line 1"), "{error}");
    }

    #[test]
    fn unknown_color_mode_falls_back_to_true_color() {
        let settings = Settings {
            color_mode: "infrared".to_owned(),
            ..Settings::default()
        };
        let config = settings.resolve().expect("resolve");
        assert_eq!(config.color_mode, ColorMode::TrueColor);
    }

    #[test]
    fn invalid_values_fail_validation() {
        let zero_density = Settings {
            density: 0,
            ..Settings::default()
        };
        assert!(zero_density.resolve().is_err());
        let bad_alpha = Settings {
            emoji_alpha: 1.5,
            ..Settings::default()
        };
        assert!(bad_alpha.resolve().is_err());
        let bad_fps = Settings {
            fps: 0.0,
            ..Settings::default()
        };
        assert!(bad_fps.resolve().is_err());
    }

    #[test]
    fn overrides_win_over_file_values() {
        let mut settings = parse_settings("palette: simple\ndensity: 30\n").expect("parse");
        let overrides = SettingsOverrides {
            density: Some(12),
            color_mode: Some("true_color".to_owned()),
            ..SettingsOverrides::default()
        };
        overrides.apply(&mut settings);
        assert_eq!(settings.palette, "simple");
        assert_eq!(settings.density, 12);
        assert_eq!(settings.color_mode, "true_color");
    }

    #[test]
    fn file_config_reloads_on_change_and_keeps_last_valid() {
        let dir = tempdir().expect("tempdir should create");
        let path = dir.path().join("glyphcam.yaml");
        fs::write(&path, "density: 10\n").expect("settings should write");

        let mut provider =
            FileConfig::open(&path, SettingsOverrides::default()).expect("provider should open");
        assert_eq!(provider.snapshot().dims.height, 10);

        fs::write(&path, "density: 25\n").expect("settings should write");
        bump_mtime(&path, 5);
        assert_eq!(provider.snapshot().dims.height, 25);

        fs::write(&path, "density: -3\n").expect("settings should write");
        bump_mtime(&path, 10);
        assert_eq!(provider.snapshot().dims.height, 25);
    }

    #[test]
    fn file_fps_reaches_the_snapshot_unless_overridden() {
        let dir = tempdir().expect("tempdir should create");
        let path = dir.path().join("glyphcam.yaml");
        fs::write(&path, "fps: 120\n").expect("settings should write");

        let mut from_file =
            FileConfig::open(&path, SettingsOverrides::default()).expect("provider should open");
        assert!((from_file.snapshot().fps() - 120.0).abs() < 1e-6);

        let overrides = SettingsOverrides {
            fps: Some(24.0),
            ..SettingsOverrides::default()
        };
        let mut overridden = FileConfig::open(&path, overrides).expect("provider should open");
        assert!((overridden.snapshot().fps() - 24.0).abs() < 1e-6);
    }

    fn bump_mtime(path: &Path, seconds: u64) {
        let file = File::options()
            .write(true)
            .open(path)
            .expect("settings should open");
        file.set_modified(SystemTime::now() + Duration::from_secs(seconds))
            .expect("mtime should set");
    }
}
