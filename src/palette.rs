//! Glyph palettes and the brightness lookup tables built from them.
//!
//! A palette is an ordered list of display units (one grapheme cluster each).
//! Index 0 is drawn for the darkest brightness level and the last entry for
//! the brightest, so a palette that runs dense to sparse (such as `blocks`)
//! deliberately inverts the picture.

use log::{debug, warn};
use unicode_segmentation::UnicodeSegmentation;

use crate::error::{PipelineError, Result};

pub const DEFAULT_PALETTE: &str = "standard";

const STANDARD: &[&str] = &["@", "#", "S", "%", "?", "*", "+", ";", ":", ",", "."];
const SIMPLE: &[&str] = &["#", "."];
const COMPLEX: &[&str] = &[
    "$", "@", "B", "%", "8", "&", "W", "M", "#", "*", "o", "a", "h", "k", "b", "d", "p", "q", "w",
    "m", "Z", "O", "0", "Q", "L", "C", "J", "U", "Y", "X", "z", "c", "v", "u", "n", "x", "r", "j",
    "f", "t", "/", "\\", "|", "(", ")", "1", "{", "}", "[", "]", "?", "-", "_", "+", "~", "<", ">",
    "i", "!", "l", "I", ";", ":", ",", "\"", "^", "`", "'", ".",
];
const BLOCKS: &[&str] = &["█", "▓", "▒", "░", " "];
const REVERSE: &[&str] = &[".", ",", ":", ";", "+", "*", "?", "%", "S", "#", "@"];

const PALETTES: &[(&str, &[&str])] = &[
    ("standard", STANDARD),
    ("simple", SIMPLE),
    ("complex", COMPLEX),
    ("blocks", BLOCKS),
    ("reverse", REVERSE),
];

const EMOJI_SETS: &[(&str, &[&str])] = &[
    ("moon", &["🌑", "🌘", "🌗", "🌖", "🌕"]),
    ("weather", &["🌧️", "☁️", "⛅", "🌤️", "☀️"]),
    ("faces", &["😶", "😐", "🙂", "😀", "😁"]),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlyphPalette {
    glyphs: Vec<String>,
}

impl GlyphPalette {
    pub fn new<I, S>(glyphs: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let glyphs = glyphs.into_iter().map(Into::into).collect::<Vec<_>>();
        if glyphs.is_empty() {
            return Err(PipelineError::invalid_palette("palette has no glyphs"));
        }
        Ok(Self { glyphs })
    }

    pub fn named(name: &str) -> Result<Self> {
        lookup(PALETTES, name)
            .ok_or_else(|| PipelineError::invalid_palette(format!("unknown palette '{name}'")))
    }

    pub fn emoji_set(name: &str) -> Result<Self> {
        lookup(EMOJI_SETS, name)
            .ok_or_else(|| PipelineError::invalid_palette(format!("unknown emoji set '{name}'")))
    }

    /// Splits raw user text into grapheme clusters. Control characters are
    /// dropped; spaces are kept because a blank is a legitimate glyph.
    pub fn from_custom(text: &str) -> Result<Self> {
        let glyphs = text
            .graphemes(true)
            .filter(|grapheme| !grapheme.chars().any(char::is_control))
            .map(str::to_owned)
            .collect::<Vec<_>>();
        if glyphs.is_empty() {
            return Err(PipelineError::invalid_palette(
                "custom characters are empty",
            ));
        }
        Ok(Self { glyphs })
    }

    pub fn len(&self) -> usize {
        self.glyphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.glyphs.is_empty()
    }

    pub fn glyphs(&self) -> &[String] {
        &self.glyphs
    }
}

fn lookup(table: &[(&str, &[&str])], name: &str) -> Option<GlyphPalette> {
    let wanted = name.trim().to_ascii_lowercase();
    table
        .iter()
        .find(|(candidate, _)| *candidate == wanted)
        .map(|(_, glyphs)| GlyphPalette {
            glyphs: glyphs.iter().map(|glyph| (*glyph).to_owned()).collect(),
        })
}

pub fn palette_names() -> impl Iterator<Item = &'static str> {
    PALETTES.iter().map(|(name, _)| *name)
}

pub fn emoji_set_names() -> impl Iterator<Item = &'static str> {
    EMOJI_SETS.iter().map(|(name, _)| *name)
}

/// Palette index for a brightness level: `floor(level / 255 * (len - 1))`.
pub fn quantize_level(level: u8, palette_len: usize) -> usize {
    if palette_len <= 1 {
        return 0;
    }
    let max_idx = palette_len - 1;
    (usize::from(level) * max_idx / 255).min(max_idx)
}

fn level_indices(palette_len: usize) -> [u16; 256] {
    let mut indices = [0_u16; 256];
    for (level, slot) in indices.iter_mut().enumerate() {
        *slot = quantize_level(level as u8, palette_len) as u16;
    }
    indices
}

/// 256-entry table from brightness level to palette glyph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrightnessLut {
    palette: GlyphPalette,
    indices: [u16; 256],
}

impl BrightnessLut {
    pub fn rebuild(palette: &GlyphPalette) -> Result<Self> {
        if palette.is_empty() {
            return Err(PipelineError::invalid_palette("palette has no glyphs"));
        }
        Ok(Self {
            palette: palette.clone(),
            indices: level_indices(palette.len()),
        })
    }

    pub fn index(&self, level: u8) -> usize {
        usize::from(self.indices[usize::from(level)])
    }

    pub fn glyph(&self, level: u8) -> &str {
        &self.palette.glyphs[self.index(level)]
    }

    pub fn palette(&self) -> &GlyphPalette {
        &self.palette
    }
}

/// What the user asked for: a named palette, optionally overridden by custom
/// characters, plus an optional emoji set that overrides both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaletteChoice {
    pub palette: String,
    pub custom_chars: Option<String>,
    pub emoji_set: Option<String>,
}

impl Default for PaletteChoice {
    fn default() -> Self {
        Self {
            palette: DEFAULT_PALETTE.to_owned(),
            custom_chars: None,
            emoji_set: None,
        }
    }
}

/// Lookup tables the sampler reads for one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlyphTables {
    pub base: BrightnessLut,
    pub emoji: Option<BrightnessLut>,
}

impl GlyphTables {
    pub fn build(choice: &PaletteChoice) -> Result<Self> {
        let palette = match &choice.custom_chars {
            Some(text) => GlyphPalette::from_custom(text)?,
            None => GlyphPalette::named(&choice.palette)?,
        };
        let emoji = match &choice.emoji_set {
            Some(name) => Some(BrightnessLut::rebuild(&GlyphPalette::emoji_set(name)?)?),
            None => None,
        };
        Ok(Self {
            base: BrightnessLut::rebuild(&palette)?,
            emoji,
        })
    }

    pub fn fallback() -> Self {
        let palette = GlyphPalette {
            glyphs: STANDARD.iter().map(|glyph| (*glyph).to_owned()).collect(),
        };
        let indices = level_indices(palette.len());
        Self {
            base: BrightnessLut { palette, indices },
            emoji: None,
        }
    }
}

/// Keeps the last valid tables and rebuilds them whole when the choice changes.
/// A choice that fails to build is remembered so the fallback is logged once.
#[derive(Debug, Clone)]
pub struct GlyphTableCache {
    tables: GlyphTables,
    current: Option<PaletteChoice>,
    rejected: Option<PaletteChoice>,
}

impl GlyphTableCache {
    pub fn new() -> Self {
        Self {
            tables: GlyphTables::fallback(),
            current: None,
            rejected: None,
        }
    }

    pub fn refresh(&mut self, choice: &PaletteChoice) -> &GlyphTables {
        if self.current.as_ref() == Some(choice) || self.rejected.as_ref() == Some(choice) {
            return &self.tables;
        }
        match GlyphTables::build(choice) {
            Ok(tables) => {
                debug!(
                    "rebuilt glyph tables: {} glyph(s), emoji set {}",
                    tables.base.palette().len(),
                    choice.emoji_set.as_deref().unwrap_or("off")
                );
                self.tables = tables;
                self.current = Some(choice.clone());
                self.rejected = None;
            }
            Err(error) => {
                warn!("{error}; keeping previous palette");
                self.rejected = Some(choice.clone());
            }
        }
        &self.tables
    }

    pub fn tables(&self) -> &GlyphTables {
        &self.tables
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lut_matches_floor_formula_for_every_level() {
        for name in palette_names() {
            let palette = GlyphPalette::named(name).expect("builtin palette");
            let lut = BrightnessLut::rebuild(&palette).expect("lut should build");
            let max_idx = palette.len() - 1;
            for level in 0_u16..=255 {
                let expected = (level as f64 * max_idx as f64 / 255.0).floor() as usize;
                assert_eq!(lut.index(level as u8), expected.min(max_idx), "{name} @ {level}");
            }
        }
    }

    #[test]
    fn lut_is_monotonic_and_bounded() {
        let palette = GlyphPalette::named("complex").expect("builtin palette");
        let lut = BrightnessLut::rebuild(&palette).expect("lut should build");
        let mut last = 0;
        for level in 0_u16..=255 {
            let idx = lut.index(level as u8);
            assert!(idx >= last);
            assert!(idx < palette.len());
            last = idx;
        }
        assert_eq!(lut.glyph(0), "$");
        assert_eq!(lut.glyph(255), ".");
    }

    #[test]
    fn rebuilding_twice_yields_identical_tables() {
        let palette = GlyphPalette::named("standard").expect("builtin palette");
        let first = BrightnessLut::rebuild(&palette).expect("lut should build");
        let second = BrightnessLut::rebuild(&palette).expect("lut should build");
        assert_eq!(first, second);
    }

    #[test]
    fn single_glyph_palette_maps_everything_to_it() {
        let palette = GlyphPalette::new(["X"]).expect("palette");
        let lut = BrightnessLut::rebuild(&palette).expect("lut should build");
        assert_eq!(lut.glyph(0), "X");
        assert_eq!(lut.glyph(255), "X");
    }

    #[test]
    fn custom_text_splits_into_graphemes() {
        let palette = GlyphPalette::from_custom("a👍🏽 \n#").expect("custom palette");
        assert_eq!(palette.glyphs(), &["a", "👍🏽", " ", "#"]);
    }

    #[test]
    fn empty_custom_text_is_invalid() {
        let error = GlyphPalette::from_custom("").expect_err("empty should fail");
        assert_eq!(error.code(), "palette.invalid");
        assert!(GlyphPalette::from_custom("\n\t").is_err());
        assert!(GlyphPalette::new(Vec::<String>::new()).is_err());
    }

    #[test]
    fn emoji_set_builds_its_own_table() {
        let choice = PaletteChoice {
            emoji_set: Some("moon".to_owned()),
            ..PaletteChoice::default()
        };
        let tables = GlyphTables::build(&choice).expect("tables should build");
        let emoji = tables.emoji.expect("emoji table");
        assert_eq!(emoji.glyph(0), "🌑");
        assert_eq!(emoji.glyph(255), "🌕");
    }

    #[test]
    fn cache_keeps_last_valid_tables_on_invalid_choice() {
        let mut cache = GlyphTableCache::new();
        let simple = PaletteChoice {
            palette: "simple".to_owned(),
            ..PaletteChoice::default()
        };
        cache.refresh(&simple);
        assert_eq!(cache.tables().base.palette().len(), 2);

        let empty_custom = PaletteChoice {
            custom_chars: Some(String::new()),
            ..simple.clone()
        };
        let tables = cache.refresh(&empty_custom);
        assert_eq!(tables.base.palette().len(), 2);
        assert_eq!(tables.base.glyph(255), ".");
    }

    #[test]
    fn cache_starts_from_standard_palette() {
        let mut cache = GlyphTableCache::new();
        let bogus = PaletteChoice {
            palette: "no-such-palette".to_owned(),
            ..PaletteChoice::default()
        };
        let tables = cache.refresh(&bogus);
        assert_eq!(tables.base.palette().len(), STANDARD.len());
    }
}
