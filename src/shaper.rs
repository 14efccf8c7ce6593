//! Text Shaper - Glyph Layout for Certificate Names
//!
//! Two layout paths:
//! - Shaped: the string is run through the shaping engine, which applies the
//!   font's substitution and positioning tables (conjuncts, vowel signs). Only
//!   used for complex scripts, when the engine is available and the font has a
//!   source file.
//! - Simple: one glyph per character from the font's character map, with
//!   kerning. If any visible character has no glyph the width is estimated
//!   from the character count instead.
//!
//! Whether the engine exists is decided when the `Shaper` is built, never
//! looked up globally.

use std::borrow::Cow;
use std::path::PathBuf;

use fontdue::Metrics;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use unicode_normalization::UnicodeNormalization;

use crate::fonts::ResolvedFont;
use crate::templates::Script;

const LATIN_WIDTH_FACTOR: f32 = 0.6;
const COMPLEX_WIDTH_FACTOR: f32 = 0.7;

#[derive(Debug, Error)]
pub enum ShapingError {
    #[error("Shaping engine is not available")]
    EngineUnavailable,

    #[error("Font has no source file for the shaping engine")]
    NoFontSource,

    #[error("Shaping engine could not load font {0}")]
    FontLoad(PathBuf),
}

impl ShapingError {
    /// Failures caused by the font itself rather than by missing capability.
    pub fn is_font_failure(&self) -> bool {
        matches!(self, ShapingError::FontLoad(_))
    }
}

/// Whether a complex-script shaping engine can be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShapingEngine {
    Available,
    Unavailable,
}

impl ShapingEngine {
    /// Available when the crate was built with the `shaping` feature.
    pub fn detect() -> Self {
        if cfg!(feature = "shaping") {
            ShapingEngine::Available
        } else {
            ShapingEngine::Unavailable
        }
    }

    pub fn is_available(self) -> bool {
        self == ShapingEngine::Available
    }
}

/// One glyph bitmap placed relative to the pen origin on the baseline.
#[derive(Debug, Clone)]
pub struct PositionedGlyph {
    pub glyph_id: u16,
    /// 8-bit coverage, row-major, `width * height` bytes.
    pub coverage: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Bitmap left edge, pixels right of the origin.
    pub left: i32,
    /// Bitmap top edge, pixels below the baseline (negative is above).
    pub top: i32,
    pub x_offset: f32,
    pub y_offset: f32,
    pub x_advance: f32,
    pub y_advance: f32,
}

/// Ordered glyphs produced for one string.
#[derive(Debug, Clone, Default)]
pub struct GlyphRun {
    pub glyphs: Vec<PositionedGlyph>,
}

impl GlyphRun {
    pub fn is_empty(&self) -> bool {
        self.glyphs.is_empty()
    }

    pub fn advance(&self) -> f32 {
        self.glyphs.iter().map(|g| g.x_advance).sum()
    }

    /// Total advance rounded to whole pixels.
    pub fn width(&self) -> i32 {
        self.advance().round() as i32
    }

    /// Horizontal span actually covered by ink, relative to the origin.
    pub fn ink_bounds(&self) -> Option<(i32, i32)> {
        self.glyphs
            .iter()
            .filter(|g| g.width > 0 && g.height > 0)
            .map(|g| (g.left, g.left + g.width as i32))
            .reduce(|(l0, r0), (l1, r1)| (l0.min(l1), r0.max(r1)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayoutPath {
    Shaped,
    Simple,
    Estimated,
}

/// Laid-out text ready for drawing.
#[derive(Debug, Clone)]
pub struct TextLayout {
    pub run: GlyphRun,
    pub width: i32,
    pub path: LayoutPath,
}

impl TextLayout {
    /// Left and right edges used for centering.
    ///
    /// Estimated layouts have no trustworthy ink, so the estimate is used.
    pub fn extents(&self) -> (i32, i32) {
        match self.path {
            LayoutPath::Estimated => (0, self.width),
            _ => self.run.ink_bounds().unwrap_or((0, self.width)),
        }
    }
}

/// NFC for complex scripts; other text is returned untouched.
pub fn normalize_text(text: &str, script: Script) -> Cow<'_, str> {
    if script.is_complex() {
        Cow::Owned(text.nfc().collect())
    } else {
        Cow::Borrowed(text)
    }
}

pub struct Shaper {
    engine: ShapingEngine,
}

impl Shaper {
    pub fn new(engine: ShapingEngine) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> ShapingEngine {
        self.engine
    }

    /// Lay out `text` for drawing, choosing the shaped or simple path.
    ///
    /// Errors only when the shaping engine rejects the font; every other
    /// shaping problem falls back to the simple path.
    pub fn layout(
        &self,
        font: &ResolvedFont,
        text: &str,
        script: Script,
    ) -> Result<TextLayout, ShapingError> {
        let text = normalize_text(text, script);
        if text.is_empty() {
            return Ok(TextLayout {
                run: GlyphRun::default(),
                width: 0,
                path: LayoutPath::Simple,
            });
        }

        if script.is_complex() {
            if self.engine.is_available() && font.source().is_some() {
                match self.shape(font, &text) {
                    Ok(run) => {
                        return Ok(TextLayout {
                            width: run.width(),
                            run,
                            path: LayoutPath::Shaped,
                        })
                    }
                    Err(err) if err.is_font_failure() => return Err(err),
                    Err(err) => {
                        warn!(op = "shaper::layout", error = %err, "Shaping failed, using per-character layout");
                    }
                }
            } else {
                debug!(
                    op = "shaper::layout",
                    engine = ?self.engine,
                    has_source = font.source().is_some(),
                    "Complex script laid out without shaping"
                );
            }
        }

        let run = self.layout_simple(font, &text);
        Ok(match measure(font, &text, &run) {
            Some(width) => TextLayout {
                run,
                width,
                path: LayoutPath::Simple,
            },
            None => TextLayout {
                run,
                width: estimate(font, &text, script),
                path: LayoutPath::Estimated,
            },
        })
    }

    /// Width without shaping: the font's own metrics, or a per-character
    /// estimate when the font lacks glyphs. Never negative.
    pub fn estimate_width(&self, font: &ResolvedFont, text: &str, script: Script) -> i32 {
        let text = normalize_text(text, script);
        if text.is_empty() {
            return 0;
        }
        let run = self.layout_simple(font, &text);
        measure(font, &text, &run)
            .unwrap_or_else(|| estimate(font, &text, script))
            .max(0)
    }

    /// One glyph per character, kerned, with no substitutions.
    pub fn layout_simple(&self, font: &ResolvedFont, text: &str) -> GlyphRun {
        let handle = font.handle();
        let size = font.size();
        let mut glyphs: Vec<PositionedGlyph> = Vec::with_capacity(text.len());
        let mut pen_x = 0.0f32;
        let mut prev: Option<char> = None;

        for ch in text.chars() {
            if let Some(kern) = prev.and_then(|p| handle.horizontal_kern(p, ch, size)) {
                pen_x += kern;
                if let Some(last) = glyphs.last_mut() {
                    last.x_advance += kern;
                }
            }
            let (metrics, coverage) = handle.rasterize(ch, size);
            let glyph_id = handle.lookup_glyph_index(ch);
            glyphs.push(place(
                glyph_id,
                metrics,
                coverage,
                (pen_x, 0.0),
                (0.0, 0.0),
                (metrics.advance_width, 0.0),
            ));
            pen_x += metrics.advance_width;
            prev = Some(ch);
        }

        GlyphRun { glyphs }
    }

    /// Shape `text` with the shaping engine.
    #[cfg(feature = "shaping")]
    pub fn shape(&self, font: &ResolvedFont, text: &str) -> Result<GlyphRun, ShapingError> {
        if !self.engine.is_available() {
            return Err(ShapingError::EngineUnavailable);
        }
        let source = font.source().ok_or(ShapingError::NoFontSource)?;
        let face = rustybuzz::Face::from_slice(&source.bytes, 0)
            .ok_or_else(|| ShapingError::FontLoad(source.path.clone()))?;

        let mut buffer = rustybuzz::UnicodeBuffer::new();
        buffer.push_str(text);
        buffer.guess_segment_properties();
        let shaped = rustybuzz::shape(&face, &[], buffer);

        // Font units to pixels
        let scale = font.size() / face.units_per_em() as f32;
        let handle = font.handle();
        let mut pen = (0.0f32, 0.0f32);
        let mut glyphs = Vec::with_capacity(shaped.len());

        for (info, pos) in shaped.glyph_infos().iter().zip(shaped.glyph_positions()) {
            let glyph_id = info.glyph_id as u16;
            let (metrics, coverage) = handle.rasterize_indexed(glyph_id, font.size());
            let offset = (pos.x_offset as f32 * scale, pos.y_offset as f32 * scale);
            let advance = (pos.x_advance as f32 * scale, pos.y_advance as f32 * scale);
            glyphs.push(place(glyph_id, metrics, coverage, pen, offset, advance));
            pen.0 += advance.0;
            pen.1 += advance.1;
        }

        Ok(GlyphRun { glyphs })
    }

    #[cfg(not(feature = "shaping"))]
    pub fn shape(&self, _font: &ResolvedFont, _text: &str) -> Result<GlyphRun, ShapingError> {
        Err(ShapingError::EngineUnavailable)
    }
}

impl Default for Shaper {
    fn default() -> Self {
        Self::new(ShapingEngine::detect())
    }
}

/// Position a rasterized glyph. `pen` and `offset` are y-up; the stored
/// bitmap placement is y-down, so moving up the baseline decreases `top`.
fn place(
    glyph_id: u16,
    metrics: Metrics,
    coverage: Vec<u8>,
    pen: (f32, f32),
    offset: (f32, f32),
    advance: (f32, f32),
) -> PositionedGlyph {
    let origin_x = (pen.0 + offset.0).round() as i32;
    let origin_up = (pen.1 + offset.1).round() as i32;
    PositionedGlyph {
        glyph_id,
        coverage,
        width: metrics.width as u32,
        height: metrics.height as u32,
        left: origin_x + metrics.xmin,
        top: -origin_up - (metrics.ymin + metrics.height as i32),
        x_offset: offset.0,
        y_offset: offset.1,
        x_advance: advance.0,
        y_advance: advance.1,
    }
}

/// Native measurement; `None` when a visible character has no glyph.
fn measure(font: &ResolvedFont, text: &str, run: &GlyphRun) -> Option<i32> {
    let handle = font.handle();
    let all_mapped = text
        .chars()
        .filter(|c| !c.is_whitespace())
        .all(|c| handle.lookup_glyph_index(c) != 0);
    all_mapped.then(|| run.width().max(0))
}

fn estimate(font: &ResolvedFont, text: &str, script: Script) -> i32 {
    let factor = if script.is_complex() {
        COMPLEX_WIDTH_FACTOR
    } else {
        LATIN_WIDTH_FACTOR
    };
    (text.chars().count() as f32 * font.size() * factor).round() as i32
}
