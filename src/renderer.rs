//! Certificate Renderer - Name Compositing
//!
//! The name is centered horizontally on its ink extents and placed with the top
//! of its line box at the requested y offset. PNG and JPEG are encoded from
//! the same composited buffer.

use std::io;
use std::path::{Path, PathBuf};

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::fonts::ResolvedFont;
use crate::hashing::sha256_hex;
use crate::shaper::{GlyphRun, LayoutPath, Shaper, ShapingError};
use crate::storage::write_atomic;
use crate::templates::{CertificateTemplate, ScriptStyle};

const JPEG_QUALITY: u8 = 100;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error(transparent)]
    Shaping(#[from] ShapingError),

    #[error("Failed to encode {format}: {reason}")]
    Encode { format: &'static str, reason: String },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Placement and color shared by every name in a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderSpec {
    pub style: ScriptStyle,
    pub y_position: i32,
    pub color: [u8; 3],
}

/// Files written for one name.
#[derive(Debug, Clone)]
pub struct RenderedImages {
    pub png: PathBuf,
    pub jpg: PathBuf,
    pub png_sha256: String,
    pub layout: LayoutPath,
}

pub struct CertificateRenderer {
    shaper: Shaper,
}

impl CertificateRenderer {
    pub fn new(shaper: Shaper) -> Self {
        Self { shaper }
    }

    pub fn shaper(&self) -> &Shaper {
        &self.shaper
    }

    /// Draw `name` onto a copy of the template.
    pub fn compose(
        &self,
        template: &CertificateTemplate,
        name: &str,
        font: &ResolvedFont,
        spec: &RenderSpec,
    ) -> Result<(RgbImage, LayoutPath), RenderError> {
        let text = spec.style.apply_casing(name);
        let layout = self.shaper.layout(font, &text, spec.style.script())?;

        let origin_x = centered_origin(template.width(), layout.extents());
        let baseline = spec.y_position.saturating_add(font.ascent().round() as i32);

        debug!(
            op = "renderer::compose",
            name = %text,
            path = ?layout.path,
            width = layout.width,
            origin_x,
            baseline,
            "Laid out name"
        );

        let mut image = template.image.clone();
        draw_run(&mut image, &layout.run, (origin_x, baseline), Rgb(spec.color));
        Ok((image, layout.path))
    }

    /// Compose and persist the PNG and JPEG pair.
    pub fn render(
        &self,
        template: &CertificateTemplate,
        name: &str,
        font: &ResolvedFont,
        spec: &RenderSpec,
        png_path: &Path,
        jpg_path: &Path,
    ) -> Result<RenderedImages, RenderError> {
        let (image, layout) = self.compose(template, name, font, spec)?;

        let png = encode_png(&image)?;
        let jpg = encode_jpeg(&image)?;

        for (path, bytes) in [(png_path, &png), (jpg_path, &jpg)] {
            write_atomic(path, bytes).map_err(|source| RenderError::Write {
                path: path.to_path_buf(),
                source,
            })?;
        }

        Ok(RenderedImages {
            png: png_path.to_path_buf(),
            jpg: jpg_path.to_path_buf(),
            png_sha256: sha256_hex(&png),
            layout,
        })
    }
}

impl Default for CertificateRenderer {
    fn default() -> Self {
        Self::new(Shaper::default())
    }
}

/// Origin x that puts the midpoint of `extents` on the image midpoint.
pub fn centered_origin(image_width: u32, extents: (i32, i32)) -> i32 {
    let (left, right) = extents;
    (image_width as f64 / 2.0 - (left + right) as f64 / 2.0).round() as i32
}

/// Alpha-blend every glyph's coverage in `color`, clipped to the image.
fn draw_run(image: &mut RgbImage, run: &GlyphRun, origin: (i32, i32), color: Rgb<u8>) {
    let (width, height) = (image.width() as i64, image.height() as i64);

    for glyph in &run.glyphs {
        for gy in 0..glyph.height {
            let py = origin.1 as i64 + glyph.top as i64 + gy as i64;
            if py < 0 || py >= height {
                continue;
            }
            for gx in 0..glyph.width {
                let px = origin.0 as i64 + glyph.left as i64 + gx as i64;
                if px < 0 || px >= width {
                    continue;
                }
                let alpha = glyph.coverage[(gy * glyph.width + gx) as usize] as u32;
                if alpha == 0 {
                    continue;
                }
                let dst = image.get_pixel_mut(px as u32, py as u32);
                for c in 0..3 {
                    let blended = color[c] as u32 * alpha + dst[c] as u32 * (255 - alpha);
                    dst[c] = ((blended + 127) / 255) as u8;
                }
            }
        }
    }
}

/// PNG with the strongest lossless compression.
pub fn encode_png(image: &RgbImage) -> Result<Vec<u8>, RenderError> {
    let mut buffer = Vec::new();
    let encoder = PngEncoder::new_with_quality(&mut buffer, CompressionType::Best, FilterType::Adaptive);
    image.write_with_encoder(encoder).map_err(|e| RenderError::Encode {
        format: "PNG",
        reason: e.to_string(),
    })?;
    Ok(buffer)
}

/// JPEG at maximum quality.
pub fn encode_jpeg(image: &RgbImage) -> Result<Vec<u8>, RenderError> {
    let mut buffer = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut buffer, JPEG_QUALITY);
    image.write_with_encoder(encoder).map_err(|e| RenderError::Encode {
        format: "JPEG",
        reason: e.to_string(),
    })?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fonts::bundled_font;
    use crate::shaper::ShapingEngine;

    fn bundled(file: &str, size: f32) -> ResolvedFont {
        ResolvedFont::from_file(&bundled_font(file), size).unwrap()
    }

    fn blank_template(width: u32, height: u32) -> CertificateTemplate {
        CertificateTemplate::from_image(
            Path::new("blank.png"),
            RgbImage::from_pixel(width, height, Rgb([255, 255, 255])),
        )
        .unwrap()
    }

    fn spec(style: ScriptStyle) -> RenderSpec {
        RenderSpec {
            style,
            y_position: 40,
            color: [0, 0, 0],
        }
    }

    /// First and last columns that differ from the template.
    fn ink_columns(image: &RgbImage, background: Rgb<u8>) -> Option<(u32, u32)> {
        let columns: Vec<u32> = (0..image.width())
            .filter(|&x| (0..image.height()).any(|y| *image.get_pixel(x, y) != background))
            .collect();
        Some((*columns.first()?, *columns.last()?))
    }

    #[test]
    fn test_centered_origin() {
        assert_eq!(centered_origin(800, (0, 200)), 300);
        assert_eq!(centered_origin(800, (4, 204)), 296);
        assert_eq!(centered_origin(101, (0, 0)), 51);
    }

    #[test]
    fn test_draw_run_clips_out_of_bounds() {
        let mut image = RgbImage::from_pixel(4, 4, Rgb([255, 255, 255]));
        let run = GlyphRun {
            glyphs: vec![crate::shaper::PositionedGlyph {
                glyph_id: 1,
                coverage: vec![255; 9],
                width: 3,
                height: 3,
                left: -1,
                top: -1,
                x_offset: 0.0,
                y_offset: 0.0,
                x_advance: 3.0,
                y_advance: 0.0,
            }],
        };
        draw_run(&mut image, &run, (0, 0), Rgb([0, 0, 0]));
        assert_eq!(*image.get_pixel(0, 0), Rgb([0, 0, 0]));
        assert_eq!(*image.get_pixel(1, 1), Rgb([0, 0, 0]));
        assert_eq!(*image.get_pixel(2, 2), Rgb([255, 255, 255]));
    }

    #[test]
    fn test_name_is_centered() {
        let font = bundled("DejaVuSans.ttf", 36.0);
        let renderer = CertificateRenderer::new(Shaper::new(ShapingEngine::detect()));
        let template = blank_template(640, 160);

        for name in ["govind patel", "W", "Anju Shah-Mehta"] {
            let (image, _) = renderer
                .compose(&template, name, &font, &spec(ScriptStyle::Arial))
                .unwrap();
            let (left, right) = ink_columns(&image, Rgb([255, 255, 255])).unwrap();
            let ink_mid = (left + right + 1) as f64 / 2.0;
            assert!(
                (ink_mid - 320.0).abs() <= 1.0,
                "{name}: ink {left}..={right} not centered"
            );
        }
    }

    #[test]
    fn test_gujarati_name_is_centered() {
        let font = bundled("CertForgeTestGujarati-Regular.ttf", 36.0);
        let renderer = CertificateRenderer::new(Shaper::new(ShapingEngine::detect()));
        let template = blank_template(640, 160);

        for name in ["ગોવિંદ પટેલ", "ક્ષમા", "અંજુ"] {
            let (image, _) = renderer
                .compose(&template, name, &font, &spec(ScriptStyle::Gujarati))
                .unwrap();
            let (left, right) = ink_columns(&image, Rgb([255, 255, 255])).unwrap();
            let ink_mid = (left + right + 1) as f64 / 2.0;
            assert!(
                (ink_mid - 320.0).abs() <= 1.0,
                "{name}: ink {left}..={right} not centered"
            );
        }
    }

    #[test]
    fn test_extreme_y_position_draws_nothing() {
        let font = bundled("DejaVuSans.ttf", 48.0);
        let renderer = CertificateRenderer::default();
        let template = blank_template(200, 100);

        for y_position in [i32::MAX, i32::MAX - 5, i32::MIN] {
            let placed = RenderSpec {
                y_position,
                ..spec(ScriptStyle::Arial)
            };
            let (image, _) = renderer.compose(&template, "Anju", &font, &placed).unwrap();
            assert_eq!(image, template.image, "y_position {y_position}");
        }
    }

    #[test]
    fn test_png_bytes_are_reproducible() {
        let font = bundled("DejaVuSans.ttf", 30.0);
        let renderer = CertificateRenderer::default();
        let template = blank_template(300, 120);

        let (a, _) = renderer.compose(&template, "Anju Shah", &font, &spec(ScriptStyle::Arial)).unwrap();
        let (b, _) = renderer.compose(&template, "Anju Shah", &font, &spec(ScriptStyle::Arial)).unwrap();
        assert_eq!(encode_png(&a).unwrap(), encode_png(&b).unwrap());
    }

    #[test]
    fn test_render_writes_both_formats() {
        let font = bundled("DejaVuSans.ttf", 24.0);
        let dir = tempfile::tempdir().unwrap();
        let png = dir.path().join("cert.png");
        let jpg = dir.path().join("cert.jpg");

        let rendered = CertificateRenderer::default()
            .render(&blank_template(200, 100), "anju", &font, &spec(ScriptStyle::Arial), &png, &jpg)
            .unwrap();

        assert_eq!(rendered.png_sha256, sha256_hex(&std::fs::read(&png).unwrap()));
        let png_img = image::open(&png).unwrap();
        let jpg_img = image::open(&jpg).unwrap();
        assert_eq!((png_img.width(), png_img.height()), (jpg_img.width(), jpg_img.height()));
    }
}
