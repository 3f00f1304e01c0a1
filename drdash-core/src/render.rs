//! Synthetic test-image rendering for the media upload probe.

use crate::error::{DashError, Result};
use bytes::Bytes;

pub const ARTIFACT_WIDTH: u32 = 900;
pub const ARTIFACT_HEIGHT: u32 = 500;

pub const BANNER: &str = "DR DASHBOARD - MEDIA UPLOAD TEST";
pub const CAPTION: &str =
    "If this image still loads after failover: shared uploads + web path are OK.";

/// Renders the PNG artifact written by the media upload probe.
pub trait ArtifactRenderer: Send + Sync {
    fn render(&self, label: &str) -> Result<Bytes>;
}

/// PNG renderer using an embedded 8x8 bitmap font.
///
/// Built without the `png-render` feature it reports itself as unavailable,
/// which the media probe treats as a missing local dependency.
#[derive(Debug, Clone, Default)]
pub struct PngRenderer;

impl PngRenderer {
    pub fn new() -> Self {
        Self
    }

    pub fn is_available() -> bool {
        cfg!(feature = "png-render")
    }
}

#[cfg(feature = "png-render")]
impl ArtifactRenderer for PngRenderer {
    fn render(&self, label: &str) -> Result<Bytes> {
        use image::{ImageFormat, Rgb, RgbImage};
        use std::io::Cursor;

        let background = Rgb([245, 247, 250]);
        let foreground = Rgb([30, 41, 59]);
        let accent = Rgb([16, 185, 129]);

        let mut canvas = RgbImage::from_pixel(ARTIFACT_WIDTH, ARTIFACT_HEIGHT, background);
        for y in 0..14 {
            for x in 0..ARTIFACT_WIDTH {
                canvas.put_pixel(x, y, accent);
            }
        }

        draw_text(&mut canvas, BANNER, 24, 40, 2, foreground);
        draw_text(&mut canvas, label, 24, 100, 2, foreground);
        draw_text(&mut canvas, CAPTION, 24, 160, 1, foreground);

        let mut encoded = Cursor::new(Vec::new());
        canvas
            .write_to(&mut encoded, ImageFormat::Png)
            .map_err(|error| DashError::Internal(format!("PNG encoding failed: {}", error)))?;

        Ok(Bytes::from(encoded.into_inner()))
    }
}

#[cfg(not(feature = "png-render"))]
impl ArtifactRenderer for PngRenderer {
    fn render(&self, _label: &str) -> Result<Bytes> {
        Err(DashError::RenderUnavailable(
            "PNG rendering support not compiled in (enable the png-render feature)".to_string(),
        ))
    }
}

/// Draw `text` with its top-left corner at (`x`, `y`). Glyphs are 8x8 cells
/// scaled by `scale`; characters without a glyph render as '?', and text
/// running past the right edge is clipped.
#[cfg(feature = "png-render")]
fn draw_text(
    canvas: &mut image::RgbImage,
    text: &str,
    x: u32,
    y: u32,
    scale: u32,
    color: image::Rgb<u8>,
) {
    use font8x8::{BASIC_FONTS, UnicodeFonts};

    let cell = 8 * scale;
    for (index, ch) in text.chars().enumerate() {
        let glyph = BASIC_FONTS
            .get(ch)
            .or_else(|| BASIC_FONTS.get('?'))
            .unwrap_or([0; 8]);

        let origin_x = x + index as u32 * cell;
        if origin_x + cell > canvas.width() {
            break;
        }

        for (row, bits) in glyph.iter().enumerate() {
            for col in 0..8u32 {
                if bits & (1 << col) == 0 {
                    continue;
                }
                for dy in 0..scale {
                    for dx in 0..scale {
                        let px = origin_x + col * scale + dx;
                        let py = y + row as u32 * scale + dy;
                        if px < canvas.width() && py < canvas.height() {
                            canvas.put_pixel(px, py, color);
                        }
                    }
                }
            }
        }
    }
}
