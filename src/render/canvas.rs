//! Pixel canvas: the concrete raster backend.
//!
//! Draws text, rectangles, and images onto an RGBA buffer with src-over
//! alpha blending. Glyphs are rasterized with `ab_glyph` coverage; when no
//! font face is available, placeholder boxes are drawn so the failure mode
//! is visible in the output.

use ab_glyph::{Font, ScaleFont};
use image::{Rgba, RgbaImage};
use std::sync::Arc;

use super::backend::{RasterBackend, TextMetrics, TextShaper, TextStyle};
use super::fonts::FontCatalog;
use crate::template::Color;

/// One drawing layer backed by an RGBA buffer.
pub struct PixelCanvas {
    image: RgbaImage,
    fonts: Arc<FontCatalog>,
}

/// Source-over blend of `src` onto `dst`.
pub(crate) fn blend_pixel(dst: &mut Rgba<u8>, src: Rgba<u8>) {
    let sa = src[3] as f32 / 255.0;
    if sa <= 0.0 {
        return;
    }
    let da = dst[3] as f32 / 255.0;
    let out_a = sa + da * (1.0 - sa);
    if out_a <= 0.0 {
        *dst = Rgba([0, 0, 0, 0]);
        return;
    }
    for i in 0..3 {
        let s = src[i] as f32 / 255.0;
        let d = dst[i] as f32 / 255.0;
        let c = (s * sa + d * da * (1.0 - sa)) / out_a;
        dst[i] = (c * 255.0).round().clamp(0.0, 255.0) as u8;
    }
    dst[3] = (out_a * 255.0).round().clamp(0.0, 255.0) as u8;
}

impl PixelCanvas {
    /// Create a transparent layer.
    pub fn new(width: u32, height: u32, fonts: Arc<FontCatalog>) -> Self {
        Self {
            image: RgbaImage::from_pixel(width.max(1), height.max(1), Rgba([0, 0, 0, 0])),
            fonts,
        }
    }

    fn plot(&mut self, x: i64, y: i64, color: Color, coverage: f32) {
        if x < 0 || y < 0 || x >= self.image.width() as i64 || y >= self.image.height() as i64 {
            return;
        }
        let alpha = (color.a as f32 * coverage.clamp(0.0, 1.0)).round() as u8;
        let src = Rgba([color.r, color.g, color.b, alpha]);
        blend_pixel(self.image.get_pixel_mut(x as u32, y as u32), src);
    }

    fn fill_region(&mut self, x: f32, y: f32, width: f32, height: f32, color: Color) {
        let x0 = x.round() as i64;
        let y0 = y.round() as i64;
        let x1 = (x + width).round() as i64;
        let y1 = (y + height).round() as i64;
        for py in y0..y1 {
            for px in x0..x1 {
                self.plot(px, py, color, 1.0);
            }
        }
    }

    /// Placeholder glyph boxes for text with no loadable face.
    fn draw_placeholder_text(&mut self, x: f32, baseline_y: f32, text: &str, style: &TextStyle, color: Color) {
        let advance = style.size * 0.6;
        let top = baseline_y - style.size * 0.8;
        let mut cursor = x;
        for c in text.chars() {
            if !c.is_whitespace() {
                let w = advance * 0.8;
                let h = style.size * 0.8;
                // Hollow box: four 1px edges.
                self.fill_region(cursor, top, w, 1.0, color);
                self.fill_region(cursor, top + h - 1.0, w, 1.0, color);
                self.fill_region(cursor, top, 1.0, h, color);
                self.fill_region(cursor + w - 1.0, top, 1.0, h, color);
            }
            cursor += advance;
        }
    }
}

impl TextShaper for PixelCanvas {
    fn measure_text(&self, text: &str, style: &TextStyle) -> TextMetrics {
        self.fonts.measure_text(text, style)
    }
}

impl RasterBackend for PixelCanvas {
    fn draw_text(&mut self, x: f32, baseline_y: f32, text: &str, style: &TextStyle, color: Color) {
        let Some(font) = self.fonts.face(style) else {
            self.draw_placeholder_text(x, baseline_y, text, style, color);
            return;
        };
        let font = font.clone();
        let scaled = font.as_scaled(style.size);

        let mut caret = x;
        for c in text.chars() {
            let glyph_id = font.glyph_id(c);
            let glyph = glyph_id.with_scale_and_position(
                style.size,
                ab_glyph::point(caret, baseline_y),
            );
            caret += scaled.h_advance(glyph_id);

            if let Some(outlined) = font.outline_glyph(glyph) {
                let bounds = outlined.px_bounds();
                let (min_x, min_y) = (bounds.min.x as i64, bounds.min.y as i64);
                outlined.draw(|px, py, coverage| {
                    self.plot(px as i64 + min_x, py as i64 + min_y, color, coverage);
                });
            }
        }
    }

    fn draw_rect(
        &mut self,
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        fill: Option<Color>,
        stroke: Option<(Color, f32)>,
    ) {
        if let Some(color) = fill {
            self.fill_region(x, y, width, height, color);
        }
        if let Some((color, stroke_width)) = stroke {
            let sw = stroke_width.max(1.0);
            // Stroke drawn inside the box.
            self.fill_region(x, y, width, sw, color);
            self.fill_region(x, y + height - sw, width, sw, color);
            self.fill_region(x, y, sw, height, color);
            self.fill_region(x + width - sw, y, sw, height, color);
        }
    }

    fn draw_image(&mut self, x: f32, y: f32, image: &RgbaImage) {
        let x0 = x.round() as i64;
        let y0 = y.round() as i64;
        for (px, py, pixel) in image.enumerate_pixels() {
            let tx = x0 + px as i64;
            let ty = y0 + py as i64;
            if tx < 0 || ty < 0 || tx >= self.image.width() as i64 || ty >= self.image.height() as i64 {
                continue;
            }
            blend_pixel(self.image.get_pixel_mut(tx as u32, ty as u32), *pixel);
        }
    }

    fn into_image(self) -> RgbaImage {
        self.image
    }
}
