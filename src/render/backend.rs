//! Minimal raster backend interface.
//!
//! The layout engine and compositor talk to the drawing layer exclusively
//! through [`TextShaper`] and [`RasterBackend`], so the concrete raster
//! library stays an implementation detail of one module.

use image::RgbaImage;

use crate::template::{Color, FontStyle, FontWeight};

/// Font parameters for measuring and drawing one run of text.
#[derive(Debug, Clone, PartialEq)]
pub struct TextStyle {
    pub family: String,
    pub size: f32,
    pub weight: FontWeight,
    pub style: FontStyle,
}

impl TextStyle {
    pub fn new(family: impl Into<String>, size: f32) -> Self {
        Self {
            family: family.into(),
            size,
            weight: FontWeight::Normal,
            style: FontStyle::Normal,
        }
    }
}

/// Measured extent of a text run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextMetrics {
    /// Advance width in pixels.
    pub width: f32,
    /// Line height (ascent + descent) in pixels.
    pub height: f32,
    /// Baseline offset from the top of the line box.
    pub ascent: f32,
}

/// Text measurement, independent of any drawing surface.
///
/// The layout engine depends only on this; tests substitute a fixed-advance
/// shaper to keep geometry assertions font-independent.
pub trait TextShaper {
    fn measure_text(&self, text: &str, style: &TextStyle) -> TextMetrics;
}

/// A drawing surface for one element layer.
///
/// Coordinates are pixels relative to the layer origin. Implementations own
/// their pixel buffer; [`RasterBackend::into_image`] surrenders it for
/// compositing. Layers are created by a caller-supplied factory so the
/// backend can carry shared state (font catalog) without the compositor
/// knowing about it.
pub trait RasterBackend: TextShaper {
    /// Draw a text run with its baseline at `(x, baseline_y)`.
    fn draw_text(&mut self, x: f32, baseline_y: f32, text: &str, style: &TextStyle, color: Color);

    /// Fill and/or stroke an axis-aligned rectangle.
    fn draw_rect(
        &mut self,
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        fill: Option<Color>,
        stroke: Option<(Color, f32)>,
    );

    /// Blit an already-resampled image at `(x, y)`.
    fn draw_image(&mut self, x: f32, y: f32, image: &RgbaImage);

    /// Surrender the pixel buffer.
    fn into_image(self) -> RgbaImage;
}
