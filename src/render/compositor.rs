//! Compositor: rasterizes laid-out elements onto the output buffer.
//!
//! Every element renders onto its own transparent layer first, then the
//! layer is rotated and alpha-composited onto the target in list order
//! (ascending z-index). Keeping per-element drawing on separate layers
//! means rotation and opacity apply uniformly to every element kind,
//! including flattened table groups.
//!
//! The whole pass is deterministic: resampling is Lanczos3, rotation is
//! fixed bilinear sampling, and no stage consults a clock or RNG.

use std::collections::HashMap;
use std::io::Cursor;

use image::{DynamicImage, ImageFormat, Rgba, RgbaImage, imageops};

use super::backend::RasterBackend;
use super::canvas::blend_pixel;
use super::qr::render_qr;
use crate::error::TarjetaError;
use crate::layout::{LaidOutElement, LaidOutKind};
use crate::template::{ExportFormat, ScaleMode};

/// Decoded assets keyed by their reference string, prefetched by the
/// pipeline before compositing starts.
pub type AssetMap = HashMap<String, RgbaImage>;

/// Composite elements onto an opaque white card of the given dimensions.
pub fn composite<B: RasterBackend>(
    width: u32,
    height: u32,
    elements: &[LaidOutElement],
    assets: &AssetMap,
    new_layer: &impl Fn(u32, u32) -> B,
) -> Result<RgbaImage, TarjetaError> {
    let mut target = RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255]));
    composite_onto(&mut target, elements, assets, new_layer)?;
    Ok(target)
}

fn composite_onto<B: RasterBackend>(
    target: &mut RgbaImage,
    elements: &[LaidOutElement],
    assets: &AssetMap,
    new_layer: &impl Fn(u32, u32) -> B,
) -> Result<(), TarjetaError> {
    for element in elements {
        let Some((layer, x, y)) = render_layer(element, assets, new_layer)? else {
            continue;
        };
        let (layer, x, y) = apply_rotation(layer, element.rotation, x, y);
        blit(target, &layer, x, y, element.opacity);
    }
    Ok(())
}

/// Render one element to its own layer. Returns the layer and its
/// target-space position, or `None` for degenerate (zero-area) output.
fn render_layer<B: RasterBackend>(
    element: &LaidOutElement,
    assets: &AssetMap,
    new_layer: &impl Fn(u32, u32) -> B,
) -> Result<Option<(RgbaImage, f32, f32)>, TarjetaError> {
    match &element.kind {
        LaidOutKind::Text(layout) => {
            let width = layout.width.ceil() as u32;
            let height = layout.height.ceil() as u32;
            if width == 0 || height == 0 {
                return Ok(None);
            }
            let mut layer = new_layer(width, height);
            for line in &layout.lines {
                for span in &line.spans {
                    layer.draw_text(span.x, line.baseline, &span.text, &span.style, span.color);
                }
            }
            Ok(Some((layer.into_image(), element.x, element.y)))
        }

        LaidOutKind::Image { asset, scale_mode } => {
            let source = assets.get(asset).ok_or_else(|| {
                TarjetaError::Render(format!("asset '{asset}' was not loaded"))
            })?;
            let width = positive_or(element.width, source.width());
            let height = positive_or(element.height, source.height());
            Ok(Some((
                resample(source, width, height, *scale_mode),
                element.x,
                element.y,
            )))
        }

        LaidOutKind::Qr(qr) => {
            let logo = match &qr.logo {
                Some(spec) => Some(assets.get(&spec.asset).ok_or_else(|| {
                    TarjetaError::Render(format!("logo asset '{}' was not loaded", spec.asset))
                })?),
                None => None,
            };
            Ok(Some((render_qr(qr, logo)?, element.x, element.y)))
        }

        LaidOutKind::Rect { fill, stroke } => {
            let width = element.width.ceil() as u32;
            let height = element.height.ceil() as u32;
            if width == 0 || height == 0 {
                return Ok(None);
            }
            let mut layer = new_layer(width, height);
            layer.draw_rect(
                0.0,
                0.0,
                element.width,
                element.height,
                *fill,
                *stroke,
            );
            Ok(Some((layer.into_image(), element.x, element.y)))
        }

        LaidOutKind::Group(children) => {
            let width = element.width.ceil() as u32;
            let height = element.height.ceil() as u32;
            if width == 0 || height == 0 {
                return Ok(None);
            }
            let mut group = RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 0]));
            composite_onto(&mut group, children, assets, new_layer)?;
            Ok(Some((group, element.x, element.y)))
        }
    }
}

fn positive_or(value: f32, fallback: u32) -> u32 {
    if value >= 1.0 { value.round() as u32 } else { fallback.max(1) }
}

/// Resample a source image into a `width`×`height` box.
fn resample(source: &RgbaImage, width: u32, height: u32, mode: ScaleMode) -> RgbaImage {
    let (sw, sh) = (source.width().max(1), source.height().max(1));
    match mode {
        ScaleMode::Stretch => imageops::resize(source, width, height, imageops::FilterType::Lanczos3),
        ScaleMode::Fit => {
            let scale = (width as f32 / sw as f32).min(height as f32 / sh as f32);
            let tw = ((sw as f32 * scale).round() as u32).clamp(1, width);
            let th = ((sh as f32 * scale).round() as u32).clamp(1, height);
            let resized = imageops::resize(source, tw, th, imageops::FilterType::Lanczos3);
            let mut boxed = RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 0]));
            let dx = (width - tw) / 2;
            let dy = (height - th) / 2;
            for (px, py, pixel) in resized.enumerate_pixels() {
                boxed.put_pixel(dx + px, dy + py, *pixel);
            }
            boxed
        }
        ScaleMode::Fill => {
            let scale = (width as f32 / sw as f32).max(height as f32 / sh as f32);
            let tw = ((sw as f32 * scale).round() as u32).max(width);
            let th = ((sh as f32 * scale).round() as u32).max(height);
            let resized = imageops::resize(source, tw, th, imageops::FilterType::Lanczos3);
            let dx = (tw - width) / 2;
            let dy = (th - height) / 2;
            imageops::crop_imm(&resized, dx, dy, width, height).to_image()
        }
    }
}

/// Rotate a layer clockwise around its center, expanding the bounds.
/// The returned position keeps the visual center fixed.
fn apply_rotation(layer: RgbaImage, degrees: f32, x: f32, y: f32) -> (RgbaImage, f32, f32) {
    let normalized = degrees.rem_euclid(360.0);
    if normalized == 0.0 {
        return (layer, x, y);
    }

    let radians = normalized.to_radians();
    let (sin, cos) = radians.sin_cos();
    let (w, h) = (layer.width() as f32, layer.height() as f32);
    let new_w = (w * cos.abs() + h * sin.abs()).ceil().max(1.0);
    let new_h = (w * sin.abs() + h * cos.abs()).ceil().max(1.0);

    let (cx, cy) = (w / 2.0, h / 2.0);
    let (ncx, ncy) = (new_w / 2.0, new_h / 2.0);

    let mut rotated = RgbaImage::from_pixel(new_w as u32, new_h as u32, Rgba([0, 0, 0, 0]));
    for (px, py, pixel) in rotated.enumerate_pixels_mut() {
        // Inverse mapping: rotate the output pixel back into source space.
        let dx = px as f32 + 0.5 - ncx;
        let dy = py as f32 + 0.5 - ncy;
        let sx = dx * cos + dy * sin + cx - 0.5;
        let sy = -dx * sin + dy * cos + cy - 0.5;
        *pixel = sample_bilinear(&layer, sx, sy);
    }

    (rotated, x - (new_w - w) / 2.0, y - (new_h - h) / 2.0)
}

fn sample_bilinear(image: &RgbaImage, x: f32, y: f32) -> Rgba<u8> {
    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;

    let fetch = |ix: f32, iy: f32| -> [f32; 4] {
        if ix < 0.0 || iy < 0.0 || ix >= image.width() as f32 || iy >= image.height() as f32 {
            [0.0; 4]
        } else {
            let p = image.get_pixel(ix as u32, iy as u32);
            [p[0] as f32, p[1] as f32, p[2] as f32, p[3] as f32]
        }
    };

    let tl = fetch(x0, y0);
    let tr = fetch(x0 + 1.0, y0);
    let bl = fetch(x0, y0 + 1.0);
    let br = fetch(x0 + 1.0, y0 + 1.0);

    let mut out = [0u8; 4];
    for i in 0..4 {
        let top = tl[i] * (1.0 - fx) + tr[i] * fx;
        let bottom = bl[i] * (1.0 - fx) + br[i] * fx;
        out[i] = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
    }
    Rgba(out)
}

/// Alpha-composite a layer onto the target with an element-level opacity
/// multiplier.
fn blit(target: &mut RgbaImage, layer: &RgbaImage, x: f32, y: f32, opacity: f32) {
    let opacity = opacity.clamp(0.0, 1.0);
    if opacity == 0.0 {
        return;
    }
    let x0 = x.round() as i64;
    let y0 = y.round() as i64;
    for (px, py, pixel) in layer.enumerate_pixels() {
        let tx = x0 + px as i64;
        let ty = y0 + py as i64;
        if tx < 0 || ty < 0 || tx >= target.width() as i64 || ty >= target.height() as i64 {
            continue;
        }
        let mut src = *pixel;
        src[3] = (src[3] as f32 * opacity).round() as u8;
        blend_pixel(target.get_pixel_mut(tx as u32, ty as u32), src);
    }
}

/// Every asset reference the compositor will need for these elements.
pub fn collect_asset_refs(elements: &[LaidOutElement]) -> Vec<String> {
    let mut refs = Vec::new();
    collect_refs_into(elements, &mut refs);
    refs.sort();
    refs.dedup();
    refs
}

fn collect_refs_into(elements: &[LaidOutElement], refs: &mut Vec<String>) {
    for element in elements {
        match &element.kind {
            LaidOutKind::Image { asset, .. } => refs.push(asset.clone()),
            LaidOutKind::Qr(qr) => {
                if let Some(logo) = &qr.logo {
                    refs.push(logo.asset.clone());
                }
            }
            LaidOutKind::Group(children) => collect_refs_into(children, refs),
            LaidOutKind::Text(_) | LaidOutKind::Rect { .. } => {}
        }
    }
}

/// Encode the output buffer in the template's export format.
///
/// JPEG has no alpha channel, so the buffer is flattened to RGB first.
pub fn encode(image: &RgbaImage, format: ExportFormat) -> Result<Vec<u8>, TarjetaError> {
    let mut cursor = Cursor::new(Vec::new());
    let result = match format {
        ExportFormat::Png => {
            DynamicImage::ImageRgba8(image.clone()).write_to(&mut cursor, ImageFormat::Png)
        }
        ExportFormat::Jpg => DynamicImage::ImageRgb8(
            DynamicImage::ImageRgba8(image.clone()).to_rgb8(),
        )
        .write_to(&mut cursor, ImageFormat::Jpeg),
    };
    result.map_err(|e| TarjetaError::Render(format!("encoding failed: {e}")))?;
    Ok(cursor.into_inner())
}
