//! QR code rasterization: module matrix → colored pixels → logo overlay.

use image::{Rgba, RgbaImage, imageops};

use super::canvas::blend_pixel;
use crate::error::TarjetaError;
use crate::resolve::ResolvedQr;
use crate::template::{Color, EcLevel};

fn ec_level(level: EcLevel) -> qrcode::EcLevel {
    match level {
        EcLevel::L => qrcode::EcLevel::L,
        EcLevel::M => qrcode::EcLevel::M,
        EcLevel::Q => qrcode::EcLevel::Q,
        EcLevel::H => qrcode::EcLevel::H,
    }
}

fn rgba(color: Color) -> Rgba<u8> {
    Rgba([color.r, color.g, color.b, color.a])
}

/// Encode and rasterize a QR element to an exact `size`×`size` buffer.
///
/// The module matrix (plus quiet-zone margin) is scaled to fill the target
/// edge length; the mapping is pure integer/float arithmetic, so the same
/// payload always produces the same pixels. The optional logo is resampled
/// to its configured square size and composited over the center.
pub fn render_qr(qr: &ResolvedQr, logo: Option<&RgbaImage>) -> Result<RgbaImage, TarjetaError> {
    let code = qrcode::QrCode::with_error_correction_level(
        qr.payload.as_bytes(),
        ec_level(qr.error_correction),
    )
    .map_err(|e| TarjetaError::Render(format!("QR encoding failed: {e}")))?;

    let modules = code.width();
    let total = modules as u32 + 2 * qr.margin;
    let size = qr.size;
    let px_per_module = size as f32 / total as f32;

    let mut image = RgbaImage::from_pixel(size, size, rgba(qr.light));
    for py in 0..size {
        for px in 0..size {
            let mx = (px as f32 / px_per_module) as i64 - qr.margin as i64;
            let my = (py as f32 / px_per_module) as i64 - qr.margin as i64;
            if mx < 0 || my < 0 || mx >= modules as i64 || my >= modules as i64 {
                continue; // quiet zone stays light
            }
            if code[(mx as usize, my as usize)] == qrcode::Color::Dark {
                image.put_pixel(px, py, rgba(qr.dark));
            }
        }
    }

    if let (Some(spec), Some(source)) = (&qr.logo, logo) {
        let edge = spec.size.min(size);
        let resized = imageops::resize(source, edge, edge, imageops::FilterType::Lanczos3);
        let offset = (size - edge) / 2;
        for (px, py, pixel) in resized.enumerate_pixels() {
            blend_pixel(image.get_pixel_mut(offset + px, offset + py), *pixel);
        }
    }

    Ok(image)
}
