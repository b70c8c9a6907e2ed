//! # Rendering
//!
//! Raster backend trait, the pixel-canvas implementation, the font catalog,
//! QR rasterization, and the z-order compositor.
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`backend`] | Minimal drawing interface the compositor is written against |
//! | [`canvas`] | RGBA pixel canvas implementation |
//! | [`fonts`] | Font catalog: directory loading, face fallback, measurement |
//! | [`qr`] | QR module-matrix rendering with logo overlay |
//! | [`compositor`] | Per-element layers, rotation/opacity, export encoding |

pub mod backend;
pub mod canvas;
pub mod compositor;
pub mod fonts;
pub mod qr;

pub use backend::{RasterBackend, TextMetrics, TextShaper, TextStyle};
pub use canvas::PixelCanvas;
pub use compositor::{AssetMap, collect_asset_refs, composite, encode};
pub use fonts::FontCatalog;
pub use qr::render_qr;
