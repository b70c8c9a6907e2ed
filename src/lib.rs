//! # Tarjeta - Template-Driven Card Rendering Pipeline
//!
//! Tarjeta turns a declarative visual template plus a per-recipient data
//! record into a finished raster image (a personalized card or QR asset),
//! at batch scale, through an asynchronous job pipeline. It provides:
//!
//! - **Template model**: typed, validated templates with text, image, QR,
//!   and table elements
//! - **Per-record resolution**: field binding, conditional visibility,
//!   dynamic positions
//! - **Layout**: auto-fit text, per-word styling, collapsible tables
//! - **Compositing**: z-ordered rasterization with rotation and opacity
//! - **Job control**: bounded concurrency, rate limiting, retries with
//!   backoff, cooperative cancellation, graceful drain
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use tarjeta::{
//!     job::CancelFlag,
//!     pipeline::{RenderOptions, RenderPipeline},
//!     render::FontCatalog,
//!     resolve::Record,
//!     store::{AssetFetcher, MemoryObjectStore},
//!     template::Template,
//! };
//!
//! # async fn example() -> Result<(), tarjeta::TarjetaError> {
//! let template = Template::from_json(r#"{
//!     "id": "welcome", "version": 1, "width": 1200, "height": 800,
//!     "elements": [
//!         {"type": "text", "id": "greeting", "field": "name",
//!          "x": 60, "y": 60, "font": {"size": 48}},
//!         {"type": "qr", "id": "link", "field": "url",
//!          "size": 240, "x": 60, "y": 400}
//!     ]
//! }"#)?;
//!
//! let record = Record::from_value(serde_json::json!({
//!     "name": "Ada Lovelace",
//!     "url": "https://example.com/r/ada"
//! }));
//!
//! let pipeline = RenderPipeline::new(
//!     Arc::new(FontCatalog::empty()),
//!     Arc::new(AssetFetcher::new(Arc::new(MemoryObjectStore::new()))),
//! );
//! let output = pipeline
//!     .render(&template, &record, &RenderOptions::default(), &CancelFlag::new())
//!     .await?;
//! std::fs::write("card.png", &output.bytes)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Overview
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`template`] | Template model: elements, validation, shared cache |
//! | [`resolve`] | Per-record field binding and visibility |
//! | [`layout`] | Geometry: auto-fit, word styling, table collapse |
//! | [`render`] | Raster backend, fonts, QR, compositor |
//! | [`pipeline`] | One job's resolve → layout → composite run |
//! | [`job`] | Queue contract and the render job controller |
//! | [`store`] | Object storage and metadata collaborator interfaces |
//! | [`server`] | HTTP surface: submit, observe, cancel, preview |
//! | [`error`] | Error types and transient/terminal classification |

pub mod error;
pub mod job;
pub mod layout;
pub mod pipeline;
pub mod render;
pub mod resolve;
pub mod server;
pub mod store;
pub mod template;

// Re-exports for convenience
pub use error::TarjetaError;
pub use pipeline::RenderPipeline;
pub use resolve::Record;
pub use template::Template;
