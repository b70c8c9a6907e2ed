//! # Render Pipeline
//!
//! One job's resolve → layout → composite run, with an explicit immutable
//! per-job context (template, record, options) threaded through each stage.
//! The cooperative cancellation flag is checked between stages; the
//! CPU-bound composite runs on the blocking pool so worker tasks stay
//! responsive to timeouts.

use std::sync::Arc;

use crate::error::TarjetaError;
use crate::job::CancelFlag;
use crate::layout::layout;
use crate::render::{FontCatalog, PixelCanvas, collect_asset_refs, composite, encode};
use crate::resolve::{Record, ResolveWarning, resolve};
use crate::store::AssetFetcher;
use crate::template::{ExportFormat, Template};

/// Per-render options from the job payload and operator configuration.
#[derive(Debug, Clone, Default)]
pub struct RenderOptions {
    /// Override of the template's export format.
    pub output_format: Option<ExportFormat>,
    /// Escalate to a hard failure when every element resolved away
    /// (default: partial render over total failure).
    pub fail_when_empty: bool,
}

/// A finished render: the encoded buffer plus per-element warnings.
#[derive(Debug, Clone)]
pub struct RenderOutput {
    pub bytes: Vec<u8>,
    pub format: ExportFormat,
    pub width: u32,
    pub height: u32,
    pub warnings: Vec<ResolveWarning>,
}

impl RenderOutput {
    pub fn file_extension(&self) -> &'static str {
        match self.format {
            ExportFormat::Png => "png",
            ExportFormat::Jpg => "jpg",
        }
    }
}

/// The render pipeline, shared read-only across workers. Cloning shares
/// the font catalog and asset fetcher.
#[derive(Clone)]
pub struct RenderPipeline {
    fonts: Arc<FontCatalog>,
    assets: Arc<AssetFetcher>,
}

impl RenderPipeline {
    pub fn new(fonts: Arc<FontCatalog>, assets: Arc<AssetFetcher>) -> Self {
        Self { fonts, assets }
    }

    /// Render one (template, record) pair to an encoded buffer.
    pub async fn render(
        &self,
        template: &Template,
        record: &Record,
        options: &RenderOptions,
        cancel: &CancelFlag,
    ) -> Result<RenderOutput, TarjetaError> {
        cancel.check()?;
        let resolution = resolve(template, record);
        if resolution.elements.is_empty() && options.fail_when_empty {
            return Err(TarjetaError::Render(
                "every element resolved away for this record".to_string(),
            ));
        }

        cancel.check()?;
        let elements = layout(self.fonts.as_ref(), &resolution);

        cancel.check()?;
        let refs = collect_asset_refs(&elements);
        let assets = self.assets.fetch_all(&refs).await?;

        cancel.check()?;
        let format = options.output_format.unwrap_or(template.export.format);
        let (width, height) = (template.width, template.height);
        let fonts = self.fonts.clone();
        let bytes = tokio::task::spawn_blocking(move || {
            let image = composite(width, height, &elements, &assets, &|w, h| {
                PixelCanvas::new(w, h, fonts.clone())
            })?;
            encode(&image, format)
        })
        .await
        .map_err(|e| TarjetaError::Render(format!("composite task failed: {e}")))??;

        Ok(RenderOutput {
            bytes,
            format,
            width,
            height,
            warnings: resolution.warnings,
        })
    }
}
