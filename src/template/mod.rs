//! # Template Model
//!
//! A single type hierarchy that is both the Rust API and the JSON API.
//! [`Template`] is constructible in Rust and deserializable from JSON.
//!
//! ```ignore
//! use tarjeta::template::*;
//!
//! // JSON deserialization (loads + validates)
//! let tpl = Template::from_json(r#"{
//!     "id": "welcome-card", "version": 1,
//!     "width": 1200, "height": 800,
//!     "elements": [
//!         {"type": "text", "id": "title", "content": "Hello", "x": 40, "y": 40}
//!     ]
//! }"#)?;
//!
//! // Elements come back in composite order
//! for el in tpl.ordered_elements() { /* ... */ }
//! ```
//!
//! The model is immutable once loaded for a given render job. Loaded
//! templates are cached in a [`TemplateStore`] keyed by (id, version) and
//! shared read-only across concurrent jobs.

pub mod types;
mod validate;

pub use types::*;
pub use validate::validate;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::TarjetaError;

/// Output raster encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    #[default]
    Png,
    Jpg,
}

fn default_dpi() -> u32 {
    300
}

/// Export options: encoding and target DPI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportOptions {
    #[serde(default)]
    pub format: ExportFormat,
    #[serde(default = "default_dpi")]
    pub dpi: u32,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            format: ExportFormat::Png,
            dpi: default_dpi(),
        }
    }
}

/// Define the Element enum and all dispatch methods from a single list.
///
/// Adding a new element kind: add one line here, then define the struct in
/// `types.rs`. The compiler will guide you to the remaining exhaustive
/// matches in the resolver, layout engine, and compositor.
macro_rules! define_elements {
    ($($variant:ident($inner:ty, $label:literal)),+ $(,)?) => {
        /// The closed element union.
        ///
        /// Each variant corresponds to one visual unit within a template.
        /// The `#[serde(tag = "type")]` attribute enables JSON like
        /// `{"type": "text", "id": "title", "content": "Hello"}`.
        #[derive(Debug, Clone, Serialize, Deserialize)]
        #[serde(tag = "type", rename_all = "snake_case")]
        pub enum Element {
            $($variant($inner),)+
        }

        impl Element {
            /// Element identifier, unique within a template.
            pub fn id(&self) -> &str {
                match self { $(Element::$variant(e) => &e.id,)+ }
            }

            /// Common placement attributes.
            pub fn placement(&self) -> &Placement {
                match self { $(Element::$variant(e) => &e.placement,)+ }
            }

            /// Human-readable display label.
            pub fn label(&self) -> &'static str {
                match self { $(Element::$variant(_) => $label,)+ }
            }
        }
    };
}

define_elements! {
    Text(TextElement, "Text"),
    Image(ImageElement, "Image"),
    Qr(QrElement, "QR Code"),
    Table(TableElement, "Table"),
}

impl Element {
    /// Visit this element and, for tables, every nested cell element.
    pub fn for_each(&self, f: &mut impl FnMut(&Element)) {
        f(self);
        if let Element::Table(table) = self {
            for cell in &table.cells {
                if let Some(el) = &cell.element {
                    el.for_each(f);
                }
            }
        }
    }
}

/// A reusable visual definition: dimensions, brand colors, and an ordered
/// collection of elements, independent of any one record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub id: String,
    pub version: u32,
    /// Canvas width in device pixels.
    pub width: u32,
    /// Canvas height in device pixels.
    pub height: u32,
    #[serde(default)]
    pub export: ExportOptions,
    /// Brand color tokens referencable from element colors as `$name`.
    #[serde(default)]
    pub brand_colors: HashMap<String, Color>,
    #[serde(default)]
    pub elements: Vec<Element>,
}

impl Template {
    /// Parse a template from JSON and validate it.
    pub fn from_json(json: &str) -> Result<Self, TarjetaError> {
        let template: Template =
            serde_json::from_str(json).map_err(|e| TarjetaError::TemplateInvalid {
                element: None,
                rule: format!("malformed JSON: {e}"),
            })?;
        validate(&template)?;
        Ok(template)
    }

    /// Elements in composite order: ascending `z_index`, ties broken by
    /// declaration order.
    pub fn ordered_elements(&self) -> Vec<&Element> {
        let mut ordered: Vec<&Element> = self.elements.iter().collect();
        // Vec::sort_by is stable, so equal z_index preserves declaration order.
        ordered.sort_by_key(|el| el.placement().z_index);
        ordered
    }
}

/// Shared read-only template cache, keyed by (template id, version).
///
/// Concurrent jobs referencing the same template+version share one loaded
/// instance. Entries are invalidated on template update.
#[derive(Default)]
pub struct TemplateStore {
    cache: RwLock<HashMap<(String, u32), Arc<Template>>>,
}

impl TemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, id: &str, version: u32) -> Option<Arc<Template>> {
        self.cache
            .read()
            .await
            .get(&(id.to_string(), version))
            .cloned()
    }

    /// Cache a validated template, returning the shared handle.
    pub async fn insert(&self, template: Template) -> Arc<Template> {
        let key = (template.id.clone(), template.version);
        let shared = Arc::new(template);
        self.cache.write().await.insert(key, shared.clone());
        shared
    }

    /// Drop every cached version of a template (called on template update).
    pub async fn invalidate(&self, id: &str) {
        self.cache.write().await.retain(|(tid, _), _| tid != id);
    }
}
