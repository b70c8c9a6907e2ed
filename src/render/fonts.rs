//! Font catalog: loads TTF/OTF faces from a directory and measures text.
//!
//! Faces are selected by file naming convention: `<family>.ttf`,
//! `<family>-bold.ttf`, `<family>-italic.ttf`, `<family>-bold-italic.ttf`.
//! Lookup falls back from the exact face to the family's regular face, then
//! to the `default` family, then to any loaded face.
//!
//! With no faces loaded at all, measurement uses a fixed-advance estimate
//! and drawing produces placeholder glyph boxes, so a misconfigured fonts
//! directory degrades visibly instead of failing the whole pipeline.

use ab_glyph::{Font, FontArc, ScaleFont};
use std::collections::HashMap;
use std::path::Path;

use super::backend::{TextMetrics, TextShaper, TextStyle};
use crate::error::TarjetaError;
use crate::template::{FontStyle, FontWeight};

/// Fixed-advance fraction of the em size used when no face is available.
const FALLBACK_ADVANCE: f32 = 0.6;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct FaceKey {
    family: String,
    bold: bool,
    italic: bool,
}

/// An immutable set of loaded font faces, shared read-only across jobs.
#[derive(Default)]
pub struct FontCatalog {
    faces: HashMap<FaceKey, FontArc>,
}

impl FontCatalog {
    /// An empty catalog (placeholder glyph rendering).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load every `.ttf`/`.otf` file in a directory.
    ///
    /// Unparseable files are skipped with a warning; a missing directory is
    /// an error.
    pub fn load_dir(dir: &Path) -> Result<Self, TarjetaError> {
        let mut catalog = Self::default();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let is_font = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("ttf") || e.eq_ignore_ascii_case("otf"));
            if !is_font {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let bytes = std::fs::read(&path)?;
            match FontArc::try_from_vec(bytes) {
                Ok(font) => {
                    catalog.faces.insert(parse_face_key(stem), font);
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unparseable font");
                }
            }
        }
        tracing::info!(faces = catalog.faces.len(), dir = %dir.display(), "font catalog loaded");
        Ok(catalog)
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    /// Resolve a face for a style, walking the fallback chain.
    pub fn face(&self, style: &TextStyle) -> Option<&FontArc> {
        let family = style.family.to_ascii_lowercase();
        let bold = style.weight == FontWeight::Bold;
        let italic = style.style == FontStyle::Italic;

        let candidates = [
            FaceKey {
                family: family.clone(),
                bold,
                italic,
            },
            FaceKey {
                family: family.clone(),
                bold,
                italic: false,
            },
            FaceKey {
                family,
                bold: false,
                italic: false,
            },
            FaceKey {
                family: "default".to_string(),
                bold,
                italic: false,
            },
            FaceKey {
                family: "default".to_string(),
                bold: false,
                italic: false,
            },
        ];
        for key in &candidates {
            if let Some(font) = self.faces.get(key) {
                return Some(font);
            }
        }
        // Deterministic last resort: lexicographically first loaded face.
        self.faces
            .iter()
            .min_by(|(a, _), (b, _)| {
                (&a.family, a.bold, a.italic).cmp(&(&b.family, b.bold, b.italic))
            })
            .map(|(_, font)| font)
    }
}

fn parse_face_key(stem: &str) -> FaceKey {
    let lower = stem.to_ascii_lowercase();
    let mut family = lower.as_str();
    let mut bold = false;
    let mut italic = false;
    loop {
        if let Some(rest) = family.strip_suffix("-italic") {
            italic = true;
            family = rest;
        } else if let Some(rest) = family.strip_suffix("-bold") {
            bold = true;
            family = rest;
        } else {
            break;
        }
    }
    FaceKey {
        family: family.to_string(),
        bold,
        italic,
    }
}

impl TextShaper for FontCatalog {
    fn measure_text(&self, text: &str, style: &TextStyle) -> TextMetrics {
        match self.face(style) {
            Some(font) => {
                let scaled = font.as_scaled(style.size);
                let width: f32 = text
                    .chars()
                    .map(|c| scaled.h_advance(font.glyph_id(c)))
                    .sum();
                let ascent = scaled.ascent();
                TextMetrics {
                    width,
                    height: ascent - scaled.descent(),
                    ascent,
                }
            }
            None => TextMetrics {
                width: text.chars().count() as f32 * style.size * FALLBACK_ADVANCE,
                height: style.size * 1.2,
                ascent: style.size,
            },
        }
    }
}
