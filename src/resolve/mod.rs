//! # Element Resolver
//!
//! Binds a validated [`Template`] to one data [`Record`], producing a
//! [`ResolvedElement`] for every template element whose effective visibility
//! is true. Resolved elements live for exactly one render job; they are
//! never persisted.
//!
//! Missing required fields are recoverable: the element is skipped, a
//! [`ResolveWarning`] is recorded, and the render continues (partial render
//! over total failure).

mod formula;

pub use formula::eval as eval_formula;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::template::{
    AutoFit, Color, ColorSpec, EcLevel, Element, FontSpec, FontWeight, ImageElement, PatternMode,
    Placement, QrElement, QrLogo, QrPayloadKind, RuleSelector, ScaleMode, TableElement, Template,
    TextElement,
};

// ============================================================================
// RECORD
// ============================================================================

/// A per-recipient data record: field name → JSON value.
///
/// Field references are dotted paths (`user.name`); values may be absent or
/// null. Lookups never fail hard; absence is an expected per-record state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(serde_json::Map<String, Value>);

impl Record {
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Self(map),
            _ => Self::default(),
        }
    }

    /// Look up a dotted path (`user.email`) in the record.
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let mut current = self.0.get(segments.next()?)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    /// Render a field as display text. Strings pass through; numbers and
    /// booleans format naturally; null, absent, and structured values are
    /// treated as missing.
    pub fn text(&self, path: &str) -> Option<String> {
        match self.get(path)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Numeric field value. Strings that parse as numbers count, since imported
    /// records are frequently stringly-typed.
    pub fn number(&self, path: &str) -> Option<f64> {
        match self.get(path)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Truthiness for visibility fields: absent, null, `false`, `0`, `""`,
    /// and `"false"` are falsy; everything else is truthy.
    pub fn truthy(&self, path: &str) -> bool {
        match self.get(path) {
            None | Some(Value::Null) => false,
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_f64() != Some(0.0),
            Some(Value::String(s)) => !s.is_empty() && s != "false" && s != "0",
            Some(_) => true,
        }
    }
}

// ============================================================================
// RESOLVED MODEL
// ============================================================================

/// A recoverable per-element resolution problem.
#[derive(Debug, Clone, Serialize)]
pub struct ResolveWarning {
    pub element: String,
    pub field: String,
    pub message: String,
}

/// An element after field binding for one record.
#[derive(Debug, Clone)]
pub struct ResolvedElement {
    pub id: String,
    pub placement: Placement,
    pub kind: ResolvedKind,
}

/// Resolved variant payloads. A closed union; every downstream stage matches
/// exhaustively.
#[derive(Debug, Clone)]
pub enum ResolvedKind {
    Text(ResolvedText),
    Image(ResolvedImage),
    Qr(ResolvedQr),
    Table(ResolvedTable),
}

#[derive(Debug, Clone)]
pub struct ResolvedText {
    pub content: String,
    pub font: FontSpec,
    pub color: Color,
    pub max_width: Option<f32>,
    pub max_lines: Option<usize>,
    pub auto_fit: Option<AutoFit>,
    pub style_rules: Vec<ResolvedStyleRule>,
}

/// A style rule with brand tokens resolved to concrete colors.
#[derive(Debug, Clone)]
pub struct ResolvedStyleRule {
    pub selector: RuleSelector,
    pub match_mode: PatternMode,
    pub color: Option<Color>,
    pub weight: Option<FontWeight>,
    pub size: Option<f32>,
}

#[derive(Debug, Clone)]
pub struct ResolvedImage {
    pub asset: String,
    pub scale_mode: ScaleMode,
}

#[derive(Debug, Clone)]
pub struct ResolvedQr {
    pub payload: String,
    pub size: u32,
    pub margin: u32,
    pub dark: Color,
    pub light: Color,
    pub error_correction: EcLevel,
    pub logo: Option<QrLogo>,
}

#[derive(Debug, Clone)]
pub struct ResolvedTable {
    pub rows: usize,
    pub columns: usize,
    pub cell_width: f32,
    pub cell_height: f32,
    pub border: Option<(Color, f32)>,
    pub background: Option<Color>,
    pub auto_collapse: bool,
    pub cells: Vec<ResolvedCell>,
}

/// A resolved sparse cell. `element: None` means the cell is empty for this
/// record (never declared, hidden, or skipped). Empty cells feed the
/// auto-collapse occupancy computation.
#[derive(Debug, Clone)]
pub struct ResolvedCell {
    pub row: usize,
    pub column: usize,
    pub element: Option<ResolvedElement>,
}

/// Resolver output: elements in composite order, plus recoverable warnings.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub elements: Vec<ResolvedElement>,
    pub warnings: Vec<ResolveWarning>,
}

// ============================================================================
// RESOLUTION
// ============================================================================

/// Resolve every template element against a record.
///
/// Elements come back in composite order (ascending z-index, declaration
/// order on ties), ready for the layout engine.
pub fn resolve(template: &Template, record: &Record) -> Resolution {
    let mut resolver = Resolver {
        template,
        record,
        warnings: Vec::new(),
    };

    let elements = template
        .ordered_elements()
        .into_iter()
        .filter_map(|el| resolver.element(el))
        .collect();

    Resolution {
        elements,
        warnings: resolver.warnings,
    }
}

struct Resolver<'a> {
    template: &'a Template,
    record: &'a Record,
    warnings: Vec<ResolveWarning>,
}

impl Resolver<'_> {
    fn warn(&mut self, element: &str, field: &str, message: impl Into<String>) {
        self.warnings.push(ResolveWarning {
            element: element.to_string(),
            field: field.to_string(),
            message: message.into(),
        });
    }

    fn color(&self, spec: &ColorSpec) -> Color {
        // Validation guarantees brand tokens exist; black is the inert fallback.
        spec.resolve(&self.template.brand_colors)
            .unwrap_or(Color::BLACK)
    }

    fn element(&mut self, element: &Element) -> Option<ResolvedElement> {
        if !element.placement().visible {
            return None;
        }
        match element {
            Element::Text(text) => self.text(text),
            Element::Image(image) => self.image(image),
            Element::Qr(qr) => self.qr(qr),
            Element::Table(table) => self.table(table),
        }
    }

    fn text(&mut self, text: &TextElement) -> Option<ResolvedElement> {
        let content = match &text.field {
            Some(field) => match self.record.text(field) {
                Some(value) => value,
                None => {
                    // Fall back to literal content when present; otherwise
                    // skip the element and keep rendering.
                    self.warn(&text.id, field, "bound field missing from record");
                    text.content.clone()?
                }
            },
            None => text.content.clone()?,
        };

        let style_rules = text
            .style_rules
            .iter()
            .map(|rule| ResolvedStyleRule {
                selector: rule.selector.clone(),
                match_mode: rule.match_mode,
                color: rule.color.as_ref().map(|c| self.color(c)),
                weight: rule.weight,
                size: rule.size,
            })
            .collect();

        Some(ResolvedElement {
            id: text.id.clone(),
            placement: text.placement.clone(),
            kind: ResolvedKind::Text(ResolvedText {
                content,
                font: text.font.clone(),
                color: self.color(&text.color),
                max_width: text.max_width.or(text.placement.width),
                max_lines: text.max_lines,
                auto_fit: text.auto_fit.clone(),
                style_rules,
            }),
        })
    }

    fn image(&mut self, image: &ImageElement) -> Option<ResolvedElement> {
        if let Some(field) = &image.visible_field
            && !self.record.truthy(field)
        {
            // Falsy visibility field hides for this record only.
            return None;
        }

        let mut placement = image.placement.clone();
        if let Some(dynamic) = &image.dynamic_position {
            placement.x = self.dynamic_axis(
                &image.id,
                dynamic.x_formula.as_deref(),
                dynamic.x_field.as_deref(),
                placement.x,
            );
            placement.y = self.dynamic_axis(
                &image.id,
                dynamic.y_formula.as_deref(),
                dynamic.y_field.as_deref(),
                placement.y,
            );
        }

        Some(ResolvedElement {
            id: image.id.clone(),
            placement,
            kind: ResolvedKind::Image(ResolvedImage {
                asset: image.asset.clone(),
                scale_mode: image.scale_mode,
            }),
        })
    }

    /// One axis of a dynamic position: formula wins over field reference;
    /// failures fall back to the static placement with a warning.
    fn dynamic_axis(
        &mut self,
        id: &str,
        formula: Option<&str>,
        field: Option<&str>,
        fallback: f32,
    ) -> f32 {
        if let Some(expr) = formula {
            match eval_formula(expr, self.record) {
                Some(value) => return value as f32,
                None => self.warn(id, expr, "dynamic position formula did not evaluate"),
            }
        }
        if let Some(path) = field {
            match self.record.number(path) {
                Some(value) => return value as f32,
                None => self.warn(id, path, "dynamic position field missing or non-numeric"),
            }
        }
        fallback
    }

    fn qr(&mut self, qr: &QrElement) -> Option<ResolvedElement> {
        let value = match self.record.text(&qr.field) {
            Some(value) => value,
            None => {
                self.warn(&qr.id, &qr.field, "bound field missing from record");
                return None;
            }
        };

        Some(ResolvedElement {
            id: qr.id.clone(),
            placement: qr.placement.clone(),
            kind: ResolvedKind::Qr(ResolvedQr {
                payload: format_payload(qr.payload, &value),
                size: qr.size,
                margin: qr.margin,
                dark: self.color(&qr.dark),
                light: self.color(&qr.light),
                error_correction: qr.error_correction,
                logo: qr.logo.clone(),
            }),
        })
    }

    fn table(&mut self, table: &TableElement) -> Option<ResolvedElement> {
        let mut cells = Vec::with_capacity(table.cells.len());
        for cell in &table.cells {
            let element = cell
                .element
                .as_ref()
                .and_then(|el| self.element(el));
            cells.push(ResolvedCell {
                row: cell.row,
                column: cell.column,
                element,
            });
        }

        Some(ResolvedElement {
            id: table.id.clone(),
            placement: table.placement.clone(),
            kind: ResolvedKind::Table(ResolvedTable {
                rows: table.rows,
                columns: table.columns,
                cell_width: table.cell_width,
                cell_height: table.cell_height,
                border: table
                    .border
                    .as_ref()
                    .map(|b| (self.color(&b.color), b.width)),
                background: table.background.as_ref().map(|c| self.color(c)),
                auto_collapse: table.auto_collapse,
                cells,
            }),
        })
    }
}

/// Format a bound value according to the QR payload kind.
fn format_payload(kind: QrPayloadKind, value: &str) -> String {
    match kind {
        QrPayloadKind::Url | QrPayloadKind::Text => value.to_string(),
        QrPayloadKind::Email => {
            if value.starts_with("mailto:") {
                value.to_string()
            } else {
                format!("mailto:{value}")
            }
        }
        QrPayloadKind::Phone => {
            if value.starts_with("tel:") {
                value.to_string()
            } else {
                format!("tel:{value}")
            }
        }
        QrPayloadKind::Vcard => {
            if value.trim_start().starts_with("BEGIN:VCARD") {
                value.to_string()
            } else {
                format!("BEGIN:VCARD\r\nVERSION:3.0\r\nFN:{value}\r\nEND:VCARD")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn template(elements: &str) -> Template {
        Template::from_json(&format!(
            r#"{{"id": "t", "version": 1, "width": 400, "height": 300,
                 "elements": {elements}}}"#
        ))
        .unwrap()
    }

    fn record(value: Value) -> Record {
        Record::from_value(value)
    }

    #[test]
    fn record_dotted_lookup() {
        let r = record(json!({"user": {"name": "Ada", "vip": true}, "count": 3}));
        assert_eq!(r.text("user.name").as_deref(), Some("Ada"));
        assert_eq!(r.text("count").as_deref(), Some("3"));
        assert_eq!(r.text("user.missing"), None);
        assert!(r.truthy("user.vip"));
        assert!(!r.truthy("user.absent"));
    }

    #[test]
    fn record_truthiness_edges() {
        let r = record(json!({"zero": 0, "empty": "", "no": "false", "yes": "si"}));
        assert!(!r.truthy("zero"));
        assert!(!r.truthy("empty"));
        assert!(!r.truthy("no"));
        assert!(r.truthy("yes"));
    }

    #[test]
    fn bound_text_resolves_from_record() {
        let tpl = template(r#"[{"type": "text", "id": "name", "field": "user.name"}]"#);
        let res = resolve(&tpl, &record(json!({"user": {"name": "Ada"}})));
        assert_eq!(res.elements.len(), 1);
        assert!(res.warnings.is_empty());
        match &res.elements[0].kind {
            ResolvedKind::Text(t) => assert_eq!(t.content, "Ada"),
            other => panic!("expected text, got {other:?}"),
        }
    }

    #[test]
    fn missing_field_skips_element_with_warning() {
        let tpl = template(
            r#"[{"type": "text", "id": "name", "field": "user.name"},
                {"type": "text", "id": "title", "content": "Welcome"}]"#,
        );
        let res = resolve(&tpl, &record(json!({})));
        // The bound element is omitted; the literal one renders.
        assert_eq!(res.elements.len(), 1);
        assert_eq!(res.elements[0].id, "title");
        assert_eq!(res.warnings.len(), 1);
        assert_eq!(res.warnings[0].element, "name");
    }

    #[test]
    fn missing_field_falls_back_to_literal_content() {
        let tpl = template(
            r#"[{"type": "text", "id": "name", "field": "nick", "content": "friend"}]"#,
        );
        let res = resolve(&tpl, &record(json!({})));
        assert_eq!(res.elements.len(), 1);
        match &res.elements[0].kind {
            ResolvedKind::Text(t) => assert_eq!(t.content, "friend"),
            other => panic!("expected text, got {other:?}"),
        }
        assert_eq!(res.warnings.len(), 1);
    }

    #[test]
    fn falsy_visibility_field_hides_image() {
        let tpl = template(
            r#"[{"type": "image", "id": "badge", "asset": "badge.png",
                 "visible_field": "vip"}]"#,
        );

        let shown = resolve(&tpl, &record(json!({"vip": true})));
        assert_eq!(shown.elements.len(), 1);

        let hidden = resolve(&tpl, &record(json!({"vip": false})));
        assert!(hidden.elements.is_empty());
        // Hiding via record value is not a warning.
        assert!(hidden.warnings.is_empty());

        let absent = resolve(&tpl, &record(json!({})));
        assert!(absent.elements.is_empty());
    }

    #[test]
    fn visibility_field_never_overrides_explicit_hide() {
        let tpl = template(
            r#"[{"type": "image", "id": "badge", "asset": "badge.png",
                 "visible": false, "visible_field": "vip"}]"#,
        );
        let res = resolve(&tpl, &record(json!({"vip": true})));
        assert!(res.elements.is_empty());
    }

    #[test]
    fn dynamic_position_from_fields_and_formula() {
        let tpl = template(
            r#"[{"type": "image", "id": "pin", "asset": "pin.png", "x": 1, "y": 2,
                 "dynamic_position": {"x_field": "px", "y_formula": "slot * 40 + 8"}}]"#,
        );
        let res = resolve(&tpl, &record(json!({"px": 120, "slot": 2})));
        let p = &res.elements[0].placement;
        assert_eq!(p.x, 120.0);
        assert_eq!(p.y, 88.0);
    }

    #[test]
    fn dynamic_position_failure_falls_back_to_static() {
        let tpl = template(
            r#"[{"type": "image", "id": "pin", "asset": "pin.png", "x": 7, "y": 9,
                 "dynamic_position": {"x_field": "px"}}]"#,
        );
        let res = resolve(&tpl, &record(json!({})));
        assert_eq!(res.elements[0].placement.x, 7.0);
        assert_eq!(res.warnings.len(), 1);
    }

    #[test]
    fn qr_payload_formatting() {
        assert_eq!(format_payload(QrPayloadKind::Url, "https://x.y"), "https://x.y");
        assert_eq!(format_payload(QrPayloadKind::Email, "a@b.c"), "mailto:a@b.c");
        assert_eq!(format_payload(QrPayloadKind::Phone, "+1555"), "tel:+1555");
        assert!(format_payload(QrPayloadKind::Vcard, "Ada").starts_with("BEGIN:VCARD"));
        assert_eq!(
            format_payload(QrPayloadKind::Vcard, "BEGIN:VCARD\r\nEND:VCARD"),
            "BEGIN:VCARD\r\nEND:VCARD"
        );
    }

    #[test]
    fn qr_missing_field_skipped() {
        let tpl = template(r#"[{"type": "qr", "id": "q", "field": "url", "size": 64}]"#);
        let res = resolve(&tpl, &record(json!({})));
        assert!(res.elements.is_empty());
        assert_eq!(res.warnings.len(), 1);
    }

    #[test]
    fn table_cells_resolve_nested_elements() {
        let tpl = template(
            r#"[{"type": "table", "id": "grid", "rows": 2, "columns": 1,
                 "cell_width": 80, "cell_height": 20,
                 "cells": [
                   {"row": 0, "column": 0,
                    "element": {"type": "text", "id": "c0", "field": "a"}},
                   {"row": 1, "column": 0,
                    "element": {"type": "text", "id": "c1", "field": "b"}}
                 ]}]"#,
        );
        let res = resolve(&tpl, &record(json!({"a": "first"})));
        let ResolvedKind::Table(table) = &res.elements[0].kind else {
            panic!("expected table");
        };
        assert!(table.cells[0].element.is_some());
        // Missing field: the cell resolves empty and a warning is recorded.
        assert!(table.cells[1].element.is_none());
        assert_eq!(res.warnings.len(), 1);
    }

    #[test]
    fn resolution_preserves_composite_order() {
        let tpl = template(
            r#"[{"type": "text", "id": "late", "content": "x", "z_index": 9},
                {"type": "text", "id": "early", "content": "x", "z_index": 0}]"#,
        );
        let res = resolve(&tpl, &Record::default());
        let ids: Vec<&str> = res.elements.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["early", "late"]);
    }
}
