//! Template validation.
//!
//! Runs once at load time; a validated template is immutable for the
//! lifetime of every render job that references it. Failures carry the
//! offending element id and the rule that was violated.

use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use super::types::*;
use super::{Element, Template};
use crate::error::TarjetaError;

static FIELD_PATH: OnceLock<Regex> = OnceLock::new();

/// Dotted data-key path: `name`, `user.email`, `shipping.address.line_1`.
fn field_path_re() -> &'static Regex {
    FIELD_PATH.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$")
            .expect("field path regex is valid")
    })
}

fn fail(element: &str, rule: impl Into<String>) -> TarjetaError {
    TarjetaError::TemplateInvalid {
        element: Some(element.to_string()),
        rule: rule.into(),
    }
}

/// Validate a template against the model invariants.
pub fn validate(template: &Template) -> Result<(), TarjetaError> {
    let mut seen_ids = HashSet::new();
    for element in &template.elements {
        let mut result = Ok(());
        element.for_each(&mut |el| {
            if result.is_ok() {
                result = validate_element(el, &mut seen_ids, &template.brand_colors);
            }
        });
        result?;
    }
    Ok(())
}

fn validate_element(
    element: &Element,
    seen_ids: &mut HashSet<String>,
    brand: &HashMap<String, Color>,
) -> Result<(), TarjetaError> {
    let id = element.id();
    if id.is_empty() {
        return Err(fail(id, "element id must not be empty"));
    }
    if !seen_ids.insert(id.to_string()) {
        return Err(fail(id, "duplicate element id"));
    }

    let placement = element.placement();
    if !(0.0..=1.0).contains(&placement.opacity) {
        return Err(fail(id, format!("opacity {} outside [0, 1]", placement.opacity)));
    }
    if !placement.rotation.is_finite() {
        return Err(fail(id, "rotation must be finite"));
    }

    match element {
        Element::Text(text) => validate_text(text, brand),
        Element::Image(image) => validate_image(image),
        Element::Qr(qr) => validate_qr(qr, brand),
        Element::Table(table) => validate_table(table, brand),
    }
}

fn check_field_path(id: &str, what: &str, path: &str) -> Result<(), TarjetaError> {
    if field_path_re().is_match(path) {
        Ok(())
    } else {
        Err(fail(id, format!("{what} '{path}' is not a valid data-key path")))
    }
}

fn check_color(
    id: &str,
    spec: &ColorSpec,
    brand: &HashMap<String, Color>,
) -> Result<(), TarjetaError> {
    if let ColorSpec::Token(token) = spec
        && !brand.contains_key(token)
    {
        return Err(fail(id, format!("unknown brand color token '${token}'")));
    }
    Ok(())
}

fn validate_text(text: &TextElement, brand: &HashMap<String, Color>) -> Result<(), TarjetaError> {
    let id = &text.id;

    if text.field.is_none() && text.content.is_none() {
        return Err(fail(id, "text element needs a bound field or literal content"));
    }
    if let Some(field) = &text.field {
        check_field_path(id, "field", field)?;
    }
    check_color(id, &text.color, brand)?;

    if text.font.size <= 0.0 {
        return Err(fail(id, format!("font size {} must be positive", text.font.size)));
    }

    if let Some(fit) = &text.auto_fit {
        if fit.min_size <= 0.0 {
            return Err(fail(id, "auto_fit.min_size must be positive"));
        }
        if fit.min_size > fit.max_size {
            return Err(fail(
                id,
                format!(
                    "auto_fit.min_size {} exceeds max_size {}",
                    fit.min_size, fit.max_size
                ),
            ));
        }
    }

    for (i, rule) in text.style_rules.iter().enumerate() {
        if let Some(color) = &rule.color {
            check_color(id, color, brand)?;
        }
        if let Some(size) = rule.size
            && size <= 0.0
        {
            return Err(fail(id, format!("style_rules[{i}] size must be positive")));
        }
        if let RuleSelector::Pattern(pattern) = &rule.selector
            && rule.match_mode == PatternMode::Regex
            && Regex::new(pattern).is_err()
        {
            return Err(fail(id, format!("style_rules[{i}] pattern is not a valid regex")));
        }
    }

    Ok(())
}

fn validate_image(image: &ImageElement) -> Result<(), TarjetaError> {
    let id = &image.id;
    if image.asset.is_empty() {
        return Err(fail(id, "image element needs an asset reference"));
    }
    if let Some(field) = &image.visible_field {
        check_field_path(id, "visible_field", field)?;
    }
    if let Some(dynamic) = &image.dynamic_position {
        if let Some(f) = &dynamic.x_field {
            check_field_path(id, "dynamic_position.x_field", f)?;
        }
        if let Some(f) = &dynamic.y_field {
            check_field_path(id, "dynamic_position.y_field", f)?;
        }
    }
    Ok(())
}

fn validate_qr(qr: &QrElement, brand: &HashMap<String, Color>) -> Result<(), TarjetaError> {
    let id = &qr.id;
    check_field_path(id, "field", &qr.field)?;
    check_color(id, &qr.dark, brand)?;
    check_color(id, &qr.light, brand)?;
    if qr.size == 0 {
        return Err(fail(id, "qr size must be positive"));
    }
    if let Some(logo) = &qr.logo {
        if logo.asset.is_empty() {
            return Err(fail(id, "qr logo needs an asset reference"));
        }
        if logo.size == 0 || logo.size >= qr.size {
            return Err(fail(id, "qr logo size must be positive and smaller than the code"));
        }
    }
    Ok(())
}

fn validate_table(
    table: &TableElement,
    brand: &HashMap<String, Color>,
) -> Result<(), TarjetaError> {
    let id = &table.id;
    if table.rows == 0 || table.columns == 0 {
        return Err(fail(id, "table needs at least one row and one column"));
    }
    if table.cell_width <= 0.0 || table.cell_height <= 0.0 {
        return Err(fail(id, "table cell dimensions must be positive"));
    }
    if let Some(border) = &table.border {
        check_color(id, &border.color, brand)?;
    }
    if let Some(background) = &table.background {
        check_color(id, background, brand)?;
    }

    let mut seen_cells = HashSet::new();
    for cell in &table.cells {
        if cell.row >= table.rows || cell.column >= table.columns {
            return Err(fail(
                id,
                format!(
                    "cell ({}, {}) outside {}x{} grid",
                    cell.row, cell.column, table.rows, table.columns
                ),
            ));
        }
        if !seen_cells.insert((cell.row, cell.column)) {
            return Err(fail(
                id,
                format!("duplicate cell address ({}, {})", cell.row, cell.column),
            ));
        }
    }
    Ok(())
}
