//! # Layout Engine
//!
//! Computes final pixel-space geometry for resolved elements: auto-fit text
//! sizing, per-word style segmentation, table collapse, and absolute
//! positioning. Output is an ordered list of [`LaidOutElement`]s, ready
//! for rasterization; list order is composite order.
//!
//! Layout is pure: it depends on the raster layer only through
//! [`TextShaper`] measurement, shares no mutable state, and is
//! deterministic for a given resolution.

mod table;
mod text;

pub use table::{CollapsedGrid, collapse};
pub use text::{TextLayout, TextLine, TextSpan, layout_text};

use crate::render::backend::TextShaper;
use crate::resolve::{ResolvedElement, ResolvedKind, ResolvedQr, ResolvedTable, Resolution};
use crate::template::{Color, ScaleMode};

/// An element with final geometry, ready for the compositor.
#[derive(Debug, Clone)]
pub struct LaidOutElement {
    pub id: String,
    /// Absolute position of the element box (pixels, template space,
    /// or parent-group space for grouped children).
    pub x: f32,
    pub y: f32,
    /// Element box extent. Zero for images without an explicit box
    /// (the compositor falls back to the asset's intrinsic size).
    pub width: f32,
    pub height: f32,
    /// Degrees clockwise around the box center.
    pub rotation: f32,
    pub opacity: f32,
    pub kind: LaidOutKind,
}

/// Rasterizable payloads. Tables flatten into a [`LaidOutKind::Group`] of
/// chrome rectangles and positioned cell elements so rotation and opacity
/// apply to the table as one unit.
#[derive(Debug, Clone)]
pub enum LaidOutKind {
    Text(TextLayout),
    Image {
        asset: String,
        scale_mode: ScaleMode,
    },
    Qr(ResolvedQr),
    Rect {
        fill: Option<Color>,
        stroke: Option<(Color, f32)>,
    },
    Group(Vec<LaidOutElement>),
}

/// Lay out every resolved element. Input order (composite order) is
/// preserved in the output.
pub fn layout(shaper: &dyn TextShaper, resolution: &Resolution) -> Vec<LaidOutElement> {
    resolution
        .elements
        .iter()
        .filter_map(|el| layout_element(shaper, el))
        .collect()
}

fn layout_element(shaper: &dyn TextShaper, element: &ResolvedElement) -> Option<LaidOutElement> {
    let placement = &element.placement;
    match &element.kind {
        ResolvedKind::Text(text) => {
            let layout = layout_text(shaper, text);
            if layout.lines.is_empty() {
                return None;
            }
            let (width, height) = (layout.width, layout.height);
            Some(LaidOutElement {
                id: element.id.clone(),
                x: placement.x,
                y: placement.y,
                width,
                height,
                rotation: placement.rotation,
                opacity: placement.opacity,
                kind: LaidOutKind::Text(layout),
            })
        }
        ResolvedKind::Image(image) => Some(LaidOutElement {
            id: element.id.clone(),
            x: placement.x,
            y: placement.y,
            width: placement.width.unwrap_or(0.0),
            height: placement.height.unwrap_or(0.0),
            rotation: placement.rotation,
            opacity: placement.opacity,
            kind: LaidOutKind::Image {
                asset: image.asset.clone(),
                scale_mode: image.scale_mode,
            },
        }),
        ResolvedKind::Qr(qr) => Some(LaidOutElement {
            id: element.id.clone(),
            x: placement.x,
            y: placement.y,
            width: qr.size as f32,
            height: qr.size as f32,
            rotation: placement.rotation,
            opacity: placement.opacity,
            kind: LaidOutKind::Qr(qr.clone()),
        }),
        ResolvedKind::Table(table) => layout_table(shaper, element, table),
    }
}

/// Flatten a table into a group: background, positioned cell elements,
/// border grid. Collapse runs first so dropped rows/columns never receive
/// geometry.
fn layout_table(
    shaper: &dyn TextShaper,
    element: &ResolvedElement,
    table: &ResolvedTable,
) -> Option<LaidOutElement> {
    let grid = collapse(table);
    if grid.rows == 0 || grid.columns == 0 {
        return None;
    }

    let width = grid.columns as f32 * table.cell_width;
    let height = grid.rows as f32 * table.cell_height;
    let mut children = Vec::new();

    if let Some(background) = table.background {
        children.push(LaidOutElement {
            id: format!("{}.background", element.id),
            x: 0.0,
            y: 0.0,
            width,
            height,
            rotation: 0.0,
            opacity: 1.0,
            kind: LaidOutKind::Rect {
                fill: Some(background),
                stroke: None,
            },
        });
    }

    for cell in &table.cells {
        let Some(nested) = &cell.element else {
            continue;
        };
        let Some((row, column)) = grid.remap(cell.row, cell.column) else {
            continue;
        };
        let Some(mut laid) = layout_element(shaper, nested) else {
            continue;
        };
        // Nested placement is relative to the (post-collapse) cell origin.
        laid.x += column as f32 * table.cell_width;
        laid.y += row as f32 * table.cell_height;
        children.push(laid);
    }

    if let Some((color, stroke_width)) = table.border {
        // Interior grid lines, then the outer frame on top.
        for column in 1..grid.columns {
            children.push(grid_line(
                element.id.as_str(),
                format!("v{column}"),
                column as f32 * table.cell_width - stroke_width / 2.0,
                0.0,
                stroke_width,
                height,
                color,
            ));
        }
        for row in 1..grid.rows {
            children.push(grid_line(
                element.id.as_str(),
                format!("h{row}"),
                0.0,
                row as f32 * table.cell_height - stroke_width / 2.0,
                width,
                stroke_width,
                color,
            ));
        }
        children.push(LaidOutElement {
            id: format!("{}.frame", element.id),
            x: 0.0,
            y: 0.0,
            width,
            height,
            rotation: 0.0,
            opacity: 1.0,
            kind: LaidOutKind::Rect {
                fill: None,
                stroke: Some((color, stroke_width)),
            },
        });
    }

    let placement = &element.placement;
    Some(LaidOutElement {
        id: element.id.clone(),
        x: placement.x,
        y: placement.y,
        width,
        height,
        rotation: placement.rotation,
        opacity: placement.opacity,
        kind: LaidOutKind::Group(children),
    })
}

fn grid_line(
    table_id: &str,
    suffix: String,
    x: f32,
    y: f32,
    width: f32,
    height: f32,
    color: Color,
) -> LaidOutElement {
    LaidOutElement {
        id: format!("{table_id}.grid.{suffix}"),
        x,
        y,
        width,
        height,
        rotation: 0.0,
        opacity: 1.0,
        kind: LaidOutKind::Rect {
            fill: Some(color),
            stroke: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backend::{TextMetrics, TextStyle};
    use crate::resolve::resolve;
    use crate::resolve::Record;
    use crate::template::Template;
    use serde_json::json;

    struct FixedShaper;

    impl TextShaper for FixedShaper {
        fn measure_text(&self, text: &str, style: &TextStyle) -> TextMetrics {
            TextMetrics {
                width: text.chars().count() as f32 * style.size * 0.5,
                height: style.size * 1.2,
                ascent: style.size,
            }
        }
    }

    fn laid_out(template_json: &str, record: serde_json::Value) -> Vec<LaidOutElement> {
        let tpl = Template::from_json(template_json).unwrap();
        let resolution = resolve(&tpl, &Record::from_value(record));
        layout(&FixedShaper, &resolution)
    }

    #[test]
    fn collapsed_table_geometry_remaps_cells() {
        // 3x3 grid, row 2 and column 1 empty for this record → 2x2.
        let elements = laid_out(
            r#"{"id": "t", "version": 1, "width": 800, "height": 600, "elements": [
                {"type": "table", "id": "grid", "x": 10, "y": 20,
                 "rows": 3, "columns": 3, "cell_width": 100, "cell_height": 40,
                 "auto_collapse": true,
                 "cells": [
                   {"row": 0, "column": 0, "element": {"type": "text", "id": "a", "field": "a"}},
                   {"row": 0, "column": 2, "element": {"type": "text", "id": "b", "field": "b"}},
                   {"row": 1, "column": 0, "element": {"type": "text", "id": "c", "field": "c"}},
                   {"row": 1, "column": 2, "element": {"type": "text", "id": "d", "field": "d"}}
                 ]}
            ]}"#,
            json!({"a": "A", "b": "B", "c": "C", "d": "D"}),
        );

        assert_eq!(elements.len(), 1);
        let table = &elements[0];
        assert_eq!((table.x, table.y), (10.0, 20.0));
        assert_eq!((table.width, table.height), (200.0, 80.0));

        let LaidOutKind::Group(children) = &table.kind else {
            panic!("expected group");
        };
        // Cell (0,2) remaps to collapsed column 1 → x = 100.
        let b = children.iter().find(|c| c.id == "b").unwrap();
        assert_eq!((b.x, b.y), (100.0, 0.0));
        let d = children.iter().find(|c| c.id == "d").unwrap();
        assert_eq!((d.x, d.y), (100.0, 40.0));
    }

    #[test]
    fn collapsed_geometry_is_idempotent() {
        let json = r#"{"id": "t", "version": 1, "width": 800, "height": 600, "elements": [
            {"type": "table", "id": "grid", "rows": 3, "columns": 3,
             "cell_width": 100, "cell_height": 40, "auto_collapse": true,
             "cells": [
               {"row": 0, "column": 0, "element": {"type": "text", "id": "a", "field": "a"}},
               {"row": 2, "column": 2, "element": {"type": "text", "id": "b", "field": "b"}}
             ]}
        ]}"#;
        let record = json!({"a": "A", "b": "B"});
        let first = laid_out(json, record.clone());
        let second = laid_out(json, record);

        let positions = |elements: &[LaidOutElement]| -> Vec<(f32, f32)> {
            let LaidOutKind::Group(children) = &elements[0].kind else {
                panic!("expected group");
            };
            children.iter().map(|c| (c.x, c.y)).collect()
        };
        assert_eq!(positions(&first), positions(&second));
    }

    #[test]
    fn fully_empty_collapsed_table_is_omitted() {
        let elements = laid_out(
            r#"{"id": "t", "version": 1, "width": 800, "height": 600, "elements": [
                {"type": "table", "id": "grid", "rows": 2, "columns": 2,
                 "cell_width": 100, "cell_height": 40, "auto_collapse": true,
                 "cells": [{"row": 0, "column": 0,
                            "element": {"type": "text", "id": "a", "field": "missing"}}]}
            ]}"#,
            json!({}),
        );
        assert!(elements.is_empty());
    }

    #[test]
    fn border_emits_grid_lines_and_frame() {
        let elements = laid_out(
            r##"{"id": "t", "version": 1, "width": 800, "height": 600, "elements": [
                {"type": "table", "id": "grid", "rows": 2, "columns": 2,
                 "cell_width": 100, "cell_height": 40,
                 "border": {"color": "#000000", "width": 2},
                 "cells": []}
            ]}"##,
            json!({}),
        );
        let LaidOutKind::Group(children) = &elements[0].kind else {
            panic!("expected group");
        };
        // One vertical line, one horizontal line, one frame.
        assert_eq!(children.len(), 3);
        assert!(children.iter().any(|c| c.id == "grid.frame"));
    }

    #[test]
    fn qr_box_comes_from_size() {
        let elements = laid_out(
            r#"{"id": "t", "version": 1, "width": 800, "height": 600, "elements": [
                {"type": "qr", "id": "q", "field": "url", "size": 128, "x": 5, "y": 6}
            ]}"#,
            json!({"url": "https://example.com"}),
        );
        assert_eq!(elements[0].width, 128.0);
        assert_eq!(elements[0].height, 128.0);
    }
}
