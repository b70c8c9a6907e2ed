//! Table auto-collapse: contract the grid before positions are assigned.

use crate::resolve::{ResolvedElement, ResolvedKind, ResolvedTable};

/// Mapping from the declared grid to the post-collapse grid.
///
/// `row_map[r]` / `col_map[c]` give the new index of a surviving row or
/// column, `None` for dropped ones.
#[derive(Debug, Clone, PartialEq)]
pub struct CollapsedGrid {
    pub row_map: Vec<Option<usize>>,
    pub col_map: Vec<Option<usize>>,
    pub rows: usize,
    pub columns: usize,
}

impl CollapsedGrid {
    /// Identity mapping (collapse disabled).
    fn identity(rows: usize, columns: usize) -> Self {
        Self {
            row_map: (0..rows).map(Some).collect(),
            col_map: (0..columns).map(Some).collect(),
            rows,
            columns,
        }
    }

    /// Remap a declared cell address to the collapsed grid.
    pub fn remap(&self, row: usize, column: usize) -> Option<(usize, usize)> {
        Some((*self.row_map.get(row)?.as_ref()?, *self.col_map.get(column)?.as_ref()?))
    }
}

/// Compute per-row and per-column occupancy from the resolved cells and
/// drop entirely empty rows/columns. Deterministic for a given resolution,
/// so rendering the same record twice yields identical collapsed geometry.
pub fn collapse(table: &ResolvedTable) -> CollapsedGrid {
    if !table.auto_collapse {
        return CollapsedGrid::identity(table.rows, table.columns);
    }

    let mut row_occupied = vec![false; table.rows];
    let mut col_occupied = vec![false; table.columns];
    for cell in &table.cells {
        if cell.element.as_ref().is_some_and(|el| !is_blank(el)) {
            row_occupied[cell.row] = true;
            col_occupied[cell.column] = true;
        }
    }

    let (row_map, rows) = build_map(&row_occupied);
    let (col_map, columns) = build_map(&col_occupied);
    CollapsedGrid {
        row_map,
        col_map,
        rows,
        columns,
    }
}

fn build_map(occupied: &[bool]) -> (Vec<Option<usize>>, usize) {
    let mut next = 0usize;
    let map = occupied
        .iter()
        .map(|&used| {
            if used {
                next += 1;
                Some(next - 1)
            } else {
                None
            }
        })
        .collect();
    (map, next)
}

/// Whether a resolved element renders as visually empty for this record.
fn is_blank(element: &ResolvedElement) -> bool {
    match &element.kind {
        ResolvedKind::Text(text) => text.content.trim().is_empty(),
        ResolvedKind::Image(_) | ResolvedKind::Qr(_) => false,
        ResolvedKind::Table(table) => table
            .cells
            .iter()
            .all(|cell| cell.element.as_ref().is_none_or(is_blank)),
    }
}
