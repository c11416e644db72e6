//! Structural formula rewriting.
//!
//! When rows or columns are inserted or deleted, or a formula is copied
//! to a new location, every reference in it must be rewritten. A
//! reference whose target is destroyed is replaced with a
//! `REFERROR("<original text>")` marker, which evaluates to `#REF!` but
//! keeps the original text visible to the user.

use crate::coord::{Axis, CellCoord};
use crate::range::{Range, RangeKey};
use crate::reference::{CellRef, ColRef, RowRef};

use super::parser::{format_expr_inner, Expr};

/// A structural change applied to references.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefEdit {
    /// `count` tracks inserted before index `at`; refs at or past `at`
    /// shift away regardless of kind.
    Insert { axis: Axis, at: u32, count: u32 },
    /// `count` tracks removed starting at index `at`; refs inside the
    /// span die, refs past it shift back.
    Delete { axis: Axis, at: u32, count: u32 },
    /// Relocation of a formula (copy/fill). Relative components move by
    /// the delta, clamped at the grid edge; absolute components stay
    /// pinned. Never invalidates.
    Translate { d_col: i64, d_row: i64 },
}

/// Result of rewriting one expression.
#[derive(Debug, Clone)]
pub struct RewriteOutcome {
    pub expr: Expr,
    /// Any reference moved or was invalidated.
    pub changed: bool,
    /// At least one reference was replaced with a REFERROR marker.
    pub invalidated: bool,
}

/// Rewrite all references in an expression for a structural edit.
pub fn rewrite_expr(expr: &Expr, edit: &RefEdit) -> RewriteOutcome {
    let mut changed = false;
    let mut invalidated = false;
    let expr = rewrite_node(expr, edit, &mut changed, &mut invalidated);
    RewriteOutcome {
        expr,
        changed,
        invalidated,
    }
}

fn rewrite_node(expr: &Expr, edit: &RefEdit, changed: &mut bool, invalidated: &mut bool) -> Expr {
    match expr {
        Expr::Number(_) | Expr::Text(_) | Expr::Boolean(_) | Expr::Label(_) | Expr::Empty => {
            expr.clone()
        }
        Expr::Ref(cell) => match rewrite_cell_ref(*cell, edit) {
            Some(new_cell) => {
                if new_cell != *cell {
                    *changed = true;
                }
                Expr::Ref(new_cell)
            }
            None => {
                *changed = true;
                *invalidated = true;
                marker(expr)
            }
        },
        Expr::Range(range) => match rewrite_range(range, edit) {
            Some(new_range) => {
                if new_range != *range {
                    *changed = true;
                }
                Expr::Range(new_range)
            }
            None => {
                *changed = true;
                *invalidated = true;
                marker(expr)
            }
        },
        Expr::Function { name, args } => Expr::Function {
            name: name.clone(),
            args: args
                .iter()
                .map(|a| rewrite_node(a, edit, changed, invalidated))
                .collect(),
        },
        Expr::Unary { op, operand } => Expr::Unary {
            op: *op,
            operand: Box::new(rewrite_node(operand, edit, changed, invalidated)),
        },
        Expr::Binary { op, left, right } => Expr::Binary {
            op: *op,
            left: Box::new(rewrite_node(left, edit, changed, invalidated)),
            right: Box::new(rewrite_node(right, edit, changed, invalidated)),
        },
        Expr::Group(inner) => Expr::Group(Box::new(rewrite_node(inner, edit, changed, invalidated))),
    }
}

/// Invalid-reference marker carrying the original text.
fn marker(original: &Expr) -> Expr {
    Expr::Function {
        name: "REFERROR".to_string(),
        args: vec![Expr::Text(format_expr_inner(original))],
    }
}

fn rewrite_cell_ref(cell: CellRef, edit: &RefEdit) -> Option<CellRef> {
    match edit {
        RefEdit::Insert { axis, at, count } => match axis {
            Axis::Column => Some(CellRef::new(
                shift_col_insert(cell.col, *at, *count)?,
                cell.row,
            )),
            Axis::Row => Some(CellRef::new(
                cell.col,
                shift_row_insert(cell.row, *at, *count)?,
            )),
        },
        RefEdit::Delete { axis, at, count } => match axis {
            Axis::Column => Some(CellRef::new(
                shift_col_delete(cell.col, *at, *count)?,
                cell.row,
            )),
            Axis::Row => Some(CellRef::new(
                cell.col,
                shift_row_delete(cell.row, *at, *count)?,
            )),
        },
        RefEdit::Translate { d_col, d_row } => Some(cell.translate(*d_col, *d_row)),
    }
}

fn rewrite_range(range: &Range, edit: &RefEdit) -> Option<Range> {
    match edit {
        RefEdit::Insert { axis: Axis::Column, at, count } => Some(Range::from_axes(
            (
                shift_col_insert(range.begin().col, *at, *count)?,
                shift_col_insert(range.end().col, *at, *count)?,
            ),
            (range.begin().row, range.end().row),
        )),
        RefEdit::Insert { axis: Axis::Row, at, count } => Some(Range::from_axes(
            (range.begin().col, range.end().col),
            (
                shift_row_insert(range.begin().row, *at, *count)?,
                shift_row_insert(range.end().row, *at, *count)?,
            ),
        )),
        RefEdit::Delete { axis: Axis::Column, at, count } => {
            let (b, e) =
                span_after_delete(range.begin().col.index, range.end().col.index, *at, *count)?;
            Some(Range::from_axes(
                (
                    ColRef::new(b, range.begin().col.kind).ok()?,
                    ColRef::new(e, range.end().col.kind).ok()?,
                ),
                (range.begin().row, range.end().row),
            ))
        }
        RefEdit::Delete { axis: Axis::Row, at, count } => {
            let (b, e) =
                span_after_delete(range.begin().row.index, range.end().row.index, *at, *count)?;
            Some(Range::from_axes(
                (range.begin().col, range.end().col),
                (
                    RowRef::new(b, range.begin().row.kind).ok()?,
                    RowRef::new(e, range.end().row.kind).ok()?,
                ),
            ))
        }
        RefEdit::Translate { .. } => {
            let begin = rewrite_cell_ref(range.begin(), edit)?;
            let end = rewrite_cell_ref(range.end(), edit)?;
            Some(Range::new(begin, end))
        }
    }
}

fn shift_col_insert(c: ColRef, at: u32, count: u32) -> Option<ColRef> {
    if c.index < at {
        Some(c)
    } else {
        c.add(count as i64).ok()
    }
}

fn shift_col_delete(c: ColRef, at: u32, count: u32) -> Option<ColRef> {
    if c.index < at {
        Some(c)
    } else if c.index < at + count {
        None // destroyed
    } else {
        c.add(-(count as i64)).ok()
    }
}

fn shift_row_insert(r: RowRef, at: u32, count: u32) -> Option<RowRef> {
    if r.index < at {
        Some(r)
    } else {
        r.add(count as i64).ok()
    }
}

fn shift_row_delete(r: RowRef, at: u32, count: u32) -> Option<RowRef> {
    if r.index < at {
        Some(r)
    } else if r.index < at + count {
        None
    } else {
        r.add(-(count as i64)).ok()
    }
}

/// Shrink a one-axis span `[b, e]` for a deletion of `count` indices
/// starting at `at`. `None` means the whole span was deleted.
fn span_after_delete(b: u32, e: u32, at: u32, count: u32) -> Option<(u32, u32)> {
    let deleted_end = at + count; // exclusive
    if e < at {
        Some((b, e))
    } else if b >= deleted_end {
        Some((b - count, e - count))
    } else if b >= at && e < deleted_end {
        None
    } else {
        // Partial overlap: the span shrinks but survives.
        let new_b = if b < at { b } else { at };
        let new_e = if e >= deleted_end { e - count } else { at - 1 };
        Some((new_b, new_e))
    }
}

// =============================================================================
// Coordinate remapping (cell store and label targets)
// =============================================================================

/// Remap a stored coordinate for a structural edit. `None` means the
/// cell at that coordinate is destroyed (or shifted out of bounds).
pub fn rewrite_coord(coord: CellCoord, edit: &RefEdit) -> Option<CellCoord> {
    let cell = rewrite_cell_ref(CellRef::at(coord), edit)?;
    Some(cell.coord())
}

/// Remap a kind-less range key. `None` means the range was wholly
/// destroyed.
pub fn rewrite_range_key(key: RangeKey, edit: &RefEdit) -> Option<RangeKey> {
    let range = Range::new(CellRef::at(key.begin), CellRef::at(key.end));
    rewrite_range(&range, edit).map(|r| r.key())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::parser::{format_expr, parse};
    use proptest::prelude::*;

    fn apply(formula: &str, edit: RefEdit) -> (String, bool, bool) {
        let outcome = rewrite_expr(&parse(formula).unwrap(), &edit);
        (
            format_expr(&outcome.expr),
            outcome.changed,
            outcome.invalidated,
        )
    }

    fn insert_rows(at: u32, count: u32) -> RefEdit {
        RefEdit::Insert { axis: Axis::Row, at, count }
    }

    fn delete_rows(at: u32, count: u32) -> RefEdit {
        RefEdit::Delete { axis: Axis::Row, at, count }
    }

    fn delete_cols(at: u32, count: u32) -> RefEdit {
        RefEdit::Delete { axis: Axis::Column, at, count }
    }

    #[test]
    fn test_insert_rows_shifts_refs_below() {
        // Insert 2 rows before row 3 (0-based index 2)
        let (text, changed, invalidated) = apply("=A1+A5", insert_rows(2, 2));
        assert_eq!(text, "=A1+A7");
        assert!(changed);
        assert!(!invalidated);
    }

    #[test]
    fn test_insert_shifts_absolute_refs_too() {
        let (text, _, _) = apply("=$A$5", insert_rows(0, 1));
        assert_eq!(text, "=$A$6");
    }

    #[test]
    fn test_insert_above_leaves_refs_alone() {
        let (text, changed, _) = apply("=A1", insert_rows(5, 3));
        assert_eq!(text, "=A1");
        assert!(!changed);
    }

    #[test]
    fn test_delete_rows_shifts_refs_below() {
        let (text, _, invalidated) = apply("=A10", delete_rows(2, 3));
        assert_eq!(text, "=A7");
        assert!(!invalidated);
    }

    #[test]
    fn test_delete_destroys_target_leaves_marker() {
        let (text, changed, invalidated) = apply("=A3*2", delete_rows(2, 1));
        assert_eq!(text, "=REFERROR(\"A3\")*2");
        assert!(changed);
        assert!(invalidated);
    }

    #[test]
    fn test_marker_keeps_dollar_markers_in_original_text() {
        let (text, _, _) = apply("=$A$3", delete_rows(2, 1));
        assert_eq!(text, "=REFERROR(\"$A$3\")");
    }

    #[test]
    fn test_range_shrinks_on_partial_delete() {
        // Deleting rows 2..4 (indices 1..3) overlaps A1:A10's interior
        let (text, _, invalidated) = apply("=SUM(A1:A10)", delete_rows(1, 2));
        assert_eq!(text, "=SUM(A1:A8)");
        assert!(!invalidated);
    }

    #[test]
    fn test_range_head_overlap() {
        // Delete rows 1-2; B1:B5 loses its top, survivors shift up
        let (text, _, _) = apply("=SUM(B1:B5)", delete_rows(0, 2));
        assert_eq!(text, "=SUM(B1:B3)");
    }

    #[test]
    fn test_range_tail_overlap() {
        // Delete rows 4-10; A2:A5 keeps rows 2-3
        let (text, _, _) = apply("=SUM(A2:A5)", delete_rows(3, 7));
        assert_eq!(text, "=SUM(A2:A3)");
    }

    #[test]
    fn test_range_fully_deleted_leaves_marker() {
        let (text, _, invalidated) = apply("=SUM(A3:A4)", delete_rows(2, 2));
        assert_eq!(text, "=SUM(REFERROR(\"A3:A4\"))");
        assert!(invalidated);
    }

    #[test]
    fn test_delete_columns() {
        let (text, _, _) = apply("=C1+D1", delete_cols(0, 1));
        assert_eq!(text, "=B1+C1");
        let (text, _, invalidated) = apply("=A1", delete_cols(0, 1));
        assert_eq!(text, "=REFERROR(\"A1\")");
        assert!(invalidated);
    }

    #[test]
    fn test_translate_moves_relative_pins_absolute() {
        let edit = RefEdit::Translate { d_col: 1, d_row: 2 };
        let (text, _, _) = apply("=A1+$B$2+$C3+D$4", edit);
        assert_eq!(text, "=B3+$B$2+$C5+E$4");
    }

    #[test]
    fn test_translate_clamps_at_grid_edge() {
        let edit = RefEdit::Translate { d_col: -1, d_row: 0 };
        let (text, changed, invalidated) = apply("=A1", edit);
        assert_eq!(text, "=A1");
        assert!(!changed);
        assert!(!invalidated);

        // Clamping one axis does not stop the other from moving.
        let edit = RefEdit::Translate { d_col: -5, d_row: 2 };
        let (text, changed, invalidated) = apply("=B1", edit);
        assert_eq!(text, "=A3");
        assert!(changed);
        assert!(!invalidated);
    }

    #[test]
    fn test_translate_range() {
        let edit = RefEdit::Translate { d_col: 0, d_row: 3 };
        let (text, _, _) = apply("=SUM(A1:B2)", edit);
        assert_eq!(text, "=SUM(A4:B5)");
    }

    #[test]
    fn test_labels_are_untouched() {
        let (text, changed, _) = apply("=Revenue*2", delete_rows(0, 5));
        assert_eq!(text, "=Revenue*2");
        assert!(!changed);
    }

    #[test]
    fn test_rewrite_coord() {
        let coord = CellCoord::parse("B5").unwrap();
        assert_eq!(
            rewrite_coord(coord, &insert_rows(2, 2)),
            Some(CellCoord::parse("B7").unwrap())
        );
        assert_eq!(rewrite_coord(coord, &delete_rows(4, 1)), None);
    }

    #[test]
    fn test_rewrite_range_key() {
        let key = Range::parse("A2:A5").unwrap().key();
        let shrunk = rewrite_range_key(key, &delete_rows(1, 2)).unwrap();
        assert_eq!(shrunk, Range::parse("A2:A3").unwrap().key());
        assert_eq!(rewrite_range_key(key, &delete_rows(0, 10)), None);
    }

    proptest! {
        /// Inserting then deleting the same span restores the formula.
        #[test]
        fn prop_insert_then_delete_roundtrips(
            row in 0u32..500,
            col in 0u32..26,
            at in 0u32..500,
            count in 1u32..10,
        ) {
            let formula = format!(
                "={}{}",
                crate::coord::col_to_letters(col),
                row + 1
            );
            let expr = parse(&formula).unwrap();
            let inserted = rewrite_expr(&expr, &RefEdit::Insert {
                axis: Axis::Row, at, count,
            });
            prop_assert!(!inserted.invalidated);
            let restored = rewrite_expr(&inserted.expr, &RefEdit::Delete {
                axis: Axis::Row, at, count,
            });
            prop_assert_eq!(format_expr(&restored.expr), formula);
        }

        /// A reference strictly outside a deleted span never turns into
        /// a marker, and one inside always does.
        #[test]
        fn prop_delete_invalidates_exactly_the_span(
            row in 0u32..500,
            at in 0u32..500,
            count in 1u32..10,
        ) {
            let formula = format!("=A{}", row + 1);
            let outcome = rewrite_expr(&parse(&formula).unwrap(), &RefEdit::Delete {
                axis: Axis::Row, at, count,
            });
            let in_span = row >= at && row < at + count;
            prop_assert_eq!(outcome.invalidated, in_span);
        }
    }
}
