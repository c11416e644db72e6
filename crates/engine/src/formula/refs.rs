//! Reference extraction from formula AST.
//!
//! Extracts the set of dependency targets a formula reads: individual
//! cells, ranges, and labels. Labels are kept symbolic here; the
//! dependency index resolves them when computing referrers, so a
//! formula keeps tracking a label even when its definition changes.

use rustc_hash::FxHashSet;

use crate::coord::CellCoord;
use crate::range::RangeKey;

use super::parser::Expr;

/// One dependency edge target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RefTarget {
    Cell(CellCoord),
    /// Label name, lowercased for identity.
    Label(String),
    Range(RangeKey),
}

/// Extract the deduplicated dependency targets of an expression.
pub fn extract_refs(expr: &Expr) -> FxHashSet<RefTarget> {
    let mut refs = FxHashSet::default();
    collect_refs(expr, &mut refs);
    refs
}

fn collect_refs(expr: &Expr, refs: &mut FxHashSet<RefTarget>) {
    match expr {
        Expr::Number(_) | Expr::Text(_) | Expr::Boolean(_) | Expr::Empty => {}
        Expr::Ref(cell) => {
            refs.insert(RefTarget::Cell(cell.coord()));
        }
        Expr::Range(range) => {
            refs.insert(RefTarget::Range(range.key()));
        }
        Expr::Label(name) => {
            refs.insert(RefTarget::Label(name.to_lowercase()));
        }
        Expr::Function { args, .. } => {
            for arg in args {
                collect_refs(arg, refs);
            }
        }
        Expr::Unary { operand, .. } => collect_refs(operand, refs),
        Expr::Binary { left, right, .. } => {
            collect_refs(left, refs);
            collect_refs(right, refs);
        }
        Expr::Group(inner) => collect_refs(inner, refs),
    }
}
