//! Column, row and cell references with absolute/relative kinds.
//!
//! The kind matters for formula round-tripping (`$A$1` vs `A1`) and for
//! translate-style rewrites (copy/fill pins absolute components), but never
//! for identity: the store and the dependency index key on the kind-less
//! [`CellCoord`] projection.

use serde::{Deserialize, Serialize};

use crate::coord::{col_to_letters, letters_to_col, Axis, CellCoord};
use crate::error::ValidationError;

/// Whether a reference component is pinned (`$A`) or moves with copy/fill.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RefKind {
    #[default]
    Relative,
    Absolute,
}

impl RefKind {
    fn marker(self) -> &'static str {
        match self {
            RefKind::Relative => "",
            RefKind::Absolute => "$",
        }
    }
}

/// A column position in `[0, MAX_COLS)` plus its kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColRef {
    pub index: u32,
    pub kind: RefKind,
}

/// A row position in `[0, MAX_ROWS)` plus its kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RowRef {
    pub index: u32,
    pub kind: RefKind,
}

impl ColRef {
    pub fn new(index: u32, kind: RefKind) -> Result<Self, ValidationError> {
        check_axis(Axis::Column, index)?;
        Ok(Self { index, kind })
    }

    pub fn relative(index: u32) -> Result<Self, ValidationError> {
        Self::new(index, RefKind::Relative)
    }

    pub fn absolute(index: u32) -> Result<Self, ValidationError> {
        Self::new(index, RefKind::Absolute)
    }

    /// Shift by `delta`, failing if the result leaves `[0, MAX_COLS)`.
    /// Preserves kind.
    pub fn add(self, delta: i64) -> Result<Self, ValidationError> {
        let moved = add_checked(Axis::Column, self.index, delta)?;
        Ok(Self {
            index: moved,
            kind: self.kind,
        })
    }

    /// Shift by `delta`, clamping to `[0, MAX_COLS)`. Never fails.
    /// Preserves kind. Used by translate-style edits.
    pub fn add_saturating(self, delta: i64) -> Self {
        Self {
            index: add_saturating(Axis::Column, self.index, delta),
            kind: self.kind,
        }
    }
}

impl RowRef {
    pub fn new(index: u32, kind: RefKind) -> Result<Self, ValidationError> {
        check_axis(Axis::Row, index)?;
        Ok(Self { index, kind })
    }

    pub fn relative(index: u32) -> Result<Self, ValidationError> {
        Self::new(index, RefKind::Relative)
    }

    pub fn absolute(index: u32) -> Result<Self, ValidationError> {
        Self::new(index, RefKind::Absolute)
    }

    /// Shift by `delta`, failing if the result leaves `[0, MAX_ROWS)`.
    /// Preserves kind.
    pub fn add(self, delta: i64) -> Result<Self, ValidationError> {
        let moved = add_checked(Axis::Row, self.index, delta)?;
        Ok(Self {
            index: moved,
            kind: self.kind,
        })
    }

    /// Shift by `delta`, clamping to `[0, MAX_ROWS)`. Never fails.
    /// Preserves kind. Used by translate-style edits.
    pub fn add_saturating(self, delta: i64) -> Self {
        Self {
            index: add_saturating(Axis::Row, self.index, delta),
            kind: self.kind,
        }
    }
}

fn check_axis(axis: Axis, index: u32) -> Result<(), ValidationError> {
    if index >= axis.max() {
        return Err(ValidationError::new(format!(
            "{} {index} out of range 0..{}",
            match axis {
                Axis::Column => "column",
                Axis::Row => "row",
            },
            axis.max()
        )));
    }
    Ok(())
}

fn add_checked(axis: Axis, index: u32, delta: i64) -> Result<u32, ValidationError> {
    let moved = index as i64 + delta;
    if moved < 0 || moved >= axis.max() as i64 {
        return Err(ValidationError::new(format!(
            "position {index}{delta:+} out of range 0..{}",
            axis.max()
        )));
    }
    Ok(moved as u32)
}

fn add_saturating(axis: Axis, index: u32, delta: i64) -> u32 {
    (index as i64 + delta).clamp(0, axis.max() as i64 - 1) as u32
}

impl std::fmt::Display for ColRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.kind.marker(), col_to_letters(self.index))
    }
}

impl std::fmt::Display for RowRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.kind.marker(), self.index + 1)
    }
}

/// A (column, row) reference as written in a formula.
///
/// Full equality includes kinds; identity lookups go through [`Self::coord`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellRef {
    pub col: ColRef,
    pub row: RowRef,
}

impl CellRef {
    pub fn new(col: ColRef, row: RowRef) -> Self {
        Self { col, row }
    }

    /// Relative reference at the given coordinate.
    pub fn at(coord: CellCoord) -> Self {
        // Coord invariants guarantee the bounds hold.
        Self {
            col: ColRef {
                index: coord.col,
                kind: RefKind::Relative,
            },
            row: RowRef {
                index: coord.row,
                kind: RefKind::Relative,
            },
        }
    }

    /// Parse A1 notation with optional `$` markers, e.g. `B2`, `$B2`, `B$2`.
    pub fn parse(text: &str) -> Result<Self, ValidationError> {
        parse_cell_ref(text)
            .ok_or_else(|| ValidationError::new(format!("invalid cell reference {text:?}")))
    }

    /// Kind-less identity projection.
    #[inline]
    pub fn coord(&self) -> CellCoord {
        CellCoord::new(self.col.index, self.row.index)
    }

    /// Same position, ignoring kinds.
    pub fn same_coord(&self, other: &CellRef) -> bool {
        self.coord() == other.coord()
    }

    /// Translate by `(d_col, d_row)` with saturation. Absolute components
    /// are pinned; only relative ones move. Never fails.
    pub fn translate(&self, d_col: i64, d_row: i64) -> Self {
        let col = match self.col.kind {
            RefKind::Absolute => self.col,
            RefKind::Relative => self.col.add_saturating(d_col),
        };
        let row = match self.row.kind {
            RefKind::Absolute => self.row,
            RefKind::Relative => self.row.add_saturating(d_row),
        };
        Self { col, row }
    }
}

impl std::fmt::Display for CellRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.col, self.row)
    }
}

/// Parse `[$]LETTERS[$]DIGITS`. Returns `None` for anything else, including
/// out-of-range positions (callers map that to a `ValidationError`).
fn parse_cell_ref(text: &str) -> Option<CellRef> {
    let mut chars = text.chars().peekable();

    let col_kind = if chars.peek() == Some(&'$') {
        chars.next();
        RefKind::Absolute
    } else {
        RefKind::Relative
    };

    let mut letters = String::new();
    while let Some(&c) = chars.peek() {
        if c.is_ascii_alphabetic() {
            letters.push(c);
            chars.next();
        } else {
            break;
        }
    }
    let col = letters_to_col(&letters)?;

    let row_kind = if chars.peek() == Some(&'$') {
        chars.next();
        RefKind::Absolute
    } else {
        RefKind::Relative
    };

    let digits: String = chars.collect();
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let row: u64 = digits.parse().ok()?;
    if row == 0 || row > crate::coord::MAX_ROWS as u64 {
        return None;
    }

    Some(CellRef {
        col: ColRef {
            index: col,
            kind: col_kind,
        },
        row: RowRef {
            index: (row - 1) as u32,
            kind: row_kind,
        },
    })
}
