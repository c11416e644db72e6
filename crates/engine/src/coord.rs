//! Cell identity for the store and the dependency index.
//!
//! A `CellCoord` is a kind-less (column, row) pair: two references that
//! differ only in their absolute/relative markers identify the same cell.
//! The reference model with kinds lives in [`crate::reference`].

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Exclusive upper bound for column positions.
pub const MAX_COLS: u32 = 16_384;

/// Exclusive upper bound for row positions.
pub const MAX_ROWS: u32 = 1_048_576;

/// The axis a structural edit operates on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Axis {
    Column,
    Row,
}

impl Axis {
    /// Exclusive upper bound for positions on this axis.
    pub fn max(self) -> u32 {
        match self {
            Axis::Column => MAX_COLS,
            Axis::Row => MAX_ROWS,
        }
    }
}

/// Kind-less cell identity: 0-based (column, row).
///
/// Used as the key in the cell store and as graph nodes in the dependency
/// index. Ordering is row-major for deterministic iteration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellCoord {
    pub col: u32,
    pub row: u32,
}

impl CellCoord {
    #[inline]
    pub fn new(col: u32, row: u32) -> Self {
        Self { col, row }
    }

    /// Bounds-checked constructor.
    pub fn checked(col: u32, row: u32) -> Result<Self, ValidationError> {
        if col >= MAX_COLS {
            return Err(ValidationError::new(format!(
                "column {col} out of range 0..{MAX_COLS}"
            )));
        }
        if row >= MAX_ROWS {
            return Err(ValidationError::new(format!(
                "row {row} out of range 0..{MAX_ROWS}"
            )));
        }
        Ok(Self { col, row })
    }

    /// Parse an A1-notation address, ignoring any `$` markers.
    pub fn parse(text: &str) -> Result<Self, ValidationError> {
        crate::reference::CellRef::parse(text).map(|r| r.coord())
    }

    /// Position on the given axis.
    #[inline]
    pub fn on_axis(&self, axis: Axis) -> u32 {
        match axis {
            Axis::Column => self.col,
            Axis::Row => self.row,
        }
    }
}

impl Ord for CellCoord {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.row.cmp(&other.row).then(self.col.cmp(&other.col))
    }
}

impl PartialOrd for CellCoord {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Display for CellCoord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", col_to_letters(self.col), self.row + 1)
    }
}

/// Convert a 0-based column index to A1 letters: 0=A, 25=Z, 26=AA.
pub(crate) fn col_to_letters(col: u32) -> String {
    let mut result = String::new();
    let mut n = col;
    loop {
        result.insert(0, (b'A' + (n % 26) as u8) as char);
        if n < 26 {
            break;
        }
        n = n / 26 - 1;
    }
    result
}

/// Convert A1 letters to a 0-based column index. `None` if empty,
/// non-alphabetic, or out of range.
pub(crate) fn letters_to_col(letters: &str) -> Option<u32> {
    if letters.is_empty() {
        return None;
    }
    let mut acc: u64 = 0;
    for c in letters.chars() {
        if !c.is_ascii_alphabetic() {
            return None;
        }
        acc = acc * 26 + (c.to_ascii_uppercase() as u64 - 'A' as u64 + 1);
        if acc > MAX_COLS as u64 {
            return None;
        }
    }
    Some((acc - 1) as u32)
}
