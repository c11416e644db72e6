//! Rectangular cell ranges.
//!
//! A `Range` is always normalized so `begin <= end` on both axes. Kinds
//! travel with their coordinate during normalization, so `$B1:A$3`
//! normalizes to `A1:$B$3` without losing any `$` markers.

use serde::{Deserialize, Serialize};

use crate::coord::CellCoord;
use crate::error::ValidationError;
use crate::reference::{CellRef, ColRef, RowRef};

/// A normalized rectangular span between two cell references.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Range {
    begin: CellRef,
    end: CellRef,
}

impl Range {
    /// Construct from any two corners; normalizes per axis.
    pub fn new(a: CellRef, b: CellRef) -> Self {
        let (begin_col, end_col) = if a.col.index <= b.col.index {
            (a.col, b.col)
        } else {
            (b.col, a.col)
        };
        let (begin_row, end_row) = if a.row.index <= b.row.index {
            (a.row, b.row)
        } else {
            (b.row, a.row)
        };
        Self {
            begin: CellRef::new(begin_col, begin_row),
            end: CellRef::new(end_col, end_row),
        }
    }

    /// Single-cell range.
    pub fn single(cell: CellRef) -> Self {
        Self {
            begin: cell,
            end: cell,
        }
    }

    /// Construct a range directly from per-axis components, normalizing.
    pub fn from_axes(cols: (ColRef, ColRef), rows: (RowRef, RowRef)) -> Self {
        Self::new(CellRef::new(cols.0, rows.0), CellRef::new(cols.1, rows.1))
    }

    /// Parse `"A1:B3"` (also accepts a single address as a 1x1 range).
    pub fn parse(text: &str) -> Result<Self, ValidationError> {
        match text.split_once(':') {
            Some((a, b)) => Ok(Self::new(CellRef::parse(a)?, CellRef::parse(b)?)),
            None => Ok(Self::single(CellRef::parse(text)?)),
        }
    }

    pub fn begin(&self) -> CellRef {
        self.begin
    }

    pub fn end(&self) -> CellRef {
        self.end
    }

    /// Kind-less identity key for the dependency index.
    pub fn key(&self) -> RangeKey {
        RangeKey {
            begin: self.begin.coord(),
            end: self.end.coord(),
        }
    }

    pub fn contains(&self, coord: CellCoord) -> bool {
        self.key().contains(coord)
    }

    pub fn intersects(&self, other: &Range) -> bool {
        self.begin.col.index <= other.end.col.index
            && other.begin.col.index <= self.end.col.index
            && self.begin.row.index <= other.end.row.index
            && other.begin.row.index <= self.end.row.index
    }

    pub fn width(&self) -> u32 {
        self.end.col.index - self.begin.col.index + 1
    }

    pub fn height(&self) -> u32 {
        self.end.row.index - self.begin.row.index + 1
    }

    pub fn cell_count(&self) -> u64 {
        self.width() as u64 * self.height() as u64
    }

    /// Column indices covered, in order.
    pub fn columns(&self) -> impl Iterator<Item = u32> {
        self.begin.col.index..=self.end.col.index
    }

    /// Row indices covered, in order.
    pub fn rows(&self) -> impl Iterator<Item = u32> {
        self.begin.row.index..=self.end.row.index
    }

    /// All contained coordinates, row-major. Lazy and restartable: each
    /// call yields a fresh iterator.
    pub fn cells(&self) -> impl Iterator<Item = CellCoord> {
        let (bc, ec) = (self.begin.col.index, self.end.col.index);
        self.rows()
            .flat_map(move |row| (bc..=ec).map(move |col| CellCoord::new(col, row)))
    }
}

impl std::fmt::Display for Range {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.begin, self.end)
    }
}

/// Kind-less range identity: a normalized coord pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RangeKey {
    pub begin: CellCoord,
    pub end: CellCoord,
}

impl RangeKey {
    pub fn contains(&self, coord: CellCoord) -> bool {
        coord.col >= self.begin.col
            && coord.col <= self.end.col
            && coord.row >= self.begin.row
            && coord.row <= self.end.row
    }

    /// Contained coordinates, row-major.
    pub fn cells(&self) -> impl Iterator<Item = CellCoord> {
        let (bc, ec) = (self.begin.col, self.end.col);
        (self.begin.row..=self.end.row)
            .flat_map(move |row| (bc..=ec).map(move |col| CellCoord::new(col, row)))
    }
}

impl Ord for RangeKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.begin.cmp(&other.begin).then(self.end.cmp(&other.end))
    }
}

impl PartialOrd for RangeKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Display for RangeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.begin, self.end)
    }
}
