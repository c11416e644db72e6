//! Updated-cell tracking and operation reporting.
//!
//! Every engine operation funnels the cells it touches through an
//! `UpdatedCells` tracker. Single-cell edits cascade immediately; bulk
//! operations (structural edits, fill, copy) batch their writes and run
//! one cascade over the union at the end, so shared dependents
//! recompute once instead of once per written cell.

use rustc_hash::FxHashSet;

use crate::cell::Cell;
use crate::coord::CellCoord;
use crate::range::RangeKey;

/// When dependents recompute relative to the triggering writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CascadeMode {
    /// Cascade after each write.
    #[default]
    Immediate,
    /// Accumulate writes, cascade once over the union.
    Batched,
}

impl CascadeMode {
    fn tag(self) -> &'static str {
        match self {
            CascadeMode::Immediate => "immediate",
            CascadeMode::Batched => "batched",
        }
    }
}

/// Insertion-ordered set of cells touched by an operation.
#[derive(Debug, Clone, Default)]
pub struct UpdatedCells {
    order: Vec<CellCoord>,
    seen: FxHashSet<CellCoord>,
}

impl UpdatedCells {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a touched cell. Returns false if it was already tracked.
    pub fn push(&mut self, coord: CellCoord) -> bool {
        if self.seen.insert(coord) {
            self.order.push(coord);
            true
        } else {
            false
        }
    }

    pub fn extend(&mut self, coords: impl IntoIterator<Item = CellCoord>) {
        for coord in coords {
            self.push(coord);
        }
    }

    pub fn contains(&self, coord: CellCoord) -> bool {
        self.seen.contains(&coord)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Touched cells in first-touch order.
    pub fn iter(&self) -> impl Iterator<Item = CellCoord> + '_ {
        self.order.iter().copied()
    }

    /// Bounding box of everything touched, or `None` if nothing was.
    pub fn window(&self) -> Option<RangeKey> {
        let first = *self.order.first()?;
        let mut min_col = first.col;
        let mut max_col = first.col;
        let mut min_row = first.row;
        let mut max_row = first.row;
        for coord in &self.order[1..] {
            min_col = min_col.min(coord.col);
            max_col = max_col.max(coord.col);
            min_row = min_row.min(coord.row);
            max_row = max_row.max(coord.row);
        }
        Some(RangeKey {
            begin: CellCoord::new(min_col, min_row),
            end: CellCoord::new(max_col, max_row),
        })
    }
}

/// Snapshot of the cells an operation changed, for callers that render
/// or persist incrementally.
#[derive(Debug, Clone, Default)]
pub struct Delta {
    /// Changed cells in first-touch order. A coordinate with no cell
    /// here was cleared.
    pub cells: Vec<(CellCoord, Option<Cell>)>,
    /// Bounding box of the change.
    pub window: Option<RangeKey>,
}

impl Delta {
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Restrict the reported cells to a window. This narrows what the
    /// caller sees, not what was recomputed.
    pub fn clip(self, window: RangeKey) -> Delta {
        Delta {
            cells: self
                .cells
                .into_iter()
                .filter(|(coord, _)| window.contains(*coord))
                .collect(),
            window: Some(window),
        }
    }
}

/// Summary of one engine operation, for logging.
#[derive(Debug, Clone, Default)]
pub struct OpReport {
    /// Operation name, e.g. "save", "delete_rows", "fill".
    pub op: String,

    /// Cascade discipline the operation ran under.
    pub mode: CascadeMode,

    /// Cells written directly by the operation.
    pub cells_written: usize,

    /// Cells recomputed by the cascade (excludes direct writes).
    pub cells_cascaded: usize,

    /// Formulas rewritten by a structural edit.
    pub formulas_rewritten: usize,

    /// References replaced with REFERROR markers.
    pub refs_invalidated: usize,

    /// Cells marked with #CYCLE!.
    pub cycle_cells: usize,

    /// Labels dropped because their target was destroyed.
    pub labels_dropped: usize,
}

impl OpReport {
    pub fn new(op: impl Into<String>, mode: CascadeMode) -> Self {
        Self {
            op: op.into(),
            mode,
            ..Default::default()
        }
    }

    /// Concise one-line summary for logging.
    ///
    /// Format: `[engine/save] immediate  1 written  3 cascaded  rewritten=0  markers=0  cycles=0`
    pub fn log_line(&self) -> String {
        format!(
            "[engine/{}] {}  {} written  {} cascaded  rewritten={}  markers={}  cycles={}",
            self.op,
            self.mode.tag(),
            self.cells_written,
            self.cells_cascaded,
            self.formulas_rewritten,
            self.refs_invalidated,
            self.cycle_cells,
        )
    }

    pub fn had_cycles(&self) -> bool {
        self.cycle_cells > 0
    }
}
