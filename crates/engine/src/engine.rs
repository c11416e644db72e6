//! The calculation engine: a sparse cell store, the label store, and
//! the dependency index, kept consistent under edits.
//!
//! # Cascade discipline
//!
//! Single-cell edits (`save_cell`, `delete_cell`) cascade immediately.
//! Bulk operations (structural edits, `fill_cells`, `copy_cells`)
//! batch their writes and run one cascade over the union, so a
//! dependent shared by many written cells recomputes once.
//!
//! # Cycle handling
//!
//! Cycles are detected structurally on the dependency index before
//! recomputation; every cell on a cycle is marked `#CYCLE!` without
//! being evaluated, and the error propagates to downstream readers.
//! The evaluator additionally tracks its in-progress set, which covers
//! lazy loads that bypass a cascade.

use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

use crate::batch::{CascadeMode, Delta, OpReport, UpdatedCells};
use crate::cell::Cell;
use crate::coord::{Axis, CellCoord, MAX_COLS, MAX_ROWS};
use crate::dep_index::DepIndex;
use crate::error::{CellError, EngineError, StructuralError, ValidationError};
use crate::formula::rewrite::{rewrite_coord, rewrite_range_key};
use crate::formula::{
    evaluate, format_expr, parse, rewrite_expr, RefEdit, Resolver, Value,
};
use crate::label::{LabelError, LabelName, LabelStore, LabelTarget, ResolvedTarget};
use crate::range::{Range, RangeKey};

/// Upper bound on cells written by one fill or copy.
const MAX_BULK_CELLS: u64 = 1 << 20;

/// How eagerly reads recompute stale formulas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvalPolicy {
    /// Never recompute on read; stale cells render empty.
    Skip,
    /// Recompute a stale cell (and its stale precedents) on read.
    #[default]
    ComputeIfNecessary,
    /// Discard the cached result and recompute on every read.
    ForceRecompute,
}

#[derive(Debug, Default)]
pub struct Engine {
    cells: FxHashMap<CellCoord, Cell>,
    labels: LabelStore,
    index: DepIndex,
    policy: EvalPolicy,
}

/// Serializable engine state: cells and labels. The dependency index
/// is derived and rebuilt on load.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub cells: Vec<Cell>,
    #[serde(default)]
    pub labels: LabelStore,
}

impl Engine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: EvalPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    pub fn policy(&self) -> EvalPolicy {
        self.policy
    }

    pub fn set_policy(&mut self, policy: EvalPolicy) {
        self.policy = policy;
    }

    pub fn labels(&self) -> &LabelStore {
        &self.labels
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    /// Non-computing accessor: the cell exactly as stored.
    pub fn cell(&self, coord: CellCoord) -> Option<&Cell> {
        self.cells.get(&coord)
    }

    /// Occupied coordinates, unordered.
    pub fn coords(&self) -> impl Iterator<Item = CellCoord> + '_ {
        self.cells.keys().copied()
    }

    // =========================================================================
    // Reading
    // =========================================================================

    /// Load a cell, recomputing per the engine's eval policy.
    pub fn load_cell(&mut self, coord: CellCoord) -> Option<&Cell> {
        self.load_cell_with(coord, self.policy)
    }

    /// Load a cell under an explicit policy, overriding the engine's.
    pub fn load_cell_with(&mut self, coord: CellCoord, policy: EvalPolicy) -> Option<&Cell> {
        match policy {
            EvalPolicy::Skip => {}
            EvalPolicy::ComputeIfNecessary => {
                if self.cells.get(&coord).is_some_and(|c| c.formula.is_stale()) {
                    let mut evaluating = FxHashSet::default();
                    let _ = self.compute_value(coord, &mut evaluating);
                }
            }
            EvalPolicy::ForceRecompute => {
                if let Some(cell) = self.cells.get_mut(&coord) {
                    cell.formula.invalidate();
                }
                let mut evaluating = FxHashSet::default();
                let _ = self.compute_value(coord, &mut evaluating);
            }
        }
        self.cells.get(&coord)
    }

    /// The computed value of a cell under the engine's eval policy;
    /// empty for unoccupied coordinates, and for stale cells when the
    /// policy is `Skip`.
    pub fn value_of(&mut self, coord: CellCoord) -> Result<Value, CellError> {
        match self.policy {
            EvalPolicy::Skip => match self.cells.get(&coord).and_then(|c| c.formula.computed()) {
                Some(Ok(value)) => Ok(value.clone()),
                Some(Err(error)) => Err(error.clone()),
                None => Ok(Value::Empty),
            },
            EvalPolicy::ComputeIfNecessary => {
                let mut evaluating = FxHashSet::default();
                self.compute_value(coord, &mut evaluating)
            }
            EvalPolicy::ForceRecompute => {
                if let Some(cell) = self.cells.get_mut(&coord) {
                    cell.formula.invalidate();
                }
                let mut evaluating = FxHashSet::default();
                self.compute_value(coord, &mut evaluating)
            }
        }
    }

    /// The display string of a cell under its format, applying the
    /// engine's eval policy first.
    pub fn rendered(&mut self, coord: CellCoord) -> String {
        if self.cells.contains_key(&coord) {
            let _ = self.value_of(coord);
        }
        self.cells
            .get(&coord)
            .map(|c| c.rendered())
            .unwrap_or_default()
    }

    // =========================================================================
    // Writing
    // =========================================================================

    /// Set a cell from raw input text. Empty input clears the cell.
    /// The cascade runs immediately.
    pub fn save_cell(
        &mut self,
        coord: CellCoord,
        input: &str,
    ) -> Result<(OpReport, Delta), EngineError> {
        check_bounds(coord)?;

        let mut report = OpReport::new("save", CascadeMode::Immediate);
        let mut tracker = UpdatedCells::new();

        self.write_cell(coord, input, &mut tracker);
        report.cells_written = tracker.len();
        self.cascade(&mut tracker, &mut report);

        Ok((report, self.delta_for(&tracker)))
    }

    /// Remove a cell. The cascade runs immediately: former readers now
    /// see an empty cell.
    pub fn delete_cell(&mut self, coord: CellCoord) -> Result<(OpReport, Delta), EngineError> {
        check_bounds(coord)?;

        let mut report = OpReport::new("delete", CascadeMode::Immediate);
        let mut tracker = UpdatedCells::new();

        self.write_cell(coord, "", &mut tracker);
        self.cascade(&mut tracker, &mut report);

        Ok((report, self.delta_for(&tracker)))
    }

    fn write_cell(&mut self, coord: CellCoord, input: &str, tracker: &mut UpdatedCells) {
        if input.is_empty() {
            if self.cells.remove(&coord).is_some() {
                self.index.clear_source(coord);
                tracker.push(coord);
            }
            return;
        }

        let cell = Cell::new(coord, input);
        let refs = cell.formula.refs();
        if refs.is_empty() {
            self.index.clear_source(coord);
        } else {
            self.index.replace_refs(coord, refs);
        }
        self.cells.insert(coord, cell);
        tracker.push(coord);
    }

    // =========================================================================
    // Structural edits
    // =========================================================================

    pub fn insert_rows(&mut self, at: u32, count: u32) -> Result<(OpReport, Delta), EngineError> {
        self.structural_edit(
            RefEdit::Insert { axis: Axis::Row, at, count },
            "insert_rows",
        )
    }

    pub fn insert_columns(
        &mut self,
        at: u32,
        count: u32,
    ) -> Result<(OpReport, Delta), EngineError> {
        self.structural_edit(
            RefEdit::Insert { axis: Axis::Column, at, count },
            "insert_columns",
        )
    }

    pub fn delete_rows(&mut self, at: u32, count: u32) -> Result<(OpReport, Delta), EngineError> {
        self.structural_edit(
            RefEdit::Delete { axis: Axis::Row, at, count },
            "delete_rows",
        )
    }

    pub fn delete_columns(
        &mut self,
        at: u32,
        count: u32,
    ) -> Result<(OpReport, Delta), EngineError> {
        self.structural_edit(
            RefEdit::Delete { axis: Axis::Column, at, count },
            "delete_columns",
        )
    }

    /// Compute the full post-edit state, then swap it in. Nothing is
    /// mutated if validation fails.
    fn structural_edit(
        &mut self,
        edit: RefEdit,
        op_name: &str,
    ) -> Result<(OpReport, Delta), EngineError> {
        self.validate_structural(&edit)?;

        let mut report = OpReport::new(op_name, CascadeMode::Batched);

        // Relocate surviving cells.
        let mut new_cells: FxHashMap<CellCoord, Cell> = FxHashMap::default();
        for (coord, cell) in &self.cells {
            if let Some(new_coord) = rewrite_coord(*coord, &edit) {
                let mut cell = cell.clone();
                cell.coord = new_coord;
                new_cells.insert(new_coord, cell);
            }
        }

        // Rewrite surviving formulas.
        for cell in new_cells.values_mut() {
            let Some(expr) = cell.formula.expr() else { continue };
            let outcome = rewrite_expr(expr, &edit);
            if !outcome.changed {
                continue;
            }
            report.formulas_rewritten += 1;
            if outcome.invalidated {
                report.refs_invalidated += 1;
            }
            // The rewritten text must parse back to a formula; if it
            // does not, the rewrite itself is broken and the edit must
            // not be applied.
            let text = format_expr(&outcome.expr);
            if parse(&text).is_err() {
                return Err(StructuralError::new(format!(
                    "rewrite produced unparseable formula '{}' at {}",
                    text, cell.coord
                ))
                .into());
            }
            cell.formula.replace_expr(outcome.expr);
        }

        // Relocate label targets; labels whose target is destroyed are
        // dropped, and their readers recompute to a name error below.
        let mut new_labels = self.labels.clone();
        let dropped = new_labels.remap(|target| match target {
            LabelTarget::Cell(c) => rewrite_coord(*c, &edit).map(LabelTarget::Cell),
            LabelTarget::Range(k) => rewrite_range_key(*k, &edit).map(LabelTarget::Range),
            other => Some(other.clone()),
        });
        report.labels_dropped = dropped.len();

        // Labels whose target moved or shrank keep their readers' text
        // unchanged, so those readers are invisible to the text diff
        // below; collect them for recomputation.
        let retargeted: Vec<String> = self
            .labels
            .iter()
            .filter(|(name, old_target)| {
                new_labels
                    .get(name.as_str())
                    .is_some_and(|new_target| new_target != *old_target)
            })
            .map(|(name, _)| name.key())
            .collect();

        // Rebuild the index from the new formulas.
        let mut new_index = DepIndex::new();
        for (coord, cell) in &new_cells {
            let refs = cell.formula.refs();
            if !refs.is_empty() {
                new_index.replace_refs(*coord, refs);
            }
        }

        // Track every coordinate whose content differs across the edit.
        let mut tracker = UpdatedCells::new();
        let old_cells = std::mem::take(&mut self.cells);
        for (coord, cell) in &old_cells {
            match new_cells.get(coord) {
                Some(new_cell) if new_cell.formula.text() == cell.formula.text() => {}
                _ => {
                    tracker.push(*coord);
                }
            }
        }
        for (coord, cell) in &new_cells {
            match old_cells.get(coord) {
                Some(old_cell) if old_cell.formula.text() == cell.formula.text() => {}
                _ => {
                    tracker.push(*coord);
                }
            }
        }
        report.cells_written = tracker.len();

        self.cells = new_cells;
        self.labels = new_labels;
        self.index = new_index;

        // Readers of a dropped label recompute to a name error.
        for name in &dropped {
            let readers = self.index.label_referrers(name, &self.labels);
            for coord in &readers {
                if let Some(cell) = self.cells.get_mut(coord) {
                    cell.formula.invalidate();
                }
            }
            tracker.extend(readers);
        }

        // Readers of a retargeted label recompute against the new
        // target, covering ranges that shrank at an edge.
        for name in &retargeted {
            let readers = self.index.label_referrers(name, &self.labels);
            for coord in &readers {
                if let Some(cell) = self.cells.get_mut(coord) {
                    cell.formula.invalidate();
                }
            }
            tracker.extend(readers);
        }

        // One batched cascade over everything that moved or was
        // rewritten. Untouched formulas keep their cached values, so
        // an edit past all stored content returns an empty delta.
        self.cascade(&mut tracker, &mut report);

        Ok((report, self.delta_for(&tracker)))
    }

    fn validate_structural(&self, edit: &RefEdit) -> Result<(), EngineError> {
        let (axis, at, count, is_insert) = match edit {
            RefEdit::Insert { axis, at, count } => (*axis, *at, *count, true),
            RefEdit::Delete { axis, at, count } => (*axis, *at, *count, false),
            RefEdit::Translate { .. } => return Ok(()),
        };

        if count == 0 {
            return Err(ValidationError::new("count must be at least 1").into());
        }
        if count >= axis.max() {
            return Err(ValidationError::new(format!(
                "count {} exceeds the size of the grid",
                count
            ))
            .into());
        }
        if at >= axis.max() {
            return Err(ValidationError::new(format!(
                "index {} is out of range for {:?}",
                at, axis
            ))
            .into());
        }
        if !is_insert && at as u64 + count as u64 > axis.max() as u64 {
            return Err(ValidationError::new(format!(
                "cannot delete {} starting at {}: past the edge of the grid",
                count, at
            ))
            .into());
        }
        if is_insert {
            // Occupied cells may not be pushed off the grid.
            let limit = axis.max() - count;
            let overflow = self
                .cells
                .keys()
                .any(|c| c.on_axis(axis) >= at && c.on_axis(axis) >= limit);
            if overflow {
                return Err(StructuralError::new(format!(
                    "inserting {} would push occupied cells past the edge of the grid",
                    count
                ))
                .into());
            }
        }
        Ok(())
    }

    // =========================================================================
    // Fill and copy
    // =========================================================================

    /// Copy a source box to a destination anchor, translating relative
    /// references by the displacement and pinning absolute ones.
    /// Destination cells under empty source cells are cleared.
    pub fn copy_cells(
        &mut self,
        source: Range,
        dest: CellCoord,
    ) -> Result<(OpReport, Delta), EngineError> {
        check_bounds(dest)?;
        let d_col = dest.col as i64 - source.begin().col.index as i64;
        let d_row = dest.row as i64 - source.begin().row.index as i64;

        if source.cell_count() > MAX_BULK_CELLS {
            return Err(bulk_too_large(source.cell_count()).into());
        }
        let mut pairs = Vec::new();
        for src in source.key().cells() {
            let dst = translate_coord(src, d_col, d_row)?;
            pairs.push((src, dst));
        }
        let writes = self.translated_writes(pairs);
        self.apply_bulk_writes("copy", writes)
    }

    /// Fill a destination box by tiling the source box across it.
    /// Each written cell is the source cell translated by its own
    /// displacement, so `=A1` filled down becomes `=A2`, `=A3`, ...
    pub fn fill_cells(
        &mut self,
        source: Range,
        dest: Range,
    ) -> Result<(OpReport, Delta), EngineError> {
        if dest.cell_count() > MAX_BULK_CELLS {
            return Err(bulk_too_large(dest.cell_count()).into());
        }
        let sw = source.width();
        let sh = source.height();
        let pairs: Vec<(CellCoord, CellCoord)> = dest
            .key()
            .cells()
            .map(|dest_coord| {
                let off_col = (dest_coord.col - dest.begin().col.index) % sw;
                let off_row = (dest_coord.row - dest.begin().row.index) % sh;
                let src = CellCoord::new(
                    source.begin().col.index + off_col,
                    source.begin().row.index + off_row,
                );
                (src, dest_coord)
            })
            .collect();

        let writes = self.translated_writes(pairs);
        self.apply_bulk_writes("fill", writes)
    }

    /// Compute the new text for each (source, destination) pair.
    /// Every pair translates by its own displacement; all write texts
    /// come from the pre-write state, so overlapping source and
    /// destination boxes behave as a snapshot copy. References pushed
    /// against the grid edge clamp rather than going invalid.
    fn translated_writes(&self, pairs: Vec<(CellCoord, CellCoord)>) -> Vec<(CellCoord, String)> {
        let mut writes = Vec::with_capacity(pairs.len());
        for (src, dst) in pairs {
            let text = match self.cells.get(&src) {
                None => String::new(),
                Some(cell) => match cell.formula.expr() {
                    Some(expr) => {
                        let outcome = rewrite_expr(
                            expr,
                            &RefEdit::Translate {
                                d_col: dst.col as i64 - src.col as i64,
                                d_row: dst.row as i64 - src.row as i64,
                            },
                        );
                        format_expr(&outcome.expr)
                    }
                    None => cell.formula.text().to_string(),
                },
            };
            writes.push((dst, text));
        }
        writes
    }

    fn apply_bulk_writes(
        &mut self,
        op_name: &str,
        writes: Vec<(CellCoord, String)>,
    ) -> Result<(OpReport, Delta), EngineError> {
        let mut report = OpReport::new(op_name, CascadeMode::Batched);
        let mut tracker = UpdatedCells::new();

        for (coord, text) in &writes {
            self.write_cell(*coord, text, &mut tracker);
        }
        report.cells_written = tracker.len();
        self.cascade(&mut tracker, &mut report);

        Ok((report, self.delta_for(&tracker)))
    }

    // =========================================================================
    // Labels
    // =========================================================================

    /// Define or retarget a label. Readers of the label recompute.
    pub fn set_label(
        &mut self,
        name: &str,
        target: LabelTarget,
    ) -> Result<(OpReport, Delta), EngineError> {
        let label = LabelName::new(name)?;
        match &target {
            LabelTarget::Cell(coord) => check_bounds(*coord)?,
            LabelTarget::Range(key) => {
                check_bounds(key.begin)?;
                check_bounds(key.end)?;
            }
            LabelTarget::Label(_) => {}
        }

        let previous = self.labels.get(name).cloned();
        self.labels.set(label.clone(), target);

        // An alias that loops back on itself is rejected outright.
        if let Err(LabelError::Cycle(_)) = self.labels.resolve(name) {
            match previous {
                Some(old) => self.labels.set(label, old),
                None => {
                    self.labels.remove(name);
                }
            }
            return Err(ValidationError::new(format!(
                "label '{}' would resolve through itself",
                name
            ))
            .into());
        }

        let mut report = OpReport::new("set_label", CascadeMode::Immediate);
        let mut tracker = UpdatedCells::new();
        let readers = self.index.label_referrers(name, &self.labels);
        for coord in &readers {
            if let Some(cell) = self.cells.get_mut(coord) {
                cell.formula.invalidate();
            }
        }
        tracker.extend(readers);
        self.cascade(&mut tracker, &mut report);

        Ok((report, self.delta_for(&tracker)))
    }

    /// Remove a label. Readers recompute to `#NAME?`.
    pub fn delete_label(&mut self, name: &str) -> Result<(OpReport, Delta), EngineError> {
        if self.labels.remove(name).is_none() {
            return Err(ValidationError::new(format!("label '{}' is not defined", name)).into());
        }

        let mut report = OpReport::new("delete_label", CascadeMode::Immediate);
        let mut tracker = UpdatedCells::new();
        let readers = self.index.label_referrers(name, &self.labels);
        for coord in &readers {
            if let Some(cell) = self.cells.get_mut(coord) {
                cell.formula.invalidate();
            }
        }
        tracker.extend(readers);
        self.cascade(&mut tracker, &mut report);

        Ok((report, self.delta_for(&tracker)))
    }

    // =========================================================================
    // Snapshots
    // =========================================================================

    pub fn to_snapshot(&self) -> Snapshot {
        let mut cells: Vec<Cell> = self.cells.values().cloned().collect();
        cells.sort_by_key(|c| c.coord);
        Snapshot {
            cells,
            labels: self.labels.clone(),
        }
    }

    /// Rebuild an engine from a snapshot. Formulas start stale; the
    /// dependency index is reconstructed from them.
    pub fn from_snapshot(snapshot: Snapshot) -> Result<Self, ValidationError> {
        let mut engine = Engine::new();
        for cell in snapshot.cells {
            check_bounds(cell.coord)?;
            let refs = cell.formula.refs();
            if !refs.is_empty() {
                engine.index.replace_refs(cell.coord, refs);
            }
            engine.cells.insert(cell.coord, cell);
        }
        engine.labels = snapshot.labels;
        Ok(engine)
    }

    // =========================================================================
    // Cascade
    // =========================================================================

    /// Recompute everything downstream of the tracked seeds. The seeds
    /// themselves recompute too if they are formulas.
    fn cascade(&mut self, tracker: &mut UpdatedCells, report: &mut OpReport) {
        // Transitive closure of referrers over the index.
        let mut dirty: Vec<CellCoord> = Vec::new();
        let mut seen: FxHashSet<CellCoord> = tracker.iter().collect();
        let mut queue: Vec<CellCoord> = tracker.iter().collect();
        while let Some(coord) = queue.pop() {
            for referrer in self.index.referrers_of(coord, &self.labels) {
                if seen.insert(referrer) {
                    dirty.push(referrer);
                    queue.push(referrer);
                }
            }
        }

        for coord in &dirty {
            if let Some(cell) = self.cells.get_mut(coord) {
                cell.formula.invalidate();
            }
        }
        report.cells_cascaded += dirty.len();

        // Structural cycle detection runs before any evaluation so
        // cached values cannot mask a loop.
        let all: Vec<CellCoord> = tracker.iter().chain(dirty.iter().copied()).collect();
        for coord in &all {
            let is_formula_cell = self
                .cells
                .get(coord)
                .is_some_and(|c| c.formula.expr().is_some());
            if is_formula_cell && self.index.is_cyclic(*coord, &self.labels) {
                if let Some(cell) = self.cells.get_mut(coord) {
                    cell.formula.set_error(CellError::Cycle);
                    report.cycle_cells += 1;
                }
            }
        }

        if self.policy != EvalPolicy::Skip {
            for coord in all {
                let mut evaluating = FxHashSet::default();
                let _ = self.compute_value(coord, &mut evaluating);
            }
        }

        tracker.extend(dirty);
    }

    /// Evaluate a cell, recursing into stale precedents and caching the
    /// result. The in-progress set turns re-entry into `#CYCLE!`.
    fn compute_value(
        &mut self,
        coord: CellCoord,
        evaluating: &mut FxHashSet<CellCoord>,
    ) -> Result<Value, CellError> {
        let Some(cell) = self.cells.get(&coord) else {
            return Ok(Value::Empty);
        };
        if let Some(result) = cell.formula.computed() {
            return match result {
                Ok(v) => Ok(v.clone()),
                Err(e) => Err(e.clone()),
            };
        }
        let Some(expr) = cell.formula.expr().cloned() else {
            return Ok(Value::Empty);
        };

        if !evaluating.insert(coord) {
            if let Some(cell) = self.cells.get_mut(&coord) {
                cell.formula.set_error(CellError::Cycle);
            }
            return Err(CellError::Cycle);
        }

        let result = {
            let mut ctx = EvalCtx {
                engine: &mut *self,
                evaluating: &mut *evaluating,
            };
            evaluate(&expr, &mut ctx)
        };
        evaluating.remove(&coord);

        if let Some(cell) = self.cells.get_mut(&coord) {
            match &result {
                Ok(v) => cell.formula.set_value(v.clone()),
                Err(e) => cell.formula.set_error(e.clone()),
            }
        }
        result
    }

    fn delta_for(&self, tracker: &UpdatedCells) -> Delta {
        Delta {
            cells: tracker
                .iter()
                .map(|coord| (coord, self.cells.get(&coord).cloned()))
                .collect(),
            window: tracker.window(),
        }
    }
}

fn check_bounds(coord: CellCoord) -> Result<(), ValidationError> {
    CellCoord::checked(coord.col, coord.row).map(|_| ())
}

fn translate_coord(coord: CellCoord, d_col: i64, d_row: i64) -> Result<CellCoord, ValidationError> {
    let col = coord.col as i64 + d_col;
    let row = coord.row as i64 + d_row;
    if col < 0 || row < 0 || col >= MAX_COLS as i64 || row >= MAX_ROWS as i64 {
        return Err(ValidationError::new(
            "destination extends past the edge of the grid",
        ));
    }
    Ok(CellCoord::new(col as u32, row as u32))
}

fn bulk_too_large(count: u64) -> ValidationError {
    ValidationError::new(format!(
        "operation covers {} cells, more than the {} limit",
        count, MAX_BULK_CELLS
    ))
}

struct EvalCtx<'a> {
    engine: &'a mut Engine,
    evaluating: &'a mut FxHashSet<CellCoord>,
}

impl Resolver for EvalCtx<'_> {
    fn cell_value(&mut self, coord: CellCoord) -> Result<Value, CellError> {
        self.engine.compute_value(coord, self.evaluating)
    }

    fn range_values(&mut self, range: RangeKey) -> Result<Vec<Value>, CellError> {
        // Only occupied cells contribute; stale ones compute first.
        let coords: Vec<CellCoord> = self
            .engine
            .cells
            .keys()
            .filter(|c| range.contains(**c))
            .copied()
            .collect();
        let mut values = Vec::with_capacity(coords.len());
        for coord in coords {
            values.push(self.engine.compute_value(coord, self.evaluating)?);
        }
        Ok(values)
    }

    fn resolve_label(&mut self, name: &str) -> Result<ResolvedTarget, CellError> {
        self.engine.labels.resolve(name).map_err(|e| match e {
            LabelError::NotFound(n) => CellError::Name(n),
            LabelError::Cycle(_) => CellError::Cycle,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coord(addr: &str) -> CellCoord {
        CellCoord::parse(addr).unwrap()
    }

    fn engine_with(cells: &[(&str, &str)]) -> Engine {
        let mut engine = Engine::new();
        for (addr, input) in cells {
            engine.save_cell(coord(addr), input).unwrap();
        }
        engine
    }

    fn number(engine: &mut Engine, addr: &str) -> f64 {
        match engine.value_of(coord(addr)) {
            Ok(Value::Number(n)) => n,
            other => panic!("{}: expected number, got {:?}", addr, other),
        }
    }

    fn error(engine: &mut Engine, addr: &str) -> CellError {
        engine.value_of(coord(addr)).unwrap_err()
    }

    fn text_of(engine: &Engine, addr: &str) -> String {
        engine
            .cell(coord(addr))
            .map(|c| c.formula.text().to_string())
            .unwrap_or_default()
    }

    #[test]
    fn test_save_and_load_literal() {
        let mut engine = engine_with(&[("A1", "42")]);
        assert_eq!(number(&mut engine, "A1"), 42.0);
        assert_eq!(engine.rendered(coord("A1")), "42");
    }

    #[test]
    fn test_formula_computes_through_chain() {
        let mut engine = engine_with(&[("A1", "2"), ("A2", "=A1*3"), ("A3", "=A2+1")]);
        assert_eq!(number(&mut engine, "A3"), 7.0);
    }

    #[test]
    fn test_immediate_cascade_on_save() {
        let mut engine = engine_with(&[("A1", "1"), ("B1", "=A1+1"), ("C1", "=B1+1")]);
        assert_eq!(number(&mut engine, "C1"), 3.0);

        let (report, _) = engine.save_cell(coord("A1"), "10").unwrap();
        assert_eq!(report.cells_written, 1);
        assert_eq!(report.cells_cascaded, 2);

        // The cascade already recomputed; read without forcing.
        let c1 = engine.cell(coord("C1")).unwrap();
        assert_eq!(c1.rendered(), "12");
    }

    #[test]
    fn test_cascade_closure_covers_shared_dependents() {
        // D1 reads both B1 and C1, which both read A1. One save of A1
        // must recompute D1 exactly once, with the final values.
        let mut engine = engine_with(&[
            ("A1", "1"),
            ("B1", "=A1+1"),
            ("C1", "=A1*2"),
            ("D1", "=B1+C1"),
        ]);
        engine.save_cell(coord("A1"), "5").unwrap();
        assert_eq!(number(&mut engine, "D1"), 16.0);
    }

    #[test]
    fn test_delete_cell_cascades() {
        let mut engine = engine_with(&[("A1", "4"), ("B1", "=A1+1")]);
        engine.delete_cell(coord("A1")).unwrap();
        // A1 reads as empty now
        assert_eq!(number(&mut engine, "B1"), 1.0);
        assert!(engine.cell(coord("A1")).is_none());
    }

    #[test]
    fn test_range_dependency_cascade() {
        let mut engine = engine_with(&[
            ("A1", "1"),
            ("A2", "2"),
            ("A3", "3"),
            ("B1", "=SUM(A1:A10)"),
        ]);
        assert_eq!(number(&mut engine, "B1"), 6.0);

        // Writing a previously empty cell inside the range cascades.
        engine.save_cell(coord("A7"), "10").unwrap();
        assert_eq!(engine.cell(coord("B1")).unwrap().rendered(), "16");
    }

    #[test]
    fn test_direct_cycle_marks_both_cells() {
        let mut engine = engine_with(&[("A1", "1"), ("B1", "=A1")]);
        engine.save_cell(coord("A1"), "=B1").unwrap();

        assert_eq!(error(&mut engine, "A1"), CellError::Cycle);
        assert_eq!(error(&mut engine, "B1"), CellError::Cycle);
    }

    #[test]
    fn test_self_reference_cycle() {
        let mut engine = engine_with(&[("A1", "=A1+1")]);
        assert_eq!(error(&mut engine, "A1"), CellError::Cycle);
    }

    #[test]
    fn test_cycle_error_propagates_to_readers() {
        let mut engine = engine_with(&[("A1", "=B1"), ("B1", "=A1"), ("C1", "=A1+1")]);
        assert_eq!(error(&mut engine, "C1"), CellError::Cycle);
    }

    #[test]
    fn test_breaking_a_cycle_recovers() {
        let mut engine = engine_with(&[("A1", "=B1"), ("B1", "=A1")]);
        assert_eq!(error(&mut engine, "A1"), CellError::Cycle);

        engine.save_cell(coord("B1"), "3").unwrap();
        assert_eq!(number(&mut engine, "A1"), 3.0);
    }

    #[test]
    fn test_parse_error_is_recoverable() {
        let mut engine = engine_with(&[("A1", "=1+")]);
        assert!(matches!(error(&mut engine, "A1"), CellError::Parse(_)));
        // The broken text is preserved
        assert_eq!(text_of(&engine, "A1"), "=1+");
        // Overwriting recovers
        engine.save_cell(coord("A1"), "=1+1").unwrap();
        assert_eq!(number(&mut engine, "A1"), 2.0);
    }

    #[test]
    fn test_error_propagation_through_reference() {
        let mut engine = engine_with(&[("A1", "=1/0"), ("B1", "=A1+1")]);
        assert_eq!(error(&mut engine, "B1"), CellError::Div0);
    }

    // =========================================================================
    // Structural edits
    // =========================================================================

    #[test]
    fn test_insert_rows_moves_cells_and_rewrites_refs() {
        let mut engine = engine_with(&[("A1", "1"), ("A5", "2"), ("B1", "=A5*10")]);
        let (report, _) = engine.insert_rows(2, 3).unwrap();
        assert_eq!(report.formulas_rewritten, 1);

        // A5 moved to A8; the formula follows it.
        assert!(engine.cell(coord("A5")).is_none());
        assert_eq!(number(&mut engine, "A8"), 2.0);
        assert_eq!(text_of(&engine, "B1"), "=A8*10");
        assert_eq!(number(&mut engine, "B1"), 20.0);
    }

    #[test]
    fn test_delete_rows_invalidates_destroyed_refs() {
        let mut engine = engine_with(&[("A3", "7"), ("B1", "=A3+1")]);
        let (report, _) = engine.delete_rows(2, 1).unwrap();
        assert_eq!(report.refs_invalidated, 1);

        assert_eq!(text_of(&engine, "B1"), "=REFERROR(\"A3\")+1");
        assert_eq!(error(&mut engine, "B1"), CellError::Ref);
    }

    #[test]
    fn test_delete_rows_shrinks_ranges() {
        let mut engine = engine_with(&[
            ("A1", "1"),
            ("A2", "2"),
            ("A3", "3"),
            ("B1", "=SUM(A1:A3)"),
        ]);
        engine.delete_rows(1, 1).unwrap();

        assert_eq!(text_of(&engine, "B1"), "=SUM(A1:A2)");
        // A2 was destroyed; A3 moved up to A2.
        assert_eq!(number(&mut engine, "B1"), 4.0);
    }

    #[test]
    fn test_insert_columns_shifts_absolute_refs() {
        let mut engine = engine_with(&[("B1", "5"), ("C1", "=$B$1")]);
        engine.insert_columns(0, 2).unwrap();
        assert_eq!(text_of(&engine, "E1"), "=$D$1");
        assert_eq!(number(&mut engine, "E1"), 5.0);
    }

    #[test]
    fn test_insert_column_before_referenced_cell() {
        let mut engine = engine_with(&[("A1", "1"), ("B1", "2"), ("C1", "=A1+B1")]);
        engine.insert_columns(1, 1).unwrap();

        // A1 stays put, B1 moved to C1, the formula (now in D1) follows.
        assert_eq!(text_of(&engine, "D1"), "=A1+C1");
        assert_eq!(number(&mut engine, "D1"), 3.0);
    }

    #[test]
    fn test_delete_column_substitutes_marker_for_dead_ref() {
        let mut engine = engine_with(&[("A1", "1"), ("B1", "2"), ("C1", "=A1+B1")]);
        engine.delete_columns(1, 1).unwrap();

        assert_eq!(text_of(&engine, "B1"), "=A1+REFERROR(\"B1\")");
        assert_eq!(error(&mut engine, "B1"), CellError::Ref);
    }

    #[test]
    fn test_fill_translates_by_destination_offset() {
        let mut engine = engine_with(&[("B2", "7"), ("C3", "=A1")]);
        engine
            .fill_cells(
                Range::parse("C3").unwrap(),
                Range::parse("D4").unwrap(),
            )
            .unwrap();

        // One column and one row over, so the relative ref moves the same way.
        assert_eq!(text_of(&engine, "D4"), "=B2");
        assert_eq!(number(&mut engine, "D4"), 7.0);
    }

    #[test]
    fn test_structural_edit_remaps_labels() {
        let mut engine = engine_with(&[("A5", "3"), ("B1", "=Total")]);
        engine
            .set_label("Total", LabelTarget::Cell(coord("A5")))
            .unwrap();
        assert_eq!(number(&mut engine, "B1"), 3.0);

        engine.insert_rows(0, 2).unwrap();
        assert_eq!(
            engine.labels().get("Total"),
            Some(&LabelTarget::Cell(coord("A7")))
        );
        // The reading formula moved too; it still resolves the label.
        assert_eq!(number(&mut engine, "B3"), 3.0);
    }

    #[test]
    fn test_label_range_tail_delete_recomputes_readers() {
        let mut engine = engine_with(&[
            ("A1", "1"),
            ("A2", "2"),
            ("A3", "3"),
            ("A4", "4"),
            ("A5", "5"),
            ("B1", "=SUM(Data)"),
        ]);
        engine
            .set_label("Data", LabelTarget::Range(Range::parse("A1:A5").unwrap().key()))
            .unwrap();
        assert_eq!(number(&mut engine, "B1"), 15.0);

        // Deleting the last row shrinks Data to A1:A4. B1's text never
        // changes, so only the label retarget can reach it.
        let (_, delta) = engine.delete_rows(4, 1).unwrap();
        assert_eq!(
            engine.labels().get("Data"),
            Some(&LabelTarget::Range(Range::parse("A1:A4").unwrap().key()))
        );
        assert_eq!(number(&mut engine, "B1"), 10.0);
        assert!(delta.cells.iter().any(|(c, _)| *c == coord("B1")));
    }

    #[test]
    fn test_deleting_label_target_drops_label() {
        let mut engine = engine_with(&[("A3", "3"), ("B1", "=Total")]);
        engine
            .set_label("Total", LabelTarget::Cell(coord("A3")))
            .unwrap();

        let (report, _) = engine.delete_rows(2, 1).unwrap();
        assert_eq!(report.labels_dropped, 1);
        assert!(engine.labels().get("Total").is_none());
        assert_eq!(error(&mut engine, "B1"), CellError::Name("total".into()));
    }

    #[test]
    fn test_edit_past_content_returns_empty_delta() {
        let mut engine = engine_with(&[("A1", "1"), ("B1", "=A1")]);
        let (report, delta) = engine.insert_rows(100, 5).unwrap();
        assert_eq!(report.cells_written, 0);
        assert!(delta.is_empty());
    }

    #[test]
    fn test_structural_validation_rejects_bad_spans() {
        let mut engine = Engine::new();
        assert!(engine.insert_rows(0, 0).is_err());
        assert!(engine.delete_rows(MAX_ROWS - 1, 2).is_err());
        assert!(engine.insert_rows(MAX_ROWS, 1).is_err());
    }

    #[test]
    fn test_insert_cannot_push_cells_off_grid() {
        let mut engine = Engine::new();
        engine
            .save_cell(CellCoord::new(0, MAX_ROWS - 1), "edge")
            .unwrap();
        let err = engine.insert_rows(0, 1);
        assert!(matches!(err, Err(EngineError::Structural(_))));
        // Nothing changed
        assert!(engine.cell(CellCoord::new(0, MAX_ROWS - 1)).is_some());
    }

    // =========================================================================
    // Fill and copy
    // =========================================================================

    #[test]
    fn test_copy_translates_relative_refs() {
        let mut engine = engine_with(&[("A1", "1"), ("A2", "2"), ("B1", "=A1*10")]);
        engine
            .copy_cells(Range::parse("B1").unwrap(), coord("B2"))
            .unwrap();
        assert_eq!(text_of(&engine, "B2"), "=A2*10");
        assert_eq!(number(&mut engine, "B2"), 20.0);
    }

    #[test]
    fn test_copy_pins_absolute_refs() {
        let mut engine = engine_with(&[("A1", "5"), ("B1", "=$A$1+A1")]);
        engine
            .copy_cells(Range::parse("B1").unwrap(), coord("B3"))
            .unwrap();
        assert_eq!(text_of(&engine, "B3"), "=$A$1+A3");
    }

    #[test]
    fn test_copy_clears_under_empty_source() {
        let mut engine = engine_with(&[("A1", "1"), ("C1", "old"), ("C2", "older")]);
        // Source A1:A2 has an empty A2; both dest cells are overwritten.
        engine
            .copy_cells(Range::parse("A1:A2").unwrap(), coord("C1"))
            .unwrap();
        assert_eq!(text_of(&engine, "C1"), "1");
        assert!(engine.cell(coord("C2")).is_none());
    }

    #[test]
    fn test_fill_tiles_source_down() {
        let mut engine = engine_with(&[("A1", "1"), ("A2", "2"), ("A3", "3"), ("B1", "=A1*2")]);
        engine
            .fill_cells(
                Range::parse("B1").unwrap(),
                Range::parse("B2:B3").unwrap(),
            )
            .unwrap();
        assert_eq!(text_of(&engine, "B2"), "=A2*2");
        assert_eq!(text_of(&engine, "B3"), "=A3*2");
        assert_eq!(number(&mut engine, "B3"), 6.0);
    }

    #[test]
    fn test_fill_off_grid_clamps_refs() {
        let mut engine = engine_with(&[("A1", "7"), ("B2", "=A1")]);
        // Filling upward would push the relative ref past the top edge;
        // it clamps at row 1 instead of going invalid.
        engine
            .fill_cells(
                Range::parse("B2").unwrap(),
                Range::parse("B1").unwrap(),
            )
            .unwrap();
        assert_eq!(text_of(&engine, "B1"), "=A1");
        assert_eq!(number(&mut engine, "B1"), 7.0);
    }

    #[test]
    fn test_batched_cascade_recomputes_shared_dependent_once() {
        let mut engine = engine_with(&[
            ("A1", "1"),
            ("A2", "1"),
            ("A3", "1"),
            ("B1", "=SUM(A1:A3)"),
        ]);
        // Fill overwrites all three inputs; B1 must see the final state.
        let (report, _) = engine
            .fill_cells(
                Range::parse("A1").unwrap(),
                Range::parse("A1:A3").unwrap(),
            )
            .unwrap();
        assert_eq!(report.cells_written, 3);
        assert_eq!(number(&mut engine, "B1"), 3.0);
    }

    // =========================================================================
    // Labels
    // =========================================================================

    #[test]
    fn test_label_set_and_retarget_cascades() {
        let mut engine = engine_with(&[("A1", "10"), ("A2", "20"), ("B1", "=Price*2")]);
        engine
            .set_label("Price", LabelTarget::Cell(coord("A1")))
            .unwrap();
        assert_eq!(number(&mut engine, "B1"), 20.0);

        engine
            .set_label("Price", LabelTarget::Cell(coord("A2")))
            .unwrap();
        assert_eq!(engine.cell(coord("B1")).unwrap().rendered(), "40");
    }

    #[test]
    fn test_label_chain_and_delete() {
        let mut engine = engine_with(&[("A1", "5"), ("B1", "=Total")]);
        engine
            .set_label("Base", LabelTarget::Cell(coord("A1")))
            .unwrap();
        engine
            .set_label("Total", LabelTarget::Label("Base".into()))
            .unwrap();
        assert_eq!(number(&mut engine, "B1"), 5.0);

        engine.delete_label("Base").unwrap();
        assert!(matches!(error(&mut engine, "B1"), CellError::Name(_)));
    }

    #[test]
    fn test_label_alias_cycle_rejected() {
        let mut engine = Engine::new();
        engine
            .set_label("A_lbl", LabelTarget::Label("B_lbl".into()))
            .unwrap();
        let err = engine.set_label("B_lbl", LabelTarget::Label("A_lbl".into()));
        assert!(err.is_err());
        // The store was not left in the cyclic state.
        assert!(engine.labels().get("B_lbl").is_none());
    }

    #[test]
    fn test_range_label_aggregates() {
        let mut engine = engine_with(&[("A1", "1"), ("A2", "2"), ("B1", "=SUM(Data)")]);
        engine
            .set_label("Data", LabelTarget::Range(Range::parse("A1:A5").unwrap().key()))
            .unwrap();
        assert_eq!(number(&mut engine, "B1"), 3.0);

        engine.save_cell(coord("A4"), "10").unwrap();
        assert_eq!(engine.cell(coord("B1")).unwrap().rendered(), "13");
    }

    // =========================================================================
    // Eval policies
    // =========================================================================

    #[test]
    fn test_skip_policy_leaves_cells_stale() {
        let mut engine = Engine::with_policy(EvalPolicy::Skip);
        engine.save_cell(coord("A1"), "2").unwrap();
        engine.save_cell(coord("B1"), "=A1*2").unwrap();

        let cell = engine.load_cell(coord("B1")).unwrap();
        assert!(cell.formula.is_stale());
        assert_eq!(cell.rendered(), "");
    }

    #[test]
    fn test_skip_policy_reads_do_not_compute() {
        let mut engine = Engine::with_policy(EvalPolicy::Skip);
        engine.save_cell(coord("A1"), "2").unwrap();
        engine.save_cell(coord("B1"), "=A1*2").unwrap();

        // Plain reads leave the stale formula untouched.
        assert_eq!(engine.value_of(coord("B1")), Ok(Value::Empty));
        assert_eq!(engine.rendered(coord("B1")), "");
        assert!(engine.cell(coord("B1")).unwrap().formula.is_stale());

        // Literals are their own value regardless of policy.
        assert_eq!(engine.value_of(coord("A1")), Ok(Value::Number(2.0)));
    }

    #[test]
    fn test_compute_if_necessary_fills_stale() {
        let mut engine = Engine::with_policy(EvalPolicy::Skip);
        engine.save_cell(coord("A1"), "2").unwrap();
        engine.save_cell(coord("B1"), "=A1*2").unwrap();

        engine.set_policy(EvalPolicy::ComputeIfNecessary);
        let cell = engine.load_cell(coord("B1")).unwrap();
        assert_eq!(cell.rendered(), "4");
    }

    #[test]
    fn test_force_recompute_discards_cache() {
        let mut engine = engine_with(&[("A1", "2"), ("B1", "=A1*2")]);
        assert_eq!(number(&mut engine, "B1"), 4.0);

        engine.set_policy(EvalPolicy::ForceRecompute);
        let cell = engine.load_cell(coord("B1")).unwrap();
        assert_eq!(cell.rendered(), "4");
    }

    // =========================================================================
    // Deltas and snapshots
    // =========================================================================

    #[test]
    fn test_delta_lists_changed_cells_with_window() {
        let mut engine = engine_with(&[("A1", "1"), ("C3", "=A1+1")]);
        let (_, delta) = engine.save_cell(coord("A1"), "5").unwrap();

        let coords: Vec<CellCoord> = delta.cells.iter().map(|(c, _)| *c).collect();
        assert!(coords.contains(&coord("A1")));
        assert!(coords.contains(&coord("C3")));
        let window = delta.window.unwrap();
        assert_eq!(window.begin, coord("A1"));
        assert_eq!(window.end, coord("C3"));
    }

    #[test]
    fn test_delta_reports_cleared_cells_as_none() {
        let mut engine = engine_with(&[("A1", "1")]);
        let (_, delta) = engine.delete_cell(coord("A1")).unwrap();
        assert_eq!(delta.cells.len(), 1);
        assert!(delta.cells[0].1.is_none());
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let mut engine = engine_with(&[("A1", "2"), ("B1", "=A1*3")]);
        engine
            .set_label("Base", LabelTarget::Cell(coord("A1")))
            .unwrap();

        let snapshot = engine.to_snapshot();
        let json = serde_json::to_string(&snapshot).unwrap();
        let restored: Snapshot = serde_json::from_str(&json).unwrap();
        let mut engine = Engine::from_snapshot(restored).unwrap();

        assert_eq!(number(&mut engine, "B1"), 6.0);
        assert!(engine.labels().get("Base").is_some());
    }
}
