//! Dependency index for formula cells.
//!
//! Tracks what each formula reads (cells, labels, ranges) and the
//! reverse direction: given a changed cell or label, which formulas
//! must recompute.
//!
//! # Edge Direction
//!
//! ```text
//! A → B  means  "B reads A"  (A is a precedent of B)
//! ```
//!
//! Range and label targets stay unexpanded: a formula reading `A1:C100`
//! holds one range edge, not three hundred cell edges, and a formula
//! reading a label keeps tracking the label even when its definition is
//! retargeted.
//!
//! # Invariants
//!
//! 1. **Bidirectional consistency:** every forward target has a
//!    matching reverse entry, and vice versa.
//! 2. **No dangling entries:** empty sets are removed, not stored.
//! 3. **Atomic updates:** `replace_refs` is the only mutator that
//!    touches the maps.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::coord::CellCoord;
use crate::formula::RefTarget;
use crate::label::{LabelStore, ResolvedTarget};
use crate::range::RangeKey;

#[derive(Default, Debug, Clone)]
pub struct DepIndex {
    /// Forward edges: formula cell -> the targets it reads.
    out: FxHashMap<CellCoord, FxHashSet<RefTarget>>,

    /// Reverse edges by target kind.
    by_cell: FxHashMap<CellCoord, FxHashSet<CellCoord>>,
    by_label: FxHashMap<String, FxHashSet<CellCoord>>,
    by_range: FxHashMap<RangeKey, FxHashSet<CellCoord>>,
}

impl DepIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// The targets a formula cell reads.
    pub fn refs_of(&self, source: CellCoord) -> impl Iterator<Item = &RefTarget> + '_ {
        self.out.get(&source).into_iter().flatten()
    }

    pub fn tracks(&self, source: CellCoord) -> bool {
        self.out.contains_key(&source)
    }

    pub fn tracked_count(&self) -> usize {
        self.out.len()
    }

    /// Replace all edges for a formula cell atomically.
    ///
    /// Removes the cell from every reverse set its old targets lived
    /// in, then installs the new target set. Pass an empty set to clear.
    pub fn replace_refs(&mut self, source: CellCoord, new_refs: FxHashSet<RefTarget>) {
        if let Some(old_refs) = self.out.remove(&source) {
            for target in old_refs {
                match target {
                    RefTarget::Cell(coord) => {
                        if let Some(set) = self.by_cell.get_mut(&coord) {
                            set.remove(&source);
                            if set.is_empty() {
                                self.by_cell.remove(&coord);
                            }
                        }
                    }
                    RefTarget::Label(name) => {
                        if let Some(set) = self.by_label.get_mut(&name) {
                            set.remove(&source);
                            if set.is_empty() {
                                self.by_label.remove(&name);
                            }
                        }
                    }
                    RefTarget::Range(key) => {
                        if let Some(set) = self.by_range.get_mut(&key) {
                            set.remove(&source);
                            if set.is_empty() {
                                self.by_range.remove(&key);
                            }
                        }
                    }
                }
            }
        }

        if new_refs.is_empty() {
            return;
        }

        for target in &new_refs {
            match target {
                RefTarget::Cell(coord) => {
                    self.by_cell.entry(*coord).or_default().insert(source);
                }
                RefTarget::Label(name) => {
                    self.by_label.entry(name.clone()).or_default().insert(source);
                }
                RefTarget::Range(key) => {
                    self.by_range.entry(*key).or_default().insert(source);
                }
            }
        }

        self.out.insert(source, new_refs);
    }

    /// Clear all edges for a cell (formula removed or cell deleted).
    pub fn clear_source(&mut self, source: CellCoord) {
        self.replace_refs(source, FxHashSet::default());
    }

    /// Formulas that read the given cell, directly, through a range
    /// that covers it, or through a label that resolves to it.
    pub fn referrers_of(&self, coord: CellCoord, labels: &LabelStore) -> FxHashSet<CellCoord> {
        let mut referrers = FxHashSet::default();

        if let Some(direct) = self.by_cell.get(&coord) {
            referrers.extend(direct.iter().copied());
        }

        for (key, sources) in &self.by_range {
            if key.contains(coord) {
                referrers.extend(sources.iter().copied());
            }
        }

        for (name, sources) in &self.by_label {
            match labels.resolve(name) {
                Ok(ResolvedTarget::Cell(c)) if c == coord => {
                    referrers.extend(sources.iter().copied());
                }
                Ok(ResolvedTarget::Range(key)) if key.contains(coord) => {
                    referrers.extend(sources.iter().copied());
                }
                _ => {}
            }
        }

        referrers
    }

    /// Formulas that read the given label (by lowercase key), including
    /// through alias chains that pass over it.
    pub fn label_referrers(&self, name: &str, labels: &LabelStore) -> FxHashSet<CellCoord> {
        let key = name.to_lowercase();
        let mut referrers = FxHashSet::default();

        for (tracked, sources) in &self.by_label {
            if *tracked == key || chain_passes_through(labels, tracked, &key) {
                referrers.extend(sources.iter().copied());
            }
        }

        referrers
    }

    /// Follows the forward edges from `start` to decide whether `start`
    /// can reach itself. Lazy evaluation alone cannot catch every cycle
    /// because cached values short-circuit the recursion, so structural
    /// detection runs on the graph.
    pub fn is_cyclic(&self, start: CellCoord, labels: &LabelStore) -> bool {
        let mut visited: FxHashSet<CellCoord> = FxHashSet::default();
        let mut stack: Vec<CellCoord> = vec![start];

        while let Some(current) = stack.pop() {
            for target in self.refs_of(current) {
                for next in self.cells_under_target(target, labels) {
                    if next == start {
                        return true;
                    }
                    if visited.insert(next) {
                        stack.push(next);
                    }
                }
            }
        }

        false
    }

    /// The tracked formula cells a target covers. Cells without forward
    /// edges cannot extend a cycle, so only tracked cells matter.
    fn cells_under_target(&self, target: &RefTarget, labels: &LabelStore) -> Vec<CellCoord> {
        match target {
            RefTarget::Cell(coord) => {
                if self.out.contains_key(coord) {
                    vec![*coord]
                } else {
                    Vec::new()
                }
            }
            RefTarget::Range(key) => self
                .out
                .keys()
                .filter(|c| key.contains(**c))
                .copied()
                .collect(),
            RefTarget::Label(name) => match labels.resolve(name) {
                Ok(ResolvedTarget::Cell(coord)) => {
                    if self.out.contains_key(&coord) {
                        vec![coord]
                    } else {
                        Vec::new()
                    }
                }
                Ok(ResolvedTarget::Range(key)) => self
                    .out
                    .keys()
                    .filter(|c| key.contains(**c))
                    .copied()
                    .collect(),
                Err(_) => Vec::new(),
            },
        }
    }

    /// All formula cells currently tracked.
    pub fn sources(&self) -> impl Iterator<Item = CellCoord> + '_ {
        self.out.keys().copied()
    }

    /// Verify the bidirectional invariants. Test-only: the index is
    /// never expected to fail this in production.
    #[cfg(test)]
    pub fn assert_consistent(&self) {
        for (source, targets) in &self.out {
            assert!(!targets.is_empty(), "empty forward set for {:?}", source);
            for target in targets {
                let present = match target {
                    RefTarget::Cell(c) => self
                        .by_cell
                        .get(c)
                        .map(|s| s.contains(source))
                        .unwrap_or(false),
                    RefTarget::Label(n) => self
                        .by_label
                        .get(n)
                        .map(|s| s.contains(source))
                        .unwrap_or(false),
                    RefTarget::Range(k) => self
                        .by_range
                        .get(k)
                        .map(|s| s.contains(source))
                        .unwrap_or(false),
                };
                assert!(present, "missing reverse edge {:?} -> {:?}", source, target);
            }
        }

        for (coord, sources) in &self.by_cell {
            assert!(!sources.is_empty(), "empty reverse set for {:?}", coord);
            for source in sources {
                assert!(
                    self.out
                        .get(source)
                        .map(|t| t.contains(&RefTarget::Cell(*coord)))
                        .unwrap_or(false),
                    "missing forward edge {:?} -> {:?}",
                    source,
                    coord
                );
            }
        }
        for (name, sources) in &self.by_label {
            assert!(!sources.is_empty(), "empty reverse set for label {}", name);
            for source in sources {
                assert!(self
                    .out
                    .get(source)
                    .map(|t| t.contains(&RefTarget::Label(name.clone())))
                    .unwrap_or(false));
            }
        }
        for (key, sources) in &self.by_range {
            assert!(!sources.is_empty(), "empty reverse set for {:?}", key);
            for source in sources {
                assert!(self
                    .out
                    .get(source)
                    .map(|t| t.contains(&RefTarget::Range(*key)))
                    .unwrap_or(false));
            }
        }
    }
}

/// Does resolving `from` pass through label `through` on its way to a
/// concrete target?
fn chain_passes_through(labels: &LabelStore, from: &str, through: &str) -> bool {
    let mut seen: Vec<String> = Vec::new();
    let mut current = from.to_lowercase();
    loop {
        if seen.contains(&current) {
            return false;
        }
        match labels.get(&current) {
            Some(crate::label::LabelTarget::Label(next)) => {
                let next = next.to_lowercase();
                if next == through {
                    return true;
                }
                seen.push(current);
                current = next;
            }
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::label::{LabelName, LabelTarget};
    use crate::range::Range;

    fn coord(addr: &str) -> CellCoord {
        CellCoord::parse(addr).unwrap()
    }

    fn cell_refs(addrs: &[&str]) -> FxHashSet<RefTarget> {
        addrs.iter().map(|a| RefTarget::Cell(coord(a))).collect()
    }

    fn range_ref(text: &str) -> RefTarget {
        RefTarget::Range(Range::parse(text).unwrap().key())
    }

    #[test]
    fn test_replace_refs_roundtrip() {
        let mut index = DepIndex::new();
        index.replace_refs(coord("C1"), cell_refs(&["A1", "B1"]));
        index.assert_consistent();

        let referrers = index.referrers_of(coord("A1"), &LabelStore::new());
        assert_eq!(referrers.len(), 1);
        assert!(referrers.contains(&coord("C1")));
    }

    #[test]
    fn test_replace_refs_swaps_atomically() {
        let mut index = DepIndex::new();
        index.replace_refs(coord("C1"), cell_refs(&["A1"]));
        index.replace_refs(coord("C1"), cell_refs(&["B1"]));
        index.assert_consistent();

        let labels = LabelStore::new();
        assert!(index.referrers_of(coord("A1"), &labels).is_empty());
        assert!(index.referrers_of(coord("B1"), &labels).contains(&coord("C1")));
    }

    #[test]
    fn test_clear_source_leaves_no_dangling_entries() {
        let mut index = DepIndex::new();
        index.replace_refs(coord("C1"), cell_refs(&["A1", "B1"]));
        index.clear_source(coord("C1"));
        index.assert_consistent();
        assert!(!index.tracks(coord("C1")));
        assert_eq!(index.tracked_count(), 0);
    }

    #[test]
    fn test_range_referrers() {
        let mut index = DepIndex::new();
        index.replace_refs(coord("D1"), [range_ref("A1:B10")].into_iter().collect());
        index.assert_consistent();

        let labels = LabelStore::new();
        assert!(index.referrers_of(coord("B5"), &labels).contains(&coord("D1")));
        assert!(index.referrers_of(coord("C5"), &labels).is_empty());
    }

    #[test]
    fn test_label_referrers_follow_resolution() {
        let mut labels = LabelStore::new();
        labels.set(
            LabelName::new("Total").unwrap(),
            LabelTarget::Cell(coord("B7")),
        );

        let mut index = DepIndex::new();
        index.replace_refs(
            coord("C1"),
            [RefTarget::Label("total".to_string())].into_iter().collect(),
        );

        // A change to B7 reaches C1 through the label
        assert!(index.referrers_of(coord("B7"), &labels).contains(&coord("C1")));
        // Retarget the label; the edge follows automatically
        labels.set(
            LabelName::new("Total").unwrap(),
            LabelTarget::Cell(coord("B8")),
        );
        assert!(index.referrers_of(coord("B7"), &labels).is_empty());
        assert!(index.referrers_of(coord("B8"), &labels).contains(&coord("C1")));
    }

    #[test]
    fn test_label_referrers_by_name_and_chain() {
        let mut labels = LabelStore::new();
        labels.set(
            LabelName::new("Sub").unwrap(),
            LabelTarget::Cell(coord("A1")),
        );
        labels.set(
            LabelName::new("Total").unwrap(),
            LabelTarget::Label("Sub".into()),
        );

        let mut index = DepIndex::new();
        index.replace_refs(
            coord("C1"),
            [RefTarget::Label("total".to_string())].into_iter().collect(),
        );

        // Redefining Sub affects formulas that read Total
        assert!(index.label_referrers("sub", &labels).contains(&coord("C1")));
        assert!(index.label_referrers("total", &labels).contains(&coord("C1")));
    }

    #[test]
    fn test_direct_cycle_detection() {
        let mut index = DepIndex::new();
        index.replace_refs(coord("A1"), cell_refs(&["B1"]));
        index.replace_refs(coord("B1"), cell_refs(&["A1"]));

        let labels = LabelStore::new();
        assert!(index.is_cyclic(coord("A1"), &labels));
        assert!(index.is_cyclic(coord("B1"), &labels));
    }

    #[test]
    fn test_self_reference_is_a_cycle() {
        let mut index = DepIndex::new();
        index.replace_refs(coord("A1"), cell_refs(&["A1"]));
        assert!(index.is_cyclic(coord("A1"), &LabelStore::new()));
    }

    #[test]
    fn test_long_chain_is_not_a_cycle() {
        let mut index = DepIndex::new();
        index.replace_refs(coord("B1"), cell_refs(&["A1"]));
        index.replace_refs(coord("C1"), cell_refs(&["B1"]));
        index.replace_refs(coord("D1"), cell_refs(&["C1"]));

        let labels = LabelStore::new();
        assert!(!index.is_cyclic(coord("B1"), &labels));
        assert!(!index.is_cyclic(coord("D1"), &labels));
    }

    #[test]
    fn test_cycle_through_range() {
        // B1 sums A1:A5; A3 reads B1. The cycle runs through the range.
        let mut index = DepIndex::new();
        index.replace_refs(coord("B1"), [range_ref("A1:A5")].into_iter().collect());
        index.replace_refs(coord("A3"), cell_refs(&["B1"]));

        let labels = LabelStore::new();
        assert!(index.is_cyclic(coord("B1"), &labels));
        assert!(index.is_cyclic(coord("A3"), &labels));
    }

    #[test]
    fn test_cycle_through_label() {
        let mut labels = LabelStore::new();
        labels.set(
            LabelName::new("Loop").unwrap(),
            LabelTarget::Cell(coord("A1")),
        );

        let mut index = DepIndex::new();
        index.replace_refs(
            coord("A1"),
            [RefTarget::Label("loop".to_string())].into_iter().collect(),
        );
        assert!(index.is_cyclic(coord("A1"), &labels));
    }

    #[test]
    fn test_diamond_is_not_a_cycle() {
        // D depends on B and C, both depend on A
        let mut index = DepIndex::new();
        index.replace_refs(coord("B1"), cell_refs(&["A1"]));
        index.replace_refs(coord("C1"), cell_refs(&["A1"]));
        index.replace_refs(coord("D1"), cell_refs(&["B1", "C1"]));

        let labels = LabelStore::new();
        for addr in ["B1", "C1", "D1"] {
            assert!(!index.is_cyclic(coord(addr), &labels), "{}", addr);
        }
        index.assert_consistent();
    }
}
