//! Labels: user-defined names for cells and ranges.
//!
//! A label maps a name to a cell, a range, or another label (chains are
//! allowed, e.g. `Total -> Subtotal -> B7`). Lookups are case-insensitive
//! but the original spelling is preserved.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::coord::CellCoord;
use crate::error::ValidationError;
use crate::range::RangeKey;
use crate::reference::CellRef;

/// A validated label name. Hashing and equality are case-insensitive;
/// the spelling in `as_str` is whatever the user wrote.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LabelName(String);

impl LabelName {
    pub fn new(name: impl Into<String>) -> Result<Self, ValidationError> {
        let name = name.into();
        let trimmed = name.trim();
        validate_name(trimmed)?;
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lowercase form used as the lookup key.
    pub fn key(&self) -> String {
        self.0.to_lowercase()
    }
}

impl PartialEq for LabelName {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Eq for LabelName {}

impl std::hash::Hash for LabelName {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        for b in self.0.bytes() {
            state.write_u8(b.to_ascii_lowercase());
        }
    }
}

impl fmt::Display for LabelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a label points at.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum LabelTarget {
    Cell(CellCoord),
    Range(RangeKey),
    /// Alias for another label; resolution follows the chain.
    Label(String),
}

impl fmt::Display for LabelTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LabelTarget::Cell(c) => write!(f, "{}", c),
            LabelTarget::Range(r) => write!(f, "{}", r),
            LabelTarget::Label(name) => f.write_str(name),
        }
    }
}

/// The endpoint of a resolved label chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResolvedTarget {
    Cell(CellCoord),
    Range(RangeKey),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LabelError {
    NotFound(String),
    Cycle(String),
}

impl fmt::Display for LabelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LabelError::NotFound(name) => write!(f, "label '{}' is not defined", name),
            LabelError::Cycle(name) => write!(f, "label '{}' resolves through itself", name),
        }
    }
}

impl std::error::Error for LabelError {}

/// Validate a label identifier. Names must start with a letter or
/// underscore, use only alphanumerics and underscores after that, and
/// must not collide with an A1 address, a range, a boolean literal, or
/// a built-in function name.
pub fn validate_name(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::new("label name cannot be empty"));
    }

    let first = name.chars().next().unwrap();
    if !first.is_ascii_alphabetic() && first != '_' {
        return Err(ValidationError::new(
            "label name must start with a letter or underscore",
        ));
    }

    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(ValidationError::new(
            "label name can only contain letters, digits, and underscores",
        ));
    }

    if looks_like_address(name) {
        return Err(ValidationError::new(format!(
            "'{}' collides with a cell address",
            name
        )));
    }

    let upper = name.to_uppercase();
    if upper == "TRUE" || upper == "FALSE" {
        return Err(ValidationError::new(format!(
            "'{}' is a reserved boolean literal",
            name
        )));
    }

    if crate::formula::is_builtin_function(&upper) {
        return Err(ValidationError::new(format!(
            "'{}' is a built-in function name",
            name
        )));
    }

    Ok(())
}

fn looks_like_address(name: &str) -> bool {
    CellRef::parse(name).is_ok()
}

/// Storage for labels, keyed case-insensitively.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LabelStore {
    entries: HashMap<String, (LabelName, LabelTarget)>,
}

impl LabelStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a label definition.
    pub fn set(&mut self, name: LabelName, target: LabelTarget) {
        self.entries.insert(name.key(), (name, target));
    }

    pub fn get(&self, name: &str) -> Option<&LabelTarget> {
        self.entries.get(&name.to_lowercase()).map(|(_, t)| t)
    }

    pub fn remove(&mut self, name: &str) -> Option<LabelTarget> {
        self.entries.remove(&name.to_lowercase()).map(|(_, t)| t)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&name.to_lowercase())
    }

    /// Follow the alias chain to a cell or range. Detects chains that
    /// loop back on themselves.
    pub fn resolve(&self, name: &str) -> Result<ResolvedTarget, LabelError> {
        let mut visited: Vec<String> = Vec::new();
        let mut current = name.to_lowercase();
        loop {
            if visited.contains(&current) {
                return Err(LabelError::Cycle(name.to_string()));
            }
            let (_, target) = self
                .entries
                .get(&current)
                .ok_or_else(|| LabelError::NotFound(current.clone()))?;
            match target {
                LabelTarget::Cell(c) => return Ok(ResolvedTarget::Cell(*c)),
                LabelTarget::Range(r) => return Ok(ResolvedTarget::Range(*r)),
                LabelTarget::Label(next) => {
                    visited.push(current);
                    current = next.to_lowercase();
                }
            }
        }
    }

    /// All defined names, original spelling, sorted for stable output.
    pub fn names(&self) -> Vec<&LabelName> {
        let mut names: Vec<_> = self.entries.values().map(|(n, _)| n).collect();
        names.sort_by(|a, b| a.key().cmp(&b.key()));
        names
    }

    pub fn iter(&self) -> impl Iterator<Item = (&LabelName, &LabelTarget)> {
        self.entries.values().map(|(n, t)| (n, t))
    }

    /// Rewrite every cell/range target through `f`. A `None` from `f`
    /// means the target was destroyed; that label is removed and its
    /// lowercase key is returned so referrers can be recomputed.
    /// Alias targets are untouched; if their endpoint was removed the
    /// chain now dangles and `resolve` reports `NotFound`.
    pub fn remap<F>(&mut self, mut f: F) -> Vec<String>
    where
        F: FnMut(&LabelTarget) -> Option<LabelTarget>,
    {
        let mut dropped = Vec::new();
        let keys: Vec<String> = self.entries.keys().cloned().collect();
        for key in keys {
            let target = &self.entries[&key].1;
            if matches!(target, LabelTarget::Label(_)) {
                continue;
            }
            match f(target) {
                Some(new_target) => {
                    self.entries.get_mut(&key).unwrap().1 = new_target;
                }
                None => {
                    self.entries.remove(&key);
                    dropped.push(key);
                }
            }
        }
        dropped.sort();
        dropped
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
