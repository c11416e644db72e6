//! Error taxonomy for the calculation core.
//!
//! Two families, with very different handling:
//!
//! - **Recoverable** ([`ParseError`], [`CellError`]): stored on the owning
//!   formula, rendered as an error code, and never abort a multi-cell
//!   operation.
//! - **Fatal** ([`ValidationError`], [`StructuralError`]): propagate to the
//!   caller immediately and abort the in-progress operation. Callers must
//!   assume no partial structural change completed.

use std::fmt;

/// A formula's text could not be parsed.
///
/// Recoverable: stored on the formula, which stays uncompiled until the
/// text changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub message: String,
}

impl ParseError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ParseError {}

/// Evaluation error stored on a cell's formula.
///
/// Setting one of these clears any previously cached value (mutual
/// exclusion). Rendered in the grid as the corresponding error code.
#[derive(Debug, Clone, PartialEq)]
pub enum CellError {
    /// Formula text failed to parse.
    Parse(String),
    /// Type mismatch (e.g. arithmetic on text).
    Value,
    /// Division by zero.
    Div0,
    /// Unknown function or label.
    Name(String),
    /// Invalid or deleted reference (including the REFERROR marker).
    Ref,
    /// The cell participates in a circular reference, or a label chain
    /// resolving through it cycles.
    Cycle,
}

impl CellError {
    /// The short code rendered in the grid.
    pub fn code(&self) -> &'static str {
        match self {
            CellError::Parse(_) => "#PARSE!",
            CellError::Value => "#VALUE!",
            CellError::Div0 => "#DIV/0!",
            CellError::Name(_) => "#NAME?",
            CellError::Ref => "#REF!",
            CellError::Cycle => "#CYCLE!",
        }
    }
}

impl fmt::Display for CellError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellError::Parse(msg) => write!(f, "#PARSE! ({msg})"),
            CellError::Name(name) => write!(f, "#NAME? ({name})"),
            other => f.write_str(other.code()),
        }
    }
}

impl std::error::Error for CellError {}

impl From<ParseError> for CellError {
    fn from(err: ParseError) -> Self {
        CellError::Parse(err.message)
    }
}

/// Out-of-range coordinate or malformed argument.
///
/// Fatal: propagates immediately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub message: String,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ValidationError {}

/// The structural reference fixer produced a tree that violates its own
/// invariants (e.g. a rewritten formula that no longer parses).
///
/// Fatal: this is an internal failure, not a user error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuralError {
    pub message: String,
}

impl StructuralError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for StructuralError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for StructuralError {}

/// Fatal error returned by an engine operation.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineError {
    Validation(ValidationError),
    Structural(StructuralError),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Validation(e) => write!(f, "validation error: {e}"),
            EngineError::Structural(e) => write!(f, "structural error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<ValidationError> for EngineError {
    fn from(err: ValidationError) -> Self {
        EngineError::Validation(err)
    }
}

impl From<StructuralError> for EngineError {
    fn from(err: StructuralError) -> Self {
        EngineError::Structural(err)
    }
}
