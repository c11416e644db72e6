// Formula parsing, evaluation, and structural rewriting

pub mod eval;
pub mod parser;
pub mod refs;
pub mod rewrite;

pub use eval::{evaluate, Resolver, Value};
pub use parser::{format_expr, is_builtin_function, parse, Expr, Op, UnaryOp};
pub use refs::{extract_refs, RefTarget};
pub use rewrite::{rewrite_expr, RefEdit, RewriteOutcome};

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::error::{CellError, ParseError};

/// What a cell's input text turned into.
#[derive(Debug, Clone, PartialEq)]
pub enum Content {
    /// Plain value typed directly: number, boolean, or text.
    Literal(Value),
    /// A formula that parsed.
    Expr(Expr),
    /// A formula that failed to parse; the error is kept so the cell
    /// can report `#PARSE!` without reparsing.
    Broken(ParseError),
}

/// Cached evaluation state. A formula holds a value or an error, never
/// both; `Stale` means it has not been computed since it last changed.
#[derive(Debug, Clone, PartialEq, Default)]
enum Computed {
    #[default]
    Stale,
    Value(Value),
    Error(CellError),
}

/// A cell's content: the input text plus derived caches.
///
/// The text is the single source of truth; the parsed content and the
/// computed value are rebuilt from it after deserialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Formula {
    text: String,
    content: Content,
    computed: Computed,
}

impl Formula {
    /// Build from raw input text. Never fails: formula text that does
    /// not parse is held as `Broken`.
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let content = if text.starts_with('=') {
            match parser::parse(&text) {
                Ok(expr) => Content::Expr(expr),
                Err(err) => Content::Broken(err),
            }
        } else {
            Content::Literal(parse_literal(&text))
        };
        // A broken formula is born with its error; it can never become
        // stale because there is nothing to recompute.
        let computed = match &content {
            Content::Broken(err) => Computed::Error(CellError::Parse(err.to_string())),
            _ => Computed::Stale,
        };
        Self {
            text,
            content,
            computed,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_formula(&self) -> bool {
        !matches!(self.content, Content::Literal(_))
    }

    pub fn content(&self) -> &Content {
        &self.content
    }

    pub fn expr(&self) -> Option<&Expr> {
        match &self.content {
            Content::Expr(expr) => Some(expr),
            _ => None,
        }
    }

    pub fn parse_error(&self) -> Option<&ParseError> {
        match &self.content {
            Content::Broken(err) => Some(err),
            _ => None,
        }
    }

    /// Dependency targets this formula reads. Empty for literals and
    /// broken formulas.
    pub fn refs(&self) -> FxHashSet<RefTarget> {
        match &self.content {
            Content::Expr(expr) => extract_refs(expr),
            _ => FxHashSet::default(),
        }
    }

    /// Replace the expression (after a structural rewrite) and
    /// regenerate the text from it. Computed state becomes stale.
    pub fn replace_expr(&mut self, expr: Expr) {
        self.text = format_expr(&expr);
        self.content = Content::Expr(expr);
        self.computed = Computed::Stale;
    }

    /// The current computed result: `None` while stale. Literals are
    /// their own value and are never stale.
    pub fn computed(&self) -> Option<Result<&Value, &CellError>> {
        if let Content::Literal(value) = &self.content {
            return Some(Ok(value));
        }
        match &self.computed {
            Computed::Stale => None,
            Computed::Value(v) => Some(Ok(v)),
            Computed::Error(e) => Some(Err(e)),
        }
    }

    pub fn set_value(&mut self, value: Value) {
        self.computed = Computed::Value(value);
    }

    pub fn set_error(&mut self, error: CellError) {
        self.computed = Computed::Error(error);
    }

    pub fn invalidate(&mut self) {
        if !matches!(self.content, Content::Broken(_)) {
            self.computed = Computed::Stale;
        }
    }

    pub fn is_stale(&self) -> bool {
        matches!(self.content, Content::Expr(_)) && matches!(self.computed, Computed::Stale)
    }
}

impl From<String> for Formula {
    fn from(text: String) -> Self {
        Formula::new(text)
    }
}

impl From<Formula> for String {
    fn from(formula: Formula) -> Self {
        formula.text
    }
}

impl PartialEq for Formula {
    fn eq(&self, other: &Self) -> bool {
        self.text == other.text
    }
}

/// Interpret non-formula input: number, boolean, or text.
fn parse_literal(text: &str) -> Value {
    if text.is_empty() {
        return Value::Empty;
    }
    if let Ok(n) = text.trim().parse::<f64>() {
        return Value::Number(n);
    }
    match text.trim().to_uppercase().as_str() {
        "TRUE" => Value::Boolean(true),
        "FALSE" => Value::Boolean(false),
        _ => Value::Text(text.to_string()),
    }
}
