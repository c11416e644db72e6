// Formula evaluator.
//
// Evaluation never panics: every failure is a typed CellError carried in
// the Result, so errors recorded on referenced cells propagate to their
// dependents through the resolver.

use ordered_float::OrderedFloat;

use super::parser::{format_number, Expr, Op, UnaryOp};
use crate::coord::CellCoord;
use crate::error::CellError;
use crate::label::ResolvedTarget;
use crate::range::RangeKey;

/// Scalar cell value. Errors are not values; they travel in `Result`.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Empty,
    Number(f64),
    Text(String),
    Boolean(bool),
}

impl Value {
    pub fn to_number(&self) -> Result<f64, CellError> {
        match self {
            Value::Number(n) => Ok(*n),
            Value::Boolean(b) => Ok(if *b { 1.0 } else { 0.0 }),
            Value::Text(s) if s.trim().is_empty() => Ok(0.0),
            Value::Text(s) => s.trim().parse::<f64>().map_err(|_| CellError::Value),
            Value::Empty => Ok(0.0),
        }
    }

    pub fn to_text(&self) -> String {
        match self {
            Value::Number(n) => format_number(*n),
            Value::Text(s) => s.clone(),
            Value::Boolean(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
            Value::Empty => String::new(),
        }
    }

    pub fn to_bool(&self) -> Result<bool, CellError> {
        match self {
            Value::Boolean(b) => Ok(*b),
            Value::Number(n) => Ok(*n != 0.0),
            Value::Text(s) => match s.to_uppercase().as_str() {
                "TRUE" => Ok(true),
                "FALSE" => Ok(false),
                _ => Err(CellError::Value),
            },
            Value::Empty => Ok(false),
        }
    }

    /// Numeric view for aggregates: numbers count, everything else is
    /// skipped.
    fn as_aggregate_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Value::Empty)
    }
}

/// Supplies referenced cell values, range contents, and label targets
/// during evaluation. Takes `&mut self` so the caller may compute and
/// cache referenced cells on demand.
pub trait Resolver {
    fn cell_value(&mut self, coord: CellCoord) -> Result<Value, CellError>;

    /// Values of the occupied cells in a range. Unoccupied cells may be
    /// omitted; aggregates treat them as empty anyway.
    fn range_values(&mut self, range: RangeKey) -> Result<Vec<Value>, CellError>;

    fn resolve_label(&mut self, name: &str) -> Result<ResolvedTarget, CellError>;
}

/// Evaluate an expression to a scalar.
pub fn evaluate<R: Resolver>(expr: &Expr, resolver: &mut R) -> Result<Value, CellError> {
    match expr {
        Expr::Empty => Ok(Value::Empty),
        Expr::Number(n) => Ok(Value::Number(*n)),
        Expr::Text(s) => Ok(Value::Text(s.clone())),
        Expr::Boolean(b) => Ok(Value::Boolean(*b)),
        Expr::Ref(cell) => resolver.cell_value(cell.coord()),
        // A bare range has no scalar value.
        Expr::Range(_) => Err(CellError::Value),
        Expr::Label(name) => match resolver.resolve_label(name)? {
            ResolvedTarget::Cell(coord) => resolver.cell_value(coord),
            ResolvedTarget::Range(_) => Err(CellError::Value),
        },
        Expr::Group(inner) => evaluate(inner, resolver),
        Expr::Unary { op: UnaryOp::Neg, operand } => {
            let n = evaluate(operand, resolver)?.to_number()?;
            Ok(Value::Number(-n))
        }
        Expr::Binary { op, left, right } => {
            let lhs = evaluate(left, resolver)?;
            let rhs = evaluate(right, resolver)?;
            apply_binary(*op, &lhs, &rhs)
        }
        Expr::Function { name, args } => call_function(name, args, resolver),
    }
}

fn apply_binary(op: Op, lhs: &Value, rhs: &Value) -> Result<Value, CellError> {
    match op {
        Op::Add => Ok(Value::Number(lhs.to_number()? + rhs.to_number()?)),
        Op::Sub => Ok(Value::Number(lhs.to_number()? - rhs.to_number()?)),
        Op::Mul => Ok(Value::Number(lhs.to_number()? * rhs.to_number()?)),
        Op::Div => {
            let divisor = rhs.to_number()?;
            if divisor == 0.0 {
                return Err(CellError::Div0);
            }
            Ok(Value::Number(lhs.to_number()? / divisor))
        }
        Op::Pow => Ok(Value::Number(lhs.to_number()?.powf(rhs.to_number()?))),
        Op::Concat => Ok(Value::Text(format!("{}{}", lhs.to_text(), rhs.to_text()))),
        Op::Eq => Ok(Value::Boolean(values_equal(lhs, rhs))),
        Op::NotEq => Ok(Value::Boolean(!values_equal(lhs, rhs))),
        Op::Lt | Op::Gt | Op::LtEq | Op::GtEq => {
            let ord = compare_values(lhs, rhs)?;
            let holds = match op {
                Op::Lt => ord.is_lt(),
                Op::Gt => ord.is_gt(),
                Op::LtEq => ord.is_le(),
                Op::GtEq => ord.is_ge(),
                _ => unreachable!(),
            };
            Ok(Value::Boolean(holds))
        }
    }
}

/// Equality across types: same type compares directly (text is
/// case-insensitive), empty coerces to the other side's zero value,
/// any remaining mix is unequal.
fn values_equal(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::Number(a), Value::Number(b)) => a == b,
        (Value::Text(a), Value::Text(b)) => a.eq_ignore_ascii_case(b),
        (Value::Boolean(a), Value::Boolean(b)) => a == b,
        (Value::Empty, Value::Empty) => true,
        (Value::Empty, other) | (other, Value::Empty) => match other {
            Value::Number(n) => *n == 0.0,
            Value::Text(s) => s.is_empty(),
            Value::Boolean(b) => !b,
            Value::Empty => true,
        },
        _ => false,
    }
}

fn compare_values(lhs: &Value, rhs: &Value) -> Result<std::cmp::Ordering, CellError> {
    match (lhs, rhs) {
        (Value::Text(a), Value::Text(b)) => {
            Ok(a.to_lowercase().cmp(&b.to_lowercase()))
        }
        (Value::Boolean(a), Value::Boolean(b)) => Ok(a.cmp(b)),
        // Everything else goes through numeric coercion; NaN gets a
        // total order via OrderedFloat rather than a panic or a lie.
        _ => Ok(OrderedFloat(lhs.to_number()?).cmp(&OrderedFloat(rhs.to_number()?))),
    }
}

fn call_function<R: Resolver>(
    name: &str,
    args: &[Expr],
    resolver: &mut R,
) -> Result<Value, CellError> {
    match name {
        "SUM" => {
            let values = flatten_args(args, resolver)?;
            let total: f64 = values
                .iter()
                .filter_map(Value::as_aggregate_number)
                .sum();
            Ok(Value::Number(total))
        }
        "MIN" => {
            let values = flatten_args(args, resolver)?;
            let min = values
                .iter()
                .filter_map(Value::as_aggregate_number)
                .map(OrderedFloat)
                .min();
            Ok(Value::Number(min.map(|n| n.0).unwrap_or(0.0)))
        }
        "MAX" => {
            let values = flatten_args(args, resolver)?;
            let max = values
                .iter()
                .filter_map(Value::as_aggregate_number)
                .map(OrderedFloat)
                .max();
            Ok(Value::Number(max.map(|n| n.0).unwrap_or(0.0)))
        }
        "COUNT" => {
            let values = flatten_args(args, resolver)?;
            let count = values
                .iter()
                .filter(|v| v.as_aggregate_number().is_some())
                .count();
            Ok(Value::Number(count as f64))
        }
        "AVERAGE" => {
            let values = flatten_args(args, resolver)?;
            let numbers: Vec<f64> = values
                .iter()
                .filter_map(Value::as_aggregate_number)
                .collect();
            if numbers.is_empty() {
                return Err(CellError::Div0);
            }
            Ok(Value::Number(
                numbers.iter().sum::<f64>() / numbers.len() as f64,
            ))
        }
        "ABS" => {
            let [arg] = args else {
                return Err(CellError::Value);
            };
            let n = evaluate(arg, resolver)?.to_number()?;
            Ok(Value::Number(n.abs()))
        }
        "ROUND" => {
            let (value, digits) = match args {
                [v] => (v, 0i32),
                [v, d] => {
                    let digits = evaluate(d, resolver)?.to_number()?;
                    (v, digits as i32)
                }
                _ => return Err(CellError::Value),
            };
            let n = evaluate(value, resolver)?.to_number()?;
            let factor = 10f64.powi(digits);
            Ok(Value::Number((n * factor).round() / factor))
        }
        "IF" => {
            let (cond, then_branch, else_branch) = match args {
                [c, t] => (c, t, None),
                [c, t, e] => (c, t, Some(e)),
                _ => return Err(CellError::Value),
            };
            if evaluate(cond, resolver)?.to_bool()? {
                evaluate(then_branch, resolver)
            } else {
                match else_branch {
                    Some(e) => evaluate(e, resolver),
                    None => Ok(Value::Boolean(false)),
                }
            }
        }
        "CONCAT" => {
            let values = flatten_args(args, resolver)?;
            let mut out = String::new();
            for v in &values {
                out.push_str(&v.to_text());
            }
            Ok(Value::Text(out))
        }
        // Reserved marker left behind when a structural edit destroys a
        // reference; it always evaluates to a reference error.
        "REFERROR" => Err(CellError::Ref),
        _ => Err(CellError::Name(name.to_string())),
    }
}

/// Evaluate arguments for an aggregate, expanding ranges (and labels
/// that resolve to ranges) into their contained values.
fn flatten_args<R: Resolver>(args: &[Expr], resolver: &mut R) -> Result<Vec<Value>, CellError> {
    let mut values = Vec::new();
    for arg in args {
        match arg {
            Expr::Range(range) => {
                values.extend(resolver.range_values(range.key())?);
            }
            Expr::Label(name) => match resolver.resolve_label(name)? {
                ResolvedTarget::Cell(coord) => values.push(resolver.cell_value(coord)?),
                ResolvedTarget::Range(key) => values.extend(resolver.range_values(key)?),
            },
            Expr::Group(inner) if matches!(**inner, Expr::Range(_)) => {
                if let Expr::Range(range) = &**inner {
                    values.extend(resolver.range_values(range.key())?);
                }
            }
            other => values.push(evaluate(other, resolver)?),
        }
    }
    Ok(values)
}
