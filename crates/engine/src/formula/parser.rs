// Formula parser - converts formula strings into AST
// Supports: numbers, cell refs (A1, $B$2), ranges (A1:B5), labels, functions
// (SUM), arithmetic (+ - * / ^), comparisons (< > = <= >= <>), text literals,
// and concatenation (&).

use crate::error::ParseError;
use crate::range::Range;
use crate::reference::CellRef;

/// Formula expression AST.
///
/// Parenthesized sub-expressions are kept as `Group` nodes so that
/// formatting an expression reproduces the author's grouping instead of
/// re-deriving it from precedence.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Text(String),
    Boolean(bool),
    /// Cell reference, `$` markers preserved per component.
    Ref(CellRef),
    /// Rectangular range reference.
    Range(Range),
    /// Label reference, resolved at evaluation time.
    Label(String),
    Function {
        name: String,
        args: Vec<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: Op,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// Explicitly parenthesized sub-expression.
    Group(Box<Expr>),
    /// Empty/omitted argument (e.g. the trailing slot in `=IF(a,b,)`)
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Pow, // ^
    // Comparison
    Lt,    // <
    Gt,    // >
    Eq,    // =
    LtEq,  // <=
    GtEq,  // >=
    NotEq, // <>
    // Text
    Concat, // &
}

impl Op {
    pub fn symbol(self) -> &'static str {
        match self {
            Op::Add => "+",
            Op::Sub => "-",
            Op::Mul => "*",
            Op::Div => "/",
            Op::Pow => "^",
            Op::Lt => "<",
            Op::Gt => ">",
            Op::Eq => "=",
            Op::LtEq => "<=",
            Op::GtEq => ">=",
            Op::NotEq => "<>",
            Op::Concat => "&",
        }
    }
}

/// Functions the evaluator knows. Label names may not shadow these.
pub fn is_builtin_function(upper_name: &str) -> bool {
    const FUNCTIONS: &[&str] = &[
        "SUM", "MIN", "MAX", "COUNT", "AVERAGE", "ABS", "ROUND", "IF", "CONCAT", "REFERROR",
    ];
    FUNCTIONS.contains(&upper_name)
}

/// Parse a formula string (must start with `=`) into an AST.
pub fn parse(formula: &str) -> Result<Expr, ParseError> {
    let formula = formula.trim();
    let input = formula
        .strip_prefix('=')
        .ok_or_else(|| ParseError::new("formula must start with ="))?;

    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(ParseError::new("empty formula"));
    }
    let (expr, pos) = parse_comparison(&tokens, 0)?;
    if pos != tokens.len() {
        return Err(ParseError::new(format!(
            "unexpected trailing input at token {}",
            pos
        )));
    }
    Ok(expr)
}

#[derive(Debug, Clone)]
enum Token {
    Number(f64),
    StringLit(String),
    CellRef(CellRef),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    LParen,
    RParen,
    Colon,
    Comma,
    Lt,
    Gt,
    Eq,
    LtEq,
    GtEq,
    NotEq,
    Ampersand,
}

fn tokenize(input: &str) -> Result<Vec<Token>, ParseError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' => { chars.next(); }
            '+' => { tokens.push(Token::Plus); chars.next(); }
            '-' => { tokens.push(Token::Minus); chars.next(); }
            '*' => { tokens.push(Token::Star); chars.next(); }
            '/' => { tokens.push(Token::Slash); chars.next(); }
            '^' => { tokens.push(Token::Caret); chars.next(); }
            '(' => { tokens.push(Token::LParen); chars.next(); }
            ')' => { tokens.push(Token::RParen); chars.next(); }
            ':' => { tokens.push(Token::Colon); chars.next(); }
            ',' => { tokens.push(Token::Comma); chars.next(); }
            '&' => { tokens.push(Token::Ampersand); chars.next(); }
            '<' => {
                chars.next();
                match chars.peek() {
                    Some('=') => { tokens.push(Token::LtEq); chars.next(); }
                    Some('>') => { tokens.push(Token::NotEq); chars.next(); }
                    _ => tokens.push(Token::Lt),
                }
            }
            '>' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    tokens.push(Token::GtEq);
                    chars.next();
                } else {
                    tokens.push(Token::Gt);
                }
            }
            '=' => { tokens.push(Token::Eq); chars.next(); }
            '"' => {
                chars.next(); // consume opening quote
                let mut s = String::new();
                loop {
                    match chars.next() {
                        // Doubled quote is the escape for a literal quote
                        Some('"') => {
                            if chars.peek() == Some(&'"') {
                                chars.next();
                                s.push('"');
                            } else {
                                break;
                            }
                        }
                        Some(ch) => s.push(ch),
                        None => return Err(ParseError::new("unterminated string literal")),
                    }
                }
                tokens.push(Token::StringLit(s));
            }
            'A'..='Z' | 'a'..='z' | '_' | '$' => {
                // Cell reference (A1, $B$2), label, or function name
                let started_with_dollar = c == '$';
                let mut ident = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_ascii_alphanumeric() || ch == '_' || ch == '$' {
                        ident.push(ch);
                        chars.next();
                    } else {
                        break;
                    }
                }

                if let Ok(cell) = CellRef::parse(&ident) {
                    tokens.push(Token::CellRef(cell));
                } else if started_with_dollar || ident.contains('$') {
                    return Err(ParseError::new(format!(
                        "invalid cell reference: {}",
                        ident
                    )));
                } else {
                    tokens.push(Token::Ident(ident));
                }
            }
            '0'..='9' | '.' => {
                let mut num_str = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' {
                        num_str.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let num: f64 = num_str
                    .parse()
                    .map_err(|_| ParseError::new(format!("invalid number: {}", num_str)))?;
                tokens.push(Token::Number(num));
            }
            _ => return Err(ParseError::new(format!("unexpected character: {}", c))),
        }
    }

    Ok(tokens)
}

// Lowest precedence: comparison operators
fn parse_comparison(tokens: &[Token], pos: usize) -> Result<(Expr, usize), ParseError> {
    let (mut left, mut pos) = parse_concat(tokens, pos)?;

    while pos < tokens.len() {
        let op = match &tokens[pos] {
            Token::Lt => Op::Lt,
            Token::Gt => Op::Gt,
            Token::Eq => Op::Eq,
            Token::LtEq => Op::LtEq,
            Token::GtEq => Op::GtEq,
            Token::NotEq => Op::NotEq,
            _ => break,
        };
        let (right, new_pos) = parse_concat(tokens, pos + 1)?;
        left = Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        };
        pos = new_pos;
    }

    Ok((left, pos))
}

// Text concatenation (&)
fn parse_concat(tokens: &[Token], pos: usize) -> Result<(Expr, usize), ParseError> {
    let (mut left, mut pos) = parse_add_sub(tokens, pos)?;

    while pos < tokens.len() {
        if let Token::Ampersand = &tokens[pos] {
            let (right, new_pos) = parse_add_sub(tokens, pos + 1)?;
            left = Expr::Binary {
                op: Op::Concat,
                left: Box::new(left),
                right: Box::new(right),
            };
            pos = new_pos;
        } else {
            break;
        }
    }

    Ok((left, pos))
}

fn parse_add_sub(tokens: &[Token], pos: usize) -> Result<(Expr, usize), ParseError> {
    let (mut left, mut pos) = parse_mul_div(tokens, pos)?;

    while pos < tokens.len() {
        let op = match &tokens[pos] {
            Token::Plus => Op::Add,
            Token::Minus => Op::Sub,
            _ => break,
        };
        let (right, new_pos) = parse_mul_div(tokens, pos + 1)?;
        left = Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        };
        pos = new_pos;
    }

    Ok((left, pos))
}

fn parse_mul_div(tokens: &[Token], pos: usize) -> Result<(Expr, usize), ParseError> {
    let (mut left, mut pos) = parse_power(tokens, pos)?;

    while pos < tokens.len() {
        let op = match &tokens[pos] {
            Token::Star => Op::Mul,
            Token::Slash => Op::Div,
            _ => break,
        };
        let (right, new_pos) = parse_power(tokens, pos + 1)?;
        left = Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        };
        pos = new_pos;
    }

    Ok((left, pos))
}

// Exponentiation (^) - right-associative, binds tighter than * /
fn parse_power(tokens: &[Token], pos: usize) -> Result<(Expr, usize), ParseError> {
    let (base, pos) = parse_primary(tokens, pos)?;

    if pos < tokens.len() {
        if let Token::Caret = &tokens[pos] {
            let (exponent, new_pos) = parse_power(tokens, pos + 1)?;
            return Ok((
                Expr::Binary {
                    op: Op::Pow,
                    left: Box::new(base),
                    right: Box::new(exponent),
                },
                new_pos,
            ));
        }
    }

    Ok((base, pos))
}

fn parse_primary(tokens: &[Token], pos: usize) -> Result<(Expr, usize), ParseError> {
    if pos >= tokens.len() {
        return Err(ParseError::new("unexpected end of expression"));
    }

    match &tokens[pos] {
        Token::Number(n) => Ok((Expr::Number(*n), pos + 1)),
        Token::StringLit(s) => Ok((Expr::Text(s.clone()), pos + 1)),
        Token::CellRef(cell) => {
            // Range (A1:B5)?
            if pos + 2 < tokens.len() {
                if let Token::Colon = &tokens[pos + 1] {
                    if let Token::CellRef(end) = &tokens[pos + 2] {
                        return Ok((Expr::Range(Range::new(*cell, *end)), pos + 3));
                    }
                }
            }
            Ok((Expr::Ref(*cell), pos + 1))
        }
        Token::Ident(name) => {
            let upper = name.to_uppercase();
            if upper == "TRUE" {
                return Ok((Expr::Boolean(true), pos + 1));
            }
            if upper == "FALSE" {
                return Ok((Expr::Boolean(false), pos + 1));
            }
            // Function call
            if pos + 1 < tokens.len() {
                if let Token::LParen = &tokens[pos + 1] {
                    let (args, new_pos) = parse_function_args(tokens, pos + 2)?;
                    return Ok((Expr::Function { name: upper, args }, new_pos));
                }
            }
            // Bare identifier: a label, resolved at evaluation time
            Ok((Expr::Label(name.clone()), pos + 1))
        }
        Token::LParen => {
            let (expr, pos) = parse_comparison(tokens, pos + 1)?;
            match tokens.get(pos) {
                Some(Token::RParen) => Ok((Expr::Group(Box::new(expr)), pos + 1)),
                _ => Err(ParseError::new("missing closing parenthesis")),
            }
        }
        Token::Plus => {
            // Unary plus is a no-op
            parse_primary(tokens, pos + 1)
        }
        Token::Minus => {
            let (operand, pos) = parse_primary(tokens, pos + 1)?;
            Ok((
                Expr::Unary {
                    op: UnaryOp::Neg,
                    operand: Box::new(operand),
                },
                pos,
            ))
        }
        _ => Err(ParseError::new(format!(
            "unexpected token at position {}",
            pos
        ))),
    }
}

fn parse_function_args(tokens: &[Token], pos: usize) -> Result<(Vec<Expr>, usize), ParseError> {
    let mut args = Vec::new();
    let mut pos = pos;

    // Empty call: SUM()
    if let Some(Token::RParen) = tokens.get(pos) {
        return Ok((args, pos + 1));
    }

    loop {
        // Empty argument: next token is , or ) immediately
        if matches!(tokens.get(pos), Some(Token::Comma | Token::RParen)) {
            args.push(Expr::Empty);
            match &tokens[pos] {
                Token::RParen => return Ok((args, pos + 1)),
                Token::Comma => {
                    pos += 1;
                    continue;
                }
                _ => unreachable!(),
            }
        }

        let (arg, new_pos) = parse_comparison(tokens, pos)?;
        args.push(arg);
        pos = new_pos;

        match tokens.get(pos) {
            Some(Token::RParen) => return Ok((args, pos + 1)),
            Some(Token::Comma) => pos += 1,
            _ => {
                return Err(ParseError::new(
                    "missing closing parenthesis in function call",
                ))
            }
        }
    }
}

// =============================================================================
// Expression Formatting
// =============================================================================

/// Format an expression back to formula text with the leading `=`.
pub fn format_expr(expr: &Expr) -> String {
    format!("={}", format_expr_inner(expr))
}

/// Format an expression without the leading `=`.
pub fn format_expr_inner(expr: &Expr) -> String {
    match expr {
        Expr::Empty => String::new(),
        Expr::Number(n) => format_number(*n),
        Expr::Text(s) => format!("\"{}\"", s.replace('"', "\"\"")),
        Expr::Boolean(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        Expr::Ref(cell) => cell.to_string(),
        Expr::Range(range) => range.to_string(),
        Expr::Label(name) => name.clone(),
        Expr::Function { name, args } => {
            let args_str: Vec<String> = args.iter().map(format_expr_inner).collect();
            format!("{}({})", name, args_str.join(","))
        }
        Expr::Unary { op: UnaryOp::Neg, operand } => {
            format!("-{}", format_expr_inner(operand))
        }
        Expr::Binary { op, left, right } => {
            format!(
                "{}{}{}",
                format_expr_inner(left),
                op.symbol(),
                format_expr_inner(right)
            )
        }
        Expr::Group(inner) => format!("({})", format_expr_inner(inner)),
    }
}

pub(crate) fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}
