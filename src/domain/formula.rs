//! Formula expressions.
//!
//! A formula is plain arithmetic over numeric literals and `{Parameter Name}`
//! placeholders:
//!
//! ```text
//! formula  := sum
//! sum      := product (('+' | '-') product)*
//! product  := unary (('*' | '/') unary)*
//! unary    := ('+' | '-') unary | primary
//! primary  := number | '{' name '}' | '(' sum ')'
//! ```
//!
//! Nothing else is accepted: no functions, no identifiers outside braces, no
//! other operators.

use std::{collections::BTreeSet, fmt, str::FromStr};

/// Maximum nesting of parentheses and unary signs.
const MAX_DEPTH: usize = 64;

/// Errors raised while parsing a formula.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormulaError {
    /// The formula contains no tokens.
    #[error("formula is empty")]
    Empty,

    /// A character outside the formula language.
    #[error("unexpected character '{character}' at offset {offset}")]
    UnexpectedCharacter {
        /// Byte offset into the source.
        offset: usize,
        /// The offending character.
        character: char,
    },

    /// A `{` without a matching `}`.
    #[error("unterminated placeholder starting at offset {offset}")]
    UnterminatedPlaceholder {
        /// Byte offset of the opening brace.
        offset: usize,
    },

    /// `{}` with no name.
    #[error("empty placeholder at offset {offset}")]
    EmptyPlaceholder {
        /// Byte offset of the opening brace.
        offset: usize,
    },

    /// A malformed numeric literal such as `1.2.3`.
    #[error("invalid number '{literal}' at offset {offset}")]
    InvalidNumber {
        /// Byte offset of the literal.
        offset: usize,
        /// The literal text.
        literal: String,
    },

    /// A token in a position the grammar does not allow.
    #[error("unexpected '{found}' at offset {offset}")]
    UnexpectedToken {
        /// Byte offset of the token.
        offset: usize,
        /// The token text.
        found: String,
    },

    /// The formula ended in the middle of an expression.
    #[error("formula ends unexpectedly")]
    UnexpectedEnd,

    /// Parentheses or signs nested deeper than the parser allows.
    #[error("formula is nested too deeply")]
    TooDeep,
}

/// Errors raised while evaluating a parsed formula.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EvalError {
    /// One or more referenced parameters have no value yet.
    #[error("waiting for {}", .0.join(", "))]
    Unresolved(Vec<String>),

    /// A division whose divisor evaluated to zero.
    #[error("division by zero")]
    DivisionByZero,

    /// The result overflowed or is not a number.
    #[error("result is not a finite number")]
    NonFinite,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Placeholder(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Placeholder(name) => write!(f, "{{{name}}}"),
            Self::Plus => f.write_str("+"),
            Self::Minus => f.write_str("-"),
            Self::Star => f.write_str("*"),
            Self::Slash => f.write_str("/"),
            Self::LParen => f.write_str("("),
            Self::RParen => f.write_str(")"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Number(f64),
    Reference(String),
    Negate(Box<Expr>),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

/// A parsed formula.
///
/// # Examples
///
/// ```
/// use labcore::Formula;
///
/// let formula = Formula::parse("{Total Cholesterol} - {HDL} - 20").unwrap();
/// assert_eq!(
///     formula.references().collect::<Vec<_>>(),
///     ["Total Cholesterol", "HDL"]
/// );
///
/// let value = formula
///     .evaluate(|name| match name {
///         "Total Cholesterol" => Some(200.0),
///         "HDL" => Some(50.0),
///         _ => None,
///     })
///     .unwrap();
/// assert!((value - 130.0).abs() < f64::EPSILON);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
    source: String,
    expr: Expr,
    references: Vec<String>,
}

impl Formula {
    /// Parses a formula.
    ///
    /// # Errors
    ///
    /// Returns a [`FormulaError`] if the source is not a valid formula.
    pub fn parse(source: &str) -> Result<Self, FormulaError> {
        let tokens = tokenize(source)?;
        if tokens.is_empty() {
            return Err(FormulaError::Empty);
        }
        let expr = Parser::new(tokens).parse()?;

        let mut seen = BTreeSet::new();
        let mut references = Vec::new();
        collect_references(&expr, &mut seen, &mut references);

        Ok(Self {
            source: source.to_string(),
            expr,
            references,
        })
    }

    /// The original formula text.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Names referenced by the formula, deduplicated, in order of first
    /// appearance.
    pub fn references(&self) -> impl Iterator<Item = &str> + '_ {
        self.references.iter().map(String::as_str)
    }

    /// Evaluates the formula, resolving placeholders through `lookup`.
    ///
    /// # Errors
    ///
    /// - [`EvalError::Unresolved`] listing every reference `lookup` has no
    ///   value for. Nothing is evaluated in that case.
    /// - [`EvalError::DivisionByZero`] or [`EvalError::NonFinite`] when the
    ///   arithmetic does not produce a finite number.
    pub fn evaluate<F>(&self, lookup: F) -> Result<f64, EvalError>
    where
        F: Fn(&str) -> Option<f64>,
    {
        let missing: Vec<String> = self
            .references
            .iter()
            .filter(|name| lookup(name).is_none_or(|v| !v.is_finite()))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(EvalError::Unresolved(missing));
        }

        let value = eval(&self.expr, &lookup)?;
        if value.is_finite() {
            Ok(value)
        } else {
            Err(EvalError::NonFinite)
        }
    }
}

impl FromStr for Formula {
    type Err = FormulaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn collect_references(expr: &Expr, seen: &mut BTreeSet<String>, out: &mut Vec<String>) {
    match expr {
        Expr::Number(_) => {}
        Expr::Reference(name) => {
            if seen.insert(name.clone()) {
                out.push(name.clone());
            }
        }
        Expr::Negate(inner) => collect_references(inner, seen, out),
        Expr::Binary { left, right, .. } => {
            collect_references(left, seen, out);
            collect_references(right, seen, out);
        }
    }
}

fn eval<F>(expr: &Expr, lookup: &F) -> Result<f64, EvalError>
where
    F: Fn(&str) -> Option<f64>,
{
    match expr {
        Expr::Number(n) => Ok(*n),
        Expr::Reference(name) => {
            lookup(name).ok_or_else(|| EvalError::Unresolved(vec![name.clone()]))
        }
        Expr::Negate(inner) => Ok(-eval(inner, lookup)?),
        Expr::Binary { op, left, right } => {
            let left = eval(left, lookup)?;
            let right = eval(right, lookup)?;
            match op {
                BinaryOp::Add => Ok(left + right),
                BinaryOp::Subtract => Ok(left - right),
                BinaryOp::Multiply => Ok(left * right),
                BinaryOp::Divide if right == 0.0 => Err(EvalError::DivisionByZero),
                BinaryOp::Divide => Ok(left / right),
            }
        }
    }
}

fn tokenize(source: &str) -> Result<Vec<(usize, Token)>, FormulaError> {
    let mut tokens = Vec::new();
    let mut chars = source.char_indices().peekable();

    while let Some((offset, c)) = chars.next() {
        let token = match c {
            c if c.is_whitespace() => continue,
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' => Token::Star,
            '/' => Token::Slash,
            '(' => Token::LParen,
            ')' => Token::RParen,
            '{' => {
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some((_, '}')) => break,
                        Some((_, '{')) | None => {
                            return Err(FormulaError::UnterminatedPlaceholder { offset });
                        }
                        Some((_, c)) => name.push(c),
                    }
                }
                if name.trim().is_empty() {
                    return Err(FormulaError::EmptyPlaceholder { offset });
                }
                Token::Placeholder(name)
            }
            c if c.is_ascii_digit() || c == '.' => {
                let mut literal = String::from(c);
                while let Some(&(_, next)) = chars.peek() {
                    if next.is_ascii_digit() || next == '.' {
                        literal.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let value = literal
                    .parse::<f64>()
                    .map_err(|_| FormulaError::InvalidNumber { offset, literal })?;
                Token::Number(value)
            }
            character => return Err(FormulaError::UnexpectedCharacter { offset, character }),
        };
        tokens.push((offset, token));
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    index: usize,
    depth: usize,
}

impl Parser {
    const fn new(tokens: Vec<(usize, Token)>) -> Self {
        Self {
            tokens,
            index: 0,
            depth: 0,
        }
    }

    fn parse(mut self) -> Result<Expr, FormulaError> {
        let expr = self.parse_sum()?;
        match self.tokens.get(self.index) {
            None => Ok(expr),
            Some((offset, token)) => Err(FormulaError::UnexpectedToken {
                offset: *offset,
                found: token.to_string(),
            }),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.index).map(|(_, token)| token)
    }

    fn next(&mut self) -> Option<(usize, Token)> {
        let token = self.tokens.get(self.index).cloned();
        if token.is_some() {
            self.index += 1;
        }
        token
    }

    fn descend(&mut self) -> Result<(), FormulaError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(FormulaError::TooDeep);
        }
        Ok(())
    }

    fn parse_sum(&mut self) -> Result<Expr, FormulaError> {
        let mut expr = self.parse_product()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Subtract,
                _ => break,
            };
            self.next();
            let right = self.parse_product()?;
            expr = Expr::Binary {
                op,
                left: Box::new(expr),
                right: Box::new(right),
            };
        }
        Ok(expr)
    }

    fn parse_product(&mut self) -> Result<Expr, FormulaError> {
        let mut expr = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Multiply,
                Some(Token::Slash) => BinaryOp::Divide,
                _ => break,
            };
            self.next();
            let right = self.parse_unary()?;
            expr = Expr::Binary {
                op,
                left: Box::new(expr),
                right: Box::new(right),
            };
        }
        Ok(expr)
    }

    fn parse_unary(&mut self) -> Result<Expr, FormulaError> {
        match self.peek() {
            Some(Token::Minus) => {
                self.next();
                self.descend()?;
                let inner = self.parse_unary()?;
                self.depth -= 1;
                Ok(Expr::Negate(Box::new(inner)))
            }
            Some(Token::Plus) => {
                self.next();
                self.descend()?;
                let inner = self.parse_unary()?;
                self.depth -= 1;
                Ok(inner)
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, FormulaError> {
        match self.next() {
            Some((_, Token::Number(n))) => Ok(Expr::Number(n)),
            Some((_, Token::Placeholder(name))) => Ok(Expr::Reference(name)),
            Some((_, Token::LParen)) => {
                self.descend()?;
                let expr = self.parse_sum()?;
                self.depth -= 1;
                match self.next() {
                    Some((_, Token::RParen)) => Ok(expr),
                    Some((offset, token)) => Err(FormulaError::UnexpectedToken {
                        offset,
                        found: token.to_string(),
                    }),
                    None => Err(FormulaError::UnexpectedEnd),
                }
            }
            Some((offset, token)) => Err(FormulaError::UnexpectedToken {
                offset,
                found: token.to_string(),
            }),
            None => Err(FormulaError::UnexpectedEnd),
        }
    }
}
