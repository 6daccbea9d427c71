//! Condition expressions for declarative access rules.
//!
//! Supported syntax:
//! - Comparisons: `==`, `!=`, `>`, `<`, `>=`, `<=`
//! - Boolean operators: `&&`, `||`, `!` (`&&` and `||` short-circuit)
//! - Membership: `x in list`
//! - Dot-path access into the decision context: `authToken.role`,
//!   `query.type`, `resource.ownerId`, `socket.id`, `action`
//! - Literals: integers, floats, `"strings"`, `true`, `false`, `null`
//! - Parentheses for grouping
//!
//! Missing paths resolve to `null`, so `authToken != null` reads as "the
//! caller is signed in".

use std::fmt;
use std::iter::Peekable;
use std::str::CharIndices;

use async_trait::async_trait;
use serde_json::{Number, Value};

use crate::authz::engine::Evaluator;
use crate::authz::errors::{AuthzError, EvaluationError};
use crate::authz::types::AccessContext;

// ─── AST ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Path(Vec<String>),
    Not(Box<Expr>),
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    In,
    And,
    Or,
}

impl BinOp {
    /// Higher binds tighter. Comparisons do not chain.
    fn precedence(self) -> u8 {
        match self {
            BinOp::Or => 1,
            BinOp::And => 2,
            _ => 3,
        }
    }
}

// ─── Tokenizer ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(Number),
    Str(String),
    Op(BinOp),
    Bang,
    Dot,
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>, AuthzError> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '.' => {
                chars.next();
                tokens.push(Token::Dot);
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '"' => {
                chars.next();
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some((_, '"')) => break,
                        Some((_, '\\')) => match chars.next() {
                            Some((_, '"')) => s.push('"'),
                            Some((_, '\\')) => s.push('\\'),
                            Some((_, 'n')) => s.push('\n'),
                            Some((_, other)) => {
                                return Err(AuthzError::InvalidCondition(format!(
                                    "unknown escape `\\{other}` in string literal"
                                )));
                            }
                            None => {
                                return Err(AuthzError::InvalidCondition(
                                    "unterminated string literal".into(),
                                ));
                            }
                        },
                        Some((_, ch)) => s.push(ch),
                        None => {
                            return Err(AuthzError::InvalidCondition(
                                "unterminated string literal".into(),
                            ));
                        }
                    }
                }
                tokens.push(Token::Str(s));
            }
            '=' | '!' | '<' | '>' | '&' | '|' => {
                chars.next();
                let token = match c {
                    '=' if eat(&mut chars, '=') => Token::Op(BinOp::Eq),
                    '!' if eat(&mut chars, '=') => Token::Op(BinOp::Ne),
                    '!' => Token::Bang,
                    '>' if eat(&mut chars, '=') => Token::Op(BinOp::Ge),
                    '>' => Token::Op(BinOp::Gt),
                    '<' if eat(&mut chars, '=') => Token::Op(BinOp::Le),
                    '<' => Token::Op(BinOp::Lt),
                    '&' if eat(&mut chars, '&') => Token::Op(BinOp::And),
                    '|' if eat(&mut chars, '|') => Token::Op(BinOp::Or),
                    _ => {
                        return Err(AuthzError::InvalidCondition(format!(
                            "unexpected character `{c}` at offset {start}"
                        )));
                    }
                };
                tokens.push(token);
            }
            c if c.is_ascii_digit() || c == '-' => {
                let mut end = start + c.len_utf8();
                chars.next();
                while let Some(&(i, d)) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' {
                        end = i + d.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                let text = &input[start..end];
                let number = text
                    .parse::<i64>()
                    .map(Number::from)
                    .ok()
                    .or_else(|| text.parse::<f64>().ok().and_then(Number::from_f64))
                    .ok_or_else(|| {
                        AuthzError::InvalidCondition(format!("invalid number `{text}`"))
                    })?;
                tokens.push(Token::Number(number));
            }
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                let mut end = start;
                while let Some(&(i, d)) = chars.peek() {
                    if d.is_alphanumeric() || d == '_' || d == '$' {
                        end = i + d.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                let word = &input[start..end];
                tokens.push(match word {
                    "in" => Token::Op(BinOp::In),
                    _ => Token::Ident(word.to_string()),
                });
            }
            other => {
                return Err(AuthzError::InvalidCondition(format!(
                    "unexpected character `{other}` at offset {start}"
                )));
            }
        }
    }
    Ok(tokens)
}

/// Consume the next char if it is `want`.
fn eat(chars: &mut Peekable<CharIndices<'_>>, want: char) -> bool {
    if chars.peek().map(|&(_, c)| c) == Some(want) {
        chars.next();
        true
    } else {
        false
    }
}

// ─── Parser ─────────────────────────────────────────────────────────────

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    /// Precedence climbing over binary operators.
    fn parse_binary(&mut self, min_precedence: u8) -> Result<Expr, AuthzError> {
        let mut left = self.parse_unary()?;
        while let Some(Token::Op(op)) = self.peek().cloned() {
            let precedence = op.precedence();
            if precedence < min_precedence {
                break;
            }
            self.advance();
            let right = self.parse_binary(precedence + 1)?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
            if precedence == 3 {
                if let Some(Token::Op(next)) = self.peek() {
                    if next.precedence() == 3 {
                        return Err(AuthzError::InvalidCondition(
                            "comparisons cannot be chained, use `&&`".into(),
                        ));
                    }
                }
            }
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, AuthzError> {
        if self.peek() == Some(&Token::Bang) {
            self.advance();
            return Ok(Expr::Not(Box::new(self.parse_unary()?)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, AuthzError> {
        match self.advance() {
            Some(Token::Number(n)) => Ok(Expr::Literal(Value::Number(n))),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::Ident(word)) => match word.as_str() {
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                "null" => Ok(Expr::Literal(Value::Null)),
                _ => {
                    let mut path = vec![word];
                    while self.peek() == Some(&Token::Dot) {
                        self.advance();
                        match self.advance() {
                            Some(Token::Ident(seg)) => path.push(seg),
                            _ => {
                                return Err(AuthzError::InvalidCondition(
                                    "expected identifier after `.`".into(),
                                ));
                            }
                        }
                    }
                    Ok(Expr::Path(path))
                }
            },
            Some(Token::LParen) => {
                let expr = self.parse_binary(1)?;
                if self.advance() != Some(Token::RParen) {
                    return Err(AuthzError::InvalidCondition(
                        "expected closing parenthesis `)`".into(),
                    ));
                }
                Ok(expr)
            }
            Some(other) => Err(AuthzError::InvalidCondition(format!(
                "unexpected token: {other:?}"
            ))),
            None => Err(AuthzError::InvalidCondition(
                "unexpected end of expression".into(),
            )),
        }
    }
}

/// Parse a condition expression string into an AST.
pub fn parse_condition(input: &str) -> Result<Expr, AuthzError> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(AuthzError::InvalidCondition("empty expression".into()));
    }
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_binary(1)?;
    if let Some(trailing) = parser.peek() {
        return Err(AuthzError::InvalidCondition(format!(
            "unexpected trailing token: {trailing:?}"
        )));
    }
    Ok(expr)
}

// ─── Evaluator ──────────────────────────────────────────────────────────

/// Evaluate `expr` against a JSON context. The result must be a boolean.
pub fn evaluate(expr: &Expr, context: &Value) -> Result<bool, EvaluationError> {
    match eval(expr, context)? {
        Value::Bool(b) => Ok(b),
        other => Err(EvaluationError::failed(format!(
            "condition must evaluate to a boolean, got `{other}`"
        ))),
    }
}

fn eval(expr: &Expr, context: &Value) -> Result<Value, EvaluationError> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Path(segments) => Ok(segments
            .iter()
            .try_fold(context, |current, seg| current.get(seg))
            .cloned()
            .unwrap_or(Value::Null)),
        Expr::Not(inner) => Ok(Value::Bool(!eval_bool(inner, context, "!")?)),
        Expr::Binary { op, left, right } => match op {
            BinOp::And => Ok(Value::Bool(
                eval_bool(left, context, "&&")? && eval_bool(right, context, "&&")?,
            )),
            BinOp::Or => Ok(Value::Bool(
                eval_bool(left, context, "||")? || eval_bool(right, context, "||")?,
            )),
            _ => {
                let l = eval(left, context)?;
                let r = eval(right, context)?;
                compare(*op, &l, &r).map(Value::Bool)
            }
        },
    }
}

fn eval_bool(expr: &Expr, context: &Value, op: &str) -> Result<bool, EvaluationError> {
    match eval(expr, context)? {
        Value::Bool(b) => Ok(b),
        other => Err(EvaluationError::failed(format!(
            "`{op}` requires boolean operands, got `{other}`"
        ))),
    }
}

fn compare(op: BinOp, l: &Value, r: &Value) -> Result<bool, EvaluationError> {
    match op {
        BinOp::Eq => Ok(loose_eq(l, r)),
        BinOp::Ne => Ok(!loose_eq(l, r)),
        BinOp::In => match r {
            Value::Array(items) => Ok(items.iter().any(|item| loose_eq(l, item))),
            Value::Null => Ok(false),
            other => Err(EvaluationError::failed(format!(
                "`in` requires an array on the right side, got `{other}`"
            ))),
        },
        BinOp::Gt | BinOp::Lt | BinOp::Ge | BinOp::Le => {
            let ordering = match (l, r) {
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                _ => match (l.as_f64(), r.as_f64()) {
                    (Some(a), Some(b)) => a.partial_cmp(&b),
                    _ => None,
                },
            }
            .ok_or_else(|| {
                EvaluationError::failed(format!("cannot order `{l}` and `{r}`"))
            })?;
            Ok(match op {
                BinOp::Gt => ordering.is_gt(),
                BinOp::Lt => ordering.is_lt(),
                BinOp::Ge => ordering.is_ge(),
                _ => ordering.is_le(),
            })
        }
        BinOp::And | BinOp::Or => unreachable!("boolean operators are evaluated lazily"),
    }
}

/// Structural equality, except that numbers compare by value (`1 == 1.0`).
fn loose_eq(l: &Value, r: &Value) -> bool {
    match (l, r) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => l == r,
    }
}

// ─── Evaluator adapter ──────────────────────────────────────────────────

/// A compiled condition, usable as a rule evaluator.
#[derive(Debug, Clone)]
pub struct Condition {
    source: String,
    expr: Expr,
}

impl Condition {
    pub fn parse(source: &str) -> Result<Self, AuthzError> {
        Ok(Self {
            source: source.to_string(),
            expr: parse_condition(source)?,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, context: &Value) -> Result<bool, EvaluationError> {
        evaluate(&self.expr, context)
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

#[async_trait]
impl Evaluator for Condition {
    async fn evaluate(&self, ctx: &AccessContext) -> Result<bool, EvaluationError> {
        self.matches(&ctx.to_value())
    }
}
