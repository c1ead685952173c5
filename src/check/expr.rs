// src/check/expr.rs

//! Return expressions of compound tests and the value type they compute on.
//!
//! A return expression combines named sub-results, e.g. `$(a) + $(b)` or
//! `($(used) / $(total)) * 100`. The only visible bindings are `$(name)`
//! references and `NOW`, the current unix time. There are no function calls
//! and no attribute access.
//!
//! Every sub-result is a [`MathValue`]: it behaves as a number for arithmetic
//! and ordering when it parses as one, and as a string otherwise, in which
//! case only `==` and `!=` are allowed.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

/// Numeric operation on something that is not a number.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct MathError(pub String);

/// A value inside an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum MathValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
}

#[derive(Debug, Clone, Copy)]
enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    fn as_f64(self) -> f64 {
        match self {
            Number::Int(i) => i as f64,
            Number::Float(f) => f,
        }
    }
}

impl MathValue {
    /// Wrap a raw result string. Strings stay strings until used as numbers.
    pub fn coerce(raw: &str) -> MathValue {
        MathValue::Str(raw.to_string())
    }

    fn number(&self) -> Result<Number, MathError> {
        match self {
            MathValue::Int(i) => Ok(Number::Int(*i)),
            MathValue::Float(f) => Ok(Number::Float(*f)),
            MathValue::Bool(b) => Ok(Number::Int(i64::from(*b))),
            MathValue::Str(s) => {
                let t = s.trim();
                let parsed = if t.contains('.') {
                    t.parse::<f64>().ok().map(Number::Float)
                } else {
                    t.parse::<i64>().ok().map(Number::Int)
                };
                parsed.ok_or_else(|| MathError(format!("The value '{s}' is not a number")))
            }
        }
    }

    /// Numeric comparison if both sides are numbers, string comparison
    /// otherwise.
    pub fn loose_eq(&self, other: &MathValue) -> bool {
        match (self.number(), other.number()) {
            (Ok(a), Ok(b)) => num_cmp(a, b) == Some(Ordering::Equal),
            _ => self.to_string() == other.to_string(),
        }
    }

    /// Numeric ordering. Fails unless both sides are numbers.
    pub fn compare(&self, other: &MathValue) -> Result<Ordering, MathError> {
        let (a, b) = (self.number()?, other.number()?);
        num_cmp(a, b).ok_or_else(|| MathError("cannot compare NaN".to_string()))
    }

    fn truthy(&self) -> bool {
        match self {
            MathValue::Int(i) => *i != 0,
            MathValue::Float(f) => *f != 0.0,
            MathValue::Bool(b) => *b,
            MathValue::Str(s) => !s.is_empty(),
        }
    }
}

impl fmt::Display for MathValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MathValue::Int(i) => write!(f, "{i}"),
            MathValue::Float(x) => {
                if x.is_finite() && x.fract() == 0.0 && x.abs() < 1e16 {
                    write!(f, "{x:.1}")
                } else {
                    write!(f, "{x}")
                }
            }
            MathValue::Bool(true) => f.write_str("True"),
            MathValue::Bool(false) => f.write_str("False"),
            MathValue::Str(s) => f.write_str(s),
        }
    }
}

fn num_cmp(a: Number, b: Number) -> Option<Ordering> {
    match (a, b) {
        (Number::Int(x), Number::Int(y)) => Some(x.cmp(&y)),
        _ => a.as_f64().partial_cmp(&b.as_f64()),
    }
}

/// Why evaluating an expression failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    #[error("Unknown sub-query in return: {0}")]
    UnknownRef(String),
    #[error(transparent)]
    Math(#[from] MathError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnOp {
    Neg,
    Pos,
    Not,
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Literal(MathValue),
    Ref(String),
    Unary(UnOp, Box<Node>),
    Binary(BinOp, Box<Node>, Box<Node>),
}

/// A parsed return expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    source: String,
    root: Node,
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl Expr {
    /// Parse an expression. The error text describes the syntax problem.
    pub fn parse(source: &str) -> Result<Expr, String> {
        let tokens = tokenize(source)?;
        let mut parser = Parser { tokens, pos: 0 };
        let root = parser.expr(0)?;
        if let Some(tok) = parser.peek() {
            return Err(format!("unexpected {tok:?} in '{source}'"));
        }
        Ok(Expr {
            source: source.to_string(),
            root,
        })
    }

    /// Names referenced via `$(name)` or `NOW`.
    pub fn references(&self) -> Vec<String> {
        let mut out = Vec::new();
        collect_refs(&self.root, &mut out);
        out
    }

    pub fn eval(&self, bindings: &HashMap<String, MathValue>) -> Result<MathValue, EvalError> {
        eval(&self.root, bindings)
    }
}

fn collect_refs(node: &Node, out: &mut Vec<String>) {
    match node {
        Node::Ref(name) => {
            if !out.contains(name) {
                out.push(name.clone());
            }
        }
        Node::Unary(_, inner) => collect_refs(inner, out),
        Node::Binary(_, l, r) => {
            collect_refs(l, out);
            collect_refs(r, out);
        }
        Node::Literal(_) => {}
    }
}

fn eval(node: &Node, env: &HashMap<String, MathValue>) -> Result<MathValue, EvalError> {
    match node {
        Node::Literal(v) => Ok(v.clone()),
        Node::Ref(name) => env
            .get(name)
            .cloned()
            .ok_or_else(|| EvalError::UnknownRef(name.clone())),
        Node::Unary(op, inner) => {
            let v = eval(inner, env)?;
            match op {
                UnOp::Not => Ok(MathValue::Bool(!v.truthy())),
                UnOp::Pos => Ok(from_number(v.number()?)),
                UnOp::Neg => Ok(match v.number()? {
                    Number::Int(i) => i
                        .checked_neg()
                        .map(MathValue::Int)
                        .unwrap_or(MathValue::Float(-(i as f64))),
                    Number::Float(f) => MathValue::Float(-f),
                }),
            }
        }
        Node::Binary(BinOp::And, l, r) => {
            let lv = eval(l, env)?;
            if !lv.truthy() { Ok(lv) } else { eval(r, env) }
        }
        Node::Binary(BinOp::Or, l, r) => {
            let lv = eval(l, env)?;
            if lv.truthy() { Ok(lv) } else { eval(r, env) }
        }
        Node::Binary(op, l, r) => {
            let (lv, rv) = (eval(l, env)?, eval(r, env)?);
            Ok(binary(*op, &lv, &rv)?)
        }
    }
}

fn from_number(n: Number) -> MathValue {
    match n {
        Number::Int(i) => MathValue::Int(i),
        Number::Float(f) => MathValue::Float(f),
    }
}

fn binary(op: BinOp, l: &MathValue, r: &MathValue) -> Result<MathValue, MathError> {
    match op {
        BinOp::Eq => return Ok(MathValue::Bool(l.loose_eq(r))),
        BinOp::Ne => return Ok(MathValue::Bool(!l.loose_eq(r))),
        BinOp::Lt => return Ok(MathValue::Bool(l.compare(r)?.is_lt())),
        BinOp::Le => return Ok(MathValue::Bool(l.compare(r)?.is_le())),
        BinOp::Gt => return Ok(MathValue::Bool(l.compare(r)?.is_gt())),
        BinOp::Ge => return Ok(MathValue::Bool(l.compare(r)?.is_ge())),
        _ => {}
    }

    let (a, b) = (l.number()?, r.number()?);
    let zero_div = || MathError("division by zero".to_string());

    let out = match (op, a, b) {
        (BinOp::Add, Number::Int(x), Number::Int(y)) => int_or_float(x.checked_add(y), x as f64 + y as f64),
        (BinOp::Sub, Number::Int(x), Number::Int(y)) => int_or_float(x.checked_sub(y), x as f64 - y as f64),
        (BinOp::Mul, Number::Int(x), Number::Int(y)) => int_or_float(x.checked_mul(y), x as f64 * y as f64),
        (BinOp::Add, _, _) => MathValue::Float(a.as_f64() + b.as_f64()),
        (BinOp::Sub, _, _) => MathValue::Float(a.as_f64() - b.as_f64()),
        (BinOp::Mul, _, _) => MathValue::Float(a.as_f64() * b.as_f64()),
        (BinOp::Div, _, _) => {
            if b.as_f64() == 0.0 {
                return Err(zero_div());
            }
            MathValue::Float(a.as_f64() / b.as_f64())
        }
        (BinOp::FloorDiv, Number::Int(x), Number::Int(y)) => {
            if y == 0 {
                return Err(zero_div());
            }
            let q = x.wrapping_div(y);
            let adjust = x.wrapping_rem(y) != 0 && ((x < 0) != (y < 0));
            MathValue::Int(if adjust { q - 1 } else { q })
        }
        (BinOp::FloorDiv, _, _) => {
            if b.as_f64() == 0.0 {
                return Err(zero_div());
            }
            MathValue::Float((a.as_f64() / b.as_f64()).floor())
        }
        (BinOp::Mod, Number::Int(x), Number::Int(y)) => {
            if y == 0 {
                return Err(zero_div());
            }
            let m = x.wrapping_rem(y);
            MathValue::Int(if m != 0 && ((m < 0) != (y < 0)) { m + y } else { m })
        }
        (BinOp::Mod, _, _) => {
            let (x, y) = (a.as_f64(), b.as_f64());
            if y == 0.0 {
                return Err(zero_div());
            }
            let m = x % y;
            MathValue::Float(if m != 0.0 && ((m < 0.0) != (y < 0.0)) { m + y } else { m })
        }
        (BinOp::Pow, Number::Int(x), Number::Int(y)) if y >= 0 => {
            let exact = u32::try_from(y).ok().and_then(|e| x.checked_pow(e));
            int_or_float(exact, (x as f64).powf(y as f64))
        }
        (BinOp::Pow, _, _) => MathValue::Float(a.as_f64().powf(b.as_f64())),
        _ => return Err(MathError(format!("unsupported operator {op:?}"))),
    };
    Ok(out)
}

fn int_or_float(exact: Option<i64>, approx: f64) -> MathValue {
    exact.map(MathValue::Int).unwrap_or(MathValue::Float(approx))
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(MathValue),
    Str(String),
    Ref(String),
    Ident(String),
    Op(&'static str),
    LParen,
    RParen,
}

const OPERATORS: &[&str] = &[
    "**", "//", "==", "!=", "<>", "<=", ">=", "+", "-", "*", "/", "%", "<", ">",
];

fn tokenize(src: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = src.chars().collect();
    let mut out = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c == '$' {
            if chars.get(i + 1) != Some(&'(') {
                return Err(format!("expected '(' after '$' at offset {i}"));
            }
            let start = i + 2;
            let end = chars[start..]
                .iter()
                .position(|&c| c == ')')
                .map(|p| start + p)
                .ok_or_else(|| "unterminated $( reference".to_string())?;
            let name: String = chars[start..end].iter().collect();
            if name.is_empty() {
                return Err("empty $() reference".to_string());
            }
            out.push(Token::Ref(name));
            i = end + 1;
        } else if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(|d| d.is_ascii_digit())) {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            let value = if text.contains('.') {
                text.parse::<f64>().map(MathValue::Float).map_err(|e| format!("bad number '{text}': {e}"))?
            } else {
                text.parse::<i64>().map(MathValue::Int).map_err(|e| format!("bad number '{text}': {e}"))?
            };
            out.push(Token::Num(value));
        } else if c == '\'' || c == '"' {
            let quote = c;
            let mut s = String::new();
            i += 1;
            loop {
                match chars.get(i) {
                    None => return Err("unterminated string literal".to_string()),
                    Some(&ch) if ch == quote => {
                        i += 1;
                        break;
                    }
                    Some('\\') => {
                        let escaped = chars.get(i + 1).ok_or("unterminated string literal")?;
                        s.push(match escaped {
                            'n' => '\n',
                            't' => '\t',
                            other => *other,
                        });
                        i += 2;
                    }
                    Some(&ch) => {
                        s.push(ch);
                        i += 1;
                    }
                }
            }
            out.push(Token::Str(s));
        } else if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            out.push(Token::Ident(chars[start..i].iter().collect()));
        } else if c == '(' {
            out.push(Token::LParen);
            i += 1;
        } else if c == ')' {
            out.push(Token::RParen);
            i += 1;
        } else {
            let rest: String = chars[i..chars.len().min(i + 2)].iter().collect();
            let op = OPERATORS
                .iter()
                .copied()
                .find(|op| rest.starts_with(*op))
                .ok_or_else(|| format!("unexpected character '{c}' at offset {i}"))?;
            out.push(Token::Op(op));
            i += op.chars().count();
        }
    }
    Ok(out)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    /// Precedence climbing. Higher binds tighter.
    fn expr(&mut self, min_prec: u8) -> Result<Node, String> {
        let mut lhs = self.prefix()?;

        loop {
            let Some((op, prec, right_assoc)) = self.peek().and_then(infix) else {
                break;
            };
            if prec < min_prec {
                break;
            }
            self.pos += 1;
            let next_min = if right_assoc { prec } else { prec + 1 };
            let rhs = self.expr(next_min)?;
            lhs = Node::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn prefix(&mut self) -> Result<Node, String> {
        match self.next() {
            Some(Token::Num(v)) => Ok(Node::Literal(v)),
            Some(Token::Str(s)) => Ok(Node::Literal(MathValue::Str(s))),
            Some(Token::Ref(name)) => Ok(Node::Ref(name)),
            Some(Token::Ident(word)) => match word.as_str() {
                "NOW" => Ok(Node::Ref("NOW".to_string())),
                "True" => Ok(Node::Literal(MathValue::Bool(true))),
                "False" => Ok(Node::Literal(MathValue::Bool(false))),
                "not" => Ok(Node::Unary(UnOp::Not, Box::new(self.expr(PREC_NOT)?))),
                other => Err(format!("unknown name '{other}'")),
            },
            Some(Token::Op("-")) => Ok(Node::Unary(UnOp::Neg, Box::new(self.expr(PREC_UNARY)?))),
            Some(Token::Op("+")) => Ok(Node::Unary(UnOp::Pos, Box::new(self.expr(PREC_UNARY)?))),
            Some(Token::LParen) => {
                let inner = self.expr(0)?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err("missing ')'".to_string()),
                }
            }
            Some(tok) => Err(format!("unexpected {tok:?}")),
            None => Err("unexpected end of expression".to_string()),
        }
    }
}

const PREC_NOT: u8 = 3;
const PREC_UNARY: u8 = 7;

fn infix(tok: &Token) -> Option<(BinOp, u8, bool)> {
    let entry = match tok {
        Token::Ident(w) if w == "or" => (BinOp::Or, 1, false),
        Token::Ident(w) if w == "and" => (BinOp::And, 2, false),
        Token::Op("==") => (BinOp::Eq, 4, false),
        Token::Op("!=") | Token::Op("<>") => (BinOp::Ne, 4, false),
        Token::Op("<") => (BinOp::Lt, 4, false),
        Token::Op("<=") => (BinOp::Le, 4, false),
        Token::Op(">") => (BinOp::Gt, 4, false),
        Token::Op(">=") => (BinOp::Ge, 4, false),
        Token::Op("+") => (BinOp::Add, 5, false),
        Token::Op("-") => (BinOp::Sub, 5, false),
        Token::Op("*") => (BinOp::Mul, 6, false),
        Token::Op("/") => (BinOp::Div, 6, false),
        Token::Op("//") => (BinOp::FloorDiv, 6, false),
        Token::Op("%") => (BinOp::Mod, 6, false),
        Token::Op("**") => (BinOp::Pow, 8, true),
        _ => return None,
    };
    Some(entry)
}
