// src/check/threshold.rs

//! Threshold expressions such as `> 10`, `!= OK` or `=~ ^err`.

use std::fmt;

use regex::{Regex, RegexBuilder};

use crate::check::expr::{MathError, MathValue};

const OPERATOR_CHARS: &[char] = &['<', '>', '=', '!', '~'];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Gt,
    Lt,
    Ge,
    Le,
    Eq,
    Ne,
    Match,
    NotMatch,
}

impl Op {
    fn parse(s: &str) -> Option<Op> {
        match s {
            ">" => Some(Op::Gt),
            "<" => Some(Op::Lt),
            ">=" => Some(Op::Ge),
            "<=" => Some(Op::Le),
            "=" | "==" => Some(Op::Eq),
            "!=" | "<>" => Some(Op::Ne),
            "=~" => Some(Op::Match),
            "!~" => Some(Op::NotMatch),
            _ => None,
        }
    }
}

/// A compiled threshold. [`Tester::test`] reports whether it was crossed.
#[derive(Debug, Clone)]
pub struct Tester {
    source: String,
    op: Op,
    operand: String,
    regex: Option<Regex>,
}

impl fmt::Display for Tester {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl Tester {
    /// Compile a threshold expression. Errors describe what is wrong.
    pub fn parse(expr: &str) -> Result<Self, String> {
        let source = expr.trim().to_string();

        // One or two operator characters, optional whitespace, an operand.
        let op_len = source
            .chars()
            .take(2)
            .take_while(|c| OPERATOR_CHARS.contains(c))
            .count();
        let (op_str, rest) = source.split_at(op_len);
        let operand = rest.trim_start().to_string();
        if op_len == 0 || operand.is_empty() {
            return Err(format!("invalid threshold '{source}'"));
        }

        let op = Op::parse(op_str)
            .ok_or_else(|| format!("invalid threshold operator '{op_str}'"))?;

        let regex = match op {
            Op::Match | Op::NotMatch => Some(
                RegexBuilder::new(&operand)
                    .multi_line(true)
                    .build()
                    .map_err(|e| format!("invalid threshold regex '{operand}': {e}"))?,
            ),
            _ => None,
        };

        Ok(Self {
            source,
            op,
            operand,
            regex,
        })
    }

    /// `Ok(true)` when `value` crosses the threshold.
    ///
    /// Ordering operators need both sides to be numbers; `==` and `!=` fall
    /// back to comparing strings.
    pub fn test(&self, value: &str) -> Result<bool, MathError> {
        if let Some(regex) = &self.regex {
            let found = regex.is_match(value);
            return Ok(match self.op {
                Op::NotMatch => !found,
                _ => found,
            });
        }

        let lhs = MathValue::coerce(value);
        let rhs = MathValue::coerce(&self.operand);
        match self.op {
            Op::Eq => Ok(lhs.loose_eq(&rhs)),
            Op::Ne => Ok(!lhs.loose_eq(&rhs)),
            Op::Gt => Ok(lhs.compare(&rhs)?.is_gt()),
            Op::Lt => Ok(lhs.compare(&rhs)?.is_lt()),
            Op::Ge => Ok(lhs.compare(&rhs)?.is_ge()),
            Op::Le => Ok(lhs.compare(&rhs)?.is_le()),
            Op::Match | Op::NotMatch => Ok(false),
        }
    }
}
