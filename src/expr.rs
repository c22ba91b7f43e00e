//! Restricted condition expressions
//!
//! Condition nodes evaluate a single comparison over the placeholder
//! context: `lhs op rhs` with `==`, `!=`, `<`, `<=`, `>`, `>=`, or a bare
//! operand tested for truthiness. Operands are quoted strings, numbers,
//! `true`/`false`/`null`, or dotted placeholder paths. Deliberately not a
//! scripting language.

use serde_json::Value;
use thiserror::Error;

use crate::path;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExprError {
    #[error("expression is empty")]
    Empty,
    #[error("unknown placeholder '{0}' in expression")]
    UnknownPlaceholder(String),
    #[error("cannot resolve '{0}': {1}")]
    BadPath(String, String),
    #[error("cannot order {lhs} and {rhs} with '{op}'")]
    Incomparable { op: String, lhs: String, rhs: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    Ne,
    Le,
    Ge,
    Lt,
    Gt,
}

impl Op {
    fn symbol(self) -> &'static str {
        match self {
            Op::Eq => "==",
            Op::Ne => "!=",
            Op::Le => "<=",
            Op::Ge => ">=",
            Op::Lt => "<",
            Op::Gt => ">",
        }
    }
}

/// Evaluate an expression against the placeholder scope.
pub fn evaluate(expression: &str, scope: &serde_json::Map<String, Value>) -> Result<bool, ExprError> {
    let expr = expression.trim();
    if expr.is_empty() {
        return Err(ExprError::Empty);
    }

    match split_comparison(expr) {
        Some((lhs, op, rhs)) => {
            let lhs = operand(lhs, scope)?;
            let rhs = operand(rhs, scope)?;
            compare(op, &lhs, &rhs)
        }
        None => Ok(truthy(&operand(expr, scope)?)),
    }
}

/// Find the first top-level comparison operator outside quotes.
fn split_comparison(expr: &str) -> Option<(&str, Op, &str)> {
    let bytes = expr.as_bytes();
    let mut quote: Option<u8> = None;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) => {
                if b == q {
                    quote = None;
                }
            }
            None => match b {
                b'\'' | b'"' => quote = Some(b),
                b'=' if i + 1 < bytes.len() && bytes[i + 1] == b'=' => {
                    return Some((&expr[..i], Op::Eq, &expr[i + 2..]));
                }
                b'!' if i + 1 < bytes.len() && bytes[i + 1] == b'=' => {
                    return Some((&expr[..i], Op::Ne, &expr[i + 2..]));
                }
                b'<' => {
                    return if i + 1 < bytes.len() && bytes[i + 1] == b'=' {
                        Some((&expr[..i], Op::Le, &expr[i + 2..]))
                    } else {
                        Some((&expr[..i], Op::Lt, &expr[i + 1..]))
                    };
                }
                b'>' => {
                    return if i + 1 < bytes.len() && bytes[i + 1] == b'=' {
                        Some((&expr[..i], Op::Ge, &expr[i + 2..]))
                    } else {
                        Some((&expr[..i], Op::Gt, &expr[i + 1..]))
                    };
                }
                _ => {}
            },
        }
        i += 1;
    }

    None
}

/// Resolve one operand: literal or placeholder path.
fn operand(raw: &str, scope: &serde_json::Map<String, Value>) -> Result<Value, ExprError> {
    let s = raw.trim();
    if s.is_empty() {
        return Err(ExprError::Empty);
    }

    // Quoted string literal
    if (s.starts_with('\'') && s.ends_with('\'') && s.len() >= 2)
        || (s.starts_with('"') && s.ends_with('"') && s.len() >= 2)
    {
        return Ok(Value::String(s[1..s.len() - 1].to_string()));
    }

    match s {
        "true" => return Ok(Value::Bool(true)),
        "false" => return Ok(Value::Bool(false)),
        "null" => return Ok(Value::Null),
        _ => {}
    }

    if let Ok(n) = s.parse::<i64>() {
        return Ok(Value::from(n));
    }
    if let Ok(f) = s.parse::<f64>() {
        return Ok(Value::from(f));
    }

    // Placeholder path: first segment names the placeholder, the rest
    // traverses into it.
    let (head, rest) = match s.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (s, None),
    };
    let root = scope
        .get(head)
        .ok_or_else(|| ExprError::UnknownPlaceholder(head.to_string()))?;
    match rest {
        None => Ok(root.clone()),
        Some(rest) => path::resolve(root, rest)
            .map_err(|e| ExprError::BadPath(s.to_string(), e.reason)),
    }
}

fn compare(op: Op, lhs: &Value, rhs: &Value) -> Result<bool, ExprError> {
    use std::cmp::Ordering;

    let ordering = match (lhs, rhs) {
        (Value::Number(a), Value::Number(b)) => {
            let a = a.as_f64().unwrap_or(f64::NAN);
            let b = b.as_f64().unwrap_or(f64::NAN);
            a.partial_cmp(&b)
        }
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    };

    match op {
        Op::Eq => Ok(match ordering {
            Some(ord) => ord == Ordering::Equal,
            None => lhs == rhs,
        }),
        Op::Ne => Ok(match ordering {
            Some(ord) => ord != Ordering::Equal,
            None => lhs != rhs,
        }),
        _ => {
            let ord = ordering.ok_or_else(|| ExprError::Incomparable {
                op: op.symbol().to_string(),
                lhs: lhs.to_string(),
                rhs: rhs.to_string(),
            })?;
            Ok(match op {
                Op::Lt => ord == Ordering::Less,
                Op::Le => ord != Ordering::Greater,
                Op::Gt => ord == Ordering::Greater,
                Op::Ge => ord != Ordering::Less,
                Op::Eq | Op::Ne => unreachable!(),
            })
        }
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}
