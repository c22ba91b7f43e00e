//! Dotted-path resolution into node outputs
//!
//! Supports:
//! - `a.b.c` (mapping keys)
//! - `a.2.c` (integer segments index arrays)
//! - `` or `.` (the value itself)
//!
//! No wildcards, filters or slices.

use serde_json::Value;
use thiserror::Error;

/// A failed path traversal, with the reason spelled out
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot resolve path '{path}': {reason}")]
pub struct PathMiss {
    pub path: String,
    pub reason: String,
}

impl PathMiss {
    fn new(path: &str, reason: impl Into<String>) -> Self {
        PathMiss {
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}

/// Syntax check without a value to traverse.
///
/// Every non-empty dot-separated segment is acceptable (keys may be any
/// string, numeric segments double as array indices), so the only syntax
/// error is an empty segment.
pub fn validate(path: &str) -> Result<(), PathMiss> {
    if path.is_empty() || path == "." {
        return Ok(());
    }
    for segment in path.split('.') {
        if segment.is_empty() {
            return Err(PathMiss::new(path, "empty segment"));
        }
    }
    Ok(())
}

/// Resolve a dotted path against a JSON value.
///
/// An empty path or `"."` returns the value itself. Mapping keys are looked
/// up literally; array segments must parse as non-negative integers.
pub fn resolve(value: &Value, path: &str) -> Result<Value, PathMiss> {
    if path.is_empty() || path == "." {
        return Ok(value.clone());
    }

    let mut current = value;
    for segment in path.split('.') {
        if segment.is_empty() {
            return Err(PathMiss::new(path, "empty segment"));
        }
        current = match current {
            Value::Object(map) => map.get(segment).ok_or_else(|| {
                let available: Vec<&str> = map.keys().map(String::as_str).collect();
                PathMiss::new(
                    path,
                    format!(
                        "key '{}' not found (available: {})",
                        segment,
                        available.join(", ")
                    ),
                )
            })?,
            Value::Array(items) => {
                let index: usize = segment.parse().map_err(|_| {
                    PathMiss::new(
                        path,
                        format!("cannot index array with non-integer key '{}'", segment),
                    )
                })?;
                items.get(index).ok_or_else(|| {
                    PathMiss::new(
                        path,
                        format!(
                            "index {} out of bounds for array of length {}",
                            index,
                            items.len()
                        ),
                    )
                })?
            }
            other => {
                return Err(PathMiss::new(
                    path,
                    format!("cannot access '{}' on {}", segment, type_name(other)),
                ))
            }
        };
    }

    Ok(current.clone())
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
