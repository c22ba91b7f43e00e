//! Mini-type grammar for node input/output schemas
//!
//! Supports exactly six shapes:
//! - `str`, `int`, `float`, `bool` (scalars)
//! - `dict` (opaque mapping)
//! - `list[<scalar>]` (one level of nesting, scalar elements only)
//!
//! No unions, no nested lists, no list-of-dict.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use thiserror::Error;

/// Scalar element types allowed inside `list[...]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    Str,
    Int,
    Float,
    Bool,
}

impl ScalarType {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "str" => Some(ScalarType::Str),
            "int" => Some(ScalarType::Int),
            "float" => Some(ScalarType::Float),
            "bool" => Some(ScalarType::Bool),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            ScalarType::Str => "str",
            ScalarType::Int => "int",
            ScalarType::Float => "float",
            ScalarType::Bool => "bool",
        }
    }
}

/// A parsed schema field type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Str,
    Int,
    Float,
    Bool,
    Dict,
    List(ScalarType),
}

/// Schema for one node side: field name -> type
///
/// BTreeMap keeps serialization key-ordered, which the cache fingerprint
/// relies on.
pub type SchemaMap = BTreeMap<String, ValueType>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TypeParseError {
    #[error("unknown type '{0}' (expected str, int, float, bool, dict or list[<scalar>])")]
    Unknown(String),
    #[error("malformed list type '{0}' (expected list[<scalar>])")]
    MalformedList(String),
    #[error("list element type '{0}' must be a scalar (str, int, float, bool)")]
    NonScalarElement(String),
}

/// Parse a single type expression, e.g. `"int"` or `"list[str]"`.
pub fn parse_type(raw: &str) -> Result<ValueType, TypeParseError> {
    let s = raw.trim();

    match s {
        "str" => return Ok(ValueType::Str),
        "int" => return Ok(ValueType::Int),
        "float" => return Ok(ValueType::Float),
        "bool" => return Ok(ValueType::Bool),
        "dict" => return Ok(ValueType::Dict),
        _ => {}
    }

    if let Some(rest) = s.strip_prefix("list[") {
        let inner = rest
            .strip_suffix(']')
            .ok_or_else(|| TypeParseError::MalformedList(s.to_string()))?;
        let scalar = ScalarType::parse(inner.trim())
            .ok_or_else(|| TypeParseError::NonScalarElement(inner.trim().to_string()))?;
        return Ok(ValueType::List(scalar));
    }

    Err(TypeParseError::Unknown(s.to_string()))
}

/// Parse an untyped schema mapping (`{"x": "str", "items": "list[int]"}`).
///
/// Accumulates per-field failures instead of stopping at the first one.
pub fn parse_schema(
    raw: &serde_json::Map<String, Value>,
) -> Result<SchemaMap, Vec<(String, TypeParseError)>> {
    let mut schema = SchemaMap::new();
    let mut failures = Vec::new();

    for (field, value) in raw {
        match value.as_str() {
            Some(s) => match parse_type(s) {
                Ok(ty) => {
                    schema.insert(field.clone(), ty);
                }
                Err(err) => failures.push((field.clone(), err)),
            },
            None => failures.push((field.clone(), TypeParseError::Unknown(value.to_string()))),
        }
    }

    if failures.is_empty() {
        Ok(schema)
    } else {
        Err(failures)
    }
}

#[derive(Debug, Clone, Error)]
#[error("cannot coerce {found} to {expected}")]
pub struct CoerceError {
    pub expected: String,
    pub found: String,
}

impl CoerceError {
    fn new(expected: ValueType, found: &Value) -> Self {
        CoerceError {
            expected: expected.to_string(),
            found: describe(found),
        }
    }
}

fn describe(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(_) => "bool".to_string(),
        Value::Number(_) => "number".to_string(),
        Value::String(s) => format!("string \"{}\"", truncate(s, 40)),
        Value::Array(_) => "array".to_string(),
        Value::Object(_) => "object".to_string(),
    }
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        s
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        &s[..end]
    }
}

impl ValueType {
    /// Coerce a JSON value to this type.
    ///
    /// Coercion is lenient where a conversion is unambiguous (an
    /// integer-looking string under `int`, an integer under `float`) and
    /// rejects everything else.
    pub fn coerce(self, value: &Value) -> Result<Value, CoerceError> {
        match self {
            ValueType::Str => match value {
                Value::String(_) => Ok(value.clone()),
                Value::Number(n) => Ok(Value::String(n.to_string())),
                Value::Bool(b) => Ok(Value::String(b.to_string())),
                _ => Err(CoerceError::new(self, value)),
            },
            ValueType::Int => match value {
                Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value.clone()),
                Value::Number(n) => {
                    let f = n.as_f64().unwrap_or(f64::NAN);
                    if f.fract() == 0.0 && f.is_finite() {
                        Ok(Value::from(f as i64))
                    } else {
                        Err(CoerceError::new(self, value))
                    }
                }
                Value::String(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(Value::from)
                    .map_err(|_| CoerceError::new(self, value)),
                _ => Err(CoerceError::new(self, value)),
            },
            ValueType::Float => match value {
                Value::Number(n) => {
                    let f = n.as_f64().ok_or_else(|| CoerceError::new(self, value))?;
                    Ok(Value::from(f))
                }
                Value::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .map(Value::from)
                    .map_err(|_| CoerceError::new(self, value)),
                _ => Err(CoerceError::new(self, value)),
            },
            ValueType::Bool => match value {
                Value::Bool(_) => Ok(value.clone()),
                Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                    "true" => Ok(Value::Bool(true)),
                    "false" => Ok(Value::Bool(false)),
                    _ => Err(CoerceError::new(self, value)),
                },
                Value::Number(n) => match n.as_i64() {
                    Some(0) => Ok(Value::Bool(false)),
                    Some(1) => Ok(Value::Bool(true)),
                    _ => Err(CoerceError::new(self, value)),
                },
                _ => Err(CoerceError::new(self, value)),
            },
            ValueType::Dict => match value {
                Value::Object(_) => Ok(value.clone()),
                _ => Err(CoerceError::new(self, value)),
            },
            ValueType::List(scalar) => match value {
                Value::Array(items) => {
                    let element: ValueType = scalar.into();
                    let mut coerced = Vec::with_capacity(items.len());
                    for item in items {
                        coerced.push(element.coerce(item)?);
                    }
                    Ok(Value::Array(coerced))
                }
                _ => Err(CoerceError::new(self, value)),
            },
        }
    }

    /// Advisory type compatibility along a dependency edge.
    ///
    /// Exact match, plus the int-widens-to-float rule.
    pub fn compatible_with(self, downstream: ValueType) -> bool {
        if self == downstream {
            return true;
        }
        matches!(
            (self, downstream),
            (ValueType::Int, ValueType::Float)
                | (
                    ValueType::List(ScalarType::Int),
                    ValueType::List(ScalarType::Float)
                )
        )
    }
}

impl From<ScalarType> for ValueType {
    fn from(scalar: ScalarType) -> Self {
        match scalar {
            ScalarType::Str => ValueType::Str,
            ScalarType::Int => ValueType::Int,
            ScalarType::Float => ValueType::Float,
            ScalarType::Bool => ValueType::Bool,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Str => write!(f, "str"),
            ValueType::Int => write!(f, "int"),
            ValueType::Float => write!(f, "float"),
            ValueType::Bool => write!(f, "bool"),
            ValueType::Dict => write!(f, "dict"),
            ValueType::List(scalar) => write!(f, "list[{}]", scalar.as_str()),
        }
    }
}

impl Serialize for ValueType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ValueType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_type(&raw).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_scalars_and_dict() {
        assert_eq!(parse_type("str").unwrap(), ValueType::Str);
        assert_eq!(parse_type("int").unwrap(), ValueType::Int);
        assert_eq!(parse_type("float").unwrap(), ValueType::Float);
        assert_eq!(parse_type("bool").unwrap(), ValueType::Bool);
        assert_eq!(parse_type("dict").unwrap(), ValueType::Dict);
    }

    #[test]
    fn parse_list_of_scalar() {
        assert_eq!(
            parse_type("list[str]").unwrap(),
            ValueType::List(ScalarType::Str)
        );
        assert_eq!(
            parse_type("list[int]").unwrap(),
            ValueType::List(ScalarType::Int)
        );
    }

    #[test]
    fn parse_rejects_unions() {
        assert!(matches!(
            parse_type("str|int"),
            Err(TypeParseError::Unknown(_))
        ));
    }

    #[test]
    fn parse_rejects_unterminated_list() {
        assert!(matches!(
            parse_type("list["),
            Err(TypeParseError::MalformedList(_))
        ));
    }

    #[test]
    fn parse_rejects_nested_list() {
        assert!(matches!(
            parse_type("list[list[str]]"),
            Err(TypeParseError::NonScalarElement(_))
        ));
        assert!(matches!(
            parse_type("list[dict]"),
            Err(TypeParseError::NonScalarElement(_))
        ));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(parse_type("invalid_type").is_err());
        assert!(parse_type("").is_err());
    }

    #[test]
    fn parse_schema_accumulates_failures() {
        let raw = json!({"a": "str", "b": "nope", "c": "list["})
            .as_object()
            .cloned()
            .unwrap();
        let failures = parse_schema(&raw).unwrap_err();
        assert_eq!(failures.len(), 2);
        let fields: Vec<&str> = failures.iter().map(|(f, _)| f.as_str()).collect();
        assert!(fields.contains(&"b"));
        assert!(fields.contains(&"c"));
    }

    #[test]
    fn coerce_int_from_string() {
        assert_eq!(ValueType::Int.coerce(&json!("42")).unwrap(), json!(42));
        assert_eq!(ValueType::Int.coerce(&json!(" 7 ")).unwrap(), json!(7));
        assert!(ValueType::Int.coerce(&json!("4.5")).is_err());
        assert!(ValueType::Int.coerce(&json!("abc")).is_err());
    }

    #[test]
    fn coerce_int_from_whole_float() {
        assert_eq!(ValueType::Int.coerce(&json!(3.0)).unwrap(), json!(3));
        assert!(ValueType::Int.coerce(&json!(3.5)).is_err());
    }

    #[test]
    fn coerce_float_widens_int() {
        assert_eq!(ValueType::Float.coerce(&json!(2)).unwrap(), json!(2.0));
        assert_eq!(ValueType::Float.coerce(&json!("2.5")).unwrap(), json!(2.5));
    }

    #[test]
    fn coerce_bool_from_string_and_int() {
        assert_eq!(ValueType::Bool.coerce(&json!("true")).unwrap(), json!(true));
        assert_eq!(
            ValueType::Bool.coerce(&json!("FALSE")).unwrap(),
            json!(false)
        );
        assert_eq!(ValueType::Bool.coerce(&json!(1)).unwrap(), json!(true));
        assert!(ValueType::Bool.coerce(&json!(2)).is_err());
    }

    #[test]
    fn coerce_str_from_number() {
        assert_eq!(ValueType::Str.coerce(&json!(5)).unwrap(), json!("5"));
    }

    #[test]
    fn coerce_list_elements() {
        let ty = ValueType::List(ScalarType::Int);
        assert_eq!(ty.coerce(&json!(["1", 2, 3.0])).unwrap(), json!([1, 2, 3]));
        assert!(ty.coerce(&json!(["x"])).is_err());
        assert!(ty.coerce(&json!("not a list")).is_err());
    }

    #[test]
    fn coerce_rejects_null() {
        assert!(ValueType::Str.coerce(&Value::Null).is_err());
        assert!(ValueType::Dict.coerce(&Value::Null).is_err());
    }

    #[test]
    fn compatibility_widens_int_to_float() {
        assert!(ValueType::Int.compatible_with(ValueType::Float));
        assert!(!ValueType::Float.compatible_with(ValueType::Int));
        assert!(ValueType::Str.compatible_with(ValueType::Str));
        assert!(!ValueType::Str.compatible_with(ValueType::Int));
    }

    #[test]
    fn display_round_trips() {
        for raw in ["str", "int", "float", "bool", "dict", "list[bool]"] {
            let ty = parse_type(raw).unwrap();
            assert_eq!(ty.to_string(), raw);
            assert_eq!(parse_type(&ty.to_string()).unwrap(), ty);
        }
    }

    #[test]
    fn serde_uses_string_form() {
        let ty: ValueType = serde_json::from_value(json!("list[str]")).unwrap();
        assert_eq!(ty, ValueType::List(ScalarType::Str));
        assert_eq!(serde_json::to_value(ty).unwrap(), json!("list[str]"));
        assert!(serde_json::from_value::<ValueType>(json!("str|int")).is_err());
    }
}
