//! Core value types shared by the document model and the schema engine.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Every basic type a schema may name, in synthesis preference order.
pub const ALL_TYPES: &[BasicType] = &[
    BasicType::Null,
    BasicType::Boolean,
    BasicType::Integer,
    BasicType::Number,
    BasicType::String,
    BasicType::Array,
    BasicType::Object,
];

/// Returns the JSON type name for error messages.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Basic type of a document node.
///
/// `Integer` is reported for any number with no fractional part; schemas
/// naming `number` accept it as well.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BasicType {
    Null,
    Boolean,
    Integer,
    Number,
    String,
    Array,
    Object,
    Undefined,
}

impl BasicType {
    /// Classify an optional JSON value (`None` is `undefined`).
    pub fn of(value: Option<&Value>) -> Self {
        match value {
            None => BasicType::Undefined,
            Some(Value::Null) => BasicType::Null,
            Some(Value::Bool(_)) => BasicType::Boolean,
            Some(Value::Number(n)) => {
                if n.is_i64() || n.is_u64() || n.as_f64().map_or(false, |f| f.fract() == 0.0) {
                    BasicType::Integer
                } else {
                    BasicType::Number
                }
            }
            Some(Value::String(_)) => BasicType::String,
            Some(Value::Array(_)) => BasicType::Array,
            Some(Value::Object(_)) => BasicType::Object,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BasicType::Null => "null",
            BasicType::Boolean => "boolean",
            BasicType::Integer => "integer",
            BasicType::Number => "number",
            BasicType::String => "string",
            BasicType::Array => "array",
            BasicType::Object => "object",
            BasicType::Undefined => "undefined",
        }
    }

    /// Parse a schema type name. `any` and `all` are handled by the caller.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "null" => Some(BasicType::Null),
            "boolean" => Some(BasicType::Boolean),
            "integer" => Some(BasicType::Integer),
            "number" => Some(BasicType::Number),
            "string" => Some(BasicType::String),
            "array" => Some(BasicType::Array),
            "object" => Some(BasicType::Object),
            _ => None,
        }
    }

    /// Whether data of this type satisfies a schema declaring `declared`.
    pub fn satisfies(&self, declared: BasicType) -> bool {
        *self == declared || (*self == BasicType::Integer && declared == BasicType::Number)
    }
}

impl std::fmt::Display for BasicType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deep structural equality where `1` and `1.0` are equal.
pub fn json_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(a, b)| json_equal(a, b))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, v)| y.get(k).map_or(false, |other| json_equal(v, other)))
        }
        _ => a == b,
    }
}

/// Default HTTP method for a link relation.
pub fn default_method(rel: &str) -> &'static str {
    match rel {
        "edit" => "PUT",
        "create" => "POST",
        "delete" => "DELETE",
        _ => "GET",
    }
}

/// Default encoding for a link method.
pub fn default_enc_type(method: &str) -> &'static str {
    match method {
        "POST" | "PUT" => "application/json",
        _ => "application/x-www-form-urlencoded",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn structural_equality_ignores_number_representation() {
        assert!(json_equal(&json!({"a": [1, 2.0]}), &json!({"a": [1.0, 2]})));
        assert!(!json_equal(&json!({"a": 1}), &json!({"a": 1, "b": 2})));
        assert!(!json_equal(&json!("1"), &json!(1)));
    }

    #[test]
    fn integral_numbers_are_integers() {
        assert_eq!(BasicType::of(Some(&json!(3))), BasicType::Integer);
        assert_eq!(BasicType::of(Some(&json!(3.0))), BasicType::Integer);
        assert_eq!(BasicType::of(Some(&json!(3.5))), BasicType::Number);
        assert_eq!(BasicType::of(None), BasicType::Undefined);
    }

    #[test]
    fn integer_satisfies_number() {
        assert!(BasicType::Integer.satisfies(BasicType::Number));
        assert!(!BasicType::Number.satisfies(BasicType::Integer));
        assert!(BasicType::String.satisfies(BasicType::String));
    }

    #[test]
    fn link_defaults() {
        assert_eq!(default_method("edit"), "PUT");
        assert_eq!(default_method("create"), "POST");
        assert_eq!(default_method("delete"), "DELETE");
        assert_eq!(default_method("self"), "GET");
        assert_eq!(default_enc_type("GET"), "application/x-www-form-urlencoded");
        assert_eq!(default_enc_type("POST"), "application/json");
        assert_eq!(default_enc_type("DELETE"), "application/x-www-form-urlencoded");
    }
}
