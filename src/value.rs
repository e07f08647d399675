//! Runtime value tree
//!
//! The dynamic counterpart of a schema: what the caller hands to the engine
//! for serialization and what deserialization produces. Composite shapes
//! nest through `List`, `Record`, and `Tagged` (a polymorphic value carrying
//! its concrete-type key).

use serde::{Deserialize, Serialize};

/// A dynamically-typed value in a value tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Absent value (conditional fields, unfilled shells)
    Null,
    Bool(bool),
    UInt(u64),
    Int(i64),
    Float(f64),
    Bytes(Vec<u8>),
    Str(String),
    /// Collection elements, in serialization order
    List(Vec<Value>),
    /// Named fields, in serialization order
    Record(Vec<(String, Value)>),
    /// Polymorphic value: concrete-type key plus the value itself
    Tagged(String, Box<Value>),
}

impl Value {
    /// Convert to u64 if this is a non-negative integer
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::UInt(u) => Some(*u),
            Value::Int(i) if *i >= 0 => Some(*i as u64),
            Value::Bool(b) => Some(*b as u64),
            _ => None,
        }
    }

    /// Convert to i64
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::UInt(u) if *u <= i64::MAX as u64 => Some(*u as i64),
            Value::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    /// Convert to f64
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            Value::UInt(u) => Some(*u as f64),
            _ => None,
        }
    }

    /// Convert to bool
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::UInt(u) => Some(*u != 0),
            Value::Int(i) => Some(*i != 0),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Look up a field by name in a `Record`
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Record(entries) => entries.iter().find(|(n, _)| n == name).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Short label for diagnostics
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::UInt(_) => "uint",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bytes(_) => "bytes",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Record(_) => "record",
            Value::Tagged(_, _) => "tagged",
        }
    }

    /// Equality that tolerates signedness differences between numerics.
    ///
    /// Discriminator matching, termination sentinels, and conditional
    /// predicates compare parsed values (usually `UInt`) against declared
    /// constants (which may be `Int`).
    pub fn loose_eq(&self, other: &Value) -> bool {
        if self == other {
            return true;
        }
        match (self.as_u64(), other.as_u64()) {
            (Some(a), Some(b)) => a == b,
            _ => match (self.as_i64(), other.as_i64()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<u8> for Value {
    fn from(v: u8) -> Self {
        Value::UInt(v as u64)
    }
}

impl From<u16> for Value {
    fn from(v: u16) -> Self {
        Value::UInt(v as u64)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::UInt(v as u64)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::UInt(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_conversions() {
        assert_eq!(Value::UInt(7).as_u64(), Some(7));
        assert_eq!(Value::Int(-1).as_u64(), None);
        assert_eq!(Value::Int(-1).as_i64(), Some(-1));
        assert_eq!(Value::Bool(true).as_u64(), Some(1));
        assert_eq!(Value::Str("x".into()).as_u64(), None);
    }

    #[test]
    fn test_loose_eq_across_signedness() {
        assert!(Value::UInt(3).loose_eq(&Value::Int(3)));
        assert!(Value::Int(-2).loose_eq(&Value::Int(-2)));
        assert!(!Value::UInt(3).loose_eq(&Value::Int(4)));
        assert!(!Value::Str("3".into()).loose_eq(&Value::UInt(3)));
    }

    #[test]
    fn test_record_field_lookup() {
        let rec = Value::Record(vec![
            ("a".to_string(), Value::UInt(1)),
            ("b".to_string(), Value::UInt(2)),
        ]);
        assert_eq!(rec.field("b"), Some(&Value::UInt(2)));
        assert_eq!(rec.field("c"), None);
    }
}
