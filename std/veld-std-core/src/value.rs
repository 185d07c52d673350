//!
//! Generic Runtime Value Representation
//!
//! veld values crossing the native-binding boundary are represented as
//! a tagged enum rather than the packed 64-bit form used inside
//! compiled code. Bindings construct these from native engine values
//! and hand them to managed code (and back).
//!
//! Two properties matter for bindings:
//!
//! - Text and bytes are length-delimited, never terminator-scanned,
//!   so embedded NUL bytes survive a round trip.
//! - Floats compare and hash by bit pattern, so a set of values can
//!   deduplicate NaN like any other element.
//!

use std::collections::HashSet;
use std::hash::{DefaultHasher, Hash, Hasher};

/// An unordered, deduplicated collection of values.
pub type ValueSet = HashSet<Value>;

/// A generic runtime value.
#[derive(Debug, Clone)]
pub enum Value {
    /// 64-bit signed integer.
    Int(i64),
    /// Double-precision float.
    Float(f64),
    /// UTF-8 text, length-delimited.
    Text(String),
    /// Raw bytes, length-delimited.
    Bytes(Vec<u8>),
    /// Null / absent value.
    Null,
    /// Sentinel meaning "field left unmodified" in update-style
    /// callbacks. Distinct from `Null` and equal only to itself.
    NoChange,
    /// Unordered set of values, produced by multi-valued constraint
    /// expansion. Never produced by ordinary column conversion.
    Set(ValueSet),
}

impl Value {
    /// Builds a deduplicated set value from an iterator of elements.
    pub fn set_from_iter(elements: impl IntoIterator<Item = Value>) -> Value {
        Value::Set(elements.into_iter().collect())
    }

    /// Short tag name, used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
            Value::Null => "null",
            Value::NoChange => "no_change",
            Value::Set(_) => "set",
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a == b,
            // Bit-pattern equality: NaN == NaN, and 0.0 != -0.0.
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Null, Value::Null) => true,
            (Value::NoChange, Value::NoChange) => true,
            (Value::Set(a), Value::Set(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Value::Int(v) => {
                0u8.hash(state);
                v.hash(state);
            }
            Value::Float(v) => {
                1u8.hash(state);
                v.to_bits().hash(state);
            }
            Value::Text(s) => {
                2u8.hash(state);
                s.hash(state);
            }
            Value::Bytes(b) => {
                3u8.hash(state);
                b.hash(state);
            }
            Value::Null => 4u8.hash(state),
            Value::NoChange => 5u8.hash(state),
            Value::Set(set) => {
                // Order-independent: combine element hashes with XOR.
                6u8.hash(state);
                set.len().hash(state);
                let mut combined: u64 = 0;
                for element in set {
                    let mut hasher = DefaultHasher::new();
                    element.hash(&mut hasher);
                    combined ^= hasher.finish();
                }
                combined.hash(state);
            }
        }
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

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Bytes(v.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_deduplicates() {
        let set = Value::set_from_iter([
            Value::Int(1),
            Value::Text("a".to_string()),
            Value::Null,
            Value::Int(1),
        ]);
        match set {
            Value::Set(elements) => {
                assert_eq!(elements.len(), 3);
                assert!(elements.contains(&Value::Int(1)));
                assert!(elements.contains(&Value::Text("a".to_string())));
                assert!(elements.contains(&Value::Null));
            }
            other => panic!("expected set, got {other:?}"),
        }
    }

    #[test]
    fn test_nan_deduplicates() {
        let set = Value::set_from_iter([Value::Float(f64::NAN), Value::Float(f64::NAN)]);
        match set {
            Value::Set(elements) => assert_eq!(elements.len(), 1),
            other => panic!("expected set, got {other:?}"),
        }
    }

    #[test]
    fn test_set_equality_is_order_independent() {
        let a = Value::set_from_iter([Value::Int(1), Value::Int(2)]);
        let b = Value::set_from_iter([Value::Int(2), Value::Int(1)]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_no_change_is_not_null() {
        assert_ne!(Value::NoChange, Value::Null);
        assert_eq!(Value::NoChange, Value::NoChange);
    }

    #[test]
    fn test_text_with_embedded_nul() {
        let v = Value::from("a\0b");
        match &v {
            Value::Text(s) => assert_eq!(s.len(), 3),
            other => panic!("expected text, got {other:?}"),
        }
    }
}
