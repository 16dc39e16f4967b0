//! Key model and total ordering.

use crate::error::{CodecError, CodecResult};
use crate::value::Value;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};

/// A legal key.
///
/// Keys are totally ordered: every number sorts before every date,
/// dates before binary, binary before text, and text before arrays.
/// Within a type, numbers and dates compare numerically, binary
/// compares byte-wise (a shorter prefix first), text compares by UTF-16
/// code units and arrays compare element-wise (a shorter prefix first).
///
/// `-0` and `0` are the same key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Key {
    /// A number (NaN excluded).
    Number(f64),
    /// A timestamp in milliseconds.
    Date(f64),
    /// Byte sequence.
    Binary(Bytes),
    /// Text.
    String(String),
    /// Array of keys.
    Array(Vec<Key>),
}

fn normalize(n: f64) -> f64 {
    if n == 0.0 {
        0.0
    } else {
        n
    }
}

impl Key {
    /// Creates a number key, folding `-0` into `0`.
    #[must_use]
    pub fn number(n: f64) -> Self {
        Key::Number(normalize(n))
    }

    /// Creates a binary key.
    pub fn binary(bytes: impl Into<Bytes>) -> Self {
        Key::Binary(bytes.into())
    }

    /// Converts a host value into a key.
    ///
    /// Accepts numbers other than NaN, valid dates, text, attached
    /// binary buffers and dense arrays of legal keys. Rejects cycles
    /// and arrays that appear more than once in the structure.
    pub fn from_value(value: &Value) -> CodecResult<Key> {
        let mut seen = HashSet::new();
        Self::convert(value, &mut seen)
    }

    fn convert(value: &Value, seen: &mut HashSet<usize>) -> CodecResult<Key> {
        match value {
            Value::Number(n) => {
                if n.is_nan() {
                    return Err(CodecError::invalid_key("NaN is not a valid key"));
                }
                Ok(Key::number(*n))
            }
            Value::Date(ms) => {
                if !ms.is_finite() {
                    return Err(CodecError::invalid_key("invalid date"));
                }
                Ok(Key::Date(normalize(*ms)))
            }
            Value::String(s) => Ok(Key::String(s.clone())),
            Value::Binary(buffer) => buffer
                .to_vec()
                .map(|bytes| Key::Binary(Bytes::from(bytes)))
                .map_err(|_| CodecError::invalid_key("binary buffer is detached")),
            Value::Array(array) => {
                if !seen.insert(array.id()) {
                    return Err(CodecError::invalid_key("array contains itself"));
                }
                let mut keys = Vec::with_capacity(array.len());
                for (i, slot) in array.slots().iter().enumerate() {
                    match slot {
                        Some(entry) => keys.push(Self::convert(entry, seen)?),
                        None => {
                            return Err(CodecError::invalid_key(format!(
                                "array has a hole at index {i}"
                            )))
                        }
                    }
                }
                Ok(Key::Array(keys))
            }
            other => Err(CodecError::invalid_key(format!(
                "{} is not a valid key",
                other.type_name()
            ))),
        }
    }

    /// Converts the key back into a fresh host value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Key::Number(n) => Value::Number(*n),
            Key::Date(ms) => Value::Date(*ms),
            Key::Binary(bytes) => Value::binary(bytes.to_vec()),
            Key::String(s) => Value::String(s.clone()),
            Key::Array(keys) => Value::array(keys.iter().map(Key::to_value)),
        }
    }

    /// Position of the key's type in the ordering.
    #[must_use]
    pub fn type_rank(&self) -> u8 {
        match self {
            Key::Number(_) => 0,
            Key::Date(_) => 1,
            Key::Binary(_) => 2,
            Key::String(_) => 3,
            Key::Array(_) => 4,
        }
    }

    /// Get this key as a number, if it is one.
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Key::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Get this key as text, if it is text.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Key::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get this key as a list of keys, if it is an array.
    #[must_use]
    pub fn as_array(&self) -> Option<&[Key]> {
        match self {
            Key::Array(keys) => Some(keys),
            _ => None,
        }
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Key::Number(a), Key::Number(b)) | (Key::Date(a), Key::Date(b)) => {
                normalize(*a).total_cmp(&normalize(*b))
            }
            (Key::Binary(a), Key::Binary(b)) => a.as_ref().cmp(b.as_ref()),
            (Key::String(a), Key::String(b)) => a.encode_utf16().cmp(b.encode_utf16()),
            (Key::Array(a), Key::Array(b)) => a.cmp(b),
            _ => self.type_rank().cmp(&other.type_rank()),
        }
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_rank().hash(state);
        match self {
            Key::Number(n) | Key::Date(n) => normalize(*n).to_bits().hash(state),
            Key::Binary(bytes) => bytes.hash(state),
            Key::String(s) => s.hash(state),
            Key::Array(keys) => keys.hash(state),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Number(n) => write!(f, "{n}"),
            Key::Date(ms) => write!(f, "date:{ms}"),
            Key::Binary(bytes) => {
                write!(f, "0x")?;
                for byte in bytes.iter() {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
            Key::String(s) => write!(f, "{s:?}"),
            Key::Array(keys) => {
                write!(f, "[")?;
                for (i, key) in keys.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key}")?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<f64> for Key {
    fn from(n: f64) -> Self {
        Key::number(n)
    }
}

impl From<i32> for Key {
    fn from(n: i32) -> Self {
        Key::number(f64::from(n))
    }
}

impl From<u32> for Key {
    fn from(n: u32) -> Self {
        Key::number(f64::from(n))
    }
}

impl From<i64> for Key {
    #[allow(clippy::cast_precision_loss)]
    fn from(n: i64) -> Self {
        Key::number(n as f64)
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::String(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::String(s)
    }
}

impl From<Vec<Key>> for Key {
    fn from(keys: Vec<Key>) -> Self {
        Key::Array(keys)
    }
}

impl From<&Key> for Value {
    fn from(key: &Key) -> Self {
        key.to_value()
    }
}

/// Compares two host values as keys.
///
/// Fails with [`CodecError::InvalidKey`] if either value is not a legal key.
pub fn compare(a: &Value, b: &Value) -> CodecResult<Ordering> {
    let a = Key::from_value(a)?;
    let b = Key::from_value(b)?;
    Ok(a.cmp(&b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Array, Buffer};
    use proptest::prelude::*;

    fn key_strategy() -> impl Strategy<Value = Key> {
        let leaf = prop_oneof![
            (-1e6f64..1e6).prop_map(Key::number),
            prop::sample::select(vec![f64::NEG_INFINITY, -0.0, 0.0, f64::INFINITY])
                .prop_map(Key::number),
            (0f64..1e12).prop_map(Key::Date),
            prop::collection::vec(any::<u8>(), 0..6).prop_map(|b| Key::binary(b)),
            "[a-c]{0,4}".prop_map(Key::String),
        ];
        leaf.prop_recursive(3, 16, 4, |inner| {
            prop::collection::vec(inner, 0..4).prop_map(Key::Array)
        })
    }

    #[test]
    fn type_order() {
        let ordered = vec![
            Key::from(f64::NEG_INFINITY),
            Key::from(-1),
            Key::from(0),
            Key::from(f64::INFINITY),
            Key::Date(0.0),
            Key::binary(Vec::<u8>::new()),
            Key::binary(vec![0x00u8]),
            Key::binary(vec![0x00u8, 0x01]),
            Key::binary(vec![0xffu8]),
            Key::from(""),
            Key::from("a"),
            Key::from("ab"),
            Key::Array(vec![]),
            Key::from(vec![Key::from(1)]),
            Key::from(vec![Key::from(1), Key::from(0)]),
            Key::from(vec![Key::from("a")]),
        ];
        for pair in ordered.windows(2) {
            assert!(pair[0] < pair[1], "{} < {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn negative_zero_is_zero() {
        assert_eq!(Key::from(-0.0), Key::from(0.0));
        let key = Key::from_value(&Value::Number(-0.0)).unwrap();
        assert_eq!(key.as_number().map(f64::is_sign_negative), Some(false));
    }

    #[test]
    fn strings_compare_by_code_unit() {
        // U+FF5E is a single code unit, U+1F600 starts with a high surrogate.
        assert!(Key::from("\u{1F600}") < Key::from("\u{FF5E}"));
    }

    #[test]
    fn rejects_invalid_values() {
        let invalid = vec![
            Value::Number(f64::NAN),
            Value::Date(f64::NAN),
            Value::Undefined,
            Value::Null,
            Value::Bool(true),
            Value::object([("a", Value::from(1))]),
            Value::array([Value::from(1), Value::Number(f64::NAN)]),
        ];
        for value in invalid {
            assert!(
                matches!(Key::from_value(&value), Err(CodecError::InvalidKey { .. })),
                "{value:?} should be rejected"
            );
        }
    }

    #[test]
    fn rejects_holes() {
        let array = Array::sparse(2);
        array.set(0, Value::from(1));
        assert!(Key::from_value(&Value::Array(array)).is_err());
    }

    #[test]
    fn rejects_cycles() {
        let array = Array::from_values([Value::from(1)]);
        array.push(Value::Array(array.clone()));
        assert!(Key::from_value(&Value::Array(array)).is_err());

        let inner = Array::from_values([Value::from("x")]);
        let outer = Array::from_values([Value::array([Value::Array(inner.clone())])]);
        inner.push(Value::Array(outer.clone()));
        assert!(Key::from_value(&Value::Array(outer)).is_err());
    }

    #[test]
    fn rejects_detached_binary() {
        let buffer = Buffer::new(vec![1, 2]);
        let value = Value::Binary(buffer.clone());
        assert_eq!(
            Key::from_value(&value).unwrap(),
            Key::binary(vec![1u8, 2])
        );
        buffer.detach();
        assert!(Key::from_value(&value).is_err());
    }

    #[test]
    fn value_round_trip() {
        let key = Key::from(vec![
            Key::from(1),
            Key::Date(5.0),
            Key::binary(vec![9u8]),
            Key::from("s"),
        ]);
        assert_eq!(Key::from_value(&key.to_value()).unwrap(), key);
    }

    #[test]
    fn compare_values() {
        assert_eq!(
            compare(&Value::from(1), &Value::from("a")).unwrap(),
            Ordering::Less
        );
        assert!(compare(&Value::from(1), &Value::Null).is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        #[test]
        fn ordering_is_antisymmetric(a in key_strategy(), b in key_strategy()) {
            prop_assert_eq!(a.cmp(&b), b.cmp(&a).reverse());
        }

        #[test]
        fn ordering_is_transitive(
            a in key_strategy(),
            b in key_strategy(),
            c in key_strategy(),
        ) {
            let mut keys = [a, b, c];
            keys.sort();
            prop_assert!(keys[0] <= keys[1]);
            prop_assert!(keys[1] <= keys[2]);
            prop_assert!(keys[0] <= keys[2]);
        }

        #[test]
        fn type_rank_dominates(a in key_strategy(), b in key_strategy()) {
            if a.type_rank() != b.type_rank() {
                prop_assert_eq!(a.cmp(&b), a.type_rank().cmp(&b.type_rank()));
            }
        }

        #[test]
        fn conversion_round_trips(key in key_strategy()) {
            let back = Key::from_value(&key.to_value()).unwrap();
            prop_assert_eq!(back.cmp(&key), Ordering::Equal);
        }
    }
}
