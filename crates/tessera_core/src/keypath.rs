//! Key paths.
//!
//! A key path names where a key lives inside a value: `""` is the value
//! itself, `"a.b"` walks properties, and a sequence of paths builds an
//! array key from several properties.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use tessera_codec::{Key, Object, Value};

/// A key path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyPath {
    /// A single, possibly dotted, path.
    String(String),
    /// A composite path producing an array key.
    Sequence(Vec<String>),
}

fn is_identifier(part: &str) -> bool {
    let mut chars = part.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (first.is_alphabetic() || first == '$' || first == '_')
        && chars.all(|c| {
            c.is_alphanumeric() || c == '$' || c == '_' || c == '\u{200C}' || c == '\u{200D}'
        })
}

fn is_valid_path(path: &str) -> bool {
    path.is_empty() || path.split('.').all(is_identifier)
}

fn evaluate_path(value: &Value, path: &str) -> Option<Value> {
    if path.is_empty() {
        return Some(value.clone());
    }
    let mut current = value.clone();
    for part in path.split('.') {
        current = current.property(part)?;
    }
    Some(current)
}

impl KeyPath {
    /// Checks the path syntax.
    pub fn validate(&self) -> CoreResult<()> {
        let valid = match self {
            KeyPath::String(path) => is_valid_path(path),
            KeyPath::Sequence(paths) => {
                !paths.is_empty() && paths.iter().all(|p| is_valid_path(p))
            }
        };
        if valid {
            Ok(())
        } else {
            Err(CoreError::syntax(self.to_string()))
        }
    }

    /// Returns true for composite paths.
    #[must_use]
    pub fn is_sequence(&self) -> bool {
        matches!(self, KeyPath::Sequence(_))
    }

    /// Evaluates the path against `value`.
    ///
    /// Returns `None` if any property along the way is missing.
    #[must_use]
    pub fn evaluate(&self, value: &Value) -> Option<Value> {
        match self {
            KeyPath::String(path) => evaluate_path(value, path),
            KeyPath::Sequence(paths) => {
                let parts = paths
                    .iter()
                    .map(|p| evaluate_path(value, p))
                    .collect::<Option<Vec<_>>>()?;
                Some(Value::array(parts))
            }
        }
    }

    /// Extracts a key from `value`.
    ///
    /// `Ok(None)` means the path does not resolve; `Err` means it
    /// resolves to something that is not a valid key.
    pub fn extract_key(&self, value: &Value) -> CoreResult<Option<Key>> {
        match self.evaluate(value) {
            Some(found) => Ok(Some(Key::from_value(&found)?)),
            None => Ok(None),
        }
    }

    /// Returns true if a generated key could be written into `value`.
    #[must_use]
    pub fn can_inject(&self, value: &Value) -> bool {
        let KeyPath::String(path) = self else {
            return false;
        };
        let parts: Vec<&str> = path.split('.').collect();
        let Some((_, parents)) = parts.split_last() else {
            return false;
        };
        let mut current = value.clone();
        for part in parents {
            let Value::Object(object) = &current else {
                return false;
            };
            match object.get(part) {
                Some(next) => current = next,
                None => return true,
            }
        }
        matches!(current, Value::Object(_))
    }

    /// Writes `key` into `value` at this path, creating intermediate
    /// objects as needed.
    pub fn inject(&self, value: &Value, key: &Key) -> CoreResult<()> {
        let not_injectable = || CoreError::data(format!("cannot inject key at {self}"));
        let KeyPath::String(path) = self else {
            return Err(not_injectable());
        };
        let parts: Vec<&str> = path.split('.').collect();
        let (last, parents) = parts.split_last().ok_or_else(not_injectable)?;
        let mut current = value.clone();
        for part in parents {
            let Value::Object(object) = &current else {
                return Err(not_injectable());
            };
            let next = match object.get(part) {
                Some(next) => next,
                None => {
                    let child = Value::Object(Object::new());
                    object.set(*part, child.clone());
                    child
                }
            };
            current = next;
        }
        match &current {
            Value::Object(object) => {
                object.set(*last, key.to_value());
                Ok(())
            }
            _ => Err(not_injectable()),
        }
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPath::String(path) => write!(f, "{path:?}"),
            KeyPath::Sequence(paths) => write!(f, "{paths:?}"),
        }
    }
}

impl From<&str> for KeyPath {
    fn from(path: &str) -> Self {
        KeyPath::String(path.to_string())
    }
}

impl From<String> for KeyPath {
    fn from(path: String) -> Self {
        KeyPath::String(path)
    }
}

impl From<Vec<&str>> for KeyPath {
    fn from(paths: Vec<&str>) -> Self {
        KeyPath::Sequence(paths.into_iter().map(str::to_string).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn validates_syntax() {
        for valid in ["", "id", "a.b.c", "$x", "_y1", "héllo"] {
            assert!(KeyPath::from(valid).validate().is_ok(), "{valid}");
        }
        for invalid in ["a..b", ".a", "a.", "1a", "a-b", "a b"] {
            let err = KeyPath::from(invalid).validate().unwrap_err();
            assert_eq!(err.name(), "SyntaxError", "{invalid}");
        }
        assert!(KeyPath::Sequence(vec![]).validate().is_err());
        assert!(KeyPath::from(vec!["a", ""]).validate().is_ok());
        assert!(KeyPath::from(vec!["a", "b..c"]).validate().is_err());
    }

    #[test]
    fn extracts_nested_keys() {
        let value = Value::from(json!({"user": {"id": 7, "name": "ann"}}));
        let path = KeyPath::from("user.id");
        assert_eq!(path.extract_key(&value).unwrap(), Some(Key::from(7)));

        let missing = KeyPath::from("user.email");
        assert_eq!(missing.extract_key(&value).unwrap(), None);

        let invalid = KeyPath::from("user");
        assert_eq!(invalid.extract_key(&value).unwrap_err().name(), "DataError");
    }

    #[test]
    fn extracts_composite_keys() {
        let value = Value::from(json!({"a": 1, "b": "x"}));
        let path = KeyPath::from(vec!["a", "b"]);
        assert_eq!(
            path.extract_key(&value).unwrap(),
            Some(Key::Array(vec![Key::from(1), Key::from("x")]))
        );
        let partial = KeyPath::from(vec!["a", "c"]);
        assert_eq!(partial.extract_key(&value).unwrap(), None);
    }

    #[test]
    fn length_is_a_property() {
        let value = Value::from(json!({"name": "abc"}));
        assert_eq!(
            KeyPath::from("name.length").extract_key(&value).unwrap(),
            Some(Key::from(3))
        );
    }

    #[test]
    fn injects_generated_keys() {
        let value = Value::from(json!({"meta": {}}));
        let path = KeyPath::from("meta.id");
        assert!(path.can_inject(&value));
        path.inject(&value, &Key::from(5)).unwrap();
        assert_eq!(value.to_json(), json!({"meta": {"id": 5}}));

        let fresh = Value::from(json!({}));
        let deep = KeyPath::from("a.b.c");
        assert!(deep.can_inject(&fresh));
        deep.inject(&fresh, &Key::from(1)).unwrap();
        assert_eq!(fresh.to_json(), json!({"a": {"b": {"c": 1}}}));
    }

    #[test]
    fn cannot_inject_through_primitives() {
        let value = Value::from(json!({"meta": 4}));
        assert!(!KeyPath::from("meta.id").can_inject(&value));
        assert!(!KeyPath::from("id").can_inject(&Value::from(1)));
    }
}
