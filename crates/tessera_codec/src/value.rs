//! Host value model.
//!
//! Records stored in Tessera are [`Value`]s: a small dynamic type that
//! mirrors what a host application hands to the engine. Containers
//! ([`Array`], [`Object`]) and binary buffers ([`Buffer`]) are shared
//! handles, so a value graph may alias itself and may contain cycles.
//! [`Value::structured_clone`] produces an independent deep copy that
//! preserves that aliasing.

use crate::error::{CodecError, CodecResult};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Largest integer a double can represent exactly (2^53 - 1).
const SAFE_INTEGER_LIMIT: f64 = 9_007_199_254_740_991.0;

/// Returns the allocation address behind a shared handle.
fn address<T: ?Sized>(arc: &Arc<T>) -> usize {
    Arc::as_ptr(arc).cast::<()>() as usize
}

/// A shared, detachable byte buffer.
///
/// Detaching empties the buffer for every handle that shares it, the
/// way transferring an `ArrayBuffer` does.
#[derive(Clone)]
pub struct Buffer {
    inner: Arc<RwLock<Option<Vec<u8>>>>,
}

impl Buffer {
    /// Creates a buffer holding `bytes`.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Some(bytes.into()))),
        }
    }

    /// Returns the number of bytes, or 0 once detached.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().as_ref().map_or(0, Vec::len)
    }

    /// Returns true if the buffer holds no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true once [`Buffer::detach`] has been called.
    #[must_use]
    pub fn is_detached(&self) -> bool {
        self.inner.read().is_none()
    }

    /// Copies the bytes out of the buffer.
    pub fn to_vec(&self) -> CodecResult<Vec<u8>> {
        self.inner.read().clone().ok_or(CodecError::Detached)
    }

    /// Detaches the buffer, returning its former contents.
    pub fn detach(&self) -> Option<Vec<u8>> {
        self.inner.write().take()
    }

    /// Returns true if both handles refer to the same buffer.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn id(&self) -> usize {
        address(&self.inner)
    }
}

/// A shared list of values whose slots may be holes.
#[derive(Clone)]
pub struct Array {
    inner: Arc<RwLock<Vec<Option<Value>>>>,
}

impl Array {
    /// Creates an empty array.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Creates a dense array from `values`.
    pub fn from_values(values: impl IntoIterator<Item = Value>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(values.into_iter().map(Some).collect())),
        }
    }

    /// Creates an array of `len` holes.
    #[must_use]
    pub fn sparse(len: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(vec![None; len])),
        }
    }

    /// Returns the array length, holes included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Returns true if the array has no slots.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the element at `index`, or `None` for holes and out of range.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<Value> {
        self.inner.read().get(index).cloned().flatten()
    }

    /// Returns true if `index` is inside the array but has no element.
    #[must_use]
    pub fn is_hole(&self, index: usize) -> bool {
        matches!(self.inner.read().get(index), Some(None))
    }

    /// Stores `value` at `index`, padding with holes if needed.
    pub fn set(&self, index: usize, value: Value) {
        let mut slots = self.inner.write();
        if index >= slots.len() {
            slots.resize(index + 1, None);
        }
        slots[index] = Some(value);
    }

    /// Appends `value`.
    pub fn push(&self, value: Value) {
        self.inner.write().push(Some(value));
    }

    /// Returns a snapshot of the slots.
    #[must_use]
    pub fn slots(&self) -> Vec<Option<Value>> {
        self.inner.read().clone()
    }

    /// Returns true if both handles refer to the same array.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn id(&self) -> usize {
        address(&self.inner)
    }

    fn push_slot(&self, slot: Option<Value>) {
        self.inner.write().push(slot);
    }
}

impl Default for Array {
    fn default() -> Self {
        Self::new()
    }
}

/// A shared map of named properties.
#[derive(Clone, Default)]
pub struct Object {
    inner: Arc<RwLock<BTreeMap<String, Value>>>,
}

impl Object {
    /// Creates an empty object.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the property `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Value> {
        self.inner.read().get(name).cloned()
    }

    /// Sets the property `name`, returning its previous value.
    pub fn set(&self, name: impl Into<String>, value: Value) -> Option<Value> {
        self.inner.write().insert(name.into(), value)
    }

    /// Removes the property `name`.
    pub fn remove(&self, name: &str) -> Option<Value> {
        self.inner.write().remove(name)
    }

    /// Returns true if the object has its own property `name`.
    #[must_use]
    pub fn contains_key(&self, name: &str) -> bool {
        self.inner.read().contains_key(name)
    }

    /// Returns the number of properties.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Returns true if the object has no properties.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns a snapshot of the properties in name order.
    #[must_use]
    pub fn entries(&self) -> Vec<(String, Value)> {
        self.inner
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Returns true if both handles refer to the same object.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn id(&self) -> usize {
        address(&self.inner)
    }
}

/// A dynamic host value.
///
/// Cloning a `Value` is shallow: containers are shared. Use
/// [`Value::structured_clone`] for an independent copy.
#[derive(Clone, Default)]
pub enum Value {
    /// The absent value.
    #[default]
    Undefined,
    /// Null.
    Null,
    /// Boolean.
    Bool(bool),
    /// Double-precision number.
    Number(f64),
    /// Timestamp in milliseconds since the Unix epoch. NaN marks an invalid date.
    Date(f64),
    /// Text.
    String(String),
    /// Binary data.
    Binary(Buffer),
    /// Ordered list, possibly sparse.
    Array(Array),
    /// Property map.
    Object(Object),
}

impl Value {
    /// Creates a dense array value.
    pub fn array(values: impl IntoIterator<Item = Value>) -> Self {
        Value::Array(Array::from_values(values))
    }

    /// Creates an object value from `(name, value)` pairs.
    pub fn object<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        let object = Object::new();
        for (name, value) in entries {
            object.set(name, value);
        }
        Value::Object(object)
    }

    /// Creates a binary value.
    pub fn binary(bytes: impl Into<Vec<u8>>) -> Self {
        Value::Binary(Buffer::new(bytes))
    }

    /// Creates a date value.
    #[must_use]
    pub const fn date(millis: f64) -> Self {
        Value::Date(millis)
    }

    /// Returns a short name for the value's type.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Date(_) => "date",
            Value::String(_) => "string",
            Value::Binary(_) => "binary",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }

    /// Returns true for [`Value::Undefined`].
    #[must_use]
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// Returns true for [`Value::Null`].
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get this value as a boolean, if it is one.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get this value as a number, if it is one.
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Get this value as text, if it is text.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get this value as an array, if it is one.
    #[must_use]
    pub fn as_array(&self) -> Option<&Array> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Get this value as an object, if it is one.
    #[must_use]
    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Get this value as a binary buffer, if it is one.
    #[must_use]
    pub fn as_binary(&self) -> Option<&Buffer> {
        match self {
            Value::Binary(b) => Some(b),
            _ => None,
        }
    }

    /// Reads an own property.
    ///
    /// Objects expose their properties; text and arrays expose `length`
    /// (text length counts UTF-16 code units). Everything else has no
    /// properties.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<Value> {
        match self {
            Value::Object(o) => o.get(name),
            #[allow(clippy::cast_precision_loss)]
            Value::String(s) if name == "length" => {
                Some(Value::Number(s.encode_utf16().count() as f64))
            }
            #[allow(clippy::cast_precision_loss)]
            Value::Array(a) if name == "length" => Some(Value::Number(a.len() as f64)),
            _ => None,
        }
    }

    /// Produces an independent deep copy.
    ///
    /// Aliasing inside the value graph is preserved, including cycles.
    /// Fails if the graph contains a detached buffer.
    pub fn structured_clone(&self) -> CodecResult<Value> {
        let mut memo = HashMap::new();
        self.clone_with(&mut memo)
    }

    fn clone_with(&self, memo: &mut HashMap<usize, Value>) -> CodecResult<Value> {
        match self {
            Value::Binary(buffer) => {
                if let Some(done) = memo.get(&buffer.id()) {
                    return Ok(done.clone());
                }
                let bytes = buffer
                    .to_vec()
                    .map_err(|_| CodecError::data_clone("binary buffer is detached"))?;
                let copy = Value::binary(bytes);
                memo.insert(buffer.id(), copy.clone());
                Ok(copy)
            }
            Value::Array(array) => {
                if let Some(done) = memo.get(&array.id()) {
                    return Ok(done.clone());
                }
                let copy = Array::new();
                memo.insert(array.id(), Value::Array(copy.clone()));
                for slot in array.slots() {
                    let slot = match slot {
                        Some(v) => Some(v.clone_with(memo)?),
                        None => None,
                    };
                    copy.push_slot(slot);
                }
                Ok(Value::Array(copy))
            }
            Value::Object(object) => {
                if let Some(done) = memo.get(&object.id()) {
                    return Ok(done.clone());
                }
                let copy = Object::new();
                memo.insert(object.id(), Value::Object(copy.clone()));
                for (name, v) in object.entries() {
                    copy.set(name, v.clone_with(memo)?);
                }
                Ok(Value::Object(copy))
            }
            other => Ok(other.clone()),
        }
    }

    /// Builds a value from JSON. Numbers become [`Value::Number`].
    #[must_use]
    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or_default()),
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(items) => Value::array(items.iter().map(Value::from_json)),
            serde_json::Value::Object(map) => {
                Value::object(map.iter().map(|(k, v)| (k.clone(), Value::from_json(v))))
            }
        }
    }

    /// Renders the value as JSON.
    ///
    /// Integral numbers in the safe range render as integers. Dates
    /// render as their millisecond timestamp, binary data as an array of
    /// bytes. Undefined, holes, non-finite numbers and cyclic references
    /// render as null.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        let mut stack = Vec::new();
        self.to_json_with(&mut stack)
    }

    fn to_json_with(&self, stack: &mut Vec<usize>) -> serde_json::Value {
        match self {
            Value::Undefined | Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) | Value::Date(n) => number_to_json(*n),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Binary(buffer) => serde_json::Value::Array(
                buffer
                    .to_vec()
                    .unwrap_or_default()
                    .into_iter()
                    .map(serde_json::Value::from)
                    .collect(),
            ),
            Value::Array(array) => {
                if stack.contains(&array.id()) {
                    return serde_json::Value::Null;
                }
                stack.push(array.id());
                let items = array
                    .slots()
                    .iter()
                    .map(|slot| match slot {
                        Some(v) => v.to_json_with(stack),
                        None => serde_json::Value::Null,
                    })
                    .collect();
                stack.pop();
                serde_json::Value::Array(items)
            }
            Value::Object(object) => {
                if stack.contains(&object.id()) {
                    return serde_json::Value::Null;
                }
                stack.push(object.id());
                let map = object
                    .entries()
                    .into_iter()
                    .map(|(k, v)| (k, v.to_json_with(stack)))
                    .collect();
                stack.pop();
                serde_json::Value::Object(map)
            }
        }
    }

    fn deep_eq(&self, other: &Value, visiting: &mut HashSet<(usize, usize)>) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) | (Value::Date(a), Value::Date(b)) => {
                a == b || (a.is_nan() && b.is_nan())
            }
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Binary(a), Value::Binary(b)) => {
                a.ptr_eq(b) || a.inner.read().as_deref() == b.inner.read().as_deref()
            }
            (Value::Array(a), Value::Array(b)) => {
                if a.ptr_eq(b) || !visiting.insert((a.id(), b.id())) {
                    return true;
                }
                let (left, right) = (a.slots(), b.slots());
                left.len() == right.len()
                    && left.iter().zip(right.iter()).all(|pair| match pair {
                        (Some(x), Some(y)) => x.deep_eq(y, visiting),
                        (None, None) => true,
                        _ => false,
                    })
            }
            (Value::Object(a), Value::Object(b)) => {
                if a.ptr_eq(b) || !visiting.insert((a.id(), b.id())) {
                    return true;
                }
                let (left, right) = (a.entries(), b.entries());
                left.len() == right.len()
                    && left
                        .iter()
                        .zip(right.iter())
                        .all(|((ka, va), (kb, vb))| ka == kb && va.deep_eq(vb, visiting))
            }
            _ => false,
        }
    }

    fn fmt_with(&self, f: &mut fmt::Formatter<'_>, stack: &mut Vec<usize>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::Date(n) => write!(f, "Date({n})"),
            Value::String(s) => write!(f, "{s:?}"),
            Value::Binary(buffer) => match buffer.to_vec() {
                Ok(bytes) => write!(f, "Binary({bytes:?})"),
                Err(_) => write!(f, "Binary(<detached>)"),
            },
            Value::Array(array) => {
                if stack.contains(&array.id()) {
                    return write!(f, "[Circular]");
                }
                stack.push(array.id());
                write!(f, "[")?;
                for (i, slot) in array.slots().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    match slot {
                        Some(v) => v.fmt_with(f, stack)?,
                        None => write!(f, "<hole>")?,
                    }
                }
                stack.pop();
                write!(f, "]")
            }
            Value::Object(object) => {
                if stack.contains(&object.id()) {
                    return write!(f, "{{Circular}}");
                }
                stack.push(object.id());
                write!(f, "{{")?;
                for (i, (name, v)) in object.entries().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{name}: ")?;
                    v.fmt_with(f, stack)?;
                }
                stack.pop();
                write!(f, "}}")
            }
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn number_to_json(n: f64) -> serde_json::Value {
    if n.is_finite() && n.fract() == 0.0 && n.abs() <= SAFE_INTEGER_LIMIT {
        return serde_json::Value::from(n as i64);
    }
    serde_json::Number::from_f64(n).map_or(serde_json::Value::Null, serde_json::Value::Number)
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.deep_eq(other, &mut HashSet::new())
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_with(f, &mut Vec::new())
    }
}

impl fmt::Debug for Array {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&Value::Array(self.clone()), f)
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&Value::Object(self.clone()), f)
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&Value::Binary(self.clone()), f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(f64::from(n))
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Number(f64::from(n))
    }
}

impl From<i64> for Value {
    #[allow(clippy::cast_precision_loss)]
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(values: Vec<Value>) -> Self {
        Value::array(values)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        Value::from_json(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn clone_is_independent() {
        let original = Value::from(json!({"name": "Alice", "tags": ["a", "b"]}));
        let copy = original.structured_clone().unwrap();
        assert_eq!(original, copy);

        original
            .as_object()
            .unwrap()
            .set("name", Value::from("Bob"));
        assert_eq!(copy.property("name"), Some(Value::from("Alice")));
    }

    #[test]
    fn clone_preserves_aliasing_and_cycles() {
        let shared = Array::from_values([Value::from(1)]);
        let root = Object::new();
        root.set("a", Value::Array(shared.clone()));
        root.set("b", Value::Array(shared));
        root.set("self", Value::Object(root.clone()));

        let copy = Value::Object(root).structured_clone().unwrap();
        let copy = copy.as_object().unwrap();
        let a = copy.get("a").unwrap();
        let b = copy.get("b").unwrap();
        assert!(a.as_array().unwrap().ptr_eq(b.as_array().unwrap()));
        assert!(copy.get("self").unwrap().as_object().unwrap().ptr_eq(copy));
    }

    #[test]
    fn clone_rejects_detached_buffer() {
        let buffer = Buffer::new(vec![1, 2, 3]);
        let value = Value::array([Value::Binary(buffer.clone())]);
        assert_eq!(buffer.detach(), Some(vec![1, 2, 3]));
        assert!(matches!(
            value.structured_clone(),
            Err(CodecError::DataClone { .. })
        ));
    }

    #[test]
    fn clone_keeps_holes() {
        let array = Array::sparse(2);
        array.set(1, Value::from("x"));
        let copy = Value::Array(array).structured_clone().unwrap();
        let copy = copy.as_array().unwrap();
        assert!(copy.is_hole(0));
        assert_eq!(copy.get(1), Some(Value::from("x")));
    }

    #[test]
    fn length_property() {
        assert_eq!(Value::from("héllo").property("length"), Some(Value::from(5)));
        assert_eq!(
            Value::array([Value::Null, Value::Null]).property("length"),
            Some(Value::from(2))
        );
        assert_eq!(Value::from(3).property("length"), None);
    }

    #[test]
    fn json_round_trip() {
        let json = json!({"id": 7, "score": 1.5, "nested": {"ok": true, "none": null}});
        assert_eq!(Value::from_json(&json).to_json(), json);
    }

    #[test]
    fn cyclic_value_renders() {
        let array = Array::new();
        array.push(Value::Array(array.clone()));
        assert_eq!(Value::Array(array.clone()).to_json(), json!([null]));
        assert_eq!(format!("{:?}", Value::Array(array)), "[[Circular]]");
    }
}
