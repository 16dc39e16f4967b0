//! Key ranges and queries.

use crate::error::{CoreError, CoreResult};
use std::cmp::Ordering;
use std::ops::Bound;
use tessera_codec::{Key, Value};

/// A contiguous interval of keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    lower: Option<Key>,
    upper: Option<Key>,
    lower_open: bool,
    upper_open: bool,
}

impl KeyRange {
    /// The range containing only `key`.
    pub fn only(key: impl Into<Key>) -> Self {
        let key = key.into();
        Self {
            lower: Some(key.clone()),
            upper: Some(key),
            lower_open: false,
            upper_open: false,
        }
    }

    /// Keys above `lower`.
    pub fn lower_bound(lower: impl Into<Key>, open: bool) -> Self {
        Self {
            lower: Some(lower.into()),
            upper: None,
            lower_open: open,
            upper_open: true,
        }
    }

    /// Keys below `upper`.
    pub fn upper_bound(upper: impl Into<Key>, open: bool) -> Self {
        Self {
            lower: None,
            upper: Some(upper.into()),
            lower_open: true,
            upper_open: open,
        }
    }

    /// Keys between `lower` and `upper`.
    ///
    /// Fails with a data error if `lower > upper`, or if they are equal
    /// and either end is open.
    pub fn bound(
        lower: impl Into<Key>,
        upper: impl Into<Key>,
        lower_open: bool,
        upper_open: bool,
    ) -> CoreResult<Self> {
        let (lower, upper) = (lower.into(), upper.into());
        match lower.cmp(&upper) {
            Ordering::Greater => {
                return Err(CoreError::data(format!(
                    "lower bound {lower} is greater than upper bound {upper}"
                )))
            }
            Ordering::Equal if lower_open || upper_open => {
                return Err(CoreError::data("bounds are equal and one of them is open"))
            }
            _ => {}
        }
        Ok(Self {
            lower: Some(lower),
            upper: Some(upper),
            lower_open,
            upper_open,
        })
    }

    /// Builds a range from host values, converting each bound to a key.
    pub fn from_values(
        lower: Option<&Value>,
        upper: Option<&Value>,
        lower_open: bool,
        upper_open: bool,
    ) -> CoreResult<Self> {
        let lower = lower.map(Key::from_value).transpose()?;
        let upper = upper.map(Key::from_value).transpose()?;
        match (lower, upper) {
            (Some(lower), Some(upper)) => Self::bound(lower, upper, lower_open, upper_open),
            (Some(lower), None) => Ok(Self::lower_bound(lower, lower_open)),
            (None, Some(upper)) => Ok(Self::upper_bound(upper, upper_open)),
            (None, None) => Err(CoreError::data("a key range needs at least one bound")),
        }
    }

    /// Lower bound, if any.
    #[must_use]
    pub fn lower(&self) -> Option<&Key> {
        self.lower.as_ref()
    }

    /// Upper bound, if any.
    #[must_use]
    pub fn upper(&self) -> Option<&Key> {
        self.upper.as_ref()
    }

    /// Whether the lower bound is excluded.
    #[must_use]
    pub fn lower_open(&self) -> bool {
        self.lower_open
    }

    /// Whether the upper bound is excluded.
    #[must_use]
    pub fn upper_open(&self) -> bool {
        self.upper_open
    }

    /// Returns true if `key` lies in the range.
    #[must_use]
    pub fn includes(&self, key: &Key) -> bool {
        let above_lower = match &self.lower {
            Some(lower) if self.lower_open => key > lower,
            Some(lower) => key >= lower,
            None => true,
        };
        let below_upper = match &self.upper {
            Some(upper) if self.upper_open => key < upper,
            Some(upper) => key <= upper,
            None => true,
        };
        above_lower && below_upper
    }

    /// Lower end as a map bound.
    pub(crate) fn start_bound(&self) -> Bound<&Key> {
        match &self.lower {
            Some(key) if self.lower_open => Bound::Excluded(key),
            Some(key) => Bound::Included(key),
            None => Bound::Unbounded,
        }
    }

    /// Upper end as a map bound.
    pub(crate) fn end_bound(&self) -> Bound<&Key> {
        match &self.upper {
            Some(key) if self.upper_open => Bound::Excluded(key),
            Some(key) => Bound::Included(key),
            None => Bound::Unbounded,
        }
    }
}

/// A key or key range passed to a lookup.
#[derive(Debug, Clone)]
pub enum Query {
    /// A single key.
    Key(Key),
    /// A range of keys.
    Range(KeyRange),
    /// A host value, converted to a key when the query is used.
    Value(Value),
}

impl Query {
    /// Resolves the query into a range.
    ///
    /// Fails with a data error if a value does not convert to a key.
    pub fn into_range(self) -> CoreResult<KeyRange> {
        match self {
            Query::Key(key) => Ok(KeyRange::only(key)),
            Query::Range(range) => Ok(range),
            Query::Value(value) => Ok(KeyRange::only(Key::from_value(&value)?)),
        }
    }
}

impl From<Key> for Query {
    fn from(key: Key) -> Self {
        Query::Key(key)
    }
}

impl From<KeyRange> for Query {
    fn from(range: KeyRange) -> Self {
        Query::Range(range)
    }
}

impl From<Value> for Query {
    fn from(value: Value) -> Self {
        Query::Value(value)
    }
}

impl From<i32> for Query {
    fn from(n: i32) -> Self {
        Query::Key(Key::from(n))
    }
}

impl From<f64> for Query {
    fn from(n: f64) -> Self {
        Query::Value(Value::Number(n))
    }
}

impl From<&str> for Query {
    fn from(s: &str) -> Self {
        Query::Key(Key::from(s))
    }
}

/// Resolves an optional query; `None` matches every key.
pub(crate) fn resolve(query: Option<Query>) -> CoreResult<Option<KeyRange>> {
    query.map(Query::into_range).transpose()
}

/// Returns true if no key can satisfy both bounds.
pub(crate) fn is_empty_bounds(lower: Bound<&Key>, upper: Bound<&Key>) -> bool {
    match (lower, upper) {
        (Bound::Included(lo), Bound::Included(hi)) => lo > hi,
        (Bound::Included(lo) | Bound::Excluded(lo), Bound::Excluded(hi))
        | (Bound::Excluded(lo), Bound::Included(hi)) => lo >= hi,
        _ => false,
    }
}

/// Returns true if `key` lies in `range`, treating `None` as unbounded.
pub(crate) fn in_range(range: Option<&KeyRange>, key: &Key) -> bool {
    range.map_or(true, |r| r.includes(key))
}
