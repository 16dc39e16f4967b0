//! Property-based test generators using proptest.

use proptest::prelude::*;
use tessera_codec::{Key, Value};

/// Strategy for number keys, NaN excluded.
pub fn number_key_strategy() -> impl Strategy<Value = Key> {
    any::<f64>()
        .prop_filter("NaN is not a key", |n| !n.is_nan())
        .prop_map(Key::number)
}

/// Strategy for keys that are not arrays.
pub fn scalar_key_strategy() -> impl Strategy<Value = Key> {
    prop_oneof![
        number_key_strategy(),
        (-8.64e15..8.64e15f64).prop_map(Key::Date),
        prop::collection::vec(any::<u8>(), 0..8).prop_map(Key::binary),
        "[a-z]{0,6}".prop_map(Key::from),
    ]
}

/// Strategy for arbitrary keys, including nested arrays.
pub fn key_strategy() -> impl Strategy<Value = Key> {
    scalar_key_strategy().prop_recursive(3, 16, 4, |inner| {
        prop::collection::vec(inner, 0..4).prop_map(Key::Array)
    })
}

/// Strategy for small integer keys, convenient for record IDs.
pub fn id_strategy() -> impl Strategy<Value = i32> {
    0..10_000i32
}

/// Strategy for store and index names.
pub fn name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_]{0,15}").expect("Invalid regex")
}

/// Strategy for record values: objects with an `id`, a `name` and a
/// list of `tags`.
pub fn record_strategy() -> impl Strategy<Value = Value> {
    (
        id_strategy(),
        "[A-Za-z]{1,8}",
        prop::collection::vec("[a-c]", 0..4),
    )
        .prop_map(|(id, name, tags)| {
            Value::object([
                ("id", Value::from(id)),
                ("name", Value::from(name)),
                (
                    "tags",
                    Value::array(tags.into_iter().map(Value::from)),
                ),
            ])
        })
}
