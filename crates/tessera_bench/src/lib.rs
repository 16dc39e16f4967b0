//! Benchmark utilities.

use rand::Rng;
use tessera_codec::{Key, Value};

/// Generate a random string key of the given length.
pub fn random_string(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len).map(|_| rng.gen_range(b'a'..=b'z') as char).collect()
}

/// Generate a batch of distinct number keys in random order.
pub fn shuffled_keys(count: usize) -> Vec<Key> {
    let mut rng = rand::thread_rng();
    let mut keys: Vec<Key> = (0..count).map(|i| Key::number(i as f64)).collect();
    for i in (1..keys.len()).rev() {
        keys.swap(i, rng.gen_range(0..=i));
    }
    keys
}

/// Generate a nested array key `depth` levels deep.
pub fn nested_key(depth: usize, width: usize) -> Key {
    if depth == 0 {
        Key::from(random_string(4))
    } else {
        Key::Array((0..width).map(|_| nested_key(depth - 1, width)).collect())
    }
}

/// Generate a record with an `id`, a `name`, an `email` and a list of
/// `tags`.
pub fn random_record(id: usize) -> Value {
    let mut rng = rand::thread_rng();
    let tags = (0..rng.gen_range(0..5)).map(|_| Value::from(random_string(3)));
    Value::object([
        ("id", Value::from(id as f64)),
        ("name", Value::from(random_string(8))),
        ("email", Value::from(format!("{}@example.com", random_string(6)))),
        ("tags", Value::array(tags)),
    ])
}

/// Generate `count` records with ids `0..count`.
pub fn generate_records(count: usize) -> Vec<Value> {
    (0..count).map(random_record).collect()
}
