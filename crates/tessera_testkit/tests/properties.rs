//! Property tests over the public API.

use proptest::prelude::*;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use tessera_codec::{Key, Value};
use tessera_core::{StoreParams, TransactionMode};
use tessera_testkit::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn stored_keys_read_back_sorted(keys in prop::collection::vec(key_strategy(), 1..12)) {
        let factory = TestFactory::new();
        let connection = factory.open_with_upgrade("props", 1, |event| {
            event.connection.create_object_store("s", StoreParams::new())?;
            Ok(())
        });
        let tx = connection
            .transaction(&["s"], TransactionMode::ReadWrite)
            .unwrap();
        let store = tx.object_store("s").unwrap();
        for key in &keys {
            store.put(&Value::from(true), Some(key.clone())).unwrap();
        }
        factory.run();

        let expected: Vec<Key> = keys.into_iter().collect::<BTreeSet<_>>().into_iter().collect();
        prop_assert_eq!(read_all_keys(&factory, &connection, "s"), expected);
    }

    #[test]
    fn factory_cmp_is_antisymmetric(a in key_strategy(), b in key_strategy()) {
        let factory = TestFactory::new();
        let forward = factory.cmp(&a.to_value(), &b.to_value()).unwrap();
        let backward = factory.cmp(&b.to_value(), &a.to_value()).unwrap();
        prop_assert_eq!(forward, backward.reverse());
        prop_assert_eq!(forward == Ordering::Equal, a == b);
    }

    #[test]
    fn generated_records_round_trip(records in prop::collection::vec(record_strategy(), 1..8)) {
        let factory = TestFactory::new();
        let connection = factory.open_with_upgrade("records", 1, |event| {
            event
                .connection
                .create_object_store("r", StoreParams::new().key_path("id"))?;
            Ok(())
        });
        let tx = connection
            .transaction(&["r"], TransactionMode::ReadWrite)
            .unwrap();
        let store = tx.object_store("r").unwrap();
        let mut ids = BTreeSet::new();
        for record in &records {
            store.put(record, None).unwrap();
            if let Value::Object(object) = record {
                if let Some(id) = object.get("id") {
                    ids.insert(Key::from_value(&id).unwrap());
                }
            }
        }
        factory.run();

        let keys = read_all_keys(&factory, &connection, "r");
        prop_assert_eq!(keys, ids.into_iter().collect::<Vec<_>>());
    }
}
