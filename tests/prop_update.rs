use std::collections::BTreeMap;

use bisongate::query::{REGEX_CACHE_CAP, RegexCache, UpdateSpec};
use bson::{Bson, Document, doc};
use proptest::prelude::*;

fn scalar() -> impl Strategy<Value = Bson> {
    prop_oneof![
        Just(Bson::Null),
        any::<i32>().prop_map(Bson::Int32),
        any::<i64>().prop_map(Bson::Int64),
        (-1.0e9_f64..1.0e9_f64).prop_map(Bson::Double),
        "[a-z]{0,8}".prop_map(Bson::String),
        any::<bool>().prop_map(Bson::Boolean),
    ]
}

fn fields() -> impl Strategy<Value = BTreeMap<String, Bson>> {
    proptest::collection::btree_map("[a-z]{1,6}", scalar(), 1..5)
}

fn to_doc(m: &BTreeMap<String, Bson>) -> Document {
    m.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
}

proptest! {
    #[test]
    fn prop_set_is_idempotent(m in fields()) {
        let regexes = RegexCache::new(REGEX_CACHE_CAP);
        let spec = UpdateSpec::compile(&doc! {"$set": to_doc(&m)}).unwrap();

        let (once, changed) = spec.apply(&doc! {"_id": 1}, false, &regexes).unwrap();
        prop_assert!(changed);
        let (twice, changed) = spec.apply(&once, false, &regexes).unwrap();
        prop_assert!(!changed);
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn prop_inc_round_trips(key in "[a-z]{1,6}", start in -1000_i32..1000, delta in -1000_i32..1000) {
        let regexes = RegexCache::new(REGEX_CACHE_CAP);
        let original = doc! {"_id": 1, &key: start};

        let forward = UpdateSpec::compile(&doc! {"$inc": {&key: delta}}).unwrap();
        let backward = UpdateSpec::compile(&doc! {"$inc": {&key: -delta}}).unwrap();
        let (stepped, _) = forward.apply(&original, false, &regexes).unwrap();
        let (back, _) = backward.apply(&stepped, false, &regexes).unwrap();
        prop_assert_eq!(back, original);
    }

    #[test]
    fn prop_replacements_keep_the_id_and_nothing_else(m in fields(), id in any::<i32>()) {
        let regexes = RegexCache::new(REGEX_CACHE_CAP);
        let target = doc! {"_id": id, "zzdoomed": true};
        let spec = UpdateSpec::compile(&to_doc(&m)).unwrap();

        let (out, _) = spec.apply(&target, false, &regexes).unwrap();
        let mut expected = doc! {"_id": id};
        expected.extend(to_doc(&m));
        prop_assert_eq!(out, expected);
    }

    #[test]
    fn prop_unset_erases_every_named_field(m in fields(), id in any::<i32>()) {
        let regexes = RegexCache::new(REGEX_CACHE_CAP);
        let mut target = doc! {"_id": id};
        target.extend(to_doc(&m));

        let operand: Document = m.keys().map(|k| (k.clone(), Bson::from(""))).collect();
        let spec = UpdateSpec::compile(&doc! {"$unset": operand}).unwrap();
        let (out, changed) = spec.apply(&target, false, &regexes).unwrap();
        prop_assert!(changed);
        prop_assert_eq!(out, doc! {"_id": id});
    }
}
