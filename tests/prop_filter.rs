use std::collections::BTreeMap;

use bisongate::query::{Filter, REGEX_CACHE_CAP, RegexCache};
use bson::{Bson, Document, doc};
use proptest::prelude::*;

fn scalar() -> impl Strategy<Value = Bson> {
    prop_oneof![
        Just(Bson::Null),
        any::<i32>().prop_map(Bson::Int32),
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
    fn prop_implicit_and_is_explicit_and(m in fields(), extra in scalar()) {
        let regexes = RegexCache::new(REGEX_CACHE_CAP);
        let mut target = to_doc(&m);
        target.insert("zzextra", extra);

        let implicit = Filter::compile(&to_doc(&m)).unwrap();
        let clauses: Vec<Bson> =
            m.iter().map(|(k, v)| Bson::Document(doc! {k: v.clone()})).collect();
        let explicit = Filter::compile(&doc! {"$and": clauses}).unwrap();

        prop_assert_eq!(
            implicit.matches(&target, &regexes),
            explicit.matches(&target, &regexes)
        );
        prop_assert!(implicit.matches(&target, &regexes));
    }

    #[test]
    fn prop_a_document_matches_its_own_equalities(m in fields()) {
        let regexes = RegexCache::new(REGEX_CACHE_CAP);
        let target = to_doc(&m);
        let filter = Filter::compile(&target).unwrap();
        prop_assert!(filter.matches(&target, &regexes));
    }

    #[test]
    fn prop_not_inverts_its_leaf(v in any::<i32>(), bound in any::<i32>(), present in any::<bool>()) {
        let regexes = RegexCache::new(REGEX_CACHE_CAP);
        let target = if present { doc! {"v": v} } else { doc! {"w": v} };

        let plain = Filter::compile(&doc! {"v": {"$gt": bound}}).unwrap();
        let negated = Filter::compile(&doc! {"v": {"$not": {"$gt": bound}}}).unwrap();
        prop_assert_eq!(
            negated.matches(&target, &regexes),
            !plain.matches(&target, &regexes)
        );
    }

    #[test]
    fn prop_gt_and_lte_partition_present_numbers(v in any::<i32>(), bound in any::<i32>()) {
        let regexes = RegexCache::new(REGEX_CACHE_CAP);
        let target = doc! {"v": v};
        let gt = Filter::compile(&doc! {"v": {"$gt": bound}}).unwrap();
        let lte = Filter::compile(&doc! {"v": {"$lte": bound}}).unwrap();
        prop_assert_ne!(gt.matches(&target, &regexes), lte.matches(&target, &regexes));
    }

    #[test]
    fn prop_in_matches_any_listed_value(m in fields(), decoys in proptest::collection::vec(scalar(), 0..4)) {
        let regexes = RegexCache::new(REGEX_CACHE_CAP);
        let target = to_doc(&m);
        for (key, value) in &m {
            let mut members = decoys.clone();
            members.push(value.clone());
            let filter = Filter::compile(&doc! {key: {"$in": members}}).unwrap();
            prop_assert!(filter.matches(&target, &regexes));
        }
    }
}
