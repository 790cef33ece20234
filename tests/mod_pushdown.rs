use bisongate::Proxy;
use bisongate::backend::MemoryBackend;
use bisongate::config::ProxyConfig;
use bson::{Bson, doc};

fn seed(proxy: &Proxy, coll: &str) {
    let docs: Vec<Bson> = (1..=6)
        .map(|i| Bson::Document(doc! { "_id": i, "v": i, "name": format!("n{i}") }))
        .collect();
    let reply = proxy.handle_command(&doc! { "insert": coll, "documents": docs, "$db": "test" });
    assert_eq!(reply.get_i32("n").map_err(|e| e.to_string()), Ok(6));
}

fn find_values(proxy: &Proxy, coll: &str, filter: bson::Document) -> Vec<i32> {
    let reply = proxy.handle_command(&doc! {
        "find": coll,
        "filter": filter,
        "sort": { "v": 1 },
        "$db": "test",
    });
    assert_eq!(reply.get_f64("ok").map_err(|e| e.to_string()), Ok(1.0), "{reply:?}");
    reply
        .get_document("cursor")
        .unwrap()
        .get_array("firstBatch")
        .unwrap()
        .iter()
        .map(|b| b.as_document().unwrap().get_i32("v").unwrap())
        .collect()
}

fn explain_pushdown(proxy: &Proxy, inner: bson::Document) -> bool {
    let reply = proxy.handle_command(&doc! { "explain": inner, "$db": "test" });
    assert_eq!(reply.get_f64("ok").map_err(|e| e.to_string()), Ok(1.0), "{reply:?}");
    reply.get_bool("pushdown").unwrap()
}

#[test]
fn eligible_filters_report_pushdown_and_ineligible_ones_do_not() {
    let proxy = Proxy::new();
    seed(&proxy, "t");

    assert!(explain_pushdown(&proxy, doc! { "find": "t", "filter": { "v": 3 } }));
    assert!(explain_pushdown(&proxy, doc! { "find": "t", "filter": { "v": { "$ne": 3 } } }));
    // Dotted paths, $-prefixed roots, regex operators, null and array
    // operands all stay in process.
    assert!(!explain_pushdown(&proxy, doc! { "find": "t", "filter": { "a.b": 1 } }));
    assert!(!explain_pushdown(&proxy, doc! { "find": "t", "filter": { "v": { "$gt": 1 } } }));
    assert!(!explain_pushdown(
        &proxy,
        doc! { "find": "t", "filter": { "name": { "$regex": "^n" } } },
    ));
    assert!(!explain_pushdown(&proxy, doc! { "find": "t", "filter": { "v": Bson::Null } }));
    assert!(!explain_pushdown(&proxy, doc! { "find": "t", "filter": { "v": [1, 2] } }));
}

#[test]
fn one_ineligible_leaf_keeps_the_whole_group_residual() {
    let proxy = Proxy::new();
    seed(&proxy, "t");

    // Root-level AND pushes the eligible subset.
    assert!(explain_pushdown(
        &proxy,
        doc! { "find": "t", "filter": { "v": 3, "a.b": 1 } },
    ));
    // Inside an $or, nothing translates.
    assert!(!explain_pushdown(
        &proxy,
        doc! { "find": "t", "filter": { "$or": [ { "v": 3 }, { "a.b": 1 } ] } },
    ));
}

#[test]
fn filter_pushdown_toggle_masks_the_backend() {
    let config = ProxyConfig { enable_filter_pushdown: false, ..ProxyConfig::default() };
    let proxy = Proxy::with_config(config);
    seed(&proxy, "t");

    assert!(!explain_pushdown(&proxy, doc! { "find": "t", "filter": { "v": 3 } }));
    // Semantics are unchanged either way.
    assert_eq!(find_values(&proxy, "t", doc! { "v": { "$gte": 5 } }), vec![5, 6]);
}

#[test]
fn sort_pushdown_requires_its_own_toggle() {
    let proxy = Proxy::new();
    seed(&proxy, "t");
    let reply = proxy.handle_command(&doc! {
        "explain": { "find": "t", "sort": { "v": -1 } },
        "$db": "test",
    });
    let planner = reply.get_document("queryPlanner").unwrap();
    assert!(!planner.get_document("pushdown").unwrap().get_bool("sort").unwrap());

    let config = ProxyConfig { enable_sort_pushdown: true, ..ProxyConfig::default() };
    let proxy = Proxy::with_config(config);
    seed(&proxy, "t");
    let reply = proxy.handle_command(&doc! {
        "explain": { "find": "t", "sort": { "v": -1 } },
        "$db": "test",
    });
    let planner = reply.get_document("queryPlanner").unwrap();
    assert!(planner.get_document("pushdown").unwrap().get_bool("sort").unwrap());

    // Compound and dotted sorts never push.
    let reply = proxy.handle_command(&doc! {
        "explain": { "find": "t", "sort": { "v": -1, "name": 1 } },
        "$db": "test",
    });
    let planner = reply.get_document("queryPlanner").unwrap();
    assert!(!planner.get_document("pushdown").unwrap().get_bool("sort").unwrap());
}

#[test]
fn rejecting_backends_fall_back_to_a_bare_scan() {
    let proxy = Proxy::new();
    seed(&proxy, "t");

    let rejecting = MemoryBackend::new();
    rejecting.reject_native_queries(true);
    let proxy2 = Proxy::with_backend(ProxyConfig::default(), Box::new(rejecting));
    seed(&proxy2, "t");

    let pushed = find_values(&proxy, "t", doc! { "v": { "$in": [2, 4] } });
    let scanned = find_values(&proxy2, "t", doc! { "v": { "$in": [2, 4] } });
    assert_eq!(pushed, vec![2, 4]);
    assert_eq!(scanned, pushed);

    // Equality queries hit the reject-retry path and still answer.
    assert_eq!(find_values(&proxy2, "t", doc! { "v": 5 }), vec![5]);
    assert_eq!(find_values(&proxy2, "t", doc! {}), vec![1, 2, 3, 4, 5, 6]);
}

#[test]
fn sorted_results_are_identical_with_and_without_native_sort() {
    let config = ProxyConfig { enable_sort_pushdown: true, ..ProxyConfig::default() };
    let native = Proxy::with_config(config);
    let in_process = Proxy::new();
    for proxy in [&native, &in_process] {
        proxy.handle_command(&doc! {
            "insert": "t",
            "documents": [
                { "_id": 1, "v": 3 }, { "_id": 2, "v": 1 }, { "_id": 3 },
                { "_id": 4, "v": [9, 0] }, { "_id": 5, "v": 2 },
            ],
            "$db": "test",
        });
    }

    let ids = |proxy: &Proxy| -> Vec<i32> {
        proxy
            .handle_command(&doc! { "find": "t", "sort": { "v": 1 }, "$db": "test" })
            .get_document("cursor")
            .unwrap()
            .get_array("firstBatch")
            .unwrap()
            .iter()
            .map(|b| b.as_document().unwrap().get_i32("_id").unwrap())
            .collect()
    };
    // Missing sorts as null (doc 3), arrays by their smallest element.
    assert_eq!(ids(&native), vec![3, 4, 2, 5, 1]);
    assert_eq!(ids(&in_process), ids(&native));
}

#[test]
fn capped_collections_replay_insertion_order() {
    let proxy = Proxy::new();
    proxy.handle_command(&doc! {
        "create": "log",
        "capped": true,
        "max": 10,
        "$db": "test",
    });
    // Insert out of _id order; unsorted reads must replay insertion order.
    for id in [5, 1, 9, 3] {
        proxy.handle_command(&doc! {
            "insert": "log",
            "documents": [ { "_id": id } ],
            "$db": "test",
        });
    }
    let reply = proxy.handle_command(&doc! { "find": "log", "$db": "test" });
    let ids: Vec<i32> = reply
        .get_document("cursor")
        .unwrap()
        .get_array("firstBatch")
        .unwrap()
        .iter()
        .map(|b| b.as_document().unwrap().get_i32("_id").unwrap())
        .collect();
    assert_eq!(ids, vec![5, 1, 9, 3]);
}
