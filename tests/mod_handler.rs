use bisongate::Proxy;
use bson::{Bson, Document, doc};

fn batch_ids(reply: &Document, key: &str) -> Vec<i32> {
    reply
        .get_document("cursor")
        .unwrap()
        .get_array(key)
        .unwrap()
        .iter()
        .map(|b| b.as_document().unwrap().get_i32("_id").unwrap())
        .collect()
}

#[test]
fn a_collection_lifecycle_from_create_to_drop() {
    let proxy = Proxy::new();
    let reply = proxy.handle_command(&doc! { "create": "books", "$db": "shop" });
    assert_eq!(reply.get_f64("ok").map_err(|e| e.to_string()), Ok(1.0));

    let reply = proxy.handle_command(&doc! {
        "insert": "books",
        "documents": [
            { "_id": 1, "title": "dune", "stock": 3 },
            { "_id": 2, "title": "emma", "stock": 0 },
            { "_id": 3, "title": "vathek", "stock": 7 },
        ],
        "$db": "shop",
    });
    assert_eq!(reply.get_i32("n").map_err(|e| e.to_string()), Ok(3));

    let reply = proxy.handle_command(&doc! {
        "find": "books",
        "filter": { "stock": { "$gt": 0 } },
        "sort": { "stock": -1 },
        "$db": "shop",
    });
    assert_eq!(batch_ids(&reply, "firstBatch"), vec![3, 1]);

    let reply = proxy.handle_command(&doc! {
        "update": "books",
        "updates": [{ "q": { "_id": 2 }, "u": { "$inc": { "stock": 5 } } }],
        "$db": "shop",
    });
    assert_eq!(reply.get_i32("n").map_err(|e| e.to_string()), Ok(1));
    assert_eq!(reply.get_i32("nModified").map_err(|e| e.to_string()), Ok(1));

    let reply = proxy.handle_command(&doc! {
        "count": "books",
        "query": { "stock": { "$gt": 0 } },
        "$db": "shop",
    });
    assert_eq!(reply.get_i32("n").map_err(|e| e.to_string()), Ok(3));

    let reply = proxy.handle_command(&doc! {
        "delete": "books",
        "deletes": [{ "q": { "_id": 1 }, "limit": 1 }],
        "$db": "shop",
    });
    assert_eq!(reply.get_i32("n").map_err(|e| e.to_string()), Ok(1));

    let reply = proxy.handle_command(&doc! { "drop": "books", "$db": "shop" });
    assert_eq!(reply.get_i32("nIndexesWas").map_err(|e| e.to_string()), Ok(1));
    assert_eq!(reply.get_str("ns").map_err(|e| e.to_string()), Ok("shop.books"));
    assert_eq!(reply.get_f64("ok").map_err(|e| e.to_string()), Ok(1.0));

    let reply = proxy.handle_command(&doc! { "listCollections": 1, "$db": "shop" });
    let cursor = reply.get_document("cursor").unwrap();
    assert!(cursor.get_array("firstBatch").unwrap().is_empty());
    assert_eq!(cursor.get_str("ns").map_err(|e| e.to_string()), Ok("shop.$cmd.listCollections"));
}

#[test]
fn cursors_serve_the_snapshot_taken_at_find_time() {
    let proxy = Proxy::new();
    let docs: Vec<Bson> = (0..5).map(|i| Bson::Document(doc! { "_id": i })).collect();
    proxy.handle_command(&doc! { "insert": "seq", "documents": docs, "$db": "test" });

    let reply = proxy.handle_command(&doc! {
        "find": "seq",
        "sort": { "_id": 1 },
        "batchSize": 2,
        "$db": "test",
    });
    let id = reply.get_document("cursor").unwrap().get_i64("id").unwrap();
    assert_eq!(batch_ids(&reply, "firstBatch"), vec![0, 1]);

    // A write after the find does not leak into the parked results.
    proxy.handle_command(&doc! { "insert": "seq", "documents": [{ "_id": 99 }], "$db": "test" });
    let reply = proxy.handle_command(&doc! {
        "getMore": id,
        "collection": "seq",
        "$db": "test",
    });
    assert_eq!(batch_ids(&reply, "nextBatch"), vec![2, 3, 4]);
    assert_eq!(reply.get_document("cursor").unwrap().get_i64("id").map_err(|e| e.to_string()), Ok(0));
}

#[test]
fn distinct_merges_array_elements_across_documents() {
    let proxy = Proxy::new();
    proxy.handle_command(&doc! {
        "insert": "posts",
        "documents": [
            { "_id": 1, "tags": ["b", "a"] },
            { "_id": 2, "tags": "c" },
            { "_id": 3, "tags": ["a", 2] },
            { "_id": 4 },
        ],
        "$db": "test",
    });
    let reply = proxy.handle_command(&doc! {
        "distinct": "posts",
        "key": "tags",
        "$db": "test",
    });
    assert_eq!(reply.get_f64("ok").map_err(|e| e.to_string()), Ok(1.0));
    // Deduplicated and sorted, numbers before strings.
    assert_eq!(
        reply.get_array("values").unwrap(),
        &vec![
            Bson::Int32(2),
            Bson::String("a".into()),
            Bson::String("b".into()),
            Bson::String("c".into()),
        ]
    );
}

#[test]
fn find_and_aggregate_agree_on_a_filter() {
    let proxy = Proxy::new();
    let docs: Vec<Bson> = (0..20)
        .map(|i| Bson::Document(doc! { "_id": i, "v": i % 4 }))
        .collect();
    proxy.handle_command(&doc! { "insert": "nums", "documents": docs, "$db": "test" });

    let filter = doc! { "v": { "$in": [1, 3] } };
    let reply = proxy.handle_command(&doc! {
        "find": "nums",
        "filter": filter.clone(),
        "sort": { "_id": 1 },
        "$db": "test",
    });
    let found = batch_ids(&reply, "firstBatch");

    let reply = proxy.handle_command(&doc! {
        "aggregate": "nums",
        "pipeline": [{ "$match": filter }, { "$sort": { "_id": 1 } }],
        "cursor": {},
        "$db": "test",
    });
    assert_eq!(batch_ids(&reply, "firstBatch"), found);
    assert_eq!(found.len(), 10);
}

#[test]
fn count_agrees_with_an_aggregate_count_stage() {
    let proxy = Proxy::new();
    let docs: Vec<Bson> = (0..7).map(|i| Bson::Document(doc! { "_id": i })).collect();
    proxy.handle_command(&doc! { "insert": "seq", "documents": docs, "$db": "test" });

    let reply = proxy.handle_command(&doc! {
        "count": "seq",
        "query": { "_id": { "$gte": 2 } },
        "$db": "test",
    });
    assert_eq!(reply.get_i32("n").map_err(|e| e.to_string()), Ok(5));

    let reply = proxy.handle_command(&doc! {
        "aggregate": "seq",
        "pipeline": [{ "$match": { "_id": { "$gte": 2 } } }, { "$count": "n" }],
        "cursor": {},
        "$db": "test",
    });
    let batch = reply.get_document("cursor").unwrap().get_array("firstBatch").unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].as_document().unwrap().get_i32("n").map_err(|e| e.to_string()), Ok(5));
}

#[test]
fn unrecognized_top_level_options_are_ignored() {
    let proxy = Proxy::new();
    proxy.handle_command(&doc! { "insert": "t", "documents": [{ "_id": 1 }], "$db": "test" });
    let reply = proxy.handle_command(&doc! {
        "find": "t",
        "maxTimeMS": 5000,
        "readConcern": { "level": "local" },
        "comment": "driver housekeeping",
        "$db": "test",
    });
    assert_eq!(reply.get_f64("ok").map_err(|e| e.to_string()), Ok(1.0));
    assert_eq!(batch_ids(&reply, "firstBatch"), vec![1]);
}

#[test]
fn error_replies_share_one_shape() {
    let proxy = Proxy::new();
    let failing = [
        doc! { "find": "t" },
        doc! { "renameCollection": "a", "$db": "test" },
        doc! { "getMore": 12_i64, "collection": "t", "$db": "test" },
        doc! { "distinct": "t", "$db": "test" },
    ];
    for cmd in &failing {
        let reply = proxy.handle_command(cmd);
        assert_eq!(reply.get_f64("ok").map_err(|e| e.to_string()), Ok(0.0), "{cmd:?}");
        assert!(reply.get_i32("code").is_ok(), "{reply:?}");
        assert!(reply.get_str("codeName").is_ok(), "{reply:?}");
        assert!(reply.get_str("errmsg").is_ok(), "{reply:?}");
    }

    let reply = proxy.handle_command(&doc! { "renameCollection": "a", "$db": "test" });
    assert_eq!(reply.get_i32("code").map_err(|e| e.to_string()), Ok(59));
    assert_eq!(reply.get_str("errmsg").map_err(|e| e.to_string()), Ok("no such command: 'renameCollection'"));
}

#[test]
fn writes_to_separate_databases_do_not_collide() {
    let proxy = Proxy::new();
    proxy.handle_command(&doc! { "insert": "t", "documents": [{ "_id": 1 }], "$db": "alpha" });
    proxy.handle_command(&doc! { "insert": "t", "documents": [{ "_id": 1 }], "$db": "beta" });

    let reply = proxy.handle_command(&doc! { "count": "t", "$db": "alpha" });
    assert_eq!(reply.get_i32("n").map_err(|e| e.to_string()), Ok(1));
    let reply = proxy.handle_command(&doc! {
        "delete": "t",
        "deletes": [{ "q": {}, "limit": 0 }],
        "$db": "beta",
    });
    assert_eq!(reply.get_i32("n").map_err(|e| e.to_string()), Ok(1));
    let reply = proxy.handle_command(&doc! { "count": "t", "$db": "alpha" });
    assert_eq!(reply.get_i32("n").map_err(|e| e.to_string()), Ok(1));
}
