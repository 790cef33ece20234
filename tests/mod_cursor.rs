use std::collections::HashSet;
use std::sync::Arc;

use bisongate::Proxy;
use bisongate::config::ProxyConfig;
use bson::{Bson, Document, doc};

fn seed_seq(proxy: &Proxy, coll: &str, n: i32) {
    let docs: Vec<Bson> = (0..n).map(|i| Bson::Document(doc! { "_id": i })).collect();
    let reply = proxy.handle_command(&doc! { "insert": coll, "documents": docs, "$db": "test" });
    assert_eq!(reply.get_i32("n").map_err(|e| e.to_string()), Ok(n));
}

fn open_cursor(proxy: &Proxy, coll: &str, batch: i32) -> (i64, Vec<i64>) {
    let reply = proxy.handle_command(&doc! {
        "find": coll,
        "sort": { "_id": 1 },
        "batchSize": batch,
        "$db": "test",
    });
    let cursor = reply.get_document("cursor").unwrap();
    let ids = cursor
        .get_array("firstBatch")
        .unwrap()
        .iter()
        .map(|b| i64::from(b.as_document().unwrap().get_i32("_id").unwrap()))
        .collect();
    (cursor.get_i64("id").unwrap(), ids)
}

fn get_more(proxy: &Proxy, coll: &str, id: i64, batch: i32) -> Document {
    proxy.handle_command(&doc! {
        "getMore": id,
        "collection": coll,
        "batchSize": batch,
        "$db": "test",
    })
}

#[test]
fn single_batch_cursors_are_never_registered() {
    let proxy = Proxy::new();
    seed_seq(&proxy, "t", 10);
    let reply = proxy.handle_command(&doc! {
        "find": "t",
        "batchSize": 3,
        "singleBatch": true,
        "$db": "test",
    });
    let cursor = reply.get_document("cursor").unwrap();
    assert_eq!(cursor.get_i64("id").map_err(|e| e.to_string()), Ok(0));
    assert_eq!(cursor.get_array("firstBatch").unwrap().len(), 3);

    // The id was 0; a getMore on it has nothing to find.
    let reply = get_more(&proxy, "t", 0, 2);
    assert_eq!(reply.get_i32("code").map_err(|e| e.to_string()), Ok(43));
    assert_eq!(reply.get_str("codeName").map_err(|e| e.to_string()), Ok("CursorNotFound"));
    assert_eq!(reply.get_str("errmsg").map_err(|e| e.to_string()), Ok("cursor id 0 not found"));
}

#[test]
fn batch_size_zero_opens_an_empty_first_batch() {
    let proxy = Proxy::new();
    seed_seq(&proxy, "t", 4);
    let (id, first) = open_cursor(&proxy, "t", 0);
    assert_ne!(id, 0);
    assert!(first.is_empty());

    let reply = get_more(&proxy, "t", id, 10);
    let cursor = reply.get_document("cursor").unwrap();
    assert_eq!(cursor.get_array("nextBatch").unwrap().len(), 4);
    assert_eq!(cursor.get_i64("id").map_err(|e| e.to_string()), Ok(0));
}

#[test]
fn first_batches_default_to_101_documents() {
    let proxy = Proxy::new();
    seed_seq(&proxy, "t", 150);
    let reply = proxy.handle_command(&doc! { "find": "t", "$db": "test" });
    let cursor = reply.get_document("cursor").unwrap();
    assert_eq!(cursor.get_array("firstBatch").unwrap().len(), 101);
    assert_ne!(cursor.get_i64("id").map_err(|e| e.to_string()), Ok(0));
}

#[test]
fn exhaustion_reports_id_zero_and_removes_the_cursor() {
    let proxy = Proxy::new();
    seed_seq(&proxy, "t", 5);
    let (id, first) = open_cursor(&proxy, "t", 2);
    assert_eq!(first, vec![0, 1]);

    let reply = get_more(&proxy, "t", id, 2);
    assert_eq!(reply.get_document("cursor").unwrap().get_i64("id").map_err(|e| e.to_string()), Ok(id));
    let reply = get_more(&proxy, "t", id, 2);
    assert_eq!(reply.get_document("cursor").unwrap().get_i64("id").map_err(|e| e.to_string()), Ok(0));

    let reply = get_more(&proxy, "t", id, 2);
    assert_eq!(reply.get_i32("code").map_err(|e| e.to_string()), Ok(43));
    assert_eq!(reply.get_str("errmsg").map_err(|e| e.to_string()), Ok(format!("cursor id {id} not found").as_str()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_get_more_streams_partition_the_scan() {
    let proxy = Arc::new(Proxy::new());
    seed_seq(&proxy, "t", 200);
    let (id, first) = open_cursor(&proxy, "t", 0);
    assert!(first.is_empty());

    let mut handles = Vec::new();
    for _ in 0..2 {
        let proxy = Arc::clone(&proxy);
        handles.push(tokio::spawn(async move {
            let mut seen: Vec<i64> = Vec::new();
            loop {
                let reply = get_more(&proxy, "t", id, 7);
                if reply.get_f64("ok").map_err(|e| e.to_string()) == Ok(0.0) {
                    // The other stream took the final batch.
                    assert_eq!(reply.get_i32("code").map_err(|e| e.to_string()), Ok(43));
                    break;
                }
                let cursor = reply.get_document("cursor").unwrap();
                for b in cursor.get_array("nextBatch").unwrap() {
                    seen.push(i64::from(b.as_document().unwrap().get_i32("_id").unwrap()));
                }
                if cursor.get_i64("id").map_err(|e| e.to_string()) == Ok(0) {
                    break;
                }
            }
            seen
        }));
    }

    let mut all: Vec<i64> = Vec::new();
    for handle in handles {
        all.extend(handle.await.expect("stream task"));
    }
    // No document lost, none served twice.
    let unique: HashSet<i64> = all.iter().copied().collect();
    assert_eq!(all.len(), 200);
    assert_eq!(unique.len(), 200);
}

#[test]
fn killed_cursors_stop_serving_but_others_survive() {
    let proxy = Proxy::new();
    seed_seq(&proxy, "a", 6);
    seed_seq(&proxy, "b", 6);
    let (id_a, _) = open_cursor(&proxy, "a", 2);
    let (id_b, _) = open_cursor(&proxy, "b", 2);

    let reply = proxy.handle_command(&doc! {
        "killCursors": "a",
        "cursors": [id_a],
        "$db": "test",
    });
    assert_eq!(reply.get_array("cursorsKilled").unwrap(), &vec![Bson::Int64(id_a)]);

    let reply = get_more(&proxy, "a", id_a, 2);
    assert_eq!(reply.get_i32("code").map_err(|e| e.to_string()), Ok(43));
    let reply = get_more(&proxy, "b", id_b, 2);
    assert_eq!(reply.get_f64("ok").map_err(|e| e.to_string()), Ok(1.0));
}

#[test]
fn idle_cursors_are_swept() {
    let config = ProxyConfig {
        cursor_idle_secs: 1,
        sweep_interval_secs: 1,
        ..ProxyConfig::default()
    };
    let proxy = Proxy::with_config(config);
    seed_seq(&proxy, "t", 6);
    let (id, _) = open_cursor(&proxy, "t", 2);

    std::thread::sleep(std::time::Duration::from_millis(3200));
    let reply = get_more(&proxy, "t", id, 2);
    assert_eq!(reply.get_i32("code").map_err(|e| e.to_string()), Ok(43));
}

#[test]
fn cursors_on_a_dropped_proxy_shut_down_cleanly() {
    // The sweeper thread must stop when the proxy goes away.
    let proxy = Proxy::new();
    seed_seq(&proxy, "t", 6);
    let _ = open_cursor(&proxy, "t", 2);
    drop(proxy);
}
