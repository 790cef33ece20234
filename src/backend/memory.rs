//! In-memory backend: the reference implementation of the executor seam,
//! also used by the test suites.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use bson::{Bson, Document};
use parking_lot::RwLock;

use super::executor::{
    BackendCapabilities, BackendError, CollectionInfo, CreateOptions, NativeCondition, NativeOp,
    NativeQuery, NativeQueryExecutor, NativeSort, Row, RowStream,
};
use crate::compare::{SortOrder, compare_for_sort, values_equal};

pub struct MemoryBackend {
    collections: RwLock<HashMap<String, StoredCollection>>,
    reject_native: AtomicBool,
}

#[derive(Debug, Default)]
struct StoredCollection {
    rows: Vec<Row>,
    next_record_id: u64,
    capped: bool,
    max: Option<u64>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self { collections: RwLock::new(HashMap::new()), reject_native: AtomicBool::new(false) }
    }

    /// Makes `execute` reject queries carrying native clauses, which is how
    /// the tests exercise the retry-without-pushdown path. Bare scans keep
    /// working.
    pub fn reject_native_queries(&self, reject: bool) {
        self.reject_native.store(reject, Ordering::Relaxed);
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeQueryExecutor for MemoryBackend {
    fn execute(&self, query: &NativeQuery) -> Result<RowStream, BackendError> {
        if query.has_native_clauses() && self.reject_native.load(Ordering::Relaxed) {
            return Err(BackendError::Rejected("native clauses are disabled".into()));
        }

        let collections = self.collections.read();
        let Some(collection) = collections.get(&query.ns) else {
            return Ok(Vec::new());
        };
        let mut rows: Vec<Row> = collection
            .rows
            .iter()
            .filter(|row| query.conditions.iter().all(|c| condition_holds(c, &row.doc)))
            .cloned()
            .collect();
        drop(collections);

        match &query.sort {
            Some(NativeSort::RecordId) => rows.sort_by_key(|r| r.record_id),
            Some(NativeSort::Field { name, descending }) => {
                let order = if *descending { SortOrder::Descending } else { SortOrder::Ascending };
                rows.sort_by(|a, b| {
                    let left = a.doc.get(name).unwrap_or(&Bson::Null);
                    let right = b.doc.get(name).unwrap_or(&Bson::Null);
                    compare_for_sort(left, right, order)
                });
            }
            None => {}
        }
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    fn insert(&self, ns: &str, doc: Document) -> Result<(), BackendError> {
        let mut collections = self.collections.write();
        let collection = collections.entry(ns.to_owned()).or_default();
        if let Some(id) = doc.get("_id")
            && collection
                .rows
                .iter()
                .any(|row| row.doc.get("_id").is_some_and(|existing| values_equal(existing, id)))
        {
            return Err(BackendError::DuplicateId(id.clone()));
        }
        collection.next_record_id += 1;
        let record_id = collection.next_record_id;
        collection.rows.push(Row { record_id, doc });
        if collection.capped
            && let Some(max) = collection.max
        {
            let max = usize::try_from(max).unwrap_or(usize::MAX);
            while collection.rows.len() > max {
                collection.rows.remove(0);
            }
        }
        Ok(())
    }

    fn update_by_id(&self, ns: &str, id: &Bson, doc: Document) -> Result<bool, BackendError> {
        let mut collections = self.collections.write();
        let Some(collection) = collections.get_mut(ns) else {
            return Ok(false);
        };
        for row in &mut collection.rows {
            if row.doc.get("_id").is_some_and(|existing| values_equal(existing, id)) {
                row.doc = doc;
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn delete_by_id(&self, ns: &str, id: &Bson) -> Result<bool, BackendError> {
        let mut collections = self.collections.write();
        let Some(collection) = collections.get_mut(ns) else {
            return Ok(false);
        };
        let before = collection.rows.len();
        collection
            .rows
            .retain(|row| !row.doc.get("_id").is_some_and(|existing| values_equal(existing, id)));
        Ok(collection.rows.len() != before)
    }

    fn list_collections(&self, db: &str) -> Result<Vec<CollectionInfo>, BackendError> {
        let prefix = format!("{db}.");
        let collections = self.collections.read();
        let mut infos: Vec<CollectionInfo> = collections
            .iter()
            .filter_map(|(ns, c)| {
                ns.strip_prefix(&prefix)
                    .map(|name| CollectionInfo { name: name.to_owned(), capped: c.capped })
            })
            .collect();
        // HashMap iteration order is arbitrary; listings are sorted.
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(infos)
    }

    fn create_collection(&self, ns: &str, options: &CreateOptions) -> Result<bool, BackendError> {
        let mut collections = self.collections.write();
        if collections.contains_key(ns) {
            return Ok(false);
        }
        collections.insert(
            ns.to_owned(),
            StoredCollection {
                capped: options.capped,
                max: options.max,
                ..StoredCollection::default()
            },
        );
        Ok(true)
    }

    fn drop_collection(&self, ns: &str) -> Result<bool, BackendError> {
        Ok(self.collections.write().remove(ns).is_some())
    }

    fn capabilities(&self, ns: &str) -> BackendCapabilities {
        let capped = self.collections.read().get(ns).is_some_and(|c| c.capped);
        BackendCapabilities {
            filter_conditions: true,
            native_sort: true,
            native_limit: true,
            capped,
        }
    }
}

/// Equality the way a JSON-document store compares: a direct value match or
/// array containment, numbers by mathematical value. This agrees with the
/// canonical comparator on every operand type the planner pushes.
fn condition_holds(cond: &NativeCondition, doc: &Document) -> bool {
    let matched = doc.get(&cond.field).is_some_and(|v| {
        values_equal(v, &cond.operand)
            || matches!(v, Bson::Array(elems) if elems.iter().any(|e| values_equal(e, &cond.operand)))
    });
    match cond.op {
        NativeOp::Eq => matched,
        NativeOp::Ne => !matched,
    }
}
