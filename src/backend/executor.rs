//! The native-query seam between the proxy core and a storage backend.

use bson::{Bson, Document};
use serde::Serialize;
use thiserror::Error;

/// Errors surfaced by a backend.
///
/// `Rejected` marks native-query translation failures; the query paths retry
/// those once with pushdown disabled instead of propagating them.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The backend cannot run this native query.
    #[error("native query rejected: {0}")]
    Rejected(String),
    /// A document with the same `_id` is already stored.
    #[error("duplicate _id {0}")]
    DuplicateId(Bson),
    #[error("{0}")]
    Internal(String),
}

/// Query shape a backend can run natively: conjunctive conditions on
/// top-level fields, at most one sort, and an optional limit.
///
/// Serializes to compact JSON for plan logging.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct NativeQuery {
    pub ns: String,
    pub conditions: Vec<NativeCondition>,
    pub sort: Option<NativeSort>,
    pub limit: Option<usize>,
}

impl NativeQuery {
    /// A bare collection scan.
    #[must_use]
    pub fn scan(ns: &str) -> Self {
        Self { ns: ns.to_owned(), ..Self::default() }
    }

    /// Whether the query asks for anything beyond a bare scan.
    #[must_use]
    pub fn has_native_clauses(&self) -> bool {
        !self.conditions.is_empty() || self.sort.is_some() || self.limit.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NativeCondition {
    pub field: String,
    pub op: NativeOp,
    pub operand: Bson,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NativeOp {
    Eq,
    Ne,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum NativeSort {
    Field { name: String, descending: bool },
    /// Physical insertion order; the replay order of capped collections.
    RecordId,
}

/// One stored document with its backend record id.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub record_id: u64,
    pub doc: Document,
}

pub type RowStream = Vec<Row>;

/// Per-collection pushdown surface reported by a backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct BackendCapabilities {
    /// Accepts `NativeQuery::conditions`.
    pub filter_conditions: bool,
    /// Accepts a single-field native sort.
    pub native_sort: bool,
    /// Applies `NativeQuery::limit` after filtering and sorting.
    pub native_limit: bool,
    /// Insertion order is replayable; record-id sorts always push down.
    pub capped: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionInfo {
    pub name: String,
    pub capped: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CreateOptions {
    pub capped: bool,
    /// Document cap for capped collections; the oldest rows are evicted.
    pub max: Option<u64>,
}

/// Storage seam the proxy drives. Implementations own persistence and native
/// filtering; the proxy core owns the observable command semantics.
pub trait NativeQueryExecutor: Send + Sync {
    /// Runs a native query. Row order is arbitrary unless the query carries
    /// a sort; a missing collection is an empty stream.
    fn execute(&self, query: &NativeQuery) -> Result<RowStream, BackendError>;

    /// Stores a new document, creating the collection on first use.
    fn insert(&self, ns: &str, doc: Document) -> Result<(), BackendError>;

    /// Replaces the document with the given `_id`. False when no such
    /// document exists.
    fn update_by_id(&self, ns: &str, id: &Bson, doc: Document) -> Result<bool, BackendError>;

    /// Removes the document with the given `_id`. False when no such
    /// document exists.
    fn delete_by_id(&self, ns: &str, id: &Bson) -> Result<bool, BackendError>;

    fn list_collections(&self, db: &str) -> Result<Vec<CollectionInfo>, BackendError>;

    /// False when the collection already exists.
    fn create_collection(&self, ns: &str, options: &CreateOptions) -> Result<bool, BackendError>;

    /// False when there was nothing to drop.
    fn drop_collection(&self, ns: &str) -> Result<bool, BackendError>;

    fn capabilities(&self, ns: &str) -> BackendCapabilities;
}
