//! Command dispatch and the shared request plumbing.
//!
//! Every inbound command document is routed by its FIRST key. Handlers are
//! thin functions over the compilers, the planner, and the cursor registry;
//! they return `Result<Document, CommandError>`, and `dispatch` shapes
//! failures into the wire error document so callers always get a reply.

// Submodules for separation of concerns
mod admin;
mod aggregate;
mod cursors;
mod explain;
mod read;
mod sasl;
mod write;

use bson::{Bson, Document, doc};

use crate::Proxy;
use crate::backend::{BackendCapabilities, BackendError, NativeQuery, RowStream};
use crate::document::{Path, format_value, set_path, type_alias};
use crate::errors::CommandError;
use crate::pushdown::QueryPlan;
use crate::query::{Filter, SortSpec};
use crate::session::SessionId;

/// Routes one command document to its handler and shapes the reply.
pub fn dispatch(proxy: &Proxy, cmd: &Document) -> Document {
    let Some(name) = cmd.keys().next().map(String::as_str) else {
        return CommandError::CommandNotFound("no such command: ''".into()).to_document();
    };
    let result = match name {
        "find" => read::find(proxy, cmd),
        "count" => read::count(proxy, cmd),
        "distinct" => read::distinct(proxy, cmd),
        "aggregate" => aggregate::aggregate(proxy, cmd),
        "insert" => write::insert(proxy, cmd),
        "update" => write::update(proxy, cmd),
        "delete" => write::delete(proxy, cmd),
        "getMore" => cursors::get_more(proxy, cmd),
        "killCursors" => cursors::kill_cursors(proxy, cmd),
        "endSessions" => cursors::end_sessions(proxy, cmd),
        "explain" => explain::explain(proxy, cmd),
        "listCollections" => admin::list_collections(proxy, cmd),
        "create" => admin::create(proxy, cmd),
        "drop" => admin::drop(proxy, cmd),
        "ping" => admin::ping(proxy, cmd),
        "buildInfo" => admin::build_info(proxy, cmd),
        "saslStart" => sasl::sasl_start(proxy, cmd),
        "saslContinue" => sasl::sasl_continue(proxy, cmd),
        _ => Err(CommandError::CommandNotFound(format!("no such command: '{name}'"))),
    };
    match result {
        Ok(reply) => reply,
        Err(err) => {
            if matches!(err, CommandError::Internal(_)) {
                log::error!("{name} failed: {err}");
            } else {
                log::debug!("{name} rejected: {err}");
            }
            err.to_document()
        }
    }
}

/// The `$db` parameter, required on every namespaced command.
pub(crate) fn required_db(cmd: &Document) -> Result<String, CommandError> {
    match cmd.get("$db") {
        Some(Bson::String(db)) => Ok(db.clone()),
        Some(v) => Err(CommandError::BadValue(format!(
            "required parameter \"$db\" has type '{}' (expected 'string')",
            type_alias(v)
        ))),
        None => Err(CommandError::BadValue("required parameter \"$db\" is missing".into())),
    }
}

/// Reads the collection name out of the command's own key and joins it with
/// `$db` into a `db.coll` namespace.
pub(crate) fn namespace(cmd: &Document, name: &str) -> Result<(String, String), CommandError> {
    let db = required_db(cmd)?;
    let coll = match cmd.get(name) {
        Some(Bson::String(c)) => c.clone(),
        Some(v) => {
            return Err(CommandError::BadValue(format!(
                "collection name has invalid type {}",
                type_alias(v)
            )));
        }
        None => {
            return Err(CommandError::BadValue(format!(
                "required parameter \"{name}\" is missing"
            )));
        }
    };
    if coll.is_empty() {
        return Err(CommandError::InvalidNamespace(format!("Invalid namespace specified '{db}.'")));
    }
    Ok((db, coll))
}

/// Parses the optional `lsid` into a session id.
pub(crate) fn session_from(cmd: &Document) -> Result<Option<SessionId>, CommandError> {
    match cmd.get("lsid") {
        None => Ok(None),
        Some(Bson::Document(lsid)) => SessionId::from_lsid(lsid).map(Some),
        Some(v) => Err(CommandError::TypeMismatch(format!(
            "BSON field 'lsid' is the wrong type '{}', expected type 'object'",
            type_alias(v)
        ))),
    }
}

pub(crate) fn optional_doc<'a>(
    cmd: &'a Document,
    key: &str,
) -> Result<Option<&'a Document>, CommandError> {
    match cmd.get(key) {
        None => Ok(None),
        Some(Bson::Document(d)) => Ok(Some(d)),
        Some(v) => Err(CommandError::TypeMismatch(format!(
            "BSON field '{key}' is the wrong type '{}', expected type 'object'",
            type_alias(v)
        ))),
    }
}

pub(crate) fn optional_bool(
    cmd: &Document,
    key: &str,
    default: bool,
) -> Result<bool, CommandError> {
    match cmd.get(key) {
        None => Ok(default),
        Some(Bson::Boolean(b)) => Ok(*b),
        Some(v) => Err(CommandError::TypeMismatch(format!(
            "BSON field '{key}' is the wrong type '{}', expected type 'bool'",
            type_alias(v)
        ))),
    }
}

/// Numeric command arguments accept int, long, and whole doubles.
pub(crate) fn whole_number(key: &str, v: &Bson) -> Result<i64, CommandError> {
    match v {
        Bson::Int32(n) => Ok(i64::from(*n)),
        Bson::Int64(n) => Ok(*n),
        Bson::Double(d) if d.is_finite() && d.trunc() == *d => {
            #[allow(clippy::cast_possible_truncation)]
            {
                Ok(*d as i64)
            }
        }
        Bson::Double(_) => {
            Err(CommandError::BadValue(format!("Expected an integer: {key}: {}", format_value(v))))
        }
        other => Err(CommandError::TypeMismatch(format!(
            "BSON field '{key}' is the wrong type '{}', \
             expected types '[long, int, decimal, double]'",
            type_alias(other)
        ))),
    }
}

pub(crate) fn non_negative(key: &str, n: i64) -> Result<usize, CommandError> {
    if n < 0 {
        return Err(CommandError::Location(
            51024,
            format!("BSON field '{key}' value must be >= 0, actual value '{n}'"),
        ));
    }
    Ok(usize::try_from(n).unwrap_or(usize::MAX))
}

/// Shapes a `{cursor: {firstBatch|nextBatch, id, ns}, ok: 1.0}` reply.
pub(crate) fn cursor_reply(batch_key: &str, docs: Vec<Document>, id: i64, ns: &str) -> Document {
    doc! {
        "cursor": { batch_key: docs, "id": id, "ns": ns },
        "ok": 1.0,
    }
}

/// Caps the backend advertises, masked by the configured pushdown toggles.
pub(crate) fn masked_caps(proxy: &Proxy, ns: &str) -> BackendCapabilities {
    let mut caps = proxy.backend.capabilities(ns);
    caps.filter_conditions &= proxy.config.enable_filter_pushdown;
    caps.native_sort &= proxy.config.enable_sort_pushdown;
    caps
}

/// Plans and executes one backend read. A backend that rejects the native
/// clauses gets a second, bare scan; the returned plan then claims nothing,
/// so the caller re-evaluates everything in process.
pub(crate) fn fetch(
    proxy: &Proxy,
    ns: &str,
    filter: &Filter,
    sort: &SortSpec,
    limit: Option<usize>,
    skip: usize,
) -> Result<(RowStream, QueryPlan), CommandError> {
    let caps = masked_caps(proxy, ns);
    let plan = QueryPlan::build(ns, filter, sort, limit, skip, &caps);
    match proxy.backend.execute(&plan.native) {
        Ok(rows) => Ok((rows, plan)),
        Err(BackendError::Rejected(reason)) if plan.native.has_native_clauses() => {
            crate::diag!("pushdown {ns}: backend rejected the native query ({reason}), \
                          retrying as a bare scan");
            let bare =
                QueryPlan::build(ns, filter, sort, limit, skip, &BackendCapabilities::default());
            let rows = proxy.backend.execute(&bare.native).map_err(backend_failure)?;
            Ok((rows, bare))
        }
        Err(e) => Err(backend_failure(e)),
    }
}

/// Full read pipeline: fetch, residual filter, sort, skip, limit. The
/// returned documents are in final order but not yet projected.
pub(crate) fn run_query(
    proxy: &Proxy,
    ns: &str,
    filter: &Filter,
    sort: &SortSpec,
    limit: Option<usize>,
    skip: usize,
) -> Result<Vec<Document>, CommandError> {
    let (rows, plan) = fetch(proxy, ns, filter, sort, limit, skip)?;
    let mut docs: Vec<Document> = rows.into_iter().map(|r| r.doc).collect();
    if let Some(residual) = &plan.residual {
        docs.retain(|d| residual.matches(d, &proxy.regexes));
    }
    if !sort.is_empty() && !plan.pushed.sort {
        sort.apply(&mut docs);
    }
    if skip > 0 {
        docs = docs.split_off(skip.min(docs.len()));
    }
    if let Some(l) = limit {
        docs.truncate(l);
    }
    Ok(docs)
}

/// A bare scan with no plan at all; writes walk candidates this way.
pub(crate) fn scan_all(proxy: &Proxy, ns: &str) -> Result<Vec<Document>, CommandError> {
    let rows = proxy.backend.execute(&NativeQuery::scan(ns)).map_err(backend_failure)?;
    Ok(rows.into_iter().map(|r| r.doc).collect())
}

pub(crate) fn backend_failure(e: BackendError) -> CommandError {
    CommandError::Internal(e.to_string())
}

pub(crate) fn duplicate_key(ns: &str, id: &Bson) -> CommandError {
    CommandError::DuplicateKey(format!(
        "E11000 duplicate key error collection: {ns} index: _id_ dup key: {{ _id: {} }}",
        format_value(id)
    ))
}

/// Seeds an upserted document from the filter's equality conditions. `$`
/// operators beyond `$eq` contribute nothing; dotted keys build nested
/// structure.
pub(crate) fn upsert_seed(filter: &Document) -> Result<Document, CommandError> {
    let mut seed = Document::new();
    for (key, value) in filter {
        if key.starts_with('$') {
            continue;
        }
        let operand = match value {
            Bson::Document(d) if d.keys().next().is_some_and(|k| k.starts_with('$')) => {
                match d.get("$eq") {
                    Some(v) => v.clone(),
                    None => continue,
                }
            }
            other => other.clone(),
        };
        set_path(&mut seed, &Path::parse(key)?, operand)?;
    }
    Ok(seed)
}

#[cfg(test)]
mod tests {
    use bson::doc;

    use super::*;

    #[test]
    fn dispatch_routes_by_first_key_only() {
        let proxy = Proxy::new();
        let reply = proxy.handle_command(&doc! {"ping": 1, "find": "x", "$db": "test"});
        assert_eq!(reply.get_f64("ok").unwrap(), 1.0);
    }

    #[test]
    fn unknown_commands_report_command_not_found() {
        let proxy = Proxy::new();
        let reply = proxy.handle_command(&doc! {"shardCollection": "t", "$db": "test"});
        assert_eq!(reply.get_f64("ok").unwrap(), 0.0);
        assert_eq!(reply.get_i32("code").unwrap(), 59);
        assert_eq!(reply.get_str("codeName").unwrap(), "CommandNotFound");
        assert_eq!(reply.get_str("errmsg").unwrap(), "no such command: 'shardCollection'");
    }

    #[test]
    fn empty_command_documents_get_an_error_reply() {
        let proxy = Proxy::new();
        let reply = proxy.handle_command(&Document::new());
        assert_eq!(reply.get_f64("ok").unwrap(), 0.0);
        assert_eq!(reply.get_i32("code").unwrap(), 59);
    }

    #[test]
    fn namespace_requires_db_and_string_collection() {
        let err = namespace(&doc! {"find": "coll"}, "find").unwrap_err();
        assert_eq!(err.to_string(), "required parameter \"$db\" is missing");

        let err = namespace(&doc! {"find": 1, "$db": "test"}, "find").unwrap_err();
        assert_eq!(err.to_string(), "collection name has invalid type int");

        let err = namespace(&doc! {"find": "", "$db": "test"}, "find").unwrap_err();
        assert_eq!(err.code(), 73);
        assert_eq!(err.to_string(), "Invalid namespace specified 'test.'");
    }

    #[test]
    fn whole_numbers_accept_ints_longs_and_whole_doubles() {
        assert_eq!(whole_number("limit", &Bson::Int32(5)).unwrap(), 5);
        assert_eq!(whole_number("limit", &Bson::Int64(-3)).unwrap(), -3);
        assert_eq!(whole_number("limit", &Bson::Double(4.0)).unwrap(), 4);

        let err = whole_number("limit", &Bson::Double(4.5)).unwrap_err();
        assert_eq!(err.to_string(), "Expected an integer: limit: 4.5");

        let err = whole_number("skip", &Bson::String("7".into())).unwrap_err();
        assert_eq!(err.code(), 14);

        let err = non_negative("skip", -2).unwrap_err();
        assert_eq!(err.code(), 51024);
        assert_eq!(err.to_string(), "BSON field 'skip' value must be >= 0, actual value '-2'");
    }

    #[test]
    fn upsert_seeds_take_equality_fields_only() {
        let seed = upsert_seed(&doc! {
            "a": 5,
            "b": {"$eq": 6},
            "c": {"$gt": 3},
            "d.e": 7,
            "$comment": "x",
        })
        .unwrap();
        assert_eq!(seed, doc! {"a": 5, "b": 6, "d": {"e": 7}});
    }
}
