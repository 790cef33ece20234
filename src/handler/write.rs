//! `insert`, `update`, and `delete`.
//!
//! Per-statement failures land in a `writeErrors` array and the reply keeps
//! `ok: 1.0`; only malformed top-level parameters fail the whole command.
//! Mutations leave an audit line on the `bisongate::audit` target.

use bson::{Bson, Document, doc};

use super::{
    backend_failure, duplicate_key, namespace, optional_bool, optional_doc, run_query, scan_all,
    upsert_seed, whole_number,
};
use crate::Proxy;
use crate::backend::BackendError;
use crate::document::{ensure_id, format_value, type_alias, validate_storable, validate_values};
use crate::errors::CommandError;
use crate::query::{Filter, SortSpec, UpdateSpec};

pub(crate) fn insert(proxy: &Proxy, cmd: &Document) -> Result<Document, CommandError> {
    let (db, coll) = namespace(cmd, "insert")?;
    let ns = format!("{db}.{coll}");
    let ordered = optional_bool(cmd, "ordered", true)?;
    let documents = required_array(cmd, "insert", "documents")?;

    let mut n = 0_i32;
    let mut write_errors = Vec::new();
    for (i, entry) in documents.iter().enumerate() {
        let index = index_i32(i);
        let result = match entry {
            Bson::Document(d) => insert_one(proxy, &ns, d),
            other => Err(CommandError::TypeMismatch(format!(
                "BSON field 'insert.documents.{i}' is the wrong type '{}', \
                 expected type 'object'",
                type_alias(other)
            ))),
        };
        match result {
            Ok(id) => {
                n += 1;
                log::info!(target: "bisongate::audit", "insert {ns} _id={}", format_value(&id));
            }
            Err(err) => {
                write_errors.push(err.write_error(index));
                if ordered {
                    break;
                }
            }
        }
    }

    let mut reply = doc! {"n": n};
    if !write_errors.is_empty() {
        reply.insert("writeErrors", write_errors);
    }
    reply.insert("ok", 1.0);
    Ok(reply)
}

fn insert_one(proxy: &Proxy, ns: &str, d: &Document) -> Result<Bson, CommandError> {
    validate_values(d)?;
    validate_storable(d)?;
    let mut doc = d.clone();
    let id = ensure_id(&mut doc);
    match proxy.backend.insert(ns, doc) {
        Ok(()) => Ok(id),
        Err(BackendError::DuplicateId(id)) => Err(duplicate_key(ns, &id)),
        Err(e) => Err(backend_failure(e)),
    }
}

pub(crate) fn update(proxy: &Proxy, cmd: &Document) -> Result<Document, CommandError> {
    let (db, coll) = namespace(cmd, "update")?;
    let ns = format!("{db}.{coll}");
    let ordered = optional_bool(cmd, "ordered", true)?;
    let updates = required_array(cmd, "update", "updates")?;

    // Every statement parses before any executes; a malformed statement
    // fails the command, not just its slot in writeErrors.
    let mut parsed = Vec::with_capacity(updates.len());
    for (i, entry) in updates.iter().enumerate() {
        let Bson::Document(stmt) = entry else {
            return Err(CommandError::TypeMismatch(format!(
                "BSON field 'update.updates.{i}' is the wrong type '{}', expected type 'object'",
                type_alias(entry)
            )));
        };
        parsed.push(parse_update(stmt)?);
    }

    let mut n = 0_i32;
    let mut n_modified = 0_i32;
    let mut upserted = Vec::new();
    let mut write_errors = Vec::new();
    for (i, stmt) in parsed.iter().enumerate() {
        let index = index_i32(i);
        match execute_update(proxy, &ns, stmt) {
            Ok(outcome) => {
                n += outcome.matched;
                n_modified += outcome.modified;
                if let Some(id) = outcome.upserted_id {
                    upserted.push(doc! {"index": index, "_id": id});
                }
            }
            Err(err) => {
                write_errors.push(err.write_error(index));
                if ordered {
                    break;
                }
            }
        }
    }

    let mut reply = doc! {"n": n};
    if !upserted.is_empty() {
        reply.insert("upserted", upserted);
    }
    reply.insert("nModified", n_modified);
    if !write_errors.is_empty() {
        reply.insert("writeErrors", write_errors);
    }
    reply.insert("ok", 1.0);
    Ok(reply)
}

struct ParsedUpdate {
    filter_doc: Document,
    filter: Filter,
    spec: UpdateSpec,
    multi: bool,
    upsert: bool,
}

struct UpdateOutcome {
    matched: i32,
    modified: i32,
    upserted_id: Option<Bson>,
}

fn parse_update(stmt: &Document) -> Result<ParsedUpdate, CommandError> {
    let empty = Document::new();
    let q = optional_doc(stmt, "q")?.unwrap_or(&empty);
    let u = match stmt.get("u") {
        Some(Bson::Document(u)) => u,
        Some(v) => {
            return Err(CommandError::TypeMismatch(format!(
                "BSON field 'update.updates.u' is the wrong type '{}', expected type 'object'",
                type_alias(v)
            )));
        }
        None => {
            return Err(CommandError::Location(
                40414,
                "BSON field 'update.updates.u' is missing but a required field".into(),
            ));
        }
    };
    Ok(ParsedUpdate {
        filter_doc: q.clone(),
        filter: Filter::compile(q)?,
        spec: UpdateSpec::compile(u)?,
        multi: optional_bool(stmt, "multi", false)?,
        upsert: optional_bool(stmt, "upsert", false)?,
    })
}

fn execute_update(
    proxy: &Proxy,
    ns: &str,
    stmt: &ParsedUpdate,
) -> Result<UpdateOutcome, CommandError> {
    let ParsedUpdate { filter_doc, filter, spec, multi, upsert } = stmt;
    let limit = if *multi { None } else { Some(1) };
    let docs = run_query(proxy, ns, filter, &SortSpec::default(), limit, 0)?;

    if docs.is_empty() {
        if !*upsert {
            return Ok(UpdateOutcome { matched: 0, modified: 0, upserted_id: None });
        }
        let seed = upsert_seed(filter_doc)?;
        let (mut new_doc, _) = spec.apply(&seed, true, &proxy.regexes)?;
        validate_values(&new_doc)?;
        validate_storable(&new_doc)?;
        let id = ensure_id(&mut new_doc);
        match proxy.backend.insert(ns, new_doc) {
            Ok(()) => {}
            Err(BackendError::DuplicateId(id)) => return Err(duplicate_key(ns, &id)),
            Err(e) => return Err(backend_failure(e)),
        }
        log::info!(target: "bisongate::audit", "upsert {ns} _id={}", format_value(&id));
        return Ok(UpdateOutcome { matched: 1, modified: 0, upserted_id: Some(id) });
    }

    let mut matched = 0_i32;
    let mut modified = 0_i32;
    for doc in &docs {
        matched += 1;
        let (new_doc, changed) = spec.apply(doc, false, &proxy.regexes)?;
        if !changed {
            continue;
        }
        validate_values(&new_doc)?;
        validate_storable(&new_doc)?;
        let Some(id) = doc.get("_id") else {
            return Err(CommandError::Internal("stored document has no _id".into()));
        };
        if proxy.backend.update_by_id(ns, id, new_doc).map_err(backend_failure)? {
            modified += 1;
            log::info!(target: "bisongate::audit", "update {ns} _id={}", format_value(id));
        }
    }
    Ok(UpdateOutcome { matched, modified, upserted_id: None })
}

pub(crate) fn delete(proxy: &Proxy, cmd: &Document) -> Result<Document, CommandError> {
    let (db, coll) = namespace(cmd, "delete")?;
    let ns = format!("{db}.{coll}");
    let ordered = optional_bool(cmd, "ordered", true)?;
    let deletes = required_array(cmd, "delete", "deletes")?;

    let mut parsed = Vec::with_capacity(deletes.len());
    for (i, entry) in deletes.iter().enumerate() {
        let Bson::Document(stmt) = entry else {
            return Err(CommandError::TypeMismatch(format!(
                "BSON field 'delete.deletes.{i}' is the wrong type '{}', expected type 'object'",
                type_alias(entry)
            )));
        };
        parsed.push(parse_delete(stmt)?);
    }

    let mut n = 0_i32;
    let mut write_errors = Vec::new();
    for (i, stmt) in parsed.iter().enumerate() {
        match execute_delete(proxy, &ns, stmt) {
            Ok(removed) => n += removed,
            Err(err) => {
                write_errors.push(err.write_error(index_i32(i)));
                if ordered {
                    break;
                }
            }
        }
    }

    let mut reply = doc! {"n": n};
    if !write_errors.is_empty() {
        reply.insert("writeErrors", write_errors);
    }
    reply.insert("ok", 1.0);
    Ok(reply)
}

struct ParsedDelete {
    filter: Filter,
    limited: bool,
}

fn parse_delete(stmt: &Document) -> Result<ParsedDelete, CommandError> {
    let empty = Document::new();
    let q = optional_doc(stmt, "q")?.unwrap_or(&empty);
    let limited = match stmt.get("limit") {
        None => {
            return Err(CommandError::Location(
                40414,
                "BSON field 'delete.deletes.limit' is missing but a required field".into(),
            ));
        }
        Some(v) => match whole_number("limit", v) {
            Ok(0) => false,
            Ok(1) => true,
            _ => {
                return Err(CommandError::FailedToParse(format!(
                    "The limit field in delete objects must be 0 or 1. Got {}",
                    format_value(v)
                )));
            }
        },
    };
    Ok(ParsedDelete { filter: Filter::compile(q)?, limited })
}

fn execute_delete(proxy: &Proxy, ns: &str, stmt: &ParsedDelete) -> Result<i32, CommandError> {
    // Candidates come from a bare scan; the filter runs in process so the
    // match set is settled before the first delete.
    let docs = scan_all(proxy, ns)?;
    let mut removed = 0_i32;
    for doc in &docs {
        if !stmt.filter.matches(doc, &proxy.regexes) {
            continue;
        }
        let Some(id) = doc.get("_id") else {
            return Err(CommandError::Internal("stored document has no _id".into()));
        };
        if proxy.backend.delete_by_id(ns, id).map_err(backend_failure)? {
            removed += 1;
            log::info!(target: "bisongate::audit", "delete {ns} _id={}", format_value(id));
        }
        if stmt.limited {
            break;
        }
    }
    Ok(removed)
}

fn required_array<'a>(
    cmd: &'a Document,
    command: &str,
    key: &str,
) -> Result<&'a Vec<Bson>, CommandError> {
    match cmd.get(key) {
        Some(Bson::Array(entries)) => Ok(entries),
        Some(v) => Err(CommandError::TypeMismatch(format!(
            "BSON field '{command}.{key}' is the wrong type '{}', expected type 'array'",
            type_alias(v)
        ))),
        None => Err(CommandError::Location(
            40414,
            format!("BSON field '{command}.{key}' is missing but a required field"),
        )),
    }
}

fn index_i32(i: usize) -> i32 {
    i32::try_from(i).unwrap_or(i32::MAX)
}
