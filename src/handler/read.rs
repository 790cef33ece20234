//! `find`, `count`, and `distinct`.

use bson::{Bson, Document, doc};

use super::{
    cursor_reply, namespace, non_negative, optional_bool, optional_doc, run_query, session_from,
    whole_number,
};
use crate::Proxy;
use crate::compare::{compare_values, values_equal};
use crate::cursor::parse_batch_size;
use crate::document::{FindOpts, Path, find_values, type_alias};
use crate::errors::CommandError;
use crate::query::{Filter, Projection, SortSpec};

pub(crate) fn find(proxy: &Proxy, cmd: &Document) -> Result<Document, CommandError> {
    let (db, coll) = namespace(cmd, "find")?;
    let ns = format!("{db}.{coll}");
    let session = session_from(cmd)?;

    let empty = Document::new();
    let filter_doc = optional_doc(cmd, "filter")?.unwrap_or(&empty);
    let filter = Filter::compile(filter_doc)?;
    let sort = SortSpec::compile(optional_doc(cmd, "sort")?.unwrap_or(&empty))?;
    let projection = Projection::compile(optional_doc(cmd, "projection")?.unwrap_or(&empty))?;

    let skip = match cmd.get("skip") {
        None => 0,
        Some(v) => non_negative("skip", whole_number("skip", v)?)?,
    };
    let mut single_batch = optional_bool(cmd, "singleBatch", false)?;
    let mut limit = None;
    if let Some(v) = cmd.get("limit") {
        let n = whole_number("limit", v)?;
        // A negative limit is a one-batch request for |limit| documents.
        if n < 0 {
            single_batch = true;
        }
        if n != 0 {
            limit = Some(usize::try_from(n.unsigned_abs()).unwrap_or(usize::MAX));
        }
    }
    let batch = match cmd.get("batchSize") {
        None => None,
        Some(v) => Some(parse_batch_size(v)?),
    };

    let docs = run_query(proxy, &ns, &filter, &sort, limit, skip)?;
    let mut projected = Vec::with_capacity(docs.len());
    for d in &docs {
        projected.push(projection.apply(d, filter_doc, &proxy.regexes)?);
    }

    let first_batch = proxy.cursors.first_batch_size(batch);
    let rest = projected.split_off(first_batch.min(projected.len()));
    let id = if single_batch || rest.is_empty() {
        0
    } else {
        proxy.cursors.register(&ns, session, rest)
    };
    Ok(cursor_reply("firstBatch", projected, id, &ns))
}

pub(crate) fn count(proxy: &Proxy, cmd: &Document) -> Result<Document, CommandError> {
    let (db, coll) = namespace(cmd, "count")?;
    let ns = format!("{db}.{coll}");

    let empty = Document::new();
    let filter = Filter::compile(optional_doc(cmd, "query")?.unwrap_or(&empty))?;
    let skip = match cmd.get("skip") {
        None => 0,
        Some(v) => non_negative("skip", whole_number("skip", v)?)?,
    };
    let limit = match cmd.get("limit") {
        None => None,
        Some(v) => {
            let n = whole_number("limit", v)?;
            if n == 0 {
                None
            } else {
                Some(usize::try_from(n.unsigned_abs()).unwrap_or(usize::MAX))
            }
        }
    };

    let docs = run_query(proxy, &ns, &filter, &SortSpec::default(), limit, skip)?;
    let n = i32::try_from(docs.len()).unwrap_or(i32::MAX);
    Ok(doc! {"n": n, "ok": 1.0})
}

pub(crate) fn distinct(proxy: &Proxy, cmd: &Document) -> Result<Document, CommandError> {
    let (db, coll) = namespace(cmd, "distinct")?;
    let ns = format!("{db}.{coll}");

    let key = match cmd.get("key") {
        Some(Bson::String(k)) => k.clone(),
        Some(v) => {
            return Err(CommandError::TypeMismatch(format!(
                "BSON field 'distinct.key' is the wrong type '{}', expected type 'string'",
                type_alias(v)
            )));
        }
        None => {
            return Err(CommandError::Location(
                40414,
                "BSON field 'distinct.key' is missing but a required field".into(),
            ));
        }
    };
    if key.is_empty() {
        return Err(CommandError::EmptyName(
            "FieldPath cannot be constructed with empty string".into(),
        ));
    }
    let path = Path::parse(&key)?;

    let empty = Document::new();
    let filter = Filter::compile(optional_doc(cmd, "query")?.unwrap_or(&empty))?;
    let docs = run_query(proxy, &ns, &filter, &SortSpec::default(), None, 0)?;

    // Arrays contribute their elements, not themselves.
    let mut values: Vec<Bson> = Vec::new();
    for d in &docs {
        for candidate in find_values(d, &path, FindOpts::FILTER) {
            match candidate {
                Bson::Array(elems) => {
                    for elem in elems {
                        push_distinct(&mut values, elem);
                    }
                }
                other => push_distinct(&mut values, other),
            }
        }
    }
    values.sort_by(compare_values);
    Ok(doc! {"values": values, "ok": 1.0})
}

fn push_distinct(values: &mut Vec<Bson>, v: Bson) {
    if !values.iter().any(|existing| values_equal(existing, &v)) {
        values.push(v);
    }
}
