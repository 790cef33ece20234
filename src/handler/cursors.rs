//! `getMore`, `killCursors`, and `endSessions`.

use bson::{Bson, Document, doc};

use super::{cursor_reply, namespace, required_db, session_from};
use crate::Proxy;
use crate::cursor::parse_batch_size;
use crate::document::type_alias;
use crate::errors::CommandError;
use crate::session::SessionId;

pub(crate) fn get_more(proxy: &Proxy, cmd: &Document) -> Result<Document, CommandError> {
    let db = required_db(cmd)?;
    let session = session_from(cmd)?;

    let coll = match cmd.get("collection") {
        Some(Bson::String(c)) => c.clone(),
        Some(v) => {
            return Err(CommandError::TypeMismatch(format!(
                "BSON field 'getMore.collection' is the wrong type '{}', expected type 'string'",
                type_alias(v)
            )));
        }
        None => {
            return Err(CommandError::Location(
                40414,
                "BSON field 'getMore.collection' is missing but a required field".into(),
            ));
        }
    };
    if coll.is_empty() {
        return Err(CommandError::InvalidNamespace("Collection names cannot be empty".into()));
    }

    // Cursor ids are int64 on the wire; nothing else is accepted.
    let Some(Bson::Int64(id)) = cmd.get("getMore") else {
        return Err(CommandError::TypeMismatch(
            "BSON field 'getMore.getMore' is the wrong type, expected type 'long'".into(),
        ));
    };

    let batch = match cmd.get("batchSize") {
        None => None,
        Some(v) => Some(parse_batch_size(v)?),
    };
    let batch = proxy.cursors.more_batch_size(batch);

    let ns = format!("{db}.{coll}");
    let out = proxy.cursors.get_more(*id, &ns, session.as_ref(), batch)?;
    Ok(cursor_reply("nextBatch", out.docs, out.id, &ns))
}

pub(crate) fn kill_cursors(proxy: &Proxy, cmd: &Document) -> Result<Document, CommandError> {
    let (_db, _coll) = namespace(cmd, "killCursors")?;

    let ids = match cmd.get("cursors") {
        Some(Bson::Array(ids)) => ids,
        Some(v) => {
            return Err(CommandError::TypeMismatch(format!(
                "BSON field 'killCursors.cursors' is the wrong type '{}', expected type 'array'",
                type_alias(v)
            )));
        }
        None => {
            return Err(CommandError::Location(
                40414,
                "BSON field 'killCursors.cursors' is missing but a required field".into(),
            ));
        }
    };

    // Validate the whole list before touching any cursor.
    let mut wanted = Vec::with_capacity(ids.len());
    for (i, id) in ids.iter().enumerate() {
        match id {
            Bson::Int64(id) => wanted.push(*id),
            other => {
                return Err(CommandError::TypeMismatch(format!(
                    "BSON field 'killCursors.cursors.{i}' is the wrong type '{}', \
                     expected type 'long'",
                    type_alias(other)
                )));
            }
        }
    }

    let mut killed = Vec::new();
    let mut not_found = Vec::new();
    for id in wanted {
        if proxy.cursors.kill(id) {
            killed.push(Bson::Int64(id));
        } else {
            not_found.push(Bson::Int64(id));
        }
    }
    Ok(doc! {
        "cursorsKilled": killed,
        "cursorsNotFound": not_found,
        "cursorsAlive": [],
        "cursorsUnknown": [],
        "ok": 1.0,
    })
}

pub(crate) fn end_sessions(proxy: &Proxy, cmd: &Document) -> Result<Document, CommandError> {
    let sessions = match cmd.get("endSessions") {
        Some(Bson::Array(sessions)) => sessions,
        Some(v) => {
            return Err(CommandError::TypeMismatch(format!(
                "BSON field 'endSessions' is the wrong type '{}', expected type 'array'",
                type_alias(v)
            )));
        }
        None => {
            return Err(CommandError::Location(
                40414,
                "BSON field 'endSessions' is missing but a required field".into(),
            ));
        }
    };

    for (i, entry) in sessions.iter().enumerate() {
        let Bson::Document(lsid) = entry else {
            return Err(CommandError::TypeMismatch(format!(
                "BSON field 'endSessions.{i}' is the wrong type '{}', expected type 'object'",
                type_alias(entry)
            )));
        };
        let session = SessionId::from_lsid(lsid)?;
        let swept = proxy.cursors.kill_session(&session);
        if swept > 0 {
            crate::diag!("session {session} ended, {swept} cursors closed");
        }
    }
    Ok(doc! {"ok": 1.0})
}
