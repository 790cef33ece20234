//! The `aggregate` command.
//!
//! A leading `$match` stage is offered to the planner so the backend can
//! pre-filter candidates; every stage still runs in process over whatever
//! the scan returns, so pushdown never changes the result set.

use bson::{Bson, Document};

use crate::cursor::parse_batch_size;
use crate::errors::CommandError;
use crate::handler::{
    cursor_reply, namespace, optional_doc, run_query, scan_all, session_from,
};
use crate::query::SortSpec;
use crate::Proxy;

use crate::aggregation::Pipeline;

pub(crate) fn aggregate(proxy: &Proxy, cmd: &Document) -> Result<Document, CommandError> {
    let (db, coll) = namespace(cmd, "aggregate")?;
    let ns = format!("{db}.{coll}");
    let session = session_from(cmd)?;

    let stages = match cmd.get("pipeline") {
        Some(Bson::Array(stages)) => stages.as_slice(),
        Some(other) => {
            return Err(CommandError::TypeMismatch(format!(
                "BSON field 'pipeline' is the wrong type '{}', expected type 'array'",
                crate::document::type_alias(other),
            )));
        }
        None => {
            return Err(CommandError::Location(
                40414,
                "BSON field 'aggregate.pipeline' is missing but a required field".into(),
            ));
        }
    };
    let pipeline = Pipeline::compile(stages)?;

    let batch = match optional_doc(cmd, "cursor")? {
        Some(cursor) => match cursor.get("batchSize") {
            Some(value) => Some(parse_batch_size(value)?),
            None => None,
        },
        None => None,
    };

    // A leading $match doubles as the query for the planner; the stage
    // re-checks every document in process afterwards.
    let docs = match pipeline.leading_match() {
        Some(filter) => run_query(proxy, &ns, filter, &SortSpec::default(), None, 0)?,
        None => scan_all(proxy, &ns)?,
    };
    let mut out = pipeline.execute(docs, &proxy.regexes)?;

    let first_batch = proxy.cursors.first_batch_size(batch);
    let rest = out.split_off(first_batch.min(out.len()));
    let id = if rest.is_empty() {
        0
    } else {
        proxy.cursors.register(&ns, session, rest)
    };
    Ok(cursor_reply("firstBatch", out, id, &ns))
}
