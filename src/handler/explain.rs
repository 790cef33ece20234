//! The `explain` command.
//!
//! Plans the wrapped command against the backend's capabilities and reports
//! the pushdown decision without touching any data.

use bson::{Bson, Document, doc};

use crate::Proxy;
use crate::aggregation::Pipeline;
use crate::document::type_alias;
use crate::errors::CommandError;
use crate::handler::{
    masked_caps, namespace, non_negative, optional_doc, required_db, whole_number,
};
use crate::pushdown::QueryPlan;
use crate::query::{Filter, SortSpec};

use super::admin::SERVER_VERSION;

pub(crate) fn explain(proxy: &Proxy, cmd: &Document) -> Result<Document, CommandError> {
    let db = required_db(cmd)?;
    let inner = match cmd.get("explain") {
        Some(Bson::Document(d)) => d,
        Some(v) => {
            return Err(CommandError::BadValue(format!("has invalid type {}", type_alias(v))));
        }
        None => {
            return Err(CommandError::BadValue("required parameter \"explain\" is missing".into()));
        }
    };
    // verbosity is accepted and ignored; the report is the same either way.
    let name = inner.keys().next().map(String::as_str).unwrap_or("");

    let mut inner_cmd = inner.clone();
    inner_cmd.insert("$db", db);

    let empty = Document::new();
    let (ns, filter, sort, limit, skip) = match name {
        "find" => {
            let (db, coll) = namespace(&inner_cmd, "find")?;
            let filter = Filter::compile(optional_doc(&inner_cmd, "filter")?.unwrap_or(&empty))?;
            let sort = SortSpec::compile(optional_doc(&inner_cmd, "sort")?.unwrap_or(&empty))?;
            let skip = match inner_cmd.get("skip") {
                None => 0,
                Some(v) => non_negative("skip", whole_number("skip", v)?)?,
            };
            let limit = match inner_cmd.get("limit") {
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
            (format!("{db}.{coll}"), filter, sort, limit, skip)
        }
        "count" => {
            let (db, coll) = namespace(&inner_cmd, "count")?;
            let filter = Filter::compile(optional_doc(&inner_cmd, "query")?.unwrap_or(&empty))?;
            (format!("{db}.{coll}"), filter, SortSpec::default(), None, 0)
        }
        "aggregate" => {
            let (db, coll) = namespace(&inner_cmd, "aggregate")?;
            let stages = match inner_cmd.get("pipeline") {
                Some(Bson::Array(stages)) => stages.as_slice(),
                _ => &[],
            };
            let pipeline = Pipeline::compile(stages)?;
            let filter = pipeline.leading_match().cloned().unwrap_or(Filter::Always);
            (format!("{db}.{coll}"), filter, SortSpec::default(), None, 0)
        }
        other => {
            return Err(CommandError::NotImplemented(format!(
                "explain for {other} is not supported"
            )));
        }
    };

    let caps = masked_caps(proxy, &ns);
    let plan = QueryPlan::build(&ns, &filter, &sort, limit, skip, &caps);
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".into());
    Ok(doc! {
        "queryPlanner": {
            "namespace": ns,
            "pushdown": plan.pushed.to_document(),
        },
        "explainVersion": "1",
        "command": inner_cmd,
        "serverInfo": {
            "host": host,
            "version": SERVER_VERSION,
            "bisongateVersion": env!("CARGO_PKG_VERSION"),
        },
        "pushdown": plan.pushed.filter,
        "ok": 1.0,
    })
}

#[cfg(test)]
mod tests {
    use bson::doc;

    use crate::Proxy;

    #[test]
    fn explain_reports_pushdown_for_eligible_finds() {
        let proxy = Proxy::new();
        let reply = proxy.handle_command(&doc! {
            "explain": { "find": "users", "filter": { "name": "ada" } },
            "verbosity": "queryPlanner",
            "$db": "test",
        });
        assert_eq!(reply.get_f64("ok").map_err(|e| e.to_string()), Ok(1.0));
        assert!(reply.get_bool("pushdown").unwrap());

        let planner = reply.get_document("queryPlanner").unwrap();
        assert_eq!(planner.get_str("namespace").map_err(|e| e.to_string()), Ok("test.users"));
        let pushed = planner.get_document("pushdown").unwrap();
        assert!(pushed.get_bool("filter").unwrap());
        assert!(!pushed.get_bool("sort").unwrap());

        assert_eq!(reply.get_str("explainVersion").map_err(|e| e.to_string()), Ok("1"));
        let command = reply.get_document("command").unwrap();
        assert_eq!(command.get_str("find").map_err(|e| e.to_string()), Ok("users"));
        assert_eq!(command.get_str("$db").map_err(|e| e.to_string()), Ok("test"));
        let info = reply.get_document("serverInfo").unwrap();
        assert_eq!(info.get_str("version").map_err(|e| e.to_string()), Ok("7.0.42"));
    }

    #[test]
    fn dotted_paths_and_regexes_stay_in_process() {
        let proxy = Proxy::new();
        for filter in [doc! {"a.b": 1}, doc! {"name": {"$regex": "^a"}}] {
            let reply = proxy.handle_command(&doc! {
                "explain": { "find": "users", "filter": filter },
                "$db": "test",
            });
            assert!(!reply.get_bool("pushdown").unwrap());
        }
    }

    #[test]
    fn explain_does_not_execute_the_command() {
        let proxy = Proxy::new();
        proxy.handle_command(&doc! {
            "insert": "users",
            "documents": [{"_id": 1}, {"_id": 2}],
            "$db": "test",
        });
        let reply = proxy.handle_command(&doc! {
            "explain": { "find": "users", "batchSize": 1 },
            "$db": "test",
        });
        assert_eq!(reply.get_f64("ok").map_err(|e| e.to_string()), Ok(1.0));
        assert!(reply.get_document("queryPlanner").unwrap().get("winningPlan").is_none());
        // No cursor may be left behind by a plan-only command.
        assert_eq!(proxy.cursors.open_cursors(), 0);
    }

    #[test]
    fn explain_covers_count_and_aggregate() {
        let proxy = Proxy::new();
        let reply = proxy.handle_command(&doc! {
            "explain": { "count": "users", "query": { "age": 30 } },
            "$db": "test",
        });
        assert!(reply.get_bool("pushdown").unwrap());

        let reply = proxy.handle_command(&doc! {
            "explain": {
                "aggregate": "users",
                "pipeline": [ { "$match": { "age": 30 } }, { "$count": "n" } ],
            },
            "$db": "test",
        });
        assert!(reply.get_bool("pushdown").unwrap());

        let reply = proxy.handle_command(&doc! {
            "explain": { "aggregate": "users", "pipeline": [ { "$count": "n" } ] },
            "$db": "test",
        });
        assert!(!reply.get_bool("pushdown").unwrap());
    }

    #[test]
    fn unsupported_explain_targets_are_rejected() {
        let proxy = Proxy::new();
        let reply = proxy.handle_command(&doc! {
            "explain": { "delete": "users" },
            "$db": "test",
        });
        assert_eq!(reply.get_i32("code").map_err(|e| e.to_string()), Ok(238));
        assert_eq!(reply.get_str("errmsg").map_err(|e| e.to_string()), Ok("explain for delete is not supported"));

        let reply = proxy.handle_command(&doc! {"explain": "users", "$db": "test"});
        assert_eq!(reply.get_i32("code").map_err(|e| e.to_string()), Ok(2));
        assert_eq!(reply.get_str("errmsg").map_err(|e| e.to_string()), Ok("has invalid type string"));
    }
}
