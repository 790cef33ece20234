//! Splits a query into a natively-executed part and an in-process residual.
//!
//! Pushdown is candidate pre-filtering: the backend narrows the row stream
//! with whatever conditions translate exactly, and the residual filter still
//! checks every surviving row. Correctness never depends on what was pushed.

use bson::{Bson, Document, doc};

use crate::backend::{BackendCapabilities, NativeCondition, NativeOp, NativeQuery, NativeSort};
use crate::compare::SortOrder;
use crate::document::Path;
use crate::query::{FieldCheck, FieldOp, Filter, SortSpec};

// 2^53; larger doubles lose integer precision and stop agreeing with the
// canonical cross-width number comparison.
const MAX_SAFE_DOUBLE: f64 = 9_007_199_254_740_992.0;

/// The planner's split of one logical query.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub native: NativeQuery,
    /// Full in-process filter. `None` only when the filter matches
    /// everything.
    pub residual: Option<Filter>,
    pub pushed: PushdownReport,
}

/// What was handed to the backend, as reported by `explain`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushdownReport {
    pub filter: bool,
    pub sort: bool,
    pub limit: bool,
}

impl PushdownReport {
    #[must_use]
    pub fn to_document(self) -> Document {
        doc! { "filter": self.filter, "sort": self.sort, "limit": self.limit }
    }
}

impl QueryPlan {
    /// Plans one query against a backend's advertised capabilities. Callers
    /// mask capabilities with the configured toggles before planning.
    #[must_use]
    pub fn build(
        ns: &str,
        filter: &Filter,
        sort: &SortSpec,
        limit: Option<usize>,
        skip: usize,
        caps: &BackendCapabilities,
    ) -> Self {
        let mut conditions = Vec::new();
        let filter_fully = if caps.filter_conditions {
            translate_filter(filter, &mut conditions)
        } else {
            matches!(filter, Filter::Always)
        };

        let mut native_sort = None;
        let mut sort_pushed = false;
        if sort.is_empty() {
            if caps.capped {
                // Unsorted reads of a capped collection replay insertion
                // order, independent of the sort toggle.
                native_sort = Some(NativeSort::RecordId);
            }
        } else if caps.native_sort {
            let mut keys = sort.keys();
            if let (Some((path, order)), None) = (keys.next(), keys.next())
                && path.is_single()
            {
                native_sort = Some(NativeSort::Field {
                    name: path.head().to_owned(),
                    descending: order == SortOrder::Descending,
                });
                sort_pushed = true;
            }
        }

        // A native limit truncates the stream before the residual runs, so
        // it is only sound once the backend has seen the exact filter and
        // order, and nothing is skipped afterwards.
        let limit_pushed = caps.native_limit
            && limit.is_some()
            && skip == 0
            && filter_fully
            && (sort.is_empty() || sort_pushed);

        let native = NativeQuery {
            ns: ns.to_owned(),
            conditions,
            sort: native_sort,
            limit: if limit_pushed { limit } else { None },
        };
        let pushed = PushdownReport {
            filter: !native.conditions.is_empty(),
            sort: sort_pushed,
            limit: limit_pushed,
        };
        let residual = if matches!(filter, Filter::Always) {
            None
        } else {
            Some(filter.clone())
        };

        let rendered =
            serde_json::to_string(&native).unwrap_or_else(|_| format!("{native:?}"));
        crate::diag!(
            "pushdown {}: filter={} sort={} limit={} native={rendered}",
            native.ns,
            pushed.filter,
            pushed.sort,
            pushed.limit
        );
        Self { native, residual, pushed }
    }
}

/// Translates the root of a filter tree. The root conjunction pushes any
/// eligible subset of its clauses; everything below it is all or nothing.
/// Returns whether the whole filter was reproduced natively.
fn translate_filter(filter: &Filter, out: &mut Vec<NativeCondition>) -> bool {
    match filter {
        Filter::And(clauses) => {
            let mut fully = true;
            for clause in clauses {
                fully &= translate_clause(clause, out);
            }
            fully
        }
        other => translate_clause(other, out),
    }
}

fn translate_clause(clause: &Filter, out: &mut Vec<NativeCondition>) -> bool {
    match clause {
        Filter::Always => true,
        Filter::Field { path, check } => translate_field(path, check, out),
        // A nested conjunction goes over whole: one leaf the backend cannot
        // take keeps the entire group in process.
        Filter::And(clauses) => {
            let mut staged = Vec::new();
            if clauses.iter().all(|c| translate_clause(c, &mut staged)) {
                out.append(&mut staged);
                true
            } else {
                false
            }
        }
        // Disjunctions, $expr, and unsatisfiable filters never translate.
        _ => false,
    }
}

fn translate_field(path: &Path, check: &FieldCheck, out: &mut Vec<NativeCondition>) -> bool {
    if !path.is_single() {
        return false;
    }
    let field = path.head();
    match check {
        FieldCheck::Equals(operand) => push_condition(out, field, NativeOp::Eq, operand),
        FieldCheck::Ops(ops) => {
            let mut fully = true;
            for op in ops {
                fully &= match op {
                    FieldOp::Eq(operand) => push_condition(out, field, NativeOp::Eq, operand),
                    FieldOp::Ne(operand) => push_condition(out, field, NativeOp::Ne, operand),
                    _ => false,
                };
            }
            fully
        }
    }
}

fn push_condition(
    out: &mut Vec<NativeCondition>,
    field: &str,
    op: NativeOp,
    operand: &Bson,
) -> bool {
    if !native_comparable(operand) {
        return false;
    }
    out.push(NativeCondition { field: field.to_owned(), op, operand: operand.clone() });
    true
}

/// Operand types whose native comparison agrees with the canonical one.
/// Containers, Null, regexes, and out-of-range doubles stay in process.
fn native_comparable(operand: &Bson) -> bool {
    match operand {
        Bson::Double(d) => d.is_finite() && d.abs() <= MAX_SAFE_DOUBLE,
        Bson::String(_)
        | Bson::ObjectId(_)
        | Bson::Boolean(_)
        | Bson::DateTime(_)
        | Bson::Int32(_)
        | Bson::Int64(_) => true,
        _ => false,
    }
}
