//! Filter evaluation over candidate values.
//!
//! A path resolves to zero or more candidates (zero meaning the field is
//! missing). A document matches a field condition when any single candidate
//! satisfies the whole condition. Operators other than `$exists`, `$not`,
//! `$elemMatch`, and `$type` see a missing field as null.

use std::cmp::Ordering;

use bson::{Bson, Document};

use super::types::{
    ElemMatchCheck, FieldCheck, FieldOp, Filter, InMember, NotCheck, RegexCache, RegexMatch,
    TypeCheck,
};
use crate::compare::{compare_values, same_type_class, values_equal};
use crate::document::{FindOpts, Path, find_values};

static NULL: Bson = Bson::Null;

impl Filter {
    /// True when `doc` satisfies the filter.
    #[must_use]
    pub fn matches(&self, doc: &Document, regexes: &RegexCache) -> bool {
        match self {
            Self::Always => true,
            Self::Never => false,
            Self::And(subs) => subs.iter().all(|f| f.matches(doc, regexes)),
            Self::Or(subs) => subs.iter().any(|f| f.matches(doc, regexes)),
            Self::Nor(subs) => !subs.iter().any(|f| f.matches(doc, regexes)),
            Self::Field { path, check } => field_matches(doc, path, check, regexes),
            Self::Expr(expr) => expr.evaluate(doc).as_ref().is_some_and(value_truthy),
        }
    }
}

fn value_truthy(v: &Bson) -> bool {
    match v {
        Bson::Boolean(b) => *b,
        Bson::Int32(n) => *n != 0,
        Bson::Int64(n) => *n != 0,
        Bson::Double(d) => *d != 0.0,
        Bson::Null | Bson::Undefined => false,
        _ => true,
    }
}

fn field_matches(doc: &Document, path: &Path, check: &FieldCheck, regexes: &RegexCache) -> bool {
    let candidates = candidates_for(doc, path);
    if candidates.is_empty() {
        return check_matches_candidate(check, None, regexes);
    }
    candidates.iter().any(|c| check_matches_candidate(check, Some(c), regexes))
}

/// A plain key resolves by direct lookup; a dotted path fans out over
/// arrays of documents.
fn candidates_for(doc: &Document, path: &Path) -> Vec<Bson> {
    if path.is_single() {
        return doc.get(path.head()).cloned().into_iter().collect();
    }
    find_values(doc, path, FindOpts::FILTER)
}

pub(super) fn check_matches_candidate(
    check: &FieldCheck,
    candidate: Option<&Bson>,
    regexes: &RegexCache,
) -> bool {
    match check {
        FieldCheck::Equals(operand) => match candidate {
            Some(v) => eq_matches(v, operand),
            None => matches!(operand, Bson::Null),
        },
        FieldCheck::Ops(ops) => ops.iter().all(|op| op.matches(candidate, regexes)),
    }
}

/// Equality with the array-element scan, except a document operand must
/// equal the stored value itself.
fn eq_matches(value: &Bson, operand: &Bson) -> bool {
    if matches!(operand, Bson::Document(_)) {
        return values_equal(value, operand);
    }
    if values_equal(value, operand) {
        return true;
    }
    match value {
        Bson::Array(elems) => elems.iter().any(|e| values_equal(e, operand)),
        _ => false,
    }
}

impl FieldOp {
    fn matches(&self, candidate: Option<&Bson>, regexes: &RegexCache) -> bool {
        match self {
            Self::Exists(wanted) => candidate.is_some() == *wanted,
            Self::Not(inner) => match inner.as_ref() {
                NotCheck::Regex(rm) => {
                    !candidate.is_some_and(|v| regex_matches(v, rm, regexes))
                }
                NotCheck::Check(check) => !check_matches_candidate(check, candidate, regexes),
            },
            Self::ElemMatch(check) => {
                let Some(Bson::Array(elems)) = candidate else {
                    return false;
                };
                match check {
                    ElemMatchCheck::Ops(ops) => elems
                        .iter()
                        .any(|e| ops.iter().all(|op| op.matches(Some(e), regexes))),
                    ElemMatchCheck::Filter(f) => elems
                        .iter()
                        .any(|e| matches!(e, Bson::Document(d) if f.matches(d, regexes))),
                }
            }
            Self::Type(checks) => match candidate {
                Some(v) => type_matches(v, checks),
                None => false,
            },
            _ => self.matches_value(candidate.unwrap_or(&NULL), regexes),
        }
    }

    fn matches_value(&self, value: &Bson, regexes: &RegexCache) -> bool {
        match self {
            Self::Eq(operand) => eq_matches(value, operand),
            Self::Ne(operand) => !eq_matches(value, operand),
            Self::Gt(operand) => order_matches(value, operand, &[Ordering::Greater], true),
            Self::Gte(operand) => {
                order_matches(value, operand, &[Ordering::Greater, Ordering::Equal], true)
            }
            Self::Lt(operand) => order_matches(value, operand, &[Ordering::Less], false),
            Self::Lte(operand) => {
                order_matches(value, operand, &[Ordering::Less, Ordering::Equal], false)
            }
            Self::In(members) => in_matches(value, members, regexes),
            Self::Nin(members) => !in_matches(value, members, regexes),
            Self::Size(n) => matches!(value, Bson::Array(a) if a.len() as i64 == *n),
            Self::All(required) => all_matches(value, required),
            Self::Mod { divisor, remainder } => mod_matches(value, *divisor, *remainder),
            Self::Regex(rm) => regex_matches(value, rm, regexes),
            Self::Never => false,
            // Candidate-level operators are handled in `matches`.
            Self::Exists(_) | Self::Not(_) | Self::ElemMatch(_) | Self::Type(_) => false,
        }
    }
}

/// Ordered comparison in operator context. A stored array compared against
/// a non-array operand is represented by its largest (`$gt`/`$gte`) or
/// smallest (`$lt`/`$lte`) element of the operand's type class; no element
/// of that class means no match.
fn order_matches(value: &Bson, operand: &Bson, accept: &[Ordering], largest: bool) -> bool {
    let repr = match (value, operand) {
        (Bson::Array(_), Bson::Array(_)) => value,
        (Bson::Array(elems), _) => match class_representative(elems, operand, largest) {
            Some(e) => e,
            None => return false,
        },
        _ => value,
    };
    if !same_type_class(repr, operand) {
        return false;
    }
    accept.contains(&compare_values(repr, operand))
}

fn class_representative<'a>(elems: &'a [Bson], operand: &Bson, largest: bool) -> Option<&'a Bson> {
    let mut best: Option<&Bson> = None;
    for e in elems {
        if !same_type_class(e, operand) {
            continue;
        }
        best = Some(match best {
            None => e,
            Some(b) => {
                let ord = compare_values(e, b);
                let improves = if largest {
                    ord == Ordering::Greater
                } else {
                    ord == Ordering::Less
                };
                if improves { e } else { b }
            }
        });
    }
    best
}

fn in_matches(value: &Bson, members: &[InMember], regexes: &RegexCache) -> bool {
    members.iter().any(|m| match m {
        InMember::Value(v) => eq_matches(value, v),
        InMember::Regex(rm) => regex_matches(value, rm, regexes),
    })
}

fn all_matches(value: &Bson, required: &[Bson]) -> bool {
    if required.is_empty() {
        return false;
    }
    match value {
        Bson::Document(_) => false,
        Bson::Array(elems) => {
            required.iter().all(|r| elems.iter().any(|e| values_equal(e, r)))
        }
        scalar => required.iter().all(|r| values_equal(scalar, r)),
    }
}

fn mod_matches(value: &Bson, divisor: i64, remainder: i64) -> bool {
    let field = match value {
        Bson::Int32(n) => i64::from(*n),
        Bson::Int64(n) => *n,
        Bson::Double(d) => {
            if d.is_nan() || d.is_infinite() {
                return false;
            }
            let t = d.trunc();
            if t >= super::filter::I64_EDGE || t < -super::filter::I64_EDGE {
                return false;
            }
            #[allow(clippy::cast_possible_truncation)]
            {
                t as i64
            }
        }
        _ => return false,
    };
    field.checked_rem(divisor).unwrap_or(0) == remainder
}

/// Strings match the compiled pattern, string array elements likewise, and
/// a stored regex matches by exact pattern and options.
fn regex_matches(value: &Bson, rm: &RegexMatch, regexes: &RegexCache) -> bool {
    match value {
        Bson::String(s) => regex_str_match(s, rm, regexes),
        Bson::Array(elems) => elems.iter().any(|e| match e {
            Bson::String(s) => regex_str_match(s, rm, regexes),
            _ => false,
        }),
        Bson::RegularExpression(stored) => {
            stored.pattern == rm.pattern && stored.options == rm.options
        }
        _ => false,
    }
}

fn regex_str_match(s: &str, rm: &RegexMatch, regexes: &RegexCache) -> bool {
    regexes.get_or_compile(rm).is_some_and(|re| re.is_match(s))
}

fn type_matches(value: &Bson, checks: &[TypeCheck]) -> bool {
    checks.iter().any(|c| match value {
        Bson::Array(elems) => {
            c.matches(value)
                || elems.iter().any(|e| !matches!(e, Bson::Array(_)) && c.matches(e))
        }
        v => c.matches(v),
    })
}
