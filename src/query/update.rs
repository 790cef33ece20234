//! Update document compilation and application.
//!
//! An update document is either a full replacement (no `$`-prefixed keys) or
//! a set of operator documents. Compilation validates operator names,
//! operand shapes, and path conflicts up front so that application either
//! fully succeeds or leaves the document untouched.

use std::cmp::Ordering;
use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};

use bson::{Bson, Document};

use crate::compare::{compare_values, same_value_for_update, values_equal};
use crate::document::{Path, format_value, get_path, remove_path, set_path, type_alias};
use crate::errors::CommandError;

use super::eval::check_matches_candidate;
use super::filter::compile_field_check;
use super::types::{FieldCheck, RegexCache};

/// A compiled update document.
#[derive(Debug, Clone)]
pub struct UpdateSpec {
    mode: UpdateMode,
}

#[derive(Debug, Clone)]
enum UpdateMode {
    Replacement(Document),
    Operators(Vec<UpdateOp>),
}

/// One operator document, applied in the order the update document listed
/// them. The nested lists hold per-field applications in their operator's
/// application order.
#[derive(Debug, Clone)]
enum UpdateOp {
    CurrentDate(Vec<(Path, CurrentDateKind)>),
    Inc(Vec<(Path, Bson)>),
    Min(Vec<(Path, Bson)>),
    Max(Vec<(Path, Bson)>),
    Mul(Vec<(Path, Bson)>),
    Rename(Vec<(Path, Path)>),
    Set(Vec<(Path, Bson)>),
    SetOnInsert(Vec<(Path, Bson)>),
    Unset(Vec<Path>),
    Pop(Vec<(Path, PopEnd)>),
    Push(Vec<(Path, Vec<Bson>)>),
    AddToSet(Vec<(Path, Bson)>),
    PullAll(Vec<(Path, Vec<Bson>)>),
    Pull(Vec<(Path, FieldCheck)>),
}

#[derive(Debug, Clone, Copy)]
enum CurrentDateKind {
    Date,
    Timestamp,
}

#[derive(Debug, Clone, Copy)]
enum PopEnd {
    Front,
    Back,
}

/// Cross-operator conflict detection walks operators in this fixed order,
/// so the reported key is deterministic regardless of update document order.
const CONFLICT_CHECK_ORDER: &[&str] = &[
    "$addToSet",
    "$currentDate",
    "$inc",
    "$min",
    "$max",
    "$mul",
    "$pop",
    "$pull",
    "$pullAll",
    "$push",
    "$set",
    "$setOnInsert",
    "$unset",
];

impl UpdateSpec {
    /// Compiles and validates an update document.
    ///
    /// # Errors
    /// Unknown operators, non-document operands, malformed operand values,
    /// and conflicting update paths are all rejected here, before any
    /// document is touched.
    pub fn compile(update: &Document) -> Result<Self, CommandError> {
        if !update.keys().any(|k| k.starts_with('$')) {
            return Ok(Self { mode: UpdateMode::Replacement(update.clone()) });
        }
        for key in update.keys() {
            if !CONFLICT_CHECK_ORDER.contains(&key.as_str()) && key != "$rename" {
                return Err(CommandError::FailedToParse(format!(
                    "Unknown modifier: {key}. Expected a valid update modifier or \
                     pipeline-style update specified as an array"
                )));
            }
        }
        let mut operators = Vec::with_capacity(update.len());
        for (op, operand) in update {
            let Bson::Document(operand) = operand else {
                return Err(CommandError::FailedToParse(format!(
                    "Modifiers operate on fields but we found type {} instead. For example: \
                     {{$mod: {{<field>: ...}}}} not {{{op}: {}}}",
                    type_alias(operand),
                    format_value(operand)
                )));
            };
            operators.push((op.as_str(), operand));
        }
        validate_operator_paths(&operators)?;

        let mut ops = Vec::with_capacity(operators.len());
        for (op, operand) in operators {
            ops.push(match op {
                "$currentDate" => UpdateOp::CurrentDate(compile_current_date(operand)?),
                "$inc" => UpdateOp::Inc(compile_numeric(operand, "increment")?),
                "$min" => UpdateOp::Min(compile_sorted(operand)?),
                "$max" => UpdateOp::Max(compile_sorted(operand)?),
                "$mul" => UpdateOp::Mul(compile_numeric(operand, "multiply")?),
                "$rename" => UpdateOp::Rename(compile_rename(operand)?),
                "$set" => UpdateOp::Set(compile_sorted(operand)?),
                "$setOnInsert" => UpdateOp::SetOnInsert(compile_sorted(operand)?),
                "$unset" => UpdateOp::Unset(compile_unset(operand)?),
                "$pop" => UpdateOp::Pop(compile_pop(operand)?),
                "$push" => UpdateOp::Push(compile_push(operand)?),
                "$addToSet" => UpdateOp::AddToSet(compile_paths(operand)?),
                "$pullAll" => UpdateOp::PullAll(compile_pull_all(operand)?),
                "$pull" => UpdateOp::Pull(compile_pull(operand)?),
                other => {
                    return Err(CommandError::NotImplemented(format!(
                        "unhandled update operation \"{other}\""
                    )));
                }
            });
        }
        Ok(Self { mode: UpdateMode::Operators(ops) })
    }

    /// Applies the update to `doc`, returning the updated document and
    /// whether anything changed. `$setOnInsert` operators only run when
    /// `upsert` is set; `_id` must come out of the update unchanged.
    ///
    /// # Errors
    /// Type conflicts against stored values, integer overflow, blocked path
    /// traversal, and `_id` mutation. The input document is never partially
    /// updated.
    pub fn apply(
        &self,
        doc: &Document,
        upsert: bool,
        regexes: &RegexCache,
    ) -> Result<(Document, bool), CommandError> {
        let mut out = doc.clone();
        let mut changed = false;
        match &self.mode {
            UpdateMode::Replacement(replacement) => {
                changed = replace_document(&mut out, replacement);
            }
            UpdateMode::Operators(ops) => {
                for op in ops {
                    changed |= apply_op(&mut out, op, upsert, regexes)?;
                }
            }
        }
        check_id_unchanged(doc, &out)?;
        Ok((out, changed))
    }
}

fn validate_operator_paths(operators: &[(&str, &Document)]) -> Result<(), CommandError> {
    let mut visited: Vec<Vec<String>> = Vec::new();
    for target in CONFLICT_CHECK_ORDER {
        let Some((_, operand)) = operators.iter().find(|(op, _)| op == target) else {
            continue;
        };
        for key in operand.keys() {
            let segs = parse_update_path(key)?.segments().to_vec();
            if visited.iter().any(|seen| seen.starts_with(&segs) || segs.starts_with(seen)) {
                return Err(CommandError::ConflictingUpdateOperators(format!(
                    "Updating the path '{key}' would create a conflict at '{key}'"
                )));
            }
            visited.push(segs);
        }
    }
    Ok(())
}

fn parse_update_path(key: &str) -> Result<Path, CommandError> {
    Path::parse(key).map_err(|_| {
        CommandError::EmptyName(format!(
            "The update path '{key}' contains an empty field name, which is not allowed."
        ))
    })
}

/// `$set`, `$setOnInsert`, `$min`, and `$max` apply their fields in sorted
/// key order, not update document order.
fn compile_sorted(operand: &Document) -> Result<Vec<(Path, Bson)>, CommandError> {
    let mut entries: Vec<(&String, &Bson)> = operand.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    entries.into_iter().map(|(k, v)| Ok((parse_update_path(k)?, v.clone()))).collect()
}

fn compile_paths(operand: &Document) -> Result<Vec<(Path, Bson)>, CommandError> {
    operand.iter().map(|(k, v)| Ok((parse_update_path(k)?, v.clone()))).collect()
}

fn compile_unset(operand: &Document) -> Result<Vec<Path>, CommandError> {
    operand.keys().map(|k| parse_update_path(k)).collect()
}

fn compile_numeric(operand: &Document, verb: &str) -> Result<Vec<(Path, Bson)>, CommandError> {
    operand
        .iter()
        .map(|(k, v)| {
            if !matches!(v, Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_)) {
                return Err(CommandError::TypeMismatch(format!(
                    "Cannot {verb} with non-numeric argument: {{{k}: {}}}",
                    format_value(v)
                )));
            }
            Ok((parse_update_path(k)?, v.clone()))
        })
        .collect()
}

fn compile_current_date(operand: &Document) -> Result<Vec<(Path, CurrentDateKind)>, CommandError> {
    let mut entries: Vec<(&String, &Bson)> = operand.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    entries
        .into_iter()
        .map(|(k, v)| {
            let kind = match v {
                Bson::Boolean(_) => CurrentDateKind::Date,
                Bson::Document(spec) => current_date_kind(spec)?,
                other => {
                    return Err(CommandError::BadValue(format!(
                        "{} is not valid type for $currentDate. Please use a boolean ('true') \
                         or a $type expression ({{$type: 'timestamp/date'}}).",
                        type_alias(other)
                    )));
                }
            };
            Ok((parse_update_path(k)?, kind))
        })
        .collect()
}

fn current_date_kind(spec: &Document) -> Result<CurrentDateKind, CommandError> {
    let mut kind = CurrentDateKind::Date;
    for (k, v) in spec {
        if k != "$type" {
            return Err(CommandError::BadValue(format!("Unrecognized $currentDate option: {k}")));
        }
        kind = match v.as_str() {
            Some("date") => CurrentDateKind::Date,
            Some("timestamp") => CurrentDateKind::Timestamp,
            _ => {
                return Err(CommandError::BadValue(
                    "The '$type' string field is required to be 'date' or 'timestamp': \
                     {$currentDate: {field : {$type: 'date'}}}"
                        .into(),
                ));
            }
        };
    }
    Ok(kind)
}

fn compile_rename(operand: &Document) -> Result<Vec<(Path, Path)>, CommandError> {
    let mut seen: Vec<&str> = Vec::new();
    for (k, v) in operand {
        let Bson::String(target) = v else {
            return Err(CommandError::BadValue(format!(
                "The 'to' field for $rename must be a string: {k}: {}",
                format_value(v)
            )));
        };
        if k == target {
            return Err(CommandError::BadValue(format!(
                "The source and target field for $rename must differ: {k}: \"{target}\""
            )));
        }
        for reused in [k.as_str(), target.as_str()] {
            if seen.contains(&reused) {
                return Err(CommandError::ConflictingUpdateOperators(format!(
                    "Updating the path '{reused}' would create a conflict at '{reused}'"
                )));
            }
            seen.push(reused);
        }
    }
    let mut entries: Vec<(&String, &Bson)> = operand.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    entries
        .into_iter()
        .map(|(k, v)| {
            let target = v.as_str().unwrap_or_default();
            if k.is_empty() || target.is_empty() {
                return Err(CommandError::EmptyName("An empty update path is not valid.".into()));
            }
            Ok((parse_update_path(k)?, parse_update_path(target)?))
        })
        .collect()
}

fn compile_pop(operand: &Document) -> Result<Vec<(Path, PopEnd)>, CommandError> {
    operand
        .iter()
        .map(|(k, v)| {
            let n = whole_number(v).ok_or_else(|| {
                CommandError::FailedToParse(format!(
                    "Expected a number in: {k}: {}",
                    format_value(v)
                ))
            })?;
            let end = match n {
                -1 => PopEnd::Front,
                1 => PopEnd::Back,
                other => {
                    return Err(CommandError::FailedToParse(format!(
                        "$pop expects 1 or -1, found: {other}"
                    )));
                }
            };
            Ok((parse_update_path(k)?, end))
        })
        .collect()
}

fn whole_number(v: &Bson) -> Option<i64> {
    match v {
        Bson::Int32(i) => Some(i64::from(*i)),
        Bson::Int64(i) => Some(*i),
        Bson::Double(d) if d.is_finite() && d.trunc() == *d && d.abs() < super::filter::I64_EDGE =>
        {
            #[allow(clippy::cast_possible_truncation)]
            Some(*d as i64)
        }
        _ => None,
    }
}

fn compile_push(operand: &Document) -> Result<Vec<(Path, Vec<Bson>)>, CommandError> {
    operand
        .iter()
        .map(|(k, v)| {
            let values = match v {
                Bson::Document(spec) if spec.keys().any(|sk| sk.starts_with('$')) => {
                    push_each(spec)?
                }
                other => vec![other.clone()],
            };
            Ok((parse_update_path(k)?, values))
        })
        .collect()
}

fn push_each(spec: &Document) -> Result<Vec<Bson>, CommandError> {
    let mut each = Vec::new();
    for (k, v) in spec {
        if k != "$each" {
            return Err(CommandError::BadValue(format!("Unrecognized clause in $push: {k}")));
        }
        let Bson::Array(values) = v else {
            return Err(CommandError::BadValue(format!(
                "The argument to $each in $push must be an array but it was of type {}",
                type_alias(v)
            )));
        };
        each.clone_from(values);
    }
    Ok(each)
}

fn compile_pull_all(operand: &Document) -> Result<Vec<(Path, Vec<Bson>)>, CommandError> {
    operand
        .iter()
        .map(|(k, v)| {
            let Bson::Array(values) = v else {
                return Err(CommandError::BadValue(format!(
                    "The field '{k}' must be an array but is of type '{}'",
                    type_alias(v)
                )));
            };
            Ok((parse_update_path(k)?, values.clone()))
        })
        .collect()
}

fn compile_pull(operand: &Document) -> Result<Vec<(Path, FieldCheck)>, CommandError> {
    operand
        .iter()
        .map(|(k, v)| Ok((parse_update_path(k)?, compile_field_check(k, v)?)))
        .collect()
}

fn apply_op(
    doc: &mut Document,
    op: &UpdateOp,
    upsert: bool,
    regexes: &RegexCache,
) -> Result<bool, CommandError> {
    match op {
        UpdateOp::CurrentDate(fields) => apply_current_date(doc, fields),
        UpdateOp::Inc(fields) => apply_inc(doc, fields),
        UpdateOp::Min(fields) => apply_min_max(doc, fields, Ordering::Greater),
        UpdateOp::Max(fields) => apply_min_max(doc, fields, Ordering::Less),
        UpdateOp::Mul(fields) => apply_mul(doc, fields),
        UpdateOp::Rename(fields) => apply_rename(doc, fields),
        UpdateOp::Set(fields) => apply_set(doc, fields, false),
        UpdateOp::SetOnInsert(fields) => {
            if upsert { apply_set(doc, fields, true) } else { Ok(false) }
        }
        UpdateOp::Unset(paths) => Ok(apply_unset(doc, paths)),
        UpdateOp::Pop(fields) => apply_pop(doc, fields),
        UpdateOp::Push(fields) => apply_push(doc, fields),
        UpdateOp::AddToSet(fields) => apply_add_to_set(doc, fields),
        UpdateOp::PullAll(fields) => apply_pull_all(doc, fields),
        UpdateOp::Pull(fields) => apply_pull(doc, fields, regexes),
    }
}

fn replace_document(doc: &mut Document, replacement: &Document) -> bool {
    let mut changed = false;
    let stale: Vec<String> = doc
        .keys()
        .filter(|k| *k != "_id" && !replacement.contains_key(k.as_str()))
        .cloned()
        .collect();
    for k in stale {
        doc.remove(&k);
        changed = true;
    }
    for (k, v) in replacement {
        doc.insert(k.as_str(), v.clone());
        changed = true;
    }
    changed
}

fn check_id_unchanged(before: &Document, after: &Document) -> Result<(), CommandError> {
    let Some(id) = before.get("_id") else {
        return Ok(());
    };
    if after.get("_id").is_some_and(|v| values_equal(v, id)) {
        return Ok(());
    }
    Err(CommandError::ImmutableField(
        "Performing an update on the path '_id' would modify the immutable field '_id'".into(),
    ))
}

fn apply_set(
    doc: &mut Document,
    fields: &[(Path, Bson)],
    on_insert: bool,
) -> Result<bool, CommandError> {
    let mut changed = false;
    for (path, value) in fields {
        // $setOnInsert leaves null and empty array operands out of the
        // inserted document.
        if on_insert
            && (matches!(value, Bson::Null) || matches!(value, Bson::Array(a) if a.is_empty()))
        {
            continue;
        }
        if get_path(doc, path).is_some_and(|cur| same_value_for_update(cur, value)) {
            continue;
        }
        set_path(doc, path, value.clone())?;
        changed = true;
    }
    Ok(changed)
}

fn apply_unset(doc: &mut Document, paths: &[Path]) -> bool {
    let mut changed = false;
    for path in paths {
        changed |= remove_path(doc, path).is_some();
    }
    changed
}

fn apply_inc(doc: &mut Document, fields: &[(Path, Bson)]) -> Result<bool, CommandError> {
    let mut changed = false;
    for (path, operand) in fields {
        let Some(current) = get_path(doc, path).cloned() else {
            set_path(doc, path, operand.clone())?;
            changed = true;
            continue;
        };
        let incremented = add_numbers(&current, operand)
            .map_err(|e| numeric_error(e, "$inc", doc, path, &current))?;
        if same_value_for_update(&current, &incremented) {
            continue;
        }
        set_path(doc, path, incremented)?;
        changed = true;
    }
    Ok(changed)
}

fn apply_mul(doc: &mut Document, fields: &[(Path, Bson)]) -> Result<bool, CommandError> {
    let mut changed = false;
    for (path, operand) in fields {
        match get_path(doc, path).cloned() {
            None => {
                // A missing field multiplies as zero of the operand's width.
                let zero = match operand {
                    Bson::Double(_) => Bson::Double(0.0),
                    Bson::Int64(_) => Bson::Int64(0),
                    _ => Bson::Int32(0),
                };
                set_path(doc, path, zero)?;
                changed = true;
            }
            Some(current) => {
                let product = multiply_numbers(&current, operand)
                    .map_err(|e| numeric_error(e, "$mul", doc, path, &current))?;
                if let Bson::Double(d) = &product
                    && d.is_infinite()
                {
                    return Err(CommandError::BadValue(format!(
                        "update produces invalid value: {{ \"{path}\": {} }} (update \
                         operations that produce infinity values are not allowed)",
                        format_value(&product)
                    )));
                }
                if !same_value_for_update(&current, &product) {
                    set_path(doc, path, product)?;
                    changed = true;
                }
            }
        }
    }
    Ok(changed)
}

fn apply_min_max(
    doc: &mut Document,
    fields: &[(Path, Bson)],
    set_when: Ordering,
) -> Result<bool, CommandError> {
    let mut changed = false;
    for (path, operand) in fields {
        let set = match get_path(doc, path) {
            None => true,
            Some(current) => compare_values(current, operand) == set_when,
        };
        if set {
            set_path(doc, path, operand.clone())?;
            changed = true;
        }
    }
    Ok(changed)
}

fn apply_rename(doc: &mut Document, fields: &[(Path, Path)]) -> Result<bool, CommandError> {
    let mut changed = false;
    for (source, target) in fields {
        if get_path(doc, source).is_none() {
            blocked_traversal(doc, source)?;
            continue;
        }
        let Some(value) = remove_path(doc, source) else {
            continue;
        };
        set_path(doc, target, value)?;
        changed = true;
    }
    Ok(changed)
}

fn apply_current_date(
    doc: &mut Document,
    fields: &[(Path, CurrentDateKind)],
) -> Result<bool, CommandError> {
    let now = bson::DateTime::now();
    let mut changed = false;
    for (path, kind) in fields {
        let value = match kind {
            CurrentDateKind::Date => Bson::DateTime(now),
            CurrentDateKind::Timestamp => Bson::Timestamp(next_timestamp(now)),
        };
        set_path(doc, path, value)?;
        changed = true;
    }
    Ok(changed)
}

static TIMESTAMP_COUNTER: AtomicU32 = AtomicU32::new(1);

fn next_timestamp(now: bson::DateTime) -> bson::Timestamp {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let time = (now.timestamp_millis() / 1000) as u32;
    bson::Timestamp { time, increment: TIMESTAMP_COUNTER.fetch_add(1, AtomicOrdering::Relaxed) }
}

fn apply_pop(doc: &mut Document, fields: &[(Path, PopEnd)]) -> Result<bool, CommandError> {
    let mut changed = false;
    for (path, end) in fields {
        let Some(current) = get_path(doc, path) else {
            blocked_traversal(doc, path)?;
            continue;
        };
        let Bson::Array(elems) = current else {
            return Err(CommandError::TypeMismatch(format!(
                "Path '{path}' contains an element of non-array type '{}'",
                type_alias(current)
            )));
        };
        if elems.is_empty() {
            continue;
        }
        let mut elems = elems.clone();
        match end {
            PopEnd::Front => {
                elems.remove(0);
            }
            PopEnd::Back => {
                elems.pop();
            }
        }
        set_path(doc, path, Bson::Array(elems))?;
        changed = true;
    }
    Ok(changed)
}

fn apply_push(doc: &mut Document, fields: &[(Path, Vec<Bson>)]) -> Result<bool, CommandError> {
    let mut changed = false;
    for (path, values) in fields {
        let mut elems = match get_path(doc, path) {
            None => {
                changed = true;
                Vec::new()
            }
            Some(Bson::Array(elems)) => elems.clone(),
            Some(other) => return Err(non_array_target(path, other, doc)),
        };
        elems.extend(values.iter().cloned());
        changed |= !values.is_empty();
        set_path(doc, path, Bson::Array(elems))?;
    }
    Ok(changed)
}

fn apply_add_to_set(doc: &mut Document, fields: &[(Path, Bson)]) -> Result<bool, CommandError> {
    let mut changed = false;
    for (path, operand) in fields {
        let mut elems = match get_path(doc, path) {
            None => Vec::new(),
            Some(Bson::Array(elems)) => elems.clone(),
            Some(other) => return Err(non_array_target(path, other, doc)),
        };
        // An empty target takes the operand as-is, even an array.
        if elems.is_empty() {
            elems.push(operand.clone());
            set_path(doc, path, Bson::Array(elems))?;
            changed = true;
            continue;
        }
        if matches!(operand, Bson::Array(_)) {
            return Err(CommandError::BadValue(format!(
                "Nested arrays are not supported in $addToSet: {}",
                format_value(operand)
            )));
        }
        if elems.iter().any(|e| values_equal(e, operand)) {
            continue;
        }
        elems.push(operand.clone());
        set_path(doc, path, Bson::Array(elems))?;
        changed = true;
    }
    Ok(changed)
}

fn apply_pull_all(
    doc: &mut Document,
    fields: &[(Path, Vec<Bson>)],
) -> Result<bool, CommandError> {
    let mut changed = false;
    for (path, values) in fields {
        let Some(current) = get_path(doc, path) else {
            blocked_traversal(doc, path)?;
            continue;
        };
        let Bson::Array(elems) = current else {
            return Err(non_array_target(path, current, doc));
        };
        let kept: Vec<Bson> = elems
            .iter()
            .filter(|e| !values.iter().any(|v| values_equal(e, v)))
            .cloned()
            .collect();
        if kept.len() == elems.len() {
            continue;
        }
        set_path(doc, path, Bson::Array(kept))?;
        changed = true;
    }
    Ok(changed)
}

fn apply_pull(
    doc: &mut Document,
    fields: &[(Path, FieldCheck)],
    regexes: &RegexCache,
) -> Result<bool, CommandError> {
    let mut changed = false;
    for (path, check) in fields {
        let Some(current) = get_path(doc, path) else {
            blocked_traversal(doc, path)?;
            continue;
        };
        let Bson::Array(elems) = current else {
            return Err(CommandError::BadValue("Cannot apply $pull to a non-array value".into()));
        };
        let kept: Vec<Bson> = elems
            .iter()
            .filter(|e| !check_matches_candidate(check, Some(e), regexes))
            .cloned()
            .collect();
        if kept.len() == elems.len() {
            continue;
        }
        set_path(doc, path, Bson::Array(kept))?;
        changed = true;
    }
    Ok(changed)
}

/// Distinguishes a merely missing path from one blocked by a non-document
/// value on the way down, which is a write error.
fn blocked_traversal(doc: &Document, path: &Path) -> Result<(), CommandError> {
    blocked_segment(doc, &path.to_string(), path.segments())
}

fn blocked_segment(doc: &Document, key: &str, segs: &[String]) -> Result<(), CommandError> {
    if segs.len() < 2 {
        return Ok(());
    }
    let prefix = segs[0].as_str();
    let Some(value) = doc.get(prefix) else {
        return Ok(());
    };
    if let Bson::Document(d) = value {
        return blocked_segment(d, key, &segs[1..]);
    }
    Err(CommandError::UnsuitableValueType(format!(
        "Cannot use the part ({}) of ({key}) to traverse the element ({{{prefix}: {}}})",
        segs[1],
        format_value(value)
    )))
}

fn non_array_target(path: &Path, value: &Bson, doc: &Document) -> CommandError {
    let id = doc.get("_id").cloned().unwrap_or(Bson::Null);
    CommandError::BadValue(format!(
        "The field '{path}' must be an array but is of type '{}' in document {{_id: {}}}",
        type_alias(value),
        format_value(&id)
    ))
}

enum ArithmeticError {
    NotNumeric,
    Overflow { width: &'static str, value: i64 },
}

fn numeric_error(
    failure: ArithmeticError,
    op: &str,
    doc: &Document,
    path: &Path,
    current: &Bson,
) -> CommandError {
    let id = doc.get("_id").cloned().unwrap_or(Bson::Null);
    match failure {
        ArithmeticError::NotNumeric => {
            let field = path.segments().last().map_or("", String::as_str);
            CommandError::TypeMismatch(format!(
                "Cannot apply {op} to a value of non-numeric type. {{_id: {}}} has the field \
                 '{field}' of non-numeric type {}",
                format_value(&id),
                type_alias(current)
            ))
        }
        ArithmeticError::Overflow { width, value } => CommandError::BadValue(format!(
            "Failed to apply {op} operations to current value (({width}){value}) for document \
             {{_id: {}}}",
            format_value(&id)
        )),
    }
}

/// Addition following the stored value's width: any double makes the result
/// a double, int32 pairs promote to int64 only on overflow, and int64
/// overflow is an error.
fn add_numbers(current: &Bson, operand: &Bson) -> Result<Bson, ArithmeticError> {
    match (current, operand) {
        (Bson::Double(a), _) => Ok(Bson::Double(a + to_f64(operand))),
        (Bson::Int32(a), Bson::Double(b)) => Ok(Bson::Double(f64::from(*a) + b)),
        (Bson::Int64(a), Bson::Double(b)) => {
            #[allow(clippy::cast_precision_loss)]
            Ok(Bson::Double(*a as f64 + b))
        }
        (Bson::Int32(a), Bson::Int32(b)) => {
            let sum = i64::from(*a) + i64::from(*b);
            Ok(i32::try_from(sum).map_or(Bson::Int64(sum), Bson::Int32))
        }
        (Bson::Int32(a), Bson::Int64(b)) => i64::from(*a)
            .checked_add(*b)
            .map(Bson::Int64)
            .ok_or(ArithmeticError::Overflow { width: "NumberInt", value: i64::from(*a) }),
        (Bson::Int64(a), Bson::Int32(b)) => a
            .checked_add(i64::from(*b))
            .map(Bson::Int64)
            .ok_or(ArithmeticError::Overflow { width: "NumberLong", value: *a }),
        (Bson::Int64(a), Bson::Int64(b)) => a
            .checked_add(*b)
            .map(Bson::Int64)
            .ok_or(ArithmeticError::Overflow { width: "NumberLong", value: *a }),
        _ => Err(ArithmeticError::NotNumeric),
    }
}

fn multiply_numbers(current: &Bson, operand: &Bson) -> Result<Bson, ArithmeticError> {
    match (current, operand) {
        (Bson::Double(a), _) => Ok(Bson::Double(a * to_f64(operand))),
        (Bson::Int32(a), Bson::Double(b)) => Ok(Bson::Double(f64::from(*a) * b)),
        (Bson::Int64(a), Bson::Double(b)) => {
            #[allow(clippy::cast_precision_loss)]
            Ok(Bson::Double(*a as f64 * b))
        }
        (Bson::Int32(a), Bson::Int32(b)) => {
            let product = i64::from(*a) * i64::from(*b);
            Ok(i32::try_from(product).map_or(Bson::Int64(product), Bson::Int32))
        }
        (Bson::Int32(a), Bson::Int64(b)) => i64::from(*a)
            .checked_mul(*b)
            .map(Bson::Int64)
            .ok_or(ArithmeticError::Overflow { width: "NumberInt", value: i64::from(*a) }),
        (Bson::Int64(a), Bson::Int32(b)) => a
            .checked_mul(i64::from(*b))
            .map(Bson::Int64)
            .ok_or(ArithmeticError::Overflow { width: "NumberLong", value: *a }),
        (Bson::Int64(a), Bson::Int64(b)) => a
            .checked_mul(*b)
            .map(Bson::Int64)
            .ok_or(ArithmeticError::Overflow { width: "NumberLong", value: *a }),
        _ => Err(ArithmeticError::NotNumeric),
    }
}

fn to_f64(v: &Bson) -> f64 {
    match v {
        Bson::Double(d) => *d,
        Bson::Int32(i) => f64::from(*i),
        #[allow(clippy::cast_precision_loss)]
        Bson::Int64(i) => *i as f64,
        _ => 0.0,
    }
}
