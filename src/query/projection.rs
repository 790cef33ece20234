//! Projection validation and application.
//!
//! Fields are either all included or all excluded, with `_id` free to go
//! either way. Non-boolean, non-numeric values assign a new literal value.
//! Inclusion rebuilds documents in stored field order, keeps empty
//! documents for array elements that matched nothing, and drops array
//! elements that are not documents. The positional operator `field.$`
//! returns the first array element matching the filter condition on
//! `field`.

use bson::{Bson, Document};

use super::eval::check_matches_candidate;
use super::filter::compile_field_check;
use super::types::RegexCache;
use crate::document::format_value;
use crate::errors::CommandError;

#[derive(Debug, Clone, PartialEq)]
enum ProjectionField {
    Include,
    Exclude,
    Literal(Bson),
}

/// A validated projection document.
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    fields: Vec<(String, ProjectionField)>,
    inclusion: bool,
}

impl Projection {
    pub fn compile(projection: &Document) -> Result<Self, CommandError> {
        let mut fields = Vec::with_capacity(projection.len());
        let mut inclusion: Option<bool> = None;

        for (key, value) in projection {
            let positional = validate_key(key)?;

            let kind = field_kind(key, value)?;
            let field_inclusion = !matches!(kind, ProjectionField::Exclude);
            fields.push((key.clone(), kind));

            if projection.len() == 1 && key == "_id" {
                return Ok(Self { fields, inclusion: field_inclusion });
            }

            if !field_inclusion && positional {
                return Err(CommandError::Location(
                    31395,
                    "positional projection cannot be used with exclusion".into(),
                ));
            }

            // `_id` never sets the mode and never conflicts with it.
            if key == "_id" {
                continue;
            }

            match inclusion {
                None => inclusion = Some(field_inclusion),
                Some(true) if !field_inclusion => {
                    return Err(CommandError::Location(
                        31254,
                        format!("Cannot do exclusion on field {key} in inclusion projection"),
                    ));
                }
                Some(false) if field_inclusion => {
                    return Err(CommandError::Location(
                        31253,
                        format!("Cannot do inclusion on field {key} in exclusion projection"),
                    ));
                }
                Some(_) => {}
            }
        }

        Ok(Self { fields, inclusion: inclusion.unwrap_or(false) })
    }

    #[must_use]
    pub fn is_inclusion(&self) -> bool {
        self.inclusion
    }

    /// Projects `doc`, placing `_id` first unless it is excluded. `filter`
    /// supplies the condition for positional projections.
    pub fn apply(
        &self,
        doc: &Document,
        filter: &Document,
        regexes: &RegexCache,
    ) -> Result<Document, CommandError> {
        if self.fields.is_empty() {
            return Ok(doc.clone());
        }

        let mut out = Document::new();
        if let Some(id) = doc.get("_id") {
            out.insert("_id", id.clone());
        }
        if let Some((_, kind)) = self.fields.iter().find(|(k, _)| k == "_id") {
            match kind {
                ProjectionField::Include => {}
                ProjectionField::Exclude => {
                    out.remove("_id");
                }
                ProjectionField::Literal(v) => {
                    out.insert("_id", v.clone());
                }
            }
        }

        let mut source = doc.clone();
        source.remove("_id");
        for (key, value) in self.project_body(&source, filter, regexes)? {
            out.insert(key, value);
        }
        Ok(out)
    }

    fn project_body(
        &self,
        source: &Document,
        filter: &Document,
        regexes: &RegexCache,
    ) -> Result<Document, CommandError> {
        let mut projected = if self.inclusion { Document::new() } else { source.clone() };

        for (key, kind) in &self.fields {
            if key == "_id" {
                continue;
            }
            match kind {
                ProjectionField::Literal(v) => {
                    projected.insert(key.clone(), v.clone());
                }
                ProjectionField::Include => {
                    let path: Vec<&str> = key.split('.').collect();
                    include_in_document(&path, 0, source, &mut projected, filter, regexes)?;
                }
                ProjectionField::Exclude => {
                    let path: Vec<&str> = key.split('.').collect();
                    exclude_path(&path, &mut projected);
                }
            }
        }

        Ok(projected)
    }
}

/// Checks one projection key, returning whether it is positional.
fn validate_key(key: &str) -> Result<bool, CommandError> {
    if key.is_empty() {
        return Err(CommandError::Location(
            40352,
            "FieldPath cannot be constructed with empty string".into(),
        ));
    }

    let positional = key.ends_with('$');
    let segments: Vec<&str> = key.split('.').collect();

    if segments.iter().any(|s| s.is_empty()) {
        if positional {
            return Err(CommandError::Location(
                40353,
                "FieldPath must not end with a '.'.".into(),
            ));
        }
        return Err(CommandError::Location(
            15998,
            "FieldPath field names may not be empty strings.".into(),
        ));
    }

    let prefix = &segments[..segments.len() - 1];
    if segments.len() > 1 && prefix.iter().map(|s| s.matches('$').count()).sum::<usize>() > 1 {
        return Err(misplaced_positional());
    }

    if key.starts_with('$') {
        return Err(dollar_prefixed_field());
    }

    if segments.len() > 1 && prefix.contains(&"$") {
        return Err(misplaced_positional());
    }

    // `v.$` and `v.foo$` are fine, `v.$foo` is not.
    if segments.iter().any(|s| s.starts_with('$') && *s != "$") {
        return Err(dollar_prefixed_field());
    }

    Ok(positional)
}

fn misplaced_positional() -> CommandError {
    CommandError::Location(
        31394,
        "Positional projection may only be used at the end, for example: a.b.$. \
         If the query previously used a form like a.b.$.d, remove the parts \
         following the '$' and the results will be equivalent."
            .into(),
    )
}

fn dollar_prefixed_field() -> CommandError {
    CommandError::Location(
        16410,
        "FieldPath field names may not start with '$'. \
         Consider using $getField or $setField."
            .into(),
    )
}

fn field_kind(key: &str, value: &Bson) -> Result<ProjectionField, CommandError> {
    match value {
        Bson::Document(_) => Err(CommandError::NotImplemented(format!(
            "projection expression {} is not supported",
            format_value(value)
        ))),
        Bson::Array(_)
        | Bson::String(_)
        | Bson::Binary(_)
        | Bson::ObjectId(_)
        | Bson::DateTime(_)
        | Bson::Null
        | Bson::RegularExpression(_)
        | Bson::Timestamp(_) => Ok(ProjectionField::Literal(value.clone())),
        Bson::Int32(n) => Ok(numeric_kind(i64::from(*n) != 0)),
        Bson::Int64(n) => Ok(numeric_kind(*n != 0)),
        Bson::Double(d) => Ok(numeric_kind(*d != 0.0)),
        Bson::Boolean(b) => Ok(numeric_kind(*b)),
        other => Err(CommandError::Internal(format!(
            "unsupported operation {key} {}",
            format_value(other)
        ))),
    }
}

fn numeric_kind(include: bool) -> ProjectionField {
    if include { ProjectionField::Include } else { ProjectionField::Exclude }
}

fn include_value(
    path: &[&str],
    cur: usize,
    source: &Bson,
    projected: &mut Document,
    filter: &Document,
    regexes: &RegexCache,
) -> Result<Option<Vec<Bson>>, CommandError> {
    match source {
        Bson::Document(doc) => {
            include_in_document(path, cur, doc, projected, filter, regexes)?;
            Ok(None)
        }
        Bson::Array(elems) => {
            include_in_array(path, cur, elems, projected, filter, regexes).map(Some)
        }
        _ => Ok(None),
    }
}

fn include_in_document(
    path: &[&str],
    cur: usize,
    source: &Document,
    projected: &mut Document,
    filter: &Document,
    regexes: &RegexCache,
) -> Result<(), CommandError> {
    let key = path[cur];
    let Some(embedded) = source.get(key) else {
        return Ok(());
    };

    if cur + 1 >= path.len() {
        set_by_source_order(key, embedded.clone(), source, projected);
        return Ok(());
    }

    let mut sub = match projected.get(key) {
        Some(Bson::Document(d)) => d.clone(),
        Some(Bson::Array(a)) => {
            // An earlier projection field already built a partial array
            // here; let the next segment merge into it.
            let mut wrap = Document::new();
            wrap.insert(path[cur + 1], Bson::Array(a.clone()));
            wrap
        }
        _ => Document::new(),
    };

    if path[cur + 1] == "$" {
        // Positional projection keeps a non-array value as it is.
        projected.insert(key, embedded.clone());
    }

    let arr = include_value(path, cur + 1, embedded, &mut sub, filter, regexes)?;

    match embedded {
        Bson::Document(_) => set_by_source_order(key, Bson::Document(sub), source, projected),
        Bson::Array(_) => {
            projected.insert(key, Bson::Array(arr.unwrap_or_default()));
        }
        _ => {}
    }

    Ok(())
}

/// Projects `path` into each document element. Elements that match nothing
/// stay as empty documents so positions line up across projection fields;
/// non-document elements are dropped.
fn include_in_array(
    path: &[&str],
    cur: usize,
    elems: &[Bson],
    projected: &mut Document,
    filter: &Document,
    regexes: &RegexCache,
) -> Result<Vec<Bson>, CommandError> {
    let key = path[cur];
    if key == "$" {
        return positional_match(elems, filter, path, regexes);
    }

    let existing = match projected.get(key) {
        Some(Bson::Array(a)) => Some(a.clone()),
        _ => None,
    };

    let mut out = Vec::new();
    for elem in elems {
        if !matches!(elem, Bson::Document(_)) {
            continue;
        }
        let mut doc = match existing.as_ref().and_then(|a| a.get(out.len())) {
            Some(Bson::Document(d)) => d.clone(),
            _ => Document::new(),
        };
        include_value(path, cur, elem, &mut doc, filter, regexes)?;
        out.push(Bson::Document(doc));
    }

    if path[path.len() - 1] == "$" && out.is_empty() {
        // Positional projection handles one array at the suffix only.
        return Err(CommandError::Location(
            51247,
            "Executor error during find command :: caused by :: \
             positional operator '.$' element mismatch"
                .into(),
        ));
    }

    Ok(out)
}

/// Finds the first element matching the filter condition on the path
/// leading up to `$`.
fn positional_match(
    elems: &[Bson],
    filter: &Document,
    path: &[&str],
    regexes: &RegexCache,
) -> Result<Vec<Bson>, CommandError> {
    let prefix = path[..path.len() - 1].join(".");
    let Some(condition) = filter.get(&prefix) else {
        return Err(bad_positional());
    };
    if elems.is_empty() || filter.is_empty() {
        return Err(bad_positional());
    }

    let check = compile_field_check(&prefix, condition)?;
    for elem in elems {
        if check_matches_candidate(&check, Some(elem), regexes) {
            return Ok(vec![elem.clone()]);
        }
    }
    Err(bad_positional())
}

fn bad_positional() -> CommandError {
    CommandError::Location(
        51246,
        "Executor error during find command :: caused by :: positional operator '.$' \
         couldn't find a matching element in the array"
            .into(),
    )
}

fn exclude_path(path: &[&str], projected: &mut Document) {
    let key = path[0];
    if path.len() == 1 {
        projected.remove(key);
        return;
    }
    if let Some(embedded) = projected.get_mut(key) {
        exclude_value(&path[1..], embedded);
    }
}

fn exclude_value(path: &[&str], value: &mut Bson) {
    match value {
        Bson::Document(d) => exclude_path(path, d),
        Bson::Array(elems) => {
            for elem in elems {
                if matches!(elem, Bson::Document(_)) {
                    exclude_value(path, elem);
                }
            }
        }
        _ => {}
    }
}

/// Inserts `key` into `projected` at the position it holds in `source`,
/// shifting any already-projected later fields after it.
fn set_by_source_order(key: &str, value: Bson, source: &Document, projected: &mut Document) {
    let projected_keys: Vec<String> = projected.keys().cloned().collect();

    let mut insert_at = 0;
    for source_key in source.keys() {
        if source_key == key || insert_at >= projected_keys.len() {
            break;
        }
        if *source_key == projected_keys[insert_at] {
            insert_at += 1;
        }
    }

    let mut tail = Vec::with_capacity(projected_keys.len() - insert_at);
    for k in &projected_keys[insert_at..] {
        if k == key {
            continue;
        }
        if let Some(v) = projected.remove(k) {
            tail.push((k.clone(), v));
        }
    }

    projected.insert(key, value);
    for (k, v) in tail {
        projected.insert(k, v);
    }
}
