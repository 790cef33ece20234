use bson::{Bson, Document};

use super::validate::format_value;
use crate::errors::CommandError;

// Safety limit to keep traversal bounded on hostile inputs
pub const MAX_PATH_DEPTH: usize = 32;

/// Parsed dotted field reference (`"a.b.0.c"`). Segments are non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Path {
    segments: Vec<String>,
}

impl Path {
    /// Splits a dotted reference into segments.
    ///
    /// # Errors
    /// Empty paths and paths with empty segments (`""`, `"a..b"`, `"a."`) are
    /// rejected.
    pub fn parse(s: &str) -> Result<Self, CommandError> {
        if s.is_empty() || s.split('.').any(str::is_empty) {
            return Err(CommandError::Location(
                15998,
                "Empty field names in path are not allowed".into(),
            ));
        }
        Ok(Self { segments: s.split('.').map(str::to_owned).collect() })
    }

    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    #[must_use]
    pub fn head(&self) -> &str {
        &self.segments[0]
    }

    #[must_use]
    pub fn is_single(&self) -> bool {
        self.segments.len() == 1
    }

    /// The path with its first segment removed; `None` for single-segment paths.
    #[must_use]
    pub fn suffix(&self) -> Option<Self> {
        if self.segments.len() < 2 {
            return None;
        }
        Some(Self { segments: self.segments[1..].to_vec() })
    }
}

impl std::fmt::Display for Path {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.segments.join("."))
    }
}

/// Controls how array values respond to path segments during resolution.
#[derive(Debug, Clone, Copy)]
pub struct FindOpts {
    /// Numeric segments index into arrays.
    pub array_index: bool,
    /// Segments fan out over array elements that are documents.
    pub array_documents: bool,
}

impl FindOpts {
    /// Resolution used by filter evaluation: indexes and fan-out both apply.
    pub const FILTER: Self = Self { array_index: true, array_documents: true };
}

/// Collects every value a dotted path can refer to inside `doc`.
///
/// With `FindOpts::FILTER`, `{foo: [{bar: 0}, {bar: 1}]}` yields `[0, 1]` for
/// `foo.bar`, `[{bar: 1}]` for `foo.1`, and `[1]` for `foo.1.bar`. A filter
/// matches when ANY collected candidate satisfies it.
#[must_use]
pub fn find_values(doc: &Document, path: &Path, opts: FindOpts) -> Vec<Bson> {
    if path.len() > MAX_PATH_DEPTH {
        return Vec::new();
    }
    let mut next: Vec<Bson> = vec![Bson::Document(doc.clone())];
    for seg in path.segments() {
        let mut found = Vec::new();
        for v in &next {
            match v {
                Bson::Document(d) => {
                    if let Some(inner) = d.get(seg) {
                        found.push(inner.clone());
                    }
                }
                Bson::Array(arr) => {
                    if opts.array_index
                        && let Ok(idx) = seg.parse::<usize>()
                        && let Some(elem) = arr.get(idx)
                    {
                        found.push(elem.clone());
                    }
                    if opts.array_documents {
                        for elem in arr {
                            if let Bson::Document(d) = elem
                                && let Some(inner) = d.get(seg)
                            {
                                found.push(inner.clone());
                            }
                        }
                    }
                }
                _ => {}
            }
        }
        next = found;
    }
    next
}

/// Resolves a path to at most one value: document keys by name, array
/// elements by numeric index, no fan-out. Used by sort, projection, and
/// expression evaluation.
#[must_use]
pub fn get_path<'a>(doc: &'a Document, path: &Path) -> Option<&'a Bson> {
    if path.len() > MAX_PATH_DEPTH {
        return None;
    }
    let mut cur = doc.get(path.head())?;
    for seg in &path.segments()[1..] {
        cur = match cur {
            Bson::Document(d) => d.get(seg)?,
            Bson::Array(arr) => arr.get(seg.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(cur)
}

/// Writes `value` at `path`, creating intermediate documents for missing
/// segments. Numeric segments index into arrays; an index one past the end
/// appends. Setting an existing key keeps its position, a new key lands at
/// the end of its document.
///
/// # Errors
/// Traversing a scalar, a non-numeric segment on an array, or an index past
/// the appendable range fails with `UnsuitableValueType` naming the blocking
/// element.
pub fn set_path(doc: &mut Document, path: &Path, value: Bson) -> Result<(), CommandError> {
    set_in_document(doc, path.segments(), value)
}

fn set_in_document(doc: &mut Document, segs: &[String], value: Bson) -> Result<(), CommandError> {
    let key = segs[0].as_str();
    if segs.len() == 1 {
        doc.insert(key, value);
        return Ok(());
    }
    match doc.get_mut(key) {
        None => {
            doc.insert(key, nest(&segs[1..], value));
            Ok(())
        }
        Some(slot) => set_in_value(slot, key, &segs[1..], value),
    }
}

fn set_in_value(
    slot: &mut Bson,
    parent: &str,
    segs: &[String],
    value: Bson,
) -> Result<(), CommandError> {
    match slot {
        Bson::Document(d) => set_in_document(d, segs, value),
        Bson::Array(elems) => {
            let seg = segs[0].as_str();
            let idx = match seg.parse::<usize>() {
                Ok(idx) if idx <= elems.len() => idx,
                _ => {
                    return Err(cannot_create(seg, parent, &Bson::Array(elems.clone())));
                }
            };
            if idx == elems.len() {
                elems.push(nest(&segs[1..], value));
            } else if segs.len() == 1 {
                elems[idx] = value;
            } else {
                return set_in_value(&mut elems[idx], seg, &segs[1..], value);
            }
            Ok(())
        }
        other => Err(cannot_create(segs[0].as_str(), parent, other)),
    }
}

/// Builds the nested documents for the missing tail of a path.
fn nest(segs: &[String], value: Bson) -> Bson {
    let mut built = value;
    for seg in segs.iter().rev() {
        let mut d = Document::new();
        d.insert(seg.as_str(), built);
        built = Bson::Document(d);
    }
    built
}

fn cannot_create(seg: &str, parent: &str, blocking: &Bson) -> CommandError {
    CommandError::UnsuitableValueType(format!(
        "Cannot create field '{seg}' in element {{{parent}: {}}}",
        format_value(blocking)
    ))
}

/// Removes and returns the value at `path`. Missing segments, out-of-range
/// indexes, and traversal through scalars leave the document untouched.
pub fn remove_path(doc: &mut Document, path: &Path) -> Option<Bson> {
    remove_in_document(doc, path.segments())
}

fn remove_in_document(doc: &mut Document, segs: &[String]) -> Option<Bson> {
    let key = segs[0].as_str();
    if segs.len() == 1 {
        return doc.remove(key);
    }
    match doc.get_mut(key)? {
        Bson::Document(d) => remove_in_document(d, &segs[1..]),
        Bson::Array(elems) => remove_in_array(elems, &segs[1..]),
        _ => None,
    }
}

fn remove_in_array(elems: &mut Vec<Bson>, segs: &[String]) -> Option<Bson> {
    let idx = segs[0].parse::<usize>().ok()?;
    if idx >= elems.len() {
        return None;
    }
    if segs.len() == 1 {
        return Some(elems.remove(idx));
    }
    match &mut elems[idx] {
        Bson::Document(d) => remove_in_document(d, &segs[1..]),
        Bson::Array(inner) => remove_in_array(inner, &segs[1..]),
        _ => None,
    }
}
