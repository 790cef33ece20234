//! Sort specification compilation and application.

use std::cmp::Ordering;

use bson::{Bson, Document};

use super::types::MAX_SORT_KEYS;
use crate::compare::{SortOrder, compare_for_sort};
use crate::document::{Path, format_value, get_path};
use crate::errors::CommandError;

static NULL: Bson = Bson::Null;

/// A validated sort document. Keys compare in specification order and the
/// underlying sort is stable, so equal documents keep their incoming order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SortSpec {
    keys: Vec<(Path, SortOrder)>,
}

impl SortSpec {
    pub fn compile(sort: &Document) -> Result<Self, CommandError> {
        if sort.len() > MAX_SORT_KEYS {
            return Err(CommandError::BadValue(format!(
                "$sort key specification must have at most {MAX_SORT_KEYS} keys"
            )));
        }
        let mut keys = Vec::with_capacity(sort.len());
        for (key, value) in sort {
            if key.contains('$') {
                return Err(CommandError::Location(
                    16410,
                    "FieldPath field names may not start with '$'. \
                     Consider using $getField or $setField."
                        .into(),
                ));
            }
            let path = Path::parse(key)?;
            keys.push((path, sort_order(key, value)?));
        }
        Ok(Self { keys })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    #[must_use]
    pub fn keys(&self) -> impl Iterator<Item = (&Path, SortOrder)> {
        self.keys.iter().map(|(p, o)| (p, *o))
    }

    pub fn apply(&self, docs: &mut [Document]) {
        if self.keys.is_empty() {
            return;
        }
        docs.sort_by(|a, b| self.compare_documents(a, b));
    }

    fn compare_documents(&self, a: &Document, b: &Document) -> Ordering {
        for (path, order) in &self.keys {
            let left = get_path(a, path).unwrap_or(&NULL);
            let right = get_path(b, path).unwrap_or(&NULL);
            let ord = compare_for_sort(left, right, *order);
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

fn sort_order(key: &str, value: &Bson) -> Result<SortOrder, CommandError> {
    let n = match value {
        Bson::Int32(n) => i64::from(*n),
        Bson::Int64(n) => *n,
        Bson::Double(d) => {
            if !d.is_finite() || d.trunc() != *d {
                return Err(CommandError::BadValue("$sort must be a whole number".into()));
            }
            #[allow(clippy::cast_possible_truncation)]
            {
                *d as i64
            }
        }
        other => {
            return Err(CommandError::Location(
                15974,
                format!("Illegal key in $sort specification: {key}: {}", sort_value_text(other)),
            ));
        }
    };
    match n {
        1 => Ok(SortOrder::Ascending),
        -1 => Ok(SortOrder::Descending),
        _ => Err(CommandError::Location(
            15975,
            "$sort key ordering must be 1 (for ascending) or -1 (for descending)".into(),
        )),
    }
}

/// Error rendering for sort directions. Strings appear without quotes.
fn sort_value_text(v: &Bson) -> String {
    match v {
        Bson::Null => "null".into(),
        Bson::String(s) => s.clone(),
        Bson::Boolean(b) => b.to_string(),
        other => format_value(other),
    }
}
