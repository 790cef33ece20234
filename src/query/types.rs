use std::fmt;
use std::num::NonZeroUsize;

use bson::Bson;
use lru::LruCache;
use parking_lot::Mutex;

use crate::document::Path;

// Safety limits.
pub const MAX_SORT_KEYS: usize = 32;
pub const REGEX_CACHE_CAP: usize = 256;

/// Compiled filter tree.
///
/// Compilation validates operator arity and operand types up front, so
/// evaluation is infallible. `Never` covers filters that are accepted but
/// cannot match anything, such as an unknown top-level `$operator`.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Matches every document.
    Always,
    /// Matches no document.
    Never,
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Nor(Vec<Filter>),
    /// One path condition; the check runs over each candidate the path
    /// resolves to, and any passing candidate matches the document.
    Field { path: Path, check: FieldCheck },
    /// `$expr`: an aggregation expression coerced to a boolean.
    Expr(crate::aggregation::Expression),
}

/// The condition applied to a field's candidate values.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldCheck {
    /// Whole-operand equality, including implicit `{field: value}` matches.
    Equals(Bson),
    /// `$`-operator document; a candidate must satisfy every operator.
    Ops(Vec<FieldOp>),
}

/// A single `$`-operator inside a field condition.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldOp {
    Eq(Bson),
    Ne(Bson),
    Gt(Bson),
    Gte(Bson),
    Lt(Bson),
    Lte(Bson),
    In(Vec<InMember>),
    Nin(Vec<InMember>),
    Exists(bool),
    Type(Vec<TypeCheck>),
    Size(i64),
    All(Vec<Bson>),
    Mod { divisor: i64, remainder: i64 },
    Regex(RegexMatch),
    ElemMatch(ElemMatchCheck),
    Not(Box<NotCheck>),
    /// Accepted but unsatisfiable, e.g. `$mod` with a zero divisor.
    Never,
}

/// One member of a `$in`/`$nin` list.
#[derive(Debug, Clone, PartialEq)]
pub enum InMember {
    Value(Bson),
    Regex(RegexMatch),
}

/// Negated condition under `$not`.
#[derive(Debug, Clone, PartialEq)]
pub enum NotCheck {
    Check(FieldCheck),
    Regex(RegexMatch),
}

/// `$elemMatch` operand form.
#[derive(Debug, Clone, PartialEq)]
pub enum ElemMatchCheck {
    /// `{$elemMatch: {$gt: 5, $lt: 9}}`: operators applied per element.
    Ops(Vec<FieldOp>),
    /// `{$elemMatch: {b: 1}}`: a sub-filter matched against element documents.
    Filter(Box<Filter>),
}

/// One `$type` check, parsed from a numeric code or a string alias.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCheck {
    Double,
    String,
    Object,
    Array,
    BinData,
    ObjectId,
    Bool,
    Date,
    Null,
    Regex,
    Int,
    Timestamp,
    Long,
    /// Alias covering double, int, and long together.
    Number,
}

impl TypeCheck {
    #[must_use]
    pub fn matches(self, v: &Bson) -> bool {
        match self {
            Self::Double => matches!(v, Bson::Double(_)),
            Self::String => matches!(v, Bson::String(_)),
            Self::Object => matches!(v, Bson::Document(_)),
            Self::Array => matches!(v, Bson::Array(_)),
            Self::BinData => matches!(v, Bson::Binary(_)),
            Self::ObjectId => matches!(v, Bson::ObjectId(_)),
            Self::Bool => matches!(v, Bson::Boolean(_)),
            Self::Date => matches!(v, Bson::DateTime(_)),
            Self::Null => matches!(v, Bson::Null),
            Self::Regex => matches!(v, Bson::RegularExpression(_)),
            Self::Int => matches!(v, Bson::Int32(_)),
            Self::Timestamp => matches!(v, Bson::Timestamp(_)),
            Self::Long => matches!(v, Bson::Int64(_)),
            Self::Number => matches!(v, Bson::Double(_) | Bson::Int32(_) | Bson::Int64(_)),
        }
    }
}

/// A validated regex condition. `options` keep the client's flag string;
/// only `i`, `m`, and `s` survive compilation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RegexMatch {
    pub pattern: String,
    pub options: String,
}

impl RegexMatch {
    /// Builds the matcher, applying the options as inline flags. A pattern
    /// the engine cannot parse yields `None`, and the condition matches
    /// nothing.
    pub(crate) fn build(&self) -> Option<regex::Regex> {
        let expr = if self.options.is_empty() {
            self.pattern.clone()
        } else {
            format!("(?{}){}", self.options, self.pattern)
        };
        regex::Regex::new(&expr).ok()
    }
}

/// Shared cache of compiled filter regexes, keyed by (pattern, options).
/// Failed compilations are cached too, so a bad pattern is parsed once and
/// not once per document.
pub struct RegexCache {
    inner: Mutex<LruCache<RegexMatch, Option<regex::Regex>>>,
}

impl RegexCache {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let nz = NonZeroUsize::new(capacity.max(1))
            .unwrap_or_else(|| NonZeroUsize::new(1).expect("NonZeroUsize(1) must exist"));
        Self { inner: Mutex::new(LruCache::new(nz)) }
    }

    pub fn get_or_compile(&self, rm: &RegexMatch) -> Option<regex::Regex> {
        let mut cache = self.inner.lock();
        if let Some(compiled) = cache.get(rm) {
            return compiled.clone();
        }
        let compiled = rm.build();
        cache.put(rm.clone(), compiled.clone());
        compiled
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl Default for RegexCache {
    fn default() -> Self {
        Self::new(REGEX_CACHE_CAP)
    }
}

impl fmt::Debug for RegexCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegexCache").field("len", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regex_cache_reuses_compilations() {
        let cache = RegexCache::new(4);
        let rm = RegexMatch { pattern: "^foo".into(), options: "i".into() };
        let first = cache.get_or_compile(&rm);
        assert!(first.is_some_and(|re| re.is_match("FOO bar")));
        assert_eq!(cache.len(), 1);
        let again = cache.get_or_compile(&rm);
        assert!(again.is_some());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn regex_cache_remembers_bad_patterns() {
        let cache = RegexCache::new(4);
        let rm = RegexMatch { pattern: "(".into(), options: String::new() };
        assert!(cache.get_or_compile(&rm).is_none());
        assert!(cache.get_or_compile(&rm).is_none());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn type_check_number_spans_numeric_types() {
        assert!(TypeCheck::Number.matches(&Bson::Int32(1)));
        assert!(TypeCheck::Number.matches(&Bson::Int64(1)));
        assert!(TypeCheck::Number.matches(&Bson::Double(1.5)));
        assert!(!TypeCheck::Number.matches(&Bson::String("1".into())));
    }
}
