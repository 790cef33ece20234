//! Total ordering over BSON values in the canonical cross-type order.
//!
//! Every comparison in the engine funnels through [`compare_values`]: filter
//! operators, `$min`/`$max` updates, group accumulators, and equality checks.
//! Sort has its own entry point because arrays sort by a representative
//! element rather than as whole values.

use std::cmp::Ordering;

use bson::{Binary, Bson, Document};

/// Direction for order-sensitive comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// Canonical cross-type rank. Values of different ranks order by rank alone:
/// MinKey < Null < Numbers < String < Document < Array < Binary < ObjectID <
/// Boolean < DateTime < Timestamp < Regex < MaxKey.
#[must_use]
pub fn type_order(v: &Bson) -> u8 {
    match v {
        Bson::MinKey => 0,
        Bson::Undefined | Bson::Null => 2,
        Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_) => 3,
        Bson::String(_) | Bson::Symbol(_) => 4,
        Bson::Document(_) => 5,
        Bson::Array(_) => 6,
        Bson::Binary(_) => 7,
        Bson::ObjectId(_) => 8,
        Bson::Boolean(_) => 9,
        Bson::DateTime(_) => 10,
        Bson::Timestamp(_) => 11,
        Bson::RegularExpression(_) => 12,
        Bson::JavaScriptCode(_) => 13,
        Bson::JavaScriptCodeWithScope(_) => 14,
        Bson::DbPointer(_) => 15,
        Bson::MaxKey => 16,
    }
}

/// True when both values fall in the same comparison class, meaning an
/// order between them is meaningful rather than a rank artifact.
#[must_use]
pub fn same_type_class(a: &Bson, b: &Bson) -> bool {
    type_order(a) == type_order(b)
}

/// Compares two values in the canonical total order.
///
/// Numbers compare by mathematical value across int32/int64/double, with
/// NaN equal to itself and below every other number. Documents compare
/// field-by-field in insertion order, so a strict prefix sorts first and
/// reordered keys are unequal. Arrays compare element-wise, shorter first
/// on a tie.
#[must_use]
pub fn compare_values(a: &Bson, b: &Bson) -> Ordering {
    let rank = type_order(a).cmp(&type_order(b));
    if rank != Ordering::Equal {
        return rank;
    }
    match (a, b) {
        (Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_), _) => {
            cmp_numbers(a, b)
        }
        (Bson::String(x) | Bson::Symbol(x), Bson::String(y) | Bson::Symbol(y)) => x.cmp(y),
        (Bson::Document(x), Bson::Document(y)) => cmp_documents(x, y),
        (Bson::Array(x), Bson::Array(y)) => cmp_arrays(x, y),
        (Bson::Binary(x), Bson::Binary(y)) => cmp_binary(x, y),
        (Bson::ObjectId(x), Bson::ObjectId(y)) => x.bytes().cmp(&y.bytes()),
        (Bson::Boolean(x), Bson::Boolean(y)) => x.cmp(y),
        (Bson::DateTime(x), Bson::DateTime(y)) => {
            x.timestamp_millis().cmp(&y.timestamp_millis())
        }
        (Bson::Timestamp(x), Bson::Timestamp(y)) => {
            (x.time, x.increment).cmp(&(y.time, y.increment))
        }
        (Bson::RegularExpression(x), Bson::RegularExpression(y)) => {
            x.pattern.cmp(&y.pattern).then_with(|| x.options.cmp(&y.options))
        }
        (Bson::JavaScriptCode(x), Bson::JavaScriptCode(y)) => x.cmp(y),
        (Bson::JavaScriptCodeWithScope(x), Bson::JavaScriptCodeWithScope(y)) => {
            x.code.cmp(&y.code).then_with(|| cmp_documents(&x.scope, &y.scope))
        }
        (Bson::DbPointer(x), Bson::DbPointer(y)) => format!("{x:?}").cmp(&format!("{y:?}")),
        // Same-rank pairs with no inner state: MinKey, MaxKey, Null/Undefined.
        _ => Ordering::Equal,
    }
}

/// True when the two values compare equal in the canonical order.
#[must_use]
pub fn values_equal(a: &Bson, b: &Bson) -> bool {
    compare_values(a, b) == Ordering::Equal
}

/// Equality used for update modification tracking: numbers must also keep
/// their subtype, so writing `2.0` over an int32 `2` counts as a change.
#[must_use]
pub fn same_value_for_update(a: &Bson, b: &Bson) -> bool {
    if !values_equal(a, b) {
        return false;
    }
    match (a, b) {
        (Bson::Int32(_), Bson::Int32(_))
        | (Bson::Int64(_), Bson::Int64(_))
        | (Bson::Double(_), Bson::Double(_))
        | (Bson::Decimal128(_), Bson::Decimal128(_)) => true,
        (Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_), _) => false,
        _ => true,
    }
}

/// Compares two sort keys under the given direction, returning the final
/// ordering (callers sort ascending by the result).
///
/// Arrays do not sort as whole values: the smallest element stands in for
/// ascending order and the largest for descending, and the empty array sorts
/// below every other value including Null. Missing fields must be
/// substituted with Null by the caller.
#[must_use]
pub fn compare_for_sort(a: &Bson, b: &Bson, order: SortOrder) -> Ordering {
    match (is_empty_array(a), is_empty_array(b)) {
        (true, true) => return Ordering::Equal,
        (true, false) => {
            return match order {
                SortOrder::Ascending => Ordering::Less,
                SortOrder::Descending => Ordering::Greater,
            };
        }
        (false, true) => {
            return match order {
                SortOrder::Ascending => Ordering::Greater,
                SortOrder::Descending => Ordering::Less,
            };
        }
        (false, false) => {}
    }
    let ord = compare_values(sort_element(a, order), sort_element(b, order));
    match order {
        SortOrder::Ascending => ord,
        SortOrder::Descending => ord.reverse(),
    }
}

fn is_empty_array(v: &Bson) -> bool {
    matches!(v, Bson::Array(items) if items.is_empty())
}

/// Representative element of an array for sort purposes: the minimum for
/// ascending order, the maximum for descending. Non-arrays stand for
/// themselves.
fn sort_element(v: &Bson, order: SortOrder) -> &Bson {
    let Bson::Array(items) = v else {
        return v;
    };
    let Some(mut best) = items.first() else {
        return v;
    };
    for e in &items[1..] {
        let better = match order {
            SortOrder::Ascending => compare_values(e, best) == Ordering::Less,
            SortOrder::Descending => compare_values(e, best) == Ordering::Greater,
        };
        if better {
            best = e;
        }
    }
    best
}

fn cmp_numbers(a: &Bson, b: &Bson) -> Ordering {
    match (a, b) {
        (Bson::Int32(x), Bson::Int32(y)) => x.cmp(y),
        (Bson::Int64(x), Bson::Int64(y)) => x.cmp(y),
        (Bson::Int32(x), Bson::Int64(y)) => i64::from(*x).cmp(y),
        (Bson::Int64(x), Bson::Int32(y)) => x.cmp(&i64::from(*y)),
        (Bson::Double(x), Bson::Double(y)) => cmp_f64(*x, *y),
        (Bson::Double(x), Bson::Int32(y)) => cmp_f64_i64(*x, i64::from(*y)),
        (Bson::Double(x), Bson::Int64(y)) => cmp_f64_i64(*x, *y),
        (Bson::Int32(x), Bson::Double(y)) => cmp_f64_i64(*y, i64::from(*x)).reverse(),
        (Bson::Int64(x), Bson::Double(y)) => cmp_f64_i64(*y, *x).reverse(),
        (Bson::Decimal128(x), Bson::Decimal128(y)) => x.bytes().cmp(&y.bytes()),
        // Decimal128 is rejected at the storage boundary; keep the order
        // total by placing it after the binary numerics.
        (Bson::Decimal128(_), _) => Ordering::Greater,
        (_, Bson::Decimal128(_)) => Ordering::Less,
        _ => Ordering::Equal,
    }
}

/// Doubles in the canonical order: NaN equals NaN and sits below every
/// other double, negative zero equals positive zero.
fn cmp_f64(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
    }
}

/// Exact double-vs-int64 comparison without rounding the integer through
/// a double. The truncated double is representable as i64 once the 2^63
/// range check has passed.
fn cmp_f64_i64(f: f64, i: i64) -> Ordering {
    if f.is_nan() {
        return Ordering::Less;
    }
    if f == f64::INFINITY {
        return Ordering::Greater;
    }
    if f == f64::NEG_INFINITY {
        return Ordering::Less;
    }
    // 9.223372036854776e18 is 2^63 exactly.
    if f >= 9.223_372_036_854_776e18 {
        return Ordering::Greater;
    }
    if f < -9.223_372_036_854_776e18 {
        return Ordering::Less;
    }
    let trunc = f.trunc();
    #[allow(clippy::cast_possible_truncation)]
    let whole = trunc as i64;
    match whole.cmp(&i) {
        Ordering::Equal if f > trunc => Ordering::Greater,
        Ordering::Equal if f < trunc => Ordering::Less,
        other => other,
    }
}

fn cmp_documents(a: &Document, b: &Document) -> Ordering {
    let mut left = a.iter();
    let mut right = b.iter();
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some((ka, va)), Some((kb, vb))) => {
                let ord = type_order(va)
                    .cmp(&type_order(vb))
                    .then_with(|| ka.as_str().cmp(kb.as_str()))
                    .then_with(|| compare_values(va, vb));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

fn cmp_arrays(a: &[Bson], b: &[Bson]) -> Ordering {
    for (x, y) in a.iter().zip(b.iter()) {
        let ord = compare_values(x, y);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.len().cmp(&b.len())
}

/// Binary values order by length first, then subtype, then bytes.
fn cmp_binary(a: &Binary, b: &Binary) -> Ordering {
    a.bytes
        .len()
        .cmp(&b.bytes.len())
        .then_with(|| u8::from(a.subtype).cmp(&u8::from(b.subtype)))
        .then_with(|| a.bytes.cmp(&b.bytes))
}
