//! Filter document compilation.
//!
//! All operand validation happens here; the resulting [`Filter`] tree
//! evaluates without errors. Messages and codes mirror the wire protocol's
//! own wording, down to spacing.

use bson::{Bson, Document};

use super::types::{
    ElemMatchCheck, FieldCheck, FieldOp, Filter, InMember, NotCheck, RegexMatch, TypeCheck,
};
use crate::aggregation::Expression;
use crate::document::{Path, format_value};
use crate::errors::CommandError;

// 9.223372036854776e18 is 2^63 exactly.
pub(super) const I64_EDGE: f64 = 9.223_372_036_854_776e18;

impl Filter {
    /// Compiles a filter document into a predicate tree. Top-level entries
    /// AND together.
    pub fn compile(filter: &Document) -> Result<Self, CommandError> {
        let mut clauses = Vec::with_capacity(filter.len());
        for (key, value) in filter {
            clauses.push(compile_entry(key, value)?);
        }
        if clauses.is_empty() {
            return Ok(Self::Always);
        }
        if clauses.len() == 1 {
            return Ok(clauses.swap_remove(0));
        }
        Ok(Self::And(clauses))
    }
}

fn compile_entry(key: &str, value: &Bson) -> Result<Filter, CommandError> {
    if let Some(op) = key.strip_prefix('$') {
        return compile_top_operator(op, value);
    }
    let path = Path::parse(key)?;
    let check = compile_field_check(key, value)?;
    Ok(Filter::Field { path, check })
}

fn compile_top_operator(op: &str, value: &Bson) -> Result<Filter, CommandError> {
    match op {
        "and" | "or" | "nor" => {
            let Bson::Array(exprs) = value else {
                return Err(CommandError::BadValue(format!("${op} must be an array")));
            };
            if exprs.is_empty() {
                return Err(CommandError::BadValue(
                    "$and/$or/$nor must be a nonempty array".into(),
                ));
            }
            // Shape errors for every element come before any compilation.
            let mut docs = Vec::with_capacity(exprs.len());
            for expr in exprs {
                let Bson::Document(d) = expr else {
                    return Err(CommandError::BadValue(
                        "$or/$and/$nor entries need to be full objects".into(),
                    ));
                };
                docs.push(d);
            }
            let subs =
                docs.iter().map(|d| Filter::compile(d)).collect::<Result<Vec<_>, _>>()?;
            Ok(match op {
                "and" => Filter::And(subs),
                "or" => Filter::Or(subs),
                _ => Filter::Nor(subs),
            })
        }
        "comment" => Ok(Filter::Always),
        "expr" => Ok(Filter::Expr(Expression::compile(value)?)),
        // An unrecognized top-level operator selects nothing.
        _ => Ok(Filter::Never),
    }
}

/// Compiles the value side of `{field: value}`.
pub(super) fn compile_field_check(field: &str, value: &Bson) -> Result<FieldCheck, CommandError> {
    match value {
        Bson::Document(expr) => compile_operand_doc(field, expr),
        Bson::RegularExpression(re) => {
            let rm = RegexMatch {
                pattern: re.pattern.to_string(),
                options: check_regex_options(re.options.as_str())?,
            };
            Ok(FieldCheck::Ops(vec![FieldOp::Regex(rm)]))
        }
        other => Ok(FieldCheck::Equals(other.clone())),
    }
}

fn compile_operand_doc(field: &str, expr: &Document) -> Result<FieldCheck, CommandError> {
    if expr.is_empty() {
        return Ok(FieldCheck::Equals(Bson::Document(expr.clone())));
    }
    if expr.keys().any(|k| !k.starts_with('$')) {
        // A plain key anywhere in the operand turns the whole operand into
        // a document-equality match.
        return Ok(FieldCheck::Equals(Bson::Document(expr.clone())));
    }
    let mut ops = Vec::with_capacity(expr.len());
    for (key, operand) in expr {
        if key == "$options" {
            // Consumed by `$regex`; standalone it applies to nothing.
            continue;
        }
        ops.push(compile_field_op(field, key, operand, expr)?);
    }
    Ok(FieldCheck::Ops(ops))
}

fn compile_field_op(
    field: &str,
    op: &str,
    operand: &Bson,
    expr: &Document,
) -> Result<FieldOp, CommandError> {
    match op {
        "$eq" => Ok(FieldOp::Eq(operand.clone())),
        "$ne" => {
            if matches!(operand, Bson::RegularExpression(_)) {
                return Err(CommandError::BadValue("Can't have regex as arg to $ne.".into()));
            }
            Ok(FieldOp::Ne(operand.clone()))
        }
        "$gt" | "$gte" | "$lt" | "$lte" => {
            if matches!(operand, Bson::RegularExpression(_)) {
                return Err(CommandError::BadValue(format!(
                    "Can't have RegEx as arg to predicate over field '{field}'."
                )));
            }
            Ok(match op {
                "$gt" => FieldOp::Gt(operand.clone()),
                "$gte" => FieldOp::Gte(operand.clone()),
                "$lt" => FieldOp::Lt(operand.clone()),
                _ => FieldOp::Lte(operand.clone()),
            })
        }
        "$in" => Ok(FieldOp::In(compile_in_members("$in", operand)?)),
        "$nin" => Ok(FieldOp::Nin(compile_in_members("$nin", operand)?)),
        "$exists" => Ok(FieldOp::Exists(truthy(operand))),
        "$type" => compile_type(operand),
        "$size" => Ok(FieldOp::Size(parse_size(operand)?)),
        "$all" => {
            let Bson::Array(required) = operand else {
                return Err(CommandError::BadValue("$all needs an array".into()));
            };
            Ok(FieldOp::All(required.clone()))
        }
        "$mod" => compile_mod(operand),
        "$regex" => Ok(FieldOp::Regex(compile_regex_operand(operand, expr.get("$options"))?)),
        "$not" => compile_not(field, operand, expr),
        "$elemMatch" => compile_elem_match(field, operand),
        "$bitsAllClear" | "$bitsAllSet" | "$bitsAnyClear" | "$bitsAnySet" => {
            Err(CommandError::NotImplemented(format!("{op} is not implemented yet")))
        }
        _ => Err(CommandError::BadValue(format!("unknown operator: {op}"))),
    }
}

fn compile_in_members(op: &str, operand: &Bson) -> Result<Vec<InMember>, CommandError> {
    let Bson::Array(values) = operand else {
        return Err(CommandError::BadValue(format!("{op} needs an array")));
    };
    let mut members = Vec::with_capacity(values.len());
    for v in values {
        match v {
            Bson::Document(d) if d.keys().any(|k| k.starts_with('$')) => {
                return Err(CommandError::BadValue("cannot nest $ under $in".into()));
            }
            Bson::RegularExpression(re) => {
                members.push(InMember::Regex(RegexMatch {
                    pattern: re.pattern.to_string(),
                    options: check_regex_options(re.options.as_str())?,
                }));
            }
            other => members.push(InMember::Value(other.clone())),
        }
    }
    Ok(members)
}

/// MongoDB truthiness: zero numbers, false, and null are false; everything
/// else (including NaN and the empty string) is true.
fn truthy(v: &Bson) -> bool {
    match v {
        Bson::Boolean(b) => *b,
        Bson::Int32(n) => *n != 0,
        Bson::Int64(n) => *n != 0,
        Bson::Double(d) => *d != 0.0,
        Bson::Null | Bson::Undefined => false,
        _ => true,
    }
}

fn compile_type(operand: &Bson) -> Result<FieldOp, CommandError> {
    let checks = match operand {
        Bson::Array(codes) => {
            let mut checks = Vec::with_capacity(codes.len());
            for code in codes {
                checks.push(single_type_check(code)?);
            }
            checks
        }
        other => vec![single_type_check(other)?],
    };
    Ok(FieldOp::Type(checks))
}

fn single_type_check(code: &Bson) -> Result<TypeCheck, CommandError> {
    match code {
        Bson::String(alias) => type_check_from_alias(alias),
        Bson::Int32(n) => type_check_from_code(i64::from(*n)),
        Bson::Double(d) => {
            if d.is_nan() {
                return Err(CommandError::BadValue("Invalid numerical type code: nan".into()));
            }
            if *d == f64::INFINITY {
                return Err(CommandError::BadValue("Invalid numerical type code: inf".into()));
            }
            if *d == f64::NEG_INFINITY {
                return Err(CommandError::BadValue("Invalid numerical type code: -inf".into()));
            }
            if d.trunc() != *d {
                return Err(CommandError::BadValue(format!("Invalid numerical type code: {d}")));
            }
            #[allow(clippy::cast_possible_truncation)]
            type_check_from_code(*d as i64)
        }
        other => Err(CommandError::BadValue(format!(
            "Invalid numerical type code: {}",
            format_value(other)
        ))),
    }
}

fn type_check_from_code(code: i64) -> Result<TypeCheck, CommandError> {
    match code {
        1 => Ok(TypeCheck::Double),
        2 => Ok(TypeCheck::String),
        3 => Ok(TypeCheck::Object),
        4 => Ok(TypeCheck::Array),
        5 => Ok(TypeCheck::BinData),
        7 => Ok(TypeCheck::ObjectId),
        8 => Ok(TypeCheck::Bool),
        9 => Ok(TypeCheck::Date),
        10 => Ok(TypeCheck::Null),
        11 => Ok(TypeCheck::Regex),
        16 => Ok(TypeCheck::Int),
        17 => Ok(TypeCheck::Timestamp),
        18 => Ok(TypeCheck::Long),
        19 | -1 | 127 => {
            Err(CommandError::NotImplemented(format!("Type code {code} not implemented")))
        }
        _ => Err(CommandError::BadValue(format!("Invalid numerical type code: {code}"))),
    }
}

fn type_check_from_alias(alias: &str) -> Result<TypeCheck, CommandError> {
    match alias {
        "double" => Ok(TypeCheck::Double),
        "string" => Ok(TypeCheck::String),
        "object" => Ok(TypeCheck::Object),
        "array" => Ok(TypeCheck::Array),
        "binData" => Ok(TypeCheck::BinData),
        "objectId" => Ok(TypeCheck::ObjectId),
        "bool" => Ok(TypeCheck::Bool),
        "date" => Ok(TypeCheck::Date),
        "null" => Ok(TypeCheck::Null),
        "regex" => Ok(TypeCheck::Regex),
        "int" => Ok(TypeCheck::Int),
        "timestamp" => Ok(TypeCheck::Timestamp),
        "long" => Ok(TypeCheck::Long),
        "number" => Ok(TypeCheck::Number),
        "decimal" => Err(CommandError::NotImplemented("Type code 19 not implemented".into())),
        "minKey" => Err(CommandError::NotImplemented("Type code -1 not implemented".into())),
        "maxKey" => Err(CommandError::NotImplemented("Type code 127 not implemented".into())),
        _ => Err(CommandError::BadValue(format!("Unknown type name alias: {alias}"))),
    }
}

fn parse_size(operand: &Bson) -> Result<i64, CommandError> {
    let n = match operand {
        Bson::Int32(n) => i64::from(*n),
        Bson::Int64(n) => *n,
        Bson::Double(d) => {
            if d.is_infinite() || *d > I64_EDGE || *d < -I64_EDGE {
                return Err(CommandError::BadValue(format!(
                    "Failed to parse $size. Cannot represent as a 64-bit integer: $size: {}",
                    format_value(operand)
                )));
            }
            if d.trunc() != *d {
                return Err(CommandError::BadValue(format!(
                    "Failed to parse $size. Expected an integer: $size: {}",
                    format_value(operand)
                )));
            }
            #[allow(clippy::cast_possible_truncation)]
            {
                *d as i64
            }
        }
        _ => {
            return Err(CommandError::BadValue(format!(
                "Failed to parse $size. Expected a number in: $size: {}",
                format_value(operand)
            )));
        }
    };
    if n < 0 {
        return Err(CommandError::BadValue(format!(
            "Failed to parse $size. Expected a non-negative number in: $size: {}",
            format_value(operand)
        )));
    }
    Ok(n)
}

fn compile_mod(operand: &Bson) -> Result<FieldOp, CommandError> {
    let Bson::Array(parts) = operand else {
        return Err(CommandError::BadValue("malformed mod, needs to be an array".into()));
    };
    if parts.len() < 2 {
        return Err(CommandError::BadValue("malformed mod, not enough elements".into()));
    }
    if parts.len() > 2 {
        return Err(CommandError::BadValue("malformed mod, too many elements".into()));
    }
    let divisor = parse_mod_part(&parts[0], "divisor")?;
    let remainder = parse_mod_part(&parts[1], "remainder")?;
    if divisor == 0 {
        // Accepted, selects nothing.
        return Ok(FieldOp::Never);
    }
    Ok(FieldOp::Mod { divisor, remainder })
}

fn parse_mod_part(v: &Bson, part: &str) -> Result<i64, CommandError> {
    match v {
        Bson::Int32(n) => Ok(i64::from(*n)),
        Bson::Int64(n) => Ok(*n),
        Bson::Double(d) => {
            if d.is_nan() || d.is_infinite() {
                return Err(CommandError::BadValue(format!(
                    "malformed mod, {part} value is invalid :: caused by :: \
                     Unable to coerce NaN/Inf to integral type"
                )));
            }
            let t = d.trunc();
            if t >= I64_EDGE || t < -I64_EDGE {
                return Err(CommandError::BadValue(format!(
                    "malformed mod, {part} value is invalid :: caused by :: \
                     Out of bounds coercing to integral value"
                )));
            }
            #[allow(clippy::cast_possible_truncation)]
            Ok(t as i64)
        }
        _ => Err(CommandError::BadValue(format!("malformed mod, {part} not a number"))),
    }
}

fn compile_regex_operand(
    operand: &Bson,
    options: Option<&Bson>,
) -> Result<RegexMatch, CommandError> {
    let sibling = match options {
        None => None,
        Some(Bson::String(s)) => Some(s.as_str()),
        Some(_) => {
            return Err(CommandError::BadValue("$options has to be a string".into()));
        }
    };
    match operand {
        Bson::RegularExpression(re) => {
            if sibling.is_some() && !re.options.is_empty() {
                return Err(CommandError::Location(
                    51075,
                    "options set in both $regex and $options".into(),
                ));
            }
            let options = sibling.unwrap_or(re.options.as_str());
            Ok(RegexMatch {
                pattern: re.pattern.to_string(),
                options: check_regex_options(options)?,
            })
        }
        Bson::String(pattern) => Ok(RegexMatch {
            pattern: pattern.clone(),
            options: check_regex_options(sibling.unwrap_or(""))?,
        }),
        _ => Err(CommandError::BadValue("$regex has to be a string".into())),
    }
}

fn check_regex_options(options: &str) -> Result<String, CommandError> {
    for c in options.chars() {
        match c {
            'i' | 'm' | 's' => {}
            'x' => {
                return Err(CommandError::NotImplemented("option 'x' not implemented".into()));
            }
            _ => {
                return Err(CommandError::Location(
                    51108,
                    format!(" invalid flag in regex options: {c}"),
                ));
            }
        }
    }
    Ok(options.to_owned())
}

fn compile_not(field: &str, operand: &Bson, expr: &Document) -> Result<FieldOp, CommandError> {
    match operand {
        Bson::Document(inner) => {
            let check = compile_operand_doc(field, inner)?;
            Ok(FieldOp::Not(Box::new(NotCheck::Check(check))))
        }
        Bson::RegularExpression(_) => {
            // `$options` next to `$not` applies to the negated regex.
            let rm = compile_regex_operand(operand, expr.get("$options"))?;
            Ok(FieldOp::Not(Box::new(NotCheck::Regex(rm))))
        }
        _ => Err(CommandError::BadValue("$not needs a regex or a document".into())),
    }
}

fn compile_elem_match(field: &str, operand: &Bson) -> Result<FieldOp, CommandError> {
    let Bson::Document(expr) = operand else {
        return Err(CommandError::BadValue("$elemMatch needs an Object".into()));
    };
    for key in expr.keys() {
        match key.as_str() {
            "$text" | "$where" => {
                return Err(CommandError::BadValue(format!(
                    "{key} can only be applied to the top-level document"
                )));
            }
            "$and" | "$or" | "$nor" | "$ne" | "$not" => {
                return Err(CommandError::NotImplemented(format!(
                    "$elemMatch: support for {key} not implemented yet"
                )));
            }
            _ => {}
        }
    }
    if expr.len() > 1 {
        if let Some(plain) = expr.keys().find(|k| !k.starts_with('$')) {
            return Err(CommandError::BadValue(format!("unknown operator: {plain}")));
        }
    }
    if expr.keys().all(|k| k.starts_with('$')) {
        let mut ops = Vec::with_capacity(expr.len());
        for (key, sub) in expr {
            if key == "$options" {
                continue;
            }
            ops.push(compile_field_op(field, key, sub, expr)?);
        }
        return Ok(FieldOp::ElemMatch(ElemMatchCheck::Ops(ops)));
    }
    // A single plain key is a sub-filter over element documents.
    Ok(FieldOp::ElemMatch(ElemMatchCheck::Filter(Box::new(Filter::compile(expr)?))))
}

#[cfg(test)]
mod tests {
    use bson::{Bson, doc};

    use super::super::types::{FieldCheck, FieldOp, Filter};
    use crate::errors::CommandError;

    fn compile(filter: bson::Document) -> Result<Filter, CommandError> {
        Filter::compile(&filter)
    }

    #[test]
    fn empty_filter_matches_everything() {
        assert_eq!(compile(doc! {}).unwrap(), Filter::Always);
    }

    #[test]
    fn unknown_top_level_operator_selects_nothing() {
        assert_eq!(compile(doc! {"$recommended": 1}).unwrap(), Filter::Never);
    }

    #[test]
    fn logical_operators_validate_shape_first() {
        let err = compile(doc! {"$and": 1}).unwrap_err();
        assert_eq!(err.to_string(), "$and must be an array");

        let err = compile(doc! {"$or": []}).unwrap_err();
        assert_eq!(err.to_string(), "$and/$or/$nor must be a nonempty array");

        // The bad second entry is reported even though the first is fine.
        let err = compile(doc! {"$nor": [{"a": 1}, 2]}).unwrap_err();
        assert_eq!(err.to_string(), "$or/$and/$nor entries need to be full objects");
    }

    #[test]
    fn comment_is_a_noop() {
        assert_eq!(compile(doc! {"$comment": "scratch"}).unwrap(), Filter::Always);
    }

    #[test]
    fn plain_key_in_operand_doc_turns_into_equality() {
        let f = compile(doc! {"v": {"$gt": 1, "b": 2}}).unwrap();
        let Filter::Field { check: FieldCheck::Equals(operand), .. } = f else {
            panic!("expected equality fallback, got {f:?}");
        };
        assert_eq!(operand, Bson::Document(doc! {"$gt": 1, "b": 2}));
    }

    #[test]
    fn standalone_options_is_ignored() {
        let f = compile(doc! {"v": {"$options": "i"}}).unwrap();
        assert_eq!(
            f,
            Filter::Field {
                path: crate::document::Path::parse("v").unwrap(),
                check: FieldCheck::Ops(vec![]),
            }
        );
    }

    fn regex(pattern: &str, options: &str) -> Bson {
        Bson::RegularExpression(bson::Regex {
            pattern: pattern.try_into().unwrap(),
            options: options.try_into().unwrap(),
        })
    }

    #[test]
    fn range_operators_reject_regex_operands() {
        let err = compile(doc! {"v": {"$gt": regex("a", "")}}).unwrap_err();
        assert_eq!(err.to_string(), "Can't have RegEx as arg to predicate over field 'v'.");

        let err = compile(doc! {"v": {"$ne": regex("a", "")}}).unwrap_err();
        assert_eq!(err.to_string(), "Can't have regex as arg to $ne.");
    }

    #[test]
    fn in_rejects_operator_documents() {
        let err = compile(doc! {"v": {"$in": [{"$gt": 1}]}}).unwrap_err();
        assert_eq!(err.to_string(), "cannot nest $ under $in");

        let err = compile(doc! {"v": {"$nin": 5}}).unwrap_err();
        assert_eq!(err.to_string(), "$nin needs an array");
    }

    #[test]
    fn size_parse_errors_name_the_operand() {
        let err = compile(doc! {"v": {"$size": "two"}}).unwrap_err();
        assert_eq!(err.to_string(), "Failed to parse $size. Expected a number in: $size: \"two\"");

        let err = compile(doc! {"v": {"$size": 1.5}}).unwrap_err();
        assert_eq!(err.to_string(), "Failed to parse $size. Expected an integer: $size: 1.5");

        let err = compile(doc! {"v": {"$size": -1}}).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Failed to parse $size. Expected a non-negative number in: $size: -1"
        );

        let err = compile(doc! {"v": {"$size": f64::INFINITY}}).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Failed to parse $size. Cannot represent as a 64-bit integer: $size: +Inf"
        );
    }

    #[test]
    fn mod_validates_arity_then_parts_then_divisor() {
        let err = compile(doc! {"v": {"$mod": [1]}}).unwrap_err();
        assert_eq!(err.to_string(), "malformed mod, not enough elements");

        let err = compile(doc! {"v": {"$mod": [1, 2, 3]}}).unwrap_err();
        assert_eq!(err.to_string(), "malformed mod, too many elements");

        let err = compile(doc! {"v": {"$mod": ["a", 2]}}).unwrap_err();
        assert_eq!(err.to_string(), "malformed mod, divisor not a number");

        let err = compile(doc! {"v": {"$mod": [f64::NAN, 2]}}).unwrap_err();
        assert_eq!(
            err.to_string(),
            "malformed mod, divisor value is invalid :: caused by :: \
             Unable to coerce NaN/Inf to integral type"
        );

        // A zero divisor compiles to an unsatisfiable check.
        let f = compile(doc! {"v": {"$mod": [0, 0]}}).unwrap();
        assert_eq!(
            f,
            Filter::Field {
                path: crate::document::Path::parse("v").unwrap(),
                check: FieldCheck::Ops(vec![FieldOp::Never]),
            }
        );
    }

    #[test]
    fn type_code_validation() {
        let err = compile(doc! {"v": {"$type": f64::NAN}}).unwrap_err();
        assert_eq!(err.to_string(), "Invalid numerical type code: nan");

        let err = compile(doc! {"v": {"$type": 1.5}}).unwrap_err();
        assert_eq!(err.to_string(), "Invalid numerical type code: 1.5");

        let err = compile(doc! {"v": {"$type": 6}}).unwrap_err();
        assert_eq!(err.to_string(), "Invalid numerical type code: 6");

        let err = compile(doc! {"v": {"$type": "decimal"}}).unwrap_err();
        assert_eq!(err.code(), 238);
        assert_eq!(err.to_string(), "Type code 19 not implemented");

        let err = compile(doc! {"v": {"$type": "uuid"}}).unwrap_err();
        assert_eq!(err.to_string(), "Unknown type name alias: uuid");
    }

    #[test]
    fn regex_options_are_validated() {
        let err = compile(doc! {"v": {"$regex": "a", "$options": 1}}).unwrap_err();
        assert_eq!(err.to_string(), "$options has to be a string");

        let err = compile(doc! {"v": {"$regex": "a", "$options": "ig"}}).unwrap_err();
        assert_eq!(err.code(), 51108);
        assert_eq!(err.to_string(), " invalid flag in regex options: g");

        let err = compile(doc! {"v": {"$regex": "a", "$options": "x"}}).unwrap_err();
        assert_eq!(err.to_string(), "option 'x' not implemented");

        let err = compile(doc! {"v": {"$regex": regex("a", "i"), "$options": "m"}}).unwrap_err();
        assert_eq!(err.code(), 51075);
        assert_eq!(err.to_string(), "options set in both $regex and $options");

        let err = compile(doc! {"v": {"$regex": 7}}).unwrap_err();
        assert_eq!(err.to_string(), "$regex has to be a string");
    }

    #[test]
    fn not_requires_a_regex_or_document() {
        let err = compile(doc! {"v": {"$not": 5}}).unwrap_err();
        assert_eq!(err.to_string(), "$not needs a regex or a document");
    }

    #[test]
    fn elem_match_validation() {
        let err = compile(doc! {"v": {"$elemMatch": 5}}).unwrap_err();
        assert_eq!(err.to_string(), "$elemMatch needs an Object");

        let err = compile(doc! {"v": {"$elemMatch": {"$where": "1"}}}).unwrap_err();
        assert_eq!(err.to_string(), "$where can only be applied to the top-level document");

        let err = compile(doc! {"v": {"$elemMatch": {"$or": []}}}).unwrap_err();
        assert_eq!(err.to_string(), "$elemMatch: support for $or not implemented yet");

        let err = compile(doc! {"v": {"$elemMatch": {"$gt": 1, "b": 2}}}).unwrap_err();
        assert_eq!(err.to_string(), "unknown operator: b");
    }

    #[test]
    fn bit_operators_are_not_implemented() {
        let err = compile(doc! {"v": {"$bitsAllSet": 3}}).unwrap_err();
        assert_eq!(err.code(), 238);
        assert_eq!(err.to_string(), "$bitsAllSet is not implemented yet");
    }

    #[test]
    fn unknown_field_operator_is_an_error() {
        let err = compile(doc! {"v": {"$near": 1}}).unwrap_err();
        assert_eq!(err.to_string(), "unknown operator: $near");
    }

    #[test]
    fn dotted_path_with_empty_segment_is_rejected() {
        let err = compile(doc! {"a..b": 1}).unwrap_err();
        assert_eq!(err.code(), 15998);
    }
}
