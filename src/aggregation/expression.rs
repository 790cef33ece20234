//! Aggregation expressions: field references, literals, and the operator
//! set shared by `$expr` filters, `$group` keys, and accumulator operands.

use std::cmp::Ordering;

use bson::{Bson, Document};

use crate::compare::compare_values;
use crate::document::{FindOpts, Path, find_values, format_value, type_alias};
use crate::errors::CommandError;

/// Compiled aggregation expression.
///
/// Compilation validates operator names and arity up front, so evaluation is
/// infallible. `evaluate` returns `None` when a field reference resolves to
/// nothing; the context decides what absence means (Null inside operator
/// arguments and containers, falsy under `$expr`, a Null group key).
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// A value emitted as-is, including `$literal` operands.
    Constant(Bson),
    /// `"$a.b"`, resolved against the input document.
    FieldPath(Path),
    /// A plain document; every value is an embedded expression.
    Document(Vec<(String, Expression)>),
    /// An array literal; every element is an embedded expression.
    Array(Vec<Expression>),
    /// `$eq`/`$ne`/`$gt`/`$gte`/`$lt`/`$lte` over exactly two operands.
    Compare(Comparison, Box<(Expression, Expression)>),
    And(Vec<Expression>),
    Or(Vec<Expression>),
    Not(Box<Expression>),
    /// `$sum` in operator position. A single operand resolving to an array
    /// is folded element-wise; with several operands, array values are
    /// ignored.
    Sum(Vec<Expression>),
    /// `$type`: the operand's type alias, `"missing"` when absent.
    Type(Box<Expression>),
}

/// Comparison kind under [`Expression::Compare`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl Comparison {
    fn holds(self, left: &Bson, right: &Bson) -> bool {
        let ord = compare_values(left, right);
        match self {
            Self::Eq => ord == Ordering::Equal,
            Self::Ne => ord != Ordering::Equal,
            Self::Gt => ord == Ordering::Greater,
            Self::Gte => ord != Ordering::Less,
            Self::Lt => ord == Ordering::Less,
            Self::Lte => ord != Ordering::Greater,
        }
    }
}

impl Expression {
    /// Compiles an expression operand.
    ///
    /// Strings starting with `$` become field references, documents with a
    /// `$`-prefixed key become operators, and remaining documents and arrays
    /// are containers whose members compile recursively.
    ///
    /// # Errors
    /// Unknown operators, wrong operator arity, and malformed field
    /// references are rejected.
    pub fn compile(value: &Bson) -> Result<Self, CommandError> {
        match value {
            Bson::String(s) if s.starts_with('$') => compile_reference(s),
            Bson::Document(doc) if doc.keys().any(|k| k.starts_with('$')) => {
                compile_operator(doc)
            }
            Bson::Document(doc) => {
                let mut fields = Vec::with_capacity(doc.len());
                for (key, v) in doc {
                    fields.push((key.clone(), Self::compile(v)?));
                }
                Ok(Self::Document(fields))
            }
            Bson::Array(arr) => {
                let elems = arr.iter().map(Self::compile).collect::<Result<Vec<_>, _>>()?;
                Ok(Self::Array(elems))
            }
            other => Ok(Self::Constant(other.clone())),
        }
    }

    /// Evaluates the expression against `doc`. `None` means a referenced
    /// field does not exist.
    #[must_use]
    pub fn evaluate(&self, doc: &Document) -> Option<Bson> {
        match self {
            Self::Constant(v) => Some(v.clone()),
            Self::FieldPath(path) => resolve_reference(doc, path),
            Self::Document(fields) => {
                let mut out = Document::new();
                for (key, expr) in fields {
                    out.insert(key.clone(), expr.evaluate(doc).unwrap_or(Bson::Null));
                }
                Some(Bson::Document(out))
            }
            Self::Array(elems) => {
                let vals = elems.iter().map(|e| e.evaluate(doc).unwrap_or(Bson::Null)).collect();
                Some(Bson::Array(vals))
            }
            Self::Compare(cmp, pair) => {
                let left = pair.0.evaluate(doc).unwrap_or(Bson::Null);
                let right = pair.1.evaluate(doc).unwrap_or(Bson::Null);
                Some(Bson::Boolean(cmp.holds(&left, &right)))
            }
            Self::And(operands) => {
                Some(Bson::Boolean(operands.iter().all(|e| truthy(e.evaluate(doc).as_ref()))))
            }
            Self::Or(operands) => {
                Some(Bson::Boolean(operands.iter().any(|e| truthy(e.evaluate(doc).as_ref()))))
            }
            Self::Not(operand) => Some(Bson::Boolean(!truthy(operand.evaluate(doc).as_ref()))),
            Self::Sum(operands) => {
                let mut sum = NumberSum::default();
                for operand in operands {
                    match operand.evaluate(doc) {
                        Some(Bson::Array(elems)) if operands.len() == 1 => {
                            for elem in &elems {
                                sum.add(elem);
                            }
                        }
                        Some(v) => sum.add(&v),
                        None => {}
                    }
                }
                Some(sum.into_bson())
            }
            Self::Type(operand) => {
                let alias = operand.evaluate(doc).map_or("missing", |v| type_alias(&v));
                Some(Bson::String(alias.to_owned()))
            }
        }
    }
}

/// Boolean coercion for logic operators and `$expr`. Missing is falsy.
pub(super) fn truthy(v: Option<&Bson>) -> bool {
    match v {
        Some(Bson::Boolean(b)) => *b,
        Some(Bson::Int32(n)) => *n != 0,
        Some(Bson::Int64(n)) => *n != 0,
        Some(Bson::Double(d)) => *d != 0.0,
        Some(Bson::Null | Bson::Undefined) | None => false,
        Some(_) => true,
    }
}

/// Compiles a `$`-prefixed string. Variable references (`$$name`) are
/// validated for shape but not supported.
fn compile_reference(s: &str) -> Result<Expression, CommandError> {
    if let Some(var) = s.strip_prefix("$$") {
        if var.is_empty() {
            return Err(CommandError::FailedToParse(
                "empty variable names are not allowed".into(),
            ));
        }
        if var.starts_with('$') {
            return Err(CommandError::FailedToParse(format!(
                "'{var}' starts with an invalid character for a user variable name"
            )));
        }
        return Err(CommandError::NotImplemented(
            "Aggregation expression variables are not implemented yet".into(),
        ));
    }
    let rest = &s[1..];
    if rest.is_empty() {
        return Err(CommandError::Location(
            16872,
            "'$' by itself is not a valid FieldPath".into(),
        ));
    }
    if rest.split('.').any(str::is_empty) {
        return Err(CommandError::Location(
            15998,
            "FieldPath field names may not be empty strings.".into(),
        ));
    }
    Ok(Expression::FieldPath(Path::parse(rest)?))
}

fn compile_operator(doc: &Document) -> Result<Expression, CommandError> {
    let one_field = || {
        CommandError::Location(
            15983,
            format!(
                "An object representing an expression must have exactly one field: {}",
                format_value(&Bson::Document(doc.clone()))
            ),
        )
    };
    let mut fields = doc.iter();
    let Some((op, operand)) = fields.next() else {
        return Err(one_field());
    };
    if fields.next().is_some() {
        return Err(one_field());
    }

    match op.as_str() {
        "$literal" => Ok(Expression::Constant(operand.clone())),
        "$eq" => compile_compare(Comparison::Eq, "$eq", operand),
        "$ne" => compile_compare(Comparison::Ne, "$ne", operand),
        "$gt" => compile_compare(Comparison::Gt, "$gt", operand),
        "$gte" => compile_compare(Comparison::Gte, "$gte", operand),
        "$lt" => compile_compare(Comparison::Lt, "$lt", operand),
        "$lte" => compile_compare(Comparison::Lte, "$lte", operand),
        "$and" => Ok(Expression::And(compile_args(operand)?)),
        "$or" => Ok(Expression::Or(compile_args(operand)?)),
        "$not" => Ok(Expression::Not(Box::new(compile_unary("$not", operand)?))),
        "$sum" => Ok(Expression::Sum(compile_args(operand)?)),
        "$type" => Ok(Expression::Type(Box::new(compile_unary("$type", operand)?))),
        other => Err(CommandError::InvalidPipelineOperator(format!(
            "Unrecognized expression '{other}'"
        ))),
    }
}

/// Operator arguments: an array operand supplies one argument per element,
/// anything else is a single argument.
fn compile_args(operand: &Bson) -> Result<Vec<Expression>, CommandError> {
    match operand {
        Bson::Array(arr) => arr.iter().map(Expression::compile).collect(),
        other => Ok(vec![Expression::compile(other)?]),
    }
}

fn compile_compare(
    cmp: Comparison,
    name: &str,
    operand: &Bson,
) -> Result<Expression, CommandError> {
    let args = compile_args(operand)?;
    let n = args.len();
    let mut it = args.into_iter();
    if let (Some(left), Some(right), None) = (it.next(), it.next(), it.next()) {
        return Ok(Expression::Compare(cmp, Box::new((left, right))));
    }
    Err(arity_error(name, 2, n))
}

fn compile_unary(name: &str, operand: &Bson) -> Result<Expression, CommandError> {
    let args = compile_args(operand)?;
    let n = args.len();
    let mut it = args.into_iter();
    if let (Some(arg), None) = (it.next(), it.next()) {
        return Ok(arg);
    }
    Err(arity_error(name, 1, n))
}

fn arity_error(name: &str, takes: usize, got: usize) -> CommandError {
    CommandError::Location(
        16020,
        format!("Expression {name} takes exactly {takes} arguments. {got} were passed in."),
    )
}

/// Resolves a field reference. Numeric segments never index into arrays, but
/// a path under an array prefix fans through the array's document elements
/// and collects whatever it finds into an array.
fn resolve_reference(doc: &Document, path: &Path) -> Option<Bson> {
    if path.is_single() {
        return doc.get(path.head()).cloned();
    }
    let prefix_is_array = matches!(doc.get(path.head()), Some(Bson::Array(_)));
    let mut found = find_values(doc, path, FindOpts { array_index: false, array_documents: true });
    if found.is_empty() {
        return prefix_is_array.then(|| Bson::Array(Vec::new()));
    }
    if found.len() == 1 && !prefix_is_array {
        return found.pop();
    }
    Some(Bson::Array(found))
}

/// Running total with the numeric widening ladder shared by the `$sum`
/// operator and the `$sum`/`$avg` accumulators: int32 stays int32 until the
/// total needs int64, any double forces a double result.
#[derive(Debug, Default)]
pub(super) struct NumberSum {
    ints: i128,
    doubles: f64,
    has_double: bool,
    has_long: bool,
}

impl NumberSum {
    /// Folds one value in; non-numeric values are ignored.
    pub(super) fn add(&mut self, v: &Bson) {
        match v {
            Bson::Int32(n) => self.ints += i128::from(*n),
            Bson::Int64(n) => {
                self.has_long = true;
                self.ints += i128::from(*n);
            }
            Bson::Double(d) => {
                self.has_double = true;
                self.doubles += d;
            }
            _ => {}
        }
    }

    #[allow(clippy::cast_precision_loss)]
    pub(super) fn into_bson(self) -> Bson {
        if self.has_double {
            return Bson::Double(self.doubles + self.ints as f64);
        }
        match i64::try_from(self.ints) {
            Ok(n) => {
                if !self.has_long
                    && let Ok(small) = i32::try_from(n)
                {
                    Bson::Int32(small)
                } else {
                    Bson::Int64(n)
                }
            }
            // The integer total no longer fits an int64.
            Err(_) => Bson::Double(self.ints as f64),
        }
    }
}
