//! `$group` stage: key expressions and accumulator folds.

use std::cmp::Ordering;

use bson::{Bson, Document};

use super::expression::{Expression, NumberSum};
use crate::compare::{compare_values, values_equal};
use crate::errors::CommandError;

/// Compiled `$group` specification: the `_id` key expression plus one
/// accumulator per output field.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupSpec {
    key: Expression,
    fields: Vec<(String, Accumulator)>,
}

#[derive(Debug, Clone, PartialEq)]
enum Accumulator {
    Sum(Expression),
    Count,
    Min(Expression),
    Max(Expression),
    Avg(Expression),
    First(Expression),
    Last(Expression),
}

impl GroupSpec {
    /// Compiles a `$group` operand document.
    ///
    /// # Errors
    /// A specification without `_id`, accumulator fields that are not
    /// single-operator documents, and unknown accumulator operators are
    /// rejected.
    pub fn compile(spec: &Document) -> Result<Self, CommandError> {
        let Some(id_value) = spec.get("_id") else {
            return Err(CommandError::Location(
                15955,
                "a group specification must include an _id".into(),
            ));
        };
        let key = Expression::compile(id_value)?;
        let mut fields = Vec::with_capacity(spec.len().saturating_sub(1));
        for (name, value) in spec {
            if name != "_id" {
                fields.push((name.clone(), compile_accumulator(name, value)?));
            }
        }
        Ok(Self { key, fields })
    }

    /// Folds `docs` into one output document per distinct key.
    ///
    /// Keys deduplicate by canonical equality in a linear scan, so NaN keys
    /// and cross-width numeric keys land in one group, and groups emit in
    /// first-seen order. A key the expression cannot resolve is Null.
    #[must_use]
    pub fn execute(&self, docs: &[Document]) -> Vec<Document> {
        let mut keys: Vec<Bson> = Vec::new();
        let mut groups: Vec<Vec<&Document>> = Vec::new();
        for doc in docs {
            let key = self.key.evaluate(doc).unwrap_or(Bson::Null);
            if let Some(i) = keys.iter().position(|k| values_equal(k, &key)) {
                groups[i].push(doc);
            } else {
                keys.push(key);
                groups.push(vec![doc]);
            }
        }
        keys.into_iter()
            .zip(groups)
            .map(|(key, members)| {
                let mut out = Document::new();
                out.insert("_id", key);
                for (name, acc) in &self.fields {
                    out.insert(name.clone(), acc.fold(&members));
                }
                out
            })
            .collect()
    }
}

impl Accumulator {
    #[allow(clippy::cast_precision_loss)]
    fn fold(&self, members: &[&Document]) -> Bson {
        match self {
            Self::Sum(expr) => {
                let mut sum = NumberSum::default();
                for doc in members {
                    if let Some(v) = expr.evaluate(doc) {
                        sum.add(&v);
                    }
                }
                sum.into_bson()
            }
            Self::Count => match i32::try_from(members.len()) {
                Ok(n) => Bson::Int32(n),
                Err(_) => Bson::Int64(i64::try_from(members.len()).unwrap_or(i64::MAX)),
            },
            Self::Min(expr) => fold_extreme(expr, members, Ordering::Less),
            Self::Max(expr) => fold_extreme(expr, members, Ordering::Greater),
            Self::Avg(expr) => {
                let mut sum = 0.0_f64;
                let mut n = 0_u32;
                for doc in members {
                    match expr.evaluate(doc) {
                        Some(Bson::Int32(i)) => {
                            sum += f64::from(i);
                            n += 1;
                        }
                        Some(Bson::Int64(i)) => {
                            sum += i as f64;
                            n += 1;
                        }
                        Some(Bson::Double(d)) => {
                            sum += d;
                            n += 1;
                        }
                        _ => {}
                    }
                }
                if n == 0 { Bson::Null } else { Bson::Double(sum / f64::from(n)) }
            }
            Self::First(expr) => {
                members.first().and_then(|doc| expr.evaluate(doc)).unwrap_or(Bson::Null)
            }
            Self::Last(expr) => {
                members.last().and_then(|doc| expr.evaluate(doc)).unwrap_or(Bson::Null)
            }
        }
    }
}

/// `$min`/`$max`: missing values are skipped; an empty fold yields Null.
fn fold_extreme(expr: &Expression, members: &[&Document], keep: Ordering) -> Bson {
    let mut best: Option<Bson> = None;
    for doc in members {
        let Some(v) = expr.evaluate(doc) else { continue };
        best = match best {
            None => Some(v),
            Some(b) if compare_values(&v, &b) == keep => Some(v),
            other => other,
        };
    }
    best.unwrap_or(Bson::Null)
}

fn compile_accumulator(name: &str, value: &Bson) -> Result<Accumulator, CommandError> {
    let accumulator_object = || {
        CommandError::Location(40234, format!("The field '{name}' must be an accumulator object"))
    };
    let Bson::Document(doc) = value else {
        return Err(accumulator_object());
    };
    let mut ops = doc.iter();
    let Some((op, operand)) = ops.next() else {
        return Err(accumulator_object());
    };
    if ops.next().is_some() {
        return Err(CommandError::Location(
            40238,
            format!("The field '{name}' must specify one accumulator"),
        ));
    }

    match op.as_str() {
        "$sum" => {
            if matches!(operand, Bson::Array(_)) {
                return Err(CommandError::Location(
                    40237,
                    "The $sum accumulator is a unary operator".into(),
                ));
            }
            Ok(Accumulator::Sum(Expression::compile(operand)?))
        }
        "$count" => {
            if matches!(operand, Bson::Document(d) if d.is_empty()) {
                Ok(Accumulator::Count)
            } else {
                Err(CommandError::Location(
                    40415,
                    "$count takes no arguments, i.e. $count:{}".into(),
                ))
            }
        }
        "$min" => Ok(Accumulator::Min(Expression::compile(operand)?)),
        "$max" => Ok(Accumulator::Max(Expression::compile(operand)?)),
        "$avg" => Ok(Accumulator::Avg(Expression::compile(operand)?)),
        "$first" => Ok(Accumulator::First(Expression::compile(operand)?)),
        "$last" => Ok(Accumulator::Last(Expression::compile(operand)?)),
        other => Err(CommandError::Location(15952, format!("unknown group operator '{other}'"))),
    }
}
