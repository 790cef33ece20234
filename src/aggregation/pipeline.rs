//! Stage parsing and blocking in-memory pipeline execution.

use bson::{Bson, Document};

use super::group::GroupSpec;
use crate::document::{Path, format_value, get_path, set_path, type_alias};
use crate::errors::CommandError;
use crate::query::{Filter, Projection, RegexCache, SortSpec};

/// Compiled aggregation pipeline.
///
/// Every stage consumes the full output of the stage before it, so `$sort`
/// and `$group` see the whole stream. A leading `$match` is exposed through
/// [`Pipeline::leading_match`] for backend pushdown; the stage still runs
/// in-process over whatever the backend returns.
#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

#[derive(Debug, Clone, PartialEq)]
enum Stage {
    Match(Filter),
    Sort(SortSpec),
    Group(GroupSpec),
    Project(Projection),
    Count(String),
    Limit(i64),
    Skip(i64),
    Unwind(Path),
}

impl Pipeline {
    /// Compiles a pipeline array.
    ///
    /// # Errors
    /// Stage documents must hold exactly one known stage name with a
    /// well-formed operand.
    pub fn compile(stages: &[Bson]) -> Result<Self, CommandError> {
        let mut compiled = Vec::with_capacity(stages.len());
        for stage in stages {
            let Bson::Document(spec) = stage else {
                return Err(CommandError::TypeMismatch(
                    "Each element of the 'pipeline' array must be an object".into(),
                ));
            };
            compiled.push(compile_stage(spec)?);
        }
        Ok(Self { stages: compiled })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// The filter of a leading `$match` stage, if any.
    #[must_use]
    pub fn leading_match(&self) -> Option<&Filter> {
        match self.stages.first() {
            Some(Stage::Match(filter)) => Some(filter),
            _ => None,
        }
    }

    /// Runs every stage over `docs`.
    ///
    /// # Errors
    /// `$project` can fail on documents it cannot reshape; all other stages
    /// are infallible once compiled.
    pub fn execute(
        &self,
        mut docs: Vec<Document>,
        regexes: &RegexCache,
    ) -> Result<Vec<Document>, CommandError> {
        for stage in &self.stages {
            docs = match stage {
                Stage::Match(filter) => {
                    docs.into_iter().filter(|d| filter.matches(d, regexes)).collect()
                }
                Stage::Sort(spec) => {
                    spec.apply(&mut docs);
                    docs
                }
                Stage::Group(spec) => spec.execute(&docs),
                Stage::Project(projection) => {
                    let no_filter = Document::new();
                    let mut out = Vec::with_capacity(docs.len());
                    for doc in &docs {
                        out.push(projection.apply(doc, &no_filter, regexes)?);
                    }
                    out
                }
                Stage::Count(name) => {
                    if docs.is_empty() {
                        Vec::new()
                    } else {
                        let mut counted = Document::new();
                        counted.insert(name.clone(), int_count(docs.len()));
                        vec![counted]
                    }
                }
                Stage::Limit(n) => {
                    docs.truncate(usize::try_from(*n).unwrap_or(usize::MAX));
                    docs
                }
                Stage::Skip(n) => {
                    let skip = usize::try_from(*n).unwrap_or(usize::MAX);
                    docs.into_iter().skip(skip).collect()
                }
                Stage::Unwind(path) => {
                    let mut out = Vec::new();
                    for doc in docs {
                        let value = get_path(&doc, path).cloned();
                        match value {
                            // Missing paths, nulls, and empty arrays drop the
                            // document.
                            None | Some(Bson::Null) => {}
                            Some(Bson::Array(elems)) => {
                                for elem in elems {
                                    let mut unwound = doc.clone();
                                    set_path(&mut unwound, path, elem)?;
                                    out.push(unwound);
                                }
                            }
                            Some(_) => out.push(doc),
                        }
                    }
                    out
                }
            };
        }
        Ok(docs)
    }
}

fn compile_stage(spec: &Document) -> Result<Stage, CommandError> {
    let mut fields = spec.iter();
    let (Some((name, operand)), None) = (fields.next(), fields.next()) else {
        return Err(CommandError::Location(
            40323,
            "A pipeline stage specification object must contain exactly one field.".into(),
        ));
    };

    match name.as_str() {
        "$match" => {
            let Bson::Document(filter) = operand else {
                return Err(CommandError::Location(
                    15959,
                    "the match filter must be an expression in an object".into(),
                ));
            };
            Ok(Stage::Match(Filter::compile(filter)?))
        }
        "$sort" => {
            let Bson::Document(keys) = operand else {
                return Err(CommandError::Location(
                    15973,
                    "the $sort key specification must be an object".into(),
                ));
            };
            if keys.is_empty() {
                return Err(CommandError::Location(
                    15976,
                    "$sort stage must have at least one sort key".into(),
                ));
            }
            Ok(Stage::Sort(SortSpec::compile(keys)?))
        }
        "$group" => {
            let Bson::Document(group) = operand else {
                return Err(CommandError::Location(
                    15947,
                    "a group's fields must be specified in an object".into(),
                ));
            };
            Ok(Stage::Group(GroupSpec::compile(group)?))
        }
        "$project" => {
            let Bson::Document(projection) = operand else {
                return Err(CommandError::Location(
                    15969,
                    "$project specification must be an object".into(),
                ));
            };
            if projection.is_empty() {
                return Err(invalid_project_msg(
                    51272,
                    "projection specification must have at least one field",
                ));
            }
            if projection.keys().any(|k| k.ends_with('$')) {
                return Err(invalid_project_msg(
                    31324,
                    "Cannot use positional projection in aggregation projection",
                ));
            }
            Ok(Stage::Project(Projection::compile(projection).map_err(invalid_project)?))
        }
        "$count" => Ok(Stage::Count(compile_count_field(operand)?)),
        "$limit" => {
            let n = whole_stage_number("$limit", 5107201, "Expected a number in", operand)?;
            if n == 0 {
                return Err(CommandError::Location(15958, "The limit must be positive".into()));
            }
            Ok(Stage::Limit(n))
        }
        "$skip" => {
            let n = whole_stage_number("$skip", 5107200, "Expected an integer", operand)?;
            Ok(Stage::Skip(n))
        }
        "$unwind" => match operand {
            Bson::String(s) => Ok(Stage::Unwind(compile_unwind_path(s)?)),
            Bson::Document(_) => Err(CommandError::NotImplemented(
                "$unwind stage options are not implemented yet".into(),
            )),
            other => Err(CommandError::Location(
                15981,
                format!(
                    "expected either a string or an object as specification for $unwind \
                     stage, got {}",
                    type_alias(other)
                ),
            )),
        },
        other => Err(CommandError::Location(
            40324,
            format!("Unrecognized pipeline stage name: '{other}'"),
        )),
    }
}

/// `$project` validation failures carry the stage's message prefix.
fn invalid_project(err: CommandError) -> CommandError {
    match err {
        CommandError::Location(code, msg) => invalid_project_msg(code, &msg),
        other => other,
    }
}

fn invalid_project_msg(code: i32, msg: &str) -> CommandError {
    CommandError::Location(code, format!("Invalid $project :: caused by :: {msg}"))
}

fn compile_count_field(operand: &Bson) -> Result<String, CommandError> {
    let Bson::String(name) = operand else {
        return Err(CommandError::Location(
            40156,
            "the count field must be a non-empty string".into(),
        ));
    };
    if name.is_empty() {
        return Err(CommandError::Location(
            40157,
            "the count field must always be nonempty".into(),
        ));
    }
    if name.starts_with('$') {
        return Err(CommandError::Location(
            40158,
            "the count field cannot be a '$'-prefixed path".into(),
        ));
    }
    if name.contains('.') {
        return Err(CommandError::Location(40160, "the count field cannot contain '.'".into()));
    }
    Ok(name.clone())
}

fn compile_unwind_path(s: &str) -> Result<Path, CommandError> {
    if s.is_empty() {
        return Err(CommandError::Location(28812, "no path specified to $unwind stage".into()));
    }
    let Some(rest) = s.strip_prefix('$') else {
        return Err(CommandError::Location(
            28818,
            format!("path option to $unwind stage should be prefixed with a '$': {s}"),
        ));
    };
    if rest.is_empty() {
        return Err(CommandError::Location(
            40352,
            "Expression cannot be constructed with empty string".into(),
        ));
    }
    if rest.starts_with('$') {
        return Err(CommandError::Location(
            16410,
            "Expression field names may not start with '$'. \
             Consider using $getField or $setField."
                .into(),
        ));
    }
    Path::parse(rest)
}

/// Whole-number coercion shared by `$limit` and `$skip`. `number_detail` is
/// the wording for operands that are not numbers at all.
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn whole_stage_number(
    stage: &str,
    code: i32,
    number_detail: &str,
    operand: &Bson,
) -> Result<i64, CommandError> {
    let invalid = |detail: &str, shown: String| {
        CommandError::Location(
            code,
            format!("invalid argument to {stage} stage: {detail}: {stage}: {shown}"),
        )
    };
    let n = match operand {
        Bson::Int32(n) => i64::from(*n),
        Bson::Int64(n) => *n,
        Bson::Double(d) => {
            if !d.is_finite() || d.fract() != 0.0 {
                return Err(invalid("Expected an integer", format_value(operand)));
            }
            if *d < i64::MIN as f64 || *d >= i64::MAX as f64 {
                return Err(invalid(
                    "Cannot represent as a 64-bit integer",
                    format_value(operand),
                ));
            }
            *d as i64
        }
        _ => return Err(invalid(number_detail, format_value(operand))),
    };
    if n < 0 {
        return Err(invalid("Expected a non-negative number in", n.to_string()));
    }
    Ok(n)
}

fn int_count(n: usize) -> Bson {
    match i32::try_from(n) {
        Ok(small) => Bson::Int32(small),
        Err(_) => Bson::Int64(i64::try_from(n).unwrap_or(i64::MAX)),
    }
}

#[cfg(test)]
mod tests {
    use bson::doc;

    use super::*;

    fn run(stages: &[Bson], docs: Vec<Document>) -> Vec<Document> {
        let pipeline = Pipeline::compile(stages).expect("pipeline must compile");
        pipeline.execute(docs, &RegexCache::default()).expect("pipeline must run")
    }

    fn compile_err(stage: Bson) -> CommandError {
        Pipeline::compile(&[stage]).expect_err("stage must be rejected")
    }

    #[test]
    fn empty_pipeline_passes_documents_through() {
        let docs = vec![doc! {"_id": 1}, doc! {"_id": 2}];
        assert_eq!(run(&[], docs.clone()), docs);
    }

    #[test]
    fn match_group_sort_compose() {
        let docs = vec![
            doc! {"_id": 1, "w": "xyz", "n": 5},
            doc! {"_id": 2, "w": "abc", "n": 0},
            doc! {"_id": 3, "w": "xyz", "n": 7},
            doc! {"_id": 4, "w": "abc", "n": 3},
        ];
        let stages = [
            doc! {"$match": {"n": {"$gt": 0}}}.into(),
            doc! {"$group": {"_id": "$w", "total": {"$sum": "$n"}}}.into(),
            doc! {"$sort": {"total": 1}}.into(),
        ];
        let out = run(&stages, docs);
        assert_eq!(
            out,
            vec![doc! {"_id": "abc", "total": 3}, doc! {"_id": "xyz", "total": 12}]
        );
    }

    #[test]
    fn unwind_substitutes_each_element_in_place() {
        let docs = vec![
            doc! {"_id": 1, "v": [1, 2], "k": "a"},
            doc! {"_id": 2, "v": 5},
            doc! {"_id": 3, "v": []},
            doc! {"_id": 4, "v": null},
            doc! {"_id": 5},
        ];
        let out = run(&[doc! {"$unwind": "$v"}.into()], docs);
        assert_eq!(
            out,
            vec![
                doc! {"_id": 1, "v": 1, "k": "a"},
                doc! {"_id": 1, "v": 2, "k": "a"},
                doc! {"_id": 2, "v": 5},
            ]
        );
    }

    #[test]
    fn count_stage_emits_one_document_or_none() {
        let docs = vec![doc! {"_id": 1}, doc! {"_id": 2}];
        assert_eq!(run(&[doc! {"$count": "total"}.into()], docs), vec![doc! {"total": 2}]);
        assert_eq!(run(&[doc! {"$count": "total"}.into()], Vec::new()), Vec::<Document>::new());
    }

    #[test]
    fn limit_and_skip_bound_the_stream() {
        let docs: Vec<Document> = (0..5).map(|i| doc! {"_id": i}).collect();
        let stages = [doc! {"$skip": 1}.into(), doc! {"$limit": 2}.into()];
        assert_eq!(run(&stages, docs), vec![doc! {"_id": 1}, doc! {"_id": 2}]);
    }

    #[test]
    fn project_stage_reshapes_documents() {
        let docs = vec![doc! {"_id": 1, "a": {"b": 2, "c": 3}, "d": 4}];
        let out = run(&[doc! {"$project": {"a.b": 1}}.into()], docs);
        assert_eq!(out, vec![doc! {"_id": 1, "a": {"b": 2}}]);
    }

    #[test]
    fn leading_match_is_exposed_for_pushdown() {
        let stages = [doc! {"$match": {"a": 1}}.into(), doc! {"$limit": 1}.into()];
        let pipeline = Pipeline::compile(&stages).expect("pipeline must compile");
        assert!(pipeline.leading_match().is_some());
        let stages = [doc! {"$limit": 1}.into()];
        let pipeline = Pipeline::compile(&stages).expect("pipeline must compile");
        assert!(pipeline.leading_match().is_none());
    }

    #[test]
    fn stages_must_be_single_field_documents() {
        let err = compile_err(doc! {"$match": {}, "$limit": 1}.into());
        assert_eq!(err.code(), 40323);
        assert_eq!(
            err.to_string(),
            "A pipeline stage specification object must contain exactly one field."
        );
        let err = compile_err(Bson::Int32(1));
        assert_eq!(err.code(), 14);
        let err = compile_err(doc! {"$tee": 1}.into());
        assert_eq!(err.code(), 40324);
        assert_eq!(err.to_string(), "Unrecognized pipeline stage name: '$tee'");
    }

    #[test]
    fn match_and_sort_operands_must_be_objects() {
        let err = compile_err(doc! {"$match": 1}.into());
        assert_eq!(err.code(), 15959);
        let err = compile_err(doc! {"$sort": "count"}.into());
        assert_eq!(err.code(), 15973);
        assert_eq!(err.to_string(), "the $sort key specification must be an object");
        let err = compile_err(doc! {"$sort": {}}.into());
        assert_eq!(err.code(), 15976);
        let err = compile_err(doc! {"$group": [1]}.into());
        assert_eq!(err.code(), 15947);
    }

    #[test]
    fn project_stage_validation_is_prefixed() {
        let err = compile_err(doc! {"$project": 1}.into());
        assert_eq!(err.code(), 15969);
        let err = compile_err(doc! {"$project": {}}.into());
        assert_eq!(err.code(), 51272);
        let err = compile_err(doc! {"$project": {"a.$": 1}}.into());
        assert_eq!(err.code(), 31324);
        assert_eq!(
            err.to_string(),
            "Invalid $project :: caused by :: Cannot use positional projection in \
             aggregation projection"
        );
        let err = compile_err(doc! {"$project": {"$x": 1}}.into());
        assert_eq!(err.code(), 16410);
        assert_eq!(
            err.to_string(),
            "Invalid $project :: caused by :: FieldPath field names may not start with '$'. \
             Consider using $getField or $setField."
        );
    }

    #[test]
    fn count_field_spelling_is_checked() {
        let err = compile_err(doc! {"$count": 1}.into());
        assert_eq!(err.code(), 40156);
        let err = compile_err(doc! {"$count": ""}.into());
        assert_eq!(err.code(), 40157);
        let err = compile_err(doc! {"$count": "$t"}.into());
        assert_eq!(err.code(), 40158);
        let err = compile_err(doc! {"$count": "a.b"}.into());
        assert_eq!(err.code(), 40160);
    }

    #[test]
    fn limit_and_skip_coerce_whole_numbers() {
        let err = compile_err(doc! {"$limit": true}.into());
        assert_eq!(err.code(), 5107201);
        assert_eq!(
            err.to_string(),
            "invalid argument to $limit stage: Expected a number in: $limit: true"
        );
        let err = compile_err(doc! {"$limit": 1.5}.into());
        assert_eq!(
            err.to_string(),
            "invalid argument to $limit stage: Expected an integer: $limit: 1.5"
        );
        let err = compile_err(doc! {"$limit": -2}.into());
        assert_eq!(
            err.to_string(),
            "invalid argument to $limit stage: Expected a non-negative number in: $limit: -2"
        );
        let err = compile_err(doc! {"$limit": 0}.into());
        assert_eq!(err.code(), 15958);
        assert_eq!(err.to_string(), "The limit must be positive");

        let err = compile_err(doc! {"$skip": "x"}.into());
        assert_eq!(err.code(), 5107200);
        assert_eq!(
            err.to_string(),
            "invalid argument to $skip stage: Expected an integer: $skip: \"x\""
        );
        // Zero is a legal skip.
        assert!(Pipeline::compile(&[doc! {"$skip": 0}.into()]).is_ok());
    }

    #[test]
    fn unwind_operand_shape_is_checked() {
        let err = compile_err(doc! {"$unwind": 1}.into());
        assert_eq!(err.code(), 15981);
        assert_eq!(
            err.to_string(),
            "expected either a string or an object as specification for $unwind stage, got int"
        );
        let err = compile_err(doc! {"$unwind": ""}.into());
        assert_eq!(err.code(), 28812);
        let err = compile_err(doc! {"$unwind": "v"}.into());
        assert_eq!(err.code(), 28818);
        assert_eq!(
            err.to_string(),
            "path option to $unwind stage should be prefixed with a '$': v"
        );
        let err = compile_err(doc! {"$unwind": "$"}.into());
        assert_eq!(err.code(), 40352);
        let err = compile_err(doc! {"$unwind": "$$v"}.into());
        assert_eq!(err.code(), 16410);
        let err = compile_err(doc! {"$unwind": {"path": "$v"}}.into());
        assert_eq!(err.code(), 238);
    }
}
