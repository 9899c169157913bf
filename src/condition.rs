//! Condition compiler: turns an expression tree into a WHERE fragment.
//!
//! Every attribute referenced by the tree is resolved through the
//! compilation session, so compiling a condition also collects the joins
//! the FROM clause has to provide.

use tracing::trace;

use crate::datatype::Value;
use crate::error::{RepositoryError, Result};
use crate::expression::{ComparisonOp, Expression, Operand};
use crate::joins::{ColumnNameEntry, Usage};
use crate::session::CompilationSession;
use crate::sql::SqlFragment;

const TRUE: &str = "1 = 1";
const FALSE: &str = "1 = 0";

/// How the two sides of an object comparison are reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonKind {
    /// Both columns are on already available rows.
    Inline,
    /// One side needs a join of its own.
    HalfJoined,
    /// Both sides are joined, each with its own alias.
    Joined,
}

/// Compiles `expression` into a condition fragment.
pub fn compile_condition(session: &mut CompilationSession, expression: &Expression) -> Result<SqlFragment> {
    let rewritten = expression.clone().rewrite_null_literals();
    compile(session, &rewritten)
}

fn compile(session: &mut CompilationSession, expression: &Expression) -> Result<SqlFragment> {
    match expression {
        Expression::And(children) => compile_junction(session, children, " AND ", TRUE),
        Expression::Or(children) => compile_junction(session, children, " OR ", FALSE),
        Expression::Not(child) => {
            let mut negated = SqlFragment::text("NOT ");
            negated.append(compile(session, child)?.parenthesized());
            Ok(negated)
        }
        Expression::Constant(value) => Ok(constant(*value)),
        Expression::Comparison { op, left, right } => compile_comparison(session, *op, left, right),
        Expression::Contains(left, right) => compile_contains(session, left, right, false),
        Expression::NotContains(left, right) => compile_contains(session, left, right, true),
        Expression::IsEmpty(operand) => match operand {
            Operand::Object(path) => {
                let entry = session.resolve(path, Usage::Filter)?;
                Ok(SqlFragment::text(format!(
                    "({column} IS NULL OR {column} = '')",
                    column = entry.column
                )))
            }
            Operand::Literal(value) => Ok(constant(value.is_null() || value.is_empty_string())),
            Operand::List(values) => Ok(constant(values.is_empty())),
        },
        Expression::IsNull(operand) => compile_null_test(session, operand, false),
        Expression::IsNotNull(operand) => compile_null_test(session, operand, true),
    }
}

fn constant(value: bool) -> SqlFragment {
    SqlFragment::text(if value { TRUE } else { FALSE })
}

fn compile_junction(
    session: &mut CompilationSession,
    children: &[Expression],
    separator: &str,
    empty: &str,
) -> Result<SqlFragment> {
    if children.is_empty() {
        return Ok(SqlFragment::text(empty));
    }
    let mut compiled = Vec::with_capacity(children.len());
    for child in children {
        compiled.push(compile(session, child)?);
    }
    Ok(SqlFragment::join(compiled, separator))
}

fn compile_null_test(session: &mut CompilationSession, operand: &Operand, negated: bool) -> Result<SqlFragment> {
    match operand {
        Operand::Object(path) => {
            let entry = session.resolve(path, Usage::Filter)?;
            let test = if negated { "IS NOT NULL" } else { "IS NULL" };
            Ok(SqlFragment::text(format!("{} {test}", entry.column)))
        }
        Operand::Literal(value) => Ok(constant(value.is_null() != negated)),
        Operand::List(_) => Ok(constant(negated)),
    }
}

fn compile_comparison(
    session: &mut CompilationSession,
    op: ComparisonOp,
    left: &Operand,
    right: &Operand,
) -> Result<SqlFragment> {
    match (left, right) {
        (Operand::Object(left), Operand::Object(right)) => compare_objects(session, op, left, right),
        (Operand::Object(path), Operand::Literal(value)) => compare_literal(session, op, path, value),
        (Operand::Literal(value), Operand::Object(path)) => {
            let flipped = op.flipped().ok_or_else(|| {
                RepositoryError::UnsupportedOperation(format!(
                    "{op} needs the attribute on the left-hand side"
                ))
            })?;
            compare_literal(session, flipped, path, value)
        }
        (Operand::Literal(left), Operand::Literal(right)) => {
            let mut fragment = SqlFragment::param(pattern_value(op, left.clone()));
            fragment.push_text(format!(" {} ", op.sql()));
            fragment.push_param(pattern_value(op, right.clone()));
            Ok(fragment)
        }
        (left, right) => Err(RepositoryError::UnsupportedOperation(format!(
            "cannot compare {left} {op} {right}, lists need CONTAINSONEOF or CONTAINSNONE"
        ))),
    }
}

fn comparable(entry: &ColumnNameEntry) -> Result<()> {
    if entry.descriptor.attribute_type.is_binary() {
        return Err(RepositoryError::UnsupportedOperation(format!(
            "binary attribute '{}' cannot be compared",
            entry.attribute
        )));
    }
    Ok(())
}

fn compare_objects(
    session: &mut CompilationSession,
    op: ComparisonOp,
    left: &str,
    right: &str,
) -> Result<SqlFragment> {
    let left_entry = session.resolve(left, Usage::Filter)?;
    // the same joined attribute on both sides gets a second, independent join
    let right_entry = if left == right && left_entry.joined {
        session.resolve_unshared(right, Usage::Filter)?
    } else {
        session.resolve(right, Usage::Filter)?
    };
    comparable(&left_entry)?;
    comparable(&right_entry)?;
    let kind = match (left_entry.joined, right_entry.joined) {
        (false, false) => ComparisonKind::Inline,
        (true, true) => ComparisonKind::Joined,
        _ => ComparisonKind::HalfJoined,
    };
    trace!(?kind, left, right, "object comparison");
    Ok(SqlFragment::text(format!(
        "{} {} {}",
        left_entry.column,
        op.sql(),
        right_entry.column
    )))
}

fn compare_literal(
    session: &mut CompilationSession,
    op: ComparisonOp,
    path: &str,
    value: &Value,
) -> Result<SqlFragment> {
    let entry = session.resolve(path, Usage::Filter)?;
    comparable(&entry)?;
    let value = if op.is_pattern() {
        pattern_value(op, value.clone())
    } else {
        value.clone().coerce(entry.descriptor.attribute_type)
    };
    let empty = value.is_empty_string();
    let mut fragment = SqlFragment::text(format!("{} {} ", entry.column, op.sql()));
    fragment.push_param(value);
    if empty {
        match op {
            ComparisonOp::Eq | ComparisonOp::Gt | ComparisonOp::Gteq | ComparisonOp::Lt | ComparisonOp::Lteq => {
                fragment.push_text(format!(" OR {} IS NULL", entry.column));
                return Ok(fragment.parenthesized());
            }
            ComparisonOp::Neq => {
                fragment.push_text(format!(" AND {} IS NOT NULL", entry.column));
                return Ok(fragment.parenthesized());
            }
            ComparisonOp::Like | ComparisonOp::NotLike => {}
        }
    }
    Ok(fragment)
}

/// LIKE patterns use `*` as wildcard, SQL uses `%`.
fn pattern_value(op: ComparisonOp, value: Value) -> Value {
    if !op.is_pattern() {
        return value;
    }
    match value {
        Value::Text(pattern) => Value::Text(pattern.replace('*', "%")),
        Value::Integer(i) => Value::Text(i.to_string()),
        Value::Double(d) => Value::Text(d.to_string()),
        other => other,
    }
}

fn compile_contains(
    session: &mut CompilationSession,
    left: &Operand,
    right: &Operand,
    negated: bool,
) -> Result<SqlFragment> {
    let name = if negated { "CONTAINSNONE" } else { "CONTAINSONEOF" };
    let Operand::Object(path) = left else {
        return Err(RepositoryError::UnsupportedOperation(format!(
            "{name} needs an attribute on the left-hand side, got {left}"
        )));
    };
    let values: Vec<Value> = match right {
        Operand::List(values) => values.clone(),
        Operand::Literal(value) => vec![value.clone()],
        Operand::Object(other) => {
            return Err(RepositoryError::UnsupportedOperation(format!(
                "{name} between the attributes '{path}' and '{other}'"
            )));
        }
    };
    let entry = session.resolve(path, Usage::Filter)?;
    comparable(&entry)?;
    if values.is_empty() {
        return Ok(constant(negated));
    }
    let (op, separator) = if negated { ("<>", " AND ") } else { ("=", " OR ") };
    let tests = values
        .into_iter()
        .map(|value| {
            let mut test = SqlFragment::text(format!("{} {op} ", entry.column));
            test.push_param(value.coerce(entry.descriptor.attribute_type));
            test
        })
        .collect();
    Ok(SqlFragment::join(tests, separator))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{AttributeCatalog, AttributeDescriptor, StaticMetadata};
    use crate::datatype::AttributeType;
    use crate::dialect::DialectKind;
    use crate::session::CompilerContext;
    use std::sync::Arc;
    use std::time::Duration;

    fn context() -> CompilerContext {
        let metadata = StaticMetadata::new(vec![
            AttributeDescriptor::new("name", AttributeType::Text),
            AttributeDescriptor::new("title", AttributeType::Text).optimized("quick_title"),
            AttributeDescriptor::new("age", AttributeType::Integer).optimized("quick_age"),
            AttributeDescriptor::new("size", AttributeType::Integer),
            AttributeDescriptor::new("tags", AttributeType::Text).multivalue(),
            AttributeDescriptor::new("image", AttributeType::Binary),
        ]);
        CompilerContext::new(
            Arc::new(AttributeCatalog::new(metadata, Duration::from_secs(60))),
            DialectKind::Sqlite,
        )
    }

    fn compile_sql(expression: &Expression) -> (String, Vec<Value>, usize) {
        let context = context();
        let mut session = CompilationSession::new(&context);
        let compiled = compile_condition(&mut session, expression).unwrap().render();
        (compiled.sql, compiled.params, session.graph().joins().len())
    }

    #[test]
    fn optimized_pairs_compare_inline() {
        let (sql, params, joins) = compile_sql(&Expression::compare(
            ComparisonOp::Lt,
            Operand::object("age"),
            Operand::object("title"),
        ));
        assert_eq!(sql, "cm.quick_age < cm.quick_title");
        assert!(params.is_empty());
        assert_eq!(joins, 0);
    }

    #[test]
    fn mixed_pairs_join_one_side() {
        let (sql, _, joins) = compile_sql(&Expression::compare(
            ComparisonOp::Eq,
            Operand::object("size"),
            Operand::object("age"),
        ));
        assert_eq!(sql, "a1.value_int = cm.quick_age");
        assert_eq!(joins, 1);
    }

    #[test]
    fn identical_joined_attributes_are_not_coalesced() {
        let (sql, _, joins) = compile_sql(&Expression::compare(
            ComparisonOp::Neq,
            Operand::object("tags"),
            Operand::object("tags"),
        ));
        assert_eq!(sql, "a1.value_text <> a2.value_text");
        assert_eq!(joins, 2);
    }

    #[test]
    fn empty_string_widens_to_null() {
        let (sql, params, _) = compile_sql(&Expression::attribute("title", ComparisonOp::Eq, ""));
        assert_eq!(sql, "(cm.quick_title = ? OR cm.quick_title IS NULL)");
        assert_eq!(params, vec![Value::from("")]);
        let (sql, _, _) = compile_sql(&Expression::attribute("name", ComparisonOp::Neq, ""));
        assert_eq!(sql, "(a1.value_text <> ? AND a1.value_text IS NOT NULL)");
        let (sql, _, _) = compile_sql(&Expression::attribute("name", ComparisonOp::Lteq, ""));
        assert_eq!(sql, "(a1.value_text <= ? OR a1.value_text IS NULL)");
        let (sql, _, _) = compile_sql(&Expression::attribute("name", ComparisonOp::Like, ""));
        assert_eq!(sql, "a1.value_text LIKE ?");
    }

    #[test]
    fn contains_compiles_to_disjunction() {
        let (sql, params, joins) = compile_sql(&Expression::Contains(
            Operand::object("tags"),
            Operand::list(["a", "b"]),
        ));
        assert_eq!(sql, "(a1.value_text = ? OR a1.value_text = ?)");
        assert_eq!(params, vec![Value::from("a"), Value::from("b")]);
        assert_eq!(joins, 1);
        let (sql, _, _) = compile_sql(&Expression::NotContains(
            Operand::object("tags"),
            Operand::list(["a", "b"]),
        ));
        assert_eq!(sql, "(a1.value_text <> ? AND a1.value_text <> ?)");
    }

    #[test]
    fn empty_contains_is_constant() {
        let empty: Vec<Value> = Vec::new();
        let (sql, params, _) = compile_sql(&Expression::Contains(
            Operand::object("tags"),
            Operand::List(empty.clone()),
        ));
        assert_eq!(sql, FALSE);
        assert!(params.is_empty());
        let (sql, _, _) = compile_sql(&Expression::NotContains(Operand::object("tags"), Operand::List(empty)));
        assert_eq!(sql, TRUE);
    }

    #[test]
    fn contains_between_objects_is_unsupported() {
        let context = context();
        let mut session = CompilationSession::new(&context);
        let err = compile_condition(
            &mut session,
            &Expression::Contains(Operand::object("tags"), Operand::object("name")),
        )
        .unwrap_err();
        assert!(matches!(err, RepositoryError::UnsupportedOperation(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn null_literals_become_null_tests() {
        let (sql, params, _) = compile_sql(&Expression::attribute("name", ComparisonOp::Eq, Value::Null));
        assert_eq!(sql, "a1.value_text IS NULL");
        assert!(params.is_empty());
        let (sql, _, _) = compile_sql(&Expression::attribute("age", ComparisonOp::Neq, Value::Null));
        assert_eq!(sql, "cm.quick_age IS NOT NULL");
        let (sql, _, joins) = compile_sql(&Expression::attribute("age", ComparisonOp::Gt, Value::Null));
        assert_eq!(sql, FALSE);
        assert_eq!(joins, 0);
    }

    #[test]
    fn wildcards_and_flipping() {
        let (sql, params, _) = compile_sql(&Expression::attribute("name", ComparisonOp::Like, "fo*"));
        assert_eq!(sql, "a1.value_text LIKE ?");
        assert_eq!(params, vec![Value::from("fo%")]);
        let (sql, params, _) = compile_sql(&Expression::compare(
            ComparisonOp::Lt,
            Operand::literal(5),
            Operand::object("age"),
        ));
        assert_eq!(sql, "cm.quick_age > ?");
        assert_eq!(params, vec![Value::Integer(5)]);
    }

    #[test]
    fn literals_are_coerced_to_the_attribute_type() {
        let (_, params, _) = compile_sql(&Expression::attribute("age", ComparisonOp::Gteq, "18"));
        assert_eq!(params, vec![Value::Integer(18)]);
    }

    #[test]
    fn junctions_and_negation() {
        let (sql, params, joins) = compile_sql(&Expression::and(vec![
            Expression::attribute("name", ComparisonOp::Eq, "foo"),
            Expression::or(vec![
                Expression::attribute("age", ComparisonOp::Gt, 5),
                Expression::negate(Expression::IsEmpty(Operand::object("name"))),
            ]),
        ]));
        assert_eq!(
            sql,
            "(a1.value_text = ? AND (cm.quick_age > ? OR NOT ((a1.value_text IS NULL OR a1.value_text = ''))))"
        );
        assert_eq!(params, vec![Value::from("foo"), Value::Integer(5)]);
        assert_eq!(joins, 1);
        assert_eq!(compile_sql(&Expression::and(vec![])).0, TRUE);
        assert_eq!(compile_sql(&Expression::or(vec![])).0, FALSE);
    }

    #[test]
    fn binary_attributes_cannot_be_compared() {
        let context = context();
        let mut session = CompilationSession::new(&context);
        let err = compile_condition(&mut session, &Expression::attribute("image", ComparisonOp::Eq, "x"))
            .unwrap_err();
        assert!(matches!(err, RepositoryError::UnsupportedOperation(_)));
    }

    #[test]
    fn compilation_is_deterministic() {
        let expression = Expression::and(vec![
            Expression::attribute("name", ComparisonOp::Eq, "foo"),
            Expression::Contains(Operand::object("tags"), Operand::list(["x"])),
            Expression::attribute("size", ComparisonOp::Gt, 3),
        ]);
        assert_eq!(compile_sql(&expression), compile_sql(&expression));
    }
}
