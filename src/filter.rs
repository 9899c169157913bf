//! Filters: an expression compiled to SQL, optionally followed by post
//! filters that are evaluated on the mapped result objects.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use pest::Parser;
use pest::error::LineColLocation;
use pest::iterators::Pair;
use pest_derive::Parser;

use crate::datatype::Value;
use crate::error::{RepositoryError, Result};
use crate::executor::ContentObject;
use crate::expression::{ComparisonOp, Expression, Operand};

#[derive(Parser)]
#[grammar = "filter.pest"]
struct FilterParser;

/// A condition that cannot be expressed in SQL. Checked against every
/// object the statement returns.
pub trait PostFilter: Send + Sync {
    fn matches(&self, object: &ContentObject) -> bool;
}

impl<F> PostFilter for F
where
    F: Fn(&ContentObject) -> bool + Send + Sync,
{
    fn matches(&self, object: &ContentObject) -> bool {
        self(object)
    }
}

#[derive(Clone)]
pub struct Filter {
    expression: Expression,
    post_filters: Vec<Arc<dyn PostFilter>>,
}

impl Filter {
    pub fn new(expression: Expression) -> Self {
        Self {
            expression,
            post_filters: Vec::new(),
        }
    }
    /// Parses a rule such as `object.name == "foo" && object.age > 5`.
    pub fn parse(rule: &str) -> Result<Self> {
        Ok(Self::new(parse_expression(rule)?))
    }
    pub fn with_post_filter(mut self, post_filter: impl PostFilter + 'static) -> Self {
        self.post_filters.push(Arc::new(post_filter));
        self
    }
    pub fn expression(&self) -> &Expression {
        &self.expression
    }
    pub fn has_post_filters(&self) -> bool {
        !self.post_filters.is_empty()
    }
    /// Whether `object` passes every post filter.
    pub fn accepts(&self, object: &ContentObject) -> bool {
        self.post_filters.iter().all(|f| f.matches(object))
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Filter")
            .field("expression", &self.expression)
            .field("post_filters", &self.post_filters.len())
            .finish()
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.expression)
    }
}

impl FromStr for Filter {
    type Err = RepositoryError;
    fn from_str(s: &str) -> Result<Self> {
        Filter::parse(s)
    }
}

impl From<Expression> for Filter {
    fn from(expression: Expression) -> Self {
        Filter::new(expression)
    }
}

pub fn parse_expression(rule: &str) -> Result<Expression> {
    let mut pairs = FilterParser::parse(Rule::filter, rule).map_err(|e| {
        let (line, col) = match e.line_col {
            LineColLocation::Pos(position) => position,
            LineColLocation::Span(start, _) => start,
        };
        RepositoryError::Parse {
            message: e.variant.message().into_owned(),
            line: Some(line),
            col: Some(col),
        }
    })?;
    let filter = pairs.next().ok_or_else(|| syntax("empty filter"))?;
    let expression = filter
        .into_inner()
        .find(|p| p.as_rule() == Rule::expression)
        .ok_or_else(|| syntax("empty filter"))?;
    build_expression(expression)
}

fn syntax(message: impl Into<String>) -> RepositoryError {
    RepositoryError::Parse {
        message: message.into(),
        line: None,
        col: None,
    }
}

fn build_expression(pair: Pair<Rule>) -> Result<Expression> {
    match pair.as_rule() {
        Rule::expression | Rule::conjunction => {
            let disjunction = pair.as_rule() == Rule::expression;
            let mut children = Vec::new();
            for inner in pair.into_inner() {
                if !matches!(inner.as_rule(), Rule::or_op | Rule::and_op) {
                    children.push(build_expression(inner)?);
                }
            }
            Ok(match (children.len(), disjunction) {
                (1, _) => children.remove(0),
                (_, true) => Expression::or(children),
                (_, false) => Expression::and(children),
            })
        }
        Rule::unary => {
            let mut inner = pair.into_inner();
            let first = inner.next().ok_or_else(|| syntax("empty term"))?;
            if first.as_rule() == Rule::not_op {
                let negated = inner.next().ok_or_else(|| syntax("nothing to negate"))?;
                Ok(Expression::negate(build_expression(negated)?))
            } else {
                build_expression(first)
            }
        }
        Rule::isempty => {
            let operand = pair.into_inner().next().ok_or_else(|| syntax("isempty without operand"))?;
            Ok(Expression::IsEmpty(build_operand(operand)?))
        }
        Rule::comparison => {
            let mut inner = pair.into_inner();
            let (Some(left), Some(operator), Some(right)) = (inner.next(), inner.next(), inner.next()) else {
                return Err(syntax("incomplete comparison"));
            };
            let left = build_operand(left)?;
            let right = build_operand(right)?;
            let operator = operator
                .as_str()
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
                .to_uppercase();
            let op = match operator.as_str() {
                "==" | "=" => ComparisonOp::Eq,
                "!=" | "<>" => ComparisonOp::Neq,
                ">" => ComparisonOp::Gt,
                ">=" => ComparisonOp::Gteq,
                "<" => ComparisonOp::Lt,
                "<=" => ComparisonOp::Lteq,
                "LIKE" => ComparisonOp::Like,
                "NOT LIKE" => ComparisonOp::NotLike,
                "CONTAINSONEOF" => return Ok(Expression::Contains(left, right)),
                "CONTAINSNONE" => return Ok(Expression::NotContains(left, right)),
                other => return Err(syntax(format!("unknown operator '{other}'"))),
            };
            Ok(Expression::compare(op, left, right))
        }
        other => Err(syntax(format!("unexpected {other:?}"))),
    }
}

fn build_operand(pair: Pair<Rule>) -> Result<Operand> {
    match pair.as_rule() {
        Rule::object => {
            let path = pair.as_str().trim_start_matches("object.");
            Ok(Operand::object(path))
        }
        Rule::list => {
            let mut values = Vec::new();
            for literal in pair.into_inner() {
                values.push(build_literal(literal)?);
            }
            Ok(Operand::List(values))
        }
        _ => Ok(Operand::Literal(build_literal(pair)?)),
    }
}

fn build_literal(pair: Pair<Rule>) -> Result<Value> {
    match pair.as_rule() {
        Rule::string => {
            let inner = pair.into_inner().next().map(|p| p.as_str()).unwrap_or("");
            Ok(Value::Text(unescape(inner)))
        }
        Rule::number => {
            let text = pair.as_str();
            if text.contains('.') {
                text.parse::<f64>()
                    .map(Value::Double)
                    .map_err(|e| syntax(format!("invalid number '{text}': {e}")))
            } else {
                text.parse::<i64>()
                    .map(Value::Integer)
                    .map_err(|e| syntax(format!("invalid number '{text}': {e}")))
            }
        }
        Rule::null => Ok(Value::Null),
        // booleans are stored as integers
        Rule::boolean => Ok(Value::Integer(i64::from(pair.as_str().eq_ignore_ascii_case("true")))),
        other => Err(syntax(format!("unexpected {other:?} in literal position"))),
    }
}

fn unescape(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            result.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => result.push('\n'),
            Some('t') => result.push('\t'),
            Some(other) => result.push(other),
            None => result.push('\\'),
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comparisons_and_precedence() {
        let expression = parse_expression(r#"object.name == "foo" && object.age > 5 || object.x != null"#).unwrap();
        assert_eq!(
            expression,
            Expression::or(vec![
                Expression::and(vec![
                    Expression::attribute("name", ComparisonOp::Eq, "foo"),
                    Expression::attribute("age", ComparisonOp::Gt, 5),
                ]),
                Expression::attribute("x", ComparisonOp::Neq, Value::Null),
            ])
        );
    }

    #[test]
    fn keywords_are_case_insensitive() {
        let expression =
            parse_expression("NOT (object.title like 'a*') and object.folder.name Not Like \"b*\"").unwrap();
        assert_eq!(
            expression,
            Expression::and(vec![
                Expression::negate(Expression::attribute("title", ComparisonOp::Like, "a*")),
                Expression::attribute("folder.name", ComparisonOp::NotLike, "b*"),
            ])
        );
    }

    #[test]
    fn contains_and_isempty() {
        let expression =
            parse_expression(r#"object.tags CONTAINSONEOF ["a", 'b'] || !isempty(object.x) || object.t containsnone []"#)
                .unwrap();
        assert_eq!(
            expression,
            Expression::or(vec![
                Expression::Contains(Operand::object("tags"), Operand::list(["a", "b"])),
                Expression::negate(Expression::IsEmpty(Operand::object("x"))),
                Expression::NotContains(Operand::object("t"), Operand::List(vec![])),
            ])
        );
    }

    #[test]
    fn literals() {
        let expression = parse_expression(r#"object.a >= -1.5 && object.b == true && "it\"s" == object.c"#).unwrap();
        assert_eq!(
            expression,
            Expression::and(vec![
                Expression::attribute("a", ComparisonOp::Gteq, -1.5),
                Expression::attribute("b", ComparisonOp::Eq, 1),
                Expression::compare(ComparisonOp::Eq, Operand::literal("it\"s"), Operand::object("c")),
            ])
        );
    }

    #[test]
    fn errors_carry_positions() {
        match parse_expression("object.name == ") {
            Err(RepositoryError::Parse { line, col, .. }) => {
                assert_eq!(line, Some(1));
                assert!(col.is_some());
            }
            other => panic!("expected a parse error, got {other:?}"),
        }
        assert!(parse_expression("name == 'x'").is_err());
        assert!(parse_expression("object.name === 'x'").is_err());
    }

    #[test]
    fn post_filters_accept_closures() {
        let filter = Filter::parse("object.age > 1")
            .unwrap()
            .with_post_filter(|object: &ContentObject| object.content_id.object_id() % 2 == 0);
        assert!(filter.has_post_filters());
        assert_eq!(filter.to_string(), "object.age > 1");
    }
}
