//! The boolean expression tree handed to the condition compiler.

use std::fmt;

use crate::datatype::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComparisonOp {
    Eq,
    Neq,
    Gt,
    Gteq,
    Lt,
    Lteq,
    Like,
    NotLike,
}

impl ComparisonOp {
    pub fn sql(&self) -> &'static str {
        match self {
            ComparisonOp::Eq => "=",
            ComparisonOp::Neq => "<>",
            ComparisonOp::Gt => ">",
            ComparisonOp::Gteq => ">=",
            ComparisonOp::Lt => "<",
            ComparisonOp::Lteq => "<=",
            ComparisonOp::Like => "LIKE",
            ComparisonOp::NotLike => "NOT LIKE",
        }
    }
    /// The operator to use when both operands swap sides. Pattern matching
    /// is not symmetric and has no flipped form.
    pub fn flipped(&self) -> Option<ComparisonOp> {
        match self {
            ComparisonOp::Eq => Some(ComparisonOp::Eq),
            ComparisonOp::Neq => Some(ComparisonOp::Neq),
            ComparisonOp::Gt => Some(ComparisonOp::Lt),
            ComparisonOp::Gteq => Some(ComparisonOp::Lteq),
            ComparisonOp::Lt => Some(ComparisonOp::Gt),
            ComparisonOp::Lteq => Some(ComparisonOp::Gteq),
            ComparisonOp::Like | ComparisonOp::NotLike => None,
        }
    }
    pub fn is_pattern(&self) -> bool {
        matches!(self, ComparisonOp::Like | ComparisonOp::NotLike)
    }
}

impl fmt::Display for ComparisonOp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.sql())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// An attribute path such as `name` or `folder.name`.
    Object(String),
    Literal(Value),
    List(Vec<Value>),
}

impl Operand {
    pub fn object(path: impl Into<String>) -> Self {
        Operand::Object(path.into())
    }
    pub fn literal(value: impl Into<Value>) -> Self {
        Operand::Literal(value.into())
    }
    pub fn list<V: Into<Value>>(values: impl IntoIterator<Item = V>) -> Self {
        Operand::List(values.into_iter().map(Into::into).collect())
    }
    pub fn is_null_literal(&self) -> bool {
        matches!(self, Operand::Literal(Value::Null))
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Operand::Object(path) => write!(f, "object.{path}"),
            Operand::Literal(value) => write!(f, "{value}"),
            Operand::List(values) => {
                let rendered: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                write!(f, "[{}]", rendered.join(", "))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    And(Vec<Expression>),
    Or(Vec<Expression>),
    Not(Box<Expression>),
    Comparison {
        op: ComparisonOp,
        left: Operand,
        right: Operand,
    },
    Contains(Operand, Operand),
    NotContains(Operand, Operand),
    IsEmpty(Operand),
    IsNull(Operand),
    IsNotNull(Operand),
    Constant(bool),
}

impl Expression {
    pub fn compare(op: ComparisonOp, left: Operand, right: Operand) -> Self {
        Expression::Comparison { op, left, right }
    }
    /// Shorthand for `object.<path> <op> <literal>`.
    pub fn attribute(path: &str, op: ComparisonOp, value: impl Into<Value>) -> Self {
        Expression::compare(op, Operand::object(path), Operand::literal(value))
    }
    pub fn and(expressions: Vec<Expression>) -> Self {
        Expression::And(expressions)
    }
    pub fn or(expressions: Vec<Expression>) -> Self {
        Expression::Or(expressions)
    }
    pub fn negate(expression: Expression) -> Self {
        Expression::Not(Box::new(expression))
    }

    /// Rewrites comparisons against a null literal: `= null` becomes
    /// `IS NULL`, `<> null` becomes `IS NOT NULL` and every other operator
    /// collapses to a constant. Contains tests are left untouched.
    pub fn rewrite_null_literals(self) -> Expression {
        match self {
            Expression::And(children) => Expression::And(
                children.into_iter().map(Expression::rewrite_null_literals).collect(),
            ),
            Expression::Or(children) => Expression::Or(
                children.into_iter().map(Expression::rewrite_null_literals).collect(),
            ),
            Expression::Not(child) => Expression::Not(Box::new(child.rewrite_null_literals())),
            Expression::Comparison { op, left, right } => {
                let other = match (left.is_null_literal(), right.is_null_literal()) {
                    (false, false) => return Expression::Comparison { op, left, right },
                    (true, true) => None,
                    (true, false) => Some(right),
                    (false, true) => Some(left),
                };
                match (op, other) {
                    (ComparisonOp::Eq, Some(operand)) => Expression::IsNull(operand),
                    (ComparisonOp::Neq, Some(operand)) => Expression::IsNotNull(operand),
                    (ComparisonOp::Eq, None) => Expression::Constant(true),
                    _ => Expression::Constant(false),
                }
            }
            other => other,
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Expression::And(children) | Expression::Or(children) => {
                let separator = if matches!(self, Expression::And(_)) { " && " } else { " || " };
                let rendered: Vec<String> = children.iter().map(|c| c.to_string()).collect();
                write!(f, "({})", rendered.join(separator))
            }
            Expression::Not(child) => write!(f, "!({child})"),
            Expression::Comparison { op, left, right } => {
                let op = match op {
                    ComparisonOp::Eq => "==",
                    ComparisonOp::Neq => "!=",
                    other => other.sql(),
                };
                write!(f, "{left} {op} {right}")
            }
            Expression::Contains(left, right) => write!(f, "{left} CONTAINSONEOF {right}"),
            Expression::NotContains(left, right) => write!(f, "{left} CONTAINSNONE {right}"),
            Expression::IsEmpty(operand) => write!(f, "isempty({operand})"),
            Expression::IsNull(operand) => write!(f, "{operand} == null"),
            Expression::IsNotNull(operand) => write!(f, "{operand} != null"),
            Expression::Constant(value) => write!(f, "{value}"),
        }
    }
}
