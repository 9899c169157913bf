//! SQL text assembled as an ordered list of text and parameter tokens.
//!
//! Fragments are merged depth-first, so the position of every `?` in the
//! rendered text always matches the position of its value in the parameter
//! list, no matter in which order the pieces were compiled.

use std::fmt;
use std::hash::BuildHasherDefault;

use lazy_static::lazy_static;
use regex::Regex;
use seahash::SeaHasher;

use crate::datatype::Value;

pub type NameHasher = BuildHasherDefault<SeaHasher>;

lazy_static! {
    static ref IDENTIFIER: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
}

/// Whether `name` can be embedded in SQL text as a bare identifier.
pub fn is_identifier(name: &str) -> bool {
    IDENTIFIER.is_match(name)
}

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Text(String),
    Param(Value),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SqlFragment {
    tokens: Vec<Token>,
}

impl SqlFragment {
    pub fn new() -> Self {
        Self { tokens: Vec::new() }
    }
    pub fn text(text: impl Into<String>) -> Self {
        let mut fragment = Self::new();
        fragment.push_text(text);
        fragment
    }
    pub fn param(value: Value) -> Self {
        let mut fragment = Self::new();
        fragment.push_param(value);
        fragment
    }
    pub fn push_text(&mut self, text: impl Into<String>) -> &mut Self {
        let text = text.into();
        if text.is_empty() {
            return self;
        }
        // adjacent text tokens are merged to keep the list short
        if let Some(Token::Text(last)) = self.tokens.last_mut() {
            last.push_str(&text);
        } else {
            self.tokens.push(Token::Text(text));
        }
        self
    }
    pub fn push_param(&mut self, value: Value) -> &mut Self {
        self.tokens.push(Token::Param(value));
        self
    }
    pub fn append(&mut self, other: SqlFragment) -> &mut Self {
        for token in other.tokens {
            match token {
                Token::Text(text) => {
                    self.push_text(text);
                }
                Token::Param(value) => {
                    self.push_param(value);
                }
            }
        }
        self
    }
    /// Joins fragments with `separator`, wrapping the result in parentheses
    /// when more than one fragment is given.
    pub fn join(fragments: Vec<SqlFragment>, separator: &str) -> SqlFragment {
        let parenthesize = fragments.len() > 1;
        let mut joined = SqlFragment::new();
        if parenthesize {
            joined.push_text("(");
        }
        for (i, fragment) in fragments.into_iter().enumerate() {
            if i > 0 {
                joined.push_text(separator);
            }
            joined.append(fragment);
        }
        if parenthesize {
            joined.push_text(")");
        }
        joined
    }
    pub fn parenthesized(self) -> SqlFragment {
        let mut wrapped = SqlFragment::text("(");
        wrapped.append(self);
        wrapped.push_text(")");
        wrapped
    }
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
    pub fn param_count(&self) -> usize {
        self.tokens
            .iter()
            .filter(|t| matches!(t, Token::Param(_)))
            .count()
    }
    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }
    /// Renders the placeholder text and the parameters in placeholder order.
    pub fn render(&self) -> CompiledQuery {
        let mut sql = String::new();
        let mut params = Vec::with_capacity(self.param_count());
        for token in &self.tokens {
            match token {
                Token::Text(text) => sql.push_str(text),
                Token::Param(value) => {
                    sql.push('?');
                    params.push(value.clone());
                }
            }
        }
        CompiledQuery { sql, params }
    }
}

/// Final statement text together with its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub sql: String,
    pub params: Vec<Value>,
}

impl CompiledQuery {
    /// Parameters formatted for diagnostics.
    pub fn params_display(&self) -> String {
        let rendered: Vec<String> = self.params.iter().map(|p| p.to_string()).collect();
        format!("[{}]", rendered.join(", "))
    }
}

impl fmt::Display for CompiledQuery {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {}", self.sql, self.params_display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_follow_merge_order() {
        let mut where_clause = SqlFragment::text("a1.value_text = ");
        where_clause.push_param(Value::from("foo"));
        let mut from_clause = SqlFragment::text("from t left join a a1 on a1.name = ");
        from_clause.push_param(Value::from("name"));

        let mut statement = SqlFragment::text("select * ");
        statement.append(from_clause);
        statement.push_text(" where ");
        statement.append(where_clause);

        let compiled = statement.render();
        assert_eq!(
            compiled.sql,
            "select * from t left join a a1 on a1.name = ? where a1.value_text = ?"
        );
        assert_eq!(compiled.params, vec![Value::from("name"), Value::from("foo")]);
    }

    #[test]
    fn join_wraps_only_multiple_fragments() {
        let single = SqlFragment::join(vec![SqlFragment::text("x")], " OR ");
        assert_eq!(single.render().sql, "x");
        let double = SqlFragment::join(vec![SqlFragment::text("x"), SqlFragment::text("y")], " OR ");
        assert_eq!(double.render().sql, "(x OR y)");
    }

    #[test]
    fn identifiers_are_checked() {
        assert!(is_identifier("quick_name"));
        assert!(!is_identifier("1abc"));
        assert!(!is_identifier("a b"));
        assert!(!is_identifier("x;--"));
    }
}
