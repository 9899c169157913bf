//! Join graph: the column each referenced attribute resolves to and the
//! joins needed to reach it, kept in first-reference order.

use std::collections::HashMap;
use std::sync::Arc;

use crate::catalog::AttributeDescriptor;
use crate::dialect::DialectKind;
use crate::sql::{NameHasher, SqlFragment};
use crate::versioning::Versioning;

/// Alias of the main table every statement starts from.
pub const ROOT_ALIAS: &str = "cm";
pub const ENTITY_TABLE: &str = "contentmap";
pub const ATTRIBUTE_TABLE: &str = "contentattribute";
pub const ATTRIBUTE_ALIAS_PREFIX: &str = "a";
pub const ENTITY_ALIAS_PREFIX: &str = "f";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinTable {
    Entity,
    Attribute,
}

impl JoinTable {
    pub fn name(&self) -> &'static str {
        match self {
            JoinTable::Entity => ENTITY_TABLE,
            JoinTable::Attribute => ATTRIBUTE_TABLE,
        }
    }
}

/// Whether an attribute is referenced by the condition (its joins are
/// always emitted) or only by the sort order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Usage {
    Filter,
    Sort,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinClause {
    /// Attribute path the join was created for.
    pub owner: String,
    pub table: JoinTable,
    pub alias: String,
    /// Live join condition, including its bind parameters.
    pub on: SqlFragment,
    pub mandatory: bool,
    /// Joins that can produce more than one row per entity.
    pub multiplies_rows: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnNameEntry {
    pub attribute: String,
    /// Column expression, e.g. `cm.quick_name` or `a1.value_text`.
    pub column: String,
    pub descriptor: Arc<AttributeDescriptor>,
    /// False when the column lives on an already joined entity row.
    pub joined: bool,
    /// Entity alias exposing the linked object's row, once the attribute was chained.
    pub chain_alias: Option<String>,
    pub mandatory: bool,
}

impl ColumnNameEntry {
    pub fn is_chainable(&self) -> bool {
        self.descriptor.attribute_type.is_link()
    }
}

#[derive(Debug, Default)]
pub struct JoinGraph {
    entries: HashMap<String, ColumnNameEntry, NameHasher>,
    joins: Vec<JoinClause>,
}

/// The rendered join list of one statement.
#[derive(Debug, Clone, Default)]
pub struct RenderedJoins {
    pub fragment: SqlFragment,
    pub emitted: usize,
    pub multiplying: usize,
}

impl JoinGraph {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn entry(&self, attribute: &str) -> Option<&ColumnNameEntry> {
        self.entries.get(attribute)
    }
    pub fn insert_entry(&mut self, entry: ColumnNameEntry) {
        self.entries.insert(entry.attribute.clone(), entry);
    }
    pub fn push_join(&mut self, join: JoinClause) {
        self.joins.push(join);
    }
    pub fn set_chain_alias(&mut self, attribute: &str, alias: &str) {
        if let Some(entry) = self.entries.get_mut(attribute) {
            entry.chain_alias = Some(alias.to_string());
        }
    }
    /// Marks `attribute` and every join on its path as required by the condition.
    pub fn promote(&mut self, attribute: &str) {
        for (path, entry) in self.entries.iter_mut() {
            if on_path(path, attribute) {
                entry.mandatory = true;
            }
        }
        for join in self.joins.iter_mut() {
            if on_path(&join.owner, attribute) {
                join.mandatory = true;
            }
        }
    }
    pub fn joins(&self) -> &[JoinClause] {
        &self.joins
    }
    /// Renders ` LEFT JOIN ...` for every mandatory join plus the sort-only
    /// joins that one of `sorted` needs, in the order they were created.
    pub fn render(&self, dialect: DialectKind, versioning: Versioning, sorted: &[String]) -> RenderedJoins {
        let mut rendered = RenderedJoins::default();
        for join in &self.joins {
            if !join.mandatory && !sorted.iter().any(|s| on_path(&join.owner, s)) {
                continue;
            }
            rendered.fragment.push_text(format!(
                " LEFT JOIN {} {} ON ",
                versioning.table(dialect, join.table.name()),
                join.alias
            ));
            rendered.fragment.append(join.on.clone());
            if let Some(predicate) = versioning.predicate(dialect, join.table.name(), &join.alias) {
                rendered.fragment.push_text(" AND ");
                rendered.fragment.append(predicate);
            }
            rendered.emitted += 1;
            if join.multiplies_rows {
                rendered.multiplying += 1;
            }
        }
        rendered
    }
}

/// Whether `owner` is `path` itself or one of its parent segments.
fn on_path(owner: &str, path: &str) -> bool {
    path == owner
        || (path.len() > owner.len() && path.starts_with(owner) && path.as_bytes()[owner.len()] == b'.')
}
