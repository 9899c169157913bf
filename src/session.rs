//! Compilation session: the mutable state of compiling one statement.
//!
//! A session owns the alias allocators and the join graph. Attribute paths
//! are resolved through it, every resolution is memoized by path, and every
//! join a resolution needs is appended to the graph. Sessions are created
//! per compilation and never shared between threads.

use std::sync::Arc;

use tracing::trace;

use crate::alias::AliasAllocator;
use crate::catalog::{AttributeCatalog, AttributeDescriptor};
use crate::datatype::{AttributeType, Value};
use crate::dialect::DialectKind;
use crate::error::{RepositoryError, Result};
use crate::joins::{
    ATTRIBUTE_ALIAS_PREFIX, ColumnNameEntry, ENTITY_ALIAS_PREFIX, JoinClause, JoinGraph, JoinTable,
    ROOT_ALIAS, Usage,
};
use crate::sql::SqlFragment;

/// What every compilation needs from the outside world.
#[derive(Clone)]
pub struct CompilerContext {
    pub catalog: Arc<AttributeCatalog>,
    pub dialect: DialectKind,
}

impl CompilerContext {
    pub fn new(catalog: Arc<AttributeCatalog>, dialect: DialectKind) -> Self {
        Self { catalog, dialect }
    }
}

pub struct CompilationSession<'ctx> {
    context: &'ctx CompilerContext,
    attribute_aliases: AliasAllocator,
    entity_aliases: AliasAllocator,
    graph: JoinGraph,
}

impl<'ctx> CompilationSession<'ctx> {
    pub fn new(context: &'ctx CompilerContext) -> Self {
        Self {
            context,
            attribute_aliases: AliasAllocator::new(),
            entity_aliases: AliasAllocator::new(),
            graph: JoinGraph::new(),
        }
    }
    pub fn context(&self) -> &'ctx CompilerContext {
        self.context
    }
    pub fn dialect(&self) -> DialectKind {
        self.context.dialect
    }
    pub fn graph(&self) -> &JoinGraph {
        &self.graph
    }
    /// Aliases issued so far for attribute table and entity table joins.
    pub fn alias_counts(&self) -> (usize, usize) {
        (self.attribute_aliases.count(), self.entity_aliases.count())
    }
    /// `alias.column` with the column folded for the dialect.
    pub fn column(&self, alias: &str, column: &str) -> String {
        format!("{alias}.{}", self.context.dialect.fold_identifier(column))
    }

    /// Resolves an attribute path to its column, creating the joins on first use.
    pub fn resolve(&mut self, path: &str, usage: Usage) -> Result<ColumnNameEntry> {
        if let Some(entry) = self.graph.entry(path) {
            if usage == Usage::Filter && !entry.mandatory {
                self.graph.promote(path);
            }
            return self
                .graph
                .entry(path)
                .cloned()
                .ok_or_else(|| RepositoryError::AttributeNotFound(path.to_string()));
        }
        let entry = self.create_entry(path, usage)?;
        self.graph.insert_entry(entry.clone());
        Ok(entry)
    }

    /// Resolves a path with joins of its own, bypassing the memoized entry.
    /// Used when one comparison references the same joined attribute twice.
    pub fn resolve_unshared(&mut self, path: &str, usage: Usage) -> Result<ColumnNameEntry> {
        self.create_entry(path, usage)
    }

    fn create_entry(&mut self, path: &str, usage: Usage) -> Result<ColumnNameEntry> {
        if path.is_empty() || path.split('.').any(str::is_empty) {
            return Err(RepositoryError::AttributeNotFound(path.to_string()));
        }
        let (base_alias, name) = match path.rsplit_once('.') {
            Some((parent_path, name)) => {
                let parent = self.resolve(parent_path, usage)?;
                (self.chain_alias(&parent, path, usage)?, name)
            }
            None => (ROOT_ALIAS.to_string(), path),
        };
        let descriptor = self.context.catalog.resolve(name)?;
        let entry = self.build_entry(path, descriptor, &base_alias, usage)?;
        trace!(attribute = path, column = %entry.column, joined = entry.joined, "attribute resolved");
        Ok(entry)
    }

    /// The entity alias exposing the row `parent` links to, joining it on first use.
    fn chain_alias(&mut self, parent: &ColumnNameEntry, path: &str, usage: Usage) -> Result<String> {
        if !parent.is_chainable() {
            return Err(RepositoryError::InvalidAttributePath {
                path: path.to_string(),
                segment: parent.attribute.clone(),
            });
        }
        if let Some(alias) = &parent.chain_alias {
            return Ok(alias.clone());
        }
        let alias = self.entity_aliases.next(ENTITY_ALIAS_PREFIX);
        let on = SqlFragment::text(format!(
            "{} = {}",
            self.column(&alias, "contentid"),
            parent.column
        ));
        self.graph.push_join(JoinClause {
            owner: parent.attribute.clone(),
            table: JoinTable::Entity,
            alias: alias.clone(),
            on,
            mandatory: usage == Usage::Filter,
            multiplies_rows: false,
        });
        self.graph.set_chain_alias(&parent.attribute, &alias);
        Ok(alias)
    }

    fn build_entry(
        &mut self,
        path: &str,
        descriptor: Arc<AttributeDescriptor>,
        base_alias: &str,
        usage: Usage,
    ) -> Result<ColumnNameEntry> {
        let mandatory = usage == Usage::Filter;
        if descriptor.attribute_type == AttributeType::ForeignLinkObject {
            return self.build_foreign_link(path, descriptor, base_alias, mandatory);
        }
        if let Some(quick) = &descriptor.quick_column {
            return Ok(ColumnNameEntry {
                attribute: path.to_string(),
                column: self.column(base_alias, quick),
                descriptor: Arc::clone(&descriptor),
                joined: false,
                chain_alias: None,
                mandatory,
            });
        }
        let value_column = descriptor.attribute_type.value_column().ok_or_else(|| {
            RepositoryError::UnsupportedOperation(format!("attribute '{path}' has no value column"))
        })?;
        let alias = self.attribute_aliases.next(ATTRIBUTE_ALIAS_PREFIX);
        let mut on = SqlFragment::text(format!(
            "{} = {} AND {} = ",
            self.column(&alias, "contentid"),
            self.column(base_alias, "contentid"),
            self.column(&alias, "name"),
        ));
        on.push_param(Value::Text(descriptor.name.clone()));
        self.graph.push_join(JoinClause {
            owner: path.to_string(),
            table: JoinTable::Attribute,
            alias: alias.clone(),
            on,
            mandatory,
            multiplies_rows: true,
        });
        Ok(ColumnNameEntry {
            attribute: path.to_string(),
            column: self.column(&alias, value_column),
            descriptor,
            joined: true,
            chain_alias: None,
            mandatory,
        })
    }

    /// Foreign links enumerate the objects of the linked type whose link
    /// attribute points back at the base object.
    fn build_foreign_link(
        &mut self,
        path: &str,
        descriptor: Arc<AttributeDescriptor>,
        base_alias: &str,
        mandatory: bool,
    ) -> Result<ColumnNameEntry> {
        let (Some(linked_type), Some(link_name)) = (
            descriptor.linked_object_type,
            descriptor.foreign_link_attribute.as_deref(),
        ) else {
            return Err(RepositoryError::Config(format!(
                "foreign link attribute '{}' is incomplete",
                descriptor.name
            )));
        };
        let link = self.context.catalog.resolve(link_name)?;
        if link.attribute_type != AttributeType::LinkObject {
            return Err(RepositoryError::InvalidAttributePath {
                path: path.to_string(),
                segment: link_name.to_string(),
            });
        }
        let entity = self.entity_aliases.next(ENTITY_ALIAS_PREFIX);
        let base_contentid = self.column(base_alias, "contentid");
        let mut on = SqlFragment::text(format!("{} = ", self.column(&entity, "obj_type")));
        on.push_param(Value::Integer(linked_type));
        match &link.quick_column {
            Some(quick) => {
                on.push_text(format!(" AND {} = {base_contentid}", self.column(&entity, quick)));
            }
            None => {
                let backlink = self.attribute_aliases.next(ATTRIBUTE_ALIAS_PREFIX);
                let mut backlink_on = SqlFragment::text(format!("{} = ", self.column(&backlink, "name")));
                backlink_on.push_param(Value::Text(link.name.clone()));
                backlink_on.push_text(format!(
                    " AND {} = {base_contentid}",
                    self.column(&backlink, "value_text")
                ));
                self.graph.push_join(JoinClause {
                    owner: path.to_string(),
                    table: JoinTable::Attribute,
                    alias: backlink.clone(),
                    on: backlink_on,
                    mandatory,
                    multiplies_rows: true,
                });
                on.push_text(format!(
                    " AND {} = {}",
                    self.column(&entity, "contentid"),
                    self.column(&backlink, "contentid")
                ));
            }
        }
        self.graph.push_join(JoinClause {
            owner: path.to_string(),
            table: JoinTable::Entity,
            alias: entity.clone(),
            on,
            mandatory,
            multiplies_rows: true,
        });
        Ok(ColumnNameEntry {
            attribute: path.to_string(),
            column: self.column(&entity, "contentid"),
            descriptor,
            joined: true,
            chain_alias: Some(entity),
            mandatory,
        })
    }
}
