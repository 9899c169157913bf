//! Statement assembly: wraps a compiled condition into the final SELECT and
//! COUNT statements, including sorting and pagination.

use std::fmt;
use std::str::FromStr;

use tracing::debug;

use crate::condition::compile_condition;
use crate::error::{RepositoryError, Result};
use crate::expression::Expression;
use crate::joins::{ENTITY_TABLE, ROOT_ALIAS, Usage};
use crate::session::{CompilationSession, CompilerContext};
use crate::sql::{CompiledQuery, SqlFragment};
use crate::versioning::Versioning;

/// Main table columns every result row starts with, in this order.
pub const META_COLUMNS: [&str; 6] = [
    "contentid",
    "obj_type",
    "obj_id",
    "mother_obj_type",
    "mother_obj_id",
    "updatetimestamp",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sort {
    pub attribute: String,
    pub direction: SortDirection,
}

impl Sort {
    pub fn asc(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            direction: SortDirection::Asc,
        }
    }
    pub fn desc(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            direction: SortDirection::Desc,
        }
    }
}

/// Parses `attribute`, `attribute:asc` or `attribute:desc`.
impl FromStr for Sort {
    type Err = RepositoryError;
    fn from_str(s: &str) -> Result<Self> {
        let (attribute, direction) = match s.rsplit_once(':') {
            Some((attribute, direction)) => (attribute, direction),
            None => (s, "asc"),
        };
        let attribute = attribute.trim();
        if attribute.is_empty() {
            return Err(RepositoryError::Parse {
                message: format!("missing sort attribute in '{s}'"),
                line: None,
                col: None,
            });
        }
        match direction.trim().to_lowercase().as_str() {
            "asc" => Ok(Sort::asc(attribute)),
            "desc" => Ok(Sort::desc(attribute)),
            other => Err(RepositoryError::Parse {
                message: format!("unknown sort direction '{other}'"),
                line: None,
                col: None,
            }),
        }
    }
}

impl fmt::Display for Sort {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.attribute, self.direction.sql().to_lowercase())
    }
}

/// Names of the columns following the meta columns of a result row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultLayout {
    pub prefetched: Vec<String>,
    pub sorted: Vec<String>,
}

/// Rows the caller has to cut from the full result itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slice {
    pub start: usize,
    pub count: Option<usize>,
}

impl Slice {
    pub fn apply<T>(&self, rows: Vec<T>) -> Vec<T> {
        let rows = rows.into_iter().skip(self.start);
        match self.count {
            Some(count) => rows.take(count).collect(),
            None => rows.collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectPlan {
    pub query: CompiledQuery,
    pub layout: ResultLayout,
    /// Set when pagination could not be pushed into the statement.
    pub slice: Option<Slice>,
}

/// Compiles the condition once and assembles statements around it.
pub struct QueryBuilder<'ctx> {
    session: CompilationSession<'ctx>,
    condition: SqlFragment,
    versioning: Versioning,
}

impl<'ctx> QueryBuilder<'ctx> {
    pub fn new(context: &'ctx CompilerContext, expression: &Expression, versioning: Versioning) -> Result<Self> {
        let mut session = CompilationSession::new(context);
        let condition = compile_condition(&mut session, expression)?;
        Ok(Self {
            session,
            condition,
            versioning,
        })
    }

    pub fn session(&self) -> &CompilationSession<'ctx> {
        &self.session
    }

    /// The SELECT statement. Pagination is rendered natively when `native`
    /// is set and the dialect supports it, otherwise it is left to the caller.
    pub fn select(
        &mut self,
        sorts: &[Sort],
        prefetch: &[String],
        start: usize,
        count: Option<usize>,
        native: bool,
    ) -> Result<SelectPlan> {
        let dialect = self.session.dialect();
        let mut columns: Vec<String> = META_COLUMNS
            .iter()
            .map(|column| self.session.column(ROOT_ALIAS, column))
            .collect();
        let mut layout = ResultLayout::default();

        for name in prefetch {
            let descriptor = self.session.context().catalog.lookup(name)?;
            if descriptor.meta {
                continue;
            }
            if let Some(quick) = &descriptor.quick_column {
                columns.push(self.session.column(ROOT_ALIAS, quick));
                layout.prefetched.push(name.clone());
            }
        }

        let mut order_by = Vec::with_capacity(sorts.len());
        for sort in sorts {
            let entry = self.session.resolve(&sort.attribute, Usage::Sort)?;
            order_by.push(format!("{} {}", entry.column, sort.direction.sql()));
            columns.push(entry.column);
            layout.sorted.push(sort.attribute.clone());
        }
        let sorted: Vec<String> = sorts.iter().map(|s| s.attribute.clone()).collect();

        let rendered_columns = columns.join(", ");
        let (mut statement, multiplying) = self.body(&format!("SELECT {rendered_columns}"), &sorted);
        if multiplying > 0 {
            statement.push_text(format!(" GROUP BY {rendered_columns}"));
        }
        if !order_by.is_empty() {
            statement.push_text(format!(" ORDER BY {}", order_by.join(", ")));
        }

        let mut slice = None;
        if start > 0 || count.is_some() {
            match dialect.limit_clause(start, count).filter(|_| native) {
                Some(limit) => {
                    statement.push_text(limit);
                }
                None => slice = Some(Slice { start, count }),
            }
        }

        let query = statement.render();
        debug!(sql = %query.sql, params = query.params.len(), %dialect, "select compiled");
        Ok(SelectPlan { query, layout, slice })
    }

    /// The COUNT statement over distinct content ids.
    pub fn count(&self) -> CompiledQuery {
        let head = format!("SELECT COUNT(DISTINCT {})", self.session.column(ROOT_ALIAS, "contentid"));
        let (statement, _) = self.body(&head, &[]);
        let query = statement.render();
        debug!(sql = %query.sql, params = query.params.len(), "count compiled");
        query
    }

    /// `head FROM ... WHERE ...`, together with the number of emitted joins
    /// that can multiply rows.
    fn body(&self, head: &str, sorted: &[String]) -> (SqlFragment, usize) {
        let dialect = self.session.dialect();
        let joins = self.session.graph().render(dialect, self.versioning, sorted);
        let mut statement = SqlFragment::text(format!(
            "{head} FROM {} {ROOT_ALIAS}",
            self.versioning.table(dialect, ENTITY_TABLE)
        ));
        statement.append(joins.fragment);
        statement.push_text(" WHERE ");
        match self.versioning.predicate(dialect, ENTITY_TABLE, ROOT_ALIAS) {
            Some(predicate) => {
                statement.append(predicate);
                statement.push_text(" AND ");
                statement.append(self.condition.clone().parenthesized());
            }
            None => {
                statement.append(self.condition.clone());
            }
        }
        (statement, joins.multiplying)
    }
}
