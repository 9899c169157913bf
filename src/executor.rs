//! Statement execution and the mapping of result rows to content objects.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use rusqlite::{Connection, params_from_iter};
use serde::Serialize;
use tracing::debug;

use crate::datatype::{ContentId, Value};
use crate::error::{RepositoryError, Result};
use crate::query::{META_COLUMNS, ResultLayout};
use crate::sql::CompiledQuery;

/// Runs compiled statements against a relational backend. Calls block until
/// the backend answers.
pub trait SqlExecutor: Send + Sync {
    fn query(&self, query: &CompiledQuery) -> Result<Vec<Vec<Value>>>;
}

pub struct SqliteExecutor {
    connection: Arc<Mutex<Connection>>,
}

impl SqliteExecutor {
    pub fn new(connection: Arc<Mutex<Connection>>) -> Self {
        Self { connection }
    }
    /// Opens a database file, or a private in-memory database for `":memory:"`.
    pub fn open(path: &str) -> Result<Self> {
        let connection = if path == ":memory:" {
            Connection::open_in_memory()
        } else {
            Connection::open(path)
        }
        .map_err(|e| RepositoryError::DatasourceUnavailable(format!("{path}: {e}")))?;
        Ok(Self::new(Arc::new(Mutex::new(connection))))
    }
    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.connection)
    }
}

impl SqlExecutor for SqliteExecutor {
    fn query(&self, query: &CompiledQuery) -> Result<Vec<Vec<Value>>> {
        let failed = |e: rusqlite::Error| RepositoryError::QueryFailed {
            sql: query.sql.clone(),
            params: query.params_display(),
            message: e.to_string(),
        };
        let connection = self
            .connection
            .lock()
            .map_err(|e| RepositoryError::DatasourceUnavailable(e.to_string()))?;
        let mut statement = connection.prepare_cached(&query.sql).map_err(failed)?;
        let width = statement.column_count();
        let mut rows = statement
            .query(params_from_iter(query.params.iter()))
            .map_err(failed)?;
        let mut result = Vec::new();
        while let Some(row) = rows.next().map_err(failed)? {
            let mut values = Vec::with_capacity(width);
            for i in 0..width {
                values.push(row.get::<_, Value>(i).map_err(failed)?);
            }
            result.push(values);
        }
        debug!(rows = result.len(), "statement executed");
        Ok(result)
    }
}

/// One entity of a query result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContentObject {
    pub content_id: ContentId,
    pub mother: Option<ContentId>,
    pub update_timestamp: Option<i64>,
    /// Prefetched and sorted attribute values, keyed by attribute path.
    pub attributes: BTreeMap<String, Value>,
}

impl ContentObject {
    /// Maps a positional row: the meta columns first, then the columns
    /// named by `layout`.
    pub fn from_row(row: Vec<Value>, layout: &ResultLayout) -> Result<Self> {
        let expected = META_COLUMNS.len() + layout.prefetched.len() + layout.sorted.len();
        if row.len() != expected {
            return Err(RepositoryError::Persistence(format!(
                "result row has {} columns, expected {expected}",
                row.len()
            )));
        }
        let mut values = row.into_iter();
        let mut meta = Vec::with_capacity(META_COLUMNS.len());
        for _ in META_COLUMNS {
            meta.push(values.next().unwrap_or(Value::Null));
        }
        let content_id = match (meta[1].as_i64(), meta[2].as_i64()) {
            (Some(object_type), Some(object_id)) => ContentId::new(object_type, object_id),
            _ => meta[0]
                .as_text()
                .ok_or_else(|| RepositoryError::Persistence("result row without content id".to_string()))?
                .parse()?,
        };
        let mother = match (meta[3].as_i64(), meta[4].as_i64()) {
            (Some(object_type), Some(object_id)) if object_type > 0 && object_id > 0 => {
                Some(ContentId::new(object_type, object_id))
            }
            _ => None,
        };
        let mut attributes = BTreeMap::new();
        for (name, value) in layout.prefetched.iter().chain(layout.sorted.iter()).zip(values) {
            attributes.insert(name.clone(), value);
        }
        Ok(Self {
            content_id,
            mother,
            update_timestamp: meta[5].as_i64(),
            attributes,
        })
    }
    pub fn get(&self, attribute: &str) -> Option<&Value> {
        self.attributes.get(attribute)
    }
}
